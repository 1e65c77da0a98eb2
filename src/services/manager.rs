//! Services manager for long-running background services.
//!
//! Services register with the manager and are started/stopped together.
//! Start order is registration order; stop order is the reverse.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Serialize;
use tracing::{info, warn};

/// Health status of a service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

#[derive(Debug, Clone, Serialize)]
pub struct ServiceHealth {
    pub status: HealthStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ServiceHealth {
    pub fn healthy() -> Self {
        Self {
            status: HealthStatus::Healthy,
            message: None,
        }
    }

    pub fn degraded(message: impl Into<String>) -> Self {
        Self {
            status: HealthStatus::Degraded,
            message: Some(message.into()),
        }
    }

    pub fn unhealthy(message: impl Into<String>) -> Self {
        Self {
            status: HealthStatus::Unhealthy,
            message: Some(message.into()),
        }
    }
}

/// A service that can be started, stopped and health-checked by the manager.
///
/// Implement this for components that run background tasks or timers.
/// Stateless utilities (parser, planner, remote client) do not need it.
#[async_trait]
pub trait Service: Send + Sync + 'static {
    /// Unique name for logging and lookup
    fn name(&self) -> &str;

    /// Start background work. Must be idempotent.
    async fn start(&self) -> Result<()>;

    /// Stop background work and wait for in-flight work to drain. Must be idempotent.
    async fn stop(&self) -> Result<()>;

    async fn restart(&self) -> Result<()> {
        self.stop().await?;
        self.start().await
    }

    async fn health(&self) -> Result<ServiceHealth> {
        Ok(ServiceHealth::healthy())
    }
}

#[derive(Default, Clone)]
pub struct ServicesManager {
    services: Vec<Arc<dyn Service>>,
}

impl ServicesManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, service: Arc<dyn Service>) {
        self.services.push(service);
    }

    pub async fn start_all(&self) -> Result<()> {
        for service in &self.services {
            service
                .start()
                .await
                .with_context(|| format!("Failed to start service '{}'", service.name()))?;
            info!(service = %service.name(), "Service started");
        }
        Ok(())
    }

    /// Stop every service in reverse order; failures are logged and skipped
    pub async fn stop_all(&self) {
        for service in self.services.iter().rev() {
            match service.stop().await {
                Ok(()) => info!(service = %service.name(), "Service stopped"),
                Err(e) => warn!(service = %service.name(), error = %e, "Service failed to stop"),
            }
        }
    }

    /// Health of every service; a failing check is reported as unhealthy
    pub async fn health_all(&self) -> HashMap<String, ServiceHealth> {
        let mut out = HashMap::new();
        for service in &self.services {
            let health = match service.health().await {
                Ok(h) => h,
                Err(e) => ServiceHealth::unhealthy(e.to_string()),
            };
            out.insert(service.name().to_string(), health);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    struct Recorder {
        name: &'static str,
        log: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl Service for Recorder {
        fn name(&self) -> &str {
            self.name
        }

        async fn start(&self) -> Result<()> {
            self.log.lock().push(format!("start {}", self.name));
            Ok(())
        }

        async fn stop(&self) -> Result<()> {
            self.log.lock().push(format!("stop {}", self.name));
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_stop_runs_in_reverse_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut manager = ServicesManager::new();
        for name in ["a", "b"] {
            manager.register(Arc::new(Recorder {
                name,
                log: log.clone(),
            }));
        }

        manager.start_all().await.unwrap();
        manager.stop_all().await;

        assert_eq!(
            *log.lock(),
            vec!["start a", "start b", "stop b", "stop a"]
        );
        let health = manager.health_all().await;
        assert_eq!(health["a"].status, HealthStatus::Healthy);
    }
}
