//! Background jobs

pub mod task_monitor;

pub use task_monitor::{
    CycleSummary, FixedInterval, IntervalSource, MonitorStatus, RandomInterval, TaskMonitor,
};
