//! Business logic services

pub mod download_client;
pub mod filename_parser;
pub mod filesystem;
pub mod magnet;
pub mod manager;
pub mod organizer;
pub mod path_planner;
pub mod rate_limiter;
pub mod tasks;

pub use download_client::{DownloadClient, HttpDownloadClient, RemoteError, RemoteFile, RemoteStatus, RemoteTask};
pub use filename_parser::{ParseFailure, ParsedIdentifier, ParserRules};
pub use filesystem::{FileOpError, FileOperations, LocalFileOperations};
pub use manager::{HealthStatus, Service, ServiceHealth, ServicesManager};
pub use organizer::{OrganizeError, OrganizerService};
pub use path_planner::PlanError;
pub use tasks::{TaskError, TaskService};
