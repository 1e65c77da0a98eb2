//! Offline-download task monitor and media organizer

pub mod api;
pub mod app;
pub mod config;
pub mod db;
pub mod jobs;
pub mod services;

pub use app::AppState;
