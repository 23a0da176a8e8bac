pub mod config;
pub mod logging;

pub mod checksum;
pub mod control;
pub mod error;
pub mod extractor;
pub mod files;
pub mod job_db;
pub mod jobs;
pub mod progress;
pub mod retry;
pub mod runner;
pub mod updater;

pub use error::{ServiceError, ServiceResult};
