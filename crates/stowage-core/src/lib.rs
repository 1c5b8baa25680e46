//! Stage a directory tree, describe every file in it, and archive the copy.
//!
//! A [`scheduler::TaskScheduler`] bounds how many jobs run at once. The
//! [`orchestrator::TransferOrchestrator`] submits the copy and metadata jobs
//! side by side, then archives the staged copy once both have finished.

pub mod archive;
pub mod checksum;
pub mod config;
pub mod copy;
pub mod errors;
pub mod format;
pub mod logger;
pub mod metadata;
pub mod orchestrator;
pub mod owner;
pub mod scheduler;
pub mod walker;

pub use config::StowageConfig;
pub use errors::{FailureClass, TaskError, TaskId, TransferError};
pub use orchestrator::{TransferOrchestrator, TransferReport, TransferRequest};
pub use scheduler::{Job, TaskHandle, TaskScheduler};
