//! Error taxonomy for scheduled jobs and whole transfers.
//!
//! Job internals report `eyre::Report`s with path context. The scheduler wraps
//! those into [`TaskError`] so callers can tell a job that failed from one
//! that never produced a result. [`TransferError`] is what the orchestrator
//! hands back to its caller:
//! - `InvalidInput`: rejected before any job was scheduled (client fault)
//! - everything else: failed after work started (server fault)

use std::fmt;
use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Identifier assigned by the scheduler at submission time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(pub u64);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Failure of a single scheduled job.
#[derive(Debug, Error)]
pub enum TaskError {
    /// The job ran and returned an error.
    #[error("{kind} job {id} failed: {report:#}")]
    Failed {
        id: TaskId,
        kind: &'static str,
        report: eyre::Report,
    },
    /// The job stopped without producing a result (panic or lost channel).
    #[error("{kind} job {id} terminated abnormally: {reason}")]
    Aborted {
        id: TaskId,
        kind: &'static str,
        reason: String,
    },
}

impl TaskError {
    pub fn id(&self) -> TaskId {
        match self {
            TaskError::Failed { id, .. } | TaskError::Aborted { id, .. } => *id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            TaskError::Failed { kind, .. } | TaskError::Aborted { kind, .. } => kind,
        }
    }

    pub fn is_abnormal(&self) -> bool {
        matches!(self, TaskError::Aborted { .. })
    }
}

/// Which side is at fault for a failed transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    Client,
    Server,
}

#[derive(Debug, Error)]
pub enum TransferError {
    #[error("invalid transfer request: {0}")]
    InvalidInput(String),

    #[error("failed to prepare workspace {}: {source}", path.display())]
    Workspace {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("{} job(s) failed: {}", .0.len(), first_failure(.0))]
    Aggregate(Vec<TaskError>),

    #[error("archive step failed: {0}")]
    Archive(#[source] TaskError),
}

impl TransferError {
    pub fn failure_class(&self) -> FailureClass {
        match self {
            TransferError::InvalidInput(_) => FailureClass::Client,
            _ => FailureClass::Server,
        }
    }
}

fn first_failure(errors: &[TaskError]) -> String {
    errors
        .first()
        .map(|err| err.to_string())
        .unwrap_or_else(|| "no error recorded".to_string())
}

pub type TransferResult<T> = std::result::Result<T, TransferError>;

#[cfg(test)]
mod tests {
    use super::*;
    use eyre::eyre;

    #[test]
    fn failed_task_keeps_report_chain() {
        let report = eyre!("permission denied").wrap_err("copy /src/a.txt");
        let err = TaskError::Failed {
            id: TaskId(3),
            kind: "copy",
            report,
        };
        let msg = err.to_string();
        assert!(msg.contains("copy job #3 failed"));
        assert!(msg.contains("copy /src/a.txt"));
        assert!(msg.contains("permission denied"));
        assert!(!err.is_abnormal());
    }

    #[test]
    fn aggregate_leads_with_first_failure() {
        let err = TransferError::Aggregate(vec![
            TaskError::Aborted {
                id: TaskId(1),
                kind: "copy",
                reason: "panicked".into(),
            },
            TaskError::Failed {
                id: TaskId(2),
                kind: "metadata",
                report: eyre!("stat failed"),
            },
        ]);
        let msg = err.to_string();
        assert!(msg.starts_with("2 job(s) failed: copy job #1 terminated abnormally"));
        assert_eq!(err.failure_class(), FailureClass::Server);
    }

    #[test]
    fn invalid_input_is_client_fault() {
        let err = TransferError::InvalidInput("missing path".into());
        assert_eq!(err.failure_class(), FailureClass::Client);
    }
}
