//! Queue-level error type.

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum QueueError {
    /// Every worker is gone; nothing will pick the run up.
    #[error("run queue is closed")]
    Closed,
}

impl From<QueueError> for engine::EngineError {
    fn from(err: QueueError) -> Self {
        engine::EngineError::Scheduling(err.to_string())
    }
}
