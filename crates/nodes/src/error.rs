//! Node-level error type.

use thiserror::Error;

/// Errors returned by a service's `dispatch` method.
///
/// The engine uses the variant to classify run failures:
/// - `Misconfigured`: the node's configuration cannot be dispatched as is.
///   Surfaced as `NodeMisconfigured` so it is told apart from transient faults.
/// - `Failed`: any other business-logic failure.
/// - `NotDispatchable`: a trigger asked to produce data without an event.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NodeError {
    /// The service is not fully configured.
    #[error("service is misconfigured: {0}")]
    Misconfigured(String),

    /// The service ran and failed.
    #[error("service dispatch failed: {0}")]
    Failed(String),

    /// The trigger cannot be dispatched until an external event happens.
    #[error("trigger cannot be dispatched without an event")]
    NotDispatchable,
}
