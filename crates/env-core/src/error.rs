//! Typed errors shared across the manager and registry layers.

use thiserror::Error;

/// A caller's await was cancelled via its cancellation token.
///
/// The underlying shared operation keeps running for other callers; only
/// this caller's wait is rejected.
#[derive(Debug, Error)]
#[error("operation cancelled")]
pub struct Cancelled;

/// An operation was invoked on a manager whose capability flags exclude it.
///
/// Callers are expected to consult [`ManagerInfo`](crate::provider::ManagerInfo)
/// before calling `create` or `remove`; hitting this is a caller bug, not a
/// provider fault.
#[derive(Debug, Error)]
#[error("{operation} is not supported by {manager}")]
pub struct UnsupportedOperation {
    pub manager: String,
    pub operation: &'static str,
}
