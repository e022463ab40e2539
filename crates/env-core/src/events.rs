//! Change events emitted by managers and re-broadcast by the registry.

use crate::environment::PythonEnvironment;
use crate::provider::Scope;

pub(crate) const CHANNEL_CAPACITY: usize = 64;

/// How a manager's collection changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectionChangeKind {
    Add,
    Remove,
    Update,
}

/// A collection-level change: the affected environments, tagged with the
/// originating manager. Fired after a completed refresh and after
/// incremental single-path inserts.
#[derive(Debug, Clone)]
pub struct CollectionEvent {
    pub manager_id: String,
    pub kind: CollectionChangeKind,
    pub environments: Vec<PythonEnvironment>,
}

/// A selection change for one scope.
#[derive(Debug, Clone)]
pub struct EnvironmentChangedEvent {
    pub manager_id: String,
    pub scope: Scope,
    pub old: Option<PythonEnvironment>,
    pub new: Option<PythonEnvironment>,
}
