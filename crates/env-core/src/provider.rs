//! The contract every environment discovery backend implements.
//!
//! Providers are trusted, in-process collaborators handed to the registry
//! exactly once at startup. A provider only supplies raw discovery and
//! resolution; the wrapping [`EnvironmentManager`](crate::manager::EnvironmentManager)
//! owns caching, refresh deduplication, and event publication, so providers
//! may be called while a previous pass is still running without having to
//! guard against it themselves.

use crate::environment::PythonEnvironment;
use crate::error::UnsupportedOperation;
use anyhow::Result;
use async_trait::async_trait;
use std::path::{Path, PathBuf};

/// A project path, or the absence of one.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Scope {
    /// No workspace folder; selections apply process-wide.
    Global,
    /// A workspace folder rooted at the given path.
    Project(PathBuf),
}

impl Scope {
    pub fn project(path: impl Into<PathBuf>) -> Self {
        Scope::Project(path.into())
    }

    pub fn path(&self) -> Option<&Path> {
        match self {
            Scope::Global => None,
            Scope::Project(path) => Some(path),
        }
    }
}

/// Static identity and capabilities of a manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagerInfo {
    /// Globally unique id, e.g. `"builtin:venv"`.
    pub id: String,
    pub name: String,
    pub display_name: String,
    /// Package manager consumers should pair with this manager's
    /// environments.
    pub preferred_package_manager: String,
    pub supports_create: bool,
    pub supports_remove: bool,
}

impl ManagerInfo {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        display_name: impl Into<String>,
        preferred_package_manager: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            display_name: display_name.into(),
            preferred_package_manager: preferred_package_manager.into(),
            supports_create: false,
            supports_remove: false,
        }
    }

    pub fn with_create(mut self) -> Self {
        self.supports_create = true;
        self
    }

    pub fn with_remove(mut self) -> Self {
        self.supports_remove = true;
        self
    }
}

/// Raw discovery operations a provider supplies.
#[async_trait]
pub trait EnvironmentProvider: Send + Sync {
    fn info(&self) -> &ManagerInfo;

    /// Run a full discovery pass and return everything found.
    ///
    /// A provider whose backing tool is not installed returns an empty list;
    /// absence of a tool is a steady state, not a fault. `hard` requests
    /// that the provider also discard its own internal caches (memoized tool
    /// paths and the like), not just the manager's collection.
    async fn discover(&self, hard: bool) -> Result<Vec<PythonEnvironment>>;

    /// Resolve one interpreter or environment path, whether or not it was
    /// ever discovered. Returns `None` when the path does not belong to this
    /// provider's category.
    async fn resolve(&self, path: &Path) -> Result<Option<PythonEnvironment>>;

    /// Durably record the selected environment for a scope.
    ///
    /// Only persisted selections reach this hook; session-only selections
    /// never touch durable configuration.
    async fn persist_selection(
        &self,
        _scope: &Scope,
        _env: Option<&PythonEnvironment>,
    ) -> Result<()> {
        Ok(())
    }

    /// Create a new environment for the scope. Callers check
    /// [`ManagerInfo::supports_create`] first.
    async fn create(&self, _scope: &Scope) -> Result<PythonEnvironment> {
        Err(UnsupportedOperation {
            manager: self.info().id.clone(),
            operation: "create",
        }
        .into())
    }

    /// Remove an environment this provider owns. Callers check
    /// [`ManagerInfo::supports_remove`] first.
    async fn remove(&self, _env: &PythonEnvironment) -> Result<()> {
        Err(UnsupportedOperation {
            manager: self.info().id.clone(),
            operation: "remove",
        }
        .into())
    }
}

/// Identity of a package manager paired with discovered environments.
///
/// Package installation itself happens elsewhere; the registry only routes
/// identity lookups so managers can name their preferred package manager.
pub trait PackageManager: Send + Sync {
    fn id(&self) -> &str;
    fn name(&self) -> &str;
    fn display_name(&self) -> &str;
}
