//! Shared environment-management library: the environment model, the
//! provider contract, and the caching/refresh machinery around it.
//!
//! Hosts implement [`EnvironmentProvider`] for each discovery backend (system
//! interpreters, local virtual envs, lockfile-based tools) and register them
//! with [`EnvironmentManagers`] once at startup. The registry wraps each
//! provider in an [`EnvironmentManager`] that owns its collection cache,
//! deduplicates concurrent refreshes, and publishes change events.

mod cache;
pub mod environment;
pub mod error;
pub mod events;
pub mod manager;
pub mod provider;
pub mod registry;

pub use environment::{EnvironmentId, ExecCommand, ExecInfo, PythonEnvironment, ShellKind};
pub use error::{Cancelled, UnsupportedOperation};
pub use events::{CollectionChangeKind, CollectionEvent, EnvironmentChangedEvent};
pub use manager::EnvironmentManager;
pub use provider::{EnvironmentProvider, ManagerInfo, PackageManager, Scope};
pub use registry::{EnvironmentManagers, SYSTEM_MANAGER_ID, VENV_MANAGER_ID};
