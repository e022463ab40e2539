//! Selection layer: layered settings, the priority chain, and startup
//! selection of a current Python environment per project scope.
//!
//! Four configuration sources are consulted in strict order for every open
//! scope (project overrides, the default-manager setting, the legacy
//! default-interpreter-path setting, auto-discovery); a configured but
//! broken value is recorded and skipped rather than blocking selection, and
//! auto-discovery never fails while any manager is registered. Selection is
//! re-run whenever one of the three settings changes.

pub mod chain;
pub mod select;
pub mod settings;
pub mod store;
pub mod watch;

pub use chain::{
    expand_path_variables, ChainResult, InterpreterResolver, PriorityChain, ResolvedInterpreter,
    SelectError, SelectionSource, SettingResolutionError,
};
pub use select::{EnvironmentSelector, LogSink, ProblemSink};
pub use settings::{Layered, ProjectOverride, SettingKey, SettingsChange, SettingsStore};
pub use store::{global_settings_path, FileSettings, SettingsFile, PROJECT_SETTINGS_FILE};
pub use watch::{spawn_settings_listener, spawn_settings_watcher};
