//! Layered configuration model for the three selection settings.
//!
//! Values can be set per workspace folder, per workspace, or globally;
//! folder values win over workspace values, which win over global values.
//! Resolution is a pure function over the three layers so it can be tested
//! without any storage behind it.

use env_core::Scope;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::sync::broadcast;

/// The three settings the priority chain consults.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SettingKey {
    ProjectOverrides,
    DefaultManager,
    DefaultInterpreterPath,
}

impl SettingKey {
    /// The on-disk key, for logs and notifications.
    pub fn name(&self) -> &'static str {
        match self {
            SettingKey::ProjectOverrides => "project_overrides",
            SettingKey::DefaultManager => "default_env_manager",
            SettingKey::DefaultInterpreterPath => "default_interpreter_path",
        }
    }
}

/// A setting as it appears across the configuration layers.
///
/// A setting is explicit iff any layer holds a value; built-in defaults live
/// in code, never in a layer, so "the user never chose this" and "the user
/// chose the same value as the default" stay distinguishable.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Layered<T> {
    pub workspace_folder_value: Option<T>,
    pub workspace_value: Option<T>,
    pub global_value: Option<T>,
}

impl<T> Layered<T> {
    /// A value configured only at the global layer.
    pub fn global(value: T) -> Self {
        Self {
            workspace_folder_value: None,
            workspace_value: None,
            global_value: Some(value),
        }
    }

    /// A value configured at the workspace-folder layer.
    pub fn folder(value: T) -> Self {
        Self {
            workspace_folder_value: Some(value),
            workspace_value: None,
            global_value: None,
        }
    }

    /// The winning value: folder, then workspace, then global.
    pub fn effective(&self) -> Option<&T> {
        self.workspace_folder_value
            .as_ref()
            .or(self.workspace_value.as_ref())
            .or(self.global_value.as_ref())
    }

    pub fn is_explicit(&self) -> bool {
        self.effective().is_some()
    }
}

/// One entry of the per-project overrides list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectOverride {
    pub path: PathBuf,
    #[serde(default)]
    pub env_manager: Option<String>,
    #[serde(default)]
    pub package_manager: Option<String>,
}

/// Change notification carrying the keys that were edited.
#[derive(Debug, Clone)]
pub struct SettingsChange {
    pub keys: Vec<SettingKey>,
}

/// Read access to the three selection settings.
///
/// Implementations answer from an in-memory snapshot; nothing here performs
/// I/O. The change stream is limited to the three keys the priority chain
/// consults.
pub trait SettingsStore: Send + Sync {
    fn project_overrides(&self, scope: &Scope) -> Layered<Vec<ProjectOverride>>;
    fn default_manager(&self, scope: &Scope) -> Layered<String>;
    fn default_interpreter_path(&self, scope: &Scope) -> Layered<String>;
    fn subscribe(&self) -> broadcast::Receiver<SettingsChange>;
}
