//! JSON-file-backed settings store.
//!
//! Global values live in `settings.json` under the user config directory:
//! - macOS: ~/Library/Application Support/pyenvs/settings.json
//! - Linux: ~/.config/pyenvs/settings.json
//! - Windows: C:\Users\<User>\AppData\Roaming\pyenvs\settings.json
//!
//! Each registered project may carry a `pyenvs.json` at its root whose
//! values take folder-level precedence. Missing or malformed files read as
//! empty layers.

use crate::settings::{Layered, ProjectOverride, SettingKey, SettingsChange, SettingsStore};
use env_core::Scope;
use log::warn;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use tokio::sync::broadcast;

/// File name of the per-project settings file.
pub const PROJECT_SETTINGS_FILE: &str = "pyenvs.json";

const CHANGE_CAPACITY: usize = 16;

/// Path of the global settings file.
pub fn global_settings_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("pyenvs")
        .join("settings.json")
}

/// On-disk shape shared by the global and per-project files.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SettingsFile {
    pub default_env_manager: Option<String>,
    pub default_interpreter_path: Option<String>,
    pub project_overrides: Vec<ProjectOverride>,
}

impl SettingsFile {
    /// Read a settings file, treating absence or malformed JSON as empty.
    fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => match serde_json::from_str(&contents) {
                Ok(parsed) => parsed,
                Err(e) => {
                    warn!("[settings] ignoring malformed {}: {}", path.display(), e);
                    Self::default()
                }
            },
            Err(_) => Self::default(),
        }
    }
}

struct StoreState {
    global: SettingsFile,
    projects: HashMap<PathBuf, SettingsFile>,
}

/// Settings store backed by the global file plus one optional file per
/// registered project.
pub struct FileSettings {
    global_path: PathBuf,
    state: RwLock<StoreState>,
    change_tx: broadcast::Sender<SettingsChange>,
}

impl FileSettings {
    pub fn new() -> Self {
        Self::with_global_path(global_settings_path())
    }

    pub fn with_global_path(global_path: PathBuf) -> Self {
        let (change_tx, _) = broadcast::channel(CHANGE_CAPACITY);
        let global = SettingsFile::load(&global_path);
        Self {
            global_path,
            state: RwLock::new(StoreState {
                global,
                projects: HashMap::new(),
            }),
            change_tx,
        }
    }

    /// Every file this store reads, for the watcher.
    pub fn watched_paths(&self) -> Vec<PathBuf> {
        let state = self.state.read().expect("settings store poisoned");
        let mut paths = vec![self.global_path.clone()];
        paths.extend(state.projects.keys().map(|root| root.join(PROJECT_SETTINGS_FILE)));
        paths
    }

    /// Register a project folder so its `pyenvs.json` contributes a
    /// folder layer.
    pub fn add_project(&self, root: impl Into<PathBuf>) {
        let root = root.into();
        let file = SettingsFile::load(&root.join(PROJECT_SETTINGS_FILE));
        self.state
            .write()
            .expect("settings store poisoned")
            .projects
            .insert(root, file);
    }

    pub fn remove_project(&self, root: &Path) {
        self.state
            .write()
            .expect("settings store poisoned")
            .projects
            .remove(root);
    }

    /// Re-read every file, emit a change event for the keys whose values
    /// differ, and return those keys.
    pub fn reload(&self) -> Vec<SettingKey> {
        let mut state = self.state.write().expect("settings store poisoned");
        let old_global =
            std::mem::replace(&mut state.global, SettingsFile::load(&self.global_path));
        let mut overrides_changed = old_global.project_overrides != state.global.project_overrides;
        let mut manager_changed =
            old_global.default_env_manager != state.global.default_env_manager;
        let mut path_changed =
            old_global.default_interpreter_path != state.global.default_interpreter_path;

        let roots: Vec<PathBuf> = state.projects.keys().cloned().collect();
        for root in roots {
            let new_file = SettingsFile::load(&root.join(PROJECT_SETTINGS_FILE));
            let old_file = state
                .projects
                .insert(root, new_file.clone())
                .unwrap_or_default();
            overrides_changed |= old_file.project_overrides != new_file.project_overrides;
            manager_changed |= old_file.default_env_manager != new_file.default_env_manager;
            path_changed |= old_file.default_interpreter_path != new_file.default_interpreter_path;
        }
        drop(state);

        let mut changed = Vec::new();
        if overrides_changed {
            changed.push(SettingKey::ProjectOverrides);
        }
        if manager_changed {
            changed.push(SettingKey::DefaultManager);
        }
        if path_changed {
            changed.push(SettingKey::DefaultInterpreterPath);
        }
        if !changed.is_empty() {
            let _ = self.change_tx.send(SettingsChange {
                keys: changed.clone(),
            });
        }
        changed
    }

    fn folder_file<R>(&self, scope: &Scope, read: impl Fn(&SettingsFile) -> R) -> Option<R> {
        let state = self.state.read().expect("settings store poisoned");
        scope
            .path()
            .and_then(|root| state.projects.get(root))
            .map(read)
    }

    fn global_file<R>(&self, read: impl Fn(&SettingsFile) -> R) -> R {
        let state = self.state.read().expect("settings store poisoned");
        read(&state.global)
    }
}

impl Default for FileSettings {
    fn default() -> Self {
        Self::new()
    }
}

impl SettingsStore for FileSettings {
    fn project_overrides(&self, scope: &Scope) -> Layered<Vec<ProjectOverride>> {
        Layered {
            workspace_folder_value: self
                .folder_file(scope, |file| file.project_overrides.clone())
                .filter(|overrides| !overrides.is_empty()),
            workspace_value: None,
            global_value: Some(self.global_file(|file| file.project_overrides.clone()))
                .filter(|overrides| !overrides.is_empty()),
        }
    }

    fn default_manager(&self, scope: &Scope) -> Layered<String> {
        Layered {
            workspace_folder_value: self
                .folder_file(scope, |file| file.default_env_manager.clone())
                .flatten(),
            workspace_value: None,
            global_value: self.global_file(|file| file.default_env_manager.clone()),
        }
    }

    fn default_interpreter_path(&self, scope: &Scope) -> Layered<String> {
        Layered {
            workspace_folder_value: self
                .folder_file(scope, |file| file.default_interpreter_path.clone())
                .flatten(),
            workspace_value: None,
            global_value: self.global_file(|file| file.default_interpreter_path.clone()),
        }
    }

    fn subscribe(&self) -> broadcast::Receiver<SettingsChange> {
        self.change_tx.subscribe()
    }
}
