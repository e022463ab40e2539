//! The priority chain that picks a manager, and possibly a concrete
//! environment, for a scope.
//!
//! Four configuration sources are walked in strict order: project override,
//! default-manager setting, default-interpreter-path setting, then
//! auto-discovery. A configured but unresolvable value is recorded as a
//! [`SettingResolutionError`] and skipped, never thrown, so broken
//! configuration degrades to the next level instead of blocking selection.
//! Auto-discovery is total: it fails only when zero managers are registered.

use crate::settings::{SettingKey, SettingsStore};
use anyhow::Result;
use async_trait::async_trait;
use env_core::{
    EnvironmentId, EnvironmentManager, EnvironmentManagers, ExecCommand, ExecInfo,
    PythonEnvironment, Scope, SYSTEM_MANAGER_ID, VENV_MANAGER_ID,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

/// Which priority level produced a selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionSource {
    ProjectOverride,
    DefaultManager,
    DefaultInterpreterPath,
    AutoDiscovery,
}

/// Outcome of one walk down the chain.
///
/// Produced fresh on every call; never cached across configuration changes.
#[derive(Clone)]
pub struct ChainResult {
    pub manager: Arc<EnvironmentManager>,
    pub environment: Option<PythonEnvironment>,
    pub source: SelectionSource,
}

/// A configured value that could not be honored. Collected, not thrown, so
/// lower-priority levels still run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettingResolutionError {
    pub setting: SettingKey,
    pub configured_value: String,
    pub reason: String,
}

/// Selection is total while any manager is registered; an empty registry
/// means the host never finished its own setup.
#[derive(Debug, Error)]
pub enum SelectError {
    #[error("no environment managers are registered")]
    NoManagersRegistered,
}

/// What the native resolver reports for a runnable interpreter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedInterpreter {
    pub executable: PathBuf,
    pub version: String,
    /// Interpreter prefix (the environment root the executable belongs to).
    pub prefix: PathBuf,
}

/// Resolves a filesystem path to a concrete interpreter.
///
/// The default-interpreter-path level hands expanded paths to this; the
/// probing itself (running the binary, reading its version) lives behind
/// the trait.
#[async_trait]
pub trait InterpreterResolver: Send + Sync {
    async fn resolve_interpreter(&self, path: &Path) -> Result<Option<ResolvedInterpreter>>;
}

/// Expand `${workspaceFolder}`, `${userHome}`, `${env:VAR}` and a leading
/// `~` in a configured interpreter path.
pub fn expand_path_variables(raw: &str, scope: &Scope) -> String {
    let mut expanded = raw.to_string();
    if let Some(root) = scope.path() {
        expanded = expanded.replace("${workspaceFolder}", &root.to_string_lossy());
    }
    if let Some(home) = dirs::home_dir() {
        let home = home.to_string_lossy().into_owned();
        expanded = expanded.replace("${userHome}", &home);
        if let Some(rest) = expanded.strip_prefix('~') {
            expanded = format!("{}{}", home, rest);
        }
    }
    while let Some(start) = expanded.find("${env:") {
        let Some(length) = expanded[start..].find('}') else {
            break;
        };
        let end = start + length;
        let value = std::env::var(&expanded[start + 6..end]).unwrap_or_default();
        expanded.replace_range(start..=end, &value);
    }
    expanded
}

/// Walks the four configuration sources for one scope.
pub struct PriorityChain {
    registry: Arc<EnvironmentManagers>,
    settings: Arc<dyn SettingsStore>,
    interpreters: Arc<dyn InterpreterResolver>,
}

impl PriorityChain {
    pub fn new(
        registry: Arc<EnvironmentManagers>,
        settings: Arc<dyn SettingsStore>,
        interpreters: Arc<dyn InterpreterResolver>,
    ) -> Self {
        Self {
            registry,
            settings,
            interpreters,
        }
    }

    /// Resolve the manager (and possibly environment) for `scope`.
    ///
    /// Misconfigurations are appended to `errors` and the walk continues;
    /// only an empty registry makes this fail.
    pub async fn resolve(
        &self,
        scope: &Scope,
        errors: &mut Vec<SettingResolutionError>,
    ) -> Result<ChainResult, SelectError> {
        if let Some(result) = self.from_project_override(scope, errors).await {
            return Ok(result);
        }
        if let Some(result) = self.from_default_manager(scope, errors).await {
            return Ok(result);
        }
        if let Some(result) = self.from_default_interpreter_path(scope, errors).await {
            return Ok(result);
        }
        self.auto_discover(scope).await
    }

    /// Level 1: a per-project manager id from the overrides list. Project
    /// scopes only; the nearest matching override wins for nested layouts.
    async fn from_project_override(
        &self,
        scope: &Scope,
        errors: &mut Vec<SettingResolutionError>,
    ) -> Option<ChainResult> {
        let root = scope.path()?;
        let layered = self.settings.project_overrides(scope);
        let overrides = layered.effective()?;
        let entry = overrides
            .iter()
            .filter(|entry| root.starts_with(&entry.path))
            .max_by_key(|entry| entry.path.components().count())?;
        let manager_id = entry.env_manager.as_deref()?;
        match self.registry.get(manager_id).await {
            Some(manager) => Some(ChainResult {
                manager,
                environment: None,
                source: SelectionSource::ProjectOverride,
            }),
            None => {
                errors.push(SettingResolutionError {
                    setting: SettingKey::ProjectOverrides,
                    configured_value: manager_id.to_string(),
                    reason: format!("no environment manager registered with id {manager_id}"),
                });
                None
            }
        }
    }

    /// Level 2: the default-manager setting. Explicitness comes from the
    /// layered inspection; a value is only consulted when some layer
    /// actually holds one.
    async fn from_default_manager(
        &self,
        scope: &Scope,
        errors: &mut Vec<SettingResolutionError>,
    ) -> Option<ChainResult> {
        let layered = self.settings.default_manager(scope);
        let manager_id = layered.effective()?;
        match self.registry.get(manager_id).await {
            Some(manager) => Some(ChainResult {
                manager,
                environment: None,
                source: SelectionSource::DefaultManager,
            }),
            None => {
                errors.push(SettingResolutionError {
                    setting: SettingKey::DefaultManager,
                    configured_value: manager_id.clone(),
                    reason: format!("no environment manager registered with id {manager_id}"),
                });
                None
            }
        }
    }

    /// Level 3: the legacy single-path setting. The expanded path goes to
    /// the native resolver and a success is wrapped as a synthetic
    /// environment tagged with the configured path.
    async fn from_default_interpreter_path(
        &self,
        scope: &Scope,
        errors: &mut Vec<SettingResolutionError>,
    ) -> Option<ChainResult> {
        let layered = self.settings.default_interpreter_path(scope);
        let raw = layered.effective()?;
        let expanded = expand_path_variables(raw, scope);
        let manager = match self.registry.get(SYSTEM_MANAGER_ID).await {
            Some(manager) => manager,
            None => self.registry.managers().await.into_iter().next()?,
        };
        match self
            .interpreters
            .resolve_interpreter(Path::new(&expanded))
            .await
        {
            Ok(Some(interpreter)) => {
                let env = synthetic_environment(manager.id(), raw, &interpreter);
                Some(ChainResult {
                    manager,
                    environment: Some(env),
                    source: SelectionSource::DefaultInterpreterPath,
                })
            }
            Ok(None) => {
                errors.push(SettingResolutionError {
                    setting: SettingKey::DefaultInterpreterPath,
                    configured_value: raw.clone(),
                    reason: format!("{expanded} is not a runnable interpreter"),
                });
                None
            }
            Err(e) => {
                errors.push(SettingResolutionError {
                    setting: SettingKey::DefaultInterpreterPath,
                    configured_value: raw.clone(),
                    reason: format!("failed to inspect {expanded}: {e:#}"),
                });
                None
            }
        }
    }

    /// Level 4: the terminal fallback. A project scope first asks the
    /// local-venv manager for an environment rooted at the folder; then the
    /// system manager; then whichever manager registered first.
    async fn auto_discover(&self, scope: &Scope) -> Result<ChainResult, SelectError> {
        if let Some(root) = scope.path() {
            if let Some(venv) = self.registry.get(VENV_MANAGER_ID).await {
                if let Some(env) = venv.get(root).await {
                    return Ok(ChainResult {
                        manager: venv,
                        environment: Some(env),
                        source: SelectionSource::AutoDiscovery,
                    });
                }
            }
        }
        if let Some(system) = self.registry.get(SYSTEM_MANAGER_ID).await {
            return Ok(ChainResult {
                manager: system,
                environment: None,
                source: SelectionSource::AutoDiscovery,
            });
        }
        match self.registry.managers().await.into_iter().next() {
            Some(manager) => Ok(ChainResult {
                manager,
                environment: None,
                source: SelectionSource::AutoDiscovery,
            }),
            None => Err(SelectError::NoManagersRegistered),
        }
    }
}

/// Wrap a resolved interpreter as an environment tagged with the configured
/// path.
fn synthetic_environment(
    manager_id: &str,
    configured: &str,
    interpreter: &ResolvedInterpreter,
) -> PythonEnvironment {
    let name = interpreter
        .executable
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "python".to_string());
    PythonEnvironment::new(
        EnvironmentId::new(manager_id, configured),
        name,
        interpreter.prefix.clone(),
        interpreter.version.clone(),
        ExecInfo::new(ExecCommand::new(
            interpreter.executable.to_string_lossy().into_owned(),
        )),
    )
}
