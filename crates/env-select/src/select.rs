//! Startup selection: run the priority chain for every open scope and cache
//! the results.
//!
//! Selection only ever caches (session-scoped, never persisted) and
//! collects-then-reports errors, so it is idempotent and safe to re-run at
//! any time — the settings listener re-runs it on every relevant edit.

use crate::chain::{ChainResult, PriorityChain, SelectError, SettingResolutionError};
use crate::settings::SettingKey;
use env_core::{EnvironmentManagers, PythonEnvironment, Scope};
use log::{info, warn};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Receives one notification per distinct failing setting.
pub trait ProblemSink: Send + Sync {
    fn misconfigured(&self, error: &SettingResolutionError, scopes_affected: usize);
}

/// Default sink: log a warning naming the setting so the user can fix it.
pub struct LogSink;

impl ProblemSink for LogSink {
    fn misconfigured(&self, error: &SettingResolutionError, scopes_affected: usize) {
        warn!(
            "[select] setting {} = {:?} could not be used ({}); {} scope(s) fell back",
            error.setting.name(),
            error.configured_value,
            error.reason,
            scopes_affected
        );
    }
}

/// Runs the priority chain for all open scopes and caches the outcomes.
pub struct EnvironmentSelector {
    registry: Arc<EnvironmentManagers>,
    chain: PriorityChain,
    sink: Arc<dyn ProblemSink>,
    projects: RwLock<Vec<PathBuf>>,
}

impl EnvironmentSelector {
    pub fn new(
        registry: Arc<EnvironmentManagers>,
        chain: PriorityChain,
        sink: Arc<dyn ProblemSink>,
    ) -> Arc<Self> {
        Arc::new(Self {
            registry,
            chain,
            sink,
            projects: RwLock::new(Vec::new()),
        })
    }

    /// Track an open project folder.
    pub async fn add_project(&self, root: impl Into<PathBuf>) {
        let root = root.into();
        let mut projects = self.projects.write().await;
        if !projects.contains(&root) {
            projects.push(root);
        }
    }

    pub async fn remove_project(&self, root: &Path) {
        self.projects.write().await.retain(|p| p != root);
    }

    pub async fn projects(&self) -> Vec<PathBuf> {
        self.projects.read().await.clone()
    }

    /// Select a current environment for every open project scope and the
    /// global scope, caching results for the session only.
    ///
    /// Collected misconfigurations are reported once per distinct failing
    /// setting, however many scopes they affected.
    pub async fn select_all(&self) -> Result<(), SelectError> {
        let mut scopes: Vec<Scope> = self
            .projects
            .read()
            .await
            .iter()
            .cloned()
            .map(Scope::Project)
            .collect();
        scopes.push(Scope::Global);

        let mut errors: Vec<SettingResolutionError> = Vec::new();
        for scope in &scopes {
            let result = self.chain.resolve(scope, &mut errors).await?;
            let environment = match result.environment.clone() {
                Some(env) => Some(env),
                None => self.concrete_environment(&result, scope).await,
            };
            info!(
                "[select] {:?}: manager {} via {:?}",
                scope,
                result.manager.id(),
                result.source
            );
            if let Err(e) = self.registry.set_environment(scope, environment, false).await {
                warn!("[select] failed to cache selection for {:?}: {:#}", scope, e);
            }
        }

        self.report(&errors);
        Ok(())
    }

    /// Ask the chosen manager for a concrete environment when the chain
    /// only named a manager: the project root for project scopes, the first
    /// entry of the manager's collection for the global scope.
    async fn concrete_environment(
        &self,
        result: &ChainResult,
        scope: &Scope,
    ) -> Option<PythonEnvironment> {
        if let Some(root) = scope.path() {
            if let Some(env) = result.manager.get(root).await {
                return Some(env);
            }
        }
        result
            .manager
            .environments(None, None)
            .await
            .ok()
            .and_then(|envs| envs.into_iter().next())
    }

    /// One notification per distinct (setting, configured value) pair, not
    /// one per scope.
    fn report(&self, errors: &[SettingResolutionError]) {
        let mut seen: Vec<(SettingKey, &str)> = Vec::new();
        for error in errors {
            let key = (error.setting, error.configured_value.as_str());
            if seen.contains(&key) {
                continue;
            }
            seen.push(key);
            let scopes_affected = errors
                .iter()
                .filter(|e| {
                    e.setting == error.setting && e.configured_value == error.configured_value
                })
                .count();
            self.sink.misconfigured(error, scopes_affected);
        }
    }
}
