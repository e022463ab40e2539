//! Registry of environment and package managers with aggregated events.
//!
//! The registry is the single point of truth for which providers exist.
//! Consumers that want "any environment changed anywhere" subscribe once
//! here instead of subscribing to every manager; forwarder tasks fan each
//! manager's streams into the aggregate pair and exit when the manager's
//! senders are dropped at teardown.

use crate::environment::PythonEnvironment;
use crate::events::{CollectionEvent, EnvironmentChangedEvent, CHANNEL_CAPACITY};
use crate::manager::EnvironmentManager;
use crate::provider::{EnvironmentProvider, PackageManager, Scope};
use anyhow::{anyhow, Result};
use log::{info, warn};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};

/// Manager id the auto-discovery fallback asks for project-local virtual
/// environments.
pub const VENV_MANAGER_ID: &str = "builtin:venv";

/// Manager id the auto-discovery fallback asks for system interpreters.
pub const SYSTEM_MANAGER_ID: &str = "builtin:system";

#[derive(Default)]
struct RegisteredManagers {
    ordered: Vec<Arc<EnvironmentManager>>,
    by_id: HashMap<String, Arc<EnvironmentManager>>,
}

/// All registered providers, held for the process lifetime.
pub struct EnvironmentManagers {
    managers: RwLock<RegisteredManagers>,
    package_managers: RwLock<Vec<Arc<dyn PackageManager>>>,
    current: RwLock<HashMap<Scope, PythonEnvironment>>,
    collection_tx: broadcast::Sender<CollectionEvent>,
    changed_tx: broadcast::Sender<EnvironmentChangedEvent>,
}

impl EnvironmentManagers {
    pub fn new() -> Arc<Self> {
        let (collection_tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        let (changed_tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Arc::new(Self {
            managers: RwLock::new(RegisteredManagers::default()),
            package_managers: RwLock::new(Vec::new()),
            current: RwLock::new(HashMap::new()),
            collection_tx,
            changed_tx,
        })
    }

    /// Wrap a provider in a manager and register it. Called once per
    /// provider at startup; a duplicate id keeps the first registration.
    pub async fn register(
        self: &Arc<Self>,
        provider: Arc<dyn EnvironmentProvider>,
    ) -> Arc<EnvironmentManager> {
        let manager = EnvironmentManager::new(provider);
        {
            let mut managers = self.managers.write().await;
            if let Some(existing) = managers.by_id.get(manager.id()) {
                warn!(
                    "[registry] manager {} already registered, keeping the first",
                    manager.id()
                );
                return existing.clone();
            }
            managers.by_id.insert(manager.id().to_string(), manager.clone());
            managers.ordered.push(manager.clone());
        }

        self.forward_collection_events(&manager);
        self.forward_environment_events(&manager);

        info!("[registry] registered manager {}", manager.id());
        manager
    }

    pub async fn register_package_manager(&self, package_manager: Arc<dyn PackageManager>) {
        info!(
            "[registry] registered package manager {}",
            package_manager.id()
        );
        self.package_managers.write().await.push(package_manager);
    }

    /// Look up a manager by id. An unknown id is an ordinary outcome, not an
    /// error: a provider may be conditionally registered.
    pub async fn get(&self, id: &str) -> Option<Arc<EnvironmentManager>> {
        self.managers.read().await.by_id.get(id).cloned()
    }

    pub async fn get_package_manager(&self, id: &str) -> Option<Arc<dyn PackageManager>> {
        self.package_managers
            .read()
            .await
            .iter()
            .find(|pm| pm.id() == id)
            .cloned()
    }

    /// All managers, in registration order.
    pub async fn managers(&self) -> Vec<Arc<EnvironmentManager>> {
        self.managers.read().await.ordered.clone()
    }

    /// Route a selection to the owning manager and cache it for the scope.
    ///
    /// `persist=false` keeps the choice in memory for the session only;
    /// startup auto-selection uses this so it never overwrites a user's
    /// saved configuration. `persist=true` also writes through the
    /// provider's durable hook.
    pub async fn set_environment(
        &self,
        scope: &Scope,
        env: Option<PythonEnvironment>,
        persist: bool,
    ) -> Result<()> {
        match env {
            Some(env) => {
                let manager = self.get(&env.id.manager_id).await.ok_or_else(|| {
                    anyhow!("no manager registered with id {}", env.id.manager_id)
                })?;
                manager.set(scope, Some(env.clone()), persist).await?;
                self.current.write().await.insert(scope.clone(), env);
            }
            None => {
                let old = self.current.write().await.remove(scope);
                if let Some(old) = old {
                    if let Some(manager) = self.get(&old.id.manager_id).await {
                        manager.set(scope, None, persist).await?;
                    }
                }
            }
        }
        Ok(())
    }

    /// Apply one selection to several scopes.
    pub async fn set_environments(
        &self,
        scopes: &[Scope],
        env: Option<PythonEnvironment>,
        persist: bool,
    ) -> Result<()> {
        for scope in scopes {
            self.set_environment(scope, env.clone(), persist).await?;
        }
        Ok(())
    }

    /// The session's cached selection for a scope.
    pub async fn current(&self, scope: &Scope) -> Option<PythonEnvironment> {
        self.current.read().await.get(scope).cloned()
    }

    /// Subscribe to collection changes from every registered manager.
    pub fn on_did_change_environments(&self) -> broadcast::Receiver<CollectionEvent> {
        self.collection_tx.subscribe()
    }

    /// Subscribe to selection changes from every registered manager.
    pub fn on_did_change_environment(&self) -> broadcast::Receiver<EnvironmentChangedEvent> {
        self.changed_tx.subscribe()
    }

    fn forward_collection_events(&self, manager: &Arc<EnvironmentManager>) {
        let mut rx = manager.on_did_change_environments();
        let tx = self.collection_tx.clone();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => {
                        let _ = tx.send(event);
                    }
                    Err(broadcast::error::RecvError::Lagged(count)) => {
                        warn!("[registry] dropped {} collection events", count);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
    }

    fn forward_environment_events(&self, manager: &Arc<EnvironmentManager>) {
        let mut rx = manager.on_did_change_environment();
        let tx = self.changed_tx.clone();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => {
                        let _ = tx.send(event);
                    }
                    Err(broadcast::error::RecvError::Lagged(count)) => {
                        warn!("[registry] dropped {} environment events", count);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
    }
}
