//! Caching, refresh deduplication, and event publication around one
//! provider.
//!
//! The manager is the sole mutator of its provider's collection. Refreshes
//! are single-flight: at most one discovery pass runs per provider, and
//! concurrent callers join the pass already in flight instead of starting
//! their own. The pass runs on its own task, so a caller disconnecting (or
//! cancelling) never cancels the work for everyone else.

use crate::cache::EnvironmentCollection;
use crate::environment::PythonEnvironment;
use crate::error::Cancelled;
use crate::events::{CollectionEvent, EnvironmentChangedEvent, CHANNEL_CAPACITY};
use crate::provider::{EnvironmentProvider, ManagerInfo, Scope};
use anyhow::Result;
use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use log::{info, warn};
use std::collections::HashMap;
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};
use tokio_util::sync::CancellationToken;

/// One shared discovery pass. Constructed once, resolved once, and cleared
/// from the slot after resolution; outcomes surface through the cache and
/// the log, not through the future.
type PassFuture = Shared<BoxFuture<'static, ()>>;

struct ManagerState {
    cache: EnvironmentCollection,
    in_flight: Option<PassFuture>,
}

/// One registered provider plus its collection cache, selection state, and
/// event streams.
pub struct EnvironmentManager {
    provider: Arc<dyn EnvironmentProvider>,
    state: Mutex<ManagerState>,
    selected: Mutex<HashMap<Scope, PythonEnvironment>>,
    collection_tx: broadcast::Sender<CollectionEvent>,
    changed_tx: broadcast::Sender<EnvironmentChangedEvent>,
}

impl EnvironmentManager {
    pub fn new(provider: Arc<dyn EnvironmentProvider>) -> Arc<Self> {
        let (collection_tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        let (changed_tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Arc::new(Self {
            provider,
            state: Mutex::new(ManagerState {
                cache: EnvironmentCollection::default(),
                in_flight: None,
            }),
            selected: Mutex::new(HashMap::new()),
            collection_tx,
            changed_tx,
        })
    }

    pub fn info(&self) -> &ManagerInfo {
        self.provider.info()
    }

    pub fn id(&self) -> &str {
        &self.provider.info().id
    }

    /// Subscribe to collection add/remove/update events.
    pub fn on_did_change_environments(&self) -> broadcast::Receiver<CollectionEvent> {
        self.collection_tx.subscribe()
    }

    /// Subscribe to per-scope selection changes.
    pub fn on_did_change_environment(&self) -> broadcast::Receiver<EnvironmentChangedEvent> {
        self.changed_tx.subscribe()
    }

    /// (Re)discover environments.
    ///
    /// Joins the in-flight pass when one exists. A hard refresh that joined
    /// a pass started before it still owes the provider a cache-discarding
    /// pass, so it runs its own once the slot clears.
    pub async fn refresh(
        self: &Arc<Self>,
        hard: bool,
        cancel: Option<&CancellationToken>,
    ) -> Result<()> {
        loop {
            let (pass, joined) = {
                let mut state = self.state.lock().await;
                match state.in_flight.clone() {
                    Some(pass) => (pass, true),
                    None => (self.spawn_pass(&mut state, hard), false),
                }
            };
            guard(cancel, pass).await?;
            if joined && hard {
                continue;
            }
            return Ok(());
        }
    }

    /// The cached collection, optionally filtered to a scope.
    ///
    /// Triggers the initial discovery pass if none has ever run, joins an
    /// in-flight pass, and otherwise answers from cache without I/O. The
    /// scope filter is pure and synchronous.
    pub async fn environments(
        self: &Arc<Self>,
        scope: Option<&Scope>,
        cancel: Option<&CancellationToken>,
    ) -> Result<Vec<PythonEnvironment>> {
        let pending = {
            let mut state = self.state.lock().await;
            if let Some(pass) = state.in_flight.clone() {
                Some(pass)
            } else if !state.cache.initialized() {
                Some(self.spawn_pass(&mut state, false))
            } else {
                None
            }
        };
        if let Some(pass) = pending {
            guard(cancel, pass).await?;
        }
        Ok(self.state.lock().await.cache.filtered(scope))
    }

    /// Resolve a single environment by path, consulting the cache first.
    ///
    /// On a miss the provider resolves the path itself; a successful
    /// resolution is inserted into the collection incrementally, without a
    /// full refresh. Resolution failures are logged and read as "not found".
    pub async fn get(&self, path: &Path) -> Option<PythonEnvironment> {
        if let Some(env) = self.state.lock().await.cache.get_by_root(path) {
            return Some(env);
        }
        match self.provider.resolve(path).await {
            Ok(Some(env)) => {
                let kind = self.state.lock().await.cache.insert(env.clone());
                if let Some(kind) = kind {
                    let _ = self.collection_tx.send(CollectionEvent {
                        manager_id: self.id().to_string(),
                        kind,
                        environments: vec![env.clone()],
                    });
                }
                Some(env)
            }
            Ok(None) => None,
            Err(e) => {
                warn!(
                    "[resolve] {}: failed to resolve {}: {:#}",
                    self.id(),
                    path.display(),
                    e
                );
                None
            }
        }
    }

    /// Resolve an arbitrary interpreter path, tracked or not.
    pub async fn resolve(&self, path: &Path) -> Result<Option<PythonEnvironment>> {
        self.provider.resolve(path).await
    }

    /// Record `env` as the current environment for a scope and fire the
    /// change event.
    ///
    /// `persist` distinguishes a session-only selection (startup
    /// auto-selection) from a durable write through the provider; only the
    /// latter may touch the user's saved configuration.
    pub async fn set(
        &self,
        scope: &Scope,
        env: Option<PythonEnvironment>,
        persist: bool,
    ) -> Result<()> {
        if persist {
            self.provider.persist_selection(scope, env.as_ref()).await?;
        }
        let old = {
            let mut selected = self.selected.lock().await;
            match env.clone() {
                Some(e) => selected.insert(scope.clone(), e),
                None => selected.remove(scope),
            }
        };
        let _ = self.changed_tx.send(EnvironmentChangedEvent {
            manager_id: self.id().to_string(),
            scope: scope.clone(),
            old,
            new: env,
        });
        Ok(())
    }

    /// The session's current environment for a scope, if one was set.
    pub async fn current(&self, scope: &Scope) -> Option<PythonEnvironment> {
        self.selected.lock().await.get(scope).cloned()
    }

    /// Create a new environment. Callers check
    /// [`ManagerInfo::supports_create`] first.
    pub async fn create(&self, scope: &Scope) -> Result<PythonEnvironment> {
        let env = self.provider.create(scope).await?;
        let kind = self.state.lock().await.cache.insert(env.clone());
        if let Some(kind) = kind {
            let _ = self.collection_tx.send(CollectionEvent {
                manager_id: self.id().to_string(),
                kind,
                environments: vec![env.clone()],
            });
        }
        Ok(env)
    }

    /// Remove an environment. Callers check
    /// [`ManagerInfo::supports_remove`] first.
    pub async fn remove(&self, env: &PythonEnvironment) -> Result<()> {
        self.provider.remove(env).await?;
        let removed = self.state.lock().await.cache.remove(&env.id);
        if let Some(removed) = removed {
            let _ = self.collection_tx.send(CollectionEvent {
                manager_id: self.id().to_string(),
                kind: crate::events::CollectionChangeKind::Remove,
                environments: vec![removed],
            });
        }
        Ok(())
    }

    /// Start a discovery pass on its own task and park the shared handle in
    /// the slot. The pass swaps the collection, fires events, and clears
    /// the slot last, so the next refresh starts fresh.
    fn spawn_pass(self: &Arc<Self>, state: &mut ManagerState, hard: bool) -> PassFuture {
        let manager = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let id = manager.id().to_string();
            let discovered = manager.provider.discover(hard).await;
            let changes = {
                let mut state = manager.state.lock().await;
                match discovered {
                    Ok(envs) => {
                        info!("[refresh] {}: discovered {} environments", id, envs.len());
                        state.cache.replace(envs)
                    }
                    Err(e) => {
                        warn!(
                            "[refresh] {}: discovery failed, keeping cached collection: {:#}",
                            id, e
                        );
                        state.cache.mark_initialized();
                        Vec::new()
                    }
                }
            };
            for (kind, environments) in changes {
                let _ = manager.collection_tx.send(CollectionEvent {
                    manager_id: id.clone(),
                    kind,
                    environments,
                });
            }
            manager.state.lock().await.in_flight = None;
        });
        let pass: PassFuture = async move {
            if let Err(e) = handle.await {
                warn!("[refresh] discovery task aborted: {e}");
            }
        }
        .boxed()
        .shared();
        state.in_flight = Some(pass.clone());
        pass
    }
}

/// Await a shared operation on behalf of one caller. Cancellation rejects
/// this caller's wait; the operation itself keeps running on its own task.
async fn guard<F: Future>(cancel: Option<&CancellationToken>, fut: F) -> Result<F::Output> {
    match cancel {
        None => Ok(fut.await),
        Some(token) => tokio::select! {
            _ = token.cancelled() => Err(Cancelled.into()),
            out = fut => Ok(out),
        },
    }
}
