//! Integration tests for the priority chain and startup selection.
//!
//! These run the real chain against fake providers, an in-memory settings
//! store, and a fake interpreter resolver, covering the precedence rules,
//! the fall-through behavior for broken configuration, and the terminal
//! auto-discovery level.

use async_trait::async_trait;
use env_core::{
    EnvironmentId, EnvironmentManagers, EnvironmentProvider, ExecCommand, ExecInfo, ManagerInfo,
    PythonEnvironment, Scope, SYSTEM_MANAGER_ID, VENV_MANAGER_ID,
};
use env_select::{
    spawn_settings_listener, ChainResult, EnvironmentSelector, InterpreterResolver, Layered,
    LogSink, PriorityChain, ProblemSink, ProjectOverride, ResolvedInterpreter, SelectError,
    SelectionSource, SettingKey, SettingResolutionError, SettingsChange, SettingsStore,
};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex, RwLock as StdRwLock};
use std::time::Duration;
use tokio::sync::broadcast;

fn env(manager_id: &str, id: &str, root: &str) -> PythonEnvironment {
    PythonEnvironment::new(
        EnvironmentId::new(manager_id, id),
        id,
        root,
        "3.12.0",
        ExecInfo::new(ExecCommand::new(format!("{root}/bin/python"))),
    )
}

/// Provider with a fixed set of environments. `resolve` also answers
/// project-folder queries with an environment rooted beneath the folder,
/// the way a venv provider probes `<folder>/.venv`.
struct StaticProvider {
    info: ManagerInfo,
    envs: Vec<PythonEnvironment>,
    persists: AtomicUsize,
}

impl StaticProvider {
    fn new(id: &str, envs: Vec<PythonEnvironment>) -> Arc<Self> {
        Arc::new(Self {
            info: ManagerInfo::new(id, id, id, "builtin:pip"),
            envs,
            persists: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl EnvironmentProvider for StaticProvider {
    fn info(&self) -> &ManagerInfo {
        &self.info
    }

    async fn discover(&self, _hard: bool) -> anyhow::Result<Vec<PythonEnvironment>> {
        Ok(self.envs.clone())
    }

    async fn resolve(&self, path: &Path) -> anyhow::Result<Option<PythonEnvironment>> {
        Ok(self
            .envs
            .iter()
            .find(|e| e.root == path || e.root.starts_with(path))
            .cloned())
    }

    async fn persist_selection(
        &self,
        _scope: &Scope,
        _env: Option<&PythonEnvironment>,
    ) -> anyhow::Result<()> {
        self.persists.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// In-memory settings store; every value lives at the global layer.
struct MemorySettings {
    overrides: StdRwLock<Vec<ProjectOverride>>,
    default_manager: StdRwLock<Option<String>>,
    default_interpreter_path: StdRwLock<Option<String>>,
    change_tx: broadcast::Sender<SettingsChange>,
}

impl MemorySettings {
    fn new() -> Arc<Self> {
        let (change_tx, _) = broadcast::channel(16);
        Arc::new(Self {
            overrides: StdRwLock::new(Vec::new()),
            default_manager: StdRwLock::new(None),
            default_interpreter_path: StdRwLock::new(None),
            change_tx,
        })
    }

    fn set_overrides(&self, overrides: Vec<ProjectOverride>) {
        *self.overrides.write().unwrap() = overrides;
    }

    fn set_default_manager(&self, value: Option<&str>) {
        *self.default_manager.write().unwrap() = value.map(String::from);
        let _ = self.change_tx.send(SettingsChange {
            keys: vec![SettingKey::DefaultManager],
        });
    }

    fn set_default_interpreter_path(&self, value: Option<&str>) {
        *self.default_interpreter_path.write().unwrap() = value.map(String::from);
    }
}

impl SettingsStore for MemorySettings {
    fn project_overrides(&self, _scope: &Scope) -> Layered<Vec<ProjectOverride>> {
        let overrides = self.overrides.read().unwrap().clone();
        if overrides.is_empty() {
            Layered::default()
        } else {
            Layered::global(overrides)
        }
    }

    fn default_manager(&self, _scope: &Scope) -> Layered<String> {
        match self.default_manager.read().unwrap().clone() {
            Some(value) => Layered::global(value),
            None => Layered::default(),
        }
    }

    fn default_interpreter_path(&self, _scope: &Scope) -> Layered<String> {
        match self.default_interpreter_path.read().unwrap().clone() {
            Some(value) => Layered::global(value),
            None => Layered::default(),
        }
    }

    fn subscribe(&self) -> broadcast::Receiver<SettingsChange> {
        self.change_tx.subscribe()
    }
}

/// Interpreter resolver that only knows the paths it was told about.
#[derive(Default)]
struct FakeInterpreters {
    known: HashMap<PathBuf, ResolvedInterpreter>,
}

impl FakeInterpreters {
    fn with(path: &str, prefix: &str, version: &str) -> Arc<Self> {
        let mut known = HashMap::new();
        known.insert(
            PathBuf::from(path),
            ResolvedInterpreter {
                executable: PathBuf::from(path),
                version: version.to_string(),
                prefix: PathBuf::from(prefix),
            },
        );
        Arc::new(Self { known })
    }
}

#[async_trait]
impl InterpreterResolver for FakeInterpreters {
    async fn resolve_interpreter(
        &self,
        path: &Path,
    ) -> anyhow::Result<Option<ResolvedInterpreter>> {
        Ok(self.known.get(path).cloned())
    }
}

/// Sink that records every notification it receives.
#[derive(Default)]
struct CountingSink {
    reports: StdMutex<Vec<(SettingKey, String, usize)>>,
}

impl ProblemSink for CountingSink {
    fn misconfigured(&self, error: &SettingResolutionError, scopes_affected: usize) {
        self.reports.lock().unwrap().push((
            error.setting,
            error.configured_value.clone(),
            scopes_affected,
        ));
    }
}

fn chain_with(
    registry: &Arc<EnvironmentManagers>,
    settings: &Arc<MemorySettings>,
    interpreters: Arc<dyn InterpreterResolver>,
) -> PriorityChain {
    PriorityChain::new(registry.clone(), settings.clone() as Arc<dyn SettingsStore>, interpreters)
}

async fn resolve(
    chain: &PriorityChain,
    scope: &Scope,
) -> (Result<ChainResult, SelectError>, Vec<SettingResolutionError>) {
    let mut errors = Vec::new();
    let result = chain.resolve(scope, &mut errors).await;
    (result, errors)
}

#[tokio::test]
async fn test_scenario_a_auto_discovery_finds_project_venv() {
    let registry = EnvironmentManagers::new();
    registry
        .register(StaticProvider::new(
            VENV_MANAGER_ID,
            vec![env(VENV_MANAGER_ID, ".venv", "/repo/app/.venv")],
        ))
        .await;
    registry
        .register(StaticProvider::new(
            SYSTEM_MANAGER_ID,
            vec![env(SYSTEM_MANAGER_ID, "python3", "/usr")],
        ))
        .await;
    let settings = MemorySettings::new();
    let chain = chain_with(&registry, &settings, Arc::new(FakeInterpreters::default()));

    let (result, errors) = resolve(&chain, &Scope::project("/repo/app")).await;
    let result = result.unwrap();
    assert!(errors.is_empty());
    assert_eq!(result.source, SelectionSource::AutoDiscovery);
    assert_eq!(result.manager.id(), VENV_MANAGER_ID);
    assert_eq!(
        result.environment.unwrap().root,
        PathBuf::from("/repo/app/.venv")
    );
}

#[tokio::test]
async fn test_scenario_a_global_scope_falls_back_to_system() {
    let registry = EnvironmentManagers::new();
    registry
        .register(StaticProvider::new(
            VENV_MANAGER_ID,
            vec![env(VENV_MANAGER_ID, ".venv", "/repo/app/.venv")],
        ))
        .await;
    registry
        .register(StaticProvider::new(SYSTEM_MANAGER_ID, Vec::new()))
        .await;
    let settings = MemorySettings::new();
    let chain = chain_with(&registry, &settings, Arc::new(FakeInterpreters::default()));

    let (result, _) = resolve(&chain, &Scope::Global).await;
    let result = result.unwrap();
    assert_eq!(result.source, SelectionSource::AutoDiscovery);
    assert_eq!(result.manager.id(), SYSTEM_MANAGER_ID);
    assert!(result.environment.is_none());
}

#[tokio::test]
async fn test_scenario_b_unregistered_default_manager_falls_through() {
    let registry = EnvironmentManagers::new();
    registry
        .register(StaticProvider::new(SYSTEM_MANAGER_ID, Vec::new()))
        .await;
    let settings = MemorySettings::new();
    settings.set_default_manager(Some("acme:poetry"));
    let chain = chain_with(&registry, &settings, Arc::new(FakeInterpreters::default()));

    let (result, errors) = resolve(&chain, &Scope::Global).await;
    assert_eq!(result.unwrap().source, SelectionSource::AutoDiscovery);
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].setting, SettingKey::DefaultManager);
    assert_eq!(errors[0].configured_value, "acme:poetry");
}

#[tokio::test]
async fn test_scenario_c_project_override_beats_default_manager() {
    let registry = EnvironmentManagers::new();
    registry
        .register(StaticProvider::new("acme:conda", Vec::new()))
        .await;
    registry
        .register(StaticProvider::new(SYSTEM_MANAGER_ID, Vec::new()))
        .await;
    let settings = MemorySettings::new();
    settings.set_overrides(vec![ProjectOverride {
        path: PathBuf::from("/repo/svc-a"),
        env_manager: Some("acme:conda".to_string()),
        package_manager: None,
    }]);
    settings.set_default_manager(Some(SYSTEM_MANAGER_ID));
    let chain = chain_with(&registry, &settings, Arc::new(FakeInterpreters::default()));

    let (result, errors) = resolve(&chain, &Scope::project("/repo/svc-a")).await;
    let result = result.unwrap();
    assert!(errors.is_empty());
    assert_eq!(result.source, SelectionSource::ProjectOverride);
    assert_eq!(result.manager.id(), "acme:conda");

    // a scope outside the override still honors the default manager
    let (result, _) = resolve(&chain, &Scope::project("/elsewhere")).await;
    let result = result.unwrap();
    assert_eq!(result.source, SelectionSource::DefaultManager);
    assert_eq!(result.manager.id(), SYSTEM_MANAGER_ID);
}

#[tokio::test]
async fn test_invalid_override_falls_through_to_default_manager() {
    let registry = EnvironmentManagers::new();
    registry
        .register(StaticProvider::new(SYSTEM_MANAGER_ID, Vec::new()))
        .await;
    let settings = MemorySettings::new();
    settings.set_overrides(vec![ProjectOverride {
        path: PathBuf::from("/repo/svc-a"),
        env_manager: Some("acme:gone".to_string()),
        package_manager: None,
    }]);
    settings.set_default_manager(Some(SYSTEM_MANAGER_ID));
    let chain = chain_with(&registry, &settings, Arc::new(FakeInterpreters::default()));

    let (result, errors) = resolve(&chain, &Scope::project("/repo/svc-a")).await;
    assert_eq!(result.unwrap().source, SelectionSource::DefaultManager);
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].setting, SettingKey::ProjectOverrides);
    assert_eq!(errors[0].configured_value, "acme:gone");
}

#[tokio::test]
async fn test_nearest_override_wins_for_nested_projects() {
    let registry = EnvironmentManagers::new();
    registry
        .register(StaticProvider::new("acme:conda", Vec::new()))
        .await;
    registry
        .register(StaticProvider::new("acme:hatch", Vec::new()))
        .await;
    let settings = MemorySettings::new();
    settings.set_overrides(vec![
        ProjectOverride {
            path: PathBuf::from("/repo"),
            env_manager: Some("acme:conda".to_string()),
            package_manager: None,
        },
        ProjectOverride {
            path: PathBuf::from("/repo/svc-a"),
            env_manager: Some("acme:hatch".to_string()),
            package_manager: None,
        },
    ]);
    let chain = chain_with(&registry, &settings, Arc::new(FakeInterpreters::default()));

    let (result, _) = resolve(&chain, &Scope::project("/repo/svc-a/worker")).await;
    assert_eq!(result.unwrap().manager.id(), "acme:hatch");
    let (result, _) = resolve(&chain, &Scope::project("/repo/svc-b")).await;
    assert_eq!(result.unwrap().manager.id(), "acme:conda");
}

#[tokio::test]
async fn test_default_interpreter_path_wraps_synthetic_environment() {
    let registry = EnvironmentManagers::new();
    registry
        .register(StaticProvider::new(SYSTEM_MANAGER_ID, Vec::new()))
        .await;
    let settings = MemorySettings::new();
    settings.set_default_interpreter_path(Some("/opt/py/bin/python3"));
    let interpreters = FakeInterpreters::with("/opt/py/bin/python3", "/opt/py", "3.10.2");
    let chain = chain_with(&registry, &settings, interpreters);

    let (result, errors) = resolve(&chain, &Scope::Global).await;
    let result = result.unwrap();
    assert!(errors.is_empty());
    assert_eq!(result.source, SelectionSource::DefaultInterpreterPath);
    assert_eq!(result.manager.id(), SYSTEM_MANAGER_ID);
    let environment = result.environment.unwrap();
    assert_eq!(environment.id.id, "/opt/py/bin/python3");
    assert_eq!(environment.version, "3.10.2");
}

#[tokio::test]
async fn test_unresolvable_interpreter_path_falls_through() {
    let registry = EnvironmentManagers::new();
    registry
        .register(StaticProvider::new(SYSTEM_MANAGER_ID, Vec::new()))
        .await;
    let settings = MemorySettings::new();
    settings.set_default_interpreter_path(Some("/missing/python"));
    let chain = chain_with(&registry, &settings, Arc::new(FakeInterpreters::default()));

    let (result, errors) = resolve(&chain, &Scope::Global).await;
    assert_eq!(result.unwrap().source, SelectionSource::AutoDiscovery);
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].setting, SettingKey::DefaultInterpreterPath);
    assert_eq!(errors[0].configured_value, "/missing/python");
}

#[tokio::test]
async fn test_auto_discovery_fails_only_with_zero_managers() {
    let registry = EnvironmentManagers::new();
    let settings = MemorySettings::new();
    let chain = chain_with(&registry, &settings, Arc::new(FakeInterpreters::default()));

    let (result, _) = resolve(&chain, &Scope::Global).await;
    assert!(matches!(result, Err(SelectError::NoManagersRegistered)));

    // any manager at all makes selection total, whatever its id
    registry
        .register(StaticProvider::new("acme:pixi", Vec::new()))
        .await;
    let (result, _) = resolve(&chain, &Scope::Global).await;
    let result = result.unwrap();
    assert_eq!(result.source, SelectionSource::AutoDiscovery);
    assert_eq!(result.manager.id(), "acme:pixi");
}

#[tokio::test]
async fn test_chain_is_idempotent_without_changes() {
    let registry = EnvironmentManagers::new();
    registry
        .register(StaticProvider::new(
            VENV_MANAGER_ID,
            vec![env(VENV_MANAGER_ID, ".venv", "/repo/app/.venv")],
        ))
        .await;
    let settings = MemorySettings::new();
    let chain = chain_with(&registry, &settings, Arc::new(FakeInterpreters::default()));
    let scope = Scope::project("/repo/app");

    let (first, _) = resolve(&chain, &scope).await;
    let (second, _) = resolve(&chain, &scope).await;
    let (first, second) = (first.unwrap(), second.unwrap());
    assert_eq!(first.manager.id(), second.manager.id());
    assert_eq!(
        first.environment.map(|e| e.id),
        second.environment.map(|e| e.id)
    );
}

#[tokio::test]
async fn test_selector_caches_without_persisting() {
    let registry = EnvironmentManagers::new();
    let system = StaticProvider::new(
        SYSTEM_MANAGER_ID,
        vec![env(SYSTEM_MANAGER_ID, "python3", "/usr")],
    );
    registry.register(system.clone()).await;
    let venv = StaticProvider::new(
        VENV_MANAGER_ID,
        vec![env(VENV_MANAGER_ID, ".venv", "/repo/app/.venv")],
    );
    registry.register(venv.clone()).await;

    let settings = MemorySettings::new();
    let chain = chain_with(&registry, &settings, Arc::new(FakeInterpreters::default()));
    let selector = EnvironmentSelector::new(registry.clone(), chain, Arc::new(LogSink));
    selector.add_project("/repo/app").await;

    selector.select_all().await.unwrap();

    let project = registry.current(&Scope::project("/repo/app")).await.unwrap();
    assert_eq!(project.id.manager_id, VENV_MANAGER_ID);
    let global = registry.current(&Scope::Global).await.unwrap();
    assert_eq!(global.id.manager_id, SYSTEM_MANAGER_ID);

    // startup selection never writes durable configuration
    assert_eq!(system.persists.load(Ordering::SeqCst), 0);
    assert_eq!(venv.persists.load(Ordering::SeqCst), 0);

    // re-running is idempotent
    selector.select_all().await.unwrap();
    let again = registry.current(&Scope::project("/repo/app")).await.unwrap();
    assert_eq!(again.id, project.id);
}

#[tokio::test]
async fn test_selector_reports_once_per_distinct_setting() {
    let registry = EnvironmentManagers::new();
    registry
        .register(StaticProvider::new(SYSTEM_MANAGER_ID, Vec::new()))
        .await;
    let settings = MemorySettings::new();
    settings.set_default_manager(Some("acme:poetry"));

    let sink = Arc::new(CountingSink::default());
    let chain = chain_with(&registry, &settings, Arc::new(FakeInterpreters::default()));
    let selector = EnvironmentSelector::new(registry.clone(), chain, sink.clone());
    selector.add_project("/repo/svc-a").await;
    selector.add_project("/repo/svc-b").await;

    selector.select_all().await.unwrap();

    // three scopes fell back (two projects plus global) but the broken
    // setting is reported once
    let reports = sink.reports.lock().unwrap();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].0, SettingKey::DefaultManager);
    assert_eq!(reports[0].1, "acme:poetry");
    assert_eq!(reports[0].2, 3);
}

#[tokio::test]
async fn test_settings_listener_reselects_on_change() {
    let registry = EnvironmentManagers::new();
    registry
        .register(StaticProvider::new(
            SYSTEM_MANAGER_ID,
            vec![env(SYSTEM_MANAGER_ID, "python3", "/usr")],
        ))
        .await;
    registry
        .register(StaticProvider::new(
            "acme:conda",
            vec![env("acme:conda", "base", "/opt/conda/envs/base")],
        ))
        .await;

    let settings = MemorySettings::new();
    let chain = chain_with(&registry, &settings, Arc::new(FakeInterpreters::default()));
    let selector = EnvironmentSelector::new(registry.clone(), chain, Arc::new(LogSink));

    selector.select_all().await.unwrap();
    let before = registry.current(&Scope::Global).await.unwrap();
    assert_eq!(before.id.manager_id, SYSTEM_MANAGER_ID);

    let listener = spawn_settings_listener(settings.as_ref(), selector.clone());
    settings.set_default_manager(Some("acme:conda"));

    tokio::time::sleep(Duration::from_millis(200)).await;
    let after = registry.current(&Scope::Global).await.unwrap();
    assert_eq!(after.id.manager_id, "acme:conda");
    listener.abort();
}
