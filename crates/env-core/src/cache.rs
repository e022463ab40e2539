//! Per-manager environment collection with a root-path index.
//!
//! Mutated only by a completed refresh (wholesale replace) or a single-path
//! resolution (incremental insert); readers always observe a fully-formed
//! snapshot.

use crate::environment::PythonEnvironment;
use crate::events::CollectionChangeKind;
use crate::provider::Scope;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

#[derive(Default)]
pub(crate) struct EnvironmentCollection {
    envs: Vec<PythonEnvironment>,
    by_root: HashMap<PathBuf, usize>,
    initialized: bool,
}

impl EnvironmentCollection {
    /// True once any refresh pass has completed, even an empty or failed one.
    pub(crate) fn initialized(&self) -> bool {
        self.initialized
    }

    pub(crate) fn mark_initialized(&mut self) {
        self.initialized = true;
    }

    /// Environments visible to a scope: everything for the global scope (or
    /// no scope), only environments rooted under the project path otherwise.
    /// Pure filter; never triggers discovery.
    pub(crate) fn filtered(&self, scope: Option<&Scope>) -> Vec<PythonEnvironment> {
        match scope.and_then(Scope::path) {
            None => self.envs.clone(),
            Some(root) => self
                .envs
                .iter()
                .filter(|env| env.root.starts_with(root))
                .cloned()
                .collect(),
        }
    }

    /// Look up an environment by exact root, falling back to the first
    /// environment rooted under the queried path (a project folder query
    /// finds its `.venv`).
    pub(crate) fn get_by_root(&self, path: &Path) -> Option<PythonEnvironment> {
        if let Some(index) = self.by_root.get(path) {
            return Some(self.envs[*index].clone());
        }
        self.envs
            .iter()
            .find(|env| env.root.starts_with(path))
            .cloned()
    }

    /// Replace the whole collection and rebuild the index. Returns the
    /// change sets (diffed by environment id) for event publication.
    pub(crate) fn replace(
        &mut self,
        envs: Vec<PythonEnvironment>,
    ) -> Vec<(CollectionChangeKind, Vec<PythonEnvironment>)> {
        let old = std::mem::take(&mut self.envs);
        let removed: Vec<_> = old
            .iter()
            .filter(|o| !envs.iter().any(|n| n.id == o.id))
            .cloned()
            .collect();
        let added: Vec<_> = envs
            .iter()
            .filter(|n| !old.iter().any(|o| o.id == n.id))
            .cloned()
            .collect();
        let updated: Vec<_> = envs
            .iter()
            .filter(|n| old.iter().any(|o| o.id == n.id && o != *n))
            .cloned()
            .collect();

        self.envs = envs;
        self.rebuild_index();
        self.initialized = true;

        let mut changes = Vec::new();
        if !removed.is_empty() {
            changes.push((CollectionChangeKind::Remove, removed));
        }
        if !added.is_empty() {
            changes.push((CollectionChangeKind::Add, added));
        }
        if !updated.is_empty() {
            changes.push((CollectionChangeKind::Update, updated));
        }
        changes
    }

    /// Insert one resolved environment without a full refresh. Returns the
    /// kind of change made, or `None` when the collection already held an
    /// identical snapshot.
    pub(crate) fn insert(&mut self, env: PythonEnvironment) -> Option<CollectionChangeKind> {
        match self.envs.iter().position(|e| e.id == env.id) {
            Some(index) if self.envs[index] == env => None,
            Some(index) => {
                self.envs[index] = env;
                self.rebuild_index();
                Some(CollectionChangeKind::Update)
            }
            None => {
                self.by_root.insert(env.root.clone(), self.envs.len());
                self.envs.push(env);
                Some(CollectionChangeKind::Add)
            }
        }
    }

    /// Drop an environment by id. Returns the removed snapshot.
    pub(crate) fn remove(&mut self, id: &crate::environment::EnvironmentId) -> Option<PythonEnvironment> {
        let index = self.envs.iter().position(|e| &e.id == id)?;
        let removed = self.envs.remove(index);
        self.rebuild_index();
        Some(removed)
    }

    fn rebuild_index(&mut self) {
        self.by_root = self
            .envs
            .iter()
            .enumerate()
            .map(|(index, env)| (env.root.clone(), index))
            .collect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::environment::{EnvironmentId, ExecCommand, ExecInfo};

    fn env(id: &str, root: &str) -> PythonEnvironment {
        PythonEnvironment::new(
            EnvironmentId::new("builtin:venv", id),
            id,
            root,
            "3.12.0",
            ExecInfo::new(ExecCommand::new(format!("{root}/bin/python"))),
        )
    }

    #[test]
    fn test_replace_diffs_by_id() {
        let mut collection = EnvironmentCollection::default();
        let changes = collection.replace(vec![env("a", "/envs/a"), env("b", "/envs/b")]);
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].0, CollectionChangeKind::Add);
        assert_eq!(changes[0].1.len(), 2);

        // b dropped, c added, a re-rooted
        let changes = collection.replace(vec![env("a", "/envs/a2"), env("c", "/envs/c")]);
        let kinds: Vec<_> = changes.iter().map(|(kind, _)| *kind).collect();
        assert_eq!(
            kinds,
            vec![
                CollectionChangeKind::Remove,
                CollectionChangeKind::Add,
                CollectionChangeKind::Update
            ]
        );
    }

    #[test]
    fn test_replace_identical_collection_is_quiet() {
        let mut collection = EnvironmentCollection::default();
        collection.replace(vec![env("a", "/envs/a")]);
        let changes = collection.replace(vec![env("a", "/envs/a")]);
        assert!(changes.is_empty());
    }

    #[test]
    fn test_get_by_root_exact_and_nested() {
        let mut collection = EnvironmentCollection::default();
        collection.replace(vec![env("a", "/repo/svc-a/.venv")]);
        assert!(collection.get_by_root(Path::new("/repo/svc-a/.venv")).is_some());
        // a project folder query finds the env rooted beneath it
        assert!(collection.get_by_root(Path::new("/repo/svc-a")).is_some());
        assert!(collection.get_by_root(Path::new("/repo/svc-b")).is_none());
    }

    #[test]
    fn test_filtered_by_project_scope() {
        let mut collection = EnvironmentCollection::default();
        collection.replace(vec![env("a", "/repo/svc-a/.venv"), env("b", "/envs/b")]);
        let scope = Scope::project("/repo/svc-a");
        let filtered = collection.filtered(Some(&scope));
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].id.id, "a");
        assert_eq!(collection.filtered(Some(&Scope::Global)).len(), 2);
        assert_eq!(collection.filtered(None).len(), 2);
    }

    #[test]
    fn test_insert_deduplicates_identical_snapshots() {
        let mut collection = EnvironmentCollection::default();
        assert_eq!(
            collection.insert(env("a", "/envs/a")),
            Some(CollectionChangeKind::Add)
        );
        assert_eq!(collection.insert(env("a", "/envs/a")), None);
        assert_eq!(
            collection.insert(env("a", "/envs/a2")),
            Some(CollectionChangeKind::Update)
        );
        assert!(collection.get_by_root(Path::new("/envs/a2")).is_some());
    }

    #[test]
    fn test_remove_reindexes() {
        let mut collection = EnvironmentCollection::default();
        collection.replace(vec![env("a", "/envs/a"), env("b", "/envs/b")]);
        let removed = collection.remove(&EnvironmentId::new("builtin:venv", "a"));
        assert_eq!(removed.unwrap().id.id, "a");
        assert!(collection.get_by_root(Path::new("/envs/a")).is_none());
        assert!(collection.get_by_root(Path::new("/envs/b")).is_some());
    }
}
