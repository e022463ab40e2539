//! Immutable value types describing a discovered Python environment.
//!
//! Environments are snapshots: a manager may hand out a fresh instance for
//! the same on-disk environment after every refresh. Consumers that need
//! stable identity re-resolve by [`EnvironmentId`] or root path rather than
//! holding on to an instance.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;

/// Identifies an environment within the manager that discovered it.
///
/// `id` is only unique per manager; the pair is globally unique.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EnvironmentId {
    pub manager_id: String,
    pub id: String,
}

impl EnvironmentId {
    pub fn new(manager_id: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            manager_id: manager_id.into(),
            id: id.into(),
        }
    }
}

impl fmt::Display for EnvironmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.manager_id, self.id)
    }
}

/// Shells a manager may provide activation command tables for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShellKind {
    Bash,
    Zsh,
    Fish,
    PowerShell,
    Cmd,
}

/// A single executable invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecCommand {
    pub executable: String,
    #[serde(default)]
    pub args: Vec<String>,
}

impl ExecCommand {
    pub fn new(executable: impl Into<String>) -> Self {
        Self {
            executable: executable.into(),
            args: Vec::new(),
        }
    }

    pub fn with_args<I, S>(executable: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            executable: executable.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }
}

/// How to invoke an environment.
///
/// `run` is always present. An activated variant, when the manager provides
/// one, takes precedence over the plain run command. Callers with neither
/// (a default-constructed consumer outside any environment) fall back to the
/// bare literal `python` themselves.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecInfo {
    pub run: ExecCommand,
    pub activated_run: Option<ExecCommand>,
    /// Commands a terminal runs to activate the environment, per shell.
    #[serde(default)]
    pub activation: HashMap<ShellKind, Vec<ExecCommand>>,
    /// Commands a terminal runs to deactivate the environment, per shell.
    #[serde(default)]
    pub deactivation: HashMap<ShellKind, Vec<ExecCommand>>,
}

impl ExecInfo {
    pub fn new(run: ExecCommand) -> Self {
        Self {
            run,
            activated_run: None,
            activation: HashMap::new(),
            deactivation: HashMap::new(),
        }
    }

    pub fn with_activated_run(mut self, activated_run: ExecCommand) -> Self {
        self.activated_run = Some(activated_run);
        self
    }

    /// The command consumers use to produce a runnable command line:
    /// the activated run command when present, the plain one otherwise.
    pub fn effective_run(&self) -> &ExecCommand {
        self.activated_run.as_ref().unwrap_or(&self.run)
    }
}

/// An immutable snapshot of a discovered environment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PythonEnvironment {
    pub id: EnvironmentId,
    pub name: String,
    pub display_name: String,
    /// Root directory of the environment (the interpreter prefix).
    pub root: PathBuf,
    pub version: String,
    pub exec_info: ExecInfo,
    /// Optional display-grouping label, e.g. the owning project name.
    pub group: Option<String>,
}

impl PythonEnvironment {
    pub fn new(
        id: EnvironmentId,
        name: impl Into<String>,
        root: impl Into<PathBuf>,
        version: impl Into<String>,
        exec_info: ExecInfo,
    ) -> Self {
        let name = name.into();
        let version = version.into();
        Self {
            display_name: format!("{} ({})", name, version),
            id,
            name,
            root: root.into(),
            version,
            exec_info,
            group: None,
        }
    }

    pub fn with_display_name(mut self, display_name: impl Into<String>) -> Self {
        self.display_name = display_name.into();
        self
    }

    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.group = Some(group.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_effective_run_prefers_activated() {
        let info = ExecInfo::new(ExecCommand::new("/env/bin/python"))
            .with_activated_run(ExecCommand::with_args("conda", ["run", "-n", "env"]));
        assert_eq!(info.effective_run().executable, "conda");
    }

    #[test]
    fn test_effective_run_falls_back_to_run() {
        let info = ExecInfo::new(ExecCommand::new("/env/bin/python"));
        assert_eq!(info.effective_run().executable, "/env/bin/python");
        assert!(info.effective_run().args.is_empty());
    }

    #[test]
    fn test_display_name_defaults_to_name_and_version() {
        let env = PythonEnvironment::new(
            EnvironmentId::new("builtin:venv", ".venv"),
            ".venv",
            "/repo/.venv",
            "3.12.1",
            ExecInfo::new(ExecCommand::new("/repo/.venv/bin/python")),
        );
        assert_eq!(env.display_name, ".venv (3.12.1)");
        assert_eq!(env.group, None);
    }

    #[test]
    fn test_environment_id_display() {
        let id = EnvironmentId::new("builtin:system", "/usr/bin/python3");
        assert_eq!(id.to_string(), "builtin:system//usr/bin/python3");
    }

    #[test]
    fn test_environments_are_value_equal() {
        let make = || {
            PythonEnvironment::new(
                EnvironmentId::new("builtin:venv", ".venv"),
                ".venv",
                "/repo/.venv",
                "3.12.1",
                ExecInfo::new(ExecCommand::new("/repo/.venv/bin/python")),
            )
        };
        assert_eq!(make(), make());
    }

    #[test]
    fn test_exec_info_serde_round_trip() {
        let mut info = ExecInfo::new(ExecCommand::new("/env/bin/python"));
        info.activation.insert(
            ShellKind::Bash,
            vec![ExecCommand::with_args("source", ["/env/bin/activate"])],
        );
        let json = serde_json::to_string(&info).unwrap();
        let parsed: ExecInfo = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, info);
        assert!(json.contains("\"bash\""));
    }
}
