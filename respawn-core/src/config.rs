use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;

use crate::process::{Signal, StdioFactory};

/// What to run: a single executable/script path, or an explicit
/// `[executable, args...]` vector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CommandSpec {
    Script(String),
    Argv(Vec<String>),
}

impl CommandSpec {
    /// Splits into the command string and argument list the monitor
    /// keeps for its lifetime.
    ///
    /// A script runs under `config.command` when an interpreter is configured,
    /// in which case it becomes the first argument. `source_dir` is joined
    /// onto that first argument.
    pub fn into_parts(self, config: &MonitorConfig) -> (String, Vec<String>) {
        let (command, mut args) = match self {
            CommandSpec::Argv(mut argv) => {
                if argv.is_empty() {
                    (String::new(), Vec::new())
                } else {
                    let command = argv.remove(0);
                    (command, argv)
                }
            }
            CommandSpec::Script(script) => match &config.command {
                Some(interpreter) => {
                    let mut args = Vec::with_capacity(config.args.len() + 1);
                    args.push(script);
                    args.extend(config.args.iter().cloned());
                    (interpreter.clone(), args)
                }
                None => (script, config.args.clone()),
            },
        };

        if let (Some(dir), Some(first)) = (&config.source_dir, args.first_mut()) {
            *first = dir.join(first.as_str()).to_string_lossy().into_owned();
        }

        (command, args)
    }
}

impl From<&str> for CommandSpec {
    fn from(script: &str) -> Self {
        CommandSpec::Script(script.to_string())
    }
}

impl From<String> for CommandSpec {
    fn from(script: String) -> Self {
        CommandSpec::Script(script)
    }
}

impl From<Vec<String>> for CommandSpec {
    fn from(argv: Vec<String>) -> Self {
        CommandSpec::Argv(argv)
    }
}

impl From<&[&str]> for CommandSpec {
    fn from(argv: &[&str]) -> Self {
        CommandSpec::Argv(argv.iter().map(|s| s.to_string()).collect())
    }
}

impl<const N: usize> From<[&str; N]> for CommandSpec {
    fn from(argv: [&str; N]) -> Self {
        CommandSpec::Argv(argv.iter().map(|s| s.to_string()).collect())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StdioMode {
    /// stdout/stderr piped and republished as bus events.
    #[default]
    Pipe,
    Inherit,
    Null,
    /// `Pipe` plus a JSON message channel to the child.
    Ipc,
}

/// Policy and spawn settings for one monitor.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Interpreter used to run a script spec (e.g. `node`).
    pub command: Option<String>,
    pub args: Vec<String>,
    #[serde(alias = "max")]
    pub max_restarts: Option<u32>,
    #[serde(rename = "min_uptime_ms", with = "duration_ms")]
    pub min_uptime: Duration,
    #[serde(rename = "spin_sleep_ms", with = "option_duration_ms")]
    pub spin_sleep: Option<Duration>,
    pub kill_signal: Signal,
    #[serde(rename = "kill_grace_ms", with = "option_duration_ms")]
    pub kill_grace: Option<Duration>,
    pub kill_tree: bool,
    pub env: HashMap<String, String>,
    pub hide_env: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub source_dir: Option<PathBuf>,
    pub stdio: StdioMode,
    pub uid: Option<String>,
    pub id: Option<String>,
    pub silent: bool,
    pub check_file: bool,
    pub ignore_clean_exit: bool,
    pub out_file: Option<PathBuf>,
    pub err_file: Option<PathBuf>,
    pub log_file: Option<PathBuf>,
    pub pid_file: Option<PathBuf>,
    pub append: bool,
    #[serde(rename = "cooldown_interval_ms", with = "option_duration_ms")]
    pub cooldown_interval: Option<Duration>,
    #[serde(skip)]
    pub stdio_factory: Option<StdioFactory>,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            command: None,
            args: Vec::new(),
            max_restarts: None,
            min_uptime: Duration::ZERO,
            spin_sleep: None,
            kill_signal: Signal::Kill,
            kill_grace: None,
            kill_tree: true,
            env: HashMap::new(),
            hide_env: Vec::new(),
            cwd: None,
            source_dir: None,
            stdio: StdioMode::Pipe,
            uid: None,
            id: None,
            silent: false,
            check_file: true,
            ignore_clean_exit: false,
            out_file: None,
            err_file: None,
            log_file: None,
            pid_file: None,
            append: false,
            cooldown_interval: None,
            stdio_factory: None,
        }
    }
}

impl MonitorConfig {
    pub async fn load(path: impl AsRef<Path>) -> crate::Result<Self> {
        let content = fs::read_to_string(path.as_ref()).await?;
        Self::from_json(&content)
    }

    pub fn from_json(content: &str) -> crate::Result<Self> {
        let config: MonitorConfig = serde_json::from_str(content)
            .map_err(|e| crate::Error::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> crate::Result<()> {
        if let Some(uid) = &self.uid {
            crate::Uid::new(uid.as_str())?;
        }
        if self.cooldown_interval == Some(Duration::ZERO) {
            return Err(crate::Error::Config(
                "cooldown_interval must be greater than zero".to_string(),
            ));
        }
        if self.spin_sleep.is_some() && self.min_uptime.is_zero() {
            tracing::debug!("spin_sleep has no effect while min_uptime is zero");
        }
        Ok(())
    }

    pub fn hidden_env(&self) -> HashSet<String> {
        self.hide_env.iter().cloned().collect()
    }

    /// Working directory for the child: configured `cwd` or the supervisor's own.
    pub fn working_dir(&self) -> PathBuf {
        self.cwd
            .clone()
            .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from("/")))
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

mod option_duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(
        value: &Option<Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => serializer.serialize_some(&(d.as_millis() as u64)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        Option::<u64>::deserialize(deserializer).map(|ms| ms.map(Duration::from_millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = MonitorConfig::default();
        assert_eq!(config.kill_signal, Signal::Kill);
        assert!(config.kill_tree);
        assert!(config.check_file);
        assert_eq!(config.stdio, StdioMode::Pipe);
        assert_eq!(config.min_uptime, Duration::ZERO);
        assert!(config.max_restarts.is_none());
    }

    #[test]
    fn test_script_with_interpreter() {
        let config = MonitorConfig {
            command: Some("node".to_string()),
            args: vec!["-p".to_string(), "8080".to_string()],
            ..Default::default()
        };
        let (command, args) = CommandSpec::from("server.js").into_parts(&config);
        assert_eq!(command, "node");
        assert_eq!(args, vec!["server.js", "-p", "8080"]);
    }

    #[test]
    fn test_script_without_interpreter() {
        let (command, args) = CommandSpec::from("/usr/bin/worker").into_parts(&MonitorConfig::default());
        assert_eq!(command, "/usr/bin/worker");
        assert!(args.is_empty());
    }

    #[test]
    fn test_argv_with_source_dir() {
        let config = MonitorConfig {
            source_dir: Some(PathBuf::from("/srv/app")),
            ..Default::default()
        };
        let (command, args) = CommandSpec::from(["node", "index.js", "--x"]).into_parts(&config);
        assert_eq!(command, "node");
        assert_eq!(args[0], PathBuf::from("/srv/app").join("index.js").to_string_lossy());
        assert_eq!(args[1], "--x");
    }

    #[test]
    fn test_from_json_durations_in_millis() {
        let config = MonitorConfig::from_json(
            r#"{
                "max": 3,
                "min_uptime_ms": 1500,
                "spin_sleep_ms": 250,
                "kill_signal": "SIGTERM",
                "kill_grace_ms": 500,
                "hide_env": ["SECRET"],
                "stdio": "ipc"
            }"#,
        )
        .unwrap();
        assert_eq!(config.max_restarts, Some(3));
        assert_eq!(config.min_uptime, Duration::from_millis(1500));
        assert_eq!(config.spin_sleep, Some(Duration::from_millis(250)));
        assert_eq!(config.kill_signal, Signal::Terminate);
        assert_eq!(config.kill_grace, Some(Duration::from_millis(500)));
        assert_eq!(config.stdio, StdioMode::Ipc);
        assert!(config.hidden_env().contains("SECRET"));
        assert!(config.kill_tree);
    }

    #[test]
    fn test_from_json_rejects_zero_cooldown() {
        let err = MonitorConfig::from_json(r#"{"cooldown_interval_ms": 0}"#).unwrap_err();
        assert!(matches!(err, crate::Error::Config(_)));
    }

    #[test]
    fn test_from_json_rejects_bad_uid() {
        assert!(MonitorConfig::from_json("{\"uid\": \"###\"}").is_err());
    }
}
