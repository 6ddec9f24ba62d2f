use once_cell::sync::Lazy;
use regex::Regex;
use respawn_core::env::ambient_env;
use respawn_core::{
    CommandParser, Error, MonitorConfig, ProcessBuilder, ResolvedCommand, Result, StdioMode,
    StdioSet, merge_env,
};
use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use tokio::process::Child;
use tracing::debug;

#[cfg(unix)]
use respawn_ipc::ParentChannel;

/// Runtimes whose first argument is a script file that must exist.
static INTERPRETER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:^|[/\\])(?:node|nodejs|bun|deno|python[0-9.]*|ruby|perl)(?:\.exe)?$")
        .expect("interpreter pattern")
});

static FLAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"^--?[\w-]+$").expect("flag pattern"));

pub struct SpawnedChild {
    pub child: Child,
    pub pid: u32,
    #[cfg(unix)]
    pub channel: Option<ParentChannel>,
}

/// Turns a monitor's command and configuration into a running child.
pub struct Spawner {
    parser: Arc<dyn CommandParser>,
    command: String,
    args: Vec<String>,
    config: Arc<MonitorConfig>,
    target_exists: bool,
}

impl Spawner {
    pub fn new(
        command: String,
        args: Vec<String>,
        parser: Arc<dyn CommandParser>,
        config: Arc<MonitorConfig>,
    ) -> Self {
        Self {
            parser,
            command,
            args,
            config,
            target_exists: false,
        }
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    pub fn resolve(&self) -> Result<ResolvedCommand> {
        self.parser
            .parse(&self.command, &self.args)
            .ok_or_else(|| Error::BadCommand(self.command.clone()))
    }

    /// Interpreter targets are checked once; a successful check is
    /// remembered for later restarts.
    async fn verify_target(&mut self, run: &ResolvedCommand) -> Result<()> {
        if self.target_exists || !self.config.check_file || !INTERPRETER.is_match(&run.command) {
            return Ok(());
        }
        let Some(script) = run.args.first().filter(|arg| !FLAG.is_match(arg)) else {
            return Ok(());
        };

        let path = self.config.working_dir().join(Path::new(script));
        if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
            return Err(Error::ScriptNotFound(script.clone()));
        }
        self.target_exists = true;
        Ok(())
    }

    fn environment(&self) -> HashMap<String, String> {
        let mut env = merge_env(ambient_env(), &self.config.env, &self.config.hidden_env());
        if self.config.stdio == StdioMode::Ipc && respawn_ipc::SUPPORTED {
            for (key, value) in respawn_ipc::channel_env() {
                env.insert(key.to_string(), value);
            }
        }
        env
    }

    fn stdio(&self) -> Result<StdioSet> {
        if let Some(factory) = &self.config.stdio_factory {
            return Ok(factory.make()?);
        }
        Ok(match self.config.stdio {
            StdioMode::Pipe | StdioMode::Ipc => StdioSet {
                stdin: Stdio::null(),
                stdout: Stdio::piped(),
                stderr: Stdio::piped(),
            },
            StdioMode::Inherit => StdioSet {
                stdin: Stdio::inherit(),
                stdout: Stdio::inherit(),
                stderr: Stdio::inherit(),
            },
            StdioMode::Null => StdioSet {
                stdin: Stdio::null(),
                stdout: Stdio::null(),
                stderr: Stdio::null(),
            },
        })
    }

    pub async fn try_spawn(&mut self) -> Result<SpawnedChild> {
        let run = self.resolve()?;
        self.verify_target(&run).await?;

        let builder = ProcessBuilder::new(&run.command)
            .args(&run.args)
            .envs(self.environment())
            .current_dir(self.config.working_dir())
            .stdio(self.stdio()?)
            .detached(cfg!(windows));

        #[cfg(unix)]
        let (builder, channel) = if self.config.stdio == StdioMode::Ipc {
            let (parent, child_end) = respawn_ipc::channel_pair()?;
            (builder.channel(child_end), Some(parent))
        } else {
            (builder, None)
        };

        #[cfg(not(unix))]
        {
            if self.config.stdio == StdioMode::Ipc {
                tracing::warn!("Message channels are not supported here; falling back to pipes");
            }
        }

        let child = builder.spawn()?;
        let pid = child.id().ok_or_else(|| {
            Error::SpawnFailed(format!("{}: exited before its pid was read", run.command))
        })?;
        debug!(pid, command = %run.command, "spawned child");

        Ok(SpawnedChild {
            child,
            pid,
            #[cfg(unix)]
            channel,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use respawn_core::platform_parser;

    fn spawner(command: &str, args: &[&str], config: MonitorConfig) -> Spawner {
        Spawner::new(
            command.to_string(),
            args.iter().map(|a| a.to_string()).collect(),
            platform_parser(),
            Arc::new(config),
        )
    }

    #[test]
    fn test_interpreter_pattern() {
        for name in ["node", "/usr/bin/node", "nodejs", "python3", "C:\\nodejs\\node.exe", "bun"] {
            assert!(INTERPRETER.is_match(name), "{}", name);
        }
        for name in ["sh", "nodemon", "mynode", "/opt/node/bin/npm"] {
            assert!(!INTERPRETER.is_match(name), "{}", name);
        }
        assert!(FLAG.is_match("--inspect"));
        assert!(FLAG.is_match("-e"));
        assert!(!FLAG.is_match("server.js"));
    }

    #[tokio::test]
    async fn test_missing_script_is_reported() {
        let dir = tempfile::TempDir::new().unwrap();
        let config = MonitorConfig {
            cwd: Some(dir.path().to_path_buf()),
            ..Default::default()
        };
        let mut s = spawner("node", &["missing.js"], config);
        let run = s.resolve().unwrap();
        assert!(matches!(s.verify_target(&run).await, Err(Error::ScriptNotFound(name)) if name == "missing.js"));
    }

    #[tokio::test]
    async fn test_existing_script_is_remembered() {
        let dir = tempfile::TempDir::new().unwrap();
        let script = dir.path().join("app.js");
        std::fs::write(&script, "").unwrap();
        let config = MonitorConfig {
            cwd: Some(dir.path().to_path_buf()),
            ..Default::default()
        };
        let mut s = spawner("node", &["app.js"], config);
        let run = s.resolve().unwrap();
        s.verify_target(&run).await.unwrap();

        std::fs::remove_file(&script).unwrap();
        assert!(s.verify_target(&run).await.is_ok());
    }

    #[tokio::test]
    async fn test_check_skipped_for_flags_and_when_disabled() {
        let mut s = spawner("node", &["-e", "1"], MonitorConfig::default());
        let run = s.resolve().unwrap();
        assert!(s.verify_target(&run).await.is_ok());

        let config = MonitorConfig {
            check_file: false,
            ..Default::default()
        };
        let mut s = spawner("node", &["nowhere.js"], config);
        let run = s.resolve().unwrap();
        assert!(s.verify_target(&run).await.is_ok());
    }

    #[test]
    fn test_environment_respects_overrides_and_hidden() {
        // SAFETY: test-local variable name.
        unsafe { std::env::set_var("RESPAWN_SPAWNER_HIDDEN", "secret") };
        let mut config = MonitorConfig {
            hide_env: vec!["RESPAWN_SPAWNER_HIDDEN".to_string()],
            ..Default::default()
        };
        config.env.insert("RESPAWN_SPAWNER_EXTRA".to_string(), "1".to_string());

        let env = spawner("true", &[], config).environment();
        assert_eq!(env.get("RESPAWN_SPAWNER_EXTRA").map(String::as_str), Some("1"));
        assert!(!env.contains_key("RESPAWN_SPAWNER_HIDDEN"));
    }

    #[test]
    fn test_ipc_mode_advertises_channel() {
        let config = MonitorConfig {
            stdio: StdioMode::Ipc,
            ..Default::default()
        };
        let env = spawner("true", &[], config).environment();
        assert_eq!(
            env.get("NODE_CHANNEL_FD").is_some(),
            respawn_ipc::SUPPORTED
        );
    }
}
