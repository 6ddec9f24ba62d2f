use anyhow::Context;
use clap::Parser;
use respawn_core::{MonitorConfig, Signal, StdioMode};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "respawn")]
#[command(about = "Keep a command running, restarting it whenever it exits", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Maximum number of runs before giving up
    #[arg(short, long, value_name = "N")]
    pub max: Option<u32>,

    /// Runs shorter than this are considered spinning (milliseconds)
    #[arg(long, value_name = "MS")]
    pub min_uptime: Option<u64>,

    /// Delay before restarting a spinning child (milliseconds)
    #[arg(long, value_name = "MS")]
    pub spin_sleep: Option<u64>,

    /// Signal used to stop the child
    #[arg(long, value_name = "SIGNAL", value_parser = parse_signal)]
    pub kill_signal: Option<Signal>,

    /// Escalate to SIGKILL when the child outlives this (milliseconds)
    #[arg(long, value_name = "MS")]
    pub kill_grace: Option<u64>,

    /// Signal only the child, not its descendants
    #[arg(long)]
    pub no_kill_tree: bool,

    /// Extra environment variable for the child
    #[arg(short, long, value_name = "KEY=VALUE", value_parser = parse_key_value)]
    pub env: Vec<(String, String)>,

    /// Ambient environment variable to withhold from the child
    #[arg(long, value_name = "KEY")]
    pub hide_env: Vec<String>,

    /// Working directory for the child
    #[arg(short = 'd', long)]
    pub cwd: Option<PathBuf>,

    /// Directory the script path is relative to
    #[arg(long)]
    pub source_dir: Option<PathBuf>,

    /// Child stdio: pipe, inherit, null or ipc
    #[arg(long, value_parser = parse_stdio)]
    pub stdio: Option<StdioMode>,

    /// Do not echo child output
    #[arg(short, long)]
    pub silent: bool,

    /// File receiving the child's stdout
    #[arg(short, long)]
    pub out_file: Option<PathBuf>,

    /// File receiving the child's stderr
    #[arg(long)]
    pub err_file: Option<PathBuf>,

    /// Append to the output files instead of truncating them
    #[arg(short, long)]
    pub append: bool,

    /// Halve the restart counter on this interval (milliseconds)
    #[arg(long, value_name = "MS")]
    pub cooldown: Option<u64>,

    /// Identifier shown in logs and snapshots
    #[arg(long)]
    pub uid: Option<String>,

    /// JSON configuration file; flags override its values
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Log filter, e.g. `debug` or `respawn_supervisor=trace`
    #[arg(long, env = "RESPAWN_LOG")]
    pub log_level: Option<String>,

    /// Command to supervise, followed by its arguments
    #[arg(
        required = true,
        trailing_var_arg = true,
        allow_hyphen_values = true,
        value_name = "COMMAND"
    )]
    pub command: Vec<String>,
}

fn parse_signal(s: &str) -> Result<Signal, String> {
    s.parse().map_err(|e: respawn_core::Error| e.to_string())
}

fn parse_key_value(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected KEY=VALUE, got '{}'", s)),
    }
}

fn parse_stdio(s: &str) -> Result<StdioMode, String> {
    match s.to_ascii_lowercase().as_str() {
        "pipe" => Ok(StdioMode::Pipe),
        "inherit" => Ok(StdioMode::Inherit),
        "null" => Ok(StdioMode::Null),
        "ipc" => Ok(StdioMode::Ipc),
        _ => Err(format!("unknown stdio mode '{}'", s)),
    }
}

impl Cli {
    /// Configuration file (if any) with the command-line flags on top.
    pub async fn monitor_config(&self) -> anyhow::Result<MonitorConfig> {
        let mut config = match &self.config {
            Some(path) => MonitorConfig::load(path)
                .await
                .with_context(|| format!("Failed to load config from {:?}", path))?,
            None => MonitorConfig::default(),
        };

        let ms = Duration::from_millis;
        if let Some(max) = self.max {
            config.max_restarts = Some(max);
        }
        if let Some(min_uptime) = self.min_uptime {
            config.min_uptime = ms(min_uptime);
        }
        if let Some(spin_sleep) = self.spin_sleep {
            config.spin_sleep = Some(ms(spin_sleep));
        }
        if let Some(signal) = self.kill_signal {
            config.kill_signal = signal;
        }
        if let Some(grace) = self.kill_grace {
            config.kill_grace = Some(ms(grace));
        }
        if self.no_kill_tree {
            config.kill_tree = false;
        }
        config.env.extend(self.env.iter().cloned());
        config.hide_env.extend(self.hide_env.iter().cloned());
        if let Some(cwd) = &self.cwd {
            config.cwd = Some(cwd.clone());
        }
        if let Some(dir) = &self.source_dir {
            config.source_dir = Some(dir.clone());
        }
        if let Some(stdio) = self.stdio {
            config.stdio = stdio;
        }
        config.silent |= self.silent;
        if let Some(out) = &self.out_file {
            config.out_file = Some(out.clone());
        }
        if let Some(err) = &self.err_file {
            config.err_file = Some(err.clone());
        }
        config.append |= self.append;
        if let Some(cooldown) = self.cooldown {
            config.cooldown_interval = Some(ms(cooldown));
        }
        if let Some(uid) = &self.uid {
            config.uid = Some(uid.clone());
        }

        config.validate()?;
        Ok(config)
    }
}
