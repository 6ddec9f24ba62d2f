//! Keeps a child process alive: spawns it, watches it exit, and restarts it
//! according to the configured policy until told to stop.

pub mod cooldown;
pub mod kill;
pub mod monitor;
pub mod plugin;
pub mod spawner;

#[cfg(target_os = "linux")]
mod linux;

#[cfg(all(unix, not(target_os = "linux")))]
mod macos;

#[cfg(target_os = "windows")]
mod windows;

pub use cooldown::Cooldown;
pub use monitor::{Hook, Monitor, MonitorBuilder, WeakMonitor};
pub use plugin::Plugin;

use respawn_core::{CommandSpec, MonitorConfig, Result};
use tracing::debug;

/// Creates a monitor for `spec`, attaches a [`Cooldown`] when one is
/// configured, and starts it.
pub async fn start(spec: impl Into<CommandSpec>, config: MonitorConfig) -> Result<Monitor> {
    let cooldown = Cooldown::from_config(&config)?;
    let monitor = Monitor::new(spec, config)?;
    if let Some(cooldown) = cooldown {
        debug!(uid = %monitor.uid(), interval = ?cooldown.interval(), "attaching cooldown");
        monitor.use_plugin(std::sync::Arc::new(cooldown)).await?;
    }
    monitor.start();
    Ok(monitor)
}
