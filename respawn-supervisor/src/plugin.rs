use async_trait::async_trait;
use respawn_core::{MonitorConfig, Result};

use crate::Monitor;

/// Collaborator attached to a monitor, such as a log capture or a restart
/// counter cooldown.
///
/// Plugins observe the monitor through its event bus and drive it through
/// its public operations. They should hold a [`crate::WeakMonitor`] when they
/// outlive `attach`, so they never keep a monitor alive on their own.
#[async_trait]
pub trait Plugin: Send + Sync {
    fn name(&self) -> &str;

    async fn attach(&self, monitor: &Monitor, config: &MonitorConfig) -> Result<()>;

    /// Called by [`Monitor::stop`] before the child is killed.
    async fn detach(&self, _monitor: &Monitor) {}
}
