use async_trait::async_trait;
use parking_lot::Mutex;
use respawn_core::{Error, MonitorConfig, Result};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval_at};
use tracing::debug;

use crate::{Monitor, Plugin};

/// Halves the restart counter on a fixed interval, so a child that crashes
/// rarely never reaches `max_restarts`.
pub struct Cooldown {
    interval: Duration,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Cooldown {
    pub fn new(interval: Duration) -> Result<Self> {
        if interval.is_zero() {
            return Err(Error::Config(
                "cooldown interval must be greater than zero".to_string(),
            ));
        }
        Ok(Self {
            interval,
            task: Mutex::new(None),
        })
    }

    /// Cooldown configured by `cooldown_interval`, if any.
    pub fn from_config(config: &MonitorConfig) -> Result<Option<Self>> {
        config.cooldown_interval.map(Self::new).transpose()
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }
}

#[async_trait]
impl Plugin for Cooldown {
    fn name(&self) -> &str {
        "cooldown"
    }

    async fn attach(&self, monitor: &Monitor, _config: &MonitorConfig) -> Result<()> {
        let weak = monitor.downgrade();
        let period = self.interval;

        let task = tokio::spawn(async move {
            let mut ticker = interval_at(tokio::time::Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                match weak.upgrade() {
                    Some(monitor) => {
                        monitor.decay_restarts();
                    }
                    None => break,
                }
            }
            debug!("cooldown finished, monitor is gone");
        });

        if let Some(previous) = self.task.lock().replace(task) {
            previous.abort();
        }
        Ok(())
    }
}

impl Drop for Cooldown {
    fn drop(&mut self) {
        if let Some(task) = self.task.lock().take() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_interval_rejected() {
        assert!(Cooldown::new(Duration::ZERO).is_err());
    }

    #[test]
    fn test_from_config() {
        assert!(Cooldown::from_config(&MonitorConfig::default()).unwrap().is_none());

        let config = MonitorConfig {
            cooldown_interval: Some(Duration::from_secs(60)),
            ..Default::default()
        };
        let cooldown = Cooldown::from_config(&config).unwrap().unwrap();
        assert_eq!(cooldown.interval(), Duration::from_secs(60));
    }
}
