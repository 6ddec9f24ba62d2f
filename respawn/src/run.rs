use respawn_core::{LifecycleState, MonitorEvent};
use respawn_logging::LogCapture;
use respawn_supervisor::{Cooldown, Monitor};
use std::process::ExitCode;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::cli::Cli;

/// Runs one monitor in the foreground until its child exits for good or the
/// supervisor is told to shut down.
pub async fn execute(cli: Cli) -> anyhow::Result<ExitCode> {
    let config = cli.monitor_config().await?;
    let cooldown = Cooldown::from_config(&config)?;

    let monitor = Monitor::new(cli.command, config)?;
    let capture = Arc::new(LogCapture::new());
    monitor.use_plugin(capture.clone()).await?;
    if let Some(cooldown) = cooldown {
        monitor.use_plugin(Arc::new(cooldown)).await?;
    }

    let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
    setup_signal_handlers(shutdown_tx)?;

    let mut events = monitor.subscribe();
    monitor.start();

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => {
                info!("Shutdown signal received");
                monitor.stop().await;
                return Ok(ExitCode::SUCCESS);
            }
            event = events.recv() => match event {
                Some(MonitorEvent::Start(snapshot)) | Some(MonitorEvent::Restart(snapshot)) => {
                    info!(
                        uid = %snapshot.uid,
                        pid = ?snapshot.pid,
                        restarts = snapshot.restarts,
                        "child running: {}",
                        snapshot.command
                    );
                }
                Some(MonitorEvent::ExitCode { code, signal }) => {
                    warn!(uid = %monitor.uid(), ?code, ?signal, "child exited");
                }
                Some(MonitorEvent::Exit { snapshot, spinning }) => {
                    info!(uid = %snapshot.uid, restarts = snapshot.restarts, spinning, "not restarting");
                    capture.flush().await?;
                    return Ok(ExitCode::SUCCESS);
                }
                Some(MonitorEvent::Error(err)) => {
                    if monitor.state() == LifecycleState::Idle {
                        error!("Failed to start: {}", err);
                        capture.flush().await?;
                        return Ok(ExitCode::FAILURE);
                    }
                }
                Some(_) => {}
                None => return Ok(ExitCode::SUCCESS),
            }
        }
    }
}

fn setup_signal_handlers(shutdown_tx: mpsc::Sender<()>) -> anyhow::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;
        tokio::spawn(async move {
            tokio::select! {
                _ = sigterm.recv() => {
                    info!("Received SIGTERM");
                }
                _ = sigint.recv() => {
                    info!("Received SIGINT");
                }
            }

            let _ = shutdown_tx.send(()).await;
        });
    }
    #[cfg(not(unix))]
    {
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Received Ctrl-C");
                let _ = shutdown_tx.send(()).await;
            }
        });
    }
    Ok(())
}
