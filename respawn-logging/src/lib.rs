//! Output capture for supervised children: echoes what a child prints and
//! copies it into the configured out/err files.

mod writer;

pub use writer::{OutputWriter, OutputWriterConfig};

use async_trait::async_trait;
use parking_lot::Mutex;
use respawn_core::{MonitorConfig, MonitorEvent, Result};
use respawn_supervisor::{Monitor, Plugin};
use std::path::Path;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

type FlushRequest = oneshot::Sender<()>;

#[derive(Default)]
struct Capture {
    flush_tx: Option<mpsc::UnboundedSender<FlushRequest>>,
    task: Option<JoinHandle<()>>,
}

/// Plugin that listens for `stdout`/`stderr` events.
///
/// Output is echoed to the supervisor's own streams unless the monitor is
/// `silent`, and written to `out_file`/`err_file` when those are set.
#[derive(Default)]
pub struct LogCapture {
    capture: Mutex<Capture>,
}

impl LogCapture {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handles every event published so far, then flushes both files.
    pub async fn flush(&self) -> Result<()> {
        let flush_tx = self.capture.lock().flush_tx.clone();
        let Some(flush_tx) = flush_tx else {
            return Ok(());
        };
        let (done, flushed) = oneshot::channel();
        if flush_tx.send(done).is_err() {
            return Ok(());
        }
        flushed.await.map_err(|_| {
            respawn_core::Error::Other(anyhow::anyhow!("log capture stopped before flushing"))
        })
    }
}

async fn open(path: Option<&Path>, append: bool) -> Result<Option<OutputWriter>> {
    match path {
        Some(path) => Ok(Some(
            OutputWriter::open(OutputWriterConfig::new(path).append(append)).await?,
        )),
        None => Ok(None),
    }
}

struct Sink {
    silent: bool,
    out: Option<OutputWriter>,
    err: Option<OutputWriter>,
    stdout: tokio::io::Stdout,
    stderr: tokio::io::Stderr,
}

impl Sink {
    async fn handle(&mut self, event: MonitorEvent) {
        match event {
            MonitorEvent::Stdout(data) => {
                if !self.silent {
                    echo(&mut self.stdout, &data).await;
                }
                record(self.out.as_ref(), data);
            }
            MonitorEvent::Stderr(data) => {
                if !self.silent {
                    echo(&mut self.stderr, &data).await;
                }
                record(self.err.as_ref(), data);
            }
            _ => {}
        }
    }

    async fn flush(&self) {
        for writer in self.out.iter().chain(self.err.iter()) {
            if let Err(e) = writer.flush().await {
                warn!("Failed to flush {:?}: {}", writer.path(), e);
            }
        }
    }

    async fn close(&self) {
        for writer in self.out.iter().chain(self.err.iter()) {
            let _ = writer.close().await;
        }
    }
}

async fn echo<W: AsyncWrite + Unpin>(stream: &mut W, data: &[u8]) {
    if let Err(e) = stream.write_all(data).await {
        debug!("Failed to echo child output: {}", e);
        return;
    }
    let _ = stream.flush().await;
}

fn record(writer: Option<&OutputWriter>, data: bytes::Bytes) {
    if let Some(writer) = writer
        && let Err(e) = writer.write(data)
    {
        warn!("{}", e);
    }
}

#[async_trait]
impl Plugin for LogCapture {
    fn name(&self) -> &str {
        "log-capture"
    }

    async fn attach(&self, monitor: &Monitor, config: &MonitorConfig) -> Result<()> {
        let mut sink = Sink {
            silent: config.silent,
            out: open(config.out_file.as_deref(), config.append).await?,
            err: open(config.err_file.as_deref(), config.append).await?,
            stdout: tokio::io::stdout(),
            stderr: tokio::io::stderr(),
        };

        let mut events = monitor.events().subscribe_named("log-capture");
        let (flush_tx, mut flush_rx) = mpsc::unbounded_channel::<FlushRequest>();
        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    event = events.recv() => match event {
                        Some(event) => sink.handle(event).await,
                        None => break,
                    },
                    Some(done) = flush_rx.recv() => {
                        while let Some(event) = events.try_recv() {
                            sink.handle(event).await;
                        }
                        sink.flush().await;
                        let _ = done.send(());
                    }
                }
            }
            sink.close().await;
        });

        let silent = config.silent;
        let mut capture = self.capture.lock();
        if let Some(previous) = capture.task.replace(task) {
            previous.abort();
        }
        capture.flush_tx = Some(flush_tx);
        debug!(uid = %monitor.uid(), silent, "capturing child output");
        Ok(())
    }

    async fn detach(&self, _monitor: &Monitor) {
        if let Err(e) = self.flush().await {
            warn!("Failed to flush captured output: {}", e);
        }
    }
}
