use bytes::Bytes;
use parking_lot::Mutex;
use respawn_core::Result;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::sync::{mpsc, oneshot};
use tokio::time;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct OutputWriterConfig {
    pub path: PathBuf,
    /// Keep existing content instead of truncating on open.
    pub append: bool,
    pub buffer_size: usize,
    pub flush_interval: Duration,
}

impl OutputWriterConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            append: false,
            buffer_size: 8192,
            flush_interval: Duration::from_millis(100),
        }
    }

    pub fn append(mut self, append: bool) -> Self {
        self.append = append;
        self
    }
}

enum WriteCommand {
    Write(Bytes),
    FlushAndWait(oneshot::Sender<()>),
    Close,
}

/// Copies a child's output stream into a file, byte for byte.
///
/// Writes are queued to a background task that owns the file and flushes it
/// on a fixed interval.
pub struct OutputWriter {
    path: PathBuf,
    tx: mpsc::Sender<WriteCommand>,
    finished: Mutex<Option<oneshot::Receiver<()>>>,
}

impl std::fmt::Debug for OutputWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutputWriter")
            .field("path", &self.path)
            .finish()
    }
}

impl OutputWriter {
    pub async fn open(config: OutputWriterConfig) -> Result<Self> {
        let mut options = OpenOptions::new();
        options.create(true);
        if config.append {
            options.append(true);
        } else {
            options.write(true).truncate(true);
        }
        let file = options.open(&config.path).await?;
        debug!("Opened output file {:?} (append: {})", config.path, config.append);

        let file = BufWriter::with_capacity(config.buffer_size, file);
        let (tx, rx) = mpsc::channel::<WriteCommand>(10000);
        let (finished_tx, finished_rx) = oneshot::channel();

        tokio::spawn(Self::run(
            file,
            rx,
            config.path.clone(),
            config.flush_interval,
            finished_tx,
        ));

        Ok(Self {
            path: config.path,
            tx,
            finished: Mutex::new(Some(finished_rx)),
        })
    }

    async fn run(
        mut file: BufWriter<File>,
        mut rx: mpsc::Receiver<WriteCommand>,
        path: PathBuf,
        flush_interval: Duration,
        finished: oneshot::Sender<()>,
    ) {
        let mut interval = time::interval(flush_interval);
        let mut dirty = false;

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if dirty {
                        Self::flush_file(&mut file, &path).await;
                        dirty = false;
                    }
                }
                cmd = rx.recv() => match cmd {
                    Some(WriteCommand::Write(data)) => {
                        if let Err(e) = file.write_all(&data).await {
                            warn!("Failed to write to {:?}: {}", path, e);
                        }
                        dirty = true;
                    }
                    Some(WriteCommand::FlushAndWait(done)) => {
                        Self::flush_file(&mut file, &path).await;
                        dirty = false;
                        let _ = done.send(());
                    }
                    Some(WriteCommand::Close) | None => {
                        Self::flush_file(&mut file, &path).await;
                        break;
                    }
                },
            }
        }

        let _ = finished.send(());
    }

    async fn flush_file(file: &mut BufWriter<File>, path: &Path) {
        if let Err(e) = file.flush().await {
            warn!("Failed to flush {:?}: {}", path, e);
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Queues `data` without waiting.
    pub fn write(&self, data: impl Into<Bytes>) -> Result<()> {
        self.tx
            .try_send(WriteCommand::Write(data.into()))
            .map_err(|e| {
                respawn_core::Error::Other(anyhow::anyhow!(
                    "Failed to queue output for {:?}: {}",
                    self.path,
                    e
                ))
            })
    }

    /// Resolves once everything queued so far is on disk.
    pub async fn flush(&self) -> Result<()> {
        let (done_tx, done_rx) = oneshot::channel();
        self.tx
            .send(WriteCommand::FlushAndWait(done_tx))
            .await
            .map_err(|e| {
                respawn_core::Error::Other(anyhow::anyhow!("Failed to send flush command: {}", e))
            })?;

        match time::timeout(Duration::from_secs(1), done_rx).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(respawn_core::Error::Other(anyhow::anyhow!(
                "Flush operation failed"
            ))),
            Err(_) => Err(respawn_core::Error::Other(anyhow::anyhow!(
                "Flush operation timed out"
            ))),
        }
    }

    pub async fn close(&self) -> Result<()> {
        // already closed when the task is gone
        let _ = self.tx.send(WriteCommand::Close).await;

        let finished = self.finished.lock().take();
        if let Some(finished) = finished
            && time::timeout(Duration::from_secs(5), finished).await.is_err()
        {
            warn!("Output writer for {:?} did not finish within timeout", self.path);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_writes_bytes_verbatim() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out.log");
        let writer = OutputWriter::open(OutputWriterConfig::new(&path)).await.unwrap();

        writer.write(&b"partial "[..]).unwrap();
        writer.write(&b"line\nno newline"[..]).unwrap();
        writer.flush().await.unwrap();

        let content = tokio::fs::read_to_string(&path).await.unwrap();
        assert_eq!(content, "partial line\nno newline");
    }

    #[tokio::test]
    async fn test_truncates_unless_appending() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out.log");
        tokio::fs::write(&path, "old\n").await.unwrap();

        let writer = OutputWriter::open(OutputWriterConfig::new(&path).append(true))
            .await
            .unwrap();
        writer.write("new\n").unwrap();
        writer.close().await.unwrap();
        assert_eq!(tokio::fs::read_to_string(&path).await.unwrap(), "old\nnew\n");

        let writer = OutputWriter::open(OutputWriterConfig::new(&path)).await.unwrap();
        writer.write("fresh\n").unwrap();
        writer.close().await.unwrap();
        assert_eq!(tokio::fs::read_to_string(&path).await.unwrap(), "fresh\n");
    }

    #[tokio::test]
    async fn test_interval_flush() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("auto.log");
        let config = OutputWriterConfig {
            flush_interval: Duration::from_millis(20),
            ..OutputWriterConfig::new(&path)
        };
        let writer = OutputWriter::open(config).await.unwrap();
        writer.write("tick\n").unwrap();

        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if tokio::fs::read_to_string(&path).await.unwrap() == "tick\n" {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_write_after_close_fails() {
        let dir = TempDir::new().unwrap();
        let writer = OutputWriter::open(OutputWriterConfig::new(dir.path().join("c.log")))
            .await
            .unwrap();
        writer.close().await.unwrap();
        assert!(writer.write("late").is_err());
        assert!(writer.flush().await.is_err());
    }
}
