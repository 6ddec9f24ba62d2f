//! Message channel between a supervisor and its child.
//!
//! Messages are JSON values, one per line, which is the framing Node.js uses
//! for `process.send()` with `NODE_CHANNEL_SERIALIZATION_MODE=json`.

#[cfg(unix)]
mod unix;
#[cfg(unix)]
pub use unix::{ParentChannel, channel_pair};

use respawn_core::Result;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, Lines};
use tracing::warn;

/// Whether this platform can hand a message channel to a child.
pub const SUPPORTED: bool = cfg!(unix);

/// Environment variables telling the child where its channel lives.
pub fn channel_env() -> [(&'static str, String); 3] {
    let fd = respawn_core::process::CHANNEL_FD.to_string();
    [
        ("NODE_CHANNEL_FD", fd.clone()),
        ("NODE_CHANNEL_SERIALIZATION_MODE", "json".to_string()),
        ("RESPAWN_CHANNEL_FD", fd),
    ]
}

pub struct MessageReader<R> {
    lines: Lines<BufReader<R>>,
}

impl<R: AsyncRead + Unpin> MessageReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            lines: BufReader::new(inner).lines(),
        }
    }

    /// Next message, or `None` once the peer closed its end. Lines that are
    /// not valid JSON are skipped.
    pub async fn next(&mut self) -> Result<Option<Value>> {
        while let Some(line) = self.lines.next_line().await? {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match serde_json::from_str(line) {
                Ok(value) => return Ok(Some(value)),
                Err(e) => warn!("Ignoring malformed channel message: {}", e),
            }
        }
        Ok(None)
    }
}

pub struct MessageWriter<W> {
    inner: W,
}

impl<W: AsyncWrite + Unpin> MessageWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    pub async fn send(&mut self, msg: &Value) -> Result<()> {
        let mut data = serde_json::to_vec(msg)?;
        data.push(b'\n');
        self.inner.write_all(&data).await?;
        self.inner.flush().await?;
        Ok(())
    }
}
