use crate::{MessageReader, MessageWriter};
use std::os::fd::OwnedFd;
use tokio::net::UnixStream;
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};

/// Supervisor end of a channel.
pub struct ParentChannel {
    stream: UnixStream,
}

impl ParentChannel {
    pub fn split(self) -> (MessageReader<OwnedReadHalf>, MessageWriter<OwnedWriteHalf>) {
        let (read, write) = self.stream.into_split();
        (MessageReader::new(read), MessageWriter::new(write))
    }
}

/// Creates a connected socket pair. The descriptor is meant for the child and
/// must be dropped by the parent once the child is spawned.
pub fn channel_pair() -> respawn_core::Result<(ParentChannel, OwnedFd)> {
    let (parent, child) = std::os::unix::net::UnixStream::pair()?;
    parent.set_nonblocking(true)?;
    let stream = UnixStream::from_std(parent)?;
    Ok((ParentChannel { stream }, OwnedFd::from(child)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_pair_carries_messages_both_ways() {
        let (parent, child_fd) = channel_pair().unwrap();
        let child = std::os::unix::net::UnixStream::from(child_fd);
        child.set_nonblocking(true).unwrap();
        let child = UnixStream::from_std(child).unwrap();
        let (child_read, child_write) = child.into_split();
        let mut child_reader = MessageReader::new(child_read);
        let mut child_writer = MessageWriter::new(child_write);

        let (mut reader, mut writer) = parent.split();

        writer.send(&json!({"from": "parent"})).await.unwrap();
        let got = child_reader.next().await.unwrap().unwrap();
        assert_eq!(got, json!({"from": "parent"}));

        child_writer
            .send(&json!({"message": got, "pong": true}))
            .await
            .unwrap();
        let reply = reader.next().await.unwrap().unwrap();
        assert_eq!(reply, json!({"message": {"from": "parent"}, "pong": true}));
    }
}
