//! Lifecycle event stream shared by a monitor and its collaborators.
//!
//! Every subscriber owns an unbounded queue, so delivery is lossless and in
//! emission order per subscriber. A subscriber that goes away (dropped
//! stream, panicked listener task) is pruned on the next publish and never
//! affects the others or the publisher.

use bytes::Bytes;
use parking_lot::Mutex;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error};

use crate::Snapshot;

#[derive(Debug, Clone)]
pub enum MonitorEvent {
    Start(Arc<Snapshot>),
    Restart(Arc<Snapshot>),
    ExitCode {
        code: Option<i32>,
        signal: Option<i32>,
    },
    /// Terminal exit; no automatic restart follows.
    Exit {
        snapshot: Arc<Snapshot>,
        spinning: bool,
    },
    Stop(Arc<Snapshot>),
    Message(serde_json::Value),
    Error(Arc<crate::Error>),
    Stdout(Bytes),
    Stderr(Bytes),
    /// Collaborator-defined events such as `watch:restart`.
    Custom {
        name: String,
        payload: serde_json::Value,
    },
}

impl MonitorEvent {
    pub fn name(&self) -> &str {
        match self {
            MonitorEvent::Start(_) => "start",
            MonitorEvent::Restart(_) => "restart",
            MonitorEvent::ExitCode { .. } => "exit:code",
            MonitorEvent::Exit { .. } => "exit",
            MonitorEvent::Stop(_) => "stop",
            MonitorEvent::Message(_) => "message",
            MonitorEvent::Error(_) => "error",
            MonitorEvent::Stdout(_) => "stdout",
            MonitorEvent::Stderr(_) => "stderr",
            MonitorEvent::Custom { name, .. } => name,
        }
    }

    pub fn error(err: crate::Error) -> Self {
        MonitorEvent::Error(Arc::new(err))
    }
}

struct Subscriber {
    name: String,
    tx: mpsc::UnboundedSender<MonitorEvent>,
}

#[derive(Clone, Default)]
pub struct EventBus {
    subscribers: Arc<Mutex<Vec<Subscriber>>>,
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish(&self, event: MonitorEvent) {
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|sub| {
            let delivered = sub.tx.send(event.clone()).is_ok();
            if !delivered {
                debug!(subscriber = %sub.name, "dropping closed subscriber");
            }
            delivered
        });
    }

    /// Receives every event published after this call.
    pub fn subscribe(&self) -> EventStream {
        self.subscribe_named("anonymous")
    }

    pub fn subscribe_named(&self, name: impl Into<String>) -> EventStream {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.lock().push(Subscriber {
            name: name.into(),
            tx,
        });
        EventStream { rx }
    }

    /// Runs `handler` for every event on its own task. A panic inside the
    /// handler is logged and the listener keeps going.
    pub fn listen<F>(&self, name: impl Into<String>, mut handler: F) -> JoinHandle<()>
    where
        F: FnMut(&MonitorEvent) + Send + 'static,
    {
        let name = name.into();
        let mut stream = self.subscribe_named(name.clone());
        tokio::spawn(async move {
            while let Some(event) = stream.recv().await {
                let outcome = std::panic::catch_unwind(AssertUnwindSafe(|| handler(&event)));
                if outcome.is_err() {
                    error!(listener = %name, event = event.name(), "event listener panicked");
                }
            }
        })
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }
}

#[derive(Debug)]
pub struct EventStream {
    rx: mpsc::UnboundedReceiver<MonitorEvent>,
}

impl EventStream {
    /// `None` once the publishing side is gone.
    pub async fn recv(&mut self) -> Option<MonitorEvent> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<MonitorEvent> {
        self.rx.try_recv().ok()
    }

    /// Skips events until one named `name` arrives.
    pub async fn recv_named(&mut self, name: &str) -> Option<MonitorEvent> {
        while let Some(event) = self.rx.recv().await {
            if event.name() == name {
                return Some(event);
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn custom(name: &str) -> MonitorEvent {
        MonitorEvent::Custom {
            name: name.to_string(),
            payload: serde_json::Value::Null,
        }
    }

    #[tokio::test]
    async fn test_delivery_order_per_subscriber() {
        let bus = EventBus::new();
        let mut a = bus.subscribe();
        let mut b = bus.subscribe();

        for name in ["one", "two", "three"] {
            bus.publish(custom(name));
        }

        for stream in [&mut a, &mut b] {
            assert_eq!(stream.recv().await.unwrap().name(), "one");
            assert_eq!(stream.recv().await.unwrap().name(), "two");
            assert_eq!(stream.recv().await.unwrap().name(), "three");
        }
    }

    #[tokio::test]
    async fn test_dropped_subscriber_is_pruned() {
        let bus = EventBus::new();
        let dropped = bus.subscribe();
        let mut kept = bus.subscribe();
        drop(dropped);

        bus.publish(custom("watch:restart"));

        assert_eq!(bus.subscriber_count(), 1);
        assert_eq!(kept.recv().await.unwrap().name(), "watch:restart");
    }

    #[tokio::test]
    async fn test_panicking_listener_is_isolated() {
        let bus = EventBus::new();
        let seen = Arc::new(AtomicUsize::new(0));

        let _faulty = bus.listen("faulty", |event| {
            if event.name() == "boom" {
                panic!("listener failure");
            }
        });
        let counter = seen.clone();
        let _healthy = bus.listen("healthy", move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        let mut observer = bus.subscribe();

        bus.publish(custom("boom"));
        bus.publish(custom("after"));

        assert_eq!(observer.recv().await.unwrap().name(), "boom");
        assert_eq!(observer.recv().await.unwrap().name(), "after");

        tokio::time::timeout(Duration::from_secs(1), async {
            while seen.load(Ordering::SeqCst) < 2 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
    }

    #[test]
    fn test_event_names() {
        assert_eq!(
            MonitorEvent::ExitCode {
                code: Some(1),
                signal: None
            }
            .name(),
            "exit:code"
        );
        assert_eq!(MonitorEvent::Message(serde_json::json!({})).name(), "message");
        assert_eq!(MonitorEvent::error(crate::Error::AlreadyRunning).name(), "error");
        assert_eq!(MonitorEvent::Stdout(Bytes::from_static(b"x")).name(), "stdout");
    }
}
