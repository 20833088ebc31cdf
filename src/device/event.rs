//! Device events and listener fan-out.
//!
//! Every listener gets its own queue drained by a dedicated task, so a slow
//! listener (an SMTP round trip, say) delays only itself. Events for a
//! listener arrive in the order the device emitted them. Replies are capped
//! per listener: once [`LISTENER_QUEUE`] of them are waiting, further replies
//! are dropped for that listener with a warning. Alarm and Clear are never
//! dropped.

use std::net::IpAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;

use super::{DeviceId, ResponseClass};

/// Replies that may wait in one listener's queue.
pub const LISTENER_QUEUE: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// A probe completed
    Reply,
    /// The device entered the alarm state
    Alarm,
    /// The device left the alarm state
    Clear,
}

/// Something that happened to a device.
#[derive(Debug, Clone, Serialize)]
pub struct DeviceEvent {
    pub kind: EventKind,
    pub device_id: DeviceId,
    pub device: Arc<str>,
    pub address: IpAddr,
    pub class: ResponseClass,
    #[serde(rename = "rtt_ms", serialize_with = "serialize_millis")]
    pub rtt: Duration,
    pub timestamp: DateTime<Utc>,
}

pub(crate) fn serialize_millis<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_f64(d.as_micros() as f64 / 1000.0)
}

/// Observer of device events. All methods default to doing nothing.
#[async_trait]
pub trait DeviceListener: Send + Sync + 'static {
    async fn on_reply(&self, _event: &DeviceEvent) {}

    async fn on_alarm(&self, _event: &DeviceEvent) {}

    async fn on_clear(&self, _event: &DeviceEvent) {}

    /// Whether Reply events should be queued for this listener at all.
    fn wants_replies(&self) -> bool {
        true
    }
}

/// Handle returned by `Device::add_listener`, used to remove the listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Queue feeding one listener task.
struct ListenerQueue {
    id: ListenerId,
    tx: mpsc::UnboundedSender<DeviceEvent>,
    /// Replies sent but not yet taken by the listener task
    backlog: Arc<AtomicUsize>,
    replies: bool,
}

/// Registered listeners of one device, in registration order.
#[derive(Default)]
pub(crate) struct ListenerSet {
    next_id: u64,
    queues: Vec<ListenerQueue>,
}

impl ListenerSet {
    /// Register a listener and spawn the task feeding it.
    ///
    /// Must be called within a tokio runtime.
    pub(crate) fn add(&mut self, listener: Arc<dyn DeviceListener>) -> ListenerId {
        let id = ListenerId(self.next_id);
        self.next_id += 1;

        let (tx, rx) = mpsc::unbounded_channel();
        let backlog = Arc::new(AtomicUsize::new(0));
        let replies = listener.wants_replies();
        tokio::spawn(run_listener(listener, rx, backlog.clone()));
        self.queues.push(ListenerQueue {
            id,
            tx,
            backlog,
            replies,
        });
        id
    }

    /// Unregister a listener. Events already queued are still delivered.
    pub(crate) fn remove(&mut self, id: ListenerId) -> bool {
        let before = self.queues.len();
        self.queues.retain(|q| q.id != id);
        self.queues.len() != before
    }

    pub(crate) fn len(&self) -> usize {
        self.queues.len()
    }

    /// Queue `event` for every listener without waiting.
    pub(crate) fn emit(&mut self, event: &DeviceEvent) {
        self.queues.retain(|q| {
            if event.kind == EventKind::Reply {
                if !q.replies {
                    return true;
                }
                if q.backlog.load(Ordering::SeqCst) >= LISTENER_QUEUE {
                    tracing::warn!(
                        device = %event.device,
                        listener = q.id.0,
                        "Listener queue full, dropping reply"
                    );
                    return true;
                }
                q.backlog.fetch_add(1, Ordering::SeqCst);
            }

            if q.tx.send(event.clone()).is_err() {
                tracing::warn!(device = %event.device, listener = q.id.0, "Listener gone, removing it");
                return false;
            }
            true
        });
    }
}

async fn run_listener(
    listener: Arc<dyn DeviceListener>,
    mut rx: mpsc::UnboundedReceiver<DeviceEvent>,
    backlog: Arc<AtomicUsize>,
) {
    while let Some(event) = rx.recv().await {
        match event.kind {
            EventKind::Reply => {
                backlog.fetch_sub(1, Ordering::SeqCst);
                listener.on_reply(&event).await
            }
            EventKind::Alarm => listener.on_alarm(&event).await,
            EventKind::Clear => listener.on_clear(&event).await,
        }
    }
}
