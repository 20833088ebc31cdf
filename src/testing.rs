//! Shared test doubles.

use std::collections::VecDeque;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;

use crate::config::DeviceConfig;
use crate::device::{DeviceEvent, DeviceId, DeviceListener, EventKind, ResponseClass};
use crate::notify::{Notification, Notifier, NotifyError};
use crate::probe::{ProbeError, ProbeOutcome, Prober};
use crate::sync::lock;

pub type ProbeResult = Result<ProbeOutcome, ProbeError>;

pub fn ms(v: u64) -> Duration {
    Duration::from_millis(v)
}

/// Config with the given timings, everything else fixed.
pub fn device_config(limit_ms: u64, timeout_ms: u64, interval_ms: u64) -> DeviceConfig {
    DeviceConfig::new(
        IpAddr::V4(Ipv4Addr::new(192, 0, 2, 1)),
        "Test machine",
        ms(interval_ms),
        ms(timeout_ms),
        ms(limit_ms),
        ms(timeout_ms.max(limit_ms)),
        "test@test.com",
    )
    .expect("valid test config")
}

pub fn event(kind: EventKind, class: ResponseClass) -> DeviceEvent {
    DeviceEvent {
        kind,
        device_id: DeviceId::next(),
        device: Arc::from("Test machine"),
        address: IpAddr::V4(Ipv4Addr::LOCALHOST),
        class,
        rtt: ms(1),
        timestamp: Utc::now(),
    }
}

/// Forwards every event into a channel the test can read.
pub struct RecordingListener {
    tx: mpsc::UnboundedSender<DeviceEvent>,
}

impl RecordingListener {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<DeviceEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(Self { tx }), rx)
    }

    fn record(&self, event: &DeviceEvent) {
        let _ = self.tx.send(event.clone());
    }
}

#[async_trait]
impl DeviceListener for RecordingListener {
    async fn on_reply(&self, event: &DeviceEvent) {
        self.record(event);
    }

    async fn on_alarm(&self, event: &DeviceEvent) {
        self.record(event);
    }

    async fn on_clear(&self, event: &DeviceEvent) {
        self.record(event);
    }
}

/// Let spawned listener tasks run, then collect everything they recorded.
pub async fn drain(rx: &mut mpsc::UnboundedReceiver<DeviceEvent>) -> Vec<DeviceEvent> {
    let mut events = Vec::new();
    let mut idle_rounds = 0;
    while idle_rounds < 5 {
        tokio::task::yield_now().await;
        let before = events.len();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        if events.len() == before {
            idle_rounds += 1;
        } else {
            idle_rounds = 0;
        }
    }
    events
}

/// What the scripted prober does for one call.
pub enum Step {
    /// Complete right away
    Now(ProbeResult),
    /// Complete when the test sends the result
    Wait(oneshot::Receiver<ProbeResult>),
    /// Never complete
    Hang,
}

/// Prober following a script; once the script runs out it answers with a
/// 1ms reply.
#[derive(Default)]
pub struct ScriptedProber {
    steps: Mutex<VecDeque<Step>>,
    calls: Mutex<Vec<Instant>>,
}

impl ScriptedProber {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn push(&self, step: Step) {
        lock(&self.steps).push_back(step);
    }

    /// Queue a step that completes once the returned sender fires.
    pub fn push_gate(&self) -> oneshot::Sender<ProbeResult> {
        let (tx, rx) = oneshot::channel();
        self.push(Step::Wait(rx));
        tx
    }

    pub fn calls(&self) -> Vec<Instant> {
        lock(&self.calls).clone()
    }

    pub fn call_count(&self) -> usize {
        lock(&self.calls).len()
    }
}

#[async_trait]
impl Prober for ScriptedProber {
    async fn send(&self, _address: IpAddr, _timeout: Duration) -> ProbeResult {
        lock(&self.calls).push(Instant::now());
        let step = lock(&self.steps).pop_front();
        match step {
            Some(Step::Now(result)) => result,
            Some(Step::Wait(rx)) => rx
                .await
                .unwrap_or_else(|_| Err(ProbeError::Task("gate dropped".into()))),
            Some(Step::Hang) => std::future::pending().await,
            None => Ok(ProbeOutcome::reply(ms(1))),
        }
    }
}

/// Notifier keeping everything it is asked to send.
#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<Notification>>,
}

impl RecordingNotifier {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn sent(&self) -> Vec<Notification> {
        lock(&self.sent).clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    fn name(&self) -> &'static str {
        "recording"
    }

    async fn notify(&self, notification: &Notification) -> Result<(), NotifyError> {
        lock(&self.sent).push(notification.clone());
        Ok(())
    }
}
