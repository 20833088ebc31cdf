//! Monitored devices.
//!
//! A [`Device`] owns one target's configuration, its probe lifecycle and the
//! debounce state deciding when to raise or clear an alarm.
//!
//! ```text
//!            probe()                      on_probe_complete()
//!   Idle ───────────────► Pending ─────────────────────────────► Idle
//!    ▲                      │                                   (Reply, then
//!    └──── 2 x timeout ─────┘                                    Alarm/Clear)
//! ```
//!
//! Three streak counters with a threshold of [`RETRIES`] track consecutive
//! normal, too slow and unreachable replies. A streak reaching its threshold
//! resets the other two; a streak that has not reached it yet only resets the
//! others that have not reached theirs either. A counter that already reached
//! its threshold therefore stays reached until a different streak completes.

mod counter;
mod event;
mod response;

pub use counter::*;
pub use event::*;
pub use response::*;

use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use chrono::Utc;
use serde::Serialize;
use tokio::time::Instant;

use crate::config::DeviceConfig;
use crate::probe::{ProbeError, ProbeOutcome, Prober};
use crate::sync::lock;

/// Consecutive matching replies needed to change the alarm state.
pub const RETRIES: i32 = 3;

static NEXT_DEVICE_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique device identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct DeviceId(u64);

impl DeviceId {
    pub(crate) fn next() -> Self {
        Self(NEXT_DEVICE_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl std::str::FromStr for DeviceId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse().map(Self)
    }
}

/// Mutable part of a device, guarded by the device's lock.
#[derive(Debug)]
struct DeviceState {
    last_probe_at: Option<Instant>,
    pending: bool,
    /// Bumped on every dispatch so late completions can be recognised
    generation: u64,
    alarm: bool,
    ok_streak: Counter,
    limit_exceeded_streak: Counter,
    unreachable_streak: Counter,
}

/// Alarm state change caused by one reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Transition {
    Alarm,
    Clear,
}

impl DeviceState {
    fn new() -> Self {
        let streak = || Counter::new(RETRIES).unwrap_or_default();
        Self {
            last_probe_at: None,
            pending: false,
            generation: 0,
            alarm: false,
            ok_streak: streak(),
            limit_exceeded_streak: streak(),
            unreachable_streak: streak(),
        }
    }

    fn is_pending(&self, now: Instant, config: &DeviceConfig) -> bool {
        match self.last_probe_at {
            Some(at) if now.saturating_duration_since(at) > config.timeout() * 2 => false,
            _ => self.pending,
        }
    }

    /// Feed one classified reply into the streak counters.
    fn record(&mut self, class: ResponseClass) -> Option<Transition> {
        let reached = match class {
            ResponseClass::Normal => advance(
                &mut self.ok_streak,
                &mut self.limit_exceeded_streak,
                &mut self.unreachable_streak,
            ),
            ResponseClass::LimitExceeded => advance(
                &mut self.limit_exceeded_streak,
                &mut self.unreachable_streak,
                &mut self.ok_streak,
            ),
            ResponseClass::Timeout | ResponseClass::NotReachable => advance(
                &mut self.unreachable_streak,
                &mut self.ok_streak,
                &mut self.limit_exceeded_streak,
            ),
        };

        if !reached {
            return None;
        }
        match (class.is_degraded(), self.alarm) {
            (true, false) => {
                self.alarm = true;
                Some(Transition::Alarm)
            }
            (false, true) => {
                self.alarm = false;
                Some(Transition::Clear)
            }
            _ => None,
        }
    }
}

/// Increment `hit`. When it reaches its limit, reset both others; otherwise
/// reset only those others that have not reached their own limit.
fn advance(hit: &mut Counter, other: &mut Counter, another: &mut Counter) -> bool {
    let reached = hit.increment();
    for counter in [other, another] {
        if reached || !counter.is_limit_reached() {
            counter.reset();
        }
    }
    reached
}

/// Point-in-time view of a device's runtime state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceStatus {
    pub pending: bool,
    pub alarm: bool,
    pub last_probe_at: Option<Instant>,
}

/// A remote host that is pinged periodically.
pub struct Device {
    id: DeviceId,
    config: DeviceConfig,
    name: Arc<str>,
    prober: Arc<dyn Prober>,
    state: Mutex<DeviceState>,
    listeners: Mutex<ListenerSet>,
    retired: AtomicBool,
}

impl std::fmt::Debug for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Device")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("address", &self.config.address())
            .field("status", &self.status())
            .finish()
    }
}

impl Device {
    pub fn new(config: DeviceConfig, prober: Arc<dyn Prober>) -> Arc<Self> {
        Arc::new(Self {
            id: DeviceId::next(),
            name: Arc::from(config.name()),
            config,
            prober,
            state: Mutex::new(DeviceState::new()),
            listeners: Mutex::new(ListenerSet::default()),
            retired: AtomicBool::new(false),
        })
    }

    pub fn id(&self) -> DeviceId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn address(&self) -> IpAddr {
        self.config.address()
    }

    /// Copy of the device configuration.
    pub fn config(&self) -> DeviceConfig {
        self.config.clone()
    }

    /// Whether a probe is in flight. A probe older than twice the timeout no
    /// longer counts, so a lost completion cannot block the device forever.
    pub fn is_pending(&self) -> bool {
        lock(&self.state).is_pending(Instant::now(), &self.config)
    }

    pub fn is_alarm(&self) -> bool {
        lock(&self.state).alarm
    }

    /// When the last probe was sent, `None` before the first one.
    pub fn last_probe_at(&self) -> Option<Instant> {
        lock(&self.state).last_probe_at
    }

    pub fn status(&self) -> DeviceStatus {
        let state = lock(&self.state);
        DeviceStatus {
            pending: state.is_pending(Instant::now(), &self.config),
            alarm: state.alarm,
            last_probe_at: state.last_probe_at,
        }
    }

    /// Whether a full interval has passed since the last probe.
    pub fn is_due(&self, now: Instant) -> bool {
        match lock(&self.state).last_probe_at {
            Some(at) => at + self.config.interval() < now,
            None => true,
        }
    }

    /// Register a listener. Must be called within a tokio runtime.
    pub fn add_listener(&self, listener: Arc<dyn DeviceListener>) -> ListenerId {
        lock(&self.listeners).add(listener)
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        lock(&self.listeners).remove(id)
    }

    pub fn listener_count(&self) -> usize {
        lock(&self.listeners).len()
    }

    pub(crate) fn set_retired(&self, retired: bool) {
        self.retired.store(retired, Ordering::SeqCst);
    }

    pub fn is_retired(&self) -> bool {
        self.retired.load(Ordering::SeqCst)
    }

    /// Send a probe unless one is already pending.
    ///
    /// Returns whether a probe was dispatched. The probe runs on its own task;
    /// its result comes back through [`Device::on_probe_complete`].
    pub fn probe(self: &Arc<Self>) -> bool {
        if self.is_retired() {
            return false;
        }

        let generation = {
            let mut state = lock(&self.state);
            let now = Instant::now();
            if state.is_pending(now, &self.config) {
                return false;
            }
            if state.pending {
                tracing::debug!(device = %self.name, "Previous probe went stale, probing again");
            }
            state.pending = true;
            state.last_probe_at = Some(now);
            state.generation += 1;
            state.generation
        };

        let device: Weak<Self> = Arc::downgrade(self);
        let prober = Arc::clone(&self.prober);
        let address = self.config.address();
        let timeout = self.config.timeout();

        tokio::spawn(async move {
            let result = prober.send(address, timeout).await;
            if let Some(device) = device.upgrade() {
                device.complete(generation, result);
            }
        });
        true
    }

    /// Completion of the probe dispatched as `generation`.
    fn complete(&self, generation: u64, result: Result<ProbeOutcome, ProbeError>) {
        if self.is_retired() {
            tracing::debug!(device = %self.name, "Ignoring probe result for deregistered device");
            return;
        }
        let mut state = lock(&self.state);
        if state.generation != generation {
            tracing::debug!(device = %self.name, "Ignoring result of superseded probe");
            return;
        }
        self.apply(&mut state, result);
    }

    /// Classify a probe result, fire a Reply and update the alarm state.
    ///
    /// Boundary errors count as an unreachable device with zero round-trip
    /// time. Results arriving after the device was deregistered are ignored.
    /// A probe still in flight is completed by this result; its own
    /// completion is then ignored.
    pub fn on_probe_complete(&self, result: Result<ProbeOutcome, ProbeError>) {
        if self.is_retired() {
            tracing::debug!(device = %self.name, "Ignoring probe result for deregistered device");
            return;
        }
        let mut state = lock(&self.state);
        if state.pending {
            state.generation += 1;
        }
        self.apply(&mut state, result);
    }

    fn apply(&self, state: &mut DeviceState, result: Result<ProbeOutcome, ProbeError>) {
        let outcome = result.unwrap_or_else(|e| {
            tracing::warn!(device = %self.name, address = %self.address(), "Probe failed: {}", e);
            ProbeOutcome::unreachable()
        });
        state.pending = false;

        let class = ResponseClass::classify(&outcome, self.config.limit());
        tracing::debug!(
            device = %self.name,
            address = %self.address(),
            class = %class,
            rtt_ms = outcome.rtt.as_secs_f64() * 1000.0,
            "Reply"
        );

        let mut listeners = lock(&self.listeners);
        listeners.emit(&self.event(EventKind::Reply, class, &outcome));

        match state.record(class) {
            Some(Transition::Alarm) => {
                tracing::warn!(device = %self.name, address = %self.address(), class = %class, "Alarm state entered");
                listeners.emit(&self.event(EventKind::Alarm, class, &outcome));
            }
            Some(Transition::Clear) => {
                tracing::warn!(device = %self.name, address = %self.address(), "Alarm state cleared");
                listeners.emit(&self.event(EventKind::Clear, class, &outcome));
            }
            None => {}
        }
    }

    fn event(&self, kind: EventKind, class: ResponseClass, outcome: &ProbeOutcome) -> DeviceEvent {
        DeviceEvent {
            kind,
            device_id: self.id,
            device: Arc::clone(&self.name),
            address: self.address(),
            class,
            rtt: outcome.rtt,
            timestamp: Utc::now(),
        }
    }
}
