//! Observer side of the monitor: views that display device replies.
//!
//! [`PlotView`] is what a front end implements. The orchestration layer
//! registers one view per device; [`ViewListener`] then forwards every reply
//! of that device to the view. [`StatusBoard`] is the built-in view, keeping
//! the latest sample per device in memory for the status API.

use std::net::IpAddr;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::device::{serialize_millis, DeviceEvent, DeviceListener, ResponseClass};
use crate::sync::{read, write};

/// Identifier handed out by [`PlotView::register_view`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct ViewId(pub usize);

/// Something that displays reply data for devices.
pub trait PlotView: Send + Sync + 'static {
    fn register_view(
        &self,
        name: &str,
        address: IpAddr,
        display_scale: Duration,
        limit: Duration,
        interval: Duration,
    ) -> ViewId;

    fn update_view(&self, id: ViewId, class: ResponseClass, rtt: Duration);

    /// Forget a view whose device is no longer monitored.
    fn remove_view(&self, _id: ViewId) {}
}

/// Forwards a device's replies to one view.
pub struct ViewListener {
    view: Arc<dyn PlotView>,
    id: ViewId,
}

impl ViewListener {
    pub fn new(view: Arc<dyn PlotView>, id: ViewId) -> Self {
        Self { view, id }
    }
}

#[async_trait]
impl DeviceListener for ViewListener {
    async fn on_reply(&self, event: &DeviceEvent) {
        self.view.update_view(self.id, event.class, event.rtt);
    }
}

/// Replies seen per class.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ClassCounts {
    pub normal: u64,
    pub limit_exceeded: u64,
    pub timeout: u64,
    pub not_reachable: u64,
}

impl ClassCounts {
    fn add(&mut self, class: ResponseClass) {
        let slot = match class {
            ResponseClass::Normal => &mut self.normal,
            ResponseClass::LimitExceeded => &mut self.limit_exceeded,
            ResponseClass::Timeout => &mut self.timeout,
            ResponseClass::NotReachable => &mut self.not_reachable,
        };
        *slot = slot.saturating_add(1);
    }

    pub fn total(&self) -> u64 {
        self.normal + self.limit_exceeded + self.timeout + self.not_reachable
    }
}

/// State of one view on the status board.
#[derive(Debug, Clone, Serialize)]
pub struct ViewSnapshot {
    pub id: ViewId,
    pub name: String,
    pub address: IpAddr,
    #[serde(rename = "display_scale_ms", serialize_with = "serialize_millis")]
    pub display_scale: Duration,
    #[serde(rename = "limit_ms", serialize_with = "serialize_millis")]
    pub limit: Duration,
    #[serde(rename = "interval_ms", serialize_with = "serialize_millis")]
    pub interval: Duration,
    pub last_class: Option<ResponseClass>,
    #[serde(rename = "last_rtt_ms", serialize_with = "serialize_opt_millis")]
    pub last_rtt: Option<Duration>,
    pub last_update: Option<DateTime<Utc>>,
    pub counts: ClassCounts,
}

fn serialize_opt_millis<S: serde::Serializer>(d: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
    match d {
        Some(d) => serialize_millis(d, s),
        None => s.serialize_none(),
    }
}

/// In-memory view keeping the latest sample of every device.
#[derive(Debug, Default)]
pub struct StatusBoard {
    views: RwLock<Views>,
}

#[derive(Debug, Default)]
struct Views {
    next_id: usize,
    live: Vec<ViewSnapshot>,
}

impl StatusBoard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> Vec<ViewSnapshot> {
        read(&self.views).live.clone()
    }

    pub fn get(&self, id: ViewId) -> Option<ViewSnapshot> {
        read(&self.views).live.iter().find(|v| v.id == id).cloned()
    }

    pub fn len(&self) -> usize {
        read(&self.views).live.len()
    }

    pub fn is_empty(&self) -> bool {
        read(&self.views).live.is_empty()
    }
}

impl PlotView for StatusBoard {
    fn register_view(
        &self,
        name: &str,
        address: IpAddr,
        display_scale: Duration,
        limit: Duration,
        interval: Duration,
    ) -> ViewId {
        let mut views = write(&self.views);
        let id = ViewId(views.next_id);
        views.next_id += 1;
        views.live.push(ViewSnapshot {
            id,
            name: name.to_string(),
            address,
            display_scale,
            limit,
            interval,
            last_class: None,
            last_rtt: None,
            last_update: None,
            counts: ClassCounts::default(),
        });
        id
    }

    fn update_view(&self, id: ViewId, class: ResponseClass, rtt: Duration) {
        let mut views = write(&self.views);
        match views.live.iter_mut().find(|v| v.id == id) {
            Some(view) => {
                view.last_class = Some(class);
                view.last_rtt = Some(rtt);
                view.last_update = Some(Utc::now());
                view.counts.add(class);
            }
            None => tracing::debug!(view = id.0, "Update for removed view"),
        }
    }

    fn remove_view(&self, id: ViewId) {
        write(&self.views).live.retain(|v| v.id != id);
    }
}
