//! Wiring of devices, views, notifiers and the ping driver.

use std::sync::{Arc, Mutex};

use serde::Serialize;

use crate::config::DeviceConfig;
use crate::device::{Device, DeviceId};
use crate::notify::{NotificationListener, Notifier};
use crate::probe::Prober;
use crate::scheduler::PingDriver;
use crate::sync::lock;
use crate::view::{PlotView, StatusBoard, ViewId, ViewListener, ViewSnapshot};

struct Monitored {
    device: Arc<Device>,
    view: ViewId,
}

/// Live state of one device as shown by the status API.
#[derive(Debug, Clone, Serialize)]
pub struct DeviceSummary {
    pub id: DeviceId,
    pub alarm: bool,
    pub pending: bool,
    pub view: ViewSnapshot,
}

/// Owns the driver and everything attached to the monitored devices.
pub struct Monitor {
    driver: PingDriver,
    board: Arc<StatusBoard>,
    prober: Arc<dyn Prober>,
    notifiers: Vec<Arc<dyn Notifier>>,
    devices: Mutex<Vec<Monitored>>,
}

impl Monitor {
    pub fn new(driver: PingDriver, prober: Arc<dyn Prober>, notifiers: Vec<Arc<dyn Notifier>>) -> Self {
        Self {
            driver,
            board: Arc::new(StatusBoard::new()),
            prober,
            notifiers,
            devices: Mutex::new(Vec::new()),
        }
    }

    pub fn board(&self) -> &Arc<StatusBoard> {
        &self.board
    }

    /// Create a device for `config`, give it a view and notifications, and
    /// hand it to the driver. Must be called within a tokio runtime.
    pub fn add_device(&self, config: DeviceConfig) -> Arc<Device> {
        let view = self.board.register_view(
            config.name(),
            config.address(),
            config.max_scale(),
            config.limit(),
            config.interval(),
        );
        let recipient = config.email().clone();
        let device = Device::new(config, Arc::clone(&self.prober));

        let board: Arc<dyn PlotView> = self.board.clone();
        device.add_listener(Arc::new(ViewListener::new(board, view)));
        if !self.notifiers.is_empty() {
            device.add_listener(Arc::new(NotificationListener::new(
                recipient,
                self.notifiers.clone(),
            )));
        }

        self.driver.register_device(&device);
        lock(&self.devices).push(Monitored {
            device: Arc::clone(&device),
            view,
        });
        device
    }

    /// Stop monitoring a device. Returns whether it was known.
    pub fn remove_device(&self, id: DeviceId) -> bool {
        let removed = {
            let mut devices = lock(&self.devices);
            devices
                .iter()
                .position(|m| m.device.id() == id)
                .map(|i| devices.remove(i))
        };
        match removed {
            Some(m) => {
                self.driver.deregister_device(&m.device);
                self.board.remove_view(m.view);
                true
            }
            None => false,
        }
    }

    pub fn devices(&self) -> Vec<DeviceSummary> {
        lock(&self.devices)
            .iter()
            .filter_map(|m| self.summary(m))
            .collect()
    }

    pub fn device(&self, id: DeviceId) -> Option<DeviceSummary> {
        lock(&self.devices)
            .iter()
            .find(|m| m.device.id() == id)
            .and_then(|m| self.summary(m))
    }

    fn summary(&self, monitored: &Monitored) -> Option<DeviceSummary> {
        let status = monitored.device.status();
        Some(DeviceSummary {
            id: monitored.device.id(),
            alarm: status.alarm,
            pending: status.pending,
            view: self.board.get(monitored.view)?,
        })
    }

    pub fn start(&self) {
        self.driver.start();
    }

    pub async fn stop(&self) {
        self.driver.stop().await;
    }
}
