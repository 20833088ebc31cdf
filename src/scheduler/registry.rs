//! Registry of devices driven by the scheduler.

use std::sync::{Arc, Mutex};

use crate::device::Device;
use crate::sync::lock;

/// The set of active devices behind a single lock.
///
/// The list itself is never handed out; readers get a snapshot, so the
/// scheduling loop can iterate while devices come and go.
#[derive(Debug, Default)]
pub struct Registry {
    devices: Mutex<Vec<Arc<Device>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `device` unless it is already present. Returns whether it was added.
    pub fn register(&self, device: &Arc<Device>) -> bool {
        let mut devices = lock(&self.devices);
        if devices.iter().any(|d| Arc::ptr_eq(d, device)) {
            return false;
        }
        devices.push(Arc::clone(device));
        true
    }

    /// Remove `device`. Returns whether it was present.
    pub fn deregister(&self, device: &Arc<Device>) -> bool {
        let mut devices = lock(&self.devices);
        let before = devices.len();
        devices.retain(|d| !Arc::ptr_eq(d, device));
        devices.len() != before
    }

    /// Devices in registration order, as of now.
    pub fn snapshot(&self) -> Vec<Arc<Device>> {
        lock(&self.devices).clone()
    }

    pub fn len(&self) -> usize {
        lock(&self.devices).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.devices).is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{device_config, ScriptedProber};

    fn device() -> Arc<Device> {
        Device::new(device_config(37, 300, 355), ScriptedProber::new())
    }

    #[tokio::test]
    async fn test_register_keeps_order_and_rejects_duplicates() {
        let registry = Registry::new();
        let (a, b) = (device(), device());

        assert!(registry.register(&a));
        assert!(registry.register(&b));
        assert!(!registry.register(&a));

        let ids: Vec<_> = registry.snapshot().iter().map(|d| d.id()).collect();
        assert_eq!(ids, vec![a.id(), b.id()]);
    }

    #[tokio::test]
    async fn test_snapshot_is_detached() {
        let registry = Registry::new();
        let a = device();
        registry.register(&a);

        let snapshot = registry.snapshot();
        assert!(registry.deregister(&a));
        assert_eq!(snapshot.len(), 1);
        assert!(registry.is_empty());
        assert!(!registry.deregister(&a));
    }

    #[tokio::test]
    async fn test_concurrent_mutation() {
        let registry = Arc::new(Registry::new());
        let devices: Vec<_> = (0..64).map(|_| device()).collect();

        let mut tasks = Vec::new();
        for chunk in devices.chunks(16) {
            let registry = registry.clone();
            let chunk = chunk.to_vec();
            tasks.push(tokio::task::spawn_blocking(move || {
                for d in &chunk {
                    registry.register(d);
                    let _ = registry.snapshot();
                }
                for d in chunk.iter().step_by(2) {
                    registry.deregister(d);
                }
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(registry.len(), 32);
    }
}
