//! Scheduler module driving the periodic probes.
//!
//! One [`PingDriver`] task wakes up every tick, walks a snapshot of the
//! registered devices and asks each device that is due to probe. Probes are
//! fire-and-forget; the loop never waits for a reply.

mod registry;

pub use registry::*;

use crate::device::Device;
use crate::sync::lock;

use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Handle of the running loop.
struct Running {
    stop_tx: broadcast::Sender<()>,
    handle: JoinHandle<()>,
}

/// Drives all registered devices at their configured intervals.
pub struct PingDriver {
    registry: Arc<Registry>,
    tick: Duration,
    dispatch_gap: Duration,
    running: Mutex<Option<Running>>,
}

impl PingDriver {
    /// Create a stopped driver.
    ///
    /// `tick` is how long the loop sleeps between passes, `dispatch_gap` how
    /// long it waits between two devices within a pass.
    pub fn new(tick: Duration, dispatch_gap: Duration) -> Self {
        Self {
            registry: Arc::new(Registry::new()),
            tick,
            dispatch_gap,
            running: Mutex::new(None),
        }
    }

    /// Add a device. Registering a device twice is a no-op.
    pub fn register_device(&self, device: &Arc<Device>) {
        if self.registry.register(device) {
            device.set_retired(false);
            tracing::info!(device = device.name(), address = %device.address(), "Device registered");
        }
    }

    /// Remove a device, returning whether it was registered.
    ///
    /// Results of probes still in flight for the device are ignored.
    pub fn deregister_device(&self, device: &Arc<Device>) -> bool {
        if self.registry.deregister(device) {
            device.set_retired(true);
            tracing::info!(device = device.name(), address = %device.address(), "Device deregistered");
            true
        } else {
            false
        }
    }

    pub fn devices(&self) -> Vec<Arc<Device>> {
        self.registry.snapshot()
    }

    /// Start the scheduling loop. Does nothing if it is already running.
    pub fn start(&self) {
        let mut running = lock(&self.running);
        if running.is_some() {
            return;
        }

        tracing::info!(
            "Starting ping driver with {} devices (tick {:?})",
            self.registry.len(),
            self.tick
        );

        let (stop_tx, stop_rx) = broadcast::channel(1);
        let handle = tokio::spawn(run_driver_loop(
            self.registry.clone(),
            self.tick,
            self.dispatch_gap,
            stop_rx,
        ));
        *running = Some(Running { stop_tx, handle });
    }

    pub fn is_running(&self) -> bool {
        lock(&self.running).is_some()
    }

    /// Stop the loop and wait for it to finish its current pass.
    pub async fn stop(&self) {
        let running = lock(&self.running).take();
        if let Some(Running { stop_tx, handle }) = running {
            let _ = stop_tx.send(());
            if let Err(e) = handle.await {
                tracing::error!("Ping driver task failed: {}", e);
            }
            tracing::info!("Ping driver stopped");
        }
    }
}

/// Run the scheduling loop until a stop signal arrives.
async fn run_driver_loop(
    registry: Arc<Registry>,
    tick: Duration,
    dispatch_gap: Duration,
    mut stop_rx: broadcast::Receiver<()>,
) {
    loop {
        tokio::select! {
            _ = stop_rx.recv() => break,
            _ = tokio::time::sleep(tick) => {}
        }

        for device in registry.snapshot() {
            if !dispatch_gap.is_zero() {
                // separate the system calls
                tokio::time::sleep(dispatch_gap).await;
            }
            if device.is_due(Instant::now()) {
                device.probe();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{device_config, ms, ScriptedProber};

    const TICK: Duration = Duration::from_millis(10);

    #[tokio::test(start_paused = true)]
    async fn test_interval_respected() {
        let prober = ScriptedProber::new();
        let driver = PingDriver::new(TICK, TICK);
        let fast = Device::new(device_config(37, 100, 355), prober.clone());
        driver.register_device(&fast);

        driver.start();
        tokio::time::sleep(Duration::from_secs(10)).await;
        driver.stop().await;

        let calls = prober.calls();
        assert!(calls.len() >= 20, "only {} probes", calls.len());
        for pair in calls.windows(2) {
            let gap = pair[1] - pair[0];
            assert!(gap >= ms(355) - TICK, "probes {:?} apart", gap);
            assert!(gap <= ms(355) + TICK * 3, "probes {:?} apart", gap);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_devices_keep_their_own_intervals() {
        let fast_prober = ScriptedProber::new();
        let slow_prober = ScriptedProber::new();
        let driver = PingDriver::new(TICK, TICK);
        driver.register_device(&Device::new(device_config(37, 100, 200), fast_prober.clone()));
        driver.register_device(&Device::new(device_config(37, 100, 1000), slow_prober.clone()));

        driver.start();
        tokio::time::sleep(Duration::from_secs(5)).await;
        driver.stop().await;

        let fast = fast_prober.call_count();
        let slow = slow_prober.call_count();
        assert!((20..=26).contains(&fast), "fast device probed {} times", fast);
        assert!((4..=6).contains(&slow), "slow device probed {} times", slow);
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_registration_is_ignored() {
        let driver = PingDriver::new(TICK, TICK);
        let device = Device::new(device_config(37, 300, 355), ScriptedProber::new());

        driver.register_device(&device);
        driver.register_device(&device);
        assert_eq!(driver.devices().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deregistration_is_idempotent() {
        let driver = PingDriver::new(TICK, TICK);
        let device = Device::new(device_config(37, 300, 355), ScriptedProber::new());
        let stranger = Device::new(device_config(37, 300, 355), ScriptedProber::new());
        driver.register_device(&device);

        assert!(!driver.deregister_device(&stranger));
        assert_eq!(driver.devices().len(), 1);

        assert!(driver.deregister_device(&device));
        assert!(!driver.deregister_device(&device));
        assert!(driver.devices().is_empty());
        assert!(device.is_retired());

        // Registering again brings it back to life
        driver.register_device(&device);
        assert!(!device.is_retired());
    }

    #[tokio::test(start_paused = true)]
    async fn test_deregistered_device_is_no_longer_probed() {
        let prober = ScriptedProber::new();
        let driver = PingDriver::new(TICK, TICK);
        let device = Device::new(device_config(37, 100, 200), prober.clone());
        driver.register_device(&device);

        driver.start();
        // off the 10ms grid so no dispatch races the deregistration
        tokio::time::sleep(ms(1005)).await;
        assert!(driver.deregister_device(&device));
        let probes = prober.call_count();
        tokio::time::sleep(ms(1000)).await;
        driver.stop().await;

        assert!(probes > 0);
        assert_eq!(prober.call_count(), probes);
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_result_after_deregistration_is_ignored() {
        let prober = ScriptedProber::new();
        let gate = prober.push_gate();
        let driver = PingDriver::new(TICK, TICK);
        let device = Device::new(device_config(37, 300, 355), prober.clone());
        driver.register_device(&device);

        driver.start();
        tokio::time::sleep(ms(50)).await;
        assert!(device.is_pending());

        driver.deregister_device(&device);
        let _ = gate.send(Ok(crate::probe::ProbeOutcome::reply(ms(500))));
        tokio::time::sleep(ms(50)).await;
        driver.stop().await;

        // The pending flag was never cleared by the late completion
        assert!(device.is_pending());
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_stop_lifecycle() {
        let driver = PingDriver::new(TICK, Duration::ZERO);
        assert!(!driver.is_running());
        driver.start();
        driver.start();
        assert!(driver.is_running());
        driver.stop().await;
        assert!(!driver.is_running());
        driver.stop().await;
    }
}
