//! pingmon - ICMP reachability and response time monitor
//!
//! Devices are pinged on their own intervals by a single [`scheduler::PingDriver`].
//! Each reply is classified against the device's response time limit, and
//! three consecutive bad (or good) replies flip its alarm state.

pub mod config;
pub mod device;
pub mod monitor;
pub mod notify;
pub mod probe;
pub mod scheduler;
pub mod view;
pub mod web;

pub(crate) mod sync;

#[cfg(test)]
pub(crate) mod testing;
