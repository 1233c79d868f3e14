//! Altherma Daemon - Handler, poll scheduler, and configuration
//!
//! The `altherma` binary wires these together; embedders can drive a
//! [`DeviceHandler`] with their own [`HostCallback`](altherma_core::HostCallback).

pub mod config;
pub mod handler;
pub mod host;
pub mod poller;

pub use config::{load_config, Config};
pub use handler::{DeviceHandler, HandlerConfig, DISPOSE_GRACE};
pub use host::{LogHost, Reading};
pub use poller::{CycleReport, PollSchedule, Poller};
