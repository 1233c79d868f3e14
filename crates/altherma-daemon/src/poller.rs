//! Periodic re-poll of discovered channels
//!
//! Each cycle opens one connection, reads every channel's latest value in
//! model order, and closes the connection again. Cycles run back to back on
//! a single task, so they never overlap; a tick that fires while a cycle is
//! still running is skipped. All access to the adapter goes through the
//! shared transport lock, which also serializes on-demand refreshes.

use altherma_core::{ChannelId, ChannelModel, DeviceStatus, HostCallback, SharedModel};
use altherma_m2m::{read_latest_value, Endpoint, Transport, TransportError};
use futures_util::FutureExt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{interval, sleep, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Cadence of the poll loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSchedule {
    pub interval: Duration,
    pub initial_delay: Duration,
}

/// Outcome of one completed cycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Channels queried
    pub polled: usize,
    /// Values handed to the host
    pub published: usize,
}

pub struct Poller<T> {
    transport: Arc<Mutex<T>>,
    endpoint: Endpoint,
    model: SharedModel,
    host: Arc<dyn HostCallback>,
    offline: AtomicBool,
}

impl<T> Poller<T>
where
    T: Transport,
{
    pub fn new(transport: Arc<Mutex<T>>, endpoint: Endpoint, model: SharedModel, host: Arc<dyn HostCallback>) -> Self {
        Self {
            transport,
            endpoint,
            model,
            host,
            offline: AtomicBool::new(false),
        }
    }

    /// Run cycles until `cancel` fires
    pub async fn run(&self, schedule: PollSchedule, cancel: CancellationToken) {
        info!(
            interval = ?schedule.interval,
            initial_delay = ?schedule.initial_delay,
            "Starting poll schedule"
        );

        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = sleep(schedule.initial_delay) => {}
        }

        let mut ticker = interval(schedule.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            match self.run_cycle().await {
                Ok(report) => debug!(polled = report.polled, published = report.published, "Poll cycle complete"),
                Err(e) => debug!(error = %e, "Poll cycle abandoned"),
            }
        }

        info!("Poll schedule stopped");
    }

    /// One connect, poll, disconnect cycle
    ///
    /// Fails only when the connection cannot be opened; nothing is polled
    /// then and the device is reported offline. The connection is released
    /// on every exit, including a panic while polling.
    pub async fn run_cycle(&self) -> Result<CycleReport, TransportError> {
        let model = self.model.snapshot();
        let mut transport = self.transport.lock().await;

        if let Err(e) = transport.connect(&self.endpoint).await {
            warn!(endpoint = %self.endpoint, error = %e, "Could not connect for polling");
            transport.disconnect().await;
            self.set_offline(true);
            return Err(e);
        }
        self.set_offline(false);

        let polled = AssertUnwindSafe(self.poll_channels(&mut *transport, &model))
            .catch_unwind()
            .await;
        transport.disconnect().await;

        match polled {
            Ok(report) => Ok(report),
            Err(payload) => {
                warn!("Poll cycle panicked, connection released");
                panic::resume_unwind(payload)
            }
        }
    }

    async fn poll_channels(&self, transport: &mut T, model: &ChannelModel) -> CycleReport {
        let mut report = CycleReport::default();

        for channel in model.channels() {
            if !self.host.is_linked(&channel.id) {
                debug!(channel = %channel.id, "Channel not linked, ending cycle");
                break;
            }

            report.polled += 1;
            match read_latest_value(transport, &channel.path).await {
                Ok(Some(value)) => {
                    self.host.value_updated(&channel.id, &value);
                    report.published += 1;
                }
                Ok(None) => debug!(channel = %channel.id, "No value"),
                Err(e) if e.is_connection_fault() => {
                    warn!(channel = %channel.id, error = %e, "Connection lost during poll cycle");
                    break;
                }
                Err(e) => debug!(channel = %channel.id, error = %e, "Skipping channel"),
            }
        }

        report
    }

    /// Re-read a single channel and publish its value
    ///
    /// Returns whether a value was published. Unknown channels are ignored.
    pub async fn refresh(&self, channel: &ChannelId) -> Result<bool, TransportError> {
        let model = self.model.snapshot();
        let Some(path) = model.path_of(channel) else {
            debug!(channel = %channel, "Refresh for unknown channel ignored");
            return Ok(false);
        };

        let mut transport = self.transport.lock().await;
        let value = match transport.connect(&self.endpoint).await {
            Ok(()) => read_latest_value(&mut *transport, path).await,
            Err(e) => Err(e),
        };
        transport.disconnect().await;

        match value? {
            Some(value) => {
                self.host.value_updated(channel, &value);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Report a status change only on transitions
    fn set_offline(&self, offline: bool) {
        if self.offline.swap(offline, Ordering::SeqCst) != offline {
            let status = if offline {
                DeviceStatus::Offline
            } else {
                DeviceStatus::Online
            };
            self.host.status_updated(status);
        }
    }
}
