//! Device handler lifecycle
//!
//! `initialize` reports the device as unknown and starts one background
//! task. The task discovers the resource tree, commits the channel model,
//! publishes it to the host, and then becomes the poll loop. Discovery and
//! polling therefore never run at the same time, and both share the
//! transport lock with on-demand refreshes.

use altherma_core::{ChannelId, ChannelModel, DeviceStatus, HostCallback, SharedModel};
use altherma_discovery::{discover, DiscoveryConfig};
use altherma_m2m::{Endpoint, Transport, TransportError};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::poller::{PollSchedule, Poller};

/// How long `dispose` waits for an in-flight operation before aborting it
pub const DISPOSE_GRACE: Duration = Duration::from_secs(2);

#[derive(Debug, Clone)]
pub struct HandlerConfig {
    pub endpoint: Endpoint,
    pub schedule: PollSchedule,
    pub discovery: DiscoveryConfig,
}

pub struct DeviceHandler<T> {
    config: HandlerConfig,
    transport: Arc<Mutex<T>>,
    model: SharedModel,
    host: Arc<dyn HostCallback>,
    poller: Arc<Poller<T>>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl<T> DeviceHandler<T>
where
    T: Transport + 'static,
{
    pub fn new(config: HandlerConfig, transport: T, host: Arc<dyn HostCallback>) -> Self {
        let transport = Arc::new(Mutex::new(transport));
        let model = SharedModel::new();
        let poller = Arc::new(Poller::new(
            transport.clone(),
            config.endpoint.clone(),
            model.clone(),
            host.clone(),
        ));

        Self {
            config,
            transport,
            model,
            host,
            poller,
            cancel: CancellationToken::new(),
            task: None,
        }
    }

    /// Start discovery followed by periodic polling
    pub fn initialize(&mut self) {
        if self.task.is_some() {
            warn!(endpoint = %self.config.endpoint, "Handler already initialized");
            return;
        }

        info!(endpoint = %self.config.endpoint, "Initializing handler");
        self.host.status_updated(DeviceStatus::Unknown);
        self.cancel = CancellationToken::new();

        let config = self.config.clone();
        let transport = self.transport.clone();
        let model = self.model.clone();
        let host = self.host.clone();
        let poller = self.poller.clone();
        let cancel = self.cancel.clone();

        self.task = Some(tokio::spawn(async move {
            let discovered = {
                let mut transport = transport.lock().await;
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    result = discover(&mut *transport, &config.endpoint, &config.discovery) => result,
                }
            };

            match discovered {
                Ok(discovered) => {
                    model.commit(discovered);
                    host.channels_updated(model.snapshot().groups());
                    host.status_updated(DeviceStatus::Online);
                }
                Err(e) => {
                    warn!(endpoint = %config.endpoint, error = %e, "Discovery failed");
                    host.status_updated(DeviceStatus::Offline);
                    return;
                }
            }

            poller.run(config.schedule, cancel).await;
        }));
    }

    /// Re-read one channel now
    pub async fn refresh(&self, channel: &ChannelId) -> Result<bool, TransportError> {
        self.poller.refresh(channel).await
    }

    /// Current channel model; empty until discovery has committed
    pub fn model(&self) -> Arc<ChannelModel> {
        self.model.snapshot()
    }

    /// Stop discovery or polling and release the connection
    pub async fn dispose(&mut self) {
        self.cancel.cancel();

        if let Some(mut task) = self.task.take() {
            if timeout(DISPOSE_GRACE, &mut task).await.is_err() {
                warn!(grace = ?DISPOSE_GRACE, "Handler task did not stop in time, aborting");
                task.abort();
                let _ = task.await;
            }
        }

        self.transport.lock().await.disconnect().await;
        info!(endpoint = %self.config.endpoint, "Handler disposed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::LogHost;
    use altherma_m2m::mock::ScriptedTransport;
    use serde_json::json;
    use tokio::time::sleep;

    fn config() -> HandlerConfig {
        HandlerConfig {
            endpoint: Endpoint::new("127.0.0.1", 80),
            schedule: PollSchedule {
                interval: Duration::from_millis(20),
                initial_delay: Duration::from_millis(10),
            },
            discovery: DiscoveryConfig::default(),
        }
    }

    fn device() -> ScriptedTransport {
        ScriptedTransport::new()
            .found("0", json!({"m2m:cnt": {"rn": "0", "lbl": "function/SpaceHeating"}}))
            .content(
                "0/UnitProfile/la",
                json!("{\"Operation\":{\"Power\":[\"on\",\"standby\"]},\"Sensor\":[\"IndoorTemperature\"]}"),
            )
            .content("0/Operation/Power/la", json!("on"))
            .content("0/Sensor/IndoorTemperature/la", json!("21.5"))
            .code("1", 4004)
    }

    fn id(path: &str) -> ChannelId {
        ChannelId::from_path(&path.parse().unwrap())
    }

    #[tokio::test]
    async fn test_discovers_then_polls() {
        let transport = device();
        let host = Arc::new(LogHost::default());
        let mut handler = DeviceHandler::new(config(), transport.clone(), host.clone());
        assert!(handler.model().is_empty());

        handler.initialize();
        sleep(Duration::from_millis(100)).await;

        assert_eq!(host.status(), DeviceStatus::Online);
        assert_eq!(host.channel_count(), 2);
        assert_eq!(handler.model().groups()[0].id, "SpaceHeating");
        assert_eq!(host.reading(&id("0/Operation/Power")).unwrap().value, "on");
        assert_eq!(host.reading(&id("0/Sensor/IndoorTemperature")).unwrap().value, "21.5");

        handler.dispose().await;
        assert!(!transport.is_connected());
        // One discovery connection plus at least one poll cycle
        assert!(transport.connects() >= 2);

        let connects = transport.connects();
        sleep(Duration::from_millis(60)).await;
        assert_eq!(transport.connects(), connects);
    }

    #[tokio::test]
    async fn test_discovery_failure_reports_offline() {
        let transport = device().refuse_connections();
        let host = Arc::new(LogHost::default());
        let mut handler = DeviceHandler::new(config(), transport.clone(), host.clone());

        handler.initialize();
        sleep(Duration::from_millis(60)).await;

        assert_eq!(host.status(), DeviceStatus::Offline);
        assert!(handler.model().is_empty());
        // No poll cycles after a failed discovery
        assert_eq!(transport.connects(), 1);

        handler.dispose().await;
    }

    #[tokio::test]
    async fn test_refresh_after_discovery() {
        let transport = device();
        let host = Arc::new(LogHost::default());
        let mut handler = DeviceHandler::new(
            HandlerConfig {
                schedule: PollSchedule {
                    interval: Duration::from_secs(3600),
                    initial_delay: Duration::from_secs(3600),
                },
                ..config()
            },
            transport.clone(),
            host.clone(),
        );

        // Nothing discovered yet
        assert!(!handler.refresh(&id("0/Operation/Power")).await.unwrap());

        handler.initialize();
        sleep(Duration::from_millis(50)).await;
        assert!(host.reading(&id("0/Operation/Power")).is_none());

        assert!(handler.refresh(&id("0/Operation/Power")).await.unwrap());
        assert_eq!(host.reading(&id("0/Operation/Power")).unwrap().value, "on");

        handler.dispose().await;
        assert!(!transport.is_connected());
    }

    #[tokio::test]
    async fn test_dispose_before_initialize() {
        let transport = device();
        let mut handler = DeviceHandler::new(config(), transport.clone(), Arc::new(LogHost::default()));
        handler.dispose().await;
        assert_eq!(transport.connects(), 0);
        assert_eq!(transport.disconnects(), 1);
    }
}
