//! Standalone host: logs what the handler reports and keeps the latest values

use altherma_core::{ChannelGroup, ChannelId, DeviceStatus, HostCallback};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashSet};
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info};

/// Latest value of one channel
#[derive(Debug, Clone, PartialEq)]
pub struct Reading {
    pub value: String,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct HostState {
    status: DeviceStatus,
    channels: usize,
    readings: BTreeMap<ChannelId, Reading>,
}

/// [`HostCallback`] for running without a hosting framework
#[derive(Debug, Default)]
pub struct LogHost {
    linked: Option<HashSet<ChannelId>>,
    state: Mutex<HostState>,
}

impl LogHost {
    /// `linked` limits polling to the given channels; `None` links all
    pub fn new(linked: Option<HashSet<ChannelId>>) -> Self {
        Self {
            linked,
            state: Mutex::default(),
        }
    }

    fn state(&self) -> MutexGuard<'_, HostState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn status(&self) -> DeviceStatus {
        self.state().status
    }

    /// Number of channels in the last published model
    pub fn channel_count(&self) -> usize {
        self.state().channels
    }

    pub fn reading(&self, channel: &ChannelId) -> Option<Reading> {
        self.state().readings.get(channel).cloned()
    }

    pub fn readings(&self) -> BTreeMap<ChannelId, Reading> {
        self.state().readings.clone()
    }
}

impl HostCallback for LogHost {
    fn status_updated(&self, status: DeviceStatus) {
        let mut state = self.state();
        if state.status != status {
            info!(from = %state.status, to = %status, "Device status changed");
        }
        state.status = status;
    }

    fn channels_updated(&self, groups: &[ChannelGroup]) {
        let mut state = self.state();
        state.channels = groups.iter().map(|g| g.channels.len()).sum();
        for group in groups {
            info!(group = %group.id, label = %group.label, channels = group.channels.len(), "Group available");
            for channel in &group.channels {
                debug!(channel = %channel.id, label = %channel.label, "Channel available");
            }
        }
    }

    fn value_updated(&self, channel: &ChannelId, value: &str) {
        info!(channel = %channel, value = %value, "Value updated");
        self.state().readings.insert(
            channel.clone(),
            Reading {
                value: value.to_string(),
                updated_at: Utc::now(),
            },
        );
    }

    fn is_linked(&self, channel: &ChannelId) -> bool {
        self.linked.as_ref().map_or(true, |linked| linked.contains(channel))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use altherma_core::Channel;

    fn id(raw: &str) -> ChannelId {
        raw.parse().unwrap()
    }

    #[test]
    fn test_everything_linked_by_default() {
        let host = LogHost::default();
        assert!(host.is_linked(&id("0_Sensor_OutdoorTemperature")));
    }

    #[test]
    fn test_linked_filter() {
        let host = LogHost::new(Some(HashSet::from([id("1_Operation_Power")])));
        assert!(host.is_linked(&id("1_Operation_Power")));
        assert!(!host.is_linked(&id("1_Sensor_IndoorTemperature")));
    }

    #[test]
    fn test_records_status_channels_and_values() {
        let host = LogHost::default();
        assert_eq!(host.status(), DeviceStatus::Unknown);
        host.status_updated(DeviceStatus::Online);
        assert_eq!(host.status(), DeviceStatus::Online);

        let mut group = ChannelGroup::new(1, "SpaceHeating");
        group.channels.push(Channel::new("1/Operation/Power".parse().unwrap()));
        host.channels_updated(&[group]);
        assert_eq!(host.channel_count(), 1);

        let before = Utc::now();
        host.value_updated(&id("1_Operation_Power"), "on");
        host.value_updated(&id("1_Operation_Power"), "standby");
        let reading = host.reading(&id("1_Operation_Power")).unwrap();
        assert_eq!(reading.value, "standby");
        assert!(reading.updated_at >= before);
        assert_eq!(host.readings().len(), 1);
    }
}
