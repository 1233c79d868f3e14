//! Boundary towards the hosting framework
//!
//! The core never talks to a UI or persistence layer directly. Whatever
//! embeds it implements [`HostCallback`] to receive status changes, the
//! discovered channel groups, and polled values, and to say which channels
//! anyone is actually listening to.

use crate::channel::ChannelGroup;
use crate::device::DeviceStatus;
use crate::resource::ChannelId;

pub trait HostCallback: Send + Sync {
    /// Device status changed
    fn status_updated(&self, status: DeviceStatus);

    /// Discovery committed a new set of groups and channels
    fn channels_updated(&self, groups: &[ChannelGroup]);

    /// A channel produced a new value
    fn value_updated(&self, channel: &ChannelId, value: &str);

    /// Whether a channel has an external consumer
    fn is_linked(&self, _channel: &ChannelId) -> bool {
        true
    }
}
