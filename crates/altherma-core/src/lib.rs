//! Altherma Core - Core types for talking to a heat-pump adapter
//!
//! This crate provides the foundational types shared by the transport,
//! discovery, and daemon crates:
//! - Resource paths and reversible channel identifiers
//! - Nested document resolution for response envelopes
//! - The channel model discovered from the device's resource tree
//! - Device identity, status, and the host callback boundary

pub mod channel;
pub mod device;
pub mod document;
pub mod host;
pub mod resource;

pub use channel::{Channel, ChannelGroup, ChannelModel, ModelError, SharedModel};
pub use device::{DeviceDescriptor, DeviceStatus};
pub use document::{Document, DocumentError, Node};
pub use host::HostCallback;
pub use resource::{ChannelId, ChannelIdError, PathError, ResourcePath, LATEST_SEGMENT};
