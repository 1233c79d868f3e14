//! Altherma Discovery - Finding out what an adapter exposes
//!
//! This crate provides two discovery steps:
//! - Resource tree walking to build the channel model of one adapter
//! - Device identification of an adapter found by a zero-configuration scan

pub mod descriptor;
pub mod walker;

pub use descriptor::{
    create_result, fetch_descriptor, parse_descriptor, Advertisement, DescriptorError, DiscoveryResult,
    SERVICE_TYPE,
};
pub use walker::{discover, scan_groups, DiscoveryConfig, DiscoveryError, DEFAULT_MAX_GROUPS};
