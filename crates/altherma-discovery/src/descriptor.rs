//! Device identification for advertised adapters
//!
//! A zero-configuration scan (outside this crate) hands us an
//! [`Advertisement`]. We connect once, read the device-info resource, and turn
//! it into a [`DiscoveryResult`] the host can register. Identity is
//! all-or-nothing: any missing field means "not identified".

use altherma_core::document::{self, require_text, Document, DocumentError};
use altherma_core::DeviceDescriptor;
use altherma_m2m::envelope::keys;
use altherma_m2m::{Endpoint, Transport, TransportError, DEFAULT_PORT};
use serde::Serialize;
use std::collections::BTreeMap;
use std::net::IpAddr;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Service type the adapter advertises
pub const SERVICE_TYPE: &str = "_daikin._tcp.local.";

/// Key path from the raw frame to the device-info object
const DEVICE_INFO_PATH: [&str; 3] = [keys::RESPONSE, keys::PAYLOAD, keys::DEVICE_INFO];

#[derive(Error, Debug)]
pub enum DescriptorError {
    #[error("Advertisement carries no address")]
    NoAddress,
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("Invalid device info: {0}")]
    Document(#[from] DocumentError),
}

/// A service record from the zero-configuration scan
#[derive(Debug, Clone)]
pub struct Advertisement {
    pub addresses: Vec<IpAddr>,
    /// Advertised port; 0 when not given
    pub port: u16,
    pub service_name: String,
}

impl Advertisement {
    /// First advertised address, advertised port or the default one
    pub fn endpoint(&self) -> Option<Endpoint> {
        let address = self.addresses.first()?;
        let port = if self.port > 0 { self.port } else { DEFAULT_PORT };
        Some(Endpoint::new(address.to_string(), port))
    }
}

/// An identified adapter, ready for registration with the host
#[derive(Debug, Clone, Serialize)]
pub struct DiscoveryResult {
    /// Stable identifier (the serial number)
    pub thing_id: String,
    pub label: String,
    pub host: String,
    pub port: u16,
    pub descriptor: DeviceDescriptor,
    pub properties: BTreeMap<String, String>,
}

impl DiscoveryResult {
    pub fn new(endpoint: &Endpoint, descriptor: DeviceDescriptor) -> Self {
        let properties = BTreeMap::from([
            ("host".to_string(), endpoint.host.clone()),
            ("port".to_string(), endpoint.port.to_string()),
            ("serialNumber".to_string(), descriptor.serial.clone()),
            ("modelId".to_string(), descriptor.model.clone()),
            ("type".to_string(), descriptor.device_type.clone()),
            ("firmwareVersion".to_string(), descriptor.firmware_version.clone()),
            ("hardwareVersion".to_string(), descriptor.hardware_version.clone()),
            ("softwareVersion".to_string(), descriptor.software_version.clone()),
        ]);
        Self {
            thing_id: descriptor.serial.clone(),
            label: format!("Daikin {} {}", descriptor.model, descriptor.serial),
            host: endpoint.host.clone(),
            port: endpoint.port,
            descriptor,
            properties,
        }
    }
}

/// Parse a raw device-info frame into a descriptor
pub fn parse_descriptor(raw: &str) -> Result<DeviceDescriptor, DescriptorError> {
    let frame: Document = serde_json::from_str(raw).map_err(DocumentError::from)?;
    let info = document::require(&frame, &DEVICE_INFO_PATH)?;

    let field = |key: &str| {
        require_text(info, &[key]).inspect_err(|e| {
            warn!(key = key, error = %e, "Device info is missing a required field");
        })
    };

    Ok(DeviceDescriptor {
        serial: field(keys::DEVICE_LABEL)?,
        model: field(keys::MODEL)?,
        device_type: field(keys::DEVICE_TYPE)?,
        firmware_version: field(keys::FIRMWARE_VERSION)?,
        software_version: field(keys::SOFTWARE_VERSION)?,
        hardware_version: field(keys::HARDWARE_VERSION)?,
    })
}

/// Connect, read the device-info resource, and disconnect in all cases
pub async fn fetch_descriptor<T>(transport: &mut T, endpoint: &Endpoint) -> Result<DeviceDescriptor, DescriptorError>
where
    T: Transport + ?Sized,
{
    let reply = match transport.connect(endpoint).await {
        Ok(()) => transport.send_discovery_probe().await,
        Err(e) => Err(e),
    };
    transport.disconnect().await;
    parse_descriptor(&reply?)
}

/// Identify an advertised adapter; `None` when it cannot be identified
pub async fn create_result<T>(transport: &mut T, advertisement: &Advertisement) -> Option<DiscoveryResult>
where
    T: Transport + ?Sized,
{
    info!(
        service = %advertisement.service_name,
        addresses = ?advertisement.addresses,
        "Identifying advertised adapter"
    );

    let Some(endpoint) = advertisement.endpoint() else {
        debug!(service = %advertisement.service_name, error = %DescriptorError::NoAddress, "Skipping advertisement");
        return None;
    };

    match fetch_descriptor(transport, &endpoint).await {
        Ok(descriptor) => {
            info!(
                serial = %descriptor.serial,
                model = %descriptor.model,
                firmware = %descriptor.firmware_version,
                software = %descriptor.software_version,
                "Identified adapter"
            );
            Some(DiscoveryResult::new(&endpoint, descriptor))
        }
        Err(e) => {
            debug!(endpoint = %endpoint, error = %e, "Adapter not identified");
            None
        }
    }
}
