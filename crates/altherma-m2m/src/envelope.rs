//! Request/response envelopes of the adapter's M2M dialect
//!
//! Every query is a single retrieve primitive sent as one JSON text frame:
//!
//! ```text
//! {"m2m:rqp":{"op":2,"to":"/[0]/MNAE/2/Operation/Power/la","fr":"/OpenHab","rqi":"5f1c0a9e3b7d4c21"}}
//! ```
//!
//! and answered by a response primitive carrying the same `rqi`:
//!
//! ```text
//! {"m2m:rsp":{"rsc":2000,"rqi":"5f1c0a9e3b7d4c21","to":"/OpenHab","fr":"...","pc":{"m2m:cin":{"con":"on"}}}}
//! ```

use altherma_core::document::{self, Document};
use serde::Serialize;
use uuid::Uuid;

use crate::error::TransportError;

/// Response code meaning "resource found, payload present"
pub const RSC_OK: i64 = 2000;

/// Response code the adapter uses for absent resources
pub const RSC_NOT_FOUND: i64 = 4004;

/// Retrieve operation (the only one used)
pub const OP_RETRIEVE: u8 = 2;

/// Prefix of every application resource address
pub const AE_PREFIX: &str = "/[0]/MNAE/";

/// Address of the adapter's device-info resource
pub const DEVICE_INFO_TARGET: &str = "/[0]/MNCSE-node/deviceInfo";

/// Wire keys of the envelope and payload shapes we read
pub mod keys {
    pub const REQUEST: &str = "m2m:rqp";
    pub const RESPONSE: &str = "m2m:rsp";
    pub const RESPONSE_CODE: &str = "rsc";
    pub const REQUEST_ID: &str = "rqi";
    pub const PAYLOAD: &str = "pc";

    pub const CONTAINER: &str = "m2m:cnt";
    pub const LABEL: &str = "lbl";

    pub const CONTENT_INSTANCE: &str = "m2m:cin";
    pub const CONTENT: &str = "con";

    pub const DEVICE_INFO: &str = "m2m:dvi";
    pub const DEVICE_LABEL: &str = "dlb";
    pub const MODEL: &str = "mod";
    pub const DEVICE_TYPE: &str = "dty";
    pub const FIRMWARE_VERSION: &str = "fwv";
    pub const SOFTWARE_VERSION: &str = "swv";
    pub const HARDWARE_VERSION: &str = "hwv";
}

/// Key path from a response body to a leaf's latest content
pub const CONTENT_PATH: [&str; 3] = [keys::PAYLOAD, keys::CONTENT_INSTANCE, keys::CONTENT];

/// Key path from a response body to a container's label
pub const LABEL_PATH: [&str; 3] = [keys::PAYLOAD, keys::CONTAINER, keys::LABEL];

#[derive(Serialize)]
struct RequestEnvelope<'a> {
    #[serde(rename = "m2m:rqp")]
    primitive: RequestPrimitive<'a>,
}

#[derive(Serialize)]
struct RequestPrimitive<'a> {
    op: u8,
    to: &'a str,
    fr: &'a str,
    rqi: &'a str,
}

/// Full target address for an application resource key
pub fn target_for(key: &str) -> String {
    format!("{}{}", AE_PREFIX, key)
}

/// Fresh correlation id: 16 lowercase hex characters
pub fn new_request_id() -> String {
    let mut id = Uuid::new_v4().simple().to_string();
    id.truncate(16);
    id
}

/// Encode a retrieve request frame
pub fn encode_request(target: &str, originator: &str, request_id: &str) -> Result<String, TransportError> {
    let envelope = RequestEnvelope {
        primitive: RequestPrimitive {
            op: OP_RETRIEVE,
            to: target,
            fr: originator,
            rqi: request_id,
        },
    };
    Ok(serde_json::to_string(&envelope)?)
}

/// One parsed response primitive
#[derive(Debug, Clone, PartialEq)]
pub struct QueryResponse {
    pub code: i64,
    pub request_id: String,
    /// The whole `m2m:rsp` object
    pub body: Document,
}

impl QueryResponse {
    pub fn is_found(&self) -> bool {
        self.code == RSC_OK
    }

    pub fn payload(&self) -> Option<&Document> {
        document::resolve(&self.body, &[keys::PAYLOAD], true)
    }

    /// Latest content of a leaf, if this response carries one
    pub fn content(&self) -> Option<&Document> {
        document::resolve(&self.body, &CONTENT_PATH, true)
    }

    /// Container label, if this response describes a container
    pub fn label(&self) -> Option<&Document> {
        document::resolve(&self.body, &LABEL_PATH, true)
    }
}

/// Decode a response frame
pub fn decode_response(text: &str) -> Result<QueryResponse, TransportError> {
    let mut frame: Document = serde_json::from_str(text)?;
    let body = frame
        .get_mut(keys::RESPONSE)
        .map(Document::take)
        .ok_or_else(|| TransportError::Protocol(format!("missing {}", keys::RESPONSE)))?;

    let code = body
        .get(keys::RESPONSE_CODE)
        .and_then(Document::as_i64)
        .ok_or_else(|| TransportError::Protocol(format!("missing {}", keys::RESPONSE_CODE)))?;
    let request_id = body
        .get(keys::REQUEST_ID)
        .and_then(Document::as_str)
        .ok_or_else(|| TransportError::Protocol(format!("missing {}", keys::REQUEST_ID)))?
        .to_string();

    Ok(QueryResponse {
        code,
        request_id,
        body,
    })
}
