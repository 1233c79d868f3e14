//! Scripted in-memory transport for tests
//!
//! Maps query keys (e.g. `"0/UnitProfile/la"`) to canned responses. Unknown
//! keys answer with `rsc` 4004. Clones share state, so a test can hand one
//! clone to the code under test and inspect the recorded traffic with another.

use altherma_core::{Document, ResourcePath};
use async_trait::async_trait;
use serde_json::json;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crate::envelope::{self, QueryResponse, RSC_NOT_FOUND, RSC_OK};
use crate::error::TransportError;
use crate::transport::{Endpoint, Transport};

#[derive(Debug, Default)]
struct Script {
    responses: HashMap<String, Document>,
    failures: HashMap<String, TransportError>,
    discovery_reply: Option<String>,
    refuse_connect: bool,
    connected: bool,
    connects: usize,
    disconnects: usize,
    queries: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ScriptedTransport {
    script: Arc<Mutex<Script>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn script(&self) -> MutexGuard<'_, Script> {
        match self.script.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Answer `key` with code 2000 and the given `pc` payload
    pub fn found(self, key: &str, payload: Document) -> Self {
        let body = json!({"rsc": RSC_OK, "to": "/OpenHab", "fr": envelope::target_for(key), "pc": payload});
        self.script().responses.insert(key.to_string(), body);
        self
    }

    /// Answer `key` with code 2000 and a content instance holding `content`
    pub fn content(self, key: &str, content: Document) -> Self {
        self.found(key, json!({"m2m:cin": {"rn": "00000001", "ty": 4, "con": content}}))
    }

    /// Answer `key` with an arbitrary response code and no payload
    pub fn code(self, key: &str, rsc: i64) -> Self {
        let body = json!({"rsc": rsc, "to": "/OpenHab", "fr": envelope::target_for(key)});
        self.script().responses.insert(key.to_string(), body);
        self
    }

    /// Fail queries for `key` with `error`
    pub fn fail(self, key: &str, error: TransportError) -> Self {
        self.script().failures.insert(key.to_string(), error);
        self
    }

    /// Fail queries for `key` with a timeout
    pub fn time_out(self, key: &str) -> Self {
        let error = TransportError::Timeout {
            target: envelope::target_for(key),
            timeout: Duration::from_millis(10),
        };
        self.fail(key, error)
    }

    pub fn discovery_reply(self, raw: &str) -> Self {
        self.script().discovery_reply = Some(raw.to_string());
        self
    }

    pub fn refuse_connections(self) -> Self {
        self.script().refuse_connect = true;
        self
    }

    /// Every query key seen, in order
    pub fn queries(&self) -> Vec<String> {
        self.script().queries.clone()
    }

    pub fn connects(&self) -> usize {
        self.script().connects
    }

    pub fn disconnects(&self) -> usize {
        self.script().disconnects
    }

    pub fn is_connected(&self) -> bool {
        self.script().connected
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn connect(&mut self, endpoint: &Endpoint) -> Result<(), TransportError> {
        let mut script = self.script();
        script.connects += 1;
        if script.refuse_connect {
            return Err(TransportError::Connection(format!("refused: {}", endpoint)));
        }
        script.connected = true;
        Ok(())
    }

    async fn disconnect(&mut self) {
        let mut script = self.script();
        script.disconnects += 1;
        script.connected = false;
    }

    async fn query(&mut self, path: &ResourcePath) -> Result<QueryResponse, TransportError> {
        let key = path.key();
        let mut script = self.script();
        if !script.connected {
            return Err(TransportError::NotConnected);
        }
        script.queries.push(key.clone());
        if let Some(error) = script.failures.get(&key) {
            return Err(error.clone());
        }

        let request_id = envelope::new_request_id();
        let mut body = script
            .responses
            .get(&key)
            .cloned()
            .unwrap_or_else(|| json!({"rsc": RSC_NOT_FOUND, "to": "/OpenHab", "fr": envelope::target_for(&key)}));
        body["rqi"] = json!(request_id);
        let code = body["rsc"].as_i64().unwrap_or(RSC_NOT_FOUND);

        Ok(QueryResponse {
            code,
            request_id,
            body,
        })
    }

    async fn send_discovery_probe(&mut self) -> Result<String, TransportError> {
        let script = self.script();
        if !script.connected {
            return Err(TransportError::NotConnected);
        }
        script
            .discovery_reply
            .clone()
            .ok_or_else(|| TransportError::Timeout {
                target: envelope::DEVICE_INFO_TARGET.to_string(),
                timeout: Duration::from_millis(10),
            })
    }
}
