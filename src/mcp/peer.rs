//! Outgoing side of the session
//!
//! Every line written to the client goes through one channel drained by the
//! writer task. Requests we send (sampling) wait on a oneshot completed when
//! the matching response arrives on stdin.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};

use crate::ocr::{OcrError, SamplingClient, SamplingRequest, SamplingResponse};

use super::protocol::{methods, JsonRpcId, JsonRpcRequest, JsonRpcResponse};

/// How long to wait for the client to answer a request
pub const CLIENT_REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, thiserror::Error)]
pub enum PeerError {
    #[error("Client connection closed")]
    Closed,

    #[error("Client did not answer {method} within {secs}s")]
    Timeout { method: String, secs: u64 },

    #[error("Client returned error {code}: {message}")]
    Remote { code: i32, message: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// The connected client, as seen from the server
pub struct ClientPeer {
    outgoing: mpsc::UnboundedSender<String>,
    pending: Mutex<HashMap<i64, oneshot::Sender<JsonRpcResponse>>>,
    next_id: AtomicI64,
    supports_sampling: AtomicBool,
    timeout: Duration,
}

impl ClientPeer {
    pub fn new(outgoing: mpsc::UnboundedSender<String>) -> Self {
        Self {
            outgoing,
            pending: Mutex::new(HashMap::new()),
            next_id: AtomicI64::new(1),
            supports_sampling: AtomicBool::new(false),
            timeout: CLIENT_REQUEST_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Queue one message for the writer
    pub fn send<T: Serialize>(&self, message: &T) -> Result<(), PeerError> {
        let line = serde_json::to_string(message)?;
        self.outgoing.send(line).map_err(|_| PeerError::Closed)
    }

    pub fn set_supports_sampling(&self, supported: bool) {
        self.supports_sampling.store(supported, Ordering::SeqCst);
    }

    /// Whether the client declared the sampling capability at initialize
    pub fn supports_sampling(&self) -> bool {
        self.supports_sampling.load(Ordering::SeqCst)
    }

    /// Send a request to the client and wait for its result
    pub async fn request(&self, method: &str, params: Value) -> Result<Value, PeerError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(id, tx);

        let request = JsonRpcRequest::new(Some(JsonRpcId::Number(id)), method, Some(params));
        if let Err(e) = self.send(&request) {
            self.pending.lock().remove(&id);
            return Err(e);
        }

        let response = match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(response)) => response,
            Ok(Err(_)) => return Err(PeerError::Closed),
            Err(_) => {
                self.pending.lock().remove(&id);
                return Err(PeerError::Timeout {
                    method: method.to_string(),
                    secs: self.timeout.as_secs(),
                });
            }
        };

        if let Some(error) = response.error {
            return Err(PeerError::Remote {
                code: error.code,
                message: error.message,
            });
        }
        Ok(response.result.unwrap_or(Value::Null))
    }

    /// Route a response from the client to its waiting request.
    ///
    /// Returns false when nothing was waiting for it.
    pub fn complete(&self, response: JsonRpcResponse) -> bool {
        let id = match &response.id {
            Some(JsonRpcId::Number(n)) => *n,
            Some(JsonRpcId::String(s)) => match s.parse() {
                Ok(n) => n,
                Err(_) => return false,
            },
            None => return false,
        };

        match self.pending.lock().remove(&id) {
            Some(waiter) => waiter.send(response).is_ok(),
            None => false,
        }
    }

    /// Drop every waiting request; their callers see `Closed`
    pub fn fail_pending(&self) {
        self.pending.lock().clear();
    }
}

#[async_trait]
impl SamplingClient for ClientPeer {
    async fn create_message(&self, request: SamplingRequest) -> Result<SamplingResponse, OcrError> {
        let params = serde_json::to_value(&request)
            .map_err(|e| OcrError::ApiError(format!("Invalid sampling request: {}", e)))?;
        let result = self
            .request(methods::SAMPLING_CREATE_MESSAGE, params)
            .await
            .map_err(|e| OcrError::ApiError(e.to_string()))?;
        serde_json::from_value(result)
            .map_err(|e| OcrError::ApiError(format!("Malformed sampling reply: {}", e)))
    }
}
