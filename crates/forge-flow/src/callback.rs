//! Outbound result callbacks.
//!
//! When an intent reaches its terminal state, a flattened payload is POSTed
//! to the caller's configured URL. Delivery is at-least-once, best-effort:
//! a completed intent observed again may be posted again, and a failed
//! delivery is logged and retried on the next observation.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::intent::AckState;

/// The flattened status payload delivered to the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallbackPayload {
    /// Caller's flow identifier, echoed verbatim.
    pub flow_id: String,
    /// Caller's step name, echoed verbatim.
    pub step_name: String,
    /// The authoritative outcome token.
    pub ack_state: AckState,
    /// Caller's request identifier, echoed verbatim.
    pub uuid: String,
    /// Completion flag.
    pub done: bool,
    /// Kind-specific extra, e.g. collected log text for unit runs.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
}

/// Where completion payloads are delivered.
#[async_trait]
pub trait CallbackSink: Send + Sync {
    /// Posts one payload. Failures are reported, not retried here.
    async fn post(&self, payload: &CallbackPayload) -> Result<()>;
}

/// HTTP callback sink posting JSON to a fixed URL.
#[derive(Debug, Clone)]
pub struct HttpCallbackSink {
    client: reqwest::Client,
    url: String,
}

impl HttpCallbackSink {
    /// Creates a sink posting to the given URL.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
        }
    }
}

#[async_trait]
impl CallbackSink for HttpCallbackSink {
    async fn post(&self, payload: &CallbackPayload) -> Result<()> {
        let response = self
            .client
            .post(self.url.as_str())
            .header("Accept", "application/json")
            .json(payload)
            .send()
            .await
            .map_err(|e| Error::callback(format!("post to ({}) failed: {e}", self.url)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::callback(format!(
                "post to ({}) response code ({})",
                self.url,
                status.as_u16()
            )));
        }
        Ok(())
    }
}
