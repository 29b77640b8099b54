//! Webhook delivery - JSON payload and HTTP transport
//!
//! The transport is a trait so the forwarding pipeline can be exercised
//! without network access.

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

/// The outbound payload, exactly four fields
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WebhookPayload {
    pub sender: String,
    pub body: String,
    pub recipient: String,
    #[serde(rename = "simSlotName")]
    pub sim_slot_name: String,
}

/// Transport-level delivery failure (DNS, connect, timeout, malformed URL)
#[derive(Debug, Error)]
#[error("{0}")]
pub struct TransportError(pub String);

/// Posts a payload to a webhook endpoint, returning the HTTP status code
#[async_trait]
pub trait WebhookTransport: Send + Sync {
    async fn post(
        &self,
        url: &str,
        user_agent: Option<&str>,
        payload: &WebhookPayload,
    ) -> std::result::Result<u16, TransportError>;
}

/// Production transport over reqwest
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl WebhookTransport for HttpTransport {
    async fn post(
        &self,
        url: &str,
        user_agent: Option<&str>,
        payload: &WebhookPayload,
    ) -> std::result::Result<u16, TransportError> {
        let mut request = self.client.post(url).json(payload);
        if let Some(agent) = user_agent {
            request = request.header(reqwest::header::USER_AGENT, agent);
        }

        let response = request
            .send()
            .await
            .map_err(|e| TransportError(e.to_string()))?;

        Ok(response.status().as_u16())
    }
}
