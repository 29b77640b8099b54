//! The forwarding pipeline
//!
//! One forwarding attempt: apply the resolved line, look up the slot's
//! configuration, deliver the payload, classify the outcome, and record
//! counters and error log entries. Nothing here ever fails to the caller;
//! a failed delivery is terminal for that message (no retries).

use crate::config::TEST_LINE_ID;
use crate::line::ResolvedLine;
use crate::store::SlotStore;
use crate::webhook::{WebhookPayload, WebhookTransport};
use std::sync::Arc;
use tracing::{info, warn};

/// One message to forward, created per receive event
#[derive(Debug, Clone)]
pub struct ForwardRequest {
    pub sender: String,
    pub body: String,
    /// Line identifier, `TEST_LINE_ID` for test sends
    pub line_id: i64,
    /// Recipient supplied by test sends, bypassing the registry lookup
    pub override_recipient: Option<String>,
}

impl ForwardRequest {
    pub fn new(sender: impl Into<String>, body: impl Into<String>, line_id: i64) -> Self {
        Self {
            sender: sender.into(),
            body: body.into(),
            line_id,
            override_recipient: None,
        }
    }

    pub fn is_test(&self) -> bool {
        self.line_id == TEST_LINE_ID
    }
}

/// Orchestrates forwarding attempts against the store and transport
pub struct Forwarder {
    store: SlotStore,
    transport: Arc<dyn WebhookTransport>,
}

impl Forwarder {
    pub fn new(store: SlotStore, transport: Arc<dyn WebhookTransport>) -> Self {
        Self { store, transport }
    }

    /// Run one forwarding attempt to completion.
    ///
    /// Without a slot there is no configuration to apply: the attempt is
    /// aborted with a system-level log entry and no counter changes.
    /// Otherwise the total counter is incremented exactly once and the
    /// outcome lands in either the success or failure counter.
    pub async fn forward(&self, request: &ForwardRequest, line: &ResolvedLine) {
        let Some(slot) = line.slot else {
            warn!(line_id = request.line_id, "line not identified, dropping message");
            self.store.log_system_error("line not identified");
            return;
        };

        let recipient = request
            .override_recipient
            .clone()
            .or_else(|| line.number.clone())
            .unwrap_or_default();

        // Non-fatal: the webhook destination is independent of recipient
        // availability, so delivery proceeds with an empty recipient field.
        let recipient_error = (!request.is_test() && recipient.is_empty())
            .then(|| "recipient number unavailable".to_string());

        let config = self.store.slot_config(slot);
        let display_name = self.store.display_name(slot);

        let payload = WebhookPayload {
            sender: request.sender.clone(),
            body: request.body.clone(),
            recipient,
            sim_slot_name: display_name.clone(),
        };

        let network_error = if config.webhook_url.trim().is_empty() {
            Some("webhook URL not configured".to_string())
        } else {
            let user_agent =
                (!config.user_agent.trim().is_empty()).then_some(config.user_agent.as_str());
            match self
                .transport
                .post(&config.webhook_url, user_agent, &payload)
                .await
            {
                Ok(status) if (200..300).contains(&status) => None,
                Ok(status) => Some(format!("server responded with status {status}")),
                Err(e) => Some(e.to_string()),
            }
        };

        self.store.increment_total(slot);
        if network_error.is_none() {
            self.store.increment_successful(slot);
            info!(slot, sender = %request.sender, "message forwarded");
        } else {
            self.store.increment_failed(slot);
            for error in [&recipient_error, &network_error].into_iter().flatten() {
                self.store.log_error(&display_name, error);
            }
            warn!(
                slot,
                error = network_error.as_deref().unwrap_or_default(),
                "forwarding failed"
            );
        }
    }
}
