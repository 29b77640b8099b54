//! Dispatch triggers - entry points for received messages and test sends
//!
//! Each forwarding attempt runs as its own tokio task; the trigger returns
//! immediately and never awaits completion. Test sends are restricted to a
//! small allow-list of test-safe destinations so a misconfigured webhook
//! cannot receive synthetic traffic.

use crate::config::{TEST_LINE_ID, TEST_RECIPIENT, TEST_SENDER};
use crate::error::{Error, Result};
use crate::forward::{ForwardRequest, Forwarder};
use crate::line::{LineResolver, ResolvedLine};
use crate::store::SlotStore;
use once_cell::sync::Lazy;
use regex::RegexSet;
use serde::Deserialize;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// One raw message segment as delivered by the platform
#[derive(Debug, Clone, Deserialize)]
pub struct MessagePart {
    pub sender: String,
    pub body: String,
}

/// One receive event: a set of segments plus the line they arrived on
#[derive(Debug, Clone, Deserialize)]
pub struct ReceiveEvent {
    #[serde(default = "default_line_id")]
    pub line_id: i64,
    pub messages: Vec<MessagePart>,
}

fn default_line_id() -> i64 {
    TEST_LINE_ID
}

/// Destinations considered safe for test sends
static TEST_SAFE_PATTERNS: Lazy<RegexSet> = Lazy::new(|| {
    RegexSet::new([
        r"^https?://localhost([:/]|$)",
        r"^https?://127\.0\.0\.1([:/]|$)",
        r"^https?://\[::1\]([:/]|$)",
        r"^https?://(www\.)?webhook\.site(/|$)",
    ])
    .expect("Invalid test endpoint regex")
});

/// Whether a webhook URL is on the test-send allow-list
pub fn is_test_safe_url(url: &str) -> bool {
    TEST_SAFE_PATTERNS.is_match(url)
}

/// Entry point invoked once per received message or test-send action
pub struct Dispatcher {
    resolver: Arc<LineResolver>,
    forwarder: Arc<Forwarder>,
    store: SlotStore,
}

impl Dispatcher {
    pub fn new(resolver: Arc<LineResolver>, forwarder: Arc<Forwarder>, store: SlotStore) -> Self {
        Self {
            resolver,
            forwarder,
            store,
        }
    }

    /// Group simultaneously delivered segments by sender, concatenating
    /// bodies for the same sender in arrival order
    fn group_by_sender(messages: &[MessagePart]) -> Vec<(String, String)> {
        let mut grouped: Vec<(String, String)> = Vec::new();
        for part in messages {
            match grouped.iter_mut().find(|(sender, _)| *sender == part.sender) {
                Some((_, body)) => body.push_str(&part.body),
                None => grouped.push((part.sender.clone(), part.body.clone())),
            }
        }
        grouped
    }

    /// Handle one receive event: one ForwardRequest per distinct sender,
    /// each spawned as an independent task. The returned handles exist only
    /// so a short-lived process can drain before exit; completion is never
    /// awaited here.
    pub fn on_message_received(&self, event: ReceiveEvent) -> Vec<JoinHandle<()>> {
        let grouped = Self::group_by_sender(&event.messages);
        debug!(
            line_id = event.line_id,
            senders = grouped.len(),
            segments = event.messages.len(),
            "dispatching receive event"
        );

        grouped
            .into_iter()
            .map(|(sender, body)| {
                let request = ForwardRequest::new(sender, body, event.line_id);
                let resolver = self.resolver.clone();
                let forwarder = self.forwarder.clone();
                tokio::spawn(async move {
                    let line = resolver.resolve(request.line_id);
                    forwarder.forward(&request, &line).await;
                })
            })
            .collect()
    }

    /// Dispatch a synthetic test message for a slot.
    ///
    /// Refused unless the slot's configured webhook URL is a recognized
    /// test endpoint; a refusal performs no forwarding attempt.
    pub fn on_test_send(&self, slot: usize) -> Result<JoinHandle<()>> {
        let url = self.store.webhook_url(slot);
        if !is_test_safe_url(&url) {
            return Err(Error::TestSendRejected { slot, url });
        }

        info!(slot, "dispatching test send");
        let mut request = ForwardRequest::new(
            TEST_SENDER,
            format!("This is a test message from SIM slot {}.", slot + 1),
            TEST_LINE_ID,
        );
        request.override_recipient = Some(TEST_RECIPIENT.to_string());

        // The slot is supplied directly: test sends bypass the registry
        let line = ResolvedLine {
            slot: Some(slot),
            number: None,
        };
        let forwarder = self.forwarder.clone();
        Ok(tokio::spawn(async move {
            forwarder.forward(&request, &line).await;
        }))
    }
}
