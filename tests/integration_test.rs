//! Integration tests for the forwarding pipeline
//!
//! These tests exercise the full dispatch -> resolve -> forward -> record
//! flow against an in-memory store and a mock transport, plus persistence
//! through the SQLite store.

use async_trait::async_trait;
use proptest::prelude::*;
use proptest::test_runner::TestCaseError;
use sms_relay::config::Config;
use sms_relay::dispatch::{Dispatcher, MessagePart, ReceiveEvent};
use sms_relay::forward::{ForwardRequest, Forwarder};
use sms_relay::line::{Capabilities, FileLineRegistry, LineResolver, ResolvedLine};
use sms_relay::store::{MemoryStore, SlotStore, SqliteStore};
use sms_relay::webhook::{TransportError, WebhookPayload, WebhookTransport};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

/// Mock transport: records payloads, replays queued responses (200 default)
#[derive(Default)]
struct MockTransport {
    calls: Mutex<Vec<WebhookPayload>>,
    responses: Mutex<VecDeque<Result<u16, String>>>,
}

impl MockTransport {
    fn new() -> Self {
        Self::default()
    }

    fn queue(&self, response: Result<u16, String>) {
        self.responses.lock().unwrap().push_back(response);
    }

    fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl WebhookTransport for MockTransport {
    async fn post(
        &self,
        _url: &str,
        _user_agent: Option<&str>,
        payload: &WebhookPayload,
    ) -> Result<u16, TransportError> {
        self.calls.lock().unwrap().push(payload.clone());
        match self.responses.lock().unwrap().pop_front() {
            Some(Ok(status)) => Ok(status),
            Some(Err(message)) => Err(TransportError(message)),
            None => Ok(200),
        }
    }
}

fn pipeline(temp_dir: &TempDir) -> (Dispatcher, SlotStore, Arc<MockTransport>) {
    let config = Config::for_test(temp_dir.path());
    let mut registry = FileLineRegistry::new(&config);
    registry
        .register(101, 0, Some("+15550001111".to_string()))
        .unwrap();
    registry
        .register(102, 1, Some("+15550002222".to_string()))
        .unwrap();

    let store = SlotStore::new(Arc::new(MemoryStore::new()));
    let transport = Arc::new(MockTransport::new());
    let resolver = Arc::new(LineResolver::new(
        Arc::new(registry),
        Capabilities::default(),
    ));
    let forwarder = Arc::new(Forwarder::new(store.clone(), transport.clone()));
    let dispatcher = Dispatcher::new(resolver, forwarder, store.clone());

    (dispatcher, store, transport)
}

fn part(sender: &str, body: &str) -> MessagePart {
    MessagePart {
        sender: sender.to_string(),
        body: body.to_string(),
    }
}

/// Full flow: receive event with multipart segments, delivery, recording
#[tokio::test]
async fn test_relay_workflow() {
    let temp_dir = TempDir::new().unwrap();
    let (dispatcher, store, transport) = pipeline(&temp_dir);
    store.set_webhook_url(0, "https://example.com/hook").unwrap();
    store.set_slot_name(0, "Personal").unwrap();

    let handles = dispatcher.on_message_received(ReceiveEvent {
        line_id: 101,
        messages: vec![
            part("+15559990000", "long message, "),
            part("+15559990000", "continued"),
        ],
    });
    for handle in handles {
        handle.await.unwrap();
    }

    assert_eq!(transport.call_count(), 1);
    let payload = transport.calls.lock().unwrap()[0].clone();
    assert_eq!(payload.sender, "+15559990000");
    assert_eq!(payload.body, "long message, continued");
    assert_eq!(payload.recipient, "+15550001111");
    assert_eq!(payload.sim_slot_name, "Personal");

    let stats = store.stats(0);
    assert_eq!(stats.total, 1);
    assert_eq!(stats.successful, 1);
    assert!(stats.is_consistent());
    assert!(store.error_logs().is_empty());
}

/// A burst of events for both slots runs concurrently without losing counts
#[tokio::test]
async fn test_concurrent_burst_keeps_counters_consistent() {
    let temp_dir = TempDir::new().unwrap();
    let (dispatcher, store, transport) = pipeline(&temp_dir);
    store.set_webhook_url(0, "https://example.com/a").unwrap();
    store.set_webhook_url(1, "https://example.com/b").unwrap();

    // Alternate success and failure responses
    for i in 0..40 {
        if i % 2 == 0 {
            transport.queue(Ok(200));
        } else {
            transport.queue(Ok(503));
        }
    }

    let mut handles = Vec::new();
    for i in 0..40 {
        let line_id = if i % 2 == 0 { 101 } else { 102 };
        handles.extend(dispatcher.on_message_received(ReceiveEvent {
            line_id,
            messages: vec![part(&format!("+1555000{i:04}"), "burst")],
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    assert_eq!(transport.call_count(), 40);
    let slot0 = store.stats(0);
    let slot1 = store.stats(1);
    assert_eq!(slot0.total, 20);
    assert_eq!(slot1.total, 20);
    assert!(slot0.is_consistent());
    assert!(slot1.is_consistent());
    assert_eq!(slot0.total + slot1.total, 40);
}

/// Test-send refusal is observable and leaves no trace in the store
#[tokio::test]
async fn test_test_send_rejection_is_observable() {
    let temp_dir = TempDir::new().unwrap();
    let (dispatcher, store, transport) = pipeline(&temp_dir);
    store
        .set_webhook_url(0, "https://production.example.com/hook")
        .unwrap();

    let result = dispatcher.on_test_send(0);
    assert!(result.is_err());
    assert!(result.unwrap_err().to_string().contains("test send rejected"));
    assert_eq!(transport.call_count(), 0);
    assert_eq!(store.stats(0).total, 0);
    assert!(store.error_logs().is_empty());
}

/// Accepted test sends run the same pipeline as a real message
#[tokio::test]
async fn test_test_send_runs_pipeline() {
    let temp_dir = TempDir::new().unwrap();
    let (dispatcher, store, transport) = pipeline(&temp_dir);
    store.set_webhook_url(0, "http://localhost:8080/hook").unwrap();

    dispatcher.on_test_send(0).unwrap().await.unwrap();

    assert_eq!(transport.call_count(), 1);
    let payload = transport.calls.lock().unwrap()[0].clone();
    assert_eq!(payload.sender, "+1234567890");
    assert_eq!(payload.recipient, "+0987654321");
    assert_eq!(store.stats(0).successful, 1);
}

/// SlotConfig round-trip through the SQLite backend
#[test]
fn test_sqlite_config_roundtrip() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("store.db");

    {
        let store = SlotStore::new(Arc::new(SqliteStore::open(&path).unwrap()));
        store.set_webhook_url(1, "https://hooks.example.com/sms").unwrap();
        store.set_user_agent(1, "relay/0.1").unwrap();
        store.set_slot_name(1, "Work SIM").unwrap();
        store.increment_total(1);
        store.increment_successful(1);
        store.log_error("Work SIM", "server responded with status 502");
    }

    // Reopen and read everything back
    let store = SlotStore::new(Arc::new(SqliteStore::open(&path).unwrap()));
    let config = store.slot_config(1);
    assert_eq!(config.webhook_url, "https://hooks.example.com/sms");
    assert_eq!(config.user_agent, "relay/0.1");
    assert_eq!(config.name, "Work SIM");

    let stats = store.stats(1);
    assert_eq!(stats.total, 1);
    assert_eq!(stats.successful, 1);
    assert!(stats.is_consistent());

    let logs = store.error_logs();
    assert_eq!(logs.len(), 1);
    assert!(logs[0].contains("[Work SIM] server responded with status 502"));
}

#[derive(Debug, Clone)]
enum Outcome {
    Success,
    ServerError,
    TransportFailure,
    Unconfigured,
}

fn outcome_strategy() -> impl Strategy<Value = Outcome> {
    prop_oneof![
        Just(Outcome::Success),
        Just(Outcome::ServerError),
        Just(Outcome::TransportFailure),
        Just(Outcome::Unconfigured),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// After any sequence of outcomes, total == successful + failed per slot
    #[test]
    fn prop_counter_invariant_holds(outcomes in prop::collection::vec(outcome_strategy(), 0..24)) {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        runtime.block_on(async {
            let store = SlotStore::new(Arc::new(MemoryStore::new()));
            let transport = Arc::new(MockTransport::new());
            let forwarder = Forwarder::new(store.clone(), transport.clone());

            // Slot 0 is configured; Unconfigured outcomes go to slot 1
            store.set_webhook_url(0, "https://example.com/hook").unwrap();

            let mut expected_success = 0u64;
            let mut expected_failed_slot0 = 0u64;
            let mut expected_unconfigured = 0u64;

            for outcome in &outcomes {
                let slot = match outcome {
                    Outcome::Success => {
                        transport.queue(Ok(200));
                        expected_success += 1;
                        0
                    }
                    Outcome::ServerError => {
                        transport.queue(Ok(500));
                        expected_failed_slot0 += 1;
                        0
                    }
                    Outcome::TransportFailure => {
                        transport.queue(Err("connect error".to_string()));
                        expected_failed_slot0 += 1;
                        0
                    }
                    Outcome::Unconfigured => {
                        expected_unconfigured += 1;
                        1
                    }
                };

                let request = ForwardRequest::new("+15550001111", "msg", 101);
                let line = ResolvedLine {
                    slot: Some(slot),
                    number: Some("+15552220000".to_string()),
                };
                forwarder.forward(&request, &line).await;
            }

            let slot0 = store.stats(0);
            let slot1 = store.stats(1);
            prop_assert!(slot0.is_consistent());
            prop_assert!(slot1.is_consistent());
            prop_assert_eq!(slot0.successful, expected_success);
            prop_assert_eq!(slot0.failed, expected_failed_slot0);
            prop_assert_eq!(slot1.total, expected_unconfigured);
            prop_assert_eq!(slot1.failed, expected_unconfigured);
            prop_assert_eq!(
                transport.call_count() as u64,
                expected_success + expected_failed_slot0
            );
            Ok::<_, TestCaseError>(())
        })?;
    }
}
