// SPDX-FileCopyrightText: 2026 Alarmcast Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! End-to-end delivery through SQLite storage, the SQLite queue, the modem
//! pool, and a mock modem HTTP API.
//!
//! These tests use wall-clock time: the mock modem is a real HTTP server.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use alarmcast_config::model::{ModemPoolConfig, ProcessorConfig, QueueConfig};
use alarmcast_core::{
    AlarmQueue, Channel, DeadLetterStore, Modem, ModemHealth, ModemStore, ServiceTag,
};
use alarmcast_engine::{AlarmProcessor, ChannelStatus, PollResult, ProcessOutcome, QueueConsumer};
use alarmcast_resilience::BreakerRegistry;
use alarmcast_sms::{HttpModemGateway, ModemPool, SmsSender};
use alarmcast_test_utils::{alarm, contact, TestHarness};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

/// Answers 503 for the first `failures` calls, then a message id.
struct FlakyModem {
    failures: usize,
    calls: Arc<Mutex<Vec<Instant>>>,
}

impl Respond for FlakyModem {
    fn respond(&self, _request: &Request) -> ResponseTemplate {
        let mut calls = self.calls.lock().unwrap();
        calls.push(Instant::now());
        if calls.len() <= self.failures {
            ResponseTemplate::new(503)
        } else {
            ResponseTemplate::new(200)
                .set_body_json(serde_json::json!({ "message_id": "sms-42" }))
        }
    }
}

fn modem(host: String) -> Modem {
    Modem {
        id: "m1".into(),
        name: "primary".into(),
        host,
        username: None,
        password: None,
        allowed_services: vec![ServiceTag::Alarms],
        priority: 0,
        max_concurrent: 2,
        enabled: true,
        health: ModemHealth::Healthy,
        sent_count: 0,
        sent_limit: Some(1_000),
        package: None,
    }
}

struct Rig {
    harness: TestHarness,
    processor: Arc<AlarmProcessor>,
    calls: Arc<Mutex<Vec<Instant>>>,
    _server: MockServer,
}

async fn rig(failures: usize) -> Rig {
    let server = MockServer::start().await;
    let calls = Arc::new(Mutex::new(Vec::new()));
    Mock::given(method("POST"))
        .and(path("/api/sms/send"))
        .respond_with(FlakyModem {
            failures,
            calls: calls.clone(),
        })
        .mount(&server)
        .await;

    let harness = TestHarness::builder()
        .with_contact(contact("c1"))
        .with_queue_config(QueueConfig {
            poll_interval_ms: 10,
            ..QueueConfig::default()
        })
        .build()
        .await
        .unwrap();
    harness.storage.upsert_modem(&modem(server.uri())).await.unwrap();

    let breakers = Arc::new(BreakerRegistry::default());
    let pool = ModemPool::new(
        harness.storage.clone(),
        Arc::new(HttpModemGateway::new(Duration::from_secs(5)).unwrap()),
        breakers,
        &ModemPoolConfig::default(),
    )
    .await
    .unwrap();

    let processor = AlarmProcessor::builder(
        harness.storage.clone(),
        harness.storage.clone(),
        harness.storage.clone(),
        ProcessorConfig {
            retry_base_delay_ms: 1_000,
            retry_max_delay_ms: 60_000,
            ..ProcessorConfig::default()
        },
    )
    .channel(Arc::new(SmsSender::new(Arc::new(pool))), 4, 3)
    .build();

    Rig {
        harness,
        processor: Arc::new(processor),
        calls,
        _server: server,
    }
}

fn sms_only(id: &str) -> alarmcast_core::Alarm {
    let mut a = alarm(id);
    a.is_email = false;
    a
}

#[tokio::test(flavor = "multi_thread")]
async fn sms_recovers_after_two_provider_outages() {
    let rig = rig(2).await;

    let outcome = rig.processor.process(&sms_only("a-1")).await.unwrap();
    let ProcessOutcome::Processed(report) = outcome else {
        panic!("alarm treated as duplicate");
    };

    let sms = report.channel(Channel::Sms).unwrap();
    assert_eq!(sms.status, ChannelStatus::Sent);
    assert_eq!(sms.attempts, 3);
    assert_eq!(sms.delivered[0].provider_message_id.as_deref(), Some("sms-42"));
    assert_eq!(sms.delivered[0].modem_id.as_deref(), Some("m1"));

    // Exponential backoff from 1 s with +/- 25 % jitter, plus scheduling slack.
    let calls = rig.calls.lock().unwrap().clone();
    assert_eq!(calls.len(), 3);
    let first = (calls[1] - calls[0]).as_millis();
    let second = (calls[2] - calls[1]).as_millis();
    assert!((750..1_450).contains(&first), "first delay {first} ms");
    assert!((1_500..2_700).contains(&second), "second delay {second} ms");

    let stored = rig.harness.storage.load_alarm("a-1").await.unwrap().unwrap();
    assert!(stored.sms_sent_at.is_some());
    assert_eq!(rig.harness.storage.dead_letter_count().await.unwrap(), 0);

    let modems = rig.harness.storage.list_modems().await.unwrap();
    assert_eq!(modems[0].sent_count, 1);
    assert_eq!(modems[0].health, ModemHealth::Healthy);
}

#[tokio::test(flavor = "multi_thread")]
async fn exhausted_sms_lands_in_dead_letters() {
    let rig = rig(usize::MAX).await;

    let outcome = rig.processor.process(&sms_only("a-1")).await.unwrap();
    let ProcessOutcome::Processed(report) = outcome else {
        panic!("alarm treated as duplicate");
    };
    assert!(!report.is_complete());
    assert_eq!(rig.calls.lock().unwrap().len(), 3);

    let stored = rig.harness.storage.load_alarm("a-1").await.unwrap().unwrap();
    assert!(stored.sms_sent_at.is_none());
    let dlq = rig.harness.storage.list_dead_letters(10).await.unwrap();
    assert_eq!(dlq.len(), 1);
    assert_eq!(dlq[0].channel, Some(Channel::Sms));
    assert_eq!(dlq[0].attempts, 3);
    assert_eq!(dlq[0].last_error.category, "server_error");
}

#[tokio::test(flavor = "multi_thread")]
async fn queued_alarm_is_consumed_and_acked_once() {
    let rig = rig(0).await;
    let storage = rig.harness.storage.clone();
    let queue = rig.harness.queue.clone();
    let consumer = QueueConsumer::new(
        queue.clone(),
        rig.processor.clone(),
        storage.clone(),
        storage.clone(),
        QueueConfig {
            prefetch: 1,
            ..QueueConfig::default()
        },
    );

    let payload = serde_json::to_string(&sms_only("a-1")).unwrap();
    queue.publish(&payload).await.unwrap();
    // Redelivery of the same alarm is absorbed by deduplication.
    queue.publish(&payload).await.unwrap();

    assert_eq!(consumer.poll_once().await.unwrap(), PollResult::Handled(1));
    assert_eq!(consumer.poll_once().await.unwrap(), PollResult::Handled(1));
    assert_eq!(queue.depth().await.unwrap(), 0);
    let counts = queue.counts().await.unwrap();
    assert!(counts.contains(&("completed".to_string(), 2)));
    assert_eq!(rig.calls.lock().unwrap().len(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn paused_queue_is_left_untouched() {
    let rig = rig(0).await;
    let storage = rig.harness.storage.clone();
    let queue = rig.harness.queue.clone();
    storage.set_paused(true).await.unwrap();
    let consumer = QueueConsumer::new(
        queue.clone(),
        rig.processor.clone(),
        storage.clone(),
        storage.clone(),
        QueueConfig::default(),
    );

    queue
        .publish(&serde_json::to_string(&sms_only("a-1")).unwrap())
        .await
        .unwrap();
    assert_eq!(consumer.poll_once().await.unwrap(), PollResult::Paused);
    assert_eq!(queue.depth().await.unwrap(), 1);
    assert!(rig.calls.lock().unwrap().is_empty());
}
