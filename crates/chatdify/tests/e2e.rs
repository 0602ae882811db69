// SPDX-FileCopyrightText: 2026 Chatdify Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! End-to-end tests: webhook in, worker pool, Chatwoot mutations out.
//!
//! Everything runs against the mock gateways over a temp SQLite database,
//! with the same router, dispatcher, and workers the binary wires up.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::body::Body;
use axum::http::{Request, StatusCode};
use chatdify_core::{
    AIResponse, BridgeError, ConversationStatus, ConversationStore, GatewayErrorKind, Priority,
    TaskQueue, TaskStatus,
};
use chatdify_pipeline::{TaskDisposition, WorkerPool};
use chatdify_server::{router, AppState, AuthConfig, HealthState};
use chatdify_test_utils::{payloads, Fault, TestHarness};
use serial_test::serial;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

fn app(harness: &TestHarness) -> axum::Router {
    router(AppState {
        dispatcher: harness.dispatcher.clone(),
        actions: harness.actions.clone(),
        webhook_secret: None,
        auth: AuthConfig { bearer_token: None },
        health: HealthState {
            start_time: Instant::now(),
            storage: harness.storage.clone(),
            queue: harness.queue(),
        },
    })
}

async fn post_webhook(harness: &TestHarness, payload: &serde_json::Value) -> StatusCode {
    let request = Request::post("/chatwoot-webhook")
        .header("content-type", "application/json")
        .body(Body::from(payload.to_string()))
        .unwrap();
    app(harness).oneshot(request).await.unwrap().status()
}

/// Run a worker pool until `completed` tasks have finished.
async fn run_pool_until(harness: &TestHarness, completed: u64) {
    let cancel = CancellationToken::new();
    let pool = WorkerPool::new(harness.executor.clone());
    let pool_cancel = cancel.clone();
    let running = tokio::spawn(async move { pool.run(pool_cancel).await });

    let queue = harness.queue();
    let deadline = tokio::time::Instant::now() + Duration::from_secs(20);
    loop {
        let stats = queue.stats().await.unwrap();
        if stats.completed + stats.failed >= completed && stats.pending == 0 && stats.processing == 0
        {
            break;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "queue did not drain: {stats:?}"
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    cancel.cancel();
    running.await.unwrap();
}

#[tokio::test]
#[serial]
async fn duplicate_webhooks_produce_one_set_of_mutations() {
    let harness = TestHarness::builder()
        .with_config(|c| c.queue.concurrency = 3)
        .build()
        .await
        .unwrap();
    harness
        .dify
        .push_response(AIResponse {
            reply_text: "Your parcel ships today.".into(),
            suggested_labels: BTreeSet::from(["shipping".to_string()]),
            ..Default::default()
        })
        .await;

    let payload = payloads::message_created(1, 10, "where is my parcel?");
    for _ in 0..3 {
        assert_eq!(post_webhook(&harness, &payload).await, StatusCode::OK);
    }
    run_pool_until(&harness, 1).await;

    // Chatwoot retries long after the first delivery was handled.
    assert_eq!(post_webhook(&harness, &payload).await, StatusCode::OK);
    assert!(harness.drain().await.unwrap().is_empty());

    assert_eq!(
        harness.chatwoot.sent_messages(1).await,
        vec!["Your parcel ships today.".to_string()]
    );
    assert_eq!(harness.chatwoot.call_count("add_labels").await, 1);
    assert_eq!(harness.dify.request_count().await, 1);
    assert_eq!(harness.queue().stats().await.unwrap().completed, 1);
}

#[tokio::test]
#[serial]
async fn concurrent_lease_requests_admit_exactly_one_holder() {
    let harness = TestHarness::new().await.unwrap();

    let mut attempts = tokio::task::JoinSet::new();
    for n in 0..8 {
        let storage = harness.storage.clone();
        attempts.spawn(async move {
            storage
                .try_begin_ai_request(2, &format!("token-{n}"), Duration::from_secs(60))
                .await
                .unwrap()
        });
    }
    let mut winners = 0;
    while let Some(won) = attempts.join_next().await {
        if won.unwrap() {
            winners += 1;
        }
    }
    assert_eq!(winners, 1);
    assert!(harness.state(2).await.unwrap().pending_ai_request_id.is_some());
}

#[tokio::test]
#[serial]
async fn burst_on_one_conversation_never_overlaps_ai_calls() {
    let harness = TestHarness::builder()
        .with_config(|c| {
            c.queue.concurrency = 4;
            c.queue.lease_conflict_delay_ms = 20;
            c.queue.max_deferrals = 500;
        })
        .build()
        .await
        .unwrap();
    harness.dify.set_delay(Duration::from_millis(40)).await;

    for message_id in 1..=4 {
        let payload = payloads::message_created(3, message_id, &format!("ping {message_id}"));
        assert_eq!(post_webhook(&harness, &payload).await, StatusCode::OK);
    }
    // Another conversation is free to run alongside.
    let other = payloads::message_created(4, 1, "unrelated");
    assert_eq!(post_webhook(&harness, &other).await, StatusCode::OK);

    run_pool_until(&harness, 5).await;

    assert_eq!(harness.dify.max_concurrent(3).await, 1);
    for message_id in 1..=4 {
        assert!(harness
            .storage
            .was_processed(3, &format!("message:{message_id}"))
            .await
            .unwrap());
    }
    assert!(harness.state(3).await.unwrap().pending_ai_request_id.is_none());
}

#[tokio::test]
#[serial]
async fn status_writes_follow_the_transition_table() {
    let harness = TestHarness::new().await.unwrap();

    // open -> pending is an allowed edge.
    assert!(harness
        .storage
        .update_status(5, ConversationStatus::Pending)
        .await
        .unwrap());
    assert_eq!(
        harness.state(5).await.unwrap().status,
        ConversationStatus::Pending
    );

    // resolved -> pending is not.
    harness
        .storage
        .reconcile_status(6, ConversationStatus::Resolved)
        .await
        .unwrap();
    assert!(!harness
        .storage
        .update_status(6, ConversationStatus::Pending)
        .await
        .unwrap());
    assert_eq!(
        harness.state(6).await.unwrap().status,
        ConversationStatus::Resolved
    );

    // The action surface refuses the same edge before reaching Chatwoot.
    let err = harness.actions.set_status(6, "pending").await.unwrap_err();
    assert!(matches!(err, BridgeError::PolicyRejected(_)));
    assert_eq!(
        harness.chatwoot.attempt_count("update_conversation_status").await,
        0
    );
}

#[tokio::test]
#[serial]
async fn bridge_policy_holds_even_when_chatwoot_would_accept() {
    let harness = TestHarness::builder()
        .without_gateway_policy()
        .build()
        .await
        .unwrap();

    for status in ["resolved", "snoozed", "closed"] {
        let err = harness.actions.set_status(21, status).await.unwrap_err();
        assert!(matches!(err, BridgeError::PolicyRejected(_)), "{status}");
    }
    assert_eq!(
        harness.chatwoot.attempt_count("update_conversation_status").await,
        0
    );
    assert_eq!(
        harness.state(21).await.unwrap().status,
        ConversationStatus::Open
    );
}

#[tokio::test]
#[serial]
async fn agent_replies_are_acknowledged_but_not_answered() {
    let harness = TestHarness::new().await.unwrap();

    let payload = payloads::outgoing_message(22, 1, "Hi, this is Sam from support.");
    assert_eq!(post_webhook(&harness, &payload).await, StatusCode::OK);

    assert!(harness.drain().await.unwrap().is_empty());
    assert_eq!(harness.dify.request_count().await, 0);
    assert_eq!(harness.queue().stats().await.unwrap().pending, 0);
}

#[tokio::test]
#[serial]
async fn unknown_priority_is_rejected_and_changes_nothing() {
    let harness = TestHarness::new().await.unwrap();
    harness.actions.set_priority(20, "low").await.unwrap();

    let err = harness.actions.set_priority(20, "garbo").await.unwrap_err();
    assert!(matches!(err, BridgeError::InvalidArgument(_)));
    assert_eq!(harness.state(20).await.unwrap().priority, Priority::Low);
    assert_eq!(harness.chatwoot.call_count("toggle_priority").await, 1);
}

#[tokio::test]
#[serial]
async fn escalation_hands_off_without_replying() {
    let harness = TestHarness::new().await.unwrap();
    harness
        .dify
        .push_response(AIResponse {
            reply_text: "Let me get someone.".into(),
            escalate: true,
            ..Default::default()
        })
        .await;

    let payload = payloads::message_created(7, 1, "I want to talk to a person");
    assert_eq!(post_webhook(&harness, &payload).await, StatusCode::OK);
    let dispositions = harness.drain().await.unwrap();

    assert_eq!(
        dispositions,
        vec![TaskDisposition::Completed("escalated(requested)".into())]
    );
    assert_eq!(harness.chatwoot.call_count("send_message").await, 0);
    assert_eq!(harness.chatwoot.call_count("assign_conversation").await, 1);
    let data = harness.chatwoot.conversation(7).await;
    assert!(data.labels.contains("needs-human"));
    assert_eq!(data.team_id, Some(1));
}

#[tokio::test]
#[serial]
async fn failed_labels_do_not_undo_the_reply() {
    let harness = TestHarness::new().await.unwrap();
    harness
        .chatwoot
        .fail_always("add_labels", Fault::Gateway(GatewayErrorKind::ServiceError))
        .await;
    harness
        .dify
        .push_response(AIResponse {
            reply_text: "Upgraded.".into(),
            suggested_labels: BTreeSet::from(["vip".to_string()]),
            ..Default::default()
        })
        .await;

    let payload = payloads::message_created(8, 1, "upgrade me");
    assert_eq!(post_webhook(&harness, &payload).await, StatusCode::OK);
    let dispositions = harness.drain().await.unwrap();

    assert_eq!(
        dispositions,
        vec![TaskDisposition::Dead("failed(partial: add_labels)".into())]
    );
    assert_eq!(
        harness.chatwoot.sent_messages(8).await,
        vec!["Upgraded.".to_string()]
    );
    let failures = harness.queue().recent_failures(5).await.unwrap();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].status, TaskStatus::Failed);
}

#[tokio::test]
#[serial]
async fn expired_lease_is_taken_over_and_the_stale_holder_is_refused() {
    let harness = TestHarness::new().await.unwrap();

    assert!(harness
        .storage
        .try_begin_ai_request(9, "stale", Duration::ZERO)
        .await
        .unwrap());
    tokio::time::sleep(Duration::from_millis(5)).await;

    // A new message takes over the expired lease and is answered.
    let payload = payloads::message_created(9, 1, "still there?");
    assert_eq!(post_webhook(&harness, &payload).await, StatusCode::OK);
    assert_eq!(
        harness.drain().await.unwrap(),
        vec![TaskDisposition::Completed("finalized".into())]
    );
    assert_eq!(harness.chatwoot.sent_messages(9).await.len(), 1);

    // The stale holder wakes up: its release and renewal are refused.
    let storage: Arc<dyn ConversationStore> = harness.storage.clone();
    assert!(!storage.complete_ai_request(9, "stale").await.unwrap());
    assert!(!storage
        .renew_ai_request(9, "stale", Duration::from_secs(60))
        .await
        .unwrap());

    // Direct takeover while someone else holds a fresh lease still works.
    assert!(storage
        .try_begin_ai_request(9, "short", Duration::ZERO)
        .await
        .unwrap());
    tokio::time::sleep(Duration::from_millis(5)).await;
    assert!(storage
        .try_begin_ai_request(9, "fresh", Duration::from_secs(60))
        .await
        .unwrap());
    assert!(!storage.complete_ai_request(9, "short").await.unwrap());
    assert_eq!(
        harness.state(9).await.unwrap().pending_ai_request_id.as_deref(),
        Some("fresh")
    );
    assert_eq!(harness.chatwoot.sent_messages(9).await.len(), 1);
}

#[tokio::test]
#[serial]
async fn task_of_a_crashed_worker_is_reclaimed_and_runs_once() {
    let harness = TestHarness::new().await.unwrap();
    let queue = harness.queue();

    let payload = payloads::message_created(11, 1, "hello");
    assert_eq!(post_webhook(&harness, &payload).await, StatusCode::OK);

    // A worker takes the task and dies without reporting back.
    let orphan = queue.dequeue(Duration::ZERO).await.unwrap().unwrap();
    assert_eq!(queue.stats().await.unwrap().processing, 1);
    tokio::time::sleep(Duration::from_millis(5)).await;

    assert_eq!(queue.reclaim_expired().await.unwrap(), 1);
    let record = queue.task(orphan.id).await.unwrap().unwrap();
    assert_eq!(record.status, TaskStatus::Pending);
    // The lost run is charged against the retry budget.
    assert_eq!(record.attempts, 1);

    assert_eq!(
        harness.drain().await.unwrap(),
        vec![TaskDisposition::Completed("finalized".into())]
    );
    assert_eq!(harness.chatwoot.sent_messages(11).await.len(), 1);
}

#[tokio::test]
#[serial]
async fn health_reflects_the_queue_after_a_failure() {
    let harness = TestHarness::builder()
        .with_config(|c| c.queue.max_attempts = 1)
        .build()
        .await
        .unwrap();
    harness
        .dify
        .push_failure(Fault::Gateway(GatewayErrorKind::ServiceError))
        .await;

    let payload = payloads::message_created(12, 1, "anyone?");
    assert_eq!(post_webhook(&harness, &payload).await, StatusCode::OK);
    let dispositions = harness.drain().await.unwrap();
    assert!(matches!(dispositions.as_slice(), [TaskDisposition::Dead(_)]));

    let response = app(&harness)
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["queue"]["failed"], 1);

    // The fallback escalation still hands the conversation to a human.
    assert_eq!(harness.chatwoot.call_count("assign_conversation").await, 1);
}
