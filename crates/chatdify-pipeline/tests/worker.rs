// SPDX-FileCopyrightText: 2026 Chatdify Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Task execution: retries, deferral, time limits, and the worker pool.

use std::sync::Arc;
use std::time::Duration;

use chatdify_core::{ConversationStore, GatewayErrorKind, TaskQueue, TaskStatus};
use chatdify_pipeline::{SubmitOutcome, TaskDisposition, WorkerPool};
use chatdify_test_utils::{payloads, Fault, TestHarness};
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn transient_ai_failure_is_retried() {
    let harness = TestHarness::new().await.unwrap();
    harness
        .dify
        .push_failure(Fault::Gateway(GatewayErrorKind::Timeout))
        .await;

    let dispositions = harness
        .deliver(payloads::message_created(30, 1, "hello"))
        .await
        .unwrap();

    assert_eq!(
        dispositions,
        vec![
            TaskDisposition::Retrying {
                attempts: 1,
                delay: Duration::ZERO
            },
            TaskDisposition::Completed("finalized".into()),
        ]
    );
    assert_eq!(harness.chatwoot.call_count("send_message").await, 1);
    // The failed attempt released its lease.
    assert!(harness.state(30).await.unwrap().pending_ai_request_id.is_none());
}

#[tokio::test]
async fn exhausted_retries_hand_the_conversation_to_humans() {
    let harness = TestHarness::new().await.unwrap();
    for _ in 0..3 {
        harness
            .dify
            .push_failure(Fault::Gateway(GatewayErrorKind::ServiceError))
            .await;
    }

    let dispositions = harness
        .deliver(payloads::message_created(31, 2, "anyone?"))
        .await
        .unwrap();

    assert_eq!(dispositions.len(), 3);
    assert!(matches!(dispositions[2], TaskDisposition::Dead(_)));
    assert_eq!(harness.chatwoot.call_count("send_message").await, 0);
    let data = harness.chatwoot.conversation(31).await;
    assert_eq!(data.team_id, Some(1));
    assert!(data.labels.contains(&harness.config.pipeline.escalation_label));
    assert!(harness.storage.was_processed(31, "message:2").await.unwrap());

    let failures = harness.queue().recent_failures(10).await.unwrap();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].status, TaskStatus::Failed);
    assert_eq!(failures[0].attempts, 3);
}

#[tokio::test]
async fn deleted_conversation_is_skipped_without_escalation() {
    let harness = TestHarness::new().await.unwrap();
    harness
        .chatwoot
        .fail_always("get_conversation_data", Fault::Gateway(GatewayErrorKind::NotFound))
        .await;

    let dispositions = harness
        .deliver(payloads::message_created(32, 3, "hello"))
        .await
        .unwrap();

    assert_eq!(dispositions.len(), 1);
    assert!(matches!(dispositions[0], TaskDisposition::Dead(_)));
    assert_eq!(harness.chatwoot.attempt_count("get_conversation_data").await, 1);
    assert_eq!(harness.chatwoot.call_count("assign_conversation").await, 0);
    assert!(harness.storage.was_processed(32, "message:3").await.unwrap());
}

#[tokio::test]
async fn lease_conflict_defers_then_gives_up() {
    let harness = TestHarness::builder()
        .with_config(|c| c.queue.max_deferrals = 2)
        .build()
        .await
        .unwrap();
    harness
        .storage
        .try_begin_ai_request(33, "stuck-run", Duration::from_secs(600))
        .await
        .unwrap();

    let dispositions = harness
        .deliver(payloads::message_created(33, 4, "hello"))
        .await
        .unwrap();

    assert_eq!(dispositions[..2], [TaskDisposition::Deferred, TaskDisposition::Deferred]);
    assert!(matches!(dispositions[2], TaskDisposition::Dead(_)));
    assert_eq!(harness.dify.request_count().await, 0);
    assert_eq!(harness.chatwoot.call_count("assign_conversation").await, 1);
}

#[tokio::test]
async fn hard_time_limit_aborts_the_run() {
    let harness = TestHarness::builder()
        .with_config(|c| {
            c.queue.time_limit_secs = 1;
            c.queue.soft_time_limit_secs = 0;
            c.queue.max_attempts = 1;
        })
        .build()
        .await
        .unwrap();
    harness.dify.set_delay(Duration::from_secs(3)).await;

    let dispositions = harness
        .deliver(payloads::message_created(34, 5, "slow"))
        .await
        .unwrap();

    assert_eq!(dispositions.len(), 1);
    match &dispositions[0] {
        TaskDisposition::Dead(reason) => assert!(reason.contains("timed out"), "{reason}"),
        other => panic!("expected a dead task, got {other:?}"),
    }
    assert_eq!(harness.chatwoot.call_count("send_message").await, 0);
}

#[tokio::test]
async fn deleting_a_conversation_drops_its_dify_memory() {
    let harness = TestHarness::new().await.unwrap();
    harness
        .deliver(payloads::message_created(35, 6, "hi"))
        .await
        .unwrap();
    assert_eq!(
        harness.state(35).await.unwrap().dify_conversation_id.as_deref(),
        Some("dify-35")
    );

    let dispositions = harness
        .deliver(payloads::conversation_deleted(35))
        .await
        .unwrap();

    assert!(dispositions.contains(&TaskDisposition::Completed("done".into())));
    assert_eq!(harness.dify.deleted().await, vec!["dify-35".to_string()]);
    assert!(harness.state(35).await.unwrap().dify_conversation_id.is_none());
}

#[tokio::test]
async fn pool_never_runs_two_completions_for_one_conversation() {
    let harness = TestHarness::builder()
        .with_config(|c| {
            c.queue.concurrency = 4;
            c.queue.lease_conflict_delay_ms = 20;
            c.queue.max_deferrals = 500;
        })
        .build()
        .await
        .unwrap();
    harness.dify.set_delay(Duration::from_millis(50)).await;

    for message_id in 1..=5 {
        let outcome = harness
            .submit(payloads::message_created(36, message_id, &format!("message {message_id}")))
            .await
            .unwrap();
        assert!(matches!(outcome, SubmitOutcome::Enqueued(_)));
    }

    let cancel = CancellationToken::new();
    let pool = WorkerPool::new(harness.executor.clone());
    let pool_cancel = cancel.clone();
    let running = tokio::spawn(async move { pool.run(pool_cancel).await });

    let queue: Arc<dyn TaskQueue> = harness.queue();
    let deadline = tokio::time::Instant::now() + Duration::from_secs(20);
    loop {
        let stats = queue.stats().await.unwrap();
        if stats.completed == 5 {
            break;
        }
        assert!(tokio::time::Instant::now() < deadline, "queue did not drain: {stats:?}");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    cancel.cancel();
    running.await.unwrap();

    assert_eq!(harness.dify.max_concurrent(36).await, 1);
    for message_id in 1..=5 {
        assert!(harness
            .storage
            .was_processed(36, &format!("message:{message_id}"))
            .await
            .unwrap());
    }
    let sends = harness.chatwoot.call_count("send_message").await;
    assert!((1..=5).contains(&sends), "{sends} replies");
}
