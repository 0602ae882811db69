// SPDX-FileCopyrightText: 2026 Chatdify Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Direct conversation actions: validation, policy, and cache write-through.

use std::collections::BTreeMap;

use chatdify_core::{
    Assignee, BridgeError, ConversationData, ConversationStatus, Priority, Team,
};
use chatdify_pipeline::AssignTarget;
use chatdify_test_utils::TestHarness;

#[tokio::test]
async fn unknown_priority_changes_nothing() {
    let harness = TestHarness::new().await.unwrap();

    let err = harness.actions.set_priority(40, "garbo").await.unwrap_err();

    assert!(matches!(err, BridgeError::InvalidArgument(_)));
    assert_eq!(harness.chatwoot.attempt_count("toggle_priority").await, 0);
    assert_eq!(harness.state(40).await.unwrap().priority, Priority::None);
}

#[tokio::test]
async fn known_priority_is_written_through() {
    let harness = TestHarness::new().await.unwrap();

    let priority = harness.actions.set_priority(41, "Urgent").await.unwrap();

    assert_eq!(priority, Priority::Urgent);
    assert_eq!(harness.chatwoot.conversation(41).await.priority, Some(Priority::Urgent));
    assert_eq!(harness.state(41).await.unwrap().priority, Priority::Urgent);
}

#[tokio::test]
async fn status_outside_policy_is_rejected_before_any_write() {
    let harness = TestHarness::new().await.unwrap();

    for raw in ["resolved", "snoozed", "archived"] {
        let err = harness.actions.set_status(42, raw).await.unwrap_err();
        assert!(matches!(err, BridgeError::PolicyRejected(_)), "{raw}: {err}");
    }
    assert_eq!(harness.chatwoot.attempt_count("update_conversation_status").await, 0);
    assert_eq!(harness.state(42).await.unwrap().status, ConversationStatus::Open);
}

#[tokio::test]
async fn allowed_status_follows_the_transition_table() {
    let harness = TestHarness::new().await.unwrap();

    let status = harness.actions.set_status(43, "pending").await.unwrap();
    assert_eq!(status, ConversationStatus::Pending);
    assert_eq!(harness.state(43).await.unwrap().status, ConversationStatus::Pending);

    // Resolved may only be left towards open.
    harness
        .chatwoot
        .set_conversation(ConversationData {
            id: 44,
            status: Some(ConversationStatus::Resolved),
            ..Default::default()
        })
        .await;
    let err = harness.actions.set_status(44, "pending").await.unwrap_err();
    assert!(matches!(err, BridgeError::PolicyRejected(_)));
    assert_eq!(harness.state(44).await.unwrap().status, ConversationStatus::Resolved);

    let status = harness.actions.set_status(44, "open").await.unwrap();
    assert_eq!(status, ConversationStatus::Open);
}

#[tokio::test]
async fn rejections_leave_a_private_note_when_enabled() {
    let harness = TestHarness::builder()
        .with_config(|c| c.policy.notify_on_rejection = true)
        .build()
        .await
        .unwrap();

    harness.actions.set_status(45, "resolved").await.unwrap_err();

    let notes = harness.chatwoot.private_notes(45).await;
    assert_eq!(notes.len(), 1);
    assert!(notes[0].starts_with("Automated change refused"));
    assert!(harness.chatwoot.sent_messages(45).await.is_empty());
}

#[tokio::test]
async fn assignment_needs_exactly_one_target() {
    let harness = TestHarness::new().await.unwrap();
    harness
        .chatwoot
        .set_teams(vec![Team {
            id: 6,
            name: "Escalations".into(),
        }])
        .await;

    let by_name = AssignTarget {
        team_name: Some("escalations".into()),
        ..Default::default()
    };
    assert_eq!(
        harness.actions.assign(46, &by_name).await.unwrap(),
        Assignee::Team(6)
    );

    let agent = AssignTarget {
        assignee_id: Some(12),
        ..Default::default()
    };
    assert_eq!(harness.actions.assign(46, &agent).await.unwrap(), Assignee::Agent(12));
    assert_eq!(harness.state(46).await.unwrap().assignee_id, Some(12));

    let both = AssignTarget {
        assignee_id: Some(12),
        team_id: Some(6),
        team_name: None,
    };
    assert!(matches!(
        harness.actions.assign(46, &both).await,
        Err(BridgeError::InvalidArgument(_))
    ));
    assert!(matches!(
        harness.actions.assign(46, &AssignTarget::default()).await,
        Err(BridgeError::InvalidArgument(_))
    ));

    let unknown = AssignTarget {
        team_name: Some("Nobody".into()),
        ..Default::default()
    };
    assert!(matches!(
        harness.actions.assign(46, &unknown).await,
        Err(BridgeError::InvalidArgument(_))
    ));
}

#[tokio::test]
async fn labels_and_attributes_validate_their_input() {
    let harness = TestHarness::new().await.unwrap();

    assert!(matches!(
        harness.actions.add_labels(47, &[]).await,
        Err(BridgeError::InvalidArgument(_))
    ));
    assert!(matches!(
        harness.actions.add_labels(47, &[" ".to_string()]).await,
        Err(BridgeError::InvalidArgument(_))
    ));
    assert!(matches!(
        harness
            .actions
            .update_custom_attributes(47, &BTreeMap::new())
            .await,
        Err(BridgeError::InvalidArgument(_))
    ));

    let added = harness
        .actions
        .add_labels(47, &["vip ".to_string(), "billing".to_string()])
        .await
        .unwrap();
    assert_eq!(added.len(), 2);
    assert!(harness.chatwoot.conversation(47).await.labels.contains("vip"));

    harness
        .actions
        .update_custom_attributes(47, &BTreeMap::from([("tier".to_string(), "gold".to_string())]))
        .await
        .unwrap();
    assert_eq!(
        harness.chatwoot.conversation(47).await.custom_attributes["tier"],
        serde_json::json!("gold")
    );
}

#[tokio::test]
async fn empty_message_is_refused() {
    let harness = TestHarness::new().await.unwrap();
    assert!(matches!(
        harness.actions.send_message(48, "  ", false).await,
        Err(BridgeError::InvalidArgument(_))
    ));
    harness.actions.send_message(48, "Following up", true).await.unwrap();
    assert_eq!(harness.chatwoot.private_notes(48).await, vec!["Following up".to_string()]);
}
