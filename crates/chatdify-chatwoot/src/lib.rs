// SPDX-FileCopyrightText: 2026 Chatdify Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Chatwoot gateway for the chatdify bridge.
//!
//! This crate implements [`ConversationGateway`] against the Chatwoot
//! application API. Each mutation is a separate, independently retryable
//! call; ordering between them is the pipeline's concern.

pub mod client;
pub mod types;

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use chatdify_config::model::ChatdifyConfig;
use chatdify_config::{resolve_secret, CHATWOOT_API_KEY_ENV};
use chatdify_core::{
    AdapterType, Assignee, BridgeError, ContextMessage, ConversationData, ConversationGateway,
    ConversationId, ConversationStatus, HealthStatus, MessageDirection, PluginAdapter, Priority,
    StatusPolicy, Team,
};
use tracing::{debug, info, warn};

use crate::client::ChatwootClient;
use crate::types::{
    AssignmentRequest, ConversationResource, CreateMessageRequest, CustomAttributesRequest,
    LabelsRequest, MessageResource, Payload, TeamResource, TogglePriorityRequest,
    ToggleStatusRequest,
};

/// Chatwoot gateway implementing [`ConversationGateway`].
///
/// Status writes are checked against the configured [`StatusPolicy`] before
/// any request leaves the process.
/// API key resolution order: config -> `CHATWOOT_API_KEY` env var -> error.
pub struct ChatwootGateway {
    client: ChatwootClient,
    policy: StatusPolicy,
}

impl ChatwootGateway {
    /// Creates a gateway from the loaded configuration.
    pub fn new(config: &ChatdifyConfig) -> Result<Self, BridgeError> {
        let api_key = resolve_secret(config.chatwoot.api_key.as_deref(), CHATWOOT_API_KEY_ENV)
            .ok_or_else(|| {
                BridgeError::Config(format!(
                    "Chatwoot API key not found: set chatwoot.api_key or {CHATWOOT_API_KEY_ENV}"
                ))
            })?;
        let client = ChatwootClient::new(
            &config.chatwoot.api_url,
            &api_key,
            config.chatwoot.account_id,
            &config.http,
        )?;
        info!(account_url = client.account_url(), "Chatwoot gateway initialized");
        Ok(Self::with_client(client, config.policy.status_policy()))
    }

    /// Creates a gateway over an existing client.
    pub fn with_client(client: ChatwootClient, policy: StatusPolicy) -> Self {
        Self { client, policy }
    }

    async fn current_labels(
        &self,
        conversation_id: ConversationId,
    ) -> Result<BTreeSet<String>, BridgeError> {
        let labels: Payload<String> = self
            .client
            .get(&format!("/conversations/{conversation_id}/labels"))
            .await?;
        Ok(labels.payload.into_iter().collect())
    }

    async fn conversation(
        &self,
        conversation_id: ConversationId,
    ) -> Result<ConversationResource, BridgeError> {
        self.client
            .get(&format!("/conversations/{conversation_id}"))
            .await
    }
}

#[async_trait]
impl PluginAdapter for ChatwootGateway {
    fn name(&self) -> &str {
        "chatwoot"
    }

    fn version(&self) -> semver::Version {
        semver::Version::new(0, 1, 0)
    }

    fn adapter_type(&self) -> AdapterType {
        AdapterType::Conversation
    }

    async fn health_check(&self) -> Result<HealthStatus, BridgeError> {
        match self.get_teams().await {
            Ok(_) => Ok(HealthStatus::Healthy),
            Err(e) => Ok(HealthStatus::Degraded(e.to_string())),
        }
    }

    async fn shutdown(&self) -> Result<(), BridgeError> {
        debug!("Chatwoot gateway shutting down");
        Ok(())
    }
}

#[async_trait]
impl ConversationGateway for ChatwootGateway {
    async fn send_message(
        &self,
        conversation_id: ConversationId,
        message: &str,
        private: bool,
    ) -> Result<(), BridgeError> {
        if message.trim().is_empty() {
            return Err(BridgeError::InvalidArgument(
                "message content must not be empty".into(),
            ));
        }
        let body = CreateMessageRequest {
            content: message,
            message_type: "outgoing",
            private,
        };
        self.client
            .post(&format!("/conversations/{conversation_id}/messages"), &body)
            .await?;
        debug!(conversation_id, private, "message posted");
        Ok(())
    }

    async fn update_conversation_status(
        &self,
        conversation_id: ConversationId,
        status: ConversationStatus,
    ) -> Result<(), BridgeError> {
        if let Err(e) = self.policy.check(status) {
            warn!(conversation_id, %status, "status write refused by policy");
            return Err(e);
        }
        let status_name = status.to_string();
        let body = ToggleStatusRequest {
            status: &status_name,
        };
        self.client
            .post(&format!("/conversations/{conversation_id}/toggle_status"), &body)
            .await?;
        debug!(conversation_id, %status, "status updated");
        Ok(())
    }

    async fn add_labels(
        &self,
        conversation_id: ConversationId,
        labels: &BTreeSet<String>,
    ) -> Result<(), BridgeError> {
        let wanted: BTreeSet<String> = labels
            .iter()
            .map(|l| l.trim().to_string())
            .filter(|l| !l.is_empty())
            .collect();
        if wanted.is_empty() {
            return Ok(());
        }

        // The labels endpoint replaces the whole list, so post the union.
        let existing = self.current_labels(conversation_id).await?;
        if wanted.is_subset(&existing) {
            debug!(conversation_id, "labels already present");
            return Ok(());
        }
        let merged: BTreeSet<String> = existing.union(&wanted).cloned().collect();
        self.client
            .post(
                &format!("/conversations/{conversation_id}/labels"),
                &LabelsRequest { labels: &merged },
            )
            .await?;
        debug!(conversation_id, count = merged.len(), "labels updated");
        Ok(())
    }

    async fn assign_conversation(
        &self,
        conversation_id: ConversationId,
        assignee: Assignee,
    ) -> Result<(), BridgeError> {
        let body = match assignee {
            Assignee::Agent(assignee_id) => AssignmentRequest::Agent { assignee_id },
            Assignee::Team(team_id) => AssignmentRequest::Team { team_id },
        };
        self.client
            .post(&format!("/conversations/{conversation_id}/assignments"), &body)
            .await?;
        debug!(conversation_id, %assignee, "conversation assigned");
        Ok(())
    }

    async fn update_custom_attributes(
        &self,
        conversation_id: ConversationId,
        attributes: &BTreeMap<String, String>,
    ) -> Result<(), BridgeError> {
        if attributes.is_empty() {
            return Ok(());
        }
        if attributes.keys().any(|k| k.trim().is_empty()) {
            return Err(BridgeError::InvalidArgument(
                "custom attribute keys must not be empty".into(),
            ));
        }

        let mut merged = self
            .conversation(conversation_id)
            .await?
            .custom_attributes
            .unwrap_or_default();
        for (key, value) in attributes {
            merged.insert(key.clone(), serde_json::Value::String(value.clone()));
        }
        self.client
            .post(
                &format!("/conversations/{conversation_id}/custom_attributes"),
                &CustomAttributesRequest {
                    custom_attributes: &merged,
                },
            )
            .await?;
        debug!(conversation_id, keys = attributes.len(), "custom attributes merged");
        Ok(())
    }

    async fn toggle_priority(
        &self,
        conversation_id: ConversationId,
        priority: Priority,
    ) -> Result<(), BridgeError> {
        let name = priority.to_string();
        let body = TogglePriorityRequest {
            priority: (priority != Priority::None).then_some(name.as_str()),
        };
        self.client
            .post(&format!("/conversations/{conversation_id}/toggle_priority"), &body)
            .await?;
        debug!(conversation_id, %priority, "priority updated");
        Ok(())
    }

    async fn get_conversation_data(
        &self,
        conversation_id: ConversationId,
    ) -> Result<ConversationData, BridgeError> {
        let conv = self.conversation(conversation_id).await?;
        Ok(conversation_data(conv))
    }

    async fn list_messages(
        &self,
        conversation_id: ConversationId,
        limit: usize,
    ) -> Result<Vec<ContextMessage>, BridgeError> {
        let messages: Payload<MessageResource> = self
            .client
            .get(&format!("/conversations/{conversation_id}/messages"))
            .await?;
        Ok(recent_public_messages(messages.payload, limit))
    }

    async fn get_teams(&self) -> Result<Vec<Team>, BridgeError> {
        let teams: Vec<TeamResource> = self.client.get("/teams").await?;
        Ok(teams
            .into_iter()
            .map(|t| Team {
                id: t.id,
                name: t.name,
            })
            .collect())
    }
}

fn conversation_data(conv: ConversationResource) -> ConversationData {
    let status = conv.status.as_deref().and_then(|raw| match ConversationStatus::parse(raw) {
        Ok(status) => Some(status),
        Err(_) => {
            warn!(conversation_id = conv.id, status = raw, "unrecognized status from Chatwoot");
            None
        }
    });
    let priority = match conv.priority.as_deref() {
        None => Some(Priority::None),
        Some(raw) => Priority::parse(raw).ok(),
    };
    ConversationData {
        id: conv.id,
        status,
        priority,
        labels: conv.labels.into_iter().collect(),
        custom_attributes: conv.custom_attributes.unwrap_or_default(),
        assignee_id: conv.meta.assignee.map(|a| a.id),
        team_id: conv.meta.team.map(|t| t.id),
    }
}

/// Keep customer and agent messages with content, drop notes and activity,
/// and return at most `limit` of the newest, oldest first.
fn recent_public_messages(messages: Vec<MessageResource>, limit: usize) -> Vec<ContextMessage> {
    let public: Vec<ContextMessage> = messages
        .into_iter()
        .filter(|m| !m.private)
        .filter_map(|m| {
            let direction = match m.message_type {
                0 => MessageDirection::Incoming,
                1 => MessageDirection::Outgoing,
                _ => return None,
            };
            let content = m.content?.trim().to_string();
            (!content.is_empty()).then_some(ContextMessage { direction, content })
        })
        .collect();
    let skip = public.len().saturating_sub(limit);
    public.into_iter().skip(skip).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chatdify_config::model::HttpConfig;
    use chatdify_core::GatewayErrorKind;
    use serde_json::json;
    use serial_test::serial;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn gateway(server: &MockServer, allowed: &[ConversationStatus]) -> ChatwootGateway {
        let client = ChatwootClient::new(&server.uri(), "cw-token", 1, &HttpConfig::default()).unwrap();
        ChatwootGateway::with_client(client, StatusPolicy::new(allowed.iter().copied()))
    }

    const CONV: &str = "/api/v1/accounts/1/conversations/20";

    #[tokio::test]
    async fn send_message_posts_outgoing_message() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(format!("{CONV}/messages")))
            .and(body_json(json!({"content": "hello", "message_type": "outgoing", "private": false})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": 1})))
            .expect(1)
            .mount(&server)
            .await;

        let gw = gateway(&server, &[ConversationStatus::Open]);
        gw.send_message(20, "hello", false).await.unwrap();
    }

    #[tokio::test]
    async fn empty_message_is_rejected_without_request() {
        let server = MockServer::start().await;
        let gw = gateway(&server, &[ConversationStatus::Open]);
        let err = gw.send_message(20, "   ", false).await.unwrap_err();
        assert!(matches!(err, BridgeError::InvalidArgument(_)));
        assert!(server.received_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn status_outside_policy_is_rejected_before_any_request() {
        let server = MockServer::start().await;
        let gw = gateway(&server, &[ConversationStatus::Open, ConversationStatus::Pending]);

        let err = gw
            .update_conversation_status(20, ConversationStatus::Resolved)
            .await
            .unwrap_err();
        assert!(matches!(err, BridgeError::PolicyRejected(_)));
        assert!(server.received_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn allowed_status_is_posted() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(format!("{CONV}/toggle_status")))
            .and(body_json(json!({"status": "pending"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .expect(1)
            .mount(&server)
            .await;

        let gw = gateway(&server, &[ConversationStatus::Open, ConversationStatus::Pending]);
        gw.update_conversation_status(20, ConversationStatus::Pending)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn add_labels_posts_union_with_existing() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(format!("{CONV}/labels")))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"payload": ["billing"]})))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path(format!("{CONV}/labels")))
            .and(body_json(json!({"labels": ["billing", "needs-human"]})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"payload": []})))
            .expect(1)
            .mount(&server)
            .await;

        let gw = gateway(&server, &[ConversationStatus::Open]);
        let labels: BTreeSet<String> = ["needs-human".to_string()].into();
        gw.add_labels(20, &labels).await.unwrap();
    }

    #[tokio::test]
    async fn add_labels_skips_post_when_nothing_new() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(format!("{CONV}/labels")))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"payload": ["vip"]})))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path(format!("{CONV}/labels")))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let gw = gateway(&server, &[ConversationStatus::Open]);
        gw.add_labels(20, &["vip".to_string()].into()).await.unwrap();
    }

    #[tokio::test]
    async fn custom_attributes_are_merged() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(CONV))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": 20,
                "status": "open",
                "custom_attributes": {"plan": "pro", "region": "eu"}
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path(format!("{CONV}/custom_attributes")))
            .and(body_json(json!({"custom_attributes": {"plan": "enterprise", "region": "eu"}})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .expect(1)
            .mount(&server)
            .await;

        let gw = gateway(&server, &[ConversationStatus::Open]);
        let attrs = BTreeMap::from([("plan".to_string(), "enterprise".to_string())]);
        gw.update_custom_attributes(20, &attrs).await.unwrap();
    }

    #[tokio::test]
    async fn priority_none_is_sent_as_null() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(format!("{CONV}/toggle_priority")))
            .and(body_json(json!({"priority": null})))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path(format!("{CONV}/toggle_priority")))
            .and(body_json(json!({"priority": "urgent"})))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let gw = gateway(&server, &[ConversationStatus::Open]);
        gw.toggle_priority(20, Priority::None).await.unwrap();
        gw.toggle_priority(20, Priority::Urgent).await.unwrap();
    }

    #[tokio::test]
    async fn assignment_to_team() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(format!("{CONV}/assignments")))
            .and(body_json(json!({"team_id": 4})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .expect(1)
            .mount(&server)
            .await;

        let gw = gateway(&server, &[ConversationStatus::Open]);
        gw.assign_conversation(20, Assignee::Team(4)).await.unwrap();
    }

    #[tokio::test]
    async fn conversation_data_maps_meta() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(CONV))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": 20,
                "status": "pending",
                "priority": "high",
                "labels": ["billing"],
                "meta": {"assignee": {"id": 7}, "team": null}
            })))
            .mount(&server)
            .await;

        let gw = gateway(&server, &[ConversationStatus::Open]);
        let data = gw.get_conversation_data(20).await.unwrap();
        assert_eq!(data.status, Some(ConversationStatus::Pending));
        assert_eq!(data.priority, Some(Priority::High));
        assert!(data.labels.contains("billing"));
        assert_eq!(data.assignee_id, Some(7));
        assert_eq!(data.team_id, None);
    }

    #[tokio::test]
    async fn deleted_conversation_is_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(CONV))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let gw = gateway(&server, &[ConversationStatus::Open]);
        let err = gw.get_conversation_data(20).await.unwrap_err();
        assert_eq!(err.gateway_kind(), Some(GatewayErrorKind::NotFound));
    }

    #[tokio::test]
    async fn unauthorized_key_is_terminal() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/accounts/1/teams"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let gw = gateway(&server, &[ConversationStatus::Open]);
        let err = gw.get_teams().await.unwrap_err();
        assert_eq!(err.gateway_kind(), Some(GatewayErrorKind::Unauthorized));
        assert!(!err.is_retryable());
        assert!(matches!(
            gw.health_check().await.unwrap(),
            HealthStatus::Degraded(_)
        ));
    }

    #[test]
    fn history_keeps_newest_public_messages() {
        let msg = |content: &str, message_type, private| MessageResource {
            content: Some(content.to_string()),
            message_type,
            private,
        };
        let history = recent_public_messages(
            vec![
                msg("first", 0, false),
                msg("note", 1, true),
                msg("assigned", 2, false),
                msg("reply", 1, false),
                msg("second", 0, false),
            ],
            2,
        );
        assert_eq!(
            history,
            vec![
                ContextMessage {
                    direction: MessageDirection::Outgoing,
                    content: "reply".into()
                },
                ContextMessage {
                    direction: MessageDirection::Incoming,
                    content: "second".into()
                },
            ]
        );
    }

    #[test]
    fn gateway_accepts_configured_api_key() {
        let mut config = ChatdifyConfig::default();
        config.chatwoot.api_key = Some("cw".into());
        assert!(ChatwootGateway::new(&config).is_ok());
    }

    #[test]
    #[serial]
    fn gateway_without_api_key_is_a_config_error() {
        // SAFETY: test-only env mutation, serialized with other env tests.
        unsafe { std::env::remove_var(CHATWOOT_API_KEY_ENV) };
        let mut config = ChatdifyConfig::default();
        config.chatwoot.api_key = None;
        assert!(matches!(
            ChatwootGateway::new(&config),
            Err(BridgeError::Config(_))
        ));

        config.chatwoot.api_key = Some("   ".into());
        assert!(matches!(
            ChatwootGateway::new(&config),
            Err(BridgeError::Config(_))
        ));
    }
}
