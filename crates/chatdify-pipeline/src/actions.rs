// SPDX-FileCopyrightText: 2026 Chatdify Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Direct conversation actions for operators and AI tools.
//!
//! Every action validates its raw input before any side effect, and the
//! conversation cache is written only after Chatwoot accepted the change.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chatdify_core::{
    is_allowed_transition, Assignee, BridgeError, ConversationGateway, ConversationId,
    ConversationStatus, ConversationStore, Priority, StatusPolicy,
};
use tracing::{info, warn};

use crate::teams::TeamDirectory;

/// Assignment target as received from a caller. Exactly one field is set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AssignTarget {
    pub assignee_id: Option<i64>,
    pub team_id: Option<i64>,
    pub team_name: Option<String>,
}

pub struct ActionService {
    gateway: Arc<dyn ConversationGateway>,
    store: Arc<dyn ConversationStore>,
    teams: Arc<TeamDirectory>,
    policy: StatusPolicy,
    notify_on_rejection: bool,
}

impl ActionService {
    pub fn new(
        gateway: Arc<dyn ConversationGateway>,
        store: Arc<dyn ConversationStore>,
        teams: Arc<TeamDirectory>,
        policy: StatusPolicy,
        notify_on_rejection: bool,
    ) -> Self {
        Self {
            gateway,
            store,
            teams,
            policy,
            notify_on_rejection,
        }
    }

    pub async fn send_message(
        &self,
        conversation_id: ConversationId,
        content: &str,
        private: bool,
    ) -> Result<(), BridgeError> {
        if content.trim().is_empty() {
            return Err(BridgeError::InvalidArgument("message content must not be empty".into()));
        }
        self.gateway.send_message(conversation_id, content, private).await
    }

    /// Set the conversation status from a raw string.
    ///
    /// The status must be known, permitted by policy, and reachable from the
    /// current Chatwoot status through the transition table.
    pub async fn set_status(
        &self,
        conversation_id: ConversationId,
        raw: &str,
    ) -> Result<ConversationStatus, BridgeError> {
        let status = match self.policy.resolve(raw) {
            Ok(status) => status,
            Err(e) => {
                warn!(conversation_id, requested = raw, error = %e, "status change refused");
                self.notify_rejection(conversation_id, &e).await;
                return Err(e);
            }
        };

        let current = self.current_status(conversation_id).await?;
        if current == status {
            return Ok(status);
        }
        if !is_allowed_transition(current, status) {
            let e = BridgeError::PolicyRejected(format!(
                "transition {current} -> {status} is not allowed"
            ));
            warn!(conversation_id, error = %e, "status change refused");
            self.notify_rejection(conversation_id, &e).await;
            return Err(e);
        }

        self.gateway
            .update_conversation_status(conversation_id, status)
            .await?;
        if !self.store.update_status(conversation_id, status).await? {
            // The cache moved underneath us; Chatwoot already has the new value.
            self.store.reconcile_status(conversation_id, status).await?;
        }
        info!(conversation_id, from = %current, to = %status, "status changed");
        Ok(status)
    }

    /// Set the priority from a raw string. Unknown values change nothing.
    pub async fn set_priority(
        &self,
        conversation_id: ConversationId,
        raw: &str,
    ) -> Result<Priority, BridgeError> {
        let priority = match Priority::parse(raw) {
            Ok(priority) => priority,
            Err(e) => {
                warn!(conversation_id, requested = raw, "priority change refused");
                self.notify_rejection(conversation_id, &e).await;
                return Err(e);
            }
        };
        self.gateway.toggle_priority(conversation_id, priority).await?;
        self.store.update_priority(conversation_id, priority).await?;
        info!(conversation_id, %priority, "priority changed");
        Ok(priority)
    }

    pub async fn add_labels(
        &self,
        conversation_id: ConversationId,
        labels: &[String],
    ) -> Result<BTreeSet<String>, BridgeError> {
        if labels.is_empty() || labels.iter().any(|l| l.trim().is_empty()) {
            return Err(BridgeError::InvalidArgument(
                "labels must be a non-empty list of non-empty strings".into(),
            ));
        }
        let labels: BTreeSet<String> = labels.iter().map(|l| l.trim().to_string()).collect();
        self.gateway.add_labels(conversation_id, &labels).await?;
        Ok(labels)
    }

    pub async fn update_custom_attributes(
        &self,
        conversation_id: ConversationId,
        attributes: &BTreeMap<String, String>,
    ) -> Result<(), BridgeError> {
        if attributes.is_empty() {
            return Err(BridgeError::InvalidArgument("no custom attributes given".into()));
        }
        self.gateway
            .update_custom_attributes(conversation_id, attributes)
            .await
    }

    pub async fn assign(
        &self,
        conversation_id: ConversationId,
        target: &AssignTarget,
    ) -> Result<Assignee, BridgeError> {
        let assignee = match (target.assignee_id, target.team_id, target.team_name.as_deref()) {
            (Some(agent_id), None, None) => Assignee::Agent(agent_id),
            (None, Some(team_id), None) => Assignee::Team(team_id),
            (None, None, Some(name)) if !name.trim().is_empty() => {
                let team_id = self.teams.resolve(name).await?.ok_or_else(|| {
                    BridgeError::InvalidArgument(format!("no team named `{name}`"))
                })?;
                Assignee::Team(team_id)
            }
            _ => {
                return Err(BridgeError::InvalidArgument(
                    "give exactly one of assignee_id, team_id, team_name".into(),
                ));
            }
        };
        self.gateway
            .assign_conversation(conversation_id, assignee)
            .await?;
        if let Assignee::Agent(agent_id) = assignee {
            self.store.set_assignee(conversation_id, Some(agent_id)).await?;
        }
        info!(conversation_id, %assignee, "conversation assigned");
        Ok(assignee)
    }

    /// Chatwoot's view of the status, written back to the cache.
    async fn current_status(
        &self,
        conversation_id: ConversationId,
    ) -> Result<ConversationStatus, BridgeError> {
        let cached = self.store.get_or_create(conversation_id).await?.status;
        let live = self.gateway.get_conversation_data(conversation_id).await?.status;
        match live {
            Some(status) if status != cached => {
                self.store.reconcile_status(conversation_id, status).await?;
                Ok(status)
            }
            Some(status) => Ok(status),
            None => Ok(cached),
        }
    }

    async fn notify_rejection(&self, conversation_id: ConversationId, error: &BridgeError) {
        if !self.notify_on_rejection {
            return;
        }
        let note = format!("Automated change refused: {error}");
        if let Err(e) = self.gateway.send_message(conversation_id, &note, true).await {
            warn!(conversation_id, error = %e, "could not post rejection note");
        }
    }
}
