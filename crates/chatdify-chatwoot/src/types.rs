// SPDX-FileCopyrightText: 2026 Chatdify Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Wire types for the Chatwoot application API.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

/// Body of `POST .../conversations/{id}/messages`.
#[derive(Debug, Clone, Serialize)]
pub struct CreateMessageRequest<'a> {
    pub content: &'a str,
    pub message_type: &'static str,
    pub private: bool,
}

/// Body of `POST .../toggle_status`.
#[derive(Debug, Clone, Serialize)]
pub struct ToggleStatusRequest<'a> {
    pub status: &'a str,
}

/// Body of `POST .../toggle_priority`. `None` clears the priority.
#[derive(Debug, Clone, Serialize)]
pub struct TogglePriorityRequest<'a> {
    pub priority: Option<&'a str>,
}

/// Body of `POST .../labels`. The endpoint replaces the full label list.
#[derive(Debug, Clone, Serialize)]
pub struct LabelsRequest<'a> {
    pub labels: &'a BTreeSet<String>,
}

/// Body of `POST .../custom_attributes`. The endpoint replaces the full map.
#[derive(Debug, Clone, Serialize)]
pub struct CustomAttributesRequest<'a> {
    pub custom_attributes: &'a BTreeMap<String, serde_json::Value>,
}

/// Body of `POST .../assignments`.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum AssignmentRequest {
    Agent { assignee_id: i64 },
    Team { team_id: i64 },
}

/// `{"payload": [...]}` envelope used by list endpoints.
#[derive(Debug, Clone, Deserialize)]
pub struct Payload<T> {
    #[serde(default = "Vec::new")]
    pub payload: Vec<T>,
}

/// Subset of the conversation resource the bridge reads.
#[derive(Debug, Clone, Deserialize)]
pub struct ConversationResource {
    pub id: i64,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub priority: Option<String>,
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default)]
    pub custom_attributes: Option<BTreeMap<String, serde_json::Value>>,
    #[serde(default)]
    pub meta: ConversationMeta,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConversationMeta {
    #[serde(default)]
    pub assignee: Option<IdRef>,
    #[serde(default)]
    pub team: Option<IdRef>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IdRef {
    pub id: i64,
}

/// Message as listed by `GET .../messages`.
///
/// `message_type` is numeric on this endpoint: 0 incoming, 1 outgoing,
/// 2 activity, 3 template.
#[derive(Debug, Clone, Deserialize)]
pub struct MessageResource {
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub message_type: i64,
    #[serde(default)]
    pub private: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TeamResource {
    pub id: i64,
    pub name: String,
}
