// SPDX-FileCopyrightText: 2026 Chatdify Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Conversion of raw Chatwoot webhook payloads into [`InboundEvent`]s.
//!
//! Normalization is a pure function of the payload and the pipeline
//! configuration. Rejections are reported, never raised: the front door
//! acknowledges every delivery so the platform does not disable the hook.

use std::collections::BTreeSet;

use chatdify_config::model::PipelineConfig;
use chatdify_core::{ConversationId, ConversationStatus, EventType, InboundEvent, MessageDirection};
use chrono::{DateTime, Utc};
use serde_json::Value;
use sha2::{Digest, Sha256};
use strum::Display;

/// Why a payload did not become an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum RejectReason {
    /// Required fields are missing or have the wrong shape.
    Malformed,
    /// Event kind or message kind the bridge does not act on.
    Uninterested,
    /// Sent by a bot or carrying an ignored prefix; answering would loop.
    BotLoop,
    /// Private agent note.
    PrivateNote,
    /// Outgoing message while outgoing processing is off.
    Outgoing,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    pub reason: RejectReason,
    pub detail: String,
}

impl Rejection {
    fn new(reason: RejectReason, detail: impl Into<String>) -> Self {
        Self {
            reason,
            detail: detail.into(),
        }
    }
}

impl std::fmt::Display for Rejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.reason, self.detail)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Normalized {
    Accepted(InboundEvent),
    Rejected(Rejection),
}

/// Turns webhook payloads into canonical events.
#[derive(Debug, Clone)]
pub struct EventNormalizer {
    ignored_sender_types: BTreeSet<String>,
    ignored_content_prefixes: Vec<String>,
    process_outgoing: bool,
    accepted_events: BTreeSet<String>,
}

impl EventNormalizer {
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            ignored_sender_types: config
                .ignored_sender_types
                .iter()
                .map(|s| s.to_ascii_lowercase())
                .collect(),
            ignored_content_prefixes: config
                .ignored_content_prefixes
                .iter()
                .filter(|p| !p.is_empty())
                .cloned()
                .collect(),
            process_outgoing: config.process_outgoing,
            accepted_events: config.accepted_events.iter().cloned().collect(),
        }
    }

    /// Normalize a payload received now.
    pub fn normalize(&self, raw: &Value) -> Normalized {
        self.normalize_at(raw, Utc::now())
    }

    pub fn normalize_at(&self, raw: &Value, received_at: DateTime<Utc>) -> Normalized {
        match self.try_normalize(raw, received_at) {
            Ok(event) => Normalized::Accepted(event),
            Err(rejection) => Normalized::Rejected(rejection),
        }
    }

    fn try_normalize(&self, raw: &Value, received_at: DateTime<Utc>) -> Result<InboundEvent, Rejection> {
        let Some(object) = raw.as_object() else {
            return Err(Rejection::new(RejectReason::Malformed, "payload is not a JSON object"));
        };
        let event = object
            .get("event")
            .and_then(Value::as_str)
            .filter(|e| !e.is_empty())
            .ok_or_else(|| Rejection::new(RejectReason::Malformed, "missing event type"))?;

        match event {
            "message_created" => self.message_event(raw, received_at),
            "conversation_status_changed" => {
                let conversation_id = conversation_id(raw, false)?;
                let status = status_of(raw);
                if status.is_none() {
                    return Err(Rejection::new(
                        RejectReason::Malformed,
                        "status change without a recognizable status",
                    ));
                }
                Ok(InboundEvent {
                    event_id: format!("{event}:{}", payload_digest(raw)),
                    conversation_id,
                    message_text: String::new(),
                    event_type: EventType::ConversationStatusChanged,
                    received_at,
                    source_event: event.to_string(),
                    direction: None,
                    conversation_status: status,
                })
            }
            other if self.accepted_events.contains(other) => {
                let conversation_id = conversation_id(raw, false)?;
                Ok(InboundEvent {
                    event_id: format!("{other}:{}", payload_digest(raw)),
                    conversation_id,
                    message_text: String::new(),
                    event_type: EventType::Other,
                    received_at,
                    source_event: other.to_string(),
                    direction: None,
                    conversation_status: status_of(raw),
                })
            }
            other => Err(Rejection::new(
                RejectReason::Uninterested,
                format!("event `{other}` is not accepted"),
            )),
        }
    }

    fn message_event(&self, raw: &Value, received_at: DateTime<Utc>) -> Result<InboundEvent, Rejection> {
        let message_id = raw
            .get("id")
            .and_then(as_id)
            .ok_or_else(|| Rejection::new(RejectReason::Malformed, "message without id"))?;
        let conversation_id = conversation_id(raw, true)?;

        let direction = match raw.get("message_type") {
            Some(Value::String(kind)) if kind == "incoming" => MessageDirection::Incoming,
            Some(Value::String(kind)) if kind == "outgoing" => MessageDirection::Outgoing,
            Some(Value::Number(n)) if n.as_i64() == Some(0) => MessageDirection::Incoming,
            Some(Value::Number(n)) if n.as_i64() == Some(1) => MessageDirection::Outgoing,
            Some(other) => {
                return Err(Rejection::new(
                    RejectReason::Uninterested,
                    format!("message type {other} is not a conversation message"),
                ));
            }
            None => return Err(Rejection::new(RejectReason::Malformed, "message without type")),
        };

        if raw.get("private").and_then(Value::as_bool).unwrap_or(false) {
            return Err(Rejection::new(RejectReason::PrivateNote, "private note"));
        }

        let sender_type = raw
            .pointer("/sender/type")
            .and_then(Value::as_str)
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();
        if self.ignored_sender_types.contains(&sender_type) {
            return Err(Rejection::new(
                RejectReason::BotLoop,
                format!("sender type `{sender_type}` is ignored"),
            ));
        }

        let content = raw
            .get("content")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .trim();
        if let Some(prefix) = self
            .ignored_content_prefixes
            .iter()
            .find(|p| content.starts_with(p.as_str()))
        {
            return Err(Rejection::new(
                RejectReason::BotLoop,
                format!("content starts with ignored prefix `{prefix}`"),
            ));
        }

        if direction == MessageDirection::Outgoing && !self.process_outgoing {
            return Err(Rejection::new(RejectReason::Outgoing, "outgoing message"));
        }
        if content.is_empty() {
            return Err(Rejection::new(RejectReason::Uninterested, "message has no text"));
        }

        Ok(InboundEvent {
            event_id: format!("message:{message_id}"),
            conversation_id,
            message_text: content.to_string(),
            event_type: EventType::MessageCreated,
            received_at,
            source_event: "message_created".to_string(),
            direction: Some(direction),
            conversation_status: raw
                .get("conversation")
                .and_then(status_of),
        })
    }
}

/// Message payloads nest the conversation; conversation payloads are the
/// conversation itself.
fn conversation_id(raw: &Value, nested: bool) -> Result<ConversationId, Rejection> {
    let found = if nested {
        raw.pointer("/conversation/id").and_then(as_id)
    } else {
        raw.get("id")
            .and_then(as_id)
            .or_else(|| raw.pointer("/conversation/id").and_then(as_id))
    };
    found
        .filter(|id| *id > 0)
        .ok_or_else(|| Rejection::new(RejectReason::Malformed, "missing conversation id"))
}

fn as_id(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn status_of(value: &Value) -> Option<ConversationStatus> {
    value
        .get("status")
        .and_then(Value::as_str)
        .and_then(|s| ConversationStatus::parse(s).ok())
}

/// Stable identifier for payloads that carry no event id of their own, so a
/// redelivered webhook maps to the same event.
fn payload_digest(raw: &Value) -> String {
    let digest = Sha256::digest(raw.to_string().as_bytes());
    hex::encode(&digest[..16])
}
