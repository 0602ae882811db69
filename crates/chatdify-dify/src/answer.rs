// SPDX-FileCopyrightText: 2026 Chatdify Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Interpretation of a Dify `answer` string.
//!
//! An app can answer in plain text, which becomes the reply as-is, or with a
//! JSON object carrying routing hints:
//!
//! ```json
//! {"reply": "...", "labels": ["billing"], "priority": "high",
//!  "custom_attributes": {"plan": "pro"}, "escalate": false}
//! ```
//!
//! A fenced ```` ```json ```` block is accepted too.

use chatdify_core::{AIResponse, BridgeError, GatewayErrorKind, Priority, Service};
use tracing::warn;

use crate::types::StructuredAnswer;

/// Parse an answer into an [`AIResponse`].
///
/// Empty answers, malformed JSON objects, and structured answers with neither
/// a reply nor an escalation are [`GatewayErrorKind::InvalidResponse`].
pub fn parse_answer(answer: &str) -> Result<AIResponse, BridgeError> {
    let trimmed = answer.trim();
    if trimmed.is_empty() {
        return Err(invalid("empty answer"));
    }

    let candidate = strip_fence(trimmed);
    if !candidate.starts_with('{') {
        return Ok(AIResponse {
            reply_text: trimmed.to_string(),
            ..AIResponse::default()
        });
    }

    let structured: StructuredAnswer = serde_json::from_str(candidate)
        .map_err(|e| invalid(&format!("answer looks like JSON but does not parse: {e}")))?;
    let reply_text = structured.reply.unwrap_or_default().trim().to_string();
    if reply_text.is_empty() && !structured.escalate {
        return Err(invalid("structured answer has no reply and no escalation"));
    }

    let suggested_priority = match structured.priority.as_deref() {
        None => None,
        Some(raw) => match Priority::parse(raw) {
            Ok(priority) => Some(priority),
            Err(_) => {
                warn!(priority = raw, "dropping unrecognized priority suggested by AI");
                None
            }
        },
    };

    Ok(AIResponse {
        reply_text,
        suggested_labels: structured
            .labels
            .into_iter()
            .map(|l| l.trim().to_string())
            .filter(|l| !l.is_empty())
            .collect(),
        suggested_priority,
        custom_attributes: structured
            .custom_attributes
            .into_iter()
            .map(|(k, v)| {
                let value = match v {
                    serde_json::Value::String(s) => s,
                    other => other.to_string(),
                };
                (k, value)
            })
            .collect(),
        escalate: structured.escalate,
        dify_conversation_id: None,
    })
}

fn strip_fence(text: &str) -> &str {
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

fn invalid(detail: &str) -> BridgeError {
    BridgeError::gateway(Service::Dify, GatewayErrorKind::InvalidResponse, detail)
}
