// SPDX-FileCopyrightText: 2026 Chatdify Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Request and response types for the Dify chat-messages API.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Body of `POST /chat-messages`.
#[derive(Debug, Clone, Serialize)]
pub struct ChatRequest {
    /// App input variables. Dify expects string values.
    pub inputs: BTreeMap<String, String>,
    pub query: String,
    pub user: String,
    pub response_mode: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
}

/// Blocking-mode response of `POST /chat-messages`.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatResponse {
    #[serde(default)]
    pub event: Option<String>,
    #[serde(default)]
    pub message_id: Option<String>,
    #[serde(default)]
    pub conversation_id: Option<String>,
    #[serde(default)]
    pub answer: String,
    #[serde(default)]
    pub created_at: Option<i64>,
}

/// Body of `DELETE /conversations/{id}`.
#[derive(Debug, Clone, Serialize)]
pub struct DeleteConversationRequest<'a> {
    pub user: &'a str,
}

/// Structured answer an app may return instead of plain text.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StructuredAnswer {
    #[serde(default)]
    pub reply: Option<String>,
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default)]
    pub priority: Option<String>,
    #[serde(default)]
    pub custom_attributes: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub escalate: bool,
}

/// Error body returned by Dify on 4xx/5xx.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiErrorResponse {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conversation_id_omitted_when_unknown() {
        let req = ChatRequest {
            inputs: BTreeMap::new(),
            query: "hi".into(),
            user: "u".into(),
            response_mode: "blocking".into(),
            conversation_id: None,
        };
        let json = serde_json::to_value(&req).unwrap();
        assert!(json.get("conversation_id").is_none());
        assert_eq!(json["response_mode"], "blocking");
    }

    #[test]
    fn response_ignores_unknown_fields() {
        let resp: ChatResponse = serde_json::from_str(
            r#"{"event":"message","task_id":"t","id":"m","message_id":"m","conversation_id":"c","mode":"chat","answer":"ok","metadata":{},"created_at":1}"#,
        )
        .unwrap();
        assert_eq!(resp.answer, "ok");
        assert_eq!(resp.conversation_id.as_deref(), Some("c"));
    }
}
