// SPDX-FileCopyrightText: 2026 Chatdify Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! HTTP client for the Chatwoot application API.
//!
//! Provides [`ChatwootClient`] which handles authentication, account-scoped
//! URL construction, and translation of HTTP failures into [`BridgeError`].
//! The client is single-shot: retry decisions belong to the caller.

use std::time::Duration;

use chatdify_config::model::HttpConfig;
use chatdify_core::{BridgeError, GatewayErrorKind, Service};
use reqwest::header::{HeaderMap, HeaderValue};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

/// HTTP client scoped to one Chatwoot account.
#[derive(Debug, Clone)]
pub struct ChatwootClient {
    client: reqwest::Client,
    account_url: String,
}

impl ChatwootClient {
    /// Creates a client for `{api_url}/api/v1/accounts/{account_id}`.
    ///
    /// `api_url` may be given with or without the `/api/v1` suffix.
    pub fn new(
        api_url: &str,
        api_key: &str,
        account_id: u64,
        http: &HttpConfig,
    ) -> Result<Self, BridgeError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            "api_access_token",
            HeaderValue::from_str(api_key)
                .map_err(|e| BridgeError::Config(format!("invalid Chatwoot API key header value: {e}")))?,
        );
        headers.insert("content-type", HeaderValue::from_static("application/json"));

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .connect_timeout(Duration::from_secs(http.connect_timeout_secs))
            .timeout(Duration::from_secs(http.request_timeout_secs))
            .build()
            .map_err(|e| BridgeError::Config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            account_url: account_url(api_url, account_id),
        })
    }

    /// Account-scoped base URL every path is appended to.
    pub fn account_url(&self) -> &str {
        &self.account_url
    }

    /// GET `{account_url}{path}` and decode the JSON body.
    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, BridgeError> {
        let url = format!("{}{path}", self.account_url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(transport_error)?;
        decode(response).await
    }

    /// POST a JSON body to `{account_url}{path}`, discarding the response body.
    pub async fn post<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<(), BridgeError> {
        let url = format!("{}{path}", self.account_url);
        let response = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(transport_error)?;
        let status = response.status();
        debug!(status = %status, path, "chatwoot response received");
        if status.is_success() {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        Err(BridgeError::from_http_status(Service::Chatwoot, status.as_u16(), &body))
    }
}

fn account_url(api_url: &str, account_id: u64) -> String {
    let root = api_url.trim_end_matches('/');
    let root = root.strip_suffix("/api/v1").unwrap_or(root);
    format!("{root}/api/v1/accounts/{account_id}")
}

async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, BridgeError> {
    let status = response.status();
    debug!(status = %status, url = %response.url(), "chatwoot response received");
    let body = response.text().await.map_err(transport_error)?;
    if !status.is_success() {
        return Err(BridgeError::from_http_status(Service::Chatwoot, status.as_u16(), &body));
    }
    serde_json::from_str(&body).map_err(|e| BridgeError::Gateway {
        service: Service::Chatwoot,
        kind: GatewayErrorKind::InvalidResponse,
        message: format!("failed to parse Chatwoot response: {e}"),
        source: Some(Box::new(e)),
    })
}

/// Map a reqwest transport failure into the gateway taxonomy.
fn transport_error(e: reqwest::Error) -> BridgeError {
    let kind = if e.is_timeout() {
        GatewayErrorKind::Timeout
    } else {
        GatewayErrorKind::ServiceError
    };
    BridgeError::Gateway {
        service: Service::Chatwoot,
        kind,
        message: format!("HTTP request failed: {e}"),
        source: Some(Box::new(e)),
    }
}
