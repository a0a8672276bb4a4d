//! HTTP client for the platform automation bridge.
//!
//! The bridge is a separate service that drives the actual social platform
//! (browser session, official API, whatever the deployment uses) and exposes
//! a small JSON API. This client's job is transport plus honest outcome
//! classification, so the engine can tell "try again later" from "give up".

use async_trait::async_trait;
use chrono::{Duration, Utc};
use reqwest::StatusCode;
use serde::Deserialize;

use reachclaw_core::config::PlatformConfig;
use reachclaw_core::error::{ReachClawError, Result};
use reachclaw_core::traits::{ConnectionState, PlatformClient};

pub struct HttpPlatformClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

#[derive(Deserialize)]
struct StateResponse {
    state: String,
}

#[derive(Deserialize)]
struct PublishResponse {
    post_id: String,
}

/// Map a bridge response status to the engine's retry semantics.
///
/// 429 carries a Retry-After in seconds. 408 and 5xx are transient. Any
/// other non-success status means the action itself is bad (profile gone,
/// malformed content) and retrying cannot help.
fn classify(status: StatusCode, retry_after_secs: Option<i64>, body: &str) -> ReachClawError {
    if status == StatusCode::TOO_MANY_REQUESTS {
        let secs = retry_after_secs.unwrap_or(60).max(1);
        return ReachClawError::RateLimited {
            retry_after: Utc::now() + Duration::seconds(secs),
        };
    }
    let detail = if body.trim().is_empty() {
        status.to_string()
    } else {
        format!("{status}: {}", body.trim())
    };
    if status == StatusCode::REQUEST_TIMEOUT || status.is_server_error() {
        ReachClawError::Transient(format!("bridge error {detail}"))
    } else {
        ReachClawError::Permanent(format!("bridge rejected action: {detail}"))
    }
}

fn transport(e: reqwest::Error) -> ReachClawError {
    ReachClawError::Transient(format!("bridge unreachable: {e}"))
}

impl HttpPlatformClient {
    pub fn new(cfg: &PlatformConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(cfg.timeout_secs))
            .build()
            .map_err(|e| ReachClawError::Config(format!("http client: {e}")))?;
        Ok(Self {
            client,
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            api_key: cfg.api_key.clone(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    /// POST a JSON action and classify the outcome.
    async fn post_action(&self, path: &str, payload: serde_json::Value) -> Result<reqwest::Response> {
        let resp = self
            .client
            .post(self.url(path))
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .await
            .map_err(transport)?;
        if resp.status().is_success() {
            return Ok(resp);
        }
        let status = resp.status();
        let retry_after = resp
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<i64>().ok());
        let body = resp.text().await.unwrap_or_default();
        Err(classify(status, retry_after, &body))
    }
}

#[async_trait]
impl PlatformClient for HttpPlatformClient {
    async fn connection_state(&self, profile_url: &str) -> Result<ConnectionState> {
        let resp = self
            .client
            .get(self.url("/api/connections/state"))
            .bearer_auth(&self.api_key)
            .query(&[("profile_url", profile_url)])
            .send()
            .await
            .map_err(transport)?;
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(classify(status, None, &body));
        }
        let state: StateResponse = resp.json().await.map_err(transport)?;
        match state.state.as_str() {
            "connected" => Ok(ConnectionState::Connected),
            "request_pending" => Ok(ConnectionState::RequestPending),
            "not_connected" => Ok(ConnectionState::NotConnected),
            other => Err(ReachClawError::Permanent(format!(
                "bridge returned unknown connection state '{other}'"
            ))),
        }
    }

    async fn send_connection_request(&self, profile_url: &str, note: Option<&str>) -> Result<()> {
        self.post_action(
            "/api/connections",
            serde_json::json!({ "profile_url": profile_url, "note": note }),
        )
        .await
        .map(|_| ())
    }

    async fn like_post(&self, post_url: &str) -> Result<()> {
        self.post_action("/api/posts/like", serde_json::json!({ "post_url": post_url }))
            .await
            .map(|_| ())
    }

    async fn comment_on_post(&self, post_url: &str, text: &str) -> Result<()> {
        self.post_action(
            "/api/posts/comment",
            serde_json::json!({ "post_url": post_url, "text": text }),
        )
        .await
        .map(|_| ())
    }

    async fn follow_profile(&self, profile_url: &str) -> Result<()> {
        self.post_action(
            "/api/profiles/follow",
            serde_json::json!({ "profile_url": profile_url }),
        )
        .await
        .map(|_| ())
    }

    async fn send_message(&self, profile_url: &str, text: &str) -> Result<()> {
        self.post_action(
            "/api/messages",
            serde_json::json!({ "profile_url": profile_url, "text": text }),
        )
        .await
        .map(|_| ())
    }

    async fn share_post(&self, post_url: &str, commentary: Option<&str>) -> Result<()> {
        self.post_action(
            "/api/posts/share",
            serde_json::json!({ "post_url": post_url, "commentary": commentary }),
        )
        .await
        .map(|_| ())
    }

    async fn publish_post(&self, title: &str, body: &str, hashtags: &[String]) -> Result<String> {
        let resp = self
            .post_action(
                "/api/posts",
                serde_json::json!({ "title": title, "body": body, "hashtags": hashtags }),
            )
            .await?;
        let parsed: PublishResponse = resp.json().await.map_err(transport)?;
        Ok(parsed.post_id)
    }
}
