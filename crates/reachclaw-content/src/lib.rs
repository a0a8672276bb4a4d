//! Content generation against any OpenAI-compatible chat endpoint.
//!
//! Generation is advisory: a failure here never blocks the outreach queue,
//! the operator just writes the text themselves. Errors are therefore all
//! `ReachClawError::Content` and the gateway reports them as such.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use reachclaw_core::config::ContentConfig;
use reachclaw_core::error::{ReachClawError, Result};
use reachclaw_core::traits::{ContentProvider, GeneratedContent};

pub struct OpenAiContentProvider {
    client: reqwest::Client,
    cfg: ContentConfig,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Deserialize)]
struct ChatResponseMessage {
    content: String,
}

/// Pull `#hashtag` tokens out of generated text, keeping their order and
/// dropping duplicates.
fn extract_hashtags(text: &str) -> Vec<String> {
    let mut seen = Vec::new();
    for word in text.split_whitespace() {
        let tag: String = word
            .chars()
            .take_while(|c| c.is_alphanumeric() || *c == '#' || *c == '_')
            .collect();
        if tag.len() > 1 && tag.starts_with('#') && !seen.contains(&tag) {
            seen.push(tag);
        }
    }
    seen
}

impl OpenAiContentProvider {
    pub fn new(cfg: ContentConfig) -> Result<Self> {
        if cfg.endpoint.trim().is_empty() {
            return Err(ReachClawError::Config(
                "content endpoint is not configured".into(),
            ));
        }
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(cfg.timeout_secs))
            .build()
            .map_err(|e| ReachClawError::Config(format!("http client: {e}")))?;
        Ok(Self { client, cfg })
    }

    async fn chat(&self, system: &str, user: &str) -> Result<String> {
        let request = ChatRequest {
            model: &self.cfg.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: system,
                },
                ChatMessage {
                    role: "user",
                    content: user,
                },
            ],
            temperature: self.cfg.temperature,
        };
        let url = format!(
            "{}/chat/completions",
            self.cfg.endpoint.trim_end_matches('/')
        );
        let resp = self
            .client
            .post(url)
            .bearer_auth(&self.cfg.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| ReachClawError::Content(format!("content endpoint unreachable: {e}")))?;
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(ReachClawError::Content(format!(
                "content endpoint returned {status}: {}",
                body.trim()
            )));
        }
        let parsed: ChatResponse = resp
            .json()
            .await
            .map_err(|e| ReachClawError::Content(format!("malformed completion: {e}")))?;
        let text = parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content.trim().to_string())
            .unwrap_or_default();
        if text.is_empty() {
            return Err(ReachClawError::Content("empty completion".into()));
        }
        Ok(text)
    }
}

#[async_trait]
impl ContentProvider for OpenAiContentProvider {
    async fn generate_post(&self, topic: &str, tone: &str, length: &str) -> Result<GeneratedContent> {
        let system = "You write social network posts for a professional audience. \
                      Respond with the post text only, including 3-5 relevant hashtags \
                      at the end. No preamble, no quotation marks.";
        let user = format!("Write a {length} post in a {tone} tone about: {topic}");
        let content = self.chat(system, &user).await?;
        let hashtags = extract_hashtags(&content);
        tracing::debug!("✍️ Generated post ({} chars, {} tags)", content.len(), hashtags.len());
        Ok(GeneratedContent { content, hashtags })
    }

    async fn generate_comment(&self, post_content: &str, tone: &str) -> Result<GeneratedContent> {
        let system = "You write short, substantive comments on professional social \
                      network posts. One or two sentences, no hashtags, no preamble.";
        let user = format!("Write a {tone} comment replying to this post:\n\n{post_content}");
        let content = self.chat(system, &user).await?;
        Ok(GeneratedContent {
            content,
            hashtags: Vec::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_hashtags() {
        let text = "Shipped our Rust rewrite today. #rust #performance #rust #dev_tools!";
        assert_eq!(extract_hashtags(text), vec!["#rust", "#performance", "#dev_tools"]);
        assert!(extract_hashtags("no tags here").is_empty());
        // a bare '#' is not a tag
        assert!(extract_hashtags("issue # 42").is_empty());
    }

    #[test]
    fn test_new_requires_endpoint() {
        let cfg = ContentConfig {
            endpoint: String::new(),
            ..Default::default()
        };
        assert!(matches!(
            OpenAiContentProvider::new(cfg),
            Err(ReachClawError::Config(_))
        ));
    }
}
