use anyhow::{Context, Result, anyhow};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::time::{Duration, sleep};
use tracing::debug;

pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatMessage {
    pub role: String,
    pub content: Value,
}

impl ChatMessage {
    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: "system".into(),
            content: Value::String(text.into()),
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: "user".into(),
            content: Value::String(text.into()),
        }
    }

    /// User turn carrying a prompt and one image reference.
    pub fn user_with_image(text: impl Into<String>, image_url: impl Into<String>) -> Self {
        Self {
            role: "user".into(),
            content: json!([
                { "type": "text", "text": text.into() },
                { "type": "image_url", "image_url": { "url": image_url.into() } }
            ]),
        }
    }
}

/// Client for OpenAI-compatible `/v1/chat/completions` endpoints.
#[derive(Clone)]
pub struct ChatClient {
    http: Client,
    api_key: Option<String>,
    base: String,
    max_attempts: u32,
}

impl ChatClient {
    pub fn new(api_key: Option<String>, base: Option<String>) -> Result<Self> {
        let http = Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(600))
            .build()
            .context("failed to build http client")?;
        Ok(Self {
            http,
            api_key,
            base: base
                .map(|b| b.trim_end_matches('/').to_string())
                .unwrap_or_else(|| "https://api.openai.com".into()),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        })
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    async fn post_json(&self, path: &str, body: &Value) -> reqwest::Result<reqwest::Response> {
        let mut request = self.http.post(format!("{}/v1{}", self.base, path)).json(body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }
        request.send().await
    }

    /// Returns the first choice's message text.
    pub async fn complete(&self, model: &str, messages: &[ChatMessage]) -> Result<String> {
        let body = json!({
            "model": model,
            "messages": messages,
        });

        let mut delay = Duration::from_millis(300);
        for attempt in 0..self.max_attempts {
            let resp = self
                .post_json("/chat/completions", &body)
                .await
                .context("network error calling chat completions")?;
            let status = resp.status();

            if status.is_success() {
                let v: Value = resp
                    .json()
                    .await
                    .context("invalid chat completions response")?;
                return extract_message(&v)
                    .ok_or_else(|| anyhow!("chat completion has no message content"));
            }

            let retryable = status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error();
            if retryable && attempt + 1 < self.max_attempts {
                debug!(%status, attempt, "retrying chat completion");
                sleep(delay).await;
                delay = Duration::from_millis((delay.as_millis() as f64 * 1.8) as u64)
                    + Duration::from_millis(fastrand::u64(0..250));
                continue;
            }

            let err_txt = resp.text().await.unwrap_or_default();
            anyhow::bail!("chat completion error {}: {}", status, err_txt);
        }
        anyhow::bail!("retries exhausted")
    }
}

fn extract_message(root: &Value) -> Option<String> {
    let content = root
        .get("choices")?
        .as_array()?
        .first()?
        .get("message")?
        .get("content")?;
    let text = match content {
        Value::String(text) => Some(text.trim().to_string()),
        // some servers return content parts
        Value::Array(parts) => {
            let text = parts
                .iter()
                .filter_map(|part| part.get("text").and_then(Value::as_str))
                .collect::<Vec<_>>()
                .join("");
            Some(text.trim().to_string())
        }
        _ => None,
    };
    text.filter(|text| !text.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_string_and_part_content() {
        let v = json!({"choices": [{"message": {"role": "assistant", "content": " hi "}}]});
        assert_eq!(extract_message(&v).as_deref(), Some("hi"));

        let v = json!({"choices": [{"message": {"content": [{"type": "text", "text": "a"}, {"type": "text", "text": "b"}]}}]});
        assert_eq!(extract_message(&v).as_deref(), Some("ab"));

        assert_eq!(extract_message(&json!({"choices": []})), None);
    }

    #[test]
    fn image_messages_use_content_parts() {
        let message = ChatMessage::user_with_image("describe", "data:image/png;base64,AA==");
        assert_eq!(message.content[1]["image_url"]["url"], "data:image/png;base64,AA==");
    }
}
