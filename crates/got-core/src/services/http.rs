//! HTTP model clients

use super::json::extract_json;
use super::{ModelRequest, ModelService};
use crate::error::ServiceError;
use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde_json::{json, Value};
use std::time::Duration;

fn build_client(timeout: Duration) -> Result<Client, ServiceError> {
    Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| ServiceError::Http(e.to_string()))
}

async fn check_status(response: Response, provider: &str) -> Result<Value, ServiceError> {
    let status = response.status();
    if status == StatusCode::TOO_MANY_REQUESTS {
        return Err(ServiceError::RateLimited(provider.to_string()));
    }
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(ServiceError::status(status.as_u16(), &body));
    }
    Ok(response.json().await?)
}

fn require_key(key: &str, name: &str) -> Result<(), ServiceError> {
    if crate::config::is_placeholder(key) {
        return Err(ServiceError::MissingCredential(name.to_string()));
    }
    Ok(())
}

/// Google AI Studio `generateContent` client
pub struct GoogleAiStudioClient {
    client: Client,
    base: String,
    api_key: String,
}

impl GoogleAiStudioClient {
    /// Create a client
    ///
    /// # Errors
    /// Returns `ServiceError::Http` if the HTTP client cannot be built.
    pub fn new(base: impl Into<String>, api_key: impl Into<String>, timeout: Duration) -> Result<Self, ServiceError> {
        Ok(Self {
            client: build_client(timeout)?,
            base: base.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        })
    }

    fn body(request: &ModelRequest) -> Value {
        let mut parts = vec![json!({ "text": request.prompt })];
        parts.extend(request.attachments.iter().map(|a| {
            json!({ "fileData": { "mimeType": a.mime_type, "fileUri": a.uri } })
        }));
        json!({
            "contents": [{ "role": "user", "parts": parts }],
            "generationConfig": { "responseMimeType": "application/json" }
        })
    }

    fn response_text(body: &Value) -> Result<&str, ServiceError> {
        body["candidates"][0]["content"]["parts"][0]["text"]
            .as_str()
            .ok_or_else(|| ServiceError::Decode("response has no candidate text".to_string()))
    }
}

#[async_trait]
impl ModelService for GoogleAiStudioClient {
    #[tracing::instrument(skip_all, fields(agent = %request.agent, model = %request.model))]
    async fn generate(&self, request: ModelRequest) -> Result<Value, ServiceError> {
        require_key(&self.api_key, "GOOGLE_AI_STUDIO_KEY")?;
        let url = format!("{}/models/{}:generateContent", self.base, request.model);

        let response = self
            .client
            .post(url)
            .query(&[("key", self.api_key.as_str())])
            .json(&Self::body(&request))
            .send()
            .await?;
        let body = check_status(response, "Google AI Studio").await?;
        let value = extract_json(Self::response_text(&body)?)?;
        tracing::debug!("model response decoded");
        Ok(value)
    }
}

/// OpenRouter chat completions client
pub struct OpenRouterClient {
    client: Client,
    base: String,
    api_key: String,
}

impl OpenRouterClient {
    /// Create a client
    ///
    /// # Errors
    /// Returns `ServiceError::Http` if the HTTP client cannot be built.
    pub fn new(base: impl Into<String>, api_key: impl Into<String>, timeout: Duration) -> Result<Self, ServiceError> {
        Ok(Self {
            client: build_client(timeout)?,
            base: base.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        })
    }

    fn body(request: &ModelRequest) -> Value {
        let content = if request.attachments.is_empty() {
            json!(request.prompt)
        } else {
            let mut blocks = vec![json!({ "type": "text", "text": request.prompt })];
            blocks.extend(request.attachments.iter().map(|a| {
                json!({ "type": "image_url", "image_url": { "url": a.uri } })
            }));
            json!(blocks)
        };
        json!({
            "model": request.model,
            "messages": [{ "role": "user", "content": content }],
            "response_format": { "type": "json_object" }
        })
    }

    fn response_text(body: &Value) -> Result<&str, ServiceError> {
        body["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| ServiceError::Decode("response has no message content".to_string()))
    }
}

#[async_trait]
impl ModelService for OpenRouterClient {
    #[tracing::instrument(skip_all, fields(agent = %request.agent, model = %request.model))]
    async fn generate(&self, request: ModelRequest) -> Result<Value, ServiceError> {
        require_key(&self.api_key, "OPENROUTER_API_KEY")?;
        let url = format!("{}/chat/completions", self.base);

        let response = self
            .client
            .post(url)
            .bearer_auth(&self.api_key)
            .json(&Self::body(&request))
            .send()
            .await?;
        let body = check_status(response, "OpenRouter").await?;
        let value = extract_json(Self::response_text(&body)?)?;
        tracing::debug!("model response decoded");
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::{Attachment, ModelTask};
    use got_kernel::AgentKind;

    fn request() -> ModelRequest {
        ModelRequest {
            agent: AgentKind::SpeakerIdentification,
            task: ModelTask::FrameAnalysis,
            model: "gemini-1.5-pro".into(),
            prompt: "describe".into(),
            attachments: vec![Attachment::video("gs://bucket/talk.mp4")],
        }
    }

    #[test]
    fn google_body_carries_attachments() {
        let body = GoogleAiStudioClient::body(&request());
        assert_eq!(body["contents"][0]["parts"][0]["text"], "describe");
        assert_eq!(body["contents"][0]["parts"][1]["fileData"]["fileUri"], "gs://bucket/talk.mp4");
    }

    #[test]
    fn google_response_text_is_read_from_first_candidate() {
        let body = json!({"candidates": [{"content": {"parts": [{"text": "{\"ok\": true}"}]}}]});
        assert_eq!(GoogleAiStudioClient::response_text(&body).unwrap(), "{\"ok\": true}");
        assert!(GoogleAiStudioClient::response_text(&json!({})).is_err());
    }

    #[test]
    fn openrouter_plain_prompt_is_a_string() {
        let mut req = request();
        req.attachments.clear();
        let body = OpenRouterClient::body(&req);
        assert_eq!(body["messages"][0]["content"], "describe");
        assert_eq!(body["model"], "gemini-1.5-pro");
    }

    #[tokio::test]
    async fn placeholder_key_fails_before_sending() {
        let client = OpenRouterClient::new(
            "http://127.0.0.1:9",
            "your_openrouter_key_here",
            Duration::from_secs(1),
        )
        .unwrap();
        let err = client.generate(request()).await.unwrap_err();
        assert_eq!(err, ServiceError::MissingCredential("OPENROUTER_API_KEY".into()));
    }
}
