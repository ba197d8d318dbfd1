use anyhow::{Context, Result};
use async_trait::async_trait;
use index::ApiStatusError;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Anything that can turn a prompt into text
#[async_trait]
pub trait ChatModel: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String>;

    fn model_name(&self) -> &str;
}

pub const DEFAULT_CHAT_MODEL: &str = "gpt-3.5-turbo";
pub const SUPPORTED_MODELS: [&str; 2] = ["gpt-3.5-turbo", "gpt-4-turbo"];

pub fn is_supported_model(model: &str) -> bool {
    SUPPORTED_MODELS.contains(&model)
}

/// Client for an OpenAI-compatible `/chat/completions` endpoint
#[derive(Clone)]
pub struct ChatClient {
    base_url: String,
    api_key: String,
    model: String,
    temperature: Option<f32>,
    client: reqwest::Client,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

impl ChatClient {
    pub fn new(base_url: String, api_key: String, model: String) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            model,
            temperature: None,
            client: reqwest::Client::new(),
        }
    }

    /// Same connection settings, different model
    pub fn with_model(&self, model: &str) -> Self {
        Self {
            model: model.to_string(),
            ..self.clone()
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    fn request<'a>(&'a self, prompt: &'a str) -> ChatRequest<'a> {
        ChatRequest {
            model: &self.model,
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
            }],
            temperature: self.temperature,
        }
    }
}

#[async_trait]
impl ChatModel for ChatClient {
    async fn generate(&self, prompt: &str) -> Result<String> {
        let url = format!("{}/chat/completions", self.base_url);
        debug!(model = %self.model, prompt_chars = prompt.len(), "Sending chat completion");

        let response = self.client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&self.request(prompt))
            .send()
            .await
            .context("Failed to send chat completion request")?;

        if !response.status().is_success() {
            return Err(ApiStatusError::from_response("Chat completion", response).await.into());
        }

        let chat_response: ChatResponse = response
            .json()
            .await
            .context("Failed to parse chat completion response")?;

        first_content(chat_response)
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

fn first_content(response: ChatResponse) -> Result<String> {
    response
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.content)
        .context("Chat completion returned no content")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_is_a_single_user_message() {
        let client = ChatClient::new("https://api.openai.com/v1".into(), "k".into(), DEFAULT_CHAT_MODEL.into());
        let json = serde_json::to_value(client.request("hi")).unwrap();

        assert_eq!(
            json,
            serde_json::json!({
                "model": "gpt-3.5-turbo",
                "messages": [{"role": "user", "content": "hi"}]
            })
        );
    }

    #[test]
    fn test_temperature_is_sent_when_set() {
        let client = ChatClient::new("u".into(), "k".into(), "m".into()).with_temperature(0.5);
        let json = serde_json::to_value(client.request("hi")).unwrap();
        assert_eq!(json["temperature"], 0.5);
    }

    #[test]
    fn test_with_model_keeps_connection_settings() {
        let client = ChatClient::new("http://local/v1/".into(), "k".into(), DEFAULT_CHAT_MODEL.into());
        let gpt4 = client.with_model("gpt-4-turbo");

        assert_eq!(gpt4.model_name(), "gpt-4-turbo");
        assert_eq!(gpt4.base_url, "http://local/v1");
        assert_eq!(client.model_name(), "gpt-3.5-turbo");
    }

    #[test]
    fn test_first_choice_content() {
        let response: ChatResponse = serde_json::from_str(
            r#"{"id":"x","choices":[{"index":0,"message":{"role":"assistant","content":"Answer"},"finish_reason":"stop"}]}"#,
        )
        .unwrap();
        assert_eq!(first_content(response).unwrap(), "Answer");
    }

    #[test]
    fn test_missing_content_is_an_error() {
        let empty: ChatResponse = serde_json::from_str(r#"{"choices":[]}"#).unwrap();
        assert!(first_content(empty).is_err());

        let null: ChatResponse =
            serde_json::from_str(r#"{"choices":[{"message":{"role":"assistant","content":null}}]}"#).unwrap();
        assert!(first_content(null).is_err());
    }

    #[test]
    fn test_supported_models() {
        assert!(is_supported_model("gpt-4-turbo"));
        assert!(!is_supported_model("gpt-2"));
    }
}
