//! HTTP client for an OpenAI-compatible chat-completions endpoint.

use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

use crate::error::LlmError;
use crate::llm::LlmConfig;
use crate::llm::provider::{
    CompletionRequest, CompletionResponse, EndpointProbe, FinishReason, LlmProvider,
};

const PROBE_TIMEOUT: Duration = Duration::from_secs(3);
const DETECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Model id reported when the endpoint cannot be asked.
pub const UNKNOWN_MODEL_ID: &str = "unknown";

/// Client for the shared model endpoint.
///
/// The endpoint serves whichever model is loaded, so requests carry the id
/// the server reports for itself rather than a configured name.
pub struct LlmClient {
    base_url: String,
    api_key: SecretString,
    request_timeout: Duration,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct ModelList {
    #[serde(default)]
    data: Vec<ModelEntry>,
}

#[derive(Debug, Deserialize)]
struct ModelEntry {
    id: String,
}

#[derive(Debug, Deserialize)]
struct ChatCompletion {
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct Usage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
}

impl LlmClient {
    pub fn new(config: &LlmConfig) -> Self {
        Self {
            base_url: config.base_url.clone(),
            api_key: config.api_key.clone(),
            request_timeout: config.request_timeout,
            client: reqwest::Client::new(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    /// Id of the currently loaded model, or [`UNKNOWN_MODEL_ID`].
    pub async fn detect_model_id(&self) -> String {
        match self.fetch_model_id().await {
            Ok(Some(id)) => id,
            Ok(None) => UNKNOWN_MODEL_ID.to_string(),
            Err(e) => {
                tracing::debug!(error = %e, "Model id detection failed");
                UNKNOWN_MODEL_ID.to_string()
            }
        }
    }

    async fn fetch_model_id(&self) -> Result<Option<String>, LlmError> {
        let endpoint = self.url("models");
        let resp = self
            .client
            .get(&endpoint)
            .bearer_auth(self.api_key.expose_secret())
            .timeout(DETECT_TIMEOUT)
            .send()
            .await
            .map_err(|e| LlmError::RequestFailed {
                endpoint: endpoint.clone(),
                reason: e.to_string(),
            })?;

        if !resp.status().is_success() {
            return Err(LlmError::HttpStatus {
                endpoint,
                status: resp.status().as_u16(),
                body: resp.text().await.unwrap_or_default(),
            });
        }

        let list: ModelList = resp.json().await.map_err(|e| LlmError::InvalidResponse {
            endpoint,
            reason: e.to_string(),
        })?;
        Ok(list.data.into_iter().next().map(|m| m.id))
    }
}

#[async_trait]
impl LlmProvider for LlmClient {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let model = self.detect_model_id().await;
        let endpoint = self.url("chat/completions");

        let mut body = serde_json::json!({
            "model": model,
            "messages": request.messages,
        });
        if let Some(temperature) = request.temperature {
            body["temperature"] = serde_json::json!(temperature);
        }
        if let Some(max_tokens) = request.max_tokens {
            body["max_tokens"] = serde_json::json!(max_tokens);
        }

        let resp = self
            .client
            .post(&endpoint)
            .bearer_auth(self.api_key.expose_secret())
            .timeout(self.request_timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| LlmError::RequestFailed {
                endpoint: endpoint.clone(),
                reason: e.to_string(),
            })?;

        let status = resp.status();
        if !status.is_success() {
            return Err(LlmError::HttpStatus {
                endpoint,
                status: status.as_u16(),
                body: resp.text().await.unwrap_or_default(),
            });
        }

        let text = resp.text().await.map_err(|e| LlmError::RequestFailed {
            endpoint: endpoint.clone(),
            reason: e.to_string(),
        })?;
        let completion: ChatCompletion = serde_json::from_str(&text)?;
        parse_completion(&endpoint, completion)
    }
}

fn parse_completion(
    endpoint: &str,
    completion: ChatCompletion,
) -> Result<CompletionResponse, LlmError> {
    let usage = completion.usage.unwrap_or_default();
    let choice = completion
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| LlmError::InvalidResponse {
            endpoint: endpoint.to_string(),
            reason: "response has no choices".into(),
        })?;

    tracing::debug!(
        input_tokens = usage.prompt_tokens,
        output_tokens = usage.completion_tokens,
        "LLM completion"
    );

    Ok(CompletionResponse {
        content: choice.message.content.unwrap_or_default(),
        input_tokens: usage.prompt_tokens,
        output_tokens: usage.completion_tokens,
        finish_reason: FinishReason::from_api(choice.finish_reason.as_deref()),
    })
}

#[async_trait]
impl EndpointProbe for LlmClient {
    async fn is_available(&self) -> bool {
        self.client
            .get(self.url("models"))
            .bearer_auth(self.api_key.expose_secret())
            .timeout(PROBE_TIMEOUT)
            .send()
            .await
            .map(|r| r.status().is_success())
            .unwrap_or(false)
    }
}
