use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use serde_json::json;

use crate::settings::{Backend, Settings};

use super::prompt::{completion_prompt, user_message, SYSTEM_MESSAGE};
use super::ClassifyError;

/// Sends one article to a completion endpoint and returns the raw model output.
pub trait CompletionBackend {
    fn model(&self) -> &str;
    async fn complete(&self, title: &str, text: &str) -> Result<String, ClassifyError>;
}

pub struct OllamaBackend {
    client: reqwest::Client,
    url: String,
    model: String,
    temperature: f64,
}

#[derive(Deserialize)]
struct OllamaResponse {
    response: String,
}

impl OllamaBackend {
    pub fn new(settings: &Settings) -> Self {
        OllamaBackend {
            client: reqwest::Client::new(),
            url: settings.ollama_server.clone(),
            model: settings.ollama_model.clone(),
            temperature: settings.temperature,
        }
    }
}

impl CompletionBackend for OllamaBackend {
    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(&self, title: &str, text: &str) -> Result<String, ClassifyError> {
        let body = ollama_body(&self.model, &completion_prompt(title, text), self.temperature);
        let response = self.client.post(&self.url).json(&body).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ClassifyError::Status {
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            });
        }
        let parsed: OllamaResponse = response.json().await?;
        Ok(parsed.response)
    }
}

/// Non-streaming `/api/generate` request.
fn ollama_body(model: &str, prompt: &str, temperature: f64) -> serde_json::Value {
    json!({
        "model": model,
        "prompt": prompt,
        "stream": false,
        "options": { "temperature": temperature },
    })
}

pub struct AzureOpenAiBackend {
    client: reqwest::Client,
    url: String,
    api_key: String,
    deployment: String,
    temperature: f64,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

impl AzureOpenAiBackend {
    pub fn new(settings: &Settings) -> Result<Self> {
        let endpoint = settings
            .azure_endpoint
            .as_deref()
            .context("NEWSCAT_AZURE_ENDPOINT (or AZURE_OPENAI_ENDPOINT) must be set")?;
        let api_key = settings
            .azure_api_key
            .clone()
            .context("NEWSCAT_AZURE_API_KEY (or AZURE_OPENAI_API_KEY) must be set")?;
        Ok(AzureOpenAiBackend {
            client: reqwest::Client::new(),
            url: format!(
                "{}/openai/deployments/{}/chat/completions?api-version={}",
                endpoint.trim_end_matches('/'),
                settings.azure_deployment,
                settings.azure_api_version
            ),
            api_key,
            deployment: settings.azure_deployment.clone(),
            temperature: settings.temperature,
        })
    }
}

impl CompletionBackend for AzureOpenAiBackend {
    fn model(&self) -> &str {
        &self.deployment
    }

    async fn complete(&self, title: &str, text: &str) -> Result<String, ClassifyError> {
        let body = json!({
            "messages": [
                { "role": "system", "content": SYSTEM_MESSAGE },
                { "role": "user", "content": user_message(title, text) },
            ],
            "temperature": self.temperature,
        });
        let response = self
            .client
            .post(&self.url)
            .header("api-key", &self.api_key)
            .json(&body)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ClassifyError::Status {
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            });
        }
        let parsed: ChatResponse = response.json().await?;
        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| ClassifyError::Malformed {
                reason: "no message content in chat response".into(),
                raw: String::new(),
            })
    }
}

/// The backend selected in settings.
pub enum AnyBackend {
    Ollama(OllamaBackend),
    Azure(AzureOpenAiBackend),
}

impl AnyBackend {
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        match settings.backend {
            Backend::Ollama => Ok(AnyBackend::Ollama(OllamaBackend::new(settings))),
            Backend::Azure => AzureOpenAiBackend::new(settings)
                .map(AnyBackend::Azure)
                .map_err(|e| anyhow!("Azure backend not configured: {:#}", e)),
        }
    }
}

impl CompletionBackend for AnyBackend {
    fn model(&self) -> &str {
        match self {
            AnyBackend::Ollama(b) => b.model(),
            AnyBackend::Azure(b) => b.model(),
        }
    }

    async fn complete(&self, title: &str, text: &str) -> Result<String, ClassifyError> {
        match self {
            AnyBackend::Ollama(b) => b.complete(title, text).await,
            AnyBackend::Azure(b) => b.complete(title, text).await,
        }
    }
}
