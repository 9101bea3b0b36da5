use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Abstract text-completion capability used for answer synthesis. Pure from
/// the orchestrator's perspective: prompt in, text out.
#[async_trait]
pub trait CompletionModel: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String>;
}

#[derive(Clone)]
pub struct OllamaCompletion {
    base_url: String,
    model: String,
    client: reqwest::Client,
}

#[derive(Serialize)]
struct OllamaRequest {
    model: String,
    prompt: String,
    stream: bool,
}

#[derive(Deserialize)]
struct OllamaResponse {
    response: String,
}

impl OllamaCompletion {
    pub fn new(base_url: String, model: String, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        Self {
            base_url,
            model,
            client,
        }
    }
}

#[async_trait]
impl CompletionModel for OllamaCompletion {
    async fn complete(&self, prompt: &str) -> Result<String> {
        let url = format!("{}/api/generate", self.base_url);

        let request = OllamaRequest {
            model: self.model.clone(),
            prompt: prompt.to_string(),
            stream: false,
        };

        let send = || async {
            let response = self
                .client
                .post(&url)
                .json(&request)
                .send()
                .await
                .context("Failed to send synthesis request")?;

            if !response.status().is_success() {
                anyhow::bail!("Synthesis request failed: {}", response.status());
            }

            let body: OllamaResponse = response
                .json()
                .await
                .context("Failed to parse synthesis response")?;
            Ok(body.response)
        };

        // One bounded retry before synthesis is reported unavailable.
        match send().await {
            Ok(text) => Ok(text),
            Err(_) => send().await,
        }
    }
}
