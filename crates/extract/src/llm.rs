use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::schema::ExtractError;

#[derive(Clone)]
pub struct OllamaClient {
    base_url: String,
    model: String,
    client: reqwest::Client,
}

#[derive(Serialize)]
struct OllamaRequest {
    model: String,
    prompt: String,
    stream: bool,
    format: String, // "json" for structured output
}

#[derive(Deserialize)]
struct OllamaResponse {
    response: String,
}

impl OllamaClient {
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

    pub async fn generate(&self, prompt: &str) -> Result<String, ExtractError> {
        let url = format!("{}/api/generate", self.base_url);

        let request = OllamaRequest {
            model: self.model.clone(),
            prompt: prompt.to_string(),
            stream: false,
            format: "json".to_string(),
        };

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| ExtractError::Backend(format!("request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(ExtractError::Backend(format!(
                "request failed: {}",
                response.status()
            )));
        }

        let ollama_response: OllamaResponse = response
            .json()
            .await
            .map_err(|e| ExtractError::Backend(format!("unreadable response: {e}")))?;

        Ok(ollama_response.response)
    }

    /// Generate and re-prompt once per attempt when the output is not valid
    /// JSON.
    pub async fn generate_json_with_retry(
        &self,
        prompt: &str,
        max_retries: usize,
    ) -> Result<String, ExtractError> {
        for attempt in 0..max_retries.max(1) {
            let response = self.generate(prompt).await?;

            if serde_json::from_str::<serde_json::Value>(&response).is_ok() {
                return Ok(response);
            }

            if attempt + 1 < max_retries {
                let retry_prompt = crate::prompt::build_retry_prompt(&response);
                let corrected = self.generate(&retry_prompt).await?;
                if serde_json::from_str::<serde_json::Value>(&corrected).is_ok() {
                    return Ok(corrected);
                }
            }
        }

        Err(ExtractError::Format(format!(
            "no valid JSON after {max_retries} attempts"
        )))
    }
}
