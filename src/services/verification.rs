use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;

use crate::core::config::Settings;
use crate::db::models::{MarkingScheme, VerificationOutcome};
use crate::services::{ScoredAnswers, Verification};

#[derive(Debug, Clone)]
pub(crate) struct VerificationClient {
    client: Client,
    api_key: String,
    base_url: String,
    max_retries: u32,
}

impl VerificationClient {
    pub(crate) fn from_settings(settings: &Settings) -> Result<Self> {
        let timeout = Duration::from_secs(settings.ai().request_timeout_seconds);
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            api_key: settings.ai().verification_api_key.clone(),
            base_url: settings.ai().verification_base_url.trim_end_matches('/').to_string(),
            max_retries: settings.ai().max_retries,
        })
    }
}

#[async_trait]
impl Verification for VerificationClient {
    async fn verify(
        &self,
        extracted_text: &str,
        scored: &ScoredAnswers,
        scheme: &MarkingScheme,
    ) -> Result<VerificationOutcome> {
        let payload = json!({
            "extracted_text": extracted_text,
            "question_scores": scored.question_scores,
            "total_score": scored.total_score,
            "max_score": scored.max_score,
            "questions": scheme.questions.0,
        });

        let url = format!("{}/verify", self.base_url);
        let mut last_error = None;

        for attempt in 0..=self.max_retries {
            let response =
                self.client.post(&url).bearer_auth(&self.api_key).json(&payload).send().await;

            match response {
                Ok(resp) if resp.status().is_success() => {
                    let outcome: VerificationOutcome =
                        resp.json().await.context("Failed to parse verification response")?;
                    return Ok(outcome);
                }
                Ok(resp) => {
                    let status = resp.status();
                    let body = resp.text().await.unwrap_or_default();
                    last_error = Some(anyhow::anyhow!("verification API error {status}: {body}"));
                }
                Err(err) => {
                    last_error =
                        Some(anyhow::anyhow!(err).context("Failed to call verification API"));
                }
            }

            if attempt < self.max_retries {
                tokio::time::sleep(Duration::from_secs(2_u64.pow(attempt))).await;
            }
        }

        Err(last_error.unwrap_or_else(|| anyhow::anyhow!("verification request failed")))
    }
}
