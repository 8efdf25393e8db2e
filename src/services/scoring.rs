use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;

use crate::core::config::Settings;
use crate::db::models::{MarkingScheme, QuestionScore};
use crate::services::{ScoredAnswers, SemanticScoring};

#[derive(Debug, Clone)]
pub(crate) struct ScoringClient {
    client: Client,
    api_key: String,
    base_url: String,
    max_retries: u32,
}

#[derive(Debug, Deserialize)]
struct ScoreResponse {
    question_scores: Vec<QuestionScore>,
    total_score: f64,
    max_score: f64,
    confidence: f64,
}

impl ScoringClient {
    pub(crate) fn from_settings(settings: &Settings) -> Result<Self> {
        let timeout = Duration::from_secs(settings.ai().request_timeout_seconds);
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            api_key: settings.ai().scoring_api_key.clone(),
            base_url: settings.ai().scoring_base_url.trim_end_matches('/').to_string(),
            max_retries: settings.ai().max_retries,
        })
    }
}

#[async_trait]
impl SemanticScoring for ScoringClient {
    async fn score_answers(
        &self,
        extracted_text: &str,
        scheme: &MarkingScheme,
    ) -> Result<ScoredAnswers> {
        let payload = json!({
            "extracted_text": extracted_text,
            "subject": scheme.subject,
            "total_marks": scheme.total_marks,
            "questions": scheme.questions.0,
        });

        let url = format!("{}/score", self.base_url);
        let mut last_error = None;

        for attempt in 0..=self.max_retries {
            let response =
                self.client.post(&url).bearer_auth(&self.api_key).json(&payload).send().await;

            match response {
                Ok(resp) if resp.status().is_success() => {
                    let parsed: ScoreResponse =
                        resp.json().await.context("Failed to parse scoring response")?;
                    return Ok(ScoredAnswers {
                        question_scores: parsed.question_scores,
                        total_score: parsed.total_score,
                        max_score: parsed.max_score,
                        confidence: parsed.confidence.clamp(0.0, 1.0),
                    });
                }
                Ok(resp) => {
                    let status = resp.status();
                    let body = resp.text().await.unwrap_or_default();
                    last_error = Some(anyhow::anyhow!("scoring API error {status}: {body}"));
                }
                Err(err) => {
                    last_error = Some(anyhow::anyhow!(err).context("Failed to call scoring API"));
                }
            }

            if attempt < self.max_retries {
                tokio::time::sleep(Duration::from_secs(2_u64.pow(attempt))).await;
            }
        }

        Err(last_error.unwrap_or_else(|| anyhow::anyhow!("scoring request failed")))
    }
}
