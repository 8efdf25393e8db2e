use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use reqwest::Client;
use serde_json::{json, Value};

use crate::core::config::Settings;
use crate::services::{ExtractedText, VisionExtraction};

const EXTRACTION_SYSTEM_PROMPT: &str = r#"You are an expert at reading handwritten exam scripts.
Transcribe every answer on the script image exactly as written, without corrections.
Estimate how confident you are in the transcription as a whole.

Respond with strict JSON:
{
  "text": "<full transcription, question numbers preserved>",
  "confidence": <number between 0 and 1>
}
"#;

#[derive(Debug, Clone)]
pub(crate) struct VisionClient {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
    max_retries: u32,
}

impl VisionClient {
    pub(crate) fn from_settings(settings: &Settings) -> Result<Self> {
        let timeout = Duration::from_secs(settings.ai().request_timeout_seconds);
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            api_key: settings.ai().vision_api_key.clone(),
            base_url: settings.ai().vision_base_url.trim_end_matches('/').to_string(),
            model: settings.ai().vision_model.clone(),
            max_retries: settings.ai().max_retries,
        })
    }
}

fn mime_for(file_name: &str) -> &'static str {
    match file_name.rsplit_once('.').map(|(_, ext)| ext.to_ascii_lowercase()) {
        Some(ext) if ext == "png" => "image/png",
        _ => "image/jpeg",
    }
}

#[async_trait]
impl VisionExtraction for VisionClient {
    async fn extract_text(&self, image: &[u8], file_name: &str) -> Result<ExtractedText> {
        let encoded = BASE64.encode(image);
        let data_url = format!("data:{};base64,{}", mime_for(file_name), encoded);

        let payload = json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": EXTRACTION_SYSTEM_PROMPT},
                {"role": "user", "content": [
                    {"type": "text", "text": "Transcribe this exam script."},
                    {"type": "image_url", "image_url": {"url": data_url}}
                ]}
            ],
            "response_format": {"type": "json_object"}
        });

        let url = format!("{}/chat/completions", self.base_url);
        let mut last_error = None;
        let mut body = Value::Null;

        for attempt in 0..=self.max_retries {
            let response =
                self.client.post(&url).bearer_auth(&self.api_key).json(&payload).send().await;

            match response {
                Ok(resp) => {
                    let status = resp.status();
                    body = resp.json().await.unwrap_or(Value::Null);
                    if status.is_success() {
                        last_error = None;
                        break;
                    }
                    last_error = Some(anyhow::anyhow!("vision API error: {body}"));
                }
                Err(err) => {
                    last_error = Some(anyhow::anyhow!(err).context("Failed to call vision API"));
                }
            }

            if attempt < self.max_retries {
                tokio::time::sleep(Duration::from_secs(2_u64.pow(attempt))).await;
            }
        }

        if let Some(err) = last_error {
            return Err(err);
        }

        let content = body
            .get("choices")
            .and_then(|choices| choices.get(0))
            .and_then(|choice| choice.get("message"))
            .and_then(|message| message.get("content"))
            .and_then(|value| value.as_str())
            .context("Missing vision response content")?;

        let parsed: Value =
            serde_json::from_str(content).context("Failed to parse vision JSON")?;
        let text = parsed
            .get("text")
            .and_then(|value| value.as_str())
            .context("Vision response missing text")?
            .to_string();
        let confidence = parsed
            .get("confidence")
            .and_then(|value| value.as_f64())
            .unwrap_or(0.0)
            .clamp(0.0, 1.0);

        Ok(ExtractedText { text, confidence })
    }
}
