use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use base64::Engine;
use serde::Deserialize;
use serde_json::{json, Value};

use super::{GenerativeOracle, OracleReply, TokenUsage, UpstreamError};
use crate::config::{OracleConfig, API_KEY_ENV};
use crate::documents::StagedDocument;

/// Documents sent inline with one request.
pub const MAX_INLINE_DOCUMENTS: usize = 5;

pub struct GeminiOracle {
    api_key: String,
    model: String,
    endpoint: String,
    client: reqwest::Client,
}

impl GeminiOracle {
    pub fn new(
        api_key: String,
        model: String,
        endpoint: String,
        timeout: Duration,
    ) -> Result<Self, UpstreamError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            api_key,
            model,
            endpoint,
            client,
        })
    }

    pub fn from_config(config: &OracleConfig) -> anyhow::Result<Self> {
        let api_key = config
            .api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .with_context(|| {
                format!("No oracle API key: set {API_KEY_ENV} or [oracle] api_key in config.toml")
            })?;
        let oracle = Self::new(
            api_key,
            config.model.clone(),
            config.endpoint.clone(),
            Duration::from_secs(config.timeout_secs),
        )?;
        Ok(oracle)
    }

    fn url(&self) -> String {
        format!(
            "{}/models/{}:generateContent",
            self.endpoint.trim_end_matches('/'),
            urlencoding::encode(&self.model)
        )
    }
}

async fn request_body(
    documents: &[StagedDocument],
    instruction: &str,
) -> Result<Value, UpstreamError> {
    if documents.len() > MAX_INLINE_DOCUMENTS {
        tracing::warn!(
            count = documents.len(),
            max = MAX_INLINE_DOCUMENTS,
            "too many documents, sending the first ones only"
        );
    }
    let mut parts = Vec::new();
    for doc in documents.iter().take(MAX_INLINE_DOCUMENTS) {
        let bytes = tokio::fs::read(&doc.path)
            .await
            .map_err(|source| UpstreamError::Io {
                path: doc.path.clone(),
                source,
            })?;
        parts.push(json!({
            "inline_data": {
                "mime_type": doc.mime_type(),
                "data": base64::engine::general_purpose::STANDARD.encode(bytes),
            }
        }));
    }
    parts.push(json!({ "text": instruction }));
    Ok(json!({ "contents": [{ "role": "user", "parts": parts }] }))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    usage_metadata: Option<UsageMetadata>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<Content>,
}

#[derive(Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Deserialize)]
struct Part {
    text: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    prompt_token_count: Option<u64>,
    candidates_token_count: Option<u64>,
    total_token_count: Option<u64>,
}

fn parse_response(raw: &str) -> Result<OracleReply, UpstreamError> {
    let response: GenerateResponse = serde_json::from_str(raw)
        .map_err(|e| UpstreamError::Format(format!("unexpected response body: {e}")))?;

    let text: String = response
        .candidates
        .into_iter()
        .next()
        .and_then(|c| c.content)
        .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
        .unwrap_or_default();
    if text.trim().is_empty() {
        return Err(UpstreamError::Format("reply contains no text".to_string()));
    }

    let usage = response
        .usage_metadata
        .map(|u| TokenUsage {
            input_tokens: u.prompt_token_count,
            output_tokens: u.candidates_token_count,
            total_tokens: u.total_token_count,
        })
        .unwrap_or_default();
    Ok(OracleReply { text, usage })
}

#[async_trait]
impl GenerativeOracle for GeminiOracle {
    fn model(&self) -> &str {
        &self.model
    }

    async fn generate(
        &self,
        documents: &[StagedDocument],
        instruction: &str,
    ) -> Result<OracleReply, UpstreamError> {
        let body = request_body(documents, instruction).await?;
        tracing::info!(model = %self.model, documents = documents.len(), "calling oracle");

        let resp = self
            .client
            .post(self.url())
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = resp.status();
        let raw = resp.text().await?;
        if !status.is_success() {
            let body: String = raw.chars().take(500).collect();
            tracing::error!(status = status.as_u16(), body = %body, "oracle request rejected");
            return Err(UpstreamError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let reply = parse_response(&raw)?;
        tracing::info!(
            input_tokens = ?reply.usage.input_tokens,
            output_tokens = ?reply.usage.output_tokens,
            total_tokens = ?reply.usage.total_tokens,
            "oracle token usage"
        );
        Ok(reply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn oracle(endpoint: &str, model: &str) -> GeminiOracle {
        GeminiOracle::new(
            "key".into(),
            model.into(),
            endpoint.into(),
            Duration::from_secs(5),
        )
        .unwrap()
    }

    #[test]
    fn builds_generate_content_url() {
        assert_eq!(
            oracle("https://example.test/v1beta/", "gemini-2.5-flash-lite").url(),
            "https://example.test/v1beta/models/gemini-2.5-flash-lite:generateContent"
        );
        assert_eq!(
            oracle("https://example.test", "my model").url(),
            "https://example.test/models/my%20model:generateContent"
        );
    }

    #[test]
    fn missing_key_is_reported() {
        let config = OracleConfig {
            api_key: Some("  ".into()),
            ..OracleConfig::default()
        };
        let err = GeminiOracle::from_config(&config).err().unwrap();
        assert!(err.to_string().contains(API_KEY_ENV));
    }

    #[tokio::test]
    async fn inlines_documents_before_instruction() {
        let dir = tempfile::tempdir().unwrap();
        let docs: Vec<StagedDocument> = (0..7)
            .map(|i| {
                let path = dir.path().join(format!("{i}.pdf"));
                std::fs::write(&path, b"hi").unwrap();
                StagedDocument {
                    source: path.clone(),
                    path,
                }
            })
            .collect();

        let body = request_body(&docs, "Break this down").await.unwrap();
        let parts = body["contents"][0]["parts"].as_array().unwrap();
        assert_eq!(parts.len(), MAX_INLINE_DOCUMENTS + 1);
        assert_eq!(parts[0]["inline_data"]["mime_type"], "application/pdf");
        assert_eq!(parts[0]["inline_data"]["data"], "aGk=");
        assert_eq!(parts[5]["text"], "Break this down");
    }

    #[tokio::test]
    async fn unreadable_document_is_io_error() {
        let doc = StagedDocument {
            path: PathBuf::from("/nonexistent/frs.pdf"),
            source: PathBuf::from("/nonexistent/frs.pdf"),
        };
        assert!(matches!(
            request_body(&[doc], "x").await,
            Err(UpstreamError::Io { .. })
        ));
    }

    #[test]
    fn parses_text_and_usage() {
        let raw = r#"{
            "candidates": [{"content": {"parts": [{"text": "{\"tasks\":"}, {"text": " []}"}], "role": "model"}}],
            "usageMetadata": {"promptTokenCount": 1200, "candidatesTokenCount": 300, "totalTokenCount": 1500}
        }"#;
        let reply = parse_response(raw).unwrap();
        assert_eq!(reply.text, "{\"tasks\": []}");
        assert_eq!(
            reply.usage,
            TokenUsage {
                input_tokens: Some(1200),
                output_tokens: Some(300),
                total_tokens: Some(1500)
            }
        );
    }

    #[test]
    fn empty_reply_is_format_error() {
        assert!(matches!(
            parse_response(r#"{"candidates": []}"#),
            Err(UpstreamError::Format(_))
        ));
        assert!(matches!(parse_response("<html>"), Err(UpstreamError::Format(_))));
    }
}
