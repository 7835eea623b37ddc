pub mod gemini;
pub mod prompt;

use std::path::PathBuf;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

use crate::documents::StagedDocument;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TokenUsage {
    pub input_tokens: Option<u64>,
    pub output_tokens: Option<u64>,
    pub total_tokens: Option<u64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OracleReply {
    pub text: String,
    pub usage: TokenUsage,
}

#[derive(Debug, thiserror::Error)]
pub enum UpstreamError {
    #[error("oracle request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("oracle returned HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("oracle reply is not usable: {0}")]
    Format(String),
    #[error("cannot read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// A text generator that reads staged documents alongside an instruction.
#[async_trait]
pub trait GenerativeOracle: Send + Sync {
    fn model(&self) -> &str;
    async fn generate(
        &self,
        documents: &[StagedDocument],
        instruction: &str,
    ) -> Result<OracleReply, UpstreamError>;
}

/// Pull the JSON object out of a reply, tolerating a markdown fence and a
/// leading `json` tag.
pub fn extract_json_object(text: &str) -> Result<Value, UpstreamError> {
    let mut body = text.trim();
    if body.starts_with("```") {
        body = body.split("```").nth(1).unwrap_or_default().trim();
    }
    if let Some(rest) = body.strip_prefix("json") {
        body = rest.trim();
    }

    let value: Value = serde_json::from_str(body).map_err(|e| {
        let preview: String = text.chars().take(200).collect();
        tracing::error!(error = %e, reply = %preview, "oracle reply is not valid JSON");
        UpstreamError::Format(format!("reply is not valid JSON: {e}"))
    })?;
    if !value.is_object() {
        return Err(UpstreamError::Format(
            "reply is JSON but not an object".to_string(),
        ));
    }
    Ok(value)
}
