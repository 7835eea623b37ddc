//! Request pipelines: documents → breakdown, and breakdown + query → edit.

use serde::Serialize;
use serde_json::Value;

use crate::breakdown::edit::{apply_edit, interpret_reply, EditEnvelope, EditStage, Interpretation};
use crate::breakdown::error::{EditError, IssueKind, ValidationFailure, ValidationIssue};
use crate::breakdown::{recalculate_aggregates, total_estimate_hours, Validator};
use crate::documents::StagedDocument;
use crate::model::project::{Project, ProjectType};
use crate::oracle::prompt::{EditInstruction, GenerationInstruction};
use crate::oracle::{extract_json_object, GenerativeOracle, TokenUsage, UpstreamError};

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    /// The caller's input was rejected.
    #[error("{0}")]
    Validation(#[from] ValidationFailure),
    /// The oracle answered with JSON that is not a valid breakdown.
    #[error("the generated breakdown is invalid: {0}")]
    Generated(ValidationFailure),
    #[error(transparent)]
    Upstream(#[from] UpstreamError),
    #[error("cannot encode the previous breakdown: {0}")]
    Encode(#[from] serde_json::Error),
}

impl ServiceError {
    pub fn kind(&self) -> &'static str {
        match self {
            ServiceError::Validation(_) => "ValidationError",
            ServiceError::Generated(_) => "GeneratedInvalid",
            ServiceError::Upstream(UpstreamError::Format(_)) => "UpstreamFormatError",
            ServiceError::Upstream(_) => "Request",
            ServiceError::Encode(_) => "EncodeError",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BreakdownMeta {
    pub token_usage: TokenUsage,
    pub model: String,
    pub project_type: ProjectType,
    pub total_estimate_hours: f64,
}

/// A generated project with `_meta` alongside its own fields on the wire.
#[derive(Debug, Clone, Serialize)]
pub struct GeneratedBreakdown {
    #[serde(flatten)]
    pub project: Project,
    #[serde(rename = "_meta")]
    pub meta: BreakdownMeta,
}

pub struct BreakdownService {
    oracle: Box<dyn GenerativeOracle>,
    strict_mapping: bool,
}

impl BreakdownService {
    pub fn new(oracle: Box<dyn GenerativeOracle>) -> Self {
        Self {
            oracle,
            strict_mapping: false,
        }
    }

    pub fn strict_mapping(mut self, strict: bool) -> Self {
        self.strict_mapping = strict;
        self
    }

    pub fn model(&self) -> &str {
        self.oracle.model()
    }

    pub async fn analyze(
        &self,
        documents: &[StagedDocument],
        project_type: ProjectType,
        tech_stack: &[String],
    ) -> Result<GeneratedBreakdown, ServiceError> {
        tracing::info!(%project_type, documents = documents.len(), "analyze request");
        let instruction = GenerationInstruction {
            project_type,
            tech_stack,
        }
        .render();

        let reply = self.oracle.generate(documents, &instruction).await?;
        let raw = extract_json_object(&reply.text)?;
        let project = Validator::new()
            .expecting(Some(project_type))
            .strict_mapping(self.strict_mapping)
            .validate(&raw)
            .map_err(|failure| {
                tracing::error!(issues = failure.issues.len(), "generated breakdown rejected");
                ServiceError::Generated(failure)
            })?;

        let project = recalculate_aggregates(project);
        let total = total_estimate_hours(&project);
        tracing::info!(
            tasks = project.items().count(),
            total_estimate_hours = total,
            "breakdown generated"
        );

        Ok(GeneratedBreakdown {
            project,
            meta: BreakdownMeta {
                token_usage: reply.usage,
                model: self.oracle.model().to_string(),
                project_type,
                total_estimate_hours: total,
            },
        })
    }

    pub async fn edit(&self, previous_raw: &Value, query: &str) -> Result<EditEnvelope, ServiceError> {
        self.edit_with_usage(previous_raw, query)
            .await
            .map(|(envelope, _)| envelope)
    }

    /// Like [`edit`](Self::edit), also returning what the oracle call cost.
    pub async fn edit_with_usage(
        &self,
        previous_raw: &Value,
        query: &str,
    ) -> Result<(EditEnvelope, TokenUsage), ServiceError> {
        EditStage::Received.enter();
        if query.trim().is_empty() {
            return Err(ValidationFailure::single(ValidationIssue::new(
                IssueKind::FieldError,
                "query",
                "the edit request is empty",
            ))
            .into());
        }
        let previous = Validator::new()
            .strict_mapping(self.strict_mapping)
            .validate(previous_raw)?;

        let instruction = EditInstruction {
            previous: &previous,
            query,
        }
        .render()?;
        let reply = self.oracle.generate(&[], &instruction).await?;
        let interpretation = interpret_reply(extract_json_object(&reply.text)?)
            .map_err(|e| UpstreamError::Format(format!("unusable operation set: {e}")))?;
        EditStage::Interpreted.enter();

        let envelope = match interpretation {
            Interpretation::Plan(plan) => {
                tracing::info!(operations = plan.operations.len(), "edit interpreted");
                EditEnvelope::from(apply_edit(&previous, &plan))
            }
            Interpretation::Refused(reason) => {
                tracing::warn!(reason = %reason, "edit request refused");
                EditEnvelope::from(Err(EditError::Rejected(reason)))
            }
        };
        Ok((envelope, reply.usage))
    }
}
