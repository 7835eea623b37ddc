use serde::ser::{Serialize, SerializeStruct, Serializer};

use crate::breakdown::error::EditError;
use crate::model::project::Project;

#[derive(Debug, Clone, PartialEq)]
pub struct EditReport {
    pub added: Vec<String>,
    pub updated: Vec<String>,
    pub deleted: Vec<String>,
    pub updated_json: Project,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EditRejection {
    pub kind: &'static str,
    pub error: String,
}

impl From<&EditError> for EditRejection {
    fn from(err: &EditError) -> Self {
        Self {
            kind: err.kind(),
            error: err.to_string(),
        }
    }
}

/// Outcome of an edit as handed back to callers:
/// `{success: true, added, updated, deleted, updated_json}` or
/// `{success: false, kind, error}`.
#[derive(Debug, Clone, PartialEq)]
pub enum EditEnvelope {
    Applied(EditReport),
    Rejected(EditRejection),
}

impl EditEnvelope {
    pub fn is_success(&self) -> bool {
        matches!(self, EditEnvelope::Applied(_))
    }
}

impl From<Result<EditReport, EditError>> for EditEnvelope {
    fn from(result: Result<EditReport, EditError>) -> Self {
        match result {
            Ok(report) => EditEnvelope::Applied(report),
            Err(err) => EditEnvelope::Rejected(EditRejection::from(&err)),
        }
    }
}

impl Serialize for EditEnvelope {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            EditEnvelope::Applied(report) => {
                let mut s = serializer.serialize_struct("EditEnvelope", 5)?;
                s.serialize_field("success", &true)?;
                s.serialize_field("added", &report.added)?;
                s.serialize_field("updated", &report.updated)?;
                s.serialize_field("deleted", &report.deleted)?;
                s.serialize_field("updated_json", &report.updated_json)?;
                s.end()
            }
            EditEnvelope::Rejected(rejection) => {
                let mut s = serializer.serialize_struct("EditEnvelope", 3)?;
                s.serialize_field("success", &false)?;
                s.serialize_field("kind", rejection.kind)?;
                s.serialize_field("error", &rejection.error)?;
                s.end()
            }
        }
    }
}
