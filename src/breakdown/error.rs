use serde::Serialize;
use std::fmt;

use crate::model::estimate::Estimate;

/// Class of a validation diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum IssueKind {
    ShapeError,
    FieldError,
    StructureError,
    MappingMismatch,
}

impl IssueKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            IssueKind::ShapeError => "ShapeError",
            IssueKind::FieldError => "FieldError",
            IssueKind::StructureError => "StructureError",
            IssueKind::MappingMismatch => "MappingMismatch",
        }
    }
}

impl fmt::Display for IssueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One offending location in a payload. `path` uses wire names,
/// e.g. `sprints[0].tasks[2].subTasks[1].summary`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationIssue {
    pub kind: IssueKind,
    pub path: String,
    pub message: String,
}

impl ValidationIssue {
    pub fn new(kind: IssueKind, path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            path: path.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.path.is_empty() {
            write!(f, "{}: {}", self.kind, self.message)
        } else {
            write!(f, "{} at {}: {}", self.kind, self.path, self.message)
        }
    }
}

/// Every issue found in a payload, in document order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationFailure {
    pub issues: Vec<ValidationIssue>,
}

impl ValidationFailure {
    pub fn single(issue: ValidationIssue) -> Self {
        Self {
            issues: vec![issue],
        }
    }

    pub fn has(&self, kind: IssueKind) -> bool {
        self.issues.iter().any(|i| i.kind == kind)
    }
}

impl fmt::Display for ValidationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} validation issue(s)", self.issues.len())?;
        for issue in &self.issues {
            write!(f, "\n  - {issue}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationFailure {}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MappingError {
    #[error("{0} story points is not on the scale 1, 3, 5, 8, 13, 20, 40")]
    UnknownPoints(u32),
    #[error("estimate {0} has no story point counterpart")]
    UnknownEstimate(Estimate),
    #[error("estimate {estimate} does not match {points} story points (expected {expected})")]
    Mismatch {
        estimate: Estimate,
        points: u32,
        expected: Estimate,
    },
    #[error("originalEstimate and storyPoint must both be set")]
    Incomplete,
}

/// Guard failures of an edit. Any of these aborts the whole edit.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EditError {
    #[error("cannot delete '{summary}': it still has {children} sub-task(s); delete it together with its sub-tasks or reassign them")]
    Orphan { summary: String, children: usize },
    #[error("'{summary}': {source}")]
    Mapping {
        summary: String,
        #[source]
        source: MappingError,
    },
    #[error("moving '{summary}' under '{parent}' would make it its own ancestor")]
    Cycle { summary: String, parent: String },
    #[error("{0}")]
    Structure(String),
    #[error("cannot add '{item}': missing required field(s) {}", .fields.join(", "))]
    MissingField {
        item: String,
        fields: Vec<&'static str>,
    },
    #[error("{0}")]
    Field(ValidationIssue),
    #[error("no item matches {0}")]
    UnknownTarget(String),
    #[error("{0} matches more than one item")]
    AmbiguousTarget(String),
    #[error("{0}")]
    Rejected(String),
}

impl From<ValidationIssue> for EditError {
    fn from(issue: ValidationIssue) -> Self {
        match issue.kind {
            IssueKind::StructureError => EditError::Structure(issue.to_string()),
            _ => EditError::Field(issue),
        }
    }
}

impl EditError {
    pub fn kind(&self) -> &'static str {
        match self {
            EditError::Orphan { .. } => "OrphanError",
            EditError::Mapping { .. } => "MappingMismatch",
            EditError::Cycle { .. } => "CycleError",
            EditError::Structure(_) => "StructureError",
            EditError::MissingField { .. } => "MissingFieldError",
            EditError::Field(_) => "FieldError",
            EditError::UnknownTarget(_) => "UnknownTarget",
            EditError::AmbiguousTarget(_) => "AmbiguousTarget",
            EditError::Rejected(_) => "Rejected",
        }
    }
}
