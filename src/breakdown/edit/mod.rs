//! Edits against an existing breakdown.
//!
//! A free-text query is interpreted (by the oracle) into an [`EditPlan`]: a
//! list of add/update/delete/move operations addressed by [`ItemRef`]. The
//! plan is applied all-or-nothing by [`apply_edit`].

mod apply;
mod envelope;

pub use apply::{apply_edit, EditStage};
pub use envelope::EditEnvelope;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

use crate::model::work_item::ItemId;

/// Points at one task or sub-task. `id` wins when present; otherwise
/// `summary` (and `parent` for sub-tasks) is matched case-insensitively.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemRef {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<ItemId>,
    pub summary: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
}

#[cfg(test)]
impl ItemRef {
    pub fn summary(summary: impl Into<String>) -> Self {
        Self {
            id: None,
            summary: summary.into(),
            parent: None,
        }
    }

    pub fn under(mut self, parent: impl Into<String>) -> Self {
        self.parent = Some(parent.into());
        self
    }
}

impl fmt::Display for ItemRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "'{}'", self.summary)?;
        if let Some(parent) = &self.parent {
            write!(f, " under '{parent}'")?;
        }
        if let Some(id) = &self.id {
            write!(f, " (id {id})")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum EditOp {
    /// New task (into `container` on sprint/release boards) or, with
    /// `parent`, a new sub-task.
    Add {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        parent: Option<ItemRef>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        container: Option<String>,
        item: Map<String, Value>,
    },
    Update {
        target: ItemRef,
        fields: Map<String, Value>,
    },
    /// Deleting a task that still has sub-tasks needs `cascade` or `reassign_to`.
    Delete {
        target: ItemRef,
        #[serde(default)]
        cascade: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reassign_to: Option<ItemRef>,
    },
    /// With `to_parent` the target becomes a sub-task of it; without, it
    /// becomes a top-level task (in `container` if given).
    Move {
        target: ItemRef,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        to_parent: Option<ItemRef>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        container: Option<String>,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EditPlan {
    pub operations: Vec<EditOp>,
}

/// What the oracle made of a query.
#[derive(Debug, Clone, PartialEq)]
pub enum Interpretation {
    Plan(EditPlan),
    Refused(String),
}

#[derive(Deserialize)]
struct InterpretationReply {
    success: bool,
    #[serde(default)]
    operations: Vec<EditOp>,
    #[serde(default)]
    error: Option<String>,
}

/// Decode the oracle's reply to an edit instruction.
pub fn interpret_reply(reply: Value) -> Result<Interpretation, serde_json::Error> {
    let reply: InterpretationReply = serde_json::from_value(reply)?;
    if reply.success {
        Ok(Interpretation::Plan(EditPlan {
            operations: reply.operations,
        }))
    } else {
        Ok(Interpretation::Refused(reply.error.unwrap_or_else(|| {
            "the edit request could not be interpreted".to_string()
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_operation_plan() {
        let reply = json!({
            "success": true,
            "operations": [
                {"op": "add", "parent": {"summary": "BE: Auth"}, "item": {"summary": "BE: Password reset"}},
                {"op": "update", "target": {"summary": "FE: Login", "id": "abc123"}, "fields": {"priority": "High"}},
                {"op": "delete", "target": {"summary": "Old", "parent": "BE: Auth"}, "cascade": true},
                {"op": "move", "target": {"summary": "FE: Form"}, "to_parent": {"summary": "FE: Login"}}
            ]
        });
        let Interpretation::Plan(plan) = interpret_reply(reply).unwrap() else {
            panic!("expected a plan");
        };
        assert_eq!(plan.operations.len(), 4);
        assert!(matches!(
            &plan.operations[0],
            EditOp::Add { parent: Some(p), container: None, .. } if p.summary == "BE: Auth"
        ));
        assert!(matches!(
            &plan.operations[1],
            EditOp::Update { target, .. } if target.id == Some(ItemId::Text("abc123".into()))
        ));
        assert!(matches!(
            &plan.operations[2],
            EditOp::Delete { cascade: true, reassign_to: None, .. }
        ));
        assert!(matches!(&plan.operations[3], EditOp::Move { to_parent: Some(_), .. }));
    }

    #[test]
    fn decodes_refusal() {
        let reply = json!({"success": false, "error": "The query is too ambiguous."});
        assert_eq!(
            interpret_reply(reply).unwrap(),
            Interpretation::Refused("The query is too ambiguous.".into())
        );
    }

    #[test]
    fn unknown_operation_is_an_error() {
        let reply = json!({"success": true, "operations": [{"op": "rename", "target": {"summary": "x"}}]});
        assert!(interpret_reply(reply).is_err());
    }

    #[test]
    fn item_ref_display() {
        let r = ItemRef::summary("Write tests").under("BE: Auth");
        assert_eq!(r.to_string(), "'Write tests' under 'BE: Auth'");
    }
}
