use serde::{Deserialize, Serialize};
use std::fmt;

use super::estimate::Estimate;

pub const MAX_SUMMARY_LEN: usize = 255;
pub const MAX_DESCRIPTION_LEN: usize = 1000;

/// Identifier assigned by the downstream store. Clients send either strings or integers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ItemId {
    Number(i64),
    Text(String),
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ItemId::Number(n) => write!(f, "{n}"),
            ItemId::Text(s) => f.write_str(s),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IssueType {
    Task,
    Story,
    Bug,
}

impl IssueType {
    pub const ALL: [IssueType; 3] = [IssueType::Task, IssueType::Story, IssueType::Bug];

    pub fn as_str(&self) -> &'static str {
        match self {
            IssueType::Task => "Task",
            IssueType::Story => "Story",
            IssueType::Bug => "Bug",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_str() == raw)
    }
}

impl fmt::Display for IssueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Priority {
    #[default]
    None,
    Low,
    Medium,
    High,
}

impl Priority {
    pub const ALL: [Priority; 4] = [
        Priority::None,
        Priority::Low,
        Priority::Medium,
        Priority::High,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::None => "None",
            Priority::Low => "Low",
            Priority::Medium => "Medium",
            Priority::High => "High",
        }
    }

    /// Case-insensitive match against the four levels; anything else is `None`.
    pub fn normalize(raw: &str) -> Self {
        let raw = raw.trim();
        Self::ALL
            .into_iter()
            .find(|p| p.as_str().eq_ignore_ascii_case(raw))
            .unwrap_or_default()
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A task. `originalEstimate`/`storyPoint` are only null on a task whose
/// sub-tasks were all removed by an edit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkItem {
    pub summary: String,
    pub description: String,
    pub issue_type: IssueType,
    pub priority: Priority,
    pub start_date: Option<String>,
    pub due_date: Option<String>,
    pub original_estimate: Option<Estimate>,
    pub story_point: Option<u32>,
    #[serde(default)]
    pub sub_tasks: Vec<SubItem>,
    #[serde(default)]
    pub id: Option<ItemId>,
}

/// A sub-task. Same fields as [`WorkItem`] but it can never own sub-tasks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubItem {
    pub summary: String,
    pub description: String,
    pub issue_type: IssueType,
    pub priority: Priority,
    pub start_date: Option<String>,
    pub due_date: Option<String>,
    pub original_estimate: Estimate,
    pub story_point: u32,
    #[serde(default)]
    pub id: Option<ItemId>,
}

impl WorkItem {
    pub fn is_leaf(&self) -> bool {
        self.sub_tasks.is_empty()
    }

    /// Demote to a sub-task. Fails (returning the item) when it still owns
    /// sub-tasks or carries no estimate.
    pub fn into_sub_item(self) -> Result<SubItem, WorkItem> {
        match (self.is_leaf(), self.original_estimate, self.story_point) {
            (true, Some(original_estimate), Some(story_point)) => Ok(SubItem {
                summary: self.summary,
                description: self.description,
                issue_type: self.issue_type,
                priority: self.priority,
                start_date: self.start_date,
                due_date: self.due_date,
                original_estimate,
                story_point,
                id: self.id,
            }),
            _ => Err(self),
        }
    }
}

impl From<SubItem> for WorkItem {
    fn from(sub: SubItem) -> Self {
        WorkItem {
            summary: sub.summary,
            description: sub.description,
            issue_type: sub.issue_type,
            priority: sub.priority,
            start_date: sub.start_date,
            due_date: sub.due_date,
            original_estimate: Some(sub.original_estimate),
            story_point: Some(sub.story_point),
            sub_tasks: Vec::new(),
            id: sub.id,
        }
    }
}
