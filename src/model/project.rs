use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::work_item::WorkItem;

pub const MAX_SPRINT_NAME_LEN: usize = 45;
pub const MAX_RELEASE_VERSION_LEN: usize = 50;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Sprint {
    pub name: String,
    pub description: String,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub tasks: Vec<WorkItem>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Release {
    pub version: String,
    pub description: String,
    pub start_date: Option<String>,
    pub release_date: Option<String>,
    pub tasks: Vec<WorkItem>,
}

/// Top-level layout. Exactly one of `tasks`, `sprints`, `releases` appears on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Board {
    Sprints { sprints: Vec<Sprint> },
    Releases { releases: Vec<Release> },
    Tasks { tasks: Vec<WorkItem> },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_name: Option<String>,
    #[serde(flatten)]
    pub board: Board,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProjectType {
    TaskOnly,
    Scrum,
    Kanban,
}

impl ProjectType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProjectType::TaskOnly => "TaskOnly",
            ProjectType::Scrum => "Scrum",
            ProjectType::Kanban => "Kanban",
        }
    }

    /// Wire key holding the layout for this project type.
    pub fn layout_key(&self) -> &'static str {
        match self {
            ProjectType::TaskOnly => "tasks",
            ProjectType::Scrum => "sprints",
            ProjectType::Kanban => "releases",
        }
    }
}

impl fmt::Display for ProjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProjectType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "scrum" => Ok(ProjectType::Scrum),
            "kanban" => Ok(ProjectType::Kanban),
            "tasks" | "taskonly" | "task-only" => Ok(ProjectType::TaskOnly),
            other => Err(format!(
                "unknown project type '{other}' (expected scrum, kanban or tasks)"
            )),
        }
    }
}

impl Board {
    pub fn project_type(&self) -> ProjectType {
        match self {
            Board::Tasks { .. } => ProjectType::TaskOnly,
            Board::Sprints { .. } => ProjectType::Scrum,
            Board::Releases { .. } => ProjectType::Kanban,
        }
    }

    /// Task lists in document order; a task-only board has a single group.
    pub fn groups(&self) -> Vec<&Vec<WorkItem>> {
        match self {
            Board::Tasks { tasks } => vec![tasks],
            Board::Sprints { sprints } => sprints.iter().map(|s| &s.tasks).collect(),
            Board::Releases { releases } => releases.iter().map(|r| &r.tasks).collect(),
        }
    }

    pub fn groups_mut(&mut self) -> Vec<&mut Vec<WorkItem>> {
        match self {
            Board::Tasks { tasks } => vec![tasks],
            Board::Sprints { sprints } => sprints.iter_mut().map(|s| &mut s.tasks).collect(),
            Board::Releases { releases } => releases.iter_mut().map(|r| &mut r.tasks).collect(),
        }
    }

    pub fn group_mut(&mut self, index: usize) -> Option<&mut Vec<WorkItem>> {
        self.groups_mut().into_iter().nth(index)
    }

    /// Sprint name or release version of a group; `None` for a task-only board.
    pub fn group_label(&self, index: usize) -> Option<&str> {
        match self {
            Board::Tasks { .. } => None,
            Board::Sprints { sprints } => sprints.get(index).map(|s| s.name.as_str()),
            Board::Releases { releases } => releases.get(index).map(|r| r.version.as_str()),
        }
    }

    /// Wire path prefix of a group's task list, e.g. `sprints[1].tasks`.
    pub fn group_path(&self, index: usize) -> String {
        match self {
            Board::Tasks { .. } => "tasks".to_string(),
            Board::Sprints { .. } => format!("sprints[{index}].tasks"),
            Board::Releases { .. } => format!("releases[{index}].tasks"),
        }
    }

    pub fn group_count(&self) -> usize {
        match self {
            Board::Tasks { .. } => 1,
            Board::Sprints { sprints } => sprints.len(),
            Board::Releases { releases } => releases.len(),
        }
    }

    /// Find a group by container label (case-insensitive).
    pub fn find_group(&self, label: &str) -> Option<usize> {
        (0..self.group_count()).find(|&i| {
            self.group_label(i)
                .is_some_and(|l| l.trim().eq_ignore_ascii_case(label.trim()))
        })
    }
}

impl Project {
    pub fn project_type(&self) -> ProjectType {
        self.board.project_type()
    }

    pub fn items(&self) -> impl Iterator<Item = &WorkItem> {
        self.board.groups().into_iter().flatten()
    }

    pub fn items_mut(&mut self) -> impl Iterator<Item = &mut WorkItem> {
        self.board.groups_mut().into_iter().flatten()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserializes_each_layout() {
        let tasks: Project = serde_json::from_str(r#"{"project_name":"P","tasks":[]}"#).unwrap();
        assert_eq!(tasks.project_type(), ProjectType::TaskOnly);

        let scrum: Project = serde_json::from_str(
            r#"{"project_name":"P","sprints":[{"name":"Sprint 1","description":"d","startDate":null,"endDate":null,"tasks":[]}]}"#,
        )
        .unwrap();
        assert_eq!(scrum.project_type(), ProjectType::Scrum);
        assert_eq!(scrum.board.group_label(0), Some("Sprint 1"));

        let kanban: Project = serde_json::from_str(
            r#"{"project_name":"P","releases":[{"version":"v1.0","description":"d","startDate":null,"releaseDate":null,"tasks":[]}]}"#,
        )
        .unwrap();
        assert_eq!(kanban.project_type(), ProjectType::Kanban);
        assert_eq!(kanban.board.group_path(0), "releases[0].tasks");
    }

    #[test]
    fn serializes_flat_layout_without_missing_name() {
        let project = Project {
            project_name: None,
            board: Board::Tasks { tasks: vec![] },
        };
        let json = serde_json::to_value(&project).unwrap();
        assert_eq!(json, serde_json::json!({ "tasks": [] }));
    }

    #[test]
    fn project_type_from_cli_words() {
        assert_eq!("Scrum".parse::<ProjectType>(), Ok(ProjectType::Scrum));
        assert_eq!("kanban".parse::<ProjectType>(), Ok(ProjectType::Kanban));
        assert_eq!("task-only".parse::<ProjectType>(), Ok(ProjectType::TaskOnly));
        assert!("waterfall".parse::<ProjectType>().is_err());
    }

    #[test]
    fn find_group_by_label() {
        let project: Project = serde_json::from_str(
            r#"{"sprints":[
                {"name":"Sprint 1","description":"","tasks":[]},
                {"name":"Sprint 2","description":"","tasks":[]}
            ]}"#,
        )
        .unwrap();
        assert_eq!(project.board.find_group("sprint 2"), Some(1));
        assert_eq!(project.board.find_group("Sprint 9"), None);
        assert_eq!(project.board.group_count(), 2);
    }
}
