//! Hierarchy validation.
//!
//! Turns a loosely-typed decoded payload into a [`Project`]. Shape and layout
//! problems stop validation immediately; field, structure and mapping issues
//! are collected for the whole payload so the caller sees all of them at once.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;
use serde_json::{Map, Value};

use super::error::{IssueKind, ValidationFailure, ValidationIssue};
use super::mapping::check_pair;
use crate::model::estimate::{Estimate, MAX_ESTIMATE_LEN};
use crate::model::project::{
    Board, Project, ProjectType, Release, Sprint, MAX_RELEASE_VERSION_LEN, MAX_SPRINT_NAME_LEN,
};
use crate::model::work_item::{
    IssueType, ItemId, Priority, SubItem, WorkItem, MAX_DESCRIPTION_LEN, MAX_SUMMARY_LEN,
};

static NAME_DISALLOWED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^A-Za-z0-9 .-]").expect("name pattern is valid"));

const ITEM_KEYS: [&str; 10] = [
    "id",
    "summary",
    "description",
    "issueType",
    "priority",
    "startDate",
    "dueDate",
    "originalEstimate",
    "storyPoint",
    "subTasks",
];

const MAX_STORY_POINT: u64 = 2_147_483_647;

#[derive(Debug, Clone, Default)]
pub struct Validator {
    expected: Option<ProjectType>,
    strict_mapping: bool,
}

impl Validator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Require the payload layout to match a project type.
    pub fn expecting(mut self, project_type: Option<ProjectType>) -> Self {
        self.expected = project_type;
        self
    }

    /// Also reject leaf estimate/point pairs that are not table rows.
    pub fn strict_mapping(mut self, strict: bool) -> Self {
        self.strict_mapping = strict;
        self
    }

    pub fn validate(&self, raw: &Value) -> Result<Project, ValidationFailure> {
        let wrapped;
        let obj = match raw {
            Value::Array(items) => {
                tracing::info!("top-level array payload, treating it as a task list");
                wrapped = Map::from_iter([("tasks".to_string(), Value::Array(items.clone()))]);
                &wrapped
            }
            Value::Object(obj) => obj,
            other => {
                return Err(ValidationFailure::single(ValidationIssue::new(
                    IssueKind::ShapeError,
                    "",
                    format!("expected an object or an array, got {}", json_type(other)),
                )));
            }
        };

        let layout = detect_layout(obj)?;
        if let Some(expected) = self.expected {
            if expected != layout {
                return Err(ValidationFailure::single(ValidationIssue::new(
                    IssueKind::StructureError,
                    layout.layout_key(),
                    format!(
                        "{expected} projects use `{}`, but the payload has `{}`",
                        expected.layout_key(),
                        layout.layout_key()
                    ),
                )));
            }
        }

        let mut c = Collector::default();
        let project_name = c.take(optional_text(obj.get("project_name"), "project_name"));
        let board = match layout {
            ProjectType::TaskOnly => c
                .task_list(obj.get("tasks"), "tasks")
                .map(|tasks| Board::Tasks { tasks }),
            ProjectType::Scrum => c
                .containers(obj.get("sprints"), "sprints", Collector::sprint)
                .map(|sprints| Board::Sprints { sprints }),
            ProjectType::Kanban => c
                .containers(obj.get("releases"), "releases", Collector::release)
                .map(|releases| Board::Releases { releases }),
        };

        if let Some(board) = &board {
            c.check_unique_ids(board);
            if self.strict_mapping {
                c.check_mapping(board);
            }
        }

        match (c.issues.is_empty(), project_name, board) {
            (true, Some(project_name), Some(board)) => Ok(Project {
                project_name,
                board,
            }),
            _ => Err(ValidationFailure { issues: c.issues }),
        }
    }
}

/// Validate with default options.
pub fn validate_and_normalize(
    raw: &Value,
    expected: Option<ProjectType>,
) -> Result<Project, ValidationFailure> {
    Validator::new().expecting(expected).validate(raw)
}

/// Parse one task object (with its sub-tasks).
pub(crate) fn parse_work_item(value: &Value, path: &str) -> Result<WorkItem, Vec<ValidationIssue>> {
    let mut c = Collector::default();
    match c.work_item(value, path) {
        Some(item) if c.issues.is_empty() => Ok(item),
        _ => Err(c.issues),
    }
}

/// Parse one sub-task object.
pub(crate) fn parse_sub_item(value: &Value, path: &str) -> Result<SubItem, Vec<ValidationIssue>> {
    let mut c = Collector::default();
    match c.sub_item(value, path) {
        Some(item) if c.issues.is_empty() => Ok(item),
        _ => Err(c.issues),
    }
}

/// Strip characters outside letters, digits, space, dot and hyphen, then truncate.
pub fn sanitize_container_name(raw: &str, max: usize) -> String {
    let cleaned = NAME_DISALLOWED.replace_all(raw, "");
    cleaned
        .trim()
        .chars()
        .take(max)
        .collect::<String>()
        .trim_end()
        .to_string()
}

fn detect_layout(obj: &Map<String, Value>) -> Result<ProjectType, ValidationFailure> {
    let present: Vec<ProjectType> = [ProjectType::TaskOnly, ProjectType::Scrum, ProjectType::Kanban]
        .into_iter()
        .filter(|t| obj.get(t.layout_key()).is_some_and(|v| !v.is_null()))
        .collect();

    let structure = |path: &str, message: String| {
        ValidationFailure::single(ValidationIssue::new(IssueKind::StructureError, path, message))
    };

    match present.as_slice() {
        [] => Err(structure(
            "",
            "expected one of `tasks`, `sprints` or `releases`".to_string(),
        )),
        [layout] => {
            let key = layout.layout_key();
            if obj.get(key).is_some_and(Value::is_array) {
                Ok(*layout)
            } else {
                Err(structure(key, format!("`{key}` must be an array")))
            }
        }
        many => {
            let keys: Vec<&str> = many.iter().map(|t| t.layout_key()).collect();
            Err(structure(
                "",
                format!(
                    "`tasks`, `sprints` and `releases` are mutually exclusive, found {}",
                    keys.join(", ")
                ),
            ))
        }
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

fn at(path: &str, key: &str) -> String {
    if path.is_empty() {
        key.to_string()
    } else {
        format!("{path}.{key}")
    }
}

fn field_issue(path: &str, message: impl Into<String>) -> ValidationIssue {
    ValidationIssue::new(IssueKind::FieldError, path, message)
}

pub(crate) fn text_field(
    value: Option<&Value>,
    path: &str,
    max: usize,
) -> Result<String, ValidationIssue> {
    match value {
        None | Some(Value::Null) => Err(field_issue(path, "missing required field")),
        Some(Value::String(s)) if s.chars().count() > max => {
            Err(field_issue(path, format!("longer than {max} characters")))
        }
        Some(Value::String(s)) => Ok(s.clone()),
        Some(other) => Err(field_issue(
            path,
            format!("expected a string, got {}", json_type(other)),
        )),
    }
}

pub(crate) fn optional_text(
    value: Option<&Value>,
    path: &str,
) -> Result<Option<String>, ValidationIssue> {
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(other) => Err(field_issue(
            path,
            format!("expected a string or null, got {}", json_type(other)),
        )),
    }
}

pub(crate) fn issue_type_field(
    value: Option<&Value>,
    path: &str,
) -> Result<IssueType, ValidationIssue> {
    let raw = text_field(value, path, usize::MAX)?;
    IssueType::parse(&raw)
        .ok_or_else(|| field_issue(path, format!("'{raw}' is not one of Task, Story, Bug")))
}

/// Never fails: anything outside the four levels becomes `None`.
pub(crate) fn priority_field(value: Option<&Value>, path: &str) -> Priority {
    let priority = match value {
        Some(Value::String(s)) => Priority::normalize(s),
        _ => Priority::None,
    };
    let exact = matches!(value, Some(Value::String(s)) if s == priority.as_str());
    if !exact {
        tracing::warn!(path, raw = ?value, normalized = %priority, "priority normalized");
    }
    priority
}

/// Missing key is an error; explicit `null` is `Ok(None)`.
pub(crate) fn estimate_field(
    value: Option<&Value>,
    path: &str,
) -> Result<Option<Estimate>, ValidationIssue> {
    match value {
        None => Err(field_issue(path, "missing required field")),
        Some(Value::Null) => Ok(None),
        Some(Value::String(s)) if s.chars().count() > MAX_ESTIMATE_LEN => Err(field_issue(
            path,
            format!("longer than {MAX_ESTIMATE_LEN} characters"),
        )),
        Some(Value::String(s)) => Estimate::parse(s)
            .map(Some)
            .map_err(|e| field_issue(path, e.to_string())),
        Some(other) => Err(field_issue(
            path,
            format!("expected an HH:mm string, got {}", json_type(other)),
        )),
    }
}

/// Missing key is an error; explicit `null` is `Ok(None)`.
pub(crate) fn points_field(
    value: Option<&Value>,
    path: &str,
) -> Result<Option<u32>, ValidationIssue> {
    match value {
        None => Err(field_issue(path, "missing required field")),
        Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => n
            .as_u64()
            .filter(|n| *n <= MAX_STORY_POINT)
            .and_then(|n| u32::try_from(n).ok())
            .map(Some)
            .ok_or_else(|| {
                field_issue(
                    path,
                    format!("must be an integer between 0 and {MAX_STORY_POINT}"),
                )
            }),
        Some(other) => Err(field_issue(
            path,
            format!("expected an integer, got {}", json_type(other)),
        )),
    }
}

fn id_field(value: Option<&Value>, path: &str) -> Result<Option<ItemId>, ValidationIssue> {
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(ItemId::Text(s.clone()))),
        Some(Value::Number(n)) => n
            .as_i64()
            .map(|n| Some(ItemId::Number(n)))
            .ok_or_else(|| field_issue(path, "numeric id must be an integer")),
        Some(other) => Err(field_issue(
            path,
            format!("expected a string or integer id, got {}", json_type(other)),
        )),
    }
}

struct ItemFields {
    id: Option<ItemId>,
    summary: String,
    description: String,
    issue_type: IssueType,
    priority: Priority,
    start_date: Option<String>,
    due_date: Option<String>,
    original_estimate: Option<Estimate>,
    story_point: Option<u32>,
}

#[derive(Default)]
struct Collector {
    issues: Vec<ValidationIssue>,
}

impl Collector {
    fn take<T>(&mut self, result: Result<T, ValidationIssue>) -> Option<T> {
        match result {
            Ok(value) => Some(value),
            Err(issue) => {
                self.issues.push(issue);
                None
            }
        }
    }

    fn push(&mut self, kind: IssueKind, path: &str, message: impl Into<String>) {
        self.issues.push(ValidationIssue::new(kind, path, message));
    }

    fn object<'v>(&mut self, value: &'v Value, path: &str) -> Option<&'v Map<String, Value>> {
        let obj = value.as_object();
        if obj.is_none() {
            self.push(
                IssueKind::FieldError,
                path,
                format!("expected an object, got {}", json_type(value)),
            );
        }
        obj
    }

    fn containers<T>(
        &mut self,
        value: Option<&Value>,
        path: &str,
        parse: fn(&mut Collector, &Value, &str) -> Option<T>,
    ) -> Option<Vec<T>> {
        let entries = value.and_then(Value::as_array)?;
        let parsed: Vec<Option<T>> = entries
            .iter()
            .enumerate()
            .map(|(i, v)| parse(self, v, &format!("{path}[{i}]")))
            .collect();
        parsed.into_iter().collect()
    }

    fn sprint(&mut self, value: &Value, path: &str) -> Option<Sprint> {
        let obj = self.object(value, path)?;
        let name = self.container_name(obj.get("name"), &at(path, "name"), MAX_SPRINT_NAME_LEN);
        let description = self.take(text_field(
            obj.get("description"),
            &at(path, "description"),
            MAX_DESCRIPTION_LEN,
        ));
        let start_date = self.take(optional_text(obj.get("startDate"), &at(path, "startDate")));
        let end_date = self.take(optional_text(obj.get("endDate"), &at(path, "endDate")));
        let tasks = self.task_list(obj.get("tasks"), &at(path, "tasks"));
        Some(Sprint {
            name: name?,
            description: description?,
            start_date: start_date?,
            end_date: end_date?,
            tasks: tasks?,
        })
    }

    fn release(&mut self, value: &Value, path: &str) -> Option<Release> {
        let obj = self.object(value, path)?;
        let version = self.container_name(
            obj.get("version"),
            &at(path, "version"),
            MAX_RELEASE_VERSION_LEN,
        );
        let description = self.take(text_field(
            obj.get("description"),
            &at(path, "description"),
            MAX_DESCRIPTION_LEN,
        ));
        let start_date = self.take(optional_text(obj.get("startDate"), &at(path, "startDate")));
        let release_date =
            self.take(optional_text(obj.get("releaseDate"), &at(path, "releaseDate")));
        let tasks = self.task_list(obj.get("tasks"), &at(path, "tasks"));
        Some(Release {
            version: version?,
            description: description?,
            start_date: start_date?,
            release_date: release_date?,
            tasks: tasks?,
        })
    }

    fn container_name(&mut self, value: Option<&Value>, path: &str, max: usize) -> Option<String> {
        let raw = self.take(text_field(value, path, usize::MAX))?;
        let clean = sanitize_container_name(&raw, max);
        if clean != raw {
            tracing::warn!(path, original = %raw, sanitized = %clean, "container name sanitized");
        }
        if clean.is_empty() {
            self.push(
                IssueKind::FieldError,
                path,
                "empty after removing unsupported characters",
            );
            return None;
        }
        Some(clean)
    }

    fn task_list(&mut self, value: Option<&Value>, path: &str) -> Option<Vec<WorkItem>> {
        match value {
            Some(Value::Array(items)) => {
                let parsed: Vec<Option<WorkItem>> = items
                    .iter()
                    .enumerate()
                    .map(|(i, v)| self.work_item(v, &format!("{path}[{i}]")))
                    .collect();
                parsed.into_iter().collect()
            }
            None | Some(Value::Null) => {
                self.push(IssueKind::FieldError, path, "missing required field");
                None
            }
            Some(other) => {
                self.push(
                    IssueKind::FieldError,
                    path,
                    format!("expected an array, got {}", json_type(other)),
                );
                None
            }
        }
    }

    fn item_fields(&mut self, obj: &Map<String, Value>, path: &str) -> Option<ItemFields> {
        for key in obj.keys().filter(|k| !ITEM_KEYS.contains(&k.as_str())) {
            tracing::debug!(path, key = %key, "ignoring unknown field");
        }
        let id = self.take(id_field(obj.get("id"), &at(path, "id")));
        let summary = self.take(text_field(
            obj.get("summary"),
            &at(path, "summary"),
            MAX_SUMMARY_LEN,
        ));
        let description = self.take(text_field(
            obj.get("description"),
            &at(path, "description"),
            MAX_DESCRIPTION_LEN,
        ));
        let issue_type = self.take(issue_type_field(obj.get("issueType"), &at(path, "issueType")));
        let priority = priority_field(obj.get("priority"), &at(path, "priority"));
        let start_date = self.take(optional_text(obj.get("startDate"), &at(path, "startDate")));
        let due_date = self.take(optional_text(obj.get("dueDate"), &at(path, "dueDate")));
        let original_estimate = self.take(estimate_field(
            obj.get("originalEstimate"),
            &at(path, "originalEstimate"),
        ));
        let story_point = self.take(points_field(obj.get("storyPoint"), &at(path, "storyPoint")));

        Some(ItemFields {
            id: id?,
            summary: summary?,
            description: description?,
            issue_type: issue_type?,
            priority,
            start_date: start_date?,
            due_date: due_date?,
            original_estimate: original_estimate?,
            story_point: story_point?,
        })
    }

    fn work_item(&mut self, value: &Value, path: &str) -> Option<WorkItem> {
        let obj = self.object(value, path)?;
        let fields = self.item_fields(obj, path);
        let sub_tasks = match obj.get("subTasks") {
            None | Some(Value::Null) => Some(Vec::new()),
            Some(Value::Array(subs)) => {
                let parsed: Vec<Option<SubItem>> = subs
                    .iter()
                    .enumerate()
                    .map(|(i, v)| self.sub_item(v, &format!("{path}.subTasks[{i}]")))
                    .collect();
                parsed.into_iter().collect()
            }
            Some(other) => {
                self.push(
                    IssueKind::FieldError,
                    &at(path, "subTasks"),
                    format!("expected an array, got {}", json_type(other)),
                );
                None
            }
        };

        let fields = fields?;
        let sub_tasks = sub_tasks?;
        if fields.original_estimate.is_some() != fields.story_point.is_some() {
            self.push(
                IssueKind::FieldError,
                path,
                "originalEstimate and storyPoint must both be set or both be null",
            );
            return None;
        }

        Some(WorkItem {
            summary: fields.summary,
            description: fields.description,
            issue_type: fields.issue_type,
            priority: fields.priority,
            start_date: fields.start_date,
            due_date: fields.due_date,
            original_estimate: fields.original_estimate,
            story_point: fields.story_point,
            sub_tasks,
            id: fields.id,
        })
    }

    fn sub_item(&mut self, value: &Value, path: &str) -> Option<SubItem> {
        let obj = self.object(value, path)?;
        let nested = obj.contains_key("subTasks");
        if nested {
            self.push(
                IssueKind::StructureError,
                path,
                "nested sub-items not permitted",
            );
        }
        let fields = self.item_fields(obj, path)?;

        let (Some(original_estimate), Some(story_point)) =
            (fields.original_estimate, fields.story_point)
        else {
            self.push(
                IssueKind::FieldError,
                path,
                "sub-tasks require a non-null originalEstimate and storyPoint",
            );
            return None;
        };
        if nested {
            return None;
        }

        Some(SubItem {
            summary: fields.summary,
            description: fields.description,
            issue_type: fields.issue_type,
            priority: fields.priority,
            start_date: fields.start_date,
            due_date: fields.due_date,
            original_estimate,
            story_point,
            id: fields.id,
        })
    }

    fn check_unique_ids(&mut self, board: &Board) {
        let mut seen: HashSet<&ItemId> = HashSet::new();
        let mut duplicates = Vec::new();
        for (g, group) in board.groups().into_iter().enumerate() {
            let prefix = board.group_path(g);
            for (i, item) in group.iter().enumerate() {
                if let Some(id) = &item.id {
                    if !seen.insert(id) {
                        duplicates.push((format!("{prefix}[{i}].id"), id.to_string()));
                    }
                }
                for (j, sub) in item.sub_tasks.iter().enumerate() {
                    if let Some(id) = &sub.id {
                        if !seen.insert(id) {
                            duplicates
                                .push((format!("{prefix}[{i}].subTasks[{j}].id"), id.to_string()));
                        }
                    }
                }
            }
        }
        for (path, id) in duplicates {
            self.push(IssueKind::FieldError, &path, format!("duplicate id {id}"));
        }
    }

    fn check_mapping(&mut self, board: &Board) {
        let mut mismatches = Vec::new();
        for (g, group) in board.groups().into_iter().enumerate() {
            let prefix = board.group_path(g);
            for (i, item) in group.iter().enumerate() {
                if item.is_leaf() {
                    if let Err(e) = check_pair(item.original_estimate, item.story_point) {
                        mismatches.push((format!("{prefix}[{i}]"), e.to_string()));
                    }
                }
                for (j, sub) in item.sub_tasks.iter().enumerate() {
                    if let Err(e) = check_pair(Some(sub.original_estimate), Some(sub.story_point)) {
                        mismatches.push((format!("{prefix}[{i}].subTasks[{j}]"), e.to_string()));
                    }
                }
            }
        }
        for (path, message) in mismatches {
            self.push(IssueKind::MappingMismatch, &path, message);
        }
    }
}
