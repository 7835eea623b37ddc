use serde_json::{Map, Value};

use super::envelope::EditReport;
use super::{EditOp, EditPlan, ItemRef};
use crate::breakdown::aggregate::{clear_aggregates, recalculate_aggregates};
use crate::breakdown::error::{EditError, IssueKind, MappingError, ValidationIssue};
use crate::breakdown::mapping::{check_pair, estimate_to_points, points_to_estimate, MatchMode};
use crate::breakdown::reconcile::reconcile_identities;
use crate::breakdown::validate::{
    estimate_field, issue_type_field, optional_text, parse_sub_item, parse_work_item,
    points_field, priority_field, text_field,
};
use crate::model::estimate::Estimate;
use crate::model::project::{Project, ProjectType};
use crate::model::work_item::{
    IssueType, ItemId, Priority, WorkItem, MAX_DESCRIPTION_LEN, MAX_SUMMARY_LEN,
};

/// Fields an added item must carry (non-null).
const REQUIRED_FIELDS: [&str; 6] = [
    "summary",
    "description",
    "issueType",
    "priority",
    "originalEstimate",
    "storyPoint",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditStage {
    Received,
    Interpreted,
    Applied,
    Recalculated,
    Reconciled,
    Done,
}

impl EditStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            EditStage::Received => "received",
            EditStage::Interpreted => "interpreted",
            EditStage::Applied => "applied",
            EditStage::Recalculated => "recalculated",
            EditStage::Reconciled => "reconciled",
            EditStage::Done => "done",
        }
    }

    pub fn enter(self) {
        tracing::info!(stage = self.as_str(), "edit stage");
    }
}

/// Apply a plan to a copy of `previous`. Operations run in order against the
/// copy; the first guard failure discards it, so `previous` is never touched.
pub fn apply_edit(previous: &Project, plan: &EditPlan) -> Result<EditReport, EditError> {
    if plan.operations.is_empty() {
        return Err(EditError::Rejected(
            "the request did not translate into any change".to_string(),
        ));
    }

    let mut editor = Editor::new(previous.clone());
    for (n, op) in plan.operations.iter().enumerate() {
        editor.apply(n, op).inspect_err(|e| {
            tracing::warn!(operation = n, kind = e.kind(), error = %e, "edit operation rejected");
        })?;
    }
    EditStage::Applied.enter();

    let Editor {
        project,
        added,
        updated,
        deleted,
    } = editor;
    let project = recalculate_aggregates(project);
    EditStage::Recalculated.enter();

    let project = reconcile_identities(previous, project);
    EditStage::Reconciled.enter();

    EditStage::Done.enter();
    Ok(EditReport {
        added,
        updated,
        deleted,
        updated_json: project,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Location {
    Task { group: usize, index: usize },
    SubTask { group: usize, index: usize, sub: usize },
}

impl Location {
    /// Position of the task itself, or of the sub-task's parent.
    fn task(self) -> (usize, usize) {
        match self {
            Location::Task { group, index } | Location::SubTask { group, index, .. } => {
                (group, index)
            }
        }
    }
}

struct Entry<'a> {
    location: Location,
    summary: &'a str,
    parent: Option<&'a str>,
    id: Option<&'a ItemId>,
}

fn same_text(a: &str, b: &str) -> bool {
    a.trim().to_lowercase() == b.trim().to_lowercase()
}

struct Editor {
    project: Project,
    added: Vec<String>,
    updated: Vec<String>,
    deleted: Vec<String>,
}

impl Editor {
    fn new(project: Project) -> Self {
        Self {
            project,
            added: Vec::new(),
            updated: Vec::new(),
            deleted: Vec::new(),
        }
    }

    fn apply(&mut self, n: usize, op: &EditOp) -> Result<(), EditError> {
        tracing::debug!(operation = n, ?op, "applying edit operation");
        match op {
            EditOp::Add {
                parent,
                container,
                item,
            } => self.add(n, parent.as_ref(), container.as_deref(), item),
            EditOp::Update { target, fields } => self.update(n, target, fields),
            EditOp::Delete {
                target,
                cascade,
                reassign_to,
            } => self.delete(target, *cascade, reassign_to.as_ref()),
            EditOp::Move {
                target,
                to_parent,
                container,
            } => match to_parent {
                Some(parent) => self.demote(target, parent),
                None => self.promote(target, container.as_deref()),
            },
        }
    }

    // --- lookup ---

    fn resolve(&self, r: &ItemRef) -> Result<Location, EditError> {
        let mut entries = Vec::new();
        for (group, tasks) in self.project.board.groups().into_iter().enumerate() {
            for (index, task) in tasks.iter().enumerate() {
                entries.push(Entry {
                    location: Location::Task { group, index },
                    summary: &task.summary,
                    parent: None,
                    id: task.id.as_ref(),
                });
                for (sub, s) in task.sub_tasks.iter().enumerate() {
                    entries.push(Entry {
                        location: Location::SubTask { group, index, sub },
                        summary: &s.summary,
                        parent: Some(&task.summary),
                        id: s.id.as_ref(),
                    });
                }
            }
        }

        if let Some(id) = &r.id {
            let by_id: Vec<Location> = entries
                .iter()
                .filter(|e| e.id == Some(id))
                .map(|e| e.location)
                .collect();
            if let [location] = by_id.as_slice() {
                return Ok(*location);
            }
            tracing::debug!(item = %r, "id did not resolve, matching by summary");
        }

        let named: Vec<&Entry> = entries
            .iter()
            .filter(|e| same_text(e.summary, &r.summary))
            .collect();
        let candidates: Vec<Location> = match &r.parent {
            Some(parent) => named
                .iter()
                .filter(|e| e.parent.is_some_and(|p| same_text(p, parent)))
                .map(|e| e.location)
                .collect(),
            None => {
                let tasks: Vec<Location> = named
                    .iter()
                    .filter(|e| e.parent.is_none())
                    .map(|e| e.location)
                    .collect();
                if tasks.is_empty() {
                    named.iter().map(|e| e.location).collect()
                } else {
                    tasks
                }
            }
        };

        match candidates.as_slice() {
            [location] => Ok(*location),
            [] => Err(EditError::UnknownTarget(r.to_string())),
            _ => Err(EditError::AmbiguousTarget(r.to_string())),
        }
    }

    fn tasks_mut(&mut self, group: usize) -> Result<&mut Vec<WorkItem>, EditError> {
        self.project
            .board
            .group_mut(group)
            .ok_or_else(|| EditError::Structure(format!("no task list at position {group}")))
    }

    fn task(&self, group: usize, index: usize) -> Result<&WorkItem, EditError> {
        self.project
            .board
            .groups()
            .into_iter()
            .nth(group)
            .and_then(|tasks| tasks.get(index))
            .ok_or_else(|| EditError::Structure(format!("no task at position {group}/{index}")))
    }

    fn task_mut(&mut self, group: usize, index: usize) -> Result<&mut WorkItem, EditError> {
        self.tasks_mut(group)?
            .get_mut(index)
            .ok_or_else(|| EditError::Structure(format!("no task at position {group}/{index}")))
    }

    fn summary_at(&self, location: Location) -> Result<String, EditError> {
        let (group, index) = location.task();
        let task = self.task(group, index)?;
        match location {
            Location::Task { .. } => Ok(task.summary.clone()),
            Location::SubTask { sub, .. } => task
                .sub_tasks
                .get(sub)
                .map(|s| s.summary.clone())
                .ok_or_else(|| EditError::Structure(format!("no sub-task at position {sub}"))),
        }
    }

    /// Task list for a named sprint or release. Task-only boards have one list.
    fn named_group(&self, name: &str) -> Result<usize, EditError> {
        if self.project.project_type() == ProjectType::TaskOnly {
            tracing::debug!(container = name, "task-only board, container ignored");
            return Ok(0);
        }
        self.project
            .board
            .find_group(name)
            .ok_or_else(|| EditError::UnknownTarget(format!("container '{name}'")))
    }

    /// New tasks without a container go to the last sprint/release.
    fn default_group(&self) -> Result<usize, EditError> {
        match self.project.board.group_count() {
            0 => Err(EditError::Structure(format!(
                "the board has no {} to add tasks to",
                self.project.project_type().layout_key()
            ))),
            n => Ok(n - 1),
        }
    }

    fn note_emptied(&mut self, parent: &str) {
        self.updated.push(format!(
            "Updated task: {parent} (no sub-tasks left, estimate cleared)"
        ));
    }

    // --- operations ---

    fn add(
        &mut self,
        n: usize,
        parent: Option<&ItemRef>,
        container: Option<&str>,
        fields: &Map<String, Value>,
    ) -> Result<(), EditError> {
        let name = fields
            .get("summary")
            .and_then(Value::as_str)
            .unwrap_or("(unnamed item)")
            .to_string();
        let missing: Vec<&'static str> = REQUIRED_FIELDS
            .into_iter()
            .filter(|key| fields.get(*key).map_or(true, Value::is_null))
            .collect();
        if !missing.is_empty() {
            return Err(EditError::MissingField {
                item: name,
                fields: missing,
            });
        }

        let mut raw = fields.clone();
        if raw.remove("id").is_some_and(|id| !id.is_null()) {
            tracing::debug!(item = %name, "ignoring id supplied for a new item");
        }
        let raw = Value::Object(raw);
        let path = format!("operations[{n}].item");

        match parent {
            Some(parent_ref) => {
                let Location::Task { group, index } = self.resolve(parent_ref)? else {
                    return Err(EditError::Structure(format!(
                        "cannot add '{name}' under sub-task {parent_ref}: only two levels are allowed"
                    )));
                };
                let sub = parse_sub_item(&raw, &path).map_err(first_issue)?;
                check_pair(Some(sub.original_estimate), Some(sub.story_point)).map_err(
                    |source| EditError::Mapping {
                        summary: sub.summary.clone(),
                        source,
                    },
                )?;
                let task = self.task_mut(group, index)?;
                let line = format!(
                    "Added sub-task under '{}': {}",
                    task.summary,
                    describe(
                        &sub.summary,
                        Some(sub.original_estimate),
                        Some(sub.story_point),
                        sub.priority
                    )
                );
                task.sub_tasks.push(sub);
                self.added.push(line);
            }
            None => {
                let mut item = parse_work_item(&raw, &path).map_err(first_issue)?;
                for sub in &mut item.sub_tasks {
                    sub.id = None;
                    check_pair(Some(sub.original_estimate), Some(sub.story_point)).map_err(
                        |source| EditError::Mapping {
                            summary: sub.summary.clone(),
                            source,
                        },
                    )?;
                }
                if item.is_leaf() {
                    check_pair(item.original_estimate, item.story_point).map_err(|source| {
                        EditError::Mapping {
                            summary: item.summary.clone(),
                            source,
                        }
                    })?;
                }

                let group = match container {
                    Some(label) => self.named_group(label)?,
                    None => self.default_group()?,
                };
                let described = if item.is_leaf() {
                    describe(
                        &item.summary,
                        item.original_estimate,
                        item.story_point,
                        item.priority,
                    )
                } else {
                    format!(
                        "{} with {} sub-task(s), {} priority",
                        item.summary,
                        item.sub_tasks.len(),
                        item.priority
                    )
                };
                let line = match self.project.board.group_label(group) {
                    Some(label) => format!("Added task to '{label}': {described}"),
                    None => format!("Added task: {described}"),
                };
                self.tasks_mut(group)?.push(item);
                self.added.push(line);
            }
        }
        Ok(())
    }

    fn update(
        &mut self,
        n: usize,
        target: &ItemRef,
        fields: &Map<String, Value>,
    ) -> Result<(), EditError> {
        let mut patch = Patch::parse(fields, &format!("operations[{n}].fields"))?;
        match self.resolve(target)? {
            Location::Task { group, index } => {
                let task = self.task_mut(group, index)?;
                if patch.touches_estimate() && !task.is_leaf() {
                    return Err(EditError::Structure(format!(
                        "'{}' has {} sub-task(s); its originalEstimate and storyPoint follow them",
                        task.summary,
                        task.sub_tasks.len()
                    )));
                }
                let mapping = |source| EditError::Mapping {
                    summary: task.summary.clone(),
                    source,
                };
                patch.complete_pair().map_err(mapping)?;
                let changed = patch.apply(task);
                if patch.touches_estimate() {
                    require_leaf_pair(task.original_estimate, task.story_point).map_err(|source| {
                        EditError::Mapping {
                            summary: task.summary.clone(),
                            source,
                        }
                    })?;
                }
                let line = format!("Updated task: {} ({})", task.summary, changed_list(&changed));
                self.updated.push(line);
            }
            Location::SubTask { group, index, sub } => {
                let task = self.task_mut(group, index)?;
                let parent = task.summary.clone();
                let slot = task
                    .sub_tasks
                    .get_mut(sub)
                    .ok_or_else(|| EditError::Structure(format!("no sub-task at position {sub}")))?;

                patch.complete_pair().map_err(|source| EditError::Mapping {
                    summary: slot.summary.clone(),
                    source,
                })?;
                let mut edited = WorkItem::from(slot.clone());
                let changed = patch.apply(&mut edited);
                if patch.touches_estimate() {
                    require_leaf_pair(edited.original_estimate, edited.story_point).map_err(|source| {
                        EditError::Mapping {
                            summary: edited.summary.clone(),
                            source,
                        }
                    })?;
                }
                *slot = edited.into_sub_item().map_err(|item| {
                    EditError::Field(ValidationIssue::new(
                        IssueKind::FieldError,
                        format!("operations[{n}].fields"),
                        format!(
                            "sub-task '{}' requires a non-null originalEstimate and storyPoint",
                            item.summary
                        ),
                    ))
                })?;
                let line = format!(
                    "Updated sub-task under '{parent}': {} ({})",
                    slot.summary,
                    changed_list(&changed)
                );
                self.updated.push(line);
            }
        }
        Ok(())
    }

    fn delete(
        &mut self,
        target: &ItemRef,
        cascade: bool,
        reassign_to: Option<&ItemRef>,
    ) -> Result<(), EditError> {
        match self.resolve(target)? {
            Location::SubTask { group, index, sub } => {
                let task = self.task_mut(group, index)?;
                let removed = task.sub_tasks.remove(sub);
                let parent = task.summary.clone();
                let emptied = task.sub_tasks.is_empty();
                if emptied {
                    clear_aggregates(task);
                }
                self.deleted.push(format!(
                    "Deleted sub-task under '{parent}': {}",
                    removed.summary
                ));
                if emptied {
                    self.note_emptied(&parent);
                }
            }
            Location::Task { group, index } => {
                let task = self.task(group, index)?;
                let summary = task.summary.clone();
                let children = task.sub_tasks.len();

                let line = if children == 0 {
                    format!("Deleted task: {summary}")
                } else if let Some(heir_ref) = reassign_to {
                    let (heir_group, heir_index) = match self.resolve(heir_ref)? {
                        Location::Task { group: g, index: i } if (g, i) != (group, index) => (g, i),
                        Location::Task { .. } => {
                            return Err(EditError::Structure(format!(
                                "cannot reassign the sub-tasks of '{summary}' to itself"
                            )));
                        }
                        Location::SubTask { .. } => {
                            return Err(EditError::Structure(format!(
                                "cannot reassign sub-tasks to sub-task {heir_ref}: only two levels are allowed"
                            )));
                        }
                    };
                    let subs = std::mem::take(&mut self.task_mut(group, index)?.sub_tasks);
                    let heir = self.task_mut(heir_group, heir_index)?;
                    heir.sub_tasks.extend(subs);
                    format!(
                        "Deleted task: {summary} ({children} sub-task(s) moved to '{}')",
                        heir.summary
                    )
                } else if cascade {
                    format!("Deleted task: {summary} (with {children} sub-task(s))")
                } else {
                    return Err(EditError::Orphan { summary, children });
                };

                self.tasks_mut(group)?.remove(index);
                self.deleted.push(line);
            }
        }
        Ok(())
    }

    /// Make `target` a sub-task of `parent_ref`.
    fn demote(&mut self, target: &ItemRef, parent_ref: &ItemRef) -> Result<(), EditError> {
        let from = self.resolve(target)?;
        let to = self.resolve(parent_ref)?;
        let summary = self.summary_at(from)?;

        let into_itself = from == to;
        let into_own_child = matches!(from, Location::Task { .. }) && from.task() == to.task();
        if into_itself || into_own_child {
            return Err(EditError::Cycle {
                summary,
                parent: self.summary_at(to)?,
            });
        }
        let Location::Task {
            group: to_group,
            index: mut to_index,
        } = to
        else {
            return Err(EditError::Structure(format!(
                "cannot move '{summary}' under sub-task {parent_ref}: only two levels are allowed"
            )));
        };

        let (moved, origin) = match from {
            Location::SubTask { group, index, sub } => {
                let task = self.task_mut(group, index)?;
                let moved = task.sub_tasks.remove(sub);
                let origin = task.summary.clone();
                let emptied = task.sub_tasks.is_empty() && (group, index) != (to_group, to_index);
                if emptied {
                    clear_aggregates(task);
                    self.note_emptied(&origin);
                }
                (moved, Some(origin))
            }
            Location::Task { group, index } => {
                let task = self.task(group, index)?;
                if !task.is_leaf() {
                    return Err(EditError::Structure(format!(
                        "'{summary}' has {} sub-task(s) of its own; it cannot become a sub-task",
                        task.sub_tasks.len()
                    )));
                }
                let item = self.tasks_mut(group)?.remove(index);
                if group == to_group && index < to_index {
                    to_index -= 1;
                }
                let moved = item.into_sub_item().map_err(|item| {
                    EditError::Structure(format!(
                        "'{}' has no estimate, so it cannot become a sub-task",
                        item.summary
                    ))
                })?;
                (moved, None)
            }
        };

        let parent = self.task_mut(to_group, to_index)?;
        let line = match origin {
            Some(origin) => format!(
                "Moved sub-task '{summary}' from '{origin}' to '{}'",
                parent.summary
            ),
            None => format!("Moved task '{summary}' under '{}'", parent.summary),
        };
        parent.sub_tasks.push(moved);
        self.updated.push(line);
        Ok(())
    }

    /// Make `target` a top-level task, or move a task to another container.
    fn promote(&mut self, target: &ItemRef, container: Option<&str>) -> Result<(), EditError> {
        match self.resolve(target)? {
            Location::SubTask { group, index, sub } => {
                let dest = match container {
                    Some(label) => self.named_group(label)?,
                    None => group,
                };
                let task = self.task_mut(group, index)?;
                let moved = WorkItem::from(task.sub_tasks.remove(sub));
                let parent = task.summary.clone();
                let emptied = task.sub_tasks.is_empty();
                if emptied {
                    clear_aggregates(task);
                }

                let line = match self.project.board.group_label(dest) {
                    Some(label) if dest != group => format!(
                        "Moved sub-task '{}' out of '{parent}' to top level in '{label}'",
                        moved.summary
                    ),
                    _ => format!(
                        "Moved sub-task '{}' out of '{parent}' to top level",
                        moved.summary
                    ),
                };
                let tasks = self.tasks_mut(dest)?;
                if dest == group {
                    tasks.insert(index + 1, moved);
                } else {
                    tasks.push(moved);
                }
                self.updated.push(line);
                if emptied {
                    self.note_emptied(&parent);
                }
            }
            Location::Task { group, index } => {
                let summary = self.task(group, index)?.summary.clone();
                let Some(label) = container else {
                    return Err(EditError::Structure(format!(
                        "moving '{summary}' needs a parent task or a container"
                    )));
                };
                let dest = self.named_group(label)?;
                if dest == group {
                    tracing::debug!(summary = %summary, container = label, "task already in container");
                    return Ok(());
                }
                let item = self.tasks_mut(group)?.remove(index);
                self.tasks_mut(dest)?.push(item);
                let dest_label = self.project.board.group_label(dest).unwrap_or(label);
                let line = format!("Moved task '{summary}' to '{dest_label}'");
                self.updated.push(line);
            }
        }
        Ok(())
    }
}

fn first_issue(issues: Vec<ValidationIssue>) -> EditError {
    issues
        .into_iter()
        .next()
        .map(EditError::from)
        .unwrap_or_else(|| EditError::Structure("item could not be parsed".to_string()))
}

fn describe(
    summary: &str,
    estimate: Option<Estimate>,
    points: Option<u32>,
    priority: Priority,
) -> String {
    match (estimate, points) {
        (Some(estimate), Some(points)) => {
            format!("{summary} ({points} points, {estimate}, {priority} priority)")
        }
        _ => format!("{summary} (no estimate, {priority} priority)"),
    }
}

fn changed_list(changed: &[&str]) -> String {
    if changed.is_empty() {
        "nothing changed".to_string()
    } else {
        changed.join(", ")
    }
}

/// A task without sub-tasks always carries a table pair; only an emptied
/// parent may have neither.
fn require_leaf_pair(estimate: Option<Estimate>, points: Option<u32>) -> Result<(), MappingError> {
    match (estimate, points) {
        (Some(_), Some(_)) => check_pair(estimate, points),
        _ => Err(MappingError::Incomplete),
    }
}

/// Parsed `fields` of an update. Outer `None` means "leave as is".
#[derive(Debug, Default)]
struct Patch {
    summary: Option<String>,
    description: Option<String>,
    issue_type: Option<IssueType>,
    priority: Option<Priority>,
    start_date: Option<Option<String>>,
    due_date: Option<Option<String>>,
    original_estimate: Option<Option<Estimate>>,
    story_point: Option<Option<u32>>,
}

impl Patch {
    fn parse(fields: &Map<String, Value>, path: &str) -> Result<Self, EditError> {
        if fields.is_empty() {
            return Err(ValidationIssue::new(IssueKind::FieldError, path, "no fields to update").into());
        }
        let mut patch = Patch::default();
        for (key, value) in fields {
            let at = format!("{path}.{key}");
            let value = Some(value);
            match key.as_str() {
                "summary" => patch.summary = Some(text_field(value, &at, MAX_SUMMARY_LEN)?),
                "description" => {
                    patch.description = Some(text_field(value, &at, MAX_DESCRIPTION_LEN)?)
                }
                "issueType" => patch.issue_type = Some(issue_type_field(value, &at)?),
                "priority" => patch.priority = Some(priority_field(value, &at)),
                "startDate" => patch.start_date = Some(optional_text(value, &at)?),
                "dueDate" => patch.due_date = Some(optional_text(value, &at)?),
                "originalEstimate" => patch.original_estimate = Some(estimate_field(value, &at)?),
                "storyPoint" => patch.story_point = Some(points_field(value, &at)?),
                "subTasks" => {
                    return Err(EditError::Structure(
                        "sub-tasks change through add, delete and move operations".to_string(),
                    ));
                }
                "id" => {
                    return Err(ValidationIssue::new(
                        IssueKind::FieldError,
                        at,
                        "identifiers cannot be changed",
                    )
                    .into());
                }
                _ => {
                    return Err(
                        ValidationIssue::new(IssueKind::FieldError, at, "unknown field").into(),
                    );
                }
            }
        }
        Ok(patch)
    }

    /// Naming only one half of the pair fills in the other from the table.
    fn complete_pair(&mut self) -> Result<(), MappingError> {
        match (self.original_estimate, self.story_point) {
            (Some(Some(estimate)), None) => {
                self.story_point = Some(Some(estimate_to_points(estimate, MatchMode::Exact)?));
            }
            (None, Some(Some(points))) => {
                self.original_estimate = Some(Some(points_to_estimate(points)?));
            }
            _ => {}
        }
        Ok(())
    }

    fn touches_estimate(&self) -> bool {
        self.original_estimate.is_some() || self.story_point.is_some()
    }

    /// Returns the wire names of the fields written.
    fn apply(&self, item: &mut WorkItem) -> Vec<&'static str> {
        let mut changed = Vec::new();
        if let Some(summary) = &self.summary {
            item.summary = summary.clone();
            changed.push("summary");
        }
        if let Some(description) = &self.description {
            item.description = description.clone();
            changed.push("description");
        }
        if let Some(issue_type) = self.issue_type {
            item.issue_type = issue_type;
            changed.push("issueType");
        }
        if let Some(priority) = self.priority {
            item.priority = priority;
            changed.push("priority");
        }
        if let Some(start_date) = &self.start_date {
            item.start_date = start_date.clone();
            changed.push("startDate");
        }
        if let Some(due_date) = &self.due_date {
            item.due_date = due_date.clone();
            changed.push("dueDate");
        }
        if let Some(estimate) = self.original_estimate {
            item.original_estimate = estimate;
            changed.push("originalEstimate");
        }
        if let Some(points) = self.story_point {
            item.story_point = points;
            changed.push("storyPoint");
        }
        changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::breakdown::validate::validate_and_normalize;
    use serde_json::json;

    fn task(summary: &str, id: &str, estimate: &str, points: u32, subs: Value) -> Value {
        json!({
            "summary": summary,
            "description": "<p>work</p>",
            "issueType": "Task",
            "priority": "High",
            "startDate": null,
            "dueDate": null,
            "originalEstimate": estimate,
            "storyPoint": points,
            "subTasks": subs,
            "id": id
        })
    }

    fn sub(summary: &str, id: &str, estimate: &str, points: u32) -> Value {
        json!({
            "summary": summary,
            "description": "<p>sub</p>",
            "issueType": "Task",
            "priority": "Medium",
            "startDate": null,
            "dueDate": null,
            "originalEstimate": estimate,
            "storyPoint": points,
            "id": id
        })
    }

    fn shop() -> Project {
        validate_and_normalize(
            &json!({
                "project_name": "Shop",
                "tasks": [
                    task("BE: Auth", "t1", "08:00", 8, json!([
                        sub("BE: Login endpoint", "s1", "03:00", 3),
                        sub("BE: Session store", "s2", "05:00", 5),
                    ])),
                    task("FE: Login page", "t2", "05:00", 5, json!([])),
                    task("QA: Smoke tests", "t3", "01:00", 1, json!([])),
                ]
            }),
            None,
        )
        .unwrap()
    }

    fn plan(operations: Value) -> EditPlan {
        EditPlan {
            operations: serde_json::from_value(operations).unwrap(),
        }
    }

    fn find<'a>(project: &'a Project, summary: &str) -> &'a WorkItem {
        project.items().find(|i| i.summary == summary).unwrap()
    }

    fn text_id(id: &str) -> Option<ItemId> {
        Some(ItemId::Text(id.to_string()))
    }

    #[test]
    fn adds_sub_task_and_recalculates_parent() {
        let previous = shop();
        let report = apply_edit(
            &previous,
            &plan(json!([{
                "op": "add",
                "parent": {"summary": "BE: Auth"},
                "item": {
                    "summary": "BE: Password reset",
                    "description": "<p>Reset flow</p>",
                    "issueType": "Task",
                    "priority": "Medium",
                    "startDate": null,
                    "dueDate": null,
                    "originalEstimate": "01:00",
                    "storyPoint": 1,
                    "id": "made-up"
                }
            }])),
        )
        .unwrap();

        assert_eq!(
            report.added,
            vec!["Added sub-task under 'BE: Auth': BE: Password reset (1 points, 01:00, Medium priority)"]
        );
        let auth = find(&report.updated_json, "BE: Auth");
        assert_eq!(auth.original_estimate.unwrap().to_string(), "09:00");
        assert_eq!(auth.story_point, Some(8));
        assert_eq!(auth.id, text_id("t1"));
        let ids: Vec<Option<ItemId>> = auth.sub_tasks.iter().map(|s| s.id.clone()).collect();
        assert_eq!(ids, vec![text_id("s1"), text_id("s2"), None]);
        assert_eq!(find(&report.updated_json, "FE: Login page").id, text_id("t2"));
    }

    #[test]
    fn deleting_parent_without_plan_for_children_is_orphan_error() {
        let previous = shop();
        let err = apply_edit(
            &previous,
            &plan(json!([{"op": "delete", "target": {"summary": "be: auth"}}])),
        )
        .unwrap_err();
        assert_eq!(err.kind(), "OrphanError");
        assert_eq!(
            err,
            EditError::Orphan {
                summary: "BE: Auth".into(),
                children: 2
            }
        );
    }

    #[test]
    fn cascade_delete_removes_children() {
        let report = apply_edit(
            &shop(),
            &plan(json!([{"op": "delete", "target": {"summary": "BE: Auth"}, "cascade": true}])),
        )
        .unwrap();
        assert_eq!(report.deleted, vec!["Deleted task: BE: Auth (with 2 sub-task(s))"]);
        assert_eq!(report.updated_json.items().count(), 2);
    }

    #[test]
    fn reassign_moves_children_as_new_items() {
        let report = apply_edit(
            &shop(),
            &plan(json!([{
                "op": "delete",
                "target": {"summary": "BE: Auth"},
                "reassign_to": {"summary": "FE: Login page"}
            }])),
        )
        .unwrap();
        let heir = find(&report.updated_json, "FE: Login page");
        assert_eq!(heir.sub_tasks.len(), 2);
        assert!(heir.sub_tasks.iter().all(|s| s.id.is_none()));
        assert_eq!(heir.id, text_id("t2"));
        assert_eq!(heir.original_estimate.unwrap().to_string(), "08:00");
        assert_eq!(heir.story_point, Some(8));
        assert!(report.deleted[0].contains("moved to 'FE: Login page'"));
    }

    #[test]
    fn removing_last_sub_task_nulls_parent_pair() {
        let report = apply_edit(
            &shop(),
            &plan(json!([
                {"op": "delete", "target": {"summary": "BE: Login endpoint", "parent": "BE: Auth"}},
                {"op": "delete", "target": {"summary": "BE: Session store"}}
            ])),
        )
        .unwrap();
        let auth = find(&report.updated_json, "BE: Auth");
        assert!(auth.sub_tasks.is_empty());
        assert_eq!(auth.original_estimate, None);
        assert_eq!(auth.story_point, None);
        assert_eq!(report.deleted.len(), 2);
        assert!(report.updated[0].contains("estimate cleared"));

        let json = serde_json::to_value(&report.updated_json).unwrap();
        assert_eq!(json["tasks"][0]["originalEstimate"], Value::Null);
        assert_eq!(json["tasks"][0]["storyPoint"], Value::Null);
    }

    #[test]
    fn off_table_update_is_mapping_mismatch() {
        let previous = shop();
        let snapshot = previous.clone();
        let err = apply_edit(
            &previous,
            &plan(json!([
                {"op": "update", "target": {"summary": "QA: Smoke tests"}, "fields": {"priority": "Low"}},
                {"op": "update", "target": {"summary": "FE: Login page"}, "fields": {"originalEstimate": "08:00", "storyPoint": 5}}
            ])),
        )
        .unwrap_err();
        assert_eq!(err.kind(), "MappingMismatch");
        assert_eq!(previous, snapshot);
    }

    #[test]
    fn update_lists_changed_fields() {
        let report = apply_edit(
            &shop(),
            &plan(json!([{
                "op": "update",
                "target": {"summary": "wrong name", "id": "t2"},
                "fields": {"priority": "low", "originalEstimate": "08:00", "storyPoint": 8}
            }])),
        )
        .unwrap();
        assert_eq!(
            report.updated,
            vec!["Updated task: FE: Login page (priority, originalEstimate, storyPoint)"]
        );
        let item = find(&report.updated_json, "FE: Login page");
        assert_eq!(item.priority, Priority::Low);
        assert_eq!(item.story_point, Some(8));
    }

    #[test]
    fn half_pair_update_is_completed_from_table() {
        let report = apply_edit(
            &shop(),
            &plan(json!([
                {"op": "update", "target": {"summary": "FE: Login page"}, "fields": {"originalEstimate": "03:00"}},
                {"op": "update", "target": {"summary": "BE: Login endpoint", "parent": "BE: Auth"}, "fields": {"storyPoint": 1}}
            ])),
        )
        .unwrap();
        let login = find(&report.updated_json, "FE: Login page");
        assert_eq!(login.story_point, Some(3));
        assert_eq!(
            report.updated[0],
            "Updated task: FE: Login page (originalEstimate, storyPoint)"
        );
        let auth = find(&report.updated_json, "BE: Auth");
        assert_eq!(auth.sub_tasks[0].original_estimate.to_string(), "01:00");
        assert_eq!(auth.original_estimate.unwrap().to_string(), "06:00");

        let err = apply_edit(
            &shop(),
            &plan(json!([{"op": "update", "target": {"summary": "FE: Login page"}, "fields": {"originalEstimate": "02:00"}}])),
        )
        .unwrap_err();
        assert_eq!(err.kind(), "MappingMismatch");
    }

    #[test]
    fn nulling_a_leaf_pair_is_mapping_mismatch() {
        for fields in [
            json!({"originalEstimate": null, "storyPoint": null}),
            json!({"originalEstimate": null}),
        ] {
            let err = apply_edit(
                &shop(),
                &plan(json!([{"op": "update", "target": {"summary": "FE: Login page"}, "fields": fields}])),
            )
            .unwrap_err();
            assert_eq!(err.kind(), "MappingMismatch");
        }

        let sub = apply_edit(
            &shop(),
            &plan(json!([{
                "op": "update",
                "target": {"summary": "BE: Login endpoint", "parent": "BE: Auth"},
                "fields": {"originalEstimate": null, "storyPoint": null}
            }])),
        )
        .unwrap_err();
        assert_eq!(sub.kind(), "MappingMismatch");
    }

    #[test]
    fn estimate_update_on_parent_is_structure_error() {
        for fields in [
            json!({"originalEstimate": "02:00", "storyPoint": 2}),
            json!({"originalEstimate": "13:00", "storyPoint": 13}),
        ] {
            let err = apply_edit(
                &shop(),
                &plan(json!([{"op": "update", "target": {"summary": "BE: Auth"}, "fields": fields}])),
            )
            .unwrap_err();
            assert_eq!(err.kind(), "StructureError");
            assert!(err.to_string().contains("2 sub-task(s)"));
        }

        let report = apply_edit(
            &shop(),
            &plan(json!([{"op": "update", "target": {"summary": "BE: Auth"}, "fields": {"priority": "Low"}}])),
        )
        .unwrap();
        assert_eq!(find(&report.updated_json, "BE: Auth").priority, Priority::Low);
    }

    #[test]
    fn renaming_a_parent_clears_ids_below_it() {
        let report = apply_edit(
            &shop(),
            &plan(json!([{"op": "update", "target": {"summary": "BE: Auth"}, "fields": {"summary": "BE: Authentication"}}])),
        )
        .unwrap();
        let auth = find(&report.updated_json, "BE: Authentication");
        assert_eq!(auth.id, None);
        assert!(auth.sub_tasks.iter().all(|s| s.id.is_none()));
        assert_eq!(find(&report.updated_json, "FE: Login page").id, text_id("t2"));
    }

    #[test]
    fn update_sub_task_re_aggregates_parent() {
        let report = apply_edit(
            &shop(),
            &plan(json!([{
                "op": "update",
                "target": {"summary": "BE: Session store", "parent": "BE: Auth"},
                "fields": {"originalEstimate": "13:00", "storyPoint": 13}
            }])),
        )
        .unwrap();
        let auth = find(&report.updated_json, "BE: Auth");
        assert_eq!(auth.original_estimate.unwrap().to_string(), "16:00");
        assert_eq!(auth.story_point, Some(13));
        assert_eq!(auth.sub_tasks[1].id, text_id("s2"));
    }

    #[test]
    fn add_lists_exactly_the_missing_fields() {
        let err = apply_edit(
            &shop(),
            &plan(json!([{
                "op": "add",
                "item": {"summary": "FE: Reset form", "issueType": "Task", "priority": null}
            }])),
        )
        .unwrap_err();
        assert_eq!(
            err,
            EditError::MissingField {
                item: "FE: Reset form".into(),
                fields: vec!["description", "priority", "originalEstimate", "storyPoint"],
            }
        );
    }

    #[test]
    fn moving_under_itself_or_own_child_is_cycle() {
        let to_self = apply_edit(
            &shop(),
            &plan(json!([{"op": "move", "target": {"summary": "BE: Auth"}, "to_parent": {"summary": "BE: Auth"}}])),
        )
        .unwrap_err();
        assert_eq!(to_self.kind(), "CycleError");

        let to_child = apply_edit(
            &shop(),
            &plan(json!([{
                "op": "move",
                "target": {"summary": "BE: Auth"},
                "to_parent": {"summary": "BE: Login endpoint"}
            }])),
        )
        .unwrap_err();
        assert_eq!(to_child.kind(), "CycleError");
    }

    #[test]
    fn third_level_is_structure_error() {
        let parent_under_task = apply_edit(
            &shop(),
            &plan(json!([{
                "op": "move",
                "target": {"summary": "BE: Auth"},
                "to_parent": {"summary": "FE: Login page"}
            }])),
        )
        .unwrap_err();
        assert_eq!(parent_under_task.kind(), "StructureError");

        let add_under_sub = apply_edit(
            &shop(),
            &plan(json!([{
                "op": "add",
                "parent": {"summary": "BE: Login endpoint"},
                "item": {
                    "summary": "BE: Rate limit",
                    "description": "d",
                    "issueType": "Task",
                    "priority": "Low",
                    "originalEstimate": "01:00",
                    "storyPoint": 1
                }
            }])),
        )
        .unwrap_err();
        assert_eq!(add_under_sub.kind(), "StructureError");
    }

    #[test]
    fn demote_task_becomes_new_sub_task() {
        let report = apply_edit(
            &shop(),
            &plan(json!([{
                "op": "move",
                "target": {"summary": "FE: Login page"},
                "to_parent": {"summary": "QA: Smoke tests"}
            }])),
        )
        .unwrap();
        let items: Vec<&WorkItem> = report.updated_json.items().collect();
        assert_eq!(items.len(), 2);
        let qa = items[1];
        assert_eq!(qa.summary, "QA: Smoke tests");
        assert_eq!(qa.sub_tasks[0].summary, "FE: Login page");
        assert_eq!(qa.sub_tasks[0].id, None);
        assert_eq!(qa.id, text_id("t3"));
        assert_eq!(qa.original_estimate.unwrap().to_string(), "05:00");
        assert_eq!(qa.story_point, Some(5));
        assert_eq!(report.updated, vec!["Moved task 'FE: Login page' under 'QA: Smoke tests'"]);
    }

    #[test]
    fn promote_sub_task_lands_after_former_parent() {
        let report = apply_edit(
            &shop(),
            &plan(json!([{"op": "move", "target": {"summary": "BE: Session store"}}])),
        )
        .unwrap();
        let items: Vec<&WorkItem> = report.updated_json.items().collect();
        assert_eq!(items[1].summary, "BE: Session store");
        assert_eq!(items[1].id, None);
        assert_eq!(items[0].id, text_id("t1"));
        assert_eq!(items[1].story_point, Some(5));
        assert_eq!(items[0].original_estimate.unwrap().to_string(), "03:00");
        assert_eq!(items[0].story_point, Some(3));
    }

    #[test]
    fn malformed_values_are_field_errors() {
        let err = apply_edit(
            &shop(),
            &plan(json!([{"op": "update", "target": {"summary": "FE: Login page"}, "fields": {"issueType": "Epic"}}])),
        )
        .unwrap_err();
        assert_eq!(err.kind(), "FieldError");

        let nested = apply_edit(
            &shop(),
            &plan(json!([{"op": "update", "target": {"summary": "FE: Login page"}, "fields": {"subTasks": []}}])),
        )
        .unwrap_err();
        assert_eq!(nested.kind(), "StructureError");
    }

    #[test]
    fn unknown_and_ambiguous_targets() {
        let unknown = apply_edit(
            &shop(),
            &plan(json!([{"op": "delete", "target": {"summary": "Nope"}}])),
        )
        .unwrap_err();
        assert_eq!(unknown.kind(), "UnknownTarget");

        let twins = validate_and_normalize(
            &json!([
                task("QA: Smoke tests", "a", "01:00", 1, json!([])),
                task("QA: Smoke tests", "b", "01:00", 1, json!([])),
            ]),
            None,
        )
        .unwrap();
        let ambiguous = apply_edit(
            &twins,
            &plan(json!([{"op": "delete", "target": {"summary": "QA: Smoke tests"}}])),
        )
        .unwrap_err();
        assert_eq!(ambiguous.kind(), "AmbiguousTarget");
    }

    #[test]
    fn adds_into_named_sprint() {
        let scrum = validate_and_normalize(
            &json!({"sprints": [
                {"name": "Sprint 1", "description": "d", "tasks": [task("BE: Auth", "t1", "01:00", 1, json!([]))]},
                {"name": "Sprint 2", "description": "d", "tasks": []}
            ]}),
            Some(ProjectType::Scrum),
        )
        .unwrap();
        let item = json!({
            "summary": "DevOps: CI",
            "description": "<p>Pipeline</p>",
            "issueType": "Task",
            "priority": "Low",
            "originalEstimate": "03:00",
            "storyPoint": 3
        });

        let report = apply_edit(
            &scrum,
            &plan(json!([{"op": "add", "container": "sprint 1", "item": item}])),
        )
        .unwrap();
        assert_eq!(
            report.added,
            vec!["Added task to 'Sprint 1': DevOps: CI (3 points, 03:00, Low priority)"]
        );
        assert_eq!(report.updated_json.board.groups()[0].len(), 2);

        let err = apply_edit(
            &scrum,
            &plan(json!([{"op": "add", "container": "Sprint 9", "item": item}])),
        )
        .unwrap_err();
        assert_eq!(err.kind(), "UnknownTarget");
    }

    #[test]
    fn empty_plan_is_rejected() {
        let err = apply_edit(&shop(), &EditPlan::default()).unwrap_err();
        assert_eq!(err.kind(), "Rejected");
    }
}
