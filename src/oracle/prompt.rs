use crate::breakdown::mapping::POINT_TABLE;
use crate::model::estimate::MAX_ESTIMATE_LEN;
use crate::model::project::{Project, ProjectType, MAX_RELEASE_VERSION_LEN, MAX_SPRINT_NAME_LEN};
use crate::model::work_item::{MAX_DESCRIPTION_LEN, MAX_SUMMARY_LEN};

/// Instruction for turning requirement documents into a fresh breakdown.
pub struct GenerationInstruction<'a> {
    pub project_type: ProjectType,
    pub tech_stack: &'a [String],
}

/// Instruction for turning a free-text change request into an operation set.
pub struct EditInstruction<'a> {
    pub previous: &'a Project,
    pub query: &'a str,
}

fn mapping_table() -> String {
    POINT_TABLE
        .iter()
        .map(|(points, estimate)| format!("- {points} points = {estimate}"))
        .collect::<Vec<_>>()
        .join("\n")
}

fn field_rules() -> String {
    format!(
        r#"- "summary": max {MAX_SUMMARY_LEN} characters, prefixed with its category (UI/UX, FE, BE, DevOps)
- "description": HTML string, max {MAX_DESCRIPTION_LEN} characters, e.g. <p class='TextEditor__paragraph' dir='ltr'>text</p>
- "issueType": one of "Task", "Story", "Bug"
- "priority": one of "None", "Low", "Medium", "High"
- "startDate", "dueDate", "endDate", "releaseDate": always null
- "originalEstimate": "HH:mm", max {MAX_ESTIMATE_LEN} characters
- "storyPoint": integer, and together with "originalEstimate" exactly one row of this table:
{table}
- A task may have "subTasks"; a sub-task never has "subTasks".
- A parent task's "originalEstimate" is the sum of its sub-tasks' estimates."#,
        table = mapping_table(),
    )
}

const CATEGORIES: &str = r#"- UI/UX: design and user experience
- FE: frontend (client-side) development
- BE: backend logic, APIs and database
- DevOps: infrastructure, CI/CD, deployment and monitoring"#;

const TASK_EXAMPLE: &str = r#"{
          "summary": "UI/UX: Design login page",
          "description": "<p class='TextEditor__paragraph' dir='ltr'>Wireframes and mockups for login.</p>",
          "issueType": "Story",
          "priority": "High",
          "startDate": null,
          "dueDate": null,
          "originalEstimate": "08:00",
          "storyPoint": 8,
          "subTasks": [
            {
              "summary": "UI/UX: Create login wireframe",
              "description": "<p class='TextEditor__paragraph' dir='ltr'>Low-fidelity layout.</p>",
              "issueType": "Task",
              "priority": "Medium",
              "startDate": null,
              "dueDate": null,
              "originalEstimate": "05:00",
              "storyPoint": 5
            },
            {
              "summary": "UI/UX: Finalize color palette",
              "description": "<p class='TextEditor__paragraph' dir='ltr'>Palette matching the brand.</p>",
              "issueType": "Task",
              "priority": "Low",
              "startDate": null,
              "dueDate": null,
              "originalEstimate": "03:00",
              "storyPoint": 3
            }
          ]
        }"#;

fn output_skeleton(project_type: ProjectType) -> String {
    match project_type {
        ProjectType::Scrum => format!(
            r#"{{
  "project_name": "<project name>",
  "sprints": [
    {{
      "name": "Sprint 1",
      "description": "Sprint goal",
      "startDate": null,
      "endDate": null,
      "tasks": [
        {TASK_EXAMPLE}
      ]
    }}
  ]
}}"#
        ),
        ProjectType::Kanban => format!(
            r#"{{
  "project_name": "<project name>",
  "releases": [
    {{
      "version": "v1.0",
      "description": "Release scope",
      "startDate": null,
      "releaseDate": null,
      "tasks": [
        {TASK_EXAMPLE}
      ]
    }}
  ]
}}"#
        ),
        ProjectType::TaskOnly => format!(
            r#"{{
  "project_name": "<project name>",
  "tasks": [
        {TASK_EXAMPLE}
  ]
}}"#
        ),
    }
}

fn container_rules(project_type: ProjectType) -> String {
    match project_type {
        ProjectType::Scrum => format!(
            "Group the tasks into sprints ordered by dependency. Sprint \"name\" is at most \
             {MAX_SPRINT_NAME_LEN} characters using only letters, digits, spaces, dots and hyphens."
        ),
        ProjectType::Kanban => format!(
            "Group the tasks into releases ordered by delivery. Release \"version\" is at most \
             {MAX_RELEASE_VERSION_LEN} characters using only letters, digits, spaces, dots and hyphens."
        ),
        ProjectType::TaskOnly => "Return a flat list of tasks without sprints or releases.".to_string(),
    }
}

impl GenerationInstruction<'_> {
    pub fn render(&self) -> String {
        let stack = if self.tech_stack.is_empty() {
            "Not specified".to_string()
        } else {
            self.tech_stack.join(", ")
        };

        format!(
            r#"You are a project manager and senior software architect. The project is managed as {methodology}.

Read the attached requirement documents and break every feature, module and requirement into tasks and sub-tasks. Nothing may be skipped or merged into a generic item.

TECH STACK: {stack}
Mention the relevant technologies in each description.

{containers}

FIELD RULES:
{fields}

CATEGORIES:
{categories}

ESTIMATES:
Estimate for a developer with two years of experience. Each sub-task's estimate covers only its own effort.

OUTPUT:
Return ONLY one JSON object, no markdown and no commentary, shaped exactly like this:
{skeleton}"#,
            methodology = match self.project_type {
                ProjectType::Scrum => "Scrum",
                ProjectType::Kanban => "Kanban",
                ProjectType::TaskOnly => "a plain task list",
            },
            stack = stack,
            containers = container_rules(self.project_type),
            fields = field_rules(),
            categories = CATEGORIES,
            skeleton = output_skeleton(self.project_type),
        )
    }
}

const OPERATION_CONTRACT: &str = r#"{
  "success": true,
  "operations": [
    {"op": "add", "parent": {"summary": "BE: Auth"}, "item": {<every task field except subTasks and id>}},
    {"op": "add", "container": "<sprint name or release version>", "item": {<every task field, subTasks optional>}},
    {"op": "update", "target": {"id": "<id if known>", "summary": "FE: Login page"}, "fields": {<only the changed fields>}},
    {"op": "delete", "target": {"summary": "BE: Old module"}, "cascade": false, "reassign_to": {"summary": "BE: New module"}},
    {"op": "move", "target": {"summary": "FE: Form", "parent": "FE: Login page"}, "to_parent": {"summary": "FE: Signup page"}},
    {"op": "move", "target": {"summary": "FE: Form", "parent": "FE: Signup page"}, "container": "Sprint 2"}
  ]
}"#;

impl EditInstruction<'_> {
    pub fn render(&self) -> Result<String, serde_json::Error> {
        let previous = serde_json::to_string_pretty(self.previous)?;
        Ok(format!(
            r#"You are a senior software architect maintaining an existing task breakdown.

Translate the change request below into a list of operations on the breakdown. Do not return the breakdown itself; parent estimates, story points and ids are recomputed after your operations are applied.

RULES FOR NEW OR CHANGED FIELDS:
{fields}

CATEGORIES:
{categories}

ADDRESSING ITEMS:
- Refer to existing items by "summary", plus "id" when it is not null.
- For a sub-task also give "parent": the summary of its task.
- New items never carry an id.
- Deleting a task that has sub-tasks needs "cascade": true (when the request says to remove them too) or "reassign_to" naming another task.
- "move" with "to_parent" turns an item into a sub-task of that task; without it the item becomes a top-level task.

REPLY:
Return ONLY one JSON object, no markdown and no commentary:
{contract}

If the request is ambiguous or asks for something these operations cannot express, reply:
{{"success": false, "error": "<why, without an Error: prefix>"}}

CURRENT BREAKDOWN:
{previous}

CHANGE REQUEST:
{query}"#,
            fields = field_rules(),
            categories = CATEGORIES,
            contract = OPERATION_CONTRACT,
            previous = previous,
            query = self.query.trim(),
        ))
    }
}
