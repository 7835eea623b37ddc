use super::mapping::{estimate_to_points, MatchMode};
use crate::model::estimate::Estimate;
use crate::model::project::Project;
use crate::model::work_item::WorkItem;

/// Recompute every parent task from its sub-tasks. Tasks without sub-tasks
/// are left alone, so running this twice changes nothing the second time.
pub fn recalculate_aggregates(mut project: Project) -> Project {
    let mut changed = 0usize;
    for item in project.items_mut() {
        if recalculate_item(item) {
            changed += 1;
        }
    }
    if changed > 0 {
        tracing::info!(changed, "parent estimates recalculated");
    }
    project
}

/// Returns whether the item changed.
pub fn recalculate_item(item: &mut WorkItem) -> bool {
    if item.sub_tasks.is_empty() {
        return false;
    }
    let total: Estimate = item.sub_tasks.iter().map(|s| s.original_estimate).sum();
    let points = estimate_to_points(total, MatchMode::Nearest).ok();
    let changed = item.original_estimate != Some(total) || item.story_point != points;
    if changed {
        tracing::debug!(
            summary = %item.summary,
            estimate = %total,
            points = ?points,
            "parent aggregate updated"
        );
    }
    item.original_estimate = Some(total);
    item.story_point = points;
    changed
}

/// Unset state for a task that just lost its last sub-task.
pub fn clear_aggregates(item: &mut WorkItem) {
    item.original_estimate = None;
    item.story_point = None;
}

/// Total effort in hours, rounded to two decimals. Top-level tasks already
/// carry their sub-task sums, so only they are counted.
pub fn total_estimate_hours(project: &Project) -> f64 {
    let total: Estimate = project.items().filter_map(|i| i.original_estimate).sum();
    (total.hours() * 100.0).round() / 100.0
}
