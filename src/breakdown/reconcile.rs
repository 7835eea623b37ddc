//! Identity carry-over between two versions of a breakdown.
//!
//! Keys are `(issueType, summary)` for tasks and `(parent summary, summary)`
//! for sub-tasks. Items with equal keys are paired in document order, so the
//! n-th duplicate in the new tree takes the id of the n-th duplicate in the
//! previous tree. Nothing stronger than the key is available, so swapping two
//! duplicates is indistinguishable from keeping them.

use std::collections::{HashMap, VecDeque};

use crate::model::project::Project;
use crate::model::work_item::{IssueType, ItemId};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum IdentityKey {
    Task(IssueType, String),
    SubTask { parent: String, summary: String },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Items whose key matched a previous item.
    pub preserved: usize,
    /// Items without a previous counterpart (id is null).
    pub inserted: usize,
    /// Previous items with no counterpart in the new tree.
    pub dropped: usize,
}

pub fn reconcile_identities(previous: &Project, new: Project) -> Project {
    reconcile_with_report(previous, new).0
}

/// Every item in `new` ends up with the id of its key match in `previous`,
/// or null. Ids the new tree arrived with are never trusted on their own.
pub fn reconcile_with_report(previous: &Project, mut new: Project) -> (Project, ReconcileReport) {
    let mut lookup: HashMap<IdentityKey, VecDeque<Option<ItemId>>> = HashMap::new();
    for item in previous.items() {
        lookup
            .entry(IdentityKey::Task(item.issue_type, item.summary.clone()))
            .or_default()
            .push_back(item.id.clone());
        for sub in &item.sub_tasks {
            lookup
                .entry(IdentityKey::SubTask {
                    parent: item.summary.clone(),
                    summary: sub.summary.clone(),
                })
                .or_default()
                .push_back(sub.id.clone());
        }
    }

    let mut report = ReconcileReport::default();
    let mut assign = |key: IdentityKey, summary: &str, slot: &mut Option<ItemId>| {
        match lookup.get_mut(&key).and_then(VecDeque::pop_front) {
            Some(id) => {
                tracing::debug!(summary, id = ?id, "identity preserved");
                *slot = id;
                report.preserved += 1;
            }
            None => {
                if let Some(stale) = slot.take() {
                    tracing::debug!(summary, id = %stale, "no previous counterpart, identity cleared");
                }
                report.inserted += 1;
            }
        }
    };

    for item in new.items_mut() {
        let key = IdentityKey::Task(item.issue_type, item.summary.clone());
        assign(key, &item.summary, &mut item.id);

        for sub in &mut item.sub_tasks {
            let key = IdentityKey::SubTask {
                parent: item.summary.clone(),
                summary: sub.summary.clone(),
            };
            assign(key, &sub.summary, &mut sub.id);
        }
    }

    report.dropped = lookup.values().map(VecDeque::len).sum::<usize>();
    tracing::info!(
        preserved = report.preserved,
        inserted = report.inserted,
        dropped = report.dropped,
        "identities reconciled"
    );
    (new, report)
}
