//! Progress projector - client-facing progress snapshots

use crate::registry::TaskRegistry;
use dlrelay_types::{Percent, ProgressEntry, ProgressSnapshot, Task, UNNAMED_TASK_LABEL};
use std::collections::HashSet;
use std::sync::Arc;

/// Whole-number completion of a task
pub fn percent_of(task: &Task) -> Percent {
    if task.total_length <= 0 || task.completed_length < 0 {
        return Percent::Unknown;
    }
    let percent = i128::from(task.completed_length) * 100 / i128::from(task.total_length);
    Percent::Known(percent.clamp(0, 100) as u8)
}

/// Label tasks and compute their percentages, keeping the given order.
///
/// Repeated labels get a ` (n)` suffix so no task disappears from the
/// snapshot.
pub fn project(tasks: &[Task]) -> ProgressSnapshot {
    let mut used: HashSet<String> = HashSet::with_capacity(tasks.len());
    let entries = tasks
        .iter()
        .map(|task| {
            let base = task
                .package_name
                .as_deref()
                .unwrap_or(UNNAMED_TASK_LABEL);
            let mut label = base.to_string();
            let mut n = 2;
            while used.contains(&label) {
                label = format!("{} ({})", base, n);
                n += 1;
            }
            used.insert(label.clone());
            ProgressEntry {
                label,
                percent: percent_of(task),
            }
        })
        .collect();
    ProgressSnapshot { entries }
}

/// Builds snapshots straight from the registry
#[derive(Clone)]
pub struct ProgressProjector {
    registry: Arc<TaskRegistry>,
}

impl ProgressProjector {
    pub fn new(registry: Arc<TaskRegistry>) -> Self {
        Self { registry }
    }

    pub fn snapshot_for_owner(&self, owner: &str) -> ProgressSnapshot {
        project(&self.registry.list_by_owner(owner))
    }
}
