//! Per-task state machine
//!
//! ```text
//! PENDING  --(torrent, same gid)-------------------------> METADATA
//! METADATA --(gid reassigned)----------------------------> ACTIVE
//! PENDING  --(direct http/video progress)----------------> ACTIVE
//! ACTIVE   --(completed == total, or engine says done)---> COMPLETED
//! any      --(engine error / removal)--------------------> FAILED
//! any      --(engine re-queued the transfer)-------------> PENDING
//! ```
//!
//! COMPLETED and FAILED are terminal.

use dlrelay_types::{EngineState, SourceKind, Task, TaskStatus};

/// Status an engine state forces regardless of byte counts.
///
/// A forced status is also what permits completed length to go backwards.
pub fn reset_target(state: Option<EngineState>) -> Option<TaskStatus> {
    match state {
        Some(EngineState::Waiting) => Some(TaskStatus::Pending),
        Some(EngineState::Error) | Some(EngineState::Removed) => Some(TaskStatus::Failed),
        _ => None,
    }
}

/// Whether reported lengths describe the content of `task`.
///
/// Before a torrent's gid is reassigned the engine is only fetching
/// metadata, and its byte counts refer to that.
pub fn records_lengths(task: &Task) -> bool {
    task.kind != SourceKind::Torrent || task.is_remapped()
}

/// Status after an update has been folded into `task`
pub fn next_status(task: &Task, state: Option<EngineState>) -> TaskStatus {
    if task.status.is_terminal() {
        return task.status;
    }
    if let Some(forced) = reset_target(state) {
        return forced;
    }

    let in_metadata_phase = task.kind == SourceKind::Torrent && !task.is_remapped();
    let advanced = match task.status {
        TaskStatus::Pending if in_metadata_phase => TaskStatus::Metadata,
        TaskStatus::Pending => TaskStatus::Active,
        TaskStatus::Metadata if in_metadata_phase => TaskStatus::Metadata,
        TaskStatus::Metadata => TaskStatus::Active,
        other => other,
    };

    if advanced == TaskStatus::Active && is_complete(task, state) {
        TaskStatus::Completed
    } else {
        advanced
    }
}

/// Finished when the engine says so, or when every byte of a non-empty
/// transfer is in. A zero total counts as unknown here just as it does for
/// percentages, so a zero-byte transfer completes only on `state=complete`.
fn is_complete(task: &Task, state: Option<EngineState>) -> bool {
    state == Some(EngineState::Complete)
        || (task.total_length > 0 && task.completed_length == task.total_length)
}
