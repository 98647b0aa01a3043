//! Task registry - the authoritative store of tracked downloads
//!
//! Layout:
//! - one `parking_lot::RwLock` guards the index structures (owner buckets,
//!   live gids, retired gids, shadow records)
//! - every task sits behind its own `Mutex`, so progress on one task does
//!   not block readers of another
//!
//! Locks are always taken index first, task second. `create` and `remap`
//! hold the index write lock, so a reader resolves a gid either to the old
//! mapping or to the new one, never to nothing.

use crate::error::DlrelayError;
use crate::lifecycle;
use chrono::Utc;
use dlrelay_types::{EngineState, SourceKind, Task, TaskStatus, UpdateNotification};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Default time an unclaimed shadow record is kept
pub const DEFAULT_SHADOW_RETENTION: Duration = Duration::from_secs(120);

/// Upper bound on shadow records held at once
const MAX_SHADOWS: usize = 4096;

/// Cheap reference to a created task
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskHandle {
    pub id: Uuid,
    pub gid: String,
    pub status: TaskStatus,
}

/// Byte counts and naming reported for a task
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProgressUpdate {
    /// `-1` keeps the stored value
    pub total_length: i64,
    /// `-1` keeps the stored value
    pub completed_length: i64,
    pub package_name: Option<String>,
    pub state: Option<EngineState>,
}

impl ProgressUpdate {
    pub fn from_notification(notification: &UpdateNotification) -> Self {
        Self {
            total_length: notification.total_length,
            completed_length: notification.completed_length,
            package_name: notification.package_name.clone(),
            state: notification.state,
        }
    }
}

/// Result of folding a [`ProgressUpdate`] into a task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressOutcome {
    Applied(TaskStatus),
    /// Completed length went backwards without a restart; nothing changed
    Regressed,
    /// Task is terminal; nothing changed
    Ignored,
}

/// Result of [`TaskRegistry::record_shadow`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShadowResult {
    Recorded,
    /// A task for the gid appeared in the meantime; apply to it instead
    TaskExists,
}

/// State received for a gid before its task was created
#[derive(Debug, Clone)]
struct Shadow {
    /// Cumulative view of every notification received so far
    latest: UpdateNotification,
    first_seen: Instant,
}

impl Shadow {
    fn absorb(&mut self, notification: &UpdateNotification) {
        let latest = &mut self.latest;
        latest.active_gid = notification.active_gid.clone();
        if notification.total_length >= 0 {
            latest.total_length = notification.total_length;
        }
        if notification.completed_length >= 0 {
            latest.completed_length = notification.completed_length;
        }
        if notification.package_name.is_some() {
            latest.package_name = notification.package_name.clone();
        }
        if notification.info_hash.is_some() {
            latest.info_hash = notification.info_hash.clone();
        }
        if notification.state.is_some() {
            latest.state = notification.state;
        }
    }
}

#[derive(Default)]
struct Indexes {
    tasks: HashMap<Uuid, Arc<Mutex<Task>>>,
    /// Task ids per owner, in creation order
    by_owner: HashMap<String, Vec<Uuid>>,
    /// Active gid -> task
    live: HashMap<String, Uuid>,
    /// Original gids of remapped tasks
    retired: HashMap<String, Uuid>,
    /// Keyed by original gid
    shadows: HashMap<String, Shadow>,
}

impl Indexes {
    fn resolve(&self, gid: &str) -> Option<Uuid> {
        self.live
            .get(gid)
            .or_else(|| self.retired.get(gid))
            .copied()
    }

    fn task(&self, gid: &str) -> Option<Arc<Mutex<Task>>> {
        self.resolve(gid).and_then(|id| self.tasks.get(&id).cloned())
    }
}

/// Concurrency-safe registry of tracked tasks
pub struct TaskRegistry {
    indexes: RwLock<Indexes>,
    next_sequence: AtomicU64,
    shadow_retention: Duration,
}

impl Default for TaskRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_SHADOW_RETENTION)
    }
}

impl TaskRegistry {
    pub fn new(shadow_retention: Duration) -> Self {
        Self {
            indexes: RwLock::new(Indexes::default()),
            next_sequence: AtomicU64::new(0),
            shadow_retention,
        }
    }

    /// Number of tracked tasks
    pub fn len(&self) -> usize {
        self.indexes.read().tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of shadow records waiting for their task
    pub fn shadow_count(&self) -> usize {
        self.indexes.read().shadows.len()
    }

    /// Start tracking a freshly submitted transfer.
    ///
    /// Any shadow state already received for `gid` is merged in before the
    /// task becomes visible.
    pub fn create(
        &self,
        owner: &str,
        kind: SourceKind,
        gid: &str,
        info_hash: Option<String>,
    ) -> Result<TaskHandle, DlrelayError> {
        if owner.is_empty() {
            return Err(DlrelayError::Validation("owner must not be empty".to_string()));
        }
        if gid.is_empty() {
            return Err(DlrelayError::Validation("gid must not be empty".to_string()));
        }
        let info_hash = info_hash.filter(|hash| !hash.is_empty());

        let mut guard = self.indexes.write();
        let indexes = &mut *guard;
        if indexes.resolve(gid).is_some() {
            return Err(DlrelayError::AlreadyTracked(gid.to_string()));
        }

        let sequence = self.next_sequence.fetch_add(1, Ordering::Relaxed);
        let mut task = Task::new(owner.to_string(), kind, gid.to_string(), info_hash, sequence);

        if let Some(shadow) = indexes.shadows.remove(gid) {
            if shadow.first_seen.elapsed() > self.shadow_retention {
                debug!("Discarding expired shadow for {}", gid);
            } else {
                let mut merged = task.clone();
                match merge_shadow(&mut merged, &shadow.latest, indexes) {
                    Ok(()) => {
                        info!(
                            "Merged early engine state into task {} ({} -> {})",
                            merged.id, merged.original_gid, merged.active_gid
                        );
                        task = merged;
                    }
                    Err(reason) => warn!("Dropping shadow for {}: {}", gid, reason),
                }
            }
        }

        let handle = TaskHandle {
            id: task.id,
            gid: task.original_gid.clone(),
            status: task.status,
        };

        if task.is_remapped() {
            indexes.retired.insert(task.original_gid.clone(), task.id);
        }
        indexes.live.insert(task.active_gid.clone(), task.id);
        indexes
            .by_owner
            .entry(task.owner.clone())
            .or_default()
            .push(task.id);
        info!("Tracking {} task {} for {} as {}", kind, task.id, owner, gid);
        indexes.tasks.insert(task.id, Arc::new(Mutex::new(task)));

        Ok(handle)
    }

    /// Snapshot of the task answering to `gid` (original or active)
    pub fn find_by_gid(&self, gid: &str) -> Option<Task> {
        let indexes = self.indexes.read();
        indexes.task(gid).map(|task| task.lock().clone())
    }

    /// Point a task at the gid the engine now uses for it.
    ///
    /// `old` may be the task's original or active gid. The previous active
    /// gid is retired; lookups by it keep working but it is no longer live.
    pub fn remap(&self, old: &str, new: &str, info_hash: Option<&str>) -> Result<(), DlrelayError> {
        if new.is_empty() {
            return Err(DlrelayError::Validation("gid must not be empty".to_string()));
        }

        let mut guard = self.indexes.write();
        let indexes = &mut *guard;
        let id = indexes
            .resolve(old)
            .ok_or_else(|| DlrelayError::UnknownGid(old.to_string()))?;
        let entry = indexes
            .tasks
            .get(&id)
            .cloned()
            .ok_or_else(|| DlrelayError::Internal(format!("index points at missing task {}", id)))?;
        let mut task = entry.lock();

        if task.active_gid == new {
            return Ok(());
        }
        if task.is_remapped() {
            return Err(DlrelayError::conflict(
                new,
                format!("task already moved to {}", task.active_gid),
            ));
        }
        if indexes.resolve(new).is_some_and(|other| other != id) {
            return Err(DlrelayError::conflict(new, "gid belongs to another task"));
        }
        if let Some(hash) = info_hash.filter(|h| !h.is_empty()) {
            match &task.info_hash {
                Some(_) if !task.info_hash_matches(hash) => {
                    warn!(
                        "Refusing remap {} -> {}: info hash {} does not match {:?}",
                        old, new, hash, task.info_hash
                    );
                    return Err(DlrelayError::conflict(new, "info hash mismatch"));
                }
                Some(_) => {}
                None => task.info_hash = Some(hash.to_string()),
            }
        }

        let previous = std::mem::replace(&mut task.active_gid, new.to_string());
        task.updated_at = Utc::now();
        indexes.live.remove(&previous);
        indexes.retired.insert(previous.clone(), id);
        indexes.live.insert(new.to_string(), id);

        info!("Task {} moved from {} to {}", id, previous, new);
        Ok(())
    }

    /// Fold reported progress into the task answering to `gid`
    pub fn apply_progress(
        &self,
        gid: &str,
        update: ProgressUpdate,
    ) -> Result<ProgressOutcome, DlrelayError> {
        let indexes = self.indexes.read();
        let entry = indexes
            .task(gid)
            .ok_or_else(|| DlrelayError::UnknownGid(gid.to_string()))?;
        let mut task = entry.lock();
        apply_update(&mut task, update)
    }

    /// Tasks of `owner`, oldest first
    pub fn list_by_owner(&self, owner: &str) -> Vec<Task> {
        let indexes = self.indexes.read();
        let Some(ids) = indexes.by_owner.get(owner) else {
            return Vec::new();
        };

        let mut tasks: Vec<Task> = ids
            .iter()
            .filter_map(|id| indexes.tasks.get(id))
            .map(|task| task.lock().clone())
            .collect();
        tasks.sort_by_key(|task| task.sequence);
        tasks
    }

    /// Hold state for a gid no task answers to yet
    pub fn record_shadow(&self, notification: &UpdateNotification) -> Result<ShadowResult, DlrelayError> {
        let mut guard = self.indexes.write();
        let indexes = &mut *guard;

        if indexes.resolve(&notification.original_gid).is_some()
            || indexes.resolve(&notification.active_gid).is_some()
        {
            return Ok(ShadowResult::TaskExists);
        }

        let key = notification.original_gid.clone();
        if let Some(shadow) = indexes.shadows.get_mut(&key) {
            if shadow.latest.owner != notification.owner {
                return Err(DlrelayError::Validation(format!(
                    "owner mismatch for pending gid {}",
                    key
                )));
            }
            shadow.absorb(notification);
            debug!("Updated shadow for {}", key);
            return Ok(ShadowResult::Recorded);
        }

        if indexes.shadows.len() >= MAX_SHADOWS {
            let oldest = indexes
                .shadows
                .iter()
                .min_by_key(|(_, shadow)| shadow.first_seen)
                .map(|(gid, _)| gid.clone());
            if let Some(oldest) = oldest {
                warn!("Shadow table full, evicting {}", oldest);
                indexes.shadows.remove(&oldest);
            }
        }

        debug!("Holding early state for unknown gid {}", key);
        indexes.shadows.insert(
            key,
            Shadow {
                latest: notification.clone(),
                first_seen: Instant::now(),
            },
        );
        Ok(ShadowResult::Recorded)
    }

    /// Drop shadows older than the retention window; returns how many
    pub fn sweep_shadows(&self) -> usize {
        let mut indexes = self.indexes.write();
        let retention = self.shadow_retention;
        let before = indexes.shadows.len();
        indexes
            .shadows
            .retain(|_, shadow| shadow.first_seen.elapsed() <= retention);
        let dropped = before - indexes.shadows.len();
        if dropped > 0 {
            info!("Dropped {} unclaimed shadow record(s)", dropped);
        }
        dropped
    }
}

/// Apply one update to a locked task
fn apply_update(task: &mut Task, update: ProgressUpdate) -> Result<ProgressOutcome, DlrelayError> {
    if task.status.is_terminal() {
        debug!("Ignoring update for {} task {}", task.status, task.id);
        return Ok(ProgressOutcome::Ignored);
    }

    let restarting = lifecycle::reset_target(update.state).is_some();
    let (mut total, mut completed) = (task.total_length, task.completed_length);
    if lifecycle::records_lengths(task) {
        if update.total_length >= 0 {
            total = update.total_length;
        }
        if update.completed_length >= 0 {
            completed = update.completed_length;
        }
    }

    if !restarting && completed < task.completed_length {
        warn!(
            "Rejecting regressed progress for {}: {} -> {}",
            task.active_gid, task.completed_length, completed
        );
        return Ok(ProgressOutcome::Regressed);
    }
    if total >= 0 && completed > total {
        return Err(DlrelayError::Validation(format!(
            "completed length {} exceeds total {} for {}",
            completed, total, task.active_gid
        )));
    }

    task.total_length = total;
    task.completed_length = completed;
    if let Some(name) = update.package_name.filter(|name| !name.is_empty()) {
        task.package_name = Some(name);
    }

    let status = lifecycle::next_status(task, update.state);
    if status != task.status {
        info!("Task {} {} -> {}", task.id, task.status, status);
        task.status = status;
    }
    task.updated_at = Utc::now();
    Ok(ProgressOutcome::Applied(status))
}

/// Fold shadow state into a task that is about to be inserted
fn merge_shadow(
    task: &mut Task,
    shadow: &UpdateNotification,
    indexes: &Indexes,
) -> Result<(), String> {
    if shadow.owner != task.owner {
        return Err(format!("owner {} does not match {}", shadow.owner, task.owner));
    }

    if let Some(hash) = &shadow.info_hash {
        match &task.info_hash {
            Some(_) if !task.info_hash_matches(hash) => {
                return Err(format!("info hash {} does not match", hash));
            }
            Some(_) => {}
            None => task.info_hash = Some(hash.clone()),
        }
    }

    if shadow.active_gid != task.original_gid {
        if task.info_hash.is_none() {
            return Err("gid changed without an info hash".to_string());
        }
        if indexes.resolve(&shadow.active_gid).is_some() {
            return Err(format!("{} belongs to another task", shadow.active_gid));
        }
        task.active_gid = shadow.active_gid.clone();
    }

    match apply_update(task, ProgressUpdate::from_notification(shadow)) {
        Ok(_) => Ok(()),
        Err(e) => Err(e.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn progress(total: i64, completed: i64) -> ProgressUpdate {
        ProgressUpdate {
            total_length: total,
            completed_length: completed,
            ..Default::default()
        }
    }

    fn notification(original: &str, active: &str) -> UpdateNotification {
        UpdateNotification {
            owner: "bob".into(),
            original_gid: original.into(),
            active_gid: active.into(),
            total_length: -1,
            completed_length: -1,
            package_name: None,
            info_hash: None,
            state: None,
        }
    }

    #[test]
    fn test_create_and_find() {
        let registry = TaskRegistry::default();
        let handle = registry.create("bob", SourceKind::Http, "g1", None).unwrap();
        assert_eq!(handle.status, TaskStatus::Pending);

        let task = registry.find_by_gid("g1").unwrap();
        assert_eq!(task.owner, "bob");
        assert_eq!(task.active_gid, "g1");
        assert!(registry.find_by_gid("nope").is_none());
    }

    #[test]
    fn test_create_rejects_duplicates_and_blanks() {
        let registry = TaskRegistry::default();
        registry.create("bob", SourceKind::Http, "g1", None).unwrap();

        assert!(matches!(
            registry.create("alice", SourceKind::Http, "g1", None),
            Err(DlrelayError::AlreadyTracked(_))
        ));
        assert!(matches!(
            registry.create("", SourceKind::Http, "g2", None),
            Err(DlrelayError::Validation(_))
        ));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_remap_retires_old_gid_and_preserves_fields() {
        let registry = TaskRegistry::default();
        registry
            .create("bob", SourceKind::Torrent, "g1", Some("AAA".into()))
            .unwrap();
        registry.remap("g1", "g2", Some("aaa")).unwrap();
        registry
            .apply_progress(
                "g2",
                ProgressUpdate {
                    total_length: 100,
                    completed_length: 40,
                    package_name: Some("linux.iso".into()),
                    state: None,
                },
            )
            .unwrap();

        let task = registry.find_by_gid("g1").unwrap();
        assert_eq!(task.active_gid, "g2");
        assert_eq!(task.owner, "bob");
        assert_eq!(task.info_hash.as_deref(), Some("AAA"));
        assert_eq!(task.completed_length, 40);
        assert_eq!(task.status, TaskStatus::Active);

        // Repeating the remap is harmless, moving again is not
        registry.remap("g1", "g2", Some("AAA")).unwrap();
        assert!(matches!(
            registry.remap("g2", "g3", Some("AAA")),
            Err(DlrelayError::GidConflict { .. })
        ));

        let indexes = registry.indexes.read();
        assert_eq!(indexes.live.len(), 1);
        assert!(indexes.live.contains_key("g2"));
        assert!(indexes.retired.contains_key("g1"));
    }

    #[test]
    fn test_remap_keeps_recorded_progress_and_name() {
        let registry = TaskRegistry::default();
        registry.create("bob", SourceKind::Http, "g1", None).unwrap();
        registry
            .apply_progress(
                "g1",
                ProgressUpdate {
                    total_length: 100,
                    completed_length: 60,
                    package_name: Some("debian.iso".into()),
                    state: None,
                },
            )
            .unwrap();

        registry.remap("g1", "g2", Some("BBB")).unwrap();

        let task = registry.find_by_gid("g2").unwrap();
        assert_eq!(task.original_gid, "g1");
        assert_eq!(task.package_name.as_deref(), Some("debian.iso"));
        assert_eq!(task.completed_length, 60);
        assert_eq!(task.total_length, 100);
        assert_eq!(task.info_hash.as_deref(), Some("BBB"));
        assert_eq!(task.status, TaskStatus::Active);
    }

    #[test]
    fn test_remap_hash_mismatch_keeps_mapping() {
        let registry = TaskRegistry::default();
        registry
            .create("bob", SourceKind::Torrent, "g1", Some("AAA".into()))
            .unwrap();

        let err = registry.remap("g1", "g2", Some("BBB")).unwrap_err();
        assert!(matches!(err, DlrelayError::GidConflict { .. }));
        assert_eq!(registry.find_by_gid("g1").unwrap().active_gid, "g1");
        assert!(registry.find_by_gid("g2").is_none());
    }

    #[test]
    fn test_remap_does_not_steal_another_tasks_gid() {
        let registry = TaskRegistry::default();
        registry.create("bob", SourceKind::Torrent, "g1", Some("AAA".into())).unwrap();
        registry.create("bob", SourceKind::Http, "g2", None).unwrap();

        assert!(matches!(
            registry.remap("g1", "g2", Some("AAA")),
            Err(DlrelayError::GidConflict { .. })
        ));
        assert_eq!(registry.find_by_gid("g2").unwrap().kind, SourceKind::Http);
    }

    #[test]
    fn test_progress_is_monotonic_unless_restarted() {
        let registry = TaskRegistry::default();
        registry.create("bob", SourceKind::Http, "g1", None).unwrap();

        registry.apply_progress("g1", progress(1000, 500)).unwrap();
        let outcome = registry.apply_progress("g1", progress(1000, 300)).unwrap();
        assert_eq!(outcome, ProgressOutcome::Regressed);
        assert_eq!(registry.find_by_gid("g1").unwrap().completed_length, 500);

        let restart = ProgressUpdate {
            state: Some(EngineState::Waiting),
            ..progress(1000, 0)
        };
        let outcome = registry.apply_progress("g1", restart).unwrap();
        assert_eq!(outcome, ProgressOutcome::Applied(TaskStatus::Pending));
        assert_eq!(registry.find_by_gid("g1").unwrap().completed_length, 0);
    }

    #[test]
    fn test_completed_never_exceeds_total() {
        let registry = TaskRegistry::default();
        registry.create("bob", SourceKind::Http, "g1", None).unwrap();
        registry.apply_progress("g1", progress(1000, 900)).unwrap();

        let err = registry.apply_progress("g1", progress(800, -1)).unwrap_err();
        assert!(matches!(err, DlrelayError::Validation(_)));

        let task = registry.find_by_gid("g1").unwrap();
        assert_eq!((task.total_length, task.completed_length), (1000, 900));
    }

    #[test]
    fn test_unknown_lengths_keep_stored_values() {
        let registry = TaskRegistry::default();
        registry.create("bob", SourceKind::Http, "g1", None).unwrap();
        registry.apply_progress("g1", progress(1000, 10)).unwrap();
        registry.apply_progress("g1", progress(-1, -1)).unwrap();

        let task = registry.find_by_gid("g1").unwrap();
        assert_eq!((task.total_length, task.completed_length), (1000, 10));
    }

    #[test]
    fn test_completion_is_terminal() {
        let registry = TaskRegistry::default();
        registry.create("bob", SourceKind::Http, "g1", None).unwrap();
        let outcome = registry.apply_progress("g1", progress(10, 10)).unwrap();
        assert_eq!(outcome, ProgressOutcome::Applied(TaskStatus::Completed));

        let outcome = registry.apply_progress("g1", progress(20, 15)).unwrap();
        assert_eq!(outcome, ProgressOutcome::Ignored);
    }

    #[test]
    fn test_metadata_phase_lengths_not_recorded() {
        let registry = TaskRegistry::default();
        registry.create("bob", SourceKind::Torrent, "g1", Some("AAA".into())).unwrap();
        registry.apply_progress("g1", progress(16384, 16384)).unwrap();

        let task = registry.find_by_gid("g1").unwrap();
        assert_eq!(task.status, TaskStatus::Metadata);
        assert_eq!(task.completed_length, -1);
    }

    #[test]
    fn test_list_by_owner_is_isolated_and_ordered() {
        let registry = TaskRegistry::default();
        registry.create("bob", SourceKind::Http, "b1", None).unwrap();
        registry.create("alice", SourceKind::Http, "a1", None).unwrap();
        registry.create("bob", SourceKind::Http, "b2", None).unwrap();

        let bobs = registry.list_by_owner("bob");
        assert_eq!(
            bobs.iter().map(|t| t.original_gid.as_str()).collect::<Vec<_>>(),
            vec!["b1", "b2"]
        );
        assert!(bobs.iter().all(|t| t.owner == "bob"));
        assert!(registry.list_by_owner("carol").is_empty());
    }

    #[test]
    fn test_shadow_merged_on_create() {
        let registry = TaskRegistry::default();
        let mut early = notification("g1", "g1");
        early.total_length = 1000;
        early.completed_length = 100;
        early.package_name = Some("movie.mkv".into());

        assert_eq!(registry.record_shadow(&early).unwrap(), ShadowResult::Recorded);
        assert!(registry.list_by_owner("bob").is_empty());
        assert_eq!(registry.shadow_count(), 1);

        registry.create("bob", SourceKind::Http, "g1", None).unwrap();
        assert_eq!(registry.shadow_count(), 0);

        let task = registry.find_by_gid("g1").unwrap();
        assert_eq!(task.completed_length, 100);
        assert_eq!(task.package_name.as_deref(), Some("movie.mkv"));
        assert_eq!(task.status, TaskStatus::Active);
    }

    #[test]
    fn test_shadow_with_remap_merged_on_create() {
        let registry = TaskRegistry::default();
        let mut early = notification("g1", "g2");
        early.info_hash = Some("AAA".into());
        registry.record_shadow(&early).unwrap();

        registry.create("bob", SourceKind::Torrent, "g1", Some("AAA".into())).unwrap();
        let task = registry.find_by_gid("g2").unwrap();
        assert_eq!(task.original_gid, "g1");
        assert_eq!(task.status, TaskStatus::Active);
    }

    #[test]
    fn test_mismatched_shadow_dropped() {
        let registry = TaskRegistry::default();
        let mut early = notification("g1", "g2");
        early.info_hash = Some("BBB".into());
        registry.record_shadow(&early).unwrap();

        registry.create("bob", SourceKind::Torrent, "g1", Some("AAA".into())).unwrap();
        let task = registry.find_by_gid("g1").unwrap();
        assert_eq!(task.active_gid, "g1");
        assert!(registry.find_by_gid("g2").is_none());
    }

    #[test]
    fn test_shadow_reports_existing_task() {
        let registry = TaskRegistry::default();
        registry.create("bob", SourceKind::Http, "g1", None).unwrap();
        assert_eq!(
            registry.record_shadow(&notification("g1", "g1")).unwrap(),
            ShadowResult::TaskExists
        );
        assert_eq!(registry.shadow_count(), 0);
    }

    #[test]
    fn test_expired_shadows_swept() {
        let registry = TaskRegistry::new(Duration::ZERO);
        registry.record_shadow(&notification("g1", "g1")).unwrap();
        thread::sleep(Duration::from_millis(5));

        assert_eq!(registry.sweep_shadows(), 1);
        assert_eq!(registry.shadow_count(), 0);
    }

    #[test]
    fn test_concurrent_progress_and_reads() {
        let registry = Arc::new(TaskRegistry::default());
        for i in 0..8 {
            registry
                .create("bob", SourceKind::Http, &format!("g{}", i), None)
                .unwrap();
        }

        let writers: Vec<_> = (0..8)
            .map(|i| {
                let registry = Arc::clone(&registry);
                thread::spawn(move || {
                    let gid = format!("g{}", i);
                    for step in 0..=100 {
                        registry.apply_progress(&gid, progress(100, step)).unwrap();
                    }
                })
            })
            .collect();

        let reader = {
            let registry = Arc::clone(&registry);
            thread::spawn(move || {
                for _ in 0..200 {
                    for task in registry.list_by_owner("bob") {
                        if task.lengths_known() {
                            assert!(task.completed_length <= task.total_length);
                        }
                    }
                }
            })
        };

        for writer in writers {
            writer.join().unwrap();
        }
        reader.join().unwrap();

        assert!(registry
            .list_by_owner("bob")
            .iter()
            .all(|t| t.status == TaskStatus::Completed));
    }
}
