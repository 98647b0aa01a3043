//! Update reconciler - folds engine notifications into the registry

use crate::error::DlrelayError;
use crate::registry::{ProgressOutcome, ProgressUpdate, ShadowResult, TaskRegistry};
use dlrelay_types::{ReconcileOutcome, Task, UpdateNotification, UNKNOWN_LENGTH};
use std::sync::Arc;
use tracing::{debug, warn};

/// Decode and validate a raw notification body.
///
/// Nothing is applied anywhere if this fails.
pub fn decode_notification(raw: &[u8]) -> Result<UpdateNotification, DlrelayError> {
    let notification: UpdateNotification = serde_json::from_slice(raw)
        .map_err(|e| DlrelayError::Validation(format!("malformed notification: {}", e)))?;
    validate_notification(&notification)?;
    Ok(notification)
}

/// Completeness check for a decoded notification
pub fn validate_notification(notification: &UpdateNotification) -> Result<(), DlrelayError> {
    let required = [
        ("owner", &notification.owner),
        ("originalGid", &notification.original_gid),
        ("activeGid", &notification.active_gid),
    ];
    for (field, value) in required {
        if value.is_empty() {
            return Err(DlrelayError::Validation(format!("{} is required", field)));
        }
    }

    let optional = [
        ("packageName", &notification.package_name),
        ("infoHash", &notification.info_hash),
    ];
    for (field, value) in optional {
        if value.as_deref() == Some("") {
            return Err(DlrelayError::Validation(format!("{} must not be empty", field)));
        }
    }

    let (total, completed) = (notification.total_length, notification.completed_length);
    if total < UNKNOWN_LENGTH || completed < UNKNOWN_LENGTH {
        return Err(DlrelayError::Validation(format!(
            "lengths must be -1 or positive, got {}/{}",
            completed, total
        )));
    }
    if total >= 0 && completed > total {
        return Err(DlrelayError::Validation(format!(
            "completedLength {} exceeds totalLength {}",
            completed, total
        )));
    }
    Ok(())
}

/// Applies engine notifications to the registry
pub struct Reconciler {
    registry: Arc<TaskRegistry>,
}

impl Reconciler {
    pub fn new(registry: Arc<TaskRegistry>) -> Self {
        Self { registry }
    }

    /// Apply one notification.
    ///
    /// Notifications for gids nobody tracks yet are held as shadow state
    /// and reported as [`ReconcileOutcome::Shadowed`].
    pub fn apply(&self, notification: &UpdateNotification) -> Result<ReconcileOutcome, DlrelayError> {
        validate_notification(notification)?;

        // A task can be created between the lookup and the shadow insert;
        // the second pass then finds it.
        for _ in 0..2 {
            let found = self
                .registry
                .find_by_gid(&notification.original_gid)
                .or_else(|| self.registry.find_by_gid(&notification.active_gid));

            match found {
                Some(task) => return self.apply_to(task, notification),
                None => match self.registry.record_shadow(notification)? {
                    ShadowResult::Recorded => {
                        return Ok(ReconcileOutcome::Shadowed {
                            gid: notification.original_gid.clone(),
                        })
                    }
                    ShadowResult::TaskExists => continue,
                },
            }
        }

        Err(DlrelayError::Internal(format!(
            "could not settle notification for {}",
            notification.original_gid
        )))
    }

    fn apply_to(
        &self,
        task: Task,
        notification: &UpdateNotification,
    ) -> Result<ReconcileOutcome, DlrelayError> {
        if task.owner != notification.owner {
            warn!(
                "Notification for {} names owner {}, task belongs to {}",
                notification.active_gid, notification.owner, task.owner
            );
            return Err(DlrelayError::Validation(format!(
                "owner mismatch for {}",
                notification.active_gid
            )));
        }
        if task.status.is_terminal() {
            debug!("Task {} is {}, ignoring notification", task.id, task.status);
            return Ok(ReconcileOutcome::Ignored {
                gid: task.active_gid,
            });
        }

        let mut moved_from = None;
        if notification.active_gid != task.active_gid {
            if task.is_remapped() && notification.active_gid == task.original_gid {
                // Late report from the metadata phase
                debug!("Dropping stale report for retired gid {}", task.original_gid);
                return Ok(ReconcileOutcome::Ignored {
                    gid: task.original_gid,
                });
            }

            let hash = notification.info_hash.as_deref().ok_or_else(|| {
                DlrelayError::conflict(
                    &notification.active_gid,
                    "gid changed without an info hash to correlate",
                )
            })?;
            self.registry
                .remap(&task.active_gid, &notification.active_gid, Some(hash))?;
            moved_from = Some(task.active_gid.clone());
        }

        let gid = notification.active_gid.clone();
        let outcome = self
            .registry
            .apply_progress(&gid, ProgressUpdate::from_notification(notification))?;

        Ok(match (outcome, moved_from) {
            (ProgressOutcome::Applied(status), Some(from)) => ReconcileOutcome::Remapped {
                from,
                to: gid,
                status,
            },
            (ProgressOutcome::Applied(status), None) => ReconcileOutcome::Applied { gid, status },
            (ProgressOutcome::Regressed, _) => ReconcileOutcome::Regressed { gid },
            (ProgressOutcome::Ignored, _) => ReconcileOutcome::Ignored { gid },
        })
    }
}
