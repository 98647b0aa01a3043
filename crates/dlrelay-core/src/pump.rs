//! Notification pump - services the engine's push channel
//!
//! A single consumer drains a bounded queue, so notifications are applied
//! in the order they arrived. Each sender gets the outcome back.

use crate::error::DlrelayError;
use crate::reconciler::Reconciler;
use dlrelay_types::{ReconcileOutcome, UpdateNotification};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

type Reply = oneshot::Sender<Result<ReconcileOutcome, DlrelayError>>;

struct Envelope {
    notification: UpdateNotification,
    reply: Reply,
}

/// Handle for queueing notifications
#[derive(Clone)]
pub struct NotificationPump {
    tx: mpsc::Sender<Envelope>,
}

impl NotificationPump {
    /// Start the consumer task
    pub fn spawn(
        reconciler: Arc<Reconciler>,
        depth: usize,
        shutdown: CancellationToken,
    ) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel::<Envelope>(depth.max(1));

        let handle = tokio::spawn(async move {
            info!("Notification pump started");
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    envelope = rx.recv() => {
                        let Some(envelope) = envelope else { break };
                        let result = reconciler.apply(&envelope.notification);
                        if let Err(e) = &result {
                            warn!(
                                "Rejected notification for {}: {}",
                                envelope.notification.active_gid, e
                            );
                        }
                        if envelope.reply.send(result).is_err() {
                            debug!("Notification sender went away before the reply");
                        }
                    }
                }
            }
            info!("Notification pump stopped");
        });

        (Self { tx }, handle)
    }

    /// Queue a validated notification and wait for its outcome
    pub async fn submit(
        &self,
        notification: UpdateNotification,
    ) -> Result<ReconcileOutcome, DlrelayError> {
        let (reply, outcome) = oneshot::channel();
        self.tx
            .send(Envelope {
                notification,
                reply,
            })
            .await
            .map_err(|_| DlrelayError::Internal("notification pump is not running".to_string()))?;

        outcome
            .await
            .map_err(|_| DlrelayError::Internal("notification pump dropped the request".to_string()))?
    }
}
