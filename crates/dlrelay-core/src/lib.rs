//! dlrelay Core - download request relay
//!
//! This crate authenticates callers, submits their downloads to an
//! aria2-style engine, tracks the engine's gids per owner and turns the
//! engine's push notifications into per-owner progress snapshots.

mod auth;
mod capability;
mod credentials;
mod engine;
mod error;
pub mod lifecycle;
mod projector;
mod pump;
mod reconciler;
mod registry;

pub use auth::*;
pub use capability::*;
pub use credentials::*;
pub use engine::*;
pub use error::*;
pub use projector::*;
pub use pump::*;
pub use reconciler::*;
pub use registry::*;

use dlrelay_types::{
    Credentials, HttpAuth, ProgressSnapshot, ReconcileOutcome, Settings, SourceKind,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// The main dlrelay core instance
#[derive(Clone)]
pub struct DlrelayCore {
    /// Caller authentication
    gate: CredentialGate,
    /// Engine submissions
    engine: EngineAdapter,
    /// Tracked tasks
    pub registry: Arc<TaskRegistry>,
    /// Snapshot builder
    projector: ProgressProjector,
    /// Ordered notification intake
    pump: NotificationPump,
    /// Shared secret the push channel must present, when configured
    notify_secret: Option<Arc<str>>,
    /// Stops the pump and the shadow sweeper
    shutdown: CancellationToken,
}

impl DlrelayCore {
    /// Wire the core from its parts.
    ///
    /// Spawns the notification pump and the shadow sweeper, so this must be
    /// called from within a Tokio runtime.
    pub fn new(
        store: Arc<dyn CredentialStore>,
        engine: Arc<dyn DownloadEngine>,
        capabilities: CapabilityRegistry,
        settings: &Settings,
    ) -> Self {
        let registry = Arc::new(TaskRegistry::new(Duration::from_secs(
            settings.shadow_retention_secs,
        )));
        let reconciler = Arc::new(Reconciler::new(Arc::clone(&registry)));
        let shutdown = CancellationToken::new();

        let (pump, _) = NotificationPump::spawn(
            reconciler,
            settings.notify_queue_depth,
            shutdown.child_token(),
        );
        spawn_shadow_sweeper(
            Arc::clone(&registry),
            Duration::from_secs(settings.sweep_interval_secs.max(1)),
            shutdown.child_token(),
        );

        debug!("Link resolvers: {}", capabilities.resolver_names().join(", "));

        Self {
            gate: CredentialGate::new(store),
            engine: EngineAdapter::new(engine, Arc::new(capabilities), submit_timeout(settings)),
            projector: ProgressProjector::new(Arc::clone(&registry)),
            registry,
            pump,
            notify_secret: settings
                .engine_secret
                .as_deref()
                .filter(|secret| !secret.is_empty())
                .map(Arc::from),
            shutdown,
        }
    }

    /// Build a core backed by the sqlite credential store and an aria2
    /// JSON-RPC client, as configured in `settings`
    pub async fn from_settings(data_dir: &Path, settings: &Settings) -> Result<Self, DlrelayError> {
        let db_path = credential_db_path(data_dir, settings);
        let store = SqliteCredentialStore::open(&db_path).await?;

        let client = Aria2Client::new(
            settings.engine_rpc_url.clone(),
            settings.engine_secret.clone(),
            submit_timeout(settings),
        )?;

        info!(
            "Core ready: engine {} credentials {}",
            settings.engine_rpc_url,
            db_path.display()
        );
        Ok(Self::new(
            Arc::new(store),
            Arc::new(client),
            CapabilityRegistry::with_defaults(),
            settings,
        ))
    }

    /// Token cancelled when the core shuts down
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Stop background work
    pub fn shutdown(&self) {
        info!("Shutting down core");
        self.shutdown.cancel();
    }

    // ========================================================================
    // Download Operations
    // ========================================================================

    /// Submit a download on behalf of `owner` and start tracking it.
    ///
    /// The submission runs on its own task: once the engine accepts the
    /// transfer, the task is recorded even if the caller stops waiting.
    pub async fn create_download(
        &self,
        credentials: &Credentials,
        owner: &str,
        uri: &str,
        kind: SourceKind,
        auth: Option<HttpAuth>,
    ) -> Result<TaskHandle, DlrelayError> {
        self.gate.require(credentials).await?;
        if owner.is_empty() {
            return Err(DlrelayError::Validation("owner must not be empty".to_string()));
        }

        let engine = self.engine.clone();
        let registry = Arc::clone(&self.registry);
        let owner = owner.to_string();
        let uri = uri.to_string();

        let job = tokio::spawn(async move {
            let submission = engine.submit(&uri, kind, auth.as_ref()).await?;
            registry.create(&owner, kind, &submission.gid, submission.info_hash)
        });

        job.await
            .map_err(|e| DlrelayError::Internal(format!("submission task failed: {}", e)))?
    }

    /// Progress of every task `owner` has, in creation order
    pub async fn query_status(
        &self,
        credentials: &Credentials,
        owner: &str,
    ) -> Result<ProgressSnapshot, DlrelayError> {
        self.gate.require(credentials).await?;
        if owner.is_empty() {
            return Err(DlrelayError::Validation("owner must not be empty".to_string()));
        }
        Ok(self.projector.snapshot_for_owner(owner))
    }

    // ========================================================================
    // Engine Notifications
    // ========================================================================

    /// Check the token a notifier presented against the configured secret
    pub fn authorize_notifier(&self, token: Option<&str>) -> Result<(), DlrelayError> {
        let Some(secret) = self.notify_secret.as_deref() else {
            return Ok(());
        };
        match token {
            None | Some("") => Err(DlrelayError::AuthRequired),
            Some(token) if token == secret => Ok(()),
            Some(_) => {
                warn!("Rejected notification with a wrong token");
                Err(DlrelayError::AuthFailed)
            }
        }
    }

    /// Decode a pushed notification and apply it in arrival order
    pub async fn ingest_notification(&self, raw: &[u8]) -> Result<ReconcileOutcome, DlrelayError> {
        let notification = decode_notification(raw)?;
        debug!(
            "Notification for {} ({} -> {})",
            notification.owner, notification.original_gid, notification.active_gid
        );
        self.pump.submit(notification).await
    }
}

/// Submission timeout; zero in the settings means the default
fn submit_timeout(settings: &Settings) -> Duration {
    match settings.submit_timeout_secs {
        0 => DEFAULT_SUBMIT_TIMEOUT,
        secs => Duration::from_secs(secs),
    }
}

/// Where the credential database lives for these settings
pub fn credential_db_path(data_dir: &Path, settings: &Settings) -> PathBuf {
    settings
        .database_path
        .clone()
        .unwrap_or_else(|| data_dir.join("users.db"))
}

/// Periodically drop shadow records nobody claimed
pub fn spawn_shadow_sweeper(
    registry: Arc<TaskRegistry>,
    period: Duration,
    shutdown: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    registry.sweep_shadows();
                }
            }
        }
        debug!("Shadow sweeper stopped");
    })
}
