//! Shared types for dlrelay
//!
//! This crate contains the data structures shared between the core
//! library and the `dlrelay` binary: tracked tasks, engine notifications,
//! progress snapshots, settings and API payloads.

use chrono::{DateTime, Utc};
use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;
use uuid::Uuid;

/// Byte count reported when the engine does not know a length yet
pub const UNKNOWN_LENGTH: i64 = -1;

/// Label used in status snapshots for tasks the engine has not named yet
pub const UNNAMED_TASK_LABEL: &str = "Unknown Download";

// ============================================================================
// Task Types
// ============================================================================

/// A single download tracked on behalf of an owner
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    pub owner: String,
    pub kind: SourceKind,
    /// Gid issued by the engine at submission time
    pub original_gid: String,
    /// Gid currently representing the live transfer
    pub active_gid: String,
    pub total_length: i64,
    pub completed_length: i64,
    pub package_name: Option<String>,
    pub info_hash: Option<String>,
    pub status: TaskStatus,
    /// Monotonic creation counter, used for stable ordering
    pub sequence: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    pub fn new(
        owner: String,
        kind: SourceKind,
        gid: String,
        info_hash: Option<String>,
        sequence: u64,
    ) -> Self {
        let now = Utc::now();
        // Magnet links carry their info hash and start by fetching metadata
        let status = if kind == SourceKind::Torrent && info_hash.is_some() {
            TaskStatus::Metadata
        } else {
            TaskStatus::Pending
        };

        Self {
            id: Uuid::new_v4(),
            owner,
            kind,
            original_gid: gid.clone(),
            active_gid: gid,
            total_length: UNKNOWN_LENGTH,
            completed_length: UNKNOWN_LENGTH,
            package_name: None,
            info_hash,
            status,
            sequence,
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether the engine has reassigned this task's gid
    pub fn is_remapped(&self) -> bool {
        self.active_gid != self.original_gid
    }

    /// Whether both byte counts are known
    pub fn lengths_known(&self) -> bool {
        self.total_length >= 0 && self.completed_length >= 0
    }

    /// Case-insensitive info hash comparison
    pub fn info_hash_matches(&self, other: &str) -> bool {
        self.info_hash
            .as_deref()
            .map(|own| own.eq_ignore_ascii_case(other))
            .unwrap_or(false)
    }
}

/// Kind of source a download request refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// Magnet link or URL of a `.torrent` metadata file
    Torrent,
    /// Plain HTTP/HTTPS/FTP download
    Http,
    /// Page on a video-sharing site that has to be resolved to a media link
    Video,
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SourceKind::Torrent => "torrent",
            SourceKind::Http => "http",
            SourceKind::Video => "video",
        };
        f.write_str(name)
    }
}

/// Status of a tracked task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Metadata,
    Active,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Metadata => "metadata",
            TaskStatus::Active => "active",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Transfer state as reported by the engine alongside a notification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineState {
    Active,
    Waiting,
    Paused,
    Error,
    Complete,
    Removed,
}

// ============================================================================
// Engine Notifications
// ============================================================================

/// State-change message pushed by the download engine.
///
/// Missing lengths decode as [`UNKNOWN_LENGTH`] and missing strings as empty,
/// so that completeness is checked in one place after decoding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateNotification {
    #[serde(default)]
    pub owner: String,
    #[serde(default)]
    pub original_gid: String,
    #[serde(default)]
    pub active_gid: String,
    #[serde(default = "unknown_length")]
    pub total_length: i64,
    #[serde(default = "unknown_length")]
    pub completed_length: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub package_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub info_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<EngineState>,
}

fn unknown_length() -> i64 {
    UNKNOWN_LENGTH
}

/// What happened to a notification once it reached the registry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ReconcileOutcome {
    Applied { gid: String, status: TaskStatus },
    Remapped { from: String, to: String, status: TaskStatus },
    /// No task owns the gid yet; state is held until the task is created
    Shadowed { gid: String },
    /// Progress went backwards without a restart and was dropped
    Regressed { gid: String },
    /// Task already reached a terminal state
    Ignored { gid: String },
}

// ============================================================================
// Progress Types
// ============================================================================

/// Whole-number completion percentage, or unknown
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Percent {
    Known(u8),
    Unknown,
}

impl Percent {
    /// Wire value; `-1` stands for unknown
    pub fn as_i32(&self) -> i32 {
        match self {
            Percent::Known(value) => i32::from(*value),
            Percent::Unknown => -1,
        }
    }

    pub fn from_i64(value: i64) -> Self {
        match u8::try_from(value) {
            Ok(v) if v <= 100 => Percent::Known(v),
            _ => Percent::Unknown,
        }
    }
}

impl fmt::Display for Percent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Percent::Known(value) => write!(f, "{}%", value),
            Percent::Unknown => f.write_str("unknown"),
        }
    }
}

impl Serialize for Percent {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i32(self.as_i32())
    }
}

impl<'de> Deserialize<'de> for Percent {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(Percent::from_i64(i64::deserialize(deserializer)?))
    }
}

/// One labelled line of a status snapshot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressEntry {
    pub label: String,
    pub percent: Percent,
}

/// Ordered label -> percent mapping for one owner.
///
/// Serialized as a JSON object whose keys keep creation order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProgressSnapshot {
    pub entries: Vec<ProgressEntry>,
}

impl ProgressSnapshot {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, label: &str) -> Option<Percent> {
        self.entries
            .iter()
            .find(|entry| entry.label == label)
            .map(|entry| entry.percent)
    }
}

impl Serialize for ProgressSnapshot {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for entry in &self.entries {
            map.serialize_entry(&entry.label, &entry.percent)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for ProgressSnapshot {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct SnapshotVisitor;

        impl<'de> Visitor<'de> for SnapshotVisitor {
            type Value = ProgressSnapshot;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map of download names to percentages")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
                let mut entries = Vec::with_capacity(access.size_hint().unwrap_or(0));
                while let Some((label, percent)) = access.next_entry::<String, Percent>()? {
                    entries.push(ProgressEntry { label, percent });
                }
                Ok(ProgressSnapshot { entries })
            }
        }

        deserializer.deserialize_map(SnapshotVisitor)
    }
}

// ============================================================================
// API Types
// ============================================================================

/// Caller identity presented with every request
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

/// Login forwarded to the engine for protected HTTP downloads
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpAuth {
    pub username: String,
    pub password: String,
}

/// Reply to a download submission
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status")]
pub enum SubmitResponse {
    #[serde(rename = "OK")]
    Ok { gid: String },
    #[serde(rename = "ERROR")]
    Error { message: String },
}

// ============================================================================
// Settings Types
// ============================================================================

/// Service settings, loaded from `settings.json` in the data directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Address the HTTP surface binds to
    pub listen_addr: SocketAddr,
    /// JSON-RPC endpoint of the download engine
    pub engine_rpc_url: String,
    /// RPC secret token, if the engine requires one
    pub engine_secret: Option<String>,
    /// Upper bound for a single submission call
    pub submit_timeout_secs: u64,
    /// How long an unclaimed shadow record is kept
    pub shadow_retention_secs: u64,
    /// How often expired shadows are swept
    pub sweep_interval_secs: u64,
    /// Capacity of the notification queue
    pub notify_queue_depth: usize,
    /// Credential database; defaults to `<data_dir>/users.db`
    pub database_path: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 7899)),
            engine_rpc_url: "http://127.0.0.1:6800/jsonrpc".to_string(),
            engine_secret: None,
            submit_timeout_secs: 5,
            shadow_retention_secs: 120,
            sweep_interval_secs: 30,
            notify_queue_depth: 1024,
            database_path: None,
        }
    }
}
