//! End-to-end flows through the core: submission, engine pushes, status

use async_trait::async_trait;
use dlrelay_core::{
    CapabilityRegistry, CredentialStore, DlrelayCore, DlrelayError, DownloadEngine,
};
use dlrelay_types::{
    Credentials, HttpAuth, Percent, ReconcileOutcome, Settings, SourceKind, TaskStatus,
};
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_test::{assert_err, assert_ok};

struct MemoryStore {
    users: HashMap<String, String>,
    lookups: AtomicUsize,
}

#[async_trait]
impl CredentialStore for MemoryStore {
    async fn verify(&self, username: &str, password: &str) -> Result<bool, DlrelayError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        Ok(self.users.get(username).is_some_and(|p| p == password))
    }
}

/// Hands out `gid1`, `gid2`, ... after an optional delay
struct FakeEngine {
    delay: Duration,
    issued: AtomicUsize,
}

#[async_trait]
impl DownloadEngine for FakeEngine {
    async fn add_uri(&self, _uri: &str, _auth: Option<&HttpAuth>) -> Result<String, DlrelayError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let n = self.issued.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(format!("gid{}", n))
    }
}

struct Harness {
    core: DlrelayCore,
    store: Arc<MemoryStore>,
    engine: Arc<FakeEngine>,
}

fn harness(delay: Duration) -> Harness {
    let store = Arc::new(MemoryStore {
        users: HashMap::from([
            ("bob".to_string(), "hunter2".to_string()),
            ("alice".to_string(), "swordfish".to_string()),
        ]),
        lookups: AtomicUsize::new(0),
    });
    let engine = Arc::new(FakeEngine {
        delay,
        issued: AtomicUsize::new(0),
    });
    let settings = Settings {
        submit_timeout_secs: 1,
        ..Settings::default()
    };
    let core = DlrelayCore::new(
        store.clone(),
        engine.clone(),
        CapabilityRegistry::with_defaults(),
        &settings,
    );
    Harness {
        core,
        store,
        engine,
    }
}

/// Base32 form of 0123456789abcdef0123456789abcdef01234567
const HASH_B32: &str = "AERUKZ4JVPG66AJDIVTYTK6N54ASGRLH";

fn magnet(hash: &str) -> String {
    format!("magnet:?xt=urn:btih:{}", hash)
}

fn bob() -> Credentials {
    Credentials::new("bob", "hunter2")
}

#[tokio::test]
async fn test_magnet_remap_then_progress() {
    let h = harness(Duration::ZERO);

    let handle = assert_ok!(
        h.core
            .create_download(&bob(), "bob", &magnet(HASH_B32), SourceKind::Torrent, None)
            .await
    );
    assert_eq!(handle.gid, "gid1");
    assert_eq!(handle.status, TaskStatus::Metadata);

    let remap = br#"{"owner":"bob","originalGid":"gid1","activeGid":"gid2",
        "totalLength":-1,"completedLength":-1,
        "infoHash":"0123456789abcdef0123456789abcdef01234567"}"#;
    let outcome = assert_ok!(h.core.ingest_notification(remap).await);
    assert!(matches!(outcome, ReconcileOutcome::Remapped { .. }));

    let task = h.core.registry.find_by_gid("gid2").unwrap();
    assert_eq!(task.original_gid, "gid1");
    let snapshot = assert_ok!(h.core.query_status(&bob(), "bob").await);
    assert_eq!(snapshot.len(), 1);
    assert_eq!(snapshot.entries[0].percent, Percent::Unknown);

    let progress = br#"{"owner":"bob","originalGid":"gid1","activeGid":"gid2",
        "totalLength":1000000,"completedLength":250000}"#;
    assert_ok!(h.core.ingest_notification(progress).await);

    let snapshot = assert_ok!(h.core.query_status(&bob(), "bob").await);
    assert_eq!(snapshot.entries[0].percent, Percent::Known(25));
}

#[tokio::test]
async fn test_empty_uri_creates_nothing() {
    let h = harness(Duration::ZERO);

    let err = assert_err!(
        h.core
            .create_download(&bob(), "bob", "", SourceKind::Http, None)
            .await
    );
    assert!(matches!(err, DlrelayError::Validation(_)));
    assert!(h.core.registry.is_empty());
    assert_eq!(h.engine.issued.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_engine_timeout_creates_nothing() {
    let h = harness(Duration::from_secs(30));

    let err = assert_err!(
        h.core
            .create_download(&bob(), "bob", "https://files.example/a.iso", SourceKind::Http, None)
            .await
    );
    assert!(matches!(err, DlrelayError::EngineUnavailable(_)));
    assert!(h.core.registry.is_empty());

    // A push for a gid that was never issued to us stays a shadow
    let stray = br#"{"owner":"bob","originalGid":"gid1","activeGid":"gid1",
        "totalLength":10,"completedLength":5}"#;
    let outcome = assert_ok!(h.core.ingest_notification(stray).await);
    assert!(matches!(outcome, ReconcileOutcome::Shadowed { .. }));
    assert!(h.core.registry.is_empty());
    assert!(h.core.query_status(&bob(), "bob").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_hash_mismatch_keeps_mapping() {
    let h = harness(Duration::ZERO);
    assert_ok!(
        h.core
            .create_download(&bob(), "bob", &magnet(HASH_B32), SourceKind::Torrent, None)
            .await
    );

    let wrong = br#"{"owner":"bob","originalGid":"gid1","activeGid":"gid9",
        "infoHash":"ffffffffffffffffffffffffffffffffffffffff"}"#;
    let err = assert_err!(h.core.ingest_notification(wrong).await);
    assert!(matches!(err, DlrelayError::GidConflict { .. }));

    let task = h.core.registry.find_by_gid("gid1").unwrap();
    assert_eq!(task.active_gid, "gid1");
    assert!(h.core.registry.find_by_gid("gid9").is_none());
}

#[tokio::test]
async fn test_progress_ahead_of_creation_is_kept() {
    let h = harness(Duration::ZERO);

    let early = br#"{"owner":"bob","originalGid":"gid1","activeGid":"gid1",
        "totalLength":400,"completedLength":100,"packageName":"early.bin"}"#;
    let outcome = assert_ok!(h.core.ingest_notification(early).await);
    assert!(matches!(outcome, ReconcileOutcome::Shadowed { .. }));

    assert_ok!(
        h.core
            .create_download(&bob(), "bob", "https://files.example/early.bin", SourceKind::Http, None)
            .await
    );

    let snapshot = assert_ok!(h.core.query_status(&bob(), "bob").await);
    assert_eq!(snapshot.get("early.bin"), Some(Percent::Known(25)));
}

#[tokio::test]
async fn test_owners_are_isolated() {
    let h = harness(Duration::ZERO);
    let alice = Credentials::new("alice", "swordfish");

    let uris = ["https://a.example/1.iso", "https://a.example/2.iso"];
    for uri in uris {
        assert_ok!(
            h.core
                .create_download(&alice, "alice", uri, SourceKind::Http, None)
                .await
        );
    }
    assert_ok!(
        h.core
            .create_download(&bob(), "bob", "https://b.example/x.iso", SourceKind::Http, None)
            .await
    );

    assert_eq!(h.core.registry.list_by_owner("alice").len(), 2);
    let bobs = h.core.registry.list_by_owner("bob");
    assert_eq!(bobs.len(), 1);
    assert!(bobs.iter().all(|t| t.owner == "bob"));
}

#[tokio::test]
async fn test_missing_credentials_skip_store() {
    let h = harness(Duration::ZERO);

    let err = assert_err!(
        h.core
            .create_download(
                &Credentials::new("", "hunter2"),
                "bob",
                "https://files.example/a.iso",
                SourceKind::Http,
                None
            )
            .await
    );
    assert!(matches!(err, DlrelayError::AuthRequired));

    let err = assert_err!(h.core.query_status(&Credentials::new("bob", ""), "bob").await);
    assert!(matches!(err, DlrelayError::AuthRequired));
    assert_eq!(h.store.lookups.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_abandoned_request_still_tracked() {
    let h = harness(Duration::from_millis(100));

    let core = h.core.clone();
    let request = tokio::spawn(async move {
        core.create_download(&bob(), "bob", "https://files.example/a.iso", SourceKind::Http, None)
            .await
    });
    tokio::time::sleep(Duration::from_millis(20)).await;
    request.abort();

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(h.core.registry.len(), 1);
    assert!(h.core.registry.find_by_gid("gid1").is_some());
}

#[tokio::test]
async fn test_concurrent_submissions_and_pushes() {
    let h = harness(Duration::from_millis(5));

    let creates = (0..16).map(|i| {
        let core = h.core.clone();
        async move {
            core.create_download(
                &bob(),
                "bob",
                &format!("https://files.example/{}.bin", i),
                SourceKind::Http,
                None,
            )
            .await
        }
    });
    for result in join_all(creates).await {
        assert_ok!(result);
    }

    let pushes = (1..=16).flat_map(|n| {
        (0..=4).map(move |step| {
            format!(
                r#"{{"owner":"bob","originalGid":"gid{n}","activeGid":"gid{n}","totalLength":100,"completedLength":{}}}"#,
                step * 25
            )
        })
    });
    // Same-gid pushes go in order; different gids interleave
    for raw in pushes {
        assert_ok!(h.core.ingest_notification(raw.as_bytes()).await);
    }

    let tasks = h.core.registry.list_by_owner("bob");
    assert_eq!(tasks.len(), 16);
    assert!(tasks.iter().all(|t| t.status == TaskStatus::Completed));
    assert!(tasks.iter().all(|t| t.completed_length <= t.total_length));

    let snapshot = assert_ok!(h.core.query_status(&bob(), "bob").await);
    assert_eq!(snapshot.len(), 16);
}
