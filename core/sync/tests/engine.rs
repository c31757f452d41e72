//! Integration tests for the sync engine against an in-memory record server.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use syncto_common::{Error, Result};
use syncto_crypto::{CollectionKeys, EncryptedPayload, MasterKey, RecordCipher, SyncCrypto};
use syncto_storage::{Collection, Conflict, Failure, MemoryRemote, Record};
use syncto_sync::{
    BootstrapState, EngineOptions, ErrorKind, SyncAdapter, SyncEngine, SyncOptions,
};

const URL: &str = "https://sync.example.com/v1/";
const ASSERTION: &str = "test-assertion";
const KB: &str = "fd5c747806c07ce0b9d69dcfea144663e630b65ec4963596a22f24910d7dd15d";
const CLIENT_STATE: &str = "6ae94683571c7a7c54dab4700aa3995f";

/// Cipher that stores the cleartext JSON in the ciphertext field.
#[derive(Default)]
struct MockCipher {
    corrupt_keys: bool,
    set_keys_calls: AtomicUsize,
    decrypt_calls: AtomicUsize,
}

impl MockCipher {
    fn corrupt() -> Self {
        Self {
            corrupt_keys: true,
            ..Default::default()
        }
    }
}

fn mock_envelope(cleartext: &Value) -> EncryptedPayload {
    EncryptedPayload {
        ciphertext: cleartext.to_string(),
        iv: "mock-iv".to_string(),
        hmac: "mock-hmac".to_string(),
    }
}

impl RecordCipher for MockCipher {
    fn set_keys(&self, _master_key: &MasterKey, _keys: &EncryptedPayload) -> Result<()> {
        self.set_keys_calls.fetch_add(1, Ordering::SeqCst);
        if self.corrupt_keys {
            Err(Error::IntegrityCheck("HMAC mismatch".to_string()))
        } else {
            Ok(())
        }
    }

    fn encrypt(&self, cleartext: &Value, _collection: &str) -> Result<EncryptedPayload> {
        Ok(mock_envelope(cleartext))
    }

    fn decrypt(&self, envelope: &EncryptedPayload, _collection: &str) -> Result<Value> {
        self.decrypt_calls.fetch_add(1, Ordering::SeqCst);
        Ok(serde_json::from_str(&envelope.ciphertext)?)
    }
}

/// Adapter recording every call it receives.
#[derive(Default)]
struct TestAdapter {
    changed: bool,
    /// Payload created in the collection on the next `update`.
    write: Mutex<Option<Value>>,
    updates: Mutex<Vec<(Vec<Record>, SyncOptions)>>,
    conflicts: Mutex<Vec<Conflict>>,
    resets: Mutex<Vec<SyncOptions>>,
}

impl TestAdapter {
    fn reporting(changed: bool) -> Self {
        Self {
            changed,
            ..Default::default()
        }
    }

    fn writing(payload: Value, changed: bool) -> Self {
        Self {
            changed,
            write: Mutex::new(Some(payload)),
            ..Default::default()
        }
    }

    fn update_count(&self) -> usize {
        self.updates.lock().len()
    }
}

#[async_trait]
impl SyncAdapter for TestAdapter {
    async fn update(&self, collection: Arc<Collection>, options: &SyncOptions) -> Result<bool> {
        let records = collection.list().await;
        self.updates.lock().push((records, options.clone()));

        let write = self.write.lock().take();
        if let Some(payload) = write {
            collection.create(payload).await?;
        }
        Ok(self.changed)
    }

    async fn handle_conflict(&self, conflict: &Conflict) -> Result<Record> {
        self.conflicts.lock().push(conflict.clone());
        Ok(conflict.remote.clone())
    }

    async fn reset(&self, options: &SyncOptions) -> Result<()> {
        self.resets.lock().push(options.clone());
        Ok(())
    }
}

fn seed_meta(remote: &MemoryRemote, storage_version: u64) {
    let global = json!({
        "syncID": "NOuEmrDCxt6V",
        "storageVersion": storage_version,
        "engines": {
            "bookmarks": {"version": 2, "syncID": "k9-_u4p0kGbN"},
            "history": {"version": 1, "syncID": "pL2p0kGbNk9-"}
        },
        "declined": []
    });
    remote.seed("meta", Record::new("global", json!(global.to_string())));
}

fn seed_keys(remote: &MemoryRemote, keys: &EncryptedPayload) {
    remote.seed("crypto", Record::new("keys", json!(keys.to_json().unwrap())));
}

fn seed_mock_keys(remote: &MemoryRemote) {
    seed_keys(
        remote,
        &mock_envelope(&json!({"default": ["ZW5j", "aG1hYw=="]})),
    );
}

fn seed_mock_record(remote: &MemoryRemote, collection: &str, cleartext: Value) -> u64 {
    let id = cleartext["id"].as_str().unwrap().to_string();
    let payload = mock_envelope(&cleartext).to_json().unwrap();
    remote.seed(collection, Record::new(id, json!(payload)))
}

/// Remote with a valid `meta/global` and mock `crypto/keys`.
fn ready_remote() -> Arc<MemoryRemote> {
    let remote = Arc::new(MemoryRemote::new());
    seed_meta(&remote, 5);
    seed_mock_keys(&remote);
    remote
}

fn engine(
    remote: &Arc<MemoryRemote>,
    cipher: Arc<dyn RecordCipher>,
    adapters: &[(&str, &Arc<TestAdapter>)],
) -> SyncEngine {
    let mut options = EngineOptions::new(URL, ASSERTION, KB)
        .with_remote(remote.clone())
        .with_cipher(cipher);
    for (name, adapter) in adapters {
        let adapter: Arc<dyn SyncAdapter> = (*adapter).clone();
        options = options.with_shared_adapter(*name, adapter);
    }
    SyncEngine::new(options).unwrap()
}

fn collections(names: &[&str]) -> HashMap<String, SyncOptions> {
    names
        .iter()
        .map(|name| (name.to_string(), SyncOptions::new()))
        .collect()
}

#[tokio::test]
async fn test_bootstrap_runs_once_for_concurrent_callers() {
    let remote = Arc::new(MemoryRemote::new().with_latency(Duration::from_millis(10)));
    seed_meta(&remote, 5);
    seed_mock_keys(&remote);
    let cipher = Arc::new(MockCipher::default());
    let adapter = Arc::new(TestAdapter::reporting(false));
    let engine = engine(&remote, cipher.clone(), &[("bookmarks", &adapter)]);

    let (a, b, c) = tokio::join!(
        engine.ensure_ready(),
        engine.ensure_ready(),
        engine.sync_now(collections(&["bookmarks"]))
    );
    a.unwrap();
    b.unwrap();
    c.unwrap();

    assert_eq!(remote.fetch_count("meta"), 1);
    assert_eq!(remote.fetch_count("crypto"), 1);
    assert_eq!(cipher.set_keys_calls.load(Ordering::SeqCst), 1);
    assert_eq!(engine.bootstrap_state(), BootstrapState::Ready);

    engine.ensure_ready().await.unwrap();
    engine.sync_now(collections(&["bookmarks"])).await.unwrap();
    assert_eq!(remote.fetch_count("meta"), 1);
    assert_eq!(remote.fetch_count("crypto"), 1);
}

#[tokio::test]
async fn test_unsupported_storage_version_is_unrecoverable() {
    let remote = Arc::new(MemoryRemote::new());
    seed_meta(&remote, 4);
    seed_mock_keys(&remote);
    let adapter = Arc::new(TestAdapter::reporting(true));
    let engine = engine(&remote, Arc::new(MockCipher::default()), &[("bookmarks", &adapter)]);

    let err = engine
        .sync_now(collections(&["bookmarks"]))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Unrecoverable);
    assert!(!err.is_retryable());
    assert_eq!(remote.fetch_count("crypto"), 0);
    assert_eq!(remote.fetch_count("bookmarks"), 0);
    assert_eq!(adapter.update_count(), 0);
    assert_eq!(
        engine.bootstrap_state(),
        BootstrapState::Failed(ErrorKind::Unrecoverable)
    );
}

#[tokio::test]
async fn test_missing_global_record_is_invalid_account() {
    let remote = Arc::new(MemoryRemote::new());
    seed_mock_keys(&remote);
    let adapter = Arc::new(TestAdapter::reporting(false));
    let engine = engine(&remote, Arc::new(MockCipher::default()), &[("bookmarks", &adapter)]);

    let err = engine.ensure_ready().await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::InvalidAccount);
    assert_eq!(remote.fetch_count("crypto"), 0);
}

#[tokio::test]
async fn test_key_integrity_failure_is_unrecoverable() {
    let remote = ready_remote();
    let adapter = Arc::new(TestAdapter::reporting(false));
    let engine = engine(&remote, Arc::new(MockCipher::corrupt()), &[("bookmarks", &adapter)]);

    let err = engine
        .sync_now(collections(&["bookmarks"]))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Unrecoverable);
    assert!(matches!(err.cause(), Some(Error::IntegrityCheck(_))));
    assert_eq!(remote.fetch_count("bookmarks"), 0);
}

#[tokio::test]
async fn test_keys_sealed_with_other_master_key_are_rejected() {
    let remote = Arc::new(MemoryRemote::new());
    seed_meta(&remote, 5);
    let other = MasterKey::from_bytes(vec![42u8; 32]).unwrap();
    seed_keys(&remote, &CollectionKeys::generate().seal(&other).unwrap());

    let adapter: Arc<dyn SyncAdapter> = Arc::new(TestAdapter::reporting(false));
    let engine = SyncEngine::new(
        EngineOptions::new(URL, ASSERTION, KB)
            .with_remote(remote.clone())
            .with_shared_adapter("bookmarks", adapter),
    )
    .unwrap();

    let err = engine.ensure_ready().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Unrecoverable);
    assert_eq!(err.collection(), Some("crypto"));
}

#[tokio::test]
async fn test_missing_keys_record_pulls_crypto_once() {
    let remote = Arc::new(MemoryRemote::new());
    seed_meta(&remote, 5);
    let adapter = Arc::new(TestAdapter::reporting(false));
    let engine = engine(&remote, Arc::new(MockCipher::default()), &[("bookmarks", &adapter)]);

    let err = engine.ensure_ready().await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Unrecoverable);
    assert_eq!(remote.fetch_count("crypto"), 1);
}

#[tokio::test]
async fn test_push_skipped_when_nothing_changed() {
    let remote = ready_remote();
    let adapter = Arc::new(TestAdapter::reporting(false));
    let engine = engine(&remote, Arc::new(MockCipher::default()), &[("bookmarks", &adapter)]);

    engine.sync_now(collections(&["bookmarks"])).await.unwrap();

    assert_eq!(remote.fetch_count("bookmarks"), 1);
    assert_eq!(remote.put_count("bookmarks"), 0);
    assert_eq!(adapter.update_count(), 1);
}

#[tokio::test]
async fn test_push_when_adapter_reports_changes() {
    let remote = ready_remote();
    let adapter = Arc::new(TestAdapter::writing(
        json!({"id": "newbookmark", "title": "Example"}),
        true,
    ));
    let engine = engine(&remote, Arc::new(MockCipher::default()), &[("bookmarks", &adapter)]);

    engine.sync_now(collections(&["bookmarks"])).await.unwrap();

    assert_eq!(remote.fetch_count("bookmarks"), 2);
    assert_eq!(remote.put_count("bookmarks"), 1);

    let stored = remote.record("bookmarks", "newbookmark").unwrap();
    let envelope = EncryptedPayload::from_json(stored.payload_str().unwrap()).unwrap();
    let cleartext: Value = serde_json::from_str(&envelope.ciphertext).unwrap();
    assert_eq!(cleartext, json!({"id": "newbookmark", "title": "Example"}));
}

#[tokio::test]
async fn test_conflict_resolution_forces_push() {
    let remote = ready_remote();
    // Writes a record but reports no change, so it stays unpublished.
    let adapter = Arc::new(TestAdapter::writing(
        json!({"id": "dup", "title": "local"}),
        false,
    ));
    let engine = engine(&remote, Arc::new(MockCipher::default()), &[("bookmarks", &adapter)]);

    engine.sync_now(collections(&["bookmarks"])).await.unwrap();
    assert_eq!(remote.fetch_count("bookmarks"), 1);
    assert_eq!(remote.put_count("bookmarks"), 0);

    let seeded = seed_mock_record(&remote, "bookmarks", json!({"id": "dup", "title": "remote"}));

    engine.sync_now(collections(&["bookmarks"])).await.unwrap();
    {
        let conflicts = adapter.conflicts.lock();
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].local.payload["title"], "local");
        assert_eq!(conflicts[0].remote.payload["title"], "remote");
    }
    assert_eq!(remote.fetch_count("bookmarks"), 3);
    assert_eq!(remote.put_count("bookmarks"), 1);
    let pushed = remote.record("bookmarks", "dup").unwrap();
    assert!(pushed.last_modified.unwrap() > seeded);

    // Flag cleared: the next sync pulls only.
    engine.sync_now(collections(&["bookmarks"])).await.unwrap();
    assert_eq!(remote.fetch_count("bookmarks"), 4);
    assert_eq!(remote.put_count("bookmarks"), 1);
    assert_eq!(adapter.conflicts.lock().len(), 1);
}

/// Adapter that creates a record once while another client writes the
/// same id, so the conflict only shows up in the push step.
struct RacingAdapter {
    remote: Arc<MemoryRemote>,
    raced: AtomicUsize,
    conflicts: Mutex<Vec<Conflict>>,
}

#[async_trait]
impl SyncAdapter for RacingAdapter {
    async fn update(&self, collection: Arc<Collection>, _options: &SyncOptions) -> Result<bool> {
        if self.raced.fetch_add(1, Ordering::SeqCst) > 0 {
            return Ok(false);
        }
        collection
            .create(json!({"id": "x", "title": "local"}))
            .await?;
        seed_mock_record(&self.remote, "bookmarks", json!({"id": "x", "title": "remote"}));
        Ok(true)
    }

    async fn handle_conflict(&self, conflict: &Conflict) -> Result<Record> {
        self.conflicts.lock().push(conflict.clone());
        Ok(conflict.remote.clone())
    }
}

#[tokio::test]
async fn test_push_step_conflicts_are_resolved_and_flag_cleared() {
    let remote = ready_remote();
    let adapter = Arc::new(RacingAdapter {
        remote: remote.clone(),
        raced: AtomicUsize::new(0),
        conflicts: Mutex::new(Vec::new()),
    });
    let shared: Arc<dyn SyncAdapter> = adapter.clone();
    let engine = SyncEngine::new(
        EngineOptions::new(URL, ASSERTION, KB)
            .with_remote(remote.clone())
            .with_cipher(Arc::new(MockCipher::default()))
            .with_shared_adapter("bookmarks", shared),
    )
    .unwrap();

    engine.sync_now(collections(&["bookmarks"])).await.unwrap();
    {
        let conflicts = adapter.conflicts.lock();
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].id(), "x");
        assert_eq!(conflicts[0].local.payload["title"], "local");
        assert_eq!(conflicts[0].remote.payload["title"], "remote");
    }
    assert_eq!(remote.fetch_count("bookmarks"), 2);
    assert_eq!(remote.put_count("bookmarks"), 0);

    // Flag was cleared by the push step: one sync call only, which
    // publishes the stored resolution.
    engine.sync_now(collections(&["bookmarks"])).await.unwrap();
    assert_eq!(remote.fetch_count("bookmarks"), 3);
    assert_eq!(remote.put_count("bookmarks"), 1);
    assert_eq!(adapter.conflicts.lock().len(), 1);
}

#[tokio::test]
async fn test_collection_failures_are_classified() {
    let cases = [
        (Failure::Status(401), ErrorKind::Auth, Some(401)),
        (Failure::Status(503), ErrorKind::TryLater, Some(503)),
        (Failure::Network, ErrorKind::TryLater, None),
        (Failure::TypeMismatch, ErrorKind::Unrecoverable, None),
    ];

    for (failure, kind, status) in cases {
        let remote = ready_remote();
        let adapter = Arc::new(TestAdapter::reporting(false));
        let engine = engine(&remote, Arc::new(MockCipher::default()), &[("bookmarks", &adapter)]);
        engine.ensure_ready().await.unwrap();

        remote.fail("bookmarks", failure);
        let err = engine
            .sync_now(collections(&["bookmarks"]))
            .await
            .unwrap_err();

        assert_eq!(err.kind(), kind, "{:?}", failure);
        assert_eq!(err.status(), status, "{:?}", failure);
        assert_eq!(err.collection(), Some("bookmarks"));
        assert_eq!(adapter.update_count(), 0);
    }
}

#[tokio::test]
async fn test_bootstrap_retried_after_failure() {
    let remote = ready_remote();
    let adapter = Arc::new(TestAdapter::reporting(false));
    let engine = engine(&remote, Arc::new(MockCipher::default()), &[("bookmarks", &adapter)]);

    remote.fail("meta", Failure::Status(401));
    let err = engine.ensure_ready().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Auth);
    assert_eq!(err.collection(), Some("meta"));
    assert_eq!(engine.bootstrap_state(), BootstrapState::Failed(ErrorKind::Auth));

    remote.recover("meta");
    engine.ensure_ready().await.unwrap();
    assert_eq!(engine.bootstrap_state(), BootstrapState::Ready);
    assert_eq!(remote.fetch_count("meta"), 2);
}

#[tokio::test]
async fn test_client_state_is_deterministic() {
    let remote = ready_remote();
    let a = engine(&remote, Arc::new(MockCipher::default()), &[]);
    let b = engine(&remote, Arc::new(MockCipher::default()), &[]);

    assert_eq!(a.client_state().unwrap().as_str(), CLIENT_STATE);
    assert_eq!(a.client_state().unwrap(), b.client_state().unwrap());

    let other = SyncEngine::new(
        EngineOptions::new(URL, ASSERTION, "00".repeat(32)).with_remote(remote.clone()),
    )
    .unwrap();
    assert_ne!(other.client_state().unwrap(), a.client_state().unwrap());
}

#[tokio::test]
async fn test_end_to_end_adapter_sees_decrypted_records() {
    let remote = ready_remote();
    seed_mock_record(
        &remote,
        "bookmarks",
        json!({"id": "_9sCUbahs0ay", "title": "Mozilla", "bmkUri": "https://www.mozilla.org/"}),
    );
    let cipher = Arc::new(MockCipher::default());
    let adapter = Arc::new(TestAdapter::reporting(false));
    let engine = engine(&remote, cipher.clone(), &[("bookmarks", &adapter)]);

    let mut requested = HashMap::new();
    requested.insert(
        "bookmarks".to_string(),
        SyncOptions::new().with("userid", json!("someone-else")),
    );
    engine.sync_now(requested).await.unwrap();

    let updates = adapter.updates.lock();
    assert_eq!(updates.len(), 1);
    let (records, options) = &updates[0];
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].id, "_9sCUbahs0ay");
    assert_eq!(records[0].payload["title"], "Mozilla");
    assert_eq!(options.userid(), Some(CLIENT_STATE));
    assert!(cipher.decrypt_calls.load(Ordering::SeqCst) >= 1);
}

#[tokio::test]
async fn test_end_to_end_with_real_crypto() {
    let master = MasterKey::from_hex(KB).unwrap();
    let keys = CollectionKeys::generate();
    let peer = SyncCrypto::with_keys(keys.clone());

    let remote = Arc::new(MemoryRemote::new());
    seed_meta(&remote, 5);
    seed_keys(&remote, &keys.seal(&master).unwrap());
    let envelope = peer
        .encrypt(&json!({"id": "fromPeer0001", "title": "Peer"}), "bookmarks")
        .unwrap();
    remote.seed(
        "bookmarks",
        Record::new("fromPeer0001", json!(envelope.to_json().unwrap())),
    );

    let adapter = Arc::new(TestAdapter::writing(
        json!({"id": "fromLocal001", "title": "Local"}),
        true,
    ));
    let engine = engine(&remote, Arc::new(SyncCrypto::new()), &[("bookmarks", &adapter)]);

    engine.sync_now(collections(&["bookmarks"])).await.unwrap();

    assert_eq!(adapter.updates.lock()[0].0[0].payload["title"], "Peer");

    let stored = remote.record("bookmarks", "fromLocal001").unwrap();
    let envelope = EncryptedPayload::from_json(stored.payload_str().unwrap()).unwrap();
    let cleartext = peer.decrypt(&envelope, "bookmarks").unwrap();
    assert_eq!(cleartext["title"], "Local");
}

#[tokio::test]
async fn test_sibling_collections_settle_independently() {
    let remote = ready_remote();
    let bookmarks = Arc::new(TestAdapter::reporting(false));
    let history = Arc::new(TestAdapter::reporting(false));
    let engine = engine(
        &remote,
        Arc::new(MockCipher::default()),
        &[("bookmarks", &bookmarks), ("history", &history)],
    );
    remote.fail("history", Failure::Status(500));

    let err = engine
        .sync_now(collections(&["bookmarks", "history"]))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::TryLater);
    assert_eq!(err.collection(), Some("history"));
    assert_eq!(bookmarks.update_count(), 1);
    assert_eq!(history.update_count(), 0);
}

#[tokio::test]
async fn test_collection_not_enabled_in_meta_still_syncs() {
    let remote = ready_remote();
    let tabs = Arc::new(TestAdapter::reporting(false));
    let engine = engine(&remote, Arc::new(MockCipher::default()), &[("tabs", &tabs)]);

    engine.sync_now(collections(&["tabs"])).await.unwrap();

    assert_eq!(remote.fetch_count("tabs"), 1);
    assert_eq!(tabs.update_count(), 1);
}

#[tokio::test]
async fn test_unknown_collection_rejected_before_io() {
    let remote = ready_remote();
    let adapter = Arc::new(TestAdapter::reporting(false));
    let engine = engine(&remote, Arc::new(MockCipher::default()), &[("bookmarks", &adapter)]);

    let err = engine
        .sync_now(collections(&["passwords"]))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Unrecoverable);
    assert_eq!(remote.fetch_count("meta"), 0);
    assert_eq!(engine.bootstrap_state(), BootstrapState::Uninitialized);
}

#[test]
fn test_construction_validates_options() {
    let adapter: Arc<dyn SyncAdapter> = Arc::new(TestAdapter::reporting(false));
    let cases = [
        EngineOptions::new("", ASSERTION, KB),
        EngineOptions::new("not a url", ASSERTION, KB),
        EngineOptions::new(URL, "", KB),
        EngineOptions::new(URL, ASSERTION, ""),
        EngineOptions::new(URL, ASSERTION, "not hex"),
        EngineOptions::new(URL, ASSERTION, KB).with_shared_adapter("meta", adapter.clone()),
        EngineOptions::new(URL, ASSERTION, KB).with_shared_adapter("", adapter),
    ];

    for options in cases {
        let err = SyncEngine::new(options).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unrecoverable);
        assert!(matches!(err.cause(), Some(Error::InvalidInput(_))));
    }
}

#[tokio::test]
async fn test_reset_forwards_userid_without_bootstrap() {
    let remote = ready_remote();
    let adapter = Arc::new(TestAdapter::reporting(false));
    let engine = engine(&remote, Arc::new(MockCipher::default()), &[("bookmarks", &adapter)]);

    engine.reset(collections(&["bookmarks"])).await.unwrap();

    let resets = adapter.resets.lock();
    assert_eq!(resets.len(), 1);
    assert_eq!(resets[0].userid(), Some(CLIENT_STATE));
    assert_eq!(remote.fetch_count("meta"), 0);
}
