//! Core sync engine that orchestrates bootstrap and collection syncs.

use futures::future::{join_all, BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};
use tracing::{debug, info, warn};

use syncto_common::{ClientStateId, Error};
use syncto_crypto::{client_state, MasterKey, RecordCipher, SyncCrypto};
use syncto_storage::{Conflict, RecordStore, Remote, StoreConfig};

use crate::adapter::{SyncAdapter, SyncOptions};
use crate::config::{validate_collection_name, validate_credentials, EngineOptions};
use crate::control::{ControlCollections, MetaGlobal, CRYPTO, GLOBAL_ID, META};
use crate::error::SyncError;
use crate::registry::{CollectionRegistry, SyncedCollection};
use crate::state::BootstrapState;

/// Outcome of a completed bootstrap.
struct Ready {
    registry: CollectionRegistry,
}

type BootstrapFuture = Shared<BoxFuture<'static, Result<Arc<Ready>, SyncError>>>;

#[derive(Default)]
struct Boot {
    ready: Option<Arc<Ready>>,
    /// In-flight attempt shared by every concurrent caller.
    pending: Option<BootstrapFuture>,
}

struct Inner {
    url: String,
    assertion: String,
    master_key: MasterKey,
    adapters: HashMap<String, Arc<dyn SyncAdapter>>,
    remote: Option<Arc<dyn Remote>>,
    cipher: Arc<dyn RecordCipher>,
    client_state: OnceLock<ClientStateId>,
    state: Mutex<BootstrapState>,
    boot: Mutex<Boot>,
}

/// Sync engine for one account.
///
/// Bootstraps lazily on first use: derives the client-state id, checks
/// `meta/global`, decrypts `crypto/keys` and opens one collection per
/// adapter. Bootstrap happens once per engine; a failed attempt is retried
/// from scratch on the next call.
///
/// Callers must not start a second `sync_now` for a collection while a
/// previous one for the same collection is still running.
#[derive(Clone)]
pub struct SyncEngine {
    inner: Arc<Inner>,
}

impl SyncEngine {
    /// Create an engine.
    ///
    /// # Errors
    /// - `SyncError::Unrecoverable` if the URL, assertion or kB is missing or
    ///   malformed, or if an adapter is registered under an empty or
    ///   reserved collection name
    pub fn new(options: EngineOptions) -> Result<Self, SyncError> {
        validate_credentials(&options.url, &options.assertion, &options.kb)
            .map_err(SyncError::unrecoverable)?;
        for name in options.adapters.keys() {
            validate_collection_name(name).map_err(SyncError::unrecoverable)?;
        }
        let master_key = MasterKey::from_hex(&options.kb).map_err(SyncError::unrecoverable)?;

        let cipher = options
            .cipher
            .unwrap_or_else(|| Arc::new(SyncCrypto::new()) as Arc<dyn RecordCipher>);

        Ok(Self {
            inner: Arc::new(Inner {
                url: options.url,
                assertion: options.assertion,
                master_key,
                adapters: options.adapters,
                remote: options.remote,
                cipher,
                client_state: OnceLock::new(),
                state: Mutex::new(BootstrapState::Uninitialized),
                boot: Mutex::new(Boot::default()),
            }),
        })
    }

    /// Client-state id of the account, derived from kB on first use.
    pub fn client_state(&self) -> Result<ClientStateId, SyncError> {
        self.inner.client_state().cloned()
    }

    /// Current bootstrap stage.
    pub fn bootstrap_state(&self) -> BootstrapState {
        *self.inner.state.lock()
    }

    /// Bootstrap if not done yet.
    ///
    /// Concurrent callers share a single attempt.
    pub async fn ensure_ready(&self) -> Result<(), SyncError> {
        self.ready().await.map(|_| ())
    }

    async fn ready(&self) -> Result<Arc<Ready>, SyncError> {
        let attempt = {
            let mut boot = self.inner.boot.lock();
            if let Some(ready) = &boot.ready {
                return Ok(ready.clone());
            }
            match boot.pending.clone() {
                Some(pending) => pending,
                None => {
                    let inner = self.inner.clone();
                    let attempt = async move {
                        let result = inner.bootstrap().await;
                        let mut boot = inner.boot.lock();
                        if let Ok(ready) = &result {
                            boot.ready = Some(ready.clone());
                        }
                        boot.pending = None;
                        result
                    }
                    .boxed()
                    .shared();
                    boot.pending = Some(attempt.clone());
                    attempt
                }
            }
        };

        attempt.await
    }

    /// Sync the given collections.
    ///
    /// Each collection runs its own pipeline concurrently with the others:
    /// pull, resolve conflicts, let the adapter update, then push if the
    /// adapter wrote anything or a resolved conflict is still unpublished.
    /// The `userid` option is overwritten with the client-state id.
    ///
    /// # Errors
    /// - Bootstrap failures abort the whole call
    /// - Otherwise the first failing collection's error, once every
    ///   pipeline has settled
    pub async fn sync_now(
        &self,
        collections: HashMap<String, SyncOptions>,
    ) -> Result<(), SyncError> {
        for name in collections.keys() {
            self.inner.adapter(name)?;
        }

        let ready = self.ready().await?;
        let userid = self.inner.client_state()?.clone();

        let pipelines = collections.into_iter().map(|(name, options)| {
            let ready = ready.clone();
            let options = options.with_userid(&userid);
            async move {
                let synced = ready.registry.get(&name).ok_or_else(|| {
                    SyncError::unrecoverable(Error::NotFound(format!(
                        "Collection {} was not opened",
                        name
                    )))
                })?;
                sync_collection(synced, &options)
                    .await
                    .map_err(|e| e.in_collection(&name))
            }
        });

        join_all(pipelines).await.into_iter().collect()
    }

    /// Ask adapters to drop their per-account state.
    ///
    /// Does not require bootstrap.
    pub async fn reset(
        &self,
        collections: HashMap<String, SyncOptions>,
    ) -> Result<(), SyncError> {
        let userid = self.inner.client_state()?.clone();

        let mut resets = Vec::with_capacity(collections.len());
        for (name, options) in collections {
            let adapter = self.inner.adapter(&name)?.clone();
            let options = options.with_userid(&userid);
            resets.push(async move {
                info!(collection = %name, "Resetting collection");
                adapter
                    .reset(&options)
                    .await
                    .map_err(|e| SyncError::classify(e).in_collection(&name))
            });
        }

        join_all(resets).await.into_iter().collect()
    }
}

impl std::fmt::Debug for SyncEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncEngine")
            .field("url", &self.inner.url)
            .field("state", &self.bootstrap_state())
            .field("collections", &self.inner.adapters.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl Inner {
    fn client_state(&self) -> Result<&ClientStateId, SyncError> {
        if let Some(id) = self.client_state.get() {
            return Ok(id);
        }
        let derived = client_state(&self.master_key).map_err(SyncError::unrecoverable)?;
        Ok(self.client_state.get_or_init(|| derived))
    }

    fn adapter(&self, name: &str) -> Result<&Arc<dyn SyncAdapter>, SyncError> {
        self.adapters.get(name).ok_or_else(|| {
            SyncError::unrecoverable(Error::InvalidInput(format!(
                "No adapter registered for collection {}",
                name
            )))
        })
    }

    fn set_state(&self, state: BootstrapState) {
        let mut current = self.state.lock();
        let previous = *current;
        debug!(from = %previous, to = %state, "Bootstrap state transition");
        *current = state;
    }

    async fn bootstrap(&self) -> Result<Arc<Ready>, SyncError> {
        let result = self.run_bootstrap().await;
        if let Err(e) = &result {
            warn!(error = %e, "Bootstrap failed");
            self.set_state(BootstrapState::Failed(e.kind()));
        }
        result
    }

    async fn run_bootstrap(&self) -> Result<Arc<Ready>, SyncError> {
        info!(url = %self.url, "Bootstrapping sync engine");

        self.set_state(BootstrapState::DerivingClientState);
        let client_state = self.client_state()?.clone();

        let config = StoreConfig {
            server_url: self.url.clone(),
            assertion: self.assertion.clone(),
            client_state: client_state.clone(),
        };
        let store = match &self.remote {
            Some(remote) => RecordStore::new(config, remote.clone()),
            None => RecordStore::connect(config)?,
        };
        let control = ControlCollections::open(&store)?;

        self.set_state(BootstrapState::SyncingMeta);
        control
            .sync_meta()
            .await
            .map_err(|e| SyncError::classify(e).in_collection(META))?;

        self.set_state(BootstrapState::ValidatingStorageVersion);
        let global = control
            .global()
            .await
            .map_err(|e| SyncError::classify(e).in_collection(META))?
            .ok_or_else(|| {
                SyncError::invalid_account(format!(
                    "No {}/{} record on the server",
                    META, GLOBAL_ID
                ))
            })?;
        let meta = MetaGlobal::from_record(&global)
            .and_then(|meta| meta.check_version().map(|_| meta))
            .map_err(|e| SyncError::unrecoverable(e).in_collection(META))?;
        self.check_engines(&meta);

        self.set_state(BootstrapState::FetchingKeys);
        let keys = control.keys().await.map_err(|e| match e {
            Error::Serialization(_) => SyncError::unrecoverable(e).in_collection(CRYPTO),
            other => SyncError::classify(other).in_collection(CRYPTO),
        })?;

        self.set_state(BootstrapState::DecryptingKeys);
        self.cipher
            .set_keys(&self.master_key, &keys)
            .map_err(|e| match e {
                Error::IntegrityCheck(_) => {
                    warn!("Keys record failed verification against kB");
                    SyncError::unrecoverable(e).in_collection(CRYPTO)
                }
                other => SyncError::classify(other).in_collection(CRYPTO),
            })?;

        let registry = CollectionRegistry::build(&store, self.cipher.clone(), &self.adapters)?;

        self.set_state(BootstrapState::Ready);
        info!(
            client_state = %client_state,
            collections = registry.len(),
            "Sync engine ready"
        );
        Ok(Arc::new(Ready { registry }))
    }

    /// Warn about requested collections other clients do not sync.
    fn check_engines(&self, meta: &MetaGlobal) {
        for name in self.adapters.keys() {
            if !meta.is_enabled(name) {
                warn!(collection = %name, "Collection is not enabled in {}/{}", META, GLOBAL_ID);
            }
        }
    }
}

/// Pull, reconcile and, when needed, push one collection.
async fn sync_collection(
    synced: &SyncedCollection,
    options: &SyncOptions,
) -> Result<(), SyncError> {
    let handle = synced.handle();

    let pulled = handle.sync().await?;
    resolve_conflicts(synced, pulled.conflicts).await?;

    let changed = synced.adapter().update(handle.clone(), options).await?;
    if !changed && !synced.has_pending_conflicts() {
        debug!(collection = synced.name(), "No local changes, skipping push");
        return Ok(());
    }

    let pushed = handle.sync().await?;
    resolve_conflicts(synced, pushed.conflicts).await?;
    synced.clear_pending_conflicts();

    info!(
        collection = synced.name(),
        published = pushed.published,
        "Collection pushed"
    );
    Ok(())
}

/// Let the adapter pick a winner for each conflict and store it locally.
async fn resolve_conflicts(
    synced: &SyncedCollection,
    conflicts: Vec<Conflict>,
) -> Result<(), SyncError> {
    for conflict in conflicts {
        debug!(collection = synced.name(), id = conflict.id(), "Resolving conflict");
        let resolution = synced.adapter().handle_conflict(&conflict).await?;
        synced.handle().resolve(&conflict, resolution).await?;
        synced.mark_pending_conflicts();
    }
    Ok(())
}
