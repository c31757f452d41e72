//! Registry of the user-data collections an engine syncs.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use syncto_common::Result;
use syncto_crypto::RecordCipher;
use syncto_storage::{AnyId, Collection, CollectionOptions, RecordStore};

use crate::adapter::SyncAdapter;
use crate::transformer::CryptoTransformer;

/// A collection handle paired with the adapter that reconciles it.
pub struct SyncedCollection {
    name: String,
    handle: Arc<Collection>,
    adapter: Arc<dyn SyncAdapter>,
    /// Set while a resolved conflict is written locally but not pushed.
    pending_conflicts: AtomicBool,
}

impl SyncedCollection {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn handle(&self) -> &Arc<Collection> {
        &self.handle
    }

    pub fn adapter(&self) -> &Arc<dyn SyncAdapter> {
        &self.adapter
    }

    pub fn has_pending_conflicts(&self) -> bool {
        self.pending_conflicts.load(Ordering::Acquire)
    }

    pub(crate) fn mark_pending_conflicts(&self) {
        self.pending_conflicts.store(true, Ordering::Release);
    }

    pub(crate) fn clear_pending_conflicts(&self) {
        self.pending_conflicts.store(false, Ordering::Release);
    }
}

/// One `SyncedCollection` per adapter, created once at bootstrap.
#[derive(Default)]
pub struct CollectionRegistry {
    collections: HashMap<String, SyncedCollection>,
}

impl CollectionRegistry {
    /// Open a handle per adapter, each decrypting with `cipher` under its
    /// own collection name and accepting any record id.
    pub fn build(
        store: &RecordStore,
        cipher: Arc<dyn RecordCipher>,
        adapters: &HashMap<String, Arc<dyn SyncAdapter>>,
    ) -> Result<Self> {
        let mut collections = HashMap::with_capacity(adapters.len());

        for (name, adapter) in adapters {
            let options = CollectionOptions {
                id_schema: Arc::new(AnyId),
                remote_transformers: vec![Arc::new(CryptoTransformer::new(
                    cipher.clone(),
                    name.clone(),
                ))],
            };
            let handle = store.collection(name, options)?;

            collections.insert(
                name.clone(),
                SyncedCollection {
                    name: name.clone(),
                    handle,
                    adapter: adapter.clone(),
                    pending_conflicts: AtomicBool::new(false),
                },
            );
        }

        Ok(Self { collections })
    }

    pub fn get(&self, name: &str) -> Option<&SyncedCollection> {
        self.collections.get(name)
    }

    pub fn len(&self) -> usize {
        self.collections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.collections.is_empty()
    }
}
