//! Record store: entry point handing out collection handles.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

use crate::collection::{Collection, CollectionOptions};
use crate::http::HttpRemote;
use crate::remote::Remote;
use syncto_common::{ClientStateId, Error, Result};

/// Connection settings for a record store.
#[derive(Clone)]
pub struct StoreConfig {
    /// Base URL of the record server.
    pub server_url: String,
    /// BrowserID assertion sent with every request.
    pub assertion: String,
    /// Client-state id; also namespaces the local mirror.
    pub client_state: ClientStateId,
}

impl fmt::Debug for StoreConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreConfig")
            .field("server_url", &self.server_url)
            .field("assertion", &"[REDACTED]")
            .field("client_state", &self.client_state)
            .finish()
    }
}

/// Store of locally mirrored collections sharing one remote.
///
/// Handles are cached by name, so every caller asking for the same
/// collection shares its mirror.
pub struct RecordStore {
    config: StoreConfig,
    remote: Arc<dyn Remote>,
    collections: Mutex<HashMap<String, Arc<Collection>>>,
}

impl RecordStore {
    /// Create a store on an explicit remote.
    pub fn new(config: StoreConfig, remote: Arc<dyn Remote>) -> Self {
        Self {
            config,
            remote,
            collections: Mutex::new(HashMap::new()),
        }
    }

    /// Create a store talking HTTP to `config.server_url`.
    pub fn connect(config: StoreConfig) -> Result<Self> {
        let remote = HttpRemote::new(&config.server_url, &config.assertion, &config.client_state)?;
        Ok(Self::new(config, Arc::new(remote)))
    }

    /// Namespace of the local mirror.
    pub fn namespace(&self) -> &str {
        self.config.client_state.as_str()
    }

    /// Connection settings.
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Get the handle for `name`, creating it with `options` on first use.
    ///
    /// Options are ignored when the handle already exists.
    ///
    /// # Errors
    /// - `Error::InvalidInput` if `name` is empty
    pub fn collection(&self, name: &str, options: CollectionOptions) -> Result<Arc<Collection>> {
        if name.is_empty() {
            return Err(Error::InvalidInput(
                "Collection name cannot be empty".to_string(),
            ));
        }

        let mut collections = self.collections.lock();
        let handle = collections.entry(name.to_string()).or_insert_with(|| {
            debug!(collection = name, remote = self.remote.name(), "Opening collection");
            Arc::new(Collection::new(name, self.remote.clone(), options))
        });
        Ok(handle.clone())
    }
}

impl fmt::Debug for RecordStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecordStore")
            .field("config", &self.config)
            .field("remote", &self.remote.name())
            .finish_non_exhaustive()
    }
}
