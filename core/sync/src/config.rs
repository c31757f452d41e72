//! Engine configuration.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use url::Url;

use syncto_common::{Error, Result};
use syncto_crypto::{MasterKey, RecordCipher};
use syncto_storage::Remote;

use crate::adapter::{SyncAdapter, SyncOptions};
use crate::control::is_control_collection;

/// Engine settings as stored on disk.
///
/// ```json
/// {
///   "url": "https://sync.example.com/v1/",
///   "assertion": "<BrowserID assertion>",
///   "kb": "<hex master key>",
///   "collections": { "bookmarks": {}, "history": {} }
/// }
/// ```
#[derive(Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Record server endpoint.
    pub url: String,
    /// Opaque bearer assertion.
    pub assertion: String,
    /// Hex-encoded master key.
    pub kb: String,
    /// Collections to sync, with their adapter options.
    #[serde(default)]
    pub collections: BTreeMap<String, SyncOptions>,
}

impl EngineConfig {
    /// Parse and validate a JSON configuration.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a JSON configuration file.
    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = tokio::fs::read_to_string(path.as_ref()).await?;
        Self::from_json(&contents)
    }

    /// Check every field is usable to construct an engine.
    ///
    /// # Errors
    /// - `Error::InvalidInput` naming the first offending field
    pub fn validate(&self) -> Result<()> {
        validate_credentials(&self.url, &self.assertion, &self.kb)?;
        for name in self.collections.keys() {
            validate_collection_name(name)?;
        }
        Ok(())
    }

    /// Options map for `SyncEngine::sync_now`.
    pub fn sync_options(&self) -> HashMap<String, SyncOptions> {
        self.collections
            .iter()
            .map(|(name, options)| (name.clone(), options.clone()))
            .collect()
    }
}

impl fmt::Debug for EngineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineConfig")
            .field("url", &self.url)
            .field("assertion", &"[REDACTED]")
            .field("kb", &"[REDACTED]")
            .field("collections", &self.collections.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Programmatic engine construction options.
///
/// `remote` defaults to an HTTP client for `url`, `cipher` to `SyncCrypto`.
pub struct EngineOptions {
    pub url: String,
    pub assertion: String,
    pub kb: String,
    pub(crate) adapters: HashMap<String, Arc<dyn SyncAdapter>>,
    pub(crate) remote: Option<Arc<dyn Remote>>,
    pub(crate) cipher: Option<Arc<dyn RecordCipher>>,
}

impl EngineOptions {
    pub fn new(url: impl Into<String>, assertion: impl Into<String>, kb: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            assertion: assertion.into(),
            kb: kb.into(),
            adapters: HashMap::new(),
            remote: None,
            cipher: None,
        }
    }

    /// Credentials from a loaded configuration; adapters are added separately.
    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(&config.url, &config.assertion, &config.kb)
    }

    /// Register the adapter for `collection`.
    pub fn with_adapter(
        mut self,
        collection: impl Into<String>,
        adapter: impl SyncAdapter + 'static,
    ) -> Self {
        self.adapters.insert(collection.into(), Arc::new(adapter));
        self
    }

    /// Register a shared adapter for `collection`.
    pub fn with_shared_adapter(
        mut self,
        collection: impl Into<String>,
        adapter: Arc<dyn SyncAdapter>,
    ) -> Self {
        self.adapters.insert(collection.into(), adapter);
        self
    }

    /// Use `remote` instead of connecting over HTTP.
    pub fn with_remote(mut self, remote: Arc<dyn Remote>) -> Self {
        self.remote = Some(remote);
        self
    }

    /// Use `cipher` instead of `SyncCrypto`.
    pub fn with_cipher(mut self, cipher: Arc<dyn RecordCipher>) -> Self {
        self.cipher = Some(cipher);
        self
    }

    /// Collections with a registered adapter.
    pub fn collections(&self) -> impl Iterator<Item = &str> {
        self.adapters.keys().map(String::as_str)
    }
}

impl fmt::Debug for EngineOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineOptions")
            .field("url", &self.url)
            .field("assertion", &"[REDACTED]")
            .field("kb", &"[REDACTED]")
            .field("adapters", &self.adapters.keys().collect::<Vec<_>>())
            .field("remote", &self.remote.as_ref().map(|r| r.name()))
            .finish_non_exhaustive()
    }
}

pub(crate) fn validate_credentials(url: &str, assertion: &str, kb: &str) -> Result<()> {
    if url.is_empty() {
        return Err(Error::InvalidInput("Server URL is required".to_string()));
    }
    let parsed =
        Url::parse(url).map_err(|e| Error::InvalidInput(format!("Invalid server URL: {}", e)))?;
    if parsed.cannot_be_a_base() {
        return Err(Error::InvalidInput(format!("Invalid server URL: {}", url)));
    }

    if assertion.is_empty() {
        return Err(Error::InvalidInput("Assertion is required".to_string()));
    }

    if kb.is_empty() {
        return Err(Error::InvalidInput("kB is required".to_string()));
    }
    MasterKey::from_hex(kb)?;

    Ok(())
}

pub(crate) fn validate_collection_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::InvalidInput(
            "Collection name cannot be empty".to_string(),
        ));
    }
    if is_control_collection(name) {
        return Err(Error::InvalidInput(format!(
            "Collection name {} is reserved",
            name
        )));
    }
    Ok(())
}
