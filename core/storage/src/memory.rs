//! In-memory remote for testing.

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

use crate::record::Record;
use crate::remote::{PushOutcome, Remote, RemoteChanges};
use syncto_common::{Error, Result};

/// Failure injected into every request for one collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Failure {
    /// Respond with this HTTP status.
    Status(u16),
    /// Transport-level failure.
    Network,
    /// Malformed response body.
    TypeMismatch,
}

impl Failure {
    fn to_error(self, collection: &str) -> Error {
        match self {
            Failure::Status(status) => Error::Http {
                status,
                message: format!("Injected failure for {}", collection),
            },
            Failure::Network => Error::Network(format!("Injected failure for {}", collection)),
            Failure::TypeMismatch => {
                Error::TypeMismatch(format!("Injected failure for {}", collection))
            }
        }
    }
}

#[derive(Default)]
struct State {
    collections: HashMap<String, HashMap<String, Record>>,
    failures: HashMap<String, Failure>,
    fetches: HashMap<String, usize>,
    puts: HashMap<String, usize>,
    clock: u64,
}

impl State {
    /// Next server timestamp, strictly increasing.
    fn tick(&mut self) -> u64 {
        let now = u64::try_from(Utc::now().timestamp_millis()).unwrap_or(0);
        self.clock = now.max(self.clock + 1);
        self.clock
    }
}

/// In-memory remote.
///
/// Behaves like the record server: timestamps are strictly increasing,
/// uploads are conditional on the base timestamp. Failures and latency
/// can be injected per collection, and requests are counted.
#[derive(Default)]
pub struct MemoryRemote {
    state: Mutex<State>,
    latency: Option<Duration>,
}

impl MemoryRemote {
    /// Create a new empty memory remote.
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every request by `latency`.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Store `record` directly, bypassing conflict checks.
    ///
    /// Keeps the record's timestamp when set, otherwise assigns a new one.
    /// Returns the stored timestamp.
    pub fn seed(&self, collection: &str, mut record: Record) -> u64 {
        let mut state = self.state.lock();
        let ts = match record.last_modified {
            Some(ts) => {
                state.clock = state.clock.max(ts);
                ts
            }
            None => state.tick(),
        };
        record.last_modified = Some(ts);
        state
            .collections
            .entry(collection.to_string())
            .or_default()
            .insert(record.id.clone(), record);
        ts
    }

    /// Get the stored version of a record.
    pub fn record(&self, collection: &str, id: &str) -> Option<Record> {
        self.state
            .lock()
            .collections
            .get(collection)
            .and_then(|records| records.get(id))
            .cloned()
    }

    /// Number of records stored in `collection`.
    pub fn record_count(&self, collection: &str) -> usize {
        self.state
            .lock()
            .collections
            .get(collection)
            .map_or(0, HashMap::len)
    }

    /// Make every request for `collection` fail.
    pub fn fail(&self, collection: &str, failure: Failure) {
        self.state
            .lock()
            .failures
            .insert(collection.to_string(), failure);
    }

    /// Stop injecting failures for `collection`.
    pub fn recover(&self, collection: &str) {
        self.state.lock().failures.remove(collection);
    }

    /// Number of fetches issued for `collection`.
    pub fn fetch_count(&self, collection: &str) -> usize {
        self.state
            .lock()
            .fetches
            .get(collection)
            .copied()
            .unwrap_or(0)
    }

    /// Number of uploads issued for `collection`.
    pub fn put_count(&self, collection: &str) -> usize {
        self.state.lock().puts.get(collection).copied().unwrap_or(0)
    }

    async fn delay(&self) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }
}

#[async_trait]
impl Remote for MemoryRemote {
    fn name(&self) -> &str {
        "memory"
    }

    async fn fetch(&self, collection: &str, since: Option<u64>) -> Result<RemoteChanges> {
        {
            let mut state = self.state.lock();
            *state.fetches.entry(collection.to_string()).or_default() += 1;
            if let Some(failure) = state.failures.get(collection) {
                return Err(failure.to_error(collection));
            }
        }

        self.delay().await;

        let state = self.state.lock();
        let stored = state.collections.get(collection);

        let mut records: Vec<Record> = stored
            .into_iter()
            .flat_map(|records| records.values())
            .filter(|record| match (since, record.last_modified) {
                (Some(since), Some(ts)) => ts > since,
                _ => true,
            })
            .cloned()
            .collect();
        records.sort_by(|a, b| b.last_modified.cmp(&a.last_modified));

        let timestamp = stored
            .and_then(|records| records.values().filter_map(|r| r.last_modified).max())
            .or(since);

        debug!(collection, count = records.len(), "Memory remote fetch");
        Ok(RemoteChanges { records, timestamp })
    }

    async fn put(
        &self,
        collection: &str,
        mut record: Record,
        base: Option<u64>,
    ) -> Result<PushOutcome> {
        {
            let mut state = self.state.lock();
            *state.puts.entry(collection.to_string()).or_default() += 1;
            if let Some(failure) = state.failures.get(collection) {
                return Err(failure.to_error(collection));
            }
        }

        self.delay().await;

        let mut state = self.state.lock();
        let current = state
            .collections
            .get(collection)
            .and_then(|records| records.get(&record.id))
            .cloned();

        if let Some(current) = current {
            if base.is_none() || current.last_modified != base {
                debug!(collection, id = %record.id, "Memory remote rejected stale upload");
                return Ok(PushOutcome::Conflict { remote: current });
            }
        }

        let last_modified = state.tick();
        record.last_modified = Some(last_modified);
        state
            .collections
            .entry(collection.to_string())
            .or_default()
            .insert(record.id.clone(), record);

        Ok(PushOutcome::Accepted { last_modified })
    }
}
