//! Record server client.
//!
//! Talks to the Kinto-style record server that fronts Sync storage. All
//! collections live in a single bucket and every request carries the
//! BrowserID assertion and the client-state header.

use async_trait::async_trait;
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use reqwest::{header, Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{debug, warn};
use url::Url;

use crate::record::Record;
use crate::remote::{PushOutcome, Remote, RemoteChanges};
use syncto_common::{ClientStateId, Error, Result};

/// Bucket holding every synced collection.
const BUCKET: &str = "syncto";

/// Header carrying the client-state id.
const CLIENT_STATE_HEADER: &str = "X-Client-State";

/// Header carrying the URL of the next result page.
const NEXT_PAGE_HEADER: &str = "Next-Page";

/// Characters left unescaped in a path segment.
const SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// Envelope around single-record responses.
#[derive(Debug, Deserialize)]
struct DataResponse<T> {
    data: T,
}

/// HTTP remote for the record server.
pub struct HttpRemote {
    http: Client,
    base: Url,
    authorization: String,
    client_state: ClientStateId,
}

impl HttpRemote {
    /// Create a client for the server at `server_url`.
    ///
    /// # Errors
    /// - `Error::InvalidInput` if `server_url` is not an absolute URL
    /// - `Error::Network` if the HTTP client cannot be built
    pub fn new(server_url: &str, assertion: &str, client_state: &ClientStateId) -> Result<Self> {
        let mut base = Url::parse(server_url)
            .map_err(|e| Error::InvalidInput(format!("Invalid server URL: {}", e)))?;
        if base.cannot_be_a_base() {
            return Err(Error::InvalidInput(format!(
                "Invalid server URL: {}",
                server_url
            )));
        }
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }

        let http = Client::builder()
            .user_agent(concat!("syncto/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::Network(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http,
            base,
            authorization: format!("BrowserID {}", assertion),
            client_state: client_state.clone(),
        })
    }

    fn records_url(&self, collection: &str) -> Result<Url> {
        let path = format!(
            "buckets/{}/collections/{}/records",
            BUCKET,
            utf8_percent_encode(collection, SEGMENT)
        );
        self.base
            .join(&path)
            .map_err(|e| Error::InvalidInput(format!("Invalid collection URL: {}", e)))
    }

    fn record_url(&self, collection: &str, id: &str) -> Result<Url> {
        let mut url = self.records_url(collection)?;
        let path = format!("{}/{}", url.path(), utf8_percent_encode(id, SEGMENT));
        url.set_path(&path);
        Ok(url)
    }

    fn get(&self, url: Url) -> reqwest::RequestBuilder {
        self.http
            .get(url)
            .header(header::AUTHORIZATION, &self.authorization)
            .header(CLIENT_STATE_HEADER, self.client_state.as_str())
    }

    /// Fetch the current remote version of one record.
    async fn get_record(&self, collection: &str, id: &str) -> Result<Record> {
        let response = self
            .get(self.record_url(collection, id)?)
            .send()
            .await
            .map_err(|e| Error::Network(format!("Failed to get record: {}", e)))?;

        let body: DataResponse<Record> = Self::handle_response(response).await?;
        Ok(body.data)
    }

    async fn handle_response<T: DeserializeOwned>(response: Response) -> Result<T> {
        let status = response.status();

        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(Error::Http {
                status: status.as_u16(),
                message,
            });
        }

        response
            .json()
            .await
            .map_err(|e| Error::TypeMismatch(format!("Unexpected server response: {}", e)))
    }
}

/// Parse a quoted timestamp header such as `"1456789012345"`.
fn parse_timestamp(value: Option<&header::HeaderValue>) -> Option<u64> {
    value
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim_matches('"').parse().ok())
}

#[async_trait]
impl Remote for HttpRemote {
    fn name(&self) -> &str {
        "http"
    }

    async fn fetch(&self, collection: &str, since: Option<u64>) -> Result<RemoteChanges> {
        let mut url = self.records_url(collection)?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("_sort", "-last_modified");
            if let Some(since) = since {
                query.append_pair("_since", &since.to_string());
            }
        }

        let mut changes = RemoteChanges::default();
        let mut next = Some(url);

        while let Some(url) = next.take() {
            let response = self
                .get(url)
                .send()
                .await
                .map_err(|e| Error::Network(format!("Failed to list records: {}", e)))?;

            if changes.timestamp.is_none() {
                changes.timestamp = parse_timestamp(response.headers().get(header::ETAG));
            }
            next = match response.headers().get(NEXT_PAGE_HEADER) {
                Some(value) => {
                    let value = value.to_str().map_err(|e| {
                        Error::TypeMismatch(format!("Invalid {} header: {}", NEXT_PAGE_HEADER, e))
                    })?;
                    Some(Url::parse(value).map_err(|e| {
                        Error::TypeMismatch(format!("Invalid {} header: {}", NEXT_PAGE_HEADER, e))
                    })?)
                }
                None => None,
            };

            let page: DataResponse<Vec<Record>> = Self::handle_response(response).await?;
            changes.records.extend(page.data);
        }

        if changes.timestamp.is_none() {
            changes.timestamp = since;
        }

        debug!(
            collection,
            count = changes.records.len(),
            timestamp = ?changes.timestamp,
            "Fetched remote changes"
        );
        Ok(changes)
    }

    async fn put(
        &self,
        collection: &str,
        record: Record,
        base: Option<u64>,
    ) -> Result<PushOutcome> {
        let url = self.record_url(collection, &record.id)?;
        let body = serde_json::json!({
            "data": {
                "id": record.id,
                "payload": record.payload,
            }
        });

        let mut request = self
            .http
            .put(url)
            .header(header::AUTHORIZATION, &self.authorization)
            .header(CLIENT_STATE_HEADER, self.client_state.as_str())
            .json(&body);
        request = match base {
            Some(ts) => request.header(header::IF_MATCH, format!("\"{}\"", ts)),
            None => request.header(header::IF_NONE_MATCH, "*"),
        };

        let response = request
            .send()
            .await
            .map_err(|e| Error::Network(format!("Failed to upload record: {}", e)))?;

        if response.status() == StatusCode::PRECONDITION_FAILED {
            warn!(collection, id = %record.id, "Upload rejected, remote version is newer");
            let remote = self.get_record(collection, &record.id).await?;
            return Ok(PushOutcome::Conflict { remote });
        }

        let saved: DataResponse<Record> = Self::handle_response(response).await?;
        let last_modified = saved.data.last_modified.ok_or_else(|| {
            Error::TypeMismatch(format!("Server did not timestamp record {}", record.id))
        })?;

        Ok(PushOutcome::Accepted { last_modified })
    }
}
