//! reqwest-backed transport
//!
//! Posts the batch as JSON and hands the response body back as a stream of
//! raw byte chunks. Status handling happens here; retry decisions do not.

use futures::future::BoxFuture;
use futures::{StreamExt, TryStreamExt};
use reqwest::header::ACCEPT;
use reqwest::Client;
use tracing::{debug, warn};
use url::Url;

use super::config::ClientConfig;
use super::{ChunkStream, Transport};
use crate::app::models::BatchRequest;
use crate::constants::http;
use crate::errors::{TransportError, TransportResult};

/// Transport talking to the scoring service over HTTP
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    stream_url: Url,
}

impl HttpTransport {
    /// Build a transport from client configuration
    ///
    /// # Errors
    ///
    /// Returns `TransportError::Request` if the configuration is invalid or
    /// the underlying client cannot be built
    pub fn new(config: &ClientConfig) -> TransportResult<Self> {
        let stream_url = config.stream_url().map_err(|e| TransportError::Request {
            reason: e.to_string(),
        })?;
        let client = config.build_http_client()?;
        debug!("HTTP transport targeting {}", stream_url);
        Ok(Self { client, stream_url })
    }

    /// Endpoint this transport posts to
    pub fn stream_url(&self) -> &Url {
        &self.stream_url
    }

    async fn send(&self, request: BatchRequest) -> TransportResult<ChunkStream> {
        debug!(
            "POST {} with {} items (group_key={}, max_concurrency={})",
            self.stream_url,
            request.items.len(),
            request.group_key,
            request.max_concurrency
        );

        let response = self
            .client
            .post(self.stream_url.clone())
            .header(ACCEPT, http::EVENT_STREAM_MIME)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            warn!("Scoring service answered HTTP {}", status.as_u16());
            return Err(TransportError::Status {
                status: status.as_u16(),
            });
        }

        let chunks = response
            .bytes_stream()
            .map_ok(|bytes| bytes.to_vec())
            .map_err(|e| TransportError::Read {
                reason: e.to_string(),
            });
        Ok(chunks.boxed())
    }
}

impl Transport for HttpTransport {
    fn open(&self, request: BatchRequest) -> BoxFuture<'_, TransportResult<ChunkStream>> {
        Box::pin(self.send(request))
    }
}
