//! Transport seam between the pipeline and the scoring service
//!
//! The connection controller only ever sees the [`Transport`] trait: open a
//! streaming request, get back a stream of raw byte chunks. The module is
//! organized into:
//! - `config`: HTTP client configuration and building
//! - `http`: the reqwest-backed [`HttpTransport`]

use futures::future::BoxFuture;
use futures::stream::BoxStream;

use crate::app::models::BatchRequest;
use crate::errors::TransportResult;

pub mod config;
pub mod http;

pub use config::ClientConfig;
pub use http::HttpTransport;

/// Raw response body, chunked however the network delivered it
pub type ChunkStream = BoxStream<'static, TransportResult<Vec<u8>>>;

/// Opens one streaming batch request
///
/// Implementations resolve once the response headers are in and the body
/// can be read; any failure before that point is returned from `open`.
/// Dropping the returned stream must release the underlying connection.
pub trait Transport: Send + Sync {
    fn open(&self, request: BatchRequest) -> BoxFuture<'_, TransportResult<ChunkStream>>;
}
