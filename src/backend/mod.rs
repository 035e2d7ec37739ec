//! Backends that open a single streaming converse call.

pub mod http;

use crate::error::Error;
use crate::types::{ConverseStreamInput, StreamEvent};
use async_trait::async_trait;
use futures::stream::BoxStream;

pub use http::{HttpBackend, HttpBackendBuilder, HttpBackendConfig};

/// Events of one streaming call, in arrival order.
pub type EventStream = BoxStream<'static, Result<StreamEvent, Error>>;

/// Client able to open a streaming converse call.
///
/// Authentication and transport belong to the implementation. Errors returned
/// here are initiation failures; errors inside the stream are mid-stream ones.
#[async_trait]
pub trait ConverseBackend: Send + Sync {
    async fn converse_stream(&self, input: ConverseStreamInput) -> Result<EventStream, Error>;
}
