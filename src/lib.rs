//! Streaming relay over the Bedrock ConverseStream API.
//!
//! Text deltas are forwarded to a chunk callback as they arrive; once the
//! backend reports usage, the full text is priced and handed to a completion
//! callback.
//!
//! # Example
//! ```no_run
//! use converse_relay::{ConverseRequest, HttpBackend, Message, StreamAdapter};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), converse_relay::Error> {
//!     let backend = Arc::new(HttpBackend::from_env()?);
//!     let mut adapter = StreamAdapter::new(
//!         backend,
//!         "claude-v3-haiku",
//!         |text: &str| print!("{text}"),
//!         |summary| println!("\n${:.6} for {} tokens", summary.price, summary.output_token_count),
//!     );
//!
//!     let request = ConverseRequest::new(
//!         "anthropic.claude-3-haiku-20240307-v1:0",
//!         vec![Message::user("Hello!")],
//!     )
//!     .max_tokens(256);
//!
//!     let mut relay = adapter.run(request).await?;
//!     while let Some(item) = relay.next().await {
//!         item?;
//!     }
//!     Ok(())
//! }
//! ```

pub mod adapter;
pub mod backend;
pub mod cost;
pub mod error;
pub mod sse;
pub mod telemetry;
pub mod types;

pub use adapter::{ChunkHandler, CompleteHandler, RelayStream, StreamAdapter};
pub use backend::{ConverseBackend, EventStream, HttpBackend, HttpBackendBuilder, HttpBackendConfig};
pub use cost::{Cost, ModelPricing, PriceCalculator, PricingRegistry};
pub use error::Error;
pub use types::*;

/// Result type alias for this crate.
pub type Result<T> = std::result::Result<T, Error>;
