//! Relay a Bedrock converse stream to a downstream consumer.
//!
//! The adapter is created up front with no-op callbacks and bound per request
//! to a channel, the way a websocket handler would forward chunks.
//!
//! The HTTP backend reads ConverseStream chunks framed as SSE, so point it at a
//! gateway that re-frames the runtime's binary event stream:
//!
//! CONVERSE_RELAY_BASE_URL=http://localhost:8080 AWS_BEARER_TOKEN_BEDROCK=... \
//!     cargo run --example converse_stream

use converse_relay::telemetry::{init_subscriber, SubscriberConfig};
use converse_relay::{ConverseRequest, HttpBackend, Message, StopSummary, StreamAdapter};
use std::sync::Arc;
use tokio::sync::mpsc;

#[derive(Debug)]
enum Outbound {
    Chunk(String),
    Stop(StopSummary),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_subscriber(&SubscriberConfig::from_env()?)?;

    let mut builder = HttpBackend::builder().from_env();
    if let Ok(base_url) = std::env::var("CONVERSE_RELAY_BASE_URL") {
        builder = builder.base_url(base_url);
    }
    let backend = Arc::new(builder.build()?);
    let adapter: StreamAdapter<()> = StreamAdapter::from_model(backend, "claude-v3-haiku");

    let (tx, mut rx) = mpsc::unbounded_channel();
    let stop_tx = tx.clone();
    let mut adapter = adapter.bind(
        move |text: &str| tx.send(Outbound::Chunk(text.to_string())).is_ok(),
        move |summary: StopSummary| stop_tx.send(Outbound::Stop(summary)).is_ok(),
    );

    let consumer = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            match message {
                Outbound::Chunk(text) => print!("{text}"),
                Outbound::Stop(summary) => {
                    println!("\n\n--- Stats ---");
                    println!("Stop reason: {}", summary.stop_reason);
                    println!("Input tokens: {}", summary.input_token_count);
                    println!("Output tokens: {}", summary.output_token_count);
                    println!("Price: ${:.6}", summary.price);
                }
            }
        }
    });

    let request = ConverseRequest::new(
        "anthropic.claude-3-haiku-20240307-v1:0",
        vec![Message::user("Write a haiku about Rust programming.")],
    )
    .system("You are a helpful assistant. Be concise.")
    .max_tokens(256)
    .temperature(0.7)
    .top_k(250);

    let mut relay = adapter.run(request).await?;
    while let Some(delivered) = relay.next().await {
        if !delivered? {
            break;
        }
    }
    drop(relay);
    drop(adapter);

    consumer.await?;
    Ok(())
}
