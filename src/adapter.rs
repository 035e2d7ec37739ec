//! Relay of one converse stream through caller-supplied callbacks.
//!
//! Each text delta is handed to the chunk callback and its return value is
//! yielded onward. Once the backend reports usage, the accumulated text is
//! priced and summarised for the completion callback, whose return value is
//! the last item of the relay.

use crate::backend::{ConverseBackend, EventStream};
use crate::cost::{PriceCalculator, PricingRegistry};
use crate::error::Error;
use crate::types::{ConverseRequest, StopSummary, StreamEvent};
use futures::Stream;
use pin_project_lite::pin_project;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{ready, Context, Poll};

/// Callback invoked with each raw text delta.
pub type ChunkHandler<R> = Box<dyn FnMut(&str) -> R + Send>;

/// Callback invoked once with the stream summary.
pub type CompleteHandler<R> = Box<dyn FnMut(StopSummary) -> R + Send>;

/// Streams a converse call and relays it through two callbacks.
pub struct StreamAdapter<R> {
    backend: Arc<dyn ConverseBackend>,
    pricing: Arc<dyn PriceCalculator>,
    model: String,
    on_chunk: ChunkHandler<R>,
    on_complete: CompleteHandler<R>,
}

impl<R> StreamAdapter<R> {
    /// Create an adapter for `model`, priced with the default [`PricingRegistry`].
    pub fn new<C, F>(
        backend: Arc<dyn ConverseBackend>,
        model: impl Into<String>,
        on_chunk: C,
        on_complete: F,
    ) -> Self
    where
        C: FnMut(&str) -> R + Send + 'static,
        F: FnMut(StopSummary) -> R + Send + 'static,
    {
        Self {
            backend,
            pricing: Arc::new(PricingRegistry::new()),
            model: model.into(),
            on_chunk: Box::new(on_chunk),
            on_complete: Box::new(on_complete),
        }
    }

    /// Replace the price calculator.
    pub fn with_pricing(mut self, pricing: impl PriceCalculator + 'static) -> Self {
        self.pricing = Arc::new(pricing);
        self
    }

    /// Replace both callbacks, e.g. once a per-request sink is known.
    pub fn bind<T, C, F>(self, on_chunk: C, on_complete: F) -> StreamAdapter<T>
    where
        C: FnMut(&str) -> T + Send + 'static,
        F: FnMut(StopSummary) -> T + Send + 'static,
    {
        StreamAdapter {
            backend: self.backend,
            pricing: self.pricing,
            model: self.model,
            on_chunk: Box::new(on_chunk),
            on_complete: Box::new(on_complete),
        }
    }

    /// Model name used for pricing.
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Open one streaming call for `request`.
    ///
    /// Initiation failures are logged and returned unchanged; no callback
    /// fires. On success the returned relay yields one item per text delta
    /// and a final item once usage metadata arrives.
    pub async fn run(
        &mut self,
        request: ConverseRequest,
    ) -> Result<RelayStream<'_, R, EventStream>, Error> {
        tracing::info!(model = %self.model, request = ?request, "args for converse stream");

        let events = match self.backend.converse_stream(request.into()).await {
            Ok(events) => events,
            Err(e) => {
                tracing::error!(model = %self.model, error = %e, "failed to open converse stream");
                return Err(e);
            }
        };

        Ok(RelayStream::new(events, self))
    }
}

impl<R> StreamAdapter<R>
where
    R: Default + 'static,
{
    /// Create an adapter whose callbacks do nothing. Use [`StreamAdapter::bind`]
    /// to attach real handlers later.
    pub fn from_model(backend: Arc<dyn ConverseBackend>, model: impl Into<String>) -> Self {
        Self::new(backend, model, |_: &str| R::default(), |_: StopSummary| R::default())
    }
}

pin_project! {
    /// Lazy sequence of callback results for one streaming call.
    ///
    /// Ends after the completion callback fires, when the backend stream
    /// closes, or after yielding a backend error. Not restartable.
    pub struct RelayStream<'a, R, S> {
        #[pin]
        events: S,
        adapter: &'a mut StreamAdapter<R>,
        completions: String,
        stop_reason: String,
        done: bool,
    }
}

impl<'a, R, S> RelayStream<'a, R, S>
where
    S: Stream<Item = Result<StreamEvent, Error>>,
{
    fn new(events: S, adapter: &'a mut StreamAdapter<R>) -> Self {
        Self {
            events,
            adapter,
            completions: String::with_capacity(4096),
            stop_reason: String::new(),
            done: false,
        }
    }

    /// Text received so far, untrimmed.
    pub fn current_text(&self) -> &str {
        &self.completions
    }

    /// Check if the relay has ended.
    pub fn is_done(&self) -> bool {
        self.done
    }
}

impl<R, S> RelayStream<'_, R, S>
where
    S: Stream<Item = Result<StreamEvent, Error>> + Unpin,
{
    /// Pull the next callback result.
    pub async fn next(&mut self) -> Option<Result<R, Error>> {
        futures::StreamExt::next(self).await
    }
}

impl<R, S> Stream for RelayStream<'_, R, S>
where
    S: Stream<Item = Result<StreamEvent, Error>>,
{
    type Item = Result<R, Error>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let mut this = self.project();

        loop {
            if *this.done {
                return Poll::Ready(None);
            }

            let event = match ready!(this.events.as_mut().poll_next(cx)) {
                Some(Ok(event)) => event,
                Some(Err(e)) => {
                    *this.done = true;
                    return Poll::Ready(Some(Err(e)));
                }
                None => {
                    // No usage metadata: no summary, no error.
                    *this.done = true;
                    tracing::debug!(
                        model = %this.adapter.model,
                        "converse stream closed without usage metadata"
                    );
                    return Poll::Ready(None);
                }
            };

            tracing::debug!(event = ?event, "event of converse stream");

            match event {
                StreamEvent::ContentDelta { text } => {
                    this.completions.push_str(&text);
                    let item = (this.adapter.on_chunk)(&text);
                    return Poll::Ready(Some(Ok(item)));
                }
                StreamEvent::MessageStop { stop_reason } => {
                    *this.stop_reason = stop_reason;
                }
                StreamEvent::Metadata {
                    input_tokens,
                    output_tokens,
                } => {
                    *this.done = true;
                    let adapter = &mut **this.adapter;
                    let price =
                        adapter
                            .pricing
                            .calculate_price(&adapter.model, input_tokens, output_tokens);

                    let summary = StopSummary {
                        full_token: this.completions.trim_end().to_string(),
                        stop_reason: std::mem::take(this.stop_reason),
                        input_token_count: input_tokens,
                        output_token_count: output_tokens,
                        price,
                    };
                    tracing::info!(
                        model = %adapter.model,
                        stop_reason = %summary.stop_reason,
                        input_tokens,
                        output_tokens,
                        price,
                        "converse stream completed"
                    );

                    let item = (adapter.on_complete)(summary);
                    return Poll::Ready(Some(Ok(item)));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ConverseStreamInput, GuardrailConfig, Message};
    use async_trait::async_trait;
    use futures::StreamExt;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use tracing_test::traced_test;

    type Script = Result<Vec<Result<StreamEvent, Error>>, Error>;

    /// Backend replaying one scripted outcome per call.
    #[derive(Default)]
    struct ScriptedBackend {
        runs: Mutex<VecDeque<Script>>,
        inputs: Mutex<Vec<ConverseStreamInput>>,
    }

    impl ScriptedBackend {
        fn with_runs(runs: Vec<Script>) -> Arc<Self> {
            Arc::new(Self {
                runs: Mutex::new(runs.into()),
                inputs: Mutex::default(),
            })
        }

        fn events(events: Vec<StreamEvent>) -> Arc<Self> {
            Self::with_runs(vec![Ok(events.into_iter().map(Ok).collect())])
        }
    }

    #[async_trait]
    impl ConverseBackend for ScriptedBackend {
        async fn converse_stream(&self, input: ConverseStreamInput) -> Result<EventStream, Error> {
            self.inputs.lock().unwrap().push(input);
            let events = self
                .runs
                .lock()
                .unwrap()
                .pop_front()
                .expect("unscripted call")?;
            Ok(futures::stream::iter(events).boxed())
        }
    }

    #[derive(Debug, PartialEq)]
    enum Relay {
        Chunk(String),
        Done(StopSummary),
    }

    fn recording_adapter(backend: Arc<ScriptedBackend>) -> StreamAdapter<Relay> {
        StreamAdapter::new(
            backend,
            "claude-v3-haiku",
            |text: &str| Relay::Chunk(text.to_string()),
            Relay::Done,
        )
        .with_pricing(|_: &str, input: u32, output: u32| f64::from(input) * 0.5 + f64::from(output))
    }

    fn hello_request() -> ConverseRequest {
        ConverseRequest::new("anthropic.claude-3-haiku", vec![Message::user("hello")])
    }

    async fn collect(adapter: &mut StreamAdapter<Relay>) -> Vec<Result<Relay, Error>> {
        let mut relay = adapter.run(hello_request()).await.unwrap();
        let mut items = Vec::new();
        while let Some(item) = relay.next().await {
            items.push(item);
        }
        items
    }

    #[tokio::test]
    async fn test_relay_hello_scenario() {
        let backend = ScriptedBackend::events(vec![
            StreamEvent::delta("Hi"),
            StreamEvent::delta(" there"),
            StreamEvent::stop("end_turn"),
            StreamEvent::metadata(5, 2),
        ]);
        let mut adapter = recording_adapter(backend);

        let items: Vec<Relay> = collect(&mut adapter)
            .await
            .into_iter()
            .map(Result::unwrap)
            .collect();

        assert_eq!(
            items,
            vec![
                Relay::Chunk("Hi".to_string()),
                Relay::Chunk(" there".to_string()),
                Relay::Done(StopSummary {
                    full_token: "Hi there".to_string(),
                    stop_reason: "end_turn".to_string(),
                    input_token_count: 5,
                    output_token_count: 2,
                    price: 4.5,
                }),
            ]
        );
    }

    #[tokio::test]
    async fn test_summary_is_right_trimmed_but_chunks_are_raw() {
        let backend = ScriptedBackend::events(vec![
            StreamEvent::delta("  Hello"),
            StreamEvent::delta(" world \n\t"),
            StreamEvent::stop("max_tokens"),
            StreamEvent::metadata(1, 1),
        ]);
        let mut adapter = recording_adapter(backend);
        let items = collect(&mut adapter).await;

        assert!(matches!(&items[1], Ok(Relay::Chunk(t)) if t == " world \n\t"));
        match &items[2] {
            Ok(Relay::Done(summary)) => {
                assert_eq!(summary.full_token, "  Hello world");
                assert_eq!(summary.stop_reason, "max_tokens");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_initiation_error_propagates_without_callbacks() {
        let backend = ScriptedBackend::with_runs(vec![Err(Error::Timeout)]);
        let calls = Arc::new(Mutex::new(0));
        let (c1, c2) = (calls.clone(), calls.clone());
        let mut adapter = StreamAdapter::new(
            backend,
            "claude-v3-haiku",
            move |_: &str| *c1.lock().unwrap() += 1,
            move |_: StopSummary| *c2.lock().unwrap() += 1,
        );

        let result = adapter.run(hello_request()).await;

        assert!(matches!(result, Err(Error::Timeout)));
        assert_eq!(*calls.lock().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_missing_metadata_ends_silently() {
        let backend = ScriptedBackend::events(vec![
            StreamEvent::delta("partial"),
            StreamEvent::delta(" answer"),
            StreamEvent::stop("end_turn"),
        ]);
        let mut adapter = recording_adapter(backend);
        let items = collect(&mut adapter).await;

        assert_eq!(items.len(), 2);
        assert!(items
            .iter()
            .all(|item| matches!(item, Ok(Relay::Chunk(_)))));
    }

    #[tokio::test]
    async fn test_metadata_is_terminal() {
        let backend = ScriptedBackend::events(vec![
            StreamEvent::delta("a"),
            StreamEvent::metadata(1, 1),
            StreamEvent::delta("late"),
            StreamEvent::metadata(2, 2),
        ]);
        let mut adapter = recording_adapter(backend);
        let items = collect(&mut adapter).await;

        assert_eq!(items.len(), 2);
        assert!(matches!(&items[1], Ok(Relay::Done(s)) if s.full_token == "a"));
    }

    #[tokio::test]
    async fn test_mid_stream_error_is_yielded_and_ends_relay() {
        let backend = ScriptedBackend::with_runs(vec![Ok(vec![
            Ok(StreamEvent::delta("a")),
            Err(Error::stream("modelStreamErrorException", "boom")),
            Ok(StreamEvent::metadata(1, 1)),
        ])]);
        let mut adapter = recording_adapter(backend);
        let items = collect(&mut adapter).await;

        assert_eq!(items.len(), 2);
        assert!(matches!(&items[1], Err(Error::Stream { kind, .. }) if kind == "modelStreamErrorException"));
    }

    #[tokio::test]
    async fn test_price_uses_adapter_model_and_exact_counts() {
        let backend = ScriptedBackend::events(vec![StreamEvent::metadata(1234, 567)]);
        let seen = Arc::new(Mutex::new(None));
        let seen_in_calc = seen.clone();
        let mut adapter = recording_adapter(backend).with_pricing(
            move |model: &str, input: u32, output: u32| {
                *seen_in_calc.lock().unwrap() = Some((model.to_string(), input, output));
                0.123_456_789
            },
        );

        let items = collect(&mut adapter).await;

        assert_eq!(
            *seen.lock().unwrap(),
            Some(("claude-v3-haiku".to_string(), 1234, 567))
        );
        match &items[0] {
            Ok(Relay::Done(summary)) => {
                assert_eq!(summary.price.to_bits(), 0.123_456_789_f64.to_bits());
                assert_eq!(summary.full_token, "");
                assert_eq!(summary.stop_reason, "");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_guardrail_forwarded_only_when_present() {
        let backend = ScriptedBackend::with_runs(vec![Ok(vec![]), Ok(vec![])]);
        let mut adapter = recording_adapter(backend.clone());

        drop(adapter.run(hello_request()).await.unwrap());
        drop(
            adapter
                .run(hello_request().guardrail(GuardrailConfig::new("gr-1", "1")))
                .await
                .unwrap(),
        );

        let inputs = backend.inputs.lock().unwrap();
        let first = serde_json::to_value(&inputs[0]).unwrap();
        let second = serde_json::to_value(&inputs[1]).unwrap();
        assert!(first.get("guardrailConfig").is_none());
        assert_eq!(second["guardrailConfig"]["guardrailIdentifier"], "gr-1");
        assert_eq!(inputs[0].model_id, "anthropic.claude-3-haiku");
    }

    #[tokio::test]
    async fn test_each_run_starts_with_fresh_text() {
        let backend = ScriptedBackend::with_runs(vec![
            Ok(vec![Ok(StreamEvent::delta("first")), Ok(StreamEvent::metadata(1, 1))]),
            Ok(vec![Ok(StreamEvent::delta("second")), Ok(StreamEvent::metadata(1, 1))]),
        ]);
        let mut adapter = recording_adapter(backend);

        collect(&mut adapter).await;
        let items = collect(&mut adapter).await;

        assert!(matches!(&items[1], Ok(Relay::Done(s)) if s.full_token == "second"));
    }

    #[tokio::test]
    async fn test_from_model_then_bind() {
        let backend = ScriptedBackend::with_runs(vec![
            Ok(vec![Ok(StreamEvent::delta("x")), Ok(StreamEvent::metadata(1, 1))]),
            Ok(vec![Ok(StreamEvent::delta("y")), Ok(StreamEvent::metadata(3, 4))]),
        ]);
        let mut adapter: StreamAdapter<()> = StreamAdapter::from_model(backend, "claude-v3-haiku");
        assert_eq!(adapter.model(), "claude-v3-haiku");

        {
            let mut relay = adapter.run(hello_request()).await.unwrap();
            let mut count = 0;
            while let Some(item) = relay.next().await {
                item.unwrap();
                count += 1;
            }
            assert_eq!(count, 2);
        }

        let mut adapter = adapter.bind(
            |text: &str| u32::try_from(text.len()).unwrap(),
            |summary: StopSummary| summary.input_token_count + summary.output_token_count,
        );
        let relay = adapter.run(hello_request()).await.unwrap();
        let items: Vec<u32> = relay.map(Result::unwrap).collect().await;
        assert_eq!(items, vec![1, 7]);
    }

    #[tokio::test]
    async fn test_relay_progress_accessors() {
        let backend = ScriptedBackend::events(vec![
            StreamEvent::delta("Hi "),
            StreamEvent::metadata(1, 1),
        ]);
        let mut adapter = recording_adapter(backend);
        let mut relay = adapter.run(hello_request()).await.unwrap();

        relay.next().await;
        assert_eq!(relay.current_text(), "Hi ");
        assert!(!relay.is_done());

        relay.next().await;
        assert!(relay.is_done());
        assert!(relay.next().await.is_none());
    }

    #[tokio::test]
    #[traced_test]
    async fn test_logs_request_and_completion() {
        let backend = ScriptedBackend::events(vec![
            StreamEvent::delta("Hi"),
            StreamEvent::metadata(5, 2),
        ]);
        let mut adapter = recording_adapter(backend);
        collect(&mut adapter).await;

        assert!(logs_contain("args for converse stream"));
        assert!(logs_contain("event of converse stream"));
        assert!(logs_contain("converse stream completed"));
    }

    #[tokio::test]
    #[traced_test]
    async fn test_logs_initiation_error() {
        let backend = ScriptedBackend::with_runs(vec![Err(Error::Unauthorized)]);
        let mut adapter = recording_adapter(backend);

        assert!(adapter.run(hello_request()).await.is_err());
        assert!(logs_contain("failed to open converse stream"));
    }
}
