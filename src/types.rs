use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Message role in conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// A conversation message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: Vec<ContentBlock>,
}

impl Message {
    /// Create a user message with a single text block.
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: vec![ContentBlock::Text(text.into())],
        }
    }

    /// Create an assistant message with a single text block.
    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: vec![ContentBlock::Text(text.into())],
        }
    }

    /// Append a content block.
    pub fn with_block(mut self, block: ContentBlock) -> Self {
        self.content.push(block);
        self
    }
}

/// Content block, keyed by its kind on the wire (`{"text": ...}`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ContentBlock {
    Text(String),
    Image(ImageBlock),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageBlock {
    /// `png`, `jpeg`, `gif` or `webp`.
    pub format: String,
    pub source: ImageSource,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageSource {
    /// Base64-encoded image bytes.
    pub bytes: String,
}

/// System prompt block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemContent {
    pub text: String,
}

impl SystemContent {
    pub fn text(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }
}

/// Sampling parameters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InferenceConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_sequences: Option<Vec<String>>,
}

/// Backend-side content-safety policy attached to a request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GuardrailConfig {
    pub guardrail_identifier: String,
    pub guardrail_version: String,
    /// `enabled` or `disabled`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace: Option<String>,
    /// `sync` or `async`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream_processing_mode: Option<String>,
}

impl GuardrailConfig {
    pub fn new(identifier: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            guardrail_identifier: identifier.into(),
            guardrail_version: version.into(),
            trace: None,
            stream_processing_mode: None,
        }
    }
}

/// A fully formed converse request, as produced by the caller's request builder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConverseRequest {
    pub model_id: String,
    pub messages: Vec<Message>,
    #[serde(default)]
    pub inference_config: InferenceConfig,
    #[serde(default)]
    pub system: Vec<SystemContent>,
    /// Model-specific fields, e.g. `{"top_k": 250}`.
    #[serde(default = "empty_object")]
    pub additional_model_request_fields: Value,
    /// Also read from `guardrailConfig`, the key used by the runtime API.
    #[serde(default, alias = "guardrailConfig", skip_serializing_if = "Option::is_none")]
    pub guardrail_config: Option<GuardrailConfig>,
}

fn empty_object() -> Value {
    Value::Object(Map::new())
}

impl ConverseRequest {
    pub fn new(model_id: impl Into<String>, messages: Vec<Message>) -> Self {
        Self {
            model_id: model_id.into(),
            messages,
            inference_config: InferenceConfig::default(),
            system: Vec::new(),
            additional_model_request_fields: empty_object(),
            guardrail_config: None,
        }
    }

    /// Append a system prompt block.
    pub fn system(mut self, text: impl Into<String>) -> Self {
        self.system.push(SystemContent::text(text));
        self
    }

    /// Set maximum tokens to generate.
    pub fn max_tokens(mut self, tokens: u32) -> Self {
        self.inference_config.max_tokens = Some(tokens);
        self
    }

    /// Set temperature for sampling.
    pub fn temperature(mut self, temp: f32) -> Self {
        self.inference_config.temperature = Some(temp);
        self
    }

    /// Set top-p for nucleus sampling.
    pub fn top_p(mut self, p: f32) -> Self {
        self.inference_config.top_p = Some(p);
        self
    }

    /// Set stop sequences.
    pub fn stop_sequences(mut self, sequences: Vec<String>) -> Self {
        self.inference_config.stop_sequences = Some(sequences);
        self
    }

    /// Set top-k. Not part of the common inference config, so it goes into
    /// the additional model request fields.
    pub fn top_k(self, k: u32) -> Self {
        self.additional_field("top_k", Value::from(k))
    }

    /// Set a model-specific request field.
    pub fn additional_field(mut self, key: impl Into<String>, value: Value) -> Self {
        if !self.additional_model_request_fields.is_object() {
            self.additional_model_request_fields = empty_object();
        }
        if let Value::Object(map) = &mut self.additional_model_request_fields {
            map.insert(key.into(), value);
        }
        self
    }

    /// Attach a guardrail configuration.
    pub fn guardrail(mut self, config: GuardrailConfig) -> Self {
        self.guardrail_config = Some(config);
        self
    }
}

/// Payload of a single streaming call. The model id is addressed separately
/// from the body, so it is not serialized.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConverseStreamInput {
    #[serde(skip)]
    pub model_id: String,
    pub messages: Vec<Message>,
    pub inference_config: InferenceConfig,
    pub system: Vec<SystemContent>,
    pub additional_model_request_fields: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub guardrail_config: Option<GuardrailConfig>,
}

impl From<ConverseRequest> for ConverseStreamInput {
    fn from(req: ConverseRequest) -> Self {
        Self {
            model_id: req.model_id,
            messages: req.messages,
            inference_config: req.inference_config,
            system: req.system,
            additional_model_request_fields: req.additional_model_request_fields,
            guardrail_config: req.guardrail_config,
        }
    }
}

/// One event of a streaming call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// Incremental text fragment.
    ContentDelta { text: String },
    /// Generation finished, e.g. `end_turn` or `max_tokens`.
    MessageStop { stop_reason: String },
    /// Usage counters. Terminal.
    Metadata { input_tokens: u32, output_tokens: u32 },
}

impl StreamEvent {
    pub fn delta(text: impl Into<String>) -> Self {
        Self::ContentDelta { text: text.into() }
    }

    pub fn stop(reason: impl Into<String>) -> Self {
        Self::MessageStop {
            stop_reason: reason.into(),
        }
    }

    pub fn metadata(input_tokens: u32, output_tokens: u32) -> Self {
        Self::Metadata {
            input_tokens,
            output_tokens,
        }
    }
}

/// Summary handed to the completion callback once the stream reports usage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StopSummary {
    /// Full generated text with trailing whitespace removed.
    pub full_token: String,
    pub stop_reason: String,
    pub input_token_count: u32,
    pub output_token_count: u32,
    /// Price in USD.
    pub price: f64,
}
