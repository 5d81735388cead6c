//! Wire types for OpenAI-compatible chat completions, plus the
//! [`ModelOutput`] shape every model answer is reduced to.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
}

/// One prompt message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: MessageRole,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
        }
    }
}

/// Raw model output: either one string or an ordered list of content parts.
///
/// Call [`ModelOutput::normalize`] right after invocation; nothing else in
/// the crate should look inside the variants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ModelOutput {
    Text(String),
    Parts(Vec<ContentPart>),
}

/// One fragment of multi-part model content
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ContentPart {
    /// Bare string fragment
    Text(String),
    /// Tagged object carrying text, e.g. `{"type": "text", "text": "..."}`
    Tagged {
        text: String,
        #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
        kind: Option<String>,
    },
    /// Anything else; rendered as its JSON text
    Other(serde_json::Value),
}

impl ContentPart {
    fn append_to(&self, out: &mut String) {
        match self {
            ContentPart::Text(text) | ContentPart::Tagged { text, .. } => out.push_str(text),
            ContentPart::Other(value) => out.push_str(&value.to_string()),
        }
    }
}

impl ModelOutput {
    /// Concatenate all fragments in order and trim surrounding whitespace
    pub fn normalize(&self) -> String {
        match self {
            ModelOutput::Text(text) => text.trim().to_string(),
            ModelOutput::Parts(parts) => {
                let mut out = String::new();
                for part in parts {
                    part.append_to(&mut out);
                }
                out.trim().to_string()
            }
        }
    }
}

impl From<String> for ModelOutput {
    fn from(text: String) -> Self {
        ModelOutput::Text(text)
    }
}

impl From<&str> for ModelOutput {
    fn from(text: &str) -> Self {
        ModelOutput::Text(text.to_string())
    }
}

/// JSON schema the model is asked to follow
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutputSchema {
    /// Schema name reported to the API
    pub name: String,
    /// JSON schema document
    pub schema: serde_json::Value,
}

impl OutputSchema {
    /// Create a named output schema
    pub fn new(name: impl Into<String>, schema: serde_json::Value) -> Self {
        Self {
            name: name.into(),
            schema,
        }
    }
}

/// `response_format` block of a chat request
#[derive(Debug, Clone, Serialize)]
pub struct ResponseFormat {
    #[serde(rename = "type")]
    pub kind: String,
    pub json_schema: JsonSchemaFormat,
}

/// Named schema inside a `response_format` block
#[derive(Debug, Clone, Serialize)]
pub struct JsonSchemaFormat {
    pub name: String,
    pub schema: serde_json::Value,
    pub strict: bool,
}

impl From<&OutputSchema> for ResponseFormat {
    fn from(schema: &OutputSchema) -> Self {
        Self {
            kind: "json_schema".to_string(),
            json_schema: JsonSchemaFormat {
                name: schema.name.clone(),
                schema: schema.schema.clone(),
                strict: false,
            },
        }
    }
}

/// `POST /chat/completions` body
#[derive(Debug, Clone, Serialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_format: Option<ResponseFormat>,
}

impl ChatRequest {
    pub fn new(model: impl Into<String>, messages: Vec<Message>) -> Self {
        Self {
            model: model.into(),
            messages,
            temperature: None,
            max_tokens: None,
            response_format: None,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    /// Ask for output following a JSON schema
    pub fn with_output_schema(mut self, schema: &OutputSchema) -> Self {
        self.response_format = Some(ResponseFormat::from(schema));
        self
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub total_tokens: u32,
}

/// Why generation stopped; unrecognised values map to `Other`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    Length,
    ContentFilter,
    #[serde(other)]
    Other,
}

/// Assistant message; `content` may be a string or a list of parts
#[derive(Debug, Clone, Deserialize)]
pub struct ResponseMessage {
    #[serde(default)]
    pub content: Option<ModelOutput>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Choice {
    pub message: ResponseMessage,
    pub finish_reason: Option<FinishReason>,
}

/// `POST /chat/completions` response
#[derive(Debug, Clone, Deserialize)]
pub struct ChatResponse {
    pub model: String,
    pub choices: Vec<Choice>,
    pub usage: Option<Usage>,
}

/// First choice of a completion, with usage folded in
#[derive(Debug, Clone)]
pub struct LlmResponse {
    /// Raw content; callers normalize it
    pub content: ModelOutput,
    pub model: String,
    pub tokens_used: u32,
    pub finish_reason: FinishReason,
}

impl LlmResponse {
    /// `None` when there is no choice or the choice has no content
    pub fn from_chat_response(response: ChatResponse) -> Option<Self> {
        let choice = response.choices.into_iter().next()?;
        let content = choice.message.content?;

        Some(Self {
            content,
            model: response.model,
            tokens_used: response.usage.map(|u| u.total_tokens).unwrap_or(0),
            finish_reason: choice.finish_reason.unwrap_or(FinishReason::Other),
        })
    }
}
