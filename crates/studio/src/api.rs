use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::{ApiConfig, SafetyFilter};
use crate::state::{Role, TokenUsage};

const HARM_CATEGORIES: [&str; 4] = [
    "HARM_CATEGORY_HARASSMENT",
    "HARM_CATEGORY_HATE_SPEECH",
    "HARM_CATEGORY_SEXUALLY_EXPLICIT",
    "HARM_CATEGORY_DANGEROUS_CONTENT",
];

// --- Provider-neutral request/response ---

#[derive(Debug, Clone, PartialEq)]
pub enum Part {
    Text(String),
    InlineData { mime_type: String, data: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Turn {
    pub role: Role,
    pub parts: Vec<Part>,
}

/// A function the model may ask the host to run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FunctionDeclaration {
    pub name: String,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parameters: Option<Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ModelRequest {
    pub model: String,
    pub system_instruction: String,
    pub turns: Vec<Turn>,
    pub temperature: f32,
    pub top_p: f32,
    pub top_k: u32,
    pub max_tokens: u32,
    /// Set only when thinking mode is on.
    pub thinking_budget: Option<u32>,
    pub safety_filter: SafetyFilter,
    pub tools: Vec<FunctionDeclaration>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ToolCall {
    pub name: String,
    pub args: Value,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModelResponse {
    pub text: String,
    pub usage: Option<TokenUsage>,
    pub tool_calls: Vec<ToolCall>,
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("No API key configured. Add your key to config.toml or set GEMINI_API_KEY.")]
    MissingKey,
    #[error("Request timed out. Try again.")]
    Timeout,
    #[error("Network error: {0}")]
    Network(String),
    #[error("{}", status_message(.0))]
    Status(u16),
    #[error("Unexpected API response.")]
    Decode,
    #[error("Empty response from API.")]
    Empty,
}

fn status_message(code: &u16) -> String {
    match *code {
        400 => "Bad request. Try a shorter message.".into(),
        403 => "Invalid API key. Check config.toml.".into(),
        429 => "Rate limited. Wait a moment and try again.".into(),
        500 | 503 => "API server error. Try again.".into(),
        code => format!("API error (HTTP {code})."),
    }
}

/// The external generative model. Opaque: retries, rate limits and auth are its concern.
#[async_trait]
pub trait ModelClient: Send + Sync {
    async fn generate(&self, request: ModelRequest) -> Result<ModelResponse, ApiError>;
}

// --- Gemini API request structs ---

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<SystemInstruction>,
    contents: Vec<Content>,
    generation_config: GenerationConfig,
    safety_settings: Vec<SafetySetting>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<Tool>,
}

#[derive(Serialize)]
struct SystemInstruction {
    parts: Vec<WirePart>,
}

#[derive(Serialize)]
struct Content {
    role: &'static str,
    parts: Vec<WirePart>,
}

#[derive(Serialize)]
#[serde(untagged)]
enum WirePart {
    Text { text: String },
    InlineData { inline_data: InlineData },
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    mime_type: String,
    data: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    top_p: f32,
    top_k: u32,
    max_output_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    thinking_config: Option<ThinkingConfig>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ThinkingConfig {
    thinking_budget: u32,
}

#[derive(Serialize)]
struct SafetySetting {
    category: &'static str,
    threshold: &'static str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Tool {
    function_declarations: Vec<FunctionDeclaration>,
}

// --- Gemini API response structs ---

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    usage_metadata: Option<UsageMetadata>,
}

#[derive(Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResponsePart {
    text: Option<String>,
    /// Thought summaries are not part of the answer.
    #[serde(default)]
    thought: bool,
    function_call: Option<FunctionCall>,
}

#[derive(Deserialize)]
struct FunctionCall {
    name: String,
    #[serde(default)]
    args: Value,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
struct UsageMetadata {
    prompt_token_count: u64,
    candidates_token_count: u64,
    total_token_count: u64,
}

impl From<&Turn> for Content {
    fn from(turn: &Turn) -> Self {
        let role = match turn.role {
            Role::User => "user",
            Role::Model => "model",
        };
        let parts = turn
            .parts
            .iter()
            .map(|part| match part {
                Part::Text(text) => WirePart::Text { text: text.clone() },
                Part::InlineData { mime_type, data } => WirePart::InlineData {
                    inline_data: InlineData {
                        mime_type: mime_type.clone(),
                        data: data.clone(),
                    },
                },
            })
            .collect();
        Content { role, parts }
    }
}

fn to_wire(request: ModelRequest) -> GeminiRequest {
    let system_instruction = if request.system_instruction.is_empty() {
        None
    } else {
        Some(SystemInstruction {
            parts: vec![WirePart::Text { text: request.system_instruction }],
        })
    };

    let threshold = request.safety_filter.as_api_str();
    let safety_settings = HARM_CATEGORIES
        .iter()
        .map(|&category| SafetySetting { category, threshold })
        .collect();

    let tools = if request.tools.is_empty() {
        Vec::new()
    } else {
        vec![Tool { function_declarations: request.tools }]
    };

    GeminiRequest {
        system_instruction,
        contents: request.turns.iter().map(Content::from).collect(),
        generation_config: GenerationConfig {
            temperature: request.temperature,
            top_p: request.top_p,
            top_k: request.top_k,
            max_output_tokens: request.max_tokens,
            thinking_config: request
                .thinking_budget
                .map(|thinking_budget| ThinkingConfig { thinking_budget }),
        },
        safety_settings,
        tools,
    }
}

fn from_wire(body: GeminiResponse) -> Result<ModelResponse, ApiError> {
    let mut texts = Vec::new();
    let mut tool_calls = Vec::new();

    for part in body
        .candidates
        .into_iter()
        .filter_map(|c| c.content)
        .flat_map(|c| c.parts)
    {
        if let Some(call) = part.function_call {
            tool_calls.push(ToolCall { name: call.name, args: call.args });
        }
        match part.text {
            Some(text) if !part.thought => texts.push(text),
            _ => {}
        }
    }

    let text = texts.join("\n");
    if text.is_empty() && tool_calls.is_empty() {
        return Err(ApiError::Empty);
    }

    let usage = body.usage_metadata.map(|u| {
        TokenUsage::new(u.prompt_token_count, u.candidates_token_count, u.total_token_count)
    });

    Ok(ModelResponse { text, usage, tool_calls })
}

/// `generateContent` against the Gemini REST API.
pub struct GeminiClient {
    client: reqwest::Client,
    key: String,
    base_url: String,
}

impl GeminiClient {
    pub fn new(config: &ApiConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            client,
            key: config.key.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl ModelClient for GeminiClient {
    async fn generate(&self, request: ModelRequest) -> Result<ModelResponse, ApiError> {
        if self.key.is_empty() {
            return Err(ApiError::MissingKey);
        }

        let url = format!("{}/models/{}:generateContent", self.base_url, request.model);
        debug!("POST {url} ({} turns)", request.turns.len());

        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.key)
            .header("content-type", "application/json")
            .json(&to_wire(request))
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ApiError::Timeout
                } else {
                    ApiError::Network(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            warn!("Gemini returned HTTP {status}");
            return Err(ApiError::Status(status.as_u16()));
        }

        let body: GeminiResponse = response.json().await.map_err(|e| {
            warn!("Failed to decode Gemini response: {e}");
            ApiError::Decode
        })?;

        from_wire(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request(thinking_budget: Option<u32>, tools: Vec<FunctionDeclaration>) -> ModelRequest {
        ModelRequest {
            model: "gemini-3-pro-preview".into(),
            system_instruction: "Be brief.".into(),
            turns: vec![
                Turn { role: Role::User, parts: vec![Part::Text("hi".into())] },
                Turn { role: Role::Model, parts: vec![Part::Text("hello".into())] },
                Turn {
                    role: Role::User,
                    parts: vec![
                        Part::Text("look".into()),
                        Part::InlineData { mime_type: "image/png".into(), data: "AAAA".into() },
                    ],
                },
            ],
            temperature: 0.7,
            top_p: 0.95,
            top_k: 64,
            max_tokens: 8192,
            thinking_budget,
            safety_filter: SafetyFilter::Off,
            tools,
        }
    }

    #[test]
    fn test_request_wire_format() {
        let wire = serde_json::to_value(to_wire(request(None, Vec::new()))).unwrap();

        assert_eq!(wire["systemInstruction"]["parts"][0]["text"], "Be brief.");
        assert_eq!(wire["contents"][1]["role"], "model");
        assert_eq!(wire["contents"][2]["parts"][0]["text"], "look");
        assert_eq!(
            wire["contents"][2]["parts"][1],
            json!({ "inline_data": { "mimeType": "image/png", "data": "AAAA" } })
        );
        assert_eq!(wire["generationConfig"]["topK"], 64);
        assert_eq!(wire["generationConfig"]["maxOutputTokens"], 8192);
        assert!(wire["generationConfig"].get("thinkingConfig").is_none());
        assert!(wire.get("tools").is_none());
        assert_eq!(wire["safetySettings"][0]["threshold"], "BLOCK_NONE");
    }

    #[test]
    fn test_request_with_thinking_and_tools() {
        let tools = vec![FunctionDeclaration {
            name: "reload_preview".into(),
            description: "Reload".into(),
            parameters: None,
        }];
        let wire = serde_json::to_value(to_wire(request(Some(1024), tools))).unwrap();

        assert_eq!(wire["generationConfig"]["thinkingConfig"]["thinkingBudget"], 1024);
        assert_eq!(wire["tools"][0]["functionDeclarations"][0]["name"], "reload_preview");
        assert!(wire["tools"][0]["functionDeclarations"][0].get("parameters").is_none());
        assert_eq!(wire["model"], Value::Null);
    }

    #[test]
    fn test_response_with_usage_and_tool_call() {
        let body: GeminiResponse = serde_json::from_value(json!({
            "candidates": [{
                "content": {
                    "role": "model",
                    "parts": [
                        { "text": "planning...", "thought": true },
                        { "text": "```html\n<p>x</p>\n```" },
                        { "functionCall": { "name": "scroll_to_bottom", "args": {} } }
                    ]
                }
            }],
            "usageMetadata": { "promptTokenCount": 10, "candidatesTokenCount": 5, "totalTokenCount": 15 }
        }))
        .unwrap();

        let response = from_wire(body).unwrap();
        assert_eq!(response.text, "```html\n<p>x</p>\n```");
        assert_eq!(response.usage, Some(TokenUsage::new(10, 5, 15)));
        assert_eq!(response.tool_calls.len(), 1);
        assert_eq!(response.tool_calls[0].name, "scroll_to_bottom");
    }

    #[test]
    fn test_response_without_content_is_empty() {
        let body: GeminiResponse =
            serde_json::from_value(json!({ "candidates": [{ "finishReason": "SAFETY" }] })).unwrap();
        assert!(matches!(from_wire(body), Err(ApiError::Empty)));
    }

    #[test]
    fn test_status_messages() {
        assert_eq!(ApiError::Status(403).to_string(), "Invalid API key. Check config.toml.");
        assert_eq!(ApiError::Status(418).to_string(), "API error (HTTP 418).");
    }

    #[tokio::test]
    async fn test_missing_key_fails_before_network() {
        let client = GeminiClient::new(&ApiConfig::default());
        let err = client.generate(request(None, Vec::new())).await.unwrap_err();
        assert!(matches!(err, ApiError::MissingKey));
    }
}
