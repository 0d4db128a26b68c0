use serde::{Deserialize, Serialize};

use crate::attachments::AttachedFile;
use crate::config::{ApiConfig, SafetyFilter, MAX_TEMPERATURE};
use crate::preview::PreviewFrame;
use crate::protocol::{ConsoleLog, SelectedElement};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Model,
}

/// One chat turn. Immutable once appended to the conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub text: String,
    pub id: String,
}

impl Message {
    pub fn new(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            text: text.into(),
            id: uuid::Uuid::new_v4().to_string(),
        }
    }
}

/// Session-wide counters. Only ever added to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

impl TokenUsage {
    pub fn new(prompt_tokens: u64, completion_tokens: u64, total_tokens: u64) -> Self {
        Self { prompt_tokens, completion_tokens, total_tokens }
    }
}

impl std::ops::AddAssign for TokenUsage {
    fn add_assign(&mut self, rhs: Self) {
        self.prompt_tokens += rhs.prompt_tokens;
        self.completion_tokens += rhs.completion_tokens;
        self.total_tokens += rhs.total_tokens;
    }
}

/// Model settings read at request-build time.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatConfig {
    pub system_instruction: String,
    pub temperature: f32,
    pub top_p: f32,
    pub top_k: u32,
    pub model: String,
    pub thinking_mode: bool,
    pub thinking_budget: u32,
    pub max_tokens: u32,
    pub safety_filter: SafetyFilter,
    pub preview_tools: bool,
}

impl ChatConfig {
    pub fn set_temperature(&mut self, temperature: f32) {
        self.temperature = temperature.clamp(0.0, MAX_TEMPERATURE);
    }
}

impl From<&ApiConfig> for ChatConfig {
    fn from(api: &ApiConfig) -> Self {
        Self {
            system_instruction: api.system_prompt.clone(),
            temperature: api.temperature.clamp(0.0, MAX_TEMPERATURE),
            top_p: api.top_p,
            top_k: api.top_k,
            model: api.model.clone(),
            thinking_mode: api.thinking_mode,
            thinking_budget: api.thinking_budget,
            max_tokens: api.max_tokens,
            safety_filter: api.safety_filter,
            preview_tools: api.preview_tools,
        }
    }
}

#[derive(Default)]
pub struct Conversation {
    pub messages: Vec<Message>,
    pub usage: TokenUsage,
    /// At most one model request at a time. Sends while set are dropped.
    pub in_flight: bool,
}

/// Pending user input: the text box, attached files and the dictation flag.
#[derive(Default)]
pub struct Composer {
    pub input: String,
    pub attachments: Vec<AttachedFile>,
    pub listening: bool,
}

pub struct PreviewState {
    /// Latest successfully extracted code block. Overwritten, never merged.
    pub generated_code: String,
    pub annotating: bool,
    pub selected: Option<SelectedElement>,
    pub console: ConsoleLog,
    pub frame: PreviewFrame,
}

pub struct AppState {
    pub config: ChatConfig,
    pub conversation: Conversation,
    pub composer: Composer,
    pub preview: PreviewState,
}

impl AppState {
    pub fn new(config: ChatConfig, frame: PreviewFrame) -> Self {
        Self {
            config,
            conversation: Conversation::default(),
            composer: Composer::default(),
            preview: PreviewState {
                generated_code: String::new(),
                annotating: false,
                selected: None,
                console: ConsoleLog::default(),
                frame,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_usage_is_additive() {
        let mut usage = TokenUsage::default();
        usage += TokenUsage::new(10, 5, 15);
        usage += TokenUsage::new(3, 2, 5);
        assert_eq!(usage, TokenUsage::new(13, 7, 20));
    }

    #[test]
    fn test_message_ids_are_unique() {
        let a = Message::new(Role::User, "hi");
        let b = Message::new(Role::User, "hi");
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_message_serialized_shape() {
        let msg = Message { role: Role::Model, text: "ok".into(), id: "1".into() };
        assert_eq!(
            serde_json::to_value(&msg).unwrap(),
            serde_json::json!({ "role": "model", "text": "ok", "id": "1" })
        );
    }

    #[test]
    fn test_chat_config_clamps_temperature() {
        let mut config = ChatConfig::from(&ApiConfig::default());
        config.set_temperature(2.4);
        assert_eq!(config.temperature, MAX_TEMPERATURE);
        config.set_temperature(-1.0);
        assert_eq!(config.temperature, 0.0);
    }
}
