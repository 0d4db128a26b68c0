use std::path::PathBuf;
use std::sync::Arc;

use futures_util::stream::{FuturesUnordered, StreamExt};
use parking_lot::Mutex;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, warn};

use crate::api::{ModelClient, ModelRequest, Part, Turn};
use crate::attachments::{self, AttachedFile};
use crate::config::Config;
use crate::dictation::{Dictation, DictationError, NoDictation};
use crate::extract::extract_code;
use crate::logging;
use crate::preview::PreviewFrame;
use crate::protocol::{ConsoleEntry, HostMessage, PreviewMessage, ScrollPosition, SelectedElement};
use crate::session::SessionStore;
use crate::state::{AppState, ChatConfig, Message, Role, TokenUsage};
use crate::tools::{self, PREVIEW_TOOLS};

/// Why a send did not start a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    /// No text and no attachments.
    Empty,
    /// Another request is still in flight.
    Busy,
    /// A refinement needs a selected element.
    NoSelection,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    Rejected(Rejection),
    Completed { code_updated: bool },
    /// The model call failed. The error text was appended as a model message.
    Failed(String),
}

/// Canned refinement requests for the selected element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Refinement {
    AlignLeft,
    AlignCenter,
    AlignRight,
    Background,
    TextColor,
    Remix,
    Delete,
}

impl Refinement {
    /// The direct style edit applied alongside the instruction, if any.
    fn direct_style(self) -> Option<(&'static str, &'static str)> {
        match self {
            Self::AlignLeft => Some(("textAlign", "left")),
            Self::AlignCenter => Some(("textAlign", "center")),
            Self::AlignRight => Some(("textAlign", "right")),
            _ => None,
        }
    }

    pub fn instruction(self, element: &SelectedElement) -> String {
        let tag = &element.tag_name;
        match self {
            Self::AlignLeft | Self::AlignCenter | Self::AlignRight => {
                let side = self.direct_style().map(|(_, v)| v).unwrap_or_default();
                format!("Align the text of the selected <{tag}> to the {side}.")
            }
            Self::Background => format!(
                "Change the background color of the selected <{tag}> to a sophisticated, modern color."
            ),
            Self::TextColor => format!(
                "Change the text color of the selected <{tag}> to something with high contrast."
            ),
            Self::Remix => format!("Improve the content and aesthetics of this <{tag}> element."),
            Self::Delete => format!("Delete the selected <{tag}> element."),
        }
    }
}

impl std::str::FromStr for Refinement {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "left" | "align-left" => Ok(Self::AlignLeft),
            "center" | "align-center" => Ok(Self::AlignCenter),
            "right" | "align-right" => Ok(Self::AlignRight),
            "background" => Ok(Self::Background),
            "text-color" => Ok(Self::TextColor),
            "remix" => Ok(Self::Remix),
            "delete" => Ok(Self::Delete),
            other => Err(format!("unknown refinement: {other}")),
        }
    }
}

/// "fontSize" -> "font size"
fn describe_property(property: &str) -> String {
    let mut out = String::with_capacity(property.len() + 4);
    for c in property.chars() {
        if c.is_ascii_uppercase() {
            out.push(' ');
            out.push(c.to_ascii_lowercase());
        } else {
            out.push(c);
        }
    }
    out
}

/// Clears the in-flight flag however the request ends, including when the
/// send future is dropped mid-call.
struct InFlight<'a>(&'a Mutex<AppState>);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.lock().conversation.in_flight = false;
    }
}

/// The conversation controller. Owns all session state; the host drives it
/// through these methods and renders from the snapshots it hands out.
pub struct Studio {
    state: Mutex<AppState>,
    client: Arc<dyn ModelClient>,
    store: Option<SessionStore>,
    dictation: Box<dyn Dictation>,
}

impl Studio {
    pub fn new(config: &Config, client: Arc<dyn ModelClient>) -> Self {
        let frame = PreviewFrame::new(config.preview.tailwind, config.preview.snapshot_limit);
        Self {
            state: Mutex::new(AppState::new(ChatConfig::from(&config.api), frame)),
            client,
            store: None,
            dictation: Box::new(NoDictation),
        }
    }

    pub fn with_store(mut self, store: SessionStore) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_dictation(mut self, dictation: Box<dyn Dictation>) -> Self {
        self.dictation = dictation;
        self
    }

    /// Load persisted history and rebuild the preview from the most recent
    /// message that carries a code block.
    pub fn restore(&self) {
        let Some(ref store) = self.store else { return };
        let messages = store.load();
        let code = messages.iter().rev().find_map(|m| extract_code(&m.text));
        info!("Restored {} messages", messages.len());

        let mut state = self.state.lock();
        state.conversation.messages = messages;
        if let Some(code) = code {
            let annotating = state.preview.annotating;
            state.preview.frame.render(&code, annotating);
            state.preview.generated_code = code;
        }
    }

    /// Route host commands to a loaded preview.
    pub fn connect_preview(&self, outbox: UnboundedSender<HostMessage>) {
        self.state.lock().preview.frame.connect(outbox);
    }

    // --- Settings ---

    pub fn config(&self) -> ChatConfig {
        self.state.lock().config.clone()
    }

    pub fn update_config(&self, update: impl FnOnce(&mut ChatConfig)) {
        let mut state = self.state.lock();
        update(&mut state.config);
        let temperature = state.config.temperature;
        state.config.set_temperature(temperature);
    }

    // --- Composer ---

    pub fn set_input(&self, text: impl Into<String>) {
        self.state.lock().composer.input = text.into();
    }

    pub fn input(&self) -> String {
        self.state.lock().composer.input.clone()
    }

    /// Read the files concurrently and append each as soon as it is ready.
    /// Unreadable files are skipped. Returns how many were attached.
    pub async fn attach(&self, paths: Vec<PathBuf>) -> usize {
        let mut reads: FuturesUnordered<_> = paths.into_iter().map(attachments::encode_file).collect();
        let mut attached = 0;
        while let Some(result) = reads.next().await {
            match result {
                Ok(file) => {
                    debug!("Attached {} ({})", file.name, file.mime_type);
                    self.state.lock().composer.attachments.push(file);
                    attached += 1;
                }
                Err(e) => warn!("{e}"),
            }
        }
        attached
    }

    pub fn remove_attachment(&self, index: usize) -> Option<AttachedFile> {
        let mut state = self.state.lock();
        (index < state.composer.attachments.len()).then(|| state.composer.attachments.remove(index))
    }

    pub fn attachments(&self) -> Vec<AttachedFile> {
        self.state.lock().composer.attachments.clone()
    }

    // --- Dictation ---

    /// Start or stop dictation. Returns whether it is now listening.
    pub fn toggle_dictation(&self) -> Result<bool, DictationError> {
        if !self.dictation.is_available() {
            return Err(DictationError::Unavailable);
        }
        let mut state = self.state.lock();
        if state.composer.listening {
            self.dictation.stop();
            state.composer.listening = false;
        } else {
            self.dictation.start()?;
            state.composer.listening = true;
        }
        Ok(state.composer.listening)
    }

    /// Interim and final transcripts replace the input text.
    pub fn apply_transcript(&self, transcript: &str) {
        let mut state = self.state.lock();
        if state.composer.listening {
            state.composer.input = transcript.to_string();
        }
    }

    /// The recognizer ended or errored.
    pub fn dictation_ended(&self) {
        self.state.lock().composer.listening = false;
    }

    pub fn is_listening(&self) -> bool {
        self.state.lock().composer.listening
    }

    // --- Preview and annotation ---

    pub fn set_annotating(&self, active: bool) {
        let mut state = self.state.lock();
        set_annotating(&mut state, active);
    }

    pub fn is_annotating(&self) -> bool {
        self.state.lock().preview.annotating
    }

    /// Handle a raw message posted by the preview. Unknown or stale messages are ignored.
    pub fn handle_preview_message(&self, raw: &str) {
        if let Some(message) = PreviewMessage::parse(raw) {
            self.handle(message);
        }
    }

    pub fn handle(&self, message: PreviewMessage) {
        let mut state = self.state.lock();
        match message {
            PreviewMessage::Console { level, message } => state.preview.console.push(level, message),
            PreviewMessage::Inspect(element) => {
                if !state.preview.annotating {
                    debug!("Ignoring inspect outside annotate mode");
                    return;
                }
                state.preview.frame.observe(&element);
                state.preview.selected = Some(element);
            }
        }
    }

    pub fn selected(&self) -> Option<SelectedElement> {
        self.state.lock().preview.selected.clone()
    }

    pub fn deselect(&self) {
        self.state.lock().preview.selected = None;
    }

    pub fn console(&self) -> Vec<ConsoleEntry> {
        self.state.lock().preview.console.entries().cloned().collect()
    }

    pub fn clear_console(&self) {
        self.state.lock().preview.console.clear();
    }

    /// Where the last scroll command left the preview.
    pub fn scroll_position(&self) -> ScrollPosition {
        self.state.lock().preview.frame.scroll_position()
    }

    pub fn generated_code(&self) -> String {
        self.state.lock().preview.generated_code.clone()
    }

    /// The current sandboxed preview document.
    pub fn document(&self) -> String {
        self.state.lock().preview.frame.document().to_string()
    }

    /// Apply a style to the selected element in the live preview and ask the
    /// model to make the same change in the source.
    ///
    /// The two writes are not coordinated: until the model answers (if it
    /// honors the request at all) the preview and the source disagree.
    pub async fn restyle(&self, property: &str, value: &str) -> SendOutcome {
        let instruction = {
            let mut state = self.state.lock();
            let Some(mut element) = state.preview.selected.take() else {
                return SendOutcome::Rejected(Rejection::NoSelection);
            };
            state.preview.frame.apply_style(&element, property, value);
            element.styles.set(property, value);
            let instruction = match property {
                "textAlign" => format!(
                    "Align the text of the selected <{}> to the {value}.",
                    element.tag_name
                ),
                _ => format!(
                    "Update the {} of the selected <{}> to {value} in the code.",
                    describe_property(property),
                    element.tag_name
                ),
            };
            state.preview.selected = Some(element);
            instruction
        };
        self.send(Some(&instruction)).await
    }

    pub async fn refine(&self, refinement: Refinement) -> SendOutcome {
        let Some(element) = self.selected() else {
            return SendOutcome::Rejected(Rejection::NoSelection);
        };
        if let Some((property, value)) = refinement.direct_style() {
            return self.restyle(property, value).await;
        }
        self.send(Some(&refinement.instruction(&element))).await
    }

    // --- Conversation ---

    pub fn messages(&self) -> Vec<Message> {
        self.state.lock().conversation.messages.clone()
    }

    pub fn usage(&self) -> TokenUsage {
        self.state.lock().conversation.usage
    }

    pub fn is_loading(&self) -> bool {
        self.state.lock().conversation.in_flight
    }

    /// Empty the conversation and its persisted copy. Usage counters and the
    /// preview are kept.
    pub fn clear_history(&self) {
        self.state.lock().conversation.messages.clear();
        if let Some(ref store) = self.store {
            if let Err(e) = store.clear() {
                warn!("{e}");
            }
        }
    }

    /// Send the input (or `override_text`, when non-empty) with the pending
    /// attachments as one turn.
    pub async fn send(&self, override_text: Option<&str>) -> SendOutcome {
        let (request, user_text, history) = {
            let mut state = self.state.lock();
            let text = match override_text {
                Some(text) if !text.is_empty() => text.to_string(),
                _ => state.composer.input.clone(),
            };

            if state.conversation.in_flight {
                debug!("Send dropped: request in flight");
                return SendOutcome::Rejected(Rejection::Busy);
            }
            if text.trim().is_empty() && state.composer.attachments.is_empty() {
                return SendOutcome::Rejected(Rejection::Empty);
            }

            if state.composer.listening {
                self.dictation.stop();
                state.composer.listening = false;
            }

            let mut turns: Vec<Turn> = state
                .conversation
                .messages
                .iter()
                .map(|m| Turn { role: m.role, parts: vec![Part::Text(m.text.clone())] })
                .collect();

            state.conversation.messages.push(Message::new(Role::User, text.clone()));
            state.conversation.in_flight = true;

            let files = std::mem::take(&mut state.composer.attachments);
            state.composer.input.clear();
            state.preview.selected = None;
            set_annotating(&mut state, false);

            turns.push(Turn { role: Role::User, parts: attachments::build_parts(&text, &files) });
            let request = build_request(&state.config, turns);
            info!("Sending turn to {} ({} attachments)", request.model, files.len());

            (request, text, state.conversation.messages.clone())
        };
        let _in_flight = InFlight(&self.state);
        self.persist(&history);

        let result = self.client.generate(request).await;

        let (outcome, history) = {
            let mut state = self.state.lock();
            let outcome = match result {
                Ok(response) => {
                    let code = extract_code(&response.text);
                    let code_updated = code.is_some();
                    if let Some(code) = code {
                        let annotating = state.preview.annotating;
                        state.preview.frame.render(&code, annotating);
                        state.preview.generated_code = code;
                    }

                    let mut display = response.text;
                    for call in &response.tool_calls {
                        let note = tools::execute(call, &mut state.preview.frame);
                        info!("Tool call: {}", call.name);
                        if !display.is_empty() {
                            display.push_str("\n\n");
                        }
                        display.push_str(&note);
                    }

                    if let Some(usage) = response.usage {
                        state.conversation.usage += usage;
                    }
                    state.conversation.messages.push(Message::new(Role::Model, display));
                    SendOutcome::Completed { code_updated }
                }
                Err(e) => {
                    warn!("Model call failed: {e}");
                    let text = format!("Error: {e}");
                    state.conversation.messages.push(Message::new(Role::Model, text.clone()));
                    SendOutcome::Failed(text)
                }
            };
            state.conversation.in_flight = false;
            (outcome, state.conversation.messages.clone())
        };
        if let (SendOutcome::Completed { .. }, Some(reply)) = (&outcome, history.last()) {
            logging::log_exchange(&user_text, &reply.text);
        }
        self.persist(&history);
        outcome
    }

    fn persist(&self, messages: &[Message]) {
        let Some(ref store) = self.store else { return };
        if let Err(e) = store.save(messages) {
            warn!("{e}");
        }
    }
}

fn set_annotating(state: &mut AppState, active: bool) {
    if state.preview.annotating == active {
        return;
    }
    state.preview.annotating = active;
    if !active {
        state.preview.selected = None;
    }
    let code = state.preview.generated_code.clone();
    state.preview.frame.render(&code, active);
    state.preview.frame.set_annotating(active);
}

fn build_request(config: &ChatConfig, turns: Vec<Turn>) -> ModelRequest {
    ModelRequest {
        model: config.model.clone(),
        system_instruction: config.system_instruction.clone(),
        turns,
        temperature: config.temperature,
        top_p: config.top_p,
        top_k: config.top_k,
        max_tokens: config.max_tokens,
        thinking_budget: config.thinking_mode.then_some(config.thinking_budget),
        safety_filter: config.safety_filter,
        tools: if config.preview_tools { PREVIEW_TOOLS.clone() } else { Vec::new() },
    }
}
