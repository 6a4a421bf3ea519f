//! Folds streamed call frames into a chat transcript.
//!
//! The transcript holds at most one open bot message, tracked by `cursor`.
//! Progress frames overwrite the open message in place; a main-content frame
//! of kind `CallFinish` closes it so the next frame starts a new one.

use shared_types::{CallFrame, ChatMessage, MessageKind, RunUpdate, TOOL_CALL_MARKER};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Transcript {
    pub messages: Vec<ChatMessage>,
    /// Index of the bot message currently being updated
    pub cursor: Option<usize>,
    /// True between the first non-empty frame of a turn and its finish frame
    pub generating: bool,
}

impl Transcript {
    pub fn new(messages: Vec<ChatMessage>) -> Self {
        Self {
            messages,
            cursor: None,
            generating: false,
        }
    }

    /// Optimistic append on submit; does not touch the cursor.
    pub fn push_user(&mut self, text: impl Into<String>) {
        self.messages.push(ChatMessage::user(text));
    }

    pub fn push_alert(&mut self, text: impl Into<String>) {
        self.messages.push(ChatMessage::alert(text));
    }

    pub fn open_message(&self) -> Option<&ChatMessage> {
        self.cursor.and_then(|i| self.messages.get(i))
    }

    pub fn bot_messages(&self) -> impl Iterator<Item = &ChatMessage> {
        self.messages.iter().filter(|m| m.kind == MessageKind::Bot)
    }
}

/// Whether a frame carries user-facing output rather than an internal step.
pub fn is_main_content(frame: &CallFrame) -> bool {
    let Some(latest) = frame.latest_output() else {
        return false;
    };
    (frame.is_root() || frame.is_chat_tool()) && !latest.has_sub_calls()
}

/// Content of the latest output entry of a main-content frame, else empty.
pub fn main_content(frame: &CallFrame) -> &str {
    if !is_main_content(frame) {
        return "";
    }
    frame
        .latest_output()
        .and_then(|o| o.content.as_deref())
        .unwrap_or_default()
}

/// Matches the runtime's [`shared_types::WAITING_PLACEHOLDER`] progress text, tolerating
/// case and the number of hourglasses.
pub fn is_waiting_placeholder(content: &str) -> bool {
    content
        .trim_start_matches(|c: char| c == '⏳' || c.is_whitespace())
        .to_lowercase()
        .starts_with("waiting for model response")
}

/// Split `<tool call> name -> params` into its tool name and raw params.
pub fn parse_tool_call(content: &str) -> Option<(&str, Option<&str>)> {
    let rest = content.strip_prefix(TOOL_CALL_MARKER)?.trim_start();
    match rest.split_once(" -> ") {
        Some((tool, params)) => Some((tool.trim(), Some(params))),
        None => Some((rest.trim(), None)),
    }
}

fn render_content(content: &str) -> String {
    match parse_tool_call(content) {
        Some((tool, _params)) => format!("🛠️ Calling tool {tool}..."),
        None => content.to_string(),
    }
}

/// Apply one run update to the transcript.
pub fn reconcile(mut transcript: Transcript, update: &RunUpdate) -> Transcript {
    let frame = &update.frame;
    let content = main_content(frame);
    if content.is_empty() {
        return transcript;
    }
    transcript.generating = true;

    if is_waiting_placeholder(content)
        && transcript
            .open_message()
            .is_some_and(|m| !m.text.is_empty())
    {
        return transcript;
    }

    let mut message = ChatMessage::bot(render_content(content));
    message.tool_name = frame.tool_display_name().map(ToString::to_string);
    message.calls = Some(update.state.clone());

    match transcript.cursor {
        Some(index) if index < transcript.messages.len() => {
            transcript.messages[index] = message;
        }
        _ => {
            transcript.cursor = Some(transcript.messages.len());
            transcript.messages.push(message);
        }
    }

    if frame.kind.is_terminal() {
        transcript.generating = false;
        transcript.cursor = None;
    }

    transcript
}
