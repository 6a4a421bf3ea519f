//! Shared types between the mail-assistant backend and its clients
//!
//! These types cover:
//! - REST resources (tasks, contexts, notifications, spam, user profile)
//! - The task-run WebSocket payload (call frames and run updates)
//! - The view-local chat transcript
//!
//! REST resources keep the backend's Go field naming (`ID`, `CreatedAt`, ...).

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// REST Resources
// ============================================================================

/// An assistant conversation bound to an email account
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "PascalCase")]
pub struct Task {
    #[serde(rename = "ID")]
    pub id: String,

    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub description: String,

    /// Free-text extra context appended to the assistant instructions
    #[serde(default)]
    pub context: Option<String>,

    /// Rule sets referenced by this task
    #[serde(default, deserialize_with = "null_as_default")]
    pub context_ids: Vec<String>,

    /// Serialized execution state: base64-encoded JSON owned by the backend
    #[serde(default)]
    pub state: Option<String>,

    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,

    /// Client-side join with `/api/messages`; never sent to the backend
    #[serde(default, skip_serializing)]
    pub messages: Vec<Notification>,
}

impl Task {
    pub fn unread_count(&self) -> usize {
        self.messages.iter().filter(|m| !m.read).count()
    }
}

/// A named, reusable block of instruction text (rule set)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "PascalCase")]
pub struct Context {
    #[serde(rename = "ID")]
    pub id: String,

    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub description: Option<String>,

    #[serde(default)]
    pub content: Option<String>,

    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

/// Persisted notification record referencing a task
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "PascalCase")]
pub struct Notification {
    #[serde(rename = "ID")]
    pub id: String,

    #[serde(rename = "TaskID")]
    pub task_id: String,

    #[serde(default)]
    pub content: String,

    #[serde(default)]
    pub read: bool,

    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,

    /// Filled in client-side from the owning task
    #[serde(default, skip_serializing)]
    pub task_name: Option<String>,
}

/// Email flagged as cold/spam and parked for review
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "PascalCase")]
pub struct SpamEmail {
    #[serde(rename = "ID")]
    pub id: String,

    #[serde(default)]
    pub subject: Option<String>,

    #[serde(default)]
    pub email_body: Option<String>,

    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "PascalCase")]
pub struct User {
    #[serde(rename = "ID")]
    pub id: String,

    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub email: String,

    #[serde(default)]
    pub subscription_disabled: Option<bool>,

    #[serde(default)]
    pub check_spam: Option<bool>,
}

impl User {
    /// Generated avatar URL built from the first two words of the display name.
    pub fn avatar_url(&self) -> String {
        let mut parts = self.name.splitn(2, ' ');
        let first = parts.next().unwrap_or_default();
        let last = parts.next().unwrap_or_default();
        format!("https://ui-avatars.com/api/?name={first}+{last}")
    }
}

// ============================================================================
// Request Bodies
// ============================================================================

/// Body of `POST /api/tasks` and `POST /api/tasks/:id`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct TaskRequest {
    pub name: String,
    pub description: String,
    pub context: String,
    pub context_ids: Vec<String>,
}

/// Body of `POST /api/contexts` and `POST /api/contexts/:id`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ContextRequest {
    pub name: String,
    pub description: String,
    pub content: String,
}

/// Body of `POST /api/me`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "PascalCase")]
pub struct UpdateUserRequest {
    pub subscription_disabled: Option<bool>,
    pub check_spam: Option<bool>,
}

// ============================================================================
// Task Run Protocol
// ============================================================================

/// Frame type tag emitted by the assistant runtime.
///
/// Only [`FrameKind::CallFinish`] ends a turn; every other kind is progress.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub enum FrameKind {
    RunStart,
    RunFinish,
    CallStart,
    CallChat,
    #[default]
    CallProgress,
    CallConfirm,
    CallContinue,
    CallSubCalls,
    CallFinish,
    Prompt,
    #[serde(other)]
    Unknown,
}

impl FrameKind {
    pub fn is_terminal(self) -> bool {
        matches!(self, FrameKind::CallFinish)
    }
}

/// Source location of a tool definition
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ToolSource {
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub repo: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Tool {
    #[serde(default)]
    pub name: Option<String>,

    /// Chat tools hold a conversation of their own; their output is user-facing
    #[serde(default)]
    pub chat: bool,

    #[serde(default)]
    pub instructions: Option<String>,

    #[serde(default)]
    pub source: Option<ToolSource>,
}

/// Reference to a nested call spawned by an output entry
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct SubCall {
    #[serde(default)]
    pub tool_id: Option<String>,
    #[serde(default)]
    pub call_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct CallOutput {
    #[serde(default)]
    pub content: Option<String>,

    #[serde(default)]
    pub sub_calls: Option<BTreeMap<String, SubCall>>,
}

impl CallOutput {
    pub fn has_sub_calls(&self) -> bool {
        self.sub_calls.is_some()
    }
}

/// One step of assistant tool execution, forwarded verbatim by the backend
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct CallFrame {
    #[serde(default)]
    pub id: String,

    #[serde(default)]
    pub tool: Option<Tool>,

    #[serde(default)]
    pub tool_category: Option<String>,

    #[serde(default)]
    pub tool_name: Option<String>,

    #[serde(default)]
    pub input: Option<serde_json::Value>,

    #[serde(default, deserialize_with = "null_as_default")]
    pub output: Vec<CallOutput>,

    #[serde(default, rename = "parentID")]
    pub parent_id: Option<String>,

    #[serde(default, rename = "type")]
    pub kind: FrameKind,
}

impl CallFrame {
    pub fn is_root(&self) -> bool {
        self.parent_id.as_deref().map_or(true, str::is_empty)
    }

    pub fn is_chat_tool(&self) -> bool {
        self.tool.as_ref().is_some_and(|t| t.chat)
    }

    pub fn tool_display_name(&self) -> Option<&str> {
        self.tool.as_ref().and_then(|t| t.name.as_deref())
    }

    pub fn latest_output(&self) -> Option<&CallOutput> {
        self.output.last()
    }
}

/// In-flight call records keyed by call id
pub type CallState = BTreeMap<String, CallFrame>;

/// Server → client payload on `/api/tasks/:id/run`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct RunUpdate {
    #[serde(default)]
    pub id: Option<String>,
    pub frame: CallFrame,
    #[serde(default, deserialize_with = "null_as_default")]
    pub state: CallState,
}

// ============================================================================
// Transcript
// ============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum MessageKind {
    User,
    Bot,
    Alert,
}

/// Chat message for display; reconstructed per view session, never persisted
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatMessage {
    pub kind: MessageKind,
    pub text: String,
    pub error: Option<String>,
    /// Tool that produced the message
    pub tool_name: Option<String>,
    /// Call-state snapshot at the time of the last update
    pub calls: Option<CallState>,
    /// Opaque embedded element rendered below the text
    pub component: Option<serde_json::Value>,
}

impl ChatMessage {
    fn with_kind(kind: MessageKind, text: impl Into<String>) -> Self {
        Self {
            kind,
            text: text.into(),
            error: None,
            tool_name: None,
            calls: None,
            component: None,
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::with_kind(MessageKind::User, text)
    }

    pub fn bot(text: impl Into<String>) -> Self {
        Self::with_kind(MessageKind::Bot, text)
    }

    pub fn alert(text: impl Into<String>) -> Self {
        Self::with_kind(MessageKind::Alert, text)
    }
}

// ============================================================================
// Constants
// ============================================================================

/// Session cookie carrying the signed user token
pub const SESSION_COOKIE: &str = "jwt-token";

/// Marker the assistant runtime prefixes to tool-call output
pub const TOOL_CALL_MARKER: &str = "<tool call>";

/// Progress text the runtime emits while waiting on the model
pub const WAITING_PLACEHOLDER: &str = "⏳⏳⏳ Waiting for model response...";

/// Go encodes nil slices and maps as `null`.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: serde::Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

// ============================================================================
// Tests
// ============================================================================
