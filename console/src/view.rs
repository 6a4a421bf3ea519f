//! Plain-text rendering for the terminal.

use std::collections::{BTreeMap, HashSet};
use std::fmt::Write as _;

use chrono::{DateTime, Utc};
use shared_types::{
    CallFrame, CallState, ChatMessage, Context, MessageKind, Notification, SpamEmail, Task, User,
};

use crate::reconcile::Transcript;

// ============================================================================
// Conversation
// ============================================================================

/// True when the call map records at least one tool function call.
pub fn tool_called(calls: &CallState) -> bool {
    calls.keys().any(|k| k.starts_with("call_"))
}

pub fn render_message(message: &ChatMessage) -> String {
    match message.kind {
        MessageKind::User => format!("you > {}", message.text),
        MessageKind::Bot => {
            let mut out = String::new();
            let prefix = if message.error.is_some() { "bot ! " } else { "bot > " };
            out.push_str(prefix);
            out.push_str(&indent_continuation(&message.text, prefix.len()));
            if let Some(error) = &message.error {
                let _ = write!(out, "\n      error: {error}");
            }
            if let Some(component) = &message.component {
                let _ = write!(out, "\n      [{component}]");
            }
            if message.calls.as_ref().is_some_and(tool_called) {
                out.push_str("\n      ✔ tool called");
            }
            out
        }
        MessageKind::Alert => format!("● {}", message.text),
    }
}

pub fn render_transcript(transcript: &Transcript) -> String {
    let mut out = transcript
        .messages
        .iter()
        .map(render_message)
        .collect::<Vec<_>>()
        .join("\n\n");
    if transcript.generating {
        out.push_str("\n\n…");
    }
    out
}

fn indent_continuation(text: &str, width: usize) -> String {
    let pad = " ".repeat(width);
    text.lines()
        .enumerate()
        .map(|(i, line)| {
            if i == 0 {
                line.to_string()
            } else {
                format!("{pad}{line}")
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

// ============================================================================
// Call trace
// ============================================================================

fn call_display_name(call: &CallFrame) -> String {
    let tool = call.tool.as_ref();
    tool.and_then(|t| t.name.clone())
        .or_else(|| {
            tool.and_then(|t| t.source.as_ref())
                .and_then(|s| s.repo.as_ref())
                .map(|repo| match repo {
                    serde_json::Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
        })
        .or_else(|| {
            tool.and_then(|t| t.source.as_ref())
                .and_then(|s| s.location.clone())
        })
        .unwrap_or_else(|| "main".to_string())
}

/// One-line status for a call frame.
pub fn call_summary(call: &CallFrame) -> String {
    let name = call_display_name(call);
    let done = call.kind.is_terminal();

    if call.is_chat_tool() {
        return if done {
            format!("Chatted with {name}")
        } else {
            format!("Chat open with {name}")
        };
    }

    match (call.tool_category.as_deref().filter(|c| !c.is_empty()), done) {
        (Some(category), false) => format!("Loading {category} from {name}..."),
        (Some(category), true) => format!("Loaded {category} from {name}"),
        (None, false) => format!("Running {name}"),
        (None, true) => format!("Ran {name}"),
    }
}

/// Render the call state as a tree grouped by parent id.
pub fn render_call_tree(calls: &CallState) -> String {
    if calls.is_empty() {
        return "Waiting for the first event...".to_string();
    }

    let mut children: BTreeMap<&str, Vec<(&str, &CallFrame)>> = BTreeMap::new();
    for (id, call) in calls {
        let parent = call.parent_id.as_deref().unwrap_or_default();
        children.entry(parent).or_default().push((id.as_str(), call));
    }

    let mut out = String::new();
    let mut visited = HashSet::new();
    render_level(&children, "", 0, &mut visited, &mut out);

    // Frames whose parent never arrived still get shown.
    for (parent, entries) in &children {
        if parent.is_empty() || calls.contains_key(*parent) {
            continue;
        }
        for &(id, call) in entries {
            render_call(&children, id, call, 0, &mut visited, &mut out);
        }
    }
    out.trim_end().to_string()
}

fn render_level<'a>(
    children: &BTreeMap<&'a str, Vec<(&'a str, &'a CallFrame)>>,
    parent: &str,
    depth: usize,
    visited: &mut HashSet<&'a str>,
    out: &mut String,
) {
    let Some(entries) = children.get(parent) else {
        return;
    };
    for &(id, call) in entries {
        render_call(children, id, call, depth, visited, out);
    }
}

fn render_call<'a>(
    children: &BTreeMap<&'a str, Vec<(&'a str, &'a CallFrame)>>,
    id: &'a str,
    call: &'a CallFrame,
    depth: usize,
    visited: &mut HashSet<&'a str>,
    out: &mut String,
) {
    if !visited.insert(id) {
        return;
    }
    let pad = "  ".repeat(depth);
    let _ = writeln!(out, "{pad}- {}", call_summary(call));
    if let Some(input) = &call.input {
        let _ = writeln!(out, "{pad}    input: {input}");
    }
    for output in &call.output {
        if let Some(content) = output.content.as_deref().filter(|c| !c.is_empty()) {
            let _ = writeln!(out, "{pad}    output: {}", first_line(content));
        }
    }
    render_level(children, id, depth + 1, visited, out);
}

fn first_line(text: &str) -> &str {
    text.lines().next().unwrap_or_default()
}

// ============================================================================
// Listings
// ============================================================================

/// Coarse "time ago" rendering for listing timestamps.
pub fn relative_time(at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> String {
    let Some(at) = at else {
        return "-".to_string();
    };
    let secs = (now - at).num_seconds();
    if secs < 0 {
        return "just now".to_string();
    }
    let (value, unit) = match secs {
        0..=59 => return "just now".to_string(),
        60..=3599 => (secs / 60, "minute"),
        3600..=86_399 => (secs / 3600, "hour"),
        86_400..=2_591_999 => (secs / 86_400, "day"),
        2_592_000..=31_535_999 => (secs / 2_592_000, "month"),
        _ => (secs / 31_536_000, "year"),
    };
    let plural = if value == 1 { "" } else { "s" };
    format!("{value} {unit}{plural} ago")
}

fn date(at: Option<DateTime<Utc>>) -> String {
    at.map(|t| t.format("%b %d, %Y").to_string())
        .unwrap_or_else(|| "-".to_string())
}

pub fn render_tasks(tasks: &[Task]) -> String {
    let mut out = String::new();
    for task in tasks {
        let unread = task.unread_count();
        let badge = if unread > 0 {
            format!(" [{unread} unread]")
        } else {
            String::new()
        };
        let _ = writeln!(
            out,
            "{}  {}{}  {}  {}",
            task.id,
            task.name,
            badge,
            date(task.created_at),
            task.description
        );
    }
    out
}

pub fn render_task(task: &Task, contexts: &[Context]) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{}", task.name);
    let _ = writeln!(out, "  {}", task.description);
    let _ = writeln!(out, "  id: {}", task.id);
    let _ = writeln!(out, "  created: {}", date(task.created_at));
    if let Some(context) = task.context.as_deref().filter(|c| !c.is_empty()) {
        let _ = writeln!(out, "  extra context: {context}");
    }
    if !task.context_ids.is_empty() {
        let names: Vec<String> = task
            .context_ids
            .iter()
            .map(|id| {
                contexts
                    .iter()
                    .find(|c| &c.id == id)
                    .map(|c| c.name.clone())
                    .unwrap_or_else(|| id.clone())
            })
            .collect();
        let _ = writeln!(out, "  rule sets: {}", names.join(", "));
    }
    let _ = writeln!(out, "  unread notifications: {}", task.unread_count());
    out
}

pub fn render_contexts(contexts: &[Context]) -> String {
    let mut out = String::new();
    for context in contexts {
        let _ = writeln!(
            out,
            "{}  {}  {}  {}",
            context.id,
            context.name,
            date(context.created_at),
            context.description.as_deref().unwrap_or_default()
        );
    }
    out
}

pub fn render_spams(spams: &[SpamEmail], now: DateTime<Utc>) -> String {
    let mut out = String::new();
    for spam in spams {
        let _ = writeln!(
            out,
            "{}  {}  {}",
            spam.id,
            spam.subject.as_deref().unwrap_or("(no subject)"),
            relative_time(spam.created_at, now)
        );
    }
    out
}

pub fn render_spam(spam: &SpamEmail) -> String {
    format!(
        "{}\n\n{}\n",
        spam.subject.as_deref().unwrap_or("(no subject)"),
        spam.email_body.as_deref().unwrap_or_default()
    )
}

pub fn render_notifications(messages: &[Notification], now: DateTime<Utc>) -> String {
    let mut out = String::new();
    for message in messages {
        let marker = if message.read { " " } else { "*" };
        let _ = writeln!(
            out,
            "{marker} {}  {}  ({})  {}",
            message.id,
            message.content,
            message.task_name.as_deref().unwrap_or(&message.task_id),
            relative_time(message.created_at, now)
        );
    }
    out
}

pub fn render_user(user: &User) -> String {
    let subscription = match user.subscription_disabled {
        Some(true) => "disabled",
        _ => "enabled",
    };
    format!(
        "{}\n  {}\n  id: {}\n  avatar: {}\n  mail subscription: {subscription}\n",
        user.name,
        user.email,
        user.id,
        user.avatar_url()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use shared_types::{CallOutput, FrameKind, Tool};

    fn call(id: &str, parent: Option<&str>, name: &str, kind: FrameKind) -> CallFrame {
        CallFrame {
            id: id.to_string(),
            tool: Some(Tool {
                name: Some(name.to_string()),
                ..Default::default()
            }),
            parent_id: parent.map(ToString::to_string),
            kind,
            ..Default::default()
        }
    }

    #[test]
    fn test_tool_called_requires_call_prefix() {
        let mut calls = CallState::new();
        calls.insert("root".to_string(), CallFrame::default());
        assert!(!tool_called(&calls));
        calls.insert("call_1".to_string(), CallFrame::default());
        assert!(tool_called(&calls));
    }

    #[test]
    fn test_call_summary_variants() {
        let running = call("a", None, "search", FrameKind::CallProgress);
        assert_eq!(call_summary(&running), "Running search");

        let ran = call("a", None, "search", FrameKind::CallFinish);
        assert_eq!(call_summary(&ran), "Ran search");

        let mut loading = call("a", None, "mail", FrameKind::CallStart);
        loading.tool_category = Some("credential".to_string());
        assert_eq!(call_summary(&loading), "Loading credential from mail...");

        let mut chat = call("a", None, "copilot", FrameKind::CallChat);
        chat.tool.as_mut().unwrap().chat = true;
        assert_eq!(call_summary(&chat), "Chat open with copilot");

        let unnamed = CallFrame::default();
        assert_eq!(call_summary(&unnamed), "Running main");
    }

    #[test]
    fn test_call_tree_nests_children() {
        let mut calls = CallState::new();
        calls.insert(
            "root".to_string(),
            call("root", None, "copilot", FrameKind::CallProgress),
        );
        let mut child = call("call_1", Some("root"), "list-emails", FrameKind::CallFinish);
        child.output = vec![CallOutput {
            content: Some("3 emails\nmore".to_string()),
            sub_calls: None,
        }];
        calls.insert("call_1".to_string(), child);
        calls.insert(
            "orphan".to_string(),
            call("orphan", Some("missing"), "send-email", FrameKind::CallProgress),
        );

        let tree = render_call_tree(&calls);
        assert_eq!(
            tree,
            "- Running copilot\n  - Ran list-emails\n      output: 3 emails\n- Running send-email"
        );
    }

    #[test]
    fn test_empty_call_tree() {
        assert_eq!(
            render_call_tree(&CallState::new()),
            "Waiting for the first event..."
        );
    }

    #[test]
    fn test_render_transcript() {
        let mut bot = ChatMessage::bot("line one\nline two");
        let mut calls = CallState::new();
        calls.insert("call_9".to_string(), CallFrame::default());
        bot.calls = Some(calls);

        let transcript = Transcript {
            messages: vec![ChatMessage::user("hi"), bot, ChatMessage::alert("connected")],
            cursor: None,
            generating: true,
        };
        assert_eq!(
            render_transcript(&transcript),
            "you > hi\n\nbot > line one\n      line two\n      ✔ tool called\n\n● connected\n\n…"
        );
    }

    #[test]
    fn test_relative_time() {
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
        assert_eq!(relative_time(None, now), "-");
        assert_eq!(relative_time(Some(now), now), "just now");
        assert_eq!(
            relative_time(Some(now - Duration::minutes(1)), now),
            "1 minute ago"
        );
        assert_eq!(
            relative_time(Some(now - Duration::hours(5)), now),
            "5 hours ago"
        );
        assert_eq!(
            relative_time(Some(now - Duration::days(3)), now),
            "3 days ago"
        );
    }
}
