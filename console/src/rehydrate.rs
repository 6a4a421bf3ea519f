//! Rebuild the visible transcript from a task's persisted execution state.
//!
//! The state is base64-encoded JSON; the conversation lives at
//! `continuation.state.completion.messages`. Only the settled conversation is
//! shown: every turn up to the last user turn, then the most recent assistant
//! reply after it.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde_json::Value;
use shared_types::{ChatMessage, MessageKind};

use crate::error::{ConsoleError, Result};

/// Decode a persisted state blob into visible history.
///
/// A state without a conversation yields an empty history.
pub fn rehydrate(encoded_state: &str) -> Result<Vec<ChatMessage>> {
    let bytes = STANDARD
        .decode(encoded_state.trim())
        .map_err(|e| ConsoleError::StateDecode(format!("invalid base64: {e}")))?;
    let state: Value = serde_json::from_slice(&bytes)
        .map_err(|e| ConsoleError::StateDecode(format!("invalid JSON: {e}")))?;

    let Some(turns) = state
        .pointer("/continuation/state/completion/messages")
        .and_then(Value::as_array)
    else {
        return Ok(Vec::new());
    };

    Ok(settle(turns.iter().filter_map(visible_turn).collect()))
}

/// User/assistant turns whose content is a non-empty list with text first.
fn visible_turn(turn: &Value) -> Option<ChatMessage> {
    let kind = match turn.get("role")?.as_str()? {
        "user" => MessageKind::User,
        "assistant" => MessageKind::Bot,
        _ => return None,
    };
    let text = turn
        .get("content")?
        .as_array()?
        .first()?
        .get("text")?
        .as_str()
        .filter(|t| !t.is_empty())?;

    Some(ChatMessage {
        kind,
        ..ChatMessage::bot(text)
    })
}

/// Keep everything through the last user turn plus the final assistant turn after it.
pub fn settle(messages: Vec<ChatMessage>) -> Vec<ChatMessage> {
    let last_user = messages.iter().rposition(|m| m.kind == MessageKind::User);
    let split = last_user.map_or(0, |i| i + 1);

    let mut messages = messages;
    let tail = messages.split_off(split);
    if let Some(reply) = tail.into_iter().rev().find(|m| m.kind == MessageKind::Bot) {
        messages.push(reply);
    }
    messages
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn encode(state: Value) -> String {
        STANDARD.encode(serde_json::to_vec(&state).unwrap())
    }

    fn turn(role: &str, text: &str) -> Value {
        json!({"role": role, "content": [{"text": text}]})
    }

    fn texts(messages: &[ChatMessage]) -> Vec<(MessageKind, &str)> {
        messages.iter().map(|m| (m.kind, m.text.as_str())).collect()
    }

    fn wrap(messages: Vec<Value>) -> Value {
        json!({"continuation": {"state": {"completion": {"messages": messages}}}})
    }

    #[test]
    fn test_only_last_reply_after_final_user_turn_is_kept() {
        let state = wrap(vec![
            turn("user", "A"),
            turn("assistant", "B"),
            turn("user", "C"),
            turn("assistant", "D"),
            turn("assistant", "E"),
        ]);

        let messages = rehydrate(&encode(state)).unwrap();
        assert_eq!(
            texts(&messages),
            vec![
                (MessageKind::User, "A"),
                (MessageKind::Bot, "B"),
                (MessageKind::User, "C"),
                (MessageKind::Bot, "E"),
            ]
        );
    }

    #[test]
    fn test_non_text_turns_are_filtered() {
        let state = wrap(vec![
            json!({"role": "system", "content": [{"text": "You are a mail assistant"}]}),
            turn("user", "Summarize my inbox"),
            json!({"role": "assistant", "content": [{"toolCall": {"name": "list"}}]}),
            json!({"role": "tool", "content": [{"text": "3 emails"}]}),
            json!({"role": "assistant", "content": []}),
            json!({"role": "assistant", "content": "plain string"}),
            turn("assistant", "You have 3 emails"),
        ]);

        let messages = rehydrate(&encode(state)).unwrap();
        assert_eq!(
            texts(&messages),
            vec![
                (MessageKind::User, "Summarize my inbox"),
                (MessageKind::Bot, "You have 3 emails"),
            ]
        );
    }

    #[test]
    fn test_history_without_user_turns_keeps_last_reply() {
        let messages = settle(vec![ChatMessage::bot("one"), ChatMessage::bot("two")]);
        assert_eq!(texts(&messages), vec![(MessageKind::Bot, "two")]);
    }

    #[test]
    fn test_history_ending_with_user_turn_is_unchanged() {
        let input = vec![ChatMessage::user("hi"), ChatMessage::bot("hello"), ChatMessage::user("bye")];
        assert_eq!(settle(input.clone()), input);
    }

    #[test]
    fn test_state_without_conversation_is_empty() {
        assert!(rehydrate(&encode(json!({"continuation": null}))).unwrap().is_empty());
        assert!(rehydrate(&encode(json!({}))).unwrap().is_empty());
    }

    #[test]
    fn test_invalid_state_is_an_error() {
        assert!(matches!(
            rehydrate("!!not base64!!"),
            Err(ConsoleError::StateDecode(_))
        ));
        assert!(matches!(
            rehydrate(&STANDARD.encode(b"{broken")),
            Err(ConsoleError::StateDecode(_))
        ));
    }
}
