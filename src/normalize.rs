// src/normalize.rs
// Normalizer (§4.1): canonicalize a message or system prompt into the byte
// sequence that will be hashed, stripping volatile fragments.

use crate::model::{Content, ContentPart, Message, SystemPrompt};
use serde_json::{Value, json};

const SYSTEM_REMINDER_OPEN: &str = "<system-reminder>";
const SYSTEM_REMINDER_CLOSE: &str = "</system-reminder>";

/// The literal CLI-tool preamble whose volatile tail (git status, branch,
/// date, recent commits) must be discarded before hashing.
pub const CLI_PREAMBLE: &str =
    "You are an interactive CLI tool that helps users with software engineering tasks.";

/// Strip a leading `<system-reminder>...</system-reminder>` span from `text`,
/// if its trimmed form begins with the marker. Leaves any text that follows
/// the closing tag intact (§8 "Hash stability under noise").
fn strip_leading_system_reminder(text: &str) -> Option<String> {
    let trimmed = text.trim_start();
    let rest = trimmed.strip_prefix(SYSTEM_REMINDER_OPEN)?;
    let close_idx = rest.find(SYSTEM_REMINDER_CLOSE)?;
    Some(rest[close_idx + SYSTEM_REMINDER_CLOSE.len()..].to_string())
}

/// Canonicalize a single content part to a JSON value. Tool-use/tool-result/
/// unknown parts are kept verbatim (internal key ordering is handled for free
/// by `serde_json`'s default BTreeMap-backed `Value::Object`).
fn canon_part(part: &ContentPart) -> Option<Value> {
    match part {
        ContentPart::Text { text } => {
            let canon_text = match strip_leading_system_reminder(text) {
                Some(remainder) if remainder.is_empty() => return None,
                Some(remainder) => remainder,
                None => text.clone(),
            };
            Some(json!({"type": "text", "text": canon_text}))
        }
        ContentPart::ToolUse { id, name, input } => {
            Some(json!({"type": "tool_use", "id": id, "name": name, "input": input}))
        }
        ContentPart::ToolResult {
            tool_use_id,
            content,
            is_error,
        } => Some(json!({
            "type": "tool_result",
            "tool_use_id": tool_use_id,
            "content": content,
            "is_error": is_error,
        })),
        ContentPart::Other(raw) => Some(raw.clone()),
    }
}

fn canon_content(content: &Content) -> Value {
    match content {
        Content::Text(s) => match strip_leading_system_reminder(s) {
            Some(remainder) => Value::String(remainder),
            None => Value::String(s.clone()),
        },
        Content::Parts(parts) => {
            let canon: Vec<Value> = parts.iter().filter_map(canon_part).collect();
            Value::Array(canon)
        }
    }
}

/// `normalizeMessage(m) -> canonical` (§4.1).
pub fn normalize_message(m: &Message) -> String {
    let value = json!({
        "role": m.role.as_str(),
        "content": canon_content(&m.content),
    });
    // serde_json serializes `Value::Object` via its internal BTreeMap, so
    // keys come out in lexicographic order without extra work.
    value.to_string()
}

fn canon_system_prompt_structure(s: &SystemPrompt) -> Value {
    match s {
        SystemPrompt::Text(text) => match strip_leading_system_reminder(text) {
            Some(remainder) => Value::String(remainder),
            None => Value::String(text.clone()),
        },
        SystemPrompt::Blocks(blocks) => {
            let canon: Vec<Value> = blocks
                .iter()
                .filter_map(|b| {
                    let canon_text = match strip_leading_system_reminder(&b.text) {
                        Some(remainder) if remainder.is_empty() => return None,
                        Some(remainder) => remainder,
                        None => b.text.clone(),
                    };
                    Some(json!({"type": b.block_type, "text": canon_text}))
                })
                .collect();
            Value::Array(canon)
        }
    }
}

fn system_text(s: &SystemPrompt) -> String {
    match s {
        SystemPrompt::Text(t) => t.clone(),
        SystemPrompt::Blocks(blocks) => blocks.iter().map(|b| b.text.as_str()).collect::<Vec<_>>().join(""),
    }
}

/// `normalizeSystem(s) -> canonical | null` (§4.1).
///
/// Returns `None` for a null/empty prompt. A prompt beginning with the CLI
/// preamble collapses to the preamble alone, discarding the volatile tail.
pub fn normalize_system(s: Option<&SystemPrompt>) -> Option<String> {
    let s = s?;
    if s.is_empty() {
        return None;
    }
    if system_text(s).starts_with(CLI_PREAMBLE) {
        return Some(CLI_PREAMBLE.to_string());
    }
    Some(canon_system_prompt_structure(s).to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Role;

    fn text_message(role: Role, text: &str) -> Message {
        Message {
            role,
            content: Content::Text(text.to_string()),
        }
    }

    #[test]
    fn reminder_prefix_stripped_without_trailing_loss() {
        let with_reminder = text_message(
            Role::User,
            "<system-reminder>volatile</system-reminder>actual question",
        );
        let without_reminder = text_message(Role::User, "actual question");
        assert_eq!(
            normalize_message(&with_reminder),
            normalize_message(&without_reminder)
        );
    }

    #[test]
    fn reminder_only_part_is_dropped_from_parts_list() {
        let with_reminder = Message {
            role: Role::User,
            content: Content::Parts(vec![
                ContentPart::Text {
                    text: "<system-reminder>volatile</system-reminder>".to_string(),
                },
                ContentPart::Text {
                    text: "hello".to_string(),
                },
            ]),
        };
        let without_reminder = Message {
            role: Role::User,
            content: Content::Parts(vec![ContentPart::Text {
                text: "hello".to_string(),
            }]),
        };
        assert_eq!(
            normalize_message(&with_reminder),
            normalize_message(&without_reminder)
        );
    }

    #[test]
    fn tool_input_key_order_does_not_affect_normalization() {
        let a = ContentPart::ToolUse {
            id: "t1".into(),
            name: "Read".into(),
            input: serde_json::json!({"b": 1, "a": 2}),
        };
        let b = ContentPart::ToolUse {
            id: "t1".into(),
            name: "Read".into(),
            input: serde_json::json!({"a": 2, "b": 1}),
        };
        let ma = Message {
            role: Role::Assistant,
            content: Content::Parts(vec![a]),
        };
        let mb = Message {
            role: Role::Assistant,
            content: Content::Parts(vec![b]),
        };
        assert_eq!(normalize_message(&ma), normalize_message(&mb));
    }

    #[test]
    fn cli_preamble_tail_ignored() {
        let s1 = SystemPrompt::Text(format!("{CLI_PREAMBLE}\n\nGit branch: main\nDate: 2026-01-01"));
        let s2 = SystemPrompt::Text(format!("{CLI_PREAMBLE}\n\nGit branch: feature-x\nDate: 2026-06-06"));
        assert_eq!(normalize_system(Some(&s1)), normalize_system(Some(&s2)));
    }

    #[test]
    fn non_preamble_system_prompts_hash_distinctly() {
        let s1 = SystemPrompt::Text("You are a helpful assistant.".to_string());
        let s2 = SystemPrompt::Text("You are a pirate assistant.".to_string());
        assert_ne!(normalize_system(Some(&s1)), normalize_system(Some(&s2)));
    }

    #[test]
    fn empty_system_prompt_is_null() {
        assert_eq!(normalize_system(None), None);
        assert_eq!(normalize_system(Some(&SystemPrompt::Text(String::new()))), None);
    }
}
