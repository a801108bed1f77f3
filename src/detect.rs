// src/detect.rs
// Special-case Detector (§4.3): classifies a request as normal / summarization
// / compact-continuation / subtask-candidate.

use crate::model::{Request, SystemPrompt};
use std::sync::OnceLock;

const SUMMARIZER_MARKER: &str =
    "You are a helpful AI assistant tasked with summarizing conversations";

const COMPACT_PREFIX: &str =
    "This session is being continued from a previous conversation that ran out of context";
const COMPACT_DELIMITER: &str = "The conversation is summarized below:";
const COMPACT_TARGET_MAX_LEN: usize = 200;

/// Tokens that end TARGET (§4.3's pattern: `<TARGET> (Please
/// continue|Summary:|Analysis:|<EOF>)`). The earliest one found in the
/// captured text, not end-of-string, is where TARGET actually stops.
const COMPACT_TARGET_TERMINATORS: &[&str] =
    &["Please continue", "Summary:", "Analysis:", "<EOF>"];

fn compact_delimiter_regex() -> &'static regex::Regex {
    static RE: OnceLock<regex::Regex> = OnceLock::new();
    RE.get_or_init(|| {
        regex::Regex::new(&format!(
            r"^{}[\s\S]*?{}\s*(?P<target>[\s\S]*)$",
            regex::escape(COMPACT_PREFIX),
            regex::escape(COMPACT_DELIMITER),
        ))
        .expect("static compact-continuation regex is valid")
    })
}

/// Flags produced by the Detector for one request.
#[derive(Debug, Clone, Default)]
pub struct DetectionFlags {
    pub is_summarization: bool,
    pub is_compact_continuation: bool,
    /// Captured TARGET text (§4.3), already truncated/prefix-stripped, only
    /// set when `is_compact_continuation` is true.
    pub compact_target: Option<String>,
    /// Structural precondition for subtask linkage: exactly one user message.
    /// The actual Task-tool-prompt match requires a store lookup and is
    /// performed by the Resolver (§4.4).
    pub is_subtask_shape: bool,
}

fn system_contains(system: Option<&SystemPrompt>, needle: &str) -> bool {
    let Some(system) = system else { return false };
    let text = match system {
        SystemPrompt::Text(t) => t.clone(),
        SystemPrompt::Blocks(b) => b.iter().map(|p| p.text.as_str()).collect::<Vec<_>>().join(""),
    };
    text.contains(needle)
}

/// Extract the compact-continuation TARGET from a first-user-message text, if
/// it matches the pattern in §4.3. Strips a leading `Analysis:`/`Summary:`
/// prefix, stops at the earliest terminator token, and truncates to the
/// first 200 characters.
fn extract_compact_target(first_user_text: &str) -> Option<String> {
    let trimmed = first_user_text.trim_start();
    let caps = compact_delimiter_regex().captures(trimmed)?;
    let mut target = caps.name("target")?.as_str().trim_start();
    for prefix in ["Analysis:", "Summary:"] {
        if let Some(rest) = target.strip_prefix(prefix) {
            target = rest.trim_start();
            break;
        }
    }
    let end = COMPACT_TARGET_TERMINATORS
        .iter()
        .filter_map(|terminator| target.find(terminator))
        .min()
        .unwrap_or(target.len());
    let target = target[..end].trim_end();
    let truncated: String = target.chars().take(COMPACT_TARGET_MAX_LEN).collect();
    Some(truncated)
}

/// Classify a request (§4.3). At most one of `is_summarization` /
/// `is_compact_continuation` can be true; subtask shape is independent of
/// both.
pub fn detect(req: &Request) -> DetectionFlags {
    let is_summarization = system_contains(req.system.as_ref(), SUMMARIZER_MARKER);

    let first_user_text = req
        .messages
        .iter()
        .find(|m| matches!(m.role, crate::model::Role::User))
        .map(|m| m.text());

    let (is_compact_continuation, compact_target) = match &first_user_text {
        Some(text) => match extract_compact_target(text) {
            Some(target) => (true, Some(target)),
            None => (false, None),
        },
        None => (false, None),
    };

    // Summarization and compact-continuation are mutually exclusive in
    // practice (distinct system prompt vs. distinct first-message shape);
    // if both syntactically matched, prefer compact-continuation since it
    // carries a concrete resolution target.
    let is_summarization = is_summarization && !is_compact_continuation;

    let is_subtask_shape = req.messages.len() == 1
        && matches!(req.messages[0].role, crate::model::Role::User);

    DetectionFlags {
        is_summarization,
        is_compact_continuation,
        compact_target,
        is_subtask_shape,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Content, Message, Request, RequestId, Role, SystemPrompt};
    use chrono::Utc;

    fn req_with(system: Option<SystemPrompt>, messages: Vec<Message>) -> Request {
        Request::new(RequestId::new(), "d".into(), Utc::now(), messages, system, None)
    }

    #[test]
    fn summarizer_detected_by_system_prompt() {
        let req = req_with(
            Some(SystemPrompt::Text(
                "You are a helpful AI assistant tasked with summarizing conversations in detail."
                    .into(),
            )),
            vec![Message {
                role: Role::User,
                content: Content::Text("summarize this".into()),
            }],
        );
        assert!(detect(&req).is_summarization);
    }

    #[test]
    fn compact_continuation_extracts_target() {
        let text = "This session is being continued from a previous conversation that ran out of context. The conversation is summarized below: Analysis: foo bar baz Please continue.";
        let req = req_with(
            None,
            vec![Message {
                role: Role::User,
                content: Content::Text(text.into()),
            }],
        );
        let flags = detect(&req);
        assert!(flags.is_compact_continuation);
        assert_eq!(flags.compact_target.as_deref(), Some("foo bar baz"));
    }

    #[test]
    fn subtask_shape_requires_single_user_message() {
        let single = req_with(
            None,
            vec![Message {
                role: Role::User,
                content: Content::Text("investigate X".into()),
            }],
        );
        assert!(detect(&single).is_subtask_shape);

        let multi = req_with(
            None,
            vec![
                Message {
                    role: Role::User,
                    content: Content::Text("hi".into()),
                },
                Message {
                    role: Role::Assistant,
                    content: Content::Text("hello".into()),
                },
            ],
        );
        assert!(!detect(&multi).is_subtask_shape);
    }
}
