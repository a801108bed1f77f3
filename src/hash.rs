// src/hash.rs
// Hasher (§4.2): deterministic SHA-256 over normalized content, and
// cumulative-state hashing over message prefixes.

use crate::model::{Message, SystemPrompt};
use crate::normalize::{normalize_message, normalize_system};
use sha2::{Digest, Sha256};

fn sha256_hex(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    hex::encode(digest)
}

/// `hashMessage(m) = SHA256(normalizeMessage(m))`.
pub fn hash_message(m: &Message) -> String {
    sha256_hex(normalize_message(m).as_bytes())
}

/// `hashSystem(s) = SHA256(normalizeSystem(s))` if normalized is non-null.
pub fn hash_system(s: Option<&SystemPrompt>) -> Option<String> {
    normalize_system(s).map(|canon| sha256_hex(canon.as_bytes()))
}

fn fold(prev: Option<String>, next: String) -> String {
    match prev {
        None => next,
        Some(prev) => sha256_hex(format!("{prev}{next}").as_bytes()),
    }
}

/// `hashConversationStateWithSystem(msgs[0..i], response, s)`: fold
/// `hashMessage` over the prefix by repeated concatenation-and-rehash, then
/// fold in the assistant `response` (if any) and finally `hashSystem(s)` as
/// the last round if non-null. Returns `None` only when the prefix is empty,
/// there is no response to fold in, and there is no system prompt either.
pub fn hash_conversation_state_with_system(
    messages: &[Message],
    response: Option<&Message>,
    system: Option<&SystemPrompt>,
) -> Option<String> {
    let mut acc: Option<String> = None;
    for m in messages {
        acc = Some(fold(acc, hash_message(m)));
    }
    if let Some(r) = response {
        acc = Some(fold(acc, hash_message(r)));
    }
    if let Some(sys_hash) = hash_system(system) {
        acc = Some(fold(acc, sys_hash));
    }
    acc
}

/// `currentMessageHash`: cumulative hash over a request's messages, its own
/// assistant `response` folded on top, plus system (§4.2). Folding the
/// response in is what lets a child's `parentMessageHash` — the cumulative
/// hash of its own messages *minus* the last turn, which already embeds the
/// parent's reply — land on the same value as the parent's own
/// `currentMessageHash`.
pub fn current_message_hash(
    messages: &[Message],
    response: Option<&Message>,
    system: Option<&SystemPrompt>,
) -> Option<String> {
    hash_conversation_state_with_system(messages, response, system)
}

/// `parentMessageHash`: cumulative hash over all messages *except the last*
/// plus system; `None` when the message list has length <= 1.
pub fn parent_message_hash(messages: &[Message], system: Option<&SystemPrompt>) -> Option<String> {
    if messages.len() <= 1 {
        return None;
    }
    hash_conversation_state_with_system(&messages[..messages.len() - 1], None, system)
}

/// Message-only cumulative hash (system ignored), used by the Resolver's
/// summarization fallback lookup (§4.4).
pub fn message_only_hash(messages: &[Message]) -> Option<String> {
    hash_conversation_state_with_system(messages, None, None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Content, Role};

    fn user(text: &str) -> Message {
        Message {
            role: Role::User,
            content: Content::Text(text.to_string()),
        }
    }

    fn assistant(text: &str) -> Message {
        Message {
            role: Role::Assistant,
            content: Content::Text(text.to_string()),
        }
    }

    #[test]
    fn deterministic_across_calls() {
        let msgs = vec![user("hi"), assistant("hello")];
        assert_eq!(
            current_message_hash(&msgs, None, None),
            current_message_hash(&msgs, None, None)
        );
    }

    #[test]
    fn single_message_has_no_parent_hash() {
        let msgs = vec![user("hi")];
        assert_eq!(parent_message_hash(&msgs, None), None);
        assert!(current_message_hash(&msgs, None, None).is_some());
    }

    #[test]
    fn parent_hash_of_child_matches_current_hash_of_prefix() {
        // R1 = [user: "hi"], and its own response is "hello" (not yet part
        // of its `messages`, folded in separately). R2 forwards that reply
        // as history: [user: "hi", assistant: "hello", user: "how?"].
        let r1_msgs = vec![user("hi")];
        let r1_response = assistant("hello");
        let r2_msgs = vec![user("hi"), assistant("hello"), user("how?")];

        let r1_current = current_message_hash(&r1_msgs, Some(&r1_response), None);
        let r2_parent = parent_message_hash(&r2_msgs, None);
        assert_eq!(r1_current, r2_parent);
    }

    #[test]
    fn different_tails_diverge() {
        let base = vec![user("hi"), assistant("hello")];
        let mut r2 = base.clone();
        r2.push(user("why?"));
        let mut r3 = base.clone();
        r3.push(user("how?"));

        assert_eq!(parent_message_hash(&r2, None), parent_message_hash(&r3, None));
        assert_ne!(
            current_message_hash(&r2, None, None),
            current_message_hash(&r3, None, None)
        );
    }
}
