// src/model.rs
// Core data model: §3 DATA MODEL

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque 128-bit request identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RequestId(pub Uuid);

impl RequestId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque 128-bit conversation identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ConversationId(pub Uuid);

impl ConversationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConversationId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConversationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The "main" branch name that always exists once a conversation is non-empty.
pub const MAIN_BRANCH: &str = "main";

/// Allocate a `branch_<epoch_ms>` id for a content fork (§4.5 rule 4).
pub fn branch_id_for_fork(timestamp: chrono::DateTime<chrono::Utc>) -> String {
    format!("branch_{}", timestamp.timestamp_millis())
}

/// Allocate a `subtask_<n>` id (§4.4 Subtask case).
pub fn branch_id_for_subtask(sequence: u64) -> String {
    format!("subtask_{sequence}")
}

/// Allocate a `compact_<yyyymmddhhmm>` id (§4.5 rule 1).
pub fn branch_id_for_compact(timestamp: chrono::DateTime<chrono::Utc>) -> String {
    format!("compact_{}", timestamp.format("%Y%m%d%H%M"))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// Message content: either a plain string or an ordered list of parts (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Content {
    Text(String),
    Parts(Vec<ContentPart>),
}

/// A tagged content-part variant (§9 "Polymorphism over content parts").
/// `Other` preserves unknown tags verbatim so they round-trip through
/// normalization without loss.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ContentPart {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "tool_use")]
    ToolUse {
        id: String,
        name: String,
        #[serde(default)]
        input: serde_json::Value,
    },
    #[serde(rename = "tool_result")]
    ToolResult {
        tool_use_id: String,
        #[serde(default)]
        content: serde_json::Value,
        #[serde(default)]
        is_error: Option<bool>,
    },
    #[serde(untagged)]
    Other(serde_json::Value),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: Content,
}

impl Message {
    /// The message's plain-text content, as used by subtask / compact-continuation
    /// text matching (§4.3). For array content, concatenates the text parts.
    pub fn text(&self) -> String {
        match &self.content {
            Content::Text(s) => s.clone(),
            Content::Parts(parts) => parts
                .iter()
                .filter_map(|p| match p {
                    ContentPart::Text { text } => Some(text.as_str()),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join(""),
        }
    }
}

/// System prompt shape: a plain string or an array of text blocks (§6 ingest shape).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SystemPrompt {
    Text(String),
    Blocks(Vec<SystemTextBlock>),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemTextBlock {
    #[serde(rename = "type")]
    pub block_type: String,
    pub text: String,
}

impl SystemPrompt {
    pub fn is_empty(&self) -> bool {
        match self {
            SystemPrompt::Text(s) => s.trim().is_empty(),
            SystemPrompt::Blocks(b) => b.is_empty(),
        }
    }
}

/// A recorded inference request, as ingested by the linker (§3 Entities).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub id: RequestId,
    pub domain: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub messages: Vec<Message>,
    pub system: Option<SystemPrompt>,
    pub response_body: Option<serde_json::Value>,

    // Ancillary attributes the linker writes back.
    pub current_message_hash: Option<String>,
    pub parent_message_hash: Option<String>,
    pub system_hash: Option<String>,
    pub conversation_id: Option<ConversationId>,
    pub branch_id: Option<String>,
    pub parent_request_id: Option<RequestId>,
    pub is_subtask: bool,
    pub parent_task_request_id: Option<RequestId>,
    pub message_count: i64,
}

impl Request {
    /// Construct a fresh, unlinked request from ingest fields; `message_count`
    /// is derived from `messages` when not supplied (§4.6).
    pub fn new(
        id: RequestId,
        domain: String,
        timestamp: chrono::DateTime<chrono::Utc>,
        messages: Vec<Message>,
        system: Option<SystemPrompt>,
        response_body: Option<serde_json::Value>,
    ) -> Self {
        let message_count = messages.len() as i64;
        Self {
            id,
            domain,
            timestamp,
            messages,
            system,
            response_body,
            current_message_hash: None,
            parent_message_hash: None,
            system_hash: None,
            conversation_id: None,
            branch_id: None,
            parent_request_id: None,
            is_subtask: false,
            parent_task_request_id: None,
            message_count,
        }
    }

    /// Find every `Task` tool_use invocation in this request's response body,
    /// used by subtask resolution (§4.4 Subtask case).
    pub fn task_invocations(&self) -> Vec<TaskInvocation> {
        let Some(body) = &self.response_body else {
            return Vec::new();
        };
        let Some(content) = body.get("content").and_then(|c| c.as_array()) else {
            return Vec::new();
        };
        content
            .iter()
            .filter(|part| {
                part.get("type").and_then(|t| t.as_str()) == Some("tool_use")
                    && part.get("name").and_then(|n| n.as_str()) == Some("Task")
            })
            .filter_map(|part| {
                let prompt = part.get("input")?.get("prompt")?.as_str()?.to_string();
                Some(TaskInvocation { prompt })
            })
            .collect()
    }

    /// The assistant turn this request's response produced, reconstructed in
    /// the same shape it would take if forwarded as history in a later
    /// request's `messages` (§4.2: the Hasher folds this onto the request's
    /// own messages to compute `currentMessageHash`). A response whose
    /// content is a single text block collapses to plain `Content::Text`,
    /// matching how simple text turns are carried in `messages`; anything
    /// else (tool use, multiple parts) keeps the full parts array.
    pub fn response_message(&self) -> Option<Message> {
        let body = self.response_body.as_ref()?;
        let raw_parts = body.get("content")?.as_array()?;
        if raw_parts.is_empty() {
            return None;
        }
        let parts: Vec<ContentPart> = raw_parts
            .iter()
            .filter_map(|v| serde_json::from_value(v.clone()).ok())
            .collect();
        if parts.is_empty() {
            return None;
        }
        let content = match parts.as_slice() {
            [ContentPart::Text { text }] => Content::Text(text.clone()),
            _ => Content::Parts(parts),
        };
        Some(Message {
            role: Role::Assistant,
            content,
        })
    }
}

pub struct TaskInvocation {
    pub prompt: String,
}

/// Output of `Linker::link_conversation` (§4.6).
#[derive(Debug, Clone, Default)]
pub struct LinkingResult {
    pub conversation_id: Option<ConversationId>,
    pub branch_id: Option<String>,
    pub parent_request_id: Option<RequestId>,
    pub current_message_hash: Option<String>,
    pub parent_message_hash: Option<String>,
    pub system_hash: Option<String>,
    pub is_subtask: bool,
    pub parent_task_request_id: Option<RequestId>,
    pub subtask_sequence: Option<u64>,
}

impl LinkingResult {
    /// Apply this result's linkage fields onto a request (used by the
    /// Rebuilder to compute the target row before diffing against storage).
    pub fn apply(&self, req: &mut Request) {
        req.conversation_id = self.conversation_id;
        req.branch_id = self.branch_id.clone();
        req.parent_request_id = self.parent_request_id;
        req.current_message_hash = self.current_message_hash.clone();
        req.parent_message_hash = self.parent_message_hash.clone();
        req.system_hash = self.system_hash.clone();
        req.is_subtask = self.is_subtask;
        req.parent_task_request_id = self.parent_task_request_id;
    }
}
