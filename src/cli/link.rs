// src/cli/link.rs
// `convolink link`: link one request envelope read from stdin, the
// interface the proxy writer calls into at intake time (§6 ingest shape).

use crate::cache::HashCache;
use crate::config::Config;
use crate::linker::link_conversation;
use crate::model::{Content, Message, Request, RequestId, SystemPrompt};
use crate::store::{LinkageFields, Store};
use anyhow::{Context, Result};
use serde::Deserialize;
use std::io::Read;
use std::path::PathBuf;

/// The JSON envelope shape consumed by the Linker (§6): `messages`,
/// optional `system`, optional `response_body`, plus the proxy-assigned
/// `domain`/`timestamp`/`id`.
#[derive(Debug, Deserialize)]
struct RequestEnvelope {
    id: Option<uuid::Uuid>,
    domain: String,
    timestamp: Option<chrono::DateTime<chrono::Utc>>,
    messages: Vec<EnvelopeMessage>,
    system: Option<SystemPrompt>,
    response_body: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct EnvelopeMessage {
    role: crate::model::Role,
    content: Content,
}

impl From<EnvelopeMessage> for Message {
    fn from(m: EnvelopeMessage) -> Self {
        Message {
            role: m.role,
            content: m.content,
        }
    }
}

pub async fn run(db: Option<PathBuf>) -> Result<()> {
    let mut raw = String::new();
    std::io::stdin()
        .read_to_string(&mut raw)
        .context("failed to read request envelope from stdin")?;
    let envelope: RequestEnvelope =
        serde_json::from_str(&raw).context("request envelope is not valid JSON")?;

    let config = Config::load();
    let db_path = db.unwrap_or(config.db_path);
    let store = crate::store::sqlite::SqliteStore::open(&db_path).await?;
    let cache = HashCache::new(config.cache_capacity);

    let req = Request::new(
        envelope.id.map(RequestId).unwrap_or_default(),
        envelope.domain,
        envelope.timestamp.unwrap_or_else(chrono::Utc::now),
        envelope.messages.into_iter().map(Message::from).collect(),
        envelope.system,
        envelope.response_body,
    );

    store.insert_request(req.clone()).await?;
    let result = link_conversation(&req, &store, &cache, config.subtask_window).await?;
    store
        .update_linkage(req.id, LinkageFields {
            conversation_id: result.conversation_id,
            branch_id: result.branch_id.clone(),
            parent_request_id: result.parent_request_id,
            current_message_hash: result.current_message_hash.clone(),
            parent_message_hash: result.parent_message_hash.clone(),
            system_hash: result.system_hash.clone(),
            is_subtask: result.is_subtask,
            parent_task_request_id: result.parent_task_request_id,
            message_count: req.message_count,
        })
        .await?;

    println!(
        "{}",
        serde_json::json!({
            "requestId": req.id.to_string(),
            "conversationId": result.conversation_id.map(|c| c.to_string()),
            "branchId": result.branch_id,
            "parentRequestId": result.parent_request_id.map(|p| p.to_string()),
            "currentMessageHash": result.current_message_hash,
            "parentMessageHash": result.parent_message_hash,
            "systemHash": result.system_hash,
            "isSubtask": result.is_subtask,
            "parentTaskRequestId": result.parent_task_request_id.map(|p| p.to_string()),
        })
    );

    Ok(())
}
