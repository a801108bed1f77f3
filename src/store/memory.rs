// src/store/memory.rs
// In-memory Store implementation used by tests (mirrors the role that an
// in-memory sqlite fixture plays in mira-server's db test suite).

use super::{LinkageFields, Store, StreamOptions, StreamPage};
use crate::error::Result;
use crate::model::{ConversationId, Request, RequestId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;
use tokio::sync::Mutex;

#[derive(Default)]
pub struct MemoryStore {
    requests: Mutex<Vec<Request>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn response_text(req: &Request) -> String {
        let Some(body) = &req.response_body else {
            return String::new();
        };
        let Some(parts) = body.get("content").and_then(|c| c.as_array()) else {
            return String::new();
        };
        parts
            .iter()
            .filter_map(|p| p.get("text").and_then(|t| t.as_str()))
            .collect::<Vec<_>>()
            .join("")
    }
}

/// Tie-break: most recent timestamp first, then request-id descending
/// (§4.4 tie-breaking rule).
fn is_more_recent(a: &Request, b: &Request) -> bool {
    (a.timestamp, a.id.0) > (b.timestamp, b.id.0)
}

#[async_trait]
impl Store for MemoryStore {
    async fn lookup_by_current_hash(
        &self,
        domain: &str,
        hash: &str,
        before_ts: DateTime<Utc>,
    ) -> Result<Option<Request>> {
        let requests = self.requests.lock().await;
        let mut best: Option<&Request> = None;
        for req in requests.iter() {
            if req.domain != domain || req.timestamp >= before_ts {
                continue;
            }
            if req.current_message_hash.as_deref() != Some(hash) {
                continue;
            }
            if best.is_none_or(|b| is_more_recent(req, b)) {
                best = Some(req);
            }
        }
        Ok(best.cloned())
    }

    async fn lookup_by_id(&self, id: RequestId) -> Result<Option<Request>> {
        let requests = self.requests.lock().await;
        Ok(requests.iter().find(|r| r.id == id).cloned())
    }

    async fn search_response_containing(
        &self,
        domain: &str,
        text_prefix: &str,
        before_ts: DateTime<Utc>,
    ) -> Result<Vec<Request>> {
        let requests = self.requests.lock().await;
        let mut matches: Vec<Request> = requests
            .iter()
            .filter(|r| r.domain == domain && r.timestamp < before_ts)
            .filter(|r| Self::response_text(r).contains(text_prefix))
            .cloned()
            .collect();
        matches.sort_by(|a, b| (b.timestamp, b.id.0).cmp(&(a.timestamp, a.id.0)));
        Ok(matches)
    }

    async fn find_task_invocations_before(
        &self,
        domain: &str,
        prompt: &str,
        before_ts: DateTime<Utc>,
        window: Duration,
    ) -> Result<Vec<Request>> {
        let requests = self.requests.lock().await;
        let window = chrono::Duration::from_std(window).unwrap_or(chrono::Duration::seconds(30));
        let earliest = before_ts - window;
        let mut matches: Vec<Request> = requests
            .iter()
            .filter(|r| r.domain == domain && r.timestamp >= earliest && r.timestamp < before_ts)
            .filter(|r| {
                r.task_invocations()
                    .iter()
                    .any(|inv| inv.prompt == prompt)
            })
            .cloned()
            .collect();
        matches.sort_by(|a, b| (b.timestamp, b.id.0).cmp(&(a.timestamp, a.id.0)));
        Ok(matches)
    }

    async fn lookup_by_message_only_hash(
        &self,
        domain: &str,
        hash: &str,
        before_ts: DateTime<Utc>,
    ) -> Result<Option<Request>> {
        let requests = self.requests.lock().await;
        let mut best: Option<&Request> = None;
        for req in requests.iter() {
            if req.domain != domain || req.timestamp >= before_ts {
                continue;
            }
            if crate::hash::message_only_hash(&req.messages).as_deref() != Some(hash) {
                continue;
            }
            if best.is_none_or(|b| is_more_recent(req, b)) {
                best = Some(req);
            }
        }
        Ok(best.cloned())
    }

    async fn children_by_parent_hash(&self, hash: &str) -> Result<Vec<Request>> {
        let requests = self.requests.lock().await;
        let mut children: Vec<Request> = requests
            .iter()
            .filter(|r| r.parent_message_hash.as_deref() == Some(hash))
            .cloned()
            .collect();
        children.sort_by(|a, b| (a.timestamp, a.id.0).cmp(&(b.timestamp, b.id.0)));
        Ok(children)
    }

    async fn max_subtask_sequence(&self, conversation_id: ConversationId) -> Result<u64> {
        let requests = self.requests.lock().await;
        let max = requests
            .iter()
            .filter(|r| r.conversation_id == Some(conversation_id))
            .filter_map(|r| r.branch_id.as_deref())
            .filter_map(|b| b.strip_prefix("subtask_"))
            .filter_map(|n| n.parse::<u64>().ok())
            .max()
            .unwrap_or(0);
        Ok(max)
    }

    async fn conversation_request_count(&self, conversation_id: ConversationId) -> Result<i64> {
        let requests = self.requests.lock().await;
        Ok(requests
            .iter()
            .filter(|r| r.conversation_id == Some(conversation_id))
            .count() as i64)
    }

    async fn update_linkage(&self, id: RequestId, fields: LinkageFields) -> Result<()> {
        let mut requests = self.requests.lock().await;
        if let Some(req) = requests.iter_mut().find(|r| r.id == id) {
            req.conversation_id = fields.conversation_id;
            req.branch_id = fields.branch_id;
            req.parent_request_id = fields.parent_request_id;
            req.current_message_hash = fields.current_message_hash;
            req.parent_message_hash = fields.parent_message_hash;
            req.system_hash = fields.system_hash;
            req.is_subtask = fields.is_subtask;
            req.parent_task_request_id = fields.parent_task_request_id;
            req.message_count = fields.message_count;
        }
        Ok(())
    }

    async fn stream_page(&self, opts: &StreamOptions) -> Result<StreamPage> {
        let requests = self.requests.lock().await;
        let mut filtered: Vec<Request> = requests
            .iter()
            .filter(|r| opts.domain.as_deref().is_none_or(|d| r.domain == d))
            .filter(|r| {
                opts.request_ids
                    .as_ref()
                    .is_none_or(|ids| ids.contains(&r.id))
            })
            .filter(|r| match opts.after {
                None => true,
                Some((ts, id)) => (r.timestamp, r.id.0) > (ts, id.0),
            })
            .cloned()
            .collect();
        filtered.sort_by(|a, b| (a.timestamp, a.id.0).cmp(&(b.timestamp, b.id.0)));
        filtered.truncate(opts.page_size.max(1));
        Ok(StreamPage { requests: filtered })
    }

    async fn insert_request(&self, req: Request) -> Result<()> {
        let mut requests = self.requests.lock().await;
        requests.push(req);
        Ok(())
    }
}
