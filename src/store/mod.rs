// src/store/mod.rs
// Store contract (§6): the Resolver depends only on this trait; any backing
// store satisfying it works. Two implementations are provided: a
// rusqlite/deadpool-sqlite backed store for production use, and an in-memory
// store for tests.

pub mod memory;
pub mod sqlite;

use crate::error::Result;
use crate::model::{ConversationId, Request, RequestId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;

/// Fields the Linker/Rebuilder may write back onto a request (§6 "Persistent
/// fields the Linker writes").
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LinkageFields {
    pub conversation_id: Option<ConversationId>,
    pub branch_id: Option<String>,
    pub parent_request_id: Option<RequestId>,
    pub current_message_hash: Option<String>,
    pub parent_message_hash: Option<String>,
    pub system_hash: Option<String>,
    pub is_subtask: bool,
    pub parent_task_request_id: Option<RequestId>,
    pub message_count: i64,
}

impl LinkageFields {
    pub fn from_request(req: &Request) -> Self {
        Self {
            conversation_id: req.conversation_id,
            branch_id: req.branch_id.clone(),
            parent_request_id: req.parent_request_id,
            current_message_hash: req.current_message_hash.clone(),
            parent_message_hash: req.parent_message_hash.clone(),
            system_hash: req.system_hash.clone(),
            is_subtask: req.is_subtask,
            parent_task_request_id: req.parent_task_request_id,
            message_count: req.message_count,
        }
    }
}

/// Cursor-paginated query used by the Rebuilder to stream requests in
/// `(timestamp asc, requestId asc)` order (§4.7, §5).
#[derive(Debug, Clone, Default)]
pub struct StreamOptions {
    pub domain: Option<String>,
    pub request_ids: Option<Vec<RequestId>>,
    /// Exclusive cursor: only requests strictly after this `(timestamp, id)`.
    pub after: Option<(DateTime<Utc>, RequestId)>,
    pub page_size: usize,
}

#[derive(Debug, Clone, Default)]
pub struct StreamPage {
    pub requests: Vec<Request>,
}

/// The backing-store abstraction required by the Parent Resolver, Branch
/// Assigner, and Rebuilder (§6).
#[async_trait]
pub trait Store: Send + Sync {
    /// `lookupByCurrentHash`: most recent request with matching
    /// `currentMessageHash` in `domain`, strictly before `before_ts`. Ties on
    /// timestamp break by request-id descending (§4.4 tie-breaking rule).
    async fn lookup_by_current_hash(
        &self,
        domain: &str,
        hash: &str,
        before_ts: DateTime<Utc>,
    ) -> Result<Option<Request>>;

    /// `lookupById`.
    async fn lookup_by_id(&self, id: RequestId) -> Result<Option<Request>>;

    /// `searchResponseContaining`: bounded set of candidates whose response
    /// body contains text beginning with `text_prefix`, in `domain`, strictly
    /// before `before_ts` (used for compact continuations).
    async fn search_response_containing(
        &self,
        domain: &str,
        text_prefix: &str,
        before_ts: DateTime<Utc>,
    ) -> Result<Vec<Request>>;

    /// `findTaskInvocationsBefore`: requests in `[before_ts - window, before_ts)`
    /// whose response contains a `Task` tool_use with `input.prompt == prompt`
    /// exactly (used for subtask detection).
    async fn find_task_invocations_before(
        &self,
        domain: &str,
        prompt: &str,
        before_ts: DateTime<Utc>,
        window: Duration,
    ) -> Result<Vec<Request>>;

    /// Implements `countChildrenOf(currentHash)`: every already-linked
    /// request whose `parentMessageHash` equals `hash`, i.e. every existing
    /// child of the request that owns that `currentMessageHash` (used for
    /// fan-out detection, §4.5 rule 4).
    async fn children_by_parent_hash(&self, hash: &str) -> Result<Vec<Request>>;

    /// Highest existing `subtask_<n>` sequence number within a conversation,
    /// or 0 if none (§4.4 Subtask case).
    async fn max_subtask_sequence(&self, conversation_id: ConversationId) -> Result<u64>;

    /// Number of requests currently carrying `conversation_id` (§4.7
    /// integrity verification).
    async fn conversation_request_count(&self, conversation_id: ConversationId) -> Result<i64>;

    /// Extension of `lookupByCurrentHash` used by the summarizer fallback
    /// (§4.4): matches by message-only cumulative hash (system ignored on
    /// both sides), since a single hash column keyed on the system-mixed
    /// hash cannot express "ignore system" without a second index.
    async fn lookup_by_message_only_hash(
        &self,
        domain: &str,
        hash: &str,
        before_ts: DateTime<Utc>,
    ) -> Result<Option<Request>>;

    /// `updateLinkage`: atomic single-row update.
    async fn update_linkage(&self, id: RequestId, fields: LinkageFields) -> Result<()>;

    /// Streams requests in `(timestamp asc, requestId asc)` order per the
    /// cursor in `opts`, at most `opts.page_size` rows.
    async fn stream_page(&self, opts: &StreamOptions) -> Result<StreamPage>;

    /// Inserts a new request record (used by ingest and by tests to seed
    /// fixtures). Not part of the read-only contract the Resolver relies on,
    /// but every implementation needs a way to populate itself.
    async fn insert_request(&self, req: Request) -> Result<()>;
}
