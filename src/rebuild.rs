// src/rebuild.rs
// Rebuilder (§4.7 public contract): batch driver that streams requests in
// timestamp order, invokes the Linker per request, applies in-place updates,
// and verifies the preservation invariants at the end.

use crate::cache::HashCache;
use crate::error::Result;
use crate::linker::link_conversation;
use crate::model::{ConversationId, RequestId};
use crate::store::{LinkageFields, Store, StreamOptions};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Honored at batch boundaries (§5 "Cancellation"): an in-flight batch either
/// completes or is treated as not-yet-applied as a unit.
#[derive(Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone)]
pub struct RebuildOptions {
    pub dry_run: bool,
    pub domain: Option<String>,
    pub limit: Option<usize>,
    pub batch_size: usize,
    pub request_ids: Option<Vec<RequestId>>,
    pub subtask_window: Duration,
}

impl Default for RebuildOptions {
    fn default() -> Self {
        Self {
            dry_run: false,
            domain: None,
            limit: None,
            batch_size: 1000,
            request_ids: None,
            subtask_window: crate::resolve::DEFAULT_SUBTASK_WINDOW,
        }
    }
}

/// A post-rebuild invariant 1–7 violation or a conversation that lost
/// requests (§7 `IntegrityWarning`); never escalates to an error.
#[derive(Debug, Clone)]
pub struct IntegrityWarning {
    pub conversation_id: ConversationId,
    pub message: String,
}

#[derive(Debug, Clone, Default)]
pub struct FieldChangeCounts {
    pub conversation_id: u64,
    pub branch_id: u64,
    pub parent_request_id: u64,
    pub current_message_hash: u64,
    pub parent_message_hash: u64,
    pub system_hash: u64,
    pub is_subtask: u64,
    pub parent_task_request_id: u64,
}

#[derive(Debug, Clone, Default)]
pub struct RebuildSummary {
    pub scanned: u64,
    pub linked: u64,
    pub updated: u64,
    pub unchanged: u64,
    pub skipped_errors: u64,
    pub field_changes: FieldChangeCounts,
    pub integrity_warnings: Vec<IntegrityWarning>,
    pub cancelled: bool,
}

fn diff_fields(before: &LinkageFields, after: &LinkageFields, counts: &mut FieldChangeCounts) -> bool {
    let mut changed = false;
    if before.conversation_id != after.conversation_id {
        counts.conversation_id += 1;
        changed = true;
    }
    if before.branch_id != after.branch_id {
        counts.branch_id += 1;
        changed = true;
    }
    if before.parent_request_id != after.parent_request_id {
        counts.parent_request_id += 1;
        changed = true;
    }
    if before.current_message_hash != after.current_message_hash {
        counts.current_message_hash += 1;
        changed = true;
    }
    if before.parent_message_hash != after.parent_message_hash {
        counts.parent_message_hash += 1;
        changed = true;
    }
    if before.system_hash != after.system_hash {
        counts.system_hash += 1;
        changed = true;
    }
    if before.is_subtask != after.is_subtask {
        counts.is_subtask += 1;
        changed = true;
    }
    if before.parent_task_request_id != after.parent_task_request_id {
        counts.parent_task_request_id += 1;
        changed = true;
    }
    changed
}

/// Drives the rebuild loop described in §4.7. Processes requests strictly
/// sequentially (single domain at a time, oldest first) to honor the
/// "read-your-own-writes" invariant from §5.
pub async fn rebuild(
    store: &dyn Store,
    cache: &HashCache,
    options: &RebuildOptions,
    cancel: &CancellationToken,
) -> Result<RebuildSummary> {
    let mut summary = RebuildSummary::default();
    let mut pre_existing_counts: HashMap<ConversationId, i64> = HashMap::new();
    let mut touched_conversations: Vec<ConversationId> = Vec::new();

    let mut after_cursor = None;
    'pages: loop {
        if cancel.is_cancelled() {
            summary.cancelled = true;
            break;
        }

        let page = store
            .stream_page(&StreamOptions {
                domain: options.domain.clone(),
                request_ids: options.request_ids.clone(),
                after: after_cursor,
                page_size: options.batch_size,
            })
            .await?;

        if page.requests.is_empty() {
            break;
        }

        for req in &page.requests {
            if let Some(limit) = options.limit {
                if summary.scanned >= limit as u64 {
                    break 'pages;
                }
            }
            summary.scanned += 1;
            after_cursor = Some((req.timestamp, req.id));

            if let Some(cid) = req.conversation_id {
                pre_existing_counts
                    .entry(cid)
                    .or_insert_with(|| 0);
            }

            let mut working = req.clone();
            let before = LinkageFields::from_request(&working);

            match link_conversation(&working, store, cache, options.subtask_window).await {
                Ok(mut result) => {
                    if result.conversation_id.is_none() {
                        // Orphan: keep an existing id, otherwise mint one here
                        // (the Linker never mints ids; §4.6).
                        result.conversation_id =
                            Some(req.conversation_id.unwrap_or_else(ConversationId::new));
                    }
                    result.apply(&mut working);
                    let after = LinkageFields::from_request(&working);

                    if let Some(cid) = after.conversation_id {
                        if !touched_conversations.contains(&cid) {
                            touched_conversations.push(cid);
                        }
                    }

                    summary.linked += 1;
                    let changed = diff_fields(&before, &after, &mut summary.field_changes);
                    if changed {
                        summary.updated += 1;
                        if !options.dry_run {
                            store.update_linkage(req.id, after).await?;
                        }
                    } else {
                        summary.unchanged += 1;
                    }
                }
                Err(err) => {
                    summary.skipped_errors += 1;
                    warn!(request_id = %req.id, error = %err, "skipping request during rebuild");
                }
            }
        }

        debug!(
            scanned = summary.scanned,
            updated = summary.updated,
            field_changes = ?summary.field_changes,
            "rebuild batch complete"
        );

        if page.requests.len() < options.batch_size {
            break;
        }
    }

    if !summary.cancelled {
        for cid in touched_conversations {
            let pre = pre_existing_counts.get(&cid).copied().unwrap_or(0);
            let post = store.conversation_request_count(cid).await?;
            if post < pre {
                summary.integrity_warnings.push(IntegrityWarning {
                    conversation_id: cid,
                    message: format!("conversation {cid} lost requests: {pre} -> {post}"),
                });
            }
        }
    }

    info!(
        scanned = summary.scanned,
        linked = summary.linked,
        updated = summary.updated,
        unchanged = summary.unchanged,
        skipped_errors = summary.skipped_errors,
        warnings = summary.integrity_warnings.len(),
        dry_run = options.dry_run,
        "rebuild finished"
    );

    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Content, Message, Request, Role};
    use crate::store::memory::MemoryStore;
    use chrono::{Duration as ChronoDuration, Utc};

    fn msg(role: Role, text: &str) -> Message {
        Message {
            role,
            content: Content::Text(text.to_string()),
        }
    }

    #[tokio::test]
    async fn links_a_linear_chain_and_assigns_shared_conversation() {
        let store = MemoryStore::new();
        let cache = HashCache::new(100);
        let t0 = Utc::now();

        let r1 = Request::new(
            RequestId::new(),
            "d".into(),
            t0,
            vec![msg(Role::User, "hi")],
            None,
            Some(serde_json::json!({"content": [{"type": "text", "text": "hello"}]})),
        );
        let r2 = Request::new(
            RequestId::new(),
            "d".into(),
            t0 + ChronoDuration::seconds(1),
            vec![msg(Role::User, "hi"), msg(Role::Assistant, "hello"), msg(Role::User, "how?")],
            None,
            None,
        );
        store.insert_request(r1.clone()).await.unwrap();
        store.insert_request(r2.clone()).await.unwrap();

        let options = RebuildOptions::default();
        let cancel = CancellationToken::new();
        let summary = rebuild(&store, &cache, &options, &cancel).await.unwrap();

        assert_eq!(summary.scanned, 2);
        assert_eq!(summary.updated, 2);
        assert!(summary.integrity_warnings.is_empty());

        let linked_r1 = store.lookup_by_id(r1.id).await.unwrap().unwrap();
        let linked_r2 = store.lookup_by_id(r2.id).await.unwrap().unwrap();
        assert_eq!(linked_r2.parent_request_id, Some(linked_r1.id));
        assert_eq!(linked_r1.conversation_id, linked_r2.conversation_id);
        assert_eq!(linked_r2.branch_id.as_deref(), Some("main"));
    }

    #[tokio::test]
    async fn second_rebuild_is_a_no_op() {
        let store = MemoryStore::new();
        let cache = HashCache::new(100);
        let t0 = Utc::now();
        let r1 = Request::new(RequestId::new(), "d".into(), t0, vec![msg(Role::User, "hi")], None, None);
        store.insert_request(r1).await.unwrap();

        let options = RebuildOptions::default();
        let cancel = CancellationToken::new();
        rebuild(&store, &cache, &options, &cancel).await.unwrap();
        let second = rebuild(&store, &cache, &options, &cancel).await.unwrap();

        assert_eq!(second.updated, 0);
        assert_eq!(second.unchanged, 1);
    }

    #[tokio::test]
    async fn dry_run_does_not_mutate_store() {
        let store = MemoryStore::new();
        let cache = HashCache::new(100);
        let t0 = Utc::now();
        let r1 = Request::new(RequestId::new(), "d".into(), t0, vec![msg(Role::User, "hi")], None, None);
        store.insert_request(r1.clone()).await.unwrap();

        let options = RebuildOptions {
            dry_run: true,
            ..RebuildOptions::default()
        };
        let cancel = CancellationToken::new();
        let summary = rebuild(&store, &cache, &options, &cancel).await.unwrap();
        assert_eq!(summary.updated, 1);

        let still_unlinked = store.lookup_by_id(r1.id).await.unwrap().unwrap();
        assert!(still_unlinked.conversation_id.is_none());
    }
}
