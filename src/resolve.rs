// src/resolve.rs
// Parent Resolver (§4.4): given a candidate request, finds its parent via
// hash lookups, with temporal and domain filters.

use crate::cache::HashCache;
use crate::detect::DetectionFlags;
use crate::error::Result;
use crate::model::Request;
use crate::store::Store;
use std::time::Duration;

/// Default subtask lookback window (§4.4, §9: "a tunable with a default of 30 s").
pub const DEFAULT_SUBTASK_WINDOW: Duration = Duration::from_secs(30);

/// Roughly how much of TARGET is used as a response-text search prefix for
/// compact-continuation lookup (§4.4: "first ≈50 characters of TARGET").
const COMPACT_SEARCH_PREFIX_LEN: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionKind {
    Normal,
    SummarizationFallback,
    CompactContinuation,
}

#[derive(Debug, Clone)]
pub struct ParentResolution {
    pub parent: Request,
    pub kind: ResolutionKind,
}

#[derive(Debug, Clone)]
pub struct SubtaskResolution {
    pub parent_task_request: Request,
}

#[derive(Debug, Clone, Default)]
pub struct Resolution {
    pub parent: Option<ParentResolution>,
    pub subtask: Option<SubtaskResolution>,
}

/// Resolve a request's parent (and, independently, its subtask linkage) per
/// §4.4. `current_hash`/`parent_hash` must already be computed by the Hasher.
pub async fn resolve(
    req: &Request,
    flags: &DetectionFlags,
    parent_hash: Option<&str>,
    store: &dyn Store,
    cache: &HashCache,
    subtask_window: Duration,
) -> Result<Resolution> {
    let mut resolution = Resolution::default();

    if flags.is_compact_continuation {
        if let Some(target) = &flags.compact_target {
            let prefix: String = target.chars().take(COMPACT_SEARCH_PREFIX_LEN).collect();
            if !prefix.trim().is_empty() {
                let mut candidates = store
                    .search_response_containing(&req.domain, &prefix, req.timestamp)
                    .await?;
                candidates.sort_by(|a, b| (b.timestamp, b.id.0).cmp(&(a.timestamp, a.id.0)));
                if let Some(found) = candidates.into_iter().next() {
                    resolution.parent = Some(ParentResolution {
                        parent: found,
                        kind: ResolutionKind::CompactContinuation,
                    });
                }
            }
        }
    } else if let Some(hash) = parent_hash {
        if let Some(cached) = cache.lookup(hash) {
            if let Some(p) = store.lookup_by_id(cached.request_id).await? {
                if p.domain == req.domain && p.timestamp < req.timestamp {
                    resolution.parent = Some(ParentResolution {
                        parent: p,
                        kind: ResolutionKind::Normal,
                    });
                }
            }
        }
        if resolution.parent.is_none() {
            if let Some(p) = store
                .lookup_by_current_hash(&req.domain, hash, req.timestamp)
                .await?
            {
                resolution.parent = Some(ParentResolution {
                    parent: p,
                    kind: ResolutionKind::Normal,
                });
            }
        }

        if resolution.parent.is_none() && flags.is_summarization {
            // Message-only prefix (system excluded), since the summarizer's
            // own system prompt won't match the original conversation's.
            let message_only_prefix_hash =
                crate::hash::message_only_hash(&req.messages[..req.messages.len().saturating_sub(1)]);
            if let Some(alt_hash) = message_only_prefix_hash {
                if let Some(p) = store
                    .lookup_by_message_only_hash(&req.domain, &alt_hash, req.timestamp)
                    .await?
                {
                    resolution.parent = Some(ParentResolution {
                        parent: p,
                        kind: ResolutionKind::SummarizationFallback,
                    });
                }
            }
        }
    }

    if flags.is_subtask_shape {
        let first_user_text = req
            .messages
            .first()
            .map(|m| m.text())
            .unwrap_or_default();
        if !first_user_text.is_empty() {
            let mut candidates = store
                .find_task_invocations_before(&req.domain, &first_user_text, req.timestamp, subtask_window)
                .await?;
            candidates.sort_by(|a, b| (b.timestamp, b.id.0).cmp(&(a.timestamp, a.id.0)));
            if let Some(found) = candidates.into_iter().next() {
                resolution.subtask = Some(SubtaskResolution {
                    parent_task_request: found,
                });
            }
        }
    }

    Ok(resolution)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::HashCache;
    use crate::detect::detect;
    use crate::hash::{current_message_hash, parent_message_hash};
    use crate::model::{Content, Message, Request, RequestId, Role};
    use crate::store::{Store, memory::MemoryStore};
    use chrono::{Duration as ChronoDuration, Utc};

    fn msg(role: Role, text: &str) -> Message {
        Message {
            role,
            content: Content::Text(text.to_string()),
        }
    }

    #[tokio::test]
    async fn normal_parent_found_by_hash() {
        let store = MemoryStore::new();
        let t0 = Utc::now();

        let mut r1 = Request::new(
            RequestId::new(),
            "d".into(),
            t0,
            vec![msg(Role::User, "hi")],
            None,
            Some(serde_json::json!({"content": [{"type": "text", "text": "hello"}]})),
        );
        r1.current_message_hash =
            current_message_hash(&r1.messages, r1.response_message().as_ref(), None);
        r1.conversation_id = Some(crate::model::ConversationId::new());
        store.insert_request(r1.clone()).await.unwrap();

        let r2_msgs = vec![msg(Role::User, "hi"), msg(Role::Assistant, "hello"), msg(Role::User, "how?")];
        let r2 = Request::new(RequestId::new(), "d".into(), t0 + ChronoDuration::seconds(1), r2_msgs.clone(), None, None);
        let parent_hash = parent_message_hash(&r2_msgs, None);

        let cache = HashCache::new(100);
        let flags = detect(&r2);
        let res = resolve(&r2, &flags, parent_hash.as_deref(), &store, &cache, DEFAULT_SUBTASK_WINDOW)
            .await
            .unwrap();

        assert_eq!(res.parent.unwrap().parent.id, r1.id);
    }

    #[tokio::test]
    async fn subtask_resolution_matches_task_prompt() {
        let store = MemoryStore::new();
        let t0 = Utc::now();
        let mut parent = Request::new(
            RequestId::new(),
            "d".into(),
            t0,
            vec![msg(Role::User, "do work")],
            None,
            Some(serde_json::json!({"content": [{"type":"tool_use","name":"Task","id":"t1","input":{"prompt":"investigate X"}}]})),
        );
        parent.current_message_hash = current_message_hash(&parent.messages, None, None);
        store.insert_request(parent.clone()).await.unwrap();

        let child = Request::new(
            RequestId::new(),
            "d".into(),
            t0 + ChronoDuration::seconds(5),
            vec![msg(Role::User, "investigate X")],
            None,
            None,
        );
        let flags = detect(&child);
        let cache = HashCache::new(100);
        let res = resolve(&child, &flags, None, &store, &cache, DEFAULT_SUBTASK_WINDOW)
            .await
            .unwrap();

        assert_eq!(res.subtask.unwrap().parent_task_request.id, parent.id);
    }
}
