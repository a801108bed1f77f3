// src/linker.rs
// Linker (§4.6 public contract): orchestrates
// Normalizer -> Hasher -> Detector -> Resolver -> BranchAssigner for one
// request and returns a `LinkingResult`. Purely functional given its
// Resolver's reads; mutation is the caller's responsibility.

use crate::branch::assign_branch;
use crate::cache::{CachedLinkage, HashCache};
use crate::detect::detect;
use crate::error::{LinkError, Result};
use crate::hash::{current_message_hash, hash_system, parent_message_hash};
use crate::model::{LinkingResult, Request};
use crate::resolve::resolve;
use crate::store::Store;
use std::time::Duration;

/// Link a single request against `store`, consulting and updating `cache`.
///
/// Fails with `InvalidInput` when `messages` is empty; every other outcome
/// (no parent found, no special case matched) is a normal, non-error result.
pub async fn link_conversation(
    req: &Request,
    store: &dyn Store,
    cache: &HashCache,
    subtask_window: Duration,
) -> Result<LinkingResult> {
    if req.messages.is_empty() {
        return Err(LinkError::InvalidInput(
            "request has no messages".to_string(),
        ));
    }

    let current_hash = current_message_hash(
        &req.messages,
        req.response_message().as_ref(),
        req.system.as_ref(),
    );
    let parent_hash = parent_message_hash(&req.messages, req.system.as_ref());
    let system_hash = hash_system(req.system.as_ref());

    let flags = detect(req);
    let resolution = resolve(
        req,
        &flags,
        parent_hash.as_deref(),
        store,
        cache,
        subtask_window,
    )
    .await?;

    let assignment = assign_branch(req.timestamp, parent_hash.as_deref(), &resolution, store).await?;

    let result = LinkingResult {
        conversation_id: assignment.conversation_id,
        branch_id: Some(assignment.branch_id),
        parent_request_id: assignment.parent_request_id,
        current_message_hash: current_hash.clone(),
        parent_message_hash: parent_hash,
        system_hash,
        is_subtask: resolution.subtask.is_some(),
        parent_task_request_id: resolution
            .subtask
            .as_ref()
            .map(|s| s.parent_task_request.id),
        subtask_sequence: assignment.subtask_sequence,
    };

    if let (Some(hash), Some(cid), Some(branch)) =
        (current_hash, result.conversation_id, result.branch_id.clone())
    {
        cache.insert(
            hash,
            CachedLinkage {
                conversation_id: cid,
                branch_id: branch,
                request_id: req.id,
            },
        );
    }

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Content, ConversationId, Message, RequestId, Role};
    use crate::resolve::DEFAULT_SUBTASK_WINDOW;
    use crate::store::memory::MemoryStore;
    use chrono::{Duration as ChronoDuration, Utc};

    fn msg(role: Role, text: &str) -> Message {
        Message {
            role,
            content: Content::Text(text.to_string()),
        }
    }

    #[tokio::test]
    async fn empty_messages_is_invalid_input() {
        let store = MemoryStore::new();
        let cache = HashCache::new(10);
        let req = Request::new(RequestId::new(), "d".into(), Utc::now(), vec![], None, None);
        let err = link_conversation(&req, &store, &cache, DEFAULT_SUBTASK_WINDOW)
            .await
            .unwrap_err();
        assert!(matches!(err, LinkError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn root_request_has_no_parent_and_no_conversation() {
        let store = MemoryStore::new();
        let cache = HashCache::new(10);
        let req = Request::new(
            RequestId::new(),
            "d".into(),
            Utc::now(),
            vec![msg(Role::User, "hi")],
            None,
            None,
        );
        let result = link_conversation(&req, &store, &cache, DEFAULT_SUBTASK_WINDOW)
            .await
            .unwrap();
        assert!(result.conversation_id.is_none());
        assert_eq!(result.branch_id.as_deref(), Some("main"));
        assert!(result.parent_request_id.is_none());
        assert!(result.current_message_hash.is_some());
        assert!(result.parent_message_hash.is_none());
    }

    #[tokio::test]
    async fn child_inherits_parent_conversation_and_branch() {
        let store = MemoryStore::new();
        let cache = HashCache::new(10);
        let t0 = Utc::now();
        let cid = ConversationId::new();

        let mut parent = Request::new(
            RequestId::new(),
            "d".into(),
            t0,
            vec![msg(Role::User, "hi")],
            None,
            Some(serde_json::json!({"content": [{"type": "text", "text": "hello"}]})),
        );
        parent.current_message_hash =
            current_message_hash(&parent.messages, parent.response_message().as_ref(), None);
        parent.conversation_id = Some(cid);
        parent.branch_id = Some("main".to_string());
        store.insert_request(parent.clone()).await.unwrap();

        let child = Request::new(
            RequestId::new(),
            "d".into(),
            t0 + ChronoDuration::seconds(1),
            vec![msg(Role::User, "hi"), msg(Role::Assistant, "hello"), msg(Role::User, "why?")],
            None,
            None,
        );

        let result = link_conversation(&child, &store, &cache, DEFAULT_SUBTASK_WINDOW)
            .await
            .unwrap();
        assert_eq!(result.conversation_id, Some(cid));
        assert_eq!(result.branch_id.as_deref(), Some("main"));
        assert_eq!(result.parent_request_id, Some(parent.id));
    }
}
