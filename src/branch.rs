// src/branch.rs
// Branch Assigner (§4.5): decide branchId — inherit parent's branch,
// allocate a fresh branch on fan-out, or allocate a subtask/compact branch.

use crate::error::Result;
use crate::model::{self, ConversationId, RequestId};
use crate::resolve::Resolution;
use crate::store::Store;

#[derive(Debug, Clone, Default)]
pub struct BranchAssignment {
    pub conversation_id: Option<ConversationId>,
    pub branch_id: String,
    pub parent_request_id: Option<RequestId>,
    pub subtask_sequence: Option<u64>,
}

/// Assign a branch per the priority order in §4.5. `req_timestamp` is the
/// timestamp of the request being linked; `parent_current_hash` is the hash
/// under which an existing normal/summarization parent's children are
/// indexed (i.e. this request's own `parentMessageHash`).
pub async fn assign_branch(
    req_timestamp: chrono::DateTime<chrono::Utc>,
    parent_current_hash: Option<&str>,
    resolution: &Resolution,
    store: &dyn Store,
) -> Result<BranchAssignment> {
    // Rule 1: compact-continuation.
    if let Some(parent_res) = &resolution.parent {
        if parent_res.kind == crate::resolve::ResolutionKind::CompactContinuation {
            return Ok(BranchAssignment {
                conversation_id: parent_res.parent.conversation_id,
                branch_id: model::branch_id_for_compact(req_timestamp),
                parent_request_id: Some(parent_res.parent.id),
                subtask_sequence: None,
            });
        }
    }

    // Rule 2: subtask.
    if let Some(subtask) = &resolution.subtask {
        let conversation_id = subtask.parent_task_request.conversation_id;
        let sequence = match conversation_id {
            Some(cid) => store.max_subtask_sequence(cid).await? + 1,
            None => 1,
        };
        return Ok(BranchAssignment {
            conversation_id,
            branch_id: model::branch_id_for_subtask(sequence),
            parent_request_id: None,
            subtask_sequence: Some(sequence),
        });
    }

    // Rules 3/4: normal (or summarization-fallback) parent found.
    if let Some(parent_res) = &resolution.parent {
        let parent = &parent_res.parent;
        let parent_branch = parent.branch_id.clone().unwrap_or_else(|| model::MAIN_BRANCH.to_string());

        let has_other_child = match parent_current_hash {
            Some(hash) => {
                let children = store.children_by_parent_hash(hash).await?;
                children.iter().any(|c| c.branch_id.as_deref() == Some(parent_branch.as_str()))
            }
            None => false,
        };

        let branch_id = if has_other_child {
            model::branch_id_for_fork(req_timestamp)
        } else {
            parent_branch
        };

        return Ok(BranchAssignment {
            conversation_id: parent.conversation_id,
            branch_id,
            parent_request_id: Some(parent.id),
            subtask_sequence: None,
        });
    }

    // Rule 5: no parent -> conversation root on "main".
    Ok(BranchAssignment {
        conversation_id: None,
        branch_id: model::MAIN_BRANCH.to_string(),
        parent_request_id: None,
        subtask_sequence: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::{current_message_hash, parent_message_hash};
    use crate::model::{Content, Message, Request, RequestId, Role};
    use crate::resolve::{ParentResolution, ResolutionKind};
    use crate::store::{Store, memory::MemoryStore};
    use chrono::{Duration as ChronoDuration, Utc};

    fn msg(role: Role, text: &str) -> Message {
        Message {
            role,
            content: Content::Text(text.to_string()),
        }
    }

    #[tokio::test]
    async fn root_request_gets_main_branch() {
        let store = MemoryStore::new();
        let resolution = Resolution::default();
        let assignment = assign_branch(Utc::now(), None, &resolution, &store).await.unwrap();
        assert_eq!(assignment.branch_id, "main");
        assert!(assignment.conversation_id.is_none());
    }

    #[tokio::test]
    async fn first_child_inherits_main_second_child_forks() {
        let store = MemoryStore::new();
        let t0 = Utc::now();
        let cid = crate::model::ConversationId::new();

        let mut parent = Request::new(RequestId::new(), "d".into(), t0, vec![msg(Role::User, "hi")], None, None);
        parent.current_message_hash = current_message_hash(&parent.messages, None, None);
        parent.conversation_id = Some(cid);
        parent.branch_id = Some("main".to_string());
        store.insert_request(parent.clone()).await.unwrap();

        let r2_msgs = vec![msg(Role::User, "hi"), msg(Role::Assistant, "hello"), msg(Role::User, "why?")];
        let r2_parent_hash = parent_message_hash(&r2_msgs, None).unwrap();

        let resolution = Resolution {
            parent: Some(ParentResolution {
                parent: parent.clone(),
                kind: ResolutionKind::Normal,
            }),
            subtask: None,
        };

        let first = assign_branch(t0 + ChronoDuration::seconds(1), Some(&r2_parent_hash), &resolution, &store)
            .await
            .unwrap();
        assert_eq!(first.branch_id, "main");

        // Simulate R2 having been linked as the first child on "main".
        let mut r2 = Request::new(RequestId::new(), "d".into(), t0 + ChronoDuration::seconds(1), r2_msgs, None, None);
        r2.parent_message_hash = Some(r2_parent_hash.clone());
        r2.branch_id = Some("main".to_string());
        store.insert_request(r2).await.unwrap();

        let r3_msgs = vec![msg(Role::User, "hi"), msg(Role::Assistant, "hello"), msg(Role::User, "why?!")];
        let r3_parent_hash = parent_message_hash(&r3_msgs, None).unwrap();
        assert_eq!(r3_parent_hash, r2_parent_hash);

        let second = assign_branch(t0 + ChronoDuration::seconds(2), Some(&r3_parent_hash), &resolution, &store)
            .await
            .unwrap();
        assert!(second.branch_id.starts_with("branch_"));
    }
}
