// src/cli/verify.rs
// `convolink verify`: read-only check of invariants 1-7 (§3, §7
// `IntegrityWarning`), for operational use between rebuilds.

use crate::config::Config;
use crate::model::Request;
use crate::store::{Store, StreamOptions};
use anyhow::Result;
use std::collections::HashMap;
use std::path::PathBuf;

#[derive(Debug)]
struct Violation {
    invariant: &'static str,
    message: String,
}

pub async fn run(domain: Option<String>, db: Option<PathBuf>) -> Result<()> {
    let config = Config::load();
    let db_path = db.unwrap_or(config.db_path);
    let store = crate::store::sqlite::SqliteStore::open(&db_path).await?;

    let mut requests = Vec::new();
    let mut after = None;
    loop {
        let page = store
            .stream_page(&StreamOptions {
                domain: domain.clone(),
                request_ids: None,
                after,
                page_size: 1000,
            })
            .await?;
        if page.requests.is_empty() {
            break;
        }
        after = page
            .requests
            .last()
            .map(|r| (r.timestamp, r.id));
        let shorter = page.requests.len() < 1000;
        requests.extend(page.requests);
        if shorter {
            break;
        }
    }

    let violations = check_invariants(&requests);

    println!("checked {} requests", requests.len());
    if violations.is_empty() {
        println!("no invariant violations found");
    } else {
        for v in &violations {
            println!("[{}] {}", v.invariant, v.message);
        }
        println!("{} violation(s) found", violations.len());
    }

    Ok(())
}

fn check_invariants(requests: &[Request]) -> Vec<Violation> {
    let mut violations = Vec::new();
    let by_id: HashMap<_, _> = requests.iter().map(|r| (r.id, r)).collect();

    let mut domains_by_conversation: HashMap<_, Vec<&str>> = HashMap::new();
    let mut children_by_parent_branch: HashMap<_, u32> = HashMap::new();

    for req in requests {
        // Invariant 1.
        if !req.messages.is_empty() && req.current_message_hash.is_none() {
            violations.push(Violation {
                invariant: "1",
                message: format!("{} has messages but no currentMessageHash", req.id),
            });
        }

        // Invariant 3.
        if let Some(parent_id) = req.parent_request_id {
            match by_id.get(&parent_id) {
                None => violations.push(Violation {
                    invariant: "3",
                    message: format!("{} references missing parent {}", req.id, parent_id),
                }),
                Some(parent) => {
                    if parent.domain != req.domain {
                        violations.push(Violation {
                            invariant: "3",
                            message: format!("{} and its parent {} are in different domains", req.id, parent_id),
                        });
                    }
                    if parent.timestamp >= req.timestamp {
                        violations.push(Violation {
                            invariant: "3",
                            message: format!("{} is not strictly after parent {}", req.id, parent_id),
                        });
                    }
                    let is_special = req.is_subtask
                        || req.branch_id.as_deref().is_some_and(|b| b.starts_with("compact_"));
                    if !is_special
                        && parent.current_message_hash != req.parent_message_hash
                    {
                        violations.push(Violation {
                            invariant: "3",
                            message: format!(
                                "{} parentMessageHash does not match parent {} currentMessageHash",
                                req.id, parent_id
                            ),
                        });
                    }
                }
            }
        }

        // Invariant 4: group domains per conversation.
        if let Some(cid) = req.conversation_id {
            domains_by_conversation
                .entry(cid)
                .or_default()
                .push(req.domain.as_str());
        }

        // Invariant 6: at most one child per (parentRequestId, branchId).
        if let (Some(parent_id), Some(branch)) = (req.parent_request_id, req.branch_id.clone()) {
            *children_by_parent_branch.entry((parent_id, branch)).or_insert(0) += 1;
        }

        // Invariant 7.
        if req.is_subtask {
            match req.parent_task_request_id.and_then(|id| by_id.get(&id)) {
                None => violations.push(Violation {
                    invariant: "7",
                    message: format!("{} is marked subtask but parentTaskRequestId is missing or unresolved", req.id),
                }),
                Some(parent_task) => {
                    let first_user_text = req.messages.first().map(|m| m.text()).unwrap_or_default();
                    let matches = parent_task
                        .task_invocations()
                        .iter()
                        .any(|inv| inv.prompt == first_user_text);
                    if !matches {
                        violations.push(Violation {
                            invariant: "7",
                            message: format!(
                                "{} parentTaskRequestId {} has no matching Task invocation",
                                req.id, parent_task.id
                            ),
                        });
                    }
                }
            }
        } else if req.parent_task_request_id.is_some() {
            violations.push(Violation {
                invariant: "7",
                message: format!("{} has parentTaskRequestId set but isSubtask is false", req.id),
            });
        }
    }

    for (cid, domains) in &domains_by_conversation {
        if domains.iter().any(|d| *d != domains[0]) {
            violations.push(Violation {
                invariant: "4",
                message: format!("conversation {cid} spans multiple domains: {domains:?}"),
            });
        }
    }

    for ((parent_id, branch), count) in &children_by_parent_branch {
        if *count > 1 {
            violations.push(Violation {
                invariant: "6",
                message: format!(
                    "parent {parent_id} has {count} children on branch {branch:?}, expected at most 1"
                ),
            });
        }
    }

    violations
}
