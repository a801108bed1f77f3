// src/store/sqlite.rs
// rusqlite + deadpool-sqlite backed Store implementation, grounded on
// mira-server's db/pool.rs connection-pool pattern: sync row-mapping
// functions run through `pool.interact`, errors surfaced as LinkError.

use super::{LinkageFields, Store, StreamOptions, StreamPage};
use crate::error::{LinkError, Result};
use crate::model::{ConversationId, Request, RequestId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use deadpool_sqlite::{Config, Pool, Runtime};
use rusqlite::{Connection, OptionalExtension, params};
use std::path::Path;
use std::time::Duration;
use uuid::Uuid;

pub struct SqliteStore {
    pool: Pool,
}

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS requests (
    id TEXT PRIMARY KEY,
    domain TEXT NOT NULL,
    timestamp TEXT NOT NULL,
    messages_json TEXT NOT NULL,
    system_json TEXT,
    response_json TEXT,
    current_message_hash TEXT,
    parent_message_hash TEXT,
    system_hash TEXT,
    conversation_id TEXT,
    branch_id TEXT,
    parent_request_id TEXT,
    is_subtask INTEGER NOT NULL DEFAULT 0,
    parent_task_request_id TEXT,
    message_count INTEGER NOT NULL DEFAULT 0
);
CREATE INDEX IF NOT EXISTS idx_requests_domain_hash
    ON requests(domain, current_message_hash, timestamp);
CREATE INDEX IF NOT EXISTS idx_requests_domain_ts ON requests(domain, timestamp, id);
CREATE INDEX IF NOT EXISTS idx_requests_parent_hash ON requests(parent_message_hash);
CREATE INDEX IF NOT EXISTS idx_requests_conversation ON requests(conversation_id);
"#;

impl SqliteStore {
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let cfg = Config::new(path.as_ref());
        let pool = cfg
            .create_pool(Runtime::Tokio1)
            .map_err(|e| LinkError::Config(format!("failed to create sqlite pool: {e}")))?;
        let conn = pool.get().await?;
        conn.interact(|conn| conn.execute_batch(SCHEMA)).await??;
        Ok(Self { pool })
    }

    pub async fn open_in_memory() -> Result<Self> {
        // Shared-cache URI keeps every pooled connection pointed at the same
        // in-memory database, the same trick mira-server's test fixtures use.
        let uri = format!(
            "file:memdb_{}?mode=memory&cache=shared",
            Uuid::new_v4().simple()
        );
        Self::open(uri).await
    }
}

fn row_to_request(row: &rusqlite::Row) -> rusqlite::Result<Request> {
    let id: String = row.get("id")?;
    let domain: String = row.get("domain")?;
    let timestamp: String = row.get("timestamp")?;
    let messages_json: String = row.get("messages_json")?;
    let system_json: Option<String> = row.get("system_json")?;
    let response_json: Option<String> = row.get("response_json")?;
    let conversation_id: Option<String> = row.get("conversation_id")?;
    let parent_request_id: Option<String> = row.get("parent_request_id")?;
    let parent_task_request_id: Option<String> = row.get("parent_task_request_id")?;

    let to_rusqlite_err =
        |e: String| rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, e.into());

    let messages = serde_json::from_str(&messages_json)
        .map_err(|e| to_rusqlite_err(format!("messages_json: {e}")))?;
    let system = system_json
        .map(|s| serde_json::from_str(&s))
        .transpose()
        .map_err(|e| to_rusqlite_err(format!("system_json: {e}")))?;
    let response_body = response_json
        .map(|s| serde_json::from_str(&s))
        .transpose()
        .map_err(|e| to_rusqlite_err(format!("response_json: {e}")))?;

    Ok(Request {
        id: RequestId(
            Uuid::parse_str(&id).map_err(|e| to_rusqlite_err(format!("id: {e}")))?,
        ),
        domain,
        timestamp: DateTime::parse_from_rfc3339(&timestamp)
            .map_err(|e| to_rusqlite_err(format!("timestamp: {e}")))?
            .with_timezone(&Utc),
        messages,
        system,
        response_body,
        current_message_hash: row.get("current_message_hash")?,
        parent_message_hash: row.get("parent_message_hash")?,
        system_hash: row.get("system_hash")?,
        conversation_id: conversation_id
            .map(|s| Uuid::parse_str(&s).map(ConversationId))
            .transpose()
            .map_err(|e| to_rusqlite_err(format!("conversation_id: {e}")))?,
        branch_id: row.get("branch_id")?,
        parent_request_id: parent_request_id
            .map(|s| Uuid::parse_str(&s).map(RequestId))
            .transpose()
            .map_err(|e| to_rusqlite_err(format!("parent_request_id: {e}")))?,
        is_subtask: row.get::<_, i64>("is_subtask")? != 0,
        parent_task_request_id: parent_task_request_id
            .map(|s| Uuid::parse_str(&s).map(RequestId))
            .transpose()
            .map_err(|e| to_rusqlite_err(format!("parent_task_request_id: {e}")))?,
        message_count: row.get("message_count")?,
    })
}

const SELECT_COLUMNS: &str = "id, domain, timestamp, messages_json, system_json, response_json, \
    current_message_hash, parent_message_hash, system_hash, conversation_id, branch_id, \
    parent_request_id, is_subtask, parent_task_request_id, message_count";

fn insert_request_sync(conn: &Connection, req: &Request) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO requests (
            id, domain, timestamp, messages_json, system_json, response_json,
            current_message_hash, parent_message_hash, system_hash, conversation_id,
            branch_id, parent_request_id, is_subtask, parent_task_request_id, message_count
        ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15)
        ON CONFLICT(id) DO UPDATE SET
            domain=excluded.domain, timestamp=excluded.timestamp,
            messages_json=excluded.messages_json, system_json=excluded.system_json,
            response_json=excluded.response_json",
        params![
            req.id.0.to_string(),
            req.domain,
            req.timestamp.to_rfc3339(),
            serde_json::to_string(&req.messages).unwrap_or_default(),
            req.system.as_ref().map(|s| serde_json::to_string(s).unwrap_or_default()),
            req.response_body.as_ref().map(|b| b.to_string()),
            req.current_message_hash,
            req.parent_message_hash,
            req.system_hash,
            req.conversation_id.map(|c| c.0.to_string()),
            req.branch_id,
            req.parent_request_id.map(|p| p.0.to_string()),
            req.is_subtask as i64,
            req.parent_task_request_id.map(|p| p.0.to_string()),
            req.message_count,
        ],
    )?;
    Ok(())
}

#[async_trait]
impl Store for SqliteStore {
    async fn lookup_by_current_hash(
        &self,
        domain: &str,
        hash: &str,
        before_ts: DateTime<Utc>,
    ) -> Result<Option<Request>> {
        let domain = domain.to_string();
        let hash = hash.to_string();
        let before_ts = before_ts.to_rfc3339();
        let conn = self.pool.get().await?;
        let row = conn
            .interact(move |conn| {
                conn.query_row(
                    &format!(
                        "SELECT {SELECT_COLUMNS} FROM requests
                         WHERE domain = ?1 AND current_message_hash = ?2 AND timestamp < ?3
                         ORDER BY timestamp DESC, id DESC LIMIT 1"
                    ),
                    params![domain, hash, before_ts],
                    row_to_request,
                )
                .optional()
            })
            .await??;
        Ok(row)
    }

    async fn lookup_by_id(&self, id: RequestId) -> Result<Option<Request>> {
        let id = id.0.to_string();
        let conn = self.pool.get().await?;
        let row = conn
            .interact(move |conn| {
                conn.query_row(
                    &format!("SELECT {SELECT_COLUMNS} FROM requests WHERE id = ?1"),
                    params![id],
                    row_to_request,
                )
                .optional()
            })
            .await??;
        Ok(row)
    }

    async fn search_response_containing(
        &self,
        domain: &str,
        text_prefix: &str,
        before_ts: DateTime<Utc>,
    ) -> Result<Vec<Request>> {
        let domain = domain.to_string();
        let pattern = format!("%{}%", text_prefix.replace('%', "").replace('_', ""));
        let before_ts = before_ts.to_rfc3339();
        let conn = self.pool.get().await?;
        let rows = conn
            .interact(move |conn| -> rusqlite::Result<Vec<Request>> {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {SELECT_COLUMNS} FROM requests
                     WHERE domain = ?1 AND timestamp < ?2 AND response_json LIKE ?3
                     ORDER BY timestamp DESC, id DESC LIMIT 50"
                ))?;
                let rows = stmt.query_map(params![domain, before_ts, pattern], row_to_request)?;
                rows.collect()
            })
            .await??;
        Ok(rows)
    }

    async fn find_task_invocations_before(
        &self,
        domain: &str,
        prompt: &str,
        before_ts: DateTime<Utc>,
        window: Duration,
    ) -> Result<Vec<Request>> {
        let domain = domain.to_string();
        let window = chrono::Duration::from_std(window).unwrap_or(chrono::Duration::seconds(30));
        let earliest = (before_ts - window).to_rfc3339();
        let before_ts = before_ts.to_rfc3339();
        let prompt = prompt.to_string();
        let conn = self.pool.get().await?;
        let rows = conn
            .interact(move |conn| -> rusqlite::Result<Vec<Request>> {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {SELECT_COLUMNS} FROM requests
                     WHERE domain = ?1 AND timestamp >= ?2 AND timestamp < ?3
                       AND response_json LIKE '%\"Task\"%'
                     ORDER BY timestamp DESC, id DESC"
                ))?;
                let rows = stmt.query_map(params![domain, earliest, before_ts], row_to_request)?;
                let mut out = Vec::new();
                for r in rows {
                    let r = r?;
                    if r.task_invocations().iter().any(|inv| inv.prompt == prompt) {
                        out.push(r);
                    }
                }
                Ok(out)
            })
            .await??;
        Ok(rows)
    }

    async fn lookup_by_message_only_hash(
        &self,
        domain: &str,
        hash: &str,
        before_ts: DateTime<Utc>,
    ) -> Result<Option<Request>> {
        let domain = domain.to_string();
        let hash = hash.to_string();
        let before_ts_str = before_ts.to_rfc3339();
        let conn = self.pool.get().await?;
        let row = conn
            .interact(move |conn| -> rusqlite::Result<Option<Request>> {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {SELECT_COLUMNS} FROM requests
                     WHERE domain = ?1 AND timestamp < ?2
                     ORDER BY timestamp DESC, id DESC"
                ))?;
                let rows = stmt.query_map(params![domain, before_ts_str], row_to_request)?;
                for r in rows {
                    let r = r?;
                    if crate::hash::message_only_hash(&r.messages).as_deref() == Some(hash.as_str())
                    {
                        return Ok(Some(r));
                    }
                }
                Ok(None)
            })
            .await??;
        Ok(row)
    }

    async fn children_by_parent_hash(&self, hash: &str) -> Result<Vec<Request>> {
        let hash = hash.to_string();
        let conn = self.pool.get().await?;
        let rows = conn
            .interact(move |conn| -> rusqlite::Result<Vec<Request>> {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {SELECT_COLUMNS} FROM requests
                     WHERE parent_message_hash = ?1 ORDER BY timestamp ASC, id ASC"
                ))?;
                let rows = stmt.query_map(params![hash], row_to_request)?;
                rows.collect()
            })
            .await??;
        Ok(rows)
    }

    async fn max_subtask_sequence(&self, conversation_id: ConversationId) -> Result<u64> {
        let cid = conversation_id.0.to_string();
        let conn = self.pool.get().await?;
        let branches: Vec<String> = conn
            .interact(move |conn| -> rusqlite::Result<Vec<String>> {
                let mut stmt = conn.prepare(
                    "SELECT branch_id FROM requests
                     WHERE conversation_id = ?1 AND branch_id LIKE 'subtask\\_%' ESCAPE '\\'",
                )?;
                let rows = stmt.query_map(params![cid], |row| row.get::<_, String>(0))?;
                rows.collect()
            })
            .await??;
        Ok(branches
            .iter()
            .filter_map(|b| b.strip_prefix("subtask_"))
            .filter_map(|n| n.parse::<u64>().ok())
            .max()
            .unwrap_or(0))
    }

    async fn conversation_request_count(&self, conversation_id: ConversationId) -> Result<i64> {
        let cid = conversation_id.0.to_string();
        let conn = self.pool.get().await?;
        let count: i64 = conn
            .interact(move |conn| {
                conn.query_row(
                    "SELECT COUNT(*) FROM requests WHERE conversation_id = ?1",
                    params![cid],
                    |row| row.get(0),
                )
            })
            .await??;
        Ok(count)
    }

    async fn update_linkage(&self, id: RequestId, fields: LinkageFields) -> Result<()> {
        let id_str = id.0.to_string();
        let conn = self.pool.get().await?;
        conn.interact(move |conn| {
            conn.execute(
                "UPDATE requests SET
                    conversation_id = ?2, branch_id = ?3, parent_request_id = ?4,
                    current_message_hash = ?5, parent_message_hash = ?6, system_hash = ?7,
                    is_subtask = ?8, parent_task_request_id = ?9, message_count = ?10
                 WHERE id = ?1",
                params![
                    id_str,
                    fields.conversation_id.map(|c| c.0.to_string()),
                    fields.branch_id,
                    fields.parent_request_id.map(|p| p.0.to_string()),
                    fields.current_message_hash,
                    fields.parent_message_hash,
                    fields.system_hash,
                    fields.is_subtask as i64,
                    fields.parent_task_request_id.map(|p| p.0.to_string()),
                    fields.message_count,
                ],
            )
        })
        .await??;
        Ok(())
    }

    async fn stream_page(&self, opts: &StreamOptions) -> Result<StreamPage> {
        let domain = opts.domain.clone();
        let request_ids: Option<Vec<String>> = opts
            .request_ids
            .clone()
            .map(|ids| ids.iter().map(|i| i.0.to_string()).collect());
        let after = opts.after.map(|(ts, id)| (ts.to_rfc3339(), id.0.to_string()));
        let page_size = opts.page_size.max(1) as i64;

        let conn = self.pool.get().await?;
        let rows = conn
            .interact(move |conn| -> rusqlite::Result<Vec<Request>> {
                let mut sql = format!("SELECT {SELECT_COLUMNS} FROM requests WHERE 1=1");
                let mut args: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();
                if let Some(d) = &domain {
                    sql.push_str(" AND domain = ?");
                    args.push(Box::new(d.clone()));
                }
                if let Some(ids) = &request_ids {
                    let placeholders = ids.iter().map(|_| "?").collect::<Vec<_>>().join(",");
                    sql.push_str(&format!(" AND id IN ({placeholders})"));
                    for id in ids {
                        args.push(Box::new(id.clone()));
                    }
                }
                if let Some((ts, id)) = &after {
                    sql.push_str(" AND (timestamp > ? OR (timestamp = ? AND id > ?))");
                    args.push(Box::new(ts.clone()));
                    args.push(Box::new(ts.clone()));
                    args.push(Box::new(id.clone()));
                }
                sql.push_str(" ORDER BY timestamp ASC, id ASC LIMIT ?");
                args.push(Box::new(page_size));

                let params_ref: Vec<&dyn rusqlite::ToSql> =
                    args.iter().map(|a| a.as_ref()).collect();
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt.query_map(params_ref.as_slice(), row_to_request)?;
                rows.collect()
            })
            .await??;
        Ok(StreamPage { requests: rows })
    }

    async fn insert_request(&self, req: Request) -> Result<()> {
        let conn = self.pool.get().await?;
        conn.interact(move |conn| insert_request_sync(conn, &req))
            .await??;
        Ok(())
    }
}
