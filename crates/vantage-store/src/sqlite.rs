//! SQLite-backed store.
//!
//! The dedup guarantee lives in SQL: findings are inserted with
//! `INSERT .. ON CONFLICT(id) DO UPDATE`, a single conditional write, so
//! concurrent detector runs can never create two rows for one fingerprint -
//! the second writer merges into the first.
//!
//! All calls are offloaded with `spawn_blocking` to keep SQLite work off the
//! async executors.

use crate::{FindingFilter, Store};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, warn};
use uuid::Uuid;
use vantage_core::execution::{ExecutionRecord, ExecutionStatus, OutcomeSession, SessionStatus};
use vantage_core::finding::{Finding, FindingId};
use vantage_core::types::{Category, EntityType, FindingStatus, Severity};
use vantage_core::{Error, Result};

/// SQLite store handle. Cheap to clone; all clones share one connection.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open (and initialize) the store at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| Error::storage(format!("create store dir: {}", e)))?;
            }
        }
        let conn = Connection::open(path.as_ref())
            .map_err(|e| Error::storage(format!("open database: {}", e)))?;
        Self::init(conn)
    }

    /// In-memory store for tests and dry runs.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| Error::storage(format!("open in-memory database: {}", e)))?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self> {
        // Pragmas tuned for async server usage
        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(store_err)?;
        conn.pragma_update(None, "synchronous", "NORMAL")
            .map_err(store_err)?;
        conn.busy_timeout(std::time::Duration::from_millis(5_000))
            .map_err(store_err)?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS findings (
              id          TEXT PRIMARY KEY,
              scope       TEXT NOT NULL,
              entity_type TEXT NOT NULL,
              entity_id   TEXT NOT NULL,
              category    TEXT NOT NULL,
              severity    TEXT NOT NULL,
              confidence  REAL NOT NULL,
              metrics     TEXT NOT NULL,
              window_size INTEGER NOT NULL,
              status      TEXT NOT NULL,
              linked_id   TEXT,
              source      TEXT NOT NULL,
              approved    INTEGER NOT NULL DEFAULT 0,
              created_at  TEXT NOT NULL,
              updated_at  TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_findings_scope_category
              ON findings(scope, category);
            CREATE INDEX IF NOT EXISTS idx_findings_status ON findings(status);
            CREATE INDEX IF NOT EXISTS idx_findings_linked ON findings(linked_id);

            CREATE TABLE IF NOT EXISTS executions (
              id                 TEXT PRIMARY KEY,
              recommendation_id  TEXT NOT NULL,
              scope              TEXT NOT NULL,
              entity_id          TEXT NOT NULL,
              change_set         TEXT NOT NULL,
              rollback_plan      TEXT NOT NULL,
              status             TEXT NOT NULL,
              error              TEXT,
              dry_run            INTEGER NOT NULL,
              outcome_session_id TEXT,
              created_at         TEXT NOT NULL,
              finished_at        TEXT
            );

            CREATE TABLE IF NOT EXISTS outcome_sessions (
              id           TEXT PRIMARY KEY,
              status       TEXT NOT NULL,
              next_eval_at TEXT NOT NULL,
              body         TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_sessions_due
              ON outcome_sessions(status, next_eval_at);

            CREATE TABLE IF NOT EXISTS agent_checkpoints (
              agent_id   TEXT PRIMARY KEY,
              blob       TEXT NOT NULL,
              updated_at TEXT NOT NULL
            );
            "#,
        )
        .map_err(store_err)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn lock(conn: &Arc<Mutex<Connection>>) -> Result<MutexGuard<'_, Connection>> {
        conn.lock()
            .map_err(|_| Error::storage("store connection mutex poisoned"))
    }

    async fn with_conn<T, F>(&self, op: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let guard = Self::lock(&conn)?;
            op(&guard)
        })
        .await
        .map_err(|e| Error::storage(format!("store task join: {}", e)))?
    }

    fn upsert_sync(conn: &Connection, finding: &Finding) -> Result<Finding> {
        // Linked-parent invariant: the parent must exist and sit earlier in
        // the pipeline.
        if let Some(parent_id) = &finding.linked_id {
            let parent_category: Option<String> = conn
                .query_row(
                    "SELECT category FROM findings WHERE id = ?1",
                    params![parent_id.as_str()],
                    |row| row.get(0),
                )
                .optional()
                .map_err(store_err)?;
            match parent_category {
                None => {
                    return Err(Error::validation(format!(
                        "linked_id {} does not reference an existing finding",
                        parent_id
                    )))
                }
                Some(cat) => {
                    let parent: Category = cat
                        .parse()
                        .map_err(|e: String| Error::storage(e))?;
                    if !finding.category.may_link_to(parent) {
                        return Err(Error::validation(format!(
                            "{} finding may not link to {} parent",
                            finding.category, parent
                        )));
                    }
                }
            }
        }

        let metrics_json = serde_json::to_string(&finding.metrics)?;
        let now = Utc::now();

        // Single conditional write: the second writer always merges into
        // the first. Status, approval and created_at are workflow-owned and
        // never touched by re-detection.
        conn.execute(
            r#"
            INSERT INTO findings (
              id, scope, entity_type, entity_id, category, severity,
              confidence, metrics, window_size, status, linked_id, source,
              approved, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, 0, ?13, ?13)
            ON CONFLICT(id) DO UPDATE SET
              severity   = excluded.severity,
              confidence = excluded.confidence,
              metrics    = excluded.metrics,
              linked_id  = excluded.linked_id,
              updated_at = excluded.updated_at
            "#,
            params![
                finding.id.as_str(),
                finding.scope.as_str(),
                finding.entity_type.as_str(),
                finding.entity_id,
                finding.category.as_str(),
                finding.severity.as_str(),
                finding.confidence,
                metrics_json,
                finding.window_size,
                finding.status.as_str(),
                finding.linked_id.as_ref().map(|id| id.as_str().to_string()),
                finding.source,
                now.to_rfc3339(),
            ],
        )
        .map_err(store_err)?;

        Self::get_sync(conn, &finding.id)?
            .ok_or_else(|| Error::storage("upserted finding vanished"))
    }

    fn get_sync(conn: &Connection, id: &FindingId) -> Result<Option<Finding>> {
        conn.query_row(
            "SELECT id, scope, entity_type, entity_id, category, severity, confidence, \
             metrics, window_size, status, linked_id, source, approved, created_at, updated_at \
             FROM findings WHERE id = ?1",
            params![id.as_str()],
            row_to_finding,
        )
        .optional()
        .map_err(store_err)?
        .transpose()
    }

    fn transition_sync(
        conn: &Connection,
        id: &FindingId,
        new_status: FindingStatus,
    ) -> Result<Finding> {
        let current = Self::get_sync(conn, id)?
            .ok_or_else(|| Error::not_found(format!("finding {}", id)))?;

        if !current.status.can_transition(new_status) {
            return Err(Error::transition(format!(
                "finding {}: {} -> {} is not a legal move",
                id, current.status, new_status
            )));
        }

        // A linked finding may not advance once its parent row is gone
        // (e.g. removed by the external retention job).
        if let Some(parent_id) = &current.linked_id {
            let parent_exists: Option<i64> = conn
                .query_row(
                    "SELECT 1 FROM findings WHERE id = ?1",
                    params![parent_id.as_str()],
                    |row| row.get(0),
                )
                .optional()
                .map_err(store_err)?;
            if parent_exists.is_none() {
                return Err(Error::transition(format!(
                    "finding {}: parent {} no longer exists",
                    id, parent_id
                )));
            }
        }

        conn.execute(
            "UPDATE findings SET status = ?1, updated_at = ?2 WHERE id = ?3",
            params![new_status.as_str(), Utc::now().to_rfc3339(), id.as_str()],
        )
        .map_err(store_err)?;

        debug!(finding = %id, from = %current.status, to = %new_status, "finding transitioned");
        Self::get_sync(conn, id)?
            .ok_or_else(|| Error::storage("transitioned finding vanished"))
    }
}

fn store_err(e: rusqlite::Error) -> Error {
    Error::storage(e.to_string())
}

fn parse_ts(raw: String) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(&raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| Error::storage(format!("bad timestamp {}: {}", raw, e)))
}

#[allow(clippy::type_complexity)]
fn row_to_finding(row: &rusqlite::Row<'_>) -> rusqlite::Result<Result<Finding>> {
    let raw: (
        String,
        String,
        String,
        String,
        String,
        String,
        f64,
        String,
        u32,
        String,
        Option<String>,
        String,
        bool,
        String,
        String,
    ) = (
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
        row.get(7)?,
        row.get(8)?,
        row.get(9)?,
        row.get(10)?,
        row.get(11)?,
        row.get(12)?,
        row.get(13)?,
        row.get(14)?,
    );

    Ok(build_finding(raw))
}

#[allow(clippy::type_complexity)]
fn build_finding(
    raw: (
        String,
        String,
        String,
        String,
        String,
        String,
        f64,
        String,
        u32,
        String,
        Option<String>,
        String,
        bool,
        String,
        String,
    ),
) -> Result<Finding> {
    let (
        id,
        scope,
        entity_type,
        entity_id,
        category,
        severity,
        confidence,
        metrics,
        window_size,
        status,
        linked_id,
        source,
        approved,
        created_at,
        updated_at,
    ) = raw;

    Ok(Finding {
        id: FindingId::from_string(id),
        scope: vantage_core::types::Scope::new(scope),
        entity_type: entity_type
            .parse::<EntityType>()
            .map_err(Error::storage)?,
        entity_id,
        category: category.parse::<Category>().map_err(Error::storage)?,
        severity: severity.parse::<Severity>().map_err(Error::storage)?,
        confidence,
        metrics: serde_json::from_str(&metrics)?,
        window_size,
        status: status.parse::<FindingStatus>().map_err(Error::storage)?,
        linked_id: linked_id.map(FindingId::from_string),
        source,
        approved,
        created_at: parse_ts(created_at)?,
        updated_at: parse_ts(updated_at)?,
    })
}

#[async_trait]
impl Store for SqliteStore {
    async fn upsert(&self, finding: Finding) -> Result<Finding> {
        self.with_conn(move |conn| Self::upsert_sync(conn, &finding))
            .await
    }

    async fn get(&self, id: &FindingId) -> Result<Option<Finding>> {
        let id = id.clone();
        self.with_conn(move |conn| Self::get_sync(conn, &id)).await
    }

    async fn query(&self, filter: FindingFilter) -> Result<Vec<Finding>> {
        self.with_conn(move |conn| {
            let mut sql = String::from(
                "SELECT id, scope, entity_type, entity_id, category, severity, confidence, \
                 metrics, window_size, status, linked_id, source, approved, created_at, \
                 updated_at FROM findings WHERE 1=1",
            );
            let mut params_vec: Vec<rusqlite::types::Value> = Vec::new();

            if let Some(scope) = &filter.scope {
                sql.push_str(" AND scope = ?");
                params_vec.push(scope.as_str().to_string().into());
            }
            if let Some(category) = filter.category {
                sql.push_str(" AND category = ?");
                params_vec.push(category.as_str().to_string().into());
            }
            if let Some(status) = filter.status {
                sql.push_str(" AND status = ?");
                params_vec.push(status.as_str().to_string().into());
            }
            if let Some(entity_id) = &filter.entity_id {
                sql.push_str(" AND entity_id = ?");
                params_vec.push(entity_id.clone().into());
            }
            if let Some(linked) = &filter.linked_id {
                sql.push_str(" AND linked_id = ?");
                params_vec.push(linked.as_str().to_string().into());
            }
            if let Some(approved) = filter.approved {
                sql.push_str(" AND approved = ?");
                params_vec.push((approved as i64).into());
            }
            if let Some(since) = filter.updated_since {
                sql.push_str(" AND updated_at >= ?");
                params_vec.push(since.to_rfc3339().into());
            }
            sql.push_str(" ORDER BY updated_at DESC");
            if let Some(limit) = filter.limit {
                sql.push_str(" LIMIT ?");
                params_vec.push((limit as i64).into());
            }

            let mut stmt = conn.prepare(&sql).map_err(store_err)?;
            let rows = stmt
                .query_map(rusqlite::params_from_iter(params_vec), row_to_finding)
                .map_err(store_err)?;

            let mut findings = Vec::new();
            for row in rows {
                findings.push(row.map_err(store_err)??);
            }
            Ok(findings)
        })
        .await
    }

    async fn transition(&self, id: &FindingId, new_status: FindingStatus) -> Result<Finding> {
        let id = id.clone();
        self.with_conn(move |conn| Self::transition_sync(conn, &id, new_status))
            .await
    }

    async fn reset(&self, id: &FindingId) -> Result<Finding> {
        let id = id.clone();
        self.with_conn(move |conn| {
            let current = Self::get_sync(conn, &id)?
                .ok_or_else(|| Error::not_found(format!("finding {}", id)))?;
            conn.execute(
                "UPDATE findings SET status = ?1, approved = 0, updated_at = ?2 WHERE id = ?3",
                params![
                    FindingStatus::New.as_str(),
                    Utc::now().to_rfc3339(),
                    id.as_str()
                ],
            )
            .map_err(store_err)?;
            warn!(finding = %id, from = %current.status, "administrative reset to new");
            Self::get_sync(conn, &id)?
                .ok_or_else(|| Error::storage("reset finding vanished"))
        })
        .await
    }

    async fn mark_approved(&self, id: &FindingId) -> Result<Finding> {
        let id = id.clone();
        self.with_conn(move |conn| {
            let current = Self::get_sync(conn, &id)?
                .ok_or_else(|| Error::not_found(format!("finding {}", id)))?;
            if current.category != Category::Recommendation {
                return Err(Error::validation(format!(
                    "only recommendations can be approved, {} is a {}",
                    id, current.category
                )));
            }
            conn.execute(
                "UPDATE findings SET approved = 1, updated_at = ?1 WHERE id = ?2",
                params![Utc::now().to_rfc3339(), id.as_str()],
            )
            .map_err(store_err)?;
            Self::get_sync(conn, &id)?
                .ok_or_else(|| Error::storage("approved finding vanished"))
        })
        .await
    }

    async fn insert_execution(&self, record: &ExecutionRecord) -> Result<()> {
        let record = record.clone();
        self.with_conn(move |conn| {
            conn.execute(
                r#"
                INSERT INTO executions (
                  id, recommendation_id, scope, entity_id, change_set,
                  rollback_plan, status, error, dry_run, outcome_session_id,
                  created_at, finished_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
                "#,
                params![
                    record.id.to_string(),
                    record.recommendation_id.as_str(),
                    record.scope.as_str(),
                    record.entity_id,
                    serde_json::to_string(&record.change)?,
                    serde_json::to_string(&record.rollback_plan)?,
                    record.status.as_str(),
                    record.error,
                    record.dry_run,
                    record.outcome_session_id.map(|id| id.to_string()),
                    record.created_at.to_rfc3339(),
                    record.finished_at.map(|ts| ts.to_rfc3339()),
                ],
            )
            .map_err(store_err)?;
            Ok(())
        })
        .await
    }

    async fn update_execution(&self, record: &ExecutionRecord) -> Result<()> {
        let record = record.clone();
        self.with_conn(move |conn| {
            // Records are immutable once terminal.
            let stored_status: Option<String> = conn
                .query_row(
                    "SELECT status FROM executions WHERE id = ?1",
                    params![record.id.to_string()],
                    |row| row.get(0),
                )
                .optional()
                .map_err(store_err)?;
            let stored_status = stored_status
                .ok_or_else(|| Error::not_found(format!("execution {}", record.id)))?;
            let stored: ExecutionStatus =
                stored_status.parse().map_err(Error::storage)?;
            // completed records may still be rolled back; failed and
            // rolled-back records are frozen
            let allowed = match stored {
                ExecutionStatus::Pending => true,
                ExecutionStatus::Completed => record.status == ExecutionStatus::RolledBack,
                ExecutionStatus::Failed | ExecutionStatus::RolledBack => false,
            };
            if !allowed {
                return Err(Error::transition(format!(
                    "execution {} is terminal ({})",
                    record.id,
                    stored.as_str()
                )));
            }

            conn.execute(
                "UPDATE executions SET status = ?1, error = ?2, outcome_session_id = ?3, \
                 finished_at = ?4 WHERE id = ?5",
                params![
                    record.status.as_str(),
                    record.error,
                    record.outcome_session_id.map(|id| id.to_string()),
                    record.finished_at.map(|ts| ts.to_rfc3339()),
                    record.id.to_string(),
                ],
            )
            .map_err(store_err)?;
            Ok(())
        })
        .await
    }

    async fn get_execution(&self, id: Uuid) -> Result<Option<ExecutionRecord>> {
        self.with_conn(move |conn| {
            conn.query_row(
                "SELECT id, recommendation_id, scope, entity_id, change_set, rollback_plan, \
                 status, error, dry_run, outcome_session_id, created_at, finished_at \
                 FROM executions WHERE id = ?1",
                params![id.to_string()],
                row_to_execution,
            )
            .optional()
            .map_err(store_err)?
            .transpose()
        })
        .await
    }

    async fn insert_session(&self, session: &OutcomeSession) -> Result<()> {
        let session = session.clone();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO outcome_sessions (id, status, next_eval_at, body) \
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    session.id.to_string(),
                    session.status.as_str(),
                    session.next_eval_at.to_rfc3339(),
                    serde_json::to_string(&session)?,
                ],
            )
            .map_err(store_err)?;
            Ok(())
        })
        .await
    }

    async fn update_session(&self, session: &OutcomeSession) -> Result<()> {
        let session = session.clone();
        self.with_conn(move |conn| {
            let changed = conn
                .execute(
                    "UPDATE outcome_sessions SET status = ?1, next_eval_at = ?2, body = ?3 \
                     WHERE id = ?4",
                    params![
                        session.status.as_str(),
                        session.next_eval_at.to_rfc3339(),
                        serde_json::to_string(&session)?,
                        session.id.to_string(),
                    ],
                )
                .map_err(store_err)?;
            if changed == 0 {
                return Err(Error::not_found(format!("session {}", session.id)));
            }
            Ok(())
        })
        .await
    }

    async fn get_session(&self, id: Uuid) -> Result<Option<OutcomeSession>> {
        self.with_conn(move |conn| {
            let body: Option<String> = conn
                .query_row(
                    "SELECT body FROM outcome_sessions WHERE id = ?1",
                    params![id.to_string()],
                    |row| row.get(0),
                )
                .optional()
                .map_err(store_err)?;
            body.map(|raw| serde_json::from_str(&raw).map_err(Error::from))
                .transpose()
        })
        .await
    }

    async fn due_sessions(&self, now: DateTime<Utc>) -> Result<Vec<OutcomeSession>> {
        self.with_conn(move |conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT body FROM outcome_sessions \
                     WHERE status = ?1 AND next_eval_at <= ?2 ORDER BY next_eval_at",
                )
                .map_err(store_err)?;
            let rows = stmt
                .query_map(
                    params![SessionStatus::Active.as_str(), now.to_rfc3339()],
                    |row| row.get::<_, String>(0),
                )
                .map_err(store_err)?;

            let mut sessions = Vec::new();
            for row in rows {
                let body = row.map_err(store_err)?;
                sessions.push(serde_json::from_str(&body)?);
            }
            Ok(sessions)
        })
        .await
    }

    async fn save_checkpoint(&self, agent_id: &str, blob: serde_json::Value) -> Result<()> {
        let agent_id = agent_id.to_string();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO agent_checkpoints (agent_id, blob, updated_at) \
                 VALUES (?1, ?2, ?3) \
                 ON CONFLICT(agent_id) DO UPDATE SET \
                   blob = excluded.blob, updated_at = excluded.updated_at",
                params![agent_id, blob.to_string(), Utc::now().to_rfc3339()],
            )
            .map_err(store_err)?;
            Ok(())
        })
        .await
    }

    async fn load_checkpoint(&self, agent_id: &str) -> Result<Option<serde_json::Value>> {
        let agent_id = agent_id.to_string();
        self.with_conn(move |conn| {
            let blob: Option<String> = conn
                .query_row(
                    "SELECT blob FROM agent_checkpoints WHERE agent_id = ?1",
                    params![agent_id],
                    |row| row.get(0),
                )
                .optional()
                .map_err(store_err)?;
            blob.map(|raw| serde_json::from_str(&raw).map_err(Error::from))
                .transpose()
        })
        .await
    }
}

fn row_to_execution(row: &rusqlite::Row<'_>) -> rusqlite::Result<Result<ExecutionRecord>> {
    let id: String = row.get(0)?;
    let recommendation_id: String = row.get(1)?;
    let scope: String = row.get(2)?;
    let entity_id: String = row.get(3)?;
    let change_set: String = row.get(4)?;
    let rollback_plan: String = row.get(5)?;
    let status: String = row.get(6)?;
    let error: Option<String> = row.get(7)?;
    let dry_run: bool = row.get(8)?;
    let outcome_session_id: Option<String> = row.get(9)?;
    let created_at: String = row.get(10)?;
    let finished_at: Option<String> = row.get(11)?;

    Ok((|| {
        Ok(ExecutionRecord {
            id: Uuid::parse_str(&id).map_err(|e| Error::storage(e.to_string()))?,
            recommendation_id: FindingId::from_string(recommendation_id),
            scope: vantage_core::types::Scope::new(scope),
            entity_id,
            change: serde_json::from_str(&change_set)?,
            rollback_plan: serde_json::from_str(&rollback_plan)?,
            status: status.parse().map_err(Error::storage)?,
            error,
            dry_run,
            outcome_session_id: outcome_session_id
                .map(|raw| Uuid::parse_str(&raw))
                .transpose()
                .map_err(|e| Error::storage(e.to_string()))?,
            created_at: parse_ts(created_at)?,
            finished_at: finished_at.map(parse_ts).transpose()?,
        })
    })())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use vantage_core::execution::{ChangeSet, RollbackPlan};
    use vantage_core::types::{MetricValue, Scope};

    fn risk() -> Finding {
        Finding::new(
            Scope::new("sc-domain:example.com"),
            EntityType::Page,
            "/blog/x",
            Category::Risk,
            Severity::High,
            0.9,
            "anomaly",
            7,
        )
        .with_metric("pct_change", -40.0)
    }

    #[tokio::test]
    async fn upsert_then_get_roundtrips() {
        let store = SqliteStore::open_in_memory().unwrap();
        let persisted = store.upsert(risk()).await.unwrap();
        let fetched = store.get(&persisted.id).await.unwrap().unwrap();
        assert_eq!(fetched.id, persisted.id);
        assert_eq!(fetched.status, FindingStatus::New);
        assert_eq!(
            fetched.metrics.get("pct_change"),
            Some(&MetricValue::Number(-40.0))
        );
    }

    #[tokio::test]
    async fn second_upsert_updates_instead_of_duplicating() {
        let store = SqliteStore::open_in_memory().unwrap();
        let first = store.upsert(risk()).await.unwrap();

        let mut again = risk();
        again.confidence = 0.95;
        again.metrics
            .insert("pct_change".to_string(), MetricValue::Number(-45.0));
        let second = store.upsert(again).await.unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(second.confidence, 0.95);

        let all = store.query(FindingFilter::default()).await.unwrap();
        assert_eq!(all.len(), 1);
    }

    #[tokio::test]
    async fn upsert_never_regresses_status() {
        let store = SqliteStore::open_in_memory().unwrap();
        let persisted = store.upsert(risk()).await.unwrap();
        store
            .transition(&persisted.id, FindingStatus::Investigating)
            .await
            .unwrap();

        // A re-detection of the same fingerprint arrives with status New.
        let merged = store.upsert(risk()).await.unwrap();
        assert_eq!(merged.status, FindingStatus::Investigating);
    }

    #[tokio::test]
    async fn concurrent_upserts_leave_one_row() {
        let store = SqliteStore::open_in_memory().unwrap();
        let mut handles = Vec::new();
        for i in 0..8 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                let mut f = risk();
                f.confidence = 0.5 + i as f64 / 100.0;
                store.upsert(f).await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }
        let all = store.query(FindingFilter::default()).await.unwrap();
        assert_eq!(all.len(), 1);
    }

    #[tokio::test]
    async fn illegal_transition_rejected() {
        let store = SqliteStore::open_in_memory().unwrap();
        let persisted = store.upsert(risk()).await.unwrap();
        store
            .transition(&persisted.id, FindingStatus::Resolved)
            .await
            .unwrap();

        let err = store
            .transition(&persisted.id, FindingStatus::New)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Transition(_)));

        // the explicit reset path is the only way back
        let reset = store.reset(&persisted.id).await.unwrap();
        assert_eq!(reset.status, FindingStatus::New);
    }

    #[tokio::test]
    async fn link_to_missing_parent_rejected() {
        let store = SqliteStore::open_in_memory().unwrap();
        let diagnosis = Finding::new(
            Scope::new("s"),
            EntityType::Page,
            "/blog/x",
            Category::Diagnosis,
            Severity::Medium,
            0.8,
            "diagnostician",
            7,
        )
        .with_link(FindingId::from_string("missing"));

        let err = store.upsert(diagnosis).await.unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[tokio::test]
    async fn link_category_order_enforced() {
        let store = SqliteStore::open_in_memory().unwrap();
        let parent = store.upsert(risk()).await.unwrap();

        // a risk may not link to another risk
        let bad = Finding::new(
            Scope::new("s"),
            EntityType::Page,
            "/blog/y",
            Category::Risk,
            Severity::Low,
            0.5,
            "anomaly",
            7,
        )
        .with_link(parent.id.clone());
        assert!(store.upsert(bad).await.is_err());

        // a diagnosis may
        let good = Finding::new(
            Scope::new("s"),
            EntityType::Page,
            "/blog/x",
            Category::Diagnosis,
            Severity::Medium,
            0.8,
            "diagnostician",
            7,
        )
        .with_link(parent.id.clone());
        assert!(store.upsert(good).await.is_ok());
    }

    #[tokio::test]
    async fn approval_only_for_recommendations() {
        let store = SqliteStore::open_in_memory().unwrap();
        let persisted = store.upsert(risk()).await.unwrap();
        assert!(store.mark_approved(&persisted.id).await.is_err());

        let rec = Finding::new(
            Scope::new("s"),
            EntityType::Page,
            "/blog/x",
            Category::Recommendation,
            Severity::High,
            0.9,
            "strategist",
            7,
        );
        let rec = store.upsert(rec).await.unwrap();
        let approved = store.mark_approved(&rec.id).await.unwrap();
        assert!(approved.approved);
    }

    #[tokio::test]
    async fn terminal_execution_record_is_immutable() {
        let store = SqliteStore::open_in_memory().unwrap();
        let mut record = ExecutionRecord::new(
            FindingId::from_string("rec"),
            Scope::new("s"),
            "/x",
            ChangeSet::new(),
            RollbackPlan {
                entity_id: "/x".to_string(),
                pre_state: BTreeMap::new(),
                captured_at: Utc::now(),
            },
            false,
        );
        store.insert_execution(&record).await.unwrap();

        record.complete();
        store.update_execution(&record).await.unwrap();

        // completed may still move to rolled-back
        record.mark_rolled_back();
        store.update_execution(&record).await.unwrap();

        // rolled-back is frozen
        record.fail("late failure");
        let err = store.update_execution(&record).await.unwrap_err();
        assert!(matches!(err, Error::Transition(_)));
    }

    #[tokio::test]
    async fn completed_execution_rejects_non_rollback_updates() {
        let store = SqliteStore::open_in_memory().unwrap();
        let mut record = ExecutionRecord::new(
            FindingId::from_string("rec"),
            Scope::new("s"),
            "/x",
            ChangeSet::new(),
            RollbackPlan {
                entity_id: "/x".to_string(),
                pre_state: BTreeMap::new(),
                captured_at: Utc::now(),
            },
            false,
        );
        store.insert_execution(&record).await.unwrap();
        record.complete();
        store.update_execution(&record).await.unwrap();

        record.fail("too late");
        let err = store.update_execution(&record).await.unwrap_err();
        assert!(matches!(err, Error::Transition(_)));
    }

    #[tokio::test]
    async fn due_sessions_filters_on_schedule() {
        let store = SqliteStore::open_in_memory().unwrap();
        let mut session = OutcomeSession::new(
            Uuid::new_v4(),
            FindingId::from_string("rec"),
            Scope::new("s"),
            "/x",
            BTreeMap::from([("clicks".to_string(), 100.0)]),
            BTreeMap::new(),
            7,
            24,
        );
        store.insert_session(&session).await.unwrap();

        // not yet due
        let due = store.due_sessions(Utc::now()).await.unwrap();
        assert!(due.is_empty());

        session.next_eval_at = Utc::now() - chrono::Duration::minutes(1);
        store.update_session(&session).await.unwrap();
        let due = store.due_sessions(Utc::now()).await.unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].id, session.id);
    }

    #[tokio::test]
    async fn checkpoints_roundtrip() {
        let store = SqliteStore::open_in_memory().unwrap();
        assert!(store.load_checkpoint("watcher").await.unwrap().is_none());

        store
            .save_checkpoint("watcher", serde_json::json!({"last_run": "2026-08-06"}))
            .await
            .unwrap();
        let blob = store.load_checkpoint("watcher").await.unwrap().unwrap();
        assert_eq!(blob["last_run"], "2026-08-06");

        store
            .save_checkpoint("watcher", serde_json::json!({"last_run": "2026-08-07"}))
            .await
            .unwrap();
        let blob = store.load_checkpoint("watcher").await.unwrap().unwrap();
        assert_eq!(blob["last_run"], "2026-08-07");
    }

    #[tokio::test]
    async fn open_on_disk_persists_across_handles() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vantage.sqlite");
        {
            let store = SqliteStore::open(&path).unwrap();
            store.upsert(risk()).await.unwrap();
        }
        let store = SqliteStore::open(&path).unwrap();
        let all = store.query(FindingFilter::default()).await.unwrap();
        assert_eq!(all.len(), 1);
    }
}
