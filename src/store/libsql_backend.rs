//! libSQL backend: connection handling, catalog reads, and the entry point
//! for locked onboarding transactions.
//!
//! Reads share one long-lived connection. Every write transaction gets a
//! dedicated connection so that concurrent requests never interleave
//! statements inside each other's transaction.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use libsql::{Connection, Database as LibSqlDatabase, TransactionBehavior, params};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::DatabaseError;
use crate::onboarding::model::{
    AnswersByStep, Field, FieldsByStep, NewField, NewStep, Session, Step,
};
use crate::store::rows::{
    FIELD_COLUMNS, SESSION_COLUMNS, STEP_COLUMNS, parse_optional_datetime,
    row_to_field, row_to_session, row_to_step,
};
use crate::store::tx::OnboardingTx;
use crate::store::{answers, catalog, migrations};

/// Default bound on lock waits.
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_millis(5000);

/// libSQL database backend.
pub struct LibSqlBackend {
    db: Arc<LibSqlDatabase>,
    conn: Connection,
    busy_timeout: Duration,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        Self::open(path, DEFAULT_BUSY_TIMEOUT).await
    }

    /// Open (or create) a local database file with an explicit lock-wait bound.
    pub async fn open(path: &Path, busy_timeout: Duration) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    DatabaseError::Pool(format!("Failed to create database directory: {e}"))
                })?;
            }
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
            busy_timeout,
        };
        backend.configure(&backend.conn).await?;
        pragma(&backend.conn, "PRAGMA journal_mode = WAL").await?;
        migrations::run_migrations(&backend.conn).await?;
        info!(path = %path.display(), "Database opened");
        Ok(backend)
    }

    /// Get the shared read connection.
    fn conn(&self) -> &Connection {
        &self.conn
    }

    async fn configure(&self, conn: &Connection) -> Result<(), DatabaseError> {
        pragma(
            conn,
            &format!("PRAGMA busy_timeout = {}", self.busy_timeout.as_millis()),
        )
        .await
    }

    /// Open a dedicated connection.
    async fn connect(&self) -> Result<Connection, DatabaseError> {
        let conn = self
            .db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;
        self.configure(&conn).await?;
        Ok(conn)
    }

    /// Begin a write transaction holding the database write lock until it is
    /// committed or rolled back.
    ///
    /// Waits at most the configured busy timeout for a competing transaction;
    /// a timeout is reported as [`DatabaseError::Busy`].
    pub async fn begin_locked(&self) -> Result<OnboardingTx, DatabaseError> {
        let conn = self.connect().await?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .await
            .map_err(|e| DatabaseError::from_libsql("begin_locked", e))?;
        Ok(OnboardingTx::new(tx))
    }

    // ── Catalog reads ───────────────────────────────────────────────

    pub async fn active_step_by_key(&self, step_key: &str) -> Result<Option<Step>, DatabaseError> {
        catalog::active_step_by_key(self.conn(), step_key).await
    }

    pub async fn fields_for_step(&self, step_id: i64) -> Result<Vec<Field>, DatabaseError> {
        catalog::fields_for_step(self.conn(), step_id).await
    }

    pub async fn active_steps_ordered(&self) -> Result<Vec<Step>, DatabaseError> {
        catalog::active_steps_ordered(self.conn()).await
    }

    pub async fn active_fields_by_step(&self) -> Result<FieldsByStep, DatabaseError> {
        catalog::active_fields_by_step(self.conn()).await
    }

    // ── Catalog writes (configuration tooling) ──────────────────────

    /// Insert a step definition.
    pub async fn insert_step(&self, step: &NewStep) -> Result<Step, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "INSERT INTO onboarding_steps (step_key, title, order_index, is_active)
                     VALUES (?1, ?2, ?3, ?4) RETURNING {STEP_COLUMNS}"
                ),
                params![
                    step.step_key.as_str(),
                    step.title.as_str(),
                    step.order_index,
                    step.is_active as i64
                ],
            )
            .await
            .map_err(|e| DatabaseError::from_libsql("insert_step", e))?;

        let row = rows
            .next()
            .await
            .map_err(|e| DatabaseError::from_libsql("insert_step", e))?
            .ok_or_else(|| DatabaseError::Query("insert_step: no row returned".to_string()))?;
        let inserted = row_to_step(&row)
            .map_err(|e| DatabaseError::Query(format!("insert_step row parse: {e}")))?;
        debug!(step_key = %inserted.step_key, step_id = inserted.step_id, "Step inserted");
        Ok(inserted)
    }

    /// Insert a field definition on an existing step.
    pub async fn insert_field(&self, step_id: i64, field: &NewField) -> Result<Field, DatabaseError> {
        let metadata = serde_json::to_string(&field.metadata)
            .map_err(|e| DatabaseError::Serialization(e.to_string()))?;
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "INSERT INTO onboarding_fields (step_id, field_key, label, input_type, required, order_index, metadata)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7) RETURNING {FIELD_COLUMNS}"
                ),
                params![
                    step_id,
                    field.field_key.as_str(),
                    field.label.as_str(),
                    field.input_type.as_str(),
                    field.required as i64,
                    field.order_index,
                    metadata
                ],
            )
            .await
            .map_err(|e| DatabaseError::from_libsql("insert_field", e))?;

        let row = rows
            .next()
            .await
            .map_err(|e| DatabaseError::from_libsql("insert_field", e))?
            .ok_or_else(|| DatabaseError::Query("insert_field: no row returned".to_string()))?;
        row_to_field(&row).map_err(|e| DatabaseError::Query(format!("insert_field row parse: {e}")))
    }

    /// Activate or deactivate a step. Returns whether the step exists.
    pub async fn set_step_active(&self, step_key: &str, active: bool) -> Result<bool, DatabaseError> {
        let count = self
            .conn()
            .execute(
                "UPDATE onboarding_steps SET is_active = ?1 WHERE step_key = ?2",
                params![active as i64, step_key],
            )
            .await
            .map_err(|e| DatabaseError::from_libsql("set_step_active", e))?;
        Ok(count > 0)
    }

    // ── Identity and session reads ──────────────────────────────────

    /// The user's permanent onboarding stamp, if set. Unknown users have none.
    pub async fn onboarding_completed_at(
        &self,
        user_id: &str,
    ) -> Result<Option<DateTime<Utc>>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT onboarding_completed_at FROM users WHERE user_id = ?1",
                params![user_id],
            )
            .await
            .map_err(|e| DatabaseError::from_libsql("onboarding_completed_at", e))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let stamp: Option<String> = row.get(0).ok();
                Ok(parse_optional_datetime(&stamp))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::from_libsql("onboarding_completed_at", e)),
        }
    }

    pub async fn get_session(&self, session_id: Uuid) -> Result<Option<Session>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {SESSION_COLUMNS} FROM onboarding_sessions WHERE session_id = ?1"),
                params![session_id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::from_libsql("get_session", e))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let session = row_to_session(&row)
                    .map_err(|e| DatabaseError::Query(format!("get_session row parse: {e}")))?;
                Ok(Some(session))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::from_libsql("get_session", e)),
        }
    }

    /// All sessions of a user, oldest first.
    pub async fn sessions_for_user(&self, user_id: &str) -> Result<Vec<Session>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {SESSION_COLUMNS} FROM onboarding_sessions WHERE user_id = ?1 ORDER BY created_at ASC, rowid ASC"
                ),
                params![user_id],
            )
            .await
            .map_err(|e| DatabaseError::from_libsql("sessions_for_user", e))?;

        let mut sessions = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::from_libsql("sessions_for_user", e))?
        {
            match row_to_session(&row) {
                Ok(s) => sessions.push(s),
                Err(e) => tracing::warn!("Skipping session row: {e}"),
            }
        }
        Ok(sessions)
    }

    /// Stored answers of a session, keyed by step id.
    pub async fn answers_for_session(&self, session_id: Uuid) -> Result<AnswersByStep, DatabaseError> {
        answers::load_for_session(self.conn(), session_id).await
    }
}

/// Run a PRAGMA that reports its new value as a row.
async fn pragma(conn: &Connection, sql: &str) -> Result<(), DatabaseError> {
    let mut rows = conn
        .query(sql, ())
        .await
        .map_err(|e| DatabaseError::Pool(format!("{sql}: {e}")))?;
    while let Some(_row) = rows
        .next()
        .await
        .map_err(|e| DatabaseError::Pool(format!("{sql}: {e}")))?
    {}
    Ok(())
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    async fn test_db() -> (tempfile::TempDir, LibSqlBackend) {
        let dir = tempfile::tempdir().unwrap();
        let db = LibSqlBackend::new_local(&dir.path().join("test.db"))
            .await
            .unwrap();
        (dir, db)
    }

    fn new_step(key: &str, order: i64) -> NewStep {
        NewStep {
            step_key: key.to_string(),
            title: format!("Step {key}"),
            order_index: order,
            is_active: true,
        }
    }

    fn new_field(key: &str, order: i64) -> NewField {
        NewField {
            field_key: key.to_string(),
            label: key.to_string(),
            input_type: "text".to_string(),
            required: true,
            order_index: order,
            metadata: json!({"maxLength": 20}),
        }
    }

    #[tokio::test]
    async fn open_creates_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let db_path = tmp.path().join("nested").join("dir").join("test.db");
        let db = LibSqlBackend::new_local(&db_path).await.unwrap();
        assert!(db_path.exists());
        drop(db);
    }

    #[tokio::test]
    async fn steps_are_ordered_and_inactive_ones_hidden() {
        let (_dir, db) = test_db().await;
        db.insert_step(&new_step("b", 2)).await.unwrap();
        db.insert_step(&new_step("a", 1)).await.unwrap();
        db.insert_step(&NewStep {
            is_active: false,
            ..new_step("hidden", 0)
        })
        .await
        .unwrap();

        let keys: Vec<String> = db
            .active_steps_ordered()
            .await
            .unwrap()
            .into_iter()
            .map(|s| s.step_key)
            .collect();
        assert_eq!(keys, vec!["a", "b"]);

        assert!(db.active_step_by_key("hidden").await.unwrap().is_none());
        assert!(db.active_step_by_key("missing").await.unwrap().is_none());
        assert!(db.set_step_active("hidden", true).await.unwrap());
        assert!(db.active_step_by_key("hidden").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn fields_ordered_by_index_then_id() {
        let (_dir, db) = test_db().await;
        let step = db.insert_step(&new_step("s1", 1)).await.unwrap();
        let late = db.insert_field(step.step_id, &new_field("late", 2)).await.unwrap();
        let first = db.insert_field(step.step_id, &new_field("first", 1)).await.unwrap();
        let tie = db.insert_field(step.step_id, &new_field("tie", 1)).await.unwrap();

        let keys: Vec<String> = db
            .fields_for_step(step.step_id)
            .await
            .unwrap()
            .into_iter()
            .map(|f| f.field_key)
            .collect();
        assert_eq!(keys, vec!["first", "tie", "late"]);
        assert!(first.field_id < tie.field_id);
        assert_eq!(late.metadata["maxLength"], 20);

        let grouped = db.active_fields_by_step().await.unwrap();
        let grouped_keys: Vec<&str> = grouped[&step.step_id]
            .iter()
            .map(|f| f.field_key.as_str())
            .collect();
        assert_eq!(grouped_keys, vec!["first", "tie", "late"]);
    }

    #[tokio::test]
    async fn duplicate_field_key_rejected() {
        let (_dir, db) = test_db().await;
        let step = db.insert_step(&new_step("s1", 1)).await.unwrap();
        db.insert_field(step.step_id, &new_field("a", 1)).await.unwrap();
        assert!(db.insert_field(step.step_id, &new_field("a", 2)).await.is_err());
    }

    #[tokio::test]
    async fn unknown_user_has_no_stamp() {
        let (_dir, db) = test_db().await;
        assert!(db.onboarding_completed_at("nobody").await.unwrap().is_none());
        assert!(db.sessions_for_user("nobody").await.unwrap().is_empty());
    }
}
