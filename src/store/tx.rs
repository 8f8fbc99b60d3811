//! The locked onboarding transaction.
//!
//! Opened with `BEGIN IMMEDIATE`, so the write lock is taken before the first
//! read and held until `commit` or `rollback`. Dropping the transaction
//! without committing discards every change made through it.

use chrono::{DateTime, Utc};
use libsql::{Transaction, params};
use tracing::debug;
use uuid::Uuid;

use crate::error::DatabaseError;
use crate::onboarding::model::{FieldsByStep, Progress, Session, Step};
use crate::store::catalog;
use crate::store::rows::{SESSION_COLUMNS, opt_text, parse_optional_datetime, row_to_session};

/// Identity row as seen by the onboarding core.
#[derive(Debug, Clone, PartialEq)]
pub struct UserRecord {
    pub user_id: String,
    pub onboarding_completed_at: Option<DateTime<Utc>>,
}

/// A write transaction holding the per-user mutex.
pub struct OnboardingTx {
    pub(crate) tx: Transaction,
}

impl OnboardingTx {
    pub(crate) fn new(tx: Transaction) -> Self {
        Self { tx }
    }

    pub async fn commit(self) -> Result<(), DatabaseError> {
        self.tx
            .commit()
            .await
            .map_err(|e| DatabaseError::from_libsql("commit", e))
    }

    pub async fn rollback(self) -> Result<(), DatabaseError> {
        self.tx
            .rollback()
            .await
            .map_err(|e| DatabaseError::from_libsql("rollback", e))
    }

    // ── Identity ────────────────────────────────────────────────────

    /// Read the user row under the transaction's lock, provisioning it on
    /// first contact.
    pub async fn find_user_for_update(&self, user_id: &str) -> Result<UserRecord, DatabaseError> {
        self.tx
            .execute(
                "INSERT OR IGNORE INTO users (user_id, created_at) VALUES (?1, ?2)",
                params![user_id, Utc::now().to_rfc3339()],
            )
            .await
            .map_err(|e| DatabaseError::from_libsql("find_user_for_update", e))?;

        let mut rows = self
            .tx
            .query(
                "SELECT user_id, onboarding_completed_at FROM users WHERE user_id = ?1",
                params![user_id],
            )
            .await
            .map_err(|e| DatabaseError::from_libsql("find_user_for_update", e))?;

        let row = rows
            .next()
            .await
            .map_err(|e| DatabaseError::from_libsql("find_user_for_update", e))?
            .ok_or_else(|| DatabaseError::Query(format!("user {user_id} vanished")))?;
        let stamp: Option<String> = row.get(1).ok();
        Ok(UserRecord {
            user_id: row
                .get(0)
                .map_err(|e| DatabaseError::Query(format!("find_user_for_update row parse: {e}")))?,
            onboarding_completed_at: parse_optional_datetime(&stamp),
        })
    }

    /// Stamp the user as onboarded. An existing stamp is never overwritten.
    pub async fn mark_onboarding_complete(
        &self,
        user_id: &str,
        at: DateTime<Utc>,
    ) -> Result<bool, DatabaseError> {
        let count = self
            .tx
            .execute(
                "UPDATE users SET onboarding_completed_at = ?2
                 WHERE user_id = ?1 AND onboarding_completed_at IS NULL",
                params![user_id, at.to_rfc3339()],
            )
            .await
            .map_err(|e| DatabaseError::from_libsql("mark_onboarding_complete", e))?;
        Ok(count > 0)
    }

    // ── Sessions ────────────────────────────────────────────────────

    /// The user's non-completed session, if any.
    pub async fn find_active_session(&self, user_id: &str) -> Result<Option<Session>, DatabaseError> {
        self.query_one_session(
            &format!(
                "SELECT {SESSION_COLUMNS} FROM onboarding_sessions WHERE user_id = ?1 AND is_completed = 0"
            ),
            user_id,
            "find_active_session",
        )
        .await
    }

    /// The user's most recently created completed session, if any.
    pub async fn latest_completed_session(
        &self,
        user_id: &str,
    ) -> Result<Option<Session>, DatabaseError> {
        self.query_one_session(
            &format!(
                "SELECT {SESSION_COLUMNS} FROM onboarding_sessions WHERE user_id = ?1 AND is_completed = 1
                 ORDER BY created_at DESC, rowid DESC LIMIT 1"
            ),
            user_id,
            "latest_completed_session",
        )
        .await
    }

    async fn query_one_session(
        &self,
        sql: &str,
        user_id: &str,
        op: &str,
    ) -> Result<Option<Session>, DatabaseError> {
        let mut rows = self
            .tx
            .query(sql, params![user_id])
            .await
            .map_err(|e| DatabaseError::from_libsql(op, e))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let session = row_to_session(&row)
                    .map_err(|e| DatabaseError::Query(format!("{op} row parse: {e}")))?;
                Ok(Some(session))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::from_libsql(op, e)),
        }
    }

    /// Create a new, non-completed session.
    pub async fn insert_session(
        &self,
        user_id: &str,
        current_step_key: Option<&str>,
    ) -> Result<Session, DatabaseError> {
        let now = Utc::now();
        let session = Session {
            session_id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            current_step_key: current_step_key.map(str::to_string),
            is_completed: false,
            completed_at: None,
            created_at: now,
        };

        self.tx
            .execute(
                "INSERT INTO onboarding_sessions (session_id, user_id, current_step_key, is_completed, completed_at, created_at, updated_at)
                 VALUES (?1, ?2, ?3, 0, NULL, ?4, ?4)",
                params![
                    session.session_id.to_string(),
                    user_id,
                    opt_text(current_step_key),
                    now.to_rfc3339()
                ],
            )
            .await
            .map_err(|e| DatabaseError::from_libsql("insert_session", e))?;

        debug!(session_id = %session.session_id, user_id, "Session inserted");
        Ok(session)
    }

    /// Persist recomputed progress on a session and return the updated row.
    ///
    /// `completed_at` is set when the session first becomes complete and kept
    /// afterwards.
    pub async fn update_session_progress(
        &self,
        session: &Session,
        progress: &Progress,
    ) -> Result<Session, DatabaseError> {
        let now = Utc::now();
        let completed = progress.is_completed();
        let completed_at = if completed {
            Some(session.completed_at.unwrap_or(now))
        } else {
            None
        };

        self.tx
            .execute(
                "UPDATE onboarding_sessions
                 SET current_step_key = ?2, is_completed = ?3, completed_at = ?4, updated_at = ?5
                 WHERE session_id = ?1",
                params![
                    session.session_id.to_string(),
                    opt_text(progress.current_step_key.as_deref()),
                    completed as i64,
                    opt_text(completed_at.map(|t| t.to_rfc3339()).as_deref()),
                    now.to_rfc3339()
                ],
            )
            .await
            .map_err(|e| DatabaseError::from_libsql("update_session_progress", e))?;

        Ok(Session {
            current_step_key: progress.current_step_key.clone(),
            is_completed: completed,
            completed_at,
            ..session.clone()
        })
    }

    // ── Catalog (read under the same lock) ──────────────────────────

    pub async fn active_steps_ordered(&self) -> Result<Vec<Step>, DatabaseError> {
        catalog::active_steps_ordered(&self.tx).await
    }

    pub async fn active_fields_by_step(&self) -> Result<FieldsByStep, DatabaseError> {
        catalog::active_fields_by_step(&self.tx).await
    }
}
