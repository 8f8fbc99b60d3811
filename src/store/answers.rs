//! Answer storage: one document per (session, step), replaced wholesale on
//! resubmission.

use chrono::Utc;
use libsql::{Connection, params};
use uuid::Uuid;

use crate::error::DatabaseError;
use crate::onboarding::model::{AnswerMap, AnswersByStep};
use crate::store::rows::parse_answers;
use crate::store::tx::OnboardingTx;

impl OnboardingTx {
    /// Insert or wholly replace the answers for `(session_id, step_id)`.
    ///
    /// Runs inside the caller's transaction, so it rolls back with it.
    pub async fn upsert_answer(
        &self,
        session_id: Uuid,
        step_id: i64,
        answers: &AnswerMap,
    ) -> Result<(), DatabaseError> {
        let body = serde_json::to_string(answers)
            .map_err(|e| DatabaseError::Serialization(e.to_string()))?;
        let now = Utc::now().to_rfc3339();

        self.tx
            .execute(
                "INSERT INTO onboarding_answers (session_id, step_id, answers, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?4)
                 ON CONFLICT (session_id, step_id) DO UPDATE SET answers = ?3, updated_at = ?4",
                params![session_id.to_string(), step_id, body, now],
            )
            .await
            .map_err(|e| DatabaseError::from_libsql("upsert_answer", e))?;
        Ok(())
    }

    /// Every stored answer of the session, read under the transaction's lock.
    pub async fn answers_for_session(&self, session_id: Uuid) -> Result<AnswersByStep, DatabaseError> {
        load_for_session(&self.tx, session_id).await
    }
}

/// Stored answers of a session, keyed by step id.
pub(crate) async fn load_for_session(
    conn: &Connection,
    session_id: Uuid,
) -> Result<AnswersByStep, DatabaseError> {
    let mut rows = conn
        .query(
            "SELECT step_id, answers FROM onboarding_answers WHERE session_id = ?1",
            params![session_id.to_string()],
        )
        .await
        .map_err(|e| DatabaseError::from_libsql("answers_for_session", e))?;

    let mut answers = AnswersByStep::new();
    while let Some(row) = rows
        .next()
        .await
        .map_err(|e| DatabaseError::from_libsql("answers_for_session", e))?
    {
        let step_id: i64 = row
            .get(0)
            .map_err(|e| DatabaseError::Query(format!("answers_for_session row parse: {e}")))?;
        let raw: String = row
            .get(1)
            .map_err(|e| DatabaseError::Query(format!("answers_for_session row parse: {e}")))?;
        answers.insert(step_id, parse_answers(&raw)?);
    }
    Ok(answers)
}

#[cfg(test)]
mod tests {
    use serde_json::{Value, json};

    use crate::onboarding::model::NewStep;
    use crate::store::LibSqlBackend;

    use super::*;

    fn answers(value: Value) -> AnswerMap {
        value.as_object().cloned().unwrap()
    }

    async fn setup() -> (tempfile::TempDir, LibSqlBackend, i64) {
        let dir = tempfile::tempdir().unwrap();
        let db = LibSqlBackend::new_local(&dir.path().join("answers.db"))
            .await
            .unwrap();
        let step = db
            .insert_step(&NewStep {
                step_key: "s1".into(),
                title: "One".into(),
                order_index: 1,
                is_active: true,
            })
            .await
            .unwrap();
        (dir, db, step.step_id)
    }

    #[tokio::test]
    async fn resubmission_replaces_wholesale() {
        let (_dir, db, step_id) = setup().await;

        let tx = db.begin_locked().await.unwrap();
        tx.find_user_for_update("u1").await.unwrap();
        let session = tx.insert_session("u1", Some("s1")).await.unwrap();
        tx.upsert_answer(session.session_id, step_id, &answers(json!({"a": 1, "b": 1})))
            .await
            .unwrap();
        tx.upsert_answer(session.session_id, step_id, &answers(json!({"a": 2})))
            .await
            .unwrap();
        let inside = tx.answers_for_session(session.session_id).await.unwrap();
        assert_eq!(Value::Object(inside[&step_id].clone()), json!({"a": 2}));
        tx.commit().await.unwrap();

        let stored = db.answers_for_session(session.session_id).await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(Value::Object(stored[&step_id].clone()), json!({"a": 2}));
    }

    #[tokio::test]
    async fn rollback_discards_answers_and_session() {
        let (_dir, db, step_id) = setup().await;

        let tx = db.begin_locked().await.unwrap();
        tx.find_user_for_update("u1").await.unwrap();
        let session = tx.insert_session("u1", Some("s1")).await.unwrap();
        tx.upsert_answer(session.session_id, step_id, &answers(json!({"a": 1})))
            .await
            .unwrap();
        tx.rollback().await.unwrap();

        assert!(db.get_session(session.session_id).await.unwrap().is_none());
        assert!(db.answers_for_session(session.session_id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn dropped_transaction_leaves_no_trace() {
        let (_dir, db, step_id) = setup().await;
        let session_id = {
            let tx = db.begin_locked().await.unwrap();
            tx.find_user_for_update("u1").await.unwrap();
            let session = tx.insert_session("u1", None).await.unwrap();
            tx.upsert_answer(session.session_id, step_id, &answers(json!({"a": 1})))
                .await
                .unwrap();
            session.session_id
        };

        assert!(db.get_session(session_id).await.unwrap().is_none());
        // The lock is released, so a new transaction can start.
        let tx = db.begin_locked().await.unwrap();
        tx.commit().await.unwrap();
    }
}
