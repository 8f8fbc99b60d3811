//! SessionManager: applies answer submissions and resolves status under the
//! per-user mutex.
//!
//! Every operation that reads or creates a session runs inside one locked
//! transaction: lock the user row, resolve the active session, write, recompute
//! progress from the full catalog and answer set, persist, commit. Any failure
//! rolls the whole transaction back.

use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::error::OnboardingError;
use crate::store::{LibSqlBackend, OnboardingTx};

use super::catalog::StepCatalog;
use super::model::{
    AnswerMap, AnswersByStep, SaveOutcome, Session, StatusView, Step, StepSchema, SubmitResponse,
};
use super::normalize::NormalizerRegistry;
use super::progress;
use super::validation;

/// Coordinates onboarding sessions, answers, and progress.
pub struct SessionManager {
    db: Arc<LibSqlBackend>,
    catalog: StepCatalog,
    normalizers: NormalizerRegistry,
}

impl SessionManager {
    pub fn new(db: Arc<LibSqlBackend>, normalizers: NormalizerRegistry) -> Self {
        Self {
            catalog: StepCatalog::new(Arc::clone(&db)),
            db,
            normalizers,
        }
    }

    // ── Transport-facing operations ─────────────────────────────────

    /// `GetStepSchema`.
    pub async fn get_step_schema(&self, step_key: &str) -> Result<StepSchema, OnboardingError> {
        self.catalog.step_schema(step_key).await
    }

    /// `SubmitStepAnswers`.
    pub async fn submit_step_answers(
        &self,
        user_id: &str,
        step_key: &str,
        answers: Value,
    ) -> Result<SubmitResponse, OnboardingError> {
        let outcome = self.save_answer(user_id, step_key, answers).await?;
        Ok(SubmitResponse::from(&outcome))
    }

    // ── Core operations ─────────────────────────────────────────────

    /// Return the user's non-completed session, creating it if absent.
    ///
    /// Concurrent callers for the same user are serialised by the transaction
    /// lock and all observe the same session.
    pub async fn ensure_active_session(&self, user_id: &str) -> Result<Session, OnboardingError> {
        let tx = self.db.begin_locked().await?;
        let result = self.ensure_locked(&tx, user_id).await;
        finish(tx, result).await
    }

    /// Validate and store one step's answers, then recompute progress.
    ///
    /// Nothing is written unless validation passes.
    pub async fn save_answer(
        &self,
        user_id: &str,
        step_key: &str,
        raw_answers: Value,
    ) -> Result<SaveOutcome, OnboardingError> {
        let (step, fields) = self.catalog.get_step_with_fields(step_key).await?;

        let Value::Object(mut answers) = raw_answers else {
            return Err(OnboardingError::InvalidInputShape);
        };
        self.normalizers.apply(&step.step_key, &mut answers);
        validation::retain_declared(&mut answers, &fields);
        validation::validate(&fields, &answers).map_err(OnboardingError::Validation)?;

        let tx = self.db.begin_locked().await?;
        let result = self.save_locked(&tx, user_id, &step, &answers).await;
        let session = finish(tx, result).await?;

        debug!(
            user_id,
            session_id = %session.session_id,
            step_key,
            next_step_key = ?session.current_step_key,
            "Answers saved"
        );
        Ok(SaveOutcome {
            next_step_key: session.current_step_key.clone(),
            completed: session.is_completed,
            session,
        })
    }

    /// Current onboarding status, healing a stale progress pointer on the way.
    ///
    /// Users already stamped as onboarded short-circuit without touching
    /// session storage; later catalog changes are not reconciled for them.
    pub async fn get_status(&self, user_id: &str) -> Result<StatusView, OnboardingError> {
        if let Some(completed_at) = self.db.onboarding_completed_at(user_id).await? {
            return Ok(StatusView::onboarded(None, Some(completed_at)));
        }

        let tx = self.db.begin_locked().await?;
        let result = self.status_locked(&tx, user_id).await;
        finish(tx, result).await
    }

    // ── Locked helpers ──────────────────────────────────────────────

    async fn ensure_locked(
        &self,
        tx: &OnboardingTx,
        user_id: &str,
    ) -> Result<Session, OnboardingError> {
        tx.find_user_for_update(user_id).await?;
        self.active_session_locked(tx, user_id).await
    }

    async fn save_locked(
        &self,
        tx: &OnboardingTx,
        user_id: &str,
        step: &Step,
        answers: &AnswerMap,
    ) -> Result<Session, OnboardingError> {
        let session = self.ensure_locked(tx, user_id).await?;
        tx.upsert_answer(session.session_id, step.step_id, answers)
            .await?;
        let (session, _) = self.recompute_locked(tx, session).await?;
        Ok(session)
    }

    async fn status_locked(
        &self,
        tx: &OnboardingTx,
        user_id: &str,
    ) -> Result<StatusView, OnboardingError> {
        let user = tx.find_user_for_update(user_id).await?;
        if user.onboarding_completed_at.is_some() {
            // Stamped between the unlocked check and taking the lock.
            let latest = tx.latest_completed_session(user_id).await?;
            return Ok(StatusView::onboarded(
                latest.map(|s| s.session_id),
                user.onboarding_completed_at,
            ));
        }

        let session = match tx.find_active_session(user_id).await? {
            Some(session) => session,
            None => match tx.latest_completed_session(user_id).await? {
                Some(done) => {
                    let at = done.completed_at.unwrap_or_else(Utc::now);
                    if tx.mark_onboarding_complete(user_id, at).await? {
                        info!(user_id, session_id = %done.session_id, "Onboarding stamp restored from completed session");
                    }
                    return Ok(StatusView::from_session(&done));
                }
                None => {
                    let first = tx.active_steps_ordered().await?.into_iter().next();
                    let session = tx
                        .insert_session(user_id, first.as_ref().map(|s| s.step_key.as_str()))
                        .await?;
                    info!(user_id, session_id = %session.session_id, "Onboarding session created");
                    session
                }
            },
        };

        let (session, changed) = self.recompute_locked(tx, session).await?;
        if changed {
            info!(
                user_id,
                session_id = %session.session_id,
                current_step_key = ?session.current_step_key,
                "Progress pointer healed"
            );
        }
        Ok(StatusView::from_session(&session))
    }

    /// The user's non-completed session, or a new one seeded with the first
    /// step the user still has to answer. The caller must hold the user lock.
    async fn active_session_locked(
        &self,
        tx: &OnboardingTx,
        user_id: &str,
    ) -> Result<Session, OnboardingError> {
        if let Some(session) = tx.find_active_session(user_id).await? {
            return Ok(session);
        }

        let steps = tx.active_steps_ordered().await?;
        let fields = tx.active_fields_by_step().await?;
        let seed = progress::resolve(&steps, &fields, &AnswersByStep::new());
        let session = tx
            .insert_session(user_id, seed.current_step_key.as_deref())
            .await?;
        info!(user_id, session_id = %session.session_id, "Onboarding session created");
        Ok(session)
    }

    /// Recompute progress from the full catalog and answer set, persist it
    /// when it differs from what is stored, and stamp the user on completion.
    ///
    /// Returns the up-to-date session and whether anything was rewritten.
    async fn recompute_locked(
        &self,
        tx: &OnboardingTx,
        session: Session,
    ) -> Result<(Session, bool), OnboardingError> {
        let steps = tx.active_steps_ordered().await?;
        let fields = tx.active_fields_by_step().await?;
        let answers = tx.answers_for_session(session.session_id).await?;
        let progress = progress::resolve(&steps, &fields, &answers);

        let changed = session.current_step_key != progress.current_step_key
            || session.is_completed != progress.is_completed();
        let session = if changed {
            tx.update_session_progress(&session, &progress).await?
        } else {
            session
        };

        if session.is_completed {
            let at = session.completed_at.unwrap_or_else(Utc::now);
            if tx.mark_onboarding_complete(&session.user_id, at).await? {
                info!(user_id = %session.user_id, session_id = %session.session_id, "Onboarding completed");
            }
        }
        Ok((session, changed))
    }
}

/// Commit on success, roll back on failure.
async fn finish<T>(
    tx: OnboardingTx,
    result: Result<T, OnboardingError>,
) -> Result<T, OnboardingError> {
    match result {
        Ok(value) => {
            tx.commit().await?;
            Ok(value)
        }
        Err(e) => {
            if let Err(rollback_err) = tx.rollback().await {
                warn!("Rollback failed after {e}: {rollback_err}");
            }
            Err(e)
        }
    }
}
