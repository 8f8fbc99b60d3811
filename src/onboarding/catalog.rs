//! Read-only view of the configured onboarding steps.

use std::sync::Arc;

use crate::error::OnboardingError;
use crate::store::LibSqlBackend;

use super::model::{Field, FieldsByStep, Step, StepSchema};

/// Step catalog. Pure reads, no locking.
#[derive(Clone)]
pub struct StepCatalog {
    db: Arc<LibSqlBackend>,
}

impl StepCatalog {
    pub fn new(db: Arc<LibSqlBackend>) -> Self {
        Self { db }
    }

    /// An active step and its fields in display order.
    ///
    /// Unknown and inactive keys are both reported as `StepNotFound`.
    pub async fn get_step_with_fields(
        &self,
        step_key: &str,
    ) -> Result<(Step, Vec<Field>), OnboardingError> {
        let step = self
            .db
            .active_step_by_key(step_key)
            .await?
            .ok_or_else(|| OnboardingError::StepNotFound {
                step_key: step_key.to_string(),
            })?;
        let fields = self.db.fields_for_step(step.step_id).await?;
        Ok((step, fields))
    }

    /// The wire view of [`get_step_with_fields`](Self::get_step_with_fields).
    pub async fn step_schema(&self, step_key: &str) -> Result<StepSchema, OnboardingError> {
        let (step, fields) = self.get_step_with_fields(step_key).await?;
        Ok(StepSchema { step, fields })
    }

    pub async fn all_active_steps_ordered(&self) -> Result<Vec<Step>, OnboardingError> {
        Ok(self.db.active_steps_ordered().await?)
    }

    pub async fn all_active_fields_by_step(&self) -> Result<FieldsByStep, OnboardingError> {
        Ok(self.db.active_fields_by_step().await?)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::onboarding::model::{NewField, NewStep};

    async fn seeded() -> (tempfile::TempDir, Arc<LibSqlBackend>, StepCatalog) {
        let dir = tempfile::tempdir().unwrap();
        let db = Arc::new(
            LibSqlBackend::new_local(&dir.path().join("catalog.db"))
                .await
                .unwrap(),
        );
        for (key, order, active) in [("goals", 2, true), ("about", 1, true), ("legacy", 0, false)] {
            let step = db
                .insert_step(&NewStep {
                    step_key: key.to_string(),
                    title: key.to_string(),
                    order_index: order,
                    is_active: active,
                })
                .await
                .unwrap();
            for (field_key, field_order) in [("second", 2), ("first", 1)] {
                db.insert_field(
                    step.step_id,
                    &NewField {
                        field_key: field_key.to_string(),
                        label: String::new(),
                        input_type: "text".to_string(),
                        required: true,
                        order_index: field_order,
                        metadata: json!({}),
                    },
                )
                .await
                .unwrap();
            }
        }
        let catalog = StepCatalog::new(Arc::clone(&db));
        (dir, db, catalog)
    }

    #[tokio::test]
    async fn active_steps_in_traversal_order() {
        let (_dir, _db, catalog) = seeded().await;
        let keys: Vec<String> = catalog
            .all_active_steps_ordered()
            .await
            .unwrap()
            .into_iter()
            .map(|s| s.step_key)
            .collect();
        assert_eq!(keys, vec!["about", "goals"]);
    }

    #[tokio::test]
    async fn fields_grouped_by_active_step() {
        let (_dir, db, catalog) = seeded().await;
        let steps = catalog.all_active_steps_ordered().await.unwrap();
        let grouped = catalog.all_active_fields_by_step().await.unwrap();

        assert_eq!(grouped.len(), 2);
        for step in &steps {
            let keys: Vec<&str> = grouped[&step.step_id]
                .iter()
                .map(|f| f.field_key.as_str())
                .collect();
            assert_eq!(keys, vec!["first", "second"]);
        }

        db.set_step_active("goals", false).await.unwrap();
        let grouped = catalog.all_active_fields_by_step().await.unwrap();
        assert_eq!(grouped.len(), 1);
        assert!(grouped.contains_key(&steps[0].step_id));
    }

    #[tokio::test]
    async fn inactive_step_is_not_found() {
        let (_dir, _db, catalog) = seeded().await;
        assert!(matches!(
            catalog.get_step_with_fields("legacy").await,
            Err(OnboardingError::StepNotFound { .. })
        ));
        let (step, fields) = catalog.get_step_with_fields("about").await.unwrap();
        assert_eq!(step.step_key, "about");
        assert_eq!(fields.len(), 2);
    }
}
