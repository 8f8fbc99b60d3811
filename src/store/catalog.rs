//! Step catalog queries.
//!
//! Plain functions over a `Connection` so the same reads run on the shared
//! read connection and inside a locked onboarding transaction.

use libsql::{Connection, params};

use crate::error::DatabaseError;
use crate::onboarding::model::{Field, FieldsByStep, Step};

use super::rows::{FIELD_COLUMNS, STEP_COLUMNS, row_to_field, row_to_step};

/// Look up an active step by key.
pub(crate) async fn active_step_by_key(
    conn: &Connection,
    step_key: &str,
) -> Result<Option<Step>, DatabaseError> {
    let mut rows = conn
        .query(
            &format!("SELECT {STEP_COLUMNS} FROM onboarding_steps WHERE step_key = ?1 AND is_active = 1"),
            params![step_key],
        )
        .await
        .map_err(|e| DatabaseError::from_libsql("active_step_by_key", e))?;

    match rows.next().await {
        Ok(Some(row)) => {
            let step = row_to_step(&row)
                .map_err(|e| DatabaseError::Query(format!("active_step_by_key row parse: {e}")))?;
            Ok(Some(step))
        }
        Ok(None) => Ok(None),
        Err(e) => Err(DatabaseError::from_libsql("active_step_by_key", e)),
    }
}

/// Fields of one step, ordered by `order_index` then `field_id`.
pub(crate) async fn fields_for_step(
    conn: &Connection,
    step_id: i64,
) -> Result<Vec<Field>, DatabaseError> {
    let mut rows = conn
        .query(
            &format!(
                "SELECT {FIELD_COLUMNS} FROM onboarding_fields WHERE step_id = ?1 ORDER BY order_index ASC, field_id ASC"
            ),
            params![step_id],
        )
        .await
        .map_err(|e| DatabaseError::from_libsql("fields_for_step", e))?;

    let mut fields = Vec::new();
    while let Some(row) = rows
        .next()
        .await
        .map_err(|e| DatabaseError::from_libsql("fields_for_step", e))?
    {
        let field = row_to_field(&row)
            .map_err(|e| DatabaseError::Query(format!("fields_for_step row parse: {e}")))?;
        fields.push(field);
    }
    Ok(fields)
}

/// All active steps in traversal order.
pub(crate) async fn active_steps_ordered(conn: &Connection) -> Result<Vec<Step>, DatabaseError> {
    let mut rows = conn
        .query(
            &format!(
                "SELECT {STEP_COLUMNS} FROM onboarding_steps WHERE is_active = 1 ORDER BY order_index ASC, step_id ASC"
            ),
            (),
        )
        .await
        .map_err(|e| DatabaseError::from_libsql("active_steps_ordered", e))?;

    let mut steps = Vec::new();
    while let Some(row) = rows
        .next()
        .await
        .map_err(|e| DatabaseError::from_libsql("active_steps_ordered", e))?
    {
        let step = row_to_step(&row)
            .map_err(|e| DatabaseError::Query(format!("active_steps_ordered row parse: {e}")))?;
        steps.push(step);
    }
    Ok(steps)
}

/// Fields of every active step in one query, grouped by step and ordered as
/// in [`fields_for_step`].
pub(crate) async fn active_fields_by_step(conn: &Connection) -> Result<FieldsByStep, DatabaseError> {
    let columns = FIELD_COLUMNS
        .split(", ")
        .map(|c| format!("f.{c}"))
        .collect::<Vec<_>>()
        .join(", ");
    let mut rows = conn
        .query(
            &format!(
                "SELECT {columns} FROM onboarding_fields f
                 JOIN onboarding_steps s ON s.step_id = f.step_id
                 WHERE s.is_active = 1
                 ORDER BY f.step_id ASC, f.order_index ASC, f.field_id ASC"
            ),
            (),
        )
        .await
        .map_err(|e| DatabaseError::from_libsql("active_fields_by_step", e))?;

    let mut grouped = FieldsByStep::new();
    while let Some(row) = rows
        .next()
        .await
        .map_err(|e| DatabaseError::from_libsql("active_fields_by_step", e))?
    {
        let field = row_to_field(&row)
            .map_err(|e| DatabaseError::Query(format!("active_fields_by_step row parse: {e}")))?;
        grouped.entry(field.step_id).or_default().push(field);
    }
    Ok(grouped)
}
