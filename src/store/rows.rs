//! Row mapping helpers shared by the backend and the onboarding transaction.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::DatabaseError;
use crate::onboarding::model::{AnswerMap, Field, FieldRule, Session, Step};

pub(crate) const STEP_COLUMNS: &str = "step_id, step_key, title, order_index, is_active";

pub(crate) const FIELD_COLUMNS: &str =
    "field_id, step_id, field_key, label, input_type, required, order_index, metadata";

pub(crate) const SESSION_COLUMNS: &str =
    "session_id, user_id, current_step_key, is_completed, completed_at, created_at";

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
pub(crate) fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return ndt.and_utc();
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

pub(crate) fn parse_optional_datetime(s: &Option<String>) -> Option<DateTime<Utc>> {
    s.as_ref().map(|s| parse_datetime(s))
}

/// Convert `Option<&str>` to libsql Value.
pub(crate) fn opt_text(s: Option<&str>) -> libsql::Value {
    match s {
        Some(s) => libsql::Value::Text(s.to_string()),
        None => libsql::Value::Null,
    }
}

/// Column order matches STEP_COLUMNS.
pub(crate) fn row_to_step(row: &libsql::Row) -> Result<Step, libsql::Error> {
    Ok(Step {
        step_id: row.get(0)?,
        step_key: row.get(1)?,
        title: row.get(2)?,
        order_index: row.get(3)?,
        is_active: row.get::<i64>(4)? != 0,
    })
}

/// Column order matches FIELD_COLUMNS. The validation rule is decoded here,
/// once per load.
pub(crate) fn row_to_field(row: &libsql::Row) -> Result<Field, libsql::Error> {
    let input_type: String = row.get(4)?;
    let metadata_str: String = row.get::<String>(7).unwrap_or_else(|_| "{}".to_string());
    let metadata: serde_json::Value = serde_json::from_str(&metadata_str).unwrap_or_else(|e| {
        tracing::warn!("Unparseable field metadata, treating as empty: {e}");
        serde_json::json!({})
    });
    let rule = FieldRule::decode(&input_type, &metadata);

    Ok(Field {
        field_id: row.get(0)?,
        step_id: row.get(1)?,
        field_key: row.get(2)?,
        label: row.get::<String>(3).unwrap_or_default(),
        input_type,
        required: row.get::<i64>(5)? != 0,
        order_index: row.get(6)?,
        metadata,
        rule,
    })
}

/// Column order matches SESSION_COLUMNS.
pub(crate) fn row_to_session(row: &libsql::Row) -> Result<Session, libsql::Error> {
    let id_str: String = row.get(0)?;
    let completed_at: Option<String> = row.get(4).ok();
    let created_str: String = row.get(5)?;

    Ok(Session {
        session_id: Uuid::parse_str(&id_str).unwrap_or_else(|_| Uuid::nil()),
        user_id: row.get(1)?,
        current_step_key: row.get(2).ok(),
        is_completed: row.get::<i64>(3)? != 0,
        completed_at: parse_optional_datetime(&completed_at),
        created_at: parse_datetime(&created_str),
    })
}

/// Decode a stored answers document. Anything but an object is a corrupt row.
pub(crate) fn parse_answers(raw: &str) -> Result<AnswerMap, DatabaseError> {
    match serde_json::from_str::<serde_json::Value>(raw) {
        Ok(serde_json::Value::Object(map)) => Ok(map),
        Ok(other) => Err(DatabaseError::Serialization(format!(
            "stored answers are not an object: {other}"
        ))),
        Err(e) => Err(DatabaseError::Serialization(e.to_string())),
    }
}
