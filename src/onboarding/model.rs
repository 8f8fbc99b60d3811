//! Onboarding data models: catalog entries, sessions, and wire views.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// The submitted answers for one step, keyed by `field_key`.
pub type AnswerMap = serde_json::Map<String, Value>;

/// Fields of every active step, keyed by `step_id`, each list in display order.
pub type FieldsByStep = HashMap<i64, Vec<Field>>;

/// Stored answers of one session, keyed by `step_id`.
pub type AnswersByStep = HashMap<i64, AnswerMap>;

/// One page of the onboarding questionnaire.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Step {
    pub step_id: i64,
    pub step_key: String,
    pub title: String,
    pub order_index: i64,
    #[serde(skip_serializing)]
    pub is_active: bool,
}

/// Validation rule decoded from a field's `input_type` and `metadata`.
///
/// Decoded once when the field is loaded so validation never probes the raw
/// metadata document.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldRule {
    /// `select` / `radio`: the stringified value must be one of `options`.
    Choice { options: Vec<String> },
    /// `number`: parseable and within the inclusive bounds that are present.
    Number { min: Option<f64>, max: Option<f64> },
    /// `checkbox`: a genuine boolean.
    Checkbox,
    /// `text`: character length within the inclusive bounds that are present.
    Text {
        min_length: Option<usize>,
        max_length: Option<usize>,
    },
    /// Any other input type; only the required check applies.
    Unconstrained,
}

impl FieldRule {
    pub fn decode(input_type: &str, metadata: &Value) -> Self {
        match input_type.trim().to_ascii_lowercase().as_str() {
            "select" | "radio" => FieldRule::Choice {
                options: metadata
                    .get("options")
                    .and_then(Value::as_array)
                    .map(|options| options.iter().filter_map(option_key).collect())
                    .unwrap_or_default(),
            },
            "number" => FieldRule::Number {
                min: metadata.get("min").and_then(lenient_f64),
                max: metadata.get("max").and_then(lenient_f64),
            },
            "checkbox" => FieldRule::Checkbox,
            "text" => FieldRule::Text {
                min_length: meta_lookup(metadata, "minLength", "min_length").and_then(lenient_usize),
                max_length: meta_lookup(metadata, "maxLength", "max_length").and_then(lenient_usize),
            },
            _ => FieldRule::Unconstrained,
        }
    }
}

fn meta_lookup<'a>(metadata: &'a Value, camel: &str, snake: &str) -> Option<&'a Value> {
    metadata.get(camel).or_else(|| metadata.get(snake))
}

/// Option entries are usually `{"key": ..., "label": ...}`; bare scalars are
/// accepted as their own key.
fn option_key(option: &Value) -> Option<String> {
    match option {
        Value::Object(obj) => obj.get("key").and_then(scalar_to_string),
        other => scalar_to_string(other),
    }
}

/// String form of a scalar JSON value. Strings are returned unquoted.
pub fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Numbers, or strings holding a finite number.
pub fn lenient_f64(value: &Value) -> Option<f64> {
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }?;
    parsed.is_finite().then_some(parsed)
}

fn lenient_usize(value: &Value) -> Option<usize> {
    match value {
        Value::Number(n) => n.as_u64().map(|n| n as usize),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// One question within a step.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Field {
    pub field_id: i64,
    pub step_id: i64,
    pub field_key: String,
    pub label: String,
    pub input_type: String,
    pub required: bool,
    pub order_index: i64,
    pub metadata: Value,
    #[serde(skip)]
    pub rule: FieldRule,
}

impl Field {
    /// Name used in validation messages: the label, or the key when unlabelled.
    pub fn display_name(&self) -> &str {
        if self.label.trim().is_empty() {
            &self.field_key
        } else {
            &self.label
        }
    }
}

/// Definition of a step as written by configuration tooling.
#[derive(Debug, Clone, Deserialize)]
pub struct NewStep {
    pub step_key: String,
    pub title: String,
    pub order_index: i64,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

/// Definition of a field as written by configuration tooling.
#[derive(Debug, Clone, Deserialize)]
pub struct NewField {
    pub field_key: String,
    pub label: String,
    pub input_type: String,
    #[serde(default)]
    pub required: bool,
    pub order_index: i64,
    #[serde(default = "empty_object")]
    pub metadata: Value,
}

fn default_true() -> bool {
    true
}

fn empty_object() -> Value {
    Value::Object(serde_json::Map::new())
}

/// One onboarding attempt for a user.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Session {
    pub session_id: Uuid,
    pub user_id: String,
    pub current_step_key: Option<String>,
    pub is_completed: bool,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Derived progress of a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Progress {
    /// Key of the first incomplete step, or `None` when the flow is finished.
    pub current_step_key: Option<String>,
}

impl Progress {
    pub fn is_completed(&self) -> bool {
        self.current_step_key.is_none()
    }
}

/// Outcome of a successful answer submission.
#[derive(Debug, Clone)]
pub struct SaveOutcome {
    pub session: Session,
    pub next_step_key: Option<String>,
    pub completed: bool,
}

// ── Wire views ──────────────────────────────────────────────────────

/// `GetStepSchema` response.
#[derive(Debug, Clone, Serialize)]
pub struct StepSchema {
    pub step: Step,
    pub fields: Vec<Field>,
}

/// `SubmitStepAnswers` response.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitResponse {
    pub session_id: Uuid,
    pub next_step_key: Option<String>,
    pub completed: bool,
}

impl From<&SaveOutcome> for SubmitResponse {
    fn from(outcome: &SaveOutcome) -> Self {
        Self {
            session_id: outcome.session.session_id,
            next_step_key: outcome.next_step_key.clone(),
            completed: outcome.completed,
        }
    }
}

/// `GetStatus` response.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusView {
    /// Whether the user still has to go through onboarding.
    pub required: bool,
    pub completed: bool,
    pub session_id: Option<Uuid>,
    pub current_step_key: Option<String>,
    pub next_step_key: Option<String>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl StatusView {
    /// View for a user whose onboarding is permanently stamped.
    pub fn onboarded(session_id: Option<Uuid>, completed_at: Option<DateTime<Utc>>) -> Self {
        Self {
            required: false,
            completed: true,
            session_id,
            current_step_key: None,
            next_step_key: None,
            completed_at,
        }
    }

    pub fn from_session(session: &Session) -> Self {
        Self {
            required: !session.is_completed,
            completed: session.is_completed,
            session_id: Some(session.session_id),
            current_step_key: session.current_step_key.clone(),
            next_step_key: session.current_step_key.clone(),
            completed_at: session.completed_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn decodes_choice_options_from_objects_and_scalars() {
        let rule = FieldRule::decode(
            "select",
            &json!({"options": [{"key": "lose", "label": "Lose"}, {"key": 3}, "gain"]}),
        );
        assert_eq!(
            rule,
            FieldRule::Choice {
                options: vec!["lose".into(), "3".into(), "gain".into()]
            }
        );
    }

    #[test]
    fn radio_without_options_rejects_everything() {
        assert_eq!(
            FieldRule::decode("radio", &json!({})),
            FieldRule::Choice { options: vec![] }
        );
    }

    #[test]
    fn decodes_number_bounds_leniently() {
        let rule = FieldRule::decode("number", &json!({"min": 13, "max": "100"}));
        assert_eq!(
            rule,
            FieldRule::Number {
                min: Some(13.0),
                max: Some(100.0)
            }
        );
        assert_eq!(
            FieldRule::decode("Number", &json!(null)),
            FieldRule::Number { min: None, max: None }
        );
    }

    #[test]
    fn decodes_text_lengths() {
        let rule = FieldRule::decode("text", &json!({"minLength": 2, "max_length": 10}));
        assert_eq!(
            rule,
            FieldRule::Text {
                min_length: Some(2),
                max_length: Some(10)
            }
        );
    }

    #[test]
    fn unknown_types_are_unconstrained() {
        assert_eq!(FieldRule::decode("date", &json!({})), FieldRule::Unconstrained);
        assert_eq!(FieldRule::decode("checkbox", &json!({})), FieldRule::Checkbox);
    }

    #[test]
    fn status_view_serializes_camel_case() {
        let view = StatusView::onboarded(None, None);
        let json = serde_json::to_value(&view).unwrap();
        assert_eq!(json["required"], false);
        assert_eq!(json["completed"], true);
        assert!(json["currentStepKey"].is_null());
        assert!(json["nextStepKey"].is_null());
        assert!(json.get("sessionId").is_some());
    }

    #[test]
    fn step_schema_hides_internal_columns() {
        let step = Step {
            step_id: 1,
            step_key: "s1".into(),
            title: "About you".into(),
            order_index: 1,
            is_active: true,
        };
        let field = Field {
            field_id: 7,
            step_id: 1,
            field_key: "age".into(),
            label: "Age".into(),
            input_type: "number".into(),
            required: true,
            order_index: 1,
            metadata: json!({"min": 13}),
            rule: FieldRule::decode("number", &json!({"min": 13})),
        };
        let json = serde_json::to_value(StepSchema {
            step,
            fields: vec![field],
        })
        .unwrap();
        assert!(json["step"].get("is_active").is_none());
        assert_eq!(json["step"]["step_key"], "s1");
        assert!(json["fields"][0].get("rule").is_none());
        assert_eq!(json["fields"][0]["metadata"]["min"], 13);
    }
}
