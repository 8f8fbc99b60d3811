//! Answer validation against a step's field schema.
//!
//! Fields are checked in declared order and the first violation wins; the
//! remaining fields are not inspected.

use serde_json::Value;

use super::model::{lenient_f64, scalar_to_string, AnswerMap, Field, FieldRule};

/// Whether a value counts as "not answered" for required checks.
///
/// `0` and `false` are answers; blank strings and empty containers are not.
pub fn is_empty_value(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => true,
        Some(Value::String(s)) => s.trim().is_empty(),
        Some(Value::Array(items)) => items.is_empty(),
        Some(Value::Object(map)) => map.is_empty(),
        Some(Value::Bool(_)) | Some(Value::Number(_)) => false,
    }
}

/// Drop every submitted key that is not declared on the step.
pub fn retain_declared(answers: &mut AnswerMap, fields: &[Field]) {
    answers.retain(|key, _| fields.iter().any(|f| &f.field_key == key));
}

/// Validate `answers` against `fields`, returning the first violation.
pub fn validate(fields: &[Field], answers: &AnswerMap) -> Result<(), String> {
    for field in fields {
        let value = answers.get(&field.field_key);

        if is_empty_value(value) {
            if field.required {
                return Err(format!("{} is required", field.display_name()));
            }
            continue;
        }

        // Non-empty past this point.
        let Some(value) = value else { continue };
        check_rule(field, value)?;
    }
    Ok(())
}

fn check_rule(field: &Field, value: &Value) -> Result<(), String> {
    let name = field.display_name();
    match &field.rule {
        FieldRule::Choice { options } => {
            let candidate = scalar_to_string(value);
            match candidate {
                Some(c) if options.iter().any(|o| *o == c) => Ok(()),
                _ => Err(format!(
                    "{name} must be one of: {}",
                    options.join(", ")
                )),
            }
        }
        FieldRule::Number { min, max } => {
            let n = lenient_f64(value).ok_or_else(|| format!("{name} must be a number"))?;
            if let Some(min) = min {
                if n < *min {
                    return Err(format!("{name} must be at least {min}"));
                }
            }
            if let Some(max) = max {
                if n > *max {
                    return Err(format!("{name} must be at most {max}"));
                }
            }
            Ok(())
        }
        FieldRule::Checkbox => match value {
            Value::Bool(_) => Ok(()),
            _ => Err(format!("{name} must be true or false")),
        },
        FieldRule::Text {
            min_length,
            max_length,
        } => {
            if min_length.is_none() && max_length.is_none() {
                return Ok(());
            }
            // Scalars are measured in their string form.
            let Some(text) = scalar_to_string(value) else {
                return Err(format!("{name} must be text"));
            };
            let len = text.chars().count();
            if let Some(min) = min_length {
                if len < *min {
                    return Err(format!("{name} must be at least {min} characters"));
                }
            }
            if let Some(max) = max_length {
                if len > *max {
                    return Err(format!("{name} must be at most {max} characters"));
                }
            }
            Ok(())
        }
        FieldRule::Unconstrained => Ok(()),
    }
}
