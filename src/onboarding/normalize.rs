//! Per-step answer normalizers.
//!
//! A normalizer may rewrite the raw answer map before it is filtered and
//! validated. Normalizers are looked up by `step_key`; steps without one pass
//! through untouched.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use super::model::AnswerMap;

/// Rewrites a step's raw answers in place.
pub trait AnswerNormalizer: Send + Sync {
    fn normalize(&self, answers: &mut AnswerMap);
}

impl<F> AnswerNormalizer for F
where
    F: Fn(&mut AnswerMap) + Send + Sync,
{
    fn normalize(&self, answers: &mut AnswerMap) {
        self(answers)
    }
}

/// Coerces the listed fields to their string form, so that numeric input can
/// match enumerated option keys.
#[derive(Debug, Clone, Default)]
pub struct StringifyFields {
    fields: Vec<String>,
}

impl StringifyFields {
    pub fn new<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            fields: fields.into_iter().map(Into::into).collect(),
        }
    }

    pub fn push(&mut self, field: impl Into<String>) {
        self.fields.push(field.into());
    }
}

impl AnswerNormalizer for StringifyFields {
    fn normalize(&self, answers: &mut AnswerMap) {
        for key in &self.fields {
            if let Some(value) = answers.get_mut(key) {
                let coerced = match value {
                    Value::Number(n) => Some(n.to_string()),
                    Value::Bool(b) => Some(b.to_string()),
                    _ => None,
                };
                if let Some(s) = coerced {
                    *value = Value::String(s);
                }
            }
        }
    }
}

/// Lookup table from `step_key` to its normalizer.
#[derive(Clone, Default)]
pub struct NormalizerRegistry {
    by_step: HashMap<String, Arc<dyn AnswerNormalizer>>,
}

impl NormalizerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry of [`StringifyFields`] normalizers from
    /// `(step_key, field_key)` pairs.
    pub fn from_stringify_pairs(pairs: &[(String, String)]) -> Self {
        let mut grouped: HashMap<&str, StringifyFields> = HashMap::new();
        for (step, field) in pairs {
            grouped.entry(step.as_str()).or_default().push(field.clone());
        }
        let mut registry = Self::new();
        for (step, normalizer) in grouped {
            registry.register(step, normalizer);
        }
        registry
    }

    /// Register (or replace) the normalizer for a step.
    pub fn register(&mut self, step_key: impl Into<String>, normalizer: impl AnswerNormalizer + 'static) {
        self.by_step.insert(step_key.into(), Arc::new(normalizer));
    }

    pub fn get(&self, step_key: &str) -> Option<&Arc<dyn AnswerNormalizer>> {
        self.by_step.get(step_key)
    }

    /// Run the step's normalizer, if one is registered.
    pub fn apply(&self, step_key: &str, answers: &mut AnswerMap) {
        if let Some(normalizer) = self.get(step_key) {
            normalizer.normalize(answers);
        }
    }

    pub fn len(&self) -> usize {
        self.by_step.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_step.is_empty()
    }
}

impl std::fmt::Debug for NormalizerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NormalizerRegistry")
            .field("steps", &self.by_step.keys().collect::<Vec<_>>())
            .finish()
    }
}
