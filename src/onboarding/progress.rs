//! Progress resolution: which step should the user see next?
//!
//! Always computed over the full step/answer set. A later step can be answered
//! before an earlier one, so the step that was just submitted says nothing
//! about overall completion.

use super::model::{AnswerMap, AnswersByStep, Field, FieldsByStep, Progress, Step};
use super::validation::is_empty_value;

/// Whether every required field of a step has a non-empty answer.
pub fn step_is_complete(fields: &[Field], answers: Option<&AnswerMap>) -> bool {
    fields
        .iter()
        .filter(|f| f.required)
        .all(|f| !is_empty_value(answers.and_then(|a| a.get(&f.field_key))))
}

/// First step, in the given order, whose required fields are not all answered.
pub fn first_incomplete<'a>(
    ordered_steps: &'a [Step],
    fields_by_step: &FieldsByStep,
    answers_by_step: &AnswersByStep,
) -> Option<&'a Step> {
    ordered_steps.iter().find(|step| {
        let fields = fields_by_step
            .get(&step.step_id)
            .map(Vec::as_slice)
            .unwrap_or(&[]);
        !step_is_complete(fields, answers_by_step.get(&step.step_id))
    })
}

/// Resolve the progress pointer for a session.
pub fn resolve(
    ordered_steps: &[Step],
    fields_by_step: &FieldsByStep,
    answers_by_step: &AnswersByStep,
) -> Progress {
    Progress {
        current_step_key: first_incomplete(ordered_steps, fields_by_step, answers_by_step)
            .map(|s| s.step_key.clone()),
    }
}
