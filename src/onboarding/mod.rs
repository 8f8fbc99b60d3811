//! Onboarding progress engine.
//!
//! Tracks which questionnaire steps a user has completed, what they answered,
//! and which step they should see next. Steps and fields come from the
//! catalog; answers are validated per field, stored one document per
//! (session, step), and progress is always recomputed from the full set.

pub mod catalog;
pub mod manager;
pub mod model;
pub mod normalize;
pub mod progress;
pub mod routes;
pub mod validation;

pub use catalog::StepCatalog;
pub use manager::SessionManager;
pub use model::{
    AnswerMap, Field, FieldRule, NewField, NewStep, SaveOutcome, Session, StatusView, Step,
    StepSchema, SubmitResponse,
};
pub use normalize::{AnswerNormalizer, NormalizerRegistry, StringifyFields};
pub use routes::{OnboardingRouteState, onboarding_routes};
