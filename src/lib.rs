//! Onboarding engine: multi-step questionnaire progress with per-user
//! session guarantees.

pub mod config;
pub mod error;
pub mod onboarding;
pub mod store;
