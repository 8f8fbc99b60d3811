//! Persistence layer: libSQL-backed storage for the step catalog, users,
//! onboarding sessions, and answers.

mod answers;
mod catalog;
pub mod libsql_backend;
pub mod migrations;
mod rows;
pub mod tx;

pub use libsql_backend::LibSqlBackend;
pub use tx::{OnboardingTx, UserRecord};
