//! Ingestion queries

pub mod get_recovery_candidate;
pub mod get_run;
pub mod get_status;
pub mod list_outcomes;

pub use get_recovery_candidate::GetRecoveryCandidateQuery;
pub use get_run::GetRunQuery;
pub use get_status::GetStatusQuery;
pub use list_outcomes::{ListOutcomesQuery, ListOutcomesResponse};
