//! Ingestion commands

pub mod cancel_run;
pub mod resume_run;
pub mod set_paused;
pub mod start_run;

pub use cancel_run::{CancelRunCommand, CancelRunResponse};
pub use resume_run::ResumeRunCommand;
pub use set_paused::{SetPausedCommand, SetPausedResponse};
pub use start_run::{StartRunCommand, StartRunResponse};
