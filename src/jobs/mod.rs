//! Analysis jobs: submission, polling, and result reconciliation.

pub mod arbiter;
pub mod backend;
pub mod manager;
pub mod state;

pub use arbiter::{OutcomeChannel, ResultArbiter};
pub use backend::{AnalysisBackend, AnalysisResult, HttpBackend, ProgressReport, SubmitReceipt};
pub use manager::{JobEvent, JobEventKind, JobManager};
pub use state::{FailureSource, Job, JobId, JobOutcome, JobStatus};
