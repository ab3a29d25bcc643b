//! Error types for Rent Assist.

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Question graph errors. These indicate a broken survey definition, not a
/// runtime condition.
#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    #[error("Question {id} not found")]
    NotFound { id: String },

    #[error("Question {from} points at unknown question {target}")]
    DanglingTarget { from: String, target: String },

    #[error("Question graph has a cycle through {id}")]
    Cycle { id: String },

    #[error("Question graph is empty")]
    Empty,

    #[error("Duplicate question id {id}")]
    Duplicate { id: String },
}

/// Conversation controller errors.
#[derive(Debug, thiserror::Error)]
pub enum FlowError {
    #[error("Invalid answer for {question}: {reason}")]
    Validation { question: String, reason: String },

    #[error("Conversation is not waiting for an answer (status: {status})")]
    NotAwaitingAnswer { status: String },

    #[error("Nothing to retry (status: {status})")]
    NothingToRetry { status: String },

    #[error("Cannot move conversation from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Question graph error: {0}")]
    Graph(#[from] GraphError),
}

/// Job submission and polling errors.
///
/// Timeouts and backend-reported failures are not errors here; they are
/// terminal outcomes of a job and travel as `JobOutcome`.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("Could not create analysis job: {reason}")]
    Submission { reason: String },

    #[error("Job {active} is still running for generation {generation}")]
    AlreadyActive { generation: u64, active: String },

    #[error("Generation {generation} has been retired")]
    StaleGeneration { generation: u64 },

    #[error("Poll of job {id} failed: {reason}")]
    Polling { id: String, reason: String },

    #[error("Job {id} already in state {state}, cannot transition to {target}")]
    InvalidTransition {
        id: String,
        state: String,
        target: String,
    },
}

/// Transport-level errors from the analysis backend. Never shown to the user
/// directly; the job manager translates them into a [`JobError`].
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Backend returned status {status}: {message}")]
    Status { status: u16, message: String },

    #[error("Invalid response from backend: {0}")]
    InvalidResponse(String),

    #[error("Backend rejected the request: {0}")]
    Rejected(String),
}

impl From<reqwest::Error> for BackendError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            Self::InvalidResponse(e.to_string())
        } else {
            Self::Http(e.to_string())
        }
    }
}
