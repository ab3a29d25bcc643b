//! Analysis job state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::JobError;

use super::backend::AnalysisResult;

/// Backend-assigned job identifier.
pub type JobId = String;

/// Status of an analysis job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Accepted by the backend, not yet polled.
    Submitted,
    /// Poll loop running.
    Polling,
    /// Backend delivered a successful result.
    Succeeded,
    /// Backend reported failure, or polling failed persistently.
    Failed,
    /// No terminal outcome within the client-side timeout.
    TimedOut,
}

impl JobStatus {
    /// Check if this status allows transitioning to another status.
    pub fn can_transition_to(&self, target: JobStatus) -> bool {
        use JobStatus::*;

        matches!(
            (self, target),
            (Submitted, Polling)
                // A push or the timeout can win before the first poll.
                | (Submitted, Succeeded)
                | (Submitted, Failed)
                | (Submitted, TimedOut)
                | (Polling, Succeeded)
                | (Polling, Failed)
                | (Polling, TimedOut)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::TimedOut)
    }

    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Submitted => "submitted",
            Self::Polling => "polling",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::TimedOut => "timed_out",
        };
        write!(f, "{s}")
    }
}

/// Why a job failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureSource {
    /// The backend returned `ok = false`.
    Backend,
    /// Polling kept failing at the transport level.
    Network,
}

/// The terminal outcome of a job.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum JobOutcome {
    Succeeded { result: AnalysisResult },
    Failed { message: String, source: FailureSource },
    TimedOut,
}

impl JobOutcome {
    /// Interpret a backend result payload.
    pub fn from_result(result: AnalysisResult) -> Self {
        if result.ok && result.error.is_none() {
            Self::Succeeded { result }
        } else {
            Self::Failed {
                message: result.error.unwrap_or_default(),
                source: FailureSource::Backend,
            }
        }
    }

    pub fn status(&self) -> JobStatus {
        match self {
            Self::Succeeded { .. } => JobStatus::Succeeded,
            Self::Failed { .. } => JobStatus::Failed,
            Self::TimedOut => JobStatus::TimedOut,
        }
    }
}

/// A status transition event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusTransition {
    pub from: JobStatus,
    pub to: JobStatus,
    pub timestamp: DateTime<Utc>,
    pub reason: Option<String>,
}

/// A tracked analysis job.
#[derive(Debug, Clone, Serialize)]
pub struct Job {
    pub id: JobId,
    /// Conversation generation that submitted the job.
    pub generation: u64,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub last_polled_at: Option<DateTime<Utc>>,
    pub poll_attempts: u32,
    pub outcome: Option<JobOutcome>,
    /// Detached from the live conversation; its outcome is never delivered.
    pub detached: bool,
    pub transitions: Vec<StatusTransition>,
}

impl Job {
    pub fn new(id: impl Into<JobId>, generation: u64) -> Self {
        Self {
            id: id.into(),
            generation,
            status: JobStatus::Submitted,
            created_at: Utc::now(),
            last_polled_at: None,
            poll_attempts: 0,
            outcome: None,
            detached: false,
            transitions: Vec::new(),
        }
    }

    pub fn transition_to(&mut self, target: JobStatus, reason: Option<String>) -> Result<(), JobError> {
        if !self.status.can_transition_to(target) {
            return Err(JobError::InvalidTransition {
                id: self.id.clone(),
                state: self.status.to_string(),
                target: target.to_string(),
            });
        }
        self.transitions.push(StatusTransition {
            from: self.status,
            to: target,
            timestamp: Utc::now(),
            reason,
        });
        self.status = target;
        Ok(())
    }

    /// Record a poll attempt, moving `Submitted` to `Polling` on the first.
    pub fn record_poll(&mut self) -> Result<(), JobError> {
        if self.status == JobStatus::Submitted {
            self.transition_to(JobStatus::Polling, Some("First poll".to_string()))?;
        }
        if self.status.is_terminal() {
            return Err(JobError::InvalidTransition {
                id: self.id.clone(),
                state: self.status.to_string(),
                target: JobStatus::Polling.to_string(),
            });
        }
        self.poll_attempts += 1;
        self.last_polled_at = Some(Utc::now());
        Ok(())
    }

    /// Move to the outcome's terminal status and store the outcome.
    pub fn settle(&mut self, outcome: JobOutcome) -> Result<(), JobError> {
        let reason = match &outcome {
            JobOutcome::Failed { message, .. } => Some(message.clone()),
            _ => None,
        };
        self.transition_to(outcome.status(), reason)?;
        self.outcome = Some(outcome);
        Ok(())
    }
}
