//! First-terminal-result-wins arbitration between the poll loop, the push
//! channel, and the timeout.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::debug;

use super::state::JobId;

/// Where a terminal outcome came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeChannel {
    Poll,
    Push,
    Timeout,
}

impl std::fmt::Display for OutcomeChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Poll => write!(f, "poll"),
            Self::Push => write!(f, "push"),
            Self::Timeout => write!(f, "timeout"),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Settlement {
    channel: OutcomeChannel,
    at: DateTime<Utc>,
}

/// Records which result identities have been settled.
///
/// A job has exactly one terminal outcome, so the job id is the result
/// identity. Once claimed, an identity is retired for good.
#[derive(Debug, Default)]
pub struct ResultArbiter {
    settled: HashMap<JobId, Settlement>,
    discarded: u64,
}

impl ResultArbiter {
    /// Claim the terminal outcome for `job_id`. Returns `false` (and logs)
    /// if another channel already won.
    pub fn claim(&mut self, job_id: &str, channel: OutcomeChannel) -> bool {
        if let Some(winner) = self.settled.get(job_id) {
            self.discarded += 1;
            debug!(
                job_id = %job_id,
                channel = %channel,
                winner = %winner.channel,
                settled_at = %winner.at,
                "Discarding duplicate terminal outcome"
            );
            return false;
        }
        self.settled.insert(
            job_id.to_string(),
            Settlement {
                channel,
                at: Utc::now(),
            },
        );
        true
    }

    pub fn is_settled(&self, job_id: &str) -> bool {
        self.settled.contains_key(job_id)
    }

    /// The channel that won for `job_id`, if settled.
    pub fn winner(&self, job_id: &str) -> Option<OutcomeChannel> {
        self.settled.get(job_id).map(|s| s.channel)
    }

    /// Number of late arrivals dropped so far.
    pub fn discarded(&self) -> u64 {
        self.discarded
    }

    /// Drop the record for a job that is no longer tracked.
    pub fn forget(&mut self, job_id: &str) {
        self.settled.remove(job_id);
    }
}
