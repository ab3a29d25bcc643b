//! JobManager — submits survey snapshots, polls them to completion, and
//! reconciles exactly one terminal outcome per job.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, PoisonError};

use serde::Serialize;
use tokio::sync::{Mutex, mpsc};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::config::FlowConfig;
use crate::error::{BackendError, JobError};
use crate::survey::form::FormData;
use crate::survey::payload::SurveyPayload;

use super::arbiter::{OutcomeChannel, ResultArbiter};
use super::backend::{AnalysisBackend, AnalysisResult};
use super::state::{FailureSource, Job, JobId, JobOutcome};

/// An event delivered to the conversation controller.
#[derive(Debug, Clone, Serialize)]
pub struct JobEvent {
    pub job_id: JobId,
    pub generation: u64,
    pub kind: JobEventKind,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobEventKind {
    Progress { stage: String, percentage: f64 },
    Succeeded { result: AnalysisResult },
    Failed { message: String, source: FailureSource },
    TimedOut,
}

impl From<JobOutcome> for JobEventKind {
    fn from(outcome: JobOutcome) -> Self {
        match outcome {
            JobOutcome::Succeeded { result } => Self::Succeeded { result },
            JobOutcome::Failed { message, source } => Self::Failed { message, source },
            JobOutcome::TimedOut => Self::TimedOut,
        }
    }
}

#[derive(Debug, Default)]
struct Registry {
    jobs: HashMap<JobId, Job>,
    arbiter: ResultArbiter,
    /// Generations older than this are retired.
    live_generation: u64,
}

impl Registry {
    fn active_for(&self, generation: u64) -> Option<&Job> {
        self.jobs
            .values()
            .find(|j| j.generation == generation && j.status.is_active() && !j.detached)
    }
}

/// Generations with a submission request in flight.
type PendingSubmissions = Arc<std::sync::Mutex<HashSet<u64>>>;

/// Marks a generation as submitting until dropped, including when the
/// submitting future is dropped mid-request.
struct PendingSubmission {
    pending: PendingSubmissions,
    generation: u64,
}

impl PendingSubmission {
    fn begin(pending: &PendingSubmissions, generation: u64) -> Option<Self> {
        let inserted = pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(generation);
        inserted.then(|| Self {
            pending: Arc::clone(pending),
            generation,
        })
    }
}

impl Drop for PendingSubmission {
    fn drop(&mut self) {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.generation);
    }
}

/// Tracks analysis jobs for the conversation.
pub struct JobManager {
    backend: Arc<dyn AnalysisBackend>,
    config: FlowConfig,
    registry: Mutex<Registry>,
    submitting: PendingSubmissions,
    events: mpsc::UnboundedSender<JobEvent>,
}

impl JobManager {
    /// Create a manager and the receiving end of its event stream.
    pub fn new(
        backend: Arc<dyn AnalysisBackend>,
        config: FlowConfig,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<JobEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let manager = Arc::new(Self {
            backend,
            config,
            registry: Mutex::new(Registry::default()),
            submitting: PendingSubmissions::default(),
            events,
        });
        (manager, rx)
    }

    /// Submit a form snapshot as a new job for `generation`.
    ///
    /// At most one job may be active per generation; a second attempt is
    /// rejected without contacting the backend.
    pub async fn submit(self: &Arc<Self>, generation: u64, form: &FormData) -> Result<JobId, JobError> {
        let pending = {
            let reg = self.registry.lock().await;
            if generation < reg.live_generation {
                return Err(JobError::StaleGeneration { generation });
            }
            if let Some(active) = reg.active_for(generation) {
                return Err(JobError::AlreadyActive {
                    generation,
                    active: active.id.clone(),
                });
            }
            PendingSubmission::begin(&self.submitting, generation).ok_or_else(|| {
                JobError::AlreadyActive {
                    generation,
                    active: "pending submission".to_string(),
                }
            })?
        };

        let payload = SurveyPayload::from_form(form);
        let submitted = self.backend.submit(&payload).await;

        let mut reg = self.registry.lock().await;
        drop(pending);
        let receipt = submitted.map_err(|e| {
            warn!(generation, backend = self.backend.name(), "Survey submission failed: {e}");
            JobError::Submission {
                reason: describe_backend_error(&e),
            }
        })?;

        let job_id = receipt.job_id;
        let mut job = Job::new(job_id.clone(), generation);
        if generation < reg.live_generation {
            // The conversation was reset while the request was in flight.
            job.detached = true;
            reg.jobs.insert(job_id, job);
            return Err(JobError::StaleGeneration { generation });
        }
        reg.jobs.insert(job_id.clone(), job);
        drop(reg);

        info!(job_id = %job_id, generation, "Analysis job submitted");
        self.spawn_poll_loop(job_id.clone());
        Ok(job_id)
    }

    /// Deliver a result that arrived out of band. Returns `true` if it was
    /// the first terminal outcome for the job.
    pub async fn deliver_push(&self, job_id: &str, result: AnalysisResult) -> bool {
        self.settle(job_id, OutcomeChannel::Push, JobOutcome::from_result(result))
            .await
    }

    /// Retire `generation` and everything before it. Their jobs are detached:
    /// poll loops stop at the next tick and outcomes are never delivered.
    /// Jobs are not cancelled on the backend.
    ///
    /// Settled jobs of retired generations are forgotten, as are jobs
    /// detached by an earlier retirement. A job detached here stays known
    /// until the next retirement so a late push is still acknowledged.
    pub async fn retire_generation(&self, generation: u64) {
        let mut reg = self.registry.lock().await;
        if generation < reg.live_generation {
            return;
        }
        let previous = reg.live_generation;
        reg.live_generation = generation + 1;

        let Registry { jobs, arbiter, .. } = &mut *reg;
        jobs.retain(|id, job| {
            let forget = job.generation <= generation
                && (job.status.is_terminal() || job.generation < previous);
            if forget {
                arbiter.forget(id);
            }
            !forget
        });
        for job in jobs.values_mut() {
            if job.generation <= generation && job.status.is_active() && !job.detached {
                job.detached = true;
                info!(job_id = %job.id, generation = job.generation, "Job detached from conversation");
            }
        }
        debug!(
            generation,
            retained = jobs.len(),
            discarded = arbiter.discarded(),
            "Generation retired"
        );
    }

    pub async fn job(&self, job_id: &str) -> Option<Job> {
        self.registry.lock().await.jobs.get(job_id).cloned()
    }

    pub async fn jobs_for_generation(&self, generation: u64) -> Vec<Job> {
        self.registry
            .lock()
            .await
            .jobs
            .values()
            .filter(|j| j.generation == generation)
            .cloned()
            .collect()
    }

    pub async fn active_job(&self, generation: u64) -> Option<Job> {
        self.registry.lock().await.active_for(generation).cloned()
    }

    /// The channel whose outcome settled `job_id`, if any.
    pub async fn settled_by(&self, job_id: &str) -> Option<OutcomeChannel> {
        self.registry.lock().await.arbiter.winner(job_id)
    }

    fn spawn_poll_loop(self: &Arc<Self>, job_id: JobId) {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let deadline = Instant::now() + this.config.job_timeout;
            let settled = tokio::select! {
                biased;
                _ = tokio::time::sleep_until(deadline) => {
                    info!(job_id = %job_id, timeout = ?this.config.job_timeout, "Job timed out");
                    Some((OutcomeChannel::Timeout, JobOutcome::TimedOut))
                }
                outcome = this.poll_until_terminal(&job_id) => outcome,
            };
            if let Some((channel, outcome)) = settled {
                this.settle(&job_id, channel, outcome).await;
            }
            debug!(job_id = %job_id, "Poll loop finished");
        });
    }

    /// Poll until a terminal outcome is observed. Returns `None` when the
    /// loop should stop quietly (settled elsewhere, or detached).
    async fn poll_until_terminal(&self, job_id: &str) -> Option<(OutcomeChannel, JobOutcome)> {
        let mut tick = tokio::time::interval(self.config.poll_interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut consecutive_failures = 0u32;

        loop {
            tick.tick().await;
            if !self.begin_poll(job_id).await {
                return None;
            }

            match self.poll_once(job_id).await {
                Ok(Some(result)) => {
                    return Some((OutcomeChannel::Poll, JobOutcome::from_result(result)));
                }
                Ok(None) => consecutive_failures = 0,
                Err(e) => {
                    consecutive_failures += 1;
                    let err = JobError::Polling {
                        id: job_id.to_string(),
                        reason: e.to_string(),
                    };
                    if consecutive_failures >= self.config.max_consecutive_poll_failures {
                        warn!(
                            job_id = %job_id,
                            failures = consecutive_failures,
                            "Giving up after repeated poll failures: {err}"
                        );
                        return Some((
                            OutcomeChannel::Poll,
                            JobOutcome::Failed {
                                message: format!("无法连接分析服务（{}）", describe_backend_error(&e)),
                                source: FailureSource::Network,
                            },
                        ));
                    }
                    debug!(job_id = %job_id, failures = consecutive_failures, "{err}");
                }
            }
        }
    }

    /// Record a poll attempt. Returns `false` if the job should no longer
    /// be polled.
    async fn begin_poll(&self, job_id: &str) -> bool {
        let mut reg = self.registry.lock().await;
        let Some(job) = reg.jobs.get_mut(job_id) else {
            return false;
        };
        if job.detached || job.status.is_terminal() {
            return false;
        }
        job.record_poll().is_ok()
    }

    /// One progress check, fetching the result once progress reports
    /// completion.
    async fn poll_once(&self, job_id: &str) -> Result<Option<AnalysisResult>, BackendError> {
        let progress = self.backend.get_progress(job_id).await?;
        if !progress.completed {
            self.emit_progress(job_id, progress.stage, progress.percentage)
                .await;
            return Ok(None);
        }
        self.backend.get_result(job_id).await.map(Some)
    }

    async fn emit_progress(&self, job_id: &str, stage: String, percentage: f64) {
        let reg = self.registry.lock().await;
        let Some(job) = reg.jobs.get(job_id) else {
            return;
        };
        if job.detached || reg.arbiter.is_settled(job_id) {
            return;
        }
        self.send(JobEvent {
            job_id: job_id.to_string(),
            generation: job.generation,
            kind: JobEventKind::Progress { stage, percentage },
        });
    }

    /// Record a terminal outcome if it is the first for this job, and
    /// deliver it unless the job has been detached.
    async fn settle(&self, job_id: &str, channel: OutcomeChannel, outcome: JobOutcome) -> bool {
        let mut reg = self.registry.lock().await;
        if !reg.jobs.contains_key(job_id) {
            warn!(job_id = %job_id, channel = %channel, "Outcome for unknown job ignored");
            return false;
        }
        if !reg.arbiter.claim(job_id, channel) {
            return false;
        }
        let Some(job) = reg.jobs.get_mut(job_id) else {
            return false;
        };
        if let Err(e) = job.settle(outcome.clone()) {
            warn!(job_id = %job_id, "Cannot settle job: {e}");
            return false;
        }
        info!(job_id = %job_id, channel = %channel, status = %job.status, "Job settled");

        if job.detached {
            debug!(job_id = %job_id, "Job is detached; outcome not delivered");
            return true;
        }
        let event = JobEvent {
            job_id: job_id.to_string(),
            generation: job.generation,
            kind: outcome.into(),
        };
        self.send(event);
        true
    }

    fn send(&self, event: JobEvent) {
        if self.events.send(event).is_err() {
            debug!("Job event receiver dropped");
        }
    }
}

fn describe_backend_error(e: &BackendError) -> String {
    match e {
        BackendError::Http(_) => "服务器未响应，请稍后重试".to_string(),
        BackendError::Status { status, message } => format!("{status} - {message}"),
        BackendError::InvalidResponse(_) => "服务器返回了无法识别的响应".to_string(),
        BackendError::Rejected(reason) => reason.clone(),
    }
}
