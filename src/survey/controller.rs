//! ConversationController — drives the survey through the question graph,
//! hands the finished form to the job manager, and folds job events back
//! into the transcript.

use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use tokio::sync::{RwLock, broadcast, mpsc};
use tracing::{debug, error, info, warn};

use crate::config::{FlowConfig, MAX_THINKING_DELAY};
use crate::error::{FlowError, JobError};
use crate::jobs::{JobEvent, JobEventKind, JobId, JobManager};

use super::form::{Answer, FormData};
use super::graph::{AnswerShape, InputKind, Next, QuestionGraph, QuestionId, QuestionNode};
use super::payload::{MAX_WEEKLY_BUDGET, parse_budget};
use super::prompts;
use super::state::{ConversationState, ConversationStatus, ConversationView};
use super::transcript::{TranscriptUpdate, Turn};

/// Capacity of the transcript update fan-out.
const UPDATE_CHANNEL_CAPACITY: usize = 256;

/// Work scheduled after the thinking pause.
#[derive(Debug)]
enum Continuation {
    Present(QuestionId),
    Summarize,
}

/// Owns the live conversation. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct ConversationController {
    graph: Arc<QuestionGraph>,
    config: FlowConfig,
    state: Arc<RwLock<ConversationState>>,
    jobs: Arc<JobManager>,
    updates: broadcast::Sender<TranscriptUpdate>,
}

impl ConversationController {
    pub fn new(graph: Arc<QuestionGraph>, jobs: Arc<JobManager>, config: FlowConfig) -> Self {
        let (updates, _) = broadcast::channel(UPDATE_CHANNEL_CAPACITY);
        let state = ConversationState::new(graph.first().id.clone());
        Self {
            graph,
            config,
            state: Arc::new(RwLock::new(state)),
            jobs,
            updates,
        }
    }

    /// Begin the first conversation.
    pub async fn start(&self) -> u64 {
        self.new_conversation().await
    }

    /// Subscribe to transcript changes.
    pub fn subscribe(&self) -> broadcast::Receiver<TranscriptUpdate> {
        self.updates.subscribe()
    }

    pub async fn snapshot(&self) -> ConversationView {
        ConversationView::from(&*self.state.read().await)
    }

    pub async fn status(&self) -> ConversationStatus {
        self.state.read().await.status
    }

    /// Answer the current single-choice, date, or free-text question.
    pub async fn submit_answer(&self, value: &str) -> Result<(), FlowError> {
        self.handle_answer(Answer::Text(value.to_string())).await
    }

    /// Confirm a multi-select. An empty selection is a valid answer.
    pub async fn submit_multi_select(&self, selected: Vec<String>) -> Result<(), FlowError> {
        self.handle_answer(Answer::MultiSelect(selected)).await
    }

    /// Confirm a budget range.
    pub async fn submit_budget_range(&self, min: &str, max: &str) -> Result<(), FlowError> {
        self.handle_answer(Answer::BudgetRange {
            min: min.to_string(),
            max: max.to_string(),
        })
        .await
    }

    /// Record an answer to the current question and schedule what follows.
    ///
    /// A rejected answer leaves the transcript and form untouched.
    pub async fn handle_answer(&self, answer: Answer) -> Result<(), FlowError> {
        let mut state = self.state.write().await;
        if state.status != ConversationStatus::AwaitingAnswer {
            return Err(FlowError::NotAwaitingAnswer {
                status: state.status.to_string(),
            });
        }

        let node = self.graph.lookup(&state.question).inspect_err(|e| {
            error!(question = %state.question, "Question graph is broken: {e}");
        })?;
        validate(node, &answer)?;
        let next = self.graph.resolve_next(&node.id, &answer)?;

        let (target, continuation) = match next {
            Next::Node(id) => (ConversationStatus::PresentingQuestion, Continuation::Present(id)),
            Next::Terminal => (ConversationStatus::Summarizing, Continuation::Summarize),
        };
        state.transition_to(target)?;

        self.append(&mut state, Turn::user(answer.display()));
        state.form.record(&node.id, &answer);
        debug!(
            question = %node.id,
            generation = state.generation,
            next = ?continuation,
            "Answer recorded"
        );

        self.schedule(state.generation, continuation);
        Ok(())
    }

    /// Discard everything and start over at the first question.
    ///
    /// Pending continuations and poll loops of the old generation become
    /// no-ops; a running job is detached, not cancelled.
    pub async fn new_conversation(&self) -> u64 {
        let generation = {
            let mut state = self.state.write().await;
            let first = self.graph.first();
            let generation = state.reset(first.id.clone());
            let _ = self.updates.send(TranscriptUpdate::Reset { generation });
            self.append(&mut state, Turn::assistant(prompts::GREETING));
            self.append(&mut state, Turn::question(first));
            generation
        };
        self.jobs.retire_generation(generation - 1).await;
        info!(generation, "New conversation started");
        generation
    }

    /// Resubmit the retained snapshot after a failed submission.
    ///
    /// The submission runs on its own task, so the caller going away does
    /// not strand the conversation in `Summarizing`.
    pub async fn retry_submission(&self) -> Result<(), FlowError> {
        let (generation, snapshot) = {
            let mut state = self.state.write().await;
            let Some(snapshot) = state.submitted.clone() else {
                return Err(FlowError::NothingToRetry {
                    status: state.status.to_string(),
                });
            };
            if state.status != ConversationStatus::Error {
                return Err(FlowError::NothingToRetry {
                    status: state.status.to_string(),
                });
            }
            state.transition_to(ConversationStatus::Summarizing)?;
            (state.generation, snapshot)
        };
        info!(generation, "Retrying survey submission");
        let this = self.clone();
        tokio::spawn(async move { this.submit_snapshot(generation, snapshot).await });
        Ok(())
    }

    /// Fold a job event into the transcript.
    ///
    /// Events for another generation or another job are ignored.
    pub async fn apply_job_event(&self, event: JobEvent) {
        let mut state = self.state.write().await;
        if event.generation != state.generation {
            debug!(job_id = %event.job_id, generation = event.generation, "Ignoring event from retired generation");
            return;
        }
        if state.active_job.as_deref() != Some(event.job_id.as_str()) {
            // The event may race ahead of the submission response.
            if state.active_job.is_none() && state.status == ConversationStatus::Summarizing {
                self.attach_job(&mut state, event.job_id.clone());
            } else {
                debug!(job_id = %event.job_id, "Ignoring event for inactive job");
                return;
            }
        }
        if state.status != ConversationStatus::AwaitingJob {
            debug!(job_id = %event.job_id, status = %state.status, "Ignoring event after settlement");
            return;
        }

        let content = match event.kind {
            JobEventKind::Progress { stage, percentage } => {
                let Some(id) = state.transcript.progress_turn() else {
                    return;
                };
                let replaced = state
                    .transcript
                    .replace_progress(id, prompts::progress_update(&stage, percentage))
                    .cloned();
                if let Some(turn) = replaced {
                    let _ = self.updates.send(TranscriptUpdate::Replaced { turn });
                }
                return;
            }
            JobEventKind::Succeeded { result } => prompts::analysis_complete(&result),
            JobEventKind::Failed { message, source } => {
                warn!(job_id = %event.job_id, ?source, "Analysis failed: {message}");
                prompts::analysis_failed(&message)
            }
            JobEventKind::TimedOut => prompts::analysis_timed_out(),
        };

        if let Err(e) = state.transition_to(ConversationStatus::Done) {
            warn!(job_id = %event.job_id, "{e}");
            return;
        }
        self.append(&mut state, Turn::assistant(content));
        info!(job_id = %event.job_id, generation = state.generation, "Conversation complete");
    }

    /// Consume job events until the manager goes away.
    pub async fn run_job_events(self, mut events: mpsc::UnboundedReceiver<JobEvent>) {
        while let Some(event) = events.recv().await {
            self.apply_job_event(event).await;
        }
        debug!("Job event stream closed");
    }

    fn thinking_delay(&self) -> Duration {
        self.config.thinking_delay.min(MAX_THINKING_DELAY)
    }

    fn schedule(&self, generation: u64, continuation: Continuation) {
        let this = self.clone();
        let delay = self.thinking_delay();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            match continuation {
                Continuation::Present(id) => this.present(generation, id).await,
                Continuation::Summarize => this.summarize(generation).await,
            }
        });
    }

    async fn present(&self, generation: u64, id: QuestionId) {
        let mut state = self.state.write().await;
        if state.generation != generation || state.status != ConversationStatus::PresentingQuestion {
            debug!(generation, question = %id, "Stale continuation dropped");
            return;
        }
        let node = match self.graph.lookup(&id) {
            Ok(node) => node,
            Err(e) => {
                error!(question = %id, "Question graph is broken: {e}");
                return;
            }
        };
        if let Err(e) = state.transition_to(ConversationStatus::AwaitingAnswer) {
            warn!("{e}");
            return;
        }
        state.question = id;
        self.append(&mut state, Turn::question(node));
    }

    async fn summarize(&self, generation: u64) {
        let snapshot = {
            let mut state = self.state.write().await;
            if state.generation != generation || state.status != ConversationStatus::Summarizing {
                debug!(generation, "Stale summary dropped");
                return;
            }
            let digest = format!("{}\n\n{}", prompts::SUMMARY_INTRO, prompts::summary(&state.form));
            self.append(&mut state, Turn::assistant(digest));
            let snapshot = state.form.clone();
            state.submitted = Some(snapshot.clone());
            snapshot
        };
        self.submit_snapshot(generation, snapshot).await;
    }

    async fn submit_snapshot(&self, generation: u64, snapshot: FormData) {
        let submitted = self.jobs.submit(generation, &snapshot).await;

        let mut state = self.state.write().await;
        if state.generation != generation {
            debug!(generation, "Conversation reset during submission");
            return;
        }
        match submitted {
            Ok(job_id) => {
                if state.active_job.as_deref() != Some(job_id.as_str()) {
                    self.attach_job(&mut state, job_id);
                }
            }
            Err(JobError::AlreadyActive { active, .. }) => {
                debug!(generation, active = %active, "Submission already in flight");
            }
            Err(e) => {
                if let Err(t) = state.transition_to(ConversationStatus::Error) {
                    warn!("{t}");
                    return;
                }
                let reason = match e {
                    JobError::Submission { reason } => reason,
                    other => other.to_string(),
                };
                self.append(&mut state, Turn::assistant(prompts::submission_failed(&reason)));
            }
        }
    }

    fn attach_job(&self, state: &mut ConversationState, job_id: JobId) {
        if let Err(e) = state.transition_to(ConversationStatus::AwaitingJob) {
            warn!(job_id = %job_id, "{e}");
            return;
        }
        info!(job_id = %job_id, generation = state.generation, "Waiting for analysis");
        state.active_job = Some(job_id);
        let turn = state
            .transcript
            .push_progress(Turn::assistant(prompts::progress_queued()))
            .clone();
        let _ = self.updates.send(TranscriptUpdate::Appended { turn });
    }

    fn append(&self, state: &mut ConversationState, turn: Turn) {
        let turn = state.transcript.push(turn).clone();
        let _ = self.updates.send(TranscriptUpdate::Appended { turn });
    }
}

/// Check an answer against the current question's shape.
fn validate(node: &QuestionNode, answer: &Answer) -> Result<(), FlowError> {
    let invalid = |reason: &str| FlowError::Validation {
        question: node.id.clone(),
        reason: reason.to_string(),
    };

    match (&node.shape, answer) {
        (AnswerShape::Choice { options }, Answer::Text(value)) => {
            let value = value.trim();
            if value.is_empty() {
                return Err(invalid("an option must be chosen"));
            }
            if !options.iter().any(|o| o == value) {
                return Err(invalid("answer is not one of the options"));
            }
        }
        (AnswerShape::MultiChoice { options }, Answer::MultiSelect(selected)) => {
            if let Some(unknown) = selected.iter().find(|s| !options.contains(s)) {
                return Err(invalid(&format!("{unknown} is not one of the options")));
            }
        }
        (AnswerShape::Input { field }, Answer::Text(value)) => match field.kind {
            InputKind::Freeform if value.trim().is_empty() => {
                return Err(invalid("answer is empty"));
            }
            InputKind::Freeform => {}
            InputKind::Date => {
                NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d")
                    .map_err(|_| invalid("date must be YYYY-MM-DD"))?;
            }
            InputKind::BudgetRange => return Err(invalid("expected a budget range")),
        },
        (AnswerShape::Input { field }, Answer::BudgetRange { min, max })
            if field.kind == InputKind::BudgetRange =>
        {
            let parse = |bound: &str, name: &str| {
                parse_budget(bound)
                    .filter(|v| *v <= MAX_WEEKLY_BUDGET)
                    .ok_or_else(|| {
                        invalid(&format!("{name} budget must be a whole number up to {MAX_WEEKLY_BUDGET}"))
                    })
            };
            let lo = parse(min, "minimum")?;
            let hi = parse(max, "maximum")?;
            if lo > hi {
                return Err(invalid("minimum budget exceeds maximum"));
            }
        }
        _ => return Err(invalid("answer does not match the question")),
    }
    Ok(())
}
