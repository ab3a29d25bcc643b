//! Conversation state machine — tracks where the survey is and what it has
//! collected.

use serde::{Deserialize, Serialize};

use crate::error::FlowError;
use crate::jobs::JobId;

use super::form::FormData;
use super::graph::QuestionId;
use super::transcript::{Transcript, Turn, Widget};

/// Status of the live conversation.
///
/// PresentingQuestion → AwaitingAnswer → (PresentingQuestion | Summarizing)
/// → AwaitingJob → Done, with Summarizing → Error on a failed submission and
/// Error → Summarizing on retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationStatus {
    /// Thinking pause before the next question appears.
    PresentingQuestion,
    AwaitingAnswer,
    /// Thinking pause before the digest, then submission.
    Summarizing,
    AwaitingJob,
    Done,
    /// Submission failed; waiting for a retry or a new conversation.
    Error,
}

impl ConversationStatus {
    pub fn can_transition_to(&self, target: ConversationStatus) -> bool {
        use ConversationStatus::*;
        matches!(
            (self, target),
            (PresentingQuestion, AwaitingAnswer)
                | (AwaitingAnswer, PresentingQuestion)
                | (AwaitingAnswer, Summarizing)
                | (Summarizing, AwaitingJob)
                | (Summarizing, Error)
                | (Error, Summarizing)
                | (AwaitingJob, Done)
        )
    }

    /// Still collecting answers.
    pub fn is_in_progress(&self) -> bool {
        matches!(self, Self::PresentingQuestion | Self::AwaitingAnswer)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done)
    }
}

impl std::fmt::Display for ConversationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::PresentingQuestion => "presenting_question",
            Self::AwaitingAnswer => "awaiting_answer",
            Self::Summarizing => "summarizing",
            Self::AwaitingJob => "awaiting_job",
            Self::Done => "done",
            Self::Error => "error",
        };
        write!(f, "{s}")
    }
}

/// Everything the controller owns for one conversation.
#[derive(Debug, Clone)]
pub struct ConversationState {
    /// Question being presented or answered. After the last answer this is
    /// the last question asked.
    pub question: QuestionId,
    pub transcript: Transcript,
    pub form: FormData,
    pub generation: u64,
    pub status: ConversationStatus,
    pub active_job: Option<JobId>,
    /// Form as submitted, kept for a retry after a failed submission.
    pub submitted: Option<FormData>,
}

impl ConversationState {
    pub fn new(first: QuestionId) -> Self {
        Self {
            question: first,
            transcript: Transcript::default(),
            form: FormData::default(),
            generation: 0,
            status: ConversationStatus::PresentingQuestion,
            active_job: None,
            submitted: None,
        }
    }

    pub fn transition_to(&mut self, target: ConversationStatus) -> Result<(), FlowError> {
        if !self.status.can_transition_to(target) {
            return Err(FlowError::InvalidTransition {
                from: self.status.to_string(),
                to: target.to_string(),
            });
        }
        self.status = target;
        Ok(())
    }

    /// Start over at `first` under the next generation. Returns the new
    /// generation.
    pub(crate) fn reset(&mut self, first: QuestionId) -> u64 {
        self.generation += 1;
        self.question = first;
        self.transcript.clear();
        self.form.clear();
        self.status = ConversationStatus::AwaitingAnswer;
        self.active_job = None;
        self.submitted = None;
        self.generation
    }

    /// Widget of the question currently awaiting an answer.
    pub fn current_widget(&self) -> Option<&Widget> {
        if self.status != ConversationStatus::AwaitingAnswer {
            return None;
        }
        self.transcript
            .turns()
            .iter()
            .rev()
            .find(|t| t.question.as_deref() == Some(self.question.as_str()))
            .and_then(|t| t.widget.as_ref())
    }
}

/// Read-only view handed to UI sinks.
#[derive(Debug, Clone, Serialize)]
pub struct ConversationView {
    pub status: ConversationStatus,
    pub generation: u64,
    /// Set while an answer is expected.
    pub question: Option<QuestionId>,
    pub widget: Option<Widget>,
    pub placeholder: &'static str,
    pub transcript: Vec<Turn>,
    pub form: FormData,
    pub active_job: Option<JobId>,
}

impl From<&ConversationState> for ConversationView {
    fn from(state: &ConversationState) -> Self {
        let awaiting = state.status == ConversationStatus::AwaitingAnswer;
        Self {
            status: state.status,
            generation: state.generation,
            question: awaiting.then(|| state.question.clone()),
            widget: state.current_widget().cloned(),
            placeholder: super::prompts::input_placeholder(&state.question),
            transcript: state.transcript.turns().to_vec(),
            form: state.form.clone(),
            active_job: state.active_job.clone(),
        }
    }
}
