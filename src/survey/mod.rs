//! The rental survey: question graph, answers, transcript, and the
//! controller that walks a user through them.

pub mod controller;
pub mod form;
pub mod graph;
pub mod payload;
pub mod prompts;
pub mod state;
pub mod transcript;

pub use controller::ConversationController;
pub use form::{Answer, AnswerValue, FormData};
pub use graph::{QuestionGraph, QuestionId, QuestionNode};
pub use state::{ConversationStatus, ConversationView};
pub use transcript::{Speaker, TranscriptUpdate, Turn, TurnId, Widget};
