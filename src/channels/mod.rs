//! UI sinks: how a user sees the transcript and acts on it.

pub mod action;
pub mod cli;

pub use action::UserAction;
pub use cli::CliChannel;
