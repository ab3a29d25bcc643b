//! Rent Assist — conversational rental survey with background analysis jobs.

pub mod channels;
pub mod config;
pub mod error;
pub mod jobs;
pub mod routes;
pub mod survey;
