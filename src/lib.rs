//! attache — personal-assistant action extraction core.
//!
//! Converts inbound channel messages (mail, calendar, notes) into structured,
//! importance-rated action records via a hosted LLM, and persists them in a
//! libSQL-backed store alongside the rest of the assistant's schema.

pub mod agent;
pub mod channels;
pub mod config;
pub mod error;
pub mod llm;
pub mod store;

pub use error::{Error, Result};
