//! Chat relay service.
//!
//! Loads a stored conversation, streams a completion for it from an LLM
//! provider back to the caller as server-sent events, and records the
//! generated reply in the conversation.

pub mod config;
pub mod error;
pub mod handlers;
pub mod models;
pub mod services;
pub mod startup;
