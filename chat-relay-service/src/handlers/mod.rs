//! HTTP handlers for the chat relay service.

pub mod health;
pub mod query;
