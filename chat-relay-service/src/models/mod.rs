//! Domain models for the chat relay service.

pub mod chat;
pub mod stage;

pub use chat::{ChatDetail, CompletionMessage, QueryRequest, SessionKey, AI_SENDER};
pub use stage::QueryStage;
