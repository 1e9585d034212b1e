pub mod database;
pub mod persistence;
pub mod providers;
pub mod relay;
pub mod store;

pub use database::ChatDb;
pub use store::{ChatStore, InMemoryChatStore};
