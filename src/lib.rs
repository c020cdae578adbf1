// chatdesk - JSON-file record store with CRUD over HTTP and a logged chat proxy

pub mod api;
pub mod chat;
pub mod config;
pub mod jsonfile;
pub mod models;
pub mod provider;
pub mod record;
pub mod store;

// Re-export main types for convenience
pub use api::{AppState, router};
pub use chat::{ChatError, ChatOrchestrator, ChatReply};
pub use config::Config;
pub use provider::{Provider, ProviderError};
pub use record::{Fields, Record};
pub use store::{CorruptPolicy, Store, StoreError};
