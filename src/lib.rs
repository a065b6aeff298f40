//! wxweb-session: session engine for the WeChat web protocol.
//!
//! Drives the QR code login handshake, keeps one authenticated session
//! alive (optionally resuming it from a hot-resume snapshot), long-polls for
//! new events and classifies the raw payloads into typed messages.
//!
//! The network is not touched directly: callers supply a
//! [`transport::Transport`] implementation.
//!
//! ## Modules
//!
//! - `types` - Contacts, sync cursor, messages and events
//! - `state` - Session state: credentials, cookies, login ticket
//! - `transport` - The network port the engine depends on
//! - `store` - Hot-resume snapshot persistence
//! - `protocol` - The engine: login, resume, sync loop, classifier
//! - `config` - Configuration management

pub mod config;
pub mod protocol;
pub mod state;
pub mod store;
pub mod transport;
pub mod types;

pub use config::EngineConfig;
pub use protocol::{
    classify, default_error_policy, Engine, EngineError, LoginReport, LoginState,
    PolicyDecision, ResumeOutcome, SentMessage,
};
pub use state::{Credentials, LoginTicket, Session};
pub use store::{
    HotResumeSnapshot, JsonFileSnapshotStore, MemorySnapshotStore, SnapshotStore, StoreError,
};
pub use transport::{Transport, TransportError};
pub use types::{Contact, ContactIndex, Event, Message, MessageCategory, RawEvent};
