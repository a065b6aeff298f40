//! Protocol module for the web session engine.
//!
//! Contains the [`Engine`] facade and the protocol logic behind it: QR
//! login, hot resume, the sync loop and message classification.

pub mod classify;
mod client;
mod login;
pub mod message;
pub mod qr;
mod resume;
mod sync;
pub mod text;

pub use classify::classify;
pub use client::{Engine, EngineError, EventHandler};
pub use login::{LoginReport, LoginState};
pub use message::{MediaUploadKind, OutgoingMessage, SentMessage};
pub use resume::ResumeOutcome;
pub use sync::{default_error_policy, ErrorPolicy, MessageHandler, PolicyDecision};
