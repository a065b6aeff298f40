//! Types module for the session engine.
//!
//! Contacts, sync cursors, inbound messages and lifecycle events.

mod contact;
mod cursor;
mod events;
mod message;

pub use contact::*;
pub use cursor::*;
pub use events::*;
pub use message::*;
