//! Chat Relay Common Types
//!
//! Wire types shared by the relay service and its clients.

pub mod chat;

pub use chat::{ChatMessage, ChatReply, ErrorReply};
