//! Messaging boundary.
//!
//! This module provides:
//! - The message envelope wire shape shared by publish, subscribe and storage
//! - The `MessageClient` capability the triggers and functions talk to
//! - An in-memory loopback bus for embedded use and tests

mod client;
mod envelope;

pub use client::{InMemoryMessageBus, MessageClient};
pub use envelope::{MessageEnvelope, CONTENT_TYPE_JSON, CONTENT_TYPE_TEXT, CONTENT_TYPE_XML};

pub(crate) use envelope::base64_bytes;
