//! Shared domain types for the tasklane service.
//!
//! Record models and status enums live in [`models`], the typed chat-message
//! metadata blob in [`metadata`], and the legacy socket streaming protocol in
//! [`chunk`].

pub mod chunk;
pub mod metadata;
pub mod models;

pub use chunk::StreamChunk;
pub use metadata::{MessageMetadata, MessagePart, MetadataError, Usage};
