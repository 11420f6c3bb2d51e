//! Streaming message assembly.
//!
//! One assistant turn is a single evolving message. The agent runtime opens
//! it empty, sends deltas (text, structured parts, usage), and finally closes
//! it. This module holds the storage-independent half of that: folding one
//! delta into a message's content and metadata.

use serde::Deserialize;
use serde_json::Value;
use tasklane_common::{MessageMetadata, MessagePart, MetadataError, Usage};

use crate::errors::{StoreError, StoreResult};

/// One delta-append call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StreamDelta {
    pub delta_text: String,
    pub parts: Vec<MessagePart>,
    pub usage: Option<Usage>,
    pub finish_reason: Option<String>,
    pub is_final: bool,
}

/// A delta as sent over HTTP, with parts still in runtime spelling.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireDelta {
    #[serde(default)]
    pub delta_text: String,
    #[serde(default)]
    pub parts: Vec<Value>,
    #[serde(default)]
    pub usage: Option<Usage>,
    #[serde(default)]
    pub finish_reason: Option<String>,
    #[serde(default)]
    pub is_final: bool,
}

impl TryFrom<WireDelta> for StreamDelta {
    type Error = MetadataError;

    fn try_from(wire: WireDelta) -> Result<Self, Self::Error> {
        let parts = wire
            .parts
            .into_iter()
            .map(MessagePart::from_wire)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            delta_text: wire.delta_text,
            parts,
            usage: wire.usage,
            finish_reason: wire.finish_reason,
            is_final: wire.is_final,
        })
    }
}

/// Fold `delta` into a streaming message.
///
/// Fails if the message was already finalized. On success the text is
/// appended, parts merged (adjacent reasoning collapses), usage merged
/// field-by-field, and `is_streaming` becomes `!delta.is_final`.
pub fn apply_delta(
    message_id: i64,
    content: &mut String,
    metadata: &mut MessageMetadata,
    delta: &StreamDelta,
) -> StoreResult<()> {
    if !metadata.is_streaming {
        return Err(StoreError::validation(format!(
            "Message {message_id} is already finalized"
        )));
    }
    content.push_str(&delta.delta_text);
    metadata.merge_parts(delta.parts.iter().cloned());
    if let Some(usage) = &delta.usage {
        metadata.merge_usage(usage);
    }
    if delta.finish_reason.is_some() {
        metadata.finish_reason.clone_from(&delta.finish_reason);
    }
    metadata.is_streaming = !delta.is_final;
    Ok(())
}
