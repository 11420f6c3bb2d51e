//! Typed chat-message metadata.
//!
//! Metadata is stored as a JSON blob next to each message. Every blob written
//! by this crate carries a `version`; blobs without one predate versioning
//! and decode as version 1. Decoding never falls back to an empty value: a
//! malformed blob is a [`MetadataError`].

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Newest metadata layout this crate reads and writes.
pub const METADATA_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("Malformed message metadata: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("Unsupported metadata version {found} (newest supported is {supported})")]
    UnsupportedVersion { found: u64, supported: u32 },

    #[error("Message part has no type")]
    MissingPartType,

    #[error("Unknown message part type: {0}")]
    UnknownPartType(String),
}

/// Token accounting reported by the model provider.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Usage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_tokens: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_tokens: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_tokens: Option<i64>,
}

impl Usage {
    /// Overwrite fields with the ones `other` defines; undefined fields keep
    /// their current value.
    pub fn merge(&mut self, other: &Usage) {
        if other.prompt_tokens.is_some() {
            self.prompt_tokens = other.prompt_tokens;
        }
        if other.completion_tokens.is_some() {
            self.completion_tokens = other.completion_tokens;
        }
        if other.total_tokens.is_some() {
            self.total_tokens = other.total_tokens;
        }
    }

    pub fn is_empty(&self) -> bool {
        self.prompt_tokens.is_none() && self.completion_tokens.is_none() && self.total_tokens.is_none()
    }
}

/// One structured fragment of an assistant turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum MessagePart {
    Text {
        text: String,
    },
    Reasoning {
        text: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        signature: Option<String>,
    },
    RedactedReasoning {
        data: String,
    },
    ToolCall {
        tool_call_id: String,
        tool_name: String,
        #[serde(default)]
        args: Value,
    },
    ToolResult {
        tool_call_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tool_name: Option<String>,
        #[serde(default)]
        result: Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        is_error: Option<bool>,
    },
    Error {
        error: String,
    },
}

impl MessagePart {
    /// Canonical type tag, as written to storage.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Text { .. } => "text",
            Self::Reasoning { .. } => "reasoning",
            Self::RedactedReasoning { .. } => "redacted-reasoning",
            Self::ToolCall { .. } => "tool-call",
            Self::ToolResult { .. } => "tool-result",
            Self::Error { .. } => "error",
        }
    }

    pub fn is_reasoning(&self) -> bool {
        matches!(self, Self::Reasoning { .. })
    }

    /// Decode a part as emitted by an agent runtime.
    ///
    /// Runtimes disagree on type spelling (`tool_call`, `Tool-Call`,
    /// `reasoning-delta`), so the tag is normalized before decoding.
    pub fn from_wire(mut value: Value) -> Result<Self, MetadataError> {
        let raw = value
            .get("type")
            .and_then(Value::as_str)
            .ok_or(MetadataError::MissingPartType)?;
        let kind = normalize_part_type(raw);
        if !matches!(
            kind.as_str(),
            "text" | "reasoning" | "redacted-reasoning" | "tool-call" | "tool-result" | "error"
        ) {
            return Err(MetadataError::UnknownPartType(raw.to_string()));
        }
        if let Some(obj) = value.as_object_mut() {
            obj.insert("type".to_string(), Value::String(kind));
        }
        Ok(serde_json::from_value(value)?)
    }
}

/// Lower-case, trim, `_` → `-`, and fold the known aliases onto their
/// canonical tag.
pub fn normalize_part_type(raw: &str) -> String {
    let kind = raw.trim().to_ascii_lowercase().replace('_', "-");
    match kind.as_str() {
        "text-delta" => "text".to_string(),
        "reasoning-delta" | "thinking" => "reasoning".to_string(),
        "redacted-thinking" => "redacted-reasoning".to_string(),
        _ => kind,
    }
}

fn legacy_version() -> u32 {
    1
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageMetadata {
    #[serde(default = "legacy_version")]
    pub version: u32,
    #[serde(default)]
    pub is_streaming: bool,
    #[serde(default)]
    pub parts: Vec<MessagePart>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl Default for MessageMetadata {
    fn default() -> Self {
        Self {
            version: METADATA_VERSION,
            is_streaming: false,
            parts: Vec::new(),
            usage: None,
            finish_reason: None,
            error_message: None,
        }
    }
}

impl MessageMetadata {
    /// Metadata for a freshly opened streaming message.
    pub fn streaming() -> Self {
        Self {
            is_streaming: true,
            ..Self::default()
        }
    }

    /// Decode a stored blob. An empty string stands for "no metadata".
    pub fn decode(json: &str) -> Result<Self, MetadataError> {
        if json.trim().is_empty() {
            return Ok(Self::default());
        }
        let value: Value = serde_json::from_str(json)?;
        if let Some(found) = value.get("version").and_then(Value::as_u64) {
            if found > u64::from(METADATA_VERSION) {
                return Err(MetadataError::UnsupportedVersion {
                    found,
                    supported: METADATA_VERSION,
                });
            }
        }
        let mut metadata: Self = serde_json::from_value(value)?;
        metadata.version = METADATA_VERSION;
        Ok(metadata)
    }

    pub fn encode(&self) -> Result<String, MetadataError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Append one part, folding it into the previous part when both are
    /// reasoning. Any other part in between starts a new reasoning entry.
    pub fn push_part(&mut self, part: MessagePart) {
        if let MessagePart::Reasoning {
            text: incoming,
            signature: incoming_signature,
        } = &part
        {
            if let Some(MessagePart::Reasoning { text, signature }) = self.parts.last_mut() {
                text.push_str(incoming);
                if incoming_signature.is_some() {
                    signature.clone_from(incoming_signature);
                }
                return;
            }
        }
        self.parts.push(part);
    }

    pub fn merge_parts(&mut self, parts: impl IntoIterator<Item = MessagePart>) {
        for part in parts {
            self.push_part(part);
        }
    }

    pub fn merge_usage(&mut self, usage: &Usage) {
        match self.usage.as_mut() {
            Some(current) => current.merge(usage),
            None if !usage.is_empty() => self.usage = Some(usage.clone()),
            None => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn reasoning(text: &str) -> MessagePart {
        MessagePart::Reasoning {
            text: text.to_string(),
            signature: None,
        }
    }

    #[test]
    fn test_decode_legacy_blob_without_version() {
        let meta = MessageMetadata::decode(r#"{"isStreaming":true,"parts":[]}"#).unwrap();
        assert_eq!(meta.version, 1);
        assert!(meta.is_streaming);
        assert!(meta.parts.is_empty());
    }

    #[test]
    fn test_decode_empty_string_is_default() {
        let meta = MessageMetadata::decode("").unwrap();
        assert_eq!(meta, MessageMetadata::default());
    }

    #[test]
    fn test_decode_malformed_is_an_error() {
        let err = MessageMetadata::decode("{not json").unwrap_err();
        assert!(matches!(err, MetadataError::Malformed(_)));
    }

    #[test]
    fn test_decode_newer_version_is_rejected() {
        let err = MessageMetadata::decode(r#"{"version":7,"isStreaming":false}"#).unwrap_err();
        assert!(matches!(
            err,
            MetadataError::UnsupportedVersion { found: 7, supported: 1 }
        ));
    }

    #[test]
    fn test_encode_uses_camel_case_and_kebab_tags() {
        let mut meta = MessageMetadata::streaming();
        meta.push_part(MessagePart::ToolCall {
            tool_call_id: "call_1".into(),
            tool_name: "read_file".into(),
            args: json!({"path": "src/lib.rs"}),
        });
        let value: Value = serde_json::from_str(&meta.encode().unwrap()).unwrap();
        assert_eq!(value["version"], 1);
        assert_eq!(value["isStreaming"], true);
        assert_eq!(value["parts"][0]["type"], "tool-call");
        assert_eq!(value["parts"][0]["toolCallId"], "call_1");
    }

    #[test]
    fn test_from_wire_normalizes_type() {
        let part = MessagePart::from_wire(json!({"type": " Tool_Call ", "toolCallId": "a", "toolName": "ls"})).unwrap();
        assert_eq!(part.kind(), "tool-call");

        let part = MessagePart::from_wire(json!({"type": "reasoning-delta", "text": "hm"})).unwrap();
        assert_eq!(part, reasoning("hm"));
    }

    #[test]
    fn test_from_wire_rejects_unknown_and_untyped() {
        let err = MessagePart::from_wire(json!({"type": "image", "url": "x"})).unwrap_err();
        assert!(matches!(err, MetadataError::UnknownPartType(t) if t == "image"));

        let err = MessagePart::from_wire(json!({"text": "no type"})).unwrap_err();
        assert!(matches!(err, MetadataError::MissingPartType));
    }

    #[test]
    fn test_adjacent_reasoning_merges() {
        let mut meta = MessageMetadata::streaming();
        meta.merge_parts([reasoning("Let me "), reasoning("think.")]);
        assert_eq!(meta.parts, vec![reasoning("Let me think.")]);
    }

    #[test]
    fn test_reasoning_after_other_part_starts_new_entry() {
        let mut meta = MessageMetadata::streaming();
        meta.push_part(reasoning("first"));
        meta.push_part(MessagePart::ToolCall {
            tool_call_id: "t1".into(),
            tool_name: "grep".into(),
            args: Value::Null,
        });
        meta.push_part(reasoning("second"));
        assert_eq!(meta.parts.len(), 3);
        assert_eq!(meta.parts[2], reasoning("second"));
    }

    #[test]
    fn test_reasoning_merge_keeps_latest_signature() {
        let mut meta = MessageMetadata::streaming();
        meta.push_part(reasoning("a"));
        meta.push_part(MessagePart::Reasoning {
            text: "b".into(),
            signature: Some("sig".into()),
        });
        assert_eq!(
            meta.parts,
            vec![MessagePart::Reasoning {
                text: "ab".into(),
                signature: Some("sig".into())
            }]
        );
    }

    #[test]
    fn test_text_parts_are_not_merged() {
        let mut meta = MessageMetadata::streaming();
        meta.merge_parts([
            MessagePart::Text { text: "a".into() },
            MessagePart::Text { text: "b".into() },
        ]);
        assert_eq!(meta.parts.len(), 2);
    }

    #[test]
    fn test_usage_merge_is_non_destructive() {
        let mut meta = MessageMetadata::default();
        meta.merge_usage(&Usage {
            prompt_tokens: Some(10),
            completion_tokens: Some(3),
            total_tokens: None,
        });
        meta.merge_usage(&Usage {
            prompt_tokens: None,
            completion_tokens: Some(8),
            total_tokens: Some(18),
        });
        assert_eq!(
            meta.usage,
            Some(Usage {
                prompt_tokens: Some(10),
                completion_tokens: Some(8),
                total_tokens: Some(18),
            })
        );
    }

    #[test]
    fn test_empty_usage_does_not_create_entry() {
        let mut meta = MessageMetadata::default();
        meta.merge_usage(&Usage::default());
        assert!(meta.usage.is_none());
    }
}
