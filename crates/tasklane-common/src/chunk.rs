//! Legacy socket streaming protocol.
//!
//! Before clients re-queried stored messages, an assistant turn reached them
//! as a stream of small chunks over the socket. The server still emits these
//! for every delta so socket-mode clients keep working.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::metadata::{MessagePart, Usage};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum StreamChunk {
    Content {
        content: String,
    },
    Reasoning {
        reasoning: String,
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
    Usage {
        usage: Usage,
    },
    Error {
        error: String,
    },
    Complete {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        finish_reason: Option<String>,
    },
}

impl StreamChunk {
    /// Chunk carrying the same payload as a stored part. Text parts travel as
    /// `content` chunks.
    pub fn from_part(part: &MessagePart) -> Self {
        match part.clone() {
            MessagePart::Text { text } => Self::Content { content: text },
            MessagePart::Reasoning { text, signature } => Self::Reasoning {
                reasoning: text,
                signature,
            },
            MessagePart::RedactedReasoning { data } => Self::RedactedReasoning { data },
            MessagePart::ToolCall {
                tool_call_id,
                tool_name,
                args,
            } => Self::ToolCall {
                tool_call_id,
                tool_name,
                args,
            },
            MessagePart::ToolResult {
                tool_call_id,
                tool_name,
                result,
                is_error,
            } => Self::ToolResult {
                tool_call_id,
                tool_name,
                result,
                is_error,
            },
            MessagePart::Error { error } => Self::Error { error },
        }
    }
}
