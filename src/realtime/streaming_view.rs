//! Locating the in-flight assistant message and indexing its parts.

use std::collections::BTreeMap;

use serde::Serialize;
use tasklane_common::MessagePart;
use tasklane_common::models::ChatMessage;

/// A message whose metadata could not be decoded.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DecodeFailure {
    pub message_id: i64,
    pub error: String,
}

/// Parts of the streaming message keyed by a stable per-part id, plus the
/// order in which those ids first appeared.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamingParts {
    pub message_id: Option<i64>,
    pub parts: BTreeMap<String, MessagePart>,
    pub order: Vec<String>,
}

impl StreamingParts {
    pub fn is_streaming(&self) -> bool {
        self.message_id.is_some()
    }

    /// Index `parts` under synthesized ids. Tool parts use their call id so
    /// a result lands next to its call; everything else uses its position.
    pub fn from_parts(message_id: Option<i64>, parts: &[MessagePart]) -> Self {
        let mut indexed = Self {
            message_id,
            ..Self::default()
        };
        for (i, part) in parts.iter().enumerate() {
            indexed.insert(part_id(i, part), part.clone());
        }
        indexed
    }

    pub fn insert(&mut self, id: String, part: MessagePart) {
        if self.parts.insert(id.clone(), part).is_none() {
            self.order.push(id);
        }
    }

    pub fn ordered(&self) -> impl Iterator<Item = &MessagePart> {
        self.order.iter().filter_map(|id| self.parts.get(id))
    }
}

pub fn part_id(index: usize, part: &MessagePart) -> String {
    match part {
        MessagePart::Text { .. } => format!("text-{index}"),
        MessagePart::Reasoning { .. } => format!("reasoning-{index}"),
        MessagePart::RedactedReasoning { .. } => format!("redacted-reasoning-{index}"),
        MessagePart::ToolCall { tool_call_id, .. } => tool_call_id.clone(),
        MessagePart::ToolResult { tool_call_id, .. } => format!("{tool_call_id}-result"),
        MessagePart::Error { .. } => format!("error-{index}"),
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamingView {
    pub streaming: StreamingParts,
    pub decode_failures: Vec<DecodeFailure>,
}

impl StreamingView {
    /// Scan a task's messages for the one still streaming.
    ///
    /// At most one is expected. If several claim to be streaming, the one
    /// with the highest sequence wins.
    pub fn from_messages(messages: &[ChatMessage]) -> Self {
        let mut decode_failures = Vec::new();
        let mut streaming = Vec::new();
        for message in messages {
            match message.metadata() {
                Ok(metadata) if metadata.is_streaming => streaming.push((message, metadata)),
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(message_id = message.id, error = %e, "undecodable message metadata");
                    decode_failures.push(DecodeFailure {
                        message_id: message.id,
                        error: e.to_string(),
                    });
                }
            }
        }
        if streaming.len() > 1 {
            tracing::warn!(
                count = streaming.len(),
                task_id = messages.first().map(|m| m.task_id),
                "more than one message is streaming; using the latest"
            );
        }

        let latest = streaming.into_iter().max_by_key(|(message, _)| message.sequence);
        let streaming = match latest {
            Some((message, metadata)) => StreamingParts::from_parts(Some(message.id), &metadata.parts),
            None => StreamingParts::default(),
        };
        Self {
            streaming,
            decode_failures,
        }
    }

    pub fn is_streaming(&self) -> bool {
        self.streaming.is_streaming()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tasklane_common::MessageMetadata;
    use tasklane_common::models::{MessageRole, MessageStatus};

    fn message(id: i64, sequence: i64, metadata_json: &str) -> ChatMessage {
        ChatMessage {
            id,
            task_id: 1,
            role: MessageRole::Assistant,
            content: String::new(),
            llm_model: None,
            metadata_json: metadata_json.to_string(),
            sequence,
            prompt_tokens: None,
            completion_tokens: None,
            total_tokens: None,
            finish_reason: None,
            status: MessageStatus::Streaming,
            prompt_message_id: None,
            client_message_id: None,
            created_at: id,
            edited_at: None,
            pull_request_snapshot: None,
        }
    }

    fn streaming_json(parts: Vec<MessagePart>) -> String {
        let mut metadata = MessageMetadata::streaming();
        metadata.parts = parts;
        metadata.encode().unwrap()
    }

    #[test]
    fn test_part_ids_and_order() {
        let parts = vec![
            MessagePart::Reasoning {
                text: "plan".into(),
                signature: None,
            },
            MessagePart::Text { text: "Running tests".into() },
            MessagePart::ToolCall {
                tool_call_id: "call_1".into(),
                tool_name: "run".into(),
                args: json!({}),
            },
            MessagePart::ToolResult {
                tool_call_id: "call_1".into(),
                tool_name: Some("run".into()),
                result: json!("ok"),
                is_error: None,
            },
            MessagePart::Error { error: "boom".into() },
        ];
        let view = StreamingView::from_messages(&[message(1, 0, &streaming_json(parts))]);
        assert!(view.is_streaming());
        assert_eq!(
            view.streaming.order,
            vec!["reasoning-0", "text-1", "call_1", "call_1-result", "error-4"]
        );
        assert_eq!(view.streaming.ordered().count(), 5);
    }

    #[test]
    fn test_no_streaming_message() {
        let finished = MessageMetadata::default().encode().unwrap();
        let view = StreamingView::from_messages(&[message(1, 0, &finished), message(2, 1, "")]);
        assert!(!view.is_streaming());
        assert!(view.streaming.parts.is_empty());
        assert!(view.decode_failures.is_empty());
    }

    #[test]
    fn test_latest_streaming_message_wins() {
        let older = streaming_json(vec![MessagePart::Text { text: "old".into() }]);
        let newer = streaming_json(vec![MessagePart::Text { text: "new".into() }]);
        let view = StreamingView::from_messages(&[message(7, 3, &newer), message(5, 1, &older)]);
        assert_eq!(view.streaming.message_id, Some(7));
        assert_eq!(
            view.streaming.parts.get("text-0"),
            Some(&MessagePart::Text { text: "new".into() })
        );
    }

    #[test]
    fn test_decode_failures_are_collected() {
        let view = StreamingView::from_messages(&[message(3, 0, "{not json")]);
        assert!(!view.is_streaming());
        assert_eq!(view.decode_failures.len(), 1);
        assert_eq!(view.decode_failures[0].message_id, 3);
    }
}
