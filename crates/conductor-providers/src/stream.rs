use serde::{Deserialize, Serialize};

/// Events emitted during a streaming completion.
///
/// Consumers receive partial text as it arrives from the provider. The join
/// handle returned next to the receiver resolves to the aggregated
/// [`CompletionResponse`](crate::CompletionResponse).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    /// A chunk of generated text.
    TextDelta { text: String },

    /// Token usage reported by the provider, usually once near the end.
    Usage {
        input_tokens: u64,
        output_tokens: u64,
    },

    /// The stream has finished successfully.
    Done,

    /// An error occurred while reading the stream.
    Error { message: String },
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_event_tagging() {
        let json = serde_json::to_value(StreamEvent::TextDelta { text: "hi".into() }).unwrap();
        assert_eq!(json["type"], "text_delta");
        assert_eq!(json["text"], "hi");

        let done: StreamEvent = serde_json::from_str(r#"{"type":"done"}"#).unwrap();
        assert_eq!(done, StreamEvent::Done);
    }
}
