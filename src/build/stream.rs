//! Frames of the build progress stream.
//!
//! Every invocation of the orchestrator produces one logical stream of
//! [`StreamData`] frames: `message` frames carry compiler progress and
//! derived metadata, `error` frames are terminal for the build itself, and a
//! final end-of-stream sentinel is emitted unconditionally so consumers can
//! close the channel deterministically.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

/// Data key marking the stream's final sentinel frame.
pub const END_OF_STREAM_KEY: &str = "end_of_stream";

/// Kind discriminator for a [`StreamData`] frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamEventKind {
    Message,
    Error,
}

impl StreamEventKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            StreamEventKind::Message => "message",
            StreamEventKind::Error => "error",
        }
    }
}

/// One server-push frame of the progress stream.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StreamData {
    pub event: StreamEventKind,
    pub data: Value,
}

impl StreamData {
    /// A `message` frame carrying arbitrary payload.
    #[must_use]
    pub fn message(data: Value) -> Self {
        Self {
            event: StreamEventKind::Message,
            data,
        }
    }

    /// A terminal `error` frame carrying a human-readable description.
    #[must_use]
    pub fn error(description: impl Into<String>) -> Self {
        Self {
            event: StreamEventKind::Error,
            data: json!({ "error": description.into() }),
        }
    }

    /// The unconditional closing sentinel.
    #[must_use]
    pub fn end_of_stream() -> Self {
        Self::message(json!({ END_OF_STREAM_KEY: true }))
    }

    /// Whether this frame is the closing sentinel.
    #[must_use]
    pub fn is_end_of_stream(&self) -> bool {
        self.data
            .get(END_OF_STREAM_KEY)
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    /// Error description carried by an `error` frame, if any.
    #[must_use]
    pub fn error_description(&self) -> Option<&str> {
        match self.event {
            StreamEventKind::Error => self.data.get("error").and_then(Value::as_str),
            StreamEventKind::Message => None,
        }
    }

    /// Render as a raw server-sent-event block.
    #[must_use]
    pub fn to_sse(&self) -> String {
        format!("event: {}\ndata: {}\n\n", self.event.as_str(), self.data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_frame_carries_description() {
        let frame = StreamData::error("No data provided");
        assert_eq!(frame.event, StreamEventKind::Error);
        assert_eq!(frame.error_description(), Some("No data provided"));
        assert!(!frame.is_end_of_stream());
    }

    #[test]
    fn sentinel_frame_is_a_message() {
        let frame = StreamData::end_of_stream();
        assert_eq!(frame.event, StreamEventKind::Message);
        assert!(frame.is_end_of_stream());
        assert_eq!(frame.error_description(), None);
    }

    #[test]
    fn sse_rendering_has_event_and_data_lines() {
        let frame = StreamData::message(json!({"log": "compiling"}));
        let rendered = frame.to_sse();
        assert!(rendered.starts_with("event: message\n"));
        assert!(rendered.contains("data: {\"log\":\"compiling\"}"));
        assert!(rendered.ends_with("\n\n"));
    }
}
