// Streaming callbacks for agent invocations
//
// Callers implement `StreamEventSink` to observe an invocation while it runs.
// Every method has a no-op default so sinks only override what they need.

use crate::agents::output_parser::NormalizedEvent;
use tokio::sync::mpsc;

pub trait StreamEventSink: Send + Sync {
    /// Assistant text as it is produced
    fn on_text(&self, _content: &str) {}

    /// A tool invocation; called at most once per tool call id
    fn on_tool_call(&self, _id: &str, _name: &str, _input: &serde_json::Value) {}

    fn on_tool_result(&self, _tool_id: Option<&str>, _content: &str, _is_error: bool) {}

    fn on_error(&self, _message: &str) {}

    /// Every raw stdout line, before normalization
    fn on_raw_line(&self, _line: &str) {}
}

impl std::fmt::Debug for dyn StreamEventSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("StreamEventSink")
    }
}

/// Dispatch one normalized event to the matching sink method.
///
/// Tool call de-duplication is the caller's job; this forwards unconditionally.
pub fn dispatch_event(sink: &dyn StreamEventSink, event: &NormalizedEvent) {
    match event {
        NormalizedEvent::Text { content } => sink.on_text(content),
        NormalizedEvent::ToolCall { id, name, input } => sink.on_tool_call(id, name, input),
        NormalizedEvent::ToolResult {
            tool_id,
            content,
            is_error,
        } => sink.on_tool_result(tool_id.as_deref(), content, *is_error),
        NormalizedEvent::Error { message } => sink.on_error(message),
    }
}

/// Sink forwarding normalized events over an unbounded channel
pub struct ChannelSink {
    sender: mpsc::UnboundedSender<NormalizedEvent>,
}

impl ChannelSink {
    pub fn new(sender: mpsc::UnboundedSender<NormalizedEvent>) -> Self {
        Self { sender }
    }

    fn send(&self, event: NormalizedEvent) {
        // Receiver may have gone away; the invocation keeps running regardless
        let _ = self.sender.send(event);
    }
}

impl StreamEventSink for ChannelSink {
    fn on_text(&self, content: &str) {
        self.send(NormalizedEvent::text(content));
    }

    fn on_tool_call(&self, id: &str, name: &str, input: &serde_json::Value) {
        log::debug!(
            "[ChannelSink] {}",
            crate::agents::output_parser::summarize_tool_call(name, input)
        );
        self.send(NormalizedEvent::ToolCall {
            id: id.to_string(),
            name: name.to_string(),
            input: input.clone(),
        });
    }

    fn on_tool_result(&self, tool_id: Option<&str>, content: &str, is_error: bool) {
        self.send(NormalizedEvent::ToolResult {
            tool_id: tool_id.map(String::from),
            content: content.to_string(),
            is_error,
        });
    }

    fn on_error(&self, message: &str) {
        self.send(NormalizedEvent::error(message));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_channel_sink_forwards_events_in_order() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sink = ChannelSink::new(tx);

        dispatch_event(&sink, &NormalizedEvent::text("one"));
        dispatch_event(
            &sink,
            &NormalizedEvent::ToolCall {
                id: "t1".to_string(),
                name: "Read".to_string(),
                input: json!({"file_path": "a.rs"}),
            },
        );
        dispatch_event(&sink, &NormalizedEvent::error("boom"));

        assert_eq!(rx.recv().await.unwrap(), NormalizedEvent::text("one"));
        assert!(matches!(rx.recv().await.unwrap(), NormalizedEvent::ToolCall { .. }));
        assert_eq!(rx.recv().await.unwrap(), NormalizedEvent::error("boom"));
    }

    #[test]
    fn test_channel_sink_survives_dropped_receiver() {
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        let sink = ChannelSink::new(tx);
        sink.on_text("nobody listening");
    }
}
