use serde_json::Value;

/// Typed events produced from the provider's SSE stream. The mediator
/// consumes these as a lazy sequence instead of wiring callbacks per delta.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// A fragment of output text.
    OutputTextDelta(String),
    /// The authoritative final text; replaces whatever was accumulated.
    OutputTextDone(String),
    /// A function call started streaming its arguments.
    FunctionCallArgumentsStart,
    /// A fragment of function-call argument JSON.
    FunctionCallArgumentsDelta(String),
    /// Argument streaming finished.
    FunctionCallArgumentsDone,
    /// A complete function call item.
    FunctionCallDone(crate::client::ToolCall),
    /// The provider reported an error inside the stream.
    StreamError(String),
    /// The `[DONE]` terminator.
    Done,
}

/// Incremental SSE line parser. Bytes go in as they arrive; complete
/// `data:` lines come out as typed events. Unknown event types and
/// malformed JSON payloads are skipped.
#[derive(Default)]
pub struct SseParser {
    buffer: String,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: &str) -> Vec<StreamEvent> {
        self.buffer.push_str(chunk);

        let mut events = Vec::new();
        while let Some(newline) = self.buffer.find('\n') {
            let line = self.buffer[..newline].trim_end_matches('\r').to_string();
            self.buffer.drain(..=newline);

            if line.is_empty() || line.starts_with(':') {
                continue;
            }

            let Some(data) = line.strip_prefix("data: ") else {
                continue;
            };

            if data == "[DONE]" {
                events.push(StreamEvent::Done);
                continue;
            }

            let Ok(value) = serde_json::from_str::<Value>(data) else {
                continue;
            };
            if let Some(event) = parse_event(&value) {
                events.push(event);
            }
        }
        events
    }
}

fn parse_event(value: &Value) -> Option<StreamEvent> {
    let event_type = value.get("type")?.as_str()?;

    match event_type {
        "response.output_text.delta" => {
            let delta = value.get("delta")?.as_str()?;
            Some(StreamEvent::OutputTextDelta(delta.to_string()))
        }
        "response.output_text.done" => {
            let text = value.get("text")?.as_str()?;
            Some(StreamEvent::OutputTextDone(text.to_string()))
        }
        "response.function_call_arguments.start" => Some(StreamEvent::FunctionCallArgumentsStart),
        "response.function_call_arguments.delta" => {
            let delta = value.get("delta")?.as_str()?;
            Some(StreamEvent::FunctionCallArgumentsDelta(delta.to_string()))
        }
        "response.function_call_arguments.done" => Some(StreamEvent::FunctionCallArgumentsDone),
        "response.output_item.done" => {
            let item = value.get("item")?;
            if item.get("type")?.as_str()? != "function_call" {
                return None;
            }
            Some(StreamEvent::FunctionCallDone(crate::client::ToolCall {
                id: item
                    .get("call_id")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                name: item
                    .get("name")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                arguments: item
                    .get("arguments")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
            }))
        }
        "error" => {
            let message = value
                .get("error")
                .and_then(|e| e.get("message"))
                .and_then(Value::as_str)
                .unwrap_or("unknown streaming error");
            Some(StreamEvent::StreamError(message.to_string()))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deltas_parse_in_order() {
        let mut parser = SseParser::new();
        let events = parser.push(
            "data: {\"type\":\"response.output_text.delta\",\"delta\":\"Hel\"}\n\n\
             data: {\"type\":\"response.output_text.delta\",\"delta\":\"lo\"}\n\n\
             data: [DONE]\n",
        );
        assert_eq!(
            events,
            vec![
                StreamEvent::OutputTextDelta("Hel".into()),
                StreamEvent::OutputTextDelta("lo".into()),
                StreamEvent::Done,
            ]
        );
    }

    #[test]
    fn lines_split_across_chunks_reassemble() {
        let mut parser = SseParser::new();
        assert!(parser
            .push("data: {\"type\":\"response.output_text.del")
            .is_empty());
        let events = parser.push("ta\",\"delta\":\"hi\"}\n");
        assert_eq!(events, vec![StreamEvent::OutputTextDelta("hi".into())]);
    }

    #[test]
    fn done_overwrite_and_comments_and_unknowns() {
        let mut parser = SseParser::new();
        let events = parser.push(
            ": keep-alive\n\
             data: {\"type\":\"response.created\"}\n\
             data: {\"type\":\"response.output_text.done\",\"text\":\"final\"}\n",
        );
        assert_eq!(events, vec![StreamEvent::OutputTextDone("final".into())]);
    }

    #[test]
    fn function_call_items_surface_with_arguments() {
        let mut parser = SseParser::new();
        let events = parser.push(
            "data: {\"type\":\"response.function_call_arguments.start\"}\n\
             data: {\"type\":\"response.function_call_arguments.delta\",\"delta\":\"{\\\"html\\\"\"}\n\
             data: {\"type\":\"response.function_call_arguments.done\"}\n\
             data: {\"type\":\"response.output_item.done\",\"item\":{\"type\":\"function_call\",\"call_id\":\"c1\",\"name\":\"update_code\",\"arguments\":\"{\\\"html\\\":\\\"<h1>hi</h1>\\\"}\"}}\n",
        );
        assert_eq!(events.len(), 4);
        match &events[3] {
            StreamEvent::FunctionCallDone(call) => {
                assert_eq!(call.name, "update_code");
                assert!(call.arguments.contains("<h1>hi</h1>"));
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn provider_errors_become_typed_events() {
        let mut parser = SseParser::new();
        let events =
            parser.push("data: {\"type\":\"error\",\"error\":{\"message\":\"rate limited\"}}\n");
        assert_eq!(events, vec![StreamEvent::StreamError("rate limited".into())]);
    }

    #[test]
    fn malformed_json_is_skipped() {
        let mut parser = SseParser::new();
        let events = parser.push("data: {not json}\ndata: [DONE]\n");
        assert_eq!(events, vec![StreamEvent::Done]);
    }
}
