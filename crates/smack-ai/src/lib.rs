//! Streaming AI mediation: the Responses-API client, the SSE event
//! parser, and the pipeline that turns inbound user messages into
//! streamed bot replies.

pub mod client;
pub mod mediator;
pub mod prompts;
pub mod sse;

pub use client::{InputMessage, OpenAiClient, ResponseStream, Tool, ToolCall};
pub use mediator::Mediator;
pub use sse::{SseParser, StreamEvent};
