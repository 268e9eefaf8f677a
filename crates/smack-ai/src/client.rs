use std::collections::VecDeque;

use anyhow::{anyhow, bail, Context, Result};
use futures_util::StreamExt;
use reqwest::header;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::sse::{SseParser, StreamEvent};

const RESPONSES_URL: &str = "https://api.openai.com/v1/responses";
const SPEECH_URL: &str = "https://api.openai.com/v1/audio/speech";

/// One conversation turn sent upstream.
#[derive(Debug, Clone, Serialize)]
pub struct InputMessage {
    pub role: String,
    pub content: String,
}

impl InputMessage {
    pub fn new(role: &str, content: &str) -> Self {
        Self {
            role: role.to_string(),
            content: content.to_string(),
        }
    }
}

/// A function tool definition for the Responses API.
#[derive(Debug, Clone, Serialize)]
pub struct Tool {
    #[serde(rename = "type")]
    pub kind: String,
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// A completed tool call emitted by the model.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: String,
}

#[derive(Serialize)]
struct ResponsesRequest<'a> {
    model: &'a str,
    input: &'a [InputMessage],
    #[serde(skip_serializing_if = "Option::is_none")]
    instructions: Option<&'a str>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    stream: bool,
    #[serde(skip_serializing_if = "<[_]>::is_empty")]
    tools: &'a [Tool],
}

#[derive(Deserialize)]
struct ResponsesResponse {
    #[serde(default)]
    output: Vec<OutputItem>,
    #[serde(default)]
    error: Option<ApiError>,
}

#[derive(Deserialize)]
struct OutputItem {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    role: String,
    #[serde(default)]
    content: Vec<ContentPart>,
}

#[derive(Deserialize)]
struct ContentPart {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    text: String,
}

#[derive(Deserialize)]
struct ApiError {
    message: String,
}

#[derive(Serialize)]
struct SpeechRequest<'a> {
    model: &'a str,
    input: &'a str,
    voice: &'a str,
}

/// Client for one provider/model pair.
///
/// The capability set is get-response, stream-response,
/// stream-response-with-tools, and text-to-speech; every consumer talks to
/// this struct directly.
pub struct OpenAiClient {
    http: reqwest::Client,
    api_key: String,
    model: String,
}

impl OpenAiClient {
    pub fn new(model: &str) -> Self {
        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            header::HeaderValue::from_static("application/json"),
        );

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .build()
            .expect("failed to build HTTP client");

        Self {
            http,
            api_key: std::env::var("OPENAI_KEY").unwrap_or_default(),
            model: model.to_string(),
        }
    }

    pub fn is_configured(&self) -> bool {
        !self.api_key.is_empty()
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn require_key(&self) -> Result<()> {
        if self.api_key.is_empty() {
            bail!("OPENAI_KEY environment variable not set");
        }
        Ok(())
    }

    /// Blocking (non-streaming) completion with conversation context.
    pub async fn get_response_with_context(
        &self,
        messages: &[InputMessage],
        system_prompt: &str,
    ) -> Result<String> {
        self.require_key()?;

        let body = ResponsesRequest {
            model: &self.model,
            input: messages,
            instructions: Some(system_prompt),
            stream: false,
            tools: &[],
        };

        let resp = self
            .http
            .post(RESPONSES_URL)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .context("failed to send request")?;

        let status = resp.status();
        let bytes = resp.bytes().await.context("failed to read response")?;
        if !status.is_success() {
            bail!(
                "OpenAI API error (status {}): {}",
                status.as_u16(),
                String::from_utf8_lossy(&bytes)
            );
        }

        let parsed: ResponsesResponse =
            serde_json::from_slice(&bytes).context("failed to parse response")?;
        if let Some(error) = parsed.error {
            bail!("OpenAI error: {}", error.message);
        }

        for item in parsed.output {
            if item.kind == "message" && item.role == "assistant" {
                for part in item.content {
                    if part.kind == "output_text" {
                        return Ok(part.text);
                    }
                }
            }
        }

        Err(anyhow!("no text response found in OpenAI output"))
    }

    /// Opens a streaming completion and returns the lazy event sequence.
    pub async fn stream_response(
        &self,
        messages: &[InputMessage],
        system_prompt: &str,
    ) -> Result<ResponseStream> {
        self.open_stream(messages, system_prompt, &[]).await
    }

    /// Streaming completion with tool definitions attached.
    pub async fn stream_response_with_tools(
        &self,
        messages: &[InputMessage],
        system_prompt: &str,
        tools: &[Tool],
    ) -> Result<ResponseStream> {
        self.open_stream(messages, system_prompt, tools).await
    }

    async fn open_stream(
        &self,
        messages: &[InputMessage],
        system_prompt: &str,
        tools: &[Tool],
    ) -> Result<ResponseStream> {
        self.require_key()?;

        let body = ResponsesRequest {
            model: &self.model,
            input: messages,
            instructions: Some(system_prompt),
            stream: true,
            tools,
        };

        let resp = self
            .http
            .post(RESPONSES_URL)
            .bearer_auth(&self.api_key)
            .header(header::ACCEPT, "text/event-stream")
            .json(&body)
            .send()
            .await
            .context("failed to send request")?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            bail!("OpenAI API error (status {}): {}", status.as_u16(), body);
        }

        Ok(ResponseStream {
            inner: Box::pin(resp.bytes_stream()),
            parser: SseParser::new(),
            pending: VecDeque::new(),
            finished: false,
        })
    }

    /// Renders text to MP3 audio.
    pub async fn text_to_speech(&self, text: &str, voice: &str) -> Result<Vec<u8>> {
        self.require_key()?;

        let voice = if voice.is_empty() { "alloy" } else { voice };
        let body = SpeechRequest {
            model: "tts-1",
            input: text,
            voice,
        };

        let resp = self
            .http
            .post(SPEECH_URL)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .context("failed to send request")?;

        let status = resp.status();
        let bytes = resp.bytes().await.context("failed to read response")?;
        if !status.is_success() {
            bail!(
                "OpenAI TTS API error (status {}): {}",
                status.as_u16(),
                String::from_utf8_lossy(&bytes)
            );
        }

        Ok(bytes.to_vec())
    }
}

type ByteStream =
    std::pin::Pin<Box<dyn futures_util::Stream<Item = reqwest::Result<bytes::Bytes>> + Send>>;

/// Lazy sequence of typed stream events over the provider's SSE body.
/// `next_event` returns `Ok(None)` once the stream is exhausted; the
/// `[DONE]` terminator stops scanning early.
pub struct ResponseStream {
    inner: ByteStream,
    parser: SseParser,
    pending: VecDeque<StreamEvent>,
    finished: bool,
}

impl ResponseStream {
    pub async fn next_event(&mut self) -> Result<Option<StreamEvent>> {
        loop {
            if let Some(event) = self.pending.pop_front() {
                if matches!(event, StreamEvent::Done) {
                    self.finished = true;
                    return Ok(None);
                }
                return Ok(Some(event));
            }
            if self.finished {
                return Ok(None);
            }

            match self.inner.next().await {
                Some(Ok(chunk)) => {
                    let text = std::str::from_utf8(&chunk)
                        .context("invalid UTF-8 in SSE stream")?
                        .to_string();
                    self.pending.extend(self.parser.push(&text));
                }
                Some(Err(e)) => return Err(anyhow!("error reading stream: {e}")),
                None => {
                    self.finished = true;
                    return Ok(None);
                }
            }
        }
    }
}
