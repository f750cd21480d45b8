//! Wire format of an OpenAI-compatible `/chat/completions` endpoint.

use std::time::Duration;

use eventsource_stream::Eventsource;
use futures_util::StreamExt;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CallError {
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("backend returned {status}: {body}")]
    Status { status: StatusCode, body: String },
    #[error("backend only accepts streamed requests: {0}")]
    StreamRequired(String),
    #[error("response has no message content")]
    Empty,
    #[error("decode response: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("event stream: {0}")]
    Stream(String),
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
    metadata: RequestMetadata,
    stream: bool,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Serialize)]
struct RequestMetadata {
    enable_thinking: &'static str,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: Option<ResponseMessage>,
}

#[derive(Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct ChunkResponse {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
}

#[derive(Deserialize)]
struct ChunkChoice {
    delta: Option<Delta>,
}

#[derive(Deserialize)]
struct Delta {
    content: Option<String>,
}

pub struct ChatClient {
    http: Client,
    endpoint: String,
    api_key: String,
}

impl ChatClient {
    pub fn new(base_url: &str, api_key: &str, timeout: Duration) -> Result<Self, CallError> {
        let http = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            endpoint: format!("{}/chat/completions", base_url.trim_end_matches('/')),
            api_key: api_key.to_string(),
        })
    }

    fn request(&self, model: &str, prompt: &str, text: &str, stream: bool) -> RequestBuilder {
        let body = ChatRequest {
            model,
            messages: [
                ChatMessage {
                    role: "system",
                    content: prompt,
                },
                ChatMessage {
                    role: "user",
                    content: text,
                },
            ],
            metadata: RequestMetadata {
                enable_thinking: "false",
            },
            stream,
        };
        let mut req = self.http.post(&self.endpoint).json(&body);
        if !self.api_key.is_empty() {
            req = req.bearer_auth(&self.api_key);
        }
        req
    }

    /// One non-streamed completion. A rejection that asks for stream mode is reported as
    /// [`CallError::StreamRequired`].
    pub async fn complete(
        &self,
        model: &str,
        prompt: &str,
        text: &str,
    ) -> Result<String, CallError> {
        let resp = self.request(model, prompt, text, false).send().await?;
        let status = resp.status();
        let body = resp.text().await?;
        if !status.is_success() {
            if body.to_ascii_lowercase().contains("stream mode") {
                return Err(CallError::StreamRequired(body));
            }
            return Err(CallError::Status { status, body });
        }
        let parsed: ChatResponse = serde_json::from_str(&body)?;
        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message)
            .and_then(|m| m.content)
            .filter(|c| !c.trim().is_empty())
            .ok_or(CallError::Empty)
    }

    /// Streamed completion over server-sent events; deltas are concatenated until `[DONE]`.
    pub async fn stream_complete(
        &self,
        model: &str,
        prompt: &str,
        text: &str,
    ) -> Result<String, CallError> {
        let resp = self.request(model, prompt, text, true).send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(CallError::Status { status, body });
        }

        let mut out = String::new();
        let mut events = resp.bytes_stream().eventsource();
        while let Some(event) = events.next().await {
            let event = event.map_err(|e| CallError::Stream(e.to_string()))?;
            if event.data == "[DONE]" {
                break;
            }
            let chunk: ChunkResponse = serde_json::from_str(&event.data)?;
            for choice in chunk.choices {
                if let Some(content) = choice.delta.and_then(|d| d.content) {
                    out.push_str(&content);
                }
            }
        }
        if out.trim().is_empty() {
            return Err(CallError::Empty);
        }
        Ok(out)
    }
}
