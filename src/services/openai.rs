//! OpenAI-compatible chat completions client
//!
//! Non-streaming calls return the first choice. Streaming calls parse
//! Server-Sent Events into fragments; citation events are read from
//! `choices[0].delta.context.citations` (the "on your data" extension).

use super::models::{Completion, CompletionSettings, CompletionUsage};
use super::{ChatCompletion, FragmentStream};
use crate::citations::{CitationEvent, Fragment};
use crate::config::ModelConfig;
use crate::context::Message;
use crate::error::{ContextError, Result};
use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures::{future, StreamExt};
use reqwest::{Client, RequestBuilder};
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, trace};

const DONE_SENTINEL: &str = "[DONE]";

/// OpenAI-compatible model client
pub struct OpenAiClient {
    client: Client,
    config: ModelConfig,
}

impl OpenAiClient {
    pub fn new(config: ModelConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| ContextError::Configuration(e.to_string()))?;

        Ok(Self { client, config })
    }

    fn request(&self, messages: &[Message], settings: &CompletionSettings, stream: bool) -> RequestBuilder {
        let body = ChatCompletionRequest {
            model: &self.config.model,
            messages,
            max_tokens: settings.max_tokens,
            temperature: settings.temperature,
            stream,
        };

        let mut req = self.client.post(&self.config.endpoint).json(&body);
        if let Some(ref api_key) = self.config.api_key {
            req = req.header("Authorization", format!("Bearer {}", api_key.expose_secret()));
        }
        req
    }

    async fn send(&self, request: RequestBuilder) -> Result<reqwest::Response> {
        let response = request.send().await?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            error!("Model endpoint returned HTTP {}", status);
            return Err(ContextError::Model(format!("HTTP {}: {}", status, body)));
        }
        Ok(response)
    }
}

#[async_trait]
impl ChatCompletion for OpenAiClient {
    async fn complete(&self, messages: &[Message], settings: &CompletionSettings) -> Result<Completion> {
        debug!("Requesting completion for {} messages", messages.len());

        let response = self.send(self.request(messages, settings, false)).await?;
        let body: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| ContextError::Model(format!("Failed to parse response: {}", e)))?;

        let choice = body
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ContextError::Model("No choices in response".to_string()))?;

        Ok(Completion {
            text: choice.message.content.unwrap_or_default(),
            usage: body.usage,
            citations: choice
                .message
                .context
                .map(|c| c.citations.into_iter().map(CitationEvent::from).collect())
                .unwrap_or_default(),
        })
    }

    async fn complete_streaming(
        &self,
        messages: &[Message],
        settings: &CompletionSettings,
    ) -> Result<FragmentStream> {
        debug!("Requesting streamed completion for {} messages", messages.len());

        let response = self.send(self.request(messages, settings, true)).await?;
        let stream = response
            .bytes_stream()
            .eventsource()
            .take_while(|event| future::ready(!matches!(event, Ok(e) if e.data == DONE_SENTINEL)))
            .filter_map(|event| {
                future::ready(match event {
                    Ok(event) => parse_chunk(&event.data).transpose(),
                    Err(e) => Some(Err(ContextError::Model(format!("SSE stream error: {}", e)))),
                })
            });

        Ok(stream.boxed())
    }
}

/// Parse one SSE data payload; `None` for chunks that carry nothing
fn parse_chunk(data: &str) -> Result<Option<Fragment>> {
    trace!("Model SSE: {}", data);
    let value: serde_json::Value = serde_json::from_str(data)
        .map_err(|e| ContextError::Model(format!("SSE parsing error: {}", e)))?;

    if let Some(error) = value.get("error") {
        let message = error
            .get("message")
            .and_then(|m| m.as_str())
            .or_else(|| error.as_str())
            .unwrap_or("An error occurred during streaming");
        return Err(ContextError::Model(message.to_string()));
    }

    let chunk: StreamChunk = serde_json::from_value(value)
        .map_err(|e| ContextError::Model(format!("SSE data schema error: {}", e)))?;
    let Some(choice) = chunk.choices.into_iter().next() else {
        return Ok(None);
    };

    let fragment = Fragment {
        text: choice.delta.content.unwrap_or_default(),
        citations: choice
            .delta
            .context
            .map(|c| c.citations.into_iter().map(CitationEvent::from).collect())
            .unwrap_or_default(),
    };

    Ok((!fragment.is_empty()).then_some(fragment))
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: &'a [Message],
    max_tokens: usize,
    temperature: f32,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<ResponseChoice>,
    #[serde(default)]
    usage: Option<CompletionUsage>,
}

#[derive(Debug, Deserialize)]
struct ResponseChoice {
    message: ResponseMessage,
}

#[derive(Debug, Default, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    context: Option<MessageContext>,
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct MessageContext {
    #[serde(default)]
    citations: Vec<WireCitation>,
}

#[derive(Debug, Deserialize)]
struct WireCitation {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    filepath: Option<String>,
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    url: Option<String>,
}

impl From<WireCitation> for CitationEvent {
    fn from(wire: WireCitation) -> Self {
        CitationEvent {
            source: wire.filepath.or(wire.title).unwrap_or_default(),
            snippet: wire.content.unwrap_or_default(),
            url: wire.url,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_content_chunk() {
        let data = r#"{"object":"chat.completion.chunk","choices":[{"index":0,"delta":{"content":"See [doc1]"}}]}"#;
        let fragment = parse_chunk(data).unwrap().unwrap();
        assert_eq!(fragment.text, "See [doc1]");
        assert!(fragment.citations.is_empty());
    }

    #[test]
    fn test_parse_citation_chunk() {
        let data = r#"{"choices":[{"delta":{"role":"assistant","context":{"citations":[
            {"title":"Q3 report","filepath":"reports/q3.pdf","content":"Revenue grew","url":null},
            {"title":"notes","content":"Loose notes"}
        ]}}}]}"#;
        let fragment = parse_chunk(data).unwrap().unwrap();
        assert_eq!(fragment.text, "");
        assert_eq!(fragment.citations.len(), 2);
        assert_eq!(fragment.citations[0].source, "reports/q3.pdf");
        assert_eq!(fragment.citations[0].snippet, "Revenue grew");
        assert_eq!(fragment.citations[1].source, "notes");
    }

    #[test]
    fn test_parse_empty_chunk() {
        assert!(parse_chunk(r#"{"choices":[]}"#).unwrap().is_none());
        assert!(parse_chunk(r#"{"choices":[{"delta":{}}]}"#).unwrap().is_none());
    }

    #[test]
    fn test_parse_error_chunk() {
        let err = parse_chunk(r#"{"error":{"message":"This model's maximum context length is 8192 tokens"}}"#)
            .unwrap_err();
        assert!(err.to_string().contains("maximum context length"));

        let err = parse_chunk(r#"{"error":"provider error"}"#).unwrap_err();
        assert!(err.to_string().contains("provider error"));
    }

    #[test]
    fn test_request_body_shape() {
        let messages = vec![Message::system("be brief"), Message::user("hi")];
        let body = ChatCompletionRequest {
            model: "gpt-4o-mini",
            messages: &messages,
            max_tokens: 64,
            temperature: 0.0,
            stream: true,
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["messages"][1]["role"], "user");
        assert_eq!(json["messages"][1]["content"], "hi");
        assert_eq!(json["stream"], true);
    }
}
