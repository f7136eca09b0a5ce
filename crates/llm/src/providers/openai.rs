//! OpenAI Assistants (v2) client.
//!
//! Runs are created with `stream: true`; the response body is a
//! server-sent event stream that is decoded into [`RunStreamEvent`]s.
//! API reference: https://platform.openai.com/docs/api-reference/assistants-streaming

use super::sse::{SseDecoder, SseFrame};
use crate::client::{AssistantClient, RunStream};
use crate::types::{Run, RunStreamEvent, ThreadMessage, ToolCall, ToolOutput};
use aide_core::{AppError, AppResult};
use futures::StreamExt;
use reqwest::{Client, RequestBuilder, Response};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::instrument;

pub const DEFAULT_OPENAI_URL: &str = "https://api.openai.com";

/// OpenAI Assistants API client.
pub struct OpenAiAssistantClient {
    /// Base URL without trailing slash
    base_url: String,
    api_key: String,
    client: Client,
}

#[derive(Debug, Serialize)]
struct CreateMessageRequest<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct CreateRunRequest<'a> {
    assistant_id: &'a str,
    instructions: &'a str,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct SubmitToolOutputsRequest<'a> {
    tool_outputs: &'a [ToolOutput],
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct IdResponse {
    id: String,
}

#[derive(Debug, Deserialize)]
struct MessageList {
    data: Vec<ApiMessage>,
}

#[derive(Debug, Deserialize)]
struct ApiMessage {
    id: String,
    role: String,
    #[serde(default)]
    content: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
}

impl OpenAiAssistantClient {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self::with_base_url(DEFAULT_OPENAI_URL, api_key)
    }

    pub fn with_base_url(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            client: Client::new(),
        }
    }

    fn post(&self, path: &str) -> RequestBuilder {
        self.client
            .post(format!("{}/v1{}", self.base_url, path))
            .bearer_auth(&self.api_key)
            .header("OpenAI-Beta", "assistants=v2")
    }

    fn get(&self, path: &str) -> RequestBuilder {
        self.client
            .get(format!("{}/v1{}", self.base_url, path))
            .bearer_auth(&self.api_key)
            .header("OpenAI-Beta", "assistants=v2")
    }

    async fn send(&self, request: RequestBuilder, what: &str) -> AppResult<Response> {
        let response = request
            .send()
            .await
            .map_err(|e| AppError::Llm(format!("Failed to send {} request to OpenAI: {}", what, e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            let message = serde_json::from_str::<ErrorEnvelope>(&error_text)
                .map(|e| e.error.message)
                .unwrap_or(error_text);
            return Err(AppError::Llm(format!(
                "OpenAI API error ({}): {}",
                status, message
            )));
        }

        Ok(response)
    }

    fn into_run_stream(response: Response) -> RunStream {
        let mut decoder = SseDecoder::new();
        let body = response.bytes_stream().map(move |result| -> AppResult<Vec<SseFrame>> {
            let bytes = result.map_err(|e| AppError::Llm(format!("Stream error: {}", e)))?;
            Ok(decoder.push(&bytes))
        });

        Box::pin(
            body.flat_map(|result| {
                let events: Vec<AppResult<RunStreamEvent>> = match result {
                    Ok(frames) => frames.iter().filter_map(parse_event).collect(),
                    Err(e) => vec![Err(e)],
                };
                futures::stream::iter(events)
            }),
        )
    }
}

/// Map one SSE frame to a stream event; frames of no interest yield `None`.
pub(crate) fn parse_event(frame: &SseFrame) -> Option<AppResult<RunStreamEvent>> {
    let event = frame.event.as_deref()?;

    let parse = |data: &str| -> AppResult<Value> {
        serde_json::from_str(data)
            .map_err(|e| AppError::Llm(format!("Failed to parse {} event: {}", event, e)))
    };

    match event {
        "thread.message.delta" => {
            let value = match parse(&frame.data) {
                Ok(value) => value,
                Err(e) => return Some(Err(e)),
            };
            let text: String = value["delta"]["content"]
                .as_array()
                .map(|parts| {
                    parts
                        .iter()
                        .filter_map(|part| part["text"]["value"].as_str())
                        .collect()
                })
                .unwrap_or_default();
            if text.is_empty() {
                None
            } else {
                Some(Ok(RunStreamEvent::TextDelta(text)))
            }
        }
        "thread.run.step.delta" => {
            let value = match parse(&frame.data) {
                Ok(value) => value,
                Err(e) => return Some(Err(e)),
            };
            // Only the first delta of a call carries its id and name.
            value["delta"]["step_details"]["tool_calls"]
                .as_array()?
                .iter()
                .find(|call| call["type"] == "function" && call["id"].is_string())
                .and_then(|call| {
                    Some(RunStreamEvent::ToolCallCreated(ToolCall::new(
                        call["id"].as_str()?,
                        call["function"]["name"].as_str()?,
                        call["function"]["arguments"].as_str().unwrap_or_default(),
                    )))
                })
                .map(Ok)
        }
        name if name.starts_with("thread.run.") && !name.starts_with("thread.run.step") => {
            Some(
                serde_json::from_str::<Run>(&frame.data)
                    .map(RunStreamEvent::RunUpdated)
                    .map_err(|e| AppError::Llm(format!("Failed to parse {} event: {}", name, e))),
            )
        }
        "error" => {
            let message = parse(&frame.data)
                .ok()
                .and_then(|v| v["message"].as_str().map(str::to_string))
                .unwrap_or_else(|| frame.data.clone());
            Some(Err(AppError::Llm(format!("OpenAI stream error: {}", message))))
        }
        _ => None,
    }
}

/// Concatenated text parts of a message.
fn message_text(content: &[Value]) -> String {
    content
        .iter()
        .filter(|part| part["type"] == "text")
        .filter_map(|part| part["text"]["value"].as_str())
        .collect::<Vec<_>>()
        .join("\n")
}

#[async_trait::async_trait]
impl AssistantClient for OpenAiAssistantClient {
    fn provider_name(&self) -> &str {
        "openai"
    }

    #[instrument(skip(self))]
    async fn create_thread(&self) -> AppResult<String> {
        let response = self
            .send(self.post("/threads").json(&serde_json::json!({})), "create thread")
            .await?;
        let thread: IdResponse = response
            .json()
            .await
            .map_err(|e| AppError::Llm(format!("Failed to parse thread: {}", e)))?;
        tracing::debug!("Created thread {}", thread.id);
        Ok(thread.id)
    }

    #[instrument(skip(self, content), fields(content_len = content.len()))]
    async fn add_message(&self, thread_id: &str, content: &str) -> AppResult<()> {
        let path = format!("/threads/{}/messages", thread_id);
        self.send(
            self.post(&path).json(&CreateMessageRequest {
                role: "user",
                content,
            }),
            "create message",
        )
        .await?;
        Ok(())
    }

    #[instrument(skip(self, instructions))]
    async fn create_run(
        &self,
        thread_id: &str,
        assistant_id: &str,
        instructions: &str,
    ) -> AppResult<RunStream> {
        tracing::info!("Starting streaming run on thread {}", thread_id);
        let path = format!("/threads/{}/runs", thread_id);
        let response = self
            .send(
                self.post(&path).json(&CreateRunRequest {
                    assistant_id,
                    instructions,
                    stream: true,
                }),
                "create run",
            )
            .await?;
        Ok(Self::into_run_stream(response))
    }

    #[instrument(skip(self, outputs), fields(outputs = outputs.len()))]
    async fn submit_tool_outputs(
        &self,
        thread_id: &str,
        run_id: &str,
        outputs: &[ToolOutput],
    ) -> AppResult<RunStream> {
        let path = format!("/threads/{}/runs/{}/submit_tool_outputs", thread_id, run_id);
        let response = self
            .send(
                self.post(&path).json(&SubmitToolOutputsRequest {
                    tool_outputs: outputs,
                    stream: true,
                }),
                "submit tool outputs",
            )
            .await?;
        Ok(Self::into_run_stream(response))
    }

    #[instrument(skip(self))]
    async fn list_messages(&self, thread_id: &str) -> AppResult<Vec<ThreadMessage>> {
        let path = format!("/threads/{}/messages", thread_id);
        let response = self.send(self.get(&path), "list messages").await?;
        let list: MessageList = response
            .json()
            .await
            .map_err(|e| AppError::Llm(format!("Failed to parse messages: {}", e)))?;

        Ok(list
            .data
            .into_iter()
            .map(|m| ThreadMessage {
                text: message_text(&m.content),
                id: m.id,
                role: m.role,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RunStatus;

    fn frame(event: &str, data: &str) -> SseFrame {
        SseFrame {
            event: Some(event.to_string()),
            data: data.to_string(),
        }
    }

    #[test]
    fn test_client_creation() {
        let client = OpenAiAssistantClient::with_base_url("http://localhost:8080/", "sk");
        assert_eq!(client.provider_name(), "openai");
        assert_eq!(client.base_url, "http://localhost:8080");
    }

    #[test]
    fn test_parse_message_delta() {
        let event = parse_event(&frame(
            "thread.message.delta",
            r#"{"id":"msg_1","delta":{"content":[{"index":0,"type":"text","text":{"value":"Hel"}}]}}"#,
        ));
        assert_eq!(
            event.unwrap().unwrap(),
            RunStreamEvent::TextDelta("Hel".to_string())
        );
    }

    #[test]
    fn test_parse_tool_call_created_only_on_first_delta() {
        let first = parse_event(&frame(
            "thread.run.step.delta",
            r#"{"delta":{"step_details":{"type":"tool_calls","tool_calls":[
                {"index":0,"id":"call_1","type":"function","function":{"name":"read_file","arguments":""}}
            ]}}}"#,
        ));
        assert_eq!(
            first.unwrap().unwrap(),
            RunStreamEvent::ToolCallCreated(ToolCall::new("call_1", "read_file", ""))
        );

        let continuation = parse_event(&frame(
            "thread.run.step.delta",
            r#"{"delta":{"step_details":{"type":"tool_calls","tool_calls":[
                {"index":0,"type":"function","function":{"arguments":"{\"pa"}}
            ]}}}"#,
        ));
        assert!(continuation.is_none());
    }

    #[test]
    fn test_parse_run_events() {
        let event = parse_event(&frame(
            "thread.run.completed",
            r#"{"id":"run_1","object":"thread.run","status":"completed"}"#,
        ));
        match event.unwrap().unwrap() {
            RunStreamEvent::RunUpdated(run) => assert_eq!(run.status, RunStatus::Completed),
            other => panic!("unexpected event: {:?}", other),
        }

        assert!(parse_event(&frame("thread.run.step.created", "{}")).is_none());
        assert!(parse_event(&frame("done", "[DONE]")).is_none());
    }

    #[test]
    fn test_parse_error_event() {
        let event = parse_event(&frame("error", r#"{"message":"rate limited"}"#));
        let err = event.unwrap().unwrap_err();
        assert!(err.to_string().contains("rate limited"));
    }

    #[test]
    fn test_message_text_joins_text_parts() {
        let content: Vec<Value> = serde_json::from_str(
            r#"[{"type":"text","text":{"value":"a"}},{"type":"image_file"},{"type":"text","text":{"value":"b"}}]"#,
        )
        .unwrap();
        assert_eq!(message_text(&content), "a\nb");
    }
}
