//! Anthropic Messages API streaming provider.
//!
//! Features:
//! - `x-api-key` header authentication (not Bearer)
//! - `anthropic-version` header
//! - System prompt as top-level field
//! - Native tool use with `tool_use` / `tool_result` content blocks
//! - Image and PDF attachments as `image` / `document` blocks
//! - Streaming via SSE, translated into provider-neutral [`StreamEvent`]s

use async_trait::async_trait;
use fundwise_core::error::ProviderError;
use fundwise_core::message::{AttachmentKind, ContentBlock, Message, Role};
use fundwise_core::provider::*;
use futures::StreamExt;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

const ANTHROPIC_VERSION: &str = "2023-06-01";
pub const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const DEFAULT_MAX_TOKENS: u32 = 4096;
const STREAM_BUFFER: usize = 64;

/// Anthropic native Messages API provider.
pub struct AnthropicProvider {
    name: String,
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl AnthropicProvider {
    /// Create a new Anthropic provider.
    pub fn new(api_key: impl Into<String>) -> Result<Self, ProviderError> {
        // No overall request timeout: a streaming round is bounded by the
        // session deadline instead.
        let client = reqwest::Client::builder()
            .connect_timeout(std::time::Duration::from_secs(10))
            .build()
            .map_err(|e| ProviderError::NotConfigured(format!("HTTP client: {e}")))?;

        Ok(Self {
            name: "anthropic".into(),
            base_url: DEFAULT_BASE_URL.into(),
            api_key: api_key.into(),
            client,
        })
    }

    /// Create with a custom base URL (e.g., for testing or proxies).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Build the JSON body for a streaming Messages call.
    fn build_body(request: &ProviderRequest) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": request.model,
            "messages": Self::to_api_messages(&request.messages),
            "max_tokens": request.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            "temperature": request.temperature,
            "stream": true,
        });

        if let Some(sys) = request.system.as_deref().filter(|s| !s.is_empty()) {
            body["system"] = serde_json::json!(sys);
        }

        if !request.tools.is_empty() {
            body["tools"] = serde_json::json!(Self::to_api_tools(&request.tools));
        }

        body
    }

    /// Convert messages to Anthropic API format with content blocks.
    fn to_api_messages(messages: &[Message]) -> Vec<ApiMessage> {
        messages
            .iter()
            .map(|msg| ApiMessage {
                role: match msg.role {
                    Role::User => "user",
                    Role::Assistant => "assistant",
                },
                content: msg.content.iter().map(Self::to_api_block).collect(),
            })
            .collect()
    }

    fn to_api_block(block: &ContentBlock) -> ApiBlock {
        match block {
            ContentBlock::Text { text } => ApiBlock::Text { text: text.clone() },
            ContentBlock::Attachment { media_type, data } => {
                let source = ApiSource {
                    kind: "base64",
                    media_type: media_type.clone(),
                    data: data.clone(),
                };
                match AttachmentKind::from_media_type(media_type) {
                    Some(AttachmentKind::Document) => ApiBlock::Document { source },
                    // The context builder rejects anything else before it gets here.
                    _ => ApiBlock::Image { source },
                }
            }
            ContentBlock::ToolUse { id, name, input } => ApiBlock::ToolUse {
                id: id.clone(),
                name: name.clone(),
                input: input.clone(),
            },
            ContentBlock::ToolResult {
                tool_use_id,
                content,
                is_error,
            } => ApiBlock::ToolResult {
                tool_use_id: tool_use_id.clone(),
                content: content.clone(),
                is_error: *is_error,
            },
        }
    }

    /// Convert tool definitions to Anthropic format.
    fn to_api_tools(tools: &[ToolDefinition]) -> Vec<ApiTool> {
        tools
            .iter()
            .map(|t| ApiTool {
                name: t.name.clone(),
                description: t.description.clone(),
                input_schema: t.parameters.clone(),
            })
            .collect()
    }

    /// Map a non-200 response to an error.
    fn status_error(status: u16, retry_after: Option<u64>, body: String) -> ProviderError {
        match status {
            429 => ProviderError::RateLimited {
                retry_after_secs: retry_after.unwrap_or(5),
            },
            401 | 403 => ProviderError::AuthenticationFailed("Invalid Anthropic API key".into()),
            404 => ProviderError::ModelNotFound(body),
            529 => ProviderError::Overloaded(body),
            _ => ProviderError::ApiError {
                status_code: status,
                message: body,
            },
        }
    }
}

#[async_trait]
impl Provider for AnthropicProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn stream(&self, request: ProviderRequest) -> Result<EventStream, ProviderError> {
        let url = format!("{}/v1/messages", self.base_url);
        let body = Self::build_body(&request);

        debug!(
            provider = "anthropic",
            model = %request.model,
            messages = request.messages.len(),
            tools = request.tools.len(),
            "Sending streaming request"
        );

        let response = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("Content-Type", "application/json")
            .header("Accept", "text/event-stream")
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ProviderError::Timeout(e.to_string())
                } else {
                    ProviderError::Network(e.to_string())
                }
            })?;

        let status = response.status().as_u16();
        if status != 200 {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse().ok());
            let error_body = response.text().await.unwrap_or_default();
            warn!(status, body = %error_body, "Anthropic API error");
            return Err(Self::status_error(status, retry_after, error_body));
        }

        let (tx, rx) = mpsc::channel(STREAM_BUFFER);

        tokio::spawn(async move {
            let mut byte_stream = response.bytes_stream();
            let mut decoder = SseDecoder::default();
            let mut translator = EventTranslator::default();

            while let Some(chunk_result) = byte_stream.next().await {
                let bytes = match chunk_result {
                    Ok(b) => b,
                    Err(e) => {
                        let _ = tx
                            .send(Err(ProviderError::StreamInterrupted(e.to_string())))
                            .await;
                        return;
                    }
                };

                for data in decoder.push(&bytes) {
                    let value: serde_json::Value = match serde_json::from_str(&data) {
                        Ok(v) => v,
                        Err(e) => {
                            trace!(error = %e, data = %data, "Ignoring unparseable Anthropic SSE");
                            continue;
                        }
                    };

                    match translator.translate(&value) {
                        Ok(events) => {
                            for event in events {
                                let finished = matches!(event, StreamEvent::MessageStop { .. });
                                if tx.send(Ok(event)).await.is_err() {
                                    // Receiver dropped: the round was abandoned.
                                    return;
                                }
                                if finished {
                                    return;
                                }
                            }
                        }
                        Err(e) => {
                            let _ = tx.send(Err(e)).await;
                            return;
                        }
                    }
                }
            }

            let _ = tx
                .send(Err(ProviderError::StreamInterrupted(
                    "stream ended before message_stop".into(),
                )))
                .await;
        });

        Ok(rx)
    }
}

/// Splits an SSE byte stream into `data:` payloads.
///
/// Buffers raw bytes so a multi-byte character split across network chunks
/// is decoded intact.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
}

impl SseDecoder {
    /// Feed bytes; returns every complete `data:` payload now available.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(bytes);
        let mut out = Vec::new();

        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line);
            let line = line.trim_end_matches(['\n', '\r']);

            if line.is_empty() || line.starts_with(':') {
                continue;
            }
            if let Some(data) = line.strip_prefix("data:") {
                let data = data.trim();
                if !data.is_empty() {
                    out.push(data.to_string());
                }
            }
            // `event:` lines are redundant: every payload carries its own `type`.
        }

        out
    }
}

/// Translates Anthropic stream payloads into [`StreamEvent`]s.
///
/// Blocks of kinds the orchestrator does not model (e.g. `thinking`) are
/// skipped along with their deltas and stop events, so the output still
/// obeys Start → Delta* → Stop per block.
#[derive(Debug, Default)]
pub struct EventTranslator {
    skipped_blocks: Vec<u64>,
    stop_reason: Option<StopReason>,
    usage: Usage,
}

impl EventTranslator {
    pub fn translate(
        &mut self,
        event: &serde_json::Value,
    ) -> Result<Vec<StreamEvent>, ProviderError> {
        let index = event["index"].as_u64().unwrap_or(0);

        let events = match event["type"].as_str().unwrap_or("") {
            "message_start" => {
                if let Some(input) = event["message"]["usage"]["input_tokens"].as_u64() {
                    self.usage.input_tokens = input as u32;
                }
                vec![]
            }
            "content_block_start" => {
                let block = &event["content_block"];
                match block["type"].as_str() {
                    Some("text") => {
                        let mut events = vec![StreamEvent::BlockStart {
                            block: BlockKind::Text,
                        }];
                        // Anthropic sends an empty initial text; keep it if it isn't.
                        if let Some(text) = block["text"].as_str().filter(|t| !t.is_empty()) {
                            events.push(StreamEvent::Delta {
                                delta: Delta::Text(text.to_string()),
                            });
                        }
                        events
                    }
                    Some("tool_use") => vec![StreamEvent::BlockStart {
                        block: BlockKind::ToolUse {
                            id: block["id"].as_str().unwrap_or_default().to_string(),
                            name: block["name"].as_str().unwrap_or_default().to_string(),
                        },
                    }],
                    other => {
                        trace!(kind = ?other, index, "Skipping unsupported content block");
                        self.skipped_blocks.push(index);
                        vec![]
                    }
                }
            }
            "content_block_delta" => {
                if self.skipped_blocks.contains(&index) {
                    return Ok(vec![]);
                }
                let delta = &event["delta"];
                match delta["type"].as_str() {
                    Some("text_delta") => delta["text"]
                        .as_str()
                        .map(|t| StreamEvent::Delta {
                            delta: Delta::Text(t.to_string()),
                        })
                        .into_iter()
                        .collect(),
                    Some("input_json_delta") => delta["partial_json"]
                        .as_str()
                        .map(|p| StreamEvent::Delta {
                            delta: Delta::ToolInput(p.to_string()),
                        })
                        .into_iter()
                        .collect(),
                    _ => vec![],
                }
            }
            "content_block_stop" => {
                if let Some(pos) = self.skipped_blocks.iter().position(|i| *i == index) {
                    self.skipped_blocks.swap_remove(pos);
                    vec![]
                } else {
                    vec![StreamEvent::BlockStop]
                }
            }
            "message_delta" => {
                if let Some(reason) = event["delta"]["stop_reason"].as_str() {
                    self.stop_reason = Some(map_stop_reason(reason));
                }
                if let Some(output) = event["usage"]["output_tokens"].as_u64() {
                    self.usage.output_tokens = output as u32;
                }
                vec![]
            }
            "message_stop" => vec![StreamEvent::MessageStop {
                stop_reason: self.stop_reason.unwrap_or(StopReason::Finished),
                usage: Some(self.usage),
            }],
            "error" => {
                let kind = event["error"]["type"].as_str().unwrap_or("");
                let message = event["error"]["message"]
                    .as_str()
                    .unwrap_or("unknown stream error")
                    .to_string();
                return Err(match kind {
                    "overloaded_error" => ProviderError::Overloaded(message),
                    "rate_limit_error" => ProviderError::RateLimited {
                        retry_after_secs: 5,
                    },
                    "api_error" => ProviderError::StreamInterrupted(message),
                    _ => ProviderError::ApiError {
                        status_code: 200,
                        message,
                    },
                });
            }
            // ping and future event types
            _ => vec![],
        };

        Ok(events)
    }
}

fn map_stop_reason(reason: &str) -> StopReason {
    match reason {
        "tool_use" => StopReason::ToolRequested,
        "max_tokens" => StopReason::LengthLimit,
        _ => StopReason::Finished,
    }
}

// --- Anthropic API types ---

#[derive(Debug, Serialize)]
struct ApiMessage {
    role: &'static str,
    content: Vec<ApiBlock>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ApiBlock {
    Text {
        text: String,
    },
    Image {
        source: ApiSource,
    },
    Document {
        source: ApiSource,
    },
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    ToolResult {
        tool_use_id: String,
        content: String,
        #[serde(skip_serializing_if = "std::ops::Not::not")]
        is_error: bool,
    },
}

#[derive(Debug, Serialize)]
struct ApiSource {
    #[serde(rename = "type")]
    kind: &'static str,
    media_type: String,
    data: String,
}

#[derive(Debug, Serialize)]
struct ApiTool {
    name: String,
    description: String,
    input_schema: serde_json::Value,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn translate_all(payloads: &[serde_json::Value]) -> Vec<StreamEvent> {
        let mut translator = EventTranslator::default();
        payloads
            .iter()
            .flat_map(|p| translator.translate(p).unwrap())
            .collect()
    }

    #[test]
    fn constructor() {
        let provider = AnthropicProvider::new("sk-ant-test").unwrap();
        assert_eq!(provider.name(), "anthropic");
        assert_eq!(provider.base_url, DEFAULT_BASE_URL);
    }

    #[test]
    fn constructor_with_base_url() {
        let provider = AnthropicProvider::new("sk-ant-test")
            .unwrap()
            .with_base_url("https://custom.proxy.com/");
        assert_eq!(provider.base_url, "https://custom.proxy.com");
    }

    #[test]
    fn body_has_system_tools_and_stream_flag() {
        let request = ProviderRequest {
            model: "claude-sonnet-4-20250514".into(),
            system: Some("Be precise".into()),
            messages: vec![Message::user("Hej")],
            temperature: 0.2,
            max_tokens: None,
            tools: vec![ToolDefinition {
                name: "market_data".into(),
                description: "Prices".into(),
                parameters: json!({"type": "object"}),
            }],
        };
        let body = AnthropicProvider::build_body(&request);
        assert_eq!(body["stream"], true);
        assert_eq!(body["system"], "Be precise");
        assert_eq!(body["max_tokens"], DEFAULT_MAX_TOKENS);
        assert_eq!(body["tools"][0]["input_schema"]["type"], "object");
        assert_eq!(body["messages"][0]["content"][0]["type"], "text");
    }

    #[test]
    fn attachments_become_image_and_document_blocks() {
        let message = Message::with_blocks(
            Role::User,
            vec![
                ContentBlock::Attachment {
                    media_type: "image/png".into(),
                    data: "aGVq".into(),
                },
                ContentBlock::Attachment {
                    media_type: "application/pdf".into(),
                    data: "JVBE".into(),
                },
                ContentBlock::text("What is this?"),
            ],
        );
        let api = serde_json::to_value(AnthropicProvider::to_api_messages(&[message])).unwrap();
        let blocks = &api[0]["content"];
        assert_eq!(blocks[0]["type"], "image");
        assert_eq!(blocks[0]["source"]["type"], "base64");
        assert_eq!(blocks[0]["source"]["media_type"], "image/png");
        assert_eq!(blocks[1]["type"], "document");
        assert_eq!(blocks[2]["type"], "text");
    }

    #[test]
    fn tool_turns_convert() {
        let assistant = Message::with_blocks(
            Role::Assistant,
            vec![
                ContentBlock::text("Let me check"),
                ContentBlock::ToolUse {
                    id: "toolu_1".into(),
                    name: "lookup_security".into(),
                    input: json!({"isin": "SE0000108656"}),
                },
            ],
        );
        let results = Message::with_blocks(
            Role::User,
            vec![ContentBlock::ToolResult {
                tool_use_id: "toolu_1".into(),
                content: r#"{"error":"down"}"#.into(),
                is_error: true,
            }],
        );
        let api =
            serde_json::to_value(AnthropicProvider::to_api_messages(&[assistant, results])).unwrap();
        assert_eq!(api[0]["role"], "assistant");
        assert_eq!(api[0]["content"][1]["type"], "tool_use");
        assert_eq!(api[0]["content"][1]["input"]["isin"], "SE0000108656");
        assert_eq!(api[1]["role"], "user");
        assert_eq!(api[1]["content"][0]["type"], "tool_result");
        assert_eq!(api[1]["content"][0]["is_error"], true);
    }

    #[test]
    fn status_errors_classified() {
        assert!(matches!(
            AnthropicProvider::status_error(429, Some(12), String::new()),
            ProviderError::RateLimited {
                retry_after_secs: 12
            }
        ));
        assert!(matches!(
            AnthropicProvider::status_error(401, None, String::new()),
            ProviderError::AuthenticationFailed(_)
        ));
        assert!(AnthropicProvider::status_error(529, None, "busy".into()).is_transient());
        assert!(!AnthropicProvider::status_error(400, None, "bad".into()).is_transient());
        assert!(AnthropicProvider::status_error(500, None, "oops".into()).is_transient());
    }

    #[test]
    fn sse_decoder_handles_split_chunks() {
        let mut decoder = SseDecoder::default();
        assert!(decoder.push(b"event: ping\ndata: {\"type\":").is_empty());
        let out = decoder.push(b"\"ping\"}\r\n\n: comment\ndata: {\"a\":1}\n");
        assert_eq!(out, vec![r#"{"type":"ping"}"#, r#"{"a":1}"#]);
    }

    #[test]
    fn sse_decoder_keeps_multibyte_chars_intact() {
        let mut decoder = SseDecoder::default();
        let line = "data: {\"text\":\"Förvaltning\"}\n".as_bytes();
        let split = line.iter().position(|b| *b == 0xC3).unwrap() + 1;
        assert!(decoder.push(&line[..split]).is_empty());
        let out = decoder.push(&line[split..]);
        assert_eq!(out, vec![r#"{"text":"Förvaltning"}"#]);
    }

    #[test]
    fn translates_text_round() {
        let events = translate_all(&[
            json!({"type": "message_start", "message": {"usage": {"input_tokens": 12}}}),
            json!({"type": "content_block_start", "index": 0, "content_block": {"type": "text", "text": ""}}),
            json!({"type": "content_block_delta", "index": 0, "delta": {"type": "text_delta", "text": "Hej"}}),
            json!({"type": "ping"}),
            json!({"type": "content_block_stop", "index": 0}),
            json!({"type": "message_delta", "delta": {"stop_reason": "end_turn"}, "usage": {"output_tokens": 3}}),
            json!({"type": "message_stop"}),
        ]);
        assert_eq!(
            events,
            vec![
                StreamEvent::BlockStart {
                    block: BlockKind::Text
                },
                StreamEvent::Delta {
                    delta: Delta::Text("Hej".into())
                },
                StreamEvent::BlockStop,
                StreamEvent::MessageStop {
                    stop_reason: StopReason::Finished,
                    usage: Some(Usage {
                        input_tokens: 12,
                        output_tokens: 3
                    }),
                },
            ]
        );
    }

    #[test]
    fn translates_tool_use_and_skips_thinking() {
        let events = translate_all(&[
            json!({"type": "content_block_start", "index": 0, "content_block": {"type": "thinking", "thinking": ""}}),
            json!({"type": "content_block_delta", "index": 0, "delta": {"type": "thinking_delta", "thinking": "hmm"}}),
            json!({"type": "content_block_stop", "index": 0}),
            json!({"type": "content_block_start", "index": 1, "content_block": {"type": "tool_use", "id": "toolu_9", "name": "market_data", "input": {}}}),
            json!({"type": "content_block_delta", "index": 1, "delta": {"type": "input_json_delta", "partial_json": "{\"isin\":"}}),
            json!({"type": "content_block_delta", "index": 1, "delta": {"type": "input_json_delta", "partial_json": "\"X\"}"}}),
            json!({"type": "content_block_stop", "index": 1}),
            json!({"type": "message_delta", "delta": {"stop_reason": "tool_use"}}),
            json!({"type": "message_stop"}),
        ]);
        assert_eq!(events.len(), 5);
        assert_eq!(
            events[0],
            StreamEvent::BlockStart {
                block: BlockKind::ToolUse {
                    id: "toolu_9".into(),
                    name: "market_data".into()
                }
            }
        );
        assert!(matches!(
            events[4],
            StreamEvent::MessageStop {
                stop_reason: StopReason::ToolRequested,
                ..
            }
        ));
    }

    #[test]
    fn max_tokens_maps_to_length_limit() {
        assert_eq!(map_stop_reason("max_tokens"), StopReason::LengthLimit);
        assert_eq!(map_stop_reason("stop_sequence"), StopReason::Finished);
    }

    #[test]
    fn error_event_is_classified() {
        let mut translator = EventTranslator::default();
        let err = translator
            .translate(&json!({"type": "error", "error": {"type": "overloaded_error", "message": "Overloaded"}}))
            .unwrap_err();
        assert!(matches!(err, ProviderError::Overloaded(_)));
        assert!(err.is_transient());
    }
}
