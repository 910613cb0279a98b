//! Anthropic Messages API adapter.
//!
//! Covers the `anthropic` and `anthropic-bedrock` providers; the latter
//! differs only in endpoint and credentials. Streams SSE events
//! (`message_start`, `content_block_*`, `message_delta`) and decodes
//! `tool_use` content blocks. Cache markers are re-placed each turn: the
//! last content block of the history carries an ephemeral `cache_control`
//! and earlier markers are removed, preserving prefix-cache hits.

use anyhow::{anyhow, bail, Context, Result};
use base64::Engine;
use eventsource_stream::Eventsource;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::constants::{ANTHROPIC_BASE_URL, ANTHROPIC_VERSION, DEFAULT_ANTHROPIC_MODEL, DEFAULT_MAX_TOKENS};
use crate::header::{Interlocutor, NativeKind, Provider, ThinkingEffort};
use crate::message::Message;

use super::turn::{speaker_wrapped, user_model_text, ProviderAdapter, RealizedCall, ToolCallEntry};
use super::{DeltaSender, TurnContext};

fn is_false(v: &bool) -> bool {
    !*v
}

#[derive(Debug, Clone, Serialize)]
pub struct CacheControl {
    pub r#type: &'static str,
}

impl CacheControl {
    fn ephemeral() -> Self {
        Self { r#type: "ephemeral" }
    }
}

/// One content block in a request message.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Block {
    Text {
        text: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        cache_control: Option<CacheControl>,
    },
    Image {
        source: Source,
    },
    Document {
        source: Source,
    },
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
    ToolResult {
        tool_use_id: String,
        content: Vec<Block>,
        #[serde(skip_serializing_if = "is_false")]
        is_error: bool,
    },
}

impl Block {
    fn text(text: impl Into<String>) -> Self {
        Block::Text {
            text: text.into(),
            cache_control: None,
        }
    }

    fn for_part(part: &crate::attachments::AttachmentPart) -> Option<Self> {
        let source = Source::Base64 {
            media_type: part.mimetype.clone(),
            data: base64::engine::general_purpose::STANDARD.encode(&part.bytes),
        };
        if part.mimetype.starts_with("image/") {
            Some(Block::Image { source })
        } else if part.mimetype == "application/pdf" {
            Some(Block::Document { source })
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Source {
    Base64 { media_type: String, data: String },
}

/// One request message.
#[derive(Debug, Clone, Serialize)]
pub struct WireMessage {
    pub role: &'static str,
    pub content: Vec<Block>,
}

/// The accumulated result of one streamed completion.
#[derive(Debug, Default)]
pub struct Completed {
    blocks: Vec<RespBlock>,
    stop_reason: Option<String>,
}

#[derive(Debug)]
enum RespBlock {
    Text(String),
    Thinking,
    ToolUse {
        id: String,
        name: String,
        input_json: String,
    },
}

/// SSE events the Messages API streams.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum StreamEvent {
    MessageStart {},
    ContentBlockStart { content_block: Value },
    ContentBlockDelta { delta: Value },
    ContentBlockStop {},
    MessageDelta { delta: Value },
    MessageStop,
    Ping,
    Error { error: Value },
    #[serde(other)]
    Unknown,
}

pub struct AnthropicAdapter {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    bearer: bool,
    model: String,
}

impl AnthropicAdapter {
    pub fn new(provider: Provider, interlocutor: &Interlocutor) -> Result<Self> {
        let (base_url, api_key, bearer) = match provider {
            Provider::AnthropicBedrock => {
                let base = std::env::var("ANTHROPIC_BEDROCK_BASE_URL")
                    .context("Set ANTHROPIC_BEDROCK_BASE_URL to use anthropic-bedrock")?;
                let key = std::env::var("AWS_BEARER_TOKEN_BEDROCK")
                    .context("Set AWS_BEARER_TOKEN_BEDROCK to use anthropic-bedrock")?;
                (base, key, true)
            }
            _ => {
                let key = std::env::var("ANTHROPIC_API_KEY")
                    .context("No API key found for Anthropic. Set ANTHROPIC_API_KEY")?;
                (ANTHROPIC_BASE_URL.to_string(), key, false)
            }
        };
        Ok(Self {
            client: reqwest::Client::new(),
            base_url,
            api_key,
            bearer,
            model: interlocutor
                .model
                .clone()
                .unwrap_or_else(|| DEFAULT_ANTHROPIC_MODEL.to_string()),
        })
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let req = self
            .client
            .request(method, format!("{}{}", self.base_url, path))
            .header("anthropic-version", ANTHROPIC_VERSION);
        if self.bearer {
            req.bearer_auth(&self.api_key)
        } else {
            req.header("x-api-key", &self.api_key)
        }
    }

    fn thinking_budget(effort: Option<ThinkingEffort>) -> Option<u64> {
        match effort {
            None | Some(ThinkingEffort::None) => Option::None,
            Some(ThinkingEffort::Low) => Some(1024),
            Some(ThinkingEffort::Medium) => Some(4096),
            Some(ThinkingEffort::High) => Some(16384),
        }
    }

    fn build_body(&self, ctx: &TurnContext<'_>, messages: &[WireMessage]) -> Value {
        let interlocutor = ctx.interlocutor;
        let mut tools: Vec<Value> = ctx
            .registry
            .definitions()
            .into_iter()
            .map(|def| {
                json!({
                    "name": def.name,
                    "description": def.description,
                    "input_schema": {
                        "type": "object",
                        "properties": def.parameters,
                        "required": def.required,
                    },
                })
            })
            .collect();
        for native in ctx.registry.native_tools() {
            tools.push(match native {
                NativeKind::Search => json!({
                    "type": "web_search_20250305",
                    "name": "web_search",
                }),
                NativeKind::Code => json!({
                    "type": "code_execution_20250522",
                    "name": "code_execution",
                }),
            });
        }

        let mut max_tokens = interlocutor.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS);
        let mut body = json!({
            "model": self.model,
            "system": interlocutor.prompt,
            "messages": messages,
            "stream": true,
        });
        if let Some(budget) = Self::thinking_budget(interlocutor.thinking_effort) {
            // The token ceiling must leave room above the thinking budget.
            max_tokens = max_tokens.max(budget + 1024);
            body["thinking"] = json!({ "type": "enabled", "budget_tokens": budget });
        } else if let Some(t) = interlocutor.temperature {
            body["temperature"] = json!(t);
        }
        body["max_tokens"] = json!(max_tokens);
        if !tools.is_empty() {
            body["tools"] = json!(tools);
        }
        body
    }
}

#[async_trait::async_trait]
impl ProviderAdapter for AnthropicAdapter {
    type Msg = WireMessage;
    type Resp = Completed;

    fn handle_message(
        &self,
        ctx: &TurnContext<'_>,
        message: &Message,
        is_last: bool,
    ) -> (Vec<WireMessage>, bool) {
        match message {
            Message::User(user) => {
                let reset = user.attachments.iter().any(|a| a.is_reset());
                let text = user_model_text(user, ctx.interlocutor.reminder.as_deref(), is_last);
                let mut content = Vec::new();
                if !text.is_empty() {
                    content.push(Block::text(text));
                }
                content.extend(user.parts.iter().filter_map(Block::for_part));
                if content.is_empty() {
                    content.push(Block::text(""));
                }
                (vec![WireMessage { role: "user", content }], reset)
            }
            Message::Assistant(assistant) => {
                if !assistant
                    .interlocutor
                    .eq_ignore_ascii_case(&ctx.interlocutor.name)
                {
                    // Another speaker's turn reads as user content.
                    let text = speaker_wrapped(&assistant.interlocutor, &assistant.text());
                    return (
                        vec![WireMessage {
                            role: "user",
                            content: vec![Block::text(text)],
                        }],
                        false,
                    );
                }

                let mut out = Vec::new();
                for interaction in &assistant.interactions {
                    let mut blocks = Vec::new();
                    if !interaction.text.trim().is_empty() {
                        blocks.push(Block::text(interaction.text.trim()));
                    }
                    let mut results = Vec::new();
                    for call in &interaction.calls {
                        let id = call
                            .id
                            .clone()
                            .unwrap_or_else(|| format!("call_{}", uuid::Uuid::new_v4()));
                        blocks.push(Block::ToolUse {
                            id: id.clone(),
                            name: call.name.clone(),
                            input: call.args.clone(),
                        });
                        let content = call
                            .results
                            .iter()
                            .filter(|r| !r.is_binary())
                            .map(|r| Block::text(&r.text))
                            .collect();
                        results.push(Block::ToolResult {
                            tool_use_id: id,
                            content,
                            is_error: call.is_error,
                        });
                    }
                    if !blocks.is_empty() {
                        out.push(WireMessage {
                            role: "assistant",
                            content: blocks,
                        });
                    }
                    if !results.is_empty() {
                        out.push(WireMessage {
                            role: "user",
                            content: results,
                        });
                    }
                }
                (out, false)
            }
        }
    }

    async fn create_completion(
        &self,
        ctx: &TurnContext<'_>,
        messages: &[WireMessage],
        deltas: Option<&DeltaSender>,
    ) -> Result<Completed> {
        let body = self.build_body(ctx, messages);
        let response = self
            .request(reqwest::Method::POST, "/messages")
            .json(&body)
            .send()
            .await
            .context("The Anthropic request failed to send")?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            bail!("Anthropic returned HTTP {status}: {text}");
        }

        let mut completed = Completed::default();
        let mut events = response.bytes_stream().eventsource();
        while let Some(event) = events.next().await {
            let event = event.context("The Anthropic stream was interrupted")?;
            let parsed: StreamEvent = match serde_json::from_str(&event.data) {
                Ok(p) => p,
                Err(e) => {
                    tracing::debug!(error = %e, "skipping unparseable stream event");
                    continue;
                }
            };
            match parsed {
                StreamEvent::ContentBlockStart { content_block } => {
                    match content_block.get("type").and_then(Value::as_str) {
                        Some("text") => completed.blocks.push(RespBlock::Text(String::new())),
                        Some("thinking") | Some("redacted_thinking") => {
                            completed.blocks.push(RespBlock::Thinking)
                        }
                        Some("tool_use") => completed.blocks.push(RespBlock::ToolUse {
                            id: content_block
                                .get("id")
                                .and_then(Value::as_str)
                                .unwrap_or_default()
                                .to_string(),
                            name: content_block
                                .get("name")
                                .and_then(Value::as_str)
                                .unwrap_or_default()
                                .to_string(),
                            input_json: String::new(),
                        }),
                        _ => completed.blocks.push(RespBlock::Thinking),
                    }
                }
                StreamEvent::ContentBlockDelta { delta } => {
                    match delta.get("type").and_then(Value::as_str) {
                        Some("text_delta") => {
                            let piece = delta.get("text").and_then(Value::as_str).unwrap_or("");
                            if let Some(RespBlock::Text(text)) = completed.blocks.last_mut() {
                                text.push_str(piece);
                            }
                            if let Some(tx) = deltas {
                                tx.send(piece.to_string()).ok();
                            }
                        }
                        Some("input_json_delta") => {
                            let piece = delta
                                .get("partial_json")
                                .and_then(Value::as_str)
                                .unwrap_or("");
                            if let Some(RespBlock::ToolUse { input_json, .. }) =
                                completed.blocks.last_mut()
                            {
                                input_json.push_str(piece);
                            }
                        }
                        _ => {}
                    }
                }
                StreamEvent::MessageDelta { delta } => {
                    if let Some(reason) = delta.get("stop_reason").and_then(Value::as_str) {
                        completed.stop_reason = Some(reason.to_string());
                    }
                }
                StreamEvent::Error { error } => {
                    bail!("Anthropic streamed an error: {error}");
                }
                StreamEvent::MessageStart {}
                | StreamEvent::ContentBlockStop {}
                | StreamEvent::MessageStop
                | StreamEvent::Ping
                | StreamEvent::Unknown => {}
            }
        }
        if completed.stop_reason.as_deref() == Some("max_tokens") {
            tracing::warn!("the reply was cut off by the token ceiling");
        }
        Ok(completed)
    }

    fn response_text(&self, response: &Completed) -> String {
        response
            .blocks
            .iter()
            .filter_map(|b| match b {
                RespBlock::Text(t) => Some(t.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    fn tool_call_entries(&self, response: &Completed) -> Vec<ToolCallEntry> {
        response
            .blocks
            .iter()
            .filter_map(|b| match b {
                RespBlock::ToolUse {
                    id,
                    name,
                    input_json,
                } => {
                    let args = if input_json.trim().is_empty() {
                        json!({})
                    } else {
                        serde_json::from_str(input_json).unwrap_or_else(|_| json!({}))
                    };
                    Some(ToolCallEntry {
                        id: Some(id.clone()),
                        name: name.clone(),
                        args,
                    })
                }
                _ => None,
            })
            .collect()
    }

    fn append_assistant_message(&self, messages: &mut Vec<WireMessage>, response: &Completed) {
        let mut content = Vec::new();
        for block in &response.blocks {
            match block {
                RespBlock::Text(t) if !t.is_empty() => content.push(Block::text(t)),
                RespBlock::ToolUse {
                    id,
                    name,
                    input_json,
                } => content.push(Block::ToolUse {
                    id: id.clone(),
                    name: name.clone(),
                    input: serde_json::from_str(input_json).unwrap_or_else(|_| json!({})),
                }),
                _ => {}
            }
        }
        if !content.is_empty() {
            messages.push(WireMessage {
                role: "assistant",
                content,
            });
        }
    }

    fn append_tool_results(&self, messages: &mut Vec<WireMessage>, realized: &[RealizedCall]) {
        let mut content = Vec::new();
        for call in realized {
            let id = call
                .entry
                .id
                .clone()
                .unwrap_or_else(|| format!("call_{}", uuid::Uuid::new_v4()));
            let inner: Vec<Block> = call
                .model_results()
                .into_iter()
                .map(|r| Block::text(&r.text))
                .collect();
            content.push(Block::ToolResult {
                tool_use_id: id,
                content: inner,
                is_error: call.is_error,
            });
        }
        // Binary results ride along as attachments after the results.
        for call in realized {
            for part in call.binary_parts() {
                if let Some(block) = Block::for_part(&part) {
                    content.push(block);
                }
            }
        }
        messages.push(WireMessage {
            role: "user",
            content,
        });
    }

    fn apply_cache_control(&self, messages: &mut [WireMessage]) {
        for message in messages.iter_mut() {
            for block in message.content.iter_mut() {
                if let Block::Text { cache_control, .. } = block {
                    *cache_control = None;
                }
            }
        }
        if let Some(last) = messages.last_mut() {
            if let Some(Block::Text { cache_control, .. }) = last.content.last_mut() {
                *cache_control = Some(CacheControl::ephemeral());
            }
        }
    }

    async fn list_models(&self) -> Result<Vec<String>> {
        let response = self
            .request(reqwest::Method::GET, "/models")
            .send()
            .await
            .context("The Anthropic model listing failed")?;
        let body: Value = response.json().await?;
        Ok(body
            .get("data")
            .and_then(Value::as_array)
            .map(|models| {
                models
                    .iter()
                    .filter_map(|m| m.get("id").and_then(Value::as_str))
                    .map(str::to_string)
                    .collect()
            })
            .ok_or_else(|| anyhow!("Anthropic returned an unexpected model list"))?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_adapter() -> AnthropicAdapter {
        std::env::set_var("ANTHROPIC_API_KEY", "test-key");
        let interlocutor: Interlocutor = serde_yaml::from_str("{name: Bot, prompt: p}").unwrap();
        AnthropicAdapter::new(Provider::Anthropic, &interlocutor).unwrap()
    }

    #[test]
    fn cache_marker_moves_to_the_last_block() {
        let adapter = test_adapter();
        let mut messages = vec![
            WireMessage {
                role: "user",
                content: vec![Block::Text {
                    text: "a".into(),
                    cache_control: Some(CacheControl::ephemeral()),
                }],
            },
            WireMessage {
                role: "user",
                content: vec![Block::text("b")],
            },
        ];
        adapter.apply_cache_control(&mut messages);
        match &messages[0].content[0] {
            Block::Text { cache_control, .. } => assert!(cache_control.is_none()),
            _ => unreachable!(),
        }
        match &messages[1].content[0] {
            Block::Text { cache_control, .. } => assert!(cache_control.is_some()),
            _ => unreachable!(),
        }
    }

    #[test]
    fn thinking_budget_scales_with_effort() {
        assert_eq!(AnthropicAdapter::thinking_budget(None), None);
        assert_eq!(
            AnthropicAdapter::thinking_budget(Some(ThinkingEffort::None)),
            None
        );
        assert!(
            AnthropicAdapter::thinking_budget(Some(ThinkingEffort::High)).unwrap()
                > AnthropicAdapter::thinking_budget(Some(ThinkingEffort::Low)).unwrap()
        );
    }
}
