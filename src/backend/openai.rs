//! Chat-completions adapter for OpenAI-compatible providers.
//!
//! Covers `openai`, `chatgpt`, `openrouter`, `ollama`, `gemini`, and
//! `openai-responses` (all of these expose or are routed through the
//! chat-completions surface; only the base URL and the credential
//! variable differ). Streams `chat.completion.chunk` SSE deltas and
//! reassembles `tool_calls` fragments keyed by index.

use anyhow::{anyhow, bail, Context, Result};
use base64::Engine;
use eventsource_stream::Eventsource;
use futures::StreamExt;
use serde::Serialize;
use serde_json::{json, Value};

use crate::constants::{
    CHATGPT_BASE_URL, DEFAULT_GEMINI_MODEL, DEFAULT_MAX_TOKENS, DEFAULT_OLLAMA_MODEL,
    DEFAULT_OPENAI_MODEL, DEFAULT_OPENROUTER_MODEL, GEMINI_BASE_URL, OLLAMA_BASE_URL,
    OPENAI_BASE_URL, OPENROUTER_BASE_URL,
};
use crate::header::{Interlocutor, NativeKind, Provider, ThinkingEffort};
use crate::message::Message;

use super::turn::{speaker_wrapped, user_model_text, ProviderAdapter, RealizedCall, ToolCallEntry};
use super::{DeltaSender, TurnContext};

/// One chat message on the wire.
#[derive(Debug, Clone, Serialize)]
pub struct WireMessage {
    pub role: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl WireMessage {
    fn text(role: &'static str, text: impl Into<String>) -> Self {
        Self {
            role,
            content: Some(Value::String(text.into())),
            tool_calls: None,
            tool_call_id: None,
        }
    }
}

/// One reassembled tool call from the stream.
#[derive(Debug, Clone, Default)]
pub struct StreamedCall {
    pub id: String,
    pub name: String,
    pub arguments: String,
}

/// The accumulated result of one streamed completion.
#[derive(Debug, Default)]
pub struct Completed {
    pub text: String,
    pub calls: Vec<StreamedCall>,
}

pub struct OpenAiAdapter {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
}

impl OpenAiAdapter {
    pub fn new(provider: Provider, interlocutor: &Interlocutor) -> Result<Self> {
        let (base_url, key_var, default_model) = match provider {
            Provider::Openrouter => (
                OPENROUTER_BASE_URL,
                Some("OPENROUTER_API_KEY"),
                DEFAULT_OPENROUTER_MODEL,
            ),
            Provider::Ollama => (OLLAMA_BASE_URL, None, DEFAULT_OLLAMA_MODEL),
            Provider::Gemini => (GEMINI_BASE_URL, Some("GEMINI_API_KEY"), DEFAULT_GEMINI_MODEL),
            Provider::Chatgpt => (
                CHATGPT_BASE_URL,
                Some("CHATGPT_ACCESS_TOKEN"),
                DEFAULT_OPENAI_MODEL,
            ),
            _ => (OPENAI_BASE_URL, Some("OPENAI_API_KEY"), DEFAULT_OPENAI_MODEL),
        };

        let api_key = match key_var {
            None => None,
            Some(var) => Some(std::env::var(var).with_context(|| {
                format!("No API key found for {provider:?}. Set {var}")
            })?),
        };

        Ok(Self {
            client: reqwest::Client::new(),
            base_url: base_url.to_string(),
            api_key,
            model: interlocutor
                .model
                .clone()
                .unwrap_or_else(|| default_model.to_string()),
        })
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let mut req = self
            .client
            .request(method, format!("{}{}", self.base_url, path));
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }
        req
    }

    fn build_body(&self, ctx: &TurnContext<'_>, messages: &[WireMessage]) -> Value {
        let interlocutor = ctx.interlocutor;
        let mut tools: Vec<Value> = ctx
            .registry
            .definitions()
            .into_iter()
            .map(|def| {
                json!({
                    "type": "function",
                    "function": {
                        "name": def.name,
                        "description": def.description,
                        "parameters": {
                            "type": "object",
                            "properties": def.parameters,
                            "required": def.required,
                        },
                    },
                })
            })
            .collect();
        for native in ctx.registry.native_tools() {
            if matches!(native, NativeKind::Search) {
                tools.push(json!({ "type": "web_search" }));
            }
            // There is no portable code-interpreter surface on plain chat
            // completions; the marker is ignored here.
        }

        let mut body = json!({
            "model": self.model,
            "messages": messages,
            "stream": true,
            "max_tokens": interlocutor.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
        });
        if let Some(t) = interlocutor.temperature {
            body["temperature"] = json!(t);
        }
        if let Some(effort) = reasoning_effort(interlocutor.thinking_effort) {
            body["reasoning_effort"] = json!(effort);
        }
        if !tools.is_empty() {
            body["tools"] = json!(tools);
        }
        body
    }
}

fn reasoning_effort(effort: Option<ThinkingEffort>) -> Option<&'static str> {
    match effort {
        None | Some(ThinkingEffort::None) => Option::None,
        Some(ThinkingEffort::Low) => Some("low"),
        Some(ThinkingEffort::Medium) => Some("medium"),
        Some(ThinkingEffort::High) => Some("high"),
    }
}

/// Folds one streamed chunk's `tool_calls` deltas into the accumulator.
fn fold_tool_call_delta(calls: &mut Vec<StreamedCall>, deltas: &[Value]) {
    for delta in deltas {
        let index = delta.get("index").and_then(Value::as_u64).unwrap_or(0) as usize;
        while calls.len() <= index {
            calls.push(StreamedCall::default());
        }
        let call = &mut calls[index];
        if let Some(id) = delta.get("id").and_then(Value::as_str) {
            call.id.push_str(id);
        }
        if let Some(function) = delta.get("function") {
            if let Some(name) = function.get("name").and_then(Value::as_str) {
                call.name.push_str(name);
            }
            if let Some(arguments) = function.get("arguments").and_then(Value::as_str) {
                call.arguments.push_str(arguments);
            }
        }
    }
}

#[async_trait::async_trait]
impl ProviderAdapter for OpenAiAdapter {
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
                let binary: Vec<&crate::attachments::AttachmentPart> = user
                    .parts
                    .iter()
                    .filter(|p| p.mimetype.starts_with("image/"))
                    .collect();
                let message = if binary.is_empty() {
                    WireMessage::text("user", text)
                } else {
                    // Multimodal content: text part plus data-URI images.
                    let mut parts = vec![json!({ "type": "text", "text": text })];
                    for part in binary {
                        let data = base64::engine::general_purpose::STANDARD.encode(&part.bytes);
                        parts.push(json!({
                            "type": "image_url",
                            "image_url": { "url": format!("data:{};base64,{data}", part.mimetype) },
                        }));
                    }
                    WireMessage {
                        role: "user",
                        content: Some(Value::Array(parts)),
                        tool_calls: None,
                        tool_call_id: None,
                    }
                };
                (vec![message], reset)
            }
            Message::Assistant(assistant) => {
                if !assistant
                    .interlocutor
                    .eq_ignore_ascii_case(&ctx.interlocutor.name)
                {
                    let text = speaker_wrapped(&assistant.interlocutor, &assistant.text());
                    return (vec![WireMessage::text("user", text)], false);
                }

                let mut out = Vec::new();
                for interaction in &assistant.interactions {
                    let mut tool_calls = Vec::new();
                    let mut results = Vec::new();
                    for call in &interaction.calls {
                        let id = call
                            .id
                            .clone()
                            .unwrap_or_else(|| format!("call_{}", uuid::Uuid::new_v4()));
                        tool_calls.push(json!({
                            "id": id,
                            "type": "function",
                            "function": {
                                "name": call.name,
                                "arguments": call.args.to_string(),
                            },
                        }));
                        let text: Vec<&str> = call
                            .results
                            .iter()
                            .filter(|r| !r.is_binary())
                            .map(|r| r.text.as_str())
                            .collect();
                        results.push(WireMessage {
                            role: "tool",
                            content: Some(Value::String(text.join("\n"))),
                            tool_calls: None,
                            tool_call_id: Some(id),
                        });
                    }
                    out.push(WireMessage {
                        role: "assistant",
                        content: (!interaction.text.trim().is_empty())
                            .then(|| Value::String(interaction.text.trim().to_string())),
                        tool_calls: (!tool_calls.is_empty()).then_some(tool_calls),
                        tool_call_id: None,
                    });
                    out.extend(results);
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
        // The system prompt leads the message list on this surface.
        let mut wire = vec![WireMessage::text("system", &ctx.interlocutor.prompt)];
        wire.extend_from_slice(messages);

        let body = self.build_body(ctx, &wire);
        let response = self
            .request(reqwest::Method::POST, "/chat/completions")
            .json(&body)
            .send()
            .await
            .context("The chat completion request failed to send")?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            bail!("The provider returned HTTP {status}: {text}");
        }

        let mut completed = Completed::default();
        let mut events = response.bytes_stream().eventsource();
        while let Some(event) = events.next().await {
            let event = event.context("The completion stream was interrupted")?;
            if event.data.trim() == "[DONE]" {
                break;
            }
            let chunk: Value = match serde_json::from_str(&event.data) {
                Ok(v) => v,
                Err(e) => {
                    tracing::debug!(error = %e, "skipping unparseable stream chunk");
                    continue;
                }
            };
            let Some(delta) = chunk.pointer("/choices/0/delta") else {
                continue;
            };
            if let Some(piece) = delta.get("content").and_then(Value::as_str) {
                completed.text.push_str(piece);
                if let Some(tx) = deltas {
                    tx.send(piece.to_string()).ok();
                }
            }
            if let Some(calls) = delta.get("tool_calls").and_then(Value::as_array) {
                fold_tool_call_delta(&mut completed.calls, calls);
            }
        }
        Ok(completed)
    }

    fn response_text(&self, response: &Completed) -> String {
        response.text.clone()
    }

    fn tool_call_entries(&self, response: &Completed) -> Vec<ToolCallEntry> {
        response
            .calls
            .iter()
            .map(|call| ToolCallEntry {
                id: (!call.id.is_empty()).then(|| call.id.clone()),
                name: call.name.clone(),
                args: serde_json::from_str(&call.arguments).unwrap_or_else(|_| json!({})),
            })
            .collect()
    }

    fn append_assistant_message(&self, messages: &mut Vec<WireMessage>, response: &Completed) {
        let tool_calls: Vec<Value> = response
            .calls
            .iter()
            .map(|call| {
                json!({
                    "id": call.id,
                    "type": "function",
                    "function": { "name": call.name, "arguments": call.arguments },
                })
            })
            .collect();
        messages.push(WireMessage {
            role: "assistant",
            content: (!response.text.is_empty()).then(|| Value::String(response.text.clone())),
            tool_calls: (!tool_calls.is_empty()).then_some(tool_calls),
            tool_call_id: None,
        });
    }

    fn append_tool_results(&self, messages: &mut Vec<WireMessage>, realized: &[RealizedCall]) {
        for call in realized {
            let id = call.entry.id.clone().unwrap_or_default();
            let text: Vec<&str> = call.model_results().iter().map(|r| r.text.as_str()).collect();
            messages.push(WireMessage {
                role: "tool",
                content: Some(Value::String(text.join("\n"))),
                tool_calls: None,
                tool_call_id: Some(id),
            });
        }
        // Binary results arrive as a following user message with images.
        let mut parts = Vec::new();
        for call in realized {
            for part in call.binary_parts() {
                if part.mimetype.starts_with("image/") {
                    let data = base64::engine::general_purpose::STANDARD.encode(&part.bytes);
                    parts.push(json!({
                        "type": "image_url",
                        "image_url": { "url": format!("data:{};base64,{data}", part.mimetype) },
                    }));
                }
            }
        }
        if !parts.is_empty() {
            messages.push(WireMessage {
                role: "user",
                content: Some(Value::Array(parts)),
                tool_calls: None,
                tool_call_id: None,
            });
        }
    }

    async fn list_models(&self) -> Result<Vec<String>> {
        let response = self
            .request(reqwest::Method::GET, "/models")
            .send()
            .await
            .context("The model listing failed")?;
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
            .ok_or_else(|| anyhow!("The provider returned an unexpected model list"))?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_call_deltas_reassemble_by_index() {
        let mut calls = Vec::new();
        fold_tool_call_delta(
            &mut calls,
            &[json!({"index": 0, "id": "c1", "function": {"name": "echo", "arguments": "{\"te"}})],
        );
        fold_tool_call_delta(
            &mut calls,
            &[json!({"index": 0, "function": {"arguments": "xt\": \"ok\"}"}})],
        );
        fold_tool_call_delta(
            &mut calls,
            &[json!({"index": 1, "id": "c2", "function": {"name": "other", "arguments": "{}"}})],
        );
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].id, "c1");
        assert_eq!(calls[0].name, "echo");
        assert_eq!(calls[0].arguments, "{\"text\": \"ok\"}");
        assert_eq!(calls[1].name, "other");
    }

    #[test]
    fn reasoning_effort_maps() {
        assert_eq!(reasoning_effort(Some(ThinkingEffort::None)), None);
        assert_eq!(reasoning_effort(Some(ThinkingEffort::Medium)), Some("medium"));
    }
}
