//! The provider-agnostic streaming turn loop.
//!
//! Every backend is a [`ProviderAdapter`] (wire encoding only) wrapped in
//! [`TurnLoop`] (everything else): history encoding with reset handling,
//! completion streaming, tool realization with per-turn recursion bounds,
//! transcript serialization, and result feedback.
//!
//! Binary convention: a [`ToolResult`] with a binary mimetype carries its
//! payload as base64 text. The loop keeps such results out of the
//! model-visible tool output and threads them back as attachment parts on
//! the synthetic user message that delivers the results.

use anyhow::Result;
use base64::Engine;
use serde_json::Value;

use crate::attachments::AttachmentPart;
use crate::constants::{RUNAWAY_GRACE, RUNAWAY_MESSAGE, TOOL_LIMIT_MESSAGE};
use crate::header::HookEvent;
use crate::message::{AssistantMessage, Interaction, Message, ToolCallRecord};
use crate::tools::ToolResult;

use super::{Backend, DeltaSender, TurnContext};

/// One tool call as decoded from a provider response.
#[derive(Debug, Clone)]
pub struct ToolCallEntry {
    pub id: Option<String>,
    pub name: String,
    pub args: Value,
}

/// A tool call together with its realized results.
#[derive(Debug, Clone)]
pub struct RealizedCall {
    pub entry: ToolCallEntry,
    pub results: Vec<ToolResult>,
    pub is_error: bool,
}

impl RealizedCall {
    /// The text results the model should see.
    pub fn model_results(&self) -> Vec<&ToolResult> {
        self.results.iter().filter(|r| !r.is_binary()).collect()
    }

    /// Binary results, decoded into attachment parts.
    pub fn binary_parts(&self) -> Vec<AttachmentPart> {
        self.results
            .iter()
            .filter(|r| r.is_binary())
            .filter_map(|r| {
                let bytes = base64::engine::general_purpose::STANDARD
                    .decode(r.text.as_bytes())
                    .ok()?;
                Some(AttachmentPart {
                    bytes,
                    mimetype: r.mimetype.clone(),
                    title: format!("{} result", self.entry.name),
                    uri: String::new(),
                    fragment_params: None,
                })
            })
            .collect()
    }
}

/// Wire encoding for one provider family.
#[async_trait::async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// Provider-native message type.
    type Msg: Send + Sync + Clone;
    /// Provider-native completed response.
    type Resp: Send + Sync;

    /// Encodes one transcript message into zero or more provider messages.
    ///
    /// The returned flag is set when the message carries a reset marker;
    /// the loop then discards previously accumulated history.
    fn handle_message(
        &self,
        ctx: &TurnContext<'_>,
        message: &Message,
        is_last: bool,
    ) -> (Vec<Self::Msg>, bool);

    /// Streams one completion, forwarding text deltas, and resolves to the
    /// full response.
    async fn create_completion(
        &self,
        ctx: &TurnContext<'_>,
        messages: &[Self::Msg],
        deltas: Option<&DeltaSender>,
    ) -> Result<Self::Resp>;

    /// The response's free text.
    fn response_text(&self, response: &Self::Resp) -> String;

    /// Decoded tool calls; empty means the model is done.
    fn tool_call_entries(&self, response: &Self::Resp) -> Vec<ToolCallEntry>;

    /// Appends the assistant response verbatim to the wire history.
    fn append_assistant_message(&self, messages: &mut Vec<Self::Msg>, response: &Self::Resp);

    /// Feeds realized results (and their binary parts) back to the model.
    fn append_tool_results(&self, messages: &mut Vec<Self::Msg>, realized: &[RealizedCall]);

    /// Re-places ephemeral cache markers; providers without prompt caching
    /// leave this as the no-op default.
    fn apply_cache_control(&self, _messages: &mut [Self::Msg]) {}

    async fn list_models(&self) -> Result<Vec<String>>;
}

/// The generic loop over any adapter.
pub struct TurnLoop<A> {
    adapter: A,
}

impl<A> TurnLoop<A> {
    pub fn new(adapter: A) -> Self {
        Self { adapter }
    }

    pub fn adapter(&self) -> &A {
        &self.adapter
    }
}

fn send_delta(deltas: Option<&DeltaSender>, text: &str) {
    if let Some(tx) = deltas {
        tx.send(text.to_string()).ok();
    }
}

#[async_trait::async_trait]
impl<A: ProviderAdapter> Backend for TurnLoop<A> {
    async fn list_models(&self) -> Result<Vec<String>> {
        self.adapter.list_models().await
    }

    async fn evaluate(
        &self,
        ctx: &TurnContext<'_>,
        deltas: Option<&DeltaSender>,
    ) -> Result<AssistantMessage> {
        let adapter = &self.adapter;

        // Encode the transcript. A reset marker throws away everything
        // before the message that carried it.
        let mut wire: Vec<A::Msg> = Vec::new();
        let last = ctx.messages.len().saturating_sub(1);
        for (index, message) in ctx.messages.iter().enumerate() {
            let (encoded, reset) = adapter.handle_message(ctx, message, index == last);
            if reset {
                tracing::debug!("reset marker: dropping prior history");
                wire.clear();
            }
            wire.extend(encoded);
        }

        let mut assistant = AssistantMessage::new(&ctx.interlocutor.name);
        let max_tool_use = ctx.interlocutor.max_tool_use;
        let mut iteration = 0usize;

        loop {
            iteration += 1;
            if !ctx.interlocutor.nocache {
                adapter.apply_cache_control(&mut wire);
            }

            let response = adapter.create_completion(ctx, &wire, deltas).await?;
            let text = adapter.response_text(&response);
            let captured = ctx
                .hooks
                .fire(
                    HookEvent::AssistantMessage,
                    &[("ASSISTANT_MESSAGE", text.as_str())],
                )
                .await?;
            assistant.attachments.extend(captured);

            let entries = adapter.tool_call_entries(&response);
            if entries.is_empty() {
                assistant.interactions.push(Interaction {
                    text,
                    calls: Vec::new(),
                });
                return Ok(assistant);
            }

            if iteration >= max_tool_use + RUNAWAY_GRACE {
                // The model would not stop; close the turn ourselves.
                tracing::warn!(iteration, "runaway tool use, giving up");
                send_delta(deltas, &format!("\n\n{RUNAWAY_MESSAGE}\n"));
                assistant.interactions.push(Interaction {
                    text,
                    calls: Vec::new(),
                });
                assistant.interactions.push(Interaction {
                    text: RUNAWAY_MESSAGE.to_string(),
                    calls: Vec::new(),
                });
                return Ok(assistant);
            }

            adapter.append_assistant_message(&mut wire, &response);

            let realized = if iteration > max_tool_use {
                // Over the cap: synthesize limit errors without invoking
                // the tools.
                entries
                    .into_iter()
                    .map(|entry| RealizedCall {
                        entry,
                        results: vec![ToolResult::text(TOOL_LIMIT_MESSAGE)],
                        is_error: true,
                    })
                    .collect::<Vec<_>>()
            } else {
                realize_calls(ctx, entries).await?
            };

            // Serialize the calls into the transcript in issue order.
            let records: Vec<ToolCallRecord> = realized
                .iter()
                .map(|call| ToolCallRecord {
                    id: call.entry.id.clone(),
                    name: call.entry.name.clone(),
                    args: call.entry.args.clone(),
                    results: call.results.clone(),
                    is_error: call.is_error,
                })
                .collect();
            // Stream the serialized calls so live output matches what the
            // transcript will hold.
            for record in &records {
                send_delta(deltas, &format!("\n\n{}\n\n", record.to_wire()));
            }
            assistant.interactions.push(Interaction {
                text,
                calls: records,
            });

            adapter.append_tool_results(&mut wire, &realized);
        }
    }
}

/// Realizes a batch of calls concurrently, preserving issue order.
async fn realize_calls(
    ctx: &TurnContext<'_>,
    entries: Vec<ToolCallEntry>,
) -> Result<Vec<RealizedCall>> {
    for entry in &entries {
        ctx.hooks
            .fire(
                HookEvent::ToolUsePre,
                &[
                    ("TOOL_NAME", entry.name.as_str()),
                    ("TOOL_ARGS", &entry.args.to_string()),
                ],
            )
            .await?;
    }

    // join_all keeps results in the order the model issued the calls,
    // regardless of completion order.
    let futures = entries.into_iter().map(|entry| async move {
        let (results, is_error) = ctx.registry.call(&entry.name, entry.args.clone()).await;
        RealizedCall {
            entry,
            results,
            is_error,
        }
    });
    let realized = futures::future::join_all(futures).await;

    for call in &realized {
        let result_text: String = call
            .results
            .iter()
            .map(|r| r.text.as_str())
            .collect::<Vec<_>>()
            .join("\n");
        ctx.hooks
            .fire(
                HookEvent::ToolUsePost,
                &[
                    ("TOOL_NAME", call.entry.name.as_str()),
                    ("TOOL_RESULT", &result_text),
                ],
            )
            .await?;
    }
    Ok(realized)
}

/// Renders a user message's model-visible text: expanded content, inline
/// attachments, text attachment parts, and (on the final message) the
/// interlocutor's reminder.
pub fn user_model_text(
    user: &crate::message::UserMessage,
    reminder: Option<&str>,
    is_last: bool,
) -> String {
    let mut out = user.content.clone();
    for attachment in &user.attachments {
        if attachment.is_reset() {
            continue;
        }
        if !out.is_empty() {
            out.push_str("\n\n");
        }
        out.push_str(&attachment.to_model_text());
    }
    for part in &user.parts {
        if let Some(text) = part.text() {
            if !out.is_empty() {
                out.push_str("\n\n");
            }
            out.push_str(&format!(
                "<attachment title=\"{}\" uri=\"{}\">\n{}\n</attachment>",
                part.title, part.uri, text
            ));
        }
    }
    if is_last {
        if let Some(reminder) = reminder {
            if !reminder.is_empty() {
                out.push_str(&format!("\n\n<reminder>{reminder}</reminder>"));
            }
        }
    }
    out
}

/// Wraps another interlocutor's reply for re-labeled user-role delivery.
pub fn speaker_wrapped(name: &str, text: &str) -> String {
    format!("<speaker name=\"{name}\">\n{text}\n</speaker>")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::UserMessage;

    #[test]
    fn binary_results_split_from_text() {
        let call = RealizedCall {
            entry: ToolCallEntry {
                id: None,
                name: "snap".into(),
                args: serde_json::json!({}),
            },
            results: vec![
                ToolResult::text("took a screenshot"),
                ToolResult::with_mimetype(
                    base64::engine::general_purpose::STANDARD.encode(b"PNGDATA"),
                    "image/png",
                ),
            ],
            is_error: false,
        };
        let visible = call.model_results();
        assert_eq!(visible.len(), 1);
        assert_eq!(visible[0].text, "took a screenshot");
        let parts = call.binary_parts();
        assert_eq!(parts.len(), 1);
        assert_eq!(parts[0].bytes, b"PNGDATA");
        assert_eq!(parts[0].mimetype, "image/png");
    }

    #[test]
    fn reminder_lands_only_on_the_last_message() {
        let user = UserMessage {
            content: "hi".into(),
            ..Default::default()
        };
        assert!(user_model_text(&user, Some("stay brief"), true).contains("<reminder>"));
        assert!(!user_model_text(&user, Some("stay brief"), false).contains("<reminder>"));
    }

    #[test]
    fn reset_markers_are_not_rendered() {
        let user = UserMessage {
            content: "fresh".into(),
            attachments: vec![crate::message::InlineAttachment::reset()],
            parts: Vec::new(),
        };
        assert_eq!(user_model_text(&user, None, false), "fresh");
    }
}
