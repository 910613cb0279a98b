//! Message types for lectic's conversation history.
//!
//! A conversation alternates between user turns and assistant turns. These
//! are lectic's internal types, converted to provider-specific formats when
//! sent to a backend. Assistant content is structured: a sequence of
//! interactions, each pairing free text with a group of tool calls, and is
//! serialized to the transcript in an XML-like wire form:
//!
//! ```text
//! Some reply text.
//! <tool-call with="echo">
//! {"id": "c1", "args": {"text": "ok"}, "results": [...], "isError": false}
//! </tool-call>
//! More text.
//! <inline-attachment kind="attach" mimetype="text/plain">notes</inline-attachment>
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::attachments::AttachmentPart;
use crate::tools::ToolResult;

/// A single turn in a conversation.
#[derive(Debug, Clone)]
pub enum Message {
    User(UserMessage),
    Assistant(AssistantMessage),
}

impl Message {
    pub fn user(text: impl Into<String>) -> Self {
        Message::User(UserMessage {
            content: text.into(),
            attachments: Vec::new(),
            parts: Vec::new(),
        })
    }

    pub fn assistant(interlocutor: impl Into<String>, text: impl Into<String>) -> Self {
        Message::Assistant(AssistantMessage::from_wire(
            interlocutor.into(),
            &text.into(),
        ))
    }

    /// Plain-text view of the message, as it appears in the document.
    pub fn text(&self) -> String {
        match self {
            Message::User(u) => u.content.clone(),
            Message::Assistant(a) => a.to_wire(),
        }
    }
}

/// A user turn: original document text plus whatever expansion attached.
#[derive(Debug, Clone, Default)]
pub struct UserMessage {
    /// The (possibly macro-expanded) message text.
    pub content: String,
    /// Inline attachments accumulated by directives and hooks.
    pub attachments: Vec<InlineAttachment>,
    /// Resolved link bodies, typed by mimetype.
    pub parts: Vec<AttachmentPart>,
}

/// A text block spliced into a message by a directive or hook.
#[derive(Debug, Clone, PartialEq)]
pub struct InlineAttachment {
    /// What produced it: `attach`, `cmd`, `hook`, `reset`, ...
    pub kind: String,
    /// Producer detail, e.g. the shell command behind a `cmd` attachment.
    pub detail: Option<String>,
    pub content: String,
    pub mimetype: String,
    /// Set when the producing command failed.
    pub is_error: bool,
}

impl InlineAttachment {
    pub fn cmd(command: impl Into<String>, content: impl Into<String>, is_error: bool) -> Self {
        Self {
            kind: "cmd".into(),
            detail: Some(command.into()),
            content: content.into(),
            mimetype: "text/plain".into(),
            is_error,
        }
    }

    /// Marker carried by a `:reset[]` on the final user message; the turn
    /// loop restarts provider history when it sees one.
    pub fn reset() -> Self {
        Self {
            kind: "reset".into(),
            detail: None,
            content: String::new(),
            mimetype: "text/plain".into(),
            is_error: false,
        }
    }

    pub fn is_reset(&self) -> bool {
        self.kind == "reset"
    }

    /// How the attachment appears in model-visible content.
    pub fn to_model_text(&self) -> String {
        match (self.kind.as_str(), &self.detail) {
            ("cmd", Some(cmd)) if self.is_error => {
                format!("<error cmd=\"{}\">\n{}\n</error>", cmd, self.content)
            }
            ("cmd", Some(cmd)) => {
                format!("<stdout cmd=\"{}\">\n{}\n</stdout>", cmd, self.content)
            }
            _ => format!(
                "<inline-attachment kind=\"{}\" mimetype=\"{}\">\n{}\n</inline-attachment>",
                self.kind, self.mimetype, self.content
            ),
        }
    }
}

/// An assistant turn attributed to one interlocutor.
#[derive(Debug, Clone, Default)]
pub struct AssistantMessage {
    pub interlocutor: String,
    /// Alternating text and tool-call groups, in emission order.
    pub interactions: Vec<Interaction>,
    pub attachments: Vec<InlineAttachment>,
}

/// One completion's worth of assistant output.
#[derive(Debug, Clone, Default)]
pub struct Interaction {
    pub text: String,
    pub calls: Vec<ToolCallRecord>,
}

/// A structured tool call exchanged with the model.
#[derive(Debug, Clone)]
pub struct ToolCallRecord {
    /// Provider call id; absent for providers that do not issue them.
    pub id: Option<String>,
    pub name: String,
    pub args: Value,
    pub results: Vec<ToolResult>,
    pub is_error: bool,
}

impl ToolCallRecord {
    /// The record's `<tool-call>` transcript form.
    pub fn to_wire(&self) -> String {
        let body = WireCall {
            id: self.id.clone(),
            args: self.args.clone(),
            results: self.results.clone(),
            is_error: self.is_error,
        };
        let json = serde_json::to_string_pretty(&body).unwrap_or_else(|_| "{}".to_string());
        format!("<tool-call with=\"{}\">\n{}\n</tool-call>", self.name, json)
    }
}

/// Serde shape of a `<tool-call>` body.
#[derive(Debug, Serialize, Deserialize)]
struct WireCall {
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<String>,
    args: Value,
    #[serde(default)]
    results: Vec<ToolResult>,
    #[serde(rename = "isError", default)]
    is_error: bool,
}

impl AssistantMessage {
    pub fn new(interlocutor: impl Into<String>) -> Self {
        Self {
            interlocutor: interlocutor.into(),
            interactions: Vec::new(),
            attachments: Vec::new(),
        }
    }

    /// All text content, without tool-call or attachment markup.
    pub fn text(&self) -> String {
        let texts: Vec<&str> = self
            .interactions
            .iter()
            .map(|i| i.text.trim())
            .filter(|t| !t.is_empty())
            .collect();
        texts.join("\n\n")
    }

    /// All tool calls across interactions, in emission order.
    pub fn calls(&self) -> impl Iterator<Item = &ToolCallRecord> {
        self.interactions.iter().flat_map(|i| i.calls.iter())
    }

    /// Serializes interactions and attachments to the transcript wire form.
    pub fn to_wire(&self) -> String {
        let mut out = String::new();
        for interaction in &self.interactions {
            let text = interaction.text.trim();
            if !text.is_empty() {
                if !out.is_empty() {
                    out.push_str("\n\n");
                }
                out.push_str(text);
            }
            for call in &interaction.calls {
                if !out.is_empty() {
                    out.push_str("\n\n");
                }
                out.push_str(&call.to_wire());
            }
        }
        for attachment in &self.attachments {
            if !out.is_empty() {
                out.push_str("\n\n");
            }
            out.push_str(&attachment.to_model_text());
        }
        out
    }

    /// Parses transcript wire form back into structure.
    ///
    /// Unparseable `<tool-call>` bodies degrade to plain text rather than
    /// erroring, so a hand-edited document still loads.
    pub fn from_wire(interlocutor: String, content: &str) -> Self {
        let mut msg = AssistantMessage::new(interlocutor);
        let mut current = Interaction::default();
        let mut rest = content;

        loop {
            let call_at = rest.find("<tool-call ");
            let attach_at = rest.find("<inline-attachment ");
            let next = match (call_at, attach_at) {
                (Some(c), Some(a)) => Some(c.min(a)),
                (Some(c), None) => Some(c),
                (None, Some(a)) => Some(a),
                (None, None) => None,
            };
            let Some(at) = next else {
                current.text.push_str(rest);
                break;
            };

            let parsed = if Some(at) == call_at {
                parse_tool_call(&rest[at..]).map(|(call, len)| {
                    // A call after intervening text opens a new interaction
                    // only when the previous one already holds calls.
                    if !current.calls.is_empty() && !rest[..at].trim().is_empty() {
                        msg.interactions.push(std::mem::take(&mut current));
                    }
                    current.text.push_str(&rest[..at]);
                    current.calls.push(call);
                    len
                })
            } else {
                parse_inline_attachment(&rest[at..]).map(|(attachment, len)| {
                    current.text.push_str(&rest[..at]);
                    msg.attachments.push(attachment);
                    len
                })
            };

            match parsed {
                Some(len) => rest = &rest[at + len..],
                None => {
                    // Malformed opening tag: keep it as text and move on.
                    current.text.push_str(&rest[..at + 1]);
                    rest = &rest[at + 1..];
                }
            }
        }

        if !current.text.trim().is_empty() || !current.calls.is_empty() {
            msg.interactions.push(current);
        }
        msg
    }
}

/// Extracts a quoted attribute value from an opening tag.
fn tag_attr(tag: &str, name: &str) -> Option<String> {
    let pat = format!("{}=\"", name);
    let start = tag.find(&pat)? + pat.len();
    let end = tag[start..].find('"')? + start;
    Some(tag[start..end].to_string())
}

/// Parses one `<tool-call with="...">body</tool-call>` at the start of `s`.
/// Returns the record and the number of bytes consumed.
fn parse_tool_call(s: &str) -> Option<(ToolCallRecord, usize)> {
    let open_end = s.find('>')?;
    let tag = &s[..open_end];
    let name = tag_attr(tag, "with")?;
    let close = s.find("</tool-call>")?;
    let body = &s[open_end + 1..close];
    let wire: WireCall = serde_json::from_str(body.trim()).ok()?;
    Some((
        ToolCallRecord {
            id: wire.id,
            name,
            args: wire.args,
            results: wire.results,
            is_error: wire.is_error,
        },
        close + "</tool-call>".len(),
    ))
}

/// Parses one `<inline-attachment ...>content</inline-attachment>`.
fn parse_inline_attachment(s: &str) -> Option<(InlineAttachment, usize)> {
    let open_end = s.find('>')?;
    let tag = &s[..open_end];
    let kind = tag_attr(tag, "kind")?;
    let mimetype = tag_attr(tag, "mimetype").unwrap_or_else(|| "text/plain".to_string());
    let close = s.find("</inline-attachment>")?;
    let content = s[open_end + 1..close].trim_matches('\n').to_string();
    Some((
        InlineAttachment {
            kind,
            detail: None,
            content,
            mimetype,
            is_error: false,
        },
        close + "</inline-attachment>".len(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn wire_round_trips_calls() {
        let mut msg = AssistantMessage::new("Bot");
        msg.interactions.push(Interaction {
            text: "Let me check.".into(),
            calls: vec![ToolCallRecord {
                id: Some("c1".into()),
                name: "echo".into(),
                args: json!({"text": "ok"}),
                results: vec![ToolResult::text("ok")],
                is_error: false,
            }],
        });
        msg.interactions.push(Interaction {
            text: "Done.".into(),
            calls: vec![],
        });

        let wire = msg.to_wire();
        assert!(wire.contains("<tool-call with=\"echo\">"));

        let parsed = AssistantMessage::from_wire("Bot".into(), &wire);
        assert_eq!(parsed.calls().count(), 1);
        let call = parsed.calls().next().unwrap();
        assert_eq!(call.name, "echo");
        assert_eq!(call.args, json!({"text": "ok"}));
        assert_eq!(call.results[0].text, "ok");
        assert!(!call.is_error);
        assert!(parsed.text().contains("Done."));
    }

    #[test]
    fn malformed_tool_call_degrades_to_text() {
        let content = "before <tool-call with=\"x\">not json</tool-call> after";
        let parsed = AssistantMessage::from_wire("Bot".into(), content);
        assert_eq!(parsed.calls().count(), 0);
        assert!(parsed.text().contains("not json"));
    }

    #[test]
    fn inline_attachments_parse() {
        let content =
            "text\n\n<inline-attachment kind=\"attach\" mimetype=\"text/plain\">\nnotes\n</inline-attachment>";
        let parsed = AssistantMessage::from_wire("Bot".into(), content);
        assert_eq!(parsed.attachments.len(), 1);
        assert_eq!(parsed.attachments[0].content, "notes");
    }

    #[test]
    fn cmd_attachment_renders_as_stdout() {
        let a = InlineAttachment::cmd("date -u", "now", false);
        assert!(a.to_model_text().starts_with("<stdout cmd=\"date -u\">"));
        let e = InlineAttachment::cmd("false", "boom", true);
        assert!(e.to_model_text().starts_with("<error cmd=\"false\">"));
    }

    #[test]
    fn assistant_text_skips_markup() {
        let msg = Message::assistant(
            "Bot",
            "hello\n\n<tool-call with=\"t\">\n{\"args\": {}}\n</tool-call>\n\nbye",
        );
        match msg {
            Message::Assistant(a) => {
                let text = a.text();
                assert!(text.contains("hello"));
                assert!(text.contains("bye"));
                assert!(!text.contains("tool-call"));
                assert_eq!(a.calls().count(), 1);
            }
            _ => unreachable!(),
        }
    }
}
