//! Per-invocation orchestration.
//!
//! Read document → merge headers → parse body → expand macros → apply
//! structural directives → initialize tools → stream the turn loop →
//! hand the realized assistant block back to the caller.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use futures::StreamExt;

use crate::backend::{Backend, DeltaSender, TurnContext};
use crate::directives::process_messages;
use crate::document::Document;
use crate::error::LecticError;
use crate::header::{Header, HookEvent};
use crate::hooks::HookRunner;
use crate::message::{InlineAttachment, Message};
use crate::parser::{parse_body, scan_inline, BodyNode, InlineNode};
use crate::tools::ToolRegistry;

/// Invocation-level inputs beyond the document text itself.
#[derive(Debug, Default, Clone)]
pub struct RunOptions {
    /// The document's path, when it came from a file.
    pub file: Option<PathBuf>,
    /// Extra `--Include` config layers, in command-line order.
    pub includes: Vec<PathBuf>,
}

impl RunOptions {
    fn doc_dir(&self) -> PathBuf {
        self.file
            .as_deref()
            .and_then(Path::parent)
            .map(Path::to_path_buf)
            .filter(|p| !p.as_os_str().is_empty())
            .or_else(|| std::env::current_dir().ok())
            .unwrap_or_else(|| PathBuf::from("."))
    }
}

/// The realized reply.
pub struct RunOutput {
    /// Canonical name of the interlocutor who spoke.
    pub speaker: String,
    /// Wire-form assistant content, ready for the `::: Name` block.
    pub content: String,
}

/// Returns the merged, effective header as YAML (the `--header` flag).
pub fn merged_header(text: &str, options: &RunOptions) -> Result<String> {
    let document = Document::parse(text);
    let doc_dir = options.doc_dir();
    let merged =
        crate::header::merged_value(document.header_value()?, &doc_dir, &options.includes)?;
    // Validate so a broken header is reported rather than echoed.
    Header::from_value(merged.clone(), &doc_dir)?;
    Ok(serde_yaml::to_string(&merged)?)
}

/// Builds the transcript message list from the parsed body.
fn messages_from_body(body: &str, header: &Header) -> Result<Vec<Message>, LecticError> {
    let nodes = parse_body(body).map_err(|e| LecticError::Document(e.to_string()))?;
    let mut messages = Vec::new();
    for node in nodes {
        match node {
            BodyNode::User(span) => {
                let text = span.slice(body).trim();
                if !text.is_empty() {
                    messages.push(Message::user(text));
                }
            }
            BodyNode::Block(block) => {
                let interlocutor = header.find(&block.name).ok_or_else(|| {
                    LecticError::Document(format!(
                        "The block '::: {}' names an unknown interlocutor",
                        block.name
                    ))
                })?;
                messages.push(Message::assistant(
                    interlocutor.name.clone(),
                    block.content.slice(body).trim(),
                ));
            }
        }
    }
    Ok(messages)
}

/// Resolves Markdown links in every user message into attachment parts.
///
/// Fetches run concurrently. A failed resolution becomes an `<error>`
/// attachment on the message instead of aborting the run.
async fn resolve_links(messages: &mut [Message], doc_dir: &Path, registry: &ToolRegistry) {
    let readers = registry.readers();
    for message in messages.iter_mut() {
        let Message::User(user) = message else {
            continue;
        };
        // The quoted title wins, then the link text.
        let links: Vec<(String, Option<String>)> = scan_inline(&user.content)
            .into_iter()
            .filter_map(|node| match node {
                InlineNode::Link(link) => {
                    let text = link.text.slice(&user.content).trim().to_string();
                    let title = link.title.clone().or((!text.is_empty()).then_some(text));
                    Some((link.uri, title))
                }
                _ => None,
            })
            .collect();
        if links.is_empty() {
            continue;
        }

        let fetches = links.iter().map(|(uri, title)| {
            crate::attachments::resolve_link(uri, title.as_deref(), doc_dir, readers)
        });
        let outcomes = futures::stream::iter(fetches)
            .buffered(8)
            .collect::<Vec<_>>()
            .await;
        for (outcome, (uri, _)) in outcomes.into_iter().zip(&links) {
            match outcome {
                Ok(parts) => user.parts.extend(parts),
                Err(e) => {
                    tracing::warn!(uri = %uri, error = %e, "link resolution failed");
                    user.attachments.push(InlineAttachment {
                        kind: "error".to_string(),
                        detail: Some(uri.clone()),
                        content: format!("Could not resolve {uri}: {e}"),
                        mimetype: "text/plain".to_string(),
                        is_error: true,
                    });
                }
            }
        }
    }
}

/// A pipeline that has resolved its header, speaker, tools, and messages,
/// and is ready to stream the turn loop.
///
/// Preparation is split from evaluation so the caller can print the block
/// fence for the resolved speaker before the first delta arrives.
pub struct Prepared {
    speaker: crate::header::Interlocutor,
    messages: Vec<Message>,
    registry: ToolRegistry,
    hooks: HookRunner,
}

impl Prepared {
    /// The canonical name of the interlocutor who will speak.
    pub fn speaker(&self) -> &str {
        &self.speaker.name
    }

    /// Streams the turn loop to completion.
    ///
    /// `deltas` receives text as it arrives; `backend` overrides the
    /// interlocutor's provider (used by tests to substitute a scripted
    /// one).
    pub async fn evaluate(
        &self,
        deltas: Option<&DeltaSender>,
        backend: Option<&dyn Backend>,
    ) -> Result<RunOutput> {
        let ctx = TurnContext {
            interlocutor: &self.speaker,
            messages: &self.messages,
            registry: &self.registry,
            hooks: &self.hooks,
        };

        let outcome = match backend {
            Some(backend) => backend.evaluate(&ctx, deltas).await,
            None => {
                let backend = crate::backend::backend_for(&self.speaker)?;
                backend.evaluate(&ctx, deltas).await
            }
        };

        match outcome {
            Ok(reply) => Ok(RunOutput {
                speaker: self.speaker.name.clone(),
                content: reply.to_wire(),
            }),
            Err(e) => {
                self.hooks
                    .fire(HookEvent::Error, &[("ERROR_MESSAGE", &e.to_string())])
                    .await
                    .ok();
                Err(LecticError::Transport(e.to_string()).into())
            }
        }
    }
}

/// Builds a [`Prepared`] pipeline: merge headers, parse the body, expand
/// macros, apply directives, resolve attachments, and initialize tools.
pub async fn prepare(text: &str, options: &RunOptions) -> Result<Prepared> {
    let document = Document::parse(text);
    let doc_dir = options.doc_dir();

    let merged =
        crate::header::merged_value(document.header_value()?, &doc_dir, &options.includes)?;
    let mut header = Header::from_value(merged.clone(), &doc_dir)?;

    let messages = messages_from_body(&document.body, &header)?;

    let processed = process_messages(messages, &header, merged).await?;
    if processed.header_changed {
        header = Header::from_value(processed.header_value.clone(), &doc_dir)?;
    }
    let mut messages = processed.messages;

    let speaker = match &processed.speaker {
        Some(name) => header
            .find(name)
            .ok_or_else(|| {
                LecticError::Document(format!(
                    "A directive switches the speaker to '{name}', \
                     but no interlocutor has that name"
                ))
            })?
            .clone(),
        None => header.speaker().clone(),
    };

    // Exported to every tool, hook, and `:cmd` subprocess.
    if let Some(file) = &options.file {
        std::env::set_var(crate::constants::ENV_FILE, file);
    }
    std::env::set_var(crate::constants::ENV_INTERLOCUTOR, &speaker.name);
    std::env::set_var(
        crate::constants::ENV_MODEL,
        speaker.model.clone().unwrap_or_default(),
    );

    let header = Arc::new(header);
    let registry = ToolRegistry::build(&header, &speaker).await?;
    let hooks = HookRunner::new(&header, &speaker, options.file.as_deref());

    resolve_links(&mut messages, &doc_dir, &registry).await;

    // The user_message hook fires on the message about to be answered;
    // inline output attaches to it.
    if let Some(Message::User(user)) = messages.last_mut() {
        let captured = hooks
            .fire(HookEvent::UserMessage, &[("USER_MESSAGE", &user.content)])
            .await?;
        user.attachments.extend(captured);
    }

    Ok(Prepared {
        speaker,
        messages,
        registry,
        hooks,
    })
}

/// One-shot form of [`prepare`] + [`Prepared::evaluate`].
pub async fn run(
    text: &str,
    options: &RunOptions,
    deltas: Option<&DeltaSender>,
    backend: Option<&dyn Backend>,
) -> Result<RunOutput> {
    prepare(text, options).await?.evaluate(deltas, backend).await
}

/// Convenience used by tests and the nested-agent path: runs the pipeline
/// and returns the updated document text.
pub async fn run_to_document(
    text: &str,
    options: &RunOptions,
    deltas: Option<&DeltaSender>,
    backend: Option<&dyn Backend>,
) -> Result<String> {
    let output = run(text, options, deltas, backend).await?;
    Ok(append_block(text, &output.speaker, &output.content))
}

/// Appends a new assistant block to the document text.
pub fn append_block(text: &str, speaker: &str, content: &str) -> String {
    let mut out = text.trim_end().to_string();
    if !out.is_empty() {
        out.push_str("\n\n");
    }
    out.push_str(&crate::document::assistant_block(speaker, content));
    out
}


#[cfg(test)]
mod unit {
    use super::*;

    #[test]
    fn messages_from_body_requires_known_speakers() {
        let header = Header::from_value(
            serde_yaml::from_str("interlocutor: {name: Bot, prompt: p}").unwrap(),
            Path::new("."),
        )
        .unwrap();
        let err = messages_from_body("hi\n\n::: Ghost\n\nboo\n\n:::\n", &header).unwrap_err();
        assert!(err.to_string().contains("Ghost"));
    }

    #[test]
    fn block_names_match_case_insensitively() {
        let header = Header::from_value(
            serde_yaml::from_str("interlocutor: {name: Bot, prompt: p}").unwrap(),
            Path::new("."),
        )
        .unwrap();
        let messages = messages_from_body("hi\n\n::: bot\n\nhello\n\n:::\n", &header).unwrap();
        assert_eq!(messages.len(), 2);
        match &messages[1] {
            Message::Assistant(a) => assert_eq!(a.interlocutor, "Bot"),
            _ => panic!("expected assistant message"),
        }
    }

    #[test]
    fn append_block_keeps_separation() {
        let out = append_block("---\nh: 1\n---\nHello", "Bot", "Hi");
        assert!(out.ends_with(":::Bot\n\nHi\n\n:::\n"));
        assert!(out.contains("Hello\n\n:::Bot"));
    }
}
