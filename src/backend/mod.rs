//! Provider backends.
//!
//! A [`Backend`] drives one complete assistant turn: it streams text
//! deltas to the caller while running the tool-use loop to completion and
//! returns the realized [`AssistantMessage`]. All concrete providers share
//! the generic loop in [`turn`]; each contributes only its wire encoding
//! via the [`turn::ProviderAdapter`] trait.

pub mod anthropic;
pub mod openai;
#[cfg(test)]
pub mod stub;
pub mod turn;


use anyhow::Result;
use tokio::sync::mpsc::UnboundedSender;

use crate::header::{Interlocutor, Provider};
use crate::hooks::HookRunner;
use crate::message::{AssistantMessage, Message};
use crate::tools::ToolRegistry;

/// Everything one turn needs, read-only.
pub struct TurnContext<'a> {
    pub interlocutor: &'a Interlocutor,
    pub messages: &'a [Message],
    pub registry: &'a ToolRegistry,
    pub hooks: &'a HookRunner,
}

/// Streamed text deltas go here; `None` discards them.
pub type DeltaSender = UnboundedSender<String>;

#[async_trait::async_trait]
pub trait Backend: Send + Sync {
    /// Best-effort model enumeration.
    async fn list_models(&self) -> Result<Vec<String>>;

    /// Runs the full turn loop and returns the realized reply.
    async fn evaluate(
        &self,
        ctx: &TurnContext<'_>,
        deltas: Option<&DeltaSender>,
    ) -> Result<AssistantMessage>;
}

/// Builds the backend for an interlocutor's provider selection.
///
/// Providers with OpenAI-compatible surfaces share one adapter; the two
/// Anthropic variants share the other.
pub fn backend_for(interlocutor: &Interlocutor) -> Result<Box<dyn Backend>> {
    let provider = interlocutor
        .provider
        .unwrap_or_else(|| infer_provider(interlocutor.model.as_deref()));
    match provider {
        Provider::Anthropic | Provider::AnthropicBedrock => Ok(Box::new(turn::TurnLoop::new(
            anthropic::AnthropicAdapter::new(provider, interlocutor)?,
        ))),
        Provider::Openai
        | Provider::OpenaiResponses
        | Provider::Chatgpt
        | Provider::Openrouter
        | Provider::Ollama
        | Provider::Gemini => Ok(Box::new(turn::TurnLoop::new(
            openai::OpenAiAdapter::new(provider, interlocutor)?,
        ))),
    }
}

/// Guesses a provider from the model name when the header names none.
fn infer_provider(model: Option<&str>) -> Provider {
    match model {
        Some(m) if m.starts_with("gpt") || m.starts_with("o1") || m.starts_with("o3") => {
            Provider::Openai
        }
        Some(m) if m.starts_with("gemini") => Provider::Gemini,
        Some(m) if m.contains('/') => Provider::Openrouter,
        _ => Provider::Anthropic,
    }
}

/// Runs one evaluation with an explicit backend, or the interlocutor's own.
///
/// This is the entry point both the pipeline and nested agent-tool
/// conversations go through.
pub async fn evaluate(
    interlocutor: &Interlocutor,
    messages: &[Message],
    registry: &ToolRegistry,
    hooks: &HookRunner,
    deltas: Option<&DeltaSender>,
) -> Result<AssistantMessage> {
    let backend = backend_for(interlocutor)?;
    let ctx = TurnContext {
        interlocutor,
        messages,
        registry,
        hooks,
    };
    backend.evaluate(&ctx, deltas).await
}
