//! Agent tool — another interlocutor wrapped as a callable.
//!
//! A call opens a fresh nested conversation holding a single user message,
//! runs the wrapped interlocutor's own turn loop to completion, and returns
//! the reply. Self-reference is fine: the nested conversation shares
//! nothing with the outer one, and the wrapped registry is built lazily at
//! call time, so construction cannot recurse.

use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use serde_json::{json, Value};

use crate::header::{AgentSpec, Header};
use crate::hooks::HookRunner;
use crate::message::Message;

use super::{Tool, ToolRegistry, ToolResult};

pub struct AgentTool {
    name: String,
    description: String,
    usage: Option<String>,
    header: Arc<Header>,
    target: String,
    transcript: bool,
}

impl AgentTool {
    pub fn new(spec: AgentSpec, header: Arc<Header>) -> Self {
        Self {
            name: spec
                .name
                .unwrap_or_else(|| format!("ask_{}", spec.agent.to_ascii_lowercase())),
            description: format!(
                "Pose a question to {} and get their complete reply.",
                spec.agent
            ),
            usage: spec.usage,
            header,
            target: spec.agent,
            transcript: spec.transcript,
        }
    }
}

#[async_trait::async_trait]
impl Tool for AgentTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn usage(&self) -> Option<&str> {
        self.usage.as_deref()
    }

    fn parameters(&self) -> Value {
        json!({
            "prompt": {
                "type": "string",
                "description": "The message to send"
            }
        })
    }

    fn required(&self) -> Vec<String> {
        vec!["prompt".to_string()]
    }

    async fn call(&self, args: Value) -> Result<Vec<ToolResult>> {
        let prompt = args
            .get("prompt")
            .and_then(Value::as_str)
            .ok_or_else(|| anyhow!("The agent tool takes a `prompt` string"))?;

        let interlocutor = self
            .header
            .find(&self.target)
            .ok_or_else(|| anyhow!("No interlocutor named '{}'", self.target))?;

        let registry = ToolRegistry::build(&self.header, interlocutor)
            .await
            .with_context(|| format!("Failed to build tools for '{}'", self.target))?;
        let hooks = HookRunner::new(&self.header, interlocutor, None);
        let messages = vec![Message::user(prompt)];

        let reply =
            crate::backend::evaluate(interlocutor, &messages, &registry, &hooks, None)
                .await
                .with_context(|| {
                    format!("The nested conversation with '{}' failed", self.target)
                })?;

        if self.transcript {
            let mut out = reply.text();
            for call in reply.calls() {
                out.push_str(&format!("\n<toolcall name={}/>", call.name));
            }
            Ok(vec![ToolResult::text(out)])
        } else {
            Ok(vec![ToolResult::text(reply.text())])
        }
    }
}
