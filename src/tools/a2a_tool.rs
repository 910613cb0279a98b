//! A2A tool — delegate calls to a remote agent.
//!
//! Speaks the JSON-RPC `message/send` surface of the Agent-to-Agent
//! protocol: one user message out, the text parts of the reply back.

use anyhow::{anyhow, bail, Context, Result};
use serde_json::{json, Value};

use crate::header::A2aSpec;

use super::{Tool, ToolResult};

pub struct A2aTool {
    name: String,
    description: String,
    usage: Option<String>,
    url: String,
    client: reqwest::Client,
}

impl A2aTool {
    pub fn new(spec: A2aSpec) -> Self {
        Self {
            name: spec.name.unwrap_or_else(|| "remote_agent".to_string()),
            description: format!("Send a message to the remote agent at {}.", spec.a2a),
            usage: spec.usage,
            url: spec.a2a,
            client: reqwest::Client::new(),
        }
    }
}

/// Collects the text parts out of an A2A message or task result.
fn reply_text(result: &Value) -> String {
    let parts = result
        .get("parts")
        .or_else(|| result.pointer("/status/message/parts"))
        .and_then(Value::as_array);
    let Some(parts) = parts else {
        return result.to_string();
    };
    parts
        .iter()
        .filter_map(|p| p.get("text").and_then(Value::as_str))
        .collect::<Vec<_>>()
        .join("\n")
}

#[async_trait::async_trait]
impl Tool for A2aTool {
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
            "message": {
                "type": "string",
                "description": "The message to send to the remote agent"
            }
        })
    }

    fn required(&self) -> Vec<String> {
        vec!["message".to_string()]
    }

    async fn call(&self, args: Value) -> Result<Vec<ToolResult>> {
        let message = args
            .get("message")
            .and_then(Value::as_str)
            .ok_or_else(|| anyhow!("The a2a tool takes a `message` string"))?;

        let request = json!({
            "jsonrpc": "2.0",
            "id": uuid::Uuid::new_v4().to_string(),
            "method": "message/send",
            "params": {
                "message": {
                    "role": "user",
                    "messageId": uuid::Uuid::new_v4().to_string(),
                    "parts": [{ "kind": "text", "text": message }],
                }
            }
        });

        let response = self
            .client
            .post(&self.url)
            .json(&request)
            .send()
            .await
            .with_context(|| format!("Failed to reach the remote agent at {}", self.url))?;
        if !response.status().is_success() {
            bail!("The remote agent returned HTTP {}", response.status());
        }
        let body: Value = response
            .json()
            .await
            .context("The remote agent returned invalid JSON")?;
        if let Some(error) = body.get("error") {
            let text = error
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("unknown error");
            bail!("The remote agent failed: {text}");
        }
        let result = body
            .get("result")
            .ok_or_else(|| anyhow!("The remote agent's response carried no result"))?;
        Ok(vec![ToolResult::text(reply_text(result))])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_parts_are_joined() {
        let result = json!({"parts": [{"kind": "text", "text": "a"}, {"kind": "text", "text": "b"}]});
        assert_eq!(reply_text(&result), "a\nb");
    }

    #[test]
    fn task_results_read_status_message() {
        let result =
            json!({"status": {"message": {"parts": [{"kind": "text", "text": "done"}]}}});
        assert_eq!(reply_text(&result), "done");
    }
}
