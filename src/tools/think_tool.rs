//! Think tool — a no-op scratchpad.
//!
//! Records the model's thought and returns it unchanged, which forces the
//! reasoning onto the transcript without any side effects.

use anyhow::Result;
use serde_json::{json, Value};

use crate::header::ThinkSpec;

use super::{Tool, ToolResult};

pub struct ThinkTool {
    name: String,
    description: String,
}

impl ThinkTool {
    pub fn new(spec: ThinkSpec) -> Self {
        Self {
            name: spec.name.unwrap_or_else(|| "think_about".to_string()),
            description: format!(
                "Think about {}. Use this to reason step by step before acting; \
                 the thought is recorded and echoed back.",
                spec.think_about
            ),
        }
    }
}

#[async_trait::async_trait]
impl Tool for ThinkTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters(&self) -> Value {
        json!({
            "thought": {
                "type": "string",
                "description": "The thought to record"
            }
        })
    }

    fn required(&self) -> Vec<String> {
        vec!["thought".to_string()]
    }

    async fn call(&self, args: Value) -> Result<Vec<ToolResult>> {
        let thought = args
            .get("thought")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        tracing::debug!(tool = %self.name, "recorded a thought");
        Ok(vec![ToolResult::text(thought)])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn echoes_the_thought() {
        let tool = ThinkTool::new(ThinkSpec {
            think_about: "the next move".into(),
            name: None,
        });
        let results = tool
            .call(serde_json::json!({"thought": "castle early"}))
            .await
            .unwrap();
        assert_eq!(results[0].text, "castle early");
    }
}
