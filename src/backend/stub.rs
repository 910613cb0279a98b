//! A scripted backend for tests.
//!
//! Implements [`ProviderAdapter`] with plain-string wire messages and a
//! programmed sequence of responses, so tests drive the real turn loop
//! (bounds, serialization, result feedback) without a provider. Requests
//! are recorded for assertions.

use std::collections::VecDeque;
use std::sync::Mutex;

use anyhow::Result;
use serde_json::Value;

use crate::message::Message;

use super::turn::{speaker_wrapped, user_model_text, ProviderAdapter, RealizedCall, ToolCallEntry};
use super::{DeltaSender, TurnContext};

/// One scripted completion.
#[derive(Debug, Clone, Default)]
pub struct ScriptedResponse {
    pub text: String,
    /// `(tool name, args)` pairs the "model" calls this turn.
    pub calls: Vec<(String, Value)>,
}

impl ScriptedResponse {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            calls: Vec::new(),
        }
    }

    pub fn call(name: impl Into<String>, args: Value) -> Self {
        Self {
            text: String::new(),
            calls: vec![(name.into(), args)],
        }
    }
}

pub struct ScriptedAdapter {
    script: Mutex<VecDeque<ScriptedResponse>>,
    /// When the script runs dry, keep replaying the last response. Used to
    /// simulate a model that never stops calling tools.
    repeat_last: bool,
    last: Mutex<Option<ScriptedResponse>>,
    /// Snapshot of the wire history at each completion.
    pub requests: Mutex<Vec<Vec<String>>>,
}

impl ScriptedAdapter {
    pub fn new(script: Vec<ScriptedResponse>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            repeat_last: false,
            last: Mutex::new(None),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn repeating(script: Vec<ScriptedResponse>) -> Self {
        Self {
            repeat_last: true,
            ..Self::new(script)
        }
    }
}

#[async_trait::async_trait]
impl ProviderAdapter for ScriptedAdapter {
    type Msg = String;
    type Resp = ScriptedResponse;

    fn handle_message(
        &self,
        ctx: &TurnContext<'_>,
        message: &Message,
        is_last: bool,
    ) -> (Vec<String>, bool) {
        match message {
            Message::User(user) => {
                let reset = user.attachments.iter().any(|a| a.is_reset());
                let text = user_model_text(user, ctx.interlocutor.reminder.as_deref(), is_last);
                (vec![format!("user: {text}")], reset)
            }
            Message::Assistant(assistant) => {
                if !assistant
                    .interlocutor
                    .eq_ignore_ascii_case(&ctx.interlocutor.name)
                {
                    let text = speaker_wrapped(&assistant.interlocutor, &assistant.text());
                    return (vec![format!("user: {text}")], false);
                }
                (vec![format!("assistant: {}", assistant.text())], false)
            }
        }
    }

    async fn create_completion(
        &self,
        _ctx: &TurnContext<'_>,
        messages: &[String],
        deltas: Option<&DeltaSender>,
    ) -> Result<ScriptedResponse> {
        self.requests
            .lock()
            .expect("requests lock")
            .push(messages.to_vec());

        let next = {
            let mut script = self.script.lock().expect("script lock");
            match script.pop_front() {
                Some(response) => {
                    *self.last.lock().expect("last lock") = Some(response.clone());
                    response
                }
                None if self.repeat_last => self
                    .last
                    .lock()
                    .expect("last lock")
                    .clone()
                    .unwrap_or_default(),
                None => ScriptedResponse::default(),
            }
        };

        if let Some(tx) = deltas {
            if !next.text.is_empty() {
                tx.send(next.text.clone()).ok();
            }
        }
        Ok(next)
    }

    fn response_text(&self, response: &ScriptedResponse) -> String {
        response.text.clone()
    }

    fn tool_call_entries(&self, response: &ScriptedResponse) -> Vec<ToolCallEntry> {
        response
            .calls
            .iter()
            .enumerate()
            .map(|(i, (name, args))| ToolCallEntry {
                id: Some(format!("stub_{i}")),
                name: name.clone(),
                args: args.clone(),
            })
            .collect()
    }

    fn append_assistant_message(&self, messages: &mut Vec<String>, response: &ScriptedResponse) {
        messages.push(format!("assistant: {}", response.text));
    }

    fn append_tool_results(&self, messages: &mut Vec<String>, realized: &[RealizedCall]) {
        for call in realized {
            let text: Vec<&str> = call.model_results().iter().map(|r| r.text.as_str()).collect();
            messages.push(format!(
                "tool[{}]: {}",
                call.entry.name,
                text.join("\n")
            ));
        }
    }

    async fn list_models(&self) -> Result<Vec<String>> {
        Ok(vec!["scripted".to_string()])
    }
}
