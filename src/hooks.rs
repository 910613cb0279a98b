//! Lifecycle hook runner.
//!
//! Hooks are user-defined shell programs bound to named events. Each fires
//! with a fixed environment: `LECTIC_FILE`, `LECTIC_INTERLOCUTOR`, and
//! `LECTIC_MODEL` always, plus per-event variables such as `USER_MESSAGE`
//! or `TOOL_ARGS`. An `inline: true` hook's stdout becomes an inline
//! attachment on the current message; everything else is fire-and-observe.
//! A failing hook never aborts the turn loop unless its spec says `fatal`.

use std::path::Path;
use std::time::Duration;

use anyhow::Result;

use crate::constants::SUBPROCESS_TIMEOUT_SECS;
use crate::header::{Header, HookDef, HookEvent, HookSpec, Interlocutor};
use crate::message::InlineAttachment;
use crate::tools::exec_tool::cap_output;

/// Resolved hooks plus the invocation-wide environment they all receive.
pub struct HookRunner {
    hooks: Vec<HookDef>,
    env: Vec<(String, String)>,
}

impl HookRunner {
    /// Collects header-level and interlocutor-level hooks, resolving
    /// `{ref: NAME}` entries against `hook_defs`.
    pub fn new(header: &Header, interlocutor: &Interlocutor, file: Option<&Path>) -> Self {
        let mut hooks = Vec::new();
        for spec in header.hooks.iter().chain(interlocutor.hooks.iter()) {
            match spec {
                HookSpec::Def(def) => hooks.push(def.clone()),
                HookSpec::Ref(r) => match header.hook_def(&r.r#ref) {
                    Some(def) => hooks.push(def.clone()),
                    None => {
                        tracing::warn!(name = %r.r#ref, "hook reference does not resolve; skipping")
                    }
                },
            }
        }

        let mut env = vec![
            (
                crate::constants::ENV_INTERLOCUTOR.to_string(),
                interlocutor.name.clone(),
            ),
            (
                crate::constants::ENV_MODEL.to_string(),
                interlocutor.model.clone().unwrap_or_default(),
            ),
        ];
        if let Some(file) = file {
            env.push((
                crate::constants::ENV_FILE.to_string(),
                file.to_string_lossy().into_owned(),
            ));
        }
        Self { hooks, env }
    }

    /// A runner with no hooks, for nested conversations that opt out.
    pub fn silent() -> Self {
        Self {
            hooks: Vec::new(),
            env: Vec::new(),
        }
    }

    /// Fires every hook bound to `event`, in declaration order.
    ///
    /// `vars` are the event's own environment variables. Returns the
    /// inline attachments captured from `inline: true` hooks. The only
    /// error is a nonzero exit from a `fatal` hook.
    pub async fn fire(
        &self,
        event: HookEvent,
        vars: &[(&str, &str)],
    ) -> Result<Vec<InlineAttachment>> {
        let mut attachments = Vec::new();
        for hook in self.hooks.iter().filter(|h| h.on == event) {
            let mut cmd = tokio::process::Command::new("sh");
            cmd.arg("-c").arg(&hook.command);
            for (k, v) in &self.env {
                cmd.env(k, v);
            }
            for (k, v) in vars {
                cmd.env(k, v);
            }
            cmd.stdout(std::process::Stdio::piped());
            cmd.stderr(std::process::Stdio::piped());
            cmd.stdin(std::process::Stdio::null());

            let outcome = async {
                let child = cmd.spawn()?;
                tokio::time::timeout(
                    Duration::from_secs(SUBPROCESS_TIMEOUT_SECS),
                    child.wait_with_output(),
                )
                .await
                .map_err(|_| std::io::Error::other("hook timed out"))?
            }
            .await;

            match outcome {
                Ok(output) => {
                    let code = output.status.code().unwrap_or(-1);
                    if !output.status.success() {
                        let stderr = String::from_utf8_lossy(&output.stderr);
                        tracing::warn!(?event, code, stderr = %stderr.trim(), "hook exited nonzero");
                        if hook.fatal {
                            anyhow::bail!(
                                "A fatal hook on {:?} exited with code {code}: {}",
                                event,
                                stderr.trim()
                            );
                        }
                        continue;
                    }
                    let stdout = String::from_utf8_lossy(&output.stdout);
                    if hook.inline && !stdout.trim().is_empty() {
                        attachments.push(InlineAttachment {
                            kind: "hook".to_string(),
                            detail: Some(hook.command.clone()),
                            content: cap_output(stdout.trim_end()),
                            mimetype: "text/plain".to_string(),
                            is_error: false,
                        });
                    } else if !stdout.trim().is_empty() {
                        tracing::debug!(?event, stdout = %stdout.trim(), "hook output");
                    }
                }
                Err(e) => {
                    tracing::warn!(?event, error = %e, "hook failed to run");
                    if hook.fatal {
                        anyhow::bail!("A fatal hook on {:?} could not run: {e}", event);
                    }
                }
            }
        }
        Ok(attachments)
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    fn runner(yaml: &str) -> HookRunner {
        let header = Header::from_value(
            serde_yaml::from_str(yaml).unwrap(),
            Path::new("."),
        )
        .unwrap();
        let speaker = header.speaker().clone();
        HookRunner::new(&header, &speaker, Some(&PathBuf::from("conv.lec")))
    }

    #[tokio::test]
    async fn inline_hook_captures_stdout() {
        let r = runner(
            "interlocutor: {name: Bot, prompt: p}\nhooks:\n  - on: user_message\n    do: \"printf captured\"\n    inline: true",
        );
        let attachments = r.fire(HookEvent::UserMessage, &[]).await.unwrap();
        assert_eq!(attachments.len(), 1);
        assert_eq!(attachments[0].content, "captured");
        assert_eq!(attachments[0].kind, "hook");
    }

    #[tokio::test]
    async fn hooks_receive_event_env() {
        let r = runner(
            "interlocutor: {name: Bot, prompt: p}\nhooks:\n  - on: user_message\n    do: \"printf '%s/%s' $LECTIC_INTERLOCUTOR $USER_MESSAGE\"\n    inline: true",
        );
        let attachments = r
            .fire(HookEvent::UserMessage, &[("USER_MESSAGE", "hi")])
            .await
            .unwrap();
        assert_eq!(attachments[0].content, "Bot/hi");
    }

    #[tokio::test]
    async fn nonfatal_failure_is_swallowed() {
        let r = runner(
            "interlocutor: {name: Bot, prompt: p}\nhooks:\n  - on: error\n    do: \"exit 3\"",
        );
        assert!(r.fire(HookEvent::Error, &[]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn fatal_failure_propagates() {
        let r = runner(
            "interlocutor: {name: Bot, prompt: p}\nhooks:\n  - on: error\n    do: \"exit 3\"\n    fatal: true",
        );
        assert!(r.fire(HookEvent::Error, &[]).await.is_err());
    }

    #[tokio::test]
    async fn refs_resolve_through_hook_defs() {
        let r = runner(
            "interlocutor:\n  name: Bot\n  prompt: p\n  hooks: [{ref: greet}]\nhook_defs:\n  - name: greet\n    on: assistant_message\n    do: \"printf hello\"\n    inline: true",
        );
        let attachments = r.fire(HookEvent::AssistantMessage, &[]).await.unwrap();
        assert_eq!(attachments[0].content, "hello");
    }

    #[tokio::test]
    async fn events_do_not_cross_fire() {
        let r = runner(
            "interlocutor: {name: Bot, prompt: p}\nhooks:\n  - on: user_message\n    do: \"printf x\"\n    inline: true",
        );
        assert!(r
            .fire(HookEvent::AssistantMessage, &[])
            .await
            .unwrap()
            .is_empty());
    }
}
