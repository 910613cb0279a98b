//! Exec tool — subprocess execution with safety measures.
//!
//! Each call spawns the configured program with the model's arguments
//! appended, optionally under a sandbox wrapper. Commands run with a
//! timeout and an output size cap. Stdout becomes the result; a nonzero
//! exit becomes an error result carrying stderr.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::constants::{SUBPROCESS_MAX_OUTPUT_SIZE, SUBPROCESS_TIMEOUT_SECS};
use crate::error::LecticError;
use crate::header::{EnvSpec, ExecSpec, Header};

use super::{Tool, ToolResult};

pub struct ExecTool {
    name: String,
    description: String,
    usage: Option<String>,
    /// Program and fixed leading arguments, sandbox wrapper included.
    argv: Vec<String>,
    env: BTreeMap<String, String>,
    cwd: Option<String>,
    confirm: Option<String>,
}

impl ExecTool {
    pub fn new(spec: ExecSpec, header: &Arc<Header>) -> Result<Self, LecticError> {
        let mut argv = shell_split(&spec.exec);
        if argv.is_empty() {
            return Err(LecticError::ToolInit(
                "An exec tool needs a non-empty `exec` command".to_string(),
            ));
        }

        if let Some(sandbox) = &spec.sandbox {
            // A sandbox may name an entry in `sandbox_defs` or be a literal
            // wrapper command.
            let wrapper = header
                .sandbox_defs
                .get(sandbox)
                .cloned()
                .unwrap_or_else(|| sandbox.clone());
            let mut wrapped = shell_split(&wrapper);
            wrapped.append(&mut argv);
            argv = wrapped;
        }

        let env = match &spec.env {
            None => BTreeMap::new(),
            Some(EnvSpec::Inline(map)) => map.clone(),
            Some(EnvSpec::Ref { r#ref }) => header
                .env_defs
                .get(r#ref)
                .cloned()
                .ok_or_else(|| {
                    LecticError::ToolInit(format!(
                        "Exec tool '{}' references env_def '{}', which is not defined",
                        spec.exec, r#ref
                    ))
                })?,
        };

        // Default name: the program's file stem, e.g. `exec: "rg --json"`
        // registers as "rg".
        let stem = shell_split(&spec.exec)
            .first()
            .map(|p| {
                std::path::Path::new(p)
                    .file_stem()
                    .map(|s| s.to_string_lossy().into_owned())
                    .unwrap_or_else(|| p.clone())
            })
            .unwrap_or_default();
        let name = spec.name.clone().unwrap_or_else(|| sanitize_name(&stem));

        Ok(Self {
            description: format!("Run `{}` with the given arguments.", spec.exec),
            usage: spec.usage,
            name,
            argv,
            env,
            cwd: spec.cwd,
            confirm: spec.confirm,
        })
    }
}

/// Turns a tool name candidate into `[a-z0-9_]+`.
fn sanitize_name(s: &str) -> String {
    let cleaned: String = s
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' {
                c.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() {
        "exec".to_string()
    } else {
        cleaned
    }
}

/// Splits a command string shell-style, honoring single and double quotes.
pub fn shell_split(s: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;
    for c in s.chars() {
        match quote {
            Some(q) => {
                if c == q {
                    quote = None;
                } else {
                    current.push(c);
                }
            }
            None => match c {
                '\'' | '"' => quote = Some(c),
                c if c.is_whitespace() => {
                    if !current.is_empty() {
                        parts.push(std::mem::take(&mut current));
                    }
                }
                c => current.push(c),
            },
        }
    }
    if !current.is_empty() {
        parts.push(current);
    }
    parts
}

/// Truncate `output` to the subprocess cap, noting when truncation occurs.
pub fn cap_output(output: &str) -> String {
    if output.len() <= SUBPROCESS_MAX_OUTPUT_SIZE {
        return output.to_string();
    }
    let mut end = SUBPROCESS_MAX_OUTPUT_SIZE;
    while end > 0 && !output.is_char_boundary(end) {
        end -= 1;
    }
    format!(
        "{}\n... output truncated at {} bytes",
        &output[..end],
        SUBPROCESS_MAX_OUTPUT_SIZE
    )
}

#[derive(Deserialize, Default)]
struct ExecInput {
    #[serde(default)]
    arguments: Vec<String>,
    #[serde(default)]
    stdin: Option<String>,
}

#[async_trait::async_trait]
impl Tool for ExecTool {
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
            "arguments": {
                "type": "array",
                "items": { "type": "string" },
                "description": "Arguments appended to the command line"
            },
            "stdin": {
                "type": "string",
                "description": "Text piped to the command's standard input"
            }
        })
    }

    fn required(&self) -> Vec<String> {
        Vec::new()
    }

    async fn call(&self, args: Value) -> Result<Vec<ToolResult>> {
        let input: ExecInput = serde_json::from_value(args.clone()).unwrap_or_default();

        if let Some(confirm) = &self.confirm {
            let status = tokio::process::Command::new("sh")
                .arg("-c")
                .arg(confirm)
                .env("TOOL_NAME", &self.name)
                .env("TOOL_ARGS", args.to_string())
                .status()
                .await;
            match status {
                Ok(s) if s.success() => {}
                Ok(_) => anyhow::bail!("The call was vetoed by the confirm command"),
                Err(e) => anyhow::bail!("The confirm command could not be run: {e}"),
            }
        }

        let mut cmd = tokio::process::Command::new(&self.argv[0]);
        cmd.args(&self.argv[1..]);
        cmd.args(&input.arguments);
        for (k, v) in &self.env {
            cmd.env(k, v);
        }
        if let Some(cwd) = &self.cwd {
            cmd.current_dir(crate::paths::expand_user_path(cwd));
        }
        cmd.stdout(std::process::Stdio::piped());
        cmd.stderr(std::process::Stdio::piped());
        cmd.stdin(if input.stdin.is_some() {
            std::process::Stdio::piped()
        } else {
            std::process::Stdio::null()
        });

        let mut child = match cmd.spawn() {
            Ok(c) => c,
            Err(e) => anyhow::bail!("Failed to start {}: {e}", self.argv[0]),
        };

        if let Some(text) = input.stdin {
            use tokio::io::AsyncWriteExt;
            if let Some(mut stdin) = child.stdin.take() {
                stdin.write_all(text.as_bytes()).await.ok();
            }
        }

        let waited = tokio::time::timeout(
            Duration::from_secs(SUBPROCESS_TIMEOUT_SECS),
            child.wait_with_output(),
        )
        .await;

        match waited {
            Ok(Ok(output)) => {
                let stdout = String::from_utf8_lossy(&output.stdout);
                let stderr = String::from_utf8_lossy(&output.stderr);
                if output.status.success() {
                    Ok(vec![ToolResult::text(cap_output(stdout.trim_end()))])
                } else {
                    let code = output.status.code().unwrap_or(-1);
                    anyhow::bail!(
                        "{} exited with code {code}\n{}",
                        self.argv[0],
                        cap_output(stderr.trim_end())
                    )
                }
            }
            Ok(Err(e)) => anyhow::bail!("Failed to run {}: {e}", self.argv[0]),
            Err(_) => anyhow::bail!(
                "{} timed out after {}s",
                self.argv[0],
                SUBPROCESS_TIMEOUT_SECS
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shell_split_honors_quotes() {
        assert_eq!(
            shell_split("grep -r 'two words' \"and more\""),
            vec!["grep", "-r", "two words", "and more"]
        );
        assert_eq!(shell_split("  "), Vec::<String>::new());
    }

    #[test]
    fn names_derive_from_the_program() {
        assert_eq!(sanitize_name("rg"), "rg");
        assert_eq!(sanitize_name("My-Tool"), "my_tool");
        assert_eq!(sanitize_name(""), "exec");
    }
}
