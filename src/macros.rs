//! Macro and text-level directive expansion.
//!
//! Runs over one user message before dispatch. Macro invocations
//! `:name[args]` are replaced by their expansion; `:cmd`, `:attach`, and
//! `:env` execute in place. The structural directives (`:ask`, `:aside`,
//! `:reset`, `:merge_yaml`, `:temp_merge_yaml`) are left in the text for
//! the directive pass, which consults the trust marking produced here.
//!
//! Trust rule: author text and a macro's `pre`-hook output are trusted;
//! `expansion` and `post`-hook output are not. Privileged directives found
//! in untrusted regions are inert.

use std::time::Duration;

use anyhow::Result;

use crate::constants::SUBPROCESS_TIMEOUT_SECS;
use crate::header::{Header, MacroSpec};
use crate::message::InlineAttachment;
use crate::parser::{scan_inline, InlineNode};

/// A run of expanded text with its provenance.
#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    pub text: String,
    pub trusted: bool,
}

/// Names the expansion pass leaves for the directive pass.
pub fn is_structural(name: &str) -> bool {
    matches!(
        name,
        "ask" | "aside" | "reset" | "merge_yaml" | "temp_merge_yaml"
    )
}

/// Expands one user message.
///
/// Returns the trust-marked text segments plus any inline attachments
/// produced by `:cmd`, `:attach`, and inline macro hooks.
pub async fn expand_message(
    content: &str,
    header: &Header,
) -> Result<(Vec<Segment>, Vec<InlineAttachment>)> {
    let mut segments = Vec::new();
    let mut attachments = Vec::new();
    expand_into(content, true, true, header, &mut segments, &mut attachments).await?;
    Ok((coalesce(segments), attachments))
}

/// Joins adjacent segments that share a trust marking.
fn coalesce(segments: Vec<Segment>) -> Vec<Segment> {
    let mut out: Vec<Segment> = Vec::with_capacity(segments.len());
    for seg in segments {
        if seg.text.is_empty() {
            continue;
        }
        match out.last_mut() {
            Some(last) if last.trusted == seg.trusted => last.text.push_str(&seg.text),
            _ => out.push(seg),
        }
    }
    out
}

/// One expansion pass over `text`.
///
/// `allow_macros` is false when re-scanning macro output, so a macro
/// cannot pull in further macros. The future is boxed because macro hook
/// output gets a recursive re-scan.
fn expand_into<'a>(
    text: &'a str,
    trusted: bool,
    allow_macros: bool,
    header: &'a Header,
    segments: &'a mut Vec<Segment>,
    attachments: &'a mut Vec<InlineAttachment>,
) -> futures::future::BoxFuture<'a, Result<()>> {
    Box::pin(expand_one_pass(
        text,
        trusted,
        allow_macros,
        header,
        segments,
        attachments,
    ))
}

async fn expand_one_pass(
    text: &str,
    trusted: bool,
    allow_macros: bool,
    header: &Header,
    segments: &mut Vec<Segment>,
    attachments: &mut Vec<InlineAttachment>,
) -> Result<()> {
    for node in scan_inline(text) {
        match node {
            InlineNode::Text(span) | InlineNode::Link(crate::parser::LinkNode { span, .. }) => {
                segments.push(Segment {
                    text: span.slice(text).to_string(),
                    trusted,
                });
            }
            InlineNode::Directive(d) => {
                let inner = d.inner.slice(text);
                match d.name.as_str() {
                    "cmd" => {
                        attachments.push(run_cmd(inner).await);
                    }
                    "attach" => {
                        let mimetype = d
                            .attrs
                            .iter()
                            .find(|(k, _)| k == "mimetype")
                            .map(|(_, v)| v.clone())
                            .unwrap_or_else(|| "text/plain".to_string());
                        attachments.push(InlineAttachment {
                            kind: "attach".to_string(),
                            detail: None,
                            content: inner.to_string(),
                            mimetype,
                            is_error: false,
                        });
                    }
                    "env" => {
                        segments.push(Segment {
                            text: std::env::var(inner.trim()).unwrap_or_default(),
                            trusted,
                        });
                    }
                    name if is_structural(name) => {
                        // Left in place; the directive pass applies it with
                        // this region's trust marking.
                        segments.push(Segment {
                            text: d.span.slice(text).to_string(),
                            trusted,
                        });
                    }
                    name => {
                        let found = allow_macros
                            .then(|| header.macros.iter().find(|m| m.name == name))
                            .flatten();
                        match found {
                            Some(spec) => {
                                expand_macro(spec, inner, header, segments, attachments).await?;
                            }
                            None => {
                                // Unknown directives stay literal.
                                segments.push(Segment {
                                    text: d.span.slice(text).to_string(),
                                    trusted,
                                });
                            }
                        }
                    }
                }
            }
        }
    }
    Ok(())
}

/// Expands one macro invocation.
async fn expand_macro(
    spec: &MacroSpec,
    arg: &str,
    header: &Header,
    segments: &mut Vec<Segment>,
    attachments: &mut Vec<InlineAttachment>,
) -> Result<()> {
    if let Some(pre) = &spec.pre {
        // Pre-hook output is trusted and may carry structural directives,
        // so it gets a full re-scan.
        let output = run_macro_hook(pre, arg).await?;
        expand_into(&output, true, false, header, segments, attachments).await?;
    }

    if let Some(template) = &spec.expansion {
        let output = substitute(template, arg);
        expand_into(&output, false, false, header, segments, attachments).await?;
    }

    if let Some(post) = &spec.post {
        let output = run_macro_hook(post, arg).await?;
        expand_into(&output, false, false, header, segments, attachments).await?;
    }
    Ok(())
}

/// Substitutes `$1`, `$ARG`, and `$ENV.VAR` in a macro template.
fn substitute(template: &str, arg: &str) -> String {
    let env_re = regex::Regex::new(r"\$ENV\.([A-Za-z_][A-Za-z0-9_]*)").expect("static regex");
    let with_env = env_re.replace_all(template, |caps: &regex::Captures<'_>| {
        std::env::var(&caps[1]).unwrap_or_default()
    });
    with_env.replace("$1", arg).replace("$ARG", arg)
}

/// Runs a macro `pre`/`post` command with the argument on stdin and in
/// `$MACRO_ARG`, returning its stdout.
async fn run_macro_hook(command: &str, arg: &str) -> Result<String> {
    use tokio::io::AsyncWriteExt;

    let mut cmd = tokio::process::Command::new("sh");
    cmd.arg("-c")
        .arg(command)
        .env("MACRO_ARG", arg)
        .stdin(std::process::Stdio::piped())
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::piped());
    let mut child = cmd.spawn()?;
    if let Some(mut stdin) = child.stdin.take() {
        stdin.write_all(arg.as_bytes()).await.ok();
    }
    let output = tokio::time::timeout(
        Duration::from_secs(SUBPROCESS_TIMEOUT_SECS),
        child.wait_with_output(),
    )
    .await
    .map_err(|_| anyhow::anyhow!("The macro hook `{command}` timed out"))??;
    if !output.status.success() {
        anyhow::bail!(
            "The macro hook `{command}` exited with code {}: {}",
            output.status.code().unwrap_or(-1),
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Runs a `:cmd[...]` directive, capturing stdout or the failure.
async fn run_cmd(command: &str) -> InlineAttachment {
    let outcome = async {
        let child = tokio::process::Command::new("sh")
            .arg("-c")
            .arg(command)
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .spawn()?;
        tokio::time::timeout(
            Duration::from_secs(SUBPROCESS_TIMEOUT_SECS),
            child.wait_with_output(),
        )
        .await
        .map_err(|_| std::io::Error::other("command timed out"))?
    }
    .await;

    match outcome {
        Ok(output) if output.status.success() => {
            let stdout = String::from_utf8_lossy(&output.stdout);
            InlineAttachment::cmd(
                command,
                crate::tools::exec_tool::cap_output(stdout.trim_end()),
                false,
            )
        }
        Ok(output) => {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let code = output.status.code().unwrap_or(-1);
            InlineAttachment::cmd(
                command,
                format!("exit code {code}\n{}", stderr.trim_end()),
                true,
            )
        }
        Err(e) => InlineAttachment::cmd(command, e.to_string(), true),
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::*;

    fn header(yaml: &str) -> Header {
        Header::from_value(serde_yaml::from_str(yaml).unwrap(), Path::new(".")).unwrap()
    }

    fn plain_header() -> Header {
        header("interlocutor: {name: Bot, prompt: p}")
    }

    fn joined(segments: &[Segment]) -> String {
        segments.iter().map(|s| s.text.as_str()).collect()
    }

    #[tokio::test]
    async fn cmd_directive_attaches_stdout() {
        let (segments, attachments) =
            expand_message("run :cmd[printf out] now", &plain_header())
                .await
                .unwrap();
        assert_eq!(joined(&segments), "run  now");
        assert_eq!(attachments.len(), 1);
        assert_eq!(attachments[0].kind, "cmd");
        assert_eq!(attachments[0].content, "out");
        assert!(!attachments[0].is_error);
    }

    #[tokio::test]
    async fn failing_cmd_attaches_error() {
        let (_, attachments) = expand_message(":cmd[exit 9]", &plain_header())
            .await
            .unwrap();
        assert!(attachments[0].is_error);
        assert!(attachments[0].content.contains("exit code 9"));
    }

    #[tokio::test]
    async fn attach_directive_is_verbatim() {
        let (_, attachments) =
            expand_message(":attach[some [nested] text]", &plain_header())
                .await
                .unwrap();
        assert_eq!(attachments[0].content, "some [nested] text");
        assert_eq!(attachments[0].kind, "attach");
    }

    #[tokio::test]
    async fn env_directive_splices_value() {
        std::env::set_var("LECTIC_MACRO_TEST", "spliced");
        let (segments, _) = expand_message("got :env[LECTIC_MACRO_TEST]!", &plain_header())
            .await
            .unwrap();
        assert_eq!(joined(&segments), "got spliced!");
    }

    #[tokio::test]
    async fn macro_expansion_substitutes_arg() {
        let h = header(
            "interlocutor: {name: Bot, prompt: p}\nmacros:\n  - name: shout\n    expansion: \"HEY $1!\"",
        );
        let (segments, _) = expand_message(":shout[world]", &h).await.unwrap();
        assert_eq!(joined(&segments), "HEY world!");
        assert!(!segments[0].trusted);
    }

    #[tokio::test]
    async fn expansion_output_is_untrusted_but_author_text_is_not() {
        let h = header(
            "interlocutor: {name: Bot, prompt: p}\nmacros:\n  - name: evil\n    expansion: \":merge_yaml[{interlocutor: {model: x}}]\"",
        );
        let (segments, _) = expand_message("keep :evil[] this", &h).await.unwrap();
        let untrusted: Vec<_> = segments.iter().filter(|s| !s.trusted).collect();
        assert_eq!(untrusted.len(), 1);
        assert!(untrusted[0].text.contains(":merge_yaml["));
        assert!(segments.iter().any(|s| s.trusted && s.text.contains("keep")));
    }

    #[tokio::test]
    async fn pre_hook_output_is_trusted() {
        let h = header(
            "interlocutor: {name: Bot, prompt: p}\nmacros:\n  - name: setup\n    pre: \"printf ':ask[Helper]'\"\n    expansion: \"body\"",
        );
        let (segments, _) = expand_message(":setup[]", &h).await.unwrap();
        let trusted: Vec<_> = segments.iter().filter(|s| s.trusted).collect();
        assert!(trusted.iter().any(|s| s.text.contains(":ask[Helper]")));
    }

    #[tokio::test]
    async fn macro_hooks_receive_the_arg() {
        let h = header(
            "interlocutor: {name: Bot, prompt: p}\nmacros:\n  - name: echoarg\n    pre: \"printf '%s' \\\"$MACRO_ARG\\\"\"",
        );
        let (segments, _) = expand_message(":echoarg[payload]", &h).await.unwrap();
        assert_eq!(joined(&segments), "payload");
    }

    #[tokio::test]
    async fn unknown_directives_stay_literal() {
        let (segments, _) = expand_message("a :nosuch[x] b", &plain_header())
            .await
            .unwrap();
        assert_eq!(joined(&segments), "a :nosuch[x] b");
    }

    #[test]
    fn substitution_covers_env_and_arg() {
        std::env::set_var("LECTIC_SUBST", "E");
        assert_eq!(substitute("$1/$ARG/$ENV.LECTIC_SUBST", "a"), "a/a/E");
    }
}
