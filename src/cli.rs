//! Command-line interface definition and dispatch for lectic.
//!
//! Uses [`clap`] for argument parsing with derive macros. A run reads the
//! document (from `--file`, `--inplace`, or stdin), streams the reply to
//! stdout in the requested shape, and rewrites the source file atomically
//! when `--inplace` is given. SIGINT/SIGTERM close the open block before
//! exit so the document stays well-formed.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{bail, Context, Result};
use clap::{ArgAction, Parser};

use crate::output::{Mode, StreamPrinter};
use crate::pipeline::{self, RunOptions};

/// Top-level CLI structure for lectic.
#[derive(Parser)]
#[command(
    name = "lectic",
    about = "A command-line runtime for literate, file-based conversations",
    version,
    disable_version_flag = true
)]
pub struct Cli {
    /// Read the document from PATH ('-' for stdin)
    #[arg(short = 'f', long)]
    pub file: Option<PathBuf>,

    /// Read PATH and rewrite it in place with the new reply
    #[arg(short = 'i', long)]
    pub inplace: Option<PathBuf>,

    /// Emit only the new assistant block
    #[arg(short = 's', long)]
    pub short: bool,

    /// Emit only the new assistant text, without block fences
    #[arg(short = 'S', long = "Short")]
    pub short_text: bool,

    /// Emit only the merged YAML header
    #[arg(short = 'H', long)]
    pub header: bool,

    /// Include an extra YAML file into the header merge (repeatable)
    #[arg(short = 'I', long = "Include")]
    pub include: Vec<PathBuf>,

    /// Suppress stdout (still streams to --inplace)
    #[arg(short = 'q', long)]
    pub quiet: bool,

    /// Write a debug log to FILE
    #[arg(short = 'l', long)]
    pub log: Option<PathBuf>,

    /// Print version and exit
    #[arg(short = 'v', long = "version", action = ArgAction::Version)]
    version: Option<bool>,

    /// External subcommand (resolved as `lectic-<name>`) and its arguments
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    pub subcommand: Vec<String>,
}

/// Parses command-line arguments into a [`Cli`] struct.
pub fn parse() -> Cli {
    Cli::parse()
}

/// The document text plus where it came from.
struct Input {
    text: String,
    file: Option<PathBuf>,
    inplace: bool,
}

/// Reads the document per the `--file`/`--inplace`/stdin rules. When a
/// file and piped stdin are both present, stdin text is appended to the
/// file content as the newest user message.
fn read_input(cli: &Cli) -> Result<Input> {
    use std::io::{IsTerminal, Read};

    if cli.file.is_some() && cli.inplace.is_some() {
        bail!("--file and --inplace are mutually exclusive");
    }
    let (path, inplace) = match (&cli.file, &cli.inplace) {
        (Some(f), None) => (Some(f.clone()), false),
        (None, Some(i)) => (Some(i.clone()), true),
        _ => (None, false),
    };

    let from_stdin = |what: &mut String| -> Result<()> {
        std::io::stdin()
            .read_to_string(what)
            .context("Failed to read the document from stdin")?;
        Ok(())
    };

    match path {
        None => {
            let mut text = String::new();
            from_stdin(&mut text)?;
            Ok(Input {
                text,
                file: None,
                inplace: false,
            })
        }
        Some(p) if p.as_os_str() == "-" => {
            let mut text = String::new();
            from_stdin(&mut text)?;
            Ok(Input {
                text,
                file: None,
                inplace: false,
            })
        }
        Some(p) => {
            let mut text = std::fs::read_to_string(&p)
                .with_context(|| format!("Failed to read document {}", p.display()))?;
            if !std::io::stdin().is_terminal() {
                let mut extra = String::new();
                from_stdin(&mut extra)?;
                if !extra.trim().is_empty() {
                    text = format!("{}\n\n{}", text.trim_end(), extra);
                }
            }
            Ok(Input {
                text,
                file: Some(p),
                inplace,
            })
        }
    }
}

/// Atomically rewrites `path`: write a sibling temp file, then rename.
fn write_inplace(path: &Path, content: &str) -> Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let tmp = dir.join(format!(
        ".{}.{}.tmp",
        path.file_name().unwrap_or_default().to_string_lossy(),
        std::process::id()
    ));
    std::fs::write(&tmp, content)
        .with_context(|| format!("Failed to write {}", tmp.display()))?;
    std::fs::rename(&tmp, path)
        .with_context(|| format!("Failed to replace {}", path.display()))?;
    Ok(())
}

/// Dispatches the parsed CLI to a full pipeline run.
pub async fn run(cli: Cli) -> Result<()> {
    if let Some(log) = &cli.log {
        crate::logging::init(log)?;
    }

    if !cli.subcommand.is_empty() {
        return crate::subcommand::run(&cli.subcommand);
    }

    let input = read_input(&cli)?;
    let options = RunOptions {
        file: input.file.clone(),
        includes: cli.include.clone(),
    };

    if cli.header {
        print!("{}", pipeline::merged_header(&input.text, &options)?);
        return Ok(());
    }

    let mode = if cli.short_text {
        Mode::Text
    } else if cli.short {
        Mode::Block
    } else {
        Mode::Document
    };
    let printer = StreamPrinter::new(mode, cli.quiet);

    let prepared = pipeline::prepare(&input.text, &options).await?;
    printer.preamble(&input.text, prepared.speaker());

    // Stream deltas to the printer while collecting them, so an
    // interrupted run can still persist what arrived.
    let collected = Mutex::new(String::new());
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<String>();
    let evaluate = async {
        let result = prepared.evaluate(Some(&tx), None).await;
        drop(tx);
        result
    };
    let print = async {
        while let Some(delta) = rx.recv().await {
            printer.delta(&delta);
            collected.lock().expect("collected lock").push_str(&delta);
        }
    };

    let interrupted = async {
        use tokio::signal::unix::{signal, SignalKind};
        let mut term = signal(SignalKind::terminate()).expect("signal handler");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {},
            _ = term.recv() => {},
        }
    };

    let inplace_target = input.inplace.then_some(()).and(input.file.as_deref());
    tokio::select! {
        (result, ()) = async { tokio::join!(evaluate, print) } => {
            let output = result?;
            printer.footer();
            if let Some(file) = inplace_target {
                let updated =
                    pipeline::append_block(&input.text, &output.speaker, &output.content);
                write_inplace(file, &updated)?;
            }
        }
        _ = interrupted => {
            // Close the open block so the document stays well-formed.
            tracing::info!("interrupted; closing the assistant block");
            printer.footer();
            if let Some(file) = inplace_target {
                let partial = collected.lock().expect("collected lock").clone();
                let updated =
                    pipeline::append_block(&input.text, prepared.speaker(), &partial);
                write_inplace(file, &updated)?;
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_parses_the_documented_flags() {
        let cli = Cli::try_parse_from([
            "lectic", "-f", "conv.lec", "-s", "-I", "a.yaml", "-I", "b.yaml", "-q", "-l",
            "debug.log",
        ])
        .unwrap();
        assert_eq!(cli.file.as_deref(), Some(Path::new("conv.lec")));
        assert!(cli.short);
        assert_eq!(cli.include.len(), 2);
        assert!(cli.quiet);
        assert!(cli.log.is_some());
    }

    #[test]
    fn file_and_inplace_conflict() {
        let cli = Cli::try_parse_from(["lectic", "-f", "a", "-i", "b"]).unwrap();
        assert!(read_input(&cli).is_err());
    }

    #[test]
    fn subcommand_args_are_collected() {
        let cli = Cli::try_parse_from(["lectic", "bundle", "--out", "x"]).unwrap();
        assert_eq!(cli.subcommand, vec!["bundle", "--out", "x"]);
    }
}
