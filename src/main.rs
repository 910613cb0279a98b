//! Entry point for lectic, a command-line runtime for literate,
//! file-based conversations with language models.
//!
//! This binary loads environment variables, parses CLI arguments via
//! [`cli`], and runs the conversation pipeline. Every error is written to
//! stderr; the process exits nonzero only when no valid assistant block
//! could be produced.

mod attachments;
mod backend;
mod cli;
mod constants;
mod directives;
mod document;
mod error;
mod header;
mod hooks;
mod logging;
mod macros;
mod message;
mod output;
mod parser;
mod paths;
mod pipeline;
mod subcommand;
mod tools;

use colored::Colorize;

/// Runs the lectic CLI.
///
/// Loads `.env` files (silently ignored if absent), parses command-line
/// arguments into a [`cli::Cli`] struct, and dispatches via [`cli::run`].
#[tokio::main(flavor = "current_thread")]
async fn main() {
    dotenvy::dotenv().ok();
    let cli = cli::parse();
    if let Err(e) = cli::run(cli).await {
        eprintln!("{} {:#}", "error:".red().bold(), e);
        std::process::exit(1);
    }
}
