//! Streaming output for the terminal.
//!
//! Decouples what the pipeline streams from how the invocation was asked
//! to present it: the whole updated document (default), just the new block
//! (`-s`), or the bare text (`-S`). Deltas are flushed as they arrive so
//! the reply appears as it is generated.

use std::io::{self, Write};

/// How much of the result goes to stdout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// The original document followed by the new block.
    Document,
    /// Only the new block, fences included.
    Block,
    /// Only the streamed text, no fences.
    Text,
}

/// Prints the streamed reply in the requested shape.
pub struct StreamPrinter {
    mode: Mode,
    quiet: bool,
}

impl StreamPrinter {
    pub fn new(mode: Mode, quiet: bool) -> Self {
        Self { mode, quiet }
    }

    /// Printed once the speaker is known, before the first delta.
    pub fn preamble(&self, original: &str, speaker: &str) {
        if self.quiet {
            return;
        }
        match self.mode {
            Mode::Document => {
                print!("{}\n\n:::{}\n\n", original.trim_end(), speaker);
            }
            Mode::Block => print!(":::{speaker}\n\n"),
            Mode::Text => {}
        }
        io::stdout().flush().ok();
    }

    /// One streamed delta; flushed immediately for the typing effect.
    pub fn delta(&self, text: &str) {
        if self.quiet {
            return;
        }
        print!("{text}");
        io::stdout().flush().ok();
    }

    /// Closes the block after the stream ends (or is interrupted).
    pub fn footer(&self) {
        if self.quiet {
            return;
        }
        match self.mode {
            Mode::Document | Mode::Block => println!("\n\n:::"),
            Mode::Text => println!(),
        }
        io::stdout().flush().ok();
    }
}
