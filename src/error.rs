//! Fatal error taxonomy for lectic.
//!
//! These are the error classes that terminate an invocation with exit code 1.
//! Recoverable failures (tool execution, hook exits, attachment fetches) are
//! converted to in-transcript results instead and never surface here.

use thiserror::Error;

/// A fatal, user-addressed error.
///
/// Each variant carries a message written for the person editing the
/// document, naming the offending interlocutor, tool, or file.
#[derive(Debug, Error)]
pub enum LecticError {
    /// The merged header failed validation.
    #[error("Header error: {0}")]
    Header(String),

    /// The document body is structurally invalid.
    #[error("Document error: {0}")]
    Document(String),

    /// A tool registry could not be built.
    #[error("Tool initialization error: {0}")]
    ToolInit(String),

    /// The provider transport failed before a reply could be produced.
    #[error("Backend error: {0}")]
    Transport(String),

    /// An external `lectic-<name>` subcommand could not be resolved.
    #[error("Subcommand error: {0}")]
    Subcommand(String),
}
