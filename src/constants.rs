//! Centralized constants for lectic.
//!
//! All magic numbers, default strings, and configuration constants live here
//! so they can be changed in one place.

/// Application name used in CLI output and directory paths.
pub const APP_NAME: &str = "lectic";

/// Configuration filename, both in the system config directory and for
/// workspace discovery.
pub const CONFIG_FILENAME: &str = "lectic.yaml";

/// Default cap on tool-use round trips within a single assistant turn.
pub const DEFAULT_MAX_TOOL_USE: usize = 10;

/// Extra completions allowed past the tool-use cap before the loop bails out.
pub const RUNAWAY_GRACE: usize = 2;

/// Synthetic result injected once the tool-use cap is reached.
pub const TOOL_LIMIT_MESSAGE: &str = "Tool usage limit exceeded.";

/// Delta emitted when the loop gives up on a runaway conversation.
pub const RUNAWAY_MESSAGE: &str = "<error>Runaway tool use!</error>";

/// Default maximum tokens for completions.
pub const DEFAULT_MAX_TOKENS: u64 = 4096;

/// Default timeout for exec tools and hook subprocesses.
pub const SUBPROCESS_TIMEOUT_SECS: u64 = 120;

/// Output cap applied to exec tool and `:cmd` directive output.
pub const SUBPROCESS_MAX_OUTPUT_SIZE: usize = 64 * 1024;

/// Default row cap for sqlite tool output.
pub const SQLITE_DEFAULT_LIMIT: usize = 500;

/// Anthropic Messages API endpoint and version header.
pub const ANTHROPIC_BASE_URL: &str = "https://api.anthropic.com/v1";
pub const ANTHROPIC_VERSION: &str = "2023-06-01";

/// OpenAI-compatible chat completion endpoints.
pub const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
pub const OPENROUTER_BASE_URL: &str = "https://openrouter.ai/api/v1";
pub const OLLAMA_BASE_URL: &str = "http://localhost:11434/v1";
pub const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta/openai";
pub const CHATGPT_BASE_URL: &str = "https://chatgpt.com/backend-api/codex";

/// Default model identifiers per provider.
pub const DEFAULT_ANTHROPIC_MODEL: &str = "claude-sonnet-4-5";
pub const DEFAULT_OPENAI_MODEL: &str = "gpt-4o";
pub const DEFAULT_OPENROUTER_MODEL: &str = "anthropic/claude-sonnet-4.5";
pub const DEFAULT_OLLAMA_MODEL: &str = "llama3.2";
pub const DEFAULT_GEMINI_MODEL: &str = "gemini-2.5-pro";

/// Environment variable exported to tools and hooks naming the document.
pub const ENV_FILE: &str = "LECTIC_FILE";
/// Environment variable naming the active interlocutor.
pub const ENV_INTERLOCUTOR: &str = "LECTIC_INTERLOCUTOR";
/// Environment variable naming the resolved model.
pub const ENV_MODEL: &str = "LECTIC_MODEL";
/// Search-path override for external subcommands.
pub const ENV_RUNTIME: &str = "LECTIC_RUNTIME";
