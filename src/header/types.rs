//! Struct definitions and serde defaults for the lectic header.
//!
//! These deserialize from the merged YAML stack. Validation beyond what
//! serde enforces (uniqueness, ranges, prompt loading) happens in
//! [`super::validate`].

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// The validated, effective header for one invocation.
#[derive(Debug, Clone)]
pub struct Header {
    /// All interlocutors, in declaration order. Never empty.
    pub interlocutors: Vec<Interlocutor>,
    /// User-defined macros available to `:name[...]` invocations.
    pub macros: Vec<MacroSpec>,
    /// Header-level hooks, active for every interlocutor.
    pub hooks: Vec<HookSpec>,
    /// Named tool bundles referenced by `{kit: NAME}` entries.
    pub kits: Vec<KitSpec>,
    /// Named hook definitions referenced by `{ref: NAME}` entries.
    pub hook_defs: Vec<HookDef>,
    /// Named environment sets for exec tools.
    pub env_defs: BTreeMap<String, BTreeMap<String, String>>,
    /// Named sandbox wrapper commands for exec tools.
    pub sandbox_defs: BTreeMap<String, String>,
}

impl Header {
    /// The default speaker: the first interlocutor.
    pub fn speaker(&self) -> &Interlocutor {
        &self.interlocutors[0]
    }

    /// Case-insensitive interlocutor lookup.
    pub fn find(&self, name: &str) -> Option<&Interlocutor> {
        self.interlocutors
            .iter()
            .find(|i| i.name.eq_ignore_ascii_case(name))
    }

    /// Resolves a `{ref: NAME}` hook to its definition.
    pub fn hook_def(&self, name: &str) -> Option<&HookDef> {
        self.hook_defs
            .iter()
            .find(|d| d.name.as_deref() == Some(name))
    }
}

/// A named speaking party bound to a provider, model, prompt, and tool set.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Interlocutor {
    /// Unique (case-insensitive) speaker name; appears in `::: Name` fences.
    pub name: String,
    /// System prompt text, or a path to a file holding it.
    pub prompt: String,
    /// Backend selection. Defaults by model prefix, then to Anthropic.
    #[serde(default)]
    pub provider: Option<Provider>,
    #[serde(default)]
    pub model: Option<String>,
    /// Sampling temperature in `[0, 1]`.
    #[serde(default)]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub max_tokens: Option<u64>,
    /// Cap on tool-use round trips within one assistant turn.
    #[serde(default = "default_max_tool_use")]
    pub max_tool_use: usize,
    /// Text appended to the final user message each turn.
    #[serde(default)]
    pub reminder: Option<String>,
    /// Disables prompt-cache markers for providers that support them.
    #[serde(default)]
    pub nocache: bool,
    #[serde(default)]
    pub tools: Vec<ToolSpec>,
    #[serde(default)]
    pub hooks: Vec<HookSpec>,
    #[serde(default)]
    pub thinking_effort: Option<ThinkingEffort>,
}

pub(super) fn default_max_tool_use() -> usize {
    crate::constants::DEFAULT_MAX_TOOL_USE
}

/// Supported provider backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Provider {
    Anthropic,
    AnthropicBedrock,
    Openai,
    OpenaiResponses,
    Chatgpt,
    Openrouter,
    Ollama,
    Gemini,
}

/// Reasoning-effort request forwarded to providers that support it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThinkingEffort {
    None,
    Low,
    Medium,
    High,
}

/// One tool entry in an interlocutor's `tools` array.
///
/// Variants are distinguished by their discriminator key (`exec:`,
/// `sqlite:`, `mcp_command:`, ...), so serde's untagged matching picks the
/// right one; every variant denies unknown fields to keep matching exact.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ToolSpec {
    Exec(ExecSpec),
    Sqlite(SqliteSpec),
    Think(ThinkSpec),
    Serve(ServeSpec),
    McpCommand(McpCommandSpec),
    McpWs(McpWsSpec),
    McpShttp(McpShttpSpec),
    Agent(AgentSpec),
    A2a(A2aSpec),
    Native(NativeSpec),
    Kit(KitRef),
}

/// Spawn an OS subprocess per call.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExecSpec {
    /// The program and fixed leading arguments, shell-style.
    pub exec: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub usage: Option<String>,
    /// Extra environment for the child, or a `{ref: NAME}` into `env_defs`.
    #[serde(default)]
    pub env: Option<EnvSpec>,
    #[serde(default)]
    pub cwd: Option<String>,
    /// Wrapper command prefix, or a name from `sandbox_defs`.
    #[serde(default)]
    pub sandbox: Option<String>,
    /// Program run before each call; a nonzero exit vetoes the call.
    #[serde(default)]
    pub confirm: Option<String>,
}

/// Inline environment map or a reference into `env_defs`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EnvSpec {
    Ref { r#ref: String },
    Inline(BTreeMap<String, String>),
}

/// Run parameterized queries against a SQLite database.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SqliteSpec {
    /// Database path, or `:memory:`.
    pub sqlite: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub usage: Option<String>,
    #[serde(default)]
    pub readonly: bool,
    /// Row cap on query output.
    #[serde(default)]
    pub limit: Option<usize>,
}

/// A no-op scratchpad that forces reasoning onto the transcript.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ThinkSpec {
    /// What the model is asked to think about; woven into the description.
    pub think_about: String,
    #[serde(default)]
    pub name: Option<String>,
}

/// Stand up a transient local HTTP service over a directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServeSpec {
    /// Directory to serve.
    pub serve: String,
    /// Port to bind on 127.0.0.1; 0 picks an ephemeral port.
    #[serde(default)]
    pub port: u16,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub usage: Option<String>,
}

/// Connect to an MCP peer over stdio.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct McpCommandSpec {
    /// The command to spawn, shell-style.
    pub mcp_command: String,
    #[serde(default)]
    pub env: Option<EnvSpec>,
    /// Prefix for the peer's tool names; defaults to the command stem.
    #[serde(default)]
    pub prefix: Option<String>,
}

/// Connect to an MCP peer over WebSocket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct McpWsSpec {
    pub mcp_ws: String,
    #[serde(default)]
    pub prefix: Option<String>,
}

/// Connect to an MCP peer over streamable HTTP.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct McpShttpSpec {
    pub mcp_shttp: String,
    #[serde(default)]
    pub headers: Option<BTreeMap<String, String>>,
    #[serde(default)]
    pub prefix: Option<String>,
}

/// Expose another interlocutor as a callable tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AgentSpec {
    /// Name of the wrapped interlocutor.
    pub agent: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub usage: Option<String>,
    /// Return a sanitized transcript instead of just the final text.
    #[serde(default)]
    pub transcript: bool,
}

/// Delegate calls to a remote agent speaking the A2A protocol.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct A2aSpec {
    /// Endpoint URL of the remote agent.
    pub a2a: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub usage: Option<String>,
}

/// Marker for a provider-native tool; no local callable exists.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NativeSpec {
    pub native: NativeKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NativeKind {
    Search,
    Code,
}

/// Reference to a named tool bundle.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct KitRef {
    pub kit: String,
}

/// A named tool bundle.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct KitSpec {
    pub name: String,
    #[serde(default)]
    pub tools: Vec<ToolSpec>,
    #[serde(default)]
    pub usage: Option<String>,
}

/// A named template expanded by `:name[args]` invocations.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MacroSpec {
    pub name: String,
    /// Template text; `$1`, `$ARG`, and `$ENV.VAR` substitute.
    #[serde(default)]
    pub expansion: Option<String>,
    /// Command whose stdout is *trusted* text prepended to the expansion.
    #[serde(default)]
    pub pre: Option<String>,
    /// Command whose stdout is *untrusted* text appended to the expansion.
    #[serde(default)]
    pub post: Option<String>,
}

/// One hook entry: an inline definition or a reference to `hook_defs`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum HookSpec {
    Ref(HookRef),
    Def(HookDef),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HookRef {
    pub r#ref: String,
}

/// A user-defined program run at a named lifecycle event.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HookDef {
    /// Only meaningful inside `hook_defs`, where refs resolve by it.
    #[serde(default)]
    pub name: Option<String>,
    pub on: HookEvent,
    /// Shell command or multiline script.
    #[serde(rename = "do")]
    pub command: String,
    /// Capture stdout as an inline attachment on the current message.
    #[serde(default)]
    pub inline: bool,
    /// Promote a nonzero exit to a pipeline error.
    #[serde(default)]
    pub fatal: bool,
}

/// Lifecycle events hooks can attach to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HookEvent {
    UserMessage,
    AssistantMessage,
    ToolUsePre,
    ToolUsePost,
    Error,
}
