//! Header configuration: types, layer discovery, merging, and validation.
//!
//! The effective header for an invocation is the deep merge of a stack of
//! YAML layers (system config, workspace config, includes, imports, the
//! document's front matter, and any in-pipeline `:merge_yaml` directives),
//! validated into a [`Header`].

mod discover;
mod kits;
mod merge;
mod types;
mod validate;

pub use discover::merged_value;
pub use kits::expand_kits;
pub use merge::{merge_stack, merge_values};
pub use types::{
    A2aSpec, AgentSpec, EnvSpec, ExecSpec, Header, HookDef, HookEvent, HookRef, HookSpec,
    Interlocutor, KitRef, KitSpec, MacroSpec, McpCommandSpec, McpShttpSpec, McpWsSpec, NativeKind,
    NativeSpec, Provider, ServeSpec, SqliteSpec, ThinkSpec, ThinkingEffort, ToolSpec,
};
