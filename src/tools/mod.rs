pub mod agent_tool;
pub mod a2a_tool;
pub mod exec_tool;
pub mod mcp;
pub mod serve_tool;
pub mod sqlite_tool;
pub mod think_tool;

use std::sync::Arc;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::attachments::ResourceReader;
use crate::error::LecticError;
use crate::header::{expand_kits, Header, Interlocutor, NativeKind, ToolSpec};

/// One value produced by a tool call.
///
/// `text/*` mimetypes collapse to `text/plain`; binary results are threaded
/// back to the model as attachments rather than inline text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub text: String,
    #[serde(default = "default_mimetype")]
    pub mimetype: String,
}

fn default_mimetype() -> String {
    "text/plain".to_string()
}

impl ToolResult {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            text: content.into(),
            mimetype: default_mimetype(),
        }
    }

    pub fn with_mimetype(content: impl Into<String>, mimetype: &str) -> Self {
        let mimetype = if mimetype.starts_with("text/") {
            "text/plain".to_string()
        } else {
            mimetype.to_string()
        };
        Self {
            text: content.into(),
            mimetype,
        }
    }

    /// Binary results become attachments on the next user turn instead of
    /// model-visible tool output.
    pub fn is_binary(&self) -> bool {
        self.mimetype.starts_with("image/")
            || self.mimetype.starts_with("audio/")
            || self.mimetype.starts_with("video/")
            || self.mimetype == "application/pdf"
    }
}

/// Definition sent to the provider so the model knows what it can call.
#[derive(Debug, Clone, Serialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON-Schema property map.
    pub parameters: Value,
    pub required: Vec<String>,
}

/// Every tool variant implements this contract.
#[async_trait::async_trait]
pub trait Tool: Send + Sync {
    /// Unique name within the interlocutor's registry.
    fn name(&self) -> &str;

    /// Human-readable description sent to the model.
    fn description(&self) -> &str;

    /// JSON-Schema property map for the call arguments.
    fn parameters(&self) -> Value;

    /// Names of required properties.
    fn required(&self) -> Vec<String>;

    /// Optional usage prose appended to the description.
    fn usage(&self) -> Option<&str> {
        None
    }

    /// Execute the tool. Failures are converted to `isError` results by the
    /// registry; implementations may simply propagate.
    async fn call(&self, args: Value) -> Result<Vec<ToolResult>>;

    /// Rejects calls whose arguments do not satisfy the schema.
    fn validate(&self, args: &Value) -> Result<()> {
        let Some(map) = args.as_object() else {
            anyhow::bail!("Arguments for '{}' must be a JSON object", self.name());
        };
        for key in self.required() {
            if !map.contains_key(&key) {
                anyhow::bail!("Call to '{}' is missing required argument '{key}'", self.name());
            }
        }
        Ok(())
    }
}

/// Holds one interlocutor's tools and dispatches calls by name.
///
/// Built once during header initialization and read-only afterwards.
pub struct ToolRegistry {
    tools: Vec<Arc<dyn Tool>>,
    /// Provider-native tool markers; surfaced by backends, never called here.
    native: Vec<NativeKind>,
    /// MCP connections that can serve `SCHEME+uri` resource links.
    readers: Vec<Arc<dyn ResourceReader>>,
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.tools.iter().map(|t| t.name().to_string()).collect::<Vec<_>>())
            .field("native", &self.native)
            .field("readers", &self.readers.len())
            .finish()
    }
}

impl ToolRegistry {
    pub fn empty() -> Self {
        Self {
            tools: Vec::new(),
            native: Vec::new(),
            readers: Vec::new(),
        }
    }

    /// Builds the registry for `interlocutor`, expanding kit references and
    /// connecting MCP peers. Tool name collisions are fatal.
    pub async fn build(header: &Arc<Header>, interlocutor: &Interlocutor) -> Result<Self, LecticError> {
        let mut registry = Self::empty();
        let specs = expand_kits(header, &interlocutor.tools)?;

        for spec in specs {
            match spec {
                ToolSpec::Exec(spec) => {
                    let tool = exec_tool::ExecTool::new(spec, header)?;
                    registry.register(Arc::new(tool))?;
                }
                ToolSpec::Sqlite(spec) => {
                    registry.register(Arc::new(sqlite_tool::SqliteTool::new(spec)))?;
                }
                ToolSpec::Think(spec) => {
                    registry.register(Arc::new(think_tool::ThinkTool::new(spec)))?;
                }
                ToolSpec::Serve(spec) => {
                    let tool = serve_tool::ServeTool::start(spec).await.map_err(|e| {
                        LecticError::ToolInit(format!("Failed to start the serve tool: {e}"))
                    })?;
                    registry.register(Arc::new(tool))?;
                }
                ToolSpec::McpCommand(spec) => {
                    let conn = mcp::McpConnection::connect_command(&spec, header)
                        .await
                        .map_err(|e| {
                            LecticError::ToolInit(format!(
                                "Failed to connect to MCP command '{}': {e}",
                                spec.mcp_command
                            ))
                        })?;
                    registry.register_mcp(conn).await?;
                }
                ToolSpec::McpWs(spec) => {
                    let conn = mcp::McpConnection::connect_ws(&spec).await.map_err(|e| {
                        LecticError::ToolInit(format!(
                            "Failed to connect to MCP server {}: {e}",
                            spec.mcp_ws
                        ))
                    })?;
                    registry.register_mcp(conn).await?;
                }
                ToolSpec::McpShttp(spec) => {
                    let conn = mcp::McpConnection::connect_shttp(&spec).await.map_err(|e| {
                        LecticError::ToolInit(format!(
                            "Failed to connect to MCP server {}: {e}",
                            spec.mcp_shttp
                        ))
                    })?;
                    registry.register_mcp(conn).await?;
                }
                ToolSpec::Agent(spec) => {
                    registry.register(Arc::new(agent_tool::AgentTool::new(spec, header.clone())))?;
                }
                ToolSpec::A2a(spec) => {
                    registry.register(Arc::new(a2a_tool::A2aTool::new(spec)))?;
                }
                ToolSpec::Native(spec) => registry.native.push(spec.native),
                ToolSpec::Kit(_) => unreachable!("kit references are expanded above"),
            }
        }
        Ok(registry)
    }

    /// Register a tool. Called during startup only.
    pub fn register(&mut self, tool: Arc<dyn Tool>) -> Result<(), LecticError> {
        if self.tools.iter().any(|t| t.name() == tool.name()) {
            return Err(LecticError::ToolInit(format!(
                "Two tools share the name '{}'; give one an explicit `name`",
                tool.name()
            )));
        }
        self.tools.push(tool);
        Ok(())
    }

    /// Registers one tool per capability exposed by an MCP peer, and the
    /// connection itself as a resource reader.
    async fn register_mcp(&mut self, conn: Arc<mcp::McpConnection>) -> Result<(), LecticError> {
        let tools = conn.discover_tools().await.map_err(|e| {
            LecticError::ToolInit(format!("MCP peer '{}' failed tools/list: {e}", conn.prefix()))
        })?;
        for tool in tools {
            self.register(Arc::new(tool))?;
        }
        self.readers.push(conn);
        Ok(())
    }

    /// Produce definitions for the provider request.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools
            .iter()
            .map(|t| ToolDefinition {
                name: t.name().to_string(),
                description: match t.usage() {
                    Some(usage) => format!("{}\n\n{}", t.description(), usage),
                    None => t.description().to_string(),
                },
                parameters: t.parameters(),
                required: t.required(),
            })
            .collect()
    }

    /// Native tool markers for the backend to surface.
    pub fn native_tools(&self) -> &[NativeKind] {
        &self.native
    }

    /// Resource readers for `SCHEME+uri` attachment links.
    pub fn readers(&self) -> &[Arc<dyn ResourceReader>] {
        &self.readers
    }

    /// Look up a tool and realize one call.
    ///
    /// Validation failures and call errors are captured as `is_error`
    /// results so one bad call cannot abort the turn loop.
    pub async fn call(&self, name: &str, args: Value) -> (Vec<ToolResult>, bool) {
        let Some(tool) = self.tools.iter().find(|t| t.name() == name) else {
            return (
                vec![ToolResult::text(format!("No tool named '{name}' is available"))],
                true,
            );
        };
        if let Err(e) = tool.validate(&args) {
            return (vec![ToolResult::text(format!("{e:#}"))], true);
        }
        match tool.call(args).await {
            Ok(results) => (results, false),
            Err(e) => (vec![ToolResult::text(format!("{e:#}"))], true),
        }
    }
}

#[cfg(test)]
mod tests;
