//! Model Context Protocol client.
//!
//! A connection speaks JSON-RPC 2.0 over one of three transports (stdio
//! subprocess, WebSocket, streamable HTTP), performs the initialize
//! handshake, and then exposes the peer's capabilities two ways: one
//! [`McpTool`] per entry in `tools/list`, and the connection itself as a
//! [`ResourceReader`] for `SCHEME+uri` attachment links via
//! `resources/read`.

mod transport;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use serde_json::{json, Value};
use tokio::sync::Mutex;

use crate::attachments::{AttachmentPart, ResourceReader};
use crate::header::{EnvSpec, Header, McpCommandSpec, McpShttpSpec, McpWsSpec};
use crate::tools::exec_tool::shell_split;
use crate::tools::{Tool, ToolResult};

use transport::{ShttpTransport, StdioTransport, Transport, WsTransport};

const PROTOCOL_VERSION: &str = "2025-03-26";

pub struct McpConnection {
    transport: Mutex<Box<dyn Transport>>,
    next_id: AtomicU64,
    /// Claims the resource scheme; prepended to tool names when the user
    /// set it explicitly.
    prefix: String,
    explicit_prefix: bool,
}

impl McpConnection {
    /// Spawns `mcp_command` and handshakes over its stdio.
    pub async fn connect_command(
        spec: &McpCommandSpec,
        header: &Arc<Header>,
    ) -> Result<Arc<Self>> {
        let argv = shell_split(&spec.mcp_command);
        let Some(program) = argv.first() else {
            bail!("`mcp_command` must name a program to run");
        };

        let mut cmd = tokio::process::Command::new(program);
        cmd.args(&argv[1..])
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::null())
            .kill_on_drop(true);
        match &spec.env {
            None => {}
            Some(EnvSpec::Inline(map)) => {
                cmd.envs(map);
            }
            Some(EnvSpec::Ref { r#ref }) => {
                let map = header.env_defs.get(r#ref).ok_or_else(|| {
                    anyhow!("mcp_command references env_def '{}', which is not defined", r#ref)
                })?;
                cmd.envs(map);
            }
        }

        let child = cmd
            .spawn()
            .with_context(|| format!("Failed to spawn MCP command '{program}'"))?;
        let transport = StdioTransport::new(child)?;
        let explicit = spec.prefix.is_some();
        let prefix = spec.prefix.clone().unwrap_or_else(|| {
            std::path::Path::new(program)
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| "mcp".to_string())
        });
        Self::handshake(Box::new(transport), prefix, explicit).await
    }

    /// Connects over WebSocket.
    pub async fn connect_ws(spec: &McpWsSpec) -> Result<Arc<Self>> {
        let transport = WsTransport::connect(&spec.mcp_ws).await?;
        let explicit = spec.prefix.is_some();
        let prefix = spec
            .prefix
            .clone()
            .unwrap_or_else(|| host_prefix(&spec.mcp_ws));
        Self::handshake(Box::new(transport), prefix, explicit).await
    }

    /// Connects over streamable HTTP.
    pub async fn connect_shttp(spec: &McpShttpSpec) -> Result<Arc<Self>> {
        let headers = spec
            .headers
            .clone()
            .unwrap_or_default()
            .into_iter()
            .collect();
        let transport = ShttpTransport::new(spec.mcp_shttp.clone(), headers);
        let explicit = spec.prefix.is_some();
        let prefix = spec
            .prefix
            .clone()
            .unwrap_or_else(|| host_prefix(&spec.mcp_shttp));
        Self::handshake(Box::new(transport), prefix, explicit).await
    }

    async fn handshake(
        transport: Box<dyn Transport>,
        prefix: String,
        explicit_prefix: bool,
    ) -> Result<Arc<Self>> {
        let conn = Arc::new(Self {
            transport: Mutex::new(transport),
            next_id: AtomicU64::new(1),
            prefix,
            explicit_prefix,
        });
        let init = conn
            .request(
                "initialize",
                json!({
                    "protocolVersion": PROTOCOL_VERSION,
                    "capabilities": {},
                    "clientInfo": {
                        "name": crate::constants::APP_NAME,
                        "version": env!("CARGO_PKG_VERSION"),
                    },
                }),
            )
            .await
            .context("MCP initialize failed")?;
        tracing::debug!(
            server = ?init.get("serverInfo"),
            prefix = %conn.prefix,
            "MCP handshake complete"
        );
        conn.notify("notifications/initialized", json!({})).await?;
        Ok(conn)
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Sends one request and unwraps the JSON-RPC envelope.
    async fn request(&self, method: &str, params: Value) -> Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let message = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });
        let mut transport = self.transport.lock().await;
        let response = transport.request(message, id).await?;
        if let Some(error) = response.get("error") {
            let text = error
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("unknown error");
            bail!("MCP {method} failed: {text}");
        }
        response
            .get("result")
            .cloned()
            .ok_or_else(|| anyhow!("MCP {method} response carried no result"))
    }

    async fn notify(&self, method: &str, params: Value) -> Result<()> {
        let message = json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
        });
        self.transport.lock().await.notify(message).await
    }

    /// Lists the peer's tools and wraps each as a local [`Tool`].
    pub async fn discover_tools(self: &Arc<Self>) -> Result<Vec<McpTool>> {
        let result = self.request("tools/list", json!({})).await?;
        let entries = result
            .get("tools")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        let mut tools = Vec::with_capacity(entries.len());
        for entry in entries {
            let Some(remote_name) = entry.get("name").and_then(Value::as_str) else {
                continue;
            };
            let schema = entry.get("inputSchema").cloned().unwrap_or(json!({}));
            let name = if self.explicit_prefix {
                format!("{}_{}", self.prefix, remote_name)
            } else {
                remote_name.to_string()
            };
            tools.push(McpTool {
                connection: Arc::clone(self),
                name,
                remote_name: remote_name.to_string(),
                description: entry
                    .get("description")
                    .and_then(Value::as_str)
                    .unwrap_or("An MCP-provided tool.")
                    .to_string(),
                parameters: schema.get("properties").cloned().unwrap_or(json!({})),
                required: schema
                    .get("required")
                    .and_then(Value::as_array)
                    .map(|a| {
                        a.iter()
                            .filter_map(Value::as_str)
                            .map(str::to_string)
                            .collect()
                    })
                    .unwrap_or_default(),
            });
        }
        Ok(tools)
    }

    /// Calls one remote tool and maps its content to results.
    async fn call_tool(&self, remote_name: &str, args: Value) -> Result<Vec<ToolResult>> {
        let result = self
            .request(
                "tools/call",
                json!({ "name": remote_name, "arguments": args }),
            )
            .await?;

        let results = content_to_results(result.get("content"));
        if result
            .get("isError")
            .and_then(Value::as_bool)
            .unwrap_or(false)
        {
            let text: Vec<String> = results.into_iter().map(|r| r.text).collect();
            bail!("{}", text.join("\n"));
        }
        Ok(results)
    }
}

/// Maps MCP content blocks to tool results. Binary blocks keep their
/// base64 payload as text alongside the declared mimetype.
fn content_to_results(content: Option<&Value>) -> Vec<ToolResult> {
    let Some(blocks) = content.and_then(Value::as_array) else {
        return Vec::new();
    };
    let mut results = Vec::new();
    for block in blocks {
        match block.get("type").and_then(Value::as_str) {
            Some("text") => {
                let text = block.get("text").and_then(Value::as_str).unwrap_or_default();
                results.push(ToolResult::text(text));
            }
            Some("image") | Some("audio") => {
                let data = block.get("data").and_then(Value::as_str).unwrap_or_default();
                let mimetype = block
                    .get("mimeType")
                    .and_then(Value::as_str)
                    .unwrap_or("application/octet-stream");
                results.push(ToolResult::with_mimetype(data, mimetype));
            }
            Some("resource") => {
                let resource = block.get("resource").cloned().unwrap_or_default();
                if let Some(text) = resource.get("text").and_then(Value::as_str) {
                    results.push(ToolResult::text(text));
                } else if let Some(blob) = resource.get("blob").and_then(Value::as_str) {
                    let mimetype = resource
                        .get("mimeType")
                        .and_then(Value::as_str)
                        .unwrap_or("application/octet-stream");
                    results.push(ToolResult::with_mimetype(blob, mimetype));
                }
            }
            _ => {}
        }
    }
    results
}

#[async_trait::async_trait]
impl ResourceReader for McpConnection {
    fn schemes(&self) -> Vec<String> {
        vec![self.prefix.clone()]
    }

    async fn read(&self, uri: &str) -> Result<Vec<AttachmentPart>> {
        let result = self
            .request("resources/read", json!({ "uri": uri }))
            .await?;
        let contents = result
            .get("contents")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        let mut parts = Vec::new();
        for entry in contents {
            let mimetype = entry
                .get("mimeType")
                .and_then(Value::as_str)
                .unwrap_or("text/plain")
                .to_string();
            let part_uri = entry
                .get("uri")
                .and_then(Value::as_str)
                .unwrap_or(uri)
                .to_string();
            let bytes = if let Some(text) = entry.get("text").and_then(Value::as_str) {
                text.as_bytes().to_vec()
            } else if let Some(blob) = entry.get("blob").and_then(Value::as_str) {
                use base64::Engine;
                base64::engine::general_purpose::STANDARD
                    .decode(blob)
                    .context("MCP resource blob holds invalid base64")?
            } else {
                continue;
            };
            parts.push(AttachmentPart {
                bytes,
                mimetype,
                title: part_uri.clone(),
                uri: part_uri,
                fragment_params: None,
            });
        }
        if parts.is_empty() {
            bail!("The MCP server returned no readable content for {uri}");
        }
        Ok(parts)
    }
}

/// Derives a name prefix from a server URL's host.
fn host_prefix(url: &str) -> String {
    url::Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.replace(['.', '-'], "_")))
        .unwrap_or_else(|| "mcp".to_string())
}

/// One remotely-provided capability, callable like any local tool.
pub struct McpTool {
    connection: Arc<McpConnection>,
    name: String,
    remote_name: String,
    description: String,
    parameters: Value,
    required: Vec<String>,
}

#[async_trait::async_trait]
impl Tool for McpTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters(&self) -> Value {
        self.parameters.clone()
    }

    fn required(&self) -> Vec<String> {
        self.required.clone()
    }

    async fn call(&self, args: Value) -> Result<Vec<ToolResult>> {
        self.connection.call_tool(&self.remote_name, args).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_blocks_map_to_results() {
        let content = json!([
            {"type": "text", "text": "hello"},
            {"type": "image", "data": "QUJD", "mimeType": "image/png"},
            {"type": "resource", "resource": {"text": "doc body", "uri": "x://y"}},
        ]);
        let results = content_to_results(Some(&content));
        assert_eq!(results.len(), 3);
        assert_eq!(results[0].text, "hello");
        assert_eq!(results[1].mimetype, "image/png");
        assert!(results[1].is_binary());
        assert_eq!(results[2].text, "doc body");
    }

    #[test]
    fn host_prefix_comes_from_the_url() {
        assert_eq!(host_prefix("wss://tools.example.com/mcp"), "tools_example_com");
        assert_eq!(host_prefix("not a url"), "mcp");
    }
}
