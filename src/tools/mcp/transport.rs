//! MCP transports: stdio subprocess, WebSocket, and streamable HTTP.
//!
//! Each transport moves JSON-RPC messages to one peer. Requests are
//! correlated by id; server-initiated notifications arriving in between
//! are logged and skipped.

use anyhow::{anyhow, bail, Context, Result};
use eventsource_stream::Eventsource;
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::process::{Child, ChildStdin, ChildStdout};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

/// One JSON-RPC transport to an MCP peer.
#[async_trait::async_trait]
pub trait Transport: Send {
    /// Sends a request and waits for the response with the matching id.
    async fn request(&mut self, message: Value, id: u64) -> Result<Value>;

    /// Sends a notification; no response is expected.
    async fn notify(&mut self, message: Value) -> Result<()>;
}

/// Whether an incoming message answers the request with `id`.
fn answers(message: &Value, id: u64) -> bool {
    message.get("id").and_then(Value::as_u64) == Some(id)
}

/// A line-delimited JSON stdio connection to a child process.
pub struct StdioTransport {
    // Held so the child is reaped when the transport drops.
    _child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
}

impl StdioTransport {
    pub fn new(mut child: Child) -> Result<Self> {
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| anyhow!("MCP child has no stdin"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| anyhow!("MCP child has no stdout"))?;
        Ok(Self {
            _child: child,
            stdin,
            stdout: BufReader::new(stdout),
        })
    }

    async fn send_line(&mut self, message: &Value) -> Result<()> {
        let mut line = serde_json::to_string(message)?;
        line.push('\n');
        self.stdin
            .write_all(line.as_bytes())
            .await
            .context("Failed to write to the MCP child process")?;
        self.stdin.flush().await?;
        Ok(())
    }

    async fn read_message(&mut self) -> Result<Value> {
        let mut line = String::new();
        loop {
            line.clear();
            let n = self
                .stdout
                .read_line(&mut line)
                .await
                .context("Failed to read from the MCP child process")?;
            if n == 0 {
                bail!("The MCP child process closed its stdout");
            }
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            match serde_json::from_str(trimmed) {
                Ok(v) => return Ok(v),
                Err(e) => tracing::debug!(error = %e, "skipping non-JSON line from MCP child"),
            }
        }
    }
}

#[async_trait::async_trait]
impl Transport for StdioTransport {
    async fn request(&mut self, message: Value, id: u64) -> Result<Value> {
        self.send_line(&message).await?;
        loop {
            let incoming = self.read_message().await?;
            if answers(&incoming, id) {
                return Ok(incoming);
            }
            tracing::trace!(?incoming, "skipping interleaved MCP message");
        }
    }

    async fn notify(&mut self, message: Value) -> Result<()> {
        self.send_line(&message).await
    }
}

/// A WebSocket connection carrying JSON-RPC text frames.
pub struct WsTransport {
    socket: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl WsTransport {
    pub async fn connect(url: &str) -> Result<Self> {
        let (socket, _) = tokio_tungstenite::connect_async(url)
            .await
            .with_context(|| format!("WebSocket connection to {url} failed"))?;
        Ok(Self { socket })
    }
}

#[async_trait::async_trait]
impl Transport for WsTransport {
    async fn request(&mut self, message: Value, id: u64) -> Result<Value> {
        self.socket
            .send(WsMessage::Text(serde_json::to_string(&message)?.into()))
            .await
            .context("Failed to send on the MCP WebSocket")?;
        loop {
            let frame = self
                .socket
                .next()
                .await
                .ok_or_else(|| anyhow!("The MCP WebSocket closed"))?
                .context("Failed to read from the MCP WebSocket")?;
            let text = match frame {
                WsMessage::Text(t) => t.to_string(),
                WsMessage::Binary(b) => String::from_utf8_lossy(&b).into_owned(),
                WsMessage::Ping(_) | WsMessage::Pong(_) => continue,
                WsMessage::Close(_) => bail!("The MCP WebSocket closed"),
                _ => continue,
            };
            let incoming: Value = match serde_json::from_str(&text) {
                Ok(v) => v,
                Err(_) => continue,
            };
            if answers(&incoming, id) {
                return Ok(incoming);
            }
        }
    }

    async fn notify(&mut self, message: Value) -> Result<()> {
        self.socket
            .send(WsMessage::Text(serde_json::to_string(&message)?.into()))
            .await
            .context("Failed to send on the MCP WebSocket")?;
        Ok(())
    }
}

/// Streamable HTTP: each request is a POST whose response is either a
/// single JSON body or an SSE stream ending with the response message.
pub struct ShttpTransport {
    client: reqwest::Client,
    url: String,
    headers: Vec<(String, String)>,
    session_id: Option<String>,
}

impl ShttpTransport {
    pub fn new(url: String, headers: Vec<(String, String)>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url,
            headers,
            session_id: None,
        }
    }

    async fn post(&mut self, message: &Value) -> Result<reqwest::Response> {
        let mut req = self
            .client
            .post(&self.url)
            .header("accept", "application/json, text/event-stream")
            .json(message);
        for (k, v) in &self.headers {
            req = req.header(k.as_str(), v.as_str());
        }
        if let Some(session) = &self.session_id {
            req = req.header("mcp-session-id", session.as_str());
        }
        let response = req
            .send()
            .await
            .with_context(|| format!("POST to MCP server {} failed", self.url))?;
        if !response.status().is_success() {
            bail!(
                "MCP server {} returned HTTP {}",
                self.url,
                response.status()
            );
        }
        if let Some(session) = response
            .headers()
            .get("mcp-session-id")
            .and_then(|v| v.to_str().ok())
        {
            self.session_id = Some(session.to_string());
        }
        Ok(response)
    }
}

#[async_trait::async_trait]
impl Transport for ShttpTransport {
    async fn request(&mut self, message: Value, id: u64) -> Result<Value> {
        let response = self.post(&message).await?;
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();

        if content_type.starts_with("text/event-stream") {
            let mut events = response.bytes_stream().eventsource();
            while let Some(event) = events.next().await {
                let event = event.context("Failed to read the MCP event stream")?;
                let incoming: Value = match serde_json::from_str(&event.data) {
                    Ok(v) => v,
                    Err(_) => continue,
                };
                if answers(&incoming, id) {
                    return Ok(incoming);
                }
            }
            bail!("The MCP event stream ended without a response");
        }

        let incoming: Value = response
            .json()
            .await
            .context("The MCP server returned invalid JSON")?;
        Ok(incoming)
    }

    async fn notify(&mut self, message: Value) -> Result<()> {
        self.post(&message).await?;
        Ok(())
    }
}
