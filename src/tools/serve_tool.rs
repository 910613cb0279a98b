//! Serve tool — a transient local HTTP service over a directory.
//!
//! The server binds on localhost when the registry is built and is torn
//! down with the invocation. Each tool call delivers the requested file's
//! content along with the URL it is being served at, so the model can hand
//! the address to other tools or to the user.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use axum::extract::State;
use axum::http::{StatusCode, Uri};
use axum::response::IntoResponse;
use axum::routing::any;
use axum::Router;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::header::ServeSpec;

use super::{Tool, ToolResult};

pub struct ServeTool {
    name: String,
    description: String,
    usage: Option<String>,
    root: PathBuf,
    addr: SocketAddr,
    server: tokio::task::JoinHandle<()>,
}

impl ServeTool {
    /// Binds the listener and spawns the server task.
    pub async fn start(spec: ServeSpec) -> Result<Self> {
        let root = crate::paths::expand_user_path(&spec.serve);
        if !root.is_dir() {
            bail!("The serve root {} is not a directory", root.display());
        }

        let listener = tokio::net::TcpListener::bind(("127.0.0.1", spec.port))
            .await
            .with_context(|| format!("Failed to bind 127.0.0.1:{}", spec.port))?;
        let addr = listener.local_addr()?;

        let app = Router::new()
            .fallback(any(serve_file))
            .with_state(root.clone());
        let server = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                tracing::warn!(error = %e, "serve tool server stopped");
            }
        });

        tracing::debug!(%addr, root = %root.display(), "serve tool listening");
        Ok(Self {
            name: spec.name.unwrap_or_else(|| "serve".to_string()),
            description: format!(
                "Fetch a file from the directory served at http://{addr}/. \
                 Returns the file content and its URL."
            ),
            usage: spec.usage,
            root,
            addr,
            server,
        })
    }

    fn resolve(&self, path: &str) -> Result<PathBuf> {
        let relative = path.trim_start_matches('/');
        let joined = self.root.join(relative);
        // Reject traversal out of the served root.
        if joined
            .components()
            .any(|c| matches!(c, std::path::Component::ParentDir))
        {
            bail!("Path {path} escapes the served directory");
        }
        Ok(joined)
    }
}

impl Drop for ServeTool {
    fn drop(&mut self) {
        self.server.abort();
    }
}

/// Axum fallback handler: serve the URI path from the root directory.
async fn serve_file(State(root): State<PathBuf>, uri: Uri) -> impl IntoResponse {
    let relative = uri.path().trim_start_matches('/');
    let path = root.join(relative);
    if path
        .components()
        .any(|c| matches!(c, std::path::Component::ParentDir))
        || !path.is_file()
    {
        return (StatusCode::NOT_FOUND, Vec::new());
    }
    match tokio::fs::read(&path).await {
        Ok(bytes) => (StatusCode::OK, bytes),
        Err(_) => (StatusCode::NOT_FOUND, Vec::new()),
    }
}

fn mime_of(path: &Path) -> String {
    match path.extension().and_then(|e| e.to_str()) {
        Some("html") | Some("htm") => "text/html".to_string(),
        Some("png") => "image/png".to_string(),
        Some("jpg") | Some("jpeg") => "image/jpeg".to_string(),
        Some("pdf") => "application/pdf".to_string(),
        Some("json") => "application/json".to_string(),
        _ => "text/plain".to_string(),
    }
}

#[derive(Deserialize)]
struct ServeInput {
    path: String,
}

#[async_trait::async_trait]
impl Tool for ServeTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn usage(&self) -> Option<&str> {
        self.usage.as_deref()
    }

    fn parameters(&self) -> Value {
        json!({
            "path": {
                "type": "string",
                "description": "Path of the resource, relative to the served root"
            }
        })
    }

    fn required(&self) -> Vec<String> {
        vec!["path".to_string()]
    }

    async fn call(&self, args: Value) -> Result<Vec<ToolResult>> {
        let input: ServeInput =
            serde_json::from_value(args).context("The serve tool takes a `path` string")?;
        let path = self.resolve(&input.path)?;
        if !path.is_file() {
            bail!("No file at {} under the served root", input.path);
        }
        let bytes = tokio::fs::read(&path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let url = format!("http://{}/{}", self.addr, input.path.trim_start_matches('/'));

        let mimetype = mime_of(&path);
        let body = if mimetype.starts_with("text/") || mimetype == "application/json" {
            String::from_utf8_lossy(&bytes).into_owned()
        } else {
            use base64::Engine;
            base64::engine::general_purpose::STANDARD.encode(&bytes)
        };
        Ok(vec![
            ToolResult::text(format!("Served at {url}")),
            ToolResult::with_mimetype(body, &mimetype),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn tool_over(dir: &Path) -> ServeTool {
        ServeTool::start(ServeSpec {
            serve: dir.to_string_lossy().into_owned(),
            port: 0,
            name: None,
            usage: None,
        })
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn serves_and_returns_content() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("hello.txt"), "hi there").unwrap();
        let tool = tool_over(tmp.path()).await;

        let results = tool
            .call(serde_json::json!({"path": "hello.txt"}))
            .await
            .unwrap();
        assert!(results[0].text.starts_with("Served at http://127.0.0.1:"));
        assert_eq!(results[1].text, "hi there");
    }

    #[tokio::test]
    async fn rejects_traversal() {
        let tmp = tempfile::tempdir().unwrap();
        let tool = tool_over(tmp.path()).await;
        assert!(tool
            .call(serde_json::json!({"path": "../escape"}))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn http_fetch_works() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("f.txt"), "body").unwrap();
        let tool = tool_over(tmp.path()).await;
        let url = format!("http://{}/f.txt", tool.addr);
        let fetched = reqwest::get(&url).await.unwrap().text().await.unwrap();
        assert_eq!(fetched, "body");
    }
}
