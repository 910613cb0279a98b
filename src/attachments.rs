//! Link URI classification and resolution.
//!
//! Markdown links in user turns are resolved into typed byte blobs before
//! dispatch. A link may point at a local file (with `$VAR` expansion and
//! glob patterns), an http(s) resource, a `data:` URI, or an MCP resource
//! reachable through a connected peer (`SCHEME+uri`). Each resolution
//! yields one or more [`AttachmentPart`]s.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use base64::Engine;

use serde::{Deserialize, Serialize};

/// One resolved attachment: bytes plus the metadata the backends need.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttachmentPart {
    pub bytes: Vec<u8>,
    pub mimetype: String,
    pub title: String,
    pub uri: String,
    /// Trailing `#...` fragment from the link, e.g. `page=3-5`.
    pub fragment_params: Option<String>,
}

impl AttachmentPart {
    pub fn is_text(&self) -> bool {
        self.mimetype.starts_with("text/")
            || self.mimetype == "application/json"
            || self.mimetype == "application/yaml"
    }

    /// UTF-8 view for text parts.
    pub fn text(&self) -> Option<String> {
        self.is_text()
            .then(|| String::from_utf8_lossy(&self.bytes).into_owned())
    }
}

/// Where a link URI points.
#[derive(Debug, Clone, PartialEq)]
pub enum LinkTarget {
    File(PathBuf),
    Glob(String),
    Http(String),
    Data(String),
    S3(String),
    McpResource { scheme: String, uri: String },
}

/// A reader for `SCHEME+uri` resources, implemented by MCP connections.
#[async_trait::async_trait]
pub trait ResourceReader: Send + Sync {
    /// The scheme prefixes this reader claims.
    fn schemes(&self) -> Vec<String>;
    async fn read(&self, uri: &str) -> Result<Vec<AttachmentPart>>;
}

/// Splits a `#fragment` suffix off a URI.
fn split_fragment(uri: &str) -> (&str, Option<String>) {
    match uri.split_once('#') {
        Some((base, frag)) if !frag.is_empty() => (base, Some(frag.to_string())),
        _ => (uri, None),
    }
}

fn has_glob_meta(s: &str) -> bool {
    s.contains('*') || s.contains('?') || s.contains('[')
}

/// Classifies a link URI. Local paths get `$VAR` and `~` expansion here.
pub fn classify(uri: &str) -> LinkTarget {
    let (base, _) = split_fragment(uri);
    if base.starts_with("http://") || base.starts_with("https://") {
        return LinkTarget::Http(uri.to_string());
    }
    if base.starts_with("data:") {
        return LinkTarget::Data(uri.to_string());
    }
    if base.starts_with("s3:") {
        return LinkTarget::S3(uri.to_string());
    }
    // SCHEME+uri routes to an MCP resource reader.
    if let Some((scheme, rest)) = base.split_once('+') {
        if !scheme.is_empty()
            && scheme
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
            && rest.contains("://")
        {
            return LinkTarget::McpResource {
                scheme: scheme.to_string(),
                uri: rest.to_string(),
            };
        }
    }
    let path = base.strip_prefix("file://").unwrap_or(base);
    let expanded = crate::paths::expand_user_path(path);
    if has_glob_meta(&expanded.to_string_lossy()) {
        LinkTarget::Glob(expanded.to_string_lossy().into_owned())
    } else {
        LinkTarget::File(expanded)
    }
}

/// Guesses a mimetype from a file extension.
fn mime_for_path(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .as_deref()
    {
        Some("txt") | Some("md") | Some("rs") | Some("py") | Some("js") | Some("ts")
        | Some("sh") | Some("toml") | Some("csv") | Some("log") => "text/plain",
        Some("yaml") | Some("yml") => "application/yaml",
        Some("json") => "application/json",
        Some("html") | Some("htm") => "text/html",
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        Some("svg") => "image/svg+xml",
        Some("mp3") => "audio/mpeg",
        Some("wav") => "audio/wav",
        Some("mp4") => "video/mp4",
        Some("pdf") => "application/pdf",
        _ => "application/octet-stream",
    }
}

/// Resolves one link into its attachment parts.
///
/// `base_dir` anchors relative paths; `readers` serve `SCHEME+uri`
/// resources. Fetch and read failures are errors for the caller to report;
/// a glob with no matches resolves to no parts.
pub async fn resolve_link(
    uri: &str,
    title: Option<&str>,
    base_dir: &Path,
    readers: &[Arc<dyn ResourceReader>],
) -> Result<Vec<AttachmentPart>> {
    let (_, fragment) = split_fragment(uri);
    match classify(uri) {
        LinkTarget::File(path) => {
            let path = if path.is_absolute() {
                path
            } else {
                base_dir.join(path)
            };
            let bytes = tokio::fs::read(&path)
                .await
                .with_context(|| format!("Failed to read linked file {}", path.display()))?;
            let name = title
                .map(str::to_string)
                .unwrap_or_else(|| path.file_name().unwrap_or_default().to_string_lossy().into_owned());
            Ok(vec![AttachmentPart {
                bytes,
                mimetype: mime_for_path(&path).to_string(),
                title: name,
                uri: uri.to_string(),
                fragment_params: fragment,
            }])
        }
        LinkTarget::Glob(pattern) => {
            let anchored = if Path::new(&pattern).is_absolute() {
                pattern
            } else {
                base_dir.join(&pattern).to_string_lossy().into_owned()
            };
            let mut parts = Vec::new();
            for entry in glob::glob(&anchored)
                .with_context(|| format!("Invalid glob pattern {anchored}"))?
            {
                let path = entry.context("Failed to walk glob matches")?;
                if !path.is_file() {
                    continue;
                }
                let bytes = tokio::fs::read(&path)
                    .await
                    .with_context(|| format!("Failed to read {}", path.display()))?;
                parts.push(AttachmentPart {
                    bytes,
                    mimetype: mime_for_path(&path).to_string(),
                    title: path.file_name().unwrap_or_default().to_string_lossy().into_owned(),
                    uri: path.to_string_lossy().into_owned(),
                    fragment_params: None,
                });
            }
            Ok(parts)
        }
        LinkTarget::Http(url) => {
            let (base, _) = split_fragment(&url);
            let response = reqwest::get(base)
                .await
                .with_context(|| format!("Failed to fetch {base}"))?;
            if !response.status().is_success() {
                bail!("Fetching {base} returned HTTP {}", response.status());
            }
            let mimetype = response
                .headers()
                .get(reqwest::header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .map(|v| v.split(';').next().unwrap_or(v).trim().to_string())
                .unwrap_or_else(|| "application/octet-stream".to_string());
            let bytes = response.bytes().await?.to_vec();
            Ok(vec![AttachmentPart {
                bytes,
                mimetype,
                title: title.unwrap_or(base).to_string(),
                uri: url.clone(),
                fragment_params: fragment,
            }])
        }
        LinkTarget::Data(data_uri) => {
            let part = parse_data_uri(&data_uri)?;
            Ok(vec![AttachmentPart {
                title: title.unwrap_or("inline data").to_string(),
                uri: "data:...".to_string(),
                fragment_params: fragment,
                ..part
            }])
        }
        LinkTarget::S3(s3_uri) => Err(anyhow!(
            "s3 links ({s3_uri}) are not supported; expose the bucket through a tool instead"
        )),
        LinkTarget::McpResource { scheme, uri: inner } => {
            let reader = readers
                .iter()
                .find(|r| r.schemes().iter().any(|s| s == &scheme))
                .ok_or_else(|| {
                    anyhow!("No connected MCP server claims the resource scheme '{scheme}'")
                })?;
            reader.read(&inner).await
        }
    }
}

/// Parses `data:[<mediatype>][;base64],<data>`.
fn parse_data_uri(uri: &str) -> Result<AttachmentPart> {
    let rest = uri
        .strip_prefix("data:")
        .ok_or_else(|| anyhow!("Not a data: URI"))?;
    let (meta, payload) = rest
        .split_once(',')
        .ok_or_else(|| anyhow!("data: URI is missing its ',' separator"))?;
    let (mimetype, is_base64) = match meta.strip_suffix(";base64") {
        Some(m) => (m, true),
        None => (meta, false),
    };
    let mimetype = if mimetype.is_empty() {
        "text/plain".to_string()
    } else {
        mimetype.to_string()
    };
    let bytes = if is_base64 {
        base64::engine::general_purpose::STANDARD
            .decode(payload)
            .context("data: URI holds invalid base64")?
    } else {
        percent_decode(payload)
    };
    Ok(AttachmentPart {
        bytes,
        mimetype,
        title: String::new(),
        uri: String::new(),
        fragment_params: None,
    })
}

/// Minimal percent-decoding for non-base64 data: URIs.
fn percent_decode(s: &str) -> Vec<u8> {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            if let Ok(v) = u8::from_str_radix(&s[i + 1..i + 3], 16) {
                out.push(v);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_schemes() {
        assert!(matches!(classify("https://x.y/z"), LinkTarget::Http(_)));
        assert!(matches!(classify("data:text/plain,hi"), LinkTarget::Data(_)));
        assert!(matches!(classify("s3://bucket/key"), LinkTarget::S3(_)));
        assert!(matches!(
            classify("docs+file:///a/b"),
            LinkTarget::McpResource { .. }
        ));
        assert!(matches!(classify("notes/today.md"), LinkTarget::File(_)));
        assert!(matches!(classify("src/**/*.rs"), LinkTarget::Glob(_)));
    }

    #[test]
    fn file_scheme_prefix_is_stripped() {
        match classify("file:///etc/hosts") {
            LinkTarget::File(p) => assert_eq!(p, PathBuf::from("/etc/hosts")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn env_vars_expand_in_paths() {
        std::env::set_var("LECTIC_ATTACH_TEST", "/somewhere");
        match classify("$LECTIC_ATTACH_TEST/notes.txt") {
            LinkTarget::File(p) => assert_eq!(p, PathBuf::from("/somewhere/notes.txt")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn resolves_local_file_with_fragment() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("doc.pdf");
        std::fs::write(&path, b"%PDF-fake").unwrap();
        let uri = format!("{}#page=3-5", path.display());
        let parts = resolve_link(&uri, Some("the doc"), tmp.path(), &[])
            .await
            .unwrap();
        assert_eq!(parts.len(), 1);
        assert_eq!(parts[0].mimetype, "application/pdf");
        assert_eq!(parts[0].title, "the doc");
        assert_eq!(parts[0].fragment_params.as_deref(), Some("page=3-5"));
    }

    #[tokio::test]
    async fn glob_expands_to_multiple_parts() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("a.md"), "A").unwrap();
        std::fs::write(tmp.path().join("b.md"), "B").unwrap();
        std::fs::write(tmp.path().join("c.txt"), "C").unwrap();
        let parts = resolve_link("*.md", None, tmp.path(), &[]).await.unwrap();
        assert_eq!(parts.len(), 2);
        assert!(parts.iter().all(|p| p.mimetype == "text/plain"));
    }

    #[tokio::test]
    async fn data_uri_base64_decodes() {
        let parts = resolve_link("data:text/plain;base64,aGVsbG8=", None, Path::new("."), &[])
            .await
            .unwrap();
        assert_eq!(parts[0].text().as_deref(), Some("hello"));
    }

    #[tokio::test]
    async fn s3_is_reported_unsupported() {
        let err = resolve_link("s3://bucket/key", None, Path::new("."), &[])
            .await
            .unwrap_err();
        assert!(err.to_string().contains("s3"));
    }

    #[test]
    fn fragment_split() {
        assert_eq!(split_fragment("a#b"), ("a", Some("b".to_string())));
        assert_eq!(split_fragment("a"), ("a", None));
    }
}
