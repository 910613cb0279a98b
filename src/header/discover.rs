//! Assembly of the configuration layer stack.
//!
//! Precedence, lowest to highest: system `lectic.yaml`, workspace
//! `lectic.yaml` (nearest ancestor of the document), `--Include` files,
//! header `imports`, then the document's own front matter. In-pipeline
//! `:merge_yaml` directives land on top later, during message processing.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde_yaml::Value;

use super::merge::merge_stack;

/// Reads one YAML layer from disk. Missing files are simply absent layers.
fn load_layer(path: &Path) -> Result<Option<Value>> {
    if !path.is_file() {
        return Ok(None);
    }
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {}", path.display()))?;
    let value: Value = serde_yaml::from_str(&text)
        .with_context(|| format!("Failed to parse YAML in {}", path.display()))?;
    match value {
        Value::Null => Ok(None),
        v => Ok(Some(v)),
    }
}

/// Finds the nearest `lectic.yaml` in `start` or any ancestor directory.
fn find_workspace_config(start: &Path) -> Option<PathBuf> {
    let mut dir = Some(start);
    while let Some(d) = dir {
        let candidate = d.join(crate::constants::CONFIG_FILENAME);
        if candidate.is_file() {
            return Some(candidate);
        }
        dir = d.parent();
    }
    None
}

/// Paths named by the header's `imports` field, expanded and anchored.
fn import_paths(doc_header: &Value, base_dir: &Path) -> Vec<PathBuf> {
    let Some(seq) = doc_header
        .as_mapping()
        .and_then(|m| m.get(Value::from("imports")))
        .and_then(Value::as_sequence)
    else {
        return Vec::new();
    };
    seq.iter()
        .filter_map(Value::as_str)
        .map(|s| {
            let p = crate::paths::expand_user_path(s);
            if p.is_absolute() {
                p
            } else {
                base_dir.join(p)
            }
        })
        .collect()
}

/// Merges the full configuration stack for one invocation.
///
/// `doc_dir` is the directory of the document (the cwd for stdin input);
/// `includes` are `--Include` files in command-line order.
pub fn merged_value(
    doc_header: Value,
    doc_dir: &Path,
    includes: &[PathBuf],
) -> Result<Value> {
    let mut layers: Vec<Value> = Vec::new();

    if let Ok(system) = crate::paths::system_config_path() {
        if let Some(v) = load_layer(&system)? {
            tracing::debug!(path = %system.display(), "loaded system config");
            layers.push(v);
        }
    }

    if let Some(workspace) = find_workspace_config(doc_dir) {
        // The system config dir may itself be an ancestor; don't load the
        // same file twice.
        let system = crate::paths::system_config_path().ok();
        if system.as_deref() != Some(workspace.as_path()) {
            if let Some(v) = load_layer(&workspace)? {
                tracing::debug!(path = %workspace.display(), "loaded workspace config");
                layers.push(v);
            }
        }
    }

    for include in includes {
        let v = load_layer(include)?.with_context(|| {
            format!("Included config file {} does not exist", include.display())
        })?;
        layers.push(v);
    }

    for import in import_paths(&doc_header, doc_dir) {
        let v = load_layer(&import)?.with_context(|| {
            format!("Imported config file {} does not exist", import.display())
        })?;
        layers.push(v);
    }

    layers.push(doc_header);
    Ok(merge_stack(layers))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn workspace_config_found_in_ancestor() {
        let tmp = tempfile::tempdir().unwrap();
        let nested = tmp.path().join("a/b");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::write(
            tmp.path().join("lectic.yaml"),
            "interlocutor: {name: Bot, prompt: p}",
        )
        .unwrap();
        let found = find_workspace_config(&nested).unwrap();
        assert_eq!(found, tmp.path().join("lectic.yaml"));
    }

    #[test]
    fn document_header_wins_over_workspace() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(
            tmp.path().join("lectic.yaml"),
            "interlocutor: {name: Bot, prompt: p, model: from-workspace}",
        )
        .unwrap();
        let doc: Value =
            serde_yaml::from_str("interlocutor: {name: Bot, model: from-doc}").unwrap();
        let merged = merged_value(doc, tmp.path(), &[]).unwrap();
        let model = merged["interlocutor"]["model"].as_str().unwrap();
        assert_eq!(model, "from-doc");
        // Unspecified fields are inherited from the lower layer.
        let prompt = merged["interlocutor"]["prompt"].as_str().unwrap();
        assert_eq!(prompt, "p");
    }

    #[test]
    fn imports_sit_between_workspace_and_header() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(
            tmp.path().join("lectic.yaml"),
            "interlocutor: {name: Bot, prompt: p, model: ws, temperature: 0.1}",
        )
        .unwrap();
        std::fs::write(
            tmp.path().join("imported.yaml"),
            "interlocutor: {name: Bot, model: imported}",
        )
        .unwrap();
        let doc: Value = serde_yaml::from_str(
            "imports: [imported.yaml]\ninterlocutor: {name: Bot, temperature: 0.9}",
        )
        .unwrap();
        let merged = merged_value(doc, tmp.path(), &[]).unwrap();
        assert_eq!(merged["interlocutor"]["model"].as_str(), Some("imported"));
        assert_eq!(merged["interlocutor"]["temperature"].as_f64(), Some(0.9));
    }

    #[test]
    fn missing_include_is_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        let doc: Value = serde_yaml::from_str("{}").unwrap();
        let missing = tmp.path().join("nope.yaml");
        assert!(merged_value(doc, tmp.path(), &[missing]).is_err());
    }
}
