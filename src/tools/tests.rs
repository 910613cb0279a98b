use std::path::Path;
use std::sync::Arc;

use serde_json::json;

use super::*;

fn header(yaml: &str) -> Arc<Header> {
    Arc::new(
        Header::from_value(serde_yaml::from_str(yaml).unwrap(), Path::new(".")).unwrap(),
    )
}

#[tokio::test]
async fn builds_builtin_tool_variants() {
    let h = header(
        "interlocutor:\n  name: Bot\n  prompt: p\n  tools:\n    - exec: \"echo hi\"\n    - sqlite: \":memory:\"\n    - think_about: everything\n    - native: search",
    );
    let registry = ToolRegistry::build(&h, h.speaker()).await.unwrap();
    let defs = registry.definitions();
    assert_eq!(defs.len(), 3);
    assert_eq!(defs[0].name, "echo");
    assert_eq!(defs[1].name, "sqlite");
    assert_eq!(defs[2].name, "think_about");
    assert!(matches!(
        registry.native_tools(),
        [crate::header::NativeKind::Search]
    ));
}

#[tokio::test]
async fn name_collision_is_fatal() {
    let h = header(
        "interlocutor:\n  name: Bot\n  prompt: p\n  tools:\n    - exec: \"echo a\"\n    - exec: \"echo b\"",
    );
    let err = ToolRegistry::build(&h, h.speaker()).await.unwrap_err();
    assert!(err.to_string().contains("echo"));
}

#[tokio::test]
async fn kit_tools_are_instantiated() {
    let h = header(
        "interlocutor:\n  name: Bot\n  prompt: p\n  tools: [{kit: base}]\nkits:\n  - name: base\n    tools: [{think_about: the weather}]",
    );
    let registry = ToolRegistry::build(&h, h.speaker()).await.unwrap();
    assert_eq!(registry.definitions().len(), 1);
}

#[tokio::test]
async fn exec_call_captures_stdout() {
    let h = header(
        "interlocutor:\n  name: Bot\n  prompt: p\n  tools:\n    - exec: \"echo\"",
    );
    let registry = ToolRegistry::build(&h, h.speaker()).await.unwrap();
    let (results, is_error) = registry.call("echo", json!({"arguments": ["hi"]})).await;
    assert!(!is_error);
    assert_eq!(results[0].text, "hi");
}

#[tokio::test]
async fn exec_failure_becomes_error_result() {
    let h = header(
        "interlocutor:\n  name: Bot\n  prompt: p\n  tools:\n    - exec: \"false\"",
    );
    let registry = ToolRegistry::build(&h, h.speaker()).await.unwrap();
    let (results, is_error) = registry.call("false", json!({})).await;
    assert!(is_error);
    assert!(results[0].text.contains("exited with code 1"));
}

#[tokio::test]
async fn unknown_tool_is_an_error_result() {
    let registry = ToolRegistry::empty();
    let (results, is_error) = registry.call("ghost", json!({})).await;
    assert!(is_error);
    assert!(results[0].text.contains("ghost"));
}

#[tokio::test]
async fn validation_rejects_missing_required() {
    let h = header(
        "interlocutor:\n  name: Bot\n  prompt: p\n  tools:\n    - sqlite: \":memory:\"",
    );
    let registry = ToolRegistry::build(&h, h.speaker()).await.unwrap();
    let (results, is_error) = registry.call("sqlite", json!({})).await;
    assert!(is_error);
    assert!(results[0].text.contains("query"));
}

#[test]
fn binary_mimetypes_are_detected() {
    assert!(ToolResult::with_mimetype("x", "image/png").is_binary());
    assert!(ToolResult::with_mimetype("x", "application/pdf").is_binary());
    assert!(!ToolResult::with_mimetype("x", "text/html").is_binary());
}

#[test]
fn text_mimetypes_collapse_to_plain() {
    assert_eq!(ToolResult::with_mimetype("x", "text/html").mimetype, "text/plain");
    assert_eq!(
        ToolResult::with_mimetype("x", "image/png").mimetype,
        "image/png"
    );
}
