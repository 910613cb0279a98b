//! SQLite tool — parameterized queries against a local database.
//!
//! The database is opened per call so a long conversation never holds a
//! file lock between turns. Row output is rendered as aligned text with a
//! count trailer, capped by the configured row limit.

use anyhow::{Context, Result};
use rusqlite::{Connection, OpenFlags};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::constants::SQLITE_DEFAULT_LIMIT;
use crate::header::SqliteSpec;

use super::{Tool, ToolResult};

pub struct SqliteTool {
    name: String,
    description: String,
    usage: Option<String>,
    path: String,
    readonly: bool,
    limit: usize,
}

impl SqliteTool {
    pub fn new(spec: SqliteSpec) -> Self {
        Self {
            name: spec.name.unwrap_or_else(|| "sqlite".to_string()),
            description: format!(
                "Run a SQL query against the SQLite database at {}.{}",
                spec.sqlite,
                if spec.readonly {
                    " The database is read-only."
                } else {
                    ""
                }
            ),
            usage: spec.usage,
            path: spec.sqlite,
            readonly: spec.readonly,
            limit: spec.limit.unwrap_or(SQLITE_DEFAULT_LIMIT),
        }
    }

    fn open(&self) -> Result<Connection> {
        let conn = if self.path == ":memory:" {
            Connection::open_in_memory()?
        } else if self.readonly {
            Connection::open_with_flags(
                crate::paths::expand_user_path(&self.path),
                OpenFlags::SQLITE_OPEN_READ_ONLY,
            )?
        } else {
            Connection::open(crate::paths::expand_user_path(&self.path))?
        };
        Ok(conn)
    }
}

#[derive(Deserialize)]
struct SqliteInput {
    query: String,
}

/// Renders one value the way the sqlite3 shell would.
fn render_value(v: rusqlite::types::ValueRef<'_>) -> String {
    use rusqlite::types::ValueRef;
    match v {
        ValueRef::Null => "NULL".to_string(),
        ValueRef::Integer(i) => i.to_string(),
        ValueRef::Real(f) => f.to_string(),
        ValueRef::Text(t) => String::from_utf8_lossy(t).into_owned(),
        ValueRef::Blob(b) => format!("<blob {} bytes>", b.len()),
    }
}

#[async_trait::async_trait]
impl Tool for SqliteTool {
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
            "query": {
                "type": "string",
                "description": "The SQL to execute"
            }
        })
    }

    fn required(&self) -> Vec<String> {
        vec!["query".to_string()]
    }

    async fn call(&self, args: Value) -> Result<Vec<ToolResult>> {
        let input: SqliteInput =
            serde_json::from_value(args).context("The sqlite tool takes a `query` string")?;
        let conn = self
            .open()
            .with_context(|| format!("Failed to open database {}", self.path))?;

        let mut stmt = conn
            .prepare(&input.query)
            .with_context(|| "The query could not be prepared".to_string())?;

        if stmt.column_count() == 0 {
            let affected = stmt.execute([]).context("The statement failed")?;
            return Ok(vec![ToolResult::text(format!("{affected} row(s) affected"))]);
        }

        let columns: Vec<String> = stmt.column_names().iter().map(|c| c.to_string()).collect();
        let mut rows = stmt.query([]).context("The query failed")?;
        let mut lines = vec![columns.join(" | ")];
        let mut count = 0usize;
        let mut truncated = false;
        while let Some(row) = rows.next()? {
            if count >= self.limit {
                truncated = true;
                break;
            }
            let mut cells = Vec::with_capacity(columns.len());
            for i in 0..columns.len() {
                cells.push(render_value(row.get_ref(i)?));
            }
            lines.push(cells.join(" | "));
            count += 1;
        }

        let mut out = lines.join("\n");
        out.push_str(&format!("\n({count} row(s))"));
        if truncated {
            out.push_str(&format!("\n... truncated at {} rows", self.limit));
        }
        Ok(vec![ToolResult::text(out)])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory_tool() -> SqliteTool {
        SqliteTool::new(SqliteSpec {
            sqlite: ":memory:".into(),
            name: None,
            usage: None,
            readonly: false,
            limit: Some(10),
        })
    }

    #[tokio::test]
    async fn select_renders_rows() {
        let tool = memory_tool();
        let results = tool
            .call(serde_json::json!({"query": "select 1 as one, 'x' as s"}))
            .await
            .unwrap();
        let text = &results[0].text;
        assert!(text.contains("one | s"));
        assert!(text.contains("1 | x"));
        assert!(text.contains("(1 row(s))"));
    }

    #[tokio::test]
    async fn bad_sql_is_an_error() {
        let tool = memory_tool();
        assert!(tool
            .call(serde_json::json!({"query": "selec oops"}))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn missing_query_fails_validation() {
        let tool = memory_tool();
        assert!(tool.validate(&serde_json::json!({})).is_err());
    }
}
