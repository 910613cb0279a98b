//! Kit reference resolution.
//!
//! A kit is a named bundle of tool specs. Tool arrays may contain
//! `{kit: NAME}` entries, and kits may reference other kits, so expansion
//! is a DFS with a visiting set to reject cycles.

use crate::error::LecticError;

use super::types::{Header, ToolSpec};

type Result<T> = std::result::Result<T, LecticError>;

/// Replaces `{kit: NAME}` entries with the named kit's tools, recursively.
pub fn expand_kits(header: &Header, tools: &[ToolSpec]) -> Result<Vec<ToolSpec>> {
    let mut out = Vec::with_capacity(tools.len());
    let mut visiting = Vec::new();
    expand_into(header, tools, &mut visiting, &mut out)?;
    Ok(out)
}

fn expand_into(
    header: &Header,
    tools: &[ToolSpec],
    visiting: &mut Vec<String>,
    out: &mut Vec<ToolSpec>,
) -> Result<()> {
    for spec in tools {
        match spec {
            ToolSpec::Kit(kit_ref) => {
                let kit = header
                    .kits
                    .iter()
                    .find(|k| k.name == kit_ref.kit)
                    .ok_or_else(|| {
                        LecticError::ToolInit(format!(
                            "No kit named '{}' is defined under `kits`",
                            kit_ref.kit
                        ))
                    })?;
                if visiting.iter().any(|n| n == &kit.name) {
                    return Err(LecticError::ToolInit(format!(
                        "Kit references form a cycle: {} -> {}",
                        visiting.join(" -> "),
                        kit.name
                    )));
                }
                visiting.push(kit.name.clone());
                expand_into(header, &kit.tools, visiting, out)?;
                visiting.pop();
            }
            other => out.push(other.clone()),
        }
    }
    Ok(())
}

/// Validation-time check: every kit reference resolves and no cycle exists.
pub fn check_kits(header: &Header) -> Result<()> {
    for kit in &header.kits {
        let mut visiting = vec![kit.name.clone()];
        let mut sink = Vec::new();
        expand_into(header, &kit.tools, &mut visiting, &mut sink)?;
    }
    for i in &header.interlocutors {
        expand_kits(header, &i.tools)?;
    }
    Ok(())
}
