//! External subcommand resolution.
//!
//! `lectic NAME ...` resolves an executable `lectic-NAME` by searching, in
//! order: the directories in `$LECTIC_RUNTIME`, the config directory, the
//! data directory, and `$PATH`. The first level with exactly one match
//! wins; two matches at the same level is an error rather than a guess.

use std::path::PathBuf;

use crate::error::LecticError;

fn is_executable(path: &PathBuf) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.is_file()
        && std::fs::metadata(path)
            .map(|m| m.permissions().mode() & 0o111 != 0)
            .unwrap_or(false)
}

/// The search levels, highest precedence first.
fn search_levels() -> Vec<Vec<PathBuf>> {
    let mut levels = Vec::new();
    if let Ok(runtime) = std::env::var(crate::constants::ENV_RUNTIME) {
        let dirs: Vec<PathBuf> = std::env::split_paths(&runtime).collect();
        if !dirs.is_empty() {
            levels.push(dirs);
        }
    }
    if let Ok(config) = crate::paths::config_dir() {
        levels.push(vec![config]);
    }
    if let Ok(data) = crate::paths::data_dir() {
        levels.push(vec![data]);
    }
    if let Ok(path) = std::env::var("PATH") {
        levels.push(std::env::split_paths(&path).collect());
    }
    levels
}

/// Finds the unique `lectic-<name>` executable.
pub fn resolve(name: &str) -> Result<PathBuf, LecticError> {
    let binary = format!("{}-{}", crate::constants::APP_NAME, name);
    for level in search_levels() {
        let matches: Vec<PathBuf> = level
            .iter()
            .map(|dir| dir.join(&binary))
            .filter(is_executable)
            .collect();
        match matches.len() {
            0 => continue,
            1 => return Ok(matches.into_iter().next().expect("checked length")),
            _ => {
                return Err(LecticError::Subcommand(format!(
                    "'{binary}' is ambiguous: found {}",
                    matches
                        .iter()
                        .map(|p| p.display().to_string())
                        .collect::<Vec<_>>()
                        .join(" and ")
                )))
            }
        }
    }
    Err(LecticError::Subcommand(format!(
        "No '{binary}' executable found in $LECTIC_RUNTIME, the config \
         directory, the data directory, or $PATH"
    )))
}

/// Replaces this process with the resolved subcommand.
pub fn run(args: &[String]) -> anyhow::Result<()> {
    use std::os::unix::process::CommandExt;
    let path = resolve(&args[0])?;
    let err = std::process::Command::new(path).args(&args[1..]).exec();
    Err(anyhow::anyhow!("Failed to exec subcommand: {err}"))
}
