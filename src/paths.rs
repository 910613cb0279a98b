//! XDG path resolution for lectic configuration and data directories.
//!
//! Each directory honors a `LECTIC_*` override before falling back to the
//! platform default (`~/.config/lectic/`, `~/.local/share/lectic/`, ...).

use std::path::PathBuf;

use anyhow::Result;

/// Resolves a directory from an env override or a platform base directory.
fn resolve(env_var: &str, base: Option<PathBuf>, what: &str) -> Result<PathBuf> {
    if let Ok(dir) = std::env::var(env_var) {
        if !dir.is_empty() {
            return Ok(PathBuf::from(dir));
        }
    }
    let dir = base
        .ok_or_else(|| anyhow::anyhow!("Could not determine {what} directory"))?
        .join(crate::constants::APP_NAME);
    Ok(dir)
}

/// Returns the configuration directory (`$LECTIC_CONFIG` or `~/.config/lectic/`).
pub fn config_dir() -> Result<PathBuf> {
    resolve("LECTIC_CONFIG", dirs::config_dir(), "config")
}

/// Returns the data directory (`$LECTIC_DATA` or `~/.local/share/lectic/`).
pub fn data_dir() -> Result<PathBuf> {
    resolve("LECTIC_DATA", dirs::data_dir(), "data")
}

/// Returns the cache directory (`$LECTIC_CACHE` or `~/.cache/lectic/`).
#[allow(dead_code)]
pub fn cache_dir() -> Result<PathBuf> {
    resolve("LECTIC_CACHE", dirs::cache_dir(), "cache")
}

/// Returns the state directory (`$LECTIC_STATE` or `~/.local/state/lectic/`).
#[allow(dead_code)]
pub fn state_dir() -> Result<PathBuf> {
    resolve("LECTIC_STATE", dirs::state_dir(), "state")
}

/// Returns the temp directory (`$LECTIC_TEMP` or the system temp dir).
#[allow(dead_code)]
pub fn temp_dir() -> Result<PathBuf> {
    if let Ok(dir) = std::env::var("LECTIC_TEMP") {
        if !dir.is_empty() {
            return Ok(PathBuf::from(dir));
        }
    }
    Ok(std::env::temp_dir().join(crate::constants::APP_NAME))
}

/// Returns the full path to the system configuration file.
pub fn system_config_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(crate::constants::CONFIG_FILENAME))
}

/// Expands a leading `~` and `$VAR` references in a path string.
///
/// Unset variables expand to the empty string, matching shell behavior
/// under `set +u`.
pub fn expand_user_path(s: &str) -> PathBuf {
    let s = if let Some(rest) = s.strip_prefix("~/") {
        match dirs::home_dir() {
            Some(home) => format!("{}/{}", home.display(), rest),
            None => s.to_string(),
        }
    } else {
        s.to_string()
    };
    PathBuf::from(expand_env_vars(&s))
}

/// Replaces `$VAR` and `${VAR}` with the environment variable's value.
pub fn expand_env_vars(s: &str) -> String {
    let re = regex::Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}|\$([A-Za-z_][A-Za-z0-9_]*)")
        .expect("static regex");
    re.replace_all(s, |caps: &regex::Captures<'_>| {
        let var = caps
            .get(1)
            .or_else(|| caps.get(2))
            .map(|m| m.as_str())
            .unwrap_or_default();
        std::env::var(var).unwrap_or_default()
    })
    .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_vars_expand() {
        std::env::set_var("LECTIC_TEST_DIR", "/tmp/ltx");
        assert_eq!(expand_env_vars("$LECTIC_TEST_DIR/notes"), "/tmp/ltx/notes");
        assert_eq!(
            expand_env_vars("${LECTIC_TEST_DIR}/notes"),
            "/tmp/ltx/notes"
        );
    }

    #[test]
    fn unset_vars_expand_to_empty() {
        assert_eq!(expand_env_vars("$LECTIC_SURELY_UNSET_VAR/x"), "/x");
    }

    #[test]
    fn override_wins_over_platform_dir() {
        std::env::set_var("LECTIC_DATA", "/tmp/lectic-data");
        assert_eq!(data_dir().unwrap(), PathBuf::from("/tmp/lectic-data"));
        std::env::remove_var("LECTIC_DATA");
    }
}
