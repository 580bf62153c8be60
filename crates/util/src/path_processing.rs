//! Path helpers for user-supplied locations and the reqterm config directory.

use std::{env, path::PathBuf};

use dirs_next::{config_dir, home_dir};

/// Directory name used under the platform configuration directory.
pub const CONFIG_DIR_NAME: &str = "reqterm";

/// Expands a leading `~` (Unix or Windows separator) to the home directory.
pub fn expand_tilde(path: &str) -> PathBuf {
    let trimmed = path.trim();
    let home = || home_dir().unwrap_or_else(|| PathBuf::from("~"));
    if trimmed == "~" {
        return home();
    }
    if let Some(rest) = trimmed.strip_prefix("~/").or_else(|| trimmed.strip_prefix("~\\")) {
        return home().join(rest);
    }
    PathBuf::from(trimmed)
}

/// Resolves a file path from an override environment variable, falling back
/// to `<config dir>/reqterm/<file_name>`.
pub fn config_file_path(override_env: &str, file_name: &str) -> PathBuf {
    if let Ok(path) = env::var(override_env)
        && !path.trim().is_empty()
    {
        return expand_tilde(&path);
    }

    config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(CONFIG_DIR_NAME)
        .join(file_name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn leaves_absolute_paths_untouched() {
        assert_eq!(expand_tilde(" /tmp/history.json "), PathBuf::from("/tmp/history.json"));
    }

    #[test]
    fn expands_home_prefix() {
        let expanded = expand_tilde("~/reqterm/history.json");
        assert!(expanded.ends_with("reqterm/history.json"));
    }

    #[test]
    fn override_env_wins_over_config_dir() {
        temp_env::with_var("REQTERM_TEST_PATH", Some("/tmp/custom.json"), || {
            assert_eq!(config_file_path("REQTERM_TEST_PATH", "x.json"), PathBuf::from("/tmp/custom.json"));
        });
        temp_env::with_var("REQTERM_TEST_PATH", Some("   "), || {
            assert!(config_file_path("REQTERM_TEST_PATH", "x.json").ends_with("reqterm/x.json"));
        });
    }
}
