//! Configuration management.
//!
//! Loads configuration from ${DENDRITE_HOME}/config.toml with sensible
//! defaults. Saving the default model goes through `toml_edit` so user
//! comments and formatting survive the edit.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::core::mcp::McpServerConfig;

/// Default config template with comments, embedded at compile time.
const DEFAULT_CONFIG_TEMPLATE: &str = include_str!("default_config.toml");

/// Project guide file looked up in the working directory when the config
/// names no other file.
pub const DEFAULT_GUIDE_FILE: &str = "dendrite.md";

pub mod paths {
    //! Path resolution for dendrite configuration and data directories.
    //!
    //! DENDRITE_HOME resolution order:
    //! 1. DENDRITE_HOME environment variable (if set)
    //! 2. ~/.config/dendrite (default)

    use std::path::PathBuf;

    /// Returns the dendrite home directory.
    pub fn dendrite_home() -> PathBuf {
        if let Ok(home) = std::env::var("DENDRITE_HOME") {
            return PathBuf::from(home);
        }

        dirs::home_dir()
            .map(|h| h.join(".config").join("dendrite"))
            .expect("Could not determine home directory")
    }

    /// Returns the path to the config.toml file.
    pub fn config_path() -> PathBuf {
        dendrite_home().join("config.toml")
    }

    /// Returns the path to the session log file.
    pub fn log_path() -> PathBuf {
        dendrite_home().join("dendrite.log")
    }
}

/// Main configuration structure.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Model selected at session start
    pub default_model: String,

    /// Engine backend name
    pub engine: String,

    /// Optional project guide file, resolved against the working directory
    pub guide_file: Option<String>,

    /// Tool-server launch records, keyed by server name
    pub mcp_servers: BTreeMap<String, McpServerConfig>,
}

impl Config {
    const DEFAULT_MODEL: &str = "openai:gpt-4.1";
    const DEFAULT_ENGINE: &str = "echo";

    /// Loads configuration from a specific path.
    /// Returns defaults if the file doesn't exist.
    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents = fs::read_to_string(path)
                .with_context(|| format!("Failed to read config from {}", path.display()))?;
            toml::from_str(&contents)
                .with_context(|| format!("Failed to parse config from {}", path.display()))
        } else {
            Ok(Config::default())
        }
    }

    /// Tool-server configs in stable name order, as the lifecycle expects.
    pub fn server_list(&self) -> Vec<(String, McpServerConfig)> {
        self.mcp_servers
            .iter()
            .map(|(name, config)| (name.clone(), config.clone()))
            .collect()
    }

    /// Saves only the default model to a specific config file path.
    ///
    /// Creates the file from the default template if it doesn't exist.
    /// Preserves existing fields and comments using toml_edit.
    pub fn save_default_model_to(path: &Path, model: &str) -> Result<()> {
        use toml_edit::{DocumentMut, value};

        let contents = if path.exists() {
            fs::read_to_string(path)
                .with_context(|| format!("Failed to read config from {}", path.display()))?
        } else {
            DEFAULT_CONFIG_TEMPLATE.to_string()
        };

        let mut doc: DocumentMut = contents
            .parse()
            .with_context(|| format!("Failed to parse config from {}", path.display()))?;

        doc["default_model"] = value(model);

        Self::write_config(path, &doc.to_string())
    }

    /// Reads the project guide, if one exists.
    ///
    /// A configured `guide_file` must exist; the default file is optional.
    pub fn load_guide(&self, working_dir: &Path) -> Result<Option<String>> {
        let (path, required) = match &self.guide_file {
            Some(file) => (working_dir.join(file), true),
            None => (working_dir.join(DEFAULT_GUIDE_FILE), false),
        };
        if !path.exists() {
            if required {
                anyhow::bail!("Guide file not found: {}", path.display());
            }
            return Ok(None);
        }
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read guide file {}", path.display()))?;
        let trimmed = content.trim();
        Ok((!trimmed.is_empty()).then(|| trimmed.to_string()))
    }

    /// Writes config content to a file, creating parent directories as
    /// needed. Uses atomic write (temp file + rename) to prevent corruption.
    fn write_config(path: &Path, content: &str) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory {}", parent.display()))?;
        }

        let tmp_path = path.with_extension("toml.tmp");
        fs::write(&tmp_path, content)
            .with_context(|| format!("Failed to write config to {}", tmp_path.display()))?;
        fs::rename(&tmp_path, path).with_context(|| {
            format!(
                "Failed to rename {} to {}",
                tmp_path.display(),
                path.display()
            )
        })?;

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_model: Self::DEFAULT_MODEL.to_string(),
            engine: Self::DEFAULT_ENGINE.to_string(),
            guide_file: None,
            mcp_servers: BTreeMap::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;

    #[test]
    fn test_load_missing_file_returns_defaults() {
        let dir = tempdir().unwrap();
        let config = Config::load_from(&dir.path().join("config.toml")).unwrap();
        assert_eq!(config.default_model, "openai:gpt-4.1");
        assert_eq!(config.engine, "echo");
        assert!(config.mcp_servers.is_empty());
    }

    #[test]
    fn test_load_parses_servers() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(
            &path,
            r#"
default_model = "openai:o3"

[mcp_servers.files]
command = "mcp-files"
args = ["--root", "."]

[mcp_servers.files.env]
LOG = "off"
"#,
        )
        .unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.default_model, "openai:o3");
        let (name, server) = &config.server_list()[0];
        assert_eq!(name, "files");
        assert_eq!(server.command, "mcp-files");
        assert_eq!(server.args, vec!["--root", "."]);
        assert_eq!(server.env.get("LOG").unwrap(), "off");
    }

    #[test]
    fn test_save_default_model_preserves_comments() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(
            &path,
            "# my settings\ndefault_model = \"openai:gpt-4.1\"\nengine = \"echo\"\n",
        )
        .unwrap();

        Config::save_default_model_to(&path, "openai:o3").unwrap();

        let contents = fs::read_to_string(&path).unwrap();
        assert!(contents.contains("# my settings"));
        assert!(contents.contains("default_model = \"openai:o3\""));
        assert!(contents.contains("engine = \"echo\""));
    }

    #[test]
    fn test_save_default_model_creates_file_from_template() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        Config::save_default_model_to(&path, "openai:o3").unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.default_model, "openai:o3");
    }

    #[test]
    fn test_load_guide_default_file_optional() {
        let dir = tempdir().unwrap();
        let config = Config::default();
        assert!(config.load_guide(dir.path()).unwrap().is_none());

        fs::write(dir.path().join(DEFAULT_GUIDE_FILE), "Be brief.\n").unwrap();
        assert_eq!(
            config.load_guide(dir.path()).unwrap().as_deref(),
            Some("Be brief.")
        );
    }

    #[test]
    fn test_load_guide_configured_file_required() {
        let dir = tempdir().unwrap();
        let config = Config {
            guide_file: Some("missing.md".to_string()),
            ..Config::default()
        };
        assert!(config.load_guide(dir.path()).is_err());
    }
}
