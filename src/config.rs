//! Configuration loading.
//!
//! Settings come from an optional TOML file and are then overridden by CLI
//! flags. Every section has defaults, so a missing file yields a usable
//! [`Config`].

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::output::OutputFormat;

/// File name looked up in the working directory when `--config` is not given.
pub const DEFAULT_CONFIG_FILE: &str = "mhtml-search.toml";

/// File name of the index database inside the temp directory.
pub const DEFAULT_DB_FILE: &str = "mhtml_search.db";

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub db: DbConfig,
    #[serde(default)]
    pub scan: ScanConfig,
    #[serde(default)]
    pub output: OutputConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_db_path() -> PathBuf {
    std::env::temp_dir().join(DEFAULT_DB_FILE)
}

#[derive(Debug, Deserialize, Clone)]
pub struct ScanConfig {
    /// Worker count override. `None` means use the storage probe's hint.
    #[serde(default)]
    pub threads: Option<usize>,
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,
    #[serde(default = "default_native_listing")]
    pub native_listing: bool,
    #[serde(default = "default_listing_timeout")]
    pub listing_timeout_secs: u64,
    #[serde(default = "default_probe_timeout")]
    pub probe_timeout_secs: u64,
    #[serde(default)]
    pub follow_symlinks: bool,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            threads: None,
            extensions: default_extensions(),
            native_listing: default_native_listing(),
            listing_timeout_secs: default_listing_timeout(),
            probe_timeout_secs: default_probe_timeout(),
            follow_symlinks: false,
        }
    }
}

impl ScanConfig {
    pub fn listing_timeout(&self) -> Duration {
        Duration::from_secs(self.listing_timeout_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }
}

fn default_extensions() -> Vec<String> {
    vec!["mhtml".to_string(), "mht".to_string()]
}
fn default_native_listing() -> bool {
    true
}
fn default_listing_timeout() -> u64 {
    30
}
fn default_probe_timeout() -> u64 {
    5
}

#[derive(Debug, Deserialize, Clone)]
pub struct OutputConfig {
    #[serde(default)]
    pub format: OutputFormat,
    #[serde(default = "default_limit")]
    pub limit: usize,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            format: OutputFormat::default(),
            limit: default_limit(),
        }
    }
}

fn default_limit() -> usize {
    100
}

/// Load and validate a config file.
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

/// Load `path` if given (it must exist), else the default file if present,
/// else built-in defaults.
pub fn resolve_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(p) => load_config(p),
        None => {
            let default = Path::new(DEFAULT_CONFIG_FILE);
            if default.exists() {
                load_config(default)
            } else {
                Ok(Config::default())
            }
        }
    }
}

/// Check invariants that serde cannot express.
pub fn validate(config: &Config) -> Result<()> {
    if config.scan.threads == Some(0) {
        anyhow::bail!("scan.threads must be >= 1");
    }

    if config.scan.extensions.is_empty() {
        anyhow::bail!("scan.extensions must list at least one extension");
    }

    if config
        .scan
        .extensions
        .iter()
        .any(|e| e.trim_start_matches('.').is_empty())
    {
        anyhow::bail!("scan.extensions must not contain empty entries");
    }

    if config.scan.listing_timeout_secs == 0 || config.scan.probe_timeout_secs == 0 {
        anyhow::bail!("scan timeouts must be >= 1 second");
    }

    if config.output.limit == 0 {
        anyhow::bail!("output.limit must be >= 1");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn defaults_without_file() {
        let config = Config::default();
        assert!(config.db.path.ends_with(DEFAULT_DB_FILE));
        assert_eq!(config.scan.extensions, vec!["mhtml", "mht"]);
        assert_eq!(config.scan.threads, None);
        assert_eq!(config.output.limit, 100);
        assert_eq!(config.output.format, OutputFormat::Table);
    }

    #[test]
    fn partial_file_fills_defaults() {
        let file = write_config(
            r#"
[db]
path = "/var/tmp/archives.db"

[scan]
threads = 12
native_listing = false
"#,
        );
        let config = load_config(file.path()).unwrap();
        assert_eq!(config.db.path, PathBuf::from("/var/tmp/archives.db"));
        assert_eq!(config.scan.threads, Some(12));
        assert!(!config.scan.native_listing);
        assert_eq!(config.scan.probe_timeout(), Duration::from_secs(5));
        assert_eq!(config.output.limit, 100);
    }

    #[test]
    fn output_format_parses() {
        let file = write_config("[output]\nformat = \"csv\"\nlimit = 5\n");
        let config = load_config(file.path()).unwrap();
        assert_eq!(config.output.format, OutputFormat::Csv);
        assert_eq!(config.output.limit, 5);
    }

    #[test]
    fn zero_threads_rejected() {
        let file = write_config("[scan]\nthreads = 0\n");
        let err = load_config(file.path()).unwrap_err();
        assert!(err.to_string().contains("scan.threads"));
    }

    #[test]
    fn empty_extensions_rejected() {
        let file = write_config("[scan]\nextensions = []\n");
        assert!(load_config(file.path()).is_err());
    }

    #[test]
    fn explicit_missing_file_is_an_error() {
        assert!(resolve_config(Some(Path::new("/definitely/not/here.toml"))).is_err());
    }
}
