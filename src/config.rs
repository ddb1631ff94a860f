use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::scoring::ScoringConfig;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub query: QueryConfig,
    #[serde(default)]
    pub maintenance: MaintenanceConfig,
    #[serde(default)]
    pub tmx: TmxConfig,
    #[serde(default)]
    pub export: ExportConfig,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct QueryConfig {
    /// Points lost by a candidate outside the preferred domain.
    #[serde(default = "default_p_domain")]
    pub p_domain: f64,
    /// Points lost by a dirty candidate when dirty penalization is requested.
    #[serde(default = "default_p_dirty")]
    pub p_dirty: f64,
    /// Fraction of the raw score lost on a domain mismatch.
    #[serde(default = "default_mismatch_penalty")]
    pub mismatch_penalty: f64,
    #[serde(default = "default_min_match")]
    pub min_match: f64,
    #[serde(default = "default_candidate_limit")]
    pub candidate_limit: usize,
    #[serde(default = "default_concordance_limit")]
    pub concordance_limit: usize,
}

fn default_p_domain() -> f64 {
    5.0
}
fn default_p_dirty() -> f64 {
    5.0
}
fn default_mismatch_penalty() -> f64 {
    0.2
}
fn default_min_match() -> f64 {
    75.0
}
fn default_candidate_limit() -> usize {
    10
}
fn default_concordance_limit() -> usize {
    10
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            p_domain: default_p_domain(),
            p_dirty: default_p_dirty(),
            mismatch_penalty: default_mismatch_penalty(),
            min_match: default_min_match(),
            candidate_limit: default_candidate_limit(),
            concordance_limit: default_concordance_limit(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct MaintenanceConfig {
    /// A unit whose `dirty_score` reaches this value counts as dirty.
    #[serde(default = "default_dirty_threshold")]
    pub dirty_threshold: u32,
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
}

fn default_dirty_threshold() -> u32 {
    1
}
fn default_chunk_size() -> usize {
    50
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            dirty_threshold: default_dirty_threshold(),
            chunk_size: default_chunk_size(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct TmxConfig {
    #[serde(default = "default_creation_tool")]
    pub creation_tool: String,
    #[serde(default = "default_creation_tool_version")]
    pub creation_tool_version: String,
    /// Archive member name used when the caller does not pick one.
    #[serde(default = "default_member")]
    pub default_member: String,
}

fn default_creation_tool() -> String {
    env!("CARGO_PKG_NAME").to_string()
}
fn default_creation_tool_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}
fn default_member() -> String {
    "pangeatm.tmx".to_string()
}

impl Default for TmxConfig {
    fn default() -> Self {
        Self {
            creation_tool: default_creation_tool(),
            creation_tool_version: default_creation_tool_version(),
            default_member: default_member(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct ExportConfig {
    #[serde(default = "default_export_path")]
    pub path: PathBuf,
}

fn default_export_path() -> PathBuf {
    std::env::temp_dir().join("tm-export")
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            path: default_export_path(),
        }
    }
}

impl Config {
    /// Scoring parameters assembled from `[query]` and `[maintenance]`.
    pub fn scoring(&self) -> ScoringConfig {
        ScoringConfig {
            domain_penalty: self.query.p_domain,
            dirty_penalty: self.query.p_dirty,
            dirty_threshold: self.maintenance.dirty_threshold,
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    validate(&config)?;
    Ok(config)
}

/// Like [`load_config`], but a file that does not exist yields the defaults.
pub fn load_config_or_default(path: &Path) -> Result<Config> {
    if path.exists() {
        load_config(path)
    } else {
        tracing::debug!(path = %path.display(), "config file not found, using defaults");
        Ok(Config::default())
    }
}

fn validate(config: &Config) -> Result<()> {
    let q = &config.query;
    if !(0.0..=100.0).contains(&q.min_match) {
        anyhow::bail!("query.min_match must be in [0, 100]");
    }
    if !(0.0..=1.0).contains(&q.mismatch_penalty) {
        anyhow::bail!("query.mismatch_penalty must be in [0.0, 1.0]");
    }
    if q.p_domain < 0.0 || q.p_dirty < 0.0 {
        anyhow::bail!("query.p_domain and query.p_dirty must be >= 0");
    }
    if q.candidate_limit == 0 {
        anyhow::bail!("query.candidate_limit must be >= 1");
    }
    if q.concordance_limit == 0 {
        anyhow::bail!("query.concordance_limit must be >= 1");
    }
    if config.maintenance.chunk_size == 0 {
        anyhow::bail!("maintenance.chunk_size must be > 0");
    }
    if config.tmx.default_member.trim().is_empty() {
        anyhow::bail!("tmx.default_member must not be empty");
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
    fn test_empty_file_gives_defaults() {
        let file = write_config("");
        let config = load_config(file.path()).unwrap();
        assert_eq!(config.query, QueryConfig::default());
        assert_eq!(config.query.p_domain, 5.0);
        assert_eq!(config.query.min_match, 75.0);
        assert_eq!(config.maintenance.dirty_threshold, 1);
        assert_eq!(config.maintenance.chunk_size, 50);
        assert_eq!(config.tmx.default_member, "pangeatm.tmx");
    }

    #[test]
    fn test_partial_sections() {
        let file = write_config(
            r#"
[query]
min_match = 60
p_domain = 10

[export]
path = "/srv/exports"
"#,
        );
        let config = load_config(file.path()).unwrap();
        assert_eq!(config.query.min_match, 60.0);
        assert_eq!(config.query.p_dirty, 5.0);
        assert_eq!(config.export.path, PathBuf::from("/srv/exports"));
        assert_eq!(config.scoring().domain_penalty, 10.0);
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let file = write_config("[query]\nmin_match = 150\n");
        let err = load_config(file.path()).unwrap_err();
        assert!(err.to_string().contains("min_match"));

        let file = write_config("[maintenance]\nchunk_size = 0\n");
        assert!(load_config(file.path()).is_err());
    }

    #[test]
    fn test_missing_file_defaults() {
        let dir = tempfile::TempDir::new().unwrap();
        let config = load_config_or_default(&dir.path().join("nope.toml")).unwrap();
        assert_eq!(config.query.candidate_limit, 10);
        assert!(load_config(&dir.path().join("nope.toml")).is_err());
    }
}
