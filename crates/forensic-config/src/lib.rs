use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const FORENSIC_DIR_NAME: &str = ".forensic";
pub const CONFIG_FILE_NAME: &str = "config.toml";
pub const DEFAULT_MAX_COMMITS: u32 = 100;
pub const RECORDED_COMMITS_CEILING: u32 = 200;
pub const DEFAULT_MAX_ERROR_LINES: usize = 20;
pub const DEFAULT_ABBREVIATION_LENGTH: usize = 7;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CommitIdStyle {
    Full,
    #[default]
    Abbreviated,
}

impl CommitIdStyle {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::Abbreviated => "abbreviated",
        }
    }
}

impl std::str::FromStr for CommitIdStyle {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "full" => Ok(Self::Full),
            "abbreviated" => Ok(Self::Abbreviated),
            other => Err(format!(
                "invalid commit id format '{other}', expected one of: full, abbreviated"
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ForensicConfig {
    #[serde(default)]
    pub commits: CommitsConfig,
    #[serde(default)]
    pub reference: ReferenceConfig,
    #[serde(default)]
    pub statistics: StatisticsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub display: DisplayConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitsConfig {
    #[serde(default = "default_max_commits")]
    pub max_commits: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scm_key: Option<String>,
}

impl Default for CommitsConfig {
    fn default() -> Self {
        Self {
            max_commits: DEFAULT_MAX_COMMITS,
            scm_key: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_job: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_branch: Option<String>,
    #[serde(default)]
    pub skip_unknown_commits: bool,
    #[serde(default)]
    pub latest_build_if_not_found: bool,
}

impl Default for ReferenceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            target_job: None,
            target_branch: None,
            skip_unknown_commits: false,
            latest_build_if_not_found: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatisticsConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Default for StatisticsConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_max_error_lines")]
    pub max_error_lines: usize,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            max_error_lines: DEFAULT_MAX_ERROR_LINES,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisplayConfig {
    #[serde(default)]
    pub commit_id_format: CommitIdStyle,
    #[serde(default = "default_abbreviation_length")]
    pub abbreviation_length: usize,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            commit_id_format: CommitIdStyle::Abbreviated,
            abbreviation_length: DEFAULT_ABBREVIATION_LENGTH,
        }
    }
}

impl ForensicConfig {
    /// Job whose history is searched for a reference build. An explicit
    /// target job wins; a target branch names a sibling of `current_job`
    /// inside the same folder.
    pub fn target_job_for(&self, current_job: &str) -> Option<String> {
        if let Some(job) = &self.reference.target_job {
            return Some(job.clone());
        }

        let branch = self.reference.target_branch.as_deref()?;
        match current_job.rsplit_once('/') {
            Some((folder, _)) => Some(format!("{folder}/{branch}")),
            None => Some(branch.to_owned()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigWarning {
    pub code: &'static str,
    pub message: String,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("failed to serialize config TOML: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
}

pub fn forensic_dir(workspace_root: impl AsRef<Path>) -> PathBuf {
    workspace_root.as_ref().join(FORENSIC_DIR_NAME)
}

pub fn config_path(workspace_root: impl AsRef<Path>) -> PathBuf {
    forensic_dir(workspace_root).join(CONFIG_FILE_NAME)
}

pub fn load_workspace_config(
    workspace_root: impl AsRef<Path>,
) -> Result<ForensicConfig, ConfigError> {
    let path = config_path(workspace_root);
    if !path.exists() {
        return Ok(ForensicConfig::default());
    }

    let raw = fs::read_to_string(path)?;
    let parsed: ForensicConfig = toml::from_str(&raw)?;
    Ok(normalize_config(parsed))
}

pub fn ensure_workspace_config(
    workspace_root: impl AsRef<Path>,
) -> Result<ForensicConfig, ConfigError> {
    let workspace_root = workspace_root.as_ref();
    fs::create_dir_all(forensic_dir(workspace_root))?;

    let path = config_path(workspace_root);
    if path.exists() {
        return load_workspace_config(workspace_root);
    }

    let config = ForensicConfig::default();
    let content = toml::to_string_pretty(&config)?;
    fs::write(path, content)?;

    Ok(config)
}

pub fn validate_config(config: &ForensicConfig) -> Vec<ConfigWarning> {
    let mut warnings = Vec::new();

    if config.reference.enabled
        && config.reference.target_job.is_none()
        && config.reference.target_branch.is_none()
    {
        warnings.push(ConfigWarning {
            code: "reference_target_missing",
            message: "reference search is enabled but neither target_job nor target_branch is set"
                .to_owned(),
        });
    }

    if config.commits.max_commits > RECORDED_COMMITS_CEILING {
        warnings.push(ConfigWarning {
            code: "max_commits_above_ceiling",
            message: format!(
                "max_commits = {} exceeds the per-build record ceiling of {RECORDED_COMMITS_CEILING}; records are capped at the ceiling",
                config.commits.max_commits
            ),
        });
    }

    if !(4..=40).contains(&config.display.abbreviation_length) {
        warnings.push(ConfigWarning {
            code: "abbreviation_length_out_of_range",
            message: format!(
                "abbreviation_length = {} is outside 4..=40",
                config.display.abbreviation_length
            ),
        });
    }

    warnings
}

fn default_true() -> bool {
    true
}

fn default_max_commits() -> u32 {
    DEFAULT_MAX_COMMITS
}

fn default_max_error_lines() -> usize {
    DEFAULT_MAX_ERROR_LINES
}

fn default_abbreviation_length() -> usize {
    DEFAULT_ABBREVIATION_LENGTH
}

fn normalize_optional(input: Option<String>) -> Option<String> {
    input
        .map(|value| value.trim().to_owned())
        .filter(|value| !value.is_empty())
}

fn normalize_config(mut config: ForensicConfig) -> ForensicConfig {
    config.commits.max_commits = config.commits.max_commits.max(1);
    config.commits.scm_key = normalize_optional(config.commits.scm_key.take());
    config.reference.target_job = normalize_optional(config.reference.target_job.take());
    config.reference.target_branch = normalize_optional(config.reference.target_branch.take());
    config
}
