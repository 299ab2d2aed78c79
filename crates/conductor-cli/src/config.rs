use conductor_core::{ConductorError, ConductorResult};
use conductor_providers::RoutingConfiguration;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Contents of `conductor.toml`.
#[derive(Debug, Clone, Deserialize)]
pub struct ConductorConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default = "default_skills_dir")]
    pub skills_dir: PathBuf,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub log_format: LogFormat,
    /// Overrides the host name used in checkpoint fingerprints.
    #[serde(default)]
    pub machine_id: Option<String>,
    #[serde(default)]
    pub routing: RoutingConfiguration,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}
fn default_skills_dir() -> PathBuf {
    PathBuf::from("./skills")
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ConductorConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            skills_dir: default_skills_dir(),
            log_level: default_log_level(),
            log_format: LogFormat::default(),
            machine_id: None,
            routing: RoutingConfiguration::default(),
        }
    }
}

impl ConductorConfig {
    /// Parse and validate a TOML document. `source` only appears in errors.
    pub fn parse(raw: &str, source: &Path) -> ConductorResult<Self> {
        let config: ConductorConfig = toml::from_str(raw).map_err(|e| {
            ConductorError::Config(format!(
                "Failed to parse config file {}: {}",
                source.display(),
                e
            ))
        })?;
        config.routing.validate()?;
        Ok(config)
    }

    /// Load the config file, resolving relative directories against the
    /// file's own directory.
    ///
    /// Returns `Ok(None)` when the file does not exist so callers can fall
    /// back to defaults.
    pub async fn load(path: &Path) -> ConductorResult<Option<Self>> {
        let raw = match tokio::fs::read_to_string(path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(ConductorError::Config(format!(
                    "Failed to read config file {}: {}",
                    path.display(),
                    e
                )))
            }
        };
        let base = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        Ok(Some(Self::parse(&raw, path)?.resolve_paths(base)))
    }

    fn resolve_paths(mut self, base: &Path) -> Self {
        if self.data_dir.is_relative() {
            self.data_dir = base.join(&self.data_dir);
        }
        if self.skills_dir.is_relative() {
            self.skills_dir = base.join(&self.skills_dir);
        }
        self
    }

    pub fn checkpoint_dir(&self) -> PathBuf {
        self.data_dir.join("checkpoints")
    }
}
