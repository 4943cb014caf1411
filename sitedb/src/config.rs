use crate::error::Result;
use crate::loader::ReferencePolicy;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Project settings from `config.yml`. Every key is optional.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct ProjectConfig {
    pub project_name: String,
    /// URL prefix the site is served under.
    pub base_path: String,
    pub references: ReferencePolicy,
    pub context: ContextConfig,
}

impl Default for ProjectConfig {
    fn default() -> Self {
        ProjectConfig {
            project_name: String::new(),
            base_path: "/".to_string(),
            references: ReferencePolicy::default(),
            context: ContextConfig::default(),
        }
    }
}

/// Values shared by every rendered page.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextConfig {
    /// Fixed values, passed through as written.
    #[serde(rename = "static")]
    pub static_values: BTreeMap<String, serde_json::Value>,
    /// Variable name to query expression, evaluated after the build.
    pub dynamic: BTreeMap<String, String>,
}

impl ProjectConfig {
    /// Read `path`; a missing or empty file gives the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            log::debug!("No config at {}, using defaults", path.display());
            return Ok(ProjectConfig::default());
        }
        let text = std::fs::read_to_string(path)?;
        Self::parse(&text)
    }

    pub fn parse(text: &str) -> Result<Self> {
        if text.trim().is_empty() {
            return Ok(ProjectConfig::default());
        }
        Ok(serde_yaml::from_str(text)?)
    }
}
