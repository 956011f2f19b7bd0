use crate::access::AccessRestriction;
use crate::error::Error;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub const ENV_GARDEN_HOME: &str = "GCTL_HOME";
pub const ENV_CONFIG_NAME: &str = "GCTL_CONFIG_NAME";
pub const ENV_LINK_KUBECONFIG: &str = "GCTL_LINK_KUBECONFIG";

const GARDEN_HOME_FOLDER: &str = ".garden";
const DEFAULT_CONFIG_NAME: &str = "gardenctl-v2";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default)]
    pub gardens: Vec<Garden>,
    /// Point a stable `kubeconfig.yaml` symlink at the targeted cluster.
    #[serde(default)]
    pub link_kubeconfig: bool,
    #[serde(skip)]
    pub source: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Garden {
    pub identity: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
    pub kubeconfig: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub patterns: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub access_restrictions: Vec<AccessRestriction>,
}

impl Garden {
    pub fn kubeconfig_path(&self) -> PathBuf {
        expand_home(&self.kubeconfig)
    }

    fn answers_to(&self, name: &str) -> bool {
        self.identity == name || self.alias.as_deref() == Some(name)
    }
}

impl Config {
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let lookup = |name: &str| std::env::var(name).ok();
        let Some(path) = discover_config_path(explicit, &lookup) else {
            debug!("no gardenctl configuration file found");
            return Ok(Self::default().with_env_overrides(&lookup));
        };

        Ok(Self::from_path(&path)?.with_env_overrides(&lookup))
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let mut config: Self = serde_yaml::from_str(&raw)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        config.source = Some(path.to_path_buf());
        Ok(config)
    }

    fn with_env_overrides<F>(mut self, lookup: &F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup(ENV_LINK_KUBECONFIG) {
            match value.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" => self.link_kubeconfig = true,
                "0" | "false" | "no" => self.link_kubeconfig = false,
                other => warn!(value = other, "ignoring invalid {ENV_LINK_KUBECONFIG} value"),
            }
        }
        self
    }

    pub fn garden(&self, name: &str) -> crate::error::Result<&Garden> {
        self.gardens
            .iter()
            .find(|garden| garden.answers_to(name))
            .ok_or_else(|| Error::not_found("garden", name))
    }

    pub fn garden_names(&self) -> Vec<String> {
        self.gardens
            .iter()
            .map(|garden| garden.identity.clone())
            .collect()
    }

    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).context("failed to render configuration")
    }
}

fn discover_config_path<F>(explicit: Option<&Path>, lookup: &F) -> Option<PathBuf>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }

    let name = lookup(ENV_CONFIG_NAME)
        .filter(|value| !value.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_CONFIG_NAME.to_string());

    let mut candidates = Vec::new();
    if let Some(home) = lookup(ENV_GARDEN_HOME).filter(|value| !value.trim().is_empty()) {
        candidates.push(expand_home(&home).join(format!("{name}.yaml")));
    }
    if let Some(home) = lookup("HOME") {
        candidates.push(
            PathBuf::from(home)
                .join(GARDEN_HOME_FOLDER)
                .join(format!("{name}.yaml")),
        );
    }

    candidates.into_iter().find(|candidate| candidate.exists())
}

fn home_dir() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("."))
}

fn expand_home(path: &str) -> PathBuf {
    if path == "~" {
        return home_dir();
    }
    match path.strip_prefix("~/") {
        Some(rest) => home_dir().join(rest),
        None => PathBuf::from(path),
    }
}
