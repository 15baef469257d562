use crate::fingerprint::LinkMode;
use anyhow::{Context, Result};
use directories::BaseDirs;
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
    thread,
};

/// Settings for one deployment run. Passed to the driver explicitly.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeployConfig {
    /// Soft links instead of hard links.
    #[serde(default)]
    pub symlink: bool,
    /// Virtual paths under `root/` go to the game directory.
    #[serde(default)]
    pub redirect_root_to_game_dir: bool,
    /// Remove links recorded last cycle whose files left the overlay.
    #[serde(default)]
    pub prune_stale: bool,
    #[serde(default)]
    pub workers: Option<usize>,
}

impl DeployConfig {
    pub fn link_mode(&self) -> LinkMode {
        LinkMode::from_symlink_flag(self.symlink)
    }

    pub fn worker_count(&self) -> usize {
        self.workers
            .filter(|count| *count > 0)
            .unwrap_or_else(default_worker_count)
    }
}

/// One core is left for the coordinating thread.
pub fn default_worker_count() -> usize {
    thread::available_parallelism()
        .map(|count| count.get())
        .unwrap_or(1)
        .saturating_sub(1)
        .max(1)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub deploy: DeployConfig,
    #[serde(default)]
    pub instance_dir: Option<PathBuf>,
    #[serde(default)]
    pub state_dir: Option<PathBuf>,
    #[serde(default = "default_data_dir_name")]
    pub data_dir_name: String,
    /// Deploying writes into the game directory; this is the user's go-ahead.
    #[serde(default)]
    pub accepted_risk: bool,
    #[serde(skip)]
    base_dir: PathBuf,
}

impl AppConfig {
    pub fn load_or_create() -> Result<Self> {
        Self::load_or_create_in(&base_data_dir()?)
    }

    pub fn load_or_create_in(base_dir: &Path) -> Result<Self> {
        fs::create_dir_all(base_dir).context("create app data dir")?;
        let path = base_dir.join("config.json");
        if path.exists() {
            let raw = fs::read_to_string(&path).context("read app config")?;
            let mut config: AppConfig = serde_json::from_str(&raw).context("parse app config")?;
            config.base_dir = base_dir.to_path_buf();
            return Ok(config);
        }

        let config = AppConfig {
            deploy: DeployConfig::default(),
            instance_dir: None,
            state_dir: None,
            data_dir_name: default_data_dir_name(),
            accepted_risk: false,
            base_dir: base_dir.to_path_buf(),
        };
        config.save()?;
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        fs::create_dir_all(&self.base_dir).context("create app data dir")?;
        let path = self.base_dir.join("config.json");
        let raw = serde_json::to_string_pretty(self).context("serialize app config")?;
        fs::write(path, raw).context("write app config")?;
        Ok(())
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn state_dir(&self) -> PathBuf {
        self.state_dir
            .clone()
            .unwrap_or_else(|| self.base_dir.join("state"))
    }

    pub fn log_dir(&self) -> PathBuf {
        self.base_dir.join("logs")
    }
}

fn default_data_dir_name() -> String {
    "Data".to_string()
}

pub fn base_data_dir() -> Result<PathBuf> {
    let base = BaseDirs::new().context("resolve home dir")?;
    Ok(base.data_local_dir().join("linkdeploy"))
}
