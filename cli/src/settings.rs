//! Startup configuration: config file loading and executable resolution.
//!
//! The deployer path is resolved once, before any operation runs, from (in
//! order) the `--deployer` flag, the `SC64_DEPLOYER` environment variable,
//! the config file, a copy next to this binary, and `~/Downloads`.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use tracing::{debug, info};

use sc64deck_core::config::DeployerConfig;

pub const DEPLOYER_ENV: &str = "SC64_DEPLOYER";

#[cfg(windows)]
const DEPLOYER_FILE_NAME: &str = "sc64deployer.exe";
#[cfg(not(windows))]
const DEPLOYER_FILE_NAME: &str = "sc64deployer";

/// Where a deployer path may come from, highest priority first.
#[derive(Debug, Default)]
pub struct ExecutableSources {
    pub flag: Option<PathBuf>,
    pub env: Option<PathBuf>,
    pub config: Option<PathBuf>,
    /// Fallback locations, used only when the file exists.
    pub search: Vec<PathBuf>,
}

impl ExecutableSources {
    /// Gather sources from the process environment.
    pub fn from_environment(flag: Option<PathBuf>, config: &DeployerConfig) -> Self {
        let env = std::env::var_os(DEPLOYER_ENV)
            .filter(|v| !v.is_empty())
            .map(PathBuf::from);
        let configured = Some(config.executable.clone()).filter(|p| !p.as_os_str().is_empty());

        let mut search = Vec::new();
        if let Some(dir) = std::env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(Path::to_path_buf))
        {
            search.push(dir.join(DEPLOYER_FILE_NAME));
        }
        if let Some(home) = dirs::home_dir() {
            search.push(home.join("Downloads").join(DEPLOYER_FILE_NAME));
        }

        Self {
            flag,
            env,
            config: configured,
            search,
        }
    }

    /// First explicit source, else the first search location that exists.
    pub fn resolve(&self) -> Option<PathBuf> {
        self.flag
            .clone()
            .or_else(|| self.env.clone())
            .or_else(|| self.config.clone())
            .or_else(|| self.search.iter().find(|p| p.is_file()).cloned())
    }
}

/// Default config file location.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("sc64deck").join("config.json"))
}

/// Load the configuration and resolve the executable.
///
/// An explicit `--config` must exist; the default location is optional.
pub fn load(
    config_path: Option<&Path>,
    deployer_flag: Option<PathBuf>,
) -> anyhow::Result<DeployerConfig> {
    let mut config = match config_path {
        Some(path) => DeployerConfig::from_json_file(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => match default_config_path().filter(|p| p.is_file()) {
            Some(path) => {
                debug!(path = %path.display(), "Loading default config");
                DeployerConfig::from_json_file(&path)
                    .with_context(|| format!("failed to load config {}", path.display()))?
            }
            None => DeployerConfig::default(),
        },
    };

    let sources = ExecutableSources::from_environment(deployer_flag, &config);
    let Some(executable) = sources.resolve() else {
        bail!(
            "sc64deployer not found; pass --deployer, set {DEPLOYER_ENV}, or place it next to sc64deck or in ~/Downloads"
        );
    };
    config.executable = std::path::absolute(&executable).unwrap_or(executable);
    config.validate().context("invalid configuration")?;

    info!(executable = %config.executable.display(), "Using sc64deployer");
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn touch(path: &Path) {
        std::fs::write(path, "#!/bin/sh\n").unwrap();
    }

    #[test]
    fn explicit_sources_win_in_order() {
        let mut sources = ExecutableSources {
            flag: Some("/flag/sc64deployer".into()),
            env: Some("/env/sc64deployer".into()),
            config: Some("/config/sc64deployer".into()),
            search: Vec::new(),
        };
        assert_eq!(sources.resolve(), Some("/flag/sc64deployer".into()));
        sources.flag = None;
        assert_eq!(sources.resolve(), Some("/env/sc64deployer".into()));
        sources.env = None;
        assert_eq!(sources.resolve(), Some("/config/sc64deployer".into()));
        sources.config = None;
        assert_eq!(sources.resolve(), None);
    }

    #[test]
    fn search_locations_must_exist() {
        let dir = tempfile::tempdir().unwrap();
        let beside = dir.path().join("beside").join(DEPLOYER_FILE_NAME);
        let downloads = dir.path().join(DEPLOYER_FILE_NAME);
        touch(&downloads);

        let sources = ExecutableSources {
            search: vec![beside.clone(), downloads.clone()],
            ..Default::default()
        };
        assert_eq!(sources.resolve(), Some(downloads));

        std::fs::create_dir(beside.parent().unwrap()).unwrap();
        touch(&beside);
        assert_eq!(sources.resolve(), Some(beside));
    }

    #[test]
    fn load_reads_config_and_applies_flag() {
        let dir = tempfile::tempdir().unwrap();
        let exe = dir.path().join(DEPLOYER_FILE_NAME);
        touch(&exe);
        let config_path = dir.path().join("config.json");
        std::fs::write(
            &config_path,
            r#"{"executable": "/nowhere/sc64deployer", "cancelGraceMs": 750}"#,
        )
        .unwrap();

        let config = load(Some(&config_path), Some(exe.clone())).unwrap();
        assert_eq!(config.executable, exe);
        assert_eq!(config.cancel_grace_ms, 750);
    }

    #[test]
    fn load_rejects_missing_executable() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("config.json");
        std::fs::write(&config_path, "{}").unwrap();
        let err = load(Some(&config_path), Some(dir.path().join("missing"))).unwrap_err();
        assert!(format!("{err:#}").contains("invalid configuration"));
    }

    #[test]
    fn load_requires_explicit_config_to_exist() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load(Some(&dir.path().join("absent.json")), None).is_err());
    }
}
