use anyhow::Context;
use std::path::{Path, PathBuf};
use taskline_core::config::DEFAULT_CONFIG_FILE;
use taskline_core::{Config, Model};

/// Loaded configuration plus where it came from.
pub struct Settings {
    pub config_path: PathBuf,
    pub config: Config,
}

/// Load the config and apply command-line overrides.
///
/// Priority for the config file: `--config` / `TASKLINE_CONFIG`, then
/// `taskline.yaml` in the working directory. A relative `store_path` is taken
/// relative to the config file's directory; `--store` / `TASKLINE_STORE`
/// replaces it outright.
pub fn load(config: Option<&Path>, store: Option<&Path>) -> anyhow::Result<Settings> {
    let config_path = config
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));
    let mut cfg = Config::load(&config_path)
        .with_context(|| format!("failed to load config {}", config_path.display()))?;

    match store {
        Some(path) => cfg.store_path = path.to_path_buf(),
        None if cfg.store_path.is_relative() => {
            cfg.store_path = base_dir(&config_path).join(&cfg.store_path);
        }
        None => {}
    }

    Ok(Settings {
        config_path,
        config: cfg,
    })
}

fn base_dir(config_path: &Path) -> PathBuf {
    match config_path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

impl Settings {
    pub fn open_model(&self) -> anyhow::Result<Model> {
        Model::open(&self.config).with_context(|| {
            format!(
                "failed to open store {}",
                self.config.store_path.display()
            )
        })
    }
}
