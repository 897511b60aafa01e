use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use crate::loss::Criterion;

pub const DEFAULT_CONFIG_NAME: &str = "product-train.toml";
pub const CONFIG_ENV: &str = "PRODUCT_TRAIN_CONFIG";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Resolved training configuration. File values fill in over these defaults,
/// and command-line flags override both.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainConfig {
    pub train_manifest: PathBuf,
    pub val_manifest: PathBuf,
    pub image_root: PathBuf,
    pub checkpoint_dir: PathBuf,
    pub epochs: usize,
    pub learning_rate: f64,
    pub min_learning_rate: f64,
    /// Optimizer steps per cosine cycle.
    pub restart_period: usize,
    pub num_workers: usize,
    /// Square input size; `None` uses the architecture default.
    pub image_size: Option<u32>,
    pub seed: Option<u64>,
    pub loss: Criterion,
    /// Apply train-split augmentation.
    pub augment: bool,
    /// Block on the device after every optimizer step.
    pub synchronous: bool,
}

impl Default for TrainConfig {
    fn default() -> Self {
        let dataset_root = PathBuf::from("./dataset/train");
        Self {
            train_manifest: dataset_root.join("fold0_train.csv"),
            val_manifest: dataset_root.join("fold0_test.csv"),
            image_root: dataset_root.join("train"),
            checkpoint_dir: PathBuf::from("."),
            epochs: 100,
            learning_rate: 1e-4,
            min_learning_rate: 0.0,
            restart_period: 2000,
            num_workers: 8,
            image_size: None,
            seed: None,
            loss: Criterion::Dmi,
            augment: true,
            synchronous: false,
        }
    }
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct TrainConfigFile {
    data: Option<DataSection>,
    train: Option<TrainSection>,
    output: Option<OutputSection>,
    runtime: Option<RuntimeSection>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct DataSection {
    root: Option<String>,
    train_manifest: Option<String>,
    val_manifest: Option<String>,
    image_root: Option<String>,
    image_size: Option<u32>,
    num_workers: Option<usize>,
    augment: Option<bool>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct TrainSection {
    epochs: Option<usize>,
    learning_rate: Option<f64>,
    min_learning_rate: Option<f64>,
    restart_period: Option<usize>,
    loss: Option<Criterion>,
    seed: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct OutputSection {
    checkpoint_dir: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct RuntimeSection {
    synchronous: Option<bool>,
}

impl TrainConfig {
    /// Resolve the config file: `explicit`, then `$PRODUCT_TRAIN_CONFIG`, then
    /// `product-train.toml` in the working directory. Only the last may be absent.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = explicit {
            return Self::from_path(path);
        }
        if let Ok(path) = std::env::var(CONFIG_ENV) {
            return Self::from_path(&expand_path(&path));
        }
        let default_path = Path::new(DEFAULT_CONFIG_NAME);
        if default_path.exists() {
            return Self::from_path(default_path);
        }
        Ok(Self::default())
    }

    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let cfg = Self::parse(&raw, path)?;
        log::info!("loaded training config from {}", path.display());
        Ok(cfg)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        Self::parse(raw, Path::new("<inline>"))
    }

    fn parse(raw: &str, path: &Path) -> Result<Self, ConfigError> {
        let file: TrainConfigFile = toml::from_str(raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        let cfg = Self::from_file(file);
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: TrainConfigFile) -> Self {
        let defaults = Self::default();
        let data = file.data.unwrap_or_default();
        let train = file.train.unwrap_or_default();
        let output = file.output.unwrap_or_default();
        let runtime = file.runtime.unwrap_or_default();

        let root = data.root.map(|v| expand_path(&v));
        let under_root = |name: &str, fallback: PathBuf| match &root {
            Some(root) => root.join(name),
            None => fallback,
        };

        TrainConfig {
            train_manifest: data
                .train_manifest
                .map(|v| expand_path(&v))
                .unwrap_or_else(|| under_root("fold0_train.csv", defaults.train_manifest)),
            val_manifest: data
                .val_manifest
                .map(|v| expand_path(&v))
                .unwrap_or_else(|| under_root("fold0_test.csv", defaults.val_manifest)),
            image_root: data
                .image_root
                .map(|v| expand_path(&v))
                .unwrap_or_else(|| under_root("train", defaults.image_root)),
            checkpoint_dir: output
                .checkpoint_dir
                .map(|v| expand_path(&v))
                .unwrap_or(defaults.checkpoint_dir),
            epochs: train.epochs.unwrap_or(defaults.epochs),
            learning_rate: train.learning_rate.unwrap_or(defaults.learning_rate),
            min_learning_rate: train.min_learning_rate.unwrap_or(defaults.min_learning_rate),
            restart_period: train.restart_period.unwrap_or(defaults.restart_period),
            num_workers: data.num_workers.unwrap_or(defaults.num_workers),
            image_size: data.image_size.or(defaults.image_size),
            seed: train.seed.or(defaults.seed),
            loss: train.loss.unwrap_or(defaults.loss),
            augment: data.augment.unwrap_or(defaults.augment),
            synchronous: runtime.synchronous.unwrap_or(defaults.synchronous),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.learning_rate.is_finite() && self.learning_rate > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "learning_rate must be positive, got {}",
                self.learning_rate
            )));
        }
        if !(self.min_learning_rate >= 0.0 && self.min_learning_rate <= self.learning_rate) {
            return Err(ConfigError::Invalid(format!(
                "min_learning_rate must be in [0, {}], got {}",
                self.learning_rate, self.min_learning_rate
            )));
        }
        if self.image_size == Some(0) {
            return Err(ConfigError::Invalid("image_size must be non-zero".to_string()));
        }
        if self.restart_period == 0 {
            log::warn!("restart_period is 0; the learning rate will stay at {}", self.learning_rate);
        }
        Ok(())
    }
}

fn expand_path(raw: &str) -> PathBuf {
    let mut out = raw.to_string();
    if let Some(stripped) = out.strip_prefix('~') {
        if let Ok(home) = std::env::var("HOME") {
            out = format!("{home}{stripped}");
        }
    }
    PathBuf::from(expand_env(&out))
}

/// Substitute `${VAR}` references; unknown variables are left as written.
fn expand_env(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;
    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find('}') {
            Some(end) => {
                let key = &after[..end];
                match std::env::var(key) {
                    Ok(val) => out.push_str(&val),
                    Err(_) => out.push_str(&rest[start..start + end + 3]),
                }
                rest = &after[end + 1..];
            }
            None => {
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}
