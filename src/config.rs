use std::{
    fs,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};

use crate::{
    autoencoder::Architecture,
    cifar::CifarVariant,
    device::DevicePolicy,
    error::{Error, Result},
    probe::ProbeConfig,
    results::Metric,
    Float,
};

pub const RESULTS_CSV: &str = "cifar_curves.csv";
pub const CONFIG_JSON: &str = "cifar_curves.json";
pub const PLOT_PNG: &str = "reprieve_curves.png";

/// Everything one `curves` run needs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentConfig {
    pub min_size: usize,
    pub max_size: usize,
    pub steps: usize,
    pub seeds: usize,
    pub train_steps: usize,
    pub batch_size: usize,
    pub learning_rate: Float,
    pub n_classes: usize,
    pub use_gpu: bool,
    pub ngpus: usize,
    pub weights_path: PathBuf,
    pub checkpoint_step: usize,
    pub only_plot: bool,
    pub metric: Metric,
    pub data_dir: PathBuf,
    pub results_dir: PathBuf,
}

impl Default for ExperimentConfig {
    fn default() -> Self {
        Self {
            min_size: 10,
            max_size: 10000,
            steps: 10,
            seeds: 5,
            train_steps: 100_000,
            batch_size: 1024,
            learning_rate: 1e-3,
            n_classes: 10,
            use_gpu: true,
            ngpus: 1,
            weights_path: PathBuf::new(),
            checkpoint_step: 49_999,
            only_plot: false,
            metric: Metric::Loss,
            data_dir: PathBuf::from("data"),
            results_dir: PathBuf::from("results"),
        }
    }
}

impl ExperimentConfig {
    pub fn validate(&self) -> Result<()> {
        if self.min_size < 2 {
            return Err(Error::Config(format!(
                "min_size must be at least 2, got {}",
                self.min_size
            )));
        }
        if self.min_size > self.max_size {
            return Err(Error::Config(format!(
                "min_size {} exceeds max_size {}",
                self.min_size, self.max_size
            )));
        }
        at_least_one("steps", self.steps)?;
        at_least_one("seeds", self.seeds)?;
        at_least_one("train_steps", self.train_steps)?;
        at_least_one("batch_size", self.batch_size)?;
        at_least_one("ngpus", self.ngpus)?;
        CifarVariant::from_classes(self.n_classes)?;
        Ok(())
    }

    pub fn variant(&self) -> Result<CifarVariant> {
        CifarVariant::from_classes(self.n_classes)
    }

    pub fn sweep_sizes(&self) -> Vec<usize> {
        geometric_sweep(self.min_size, self.max_size, self.steps)
    }

    pub fn probe_config(&self) -> ProbeConfig {
        ProbeConfig {
            train_steps: self.train_steps,
            batch_size: self.batch_size,
            learning_rate: self.learning_rate,
            classes: self.n_classes,
            ..ProbeConfig::default()
        }
    }

    pub fn device_policy(&self) -> DevicePolicy {
        DevicePolicy {
            use_gpu: self.use_gpu,
            ngpus: self.ngpus,
        }
    }

    pub fn results_csv_path(&self) -> PathBuf {
        self.results_dir.join(RESULTS_CSV)
    }

    pub fn config_json_path(&self) -> PathBuf {
        self.results_dir.join(CONFIG_JSON)
    }

    pub fn plot_path(&self) -> PathBuf {
        self.results_dir.join(PLOT_PNG)
    }

    /// Writes the configuration as pretty JSON.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }
}

/// Options of a `pretrain` run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PretrainConfig {
    pub weights_path: PathBuf,
    pub seeds: usize,
    pub train_steps: usize,
    pub batch_size: usize,
    pub learning_rate: Float,
    pub architecture: Architecture,
    pub n_classes: usize,
    pub data_dir: PathBuf,
}

impl Default for PretrainConfig {
    fn default() -> Self {
        Self {
            weights_path: PathBuf::new(),
            seeds: 5,
            train_steps: 50_000,
            batch_size: 32,
            learning_rate: 1e-3,
            architecture: Architecture::Cifar,
            n_classes: 10,
            data_dir: PathBuf::from("data"),
        }
    }
}

impl PretrainConfig {
    pub fn validate(&self) -> Result<()> {
        at_least_one("seeds", self.seeds)?;
        at_least_one("train_steps", self.train_steps)?;
        at_least_one("batch_size", self.batch_size)?;
        if let Architecture::Bottleneck { latent_dim } = self.architecture {
            at_least_one("latent_dim", latent_dim)?;
        }
        CifarVariant::from_classes(self.n_classes)?;
        Ok(())
    }

    /// Checkpoint step the weights are written under, the last step trained.
    pub fn checkpoint_step(&self) -> usize {
        self.train_steps.saturating_sub(1)
    }
}

fn at_least_one(name: &str, value: usize) -> Result<()> {
    if value == 0 {
        return Err(Error::Config(format!("{name} must be at least 1")));
    }
    Ok(())
}

/// Relative slack added before truncating, so sizes that are exact powers
/// survive float error (`10^2` may come out as `99.99999999999997`).
const SWEEP_SLACK: f64 = 1e-9;

/// `steps` sizes spaced evenly in base-10 log space from `min` to `max`,
/// truncated to integers.
pub fn geometric_sweep(min: usize, max: usize, steps: usize) -> Vec<usize> {
    if steps == 0 {
        return Vec::new();
    }
    if steps == 1 {
        return vec![min];
    }
    let (lo, hi) = ((min as f64).log10(), (max as f64).log10());
    (0..steps)
        .map(|i| {
            let t = i as f64 / (steps - 1) as f64;
            let size = 10f64.powf(lo + t * (hi - lo));
            (size * (1.0 + SWEEP_SLACK)).floor() as usize
        })
        .collect()
}
