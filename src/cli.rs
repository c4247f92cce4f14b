use std::{path::PathBuf, thread};

use anyhow::{Context, Result};
use clap::{builder::TypedValueParser, Args, Parser, Subcommand, ValueEnum};
use tracing::info;

use probe_curves::{
    gather_results, pretrain_all, render_curves, Architecture, CifarVariant, CurvePoint, Dataset,
    DatasetSplit, ExperimentConfig, Float, Metric, PretrainConfig, ResultTable,
};

/// Data efficiency curves of latent probes on pretrained autoencoders.
#[derive(Parser, Debug)]
#[command(name = "probe-curves", version)]
pub struct Cli {
    /// Log at debug level (RUST_LOG takes precedence)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Train probes over a sweep of dataset sizes and plot the curves
    Curves(CurvesArgs),
    /// Train one autoencoder per seed and store its weights
    Pretrain(PretrainArgs),
}

#[derive(ValueEnum, Clone, Copy, Debug)]
pub enum MetricArg {
    Loss,
    Accuracy,
}

impl From<MetricArg> for Metric {
    fn from(value: MetricArg) -> Self {
        match value {
            MetricArg::Loss => Metric::Loss,
            MetricArg::Accuracy => Metric::Accuracy,
        }
    }
}

#[derive(ValueEnum, Clone, Copy, Debug)]
pub enum ArchArg {
    Cifar,
    Bottleneck,
}

#[derive(Args, Debug)]
pub struct CurvesArgs {
    #[arg(long, alias = "min_size", default_value_t = 10)]
    pub min_size: usize,

    #[arg(long, alias = "max_size", default_value_t = 10000)]
    pub max_size: usize,

    /// Number of sizes in the sweep
    #[arg(long, default_value_t = 10)]
    pub steps: usize,

    /// Number of seeds, one worker each
    #[arg(long, default_value_t = 5)]
    pub seeds: usize,

    /// Probe updates per dataset size
    #[arg(long, alias = "train_steps", default_value_t = 100_000)]
    pub train_steps: usize,

    #[arg(long, alias = "batch_size", default_value_t = 1024)]
    pub batch_size: usize,

    #[arg(long, alias = "n_classes", default_value_t = 10,
          value_parser = clap::builder::PossibleValuesParser::new(["10", "100"])
              .map(|s| s.parse::<usize>().unwrap_or(10)))]
    pub n_classes: usize,

    #[arg(long, alias = "no_gpu")]
    pub no_gpu: bool,

    #[arg(long, default_value_t = 1)]
    pub ngpus: usize,

    /// Root of the pretrained weights, `params/step_*/rank_*/A.bin` below it
    #[arg(long, alias = "weights_path")]
    pub weights_path: PathBuf,

    #[arg(long, alias = "checkpoint_step", default_value_t = 49_999)]
    pub checkpoint_step: usize,

    /// Only re-render the plot from an existing results file
    #[arg(long, alias = "only_plot")]
    pub only_plot: bool,

    #[arg(long, value_enum, default_value_t = MetricArg::Loss)]
    pub metric: MetricArg,

    #[arg(long, alias = "data_dir", default_value = "data")]
    pub data_dir: PathBuf,

    #[arg(long, alias = "results_dir", default_value = "results")]
    pub results_dir: PathBuf,
}

impl From<CurvesArgs> for ExperimentConfig {
    fn from(args: CurvesArgs) -> Self {
        ExperimentConfig {
            min_size: args.min_size,
            max_size: args.max_size,
            steps: args.steps,
            seeds: args.seeds,
            train_steps: args.train_steps,
            batch_size: args.batch_size,
            n_classes: args.n_classes,
            use_gpu: !args.no_gpu,
            ngpus: args.ngpus,
            weights_path: args.weights_path,
            checkpoint_step: args.checkpoint_step,
            only_plot: args.only_plot,
            metric: args.metric.into(),
            data_dir: args.data_dir,
            results_dir: args.results_dir,
            ..ExperimentConfig::default()
        }
    }
}

#[derive(Args, Debug)]
pub struct PretrainArgs {
    /// Root the weights are written under
    #[arg(long, alias = "weights_path")]
    pub weights_path: PathBuf,

    #[arg(long, default_value_t = 5)]
    pub seeds: usize,

    #[arg(long, alias = "train_steps", default_value_t = 50_000)]
    pub train_steps: usize,

    #[arg(long, alias = "batch_size", default_value_t = 32)]
    pub batch_size: usize,

    #[arg(long, alias = "learning_rate", default_value_t = 1e-3)]
    pub learning_rate: Float,

    #[arg(long, value_enum, default_value_t = ArchArg::Cifar)]
    pub arch: ArchArg,

    /// Bottleneck width, bottleneck architecture only
    #[arg(long, alias = "latent_dim", default_value_t = 128)]
    pub latent_dim: usize,

    #[arg(long, alias = "n_classes", default_value_t = 10)]
    pub n_classes: usize,

    #[arg(long, alias = "data_dir", default_value = "data")]
    pub data_dir: PathBuf,
}

impl From<PretrainArgs> for PretrainConfig {
    fn from(args: PretrainArgs) -> Self {
        let architecture = match args.arch {
            ArchArg::Cifar => Architecture::Cifar,
            ArchArg::Bottleneck => Architecture::Bottleneck {
                latent_dim: args.latent_dim,
            },
        };
        PretrainConfig {
            weights_path: args.weights_path,
            seeds: args.seeds,
            train_steps: args.train_steps,
            batch_size: args.batch_size,
            learning_rate: args.learning_rate,
            architecture,
            n_classes: args.n_classes,
            data_dir: args.data_dir,
        }
    }
}

impl Cli {
    pub fn run(self) -> Result<()> {
        match self.command {
            Command::Curves(args) => run_curves(args.into()),
            Command::Pretrain(args) => run_pretrain(args.into()),
        }
    }
}

fn run_curves(cfg: ExperimentConfig) -> Result<()> {
    cfg.validate()?;
    let cores = thread::available_parallelism().map_or(1, |n| n.get());
    info!(cores, seeds = cfg.seeds, "starting curves");

    let csv_path = cfg.results_csv_path();
    let mut incomplete = None;
    if !cfg.only_plot {
        let dataset = Dataset::load(&cfg.data_dir, cfg.variant()?, DatasetSplit::Eval)
            .with_context(|| format!("loading evaluation data from {}", cfg.data_dir.display()))?;

        let gathered = gather_results(&dataset, &cfg);
        gathered
            .table
            .write_csv(&csv_path)
            .with_context(|| format!("writing {}", csv_path.display()))?;
        cfg.save(&cfg.config_json_path())
            .context("writing the run configuration")?;
        info!(path = %csv_path.display(), rows = gathered.table.len(), "results written");

        if gathered.table.is_empty() {
            gathered.check()?;
        }
        incomplete = gathered.check().err();
    }

    replot(&cfg)?;
    if let Some(err) = incomplete {
        let partial = format!("{} holds partial results", csv_path.display());
        return Err(anyhow::Error::new(err).context(partial));
    }
    Ok(())
}

/// Renders the selected metric from the results file of `cfg`.
fn replot(cfg: &ExperimentConfig) -> Result<()> {
    let points = load_curve(cfg)?;
    render_curves(&points, cfg.metric, &cfg.plot_path()).context("rendering the curves")
}

fn load_curve(cfg: &ExperimentConfig) -> Result<Vec<CurvePoint>> {
    let csv_path = cfg.results_csv_path();
    let table = ResultTable::read_csv(&csv_path)
        .with_context(|| format!("reading {}", csv_path.display()))?;
    Ok(table.curve(cfg.metric))
}

fn run_pretrain(cfg: PretrainConfig) -> Result<()> {
    cfg.validate()?;
    let variant = CifarVariant::from_classes(cfg.n_classes)?;
    let dataset = Dataset::load(&cfg.data_dir, variant, DatasetSplit::Train)
        .with_context(|| format!("loading training data from {}", cfg.data_dir.display()))?;

    let paths = pretrain_all(&dataset, &cfg)?;
    info!(models = paths.len(), "pretraining finished");
    Ok(())
}
