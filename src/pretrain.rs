use std::path::PathBuf;

use tracing::{debug, info};

use crate::{
    autoencoder::AutoEncoder,
    cifar::Dataset,
    config::PretrainConfig,
    curve::run_workers,
    error::{Error, Result},
    trainer::{Method, Trainer},
    utils::{randi, reseed},
    Float,
};

const LOG_EVERY: usize = 500;

/// Trains the autoencoder of one rank and writes it where the curve workers
/// look for it. Returns the weight file.
pub fn pretrain_rank(dataset: &Dataset, cfg: &PretrainConfig, rank: usize) -> Result<PathBuf> {
    if dataset.is_empty() {
        return Err(Error::Dataset("cannot pretrain on an empty dataset".to_string()));
    }
    reseed(rank as u64);
    let mut ae = AutoEncoder::new("A", cfg.architecture, dataset.image_shape());
    info!(rank, architecture = ?cfg.architecture, latent = ?ae.latent_shape(), "pretraining");

    let mut trainer = Trainer::builder(&mut ae)
        .learning_rate(cfg.learning_rate)
        .batch_size(cfg.batch_size)
        .method(Method::adam())
        .build();

    let batch_size = cfg.batch_size.max(1);
    for step in 0..cfg.train_steps {
        let mut batch_loss = 0.0;
        for _ in 0..batch_size {
            let target = dataset.image(randi(0, dataset.len()));
            let mut x = target.clone();
            batch_loss += trainer.train(&mut x, &target);
        }
        if step % LOG_EVERY == 0 || step + 1 == cfg.train_steps {
            debug!(rank, step, loss = batch_loss / batch_size as Float, "reconstruction");
        }
    }

    let path = AutoEncoder::weights_path(&cfg.weights_path, cfg.checkpoint_step(), rank);
    ae.save(&path)?;
    info!(rank, path = %path.display(), "weights saved");
    Ok(path)
}

/// One autoencoder per seed, trained in parallel.
pub fn pretrain_all(dataset: &Dataset, cfg: &PretrainConfig) -> Result<Vec<PathBuf>> {
    let mut paths =
        run_workers(cfg.seeds, |rank| pretrain_rank(dataset, cfg, rank)).into_result()?;
    paths.sort();
    Ok(paths)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        autoencoder::Architecture, cifar::fixtures::striped, config::ExperimentConfig,
        curve::gather_results,
    };

    #[test]
    fn pretrained_weights_feed_the_curves() {
        let dir = tempfile::tempdir().unwrap();
        let dataset = striped(20, 8, 10);
        let pretrain = PretrainConfig {
            weights_path: dir.path().to_path_buf(),
            seeds: 2,
            train_steps: 3,
            batch_size: 2,
            architecture: Architecture::Bottleneck { latent_dim: 4 },
            ..PretrainConfig::default()
        };

        let paths = pretrain_all(&dataset, &pretrain).unwrap();
        assert_eq!(paths.len(), 2);
        assert!(paths[1].ends_with("params/step_2/rank_1/A.bin"));

        let curves = ExperimentConfig {
            min_size: 5,
            max_size: 10,
            steps: 2,
            seeds: 2,
            train_steps: 2,
            batch_size: 2,
            use_gpu: false,
            checkpoint_step: pretrain.checkpoint_step(),
            weights_path: dir.path().to_path_buf(),
            ..ExperimentConfig::default()
        };
        let table = gather_results(&dataset, &curves).into_table().unwrap();
        assert_eq!(table.len(), 2 * 2 * 2);
    }
}
