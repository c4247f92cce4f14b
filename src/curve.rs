use std::{sync::mpsc, thread};

use tracing::{error, info, warn};

use crate::{
    autoencoder::AutoEncoder,
    cifar::Dataset,
    config::ExperimentConfig,
    device::available_accelerators,
    error::{Error, Result},
    probe::run_probe,
    results::{Metric, ResultRow, ResultTable},
    utils::reseed,
};

/// One seed's sweep: loads the pretrained encoder of `rank` and trains a
/// probe for every size in turn.
pub fn compute_curve(
    dataset: &Dataset,
    sizes: &[usize],
    cfg: &ExperimentConfig,
    rank: usize,
) -> Result<ResultTable> {
    reseed(rank as u64);
    let device = cfg.device_policy().select(rank, available_accelerators());
    info!(rank, %device, "worker started");

    let path = AutoEncoder::weights_path(&cfg.weights_path, cfg.checkpoint_step, rank);
    let mut ae = AutoEncoder::load(&path)?;
    if ae.input_shape() != dataset.image_shape() {
        return Err(Error::Dataset(format!(
            "encoder at {} expects {:?} images, dataset has {:?}",
            path.display(),
            ae.input_shape(),
            dataset.image_shape()
        )));
    }

    let reference_size = sizes.iter().copied().max().unwrap_or(0);
    let probe_cfg = cfg.probe_config();

    let mut table = ResultTable::new();
    for &size in sizes {
        let outcome = run_probe(&mut ae, dataset, size, reference_size, &probe_cfg)?;
        info!(
            rank,
            size,
            loss = outcome.loss,
            accuracy = outcome.accuracy,
            "probe finished"
        );

        table.push(ResultRow {
            rank,
            size,
            metric: Metric::Loss,
            value: outcome.loss as f64,
        });
        table.push(ResultRow {
            rank,
            size,
            metric: Metric::Accuracy,
            value: outcome.accuracy as f64,
        });
    }
    Ok(table)
}

/// What a set of workers left behind: the parts sent back by the ranks that
/// finished, in completion order, and the ranks that errored or panicked.
#[derive(Debug)]
pub struct WorkerRun<T> {
    pub parts: Vec<T>,
    pub failed: Vec<usize>,
}

impl<T> WorkerRun<T> {
    /// The parts, or `WorkersFailed` if any rank is missing.
    pub fn into_result(self) -> Result<Vec<T>> {
        if !self.failed.is_empty() {
            return Err(Error::WorkersFailed { ranks: self.failed });
        }
        Ok(self.parts)
    }
}

/// Runs `worker` for every rank in `0..seeds`, each on its own thread, and
/// returns once every worker has exited.
pub fn run_workers<T, F>(seeds: usize, worker: F) -> WorkerRun<T>
where
    T: Send,
    F: Fn(usize) -> Result<T> + Sync,
{
    let (tx, rx) = mpsc::channel();

    let failed: Vec<usize> = thread::scope(|s| {
        let handles: Vec<_> = (0..seeds)
            .map(|rank| {
                let tx = tx.clone();
                let worker = &worker;
                let handle = s.spawn(move || -> Result<()> {
                    let part = worker(rank)?;
                    // the receiver outlives every worker
                    tx.send(part).ok();
                    Ok(())
                });
                (rank, handle)
            })
            .collect();

        handles
            .into_iter()
            .filter_map(|(rank, handle)| match handle.join() {
                Ok(Ok(())) => None,
                Ok(Err(err)) => {
                    error!(rank, error = %err, "worker failed");
                    Some(rank)
                }
                Err(_) => {
                    error!(rank, "worker panicked");
                    Some(rank)
                }
            })
            .collect()
    });
    drop(tx);

    WorkerRun {
        parts: rx.iter().collect(),
        failed,
    }
}

/// The concatenated rows of every rank that finished, and the ranks that did
/// not.
#[derive(Debug)]
pub struct Gathered {
    pub table: ResultTable,
    pub failed: Vec<usize>,
}

impl Gathered {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }

    /// `WorkersFailed` naming the missing ranks, if there are any.
    pub fn check(&self) -> Result<()> {
        if self.is_complete() {
            return Ok(());
        }
        Err(Error::WorkersFailed {
            ranks: self.failed.clone(),
        })
    }

    /// The whole table, or `WorkersFailed` if any rank is missing.
    pub fn into_table(self) -> Result<ResultTable> {
        self.check()?;
        Ok(self.table)
    }
}

/// Concatenates the tables of one worker per rank.
pub fn gather_with<F>(seeds: usize, worker: F) -> Gathered
where
    F: Fn(usize) -> Result<ResultTable> + Sync,
{
    let run = run_workers(seeds, worker);
    let mut table = ResultTable::new();
    for part in run.parts {
        table.extend(part);
    }
    Gathered {
        table,
        failed: run.failed,
    }
}

/// Every seed's curve over the configured sweep, one worker per seed.
pub fn gather_results(dataset: &Dataset, cfg: &ExperimentConfig) -> Gathered {
    let sizes = cfg.sweep_sizes();
    if cfg.use_gpu && available_accelerators() == 0 {
        warn!("gpu requested but no accelerator backend is available, running on cpu");
    }
    info!(seeds = cfg.seeds, ?sizes, "gathering curves");

    let gathered = gather_with(cfg.seeds, |rank| compute_curve(dataset, &sizes, cfg, rank));
    if gathered.is_complete() {
        info!(rows = gathered.table.len(), "all workers finished");
    } else {
        warn!(
            rows = gathered.table.len(),
            failed = ?gathered.failed,
            "some workers failed, their rows are missing"
        );
    }
    gathered
}

#[cfg(test)]
mod tests {
    use std::{collections::BTreeSet, time::Duration};

    use super::*;
    use crate::{autoencoder::Architecture, cifar::fixtures::striped, vol::Shape};

    fn stub_table(rank: usize, sizes: &[usize]) -> ResultTable {
        sizes
            .iter()
            .flat_map(|&size| {
                [Metric::Loss, Metric::Accuracy].map(|metric| ResultRow {
                    rank,
                    size,
                    metric,
                    value: rank as f64,
                })
            })
            .collect()
    }

    #[test]
    fn aggregate_has_a_row_per_seed_size_and_metric() {
        let cfg = ExperimentConfig::default();
        let sizes = cfg.sweep_sizes();

        // later ranks finish first
        let table = gather_with(cfg.seeds, |rank| {
            thread::sleep(Duration::from_millis(((cfg.seeds - rank) * 10) as u64));
            Ok(stub_table(rank, &sizes))
        })
        .into_table()
        .unwrap();

        assert_eq!(table.len(), 100);
        let ranks: BTreeSet<usize> = table.rows().iter().map(|row| row.rank).collect();
        assert_eq!(ranks, (0..5).collect());
    }

    #[test]
    fn failed_workers_are_reported() {
        let gathered = gather_with(4, |rank| match rank {
            2 => Err(Error::Dataset("broken".to_string())),
            3 => panic!("worker blew up"),
            _ => Ok(stub_table(rank, &[10])),
        });
        assert_eq!(gathered.failed, vec![2, 3]);

        match gathered.into_table() {
            Err(Error::WorkersFailed { ranks }) => assert_eq!(ranks, vec![2, 3]),
            other => panic!("expected a worker failure, got {other:?}"),
        }
    }

    #[test]
    fn surviving_ranks_keep_their_rows() {
        let sizes = [10, 100, 1000];
        let gathered = gather_with(3, |rank| {
            if rank == 1 {
                return Err(Error::Dataset("broken".to_string()));
            }
            Ok(stub_table(rank, &sizes))
        });

        assert!(!gathered.is_complete());
        assert_eq!(gathered.failed, vec![1]);
        assert_eq!(gathered.table.len(), 2 * sizes.len() * 2);
        let ranks: BTreeSet<usize> = gathered.table.rows().iter().map(|row| row.rank).collect();
        assert_eq!(ranks, BTreeSet::from([0, 2]));
        assert!(matches!(
            gathered.check(),
            Err(Error::WorkersFailed { ranks }) if ranks == vec![1]
        ));
    }

    #[test]
    fn worker_run_keeps_parts_of_finished_ranks() {
        let run = run_workers(3, |rank| match rank {
            0 => panic!("worker blew up"),
            _ => Ok(rank * 10),
        });
        let mut parts = run.parts.clone();
        parts.sort();
        assert_eq!(parts, vec![10, 20]);
        assert_eq!(run.failed, vec![0]);
        assert!(run.into_result().is_err());
    }

    fn pretrained(root: &std::path::Path, ranks: usize, cfg: &ExperimentConfig) {
        for rank in 0..ranks {
            reseed(100 + rank as u64);
            let ae = AutoEncoder::new(
                "A",
                Architecture::Bottleneck { latent_dim: 4 },
                Shape::new(8, 8, 1),
            );
            ae.save(&AutoEncoder::weights_path(root, cfg.checkpoint_step, rank))
                .unwrap();
        }
    }

    fn tiny_config(root: &std::path::Path, seeds: usize) -> ExperimentConfig {
        ExperimentConfig {
            min_size: 5,
            max_size: 20,
            steps: 3,
            seeds,
            train_steps: 3,
            batch_size: 4,
            use_gpu: false,
            weights_path: root.to_path_buf(),
            ..ExperimentConfig::default()
        }
    }

    #[test]
    fn end_to_end_on_synthetic_images() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = tiny_config(dir.path(), 2);
        pretrained(dir.path(), 2, &cfg);
        let dataset = striped(30, 8, 10);

        let table = gather_results(&dataset, &cfg).into_table().unwrap();
        assert_eq!(table.len(), 2 * 3 * 2);
        for row in table.rows() {
            assert!(row.value >= 0.0);
            if row.metric == Metric::Accuracy {
                assert!(row.value <= 1.0);
            }
        }
    }

    #[test]
    fn same_rank_repeats_its_curve() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = tiny_config(dir.path(), 1);
        pretrained(dir.path(), 1, &cfg);
        let dataset = striped(30, 8, 10);
        let sizes = cfg.sweep_sizes();

        let first = compute_curve(&dataset, &sizes, &cfg, 0).unwrap();
        let second = compute_curve(&dataset, &sizes, &cfg, 0).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn missing_weights_fail_their_rank() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = tiny_config(dir.path(), 3);
        pretrained(dir.path(), 2, &cfg);
        let dataset = striped(30, 8, 10);

        let gathered = gather_results(&dataset, &cfg);
        assert_eq!(gathered.failed, vec![2]);
        assert_eq!(gathered.table.len(), 2 * 3 * 2);
        assert!(gathered.table.rows().iter().all(|row| row.rank < 2));
    }

    #[test]
    fn image_shape_must_match_encoder() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = tiny_config(dir.path(), 1);
        pretrained(dir.path(), 1, &cfg);
        let dataset = striped(30, 4, 10);

        let err = compute_curve(&dataset, &cfg.sweep_sizes(), &cfg, 0).unwrap_err();
        assert!(matches!(err, Error::Dataset(_)));
    }
}
