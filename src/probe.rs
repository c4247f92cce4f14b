use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    autoencoder::AutoEncoder,
    batch::{blow_up, blow_up_factor, sample_with_replacement, split, TRAIN_FRACTION},
    cifar::Dataset,
    error::{Error, Result},
    net::{Activation, EndLayer, Layer, Net},
    trainer::{Method, Trainer},
    utils::randi,
    vol::{Shape, Vol},
    Float,
};

// training loss is logged every this many steps
const LOG_EVERY: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProbeConfig {
    pub train_steps: usize,
    pub batch_size: usize,
    pub hidden: usize,
    pub classes: usize,
    pub learning_rate: Float,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            train_steps: 100_000,
            batch_size: 1024,
            hidden: 256,
            classes: 10,
            learning_rate: 1e-3,
        }
    }
}

/// Held-out performance of one trained probe.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProbeOutcome {
    pub loss: Float,
    pub accuracy: Float,
}

/// Encoded samples with their labels.
pub struct Encoded {
    pub latents: Vec<Vol>,
    pub labels: Vec<usize>,
}

/// Classifier over latent vectors of `latent` shape.
pub fn probe_net(latent: Shape, cfg: &ProbeConfig) -> Net {
    Net::new(
        &[
            Layer::Input {
                width: latent.sx,
                height: latent.sy,
                depth: latent.depth,
            },
            Layer::Dense {
                neurons: cfg.hidden,
                activation: Activation::Elu,
            },
            Layer::Dense {
                neurons: cfg.hidden,
                activation: Activation::Elu,
            },
            Layer::Dense {
                neurons: cfg.classes,
                activation: Activation::Elu,
            },
        ],
        EndLayer::CrossEntropy,
    )
}

/// Runs the frozen encoder over the given dataset rows.
pub fn encode_all(ae: &mut AutoEncoder, dataset: &Dataset, indices: &[usize]) -> Encoded {
    let latents = indices.iter().map(|&i| ae.encode(&dataset.image(i))).collect();
    let labels = indices.iter().map(|&i| dataset.label(i)).collect();
    Encoded { latents, labels }
}

/// Trains a fresh probe on `size` rows drawn from `dataset` and scores it on
/// the held out fifth. `reference_size` sets how far a small training split
/// gets replicated.
pub fn run_probe(
    ae: &mut AutoEncoder,
    dataset: &Dataset,
    size: usize,
    reference_size: usize,
    cfg: &ProbeConfig,
) -> Result<ProbeOutcome> {
    let indices = sample_with_replacement(dataset.len(), size);
    let parts = split(indices, TRAIN_FRACTION);
    if parts.train.is_empty() || parts.test.is_empty() {
        return Err(Error::EmptySplit {
            size,
            train: parts.train.len(),
            test: parts.test.len(),
        });
    }

    let train = encode_all(ae, dataset, &parts.train);
    let test = encode_all(ae, dataset, &parts.test);

    // replicate row references, not the latents themselves
    let factor = blow_up_factor(reference_size, train.labels.len());
    let rows = blow_up(&(0..train.labels.len()).collect::<Vec<_>>(), factor);
    debug!(size, train = rows.len(), factor, "probe data ready");

    let mut net = probe_net(ae.latent_shape(), cfg);
    let mut trainer = Trainer::builder(&mut net)
        .learning_rate(cfg.learning_rate)
        .batch_size(cfg.batch_size)
        .method(Method::adam())
        .build();

    let batch_size = cfg.batch_size.max(1);
    for step in 0..cfg.train_steps {
        let mut batch_loss = 0.0;
        for _ in 0..batch_size {
            let row = rows[randi(0, rows.len())];
            let mut x = train.latents[row].clone();
            batch_loss += trainer.train(&mut x, &train.labels[row]);
        }
        if step % LOG_EVERY == 0 || step + 1 == cfg.train_steps {
            debug!(size, step, loss = batch_loss / batch_size as Float, "probe training");
        }
    }

    Ok(evaluate(&mut net, &test))
}

/// Mean cross entropy and top-1 accuracy, inference mode.
pub fn evaluate(net: &mut Net, data: &Encoded) -> ProbeOutcome {
    let mut loss = 0.0;
    let mut correct = 0;
    for (x, &y) in data.latents.iter().zip(&data.labels) {
        net.forward(x, false);
        loss += net.loss(y);
        if net.prediction() == y {
            correct += 1;
        }
    }

    let n = data.labels.len().max(1) as Float;
    ProbeOutcome {
        loss: loss / n,
        accuracy: correct as Float / n,
    }
}
