use std::{
    fs::{self, File},
    io::BufReader,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};

use crate::{
    error::{Error, Result},
    layers::{LayerDetails, RegressionLayer},
    net::{Activation, Layer, Sequential},
    trainer::Model,
    vol::{Shape, Vol},
    Float,
};

pub const WEIGHTS_FILE: &str = "A.bin";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Architecture {
    /// Two 4x4 convolutions each way, the latent keeps the spatial layout.
    Cifar,
    /// Strided convolutions down to a quarter of the side, then a dense
    /// bottleneck of `latent_dim` units.
    Bottleneck { latent_dim: usize },
}

impl Architecture {
    fn encoder(self, input: Shape) -> Vec<Layer> {
        let mut defs = vec![Layer::Input {
            width: input.sx,
            height: input.sy,
            depth: input.depth,
        }];
        match self {
            Architecture::Cifar => defs.extend([
                Layer::Conv {
                    sx: 4,
                    filters: 16,
                    stride: 1,
                    padding: 0,
                    activation: Activation::Elu,
                },
                Layer::Conv {
                    sx: 4,
                    filters: 16,
                    stride: 1,
                    padding: 0,
                    activation: Activation::Identity,
                },
            ]),
            Architecture::Bottleneck { latent_dim } => defs.extend([
                Layer::Conv {
                    sx: 4,
                    filters: 32,
                    stride: 2,
                    padding: 1,
                    activation: Activation::Elu,
                },
                Layer::Conv {
                    sx: 4,
                    filters: 1,
                    stride: 2,
                    padding: 1,
                    activation: Activation::Elu,
                },
                Layer::Dense {
                    neurons: latent_dim,
                    activation: Activation::Identity,
                },
            ]),
        }
        defs
    }

    fn decoder(self, input: Shape, latent: Shape) -> Vec<Layer> {
        let mut defs = vec![Layer::Input {
            width: latent.sx,
            height: latent.sy,
            depth: latent.depth,
        }];
        match self {
            Architecture::Cifar => defs.extend([
                Layer::ConvTranspose {
                    sx: 4,
                    filters: 16,
                    stride: 1,
                    padding: 0,
                    activation: Activation::Elu,
                },
                Layer::ConvTranspose {
                    sx: 4,
                    filters: input.depth,
                    stride: 1,
                    padding: 0,
                    activation: Activation::Identity,
                },
            ]),
            Architecture::Bottleneck { .. } => {
                let (width, height) = (input.sx / 4, input.sy / 4);
                defs.extend([
                    Layer::Dense {
                        neurons: width * height,
                        activation: Activation::Identity,
                    },
                    Layer::Reshape {
                        width,
                        height,
                        depth: 1,
                    },
                    Layer::ConvTranspose {
                        sx: 4,
                        filters: 32,
                        stride: 2,
                        padding: 1,
                        activation: Activation::Elu,
                    },
                    Layer::ConvTranspose {
                        sx: 4,
                        filters: input.depth,
                        stride: 2,
                        padding: 1,
                        activation: Activation::Elu,
                    },
                ])
            }
        }
        defs
    }
}

/// An encoder/decoder pair trained to reconstruct its input.
#[derive(Serialize, Deserialize)]
pub struct AutoEncoder {
    name: String,
    architecture: Architecture,
    encoder: Sequential,
    decoder: Sequential,
    #[serde(skip)]
    loss: RegressionLayer,
}

impl AutoEncoder {
    /// Panics when `input` is too small for the architecture.
    pub fn new(name: impl Into<String>, architecture: Architecture, input: Shape) -> Self {
        let encoder = Sequential::new(&architecture.encoder(input));
        let decoder = Sequential::new(&architecture.decoder(input, encoder.out_shape()));
        assert_eq!(
            decoder.out_shape(),
            input,
            "decoder does not reconstruct the input shape"
        );

        Self {
            name: name.into(),
            architecture,
            encoder,
            decoder,
            loss: RegressionLayer,
        }
    }

    /// `<root>/params/step_<step>/rank_<rank>/A.bin`
    pub fn weights_path(root: &Path, step: usize, rank: usize) -> PathBuf {
        root.join("params")
            .join(format!("step_{step}"))
            .join(format!("rank_{rank}"))
            .join(WEIGHTS_FILE)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn architecture(&self) -> Architecture {
        self.architecture
    }

    pub fn input_shape(&self) -> Shape {
        self.encoder.in_shape()
    }

    pub fn latent_shape(&self) -> Shape {
        self.encoder.out_shape()
    }

    /// Latent code of `x`, inference mode.
    pub fn encode(&mut self, x: &Vol) -> Vol {
        self.encoder.forward(x, false).clone()
    }

    pub fn reconstruct(&mut self, x: &Vol) -> Vol {
        let latent = self.encode(x);
        self.decoder.forward(&latent, false).clone()
    }

    pub fn reconstruction_loss(&mut self, x: &Vol) -> Float {
        let reconstruction = self.reconstruct(x);
        self.loss.loss(&reconstruction, x)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let bytes = bincode::serialize(self)?;
        fs::write(path, bytes)?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Err(Error::MissingWeights(path.to_path_buf()));
        }
        let file = BufReader::new(File::open(path)?);
        Ok(bincode::deserialize_from(file)?)
    }
}

impl Model for AutoEncoder {
    type Target = Vol;

    fn accumulate(&mut self, x: &mut Vol, target: &Vol) -> Float {
        let mut latent = self.encoder.forward(x, true).clone();
        self.decoder.forward(&latent, true);

        let loss = self.loss.backward(self.decoder.output_mut(), target);

        // decoder writes the latent gradient, which seeds the encoder pass
        self.decoder.backward(&mut latent);
        self.encoder.output_mut().dw.copy_from_slice(&latent.dw);
        self.encoder.backward(x);

        loss
    }

    fn params_and_grads(&mut self) -> Vec<LayerDetails<'_>> {
        let mut details = self.encoder.params_and_grads();
        details.extend(self.decoder.params_and_grads());
        details
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        trainer::{Method, Trainer},
        utils::reseed,
    };

    fn image(side: usize, phase: usize) -> Vol {
        let w = (0..side * side)
            .map(|i| ((i + phase) % side) as Float / side as Float)
            .collect();
        Vol::with_values(Shape::new(side, side, 1), w)
    }

    #[test]
    fn cifar_latent_keeps_spatial_layout() {
        reseed(0);
        let ae = AutoEncoder::new("A", Architecture::Cifar, Shape::new(32, 32, 1));
        assert_eq!(ae.latent_shape(), Shape::new(26, 26, 16));
        assert_eq!(ae.input_shape(), Shape::new(32, 32, 1));
    }

    #[test]
    fn bottleneck_latent_is_flat() {
        reseed(0);
        let mut ae = AutoEncoder::new(
            "A",
            Architecture::Bottleneck { latent_dim: 12 },
            Shape::new(16, 16, 1),
        );
        assert_eq!(ae.latent_shape(), Shape::new(1, 1, 12));
        assert_eq!(ae.reconstruct(&image(16, 0)).shape(), Shape::new(16, 16, 1));
    }

    #[test]
    fn training_lowers_reconstruction_loss() {
        reseed(2);
        let mut ae = AutoEncoder::new("A", Architecture::Cifar, Shape::new(8, 8, 1));
        let samples: Vec<Vol> = (0..4).map(|phase| image(8, phase)).collect();
        let mean_loss = |ae: &mut AutoEncoder| {
            samples
                .iter()
                .map(|x| ae.reconstruction_loss(x))
                .sum::<Float>()
                / samples.len() as Float
        };
        let before = mean_loss(&mut ae);

        let mut trainer = Trainer::builder(&mut ae)
            .learning_rate(1e-3)
            .batch_size(4)
            .method(Method::adam())
            .build();
        for _ in 0..50 {
            for x in &samples {
                let mut input = x.clone();
                trainer.train(&mut input, x);
            }
        }

        let after = mean_loss(&mut ae);
        assert!(after < before, "loss went from {before} to {after}");
    }

    #[test]
    fn weights_round_trip() {
        reseed(4);
        let dir = tempfile::tempdir().unwrap();
        let path = AutoEncoder::weights_path(dir.path(), 49999, 3);
        assert!(path.ends_with("params/step_49999/rank_3/A.bin"));

        let mut ae = AutoEncoder::new(
            "A",
            Architecture::Bottleneck { latent_dim: 5 },
            Shape::new(8, 8, 1),
        );
        ae.save(&path).unwrap();

        let mut restored = AutoEncoder::load(&path).unwrap();
        assert_eq!(restored.name(), "A");
        assert_eq!(restored.architecture(), ae.architecture());

        let x = image(8, 1);
        assert_eq!(restored.encode(&x).w, ae.encode(&x).w);
        assert_eq!(restored.reconstruct(&x).w, ae.reconstruct(&x).w);
    }

    #[test]
    fn missing_weights_are_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = AutoEncoder::weights_path(dir.path(), 1, 0);
        assert!(matches!(
            AutoEncoder::load(&path),
            Err(Error::MissingWeights(missing)) if missing == path
        ));
    }
}
