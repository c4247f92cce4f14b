use std::{
    fs,
    path::{Path, PathBuf},
};

use tracing::{debug, info};

use crate::{
    error::{Error, Result},
    vol::{Shape, Vol},
    Float,
};

/// Side of a CIFAR image.
pub const CIFAR_SIDE: usize = 32;
const CHANNELS: usize = 3;
const PIXELS: usize = CIFAR_SIDE * CIFAR_SIDE * CHANNELS;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum CifarVariant {
    Ten,
    Hundred,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatasetSplit {
    Train,
    Eval,
}

impl CifarVariant {
    pub fn from_classes(classes: usize) -> Result<Self> {
        match classes {
            10 => Ok(CifarVariant::Ten),
            100 => Ok(CifarVariant::Hundred),
            other => Err(Error::Config(format!(
                "n_classes must be 10 or 100, got {other}"
            ))),
        }
    }

    pub fn classes(self) -> usize {
        match self {
            CifarVariant::Ten => 10,
            CifarVariant::Hundred => 100,
        }
    }

    pub fn dir_name(self) -> &'static str {
        match self {
            CifarVariant::Ten => "CIFAR10",
            CifarVariant::Hundred => "CIFAR100",
        }
    }

    pub fn files(self, split: DatasetSplit) -> Vec<String> {
        match (self, split) {
            (CifarVariant::Ten, DatasetSplit::Train) => {
                (1..=5).map(|i| format!("data_batch_{i}.bin")).collect()
            }
            (CifarVariant::Ten, DatasetSplit::Eval) => vec!["test_batch.bin".to_string()],
            (CifarVariant::Hundred, DatasetSplit::Train) => vec!["train.bin".to_string()],
            (CifarVariant::Hundred, DatasetSplit::Eval) => vec!["test.bin".to_string()],
        }
    }

    // CIFAR-100 carries a coarse label byte before the fine one
    fn label_bytes(self) -> usize {
        match self {
            CifarVariant::Ten => 1,
            CifarVariant::Hundred => 2,
        }
    }

    fn record_len(self) -> usize {
        self.label_bytes() + PIXELS
    }
}

/// Greyscale images with their class labels, held in one flat buffer.
#[derive(Debug, Clone, PartialEq)]
pub struct Dataset {
    side: usize,
    pixels: Vec<Float>,
    labels: Vec<usize>,
    classes: usize,
}

impl Dataset {
    pub fn load(data_dir: &Path, variant: CifarVariant, split: DatasetSplit) -> Result<Self> {
        let dir = data_dir.join(variant.dir_name());
        let mut records = Vec::new();
        for name in variant.files(split) {
            let path: PathBuf = dir.join(&name);
            let bytes = fs::read(&path).map_err(|err| {
                Error::Dataset(format!("cannot read {}: {err}", path.display()))
            })?;
            debug!(file = %path.display(), bytes = bytes.len(), "read dataset file");
            records.extend_from_slice(&bytes);
        }

        let dataset = Self::from_records(&records, variant)?;
        info!(
            variant = variant.dir_name(),
            ?split,
            samples = dataset.len(),
            "dataset loaded"
        );
        Ok(dataset)
    }

    /// Parses concatenated binary records of `variant`.
    pub fn from_records(bytes: &[u8], variant: CifarVariant) -> Result<Self> {
        let record_len = variant.record_len();
        if bytes.is_empty() || bytes.len() % record_len != 0 {
            return Err(Error::Dataset(format!(
                "{} bytes is not a whole number of {record_len} byte records",
                bytes.len()
            )));
        }

        let plane = CIFAR_SIDE * CIFAR_SIDE;
        let count = bytes.len() / record_len;
        let mut pixels = Vec::with_capacity(count * plane);
        let mut labels = Vec::with_capacity(count);

        for record in bytes.chunks_exact(record_len) {
            let label = record[variant.label_bytes() - 1] as usize;
            if label >= variant.classes() {
                return Err(Error::Dataset(format!(
                    "label {label} out of range for {}",
                    variant.dir_name()
                )));
            }
            labels.push(label);

            // channel planar rgb, averaged into one grey plane
            let rgb = &record[variant.label_bytes()..];
            for p in 0..plane {
                let sum: u32 = (0..CHANNELS).map(|c| rgb[c * plane + p] as u32).sum();
                pixels.push(sum as Float / (CHANNELS as Float * 255.0));
            }
        }

        Ok(Self {
            side: CIFAR_SIDE,
            pixels,
            labels,
            classes: variant.classes(),
        })
    }

    /// Builds a dataset from greyscale `side × side` images stored back to back.
    pub fn from_parts(
        side: usize,
        pixels: Vec<Float>,
        labels: Vec<usize>,
        classes: usize,
    ) -> Result<Self> {
        if pixels.len() != side * side * labels.len() {
            return Err(Error::Dataset(format!(
                "{} pixels do not make {} images of {side}x{side}",
                pixels.len(),
                labels.len()
            )));
        }
        if let Some(bad) = labels.iter().find(|label| **label >= classes) {
            return Err(Error::Dataset(format!(
                "label {bad} out of range for {classes} classes"
            )));
        }
        Ok(Self {
            side,
            pixels,
            labels,
            classes,
        })
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn side(&self) -> usize {
        self.side
    }

    pub fn classes(&self) -> usize {
        self.classes
    }

    pub fn image_shape(&self) -> Shape {
        Shape::new(self.side, self.side, 1)
    }

    pub fn image(&self, i: usize) -> Vol {
        let n = self.side * self.side;
        Vol::with_values(self.image_shape(), self.pixels[i * n..(i + 1) * n].to_vec())
    }

    pub fn label(&self, i: usize) -> usize {
        self.labels[i]
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::Dataset;

    /// `count` small images whose brightness pattern depends on the label.
    pub(crate) fn striped(count: usize, side: usize, classes: usize) -> Dataset {
        let mut pixels: Vec<crate::Float> = Vec::with_capacity(count * side * side);
        let mut labels = Vec::with_capacity(count);
        for i in 0..count {
            let label = i % classes;
            for p in 0..side * side {
                let on = (p % side) % classes == label;
                pixels.push(if on { 0.9 } else { 0.1 });
            }
            labels.push(label);
        }
        Dataset::from_parts(side, pixels, labels, classes).unwrap()
    }
}
