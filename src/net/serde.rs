use serde::de::Error as _;

use super::Sequential;
use crate::layers::NetLayer;

// Only the layers are stored, activations are rebuilt from their shapes.
#[derive(serde::Deserialize)]
#[serde(rename = "Sequential")]
struct SequentialRepr {
    layers: Vec<Box<dyn NetLayer>>,
}

impl<'de> serde::Deserialize<'de> for Sequential {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let repr = SequentialRepr::deserialize(deserializer)?;
        if repr.layers.is_empty() {
            return Err(D::Error::custom("a stack needs at least an input layer"));
        }
        Ok(Sequential::from_layers(repr.layers))
    }
}
