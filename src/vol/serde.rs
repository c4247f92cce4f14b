use super::Vol;

use crate::Float;

/// Serialized form of a [`Vol`]. Gradients are never stored, they are
/// rebuilt as zeros once the weights are known to fill the volume.
#[derive(serde::Deserialize)]
pub(super) struct VolRepr {
    sx: usize,
    sy: usize,
    depth: usize,
    w: Vec<Float>,
}

impl TryFrom<VolRepr> for Vol {
    type Error = String;

    fn try_from(repr: VolRepr) -> Result<Self, Self::Error> {
        let n = repr.sx * repr.sy * repr.depth;
        if repr.w.len() != n {
            return Err(format!(
                "volume {}x{}x{} needs {n} weights, found {}",
                repr.sx,
                repr.sy,
                repr.depth,
                repr.w.len()
            ));
        }

        Ok(Vol {
            sx: repr.sx,
            sy: repr.sy,
            depth: repr.depth,
            w: repr.w,
            dw: vec![0.0; n],
        })
    }
}
