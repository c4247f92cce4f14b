use crate::vol::{Shape, Vol};

use super::{LayerDetails, NetLayer};

/// Reinterprets the input values under a new shape. A dense output of
/// `1 × 1 × n` becomes a `w × h × 1` image with element `i` at `(i % w, i / w)`.
#[derive(serde::Serialize, serde::Deserialize)]
pub struct ReshapeLayer {
    shape: Shape,
}

impl ReshapeLayer {
    pub fn new(input: Shape, output: Shape) -> Self {
        assert_eq!(
            input.len(),
            output.len(),
            "reshape must keep the number of values"
        );
        Self { shape: output }
    }
}

#[typetag::serde]
impl NetLayer for ReshapeLayer {
    fn forward(&mut self, in_act: &Vol, out_act: &mut Vol, _is_training: bool) {
        out_act.w.copy_from_slice(&in_act.w);
    }

    fn backward(&mut self, in_act: &mut Vol, out_act: &Vol) {
        in_act.dw.copy_from_slice(&out_act.dw);
    }

    fn out_shape(&self) -> Shape {
        self.shape
    }

    fn params_and_grads(&mut self) -> Vec<LayerDetails<'_>> {
        Vec::new()
    }
}
