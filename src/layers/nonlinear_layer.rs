use crate::{
    vol::{Shape, Vol},
    Float,
};

use super::{LayerDetails, NetLayer};

// Implements the exponential linear unit elementwise
// x -> x for x > 0, alpha * (e^x - 1) otherwise
#[derive(serde::Serialize, serde::Deserialize)]
pub struct EluLayer {
    shape: Shape,
    alpha: Float,
}

impl EluLayer {
    pub fn new(input: Shape) -> Self {
        Self::with_alpha(input, 1.0)
    }

    pub fn with_alpha(input: Shape, alpha: Float) -> Self {
        Self {
            shape: input,
            alpha,
        }
    }
}

#[typetag::serde]
impl NetLayer for EluLayer {
    fn forward(&mut self, in_act: &Vol, out_act: &mut Vol, _is_training: bool) {
        assert_eq!(
            in_act.w.len(),
            out_act.w.len(),
            "in and out should have the same length"
        );

        for (in_w, out_w) in in_act.w.iter().copied().zip(out_act.w.iter_mut()) {
            *out_w = if in_w > 0.0 {
                in_w
            } else {
                self.alpha * in_w.exp_m1()
            };
        }
    }

    fn backward(&mut self, in_act: &mut Vol, out_act: &Vol) {
        // for x <= 0 the derivative alpha * e^x equals out + alpha
        for i in 0..in_act.w.len() {
            let slope = if in_act.w[i] > 0.0 {
                1.0
            } else {
                out_act.w[i] + self.alpha
            };
            in_act.dw[i] = slope * out_act.dw[i];
        }
    }

    fn out_shape(&self) -> Shape {
        self.shape
    }

    fn params_and_grads(&mut self) -> Vec<LayerDetails<'_>> {
        Vec::new()
    }
}
