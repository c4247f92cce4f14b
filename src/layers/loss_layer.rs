// Layers that implement a loss. These are the layers that can initiate a
// backward() pass: softmax cross-entropy closes a classifier Net, and the
// regression layer scores autoencoder reconstructions.

use crate::{
    vol::{Shape, Vol},
    Float,
};

use super::FinalLayer;

/// This is a classifier, with N discrete classes from 0 to N-1
/// it gets a stream of N incoming numbers and computes the softmax
/// function (exponentiate and normalize to sum to 1 as probabilities should)
pub struct SoftmaxLayer {
    out_depth: usize,

    es: Vec<Float>,
    // log of the softmax normaliser, amax + ln(sum(e^(x - amax)))
    log_norm: Float,
}

impl SoftmaxLayer {
    pub fn new(input: Shape) -> Self {
        let num_inputs = input.len();
        Self {
            out_depth: num_inputs,
            es: vec![0.0; num_inputs],
            log_norm: 0.0,
        }
    }
}

impl FinalLayer for SoftmaxLayer {
    fn forward(&mut self, in_act: &Vol, out_act: &mut Vol) {
        let v = in_act;
        debug_assert_eq!(out_act.depth(), self.out_depth);

        // compute max activation
        let amax = v.w.iter().copied().fold(Float::NEG_INFINITY, Float::max);

        // compute exponentials (carefully to not blow up)
        let mut esum = 0.0;
        for (e, x) in self.es.iter_mut().zip(&v.w) {
            *e = (x - amax).exp();
            esum += *e;
        }

        // normalize and output to sum to one
        for (e, out) in self.es.iter_mut().zip(out_act.w.iter_mut()) {
            *e /= esum;
            *out = *e;
        }
        self.log_norm = amax + esum.ln();
    }

    fn backward(&mut self, y: usize, in_act: &mut Vol) -> Float {
        for (i, (dw, p)) in in_act.dw.iter_mut().zip(&self.es).enumerate() {
            let indicator = Float::from(i == y);
            *dw = -(indicator - p);
        }

        self.loss(y, in_act)
    }

    // loss is the class negative log likelihood, -ln(p_y) = log_norm - x_y;
    // never negative since x_y <= amax and the normaliser sum is >= 1
    fn loss(&self, y: usize, in_act: &Vol) -> Float {
        (self.log_norm - in_act.w[y]).max(0.0)
    }

    fn out_shape(&self) -> Shape {
        Shape::new(1, 1, self.out_depth)
    }
}

/// Mean squared error between a prediction and a target volume.
#[derive(Debug, Default, Clone, Copy)]
pub struct RegressionLayer;

impl RegressionLayer {
    pub fn loss(&self, prediction: &Vol, target: &Vol) -> Float {
        assert_eq!(prediction.len(), target.len(), "target shape mismatch");
        let n = prediction.len() as Float;
        prediction
            .w
            .iter()
            .zip(&target.w)
            .map(|(p, t)| (p - t) * (p - t))
            .sum::<Float>()
            / n
    }

    /// Writes d(loss)/d(prediction) into `prediction.dw` and returns the loss.
    pub fn backward(&self, prediction: &mut Vol, target: &Vol) -> Float {
        let loss = self.loss(prediction, target);
        let n = prediction.len() as Float;
        for ((dw, p), t) in prediction.dw.iter_mut().zip(&prediction.w).zip(&target.w) {
            *dw = 2.0 * (p - t) / n;
        }
        loss
    }
}
