use crate::{layers::LayerDetails, net::Net, utils::zeros, vol::Vol, Float};

/// Something the [`Trainer`] can fit: it turns one sample into accumulated
/// parameter gradients.
pub trait Model {
    type Target: ?Sized;

    /// Forward and backward pass for one sample, returns its loss.
    /// Gradients add up until the trainer applies an update.
    fn accumulate(&mut self, x: &mut Vol, target: &Self::Target) -> Float;

    fn params_and_grads(&mut self) -> Vec<LayerDetails<'_>>;
}

impl Model for Net {
    type Target = usize;

    fn accumulate(&mut self, x: &mut Vol, y: &usize) -> Float {
        self.forward(x, true);
        self.backward(*y, x)
    }

    fn params_and_grads(&mut self) -> Vec<LayerDetails<'_>> {
        Net::params_and_grads(self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Method {
    Sgd { momentum: Float },
    Adam { eps: Float, beta1: Float, beta2: Float },
}

impl Method {
    /// Adam with the usual defaults.
    pub const fn adam() -> Self {
        Method::Adam {
            eps: 1e-8,
            beta1: 0.9,
            beta2: 0.999,
        }
    }
}

/// Minibatch trainer. Every call to [`Trainer::train`] adds one sample's
/// gradient, every `batch_size` samples the mean gradient is applied.
pub struct Trainer<'m, M: Model> {
    model: &'m mut M,

    learning_rate: Float,
    l1_decay: Float,
    l2_decay: Float,
    batch_size: usize,
    method: Method,

    /// samples seen
    k: usize,
    /// parameter updates applied
    updates: i32,

    // first moment (adam) or velocity (sgd)
    gsum: Vec<Vec<Float>>,
    // second moment, adam only
    xsum: Vec<Vec<Float>>,
}

impl<'m, M: Model> Trainer<'m, M> {
    pub fn builder(model: &'m mut M) -> TrainerBuilder<'m, M> {
        TrainerBuilder::new(model)
    }

    pub fn model(&mut self) -> &mut M {
        &mut *self.model
    }

    pub fn updates(&self) -> usize {
        self.updates as usize
    }

    pub fn train(&mut self, x: &mut Vol, target: &M::Target) -> Float {
        let cost_loss = self.model.accumulate(x, target);

        self.k += 1;
        if self.k % self.batch_size == 0 {
            self.update();
        }

        cost_loss
    }

    fn update(&mut self) {
        self.updates += 1;
        let mut pg_list = self.model.params_and_grads();

        // initialize lists for accumulators. Will only be done once on first update
        if self.gsum.is_empty() {
            for pg in &pg_list {
                self.gsum.push(zeros(pg.params.len()));
                self.xsum.push(match self.method {
                    Method::Adam { .. } => zeros(pg.params.len()),
                    Method::Sgd { .. } => Vec::new(), // conserve memory
                });
            }
        }

        // perform an update for all sets of weights
        for (i, pg) in pg_list.iter_mut().enumerate() {
            let l2_decay = self.l2_decay * pg.l2_decay_mul;
            let l1_decay = self.l1_decay * pg.l1_decay_mul;

            let gsumi = &mut self.gsum[i];
            let xsumi = &mut self.xsum[i];

            for j in 0..pg.params.len() {
                let l1grad = l1_decay * if pg.params[j] > 0.0 { 1.0 } else { -1.0 };
                let l2grad = l2_decay * pg.params[j];

                // raw batch gradient
                let gij = (l2grad + l1grad + pg.grads[j]) / self.batch_size as Float;

                match self.method {
                    Method::Adam { eps, beta1, beta2 } => {
                        gsumi[j] = gsumi[j] * beta1 + (1.0 - beta1) * gij; // update biased first moment estimate
                        xsumi[j] = xsumi[j] * beta2 + (1.0 - beta2) * gij * gij; // update biased second moment estimate
                        let bias_corr1 = gsumi[j] / (1.0 - beta1.powi(self.updates)); // correct bias first moment estimate
                        let bias_corr2 = xsumi[j] / (1.0 - beta2.powi(self.updates)); // correct bias second moment estimate
                        pg.params[j] += -self.learning_rate * bias_corr1 / (bias_corr2.sqrt() + eps);
                    }
                    Method::Sgd { momentum } => {
                        gsumi[j] = momentum * gsumi[j] + gij;
                        pg.params[j] += -self.learning_rate * gsumi[j];
                    }
                }
                pg.grads[j] = 0.0;
            }
        }
    }
}

pub struct TrainerBuilder<'m, M: Model> {
    model: &'m mut M,

    learning_rate: Float,
    l1_decay: Float,
    l2_decay: Float,
    batch_size: usize,
    method: Method,
}

impl<'m, M: Model> TrainerBuilder<'m, M> {
    fn new(model: &'m mut M) -> Self {
        Self {
            model,

            learning_rate: 0.01,
            l1_decay: 0.0,
            l2_decay: 0.0,
            batch_size: 1,
            method: Method::Sgd { momentum: 0.9 },
        }
    }

    pub fn learning_rate(mut self, value: Float) -> Self {
        self.learning_rate = value;
        self
    }

    pub fn l1_decay(mut self, value: Float) -> Self {
        self.l1_decay = value;
        self
    }

    pub fn l2_decay(mut self, value: Float) -> Self {
        self.l2_decay = value;
        self
    }

    /// Samples per update, at least one.
    pub fn batch_size(mut self, value: usize) -> Self {
        self.batch_size = value.max(1);
        self
    }

    pub fn method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    pub fn build(self) -> Trainer<'m, M> {
        Trainer {
            model: self.model,
            learning_rate: self.learning_rate,
            l1_decay: self.l1_decay,
            l2_decay: self.l2_decay,
            batch_size: self.batch_size,
            method: self.method,
            k: 0,
            updates: 0,
            gsum: vec![],
            xsum: vec![],
        }
    }
}
