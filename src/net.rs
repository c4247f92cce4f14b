mod serde;

use crate::{
    layers::{
        ConvLayer, ConvTransposeLayer, EluLayer, FinalLayer, FullyConnLayer, InputLayer,
        LayerDetails, NetLayer, ReshapeLayer, SoftmaxLayer,
    },
    utils::maxmin,
    vol::{Shape, Vol},
    Float,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activation {
    Identity,
    Elu,
}

#[derive(Debug, Clone, Copy)]
pub enum Layer {
    Input {
        width: usize,
        height: usize,
        depth: usize,
    },
    Conv {
        sx: usize,
        filters: usize,
        stride: usize,
        padding: usize,
        activation: Activation,
    },
    ConvTranspose {
        sx: usize,
        filters: usize,
        stride: usize,
        padding: usize,
        activation: Activation,
    },
    Dense {
        neurons: usize,
        activation: Activation,
    },
    Reshape {
        width: usize,
        height: usize,
        depth: usize,
    },
}

pub enum EndLayer {
    /// Dense layer with `classes` outputs followed by softmax.
    Softmax { classes: usize },
    /// Softmax directly over the incoming activations.
    CrossEntropy,
}

/// A simple linear order of layers, the first one an input layer.
///
/// `acts[i]` caches the output of `layers[i]`.
#[derive(::serde::Serialize)]
pub struct Sequential {
    layers: Vec<Box<dyn NetLayer>>,
    #[serde(skip_serializing)]
    acts: Vec<Vol>,
}

impl Sequential {
    pub fn new(def_layers: &[Layer]) -> Self {
        let mut layers: Vec<Box<dyn NetLayer>> = Vec::new();
        let mut shape: Option<Shape> = None;

        for def in def_layers {
            let input = match (*def, shape) {
                (Layer::Input { .. }, Some(_)) => panic!("input layer must be the first"),
                (Layer::Input { .. }, None) => Shape::new(0, 0, 0),
                (_, None) => panic!("dim must be specified"),
                (_, Some(input)) => input,
            };

            let (layer, activation): (Box<dyn NetLayer>, Activation) = match *def {
                Layer::Input {
                    width,
                    height,
                    depth,
                } => (
                    Box::new(InputLayer::with_dimensions(depth, width, height)),
                    Activation::Identity,
                ),
                Layer::Conv {
                    sx,
                    filters,
                    stride,
                    padding,
                    activation,
                } => (
                    Box::new(
                        ConvLayer::builder(filters, sx, input)
                            .stride(stride)
                            .padding(padding)
                            .build(),
                    ),
                    activation,
                ),
                Layer::ConvTranspose {
                    sx,
                    filters,
                    stride,
                    padding,
                    activation,
                } => (
                    Box::new(
                        ConvTransposeLayer::builder(filters, sx, input)
                            .stride(stride)
                            .padding(padding)
                            .build(),
                    ),
                    activation,
                ),
                Layer::Dense {
                    neurons,
                    activation,
                } => (
                    Box::new(FullyConnLayer::builder(neurons, input).build()),
                    activation,
                ),
                Layer::Reshape {
                    width,
                    height,
                    depth,
                } => (
                    Box::new(ReshapeLayer::new(input, Shape::new(width, height, depth))),
                    Activation::Identity,
                ),
            };

            let out = layer.out_shape();
            layers.push(layer);

            // activations get their own layers
            let act: Option<Box<dyn NetLayer>> = match activation {
                Activation::Identity => None,
                Activation::Elu => Some(Box::new(EluLayer::new(out))),
            };
            layers.extend(act);

            shape = Some(out);
        }

        Self::from_layers(layers)
    }

    /// Wraps already built layers, allocating their activations.
    /// Panics when `layers` is empty.
    pub fn from_layers(layers: Vec<Box<dyn NetLayer>>) -> Self {
        assert!(!layers.is_empty(), "a stack needs at least an input layer");
        let acts = layers
            .iter()
            .map(|layer| Vol::zeros_like(layer.out_shape()))
            .collect();
        Self { layers, acts }
    }

    fn adjacent(acts: &mut [Vol], at: usize) -> (&mut Vol, &mut Vol) {
        let (a, b) = acts.split_at_mut(at);
        (&mut a[at - 1], &mut b[0])
    }

    // forward prop the stack, returns the output activation
    pub fn forward(&mut self, vol: &Vol, is_training: bool) -> &Vol {
        self.layers[0].forward(vol, &mut self.acts[0], is_training);
        for i in 1..self.layers.len() {
            let (a, b) = Self::adjacent(&mut self.acts, i);
            self.layers[i].forward(a, b, is_training);
        }

        self.output()
    }

    // backprop: expects the gradient wrt the output in `output_mut().dw`,
    // accumulates parameter gradients and writes the gradient wrt `vol`
    pub fn backward(&mut self, vol: &mut Vol) {
        for i in (1..self.layers.len()).rev() {
            let (a, b) = Self::adjacent(&mut self.acts, i);
            self.layers[i].backward(a, b);
        }

        self.layers[0].backward(vol, &self.acts[0]);
    }

    pub fn output(&self) -> &Vol {
        &self.acts[self.acts.len() - 1]
    }

    pub fn output_mut(&mut self) -> &mut Vol {
        let n = self.acts.len();
        &mut self.acts[n - 1]
    }

    pub fn in_shape(&self) -> Shape {
        self.layers[0].out_shape()
    }

    pub fn out_shape(&self) -> Shape {
        self.output().shape()
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    pub fn params_and_grads(&mut self) -> Vec<LayerDetails<'_>> {
        self.layers
            .iter_mut()
            .flat_map(|layer| layer.params_and_grads())
            .collect()
    }
}

/// A layer stack closed by a softmax cross-entropy loss.
pub struct Net {
    body: Sequential,
    final_layer: Box<dyn FinalLayer>,
    probabilities: Vol,
}

impl Net {
    pub fn new(def_layers: &[Layer], def_final_layer: EndLayer) -> Self {
        let mut defs = def_layers.to_vec();
        if let EndLayer::Softmax { classes } = def_final_layer {
            // add an fc layer here, there is no reason the user should
            // have to worry about this and we almost always want to
            defs.push(Layer::Dense {
                neurons: classes,
                activation: Activation::Identity,
            });
        }

        let body = Sequential::new(&defs);
        let final_layer = SoftmaxLayer::new(body.out_shape());
        let probabilities = Vol::zeros_like(final_layer.out_shape());

        Self {
            body,
            final_layer: Box::new(final_layer),
            probabilities,
        }
    }

    // forward prop the network, returns class probabilities.
    // The trainer passes is_training = true, evaluation uses prediction mode
    pub fn forward(&mut self, vol: &Vol, is_training: bool) -> &Vol {
        let logits = self.body.forward(vol, is_training);
        self.final_layer.forward(logits, &mut self.probabilities);
        &self.probabilities
    }

    // backprop: compute gradients wrt all parameters, returns the loss
    pub fn backward(&mut self, y: usize, vol: &mut Vol) -> Float {
        let loss = self.final_layer.backward(y, self.body.output_mut());
        self.body.backward(vol);
        loss
    }

    /// Argmax of the last forward pass.
    pub fn prediction(&self) -> usize {
        maxmin(&self.probabilities.w).map_or(0, |found| found.max_index)
    }

    /// Loss of class `y` for the last forward pass.
    pub fn loss(&self, y: usize) -> Float {
        self.final_layer.loss(y, self.body.output())
    }

    pub fn cost_loss(&mut self, vol: &Vol, y: usize) -> Float {
        self.forward(vol, false);
        self.loss(y)
    }

    pub fn in_shape(&self) -> Shape {
        self.body.in_shape()
    }

    pub fn params_and_grads(&mut self) -> Vec<LayerDetails<'_>> {
        self.body.params_and_grads()
    }
}

#[cfg(test)]
mod tests {
    use rand::random;

    use crate::{trainer::Method, vol::Vol, Trainer};

    use super::{Activation, EndLayer, Layer, Net};

    fn setup() -> Net {
        Net::new(
            &[
                Layer::Input {
                    width: 1,
                    height: 1,
                    depth: 2,
                },
                Layer::Dense {
                    neurons: 5,
                    activation: Activation::Elu,
                },
                Layer::Dense {
                    neurons: 5,
                    activation: Activation::Elu,
                },
            ],
            EndLayer::Softmax { classes: 3 },
        )
    }

    fn random_point() -> Vol {
        Vol::from([random::<f32>() * 2.0 - 1.0, random::<f32>() * 2.0 - 1.0].as_ref())
    }

    #[test]
    fn layer_count() {
        let net = setup();

        // activations are their own layers. Softmax gets its own fully connected layer.
        assert_eq!(net.body.len(), 6);
    }

    #[test]
    fn forward_probabilities() {
        let mut net = setup();
        let probability_volume = net.forward(&Vol::from([0.2, -0.3].as_ref()), false);

        assert_eq!(probability_volume.w.len(), 3); // 3 classes output
        for w in &probability_volume.w {
            assert!(*w > 0.0);
            assert!(*w < 1.0);
        }
        let w = &probability_volume.w;
        assert!((w[0] + w[1] + w[2] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn cross_entropy_end_uses_incoming_width() {
        let mut net = Net::new(
            &[
                Layer::Input {
                    width: 1,
                    height: 1,
                    depth: 4,
                },
                Layer::Dense {
                    neurons: 7,
                    activation: Activation::Elu,
                },
            ],
            EndLayer::CrossEntropy,
        );
        assert_eq!(net.forward(&Vol::from(vec![0.0; 4]), false).len(), 7);
    }

    #[test]
    fn increase_prob_for_ground_truth_class_when_trained() {
        let mut net = setup();
        let mut trainer = Trainer::builder(&mut net)
            .learning_rate(0.0001)
            .method(Method::Sgd { momentum: 0.0 })
            .batch_size(1)
            .l2_decay(0.0)
            .build();

        // this should work since l2 and l1 regularization are off
        // an issue is that if step size is too high, this could technically fail...
        for _k in 0..100 {
            let mut x = random_point();
            let gti = (random::<f32>() * 3.0).floor() as usize;
            let before = trainer.model().forward(&x, false).w[gti];

            trainer.train(&mut x, &gti);

            let after = trainer.model().forward(&x, false).w[gti];
            assert!(after > before);
        }
    }

    #[test]
    fn compute_correct_gradient_at_data() {
        // here we only test the gradient at data, but if this is
        // right then that's comforting, because it is a function
        // of all gradients above, for all layers.
        let mut net = setup();
        let mut x = random_point();
        let gti = (random::<f32>() * 3.0).floor() as usize;

        net.forward(&x, true);
        net.backward(gti, &mut x);

        let delta = 1e-3;
        for i in 0..x.w.len() {
            let grad_analytic = x.dw[i];
            let xold = x.w[i];

            x.w[i] += delta;
            let c0 = net.cost_loss(&x, gti);
            x.w[i] -= 2.0 * delta;
            let c1 = net.cost_loss(&x, gti);
            x.w[i] = xold; // reset

            let grad_numeric = (c0 - c1) / (2.0 * delta);
            let abs_error = (grad_analytic - grad_numeric).abs();
            let rel_error = abs_error / (grad_analytic + grad_numeric).abs();
            assert!(
                abs_error < 1e-3 || rel_error < 1e-2,
                "{i}: numeric: {grad_numeric}, analytic: {grad_analytic}"
            );
        }
    }

    #[test]
    fn prediction_is_most_probable_class() {
        let mut net = setup();
        let probs = net.forward(&random_point(), false).w.clone();
        let best = (0..3)
            .max_by(|a, b| probs[*a].total_cmp(&probs[*b]))
            .unwrap();
        assert_eq!(net.prediction(), best);
    }
}
