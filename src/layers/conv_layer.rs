//! This file contains all layers that do dot products with input,
//! but usually in a different connectivity pattern and weight sharing
//! schemes:
//! - FullyConn is fully connected dot products
//! - ConvLayer does convolutions (so weight sharing spatially)
//! - ConvTransposeLayer scatters every input through the filters, the
//!   adjoint of a convolution; decoders use it to upsample
//! putting them together in one file because they are very similar

use crate::{
    vol::{Shape, Vol},
    Float,
};

use super::{LayerDetails, NetLayer};

fn filter_details<'a>(
    filters: &'a mut [Vol],
    biases: &'a mut Vol,
    l1_decay_mul: Float,
    l2_decay_mul: Float,
) -> Vec<LayerDetails<'a>> {
    let mut result: Vec<_> = filters
        .iter_mut()
        .map(|filter| LayerDetails {
            params: &mut filter.w,
            grads: &mut filter.dw,
            l1_decay_mul,
            l2_decay_mul,
        })
        .collect();

    result.push(LayerDetails {
        params: &mut biases.w,
        grads: &mut biases.dw,
        l1_decay_mul: 0.0,
        l2_decay_mul: 0.0,
    });
    result
}

#[derive(serde::Serialize, serde::Deserialize)]
pub struct ConvLayer {
    sx: usize,
    sy: usize,
    stride: usize,
    padding: usize,
    l1_decay_mul: Float,
    l2_decay_mul: Float,

    out_shape: Shape,

    filters: Vec<Vol>,
    biases: Vol,
}

impl ConvLayer {
    pub fn builder(filters: usize, sx: usize, input: Shape) -> ConvLayerBuilder {
        ConvLayerBuilder::new(filters, sx, input)
    }
}

pub struct ConvLayerBuilder {
    out_depth: usize,
    sx: usize,
    input: Shape,

    stride: usize,
    padding: usize,
}

impl ConvLayerBuilder {
    pub fn new(filters: usize, sx: usize, input: Shape) -> Self {
        Self {
            // required
            out_depth: filters,
            sx,
            input,

            // optional
            stride: 1,
            padding: 0,
        }
    }

    /// stride at which we apply filters to input volume
    ///
    /// default: 1
    pub fn stride(mut self, value: usize) -> Self {
        self.stride = value;
        self
    }

    /// padding to add around borders of input volume
    ///
    /// default: 0
    pub fn padding(mut self, value: usize) -> Self {
        self.padding = value;
        self
    }

    pub fn build(self) -> ConvLayer {
        assert!(self.stride > 0, "stride must be positive");
        assert!(
            self.input.sx + self.padding * 2 >= self.sx
                && self.input.sy + self.padding * 2 >= self.sx,
            "filter larger than padded input"
        );

        let filters = (0..self.out_depth)
            .map(|_| Vol::new(self.sx, self.sx, self.input.depth))
            .collect();

        // note we are doing floor, so if the strided convolution of the filter doesnt fit into the input
        // volume exactly, the output volume will be trimmed and not contain the (incomplete) computed
        // final application.
        let out_shape = Shape::new(
            (self.input.sx + self.padding * 2 - self.sx) / self.stride + 1,
            (self.input.sy + self.padding * 2 - self.sx) / self.stride + 1,
            self.out_depth,
        );

        ConvLayer {
            sx: self.sx,
            sy: self.sx,
            stride: self.stride,
            padding: self.padding,
            l1_decay_mul: 0.0,
            l2_decay_mul: 1.0,
            out_shape,
            filters,
            biases: Vol::with_constant(1, 1, self.out_depth, 0.0),
        }
    }
}

impl ConvLayer {
    // input coordinate of filter tap `f` for output position `a`, if inside the volume
    fn source(&self, a: usize, f: usize, extent: usize) -> Option<usize> {
        let o = (a * self.stride + f) as isize - self.padding as isize;
        (o >= 0 && (o as usize) < extent).then_some(o as usize)
    }
}

#[typetag::serde]
impl NetLayer for ConvLayer {
    fn forward(&mut self, in_act: &Vol, out_act: &mut Vol, _is_training: bool) {
        debug_assert_eq!(out_act.shape(), self.out_shape);

        for (d, f) in self.filters.iter().enumerate() {
            for ay in 0..self.out_shape.sy {
                for ax in 0..self.out_shape.sx {
                    // convolve centered at this particular location
                    let mut a = 0.0;
                    for fy in 0..self.sy {
                        let Some(oy) = self.source(ay, fy, in_act.sy()) else {
                            continue;
                        };
                        for fx in 0..self.sx {
                            let Some(ox) = self.source(ax, fx, in_act.sx()) else {
                                continue;
                            };
                            let f_index = f.index(fx, fy, 0);
                            let v_index = in_act.index(ox, oy, 0);
                            for fd in 0..f.depth() {
                                a += f.w[f_index + fd] * in_act.w[v_index + fd];
                            }
                        }
                    }
                    a += self.biases.w[d];
                    out_act.set(ax, ay, d, a);
                }
            }
        }
    }

    fn backward(&mut self, in_act: &mut Vol, out_act: &Vol) {
        debug_assert_eq!(
            in_act.w.len(),
            in_act.dw.len(),
            "weight arrays should have the same length"
        );

        in_act.zero_gradients(); // we're about to fill it

        let (in_sx, in_sy) = (in_act.sx(), in_act.sy());
        for d in 0..self.out_shape.depth {
            for ay in 0..self.out_shape.sy {
                for ax in 0..self.out_shape.sx {
                    // gradient from above, from chain rule
                    let chain_grad = out_act.get_gradient(ax, ay, d);

                    for fy in 0..self.sy {
                        let Some(oy) = self.source(ay, fy, in_sy) else {
                            continue;
                        };
                        for fx in 0..self.sx {
                            let Some(ox) = self.source(ax, fx, in_sx) else {
                                continue;
                            };
                            let f = &mut self.filters[d];
                            let ix1 = in_act.index(ox, oy, 0);
                            let ix2 = f.index(fx, fy, 0);
                            for fd in 0..f.depth() {
                                f.dw[ix2 + fd] += in_act.w[ix1 + fd] * chain_grad;
                                in_act.dw[ix1 + fd] += f.w[ix2 + fd] * chain_grad;
                            }
                        }
                    }

                    self.biases.dw[d] += chain_grad;
                }
            }
        }
    }

    fn out_shape(&self) -> Shape {
        self.out_shape
    }

    fn params_and_grads(&mut self) -> Vec<LayerDetails<'_>> {
        filter_details(
            &mut self.filters,
            &mut self.biases,
            self.l1_decay_mul,
            self.l2_decay_mul,
        )
    }
}

/// Transposed convolution. Every input position is scaled by the filters and
/// added into a `sx × sy` window of the output, windows placed `stride` apart
/// and shifted by `-padding`. Output side is `(in - 1) * stride + sx - 2 * padding`.
#[derive(serde::Serialize, serde::Deserialize)]
pub struct ConvTransposeLayer {
    sx: usize,
    sy: usize,
    stride: usize,
    padding: usize,
    l1_decay_mul: Float,
    l2_decay_mul: Float,

    out_shape: Shape,

    // one filter per output channel, each spanning the input depth
    filters: Vec<Vol>,
    biases: Vol,
}

impl ConvTransposeLayer {
    pub fn builder(filters: usize, sx: usize, input: Shape) -> ConvTransposeLayerBuilder {
        ConvTransposeLayerBuilder {
            out_depth: filters,
            sx,
            input,
            stride: 1,
            padding: 0,
        }
    }

    fn target(&self, a: usize, f: usize, extent: usize) -> Option<usize> {
        let o = (a * self.stride + f) as isize - self.padding as isize;
        (o >= 0 && (o as usize) < extent).then_some(o as usize)
    }
}

pub struct ConvTransposeLayerBuilder {
    out_depth: usize,
    sx: usize,
    input: Shape,

    stride: usize,
    padding: usize,
}

impl ConvTransposeLayerBuilder {
    /// default: 1
    pub fn stride(mut self, value: usize) -> Self {
        self.stride = value;
        self
    }

    /// default: 0
    pub fn padding(mut self, value: usize) -> Self {
        self.padding = value;
        self
    }

    pub fn build(self) -> ConvTransposeLayer {
        assert!(self.stride > 0, "stride must be positive");
        assert!(
            self.input.sx > 0 && self.input.sy > 0,
            "input volume must not be empty"
        );

        let span = |extent: usize| (extent - 1) * self.stride + self.sx;
        assert!(
            span(self.input.sx) > self.padding * 2 && span(self.input.sy) > self.padding * 2,
            "padding removes the whole output"
        );

        let out_shape = Shape::new(
            span(self.input.sx) - self.padding * 2,
            span(self.input.sy) - self.padding * 2,
            self.out_depth,
        );
        let filters = (0..self.out_depth)
            .map(|_| Vol::new(self.sx, self.sx, self.input.depth))
            .collect();

        ConvTransposeLayer {
            sx: self.sx,
            sy: self.sx,
            stride: self.stride,
            padding: self.padding,
            l1_decay_mul: 0.0,
            l2_decay_mul: 1.0,
            out_shape,
            filters,
            biases: Vol::with_constant(1, 1, self.out_depth, 0.0),
        }
    }
}

#[typetag::serde]
impl NetLayer for ConvTransposeLayer {
    fn forward(&mut self, in_act: &Vol, out_act: &mut Vol, _is_training: bool) {
        debug_assert_eq!(out_act.shape(), self.out_shape);

        // start every output from its channel bias, then scatter
        for (i, out) in out_act.w.iter_mut().enumerate() {
            *out = self.biases.w[i % self.out_shape.depth];
        }

        for iy in 0..in_act.sy() {
            for ix in 0..in_act.sx() {
                let v_index = in_act.index(ix, iy, 0);
                for fy in 0..self.sy {
                    let Some(oy) = self.target(iy, fy, self.out_shape.sy) else {
                        continue;
                    };
                    for fx in 0..self.sx {
                        let Some(ox) = self.target(ix, fx, self.out_shape.sx) else {
                            continue;
                        };
                        for (d, f) in self.filters.iter().enumerate() {
                            let f_index = f.index(fx, fy, 0);
                            let mut a = 0.0;
                            for fd in 0..f.depth() {
                                a += f.w[f_index + fd] * in_act.w[v_index + fd];
                            }
                            out_act.add(ox, oy, d, a);
                        }
                    }
                }
            }
        }
    }

    fn backward(&mut self, in_act: &mut Vol, out_act: &Vol) {
        in_act.zero_gradients();

        for iy in 0..in_act.sy() {
            for ix in 0..in_act.sx() {
                let v_index = in_act.index(ix, iy, 0);
                for fy in 0..self.sy {
                    let Some(oy) = self.target(iy, fy, self.out_shape.sy) else {
                        continue;
                    };
                    for fx in 0..self.sx {
                        let Some(ox) = self.target(ix, fx, self.out_shape.sx) else {
                            continue;
                        };
                        for (d, f) in self.filters.iter_mut().enumerate() {
                            let chain_grad = out_act.get_gradient(ox, oy, d);
                            let f_index = f.index(fx, fy, 0);
                            for fd in 0..f.depth() {
                                f.dw[f_index + fd] += in_act.w[v_index + fd] * chain_grad;
                                in_act.dw[v_index + fd] += f.w[f_index + fd] * chain_grad;
                            }
                        }
                    }
                }
            }
        }

        for (i, grad) in out_act.dw.iter().enumerate() {
            self.biases.dw[i % self.out_shape.depth] += grad;
        }
    }

    fn out_shape(&self) -> Shape {
        self.out_shape
    }

    fn params_and_grads(&mut self) -> Vec<LayerDetails<'_>> {
        filter_details(
            &mut self.filters,
            &mut self.biases,
            self.l1_decay_mul,
            self.l2_decay_mul,
        )
    }
}

#[derive(serde::Serialize, serde::Deserialize)]
pub struct FullyConnLayer {
    l1_decay_mul: Float,
    l2_decay_mul: Float,

    num_inputs: usize,
    out_depth: usize,

    filters: Vec<Vol>,
    biases: Vol,
}

impl FullyConnLayer {
    pub fn builder(num_neurons: usize, input: Shape) -> FullyConnLayerBuilder {
        FullyConnLayerBuilder::new(num_neurons, input)
    }
}

#[typetag::serde]
impl NetLayer for FullyConnLayer {
    fn forward(&mut self, in_act: &Vol, out_act: &mut Vol, _is_training: bool) {
        debug_assert_eq!(in_act.len(), self.num_inputs);
        debug_assert_eq!(out_act.shape(), self.out_shape());

        for (i, filter) in self.filters.iter().enumerate() {
            let dot: Float = in_act
                .w
                .iter()
                .zip(&filter.w)
                .map(|(x, w)| x * w)
                .sum();
            out_act.w[i] = dot + self.biases.w[i];
        }
    }

    fn backward(&mut self, in_act: &mut Vol, out_act: &Vol) {
        in_act.zero_gradients();

        // compute gradient wrt weights and data
        for (i, filter) in self.filters.iter_mut().enumerate() {
            let chain_grad = out_act.dw[i];
            for d in 0..self.num_inputs {
                in_act.dw[d] += filter.w[d] * chain_grad; // grad wrt input data
                filter.dw[d] += in_act.w[d] * chain_grad; // grad wrt params
            }
            self.biases.dw[i] += chain_grad;
        }
    }

    fn out_shape(&self) -> Shape {
        Shape::new(1, 1, self.out_depth)
    }

    fn params_and_grads(&mut self) -> Vec<LayerDetails<'_>> {
        filter_details(
            &mut self.filters,
            &mut self.biases,
            self.l1_decay_mul,
            self.l2_decay_mul,
        )
    }
}

pub struct FullyConnLayerBuilder {
    out_depth: usize,
    num_inputs: usize,
}

impl FullyConnLayerBuilder {
    fn new(num_neurons: usize, input: Shape) -> Self {
        Self {
            out_depth: num_neurons,
            num_inputs: input.len(),
        }
    }

    pub fn build(self) -> FullyConnLayer {
        let filters = (0..self.out_depth)
            .map(|_| Vol::new(1, 1, self.num_inputs))
            .collect();

        FullyConnLayer {
            l1_decay_mul: 0.0,
            l2_decay_mul: 1.0,
            num_inputs: self.num_inputs,
            out_depth: self.out_depth,
            filters,
            biases: Vol::with_constant(1, 1, self.out_depth, 0.0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layers::gradient_check::check_input_gradient;

    fn ramp(shape: Shape) -> Vol {
        let values = (0..shape.len())
            .map(|i| ((i * 37 % 11) as Float - 5.0) * 0.1)
            .collect();
        Vol::with_values(shape, values)
    }

    #[test]
    fn conv_output_shape_follows_stride_and_padding() {
        let layer = ConvLayer::builder(16, 4, Shape::new(32, 32, 1)).build();
        assert_eq!(layer.out_shape(), Shape::new(29, 29, 16));

        let layer = ConvLayer::builder(32, 4, Shape::new(32, 32, 1))
            .stride(2)
            .padding(1)
            .build();
        assert_eq!(layer.out_shape(), Shape::new(16, 16, 32));
    }

    #[test]
    fn conv_transpose_inverts_conv_shapes() {
        let layer = ConvTransposeLayer::builder(16, 4, Shape::new(26, 26, 16)).build();
        assert_eq!(layer.out_shape(), Shape::new(29, 29, 16));

        let layer = ConvTransposeLayer::builder(32, 4, Shape::new(8, 8, 1))
            .stride(2)
            .padding(1)
            .build();
        assert_eq!(layer.out_shape(), Shape::new(16, 16, 32));
    }

    #[test]
    fn conv_transpose_scatters_single_input() {
        let mut layer = ConvTransposeLayer::builder(1, 2, Shape::new(2, 1, 1))
            .stride(2)
            .build();
        layer.filters[0].w = vec![1.0, 2.0, 3.0, 4.0];

        let input = Vol::with_values(Shape::new(2, 1, 1), vec![1.0, 10.0]);
        let mut out = Vol::zeros_like(layer.out_shape());
        layer.forward(&input, &mut out, false);

        assert_eq!(out.shape(), Shape::new(4, 2, 1));
        // row 0: taps (0,0),(1,0) of both inputs, row 1: taps (0,1),(1,1)
        assert_eq!(out.w, vec![1.0, 2.0, 10.0, 20.0, 3.0, 4.0, 30.0, 40.0]);
    }

    #[test]
    fn conv_gradient_matches_numeric() {
        let input_shape = Shape::new(5, 5, 2);
        let mut layer = ConvLayer::builder(3, 3, input_shape)
            .stride(2)
            .padding(1)
            .build();
        layer.biases.w.fill(0.1);
        check_input_gradient(&mut layer, &ramp(input_shape), 0.5);
    }

    #[test]
    fn conv_transpose_gradient_matches_numeric() {
        let input_shape = Shape::new(3, 3, 2);
        let mut layer = ConvTransposeLayer::builder(2, 4, input_shape)
            .stride(2)
            .padding(1)
            .build();
        check_input_gradient(&mut layer, &ramp(input_shape), 0.5);
    }

    #[test]
    fn dense_gradient_matches_numeric() {
        let input_shape = Shape::new(2, 2, 3);
        let mut layer = FullyConnLayer::builder(4, input_shape).build();
        layer.biases.w.fill(0.1);
        check_input_gradient(&mut layer, &ramp(input_shape), 0.5);
    }

    #[test]
    fn conv_bias_gradient_sums_output_gradient() {
        let input_shape = Shape::new(3, 3, 1);
        let mut layer = ConvLayer::builder(2, 2, input_shape).build();
        let input = ramp(input_shape);
        let mut out = Vol::zeros_like(layer.out_shape());
        layer.forward(&input, &mut out, true);
        out.dw.fill(1.0);

        let mut x = input.clone();
        layer.backward(&mut x, &out);
        // 2x2 outputs per channel
        assert_eq!(layer.biases.dw, vec![4.0, 4.0]);
    }
}
