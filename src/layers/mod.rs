mod conv_layer;
mod input_layer;
mod loss_layer;
mod nonlinear_layer;
mod reshape_layer;

pub use conv_layer::*;
pub use input_layer::*;
pub use loss_layer::*;
pub use nonlinear_layer::*;
pub use reshape_layer::*;

use crate::{
    vol::{Shape, Vol},
    Float,
};

/// A layer of a [`Sequential`](crate::Sequential) stack.
///
/// `forward` fills `out_act` from `in_act`. `backward` reads the gradient
/// stored in `out_act.dw`, accumulates parameter gradients and overwrites
/// `in_act.dw` with the gradient wrt the layer input.
#[typetag::serde]
pub trait NetLayer {
    fn forward(&mut self, in_act: &Vol, out_act: &mut Vol, is_training: bool);
    fn backward(&mut self, in_act: &mut Vol, out_act: &Vol);
    fn params_and_grads(&mut self) -> Vec<LayerDetails<'_>>;

    fn out_shape(&self) -> Shape;
}

/// Loss layer closing a classifier [`Net`](crate::Net).
pub trait FinalLayer {
    fn forward(&mut self, in_act: &Vol, out_act: &mut Vol);
    /// Writes the gradient wrt `in_act` and returns the loss for class `y`.
    fn backward(&mut self, y: usize, in_act: &mut Vol) -> Float;
    /// Loss for class `y` given the last forward pass.
    fn loss(&self, y: usize, in_act: &Vol) -> Float;

    fn out_shape(&self) -> Shape;
}

#[derive(Debug)]
pub struct LayerDetails<'a> {
    pub params: &'a mut [Float],
    pub grads: &'a mut [Float],
    pub l1_decay_mul: Float,
    pub l2_decay_mul: Float,
}
