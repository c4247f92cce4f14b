use crate::vol::{Shape, Vol};

use super::{LayerDetails, NetLayer};

#[derive(serde::Serialize, serde::Deserialize)]
pub struct InputLayer {
    shape: Shape,
}

impl InputLayer {
    pub fn with_dimensions(depth: usize, width: usize, height: usize) -> Self {
        Self {
            shape: Shape::new(width, height, depth),
        }
    }
}

#[typetag::serde]
impl NetLayer for InputLayer {
    fn forward(&mut self, in_act: &Vol, out_act: &mut Vol, _is_training: bool) {
        assert_eq!(
            in_act.len(),
            self.shape.len(),
            "input does not match the declared input shape"
        );
        out_act.w.copy_from_slice(&in_act.w);
    }

    fn backward(&mut self, in_act: &mut Vol, out_act: &Vol) {
        debug_assert_eq!(out_act.w.len(), in_act.w.len());
        in_act.dw.copy_from_slice(&out_act.dw);
    }

    fn out_shape(&self) -> Shape {
        self.shape
    }

    fn params_and_grads(&mut self) -> Vec<LayerDetails<'_>> {
        Vec::new()
    }
}
