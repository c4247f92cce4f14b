mod serde;

use crate::{utils::randn, Float};

/// Width, height and depth of a [`Vol`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, ::serde::Serialize, ::serde::Deserialize)]
pub struct Shape {
    pub sx: usize,
    pub sy: usize,
    pub depth: usize,
}

impl Shape {
    pub const fn new(sx: usize, sy: usize, depth: usize) -> Self {
        Self { sx, sy, depth }
    }

    pub const fn len(&self) -> usize {
        self.sx * self.sy * self.depth
    }

    pub const fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// Vol is the basic building block of all data in a net.
// it is essentially just a 3D volume of numbers, with a
// width (sx), height (sy), and depth (depth).
// it is used to hold data for all filters, all volumes,
// all weights, and also stores all gradients w.r.t.
// the data.
#[derive(Debug, Clone, PartialEq, ::serde::Serialize, ::serde::Deserialize)]
#[serde(try_from = "serde::VolRepr")]
pub struct Vol {
    sx: usize,
    sy: usize,
    depth: usize,

    pub w: Vec<Float>,

    #[serde(skip_serializing)]
    pub dw: Vec<Float>,
}

impl From<Vec<Float>> for Vol {
    fn from(value: Vec<Float>) -> Self {
        let depth = value.len();
        Self::with_values(Shape::new(1, 1, depth), value)
    }
}

impl From<&[Float]> for Vol {
    fn from(value: &[Float]) -> Self {
        Self::from(value.to_vec())
    }
}

impl Vol {
    /// Random volume, used for weights.
    pub fn new(sx: usize, sy: usize, depth: usize) -> Self {
        let n = sx * sy * depth;

        // weight normalization is done to equalize the output
        // variance of every neuron, otherwise neurons with a lot
        // of incoming connections have outputs of larger variance
        let scale = (1.0 / (n as Float)).sqrt();
        let w = (0..n).map(|_| randn(0.0, scale)).collect();

        Self {
            sx,
            sy,
            depth,
            w,
            dw: vec![0.0; n],
        }
    }

    pub fn with_constant(sx: usize, sy: usize, depth: usize, constant: Float) -> Self {
        let n = sx * sy * depth;
        Self {
            sx,
            sy,
            depth,
            w: vec![constant; n],
            dw: vec![0.0; n],
        }
    }

    pub fn zeros(sx: usize, sy: usize, depth: usize) -> Self {
        Self::with_constant(sx, sy, depth, 0.0)
    }

    pub fn zeros_like(shape: Shape) -> Self {
        Self::zeros(shape.sx, shape.sy, shape.depth)
    }

    /// Wraps existing values. Panics when `w` does not fill `shape`.
    pub fn with_values(shape: Shape, w: Vec<Float>) -> Self {
        assert_eq!(shape.len(), w.len(), "values must fill the volume");
        let n = w.len();
        Self {
            sx: shape.sx,
            sy: shape.sy,
            depth: shape.depth,
            w,
            dw: vec![0.0; n],
        }
    }

    pub(crate) fn index(&self, x: usize, y: usize, d: usize) -> usize {
        ((self.sx * y) + x) * self.depth + d
    }

    pub fn get(&self, x: usize, y: usize, d: usize) -> Float {
        self.w[self.index(x, y, d)]
    }

    pub fn set(&mut self, x: usize, y: usize, d: usize, value: Float) {
        let index = self.index(x, y, d);
        self.w[index] = value
    }

    pub fn add(&mut self, x: usize, y: usize, d: usize, value: Float) {
        let index = self.index(x, y, d);
        self.w[index] += value
    }

    pub fn get_gradient(&self, x: usize, y: usize, d: usize) -> Float {
        self.dw[self.index(x, y, d)]
    }

    pub fn add_gradient(&mut self, x: usize, y: usize, d: usize, value: Float) {
        let index = self.index(x, y, d);
        self.dw[index] += value
    }

    pub fn zero_gradients(&mut self) {
        self.dw.fill(0.0);
    }

    pub fn shape(&self) -> Shape {
        Shape::new(self.sx, self.sy, self.depth)
    }

    pub fn len(&self) -> usize {
        self.w.len()
    }

    pub fn is_empty(&self) -> bool {
        self.w.is_empty()
    }

    pub fn sx(&self) -> usize {
        self.sx
    }
    pub fn sy(&self) -> usize {
        self.sy
    }
    pub fn depth(&self) -> usize {
        self.depth
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn index_is_depth_fastest() {
        let mut vol = Vol::zeros(3, 2, 2);
        vol.set(1, 1, 1, 5.0);
        assert_eq!(vol.w[((3 * 1) + 1) * 2 + 1], 5.0);
        assert_eq!(vol.get(1, 1, 1), 5.0);
    }

    #[test]
    fn random_volume_has_zero_gradients() {
        let vol = Vol::new(4, 4, 3);
        assert_eq!(vol.len(), 48);
        assert!(vol.dw.iter().all(|g| *g == 0.0));
    }

    #[test]
    fn serialization_skips_gradients() {
        let mut vol = Vol::with_values(Shape::new(2, 1, 1), vec![1.5, -2.0]);
        vol.dw[0] = 9.0;

        let json = serde_json::to_string(&vol).unwrap();
        assert!(!json.contains("dw"));

        let back: Vol = serde_json::from_str(&json).unwrap();
        assert_eq!(back.w, vol.w);
        assert_eq!(back.dw, vec![0.0, 0.0]);

        let bytes = bincode::serialize(&vol).unwrap();
        let back: Vol = bincode::deserialize(&bytes).unwrap();
        assert_eq!(back.shape(), vol.shape());
    }

    #[test]
    fn deserialization_rejects_short_weights() {
        let json = r#"{"sx":2,"sy":2,"depth":1,"w":[1.0]}"#;
        assert!(serde_json::from_str::<Vol>(json).is_err());
    }
}
