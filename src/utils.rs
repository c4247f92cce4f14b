use std::cell::RefCell;

use rand::{rngs::StdRng, Rng, SeedableRng};
use rand_distr::{Distribution, StandardNormal, Uniform};

use crate::Float;

thread_local! {
    static RNG: RefCell<StdRng> = RefCell::new(StdRng::from_entropy());
}

/// Reseeds the generator of the calling thread.
///
/// Weight initialisation, subsampling and minibatch draws all go through this
/// generator, so a worker that reseeds with its rank is reproducible.
pub fn reseed(seed: u64) {
    RNG.with(|rng| *rng.borrow_mut() = StdRng::seed_from_u64(seed));
}

pub fn with_rng<R>(f: impl FnOnce(&mut StdRng) -> R) -> R {
    RNG.with(|rng| f(&mut rng.borrow_mut()))
}

pub fn gauss_random() -> Float {
    with_rng(|rng| rng.sample(StandardNormal))
}

pub fn randn(mu: Float, std: Float) -> Float {
    mu + gauss_random() * std
}

// uniform in [a, b), a < b
pub fn randi(a: usize, b: usize) -> usize {
    let uniform = Uniform::new(a, b);
    with_rng(|rng| uniform.sample(rng))
}

pub fn zeros(n: usize) -> Vec<Float> {
    vec![0.0; n]
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MinMax {
    pub min_value: Float,
    pub min_index: usize,
    pub max_value: Float,
    pub max_index: usize,
}

// return max and min of a given non-empty array.
pub fn maxmin(values: &[Float]) -> Option<MinMax> {
    let (&first, rest) = values.split_first()?;

    let mut result = MinMax {
        min_value: first,
        min_index: 0,
        max_value: first,
        max_index: 0,
    };
    for (i, value) in rest.iter().copied().enumerate() {
        if value > result.max_value {
            result.max_value = value;
            result.max_index = i + 1;
        }
        if value < result.min_value {
            result.min_value = value;
            result.min_index = i + 1;
        }
    }
    Some(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maxmin_finds_extremes() {
        let found = maxmin(&[0.5, -2.0, 3.0, 1.0]).unwrap();
        assert_eq!(found.min_index, 1);
        assert_eq!(found.max_index, 2);
        assert_eq!(found.min_value, -2.0);
        assert_eq!(found.max_value, 3.0);

        assert!(maxmin(&[]).is_none());
    }

    #[test]
    fn reseeding_repeats_draws() {
        reseed(7);
        let first: Vec<usize> = (0..16).map(|_| randi(0, 1000)).collect();
        reseed(7);
        let second: Vec<usize> = (0..16).map(|_| randi(0, 1000)).collect();
        assert_eq!(first, second);
    }
}
