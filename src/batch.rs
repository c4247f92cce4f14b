use crate::utils::randi;

/// Fraction of a subsample used for training, the rest is held out.
pub const TRAIN_FRACTION: f64 = 0.8;

#[derive(Debug, Clone, PartialEq)]
pub struct Split<T> {
    pub train: Vec<T>,
    pub test: Vec<T>,
}

/// Splits at `floor(len * fraction)`, order preserved.
pub fn split<T>(mut items: Vec<T>, fraction: f64) -> Split<T> {
    let at = ((items.len() as f64) * fraction).floor() as usize;
    let test = items.split_off(at.min(items.len()));
    Split { train: items, test }
}

/// How many times a training split of `train_len` rows must be repeated to
/// reach the training share of `reference_size`. Zero rows never blow up.
pub fn blow_up_factor(reference_size: usize, train_len: usize) -> usize {
    if train_len == 0 {
        return 1;
    }
    let wanted = (reference_size as f64 * TRAIN_FRACTION).floor() as usize;
    (wanted / train_len).max(1)
}

/// Repeats `items` `factor` times; row `i` of the result is row
/// `i % items.len()` of the input.
pub fn blow_up<T: Clone>(items: &[T], factor: usize) -> Vec<T> {
    if factor <= 1 {
        return items.to_vec();
    }
    let mut out = Vec::with_capacity(items.len() * factor);
    for _ in 0..factor {
        out.extend_from_slice(items);
    }
    out
}

/// `count` indices into `0..population`, drawn uniformly with replacement.
pub fn sample_with_replacement(population: usize, count: usize) -> Vec<usize> {
    if population == 0 {
        return Vec::new();
    }
    (0..count).map(|_| randi(0, population)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::reseed;

    #[test]
    fn split_floors_the_train_share() {
        let parts = split((0..10).collect::<Vec<_>>(), TRAIN_FRACTION);
        assert_eq!(parts.train, (0..8).collect::<Vec<_>>());
        assert_eq!(parts.test, vec![8, 9]);

        let parts = split(vec![1, 2, 3], TRAIN_FRACTION);
        assert_eq!(parts.train.len(), 2);
        assert_eq!(parts.test.len(), 1);

        let parts = split(vec![1], TRAIN_FRACTION);
        assert!(parts.train.is_empty());
        assert_eq!(parts.test, vec![1]);
    }

    #[test]
    fn factor_reaches_reference_train_share() {
        assert_eq!(blow_up_factor(10000, 8), 1000);
        assert_eq!(blow_up_factor(10000, 8000), 1);
        assert_eq!(blow_up_factor(10, 8), 1);
        assert_eq!(blow_up_factor(100, 30), 2);
        assert_eq!(blow_up_factor(100, 0), 1);
    }

    #[test]
    fn blow_up_keeps_feature_label_pairs() {
        let features = vec![10, 20, 30];
        let labels = vec![1, 2, 3];
        let factor = 4;

        let big_features = blow_up(&features, factor);
        let big_labels = blow_up(&labels, factor);

        assert_eq!(big_features.len(), 12);
        assert_eq!(big_labels.len(), 12);
        for i in 0..big_features.len() {
            assert_eq!(big_features[i], features[i % 3]);
            assert_eq!(big_labels[i], labels[i % 3]);
            assert_eq!(big_features[i] / 10, big_labels[i]);
        }
    }

    #[test]
    fn factor_of_one_is_identity() {
        assert_eq!(blow_up(&[1, 2], 1), vec![1, 2]);
        assert_eq!(blow_up(&[1, 2], 0), vec![1, 2]);
    }

    #[test]
    fn sampling_stays_in_range_and_repeats_with_seed() {
        reseed(11);
        let first = sample_with_replacement(7, 50);
        assert_eq!(first.len(), 50);
        assert!(first.iter().all(|i| *i < 7));

        reseed(11);
        assert_eq!(sample_with_replacement(7, 50), first);
        assert!(sample_with_replacement(0, 5).is_empty());
    }
}
