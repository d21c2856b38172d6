//! Hold-out splitting

use forestcarb_core::{Error, Result};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

/// Shuffle `0..n` with `seed` and split it into (train, test) index sets.
///
/// The test set holds `round(n * test_fraction)` indices, at least one and
/// leaving at least one for training. Both sets are returned sorted.
pub fn train_test_split(n: usize, test_fraction: f64, seed: u64) -> Result<(Vec<usize>, Vec<usize>)> {
    if !(test_fraction > 0.0 && test_fraction < 1.0) {
        return Err(Error::InvalidParameter {
            name: "test_fraction",
            value: test_fraction.to_string(),
            reason: "must be in (0, 1)".into(),
        });
    }
    if n < 2 {
        return Err(Error::InvalidParameter {
            name: "n",
            value: n.to_string(),
            reason: "need at least two samples to split".into(),
        });
    }

    let n_test = ((n as f64 * test_fraction).round() as usize).clamp(1, n - 1);
    let mut indices: Vec<usize> = (0..n).collect();
    indices.shuffle(&mut ChaCha8Rng::seed_from_u64(seed));

    let mut test = indices[..n_test].to_vec();
    let mut train = indices[n_test..].to_vec();
    test.sort_unstable();
    train.sort_unstable();
    Ok((train, test))
}
