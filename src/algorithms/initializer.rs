use ndarray::Array2;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Upper bound of the initial factor values: `sqrt(10 / K)`.
///
/// Keeps early dot products around the middle of the rating scale and
/// never negative.
pub fn factor_init_bound(factors: usize) -> f64 {
    (10.0 / factors as f64).sqrt()
}

pub fn rng_from_seed(seed: Option<u64>) -> StdRng {
    match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    }
}

pub fn bounded_uniform<R: Rng>(rng: &mut R, rows: usize, factors: usize) -> Array2<f64> {
    let high = factor_init_bound(factors);
    Array2::from_shape_simple_fn((rows, factors), || rng.gen_range(0.0..high))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bounded_uniform_range() {
        let mut rng = rng_from_seed(Some(7));
        let matrix = bounded_uniform(&mut rng, 50, 20);
        let high = factor_init_bound(20);

        assert_eq!(matrix.dim(), (50, 20));
        assert!(matrix.iter().all(|&v| (0.0..high).contains(&v)));
    }

    #[test]
    fn test_seeded_initialization_is_reproducible() {
        let a = bounded_uniform(&mut rng_from_seed(Some(42)), 4, 8);
        let b = bounded_uniform(&mut rng_from_seed(Some(42)), 4, 8);
        assert_eq!(a, b);
    }
}
