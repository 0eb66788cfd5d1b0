use std::ops::RangeInclusive;

use rand::Rng;
use thiserror::Error;

/// Diversity values that usually give readable output.
///
/// This is a hint for callers; any finite positive diversity is accepted.
pub const DIVERSITY_SUGGESTED: RangeInclusive<f64> = 0.2..=1.5;

#[derive(Error, Debug, PartialEq)]
pub enum SamplingError {
	#[error("Invalid diversity: {0} (must be a finite number > 0)")]
	InvalidDiversity(f64),
	#[error("Invalid probability {value} at index {index}")]
	InvalidProbability { index: usize, value: f64 },
	#[error("Empty distribution")]
	EmptyDistribution,
}

/// Checks that a diversity (temperature) can be used for sampling.
pub fn check_diversity(diversity: f64) -> Result<(), SamplingError> {
	if !diversity.is_finite() || diversity <= 0.0 {
		return Err(SamplingError::InvalidDiversity(diversity));
	}
	Ok(())
}

/// Reshapes a distribution by a diversity (temperature).
///
/// Every probability is raised to the power `1 / diversity`, then the result
/// is renormalized to sum to 1. A diversity below 1 sharpens the
/// distribution, above 1 flattens it, and exactly 1 leaves it unchanged.
///
/// The power is computed in log space, shifted by the maximum, so that small
/// diversities do not underflow every entry to zero.
///
/// # Errors
/// - `InvalidDiversity` if `diversity` is not a finite number > 0
/// - `InvalidProbability` if an entry is negative or not a number
/// - `EmptyDistribution` if there is no entry with a positive probability
pub fn rescale(probabilities: &[f64], diversity: f64) -> Result<Vec<f64>, SamplingError> {
	check_diversity(diversity)?;

	if let Some((index, &value)) = probabilities
		.iter()
		.enumerate()
		.find(|(_, p)| !p.is_finite() || **p < 0.0)
	{
		return Err(SamplingError::InvalidProbability { index, value });
	}

	let logits: Vec<f64> = probabilities.iter().map(|p| p.ln() / diversity).collect();
	let max_logit = logits.iter().copied().fold(f64::NEG_INFINITY, f64::max);
	if max_logit == f64::NEG_INFINITY {
		return Err(SamplingError::EmptyDistribution);
	}

	let weights: Vec<f64> = logits.iter().map(|logit| (logit - max_logit).exp()).collect();
	let sum: f64 = weights.iter().sum();

	Ok(weights.into_iter().map(|w| w / sum).collect())
}

/// Draws one index from a distribution reshaped by `diversity`.
///
/// This is a single categorical trial over the rescaled distribution, never
/// the argmax: lower-probability tokens keep a chance of being picked.
///
/// Selection walks the cumulative distribution with one uniform draw in
/// `[0, 1)`. Entries with zero probability can never be returned.
pub fn sample<R: Rng + ?Sized>(probabilities: &[f64], diversity: f64, rng: &mut R) -> Result<usize, SamplingError> {
	let rescaled = rescale(probabilities, diversity)?;

	let mut r: f64 = rng.random();
	let mut fallback: Option<usize> = None;
	for (index, &probability) in rescaled.iter().enumerate() {
		if probability <= 0.0 {
			continue;
		}
		if r < probability {
			return Ok(index);
		}
		r -= probability;
		fallback = Some(index);
	}

	// Rounding can leave r just above the last bucket
	fallback.ok_or(SamplingError::EmptyDistribution)
}

#[cfg(test)]
mod tests {
	use super::*;
	use rand::SeedableRng;
	use rand::rngs::StdRng;

	fn assert_close(a: &[f64], b: &[f64]) {
		assert_eq!(a.len(), b.len());
		for (x, y) in a.iter().zip(b) {
			assert!((x - y).abs() < 1e-9, "{a:?} != {b:?}");
		}
	}

	#[test]
	fn unit_diversity_keeps_distribution() {
		assert_close(&rescale(&[0.1, 0.2, 0.7], 1.0).unwrap(), &[0.1, 0.2, 0.7]);
	}

	#[test]
	fn rescale_renormalizes() {
		assert_close(&rescale(&[2.0, 6.0], 1.0).unwrap(), &[0.25, 0.75]);
	}

	#[test]
	fn low_diversity_sharpens() {
		// 0.25^2 = 0.0625, 0.75^2 = 0.5625
		assert_close(&rescale(&[0.25, 0.75], 0.5).unwrap(), &[0.1, 0.9]);
	}

	#[test]
	fn high_diversity_flattens() {
		let flat = rescale(&[0.1, 0.9], 4.0).unwrap();
		assert!(flat[0] > 0.1 && flat[1] < 0.9);
	}

	#[test]
	fn tiny_diversity_does_not_underflow() {
		let sharp = rescale(&[1e-5, 2e-5, 3e-5], 0.01).unwrap();
		assert!((sharp.iter().sum::<f64>() - 1.0).abs() < 1e-9);
		assert!(sharp[2] > 0.99);
	}

	#[test]
	fn invalid_diversity_fails() {
		for diversity in [0.0, -1.0, f64::NAN, f64::INFINITY] {
			assert!(matches!(rescale(&[1.0], diversity), Err(SamplingError::InvalidDiversity(_))));
		}
		assert!(check_diversity(3.0).is_ok());
		assert!(!DIVERSITY_SUGGESTED.contains(&3.0));
	}

	#[test]
	fn invalid_distributions_fail() {
		assert_eq!(rescale(&[], 1.0), Err(SamplingError::EmptyDistribution));
		assert_eq!(rescale(&[0.0, 0.0], 1.0), Err(SamplingError::EmptyDistribution));
		assert_eq!(
			rescale(&[0.5, -0.5], 1.0),
			Err(SamplingError::InvalidProbability { index: 1, value: -0.5 })
		);
	}

	#[test]
	fn degenerate_distribution_always_wins() {
		let mut rng = StdRng::seed_from_u64(7);
		for _ in 0..1000 {
			assert_eq!(sample(&[0.0, 0.0, 1.0, 0.0], 1.0, &mut rng).unwrap(), 2);
		}
	}

	#[test]
	fn sampling_is_not_argmax() {
		let mut rng = StdRng::seed_from_u64(42);
		let mut counts = [0usize; 2];
		for _ in 0..10_000 {
			counts[sample(&[0.3, 0.7], 1.0, &mut rng).unwrap()] += 1;
		}
		// Expected 3000 / 7000
		assert!(counts[0] > 2500 && counts[0] < 3500, "{counts:?}");
	}

	#[test]
	fn sampling_is_reproducible_with_a_seed() {
		let draw = |seed| {
			let mut rng = StdRng::seed_from_u64(seed);
			(0..50).map(|_| sample(&[0.2, 0.3, 0.5], 0.8, &mut rng).unwrap()).collect::<Vec<_>>()
		};
		assert_eq!(draw(3), draw(3));
	}
}
