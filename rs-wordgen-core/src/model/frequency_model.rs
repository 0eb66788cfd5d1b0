use std::collections::HashMap;
use std::thread;

use log::debug;
use ndarray::s;
use serde::{Deserialize, Serialize};

use super::state::State;
use super::{EpochReport, ModelError, SequenceModel, hot_indices};
use crate::vectorizer::{TargetTensor, WindowTensor};

/// Hyper-parameters of a `FrequencyModel`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FrequencyConfig {
	/// Number of trailing window tokens used as context (1..=window length).
	pub order: usize,
	/// Additive smoothing applied to every transition count (> 0).
	pub alpha: f64,
}

impl Default for FrequencyConfig {
	fn default() -> Self {
		Self { order: 2, alpha: 1.0 }
	}
}

/// A decoded training sample: context suffix and continuation index.
type Observation = (Vec<usize>, usize);

/// Word-transition frequency model.
///
/// Predicts the next token from the last `order` tokens of a window. Counts
/// are kept for every suffix length from `order` down to 0 (the empty
/// suffix being the unigram distribution), and prediction backs off to the
/// longest suffix seen during training.
///
/// # Responsibilities
/// - Count context → continuation transitions from one-hot tensors
/// - Produce a smoothed distribution over the full vocabulary
/// - Report the training loss after every epoch
///
/// # Invariants
/// - `1 <= order <= window_length`
/// - `alpha > 0`, so every predicted probability is strictly positive
/// - Every key in `states` has a length in `0..=order`
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct FrequencyModel {
	vocabulary_size: usize,
	window_length: usize,
	order: usize,
	alpha: f64,
	epochs: usize,
	/// Mapping from a suffix to its corresponding state
	states: HashMap<Vec<usize>, State>,
}

impl FrequencyModel {
	/// Creates an untrained model.
	///
	/// An untrained model predicts the uniform distribution.
	///
	/// # Errors
	/// Returns an error if the vocabulary is empty, the order is outside
	/// `1..=window_length` or `alpha` is not a finite number > 0.
	pub fn new(vocabulary_size: usize, window_length: usize, config: FrequencyConfig) -> Result<Self, ModelError> {
		check_config(vocabulary_size, window_length, &config)?;

		Ok(Self {
			vocabulary_size,
			window_length,
			order: config.order,
			alpha: config.alpha,
			epochs: 0,
			states: HashMap::new(),
		})
	}

	/// Re-checks the invariants `new` enforces, for models read from disk.
	///
	/// # Errors
	/// Returns a `Config` error if the vocabulary is empty, the order is not
	/// in `1..=window_length` or alpha is not a positive number.
	pub fn validate(&self) -> Result<(), ModelError> {
		check_config(self.vocabulary_size, self.window_length, &self.config())
	}

	#[cfg(test)]
	pub(crate) fn set_order_unchecked(&mut self, order: usize) {
		self.order = order;
	}

	/// Hyper-parameters the model was built with.
	pub fn config(&self) -> FrequencyConfig {
		FrequencyConfig { order: self.order, alpha: self.alpha }
	}

	pub fn window_length(&self) -> usize {
		self.window_length
	}

	pub fn order(&self) -> usize {
		self.order
	}

	pub fn alpha(&self) -> f64 {
		self.alpha
	}

	/// Returns the state of the longest trained suffix of `context`.
	fn backoff(&self, context: &[usize]) -> Option<&State> {
		(0..=context.len())
			.filter_map(|start| self.states.get(&context[start..]))
			.find(|state| state.total() > 0)
	}

	/// Smoothed probability of `next` following `context`.
	fn probability(&self, context: &[usize], next: usize) -> f64 {
		let smoothing = self.alpha * self.vocabulary_size as f64;
		match self.backoff(context) {
			Some(state) => (state.count(next) as f64 + self.alpha) / (state.total() as f64 + smoothing),
			None => 1.0 / self.vocabulary_size as f64,
		}
	}

	/// Smoothed distribution of the token following `context`.
	fn distribution(&self, context: &[usize]) -> Vec<f64> {
		let Some(state) = self.backoff(context) else {
			return vec![1.0 / self.vocabulary_size as f64; self.vocabulary_size];
		};

		let denominator = state.total() as f64 + self.alpha * self.vocabulary_size as f64;
		let mut distribution = vec![self.alpha / denominator; self.vocabulary_size];
		for (next, count) in state.transitions() {
			distribution[next] = (count as f64 + self.alpha) / denominator;
		}
		distribution
	}

	fn check_training_shapes(&self, inputs: &WindowTensor, targets: &TargetTensor) -> Result<usize, ModelError> {
		let (samples, window, size) = inputs.dim();
		if window != self.window_length || size != self.vocabulary_size {
			return Err(ModelError::Shape(format!(
				"inputs are {:?}, expected (_, {}, {})",
				inputs.dim(),
				self.window_length,
				self.vocabulary_size
			)));
		}
		if targets.dim() != (samples, self.vocabulary_size) {
			return Err(ModelError::Shape(format!(
				"targets are {:?}, expected ({samples}, {})",
				targets.dim(),
				self.vocabulary_size
			)));
		}
		if samples == 0 {
			return Err(ModelError::NoSamples);
		}
		Ok(samples)
	}

	/// Decodes and counts a range of samples into a partial set of states.
	fn count_chunk(
		inputs: &WindowTensor,
		targets: &TargetTensor,
		samples: std::ops::Range<usize>,
		order: usize,
	) -> Result<(HashMap<Vec<usize>, State>, Vec<Observation>), ModelError> {
		let window = inputs.dim().1;
		let mut states: HashMap<Vec<usize>, State> = HashMap::new();
		let mut observations = Vec::with_capacity(samples.len());

		for sample in samples {
			let context = hot_indices(inputs.slice(s![sample, window - order.., ..]))?;
			let next = hot_indices(targets.slice(s![sample..sample + 1, ..]))?[0];

			for start in 0..=order {
				let key = &context[start..];
				states
					.entry(key.to_vec())
					.or_insert_with(|| State::new(key))
					.add_transition(next);
			}
			observations.push((context, next));
		}

		Ok((states, observations))
	}

	/// Merges a partial set of states into the model.
	fn merge(&mut self, partial: HashMap<Vec<usize>, State>) -> Result<(), ModelError> {
		for (key, state) in partial {
			if let Some(existing) = self.states.get_mut(&key) {
				existing.merge(&state).map_err(ModelError::Training)?;
			} else {
				self.states.insert(key, state);
			}
		}
		Ok(())
	}
}

impl SequenceModel for FrequencyModel {
	fn vocabulary_size(&self) -> usize {
		self.vocabulary_size
	}

	fn epochs_trained(&self) -> usize {
		self.epochs
	}

	/// Adds one pass of transition counts, then measures the loss.
	///
	/// # Behavior
	/// - Splits the samples into chunks (based on CPU cores * factor).
	/// - Counts each chunk on its own scoped thread.
	/// - Merges all partial counts; merging is order independent, so the
	///   result does not depend on thread scheduling.
	/// - Loss is the mean negative log-likelihood of every target.
	///
	/// Repeating epochs scales the counts against a fixed smoothing, so the
	/// loss on the training set decreases with every epoch.
	fn train_epoch(&mut self, inputs: &WindowTensor, targets: &TargetTensor) -> Result<EpochReport, ModelError> {
		let samples = self.check_training_shapes(inputs, targets)?;

		let factor = 8;
		let chunks = num_cpus::get() * factor;
		let chunk_size = samples.div_ceil(chunks).max(1);
		let order = self.order;

		let partials: Vec<_> = thread::scope(|scope| {
			let handles: Vec<_> = (0..samples)
				.step_by(chunk_size)
				.map(|start| {
					let end = (start + chunk_size).min(samples);
					scope.spawn(move || Self::count_chunk(inputs, targets, start..end, order))
				})
				.collect();

			handles
				.into_iter()
				.map(|handle| {
					handle
						.join()
						.map_err(|_| ModelError::Training("counting thread panicked".to_owned()))?
				})
				.collect::<Result<Vec<_>, ModelError>>()
		})?;
		debug!("Counted {samples} samples in {} chunks", partials.len());

		let mut observations = Vec::with_capacity(samples);
		for (states, chunk_observations) in partials {
			self.merge(states)?;
			observations.extend(chunk_observations);
		}

		let loss = observations
			.iter()
			.map(|(context, next)| -self.probability(context, *next).ln())
			.sum::<f64>()
			/ observations.len() as f64;

		self.epochs += 1;
		debug!("Epoch {}: loss {:.5}", self.epochs, loss);

		Ok(EpochReport { epoch: self.epochs, loss })
	}

	fn predict(&self, window: &WindowTensor) -> Result<Vec<f64>, ModelError> {
		if window.dim() != (1, self.window_length, self.vocabulary_size) {
			return Err(ModelError::Shape(format!(
				"window is {:?}, expected (1, {}, {})",
				window.dim(),
				self.window_length,
				self.vocabulary_size
			)));
		}

		let context = hot_indices(window.slice(s![0, self.window_length - self.order.., ..]))?;
		Ok(self.distribution(&context))
	}
}

fn check_config(vocabulary_size: usize, window_length: usize, config: &FrequencyConfig) -> Result<(), ModelError> {
	if vocabulary_size == 0 {
		return Err(ModelError::Config("vocabulary must not be empty".to_owned()));
	}
	if config.order == 0 || config.order > window_length {
		return Err(ModelError::Config(format!(
			"order must be between 1 and {window_length}, got {}",
			config.order
		)));
	}
	if !config.alpha.is_finite() || config.alpha <= 0.0 {
		return Err(ModelError::Config(format!("alpha must be > 0, got {}", config.alpha)));
	}
	Ok(())
}
