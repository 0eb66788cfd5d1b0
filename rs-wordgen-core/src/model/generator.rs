use std::collections::VecDeque;
use std::ops::RangeInclusive;

use log::debug;
use rand::Rng;
use thiserror::Error;

use super::{ModelError, SequenceModel};
use crate::sampling::{self, SamplingError};
use crate::vectorizer::Vectorization;

/// Number of tokens generated after the seed window.
pub const OUTPUT_LENGTH: usize = 400;

#[derive(Error, Debug, PartialEq)]
pub enum GenerateError {
	#[error("Seed position {seed} is out of range: {reason}")]
	SeedOutOfRange { seed: usize, reason: String },

	#[error(transparent)]
	Sampling(#[from] SamplingError),

	#[error("Seed token {0:?} is not in the vocabulary")]
	UnknownToken(String),

	#[error("Model error: {0}")]
	Model(#[from] ModelError),

	#[error("Invariant violated: {0}")]
	Invariant(String),

	#[error("Generation cancelled after {generated} tokens")]
	Cancelled { generated: usize },
}

/// Autoregressive generator over a vocabulary and a trained model.
///
/// # Responsibilities
/// - Validate the seed position and the diversity before any work
/// - Encode the seed window from the corpus tokens
/// - Predict, sample and slide the window `output_length` times
/// - Decode the seed and the generated tokens into a string
///
/// The generator only borrows the vectorization and the model, so several
/// generators can run concurrently over the same read-only data.
pub struct Generator<'a, M: SequenceModel + ?Sized> {
	vectorization: &'a Vectorization,
	model: &'a M,
	output_length: usize,
}

impl<'a, M: SequenceModel + ?Sized> Generator<'a, M> {
	/// Creates a generator producing `OUTPUT_LENGTH` tokens.
	///
	/// # Errors
	/// Returns a `Shape` model error if the model and the vectorization do
	/// not share the same vocabulary size.
	pub fn new(vectorization: &'a Vectorization, model: &'a M) -> Result<Self, GenerateError> {
		if model.vocabulary_size() != vectorization.vocabulary_size() {
			return Err(ModelError::Shape(format!(
				"model predicts over {} tokens, vocabulary has {}",
				model.vocabulary_size(),
				vectorization.vocabulary_size()
			))
			.into());
		}
		Ok(Self { vectorization, model, output_length: OUTPUT_LENGTH })
	}

	/// Sets the number of tokens generated after the seed window.
	pub fn with_output_length(mut self, output_length: usize) -> Self {
		self.output_length = output_length;
		self
	}

	pub fn output_length(&self) -> usize {
		self.output_length
	}

	/// Valid seed positions for a corpus of `token_count` tokens.
	///
	/// The bound `token_count - window_length - output_length - 1` is the
	/// one enforced by [`Generator::generate`]; callers prompting for a seed
	/// should display this same range.
	///
	/// Returns `None` if the corpus is too short for any seed.
	pub fn seed_range(&self, token_count: usize) -> Option<RangeInclusive<usize>> {
		token_count
			.checked_sub(self.vectorization.window_length() + self.output_length + 1)
			.map(|max| 0..=max)
	}

	fn check_seed(&self, token_count: usize, seed: usize) -> Result<(), GenerateError> {
		match self.seed_range(token_count) {
			Some(range) if range.contains(&seed) => Ok(()),
			Some(range) => Err(GenerateError::SeedOutOfRange {
				seed,
				reason: format!("valid positions are {}..={}", range.start(), range.end()),
			}),
			None => Err(GenerateError::SeedOutOfRange {
				seed,
				reason: format!(
					"a corpus of {token_count} tokens is too short to generate {} tokens",
					self.output_length
				),
			}),
		}
	}

	/// Generates `window_length + output_length` tokens, space-separated.
	///
	/// See [`Generator::generate_until`].
	pub fn generate<R: Rng + ?Sized>(
		&self,
		tokens: &[String],
		seed: usize,
		diversity: f64,
		rng: &mut R,
	) -> Result<String, GenerateError> {
		self.generate_until(tokens, seed, diversity, rng, || false)
	}

	/// Generates text, checking `should_stop` before every step.
	///
	/// # Parameters
	/// - `tokens`: the corpus the seed window is taken from.
	/// - `seed`: position of the first seed token, see [`Generator::seed_range`].
	/// - `diversity`: temperature applied to every predicted distribution.
	/// - `should_stop`: polled between steps; generation stops with
	///   `Cancelled` as soon as it returns `true`.
	///
	/// # Returns
	/// The seed window followed by the generated tokens, space-separated.
	///
	/// # Errors
	/// - `SeedOutOfRange`, `Sampling(InvalidDiversity)`, `UnknownToken` for bad input
	/// - `Model` when the model fails, unchanged
	/// - `Invariant` when the model output does not fit the vocabulary
	pub fn generate_until<R, F>(
		&self,
		tokens: &[String],
		seed: usize,
		diversity: f64,
		rng: &mut R,
		mut should_stop: F,
	) -> Result<String, GenerateError>
	where
		R: Rng + ?Sized,
		F: FnMut() -> bool,
	{
		sampling::check_diversity(diversity)?;
		self.check_seed(tokens.len(), seed)?;

		let window_length = self.vectorization.window_length();
		let vocabulary_size = self.vectorization.vocabulary_size();

		let mut generated: Vec<usize> = Vec::with_capacity(window_length + self.output_length);
		for token in &tokens[seed..seed + window_length] {
			let index = self
				.vectorization
				.encode(token)
				.ok_or_else(|| GenerateError::UnknownToken(token.clone()))?;
			generated.push(index);
		}

		// Always the last `window_length` generated tokens
		let mut window: VecDeque<usize> = generated.iter().copied().collect();

		for step in 0..self.output_length {
			if should_stop() {
				return Err(GenerateError::Cancelled { generated: step });
			}

			let input = self
				.vectorization
				.one_hot_window(window.iter().copied())
				.map_err(|e| GenerateError::Invariant(e.to_string()))?;

			let probabilities = self.model.predict(&input)?;
			if probabilities.len() != vocabulary_size {
				return Err(GenerateError::Invariant(format!(
					"model returned {} probabilities for a vocabulary of {vocabulary_size}",
					probabilities.len()
				)));
			}

			let next = sampling::sample(&probabilities, diversity, rng)?;
			if next >= vocabulary_size {
				return Err(GenerateError::Invariant(format!("sampled index {next} outside vocabulary")));
			}

			window.pop_front();
			window.push_back(next);
			generated.push(next);
		}

		debug!(
			"Generated {} tokens from seed {seed} with diversity {diversity}",
			self.output_length
		);

		self.vectorization
			.vocabulary()
			.decode_all(&generated)
			.map_err(|e| GenerateError::Invariant(e.to_string()))
	}
}
