use std::collections::HashMap;

use log::{debug, info};
use ndarray::{Array2, Array3};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Number of tokens in a training window.
pub const WINDOW_LENGTH: usize = 10;

/// Distance between the starts of two consecutive training windows.
pub const STRIDE: usize = 3;

/// One-hot tensor of windows: `(windows × window length × vocabulary size)`.
pub type WindowTensor = Array3<u8>;

/// One-hot tensor of single tokens: `(rows × vocabulary size)`.
pub type TargetTensor = Array2<u8>;

#[derive(Error, Debug, PartialEq)]
pub enum VectorizeError {
	#[error("Insufficient corpus: {tokens} tokens, at least {required} needed for one training sample")]
	InsufficientCorpus { tokens: usize, required: usize },

	#[error("Invalid configuration: {0}")]
	Config(String),

	#[error("Invariant violated: index {index} outside vocabulary of size {size}")]
	UnknownIndex { index: usize, size: usize },

	#[error("Invariant violated: window of {actual} tokens, expected {expected}")]
	WindowLength { actual: usize, expected: usize },
}

/// Bijective mapping between tokens and indices.
///
/// Indices are assigned in first-seen order, so building a vocabulary twice
/// from the same token sequence yields the same assignment.
///
/// # Invariants
/// - `words[index_by_word[w]] == w` for every word `w`
/// - `words` contains no duplicates
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct Vocabulary {
	/// Tokens by index.
	words: Vec<String>,
	/// Indices by token.
	index_by_word: HashMap<String, usize>,
}

impl Vocabulary {
	/// Builds the vocabulary of a token sequence.
	pub fn from_tokens<S: AsRef<str>>(tokens: &[S]) -> Self {
		Self::from_tokens_encoded(tokens).0
	}

	/// Builds the vocabulary and encodes the sequence in the same pass.
	fn from_tokens_encoded<S: AsRef<str>>(tokens: &[S]) -> (Self, Vec<usize>) {
		let mut vocabulary = Self::default();
		let encoded = tokens
			.iter()
			.map(|token| vocabulary.insert(token.as_ref()))
			.collect();
		(vocabulary, encoded)
	}

	/// Returns the index of `word`, adding it if unseen.
	fn insert(&mut self, word: &str) -> usize {
		if let Some(&index) = self.index_by_word.get(word) {
			return index;
		}
		let index = self.words.len();
		self.words.push(word.to_owned());
		self.index_by_word.insert(word.to_owned(), index);
		index
	}

	pub fn len(&self) -> usize {
		self.words.len()
	}

	pub fn is_empty(&self) -> bool {
		self.words.is_empty()
	}

	/// Index of a token, or `None` if the token is not in the vocabulary.
	pub fn encode(&self, word: &str) -> Option<usize> {
		self.index_by_word.get(word).copied()
	}

	/// Token at an index, or `None` if the index is out of range.
	pub fn decode(&self, index: usize) -> Option<&str> {
		self.words.get(index).map(String::as_str)
	}

	/// Decodes a sequence of indices into a space-separated string.
	///
	/// # Errors
	/// An unknown index is an invariant violation: every index handed out by
	/// this vocabulary decodes.
	pub fn decode_all(&self, indices: &[usize]) -> Result<String, VectorizeError> {
		let words = indices
			.iter()
			.map(|&index| {
				self.decode(index)
					.ok_or(VectorizeError::UnknownIndex { index, size: self.len() })
			})
			.collect::<Result<Vec<&str>, _>>()?;
		Ok(words.join(" "))
	}
}

/// A training sample: a window of tokens and the token that follows it.
///
/// # Invariants
/// - `continuation` immediately follows the last token of `phrase` in the source
#[derive(Clone, Debug, PartialEq)]
pub struct TextSample {
	pub phrase: Vec<String>,
	pub continuation: String,
}

/// Windowing parameters.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct VectorizeConfig {
	pub window_length: usize,
	pub stride: usize,
}

impl Default for VectorizeConfig {
	fn default() -> Self {
		Self { window_length: WINDOW_LENGTH, stride: STRIDE }
	}
}

impl VectorizeConfig {
	fn validate(&self) -> Result<(), VectorizeError> {
		if self.window_length == 0 {
			return Err(VectorizeError::Config("window length must be >= 1".to_owned()));
		}
		if self.stride == 0 {
			return Err(VectorizeError::Config("stride must be >= 1".to_owned()));
		}
		Ok(())
	}
}

/// Vocabulary and one-hot training tensors derived from a token sequence.
///
/// # Responsibilities
/// - Assign every distinct token a unique index
/// - Slice the sequence into overlapping windows (`window_length` tokens,
///   `stride` apart), each followed by its continuation
/// - Encode the windows and continuations as one-hot tensors
///
/// # Invariants
/// - `training_tensor` has shape `(sample_count, window_length, vocabulary_size)`
/// - `target_tensor` has shape `(sample_count, vocabulary_size)`
/// - Exactly one entry per (sample, position) and per target row is 1,
///   every other entry is 0
/// - Nothing is mutated after construction
#[derive(Debug, Clone)]
pub struct Vectorization {
	vocabulary: Vocabulary,
	samples: Vec<TextSample>,
	training: WindowTensor,
	target: TargetTensor,
	token_count: usize,
	config: VectorizeConfig,
}

impl Vectorization {
	/// Builds a vectorization with the default window length (10) and stride (3).
	///
	/// A sequence of `WINDOW_LENGTH` tokens or fewer yields zero samples;
	/// see [`Vectorization::ensure_trainable`].
	pub fn build<S: AsRef<str>>(tokens: &[S]) -> Self {
		Self::construct(tokens, VectorizeConfig::default())
	}

	/// Builds a vectorization with custom windowing.
	///
	/// # Errors
	/// Returns an error if the window length or the stride is zero.
	pub fn build_with<S: AsRef<str>>(tokens: &[S], config: VectorizeConfig) -> Result<Self, VectorizeError> {
		config.validate()?;
		Ok(Self::construct(tokens, config))
	}

	/// Expects a validated configuration.
	fn construct<S: AsRef<str>>(tokens: &[S], config: VectorizeConfig) -> Self {
		let (vocabulary, encoded) = Vocabulary::from_tokens_encoded(tokens);
		let window = config.window_length;

		let starts: Vec<usize> = (0..)
			.step_by(config.stride)
			.take_while(|start| start + window < tokens.len())
			.collect();

		let mut training = WindowTensor::zeros((starts.len(), window, vocabulary.len()));
		let mut target = TargetTensor::zeros((starts.len(), vocabulary.len()));
		let mut samples = Vec::with_capacity(starts.len());

		for (sample_index, &start) in starts.iter().enumerate() {
			for (position, &word_index) in encoded[start..start + window].iter().enumerate() {
				training[[sample_index, position, word_index]] = 1;
			}
			target[[sample_index, encoded[start + window]]] = 1;

			samples.push(TextSample {
				phrase: tokens[start..start + window].iter().map(|t| t.as_ref().to_owned()).collect(),
				continuation: tokens[start + window].as_ref().to_owned(),
			});
		}

		info!("Vectorized {} tokens: {} unique, {} samples", tokens.len(), vocabulary.len(), samples.len());
		debug!("Training tensor shape {:?}, target tensor shape {:?}", training.dim(), target.dim());

		Self { vocabulary, samples, training, target, token_count: tokens.len(), config }
	}

	pub fn vocabulary(&self) -> &Vocabulary {
		&self.vocabulary
	}

	pub fn vocabulary_size(&self) -> usize {
		self.vocabulary.len()
	}

	pub fn sample_count(&self) -> usize {
		self.samples.len()
	}

	pub fn window_length(&self) -> usize {
		self.config.window_length
	}

	pub fn stride(&self) -> usize {
		self.config.stride
	}

	/// Length of the token sequence the vectorization was built from.
	pub fn token_count(&self) -> usize {
		self.token_count
	}

	pub fn samples(&self) -> &[TextSample] {
		&self.samples
	}

	pub fn training_tensor(&self) -> &WindowTensor {
		&self.training
	}

	pub fn target_tensor(&self) -> &TargetTensor {
		&self.target
	}

	pub fn encode(&self, word: &str) -> Option<usize> {
		self.vocabulary.encode(word)
	}

	pub fn decode(&self, index: usize) -> Option<&str> {
		self.vocabulary.decode(index)
	}

	/// Checks that there is at least one training sample.
	///
	/// # Errors
	/// Returns `InsufficientCorpus` when the corpus is too short to form a
	/// single window followed by a continuation.
	pub fn ensure_trainable(&self) -> Result<(), VectorizeError> {
		if self.samples.is_empty() {
			// Windows start at 0, so one sample needs window + 1 tokens
			return Err(VectorizeError::InsufficientCorpus {
				tokens: self.token_count,
				required: self.config.window_length + 1,
			});
		}
		Ok(())
	}

	/// Encodes one window of indices as a `(1 × window length × vocabulary size)` tensor.
	pub fn one_hot_window<I>(&self, indices: I) -> Result<WindowTensor, VectorizeError>
	where
		I: IntoIterator<Item = usize>,
	{
		one_hot_window(indices, self.window_length(), self.vocabulary_size())
	}
}

/// Encodes one window of indices as a `(1 × window_length × vocabulary_size)` tensor.
///
/// # Errors
/// Both failures are invariant violations, not input errors:
/// - an index outside `0..vocabulary_size`
/// - a window that does not hold exactly `window_length` indices
pub fn one_hot_window<I>(indices: I, window_length: usize, vocabulary_size: usize) -> Result<WindowTensor, VectorizeError>
where
	I: IntoIterator<Item = usize>,
{
	let mut tensor = WindowTensor::zeros((1, window_length, vocabulary_size));
	let mut count = 0;

	for (position, index) in indices.into_iter().enumerate() {
		if position >= window_length {
			return Err(VectorizeError::WindowLength { actual: position + 1, expected: window_length });
		}
		if index >= vocabulary_size {
			return Err(VectorizeError::UnknownIndex { index, size: vocabulary_size });
		}
		tensor[[0, position, index]] = 1;
		count += 1;
	}

	if count != window_length {
		return Err(VectorizeError::WindowLength { actual: count, expected: window_length });
	}

	Ok(tensor)
}
