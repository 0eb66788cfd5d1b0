//! Sequence models and generation.
//!
//! This module provides:
//! - The model collaborator interface (`SequenceModel`)
//! - A word-transition frequency model (`FrequencyModel`)
//! - Internal context state management (`State`)
//! - The autoregressive generation loop (`Generator`)

use ndarray::ArrayView2;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::vectorizer::{TargetTensor, WindowTensor};

/// Autoregressive text generation driven by a `SequenceModel`.
///
/// Encodes a seed window, then repeatedly predicts, samples and slides the
/// window forward.
pub mod generator;

/// Word-transition frequency model with suffix backoff.
///
/// Supports parallel epoch training, loss reporting and
/// probability prediction over the whole vocabulary.
pub mod frequency_model;

/// Internal representation of a single context (window suffix).
///
/// Tracks outgoing transitions and their counts.
/// This module is not exposed publicly.
mod state;

#[derive(Error, Debug, PartialEq)]
pub enum ModelError {
	#[error("Shape mismatch: {0}")]
	Shape(String),
	#[error("Malformed one-hot tensor: {0}")]
	NotOneHot(String),
	#[error("Nothing to train on")]
	NoSamples,
	#[error("Invalid configuration: {0}")]
	Config(String),
	#[error("Training failed: {0}")]
	Training(String),
}

/// Outcome of one training epoch.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq)]
pub struct EpochReport {
	/// 1-based epoch number.
	pub epoch: usize,
	/// Mean cross-entropy of the targets after the epoch.
	pub loss: f64,
}

/// A trainable model over a fixed vocabulary.
///
/// The generation core only relies on this interface: it hands over
/// correctly shaped one-hot tensors and consumes a probability vector with
/// exactly `vocabulary_size()` entries summing to 1.
pub trait SequenceModel {
	/// Size of the vocabulary the model predicts over.
	fn vocabulary_size(&self) -> usize;

	/// Number of epochs trained so far.
	fn epochs_trained(&self) -> usize;

	/// Runs one training epoch.
	///
	/// - `inputs`: `(samples × window length × vocabulary size)`
	/// - `targets`: `(samples × vocabulary size)`
	fn train_epoch(&mut self, inputs: &WindowTensor, targets: &TargetTensor) -> Result<EpochReport, ModelError>;

	/// Predicts the distribution of the token following a `(1 × window length × vocabulary size)` window.
	fn predict(&self, window: &WindowTensor) -> Result<Vec<f64>, ModelError>;

	/// Runs `epochs` training epochs and returns their reports.
	///
	/// Stops at the first failing epoch.
	fn train(&mut self, inputs: &WindowTensor, targets: &TargetTensor, epochs: usize) -> Result<Vec<EpochReport>, ModelError> {
		(0..epochs).map(|_| self.train_epoch(inputs, targets)).collect()
	}
}

/// Returns the hot index of every row of a one-hot matrix.
///
/// # Errors
/// Returns `NotOneHot` if a row does not hold exactly one 1 and zeros elsewhere.
pub(crate) fn hot_indices(rows: ArrayView2<u8>) -> Result<Vec<usize>, ModelError> {
	rows.outer_iter()
		.enumerate()
		.map(|(row_index, row)| {
			let mut hot = None;
			for (index, &value) in row.iter().enumerate() {
				match (value, hot) {
					(0, _) => (),
					(1, None) => hot = Some(index),
					_ => return Err(ModelError::NotOneHot(format!("row {row_index} has several or non-binary entries"))),
				}
			}
			hot.ok_or_else(|| ModelError::NotOneHot(format!("row {row_index} is empty")))
		})
		.collect()
}
