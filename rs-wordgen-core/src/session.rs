use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};

use log::{info, warn};
use rand::Rng;
use thiserror::Error;

use crate::checkpoint::{CheckpointError, CheckpointStore};
use crate::model::frequency_model::{FrequencyConfig, FrequencyModel};
use crate::model::generator::{GenerateError, Generator, OUTPUT_LENGTH};
use crate::model::{ModelError, SequenceModel};
use crate::sampling::{self, DIVERSITY_SUGGESTED, SamplingError};
use crate::tokenizer::{Corpus, TokenizerError};
use crate::vectorizer::{VectorizeConfig, VectorizeError, Vectorization};

/// Number of epochs a model is trained for.
pub const MAX_EPOCH: usize = 50;

#[derive(Error, Debug)]
pub enum SessionError {
	#[error(transparent)]
	Tokenizer(#[from] TokenizerError),
	#[error(transparent)]
	Vectorize(#[from] VectorizeError),
	#[error(transparent)]
	Model(#[from] ModelError),
	#[error(transparent)]
	Checkpoint(#[from] CheckpointError),
	#[error("Invalid configuration: {0}")]
	Config(String),
}

/// Settings of a session.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SessionConfig {
	/// Epochs to train for; a checkpoint of this epoch is reused if present.
	pub max_epoch: usize,
	pub vectorize: VectorizeConfig,
	pub model: FrequencyConfig,
	/// Tokens generated after the seed window.
	pub output_length: usize,
}

impl Default for SessionConfig {
	fn default() -> Self {
		Self {
			max_epoch: MAX_EPOCH,
			vectorize: VectorizeConfig::default(),
			model: FrequencyConfig::default(),
			output_length: OUTPUT_LENGTH,
		}
	}
}

/// A corpus, its vectorization and a model ready to generate.
///
/// Everything is read-only once the session is open, so a session can be
/// shared between threads and serve concurrent generations without locking.
#[derive(Debug)]
pub struct Session {
	corpus: Corpus,
	vectorization: Vectorization,
	model: FrequencyModel,
	config: SessionConfig,
	/// Checkpoint the model was loaded from, `None` if trained in this session.
	checkpoint: Option<PathBuf>,
}

impl Session {
	/// Opens a corpus, then loads or trains its model.
	///
	/// # Behavior
	/// - Tokenizes and fingerprints the corpus file.
	/// - Builds the vocabulary and the training tensors.
	/// - Looks for a checkpoint named `<fingerprint>-<max_epoch>`; if found,
	///   loads it.
	/// - Otherwise trains for `max_epoch` epochs, saving a checkpoint after
	///   every epoch.
	///
	/// # Errors
	/// - IO errors on the corpus or the checkpoint folder
	/// - `InsufficientCorpus` when training is needed and the corpus cannot
	///   provide a single sample
	/// - A `Shape` model error when a checkpoint does not fit the vocabulary
	pub fn open<P: AsRef<Path>>(corpus_path: P, store: &CheckpointStore, config: SessionConfig) -> Result<Self, SessionError> {
		if config.max_epoch == 0 {
			return Err(SessionError::Config("max epoch must be >= 1".to_owned()));
		}

		let corpus = Corpus::from_file(corpus_path)?;
		let vectorization = Vectorization::build_with(corpus.tokens(), config.vectorize)?;
		info!(
			"Unique words: {}, text samples: {}",
			vectorization.vocabulary_size(),
			vectorization.sample_count()
		);

		let (model, checkpoint) = match store.find(corpus.fingerprint(), config.max_epoch)? {
			Some(path) => match Self::load(store, &path, &corpus, &vectorization, &config) {
				Ok(model) => {
					info!("Using existing weights from {}", path.display());
					(model, Some(path))
				}
				Err(SessionError::Checkpoint(CheckpointError::Serialization(e))) => {
					warn!("Checkpoint {} is unreadable ({e}), training again", path.display());
					store.discard(&path)?;
					(Self::train(store, &corpus, &vectorization, &config)?, None)
				}
				Err(e) => return Err(e),
			},
			None => (Self::train(store, &corpus, &vectorization, &config)?, None),
		};

		Ok(Self { corpus, vectorization, model, config, checkpoint })
	}

	fn load(
		store: &CheckpointStore,
		path: &Path,
		corpus: &Corpus,
		vectorization: &Vectorization,
		config: &SessionConfig,
	) -> Result<FrequencyModel, SessionError> {
		let model = store.load(path, corpus.fingerprint())?.model;

		model
			.validate()
			.map_err(|e| ModelError::Config(format!("checkpoint {}: {e}", path.display())))?;

		// Same bytes, but tokenization or windowing may have changed since
		if model.vocabulary_size() != vectorization.vocabulary_size()
			|| model.window_length() != vectorization.window_length()
		{
			return Err(ModelError::Shape(format!(
				"checkpoint {} has vocabulary {} and window {}, corpus has vocabulary {} and window {}",
				path.display(),
				model.vocabulary_size(),
				model.window_length(),
				vectorization.vocabulary_size(),
				vectorization.window_length()
			))
			.into());
		}

		if model.config() != config.model {
			return Err(ModelError::Config(format!(
				"checkpoint {} was trained with {:?}, session asks for {:?}",
				path.display(),
				model.config(),
				config.model
			))
			.into());
		}

		Ok(model)
	}

	fn train(
		store: &CheckpointStore,
		corpus: &Corpus,
		vectorization: &Vectorization,
		config: &SessionConfig,
	) -> Result<FrequencyModel, SessionError> {
		vectorization.ensure_trainable()?;

		let mut model = FrequencyModel::new(vectorization.vocabulary_size(), vectorization.window_length(), config.model)?;
		info!("Training for {} epochs", config.max_epoch);

		for _ in 0..config.max_epoch {
			let report = model.train_epoch(vectorization.training_tensor(), vectorization.target_tensor())?;
			store.save(corpus.fingerprint(), &report, &model)?;
			info!("Epoch {}/{}: loss {:.5}", report.epoch, config.max_epoch, report.loss);
		}

		Ok(model)
	}

	pub fn corpus(&self) -> &Corpus {
		&self.corpus
	}

	pub fn vectorization(&self) -> &Vectorization {
		&self.vectorization
	}

	pub fn model(&self) -> &FrequencyModel {
		&self.model
	}

	pub fn config(&self) -> &SessionConfig {
		&self.config
	}

	/// Checkpoint the model was loaded from, if it was not trained here.
	pub fn checkpoint(&self) -> Option<&Path> {
		self.checkpoint.as_deref()
	}

	/// A generator over this session's vocabulary and model.
	pub fn generator(&self) -> Result<Generator<'_, FrequencyModel>, GenerateError> {
		Ok(Generator::new(&self.vectorization, &self.model)?.with_output_length(self.config.output_length))
	}

	/// Valid seed positions in the corpus.
	pub fn seed_range(&self) -> Option<RangeInclusive<usize>> {
		self.generator().ok()?.seed_range(self.corpus.tokens().len())
	}

	/// Picks a random valid seed position.
	pub fn random_seed<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<usize> {
		self.seed_range().map(|range| rng.random_range(range))
	}

	/// Generates text from a seed position of the corpus.
	pub fn generate(&self, seed: usize, diversity: f64) -> Result<String, GenerateError> {
		self.generator()?
			.generate(self.corpus.tokens(), seed, diversity, &mut rand::rng())
	}
}

/// Validates a user-provided diversity.
///
/// Only non-positive or non-finite values are rejected; values outside
/// `DIVERSITY_SUGGESTED` are accepted with a warning.
pub fn validate_diversity(diversity: f64) -> Result<f64, SamplingError> {
	sampling::check_diversity(diversity)?;
	if !DIVERSITY_SUGGESTED.contains(&diversity) {
		warn!(
			"Diversity {diversity} is outside the suggested range {}..={}",
			DIVERSITY_SUGGESTED.start(),
			DIVERSITY_SUGGESTED.end()
		);
	}
	Ok(diversity)
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::checkpoint::Checkpoint;
	use crate::model::EpochReport;
	use std::fs;

	const TEXT: &str = "It was the best of times, it was the worst of times; it was the age of wisdom, \
		it was the age of foolishness - it was the epoch of belief, it was the epoch of incredulity. \
		I don't know what it's worth, but we'll see!\n";

	fn config() -> SessionConfig {
		SessionConfig { max_epoch: 2, output_length: 20, ..SessionConfig::default() }
	}

	fn write_corpus(dir: &Path, name: &str, repeat: usize) -> PathBuf {
		let path = dir.join(name);
		fs::write(&path, TEXT.repeat(repeat)).unwrap();
		path
	}

	#[test]
	fn trains_then_reuses_checkpoint() {
		let dir = tempfile::tempdir().unwrap();
		let corpus = write_corpus(dir.path(), "dickens.txt", 5);
		let store = CheckpointStore::open(dir.path().join("weights")).unwrap();

		let first = Session::open(&corpus, &store, config()).unwrap();
		assert_eq!(first.checkpoint(), None);
		assert_eq!(first.model().epochs_trained(), 2);

		let fingerprint = first.corpus().fingerprint();
		assert!(store.find(fingerprint, 1).unwrap().is_some());
		let last = store.find(fingerprint, 2).unwrap();
		assert!(last.is_some());

		let second = Session::open(&corpus, &store, config()).unwrap();
		assert_eq!(second.checkpoint(), last.as_deref());
		assert_eq!(second.model().epochs_trained(), 2);
	}

	#[test]
	fn generates_from_a_session() {
		let dir = tempfile::tempdir().unwrap();
		let corpus = write_corpus(dir.path(), "dickens.txt", 5);
		let store = CheckpointStore::open(dir.path().join("weights")).unwrap();
		let session = Session::open(&corpus, &store, config()).unwrap();

		let range = session.seed_range().unwrap();
		assert_eq!(*range.end(), session.corpus().tokens().len() - 10 - 20 - 1);

		let seed = session.random_seed(&mut rand::rng()).unwrap();
		assert!(range.contains(&seed));

		let text = session.generate(seed, 0.5).unwrap();
		assert_eq!(text.split(' ').count(), 30);
	}

	#[test]
	fn short_corpus_cannot_train() {
		let dir = tempfile::tempdir().unwrap();
		let corpus = dir.path().join("short.txt");
		fs::write(&corpus, "far too short.").unwrap();
		let store = CheckpointStore::open(dir.path().join("weights")).unwrap();

		let err = Session::open(&corpus, &store, config()).unwrap_err();
		assert!(matches!(err, SessionError::Vectorize(VectorizeError::InsufficientCorpus { tokens: 4, required: 11 })));
	}

	#[test]
	fn empty_corpus_cannot_train() {
		let dir = tempfile::tempdir().unwrap();
		let corpus = dir.path().join("empty.txt");
		fs::write(&corpus, "").unwrap();
		let store = CheckpointStore::open(dir.path().join("weights")).unwrap();

		let err = Session::open(&corpus, &store, config()).unwrap_err();
		assert!(matches!(err, SessionError::Vectorize(VectorizeError::InsufficientCorpus { tokens: 0, .. })));
	}

	#[test]
	fn missing_corpus_fails() {
		let dir = tempfile::tempdir().unwrap();
		let store = CheckpointStore::open(dir.path().join("weights")).unwrap();

		let err = Session::open(dir.path().join("missing.txt"), &store, config()).unwrap_err();
		assert!(matches!(err, SessionError::Tokenizer(_)));
	}

	#[test]
	fn incompatible_checkpoint_is_rejected() {
		let dir = tempfile::tempdir().unwrap();
		let corpus = write_corpus(dir.path(), "dickens.txt", 5);
		let store = CheckpointStore::open(dir.path().join("weights")).unwrap();
		Session::open(&corpus, &store, config()).unwrap();

		let narrow = SessionConfig {
			vectorize: VectorizeConfig { window_length: 5, stride: 3 },
			..config()
		};
		let err = Session::open(&corpus, &store, narrow).unwrap_err();
		assert!(matches!(err, SessionError::Model(ModelError::Shape(_))));
	}

	#[test]
	fn zero_epochs_is_rejected() {
		let dir = tempfile::tempdir().unwrap();
		let corpus = write_corpus(dir.path(), "dickens.txt", 1);
		let store = CheckpointStore::open(dir.path().join("weights")).unwrap();

		let err = Session::open(&corpus, &store, SessionConfig { max_epoch: 0, ..config() }).unwrap_err();
		assert!(matches!(err, SessionError::Config(_)));
	}

	#[test]
	fn diversity_validation_is_soft() {
		assert_eq!(validate_diversity(0.5), Ok(0.5));
		assert_eq!(validate_diversity(5.0), Ok(5.0));
		assert_eq!(validate_diversity(0.0), Err(SamplingError::InvalidDiversity(0.0)));
	}

	#[test]
	fn truncated_checkpoint_is_retrained() {
		let dir = tempfile::tempdir().unwrap();
		let corpus = write_corpus(dir.path(), "dickens.txt", 5);
		let store = CheckpointStore::open(dir.path().join("weights")).unwrap();
		let first = Session::open(&corpus, &store, config()).unwrap();

		let last = store.find(first.corpus().fingerprint(), 2).unwrap().unwrap();
		let bytes = fs::read(&last).unwrap();
		fs::write(&last, &bytes[..bytes.len() / 2]).unwrap();

		let second = Session::open(&corpus, &store, config()).unwrap();
		assert_eq!(second.checkpoint(), None);
		assert_eq!(second.model().epochs_trained(), 2);

		let third = Session::open(&corpus, &store, config()).unwrap();
		assert!(third.checkpoint().is_some());
	}

	#[test]
	fn checkpoint_with_other_hyper_parameters_is_rejected() {
		let dir = tempfile::tempdir().unwrap();
		let corpus = write_corpus(dir.path(), "dickens.txt", 5);
		let store = CheckpointStore::open(dir.path().join("weights")).unwrap();
		Session::open(&corpus, &store, config()).unwrap();

		let smoother = SessionConfig {
			model: FrequencyConfig { order: 2, alpha: 0.5 },
			..config()
		};
		let err = Session::open(&corpus, &store, smoother).unwrap_err();
		assert!(matches!(err, SessionError::Model(ModelError::Config(_))));
	}

	#[test]
	fn tampered_checkpoint_order_is_rejected() {
		let dir = tempfile::tempdir().unwrap();
		let corpus = write_corpus(dir.path(), "dickens.txt", 5);
		let store = CheckpointStore::open(dir.path().join("weights")).unwrap();
		let first = Session::open(&corpus, &store, config()).unwrap();

		// Same layout as a real checkpoint, with an order past the window
		let fingerprint = first.corpus().fingerprint().to_owned();
		let report = EpochReport { epoch: 2, loss: 0.0 };
		let mut model = first.model().clone();
		model.set_order_unchecked(11);
		let bytes = postcard::to_stdvec(&Checkpoint { fingerprint: fingerprint.clone(), report, model }).unwrap();
		let path = store.find(&fingerprint, 2).unwrap().unwrap();
		fs::write(&path, bytes).unwrap();

		let err = Session::open(&corpus, &store, config()).unwrap_err();
		assert!(matches!(err, SessionError::Model(ModelError::Config(_))));
	}
}
