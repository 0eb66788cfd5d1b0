use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::io::list_files;
use crate::model::EpochReport;
use crate::model::frequency_model::FrequencyModel;

/// Extension of checkpoint files.
pub const CHECKPOINT_EXTENSION: &str = "ckpt";

/// Extension appended while a checkpoint is being written.
const PARTIAL_EXTENSION: &str = "tmp";

/// Extension appended to checkpoints that could not be read back.
const CORRUPT_EXTENSION: &str = "corrupt";

#[derive(Error, Debug)]
pub enum CheckpointError {
	#[error("IO error: {0}")]
	Io(#[from] io::Error),

	#[error("Serialization error: {0}")]
	Serialization(#[from] postcard::Error),

	#[error("{0} is a file, must be a folder")]
	NotAFolder(PathBuf),

	#[error("Checkpoint {path} belongs to corpus {found}, expected {expected}")]
	FingerprintMismatch { path: PathBuf, found: String, expected: String },
}

/// A trained model as saved after one epoch.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Checkpoint {
	/// Fingerprint of the corpus the model was trained on.
	pub fingerprint: String,
	pub report: EpochReport,
	pub model: FrequencyModel,
}

/// Folder of checkpoints, named `<fingerprint>-<epoch>-<loss>.ckpt`.
///
/// The fingerprint prefix ties a checkpoint to the exact bytes of a corpus,
/// the epoch lets a caller ask for a fully trained model, and the loss is
/// informative only.
#[derive(Debug, Clone)]
pub struct CheckpointStore {
	folder: PathBuf,
}

impl CheckpointStore {
	/// Opens a checkpoint folder, creating it if needed.
	///
	/// # Errors
	/// Returns `NotAFolder` if the path exists and is not a directory.
	pub fn open<P: AsRef<Path>>(folder: P) -> Result<Self, CheckpointError> {
		let folder = folder.as_ref();
		if folder.exists() {
			if !folder.is_dir() {
				return Err(CheckpointError::NotAFolder(folder.to_path_buf()));
			}
		} else {
			fs::create_dir_all(folder)?;
			info!("Created checkpoint folder {}", folder.display());
		}
		Ok(Self { folder: folder.to_path_buf() })
	}

	pub fn folder(&self) -> &Path {
		&self.folder
	}

	/// File name of the checkpoint of `fingerprint` after an epoch.
	pub fn file_name(fingerprint: &str, report: &EpochReport) -> String {
		format!("{fingerprint}-{}-{:.5}.{CHECKPOINT_EXTENSION}", report.epoch, report.loss)
	}

	/// Saves a model after an epoch and returns the file path.
	///
	/// The bytes go to `<name>.tmp` first and are renamed into place, so an
	/// interrupted save never leaves a truncated `.ckpt` behind.
	pub fn save(&self, fingerprint: &str, report: &EpochReport, model: &FrequencyModel) -> Result<PathBuf, CheckpointError> {
		let path = self.folder.join(Self::file_name(fingerprint, report));
		let checkpoint = Checkpoint {
			fingerprint: fingerprint.to_owned(),
			report: *report,
			model: model.clone(),
		};

		let bytes = postcard::to_stdvec(&checkpoint)?;
		let partial = with_suffix(&path, PARTIAL_EXTENSION);
		fs::write(&partial, bytes)?;
		fs::rename(&partial, &path)?;
		debug!("Saved checkpoint {}", path.display());

		Ok(path)
	}

	/// Finds a checkpoint of `fingerprint` saved after `epoch`.
	///
	/// Matches any file named `<fingerprint>-<epoch>` with an optional
	/// suffix, so epoch 5 never matches a checkpoint of epoch 50.
	pub fn find(&self, fingerprint: &str, epoch: usize) -> Result<Option<PathBuf>, CheckpointError> {
		let prefix = format!("{fingerprint}-{epoch}");

		let found = list_files(&self.folder, CHECKPOINT_EXTENSION)?
			.into_iter()
			.find(|name| {
				name.strip_prefix(&prefix)
					.is_some_and(|rest| rest.starts_with('-') || rest.starts_with('.'))
			})
			.map(|name| self.folder.join(name));

		Ok(found)
	}

	/// Loads a checkpoint and checks that it belongs to `fingerprint`.
	pub fn load<P: AsRef<Path>>(&self, path: P, fingerprint: &str) -> Result<Checkpoint, CheckpointError> {
		let path = path.as_ref();
		let bytes = fs::read(path)?;
		let checkpoint: Checkpoint = postcard::from_bytes(&bytes)?;

		if checkpoint.fingerprint != fingerprint {
			return Err(CheckpointError::FingerprintMismatch {
				path: path.to_path_buf(),
				found: checkpoint.fingerprint,
				expected: fingerprint.to_owned(),
			});
		}

		Ok(checkpoint)
	}

	/// Moves an unreadable checkpoint out of the way as `<name>.corrupt`.
	///
	/// `find` no longer matches it, the file is kept for inspection.
	pub fn discard<P: AsRef<Path>>(&self, path: P) -> Result<PathBuf, CheckpointError> {
		let path = path.as_ref();
		let moved = with_suffix(path, CORRUPT_EXTENSION);
		fs::rename(path, &moved)?;
		warn!("Moved unreadable checkpoint to {}", moved.display());
		Ok(moved)
	}
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
	let mut name = path.as_os_str().to_owned();
	name.push(".");
	name.push(suffix);
	PathBuf::from(name)
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::model::SequenceModel;
	use crate::model::frequency_model::FrequencyConfig;

	fn model() -> FrequencyModel {
		FrequencyModel::new(4, 10, FrequencyConfig::default()).unwrap()
	}

	#[test]
	fn file_name_follows_convention() {
		let report = EpochReport { epoch: 50, loss: 1.234567 };
		assert_eq!(CheckpointStore::file_name("abc", &report), "abc-50-1.23457.ckpt");
	}

	#[test]
	fn open_creates_folder() {
		let dir = tempfile::tempdir().unwrap();
		let folder = dir.path().join("weights");
		let store = CheckpointStore::open(&folder).unwrap();
		assert!(folder.is_dir());
		assert_eq!(store.folder(), folder);
	}

	#[test]
	fn open_rejects_a_file() {
		let dir = tempfile::tempdir().unwrap();
		let file = dir.path().join("weights");
		fs::write(&file, "").unwrap();
		assert!(matches!(CheckpointStore::open(&file), Err(CheckpointError::NotAFolder(_))));
	}

	#[test]
	fn save_find_load() {
		let dir = tempfile::tempdir().unwrap();
		let store = CheckpointStore::open(dir.path()).unwrap();
		let report = EpochReport { epoch: 3, loss: 0.5 };

		let path = store.save("feed", &report, &model()).unwrap();
		assert_eq!(store.find("feed", 3).unwrap(), Some(path.clone()));

		let checkpoint = store.load(&path, "feed").unwrap();
		assert_eq!(checkpoint.report, report);
		assert_eq!(checkpoint.model.vocabulary_size(), 4);
	}

	#[test]
	fn find_requires_exact_epoch_and_fingerprint() {
		let dir = tempfile::tempdir().unwrap();
		let store = CheckpointStore::open(dir.path()).unwrap();
		store.save("feed", &EpochReport { epoch: 50, loss: 0.1 }, &model()).unwrap();

		assert_eq!(store.find("feed", 5).unwrap(), None);
		assert_eq!(store.find("beef", 50).unwrap(), None);
		assert!(store.find("feed", 50).unwrap().is_some());
	}

	#[test]
	fn find_accepts_names_without_loss() {
		let dir = tempfile::tempdir().unwrap();
		let store = CheckpointStore::open(dir.path()).unwrap();
		fs::write(dir.path().join("feed-7.ckpt"), "").unwrap();
		fs::write(dir.path().join("feed-7.txt"), "").unwrap();

		assert_eq!(store.find("feed", 7).unwrap(), Some(dir.path().join("feed-7.ckpt")));
	}

	#[test]
	fn load_checks_fingerprint() {
		let dir = tempfile::tempdir().unwrap();
		let store = CheckpointStore::open(dir.path()).unwrap();
		let path = store.save("feed", &EpochReport { epoch: 1, loss: 0.5 }, &model()).unwrap();

		assert!(matches!(
			store.load(&path, "beef"),
			Err(CheckpointError::FingerprintMismatch { .. })
		));
	}

	#[test]
	fn load_rejects_garbage() {
		let dir = tempfile::tempdir().unwrap();
		let store = CheckpointStore::open(dir.path()).unwrap();
		let path = dir.path().join("feed-1.ckpt");
		fs::write(&path, [0xff, 0xff, 0xff]).unwrap();

		assert!(matches!(store.load(&path, "feed"), Err(CheckpointError::Serialization(_))));
	}

	#[test]
	fn save_leaves_no_partial_file() {
		let dir = tempfile::tempdir().unwrap();
		let store = CheckpointStore::open(dir.path()).unwrap();
		store.save("feed", &EpochReport { epoch: 1, loss: 0.5 }, &model()).unwrap();

		let names: Vec<String> = fs::read_dir(dir.path())
			.unwrap()
			.map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
			.collect();
		assert_eq!(names, vec!["feed-1-0.50000.ckpt"]);
	}

	#[test]
	fn truncated_checkpoint_fails_to_load_then_is_discarded() {
		let dir = tempfile::tempdir().unwrap();
		let store = CheckpointStore::open(dir.path()).unwrap();
		let path = store.save("feed", &EpochReport { epoch: 2, loss: 0.5 }, &model()).unwrap();

		let bytes = fs::read(&path).unwrap();
		fs::write(&path, &bytes[..bytes.len() / 2]).unwrap();
		assert!(matches!(store.load(&path, "feed"), Err(CheckpointError::Serialization(_))));

		let moved = store.discard(&path).unwrap();
		assert!(moved.is_file());
		assert!(!path.exists());
		assert_eq!(store.find("feed", 2).unwrap(), None);
	}
}
