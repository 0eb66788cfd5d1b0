//! Word-level text generation library.
//!
//! This crate provides the text-to-tensor pipeline and the autoregressive
//! generation loop of a word-level sequence model, including:
//! - A tokenizer producing normalized word/punctuation tokens and a corpus fingerprint
//! - A vectorizer building a bijective vocabulary and one-hot training tensors
//! - Temperature ("diversity") sampling over a predicted distribution
//! - A generator driving any `SequenceModel` one token at a time
//! - A frequency model, a checkpoint store and a session tying it all together
//!
//! Low-level file helpers are kept internal.

/// Raw text to tokens, and the corpus fingerprint.
pub mod tokenizer;

/// Vocabulary, windowed training samples and one-hot tensors.
pub mod vectorizer;

/// Temperature-scaled categorical sampling.
pub mod sampling;

/// Model collaborator interface, frequency model and generator.
pub mod model;

/// Per-epoch checkpoint persistence keyed by corpus fingerprint.
pub mod checkpoint;

/// "Load or train" orchestration over a single corpus.
pub mod session;

/// I/O utilities (file loading, folder listing).
///
/// Only the corpus listing helper is exposed.
pub mod io;
