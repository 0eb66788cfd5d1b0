use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use log::info;
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::io::{get_filename, read_file};

/// Punctuation marks kept as standalone tokens.
pub const PUNCTUATION: [char; 9] = ['.', ',', '?', '!', ':', ';', '-', '—', '&'];

/// Contraction suffixes glued to the pending word, checked in this order.
const SHORT_SUFFIXES: [&str; 2] = ["'s", "'t"];
const LONG_SUFFIXES: [&str; 2] = ["'em", "'ll"];

/// Size of the chunks streamed through the digest.
const FINGERPRINT_CHUNK_SIZE: usize = 8192;

#[derive(Error, Debug)]
pub enum TokenizerError {
	#[error("IO error on {path}: {source}")]
	Io {
		path: PathBuf,
		#[source]
		source: io::Error,
	},
}

impl TokenizerError {
	fn io(path: &Path, source: io::Error) -> Self {
		TokenizerError::Io { path: path.to_path_buf(), source }
	}
}

/// Accumulates the tokens of a text, one line at a time.
///
/// Holds the pending word buffer between characters of the same line.
#[derive(Default)]
struct TokenStream {
	tokens: Vec<String>,
	pending: String,
}

impl TokenStream {
	/// Emits a token, restoring the standalone pronoun "I".
	fn emit(&mut self, token: String) {
		if token == "i" {
			self.tokens.push("I".to_owned());
		} else {
			self.tokens.push(token);
		}
	}

	/// Emits the pending word, if any.
	fn flush(&mut self) {
		if !self.pending.is_empty() {
			let word = std::mem::take(&mut self.pending);
			self.emit(word);
		}
	}

	/// Emits the pending word with a contraction suffix attached.
	fn emit_contraction(&mut self, suffix: &str) {
		let mut word = std::mem::take(&mut self.pending);
		word.push_str(suffix);
		self.emit(word);
	}

	fn scan_line(&mut self, line: &str) {
		let chars: Vec<char> = line.to_lowercase().chars().collect();

		let mut i = 0;
		while i < chars.len() {
			let symbol = chars[i];

			if symbol.is_alphabetic() {
				self.pending.push(symbol);
			} else if let Some(suffix) = match_suffix(&chars[i..], symbol) {
				self.emit_contraction(suffix);
				// The suffix letters belong to the emitted token
				i += suffix.chars().count();
				continue;
			} else if PUNCTUATION.contains(&symbol) {
				self.flush();
				self.emit(symbol.to_string());
			} else {
				// Whitespace or unusual symbol
				self.flush();
			}

			i += 1;
		}

		self.flush();
	}
}

/// Returns the contraction suffix starting at `rest`, if any.
///
/// Two-character suffixes take priority over three-character ones.
fn match_suffix(rest: &[char], symbol: char) -> Option<&'static str> {
	if symbol != '\'' {
		return None;
	}

	SHORT_SUFFIXES
		.iter()
		.chain(LONG_SUFFIXES.iter())
		.find(|suffix| {
			let len = suffix.chars().count();
			rest.len() >= len && suffix.chars().eq(rest[..len].iter().copied())
		})
		.copied()
}

/// Converts raw text into an ordered sequence of normalized tokens.
///
/// Each line is lowercased and scanned left to right:
/// - alphabetic characters accumulate into the pending word
/// - an apostrophe followed by `s`/`t`, then `em`/`ll`, closes the pending
///   word with that suffix attached
/// - punctuation marks flush the pending word and become tokens themselves
/// - anything else flushes the pending word and is dropped
///
/// The token `i` is restored to `I`.
///
/// # Examples
/// ```
/// use rs_wordgen_core::tokenizer::tokenize;
///
/// assert_eq!(tokenize("Hello, world!"), vec!["hello", ",", "world", "!"]);
/// ```
pub fn tokenize(raw_text: &str) -> Vec<String> {
	let mut stream = TokenStream::default();
	for line in raw_text.lines() {
		stream.scan_line(line);
	}
	stream.tokens
}

/// Reads and tokenizes a UTF-8 text file.
///
/// An empty file yields an empty token sequence.
pub fn tokenize_file<P: AsRef<Path>>(path: P) -> Result<Vec<String>, TokenizerError> {
	let path = path.as_ref();
	let text = read_file(path).map_err(|e| TokenizerError::io(path, e))?;
	Ok(tokenize(&text))
}

/// Computes the SHA-256 fingerprint of a byte stream as lowercase hex.
///
/// The stream is consumed in fixed-size chunks, so arbitrarily large files
/// are never loaded in memory.
pub fn fingerprint<R: Read>(mut reader: R) -> io::Result<String> {
	let mut hasher = Sha256::new();
	let mut buffer = [0u8; FINGERPRINT_CHUNK_SIZE];

	loop {
		let read = reader.read(&mut buffer)?;
		if read == 0 {
			break;
		}
		hasher.update(&buffer[..read]);
	}

	Ok(format!("{:x}", hasher.finalize()))
}

/// Computes the fingerprint of a file's raw bytes.
pub fn fingerprint_file<P: AsRef<Path>>(path: P) -> Result<String, TokenizerError> {
	let path = path.as_ref();
	let file = File::open(path).map_err(|e| TokenizerError::io(path, e))?;
	fingerprint(file).map_err(|e| TokenizerError::io(path, e))
}

/// A tokenized corpus file.
///
/// Tokens and fingerprint are computed once, on load, and never change.
#[derive(Debug, Clone)]
pub struct Corpus {
	path: PathBuf,
	name: String,
	tokens: Vec<String>,
	fingerprint: String,
}

impl Corpus {
	/// Loads a corpus: tokenizes its text and fingerprints its raw bytes.
	///
	/// # Errors
	/// Returns an error if the file cannot be read or is not valid UTF-8.
	pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, TokenizerError> {
		let path = path.as_ref();
		let tokens = tokenize_file(path)?;
		let fingerprint = fingerprint_file(path)?;
		let name = get_filename(path).map_err(|e| TokenizerError::io(path, e))?;

		info!("Read {} tokens from {} (fingerprint {})", tokens.len(), path.display(), fingerprint);

		Ok(Self { path: path.to_path_buf(), name, tokens, fingerprint })
	}

	pub fn path(&self) -> &Path {
		&self.path
	}

	/// File name without extension.
	pub fn name(&self) -> &str {
		&self.name
	}

	pub fn tokens(&self) -> &[String] {
		&self.tokens
	}

	pub fn fingerprint(&self) -> &str {
		&self.fingerprint
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use rand::rngs::StdRng;
	use rand::{Rng, SeedableRng};
	use std::fs;

	fn tokens(text: &str) -> Vec<String> {
		tokenize(text)
	}

	#[test]
	fn contractions_stay_attached() {
		assert_eq!(tokens("don't said it's fine"), vec!["don't", "said", "it's", "fine"]);
	}

	#[test]
	fn long_contractions_stay_attached() {
		assert_eq!(tokens("get 'em, we'll go"), vec!["get", "'em", ",", "we'll", "go"]);
	}

	#[test]
	fn stray_apostrophes_are_dropped() {
		assert_eq!(tokens("'quoted' rock'n'roll"), vec!["quoted", "rock", "n", "roll"]);
	}

	#[test]
	fn punctuation_is_a_token() {
		assert_eq!(tokens("Hello, world!"), vec!["hello", ",", "world", "!"]);
		assert_eq!(tokens("rock&roll — live"), vec!["rock", "&", "roll", "—", "live"]);
	}

	#[test]
	fn pronoun_is_restored() {
		assert_eq!(tokens("i think I saw a film"), vec!["I", "think", "I", "saw", "a", "film"]);
		assert_eq!(tokens("I'll"), vec!["i'll"]);
	}

	#[test]
	fn digits_and_symbols_split_words() {
		assert_eq!(tokens("chapter 12: the\tend\"s"), vec!["chapter", ":", "the", "end", "s"]);
	}

	#[test]
	fn words_do_not_span_lines() {
		assert_eq!(tokens("end\nof\r\nline"), vec!["end", "of", "line"]);
	}

	#[test]
	fn unicode_letters_are_words() {
		assert_eq!(tokens("Café ÉTÉ"), vec!["café", "été"]);
	}

	#[test]
	fn lowercase_text_round_trips() {
		let text = "the cat sat . on the mat , then ran ! why ? because : reasons ; fine - ok & done";
		assert_eq!(tokens(text).join(" "), text);
	}

	#[test]
	fn random_lowercase_text_round_trips() {
		let mut rng = StdRng::seed_from_u64(42);
		let letters: Vec<char> = ('a'..='z').collect();

		for _ in 0..200 {
			let count = rng.random_range(0..40);
			let words: Vec<String> = (0..count)
				.map(|_| {
					if rng.random_bool(0.3) {
						return PUNCTUATION[rng.random_range(0..PUNCTUATION.len())].to_string();
					}
					loop {
						let length = rng.random_range(1..=8);
						let word: String = (0..length).map(|_| letters[rng.random_range(0..letters.len())]).collect();
						// A lone "i" comes back as "I"
						if word != "i" {
							return word;
						}
					}
				})
				.collect();

			let text = words.join(" ");
			assert_eq!(tokens(&text).join(" "), text);
		}
	}

	#[test]
	fn empty_text_has_no_tokens() {
		assert!(tokens("").is_empty());
		assert!(tokens("\n\n  \t").is_empty());
	}

	#[test]
	fn fingerprint_is_deterministic() {
		let a = fingerprint("some corpus".as_bytes()).unwrap();
		let b = fingerprint("some corpus".as_bytes()).unwrap();
		assert_eq!(a, b);
		assert_eq!(a.len(), 64);
		assert!(a.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
	}

	#[test]
	fn fingerprint_changes_with_one_byte() {
		let a = fingerprint("some corpus".as_bytes()).unwrap();
		let b = fingerprint("some corpuS".as_bytes()).unwrap();
		assert_ne!(a, b);
	}

	#[test]
	fn fingerprint_spans_multiple_chunks() {
		let data = vec![b'x'; FINGERPRINT_CHUNK_SIZE * 3 + 17];
		let mut other = data.clone();
		other[FINGERPRINT_CHUNK_SIZE * 2] = b'y';
		assert_ne!(fingerprint(&data[..]).unwrap(), fingerprint(&other[..]).unwrap());
	}

	#[test]
	fn fingerprint_of_empty_input() {
		assert_eq!(
			fingerprint(&[][..]).unwrap(),
			"e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
		);
	}

	#[test]
	fn corpus_from_file() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("tale.txt");
		fs::write(&path, "Once upon a time, i was.\n").unwrap();

		let corpus = Corpus::from_file(&path).unwrap();
		assert_eq!(corpus.name(), "tale");
		assert_eq!(corpus.tokens(), ["once", "upon", "a", "time", ",", "I", "was", "."]);
		assert_eq!(corpus.fingerprint(), fingerprint_file(&path).unwrap());
	}

	#[test]
	fn corpus_from_missing_file_fails() {
		let dir = tempfile::tempdir().unwrap();
		let err = Corpus::from_file(dir.path().join("missing.txt")).unwrap_err();
		assert!(matches!(err, TokenizerError::Io { .. }));
	}

	#[test]
	fn empty_corpus_is_not_an_error() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("empty.txt");
		fs::write(&path, "").unwrap();

		let corpus = Corpus::from_file(&path).unwrap();
		assert!(corpus.tokens().is_empty());
	}
}
