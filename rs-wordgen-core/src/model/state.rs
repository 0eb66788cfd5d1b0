use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Represents a context in the frequency model.
///
/// A `State` corresponds to a window suffix (`key`, a sequence of token
/// indices, possibly empty) and stores all observed transitions from this
/// suffix to the next token.
///
/// Conceptually, this is a node in a Markov chain where outgoing edges
/// are weighted by their number of observations.
///
/// ## Invariants
/// - All transitions belong to the same `key`
/// - Each transition occurrence count is strictly positive
/// - `total` is the sum of all transition counts
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct State {
	/// Identifier of the state (token indices of the suffix).
	key: Vec<usize>,
	/// Outgoing transitions indexed by the next token.
	/// Example: { 4 => 42, 17 => 3 }
	transitions: HashMap<usize, u64>,
	total: u64,
}

impl State {
	/// Creates a new empty state for the given suffix.
	pub fn new(key: &[usize]) -> Self {
		Self {
			key: key.to_vec(),
			transitions: HashMap::new(),
			total: 0,
		}
	}

	/// Records an occurrence of a transition toward `next`.
	pub fn add_transition(&mut self, next: usize) {
		*self.transitions.entry(next).or_insert(0) += 1;
		self.total += 1;
	}

	/// Number of observations from this state.
	pub fn total(&self) -> u64 {
		self.total
	}

	/// Number of observed transitions toward `next`.
	pub fn count(&self, next: usize) -> u64 {
		self.transitions.get(&next).copied().unwrap_or(0)
	}

	/// Iterates over `(next, count)` pairs.
	pub fn transitions(&self) -> impl Iterator<Item = (usize, u64)> + '_ {
		self.transitions.iter().map(|(&next, &count)| (next, count))
	}

	/// Merges another state into this one.
	///
	/// Both states must represent the same suffix (`key`).
	/// Transition occurrence counts are summed.
	///
	/// # Errors
	/// Returns an error if the state keys do not match.
	pub fn merge(&mut self, other: &Self) -> Result<(), String> {
		if self.key != other.key {
			return Err("Key mismatch".to_owned());
		}

		for (next, occurrence) in &other.transitions {
			*self.transitions.entry(*next).or_insert(0) += *occurrence;
		}
		self.total += other.total;

		Ok(())
	}
}
