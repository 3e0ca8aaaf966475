//! Shuffled host selection.

use crate::error::{Error, Result};

use super::HostSelectionStrategy;

/// Walks a shuffled copy of the candidates without wrapping around.
///
/// The list is reshuffled whenever a candidate is added and on every
/// [`reset`](HostSelectionStrategy::reset).
#[derive(Debug, Clone)]
pub struct RandomHostSelection<T> {
    items: Vec<T>,
    current: usize,
    succeeded: bool,
    rng: fastrand::Rng,
}

impl<T> Default for RandomHostSelection<T> {
    fn default() -> Self {
        Self::with_rng(fastrand::Rng::new())
    }
}

impl<T> RandomHostSelection<T> {
    /// Creates an empty strategy seeded from the thread-local generator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty strategy with a fixed seed, for reproducible ordering.
    pub fn with_seed(seed: u64) -> Self {
        Self::with_rng(fastrand::Rng::with_seed(seed))
    }

    fn with_rng(rng: fastrand::Rng) -> Self {
        Self {
            items: Vec::new(),
            current: 0,
            succeeded: false,
            rng,
        }
    }

    fn shuffle(&mut self) {
        self.rng.shuffle(&mut self.items);
        self.current = 0;
    }
}

impl<T: Send + std::fmt::Debug> HostSelectionStrategy<T> for RandomHostSelection<T> {
    fn add(&mut self, item: T) {
        self.items.push(item);
        self.shuffle();
    }

    fn current(&self) -> Result<&T> {
        self.items.get(self.current).ok_or(Error::NoCandidates)
    }

    fn next(&mut self) -> bool {
        if self.succeeded || self.current + 1 >= self.items.len() {
            return false;
        }
        self.current += 1;
        true
    }

    fn success(&mut self) {
        self.succeeded = !self.items.is_empty();
    }

    fn succeeded(&self) -> bool {
        self.succeeded
    }

    fn reset(&mut self) {
        self.succeeded = false;
        self.shuffle();
    }

    fn len(&self) -> usize {
        self.items.len()
    }
}
