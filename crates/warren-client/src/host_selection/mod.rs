//! Cluster host selection for failover
//!
//! A strategy walks the configured broker hosts during a reconnect cycle:
//!
//! ```text
//! reset() ──► current() ──► open ──ok──► success()
//!                 ▲            │
//!                 │           err
//!                 │            ▼
//!                 └─ true ── next() ── false ──► wait, start a new cycle
//! ```
//!
//! Two strategies are provided:
//!
//! - [`OrderedHostSelection`]: insertion order, wrapping around, anchored at the
//!   last host that worked
//! - [`RandomHostSelection`]: a fresh shuffle every cycle, no wraparound

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::Result;

mod ordered;
mod random;

pub use ordered::OrderedHostSelection;
pub use random::RandomHostSelection;

/// Iterates candidate hosts across a reconnect cycle.
pub trait HostSelectionStrategy<T>: Send + fmt::Debug {
    /// Appends a candidate.
    fn add(&mut self, item: T);

    /// The active candidate.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoCandidates`](crate::Error::NoCandidates) when the list is empty.
    fn current(&self) -> Result<&T>;

    /// Moves to the next candidate for this cycle.
    ///
    /// Returns `false` without moving once the cycle is exhausted or a candidate
    /// has already succeeded.
    fn next(&mut self) -> bool;

    /// Marks the current candidate as the one that worked this cycle.
    fn success(&mut self);

    /// Whether [`success`](Self::success) was called this cycle.
    fn succeeded(&self) -> bool;

    /// Starts a new cycle.
    fn reset(&mut self);

    /// Number of candidates.
    fn len(&self) -> usize;

    /// Whether there are no candidates.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Which strategy a connection uses to pick hosts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HostSelection {
    /// Insertion order, anchored at the last good host.
    #[default]
    Ordered,
    /// Shuffled every cycle.
    Random,
}

impl HostSelection {
    /// Builds an empty strategy of this kind.
    pub fn build<T>(self) -> Box<dyn HostSelectionStrategy<T>>
    where
        T: Send + fmt::Debug + 'static,
    {
        match self {
            Self::Ordered => Box::new(OrderedHostSelection::new()),
            Self::Random => Box::new(RandomHostSelection::new()),
        }
    }
}
