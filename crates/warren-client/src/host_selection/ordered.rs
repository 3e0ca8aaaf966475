//! Insertion-order host selection.

use crate::error::{Error, Result};

use super::HostSelectionStrategy;

/// Walks candidates in insertion order, wrapping around, anchored at the last
/// candidate that worked.
///
/// A cycle starts at the current candidate and ends when the walk reaches the
/// anchor, so with `N` failing candidates [`next`](HostSelectionStrategy::next)
/// returns `true` exactly `N - 1` times. [`reset`](HostSelectionStrategy::reset)
/// steps one past the anchor so the host that just dropped is tried last; the
/// very first reset is a no-op so the first cycle starts at the first host.
///
/// [`add`](HostSelectionStrategy::add) moves the anchor to the newly added
/// candidate, so the next reset restarts the walk at the first host.
#[derive(Debug, Clone)]
pub struct OrderedHostSelection<T> {
    items: Vec<T>,
    current: usize,
    anchor: usize,
    succeeded: bool,
    first_use: bool,
}

impl<T> Default for OrderedHostSelection<T> {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            current: 0,
            anchor: 0,
            succeeded: false,
            first_use: true,
        }
    }
}

impl<T> OrderedHostSelection<T> {
    /// Creates an empty strategy.
    pub fn new() -> Self {
        Self::default()
    }

    fn advance(&mut self) {
        self.current = (self.current + 1) % self.items.len();
    }
}

impl<T: Send + std::fmt::Debug> FromIterator<T> for OrderedHostSelection<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        let mut strategy = Self::new();
        for item in iter {
            strategy.add(item);
        }
        strategy
    }
}

impl<T: Send + std::fmt::Debug> HostSelectionStrategy<T> for OrderedHostSelection<T> {
    fn add(&mut self, item: T) {
        self.items.push(item);
        self.anchor = self.items.len() - 1;
    }

    fn current(&self) -> Result<&T> {
        self.items.get(self.current).ok_or(Error::NoCandidates)
    }

    fn next(&mut self) -> bool {
        if self.items.is_empty() || self.succeeded || self.current == self.anchor {
            return false;
        }
        self.advance();
        true
    }

    fn success(&mut self) {
        if self.items.is_empty() {
            return;
        }
        self.succeeded = true;
        self.anchor = self.current;
    }

    fn succeeded(&self) -> bool {
        self.succeeded
    }

    fn reset(&mut self) {
        self.succeeded = false;
        if self.first_use {
            self.first_use = false;
            return;
        }
        if !self.items.is_empty() {
            self.current = (self.anchor + 1) % self.items.len();
        }
    }

    fn len(&self) -> usize {
        self.items.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn walk_cycle(strategy: &mut OrderedHostSelection<&'static str>) -> Vec<&'static str> {
        let mut seen = vec![*strategy.current().unwrap()];
        while strategy.next() {
            seen.push(*strategy.current().unwrap());
        }
        seen
    }

    #[test]
    fn test_empty_current_fails() {
        let strategy = OrderedHostSelection::<&str>::new();
        assert_eq!(strategy.current(), Err(Error::NoCandidates));
    }

    #[test]
    fn test_first_cycle_visits_every_host_once() {
        let mut strategy: OrderedHostSelection<_> = ["a", "b", "c"].into_iter().collect();
        strategy.reset();
        assert_eq!(walk_cycle(&mut strategy), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_next_is_refused_after_success() {
        let mut strategy: OrderedHostSelection<_> = ["a", "b", "c"].into_iter().collect();
        strategy.reset();
        assert!(strategy.next());
        strategy.success();
        assert!(strategy.succeeded());
        assert!(!strategy.next());
        assert_eq!(strategy.current().unwrap(), &"b");
    }

    #[test]
    fn test_reset_after_success_skips_good_host() {
        let mut strategy: OrderedHostSelection<_> = ["a", "b", "c"].into_iter().collect();
        strategy.reset();
        strategy.next();
        strategy.success();

        strategy.reset();
        assert!(!strategy.succeeded());
        assert_eq!(walk_cycle(&mut strategy), vec!["c", "a", "b"]);
    }

    #[test]
    fn test_reset_wraps_after_last_host() {
        let mut strategy: OrderedHostSelection<_> = ["a", "b", "c"].into_iter().collect();
        strategy.reset();
        strategy.next();
        strategy.next();
        strategy.success();

        strategy.reset();
        assert_eq!(strategy.current().unwrap(), &"a");
    }

    #[test]
    fn test_single_host_is_always_retried() {
        let mut strategy: OrderedHostSelection<_> = ["only"].into_iter().collect();
        strategy.reset();
        assert!(!strategy.next());
        strategy.success();
        strategy.reset();
        assert_eq!(strategy.current().unwrap(), &"only");
        assert!(!strategy.next());
    }

    #[test]
    fn test_exhausted_cycle_restarts_past_anchor() {
        let mut strategy: OrderedHostSelection<_> = ["a", "b", "c"].into_iter().collect();
        strategy.reset();
        assert_eq!(walk_cycle(&mut strategy), vec!["a", "b", "c"]);

        strategy.reset();
        assert_eq!(walk_cycle(&mut strategy), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_add_moves_anchor_to_new_host() {
        let mut strategy: OrderedHostSelection<_> = ["a", "b"].into_iter().collect();
        strategy.reset();
        strategy.success();

        strategy.add("c");
        strategy.reset();
        // the anchor moved to "c", so the cycle restarts at "a" and ends at "c"
        assert_eq!(strategy.current().unwrap(), &"a");
        assert_eq!(walk_cycle(&mut strategy), vec!["a", "b", "c"]);
    }
}
