//! Subscription Registry
//!
//! Tracks which instruments the application currently wants streamed.
//! The registry is the source of truth: it survives transport loss and
//! is replayed as subscribe intents onto every new connection, so the
//! server's view converges to it once a connection is open.
//!
//! The registry knows nothing about connections. The client decides
//! whether a change is sent immediately (connection open) or deferred
//! until the next replay.

use std::collections::BTreeSet;

use crate::domain::messages::OutboundFrame;
use crate::domain::symbol::Symbol;

/// The set of symbols the application is interested in.
///
/// Each symbol appears at most once. Replay order is the canonical sort
/// order of the symbols, which keeps the wire output deterministic.
///
/// # Example
///
/// ```rust
/// use market_stream_client::{Symbol, SubscriptionRegistry};
///
/// let mut registry = SubscriptionRegistry::new();
/// assert!(registry.insert(Symbol::parse("aapl").unwrap()));
/// assert!(!registry.insert(Symbol::parse("AAPL").unwrap()));
/// assert_eq!(registry.len(), 1);
/// assert_eq!(registry.replay().len(), 1);
/// ```
#[derive(Debug, Default, Clone)]
pub struct SubscriptionRegistry {
    symbols: BTreeSet<Symbol>,
}

impl SubscriptionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            symbols: BTreeSet::new(),
        }
    }

    /// Add a symbol. Returns `true` if it was not already present.
    pub fn insert(&mut self, symbol: Symbol) -> bool {
        self.symbols.insert(symbol)
    }

    /// Remove a symbol. Returns `true` if it was present.
    pub fn remove(&mut self, symbol: &Symbol) -> bool {
        self.symbols.remove(symbol)
    }

    /// Whether the symbol is currently wanted.
    #[must_use]
    pub fn contains(&self, symbol: &Symbol) -> bool {
        self.symbols.contains(symbol)
    }

    /// Number of distinct symbols.
    #[must_use]
    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    /// Whether no symbols are wanted.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    /// Snapshot of the wanted symbols in canonical order.
    #[must_use]
    pub fn symbols(&self) -> Vec<Symbol> {
        self.symbols.iter().cloned().collect()
    }

    /// One subscribe intent per wanted symbol, for a freshly opened connection.
    #[must_use]
    pub fn replay(&self) -> Vec<OutboundFrame> {
        self.symbols
            .iter()
            .cloned()
            .map(OutboundFrame::subscribe)
            .collect()
    }

    /// Forget every symbol.
    pub fn clear(&mut self) {
        self.symbols.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sym(raw: &str) -> Symbol {
        Symbol::parse(raw).unwrap()
    }

    #[test]
    fn insert_is_idempotent_across_case() {
        let mut registry = SubscriptionRegistry::new();

        assert!(registry.insert(sym("aapl")));
        assert!(!registry.insert(sym("AAPL")));

        assert_eq!(registry.symbols(), vec![sym("AAPL")]);
    }

    #[test]
    fn remove_absent_is_noop() {
        let mut registry = SubscriptionRegistry::new();
        assert!(!registry.remove(&sym("TSLA")));
        assert!(registry.is_empty());
    }

    #[test]
    fn subscribe_then_unsubscribe_leaves_nothing_to_replay() {
        let mut registry = SubscriptionRegistry::new();
        registry.insert(sym("TSLA"));
        registry.remove(&sym("tsla"));

        assert!(registry.replay().is_empty());
    }

    #[test]
    fn replay_emits_one_subscribe_per_symbol() {
        let mut registry = SubscriptionRegistry::new();
        registry.insert(sym("MSFT"));
        registry.insert(sym("AAPL"));
        registry.insert(sym("msft"));

        let frames = registry.replay();
        assert_eq!(
            frames,
            vec![
                OutboundFrame::subscribe(sym("AAPL")),
                OutboundFrame::subscribe(sym("MSFT")),
            ]
        );
    }

    #[test]
    fn replay_does_not_consume_registry() {
        let mut registry = SubscriptionRegistry::new();
        registry.insert(sym("NVDA"));

        let _ = registry.replay();
        let _ = registry.replay();

        assert!(registry.contains(&sym("nvda")));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn clear_forgets_everything() {
        let mut registry = SubscriptionRegistry::new();
        registry.insert(sym("AMD"));
        registry.insert(sym("INTC"));

        registry.clear();

        assert!(registry.is_empty());
        assert!(registry.replay().is_empty());
    }
}
