//! Watchlist Subscription Set
//!
//! The authoritative list of symbols the stream should carry: an ordered
//! list of static favorites plus a single dynamic slot that the user can swap
//! without touching the favorites.
//!
//! # Design
//!
//! Readers (the stream task on every reconnect, UI status calls) load an
//! immutable [`SubscriptionSnapshot`] through `arc_swap` and never take a
//! lock. Writers serialize on one mutation lock, build the next snapshot and
//! publish it atomically, so a reader sees either the old set or the new one.
//!
//! Every mutation returns the [`SubscriptionChanges`] the downstream stream
//! has to apply to match the new set.

use std::collections::HashSet;
use std::sync::Arc;

use arc_swap::ArcSwap;
use parking_lot::Mutex;

use crate::domain::market::Symbol;

// =============================================================================
// Subscription Changes
// =============================================================================

/// Downstream delta produced by a mutation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscriptionChanges {
    /// Symbols that must be newly subscribed.
    pub subscribe: Vec<Symbol>,
    /// Symbols that must be unsubscribed.
    pub unsubscribe: Vec<Symbol>,
}

impl SubscriptionChanges {
    /// Check if there are no changes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.subscribe.is_empty() && self.unsubscribe.is_empty()
    }

    /// Total number of symbol transitions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.subscribe.len() + self.unsubscribe.len()
    }

    /// Create changes with only subscriptions.
    #[must_use]
    pub fn subscribe_only(symbols: impl IntoIterator<Item = Symbol>) -> Self {
        Self {
            subscribe: symbols.into_iter().collect(),
            unsubscribe: Vec::new(),
        }
    }

    /// Create changes with only unsubscriptions.
    #[must_use]
    pub fn unsubscribe_only(symbols: impl IntoIterator<Item = Symbol>) -> Self {
        Self {
            subscribe: Vec::new(),
            unsubscribe: symbols.into_iter().collect(),
        }
    }

    fn between(before: &SubscriptionSnapshot, after: &SubscriptionSnapshot) -> Self {
        let unsubscribe = before
            .symbols()
            .filter(|symbol| !after.contains(symbol))
            .cloned()
            .collect();
        let subscribe = after
            .symbols()
            .filter(|symbol| !before.contains(symbol))
            .cloned()
            .collect();

        Self {
            subscribe,
            unsubscribe,
        }
    }
}

// =============================================================================
// Snapshot
// =============================================================================

/// Immutable view of the subscription set at one point in time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscriptionSnapshot {
    statics: Vec<Symbol>,
    dynamic: Option<Symbol>,
}

impl SubscriptionSnapshot {
    /// Favorites in insertion order.
    #[must_use]
    pub fn statics(&self) -> &[Symbol] {
        &self.statics
    }

    /// The dynamic slot.
    #[must_use]
    pub const fn dynamic(&self) -> Option<&Symbol> {
        self.dynamic.as_ref()
    }

    /// All symbols: favorites first, then the dynamic symbol.
    pub fn symbols(&self) -> impl Iterator<Item = &Symbol> {
        self.statics.iter().chain(self.dynamic.iter())
    }

    /// Whether `symbol` is in the set.
    #[must_use]
    pub fn contains(&self, symbol: &Symbol) -> bool {
        self.dynamic.as_ref() == Some(symbol) || self.statics.contains(symbol)
    }

    /// Total number of symbols.
    #[must_use]
    pub fn len(&self) -> usize {
        self.statics.len() + usize::from(self.dynamic.is_some())
    }

    /// Whether the set is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// =============================================================================
// Subscription Set
// =============================================================================

/// Error raised when a mutation would duplicate a symbol across slots.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SubscriptionError {
    /// Symbol already occupies the dynamic slot.
    #[error("{0} is the dynamic symbol and cannot also be a favorite")]
    AlreadyDynamic(Symbol),
    /// Symbol is already a favorite.
    #[error("{0} is already a favorite and cannot be the dynamic symbol")]
    AlreadyStatic(Symbol),
}

/// Counts describing the current set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SubscriptionStats {
    /// Number of favorites.
    pub static_count: usize,
    /// Whether the dynamic slot is occupied.
    pub has_dynamic: bool,
    /// Total streamed symbols.
    pub total: usize,
}

/// Authoritative, concurrently readable set of streamed symbols.
#[derive(Debug)]
pub struct SubscriptionSet {
    current: ArcSwap<SubscriptionSnapshot>,
    mutation: Mutex<()>,
}

impl Default for SubscriptionSet {
    fn default() -> Self {
        Self::new()
    }
}

impl SubscriptionSet {
    /// Create an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self {
            current: ArcSwap::from_pointee(SubscriptionSnapshot::default()),
            mutation: Mutex::new(()),
        }
    }

    /// Create a set seeded with favorites and an optional dynamic symbol.
    ///
    /// Duplicate favorites are collapsed; a dynamic symbol that is also a
    /// favorite is dropped.
    #[must_use]
    pub fn with_symbols(statics: impl IntoIterator<Item = Symbol>, dynamic: Option<Symbol>) -> Self {
        let set = Self::new();
        set.replace(statics, dynamic);
        set
    }

    /// Lock-free snapshot of the current set.
    #[must_use]
    pub fn snapshot(&self) -> Arc<SubscriptionSnapshot> {
        self.current.load_full()
    }

    /// Current symbols in stream order.
    #[must_use]
    pub fn current_symbols(&self) -> Vec<Symbol> {
        self.current.load().symbols().cloned().collect()
    }

    /// Whether `symbol` is currently streamed.
    #[must_use]
    pub fn contains(&self, symbol: &Symbol) -> bool {
        self.current.load().contains(symbol)
    }

    /// Counts for status reporting.
    #[must_use]
    pub fn stats(&self) -> SubscriptionStats {
        let snapshot = self.current.load();
        SubscriptionStats {
            static_count: snapshot.statics.len(),
            has_dynamic: snapshot.dynamic.is_some(),
            total: snapshot.len(),
        }
    }

    /// Add a favorite.
    ///
    /// Adding an existing favorite is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`SubscriptionError::AlreadyDynamic`] if the symbol currently
    /// occupies the dynamic slot.
    pub fn add_static(&self, symbol: Symbol) -> Result<SubscriptionChanges, SubscriptionError> {
        let _guard = self.mutation.lock();
        let current = self.current.load_full();

        if current.statics.contains(&symbol) {
            return Ok(SubscriptionChanges::default());
        }
        if current.dynamic.as_ref() == Some(&symbol) {
            return Err(SubscriptionError::AlreadyDynamic(symbol));
        }

        let mut next = SubscriptionSnapshot::clone(&current);
        next.statics.push(symbol.clone());
        self.current.store(Arc::new(next));

        Ok(SubscriptionChanges::subscribe_only([symbol]))
    }

    /// Remove a favorite. Removing an unknown symbol is a no-op.
    pub fn remove_static(&self, symbol: &Symbol) -> SubscriptionChanges {
        let _guard = self.mutation.lock();
        let current = self.current.load_full();

        if !current.statics.contains(symbol) {
            return SubscriptionChanges::default();
        }

        let mut next = SubscriptionSnapshot::clone(&current);
        next.statics.retain(|s| s != symbol);
        self.current.store(Arc::new(next));

        SubscriptionChanges::unsubscribe_only([symbol.clone()])
    }

    /// Replace the dynamic slot.
    ///
    /// Swapping one dynamic symbol for another yields exactly one unsubscribe
    /// and one subscribe.
    ///
    /// # Errors
    ///
    /// Returns [`SubscriptionError::AlreadyStatic`] if the symbol is a
    /// favorite.
    pub fn set_dynamic(
        &self,
        symbol: Option<Symbol>,
    ) -> Result<SubscriptionChanges, SubscriptionError> {
        let _guard = self.mutation.lock();
        let current = self.current.load_full();

        if current.dynamic == symbol {
            return Ok(SubscriptionChanges::default());
        }
        if let Some(candidate) = &symbol
            && current.statics.contains(candidate)
        {
            return Err(SubscriptionError::AlreadyStatic(candidate.clone()));
        }

        let mut next = SubscriptionSnapshot::clone(&current);
        next.dynamic = symbol;
        let changes = SubscriptionChanges::between(&current, &next);
        self.current.store(Arc::new(next));

        Ok(changes)
    }

    /// Replace the whole set, returning the difference.
    ///
    /// Used when preferences are reloaded. Duplicate favorites are collapsed
    /// and a dynamic symbol that duplicates a favorite is dropped.
    pub fn replace(
        &self,
        statics: impl IntoIterator<Item = Symbol>,
        dynamic: Option<Symbol>,
    ) -> SubscriptionChanges {
        let mut seen = HashSet::new();
        let statics: Vec<Symbol> = statics
            .into_iter()
            .filter(|symbol| seen.insert(symbol.clone()))
            .collect();

        let dynamic = dynamic.filter(|symbol| {
            let duplicate = seen.contains(symbol);
            if duplicate {
                tracing::warn!(
                    symbol = %symbol,
                    "Dynamic symbol is already a favorite, keeping it as a favorite only"
                );
            }
            !duplicate
        });

        let _guard = self.mutation.lock();
        let current = self.current.load_full();
        let next = SubscriptionSnapshot { statics, dynamic };
        let changes = SubscriptionChanges::between(&current, &next);
        self.current.store(Arc::new(next));

        changes
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn sym(s: &str) -> Symbol {
        Symbol::new(s).unwrap()
    }

    #[test]
    fn new_set_is_empty() {
        let set = SubscriptionSet::new();
        assert!(set.current_symbols().is_empty());
        assert_eq!(set.stats(), SubscriptionStats::default());
    }

    #[test]
    fn add_static_preserves_insertion_order() {
        let set = SubscriptionSet::new();
        set.add_static(sym("ETHUSDT")).unwrap();
        set.add_static(sym("BTCUSDT")).unwrap();
        set.add_static(sym("SOLUSDT")).unwrap();

        assert_eq!(
            set.current_symbols(),
            vec![sym("ETHUSDT"), sym("BTCUSDT"), sym("SOLUSDT")]
        );
    }

    #[test]
    fn add_static_twice_is_noop() {
        let set = SubscriptionSet::new();
        let first = set.add_static(sym("BTCUSDT")).unwrap();
        let second = set.add_static(sym("BTCUSDT")).unwrap();

        assert_eq!(first, SubscriptionChanges::subscribe_only([sym("BTCUSDT")]));
        assert!(second.is_empty());
        assert_eq!(set.stats().static_count, 1);
    }

    #[test]
    fn add_static_rejects_dynamic_symbol() {
        let set = SubscriptionSet::new();
        set.set_dynamic(Some(sym("PEPEUSDT"))).unwrap();

        let err = set.add_static(sym("PEPEUSDT")).unwrap_err();
        assert_eq!(err, SubscriptionError::AlreadyDynamic(sym("PEPEUSDT")));
    }

    #[test]
    fn remove_static_unknown_is_noop() {
        let set = SubscriptionSet::new();
        assert!(set.remove_static(&sym("BTCUSDT")).is_empty());
    }

    #[test]
    fn remove_static_emits_unsubscribe() {
        let set = SubscriptionSet::with_symbols([sym("BTCUSDT"), sym("ETHUSDT")], None);
        let changes = set.remove_static(&sym("BTCUSDT"));

        assert_eq!(changes, SubscriptionChanges::unsubscribe_only([sym("BTCUSDT")]));
        assert_eq!(set.current_symbols(), vec![sym("ETHUSDT")]);
    }

    #[test]
    fn set_dynamic_swap_is_one_unsubscribe_then_one_subscribe() {
        let set = SubscriptionSet::with_symbols([sym("BTCUSDT")], Some(sym("PEPEUSDT")));

        let changes = set.set_dynamic(Some(sym("DOGEUSDT"))).unwrap();

        assert_eq!(changes.unsubscribe, vec![sym("PEPEUSDT")]);
        assert_eq!(changes.subscribe, vec![sym("DOGEUSDT")]);
        assert_eq!(set.current_symbols(), vec![sym("BTCUSDT"), sym("DOGEUSDT")]);
    }

    #[test]
    fn set_dynamic_same_symbol_is_noop() {
        let set = SubscriptionSet::with_symbols([], Some(sym("PEPEUSDT")));
        assert!(set.set_dynamic(Some(sym("PEPEUSDT"))).unwrap().is_empty());
    }

    #[test]
    fn set_dynamic_none_clears_slot() {
        let set = SubscriptionSet::with_symbols([], Some(sym("PEPEUSDT")));
        let changes = set.set_dynamic(None).unwrap();

        assert_eq!(changes, SubscriptionChanges::unsubscribe_only([sym("PEPEUSDT")]));
        assert!(set.snapshot().dynamic().is_none());
    }

    #[test]
    fn set_dynamic_rejects_favorite() {
        let set = SubscriptionSet::with_symbols([sym("BTCUSDT")], None);
        let err = set.set_dynamic(Some(sym("BTCUSDT"))).unwrap_err();
        assert_eq!(err, SubscriptionError::AlreadyStatic(sym("BTCUSDT")));
    }

    #[test]
    fn replace_returns_set_difference() {
        let set = SubscriptionSet::with_symbols(
            [sym("BTCUSDT"), sym("ETHUSDT")],
            Some(sym("PEPEUSDT")),
        );

        let changes = set.replace([sym("ETHUSDT"), sym("SOLUSDT")], Some(sym("PEPEUSDT")));

        assert_eq!(changes.subscribe, vec![sym("SOLUSDT")]);
        assert_eq!(changes.unsubscribe, vec![sym("BTCUSDT")]);
    }

    #[test]
    fn replace_collapses_duplicates() {
        let set = SubscriptionSet::new();
        set.replace(
            [sym("BTCUSDT"), sym("BTCUSDT"), sym("ETHUSDT")],
            Some(sym("ETHUSDT")),
        );

        assert_eq!(set.current_symbols(), vec![sym("BTCUSDT"), sym("ETHUSDT")]);
        assert!(set.snapshot().dynamic().is_none());
    }

    #[test]
    fn snapshot_is_unaffected_by_later_mutation() {
        let set = SubscriptionSet::with_symbols([sym("BTCUSDT")], None);
        let before = set.snapshot();

        set.add_static(sym("ETHUSDT")).unwrap();

        assert_eq!(before.len(), 1);
        assert_eq!(set.snapshot().len(), 2);
    }

    #[test]
    fn thread_safety_concurrent_mutations_and_reads() {
        use std::thread;

        let set = Arc::new(SubscriptionSet::new());
        let mut handles = vec![];

        for i in 0..8 {
            let s = Arc::clone(&set);
            handles.push(thread::spawn(move || {
                s.add_static(sym(&format!("SYM{i}USDT"))).unwrap();
                s.add_static(sym("SHAREDUSDT")).unwrap();
            }));
        }

        for _ in 0..4 {
            let s = Arc::clone(&set);
            handles.push(thread::spawn(move || {
                for _ in 0..100 {
                    let snapshot = s.snapshot();
                    let unique: HashSet<_> = snapshot.symbols().collect();
                    assert_eq!(unique.len(), snapshot.len());
                }
            }));
        }

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(set.stats().static_count, 9);
    }

    #[derive(Debug, Clone)]
    enum Op {
        AddStatic(usize),
        RemoveStatic(usize),
        SetDynamic(Option<usize>),
        Replace(Vec<usize>, Option<usize>),
    }

    const POOL: [&str; 5] = ["BTCUSDT", "ETHUSDT", "SOLUSDT", "PEPEUSDT", "DOGEUSDT"];

    fn op_strategy() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0..POOL.len()).prop_map(Op::AddStatic),
            (0..POOL.len()).prop_map(Op::RemoveStatic),
            proptest::option::of(0..POOL.len()).prop_map(Op::SetDynamic),
            (
                proptest::collection::vec(0..POOL.len(), 0..6),
                proptest::option::of(0..POOL.len())
            )
                .prop_map(|(statics, dynamic)| Op::Replace(statics, dynamic)),
        ]
    }

    proptest! {
        #[test]
        fn never_duplicates_and_deltas_track_the_set(ops in proptest::collection::vec(op_strategy(), 0..40)) {
            let set = SubscriptionSet::new();
            let mut downstream: HashSet<Symbol> = HashSet::new();

            for op in ops {
                let changes = match op {
                    Op::AddStatic(i) => set.add_static(sym(POOL[i])).unwrap_or_default(),
                    Op::RemoveStatic(i) => set.remove_static(&sym(POOL[i])),
                    Op::SetDynamic(i) => set.set_dynamic(i.map(|i| sym(POOL[i]))).unwrap_or_default(),
                    Op::Replace(statics, dynamic) => set.replace(
                        statics.into_iter().map(|i| sym(POOL[i])),
                        dynamic.map(|i| sym(POOL[i])),
                    ),
                };

                for symbol in &changes.unsubscribe {
                    prop_assert!(downstream.remove(symbol));
                }
                for symbol in &changes.subscribe {
                    prop_assert!(downstream.insert(symbol.clone()));
                }

                let symbols = set.current_symbols();
                let unique: HashSet<Symbol> = symbols.iter().cloned().collect();
                prop_assert_eq!(unique.len(), symbols.len());
                prop_assert_eq!(&unique, &downstream);
            }
        }
    }
}
