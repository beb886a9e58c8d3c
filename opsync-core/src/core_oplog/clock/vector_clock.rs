/*
    vector_clock.rs - Vector clock for causal ordering of operations

    A vector clock maps each client id to the number of operations that
    client has produced. Comparing two clocks tells whether one operation
    causally precedes the other or whether they are concurrent:
    - Equal
    - LessThan (happened-before)
    - GreaterThan (happened-after)
    - Concurrent

    Missing entries count as zero. The clock serializes as a plain
    `{ clientId: counter }` JSON object.
*/

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Client identifier for vector clock entries
pub type ClientId = String;

/// Largest counter that survives a round trip through a JSON number on every peer.
pub const MAX_COUNTER: u64 = (1 << 53) - 1;

/// Counters at or past this value wrap back to 1 on the next increment.
const OVERFLOW_GUARD: u64 = MAX_COUNTER - 1000;

/// Result of comparing two vector clocks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VectorClockComparison {
    Equal,
    LessThan,
    GreaterThan,
    Concurrent,
}

/// Vector clock for tracking causal order
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VectorClock {
    /// Map from client ID to counter
    clock: BTreeMap<ClientId, u64>,
}

impl VectorClock {
    /// Create a new empty vector clock
    pub fn new() -> Self {
        VectorClock {
            clock: BTreeMap::new(),
        }
    }

    /// Clock with a single entry
    pub fn with_entry(client_id: &str, counter: u64) -> Self {
        let mut clock = Self::new();
        clock.set(client_id, counter);
        clock
    }

    /// Convert a legacy Lamport timestamp into a single-entry clock.
    ///
    /// A zero timestamp carries no causal information and yields an empty clock.
    pub fn from_lamport(client_id: &str, lamport: u64) -> Self {
        if lamport == 0 {
            Self::new()
        } else {
            Self::with_entry(client_id, lamport)
        }
    }

    /// Increment the counter for a client.
    ///
    /// A counter close to `MAX_COUNTER` restarts at 1 instead of overflowing.
    pub fn increment(&mut self, client_id: &str) {
        let counter = self.clock.entry(client_id.to_string()).or_insert(0);
        if *counter >= OVERFLOW_GUARD {
            tracing::warn!(client_id, counter = *counter, "Vector clock counter near overflow, resetting");
            *counter = 1;
        } else {
            *counter += 1;
        }
    }

    /// Copy of this clock with `client_id` incremented
    pub fn incremented(&self, client_id: &str) -> Self {
        let mut next = self.clone();
        next.increment(client_id);
        next
    }

    /// Get the counter for a client
    pub fn get(&self, client_id: &str) -> u64 {
        self.clock.get(client_id).copied().unwrap_or(0)
    }

    /// Set the counter for a client
    pub fn set(&mut self, client_id: &str, counter: u64) {
        self.clock.insert(client_id.to_string(), counter);
    }

    /// Merge another clock into this one (max of each entry)
    pub fn merge(&mut self, other: &VectorClock) {
        for (client_id, &counter) in &other.clock {
            let current = self.clock.entry(client_id.clone()).or_insert(0);
            *current = (*current).max(counter);
        }
    }

    /// Merged copy of two clocks
    pub fn merged(&self, other: &VectorClock) -> Self {
        let mut result = self.clone();
        result.merge(other);
        result
    }

    /// Compare two clocks. Missing entries are treated as zero.
    pub fn compare(&self, other: &VectorClock) -> VectorClockComparison {
        let mut self_greater = false;
        let mut other_greater = false;

        for client_id in self.clock.keys().chain(other.clock.keys()) {
            let mine = self.get(client_id);
            let theirs = other.get(client_id);
            if mine > theirs {
                self_greater = true;
            } else if theirs > mine {
                other_greater = true;
            }
            if self_greater && other_greater {
                return VectorClockComparison::Concurrent;
            }
        }

        match (self_greater, other_greater) {
            (false, false) => VectorClockComparison::Equal,
            (true, false) => VectorClockComparison::GreaterThan,
            (false, true) => VectorClockComparison::LessThan,
            (true, true) => VectorClockComparison::Concurrent,
        }
    }

    /// True if this clock happened strictly before `other`
    pub fn happened_before(&self, other: &VectorClock) -> bool {
        self.compare(other) == VectorClockComparison::LessThan
    }

    /// True if neither clock dominates the other
    pub fn is_concurrent(&self, other: &VectorClock) -> bool {
        self.compare(other) == VectorClockComparison::Concurrent
    }

    /// True if this clock has any entry ahead of `reference`
    pub fn has_changes_since(&self, reference: &VectorClock) -> bool {
        self.clock
            .iter()
            .any(|(client_id, &counter)| counter > reference.get(client_id))
    }

    /// Iterate over `(client_id, counter)` pairs in client order
    pub fn iter(&self) -> impl Iterator<Item = (&str, u64)> {
        self.clock.iter().map(|(k, v)| (k.as_str(), *v))
    }

    /// Get all client IDs in this clock
    pub fn client_ids(&self) -> Vec<String> {
        self.clock.keys().cloned().collect()
    }

    /// True when the clock has no entries or all entries are zero
    pub fn is_empty(&self) -> bool {
        self.clock.values().all(|&counter| counter == 0)
    }

    /// Number of clients tracked
    pub fn len(&self) -> usize {
        self.clock.len()
    }
}

impl fmt::Display for VectorClock {
    /// Formats as `{a:2, m:3}` with clients sorted alphabetically.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (i, (client_id, counter)) in self.clock.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}:{}", client_id, counter)?;
        }
        f.write_str("}")
    }
}

impl FromIterator<(String, u64)> for VectorClock {
    fn from_iter<I: IntoIterator<Item = (String, u64)>>(iter: I) -> Self {
        VectorClock {
            clock: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn clock(entries: &[(&str, u64)]) -> VectorClock {
        entries.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[test]
    fn test_vector_clock_creation() {
        let vc = VectorClock::new();
        assert!(vc.is_empty());
        assert_eq!(vc.len(), 0);
    }

    #[test]
    fn test_increment() {
        let mut vc = VectorClock::new();
        vc.increment("client1");
        assert_eq!(vc.get("client1"), 1);

        vc.increment("client1");
        assert_eq!(vc.get("client1"), 2);

        vc.increment("client2");
        assert_eq!(vc.get("client2"), 1);
    }

    #[test]
    fn test_incremented_leaves_original() {
        let vc = clock(&[("client1", 5), ("client2", 3)]);
        let next = vc.incremented("client1");
        assert_eq!(next, clock(&[("client1", 6), ("client2", 3)]));
        assert_eq!(vc.get("client1"), 5);
    }

    #[test]
    fn test_increment_overflow_protection() {
        let mut vc = clock(&[("A", MAX_COUNTER - 100)]);
        vc.increment("A");
        assert_eq!(vc.get("A"), 1);
        vc.increment("A");
        assert_eq!(vc.get("A"), 2);
    }

    #[test]
    fn test_merge() {
        let mut vc1 = clock(&[("client1", 3), ("client2", 1)]);
        let vc2 = clock(&[("client1", 2), ("client2", 4), ("client3", 1)]);

        vc1.merge(&vc2);

        assert_eq!(vc1.get("client1"), 3);
        assert_eq!(vc1.get("client2"), 4);
        assert_eq!(vc1.get("client3"), 1);
    }

    #[test]
    fn test_compare() {
        let a = clock(&[("client1", 1), ("client2", 2)]);
        let b = clock(&[("client1", 2), ("client2", 3)]);
        assert_eq!(a.compare(&b), VectorClockComparison::LessThan);
        assert_eq!(b.compare(&a), VectorClockComparison::GreaterThan);
        assert_eq!(a.compare(&a.clone()), VectorClockComparison::Equal);
        assert!(a.happened_before(&b));
    }

    #[test]
    fn test_compare_concurrent() {
        let a = clock(&[("client1", 2), ("client2", 1)]);
        let b = clock(&[("client1", 1), ("client2", 2)]);
        assert_eq!(a.compare(&b), VectorClockComparison::Concurrent);
        assert!(a.is_concurrent(&b));
        assert!(b.is_concurrent(&a));
    }

    #[test]
    fn test_compare_missing_entries_are_zero() {
        let a = clock(&[("client1", 1), ("client2", 0)]);
        let b = clock(&[("client1", 1)]);
        assert_eq!(a.compare(&b), VectorClockComparison::Equal);

        let empty = VectorClock::new();
        assert_eq!(b.compare(&empty), VectorClockComparison::GreaterThan);
        assert_eq!(empty.compare(&b), VectorClockComparison::LessThan);
        assert_eq!(empty.compare(&VectorClock::new()), VectorClockComparison::Equal);
    }

    #[test]
    fn test_display_sorted() {
        let vc = clock(&[("z", 1), ("a", 2), ("m", 3)]);
        assert_eq!(vc.to_string(), "{a:2, m:3, z:1}");
        assert_eq!(VectorClock::new().to_string(), "{}");
    }

    #[test]
    fn test_has_changes_since() {
        let reference = clock(&[("A", 2), ("B", 1)]);
        assert!(clock(&[("A", 3), ("B", 1)]).has_changes_since(&reference));
        assert!(!clock(&[("A", 2), ("B", 1)]).has_changes_since(&reference));
        assert!(!clock(&[("A", 1)]).has_changes_since(&reference));
        assert!(clock(&[("C", 1)]).has_changes_since(&reference));
        assert!(!VectorClock::new().has_changes_since(&reference));
        assert!(reference.has_changes_since(&VectorClock::new()));
    }

    #[test]
    fn test_from_lamport() {
        assert_eq!(VectorClock::from_lamport("deviceA", 42), clock(&[("deviceA", 42)]));
        assert!(VectorClock::from_lamport("deviceA", 0).is_empty());
    }

    #[test]
    fn test_json_shape() {
        let vc = clock(&[("b", 2), ("a", 1)]);
        assert_eq!(serde_json::to_string(&vc).unwrap(), r#"{"a":1,"b":2}"#);
        let parsed: VectorClock = serde_json::from_str(r#"{"x":7}"#).unwrap();
        assert_eq!(parsed.get("x"), 7);
    }

    #[test]
    fn test_three_way_resolution_dominates_all() {
        let a = clock(&[("A", 12), ("B", 5), ("C", 3)]);
        let b = clock(&[("A", 8), ("B", 9), ("C", 4)]);
        let c = clock(&[("A", 10), ("B", 6), ("C", 8)]);
        assert!(a.is_concurrent(&b));
        assert!(b.is_concurrent(&c));

        let resolved = a.merged(&b).merged(&c);
        assert_eq!(resolved, clock(&[("A", 12), ("B", 9), ("C", 8)]));
        for other in [&a, &b, &c] {
            assert_eq!(resolved.compare(other), VectorClockComparison::GreaterThan);
        }
    }

    fn arb_clock() -> impl Strategy<Value = VectorClock> {
        proptest::collection::btree_map("[a-d]", 0u64..50, 0..4)
            .prop_map(|m| m.into_iter().collect())
    }

    proptest! {
        #[test]
        fn prop_merge_dominates_inputs(a in arb_clock(), b in arb_clock()) {
            let merged = a.merged(&b);
            prop_assert!(!a.has_changes_since(&merged));
            prop_assert!(!b.has_changes_since(&merged));
        }

        #[test]
        fn prop_merge_commutative(a in arb_clock(), b in arb_clock()) {
            prop_assert_eq!(a.merged(&b).compare(&b.merged(&a)), VectorClockComparison::Equal);
        }

        #[test]
        fn prop_compare_antisymmetric(a in arb_clock(), b in arb_clock()) {
            let expected = match a.compare(&b) {
                VectorClockComparison::LessThan => VectorClockComparison::GreaterThan,
                VectorClockComparison::GreaterThan => VectorClockComparison::LessThan,
                other => other,
            };
            prop_assert_eq!(b.compare(&a), expected);
        }

        #[test]
        fn prop_increment_advances(a in arb_clock(), client in "[a-d]") {
            prop_assert_eq!(a.incremented(&client).compare(&a), VectorClockComparison::GreaterThan);
        }
    }
}
