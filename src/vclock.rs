//! A generic dotted version vector implementation.
//!
//! # Examples
//!
//! ```
//! use crdts::VClock;
//! let (mut a, mut b): (VClock<u8>, VClock<u8>) = (VClock::new(), VClock::new());
//! a.witness(1, 2);
//! b.witness(1, 1);
//! assert!(a.descends(&b));
//! ```

use std::cmp::Ordering;
use std::collections::{btree_map, BTreeMap, BTreeSet};
use std::fmt::{self, Debug, Display};
use std::hash::Hash;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// A counter tracks causality at a particular actor. Counters start at 1;
/// an absent actor has an implied counter of 0.
pub type Counter = u64;

/// Common Actor bound. Actors are opaque, equality-comparable identifiers
/// for whatever mutated a CRDT; the library never assumes an ordering on
/// actors beyond what's needed to put them in a `BTreeMap`.
pub trait Actor: Ord + Clone + Hash + Debug + Serialize + DeserializeOwned {}
impl<A: Ord + Clone + Hash + Debug + Serialize + DeserializeOwned> Actor for A {}

/// A `Dot` names a single update event: the counter an actor reached when
/// it performed one particular mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(bound(deserialize = ""))]
pub struct Dot<A: Actor> {
    /// Actor that produced this update.
    pub actor: A,
    /// The actor's counter at the time of the update.
    pub counter: Counter,
}

impl<A: Actor> Dot<A> {
    /// Builds a dot directly. Used when a caller pre-stamps an update
    /// (e.g. a `Map` sharing one dot across a batch of sub-ops).
    pub fn new(actor: A, counter: Counter) -> Self {
        Dot { actor, counter }
    }
}

impl<A: Actor + Display> Display for Dot<A> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}:{}", self.actor, self.counter)
    }
}

/// An `update` entry point accepts either an actor (the CRDT allocates a
/// fresh dot of its own) or a dot that was already stamped by an enclosing
/// operation (e.g. a `Map` batch) and must be adopted verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Stamp<A: Actor> {
    /// Allocate a new dot for this actor.
    Actor(A),
    /// Adopt this pre-stamped dot as-is.
    Dot(Dot<A>),
}

impl<A: Actor> From<A> for Stamp<A> {
    fn from(actor: A) -> Self {
        Stamp::Actor(actor)
    }
}

impl<A: Actor> From<Dot<A>> for Stamp<A> {
    fn from(dot: Dot<A>) -> Self {
        Stamp::Dot(dot)
    }
}

/// A `VClock` maps each actor to the greatest counter witnessed from it.
/// It is used both as a whole-state causal clock and, per-element, as the
/// minimal "dot set" recording exactly the adds that birthed an element's
/// current presence (see module docs on `Orswot`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(bound(deserialize = ""))]
pub struct VClock<A: Actor> {
    dots: BTreeMap<A, Counter>,
}

impl<A: Actor> Default for VClock<A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A: Actor> PartialOrd for VClock<A> {
    fn partial_cmp(&self, other: &VClock<A>) -> Option<Ordering> {
        if self == other {
            Some(Ordering::Equal)
        } else if self.descends(other) {
            Some(Ordering::Greater)
        } else if other.descends(self) {
            Some(Ordering::Less)
        } else {
            None
        }
    }
}

impl<A: Actor + Display> Display for VClock<A> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "<")?;
        for (i, (actor, counter)) in self.dots.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}:{}", actor, counter)?;
        }
        write!(f, ">")
    }
}

impl<A: Actor> VClock<A> {
    /// Returns the empty version vector (`fresh()` in the causal algebra).
    pub fn new() -> Self {
        VClock { dots: BTreeMap::new() }
    }

    /// Is this the empty vector?
    pub fn is_empty(&self) -> bool {
        self.dots.is_empty()
    }

    /// Returns the counter witnessed for `actor`, or 0 if none has been.
    pub fn get(&self, actor: &A) -> Counter {
        self.dots.get(actor).copied().unwrap_or(0)
    }

    /// Records `counter` for `actor` if it dominates what's already there.
    pub fn witness(&mut self, actor: A, counter: Counter) {
        if counter > self.get(&actor) {
            self.dots.insert(actor, counter);
        }
    }

    /// Applies a dot: equivalent to `witness(dot.actor, dot.counter)`.
    pub fn apply(&mut self, dot: Dot<A>) {
        self.witness(dot.actor, dot.counter);
    }

    /// Allocates the next dot for `actor` without mutating this clock. The
    /// caller applies it (directly, or via the CRDT that owns this clock)
    /// once the update it causally stamps has actually taken effect.
    pub fn inc(&self, actor: A) -> Dot<A> {
        let counter = self.get(&actor) + 1;
        Dot { actor, counter }
    }

    /// Pointwise-maximum merge: `merge(vv1, vv2)`.
    pub fn merge(&mut self, other: &VClock<A>) {
        for (actor, counter) in other.dots.iter() {
            self.witness(actor.clone(), *counter);
        }
    }

    /// True iff this vector dominates every dot implied by `dots`: i.e.
    /// every `(a, c)` witnessed in `dots` satisfies `self.get(a) >= c`.
    pub fn descends(&self, dots: &VClock<A>) -> bool {
        dots.dots.iter().all(|(actor, counter)| self.get(actor) >= *counter)
    }

    /// True iff this clock dominates the single given dot.
    pub fn dominates(&self, dot: &Dot<A>) -> bool {
        self.get(&dot.actor) >= dot.counter
    }

    /// Returns the dots in `self` that are *not* dominated by `other`
    /// (`subtract_dots(dots, vv)` in the causal algebra).
    pub fn subtract(&self, other: &VClock<A>) -> VClock<A> {
        let mut dots = BTreeMap::new();
        for (actor, counter) in self.dots.iter() {
            if *counter > other.get(actor) {
                dots.insert(actor.clone(), *counter);
            }
        }
        VClock { dots }
    }

    /// Returns the dots common to both clocks (same actor, same counter).
    pub fn intersection(&self, other: &VClock<A>) -> VClock<A> {
        let mut dots = BTreeMap::new();
        for (actor, counter) in self.dots.iter() {
            if other.get(actor) == *counter {
                dots.insert(actor.clone(), *counter);
            }
        }
        VClock { dots }
    }

    /// True iff neither clock descends the other.
    pub fn concurrent(&self, other: &VClock<A>) -> bool {
        self.partial_cmp(other).is_none()
    }

    /// Iterates over the `(actor, counter)` pairs witnessed in this clock.
    pub fn iter(&self) -> impl Iterator<Item = (&A, &Counter)> {
        self.dots.iter()
    }

    /// Number of distinct actors witnessed in this clock.
    pub fn actor_count(&self) -> usize {
        self.dots.len()
    }

    /// The set of actors witnessed in this clock.
    pub fn actors(&self) -> BTreeSet<A> {
        self.dots.keys().cloned().collect()
    }
}

impl<A: Actor> std::iter::FromIterator<(A, Counter)> for VClock<A> {
    fn from_iter<I: IntoIterator<Item = (A, Counter)>>(iter: I) -> Self {
        let mut clock = Self::new();
        for (actor, counter) in iter {
            clock.witness(actor, counter);
        }
        clock
    }
}

impl<A: Actor> From<Dot<A>> for VClock<A> {
    fn from(dot: Dot<A>) -> Self {
        let mut clock = VClock::new();
        clock.apply(dot);
        clock
    }
}

impl<A: Actor> std::iter::IntoIterator for VClock<A> {
    type Item = (A, Counter);
    type IntoIter = btree_map::IntoIter<A, Counter>;

    fn into_iter(self) -> Self::IntoIter {
        self.dots.into_iter()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_witness_ignores_dominated_counters() {
        let mut a: VClock<u8> = VClock::new();
        a.witness(1, 2);
        a.witness(1, 1); // dominated, ignored
        assert_eq!(a.get(&1), 2);
    }

    #[test]
    fn test_descends() {
        let (mut a, mut b): (VClock<u8>, VClock<u8>) = (VClock::new(), VClock::new());
        a.witness(1, 2);
        b.witness(1, 1);
        assert!(a.descends(&b));
        assert!(!b.descends(&a));
    }

    #[test]
    fn test_concurrent() {
        let (mut a, mut b): (VClock<u8>, VClock<u8>) = (VClock::new(), VClock::new());
        a.apply(a.inc(1));
        b.apply(b.inc(2));
        assert!(a.concurrent(&b));
    }

    #[test]
    fn test_subtract() {
        let mut a: VClock<u8> = VClock::new();
        a.witness(1, 3);
        a.witness(2, 1);
        let mut b: VClock<u8> = VClock::new();
        b.witness(1, 2);
        let remaining = a.subtract(&b);
        assert_eq!(remaining.get(&1), 3);
        assert_eq!(remaining.get(&2), 1);
        assert_eq!(remaining.get(&3), 0);
    }

    #[test]
    fn test_merge_is_pointwise_max() {
        let mut a: VClock<u8> = VClock::new();
        a.witness(1, 1);
        let mut b: VClock<u8> = VClock::new();
        b.witness(1, 2);
        b.witness(2, 5);
        a.merge(&b);
        assert_eq!(a.get(&1), 2);
        assert_eq!(a.get(&2), 5);
    }
}
