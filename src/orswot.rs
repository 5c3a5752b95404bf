//! An add-biased observed-remove set without tombstones (ORSWOT), ported
//! from riak_dt's `riak_dt_orswot`.
//!
//! Every element present in the set carries a `VClock` recording exactly
//! the dots that added it and have not since been dominated by a remove's
//! witnessing context. Merging two ORSWOTs is the heart of the library: an
//! element present on one side only is either an add the other side
//! hasn't seen yet (its dots aren't dominated by the other's clock) or an
//! add the other side has already removed (they are) — no tombstones are
//! needed to tell the two apart.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Debug;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::traits::Crdt;
use crate::vclock::{Actor, Dot, Stamp, VClock};

/// Trait bound alias for elements of an `Orswot`.
pub trait Member: Debug + Ord + Clone + Serialize + DeserializeOwned {}
impl<T: Debug + Ord + Clone + Serialize + DeserializeOwned> Member for T {}

/// A single sub-operation of an `update` batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(bound(deserialize = ""))]
pub enum Op<M: Member> {
    /// Add a member.
    Add(M),
    /// Remove a member. Fails with [`Error::NotPresent`] if absent.
    Remove(M),
}

/// Add-biased OR-Set without tombstones.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(bound(deserialize = ""))]
pub struct Orswot<M: Member, A: Actor> {
    clock: VClock<A>,
    entries: BTreeMap<M, VClock<A>>,
    // Linear, not a BTreeMap: a VClock has no meaningful total order, only
    // the partial order `descends` gives it.
    deferred: Vec<(VClock<A>, BTreeSet<M>)>,
}

impl<M: Member, A: Actor> Default for Orswot<M, A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M: Member, A: Actor> Orswot<M, A> {
    /// Returns a new, empty `Orswot`.
    pub fn new() -> Self {
        Orswot {
            clock: VClock::new(),
            entries: BTreeMap::new(),
            deferred: Vec::new(),
        }
    }

    /// The current members.
    pub fn value(&self) -> BTreeSet<M> {
        self.entries.keys().cloned().collect()
    }

    /// Number of members.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if this set has no members.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// True if `member` is in the set.
    pub fn contains(&self, member: &M) -> bool {
        self.entries.contains_key(member)
    }

    /// Returns the witnessing context for `member`: the exact dots that
    /// added it, sufficient to construct a `remove` that will not race a
    /// concurrent add. Empty if `member` is absent.
    pub fn context(&self, member: &M) -> VClock<A> {
        self.entries.get(member).cloned().unwrap_or_else(VClock::new)
    }

    /// Applies a single `add`, allocating a fresh dot for `stamp` if it
    /// names an actor, or adopting a pre-stamped dot verbatim (used by
    /// `Map` to share one dot across a batch). Never fails.
    pub fn add(&mut self, member: impl Into<M>, stamp: impl Into<Stamp<A>>) {
        let dot = self.resolve(stamp);
        self.apply_add(member.into(), dot);
    }

    /// Adds every member in `members`, allocating one dot per element.
    /// Atomicity is not required: `add` cannot fail.
    pub fn add_all(&mut self, members: impl IntoIterator<Item = impl Into<M>>, actor: A) {
        for member in members {
            self.add(member, actor.clone());
        }
    }

    /// Removes `member`. Fails with [`Error::NotPresent`] if it isn't in
    /// the set; the set is left unchanged on failure.
    pub fn remove(&mut self, member: &M) -> Result<()> {
        if !self.contains(member) {
            return Err(Error::NotPresent);
        }
        let context = self.context(member);
        self.apply_remove(member.clone(), &context);
        Ok(())
    }

    /// Removes `member` under an externally-supplied `context` — e.g. one
    /// a remote client obtained from an earlier `precondition_context()`
    /// and is now replaying against a (possibly behind) replica. If this
    /// replica's clock does not yet dominate `context`, the removal is
    /// deferred until a later `merge` catches it up (`spec.md` §6's
    /// precondition-context boundary: the host is responsible for
    /// obtaining and forwarding the context, not this replica). Never
    /// fails: an absent member with a stale context is simply a no-op.
    pub fn remove_with_context(&mut self, member: impl Into<M>, context: &VClock<A>) {
        self.apply_remove(member.into(), context);
    }

    /// All-or-nothing removal of every listed member: if any is absent,
    /// fails on the first missing one and leaves the set unchanged.
    pub fn remove_all<'m>(&mut self, members: impl IntoIterator<Item = &'m M>) -> Result<()>
    where
        M: 'm,
    {
        let members: Vec<&M> = members.into_iter().collect();
        for member in &members {
            if !self.contains(member) {
                return Err(Error::NotPresent);
            }
        }
        for member in members {
            let context = self.context(member);
            self.apply_remove(member.clone(), &context);
        }
        Ok(())
    }

    /// Atomically applies a batch of sub-operations in order, sharing one
    /// dot (freshly allocated from `stamp`, or adopted if pre-stamped)
    /// across every `Add` in the batch. Ops are applied sequentially
    /// against a scratch copy, so a `Remove` sees the effect of any
    /// preceding `Add` in the same batch — e.g. `[Add(5), Remove(5)]`
    /// succeeds even if `5` was absent beforehand. On the first `Remove`
    /// of a member still absent at that point in the batch, the whole
    /// batch is abandoned and the set is left unchanged.
    pub fn update(&mut self, ops: impl IntoIterator<Item = Op<M>>, stamp: impl Into<Stamp<A>>) -> Result<()> {
        let mut scratch = self.clone();
        let dot = scratch.resolve(stamp);
        for op in ops {
            match op {
                Op::Add(member) => scratch.apply_add(member, dot.clone()),
                Op::Remove(member) => {
                    if !scratch.contains(&member) {
                        return Err(Error::NotPresent);
                    }
                    let context = scratch.context(&member);
                    scratch.apply_remove(member, &context);
                }
            }
        }
        *self = scratch;
        Ok(())
    }

    /// Merges `other` into `self`, following the drop-if-dominated rule:
    /// an element's surviving dots are the ones neither side has seen the
    /// other remove.
    pub fn merge(&mut self, other: &Self) {
        let mut other_remaining = other.entries.clone();
        let mut keep = BTreeMap::new();

        for (member, clock) in self.entries.clone().into_iter() {
            match other.entries.get(&member) {
                None => {
                    // Either `other` has witnessed this add and dropped it,
                    // or it simply hasn't seen it yet.
                    let survives = clock.subtract(&other.clock);
                    if !survives.is_empty() {
                        keep.insert(member, survives);
                    }
                }
                Some(other_clock) => {
                    let common = clock.intersection(other_clock);
                    let l_only = clock.subtract(&common).subtract(&other.clock);
                    let r_only = other_clock.subtract(&common).subtract(&self.clock);

                    let mut dots = common;
                    dots.merge(&l_only);
                    dots.merge(&r_only);

                    if !dots.is_empty() {
                        keep.insert(member.clone(), dots);
                    }
                    other_remaining.remove(&member);
                }
            }
        }

        for (member, clock) in other_remaining.into_iter() {
            let survives = clock.subtract(&self.clock);
            if !survives.is_empty() {
                keep.insert(member, survives);
            }
        }

        for (clock, members) in other.deferred.iter() {
            match self.deferred.iter_mut().find(|(c, _)| c == clock) {
                Some((_, ours)) => ours.extend(members.iter().cloned()),
                None => self.deferred.push((clock.clone(), members.clone())),
            }
        }

        self.entries = keep;
        self.clock.merge(&other.clock);
        self.apply_deferred();
    }

    /// Returns this set's clock: an opaque fragment a client may merge
    /// back to translate a remove into a safe operation (`spec.md` §6).
    pub fn precondition_context(&self) -> VClock<A> {
        self.clock.clone()
    }

    fn resolve(&mut self, stamp: impl Into<Stamp<A>>) -> Dot<A> {
        match stamp.into() {
            Stamp::Actor(actor) => {
                let dot = self.clock.inc(actor);
                self.clock.apply(dot.clone());
                dot
            }
            Stamp::Dot(dot) => {
                self.clock.apply(dot.clone());
                dot
            }
        }
    }

    fn apply_add(&mut self, member: M, dot: Dot<A>) {
        self.entries.entry(member).or_default().apply(dot);
        self.apply_deferred();
    }

    /// Removes `member` under `context`: the witnessing clock the caller
    /// observed when it decided to remove. If `context` is ahead of what
    /// this replica has seen, the removal is deferred until a merge
    /// catches this replica's clock up.
    fn apply_remove(&mut self, member: M, context: &VClock<A>) {
        if !self.clock.descends(context) {
            match self.deferred.iter_mut().find(|(c, _)| c == context) {
                Some((_, members)) => {
                    members.insert(member.clone());
                }
                None => {
                    let mut members = BTreeSet::new();
                    members.insert(member.clone());
                    self.deferred.push((context.clone(), members));
                }
            }
        }

        if let Some(existing) = self.entries.remove(&member) {
            let survives = existing.subtract(context);
            if !survives.is_empty() {
                self.entries.insert(member, survives);
            }
        }
    }

    fn apply_deferred(&mut self) {
        let deferred = std::mem::take(&mut self.deferred);
        for (context, members) in deferred {
            if self.clock.descends(&context) {
                for member in members {
                    self.apply_remove(member, &context);
                }
            } else {
                self.deferred.push((context, members));
            }
        }
    }
}

impl<M: Member, A: Actor> Crdt for Orswot<M, A> {
    const TYPE_TAG: u8 = crate::binary::tag::ORSWOT;

    fn stats(&self) -> Vec<(&'static str, usize)> {
        let max_dot_length = self.entries.values().map(|c| c.actor_count()).max().unwrap_or(0);
        vec![
            ("actor_count", self.clock.actor_count()),
            ("element_count", self.entries.len()),
            ("max_dot_length", max_dot_length),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vclock::Dot;

    #[test]
    fn test_disjoint_merge() {
        let mut a: Orswot<String, String> = Orswot::new();
        a.add("bar", "A".to_string());
        let mut b: Orswot<String, String> = Orswot::new();
        b.add("baz", "B".to_string());

        let mut c = a.clone();
        c.merge(&b);
        assert_eq!(c.value(), vec!["bar".to_string(), "baz".to_string()].into_iter().collect());

        a.remove(&"bar".to_string()).unwrap();
        let mut d = a.clone();
        d.merge(&c);
        assert_eq!(d.value(), vec!["baz".to_string()].into_iter().collect());
    }

    // port from riak_dt: dropping dots in merge when an element is
    // present in both sets is required or removed items resurrect.
    #[test]
    fn test_present_but_removed() {
        let mut a: Orswot<String, String> = Orswot::new();
        a.add("Z", "A".to_string());
        let c = a.clone();

        a.remove(&"Z".to_string()).unwrap();

        let mut b: Orswot<String, String> = Orswot::new();
        b.add("Z", "B".to_string());

        a.merge(&b);
        b.remove(&"Z".to_string()).unwrap();

        a.merge(&b);
        a.merge(&c);
        assert!(a.value().is_empty());
    }

    // port from riak_dt: dropping dots is not enough if the merged value
    // is then stored with an empty clock.
    #[test]
    fn test_no_dots_left() {
        let mut a: Orswot<String, u8> = Orswot::new();
        a.add("Z", 1u8);
        let mut b: Orswot<String, u8> = Orswot::new();
        b.add("Z", 2u8);
        let c = a.clone();

        a.remove(&"Z".to_string()).unwrap();
        a.merge(&b);
        assert_eq!(a.value(), vec!["Z".to_string()].into_iter().collect());

        b.remove(&"Z".to_string()).unwrap();
        assert!(b.value().is_empty());

        b.merge(&c);
        assert_eq!(b.value(), vec!["Z".to_string()].into_iter().collect());

        b.merge(&a);
        b.merge(&c);
        assert!(b.value().is_empty());
    }

    #[test]
    fn test_remove_all_is_atomic() {
        let mut a: Orswot<u8, u8> = Orswot::new();
        a.add(1u8, 1u8);
        let before = a.clone();
        let err = a.remove_all(vec![&1u8, &2u8]).unwrap_err();
        assert_eq!(err, Error::NotPresent);
        assert_eq!(a, before);
    }

    #[test]
    fn test_update_batch_is_atomic() {
        let mut a: Orswot<u8, u8> = Orswot::new();
        a.add(1u8, 1u8);
        let before = a.clone();
        let err = a.update(vec![Op::Add(2), Op::Remove(9)], 1u8).unwrap_err();
        assert_eq!(err, Error::NotPresent);
        assert_eq!(a, before);
    }

    // A `Remove` in a batch must see the effect of any preceding `Add` in
    // that same batch, not the pre-batch state: `Remove(5)` here would
    // wrongly fail with `NotPresent` if preconditions were checked against
    // the untouched state instead of applied sequentially.
    #[test]
    fn test_update_batch_is_sequential() {
        let mut a: Orswot<u8, u8> = Orswot::new();
        a.update(vec![Op::Add(5), Op::Remove(5)], 1u8).unwrap();
        assert!(a.value().is_empty());
    }

    #[test]
    fn test_merge_absorb() {
        let mut a: Orswot<u8, u8> = Orswot::new();
        a.add(1u8, 1u8);
        let before = a.clone();
        a.merge(&Orswot::new());
        assert_eq!(a, before);
    }

    #[test]
    fn test_merge_idempotent() {
        let mut a: Orswot<u8, u8> = Orswot::new();
        a.add(1u8, 1u8);
        let clone = a.clone();
        a.merge(&clone);
        assert_eq!(a, clone);
    }

    #[test]
    fn test_merge_commutative() {
        let mut a: Orswot<u8, u8> = Orswot::new();
        a.add(1u8, 1u8);
        let mut b: Orswot<u8, u8> = Orswot::new();
        b.add(2u8, 2u8);

        let mut ab = a.clone();
        ab.merge(&b);
        let mut ba = b.clone();
        ba.merge(&a);
        assert_eq!(ab, ba);
    }

    #[test]
    fn test_dead_node_update() {
        let mut a: Orswot<String, u8> = Orswot::new();
        a.add("A", 1u8);
        assert_eq!(a.context(&"A".to_string()), Dot::new(1u8, 1).into());

        let mut b = a.clone();
        b.add("B", 2u8);
        let bctx = b.precondition_context();

        a.remove_with_context("A".to_string(), &bctx);
        assert!(a.value().is_empty());
    }

    // A remote client's precondition_context, replayed through the public
    // `remove_with_context` entry point (spec.md §6), converges the same
    // way the private deferred-removal machinery is tested to above.
    #[test]
    fn test_remove_with_context_public_entry_point() {
        let mut origin: Orswot<String, u8> = Orswot::new();
        origin.add("A", 1u8);
        let context = origin.precondition_context();

        // A replica that hasn't seen the add yet defers the removal.
        let mut behind: Orswot<String, u8> = Orswot::new();
        behind.remove_with_context("A".to_string(), &context);
        assert!(!behind.contains(&"A".to_string()));

        behind.merge(&origin);
        assert!(behind.value().is_empty());
    }

    #[test]
    fn test_stats_on_fresh_set() {
        let s: Orswot<u8, u8> = Orswot::new();
        assert_eq!(s.stat("element_count"), Some(0));
        assert_eq!(s.stat("max_dot_length"), Some(0));
        assert_eq!(s.stat("nonsense"), None);
    }

    // A small op, replayed against one of a handful of actors, to build
    // up randomly-interleaved histories for the properties below.
    #[derive(Debug, Clone)]
    struct WeightedOp {
        actor: u8,
        member: u8,
        add: bool,
    }

    impl quickcheck::Arbitrary for WeightedOp {
        fn arbitrary<G: quickcheck::Gen>(g: &mut G) -> Self {
            use rand::Rng;
            WeightedOp { actor: g.gen_range(0, 4), member: g.gen_range(0, 4), add: g.gen_range(0, 2) == 0 }
        }
    }

    fn replay(ops: &[WeightedOp]) -> Orswot<u8, u8> {
        let mut set = Orswot::new();
        for op in ops {
            if op.add {
                set.add(op.member, op.actor);
            } else {
                let _ = set.remove(&op.member);
            }
        }
        set
    }

    // Grounded in the teacher's `prop_merge_converges`: independently-built
    // replicas that observed the same ops converge to one value on merge.
    #[quickcheck_macros::quickcheck]
    fn prop_merge_converges(left: Vec<WeightedOp>, right: Vec<WeightedOp>) -> bool {
        let mut a = replay(&left);
        let b = replay(&right);
        let mut c = b.clone();

        a.merge(&b);
        c.merge(&replay(&left));
        a.value() == c.value()
    }

    #[quickcheck_macros::quickcheck]
    fn prop_merge_commutative(left: Vec<WeightedOp>, right: Vec<WeightedOp>) -> bool {
        let a = replay(&left);
        let b = replay(&right);
        let mut ab = a.clone();
        ab.merge(&b);
        let mut ba = b;
        ba.merge(&a);
        ab == ba
    }

    #[quickcheck_macros::quickcheck]
    fn prop_merge_idempotent(ops: Vec<WeightedOp>) -> bool {
        let a = replay(&ops);
        let mut merged = a.clone();
        merged.merge(&a);
        merged == a
    }

    #[quickcheck_macros::quickcheck]
    fn prop_merge_associative(a: Vec<WeightedOp>, b: Vec<WeightedOp>, c: Vec<WeightedOp>) -> bool {
        let (sa, sb, sc) = (replay(&a), replay(&b), replay(&c));

        let mut ab_c = sa.clone();
        ab_c.merge(&sb);
        ab_c.merge(&sc);

        let mut bc = sb;
        bc.merge(&sc);
        let mut a_bc = sa;
        a_bc.merge(&bc);

        ab_c == a_bc
    }
}
