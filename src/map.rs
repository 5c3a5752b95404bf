//! A Map whose schema is an observed-remove set of `(field, type)` keys and
//! whose values are nested CRDTs sharing the map's causal context.
//!
//! This is the hardest component in the library: every field version is
//! identified by the single dot under which it replaced whatever came
//! before it for that field, and survival under merge is judged purely on
//! that dot's domination — never on merging nested CRDT state. Nested
//! merging only happens when reading a field's value: `value()` folds the
//! inner CRDT merge over every surviving version.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::odflag::ODFlag;
use crate::orswot::{self, Member, Orswot};
use crate::traits::Crdt;
use crate::vclock::{Actor, Dot, Stamp, VClock};

/// The closed set of CRDT kinds a Map field may hold. Reimplementing the
/// source's runtime type-tag dispatch as a Rust sum type, per `spec.md`
/// §9: open plugin registration is deliberately not supported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum TypeTag {
    /// This field holds an `Orswot`.
    Orswot,
    /// This field holds an `ODFlag`.
    Flag,
    /// This field holds a nested `Map`.
    Map,
}

/// A field identifier: a name paired with the kind of CRDT it holds. Two
/// fields are the same field iff both the name and the kind match —
/// re-adding a name under a different kind is a different field entirely.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(bound(deserialize = ""))]
pub struct Field<M: Member> {
    /// The field's name.
    pub name: M,
    /// The kind of CRDT stored under this field.
    pub tag: TypeTag,
}

impl<M: Member> Field<M> {
    /// Builds a field identifier.
    pub fn new(name: impl Into<M>, tag: TypeTag) -> Self {
        Field { name: name.into(), tag }
    }
}

/// The value stored under a field: one of the three CRDT kinds this
/// library supports, dispatched explicitly (never through a trait object)
/// at every merge/update call site.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(bound(deserialize = ""))]
pub enum Value<M: Member, A: Actor> {
    /// A nested set.
    Orswot(Orswot<M, A>),
    /// A nested flag.
    Flag(ODFlag<A>),
    /// A nested map.
    Map(Box<Map<M, A>>),
}

impl<M: Member, A: Actor> Value<M, A> {
    fn fresh(tag: TypeTag) -> Self {
        match tag {
            TypeTag::Orswot => Value::Orswot(Orswot::new()),
            TypeTag::Flag => Value::Flag(ODFlag::new()),
            TypeTag::Map => Value::Map(Box::default()),
        }
    }

    fn merge(&mut self, other: &Self) {
        match (self, other) {
            (Value::Orswot(a), Value::Orswot(b)) => a.merge(b),
            (Value::Flag(a), Value::Flag(b)) => a.merge(b),
            (Value::Map(a), Value::Map(b)) => a.merge(b),
            _ => unreachable!("two entries shared a field but disagreed on its CRDT kind"),
        }
    }

    fn apply(&mut self, op: ValueOp<M>, dot: Dot<A>) -> Result<()> {
        match (self, op) {
            (Value::Orswot(v), ValueOp::Orswot(ops)) => v.update(ops, Stamp::Dot(dot)),
            (Value::Flag(v), ValueOp::Flag(FlagOp::Enable)) => {
                v.enable(Stamp::Dot(dot));
                Ok(())
            }
            (Value::Flag(v), ValueOp::Flag(FlagOp::Disable)) => {
                v.disable();
                Ok(())
            }
            (Value::Map(v), ValueOp::Map(ops)) => v.update(ops, Stamp::Dot(dot)),
            _ => Err(crate::error::Error::TypeMismatch),
        }
    }
}

/// A sub-operation on an `ODFlag` nested inside a Map.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FlagOp {
    /// Enable the nested flag.
    Enable,
    /// Disable the nested flag.
    Disable,
}

/// The operation carried by a field `Update`, matching the kind of CRDT
/// that field holds. Carries no actor type of its own: the dot every
/// sub-op is stamped under comes from the enclosing `Map::update` batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(bound(deserialize = ""))]
pub enum ValueOp<M: Member> {
    /// Sub-ops to apply to a nested `Orswot`.
    Orswot(Vec<orswot::Op<M>>),
    /// An enable/disable of a nested `ODFlag`.
    Flag(FlagOp),
    /// Sub-ops to apply to a nested `Map`.
    Map(Vec<MapOp<M>>),
}

/// A single sub-operation of a Map `update` batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(bound(deserialize = ""))]
pub enum MapOp<M: Member> {
    /// Stamp a fresh, empty value under `field`, replacing any prior
    /// content for that field. An `add` never reads existing entries —
    /// unlike `Update`, it does not merge them into the new value.
    Add {
        /// Field to (re)create.
        field: Field<M>,
    },
    /// Remove every entry for `field`. Fails with `Error::NotPresent` if
    /// no entry matches.
    Remove {
        /// Field to remove.
        field: Field<M>,
    },
    /// Merge all existing versions of `field` into one working value,
    /// apply `op` to it under the batch's shared dot, and replace every
    /// prior entry for `field` with the single resulting one.
    Update {
        /// Field to update.
        field: Field<M>,
        /// Operation to apply to the field's merged value.
        op: ValueOp<M>,
    },
}

/// Map CRDT: an observed-remove set of `(field, type)` keys whose values
/// are nested CRDTs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(bound(deserialize = ""))]
pub struct Map<M: Member, A: Actor> {
    clock: VClock<A>,
    entries: BTreeMap<(Field<M>, Dot<A>), Value<M, A>>,
}

impl<M: Member, A: Actor> Default for Map<M, A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M: Member, A: Actor> Map<M, A> {
    /// Returns a new, empty Map.
    pub fn new() -> Self {
        Map { clock: VClock::new(), entries: BTreeMap::new() }
    }

    /// Number of distinct fields currently present.
    pub fn len(&self) -> usize {
        self.value().len()
    }

    /// True if no field is currently present.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Groups surviving entries by field and folds the inner CRDT merge
    /// over each group's values, returning one `(field, value)` pair per
    /// surviving field.
    pub fn value(&self) -> Vec<(Field<M>, Value<M, A>)> {
        let mut out: Vec<(Field<M>, Value<M, A>)> = Vec::new();
        for ((field, _dot), value) in self.entries.iter() {
            match out.last_mut() {
                Some((last_field, acc)) if last_field == field => acc.merge(value),
                _ => out.push((field.clone(), value.clone())),
            }
        }
        out
    }

    /// Returns the folded value for a single field, or `None` if absent.
    pub fn get(&self, field: &Field<M>) -> Option<Value<M, A>> {
        self.value().into_iter().find(|(f, _)| f == field).map(|(_, v)| v)
    }

    /// Atomically applies a batch of sub-operations under one shared dot
    /// (freshly allocated from `stamp`, or adopted if pre-stamped). On the
    /// first error — a `Remove` of an absent field, or an inner CRDT's
    /// own precondition failure — the whole batch is abandoned and the
    /// map is left exactly as it was.
    pub fn update(&mut self, ops: impl IntoIterator<Item = MapOp<M>>, stamp: impl Into<Stamp<A>>) -> Result<()> {
        let mut scratch = self.clone();
        let dot = scratch.resolve(stamp);
        for op in ops {
            scratch.apply_op(op, dot.clone())?;
        }
        *self = scratch;
        Ok(())
    }

    /// Merges `other` into `self`. An entry survives iff the peer has an
    /// identical entry (same field, same dot) or the peer's clock does
    /// not dominate its dot. Nested CRDT merging never happens here — only
    /// at `value()`'s read-time fold.
    pub fn merge(&mut self, other: &Self) {
        let mut result = BTreeMap::new();

        for (key, value) in self.entries.iter() {
            if let Some(other_value) = other.entries.get(key) {
                debug_assert!(value == other_value, "same (field, dot) diverged in content");
                result.insert(key.clone(), value.clone());
            } else if !other.clock.dominates(&key.1) {
                result.insert(key.clone(), value.clone());
            }
        }

        for (key, value) in other.entries.iter() {
            if self.entries.contains_key(key) {
                continue;
            }
            if !self.clock.dominates(&key.1) {
                result.insert(key.clone(), value.clone());
            }
        }

        self.entries = result;
        self.clock.merge(&other.clock);
    }

    /// Returns this map's clock: an opaque fragment a client may merge
    /// back to translate a field remove into a safe operation.
    pub fn precondition_context(&self) -> VClock<A> {
        self.clock.clone()
    }

    fn resolve(&mut self, stamp: impl Into<Stamp<A>>) -> Dot<A> {
        let dot = match stamp.into() {
            Stamp::Actor(actor) => self.clock.inc(actor),
            Stamp::Dot(dot) => dot,
        };
        self.clock.apply(dot.clone());
        dot
    }

    fn entries_for(&self, field: &Field<M>) -> Vec<Dot<A>> {
        self.entries.keys().filter(|(f, _)| f == field).map(|(_, d)| d.clone()).collect()
    }

    fn apply_op(&mut self, op: MapOp<M>, dot: Dot<A>) -> Result<()> {
        match op {
            MapOp::Add { field } => {
                for old_dot in self.entries_for(&field) {
                    self.entries.remove(&(field.clone(), old_dot));
                }
                let fresh = Value::fresh(field.tag);
                self.entries.insert((field, dot), fresh);
                Ok(())
            }
            MapOp::Remove { field } => {
                let dots = self.entries_for(&field);
                if dots.is_empty() {
                    return Err(crate::error::Error::NotPresent);
                }
                for old_dot in dots {
                    self.entries.remove(&(field.clone(), old_dot));
                }
                Ok(())
            }
            MapOp::Update { field, op } => {
                let old_dots = self.entries_for(&field);
                let mut working = Value::fresh(field.tag);
                for old_dot in &old_dots {
                    let existing = self.entries.get(&(field.clone(), old_dot.clone())).expect("just listed");
                    working.merge(existing);
                }
                working.apply(op, dot.clone())?;

                for old_dot in old_dots {
                    self.entries.remove(&(field.clone(), old_dot));
                }
                self.entries.insert((field, dot), working);
                Ok(())
            }
        }
    }
}

impl<M: Member, A: Actor> Crdt for Map<M, A> {
    const TYPE_TAG: u8 = crate::binary::tag::MAP;

    fn stats(&self) -> Vec<(&'static str, usize)> {
        if self.entries.is_empty() {
            return vec![];
        }
        let mut max_dot_length = 0;
        let mut current: Option<&Field<M>> = None;
        let mut count = 0;
        for (field, _) in self.entries.keys() {
            if current == Some(field) {
                count += 1;
            } else {
                current = Some(field);
                count = 1;
            }
            max_dot_length = max_dot_length.max(count);
        }
        vec![
            ("actor_count", self.clock.actor_count()),
            ("field_count", self.value().len()),
            ("max_dot_length", max_dot_length),
        ]
    }
}
