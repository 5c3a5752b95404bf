//! The shared, library-boundary contract every CRDT kind implements.
//!
//! Merge/update dispatch is *not* routed through this trait: each concrete
//! type (`Orswot`, `ODFlag`, `Map`) implements its own inherent `update` and
//! `merge` so that the Map's nested-value dispatch can match explicitly on
//! a closed `Value` enum (see `map.rs`) rather than going through a trait
//! object. This trait exists only for the handful of operations that
//! generically apply to any of the three kinds: binary encoding and stats.

use serde::de::DeserializeOwned;
use serde::Serialize;

/// A CRDT kind that can be self-identified in `to_binary`'s one-byte type
/// tag and interrogated for `stats`.
pub trait Crdt: Serialize + DeserializeOwned {
    /// One-byte type tag written by `to_binary`, checked by `from_binary`.
    const TYPE_TAG: u8;

    /// `(key, value)` pairs describing this state, per `spec.md` §6. Keys
    /// not recognized by a given CRDT kind are absent, not present with a
    /// sentinel value; `stat` below returns `None` for them.
    fn stats(&self) -> Vec<(&'static str, usize)>;

    /// Looks up a single stat by key.
    fn stat(&self, key: &str) -> Option<usize> {
        self.stats().into_iter().find(|(k, _)| *k == key).map(|(_, v)| v)
    }
}
