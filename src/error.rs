//! Errors produced by CRDT operations.

use thiserror::Error;

/// Errors a CRDT operation can report. Merges and value queries never fail;
/// only updates that carry a precondition (remove an element, remove a
/// field) or binary decoding can.
#[derive(Debug, Error, PartialEq, Eq, Clone, Copy)]
pub enum Error {
    /// A remove (or an inner CRDT's precondition) named something that is
    /// not currently present. Not idempotent: removing an absent element
    /// is a failure, not a no-op.
    #[error("precondition failed: not present")]
    NotPresent,
    /// `from_binary` rejected a blob: unknown type tag, unknown version
    /// byte, or a payload that failed to decode.
    #[error("malformed binary encoding")]
    Binary,
    /// A `Map` field `Update`'s op named a different CRDT kind than the
    /// field's own `TypeTag` (e.g. a `Flag` op against an `Orswot` field).
    #[error("update op's kind does not match the field's type tag")]
    TypeMismatch,
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;
