//! `crdts` is a library of convergent, state-based replicated data types
//! (CvRDTs) for an eventually-consistent, leaderless key-value store.
//!
//! Three data types share a common causal substrate (a dotted version
//! vector) and behavioural contract:
//!
//! - [`Orswot`]: an observed-remove set without tombstones, add-wins.
//! - [`ODFlag`]: an observed-disable flag, enable-wins under concurrency.
//! - [`Map`]: a map whose schema is itself an observed-remove set of
//!   `(field, type)` keys, and whose values nest any of the three kinds.
//!
//! Replicas accept local updates without coordination and exchange whole
//! states; `merge` is commutative, associative, and idempotent, so
//! replicas that have observed the same updates converge regardless of
//! delivery order. There is no operation-based transport, reliable
//! delivery, persistence, or anti-entropy scheduling here — those are the
//! host database's concern.

#![deny(missing_docs)]

pub use crate::binary::{from_binary, set_compression, to_binary, Compression};
pub use crate::error::{Error, Result};
pub use crate::map::{Field, Map, MapOp, TypeTag, Value, ValueOp};
pub use crate::odflag::ODFlag;
pub use crate::orswot::{Member, Orswot};
pub use crate::traits::Crdt;
pub use crate::vclock::{Actor, Dot, Stamp, VClock};

/// Binary encoding with a self-identifying type tag and version byte, plus
/// the process-wide compression knob.
pub mod binary;
/// Errors produced by CRDT operations.
pub mod error;
/// The nested Map CRDT.
pub mod map;
/// The observed-disable flag CRDT.
pub mod odflag;
/// The observed-remove set without tombstones (ORSWOT).
pub mod orswot;
/// The shared library-boundary contract (`to_binary`/`stats`) every CRDT
/// kind implements.
pub mod traits;
/// The dotted version vector causal substrate.
pub mod vclock;

#[cfg(test)]
mod roundtrip_tests {
    use super::*;

    #[test]
    fn test_orswot_binary_roundtrip() {
        let mut s: Orswot<String, u8> = Orswot::new();
        s.add("a", 1u8);
        s.add("b", 2u8);
        let encoded = to_binary(&s);
        assert_eq!(encoded[0], binary::tag::ORSWOT);
        let decoded: Orswot<String, u8> = from_binary(&encoded).unwrap();
        assert_eq!(s, decoded);
    }

    #[test]
    fn test_odflag_binary_roundtrip() {
        let mut f: ODFlag<u8> = ODFlag::new();
        f.enable(1u8);
        let encoded = to_binary(&f);
        assert_eq!(encoded[0], binary::tag::OD_FLAG);
        let decoded: ODFlag<u8> = from_binary(&encoded).unwrap();
        assert_eq!(f, decoded);
    }

    #[test]
    fn test_map_binary_roundtrip() {
        let mut m: Map<String, u8> = Map::new();
        let field = Field::new("x".to_string(), TypeTag::Orswot);
        m.update(
            vec![MapOp::Update { field: field.clone(), op: ValueOp::Orswot(vec![orswot::Op::Add("v".to_string())]) }],
            1u8,
        )
        .unwrap();
        let encoded = to_binary(&m);
        assert_eq!(encoded[0], binary::tag::MAP);
        let decoded: Map<String, u8> = from_binary(&encoded).unwrap();
        assert_eq!(m, decoded);
    }

    #[test]
    fn test_roundtrip_with_compression_disabled() {
        let mut s: Orswot<String, u8> = Orswot::new();
        s.add("a", 1u8);

        set_compression(Compression::Disabled);
        let encoded = to_binary(&s);
        let decoded: Orswot<String, u8> = from_binary(&encoded).unwrap();
        assert_eq!(s, decoded);

        set_compression(Compression::Enabled);
        let encoded = to_binary(&s);
        let decoded: Orswot<String, u8> = from_binary(&encoded).unwrap();
        assert_eq!(s, decoded);

        set_compression(Compression::Level(9));
        let encoded = to_binary(&s);
        let decoded: Orswot<String, u8> = from_binary(&encoded).unwrap();
        assert_eq!(s, decoded);
    }

    #[test]
    fn test_from_binary_rejects_wrong_tag() {
        let s: Orswot<String, u8> = Orswot::new();
        let mut encoded = to_binary(&s);
        encoded[0] = binary::tag::MAP;
        let decoded: Result<Orswot<String, u8>> = from_binary(&encoded);
        assert_eq!(decoded.unwrap_err(), Error::Binary);
    }

    #[test]
    fn test_from_binary_rejects_wrong_version() {
        let s: Orswot<String, u8> = Orswot::new();
        let mut encoded = to_binary(&s);
        encoded[1] = 99;
        let decoded: Result<Orswot<String, u8>> = from_binary(&encoded);
        assert_eq!(decoded.unwrap_err(), Error::Binary);
    }
}
