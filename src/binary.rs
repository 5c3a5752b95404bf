//! Self-identifying binary encoding: a one-byte type tag, a one-byte
//! version, and an (optionally DEFLATE-compressed) `bincode` payload.
//!
//! This is the only process-wide configuration surface in the crate (see
//! `spec.md` §6): a single `Compression` switch controls whether
//! `to_binary` compresses its output. `from_binary` does not need to be
//! told which way a blob was encoded — it recognises compressed payloads
//! by trying to inflate them first, so replicas running with different
//! compression settings still interoperate.

use std::io::{Read, Write};
use std::sync::atomic::{AtomicU8, Ordering};

use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;

use crate::error::{Error, Result};
use crate::traits::Crdt;

const VERSION: u8 = 1;

/// Process-wide compression setting for `to_binary`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    /// Compress with the default DEFLATE level.
    Enabled,
    /// Write the raw `bincode` payload.
    Disabled,
    /// Compress at an explicit level, clamped to `0..=9`.
    Level(u8),
}

impl Compression {
    fn level(self) -> Option<u32> {
        match self {
            Compression::Disabled => None,
            Compression::Enabled => Some(flate2::Compression::default().level()),
            Compression::Level(l) => Some(u32::from(l.min(9))),
        }
    }
}

// 0 = disabled, otherwise (level + 1), so the default (unset) state is
// "enabled at the default level" without needing a separate Option byte.
static COMPRESSION_STATE: AtomicU8 = AtomicU8::new(0);

/// Sets the process-wide compression mode used by `to_binary`. The default,
/// before this is ever called, is `Compression::Enabled`.
pub fn set_compression(mode: Compression) {
    let encoded = match mode {
        Compression::Disabled => 1,
        Compression::Enabled => 0,
        Compression::Level(l) => l.min(9) + 2,
    };
    COMPRESSION_STATE.store(encoded, Ordering::SeqCst);
}

fn current_compression() -> Compression {
    match COMPRESSION_STATE.load(Ordering::SeqCst) {
        1 => Compression::Disabled,
        0 => Compression::Enabled,
        n => Compression::Level(n - 2),
    }
}

/// Encodes `state` as a self-identifying blob: `[TYPE_TAG, VERSION, ...]`.
pub fn to_binary<T: Crdt>(state: &T) -> Vec<u8> {
    let payload = bincode::serialize(state).expect("CRDT states are always serializable");
    let mut out = Vec::with_capacity(payload.len() + 2);
    out.push(T::TYPE_TAG);
    out.push(VERSION);

    match current_compression().level() {
        None => out.extend_from_slice(&payload),
        Some(level) => {
            let mut encoder =
                DeflateEncoder::new(Vec::new(), flate2::Compression::new(level));
            encoder.write_all(&payload).expect("compressing into a Vec cannot fail");
            out.extend(encoder.finish().expect("compressing into a Vec cannot fail"));
        }
    }
    out
}

/// Decodes a blob produced by `to_binary`, rejecting one whose tag or
/// version byte don't match `T`. Transparently handles compressed and
/// uncompressed version-1 payloads.
pub fn from_binary<T: Crdt>(bytes: &[u8]) -> Result<T> {
    if bytes.len() < 2 {
        return Err(Error::Binary);
    }
    if bytes[0] != T::TYPE_TAG || bytes[1] != VERSION {
        return Err(Error::Binary);
    }
    let payload = &bytes[2..];

    let mut inflated = Vec::new();
    if DeflateDecoder::new(payload).read_to_end(&mut inflated).is_ok() && !inflated.is_empty() {
        if let Ok(state) = bincode::deserialize(&inflated) {
            return Ok(state);
        }
    }
    bincode::deserialize(payload).map_err(|_| Error::Binary)
}

/// Type tags assigned in `spec.md` §6, ported verbatim from the riak_dt
/// wire format this library's causal algebra is grounded on.
pub mod tag {
    /// ORSWOT.
    pub const ORSWOT: u8 = 75;
    /// Observed-disable flag.
    pub const OD_FLAG: u8 = 73;
    /// Map.
    pub const MAP: u8 = 101;
}
