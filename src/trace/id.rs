// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Opaque ID generation for traces, nodes and spaces.

use std::sync::atomic::{AtomicU64, Ordering};

use rand::rngs::OsRng;
use rand::RngCore;

/// Alphabet for node and space IDs.
pub const NODE_ID_ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// Length of node and space IDs.
pub const NODE_ID_LENGTH: usize = 12;

/// Length of the random suffix of trace IDs (after the 8-digit date).
pub const TRACE_ID_SUFFIX_LENGTH: usize = 12;

const DIGITS: &[u8] = b"0123456789";

/// Source of unique identifiers.
///
/// Implementations must not fail; if randomness is unavailable they fall back
/// to something derived from the clock.
pub trait IdGenerator: Send + Sync {
    /// ID for a node or a space.
    fn node_id(&self) -> String;

    /// ID for a whole trace.
    fn trace_id(&self) -> String;
}

/// Random IDs drawn from the OS entropy source.
///
/// Node IDs are 12 characters of `[0-9a-z]`. Trace IDs are a `YYYYMMDD`
/// date prefix followed by 12 random digits, which lets storage group
/// traces per day.
#[derive(Debug, Default)]
pub struct NanoIdGenerator {
    fallback_counter: AtomicU64,
}

impl NanoIdGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    fn generate(&self, alphabet: &[u8], len: usize) -> String {
        match random_string(alphabet, len) {
            Some(id) => id,
            None => {
                tracing::warn!("entropy source unavailable, using timestamp-derived id");
                self.timestamp_id(alphabet, len)
            }
        }
    }

    /// Encode the nanosecond clock plus a process-local counter in `alphabet`.
    fn timestamp_id(&self, alphabet: &[u8], len: usize) -> String {
        let nanos = chrono::Utc::now()
            .timestamp_nanos_opt()
            .unwrap_or_default() as u64;
        let seq = self.fallback_counter.fetch_add(1, Ordering::Relaxed);
        let mut value = nanos.wrapping_add(seq.wrapping_mul(7919));
        let base = alphabet.len() as u64;

        let mut out = vec![alphabet[0]; len];
        for slot in out.iter_mut().rev() {
            *slot = alphabet[(value % base) as usize];
            value /= base;
        }
        String::from_utf8(out).unwrap_or_default()
    }
}

impl IdGenerator for NanoIdGenerator {
    fn node_id(&self) -> String {
        self.generate(NODE_ID_ALPHABET, NODE_ID_LENGTH)
    }

    fn trace_id(&self) -> String {
        let prefix = chrono::Local::now().format("%Y%m%d").to_string();
        format!("{}{}", prefix, self.generate(DIGITS, TRACE_ID_SUFFIX_LENGTH))
    }
}

/// Draw `len` characters uniformly from `alphabet`, or `None` if the OS RNG fails.
fn random_string(alphabet: &[u8], len: usize) -> Option<String> {
    // Rejection sampling keeps the distribution uniform for any alphabet size.
    let limit = 256 - (256 % alphabet.len());
    let mut out = String::with_capacity(len);
    let mut buf = [0u8; 32];

    while out.len() < len {
        OsRng.try_fill_bytes(&mut buf).ok()?;
        for &byte in &buf {
            if (byte as usize) < limit {
                out.push(alphabet[byte as usize % alphabet.len()] as char);
                if out.len() == len {
                    break;
                }
            }
        }
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_node_id_shape() {
        let ids = NanoIdGenerator::new();
        let id = ids.node_id();
        assert_eq!(id.len(), NODE_ID_LENGTH);
        assert!(id.bytes().all(|b| NODE_ID_ALPHABET.contains(&b)));
    }

    #[test]
    fn test_trace_id_has_date_prefix() {
        let ids = NanoIdGenerator::new();
        let id = ids.trace_id();
        assert_eq!(id.len(), 8 + TRACE_ID_SUFFIX_LENGTH);
        assert!(id.bytes().all(|b| b.is_ascii_digit()));
        let today = chrono::Local::now().format("%Y%m%d").to_string();
        assert!(id.starts_with(&today));
    }

    #[test]
    fn test_node_ids_are_unique() {
        let ids = NanoIdGenerator::new();
        let set: HashSet<String> = (0..5000).map(|_| ids.node_id()).collect();
        assert_eq!(set.len(), 5000);
    }

    #[test]
    fn test_timestamp_fallback_shape_and_uniqueness() {
        let ids = NanoIdGenerator::new();
        let a = ids.timestamp_id(NODE_ID_ALPHABET, NODE_ID_LENGTH);
        let b = ids.timestamp_id(NODE_ID_ALPHABET, NODE_ID_LENGTH);
        assert_eq!(a.len(), NODE_ID_LENGTH);
        assert!(a.bytes().all(|c| NODE_ID_ALPHABET.contains(&c)));
        assert_ne!(a, b);
    }
}
