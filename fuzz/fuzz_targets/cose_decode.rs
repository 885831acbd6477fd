//! Fuzz target for COSE public-key decoding
//!
//! # Strategy
//!
//! - Raw bytes: arbitrary CBOR through `decode_cose_key`
//! - Near-valid: well-formed EC2/OKP keys with mutated labels and
//!   coordinate lengths
//!
//! # Invariants
//!
//! - Decoding never panics, loops, or over-allocates on hostile CBOR
//! - A successfully decoded key always carries coordinates of the
//!   advertised curve size

#![no_main]

use libfuzzer_sys::fuzz_target;
use sealkey_core::{CosePublicKey, decode_cose_key};

fuzz_target!(|data: &[u8]| {
    match decode_cose_key(data) {
        Ok(CosePublicKey::Es256 { x, y }) => {
            assert_eq!(x.len(), 32);
            assert_eq!(y.len(), 32);
        },
        Ok(CosePublicKey::Ed25519 { bytes }) => {
            assert_eq!(bytes.len(), 32);
        },
        Err(_) => {},
    }
});
