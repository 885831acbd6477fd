//! Fuzz target for sealed challenge tokens
//!
//! # Strategy
//!
//! - Arbitrary strings through `retrieve` and `clear` on a live store
//! - Bitflipped real tokens (issue, mutate, retrieve)
//!
//! # Invariants
//!
//! - Neither `retrieve` nor `clear` ever panics on hostile tokens
//! - A mutated token never unseals: only byte-identical tokens round-trip

#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use sealkey_server::{ChallengeStore, SystemEnv};

#[derive(Debug, Arbitrary)]
struct TokenAttack {
    raw_token: String,
    flip_at: usize,
    flip_bits: u8,
}

fuzz_target!(|attack: TokenAttack| {
    let store = ChallengeStore::new(SystemEnv::new());

    // Hostile strings straight into the API.
    let _ = store.retrieve(&attack.raw_token);
    store.clear(&attack.raw_token);

    // A real token with one mutated byte must not unseal.
    let (token, _) = store.issue(None, None, None);
    let mut bytes = token.clone().into_bytes();
    if !bytes.is_empty() && attack.flip_bits != 0 {
        let at = attack.flip_at % bytes.len();
        bytes[at] ^= attack.flip_bits;
        if let Ok(mutated) = String::from_utf8(bytes) {
            if mutated != token {
                assert!(store.retrieve(&mutated).is_none());
            }
        }
    }

    // The untouched token still works.
    assert!(store.retrieve(&token).is_some());
});
