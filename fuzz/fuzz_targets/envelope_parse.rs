//! Fuzz target for envelope wire parsing and decryption
//!
//! # Strategy
//!
//! - Raw bytes: arbitrary JSON through `Envelope::parse`
//! - Structured: arbitrary iv/ciphertext/version combinations through
//!   `open_bytes` and `open_field`
//!
//! # Invariants
//!
//! - Parsing never panics on malformed wire JSON
//! - Decryption of arbitrary envelopes fails cleanly, never with garbage
//!   plaintext and never with a panic

#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use sealkey_crypto::{ENVELOPE_VERSION, Envelope, IV_SIZE, MasterKey, open_bytes, open_field};

#[derive(Debug, Arbitrary)]
struct EnvelopeAttack {
    wire: Vec<u8>,
    iv: [u8; IV_SIZE],
    ciphertext: Vec<u8>,
    version: u8,
    aad: Option<Vec<u8>>,
}

fuzz_target!(|attack: EnvelopeAttack| {
    // Wire parsing of arbitrary bytes.
    if let Ok(wire_str) = std::str::from_utf8(&attack.wire) {
        let _ = Envelope::parse(wire_str);
    }

    // Arbitrary envelopes against a fixed key must fail closed.
    let key = MasterKey::from_bytes([0x42; 32]);
    let envelope = Envelope {
        iv: attack.iv,
        ciphertext: attack.ciphertext.clone(),
        version: attack.version,
    };

    if let Ok(plaintext) = open_bytes(&key, &envelope, attack.aad.as_deref()) {
        // A forged ciphertext authenticating under an unrelated key would
        // break AES-GCM; treat it as a crash.
        panic!("arbitrary envelope decrypted to {} bytes", plaintext.len());
    }

    let _ = open_field(&key, &envelope);

    // Round-trip: the wire form of any supported-version envelope
    // re-parses identically. Other versions are rejected at parse time.
    if envelope.version == ENVELOPE_VERSION {
        let reparsed = Envelope::parse(&envelope.to_wire()).expect("own wire form must parse");
        assert_eq!(reparsed, envelope);
    }
});
