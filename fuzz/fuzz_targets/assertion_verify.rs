//! Fuzz target for full assertion verification
//!
//! # Strategy
//!
//! - Arbitrary client data JSON, authenticator data, signatures, and
//!   stored public keys through `verify_assertion`
//! - Challenge bytes sometimes mirrored into the client data so the
//!   pipeline reaches deeper checks
//!
//! # Invariants
//!
//! - Verification never panics on hostile input
//! - Arbitrary (unsigned) input never verifies: with no valid private key
//!   involved, every outcome must be an error

#![no_main]

use std::collections::BTreeSet;

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use sealkey_core::{AssertionResponse, Challenge, Credential, verify_assertion};

#[derive(Debug, Arbitrary)]
struct AssertionAttack {
    challenge: Vec<u8>,
    client_data_json: Vec<u8>,
    authenticator_data: Vec<u8>,
    signature: Vec<u8>,
    public_key: Vec<u8>,
    stored_counter: u32,
    mirror_challenge: bool,
}

fuzz_target!(|attack: AssertionAttack| {
    let client_data_json = if attack.mirror_challenge {
        // Well-formed client data carrying the stored challenge, so the
        // fuzzer regularly reaches origin, rpIdHash, and signature checks.
        use base64::Engine as _;
        format!(
            r#"{{"type":"webauthn.get","challenge":"{}","origin":"https://fuzz.example"}}"#,
            base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(&attack.challenge),
        )
        .into_bytes()
    } else {
        attack.client_data_json.clone()
    };

    let assertion = AssertionResponse {
        credential_id: vec![1; 16],
        client_data_json,
        authenticator_data: attack.authenticator_data.clone(),
        signature: attack.signature.clone(),
    };

    let challenge = Challenge {
        challenge: attack.challenge.clone(),
        owner_id: None,
        issued_at_secs: 0,
        redirect_hint: None,
        prf_salt_hint: None,
    };

    let credential = Credential {
        credential_id: vec![1; 16],
        owner_id: uuid::Uuid::nil(),
        public_key: attack.public_key.clone(),
        signature_counter: attack.stored_counter,
        transports: BTreeSet::new(),
        created_at_secs: 0,
        last_used_at_secs: 0,
    };

    let origins = vec!["https://fuzz.example".to_string()];
    let result = verify_assertion(&assertion, &challenge, &credential, &origins, "fuzz.example");

    // No valid signing key participated; success would mean forgery.
    assert!(result.is_err());
});
