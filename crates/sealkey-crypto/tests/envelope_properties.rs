//! Property-based tests for derivation and the envelope codec
//!
//! These pin the two contracts the rest of the system leans on:
//!
//! 1. **Determinism**: derive(prf, salt, version) is a pure function
//! 2. **Round-trip**: open(seal(m)) == m for all payloads, keys, and IVs
//! 3. **Fail closed**: a wrong key never yields plaintext, only
//!    `DecryptionFailed`

use proptest::prelude::*;
use sealkey_crypto::{
    CryptoError, Envelope, IV_SIZE, PRF_SALT_SIZE, derive_master_key, open_bytes, open_field,
    seal_bytes, seal_field,
};

fn arb_salt() -> impl Strategy<Value = [u8; PRF_SALT_SIZE]> {
    prop::collection::vec(any::<u8>(), PRF_SALT_SIZE).prop_map(|v| {
        let mut arr = [0u8; PRF_SALT_SIZE];
        arr.copy_from_slice(&v);
        arr
    })
}

fn arb_iv() -> impl Strategy<Value = [u8; IV_SIZE]> {
    prop::collection::vec(any::<u8>(), IV_SIZE).prop_map(|v| {
        let mut arr = [0u8; IV_SIZE];
        arr.copy_from_slice(&v);
        arr
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    #[test]
    fn prop_derivation_is_deterministic(
        prf in prop::collection::vec(any::<u8>(), 16..64),
        salt in arb_salt(),
        version in 1u8..=4,
    ) {
        let k1 = derive_master_key(&prf, &salt, version).unwrap();
        let k2 = derive_master_key(&prf, &salt, version).unwrap();
        prop_assert_eq!(k1.as_bytes(), k2.as_bytes());
    }

    #[test]
    fn prop_versions_partition_keyspace(
        prf in prop::collection::vec(any::<u8>(), 32..=32),
        salt in arb_salt(),
    ) {
        let v1 = derive_master_key(&prf, &salt, 1).unwrap();
        let v2 = derive_master_key(&prf, &salt, 2).unwrap();
        prop_assert_ne!(v1.as_bytes(), v2.as_bytes());
    }

    #[test]
    fn prop_bytes_roundtrip(
        plaintext in prop::collection::vec(any::<u8>(), 0..2048),
        prf in prop::collection::vec(any::<u8>(), 32..=32),
        salt in arb_salt(),
        iv in arb_iv(),
        aad in prop::option::of(prop::collection::vec(any::<u8>(), 0..64)),
    ) {
        let key = derive_master_key(&prf, &salt, 1).unwrap();

        let envelope = seal_bytes(&key, &plaintext, aad.as_deref(), iv);
        let opened = open_bytes(&key, &envelope, aad.as_deref()).unwrap();

        prop_assert_eq!(opened, plaintext);
    }

    #[test]
    fn prop_field_roundtrip_through_wire(
        value in "\\PC{0,200}",
        prf in prop::collection::vec(any::<u8>(), 32..=32),
        salt in arb_salt(),
        iv in arb_iv(),
    ) {
        let key = derive_master_key(&prf, &salt, 1).unwrap();

        let wire = seal_field(&key, &value, iv).to_wire();
        let parsed = Envelope::parse(&wire).unwrap();

        prop_assert_eq!(open_field(&key, &parsed).unwrap(), value);
    }

    #[test]
    fn prop_wrong_key_fails_closed(
        plaintext in prop::collection::vec(any::<u8>(), 1..512),
        salt in arb_salt(),
        iv in arb_iv(),
    ) {
        let right = derive_master_key(&[0x11u8; 32], &salt, 1).unwrap();
        let wrong = derive_master_key(&[0x22u8; 32], &salt, 1).unwrap();

        let envelope = seal_bytes(&right, &plaintext, None, iv);
        let result = open_bytes(&wrong, &envelope, None);

        prop_assert!(matches!(result, Err(CryptoError::DecryptionFailed)));
    }

    #[test]
    fn prop_parse_never_panics(wire in "\\PC{0,400}") {
        // Parsing untrusted wire strings must reject, never panic.
        let _ = Envelope::parse(&wire);
    }
}
