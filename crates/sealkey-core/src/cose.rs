//! COSE_Key decoding for stored credential public keys.
//!
//! Enrollment stores the authenticator's public key as COSE_Key CBOR
//! bytes. This module decodes the two key types a passkey verifier needs:
//! EC2 P-256 with ES256 (the overwhelmingly common case) and OKP Ed25519
//! with EdDSA. Anything else is rejected before any cryptography runs.

use ciborium::value::Value;

use crate::error::CoseError;

// COSE map labels (RFC 9052 / RFC 9053)
const LABEL_KTY: i128 = 1;
const LABEL_ALG: i128 = 3;
const LABEL_CRV: i128 = -1;
const LABEL_X: i128 = -2;
const LABEL_Y: i128 = -3;

const KTY_OKP: i128 = 1;
const KTY_EC2: i128 = 2;
const ALG_ES256: i128 = -7;
const ALG_EDDSA: i128 = -8;
const CRV_P256: i128 = 1;
const CRV_ED25519: i128 = 6;

/// A decoded credential public key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CosePublicKey {
    /// P-256 ECDSA with SHA-256 (COSE alg -7)
    Es256 {
        /// X coordinate, 32 bytes
        x: [u8; 32],
        /// Y coordinate, 32 bytes
        y: [u8; 32],
    },
    /// Ed25519 EdDSA (COSE alg -8)
    Ed25519 {
        /// Compressed public key, 32 bytes
        bytes: [u8; 32],
    },
}

/// Decode COSE_Key CBOR bytes into a verification key.
///
/// # Errors
///
/// - `Malformed` if the bytes are not a CBOR map or required members are
///   missing or of the wrong type
/// - `Unsupported` for any kty/alg pair other than EC2+ES256 or OKP+EdDSA
/// - `InvalidLength` if a coordinate is not exactly 32 bytes
pub fn decode_cose_key(bytes: &[u8]) -> Result<CosePublicKey, CoseError> {
    let value: Value = ciborium::from_reader(bytes)
        .map_err(|e| CoseError::Malformed { reason: format!("cbor: {e}") })?;

    let Value::Map(entries) = value else {
        return Err(CoseError::Malformed { reason: "not a map".to_string() });
    };

    let kty = required_int(&entries, LABEL_KTY, "kty")?;
    let alg = required_int(&entries, LABEL_ALG, "alg")?;
    let crv = required_int(&entries, LABEL_CRV, "crv")?;

    match (kty, alg, crv) {
        (KTY_EC2, ALG_ES256, CRV_P256) => {
            let x = required_coord(&entries, LABEL_X, "x")?;
            let y = required_coord(&entries, LABEL_Y, "y")?;
            Ok(CosePublicKey::Es256 { x, y })
        },
        (KTY_OKP, ALG_EDDSA, CRV_ED25519) => {
            let bytes = required_coord(&entries, LABEL_X, "x")?;
            Ok(CosePublicKey::Ed25519 { bytes })
        },
        _ => Err(CoseError::Unsupported { kty, alg }),
    }
}

fn lookup<'a>(entries: &'a [(Value, Value)], label: i128) -> Option<&'a Value> {
    entries.iter().find_map(|(k, v)| {
        let Value::Integer(i) = k else { return None };
        (i128::from(*i) == label).then_some(v)
    })
}

fn required_int(
    entries: &[(Value, Value)],
    label: i128,
    name: &'static str,
) -> Result<i128, CoseError> {
    match lookup(entries, label) {
        Some(Value::Integer(i)) => Ok(i128::from(*i)),
        Some(_) => Err(CoseError::Malformed { reason: format!("{name} is not an integer") }),
        None => Err(CoseError::Malformed { reason: format!("missing {name}") }),
    }
}

fn required_coord(
    entries: &[(Value, Value)],
    label: i128,
    name: &'static str,
) -> Result<[u8; 32], CoseError> {
    match lookup(entries, label) {
        Some(Value::Bytes(b)) => b
            .as_slice()
            .try_into()
            .map_err(|_| CoseError::InvalidLength { component: name, actual: b.len() }),
        Some(_) => Err(CoseError::Malformed { reason: format!("{name} is not bytes") }),
        None => Err(CoseError::Malformed { reason: format!("missing {name}") }),
    }
}

/// Encode an ES256 public key as COSE_Key bytes.
///
/// Used by enrollment and by tests that need to build stored credentials.
pub fn encode_es256_key(x: &[u8; 32], y: &[u8; 32]) -> Vec<u8> {
    let map = Value::Map(vec![
        (Value::Integer(1.into()), Value::Integer(2.into())),
        (Value::Integer(3.into()), Value::Integer((-7).into())),
        (Value::Integer((-1).into()), Value::Integer(1.into())),
        (Value::Integer((-2).into()), Value::Bytes(x.to_vec())),
        (Value::Integer((-3).into()), Value::Bytes(y.to_vec())),
    ]);
    encode_map(&map)
}

/// Encode an Ed25519 public key as COSE_Key bytes.
pub fn encode_ed25519_key(public: &[u8; 32]) -> Vec<u8> {
    let map = Value::Map(vec![
        (Value::Integer(1.into()), Value::Integer(1.into())),
        (Value::Integer(3.into()), Value::Integer((-8).into())),
        (Value::Integer((-1).into()), Value::Integer(6.into())),
        (Value::Integer((-2).into()), Value::Bytes(public.to_vec())),
    ]);
    encode_map(&map)
}

fn encode_map(map: &Value) -> Vec<u8> {
    let mut buf = Vec::new();
    let Ok(()) = ciborium::into_writer(map, &mut buf) else {
        unreachable!("COSE key encoding to a Vec cannot fail");
    };
    buf
}
