//! Master key derivation from passkey PRF output using HKDF

use hkdf::Hkdf;
use sha2::Sha256;
use zeroize::Zeroize;

use crate::error::CryptoError;

/// Label used for master key derivation. The version byte is appended,
/// so a version bump produces an unrelated key.
const MASTER_KEY_LABEL: &[u8] = b"sealkeyMasterV";

/// Label prefix for per-scope subkey derivation.
const SUBKEY_LABEL: &[u8] = b"sealkeyScope";

/// Size of a derived symmetric key in bytes (256 bits).
pub const KEY_SIZE: usize = 32;

/// Fixed size of the stored, non-secret derivation salt.
pub const PRF_SALT_SIZE: usize = 32;

/// Minimum accepted PRF output length. WebAuthn PRF extensions return
/// 32 bytes; anything shorter is a broken or hostile client.
const MIN_PRF_OUTPUT: usize = 16;

/// A derived 256-bit symmetric key.
///
/// Zeroized on drop. Exposes its bytes only by reference so callers cannot
/// accidentally copy key material into long-lived buffers.
pub struct MasterKey {
    key: [u8; KEY_SIZE],
}

impl MasterKey {
    /// Wrap raw key bytes (used by tests and the local key cache).
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self { key: bytes }
    }

    /// The raw key bytes.
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.key
    }
}

impl Drop for MasterKey {
    fn drop(&mut self) {
        self.key.zeroize();
    }
}

impl Clone for MasterKey {
    fn clone(&self) -> Self {
        Self { key: self.key }
    }
}

// Deliberately not Debug-printable as key bytes.
impl std::fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("MasterKey(..)")
    }
}

impl PartialEq for MasterKey {
    fn eq(&self, other: &Self) -> bool {
        // Test/diagnostic equality only. Hot paths never compare keys;
        // wrong-key detection goes through the key-check value.
        self.key == other.key
    }
}

impl Eq for MasterKey {}

/// Derive the master key from a passkey PRF output and the stored salt.
///
/// HKDF-SHA256 with the salt as the HKDF salt, the PRF output as IKM, and
/// a versioned application label as the info parameter.
///
/// # Determinism
///
/// Same PRF output + same salt + same version always produces the same
/// key. No server-side secret participates: the server never receives the
/// PRF output and cannot derive this key.
///
/// # Errors
///
/// - `PrfOutputTooShort` if the PRF output is under 16 bytes
pub fn derive_master_key(
    prf_output: &[u8],
    salt: &[u8; PRF_SALT_SIZE],
    version: u8,
) -> Result<MasterKey, CryptoError> {
    if prf_output.len() < MIN_PRF_OUTPUT {
        return Err(CryptoError::PrfOutputTooShort {
            actual: prf_output.len(),
            minimum: MIN_PRF_OUTPUT,
        });
    }

    let hkdf = Hkdf::<Sha256>::new(Some(salt), prf_output);

    // Info: label || version byte
    let mut info = Vec::with_capacity(MASTER_KEY_LABEL.len() + 1);
    info.extend_from_slice(MASTER_KEY_LABEL);
    info.push(version);

    let mut key = [0u8; KEY_SIZE];
    let Ok(()) = hkdf.expand(&info, &mut key) else {
        unreachable!("32 bytes is a valid HKDF-SHA256 output length");
    };

    Ok(MasterKey { key })
}

/// Derive a per-scope subkey from the master key.
///
/// Used for attachment payloads and other scopes that should not share the
/// field-encryption key directly. Deterministic for a given (master, label)
/// pair, so subkeys are re-derivable and never need separate storage.
pub fn derive_subkey(master: &MasterKey, scope_label: &[u8]) -> MasterKey {
    let hkdf = Hkdf::<Sha256>::new(None, master.as_bytes());

    let mut info = Vec::with_capacity(SUBKEY_LABEL.len() + scope_label.len());
    info.extend_from_slice(SUBKEY_LABEL);
    info.extend_from_slice(scope_label);

    let mut key = [0u8; KEY_SIZE];
    let Ok(()) = hkdf.expand(&info, &mut key) else {
        unreachable!("32 bytes is a valid HKDF-SHA256 output length");
    };

    MasterKey { key }
}
