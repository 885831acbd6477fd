//! Authentication and encryption-setup facade.
//!
//! [`AuthService`] is what the transport layer calls. Every operation
//! returns the uniform [`ApiResponse`] envelope and never panics across
//! the boundary. Which internal check failed is logged with full detail
//! and collapsed externally to a generic message, so the endpoints cannot
//! be used to enumerate valid accounts or credentials.

use std::time::Duration;

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use sealkey_core::{
    AssertionResponse, Credential, Environment, KeyDerivationParams, decode_cose_key,
    verify_assertion,
};
use sealkey_crypto::KeyCheckValue;
use serde::Serialize;
use uuid::Uuid;

use crate::{
    challenge::ChallengeStore,
    governor::{AttemptGovernor, CounterStore, GovernorConfig, LockoutState},
    storage::CredentialStore,
};

/// Generic message for every collapsed authentication failure.
const INVALID_CREDENTIALS_MSG: &str = "invalid or expired credentials";

/// Generic message for both rate limiting and lockout.
const TOO_MANY_ATTEMPTS_MSG: &str = "too many attempts, try again later";

/// Service configuration.
#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// Relying party identifier assertions must be scoped to.
    pub rp_id: String,
    /// Exact origins assertions may come from.
    pub expected_origins: Vec<String>,
    /// Governor tuning.
    pub governor: GovernorConfig,
    /// Response-time floor for `complete_authentication`, resisting
    /// timing oracles across its failure paths.
    pub min_response_millis: u64,
}

impl AuthConfig {
    /// Config for a relying party with a single allowed origin.
    pub fn new(rp_id: impl Into<String>, origin: impl Into<String>) -> Self {
        Self {
            rp_id: rp_id.into(),
            expected_origins: vec![origin.into()],
            governor: GovernorConfig::default(),
            min_response_millis: 150,
        }
    }
}

/// Machine-readable error class for UI branching. Deliberately coarse:
/// verification failures all collapse to `InvalidCredentials`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// Challenge, credential, signature, or counter did not check out.
    InvalidCredentials,
    /// Request was malformed or conflicts with existing state.
    InvalidRequest,
    /// The referenced resource does not exist for this owner.
    NotFound,
    /// Encryption has not been set up for this owner yet.
    SetupRequired,
    /// Sliding-window rate limit hit.
    RateLimited,
    /// Escalating lockout in effect.
    LockedOut,
    /// Backing storage failed; retry later.
    StorageUnavailable,
}

/// Uniform success/error envelope returned by every service operation.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ApiResponse<T> {
    /// Operation succeeded.
    Ok {
        /// Operation result.
        data: T,
    },
    /// Operation failed.
    Err {
        /// Machine-readable error class.
        code: ErrorCode,
        /// Generic, enumeration-safe message.
        message: String,
        /// Seconds until a retry can succeed, for rate-limit and lockout
        /// rejections. Same shape on the first offense and the hundredth.
        #[serde(skip_serializing_if = "Option::is_none")]
        retry_after_secs: Option<u64>,
    },
}

impl<T> ApiResponse<T> {
    /// Success envelope.
    pub fn ok(data: T) -> Self {
        Self::Ok { data }
    }

    /// Error envelope.
    pub fn err(code: ErrorCode, message: impl Into<String>, retry_after_secs: Option<u64>) -> Self {
        Self::Err { code, message: message.into(), retry_after_secs }
    }

    /// Whether this is the success variant.
    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok { .. })
    }
}

/// Data returned by `begin_authentication`.
#[derive(Debug, Clone, Serialize)]
pub struct BeginAuthentication {
    /// Opaque sealed challenge token; echo back to
    /// `complete_authentication`.
    pub token: String,
    /// Challenge bytes (base64url) for the authenticator.
    pub challenge: String,
    /// PRF salt (base64url) when the owner has encryption set up, so the
    /// client can evaluate the PRF extension in the same ceremony.
    pub prf_salt: Option<String>,
}

/// Data returned by a successful `complete_authentication`.
#[derive(Debug, Clone, Serialize)]
pub struct AuthSuccess {
    /// Authenticated owner.
    pub owner_id: Uuid,
    /// Whether the authenticator verified the user (biometric or PIN),
    /// beyond mere presence.
    pub user_verified: bool,
    /// Post-login destination carried through from `begin_authentication`.
    pub redirect_hint: Option<String>,
}

/// Per-credential view for the owner's own settings page.
#[derive(Debug, Clone, Serialize)]
pub struct CredentialSummary {
    /// Credential ID (base64url).
    pub credential_id: String,
    /// Transports reported at enrollment (usb, nfc, ble, internal, ...).
    pub transports: Vec<String>,
    /// Unix seconds at enrollment.
    pub created_at_secs: u64,
    /// Unix seconds of the last successful ceremony.
    pub last_used_at_secs: u64,
}

/// Owner's own account status.
#[derive(Debug, Clone, Serialize)]
pub struct OwnStatus {
    /// Number of enrolled passkeys.
    pub credentials_enrolled: usize,
    /// Whether key-derivation parameters exist.
    pub encryption_configured: bool,
    /// Whether a key-check value anchors the canonical key.
    pub key_check_anchored: bool,
}

/// Key-derivation parameters as the client needs them for an unlock.
#[derive(Debug, Clone, Serialize)]
pub struct UnlockData {
    /// PRF evaluation salt (base64url).
    pub prf_salt: String,
    /// Credential the parameters were created with (base64url).
    pub credential_id: String,
    /// Derivation version.
    pub version: u8,
    /// Stored key-check value, absent until first anchored.
    pub key_check_value: Option<KeyCheckValue>,
}

/// The service facade over storage, challenges, and the governor.
///
/// Clone shares all underlying state.
#[derive(Clone)]
pub struct AuthService<S: CredentialStore, C: CounterStore, E: Environment> {
    store: S,
    challenges: ChallengeStore<E>,
    governor: AttemptGovernor<C, E>,
    env: E,
    config: AuthConfig,
}

impl<S: CredentialStore, C: CounterStore, E: Environment> AuthService<S, C, E> {
    /// Create a service. The challenge-sealing key is generated here and
    /// lives for the process.
    pub fn new(store: S, counters: C, env: E, config: AuthConfig) -> Self {
        let challenges = ChallengeStore::new(env.clone());
        let governor = AttemptGovernor::new(counters, env.clone(), config.governor.clone());
        Self { store, challenges, governor, env, config }
    }

    /// Account status for the owner's own settings page.
    ///
    /// Rate-limited per owner like every credential-read operation.
    pub fn check_own_status(&self, owner_id: Uuid) -> ApiResponse<OwnStatus> {
        if let Some(blocked) = self.check_read_window(owner_id) {
            return blocked;
        }

        let credentials = match self.store.credentials_for_owner(owner_id) {
            Ok(credentials) => credentials,
            Err(error) => return storage_unavailable(&error),
        };
        let params = match self.store.params_for_owner(owner_id) {
            Ok(params) => params,
            Err(error) => return storage_unavailable(&error),
        };

        ApiResponse::ok(OwnStatus {
            credentials_enrolled: credentials.len(),
            encryption_configured: params.is_some(),
            key_check_anchored: params.is_some_and(|p| p.key_check_value.is_some()),
        })
    }

    /// The owner's enrolled passkeys.
    pub fn list_own_credentials(&self, owner_id: Uuid) -> ApiResponse<Vec<CredentialSummary>> {
        if let Some(blocked) = self.check_read_window(owner_id) {
            return blocked;
        }

        match self.store.credentials_for_owner(owner_id) {
            Ok(credentials) => ApiResponse::ok(
                credentials
                    .iter()
                    .map(|c| CredentialSummary {
                        credential_id: URL_SAFE_NO_PAD.encode(&c.credential_id),
                        transports: c.transports.iter().cloned().collect(),
                        created_at_secs: c.created_at_secs,
                        last_used_at_secs: c.last_used_at_secs,
                    })
                    .collect(),
            ),
            Err(error) => storage_unavailable(&error),
        }
    }

    /// Delete one of the owner's credentials.
    ///
    /// A credential belonging to someone else reports `NotFound`, same as
    /// a credential that does not exist.
    pub fn delete_credential(&self, owner_id: Uuid, credential_id: &str) -> ApiResponse<()> {
        let Ok(raw_id) = URL_SAFE_NO_PAD.decode(credential_id) else {
            return ApiResponse::err(ErrorCode::NotFound, "unknown credential", None);
        };

        match self.store.credential(&raw_id) {
            Ok(Some(credential)) if credential.owner_id == owner_id => {},
            Ok(Some(other)) => {
                tracing::warn!(
                    owner = %owner_id,
                    actual_owner = %other.owner_id,
                    "delete refused: credential belongs to another owner"
                );
                return ApiResponse::err(ErrorCode::NotFound, "unknown credential", None);
            },
            Ok(None) => return ApiResponse::err(ErrorCode::NotFound, "unknown credential", None),
            Err(error) => return storage_unavailable(&error),
        }

        match self.store.remove_credential(&raw_id) {
            Ok(_) => ApiResponse::ok(()),
            Err(error) => storage_unavailable(&error),
        }
    }

    /// Enroll a credential for an owner.
    ///
    /// Called from the registration path after its own ceremony completed;
    /// the public key must be a decodable COSE key of a supported
    /// algorithm.
    pub fn enroll_credential(&self, credential: &Credential) -> ApiResponse<()> {
        if let Err(error) = decode_cose_key(&credential.public_key) {
            tracing::info!(error = %error, "enrollment rejected: bad COSE key");
            return ApiResponse::err(ErrorCode::InvalidRequest, "unsupported credential", None);
        }

        match self.store.insert_credential(credential) {
            Ok(()) => ApiResponse::ok(()),
            Err(crate::storage::StorageError::AlreadyExists) => {
                ApiResponse::err(ErrorCode::InvalidRequest, "unsupported credential", None)
            },
            Err(error) => storage_unavailable(&error),
        }
    }

    /// Issue a challenge for an authentication ceremony.
    ///
    /// With a known owner the response carries their PRF salt so the
    /// client can evaluate the PRF extension in the same ceremony.
    pub fn begin_authentication(
        &self,
        owner_id: Option<Uuid>,
        redirect_hint: Option<String>,
    ) -> ApiResponse<BeginAuthentication> {
        let prf_salt_hint = match owner_id.map(|owner| self.store.params_for_owner(owner)) {
            Some(Ok(params)) => params.map(|p| p.prf_salt),
            Some(Err(error)) => {
                // Salt delivery is a convenience; authentication can still
                // proceed without it.
                tracing::warn!(error = %error, "prf salt lookup failed, issuing without hint");
                None
            },
            None => None,
        };

        let (token, challenge) = self.challenges.issue(owner_id, redirect_hint, prf_salt_hint);

        ApiResponse::ok(BeginAuthentication {
            token,
            challenge: URL_SAFE_NO_PAD.encode(&challenge.challenge),
            prf_salt: prf_salt_hint.map(|salt| URL_SAFE_NO_PAD.encode(salt)),
        })
    }

    /// Verify an assertion and establish the session.
    ///
    /// `governor_key` identifies the caller for rate limiting and lockout;
    /// the transport passes the account identity when known, the client
    /// address otherwise.
    ///
    /// All failure paths take at least `min_response_millis` and return
    /// the same generic rejection, so the endpoint leaks neither which
    /// check failed nor how far the pipeline got.
    pub async fn complete_authentication(
        &self,
        token: &str,
        assertion: &AssertionResponse,
        governor_key: &str,
    ) -> ApiResponse<AuthSuccess> {
        let started = self.env.now();
        let response = self.complete_inner(token, assertion, governor_key);

        let elapsed = self.env.now() - started;
        let floor = Duration::from_millis(self.config.min_response_millis);
        if elapsed < floor {
            self.env.sleep(floor - elapsed).await;
        }

        response
    }

    fn complete_inner(
        &self,
        token: &str,
        assertion: &AssertionResponse,
        governor_key: &str,
    ) -> ApiResponse<AuthSuccess> {
        let window = self.governor.check_window(governor_key);
        if !window.allowed {
            return ApiResponse::err(
                ErrorCode::RateLimited,
                TOO_MANY_ATTEMPTS_MSG,
                window.retry_after_secs,
            );
        }

        if let LockoutState::Locked { retry_after_secs } = self.governor.lockout_state(governor_key)
        {
            return ApiResponse::err(
                ErrorCode::LockedOut,
                TOO_MANY_ATTEMPTS_MSG,
                Some(retry_after_secs),
            );
        }

        // The challenge is spent here no matter what follows; a failed
        // ceremony must not leave a reusable token behind, and consumption
        // is atomic so concurrent ceremonies cannot both redeem one token.
        let Some(challenge) = self.challenges.consume(token) else {
            tracing::info!("ceremony failed: challenge expired or missing");
            return self.record_failure(governor_key);
        };

        let credential = match self.store.credential(&assertion.credential_id) {
            Ok(Some(credential)) => credential,
            Ok(None) => {
                tracing::info!("ceremony failed: credential not found");
                return self.record_failure(governor_key);
            },
            Err(error) => {
                tracing::warn!(error = %error, "ceremony failed: credential lookup");
                return self.record_failure(governor_key);
            },
        };

        if let Some(owner) = challenge.owner_id
            && owner != credential.owner_id
        {
            tracing::warn!(
                expected = %owner,
                actual = %credential.owner_id,
                "ceremony failed: credential owner mismatch"
            );
            return self.record_failure(governor_key);
        }

        let verified = match verify_assertion(
            assertion,
            &challenge,
            &credential,
            &self.config.expected_origins,
            &self.config.rp_id,
        ) {
            Ok(verified) => verified,
            Err(error) => {
                tracing::info!(error = %error, "ceremony failed: verification");
                return self.record_failure(governor_key);
            },
        };

        // Counter persistence is part of the ceremony: if the CAS loses
        // (concurrent replay) or storage fails, no session is established.
        if let Err(error) = self.store.update_counter(
            &credential.credential_id,
            credential.signature_counter,
            verified.new_counter,
            self.env.wall_clock_secs(),
        ) {
            tracing::warn!(error = %error, "ceremony failed: counter persistence");
            return self.record_failure(governor_key);
        }

        self.governor.record_success(governor_key);
        tracing::info!(owner = %credential.owner_id, "ceremony completed");

        ApiResponse::ok(AuthSuccess {
            owner_id: credential.owner_id,
            user_verified: verified.user_verified,
            redirect_hint: challenge.redirect_hint,
        })
    }

    /// Store key-derivation parameters for an owner.
    ///
    /// First write wins: the response always carries the canonical
    /// parameters, which may differ from the submitted ones if encryption
    /// was already set up (the original salt must keep working).
    pub fn setup_encryption(&self, params: &KeyDerivationParams) -> ApiResponse<UnlockData> {
        if let Err(error) = self.store.insert_params(params) {
            return storage_unavailable(&error);
        }

        match self.store.params_for_owner(params.owner_id) {
            Ok(Some(canonical)) => ApiResponse::ok(unlock_data(&canonical)),
            Ok(None) => {
                tracing::error!(owner = %params.owner_id, "params vanished after insert");
                ApiResponse::err(ErrorCode::StorageUnavailable, "storage unavailable", None)
            },
            Err(error) => storage_unavailable(&error),
        }
    }

    /// Fetch derivation parameters for an unlock.
    ///
    /// When the stored parameters have no key-check value yet and the
    /// client reports one (computed after its first derivation), it is
    /// anchored opportunistically; a failed anchor write is logged and
    /// does not fail the unlock.
    pub fn unlock(
        &self,
        owner_id: Uuid,
        computed_check: Option<KeyCheckValue>,
    ) -> ApiResponse<UnlockData> {
        if let Some(blocked) = self.check_read_window(owner_id) {
            return blocked;
        }

        let params = match self.store.params_for_owner(owner_id) {
            Ok(Some(params)) => params,
            Ok(None) => {
                return ApiResponse::err(ErrorCode::SetupRequired, "encryption not set up", None);
            },
            Err(error) => return storage_unavailable(&error),
        };

        if params.key_check_value.is_none()
            && let Some(check) = computed_check
        {
            if let Err(error) = self.store.set_key_check_value(owner_id, &check) {
                tracing::warn!(error = %error, "key-check anchor write failed");
            }
            // Reflect the anchor in the response even if the write failed;
            // the client just computed it.
            let mut anchored = params;
            anchored.key_check_value = Some(check);
            return ApiResponse::ok(unlock_data(&anchored));
        }

        ApiResponse::ok(unlock_data(&params))
    }

    /// Sliding-window gate for the credential-read surface, keyed per
    /// owner and separate from the authentication window. `None` means
    /// the call may proceed.
    fn check_read_window<T>(&self, owner_id: Uuid) -> Option<ApiResponse<T>> {
        let decision = self.governor.check_window(&format!("read:{owner_id}"));
        if decision.allowed {
            return None;
        }
        Some(ApiResponse::err(
            ErrorCode::RateLimited,
            TOO_MANY_ATTEMPTS_MSG,
            decision.retry_after_secs,
        ))
    }

    fn record_failure(&self, governor_key: &str) -> ApiResponse<AuthSuccess> {
        self.governor.record_failure(governor_key);
        ApiResponse::err(ErrorCode::InvalidCredentials, INVALID_CREDENTIALS_MSG, None)
    }
}

fn unlock_data(params: &KeyDerivationParams) -> UnlockData {
    UnlockData {
        prf_salt: URL_SAFE_NO_PAD.encode(params.prf_salt),
        credential_id: URL_SAFE_NO_PAD.encode(&params.credential_id),
        version: params.version,
        key_check_value: params.key_check_value,
    }
}

fn storage_unavailable<T>(error: &crate::storage::StorageError) -> ApiResponse<T> {
    tracing::warn!(error = %error, "storage unavailable");
    ApiResponse::err(ErrorCode::StorageUnavailable, "storage unavailable", None)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_serializes_ok_variant() {
        let response = ApiResponse::ok(OwnStatus {
            credentials_enrolled: 2,
            encryption_configured: true,
            key_check_anchored: false,
        });

        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["status"], "ok");
        assert_eq!(json["data"]["credentials_enrolled"], 2);
    }

    #[test]
    fn envelope_serializes_err_variant_without_null_retry() {
        let response: ApiResponse<()> =
            ApiResponse::err(ErrorCode::InvalidCredentials, INVALID_CREDENTIALS_MSG, None);

        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["status"], "err");
        assert_eq!(json["code"], "invalid_credentials");
        assert!(json.get("retry_after_secs").is_none());
    }

    #[test]
    fn envelope_carries_retry_after_when_blocked() {
        let response: ApiResponse<()> =
            ApiResponse::err(ErrorCode::LockedOut, TOO_MANY_ATTEMPTS_MSG, Some(120));

        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["code"], "locked_out");
        assert_eq!(json["retry_after_secs"], 120);
    }
}
