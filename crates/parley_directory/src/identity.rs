#![forbid(unsafe_code)]

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use hmac::{Hmac, Mac};
use parley_domain::UserId;
use parley_util::time::unix_secs_now;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use thiserror::Error;

use crate::SecretString;

/// Handshake-time failures; all of these abort connection establishment.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthError {
	#[error("missing auth token")]
	MissingToken,
	#[error("invalid auth token")]
	InvalidToken,
	#[error("auth token expired")]
	Expired,
	#[error("unknown account")]
	UnknownAccount,
	#[error("account is not active")]
	AccountInactive,
	#[error("account has no tenant assignment")]
	NoTenant,
}

/// Verified claims carried by a bearer credential.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenClaims {
	pub user_id: UserId,
	pub expires_at: u64,
}

/// Validates a bearer credential and yields the claimed identity.
#[async_trait::async_trait]
pub trait IdentityVerifier: Send + Sync + 'static {
	async fn verify(&self, token: &str) -> Result<TokenClaims, AuthError>;
}

/// Stateless HMAC-SHA256 token verifier.
///
/// Token format: `v1.<payload_b64>.<sig_b64>` with URL-safe unpadded base64
/// and a JSON claims payload.
pub struct HmacVerifier {
	secret: SecretString,
}

impl HmacVerifier {
	pub fn new(secret: SecretString) -> Self {
		Self { secret }
	}
}

#[async_trait::async_trait]
impl IdentityVerifier for HmacVerifier {
	async fn verify(&self, token: &str) -> Result<TokenClaims, AuthError> {
		verify_hmac_token(token, self.secret.expose())
	}
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RawClaims {
	sub: String,
	exp: u64,
}

/// Verify a `v1.<payload>.<sig>` token against `secret`.
pub fn verify_hmac_token(token: &str, secret: &str) -> Result<TokenClaims, AuthError> {
	let token = token.trim();
	if token.is_empty() {
		return Err(AuthError::MissingToken);
	}

	let parts = token.split('.').collect::<Vec<_>>();
	if parts.len() != 3 || parts[0] != "v1" {
		return Err(AuthError::InvalidToken);
	}

	let payload_b64 = parts[1];
	let sig_b64 = parts[2];

	let payload = URL_SAFE_NO_PAD.decode(payload_b64).map_err(|_| AuthError::InvalidToken)?;
	let expected_sig = sign(payload_b64.as_bytes(), secret.as_bytes());
	let provided_sig = URL_SAFE_NO_PAD.decode(sig_b64).map_err(|_| AuthError::InvalidToken)?;

	if !constant_time_eq(&expected_sig, &provided_sig) {
		return Err(AuthError::InvalidToken);
	}

	let claims: RawClaims = serde_json::from_slice(&payload).map_err(|_| AuthError::InvalidToken)?;
	if claims.exp <= unix_secs_now() {
		return Err(AuthError::Expired);
	}

	let user_id = claims.sub.parse::<UserId>().map_err(|_| AuthError::InvalidToken)?;
	Ok(TokenClaims {
		user_id,
		expires_at: claims.exp,
	})
}

/// Issue a token in the format `verify_hmac_token` accepts.
pub fn issue_hmac_token(user_id: UserId, expires_at: u64, secret: &str) -> String {
	let claims = RawClaims {
		sub: user_id.to_string(),
		exp: expires_at,
	};
	let payload_b64 = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&claims).unwrap_or_default());
	let sig_b64 = URL_SAFE_NO_PAD.encode(sign(payload_b64.as_bytes(), secret.as_bytes()));
	format!("v1.{payload_b64}.{sig_b64}")
}

fn sign(payload_b64: &[u8], secret: &[u8]) -> Vec<u8> {
	let mut mac = Hmac::<Sha256>::new_from_slice(secret).expect("hmac key");
	mac.update(payload_b64);
	mac.finalize().into_bytes().to_vec()
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
	if a.len() != b.len() {
		return false;
	}

	let mut diff = 0u8;
	for (x, y) in a.iter().zip(b.iter()) {
		diff |= x ^ y;
	}

	diff == 0
}
