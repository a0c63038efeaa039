//! Downstream access grants mapping proxy-issued bearer tokens to principals.

// crates.io
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use sha2::{Digest, Sha256};
// self
use crate::{_prelude::*, auth::PrincipalId};

/// Bearer grant issued to a downstream MCP client after code exchange.
///
/// Only the SHA-256 digest of the bearer token is retained; the token value
/// itself is handed to the client once and never persisted.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessGrant {
	/// Digest of the bearer token, the lookup key for authentication.
	pub token_digest: String,
	/// Principal the bearer token authenticates as.
	pub principal: PrincipalId,
	/// Instant the grant was issued.
	pub issued_at: OffsetDateTime,
	/// Instant the grant stops authenticating requests.
	pub expires_at: OffsetDateTime,
}
impl AccessGrant {
	/// Issues a grant for a freshly minted bearer token.
	pub fn issue(
		token: &str,
		principal: PrincipalId,
		issued_at: OffsetDateTime,
		lifetime: Duration,
	) -> Self {
		Self { token_digest: digest(token), principal, issued_at, expires_at: issued_at + lifetime }
	}

	/// Returns `true` if the grant has expired at the provided instant.
	pub fn is_expired_at(&self, instant: OffsetDateTime) -> bool {
		instant >= self.expires_at
	}
}

/// Computes the base64 (URL-safe, no padding) SHA-256 digest of a bearer token.
pub fn digest(token: &str) -> String {
	let mut hasher = Sha256::new();

	hasher.update(token.as_bytes());

	URL_SAFE_NO_PAD.encode(hasher.finalize())
}
