//! Per-request credential binding.
//!
//! The binder is the only component that turns sealed store records into
//! plaintext access tokens, and it does so per request. The resulting
//! [`BoundCredential`] is deliberately not `Clone` so a decrypted token lives
//! exactly as long as the request that needed it.

// self
use crate::{
	_prelude::*,
	auth::{PrincipalId, TokenSecret},
	broker::Broker,
};

/// Plaintext credential scoped to a single upstream call.
pub struct BoundCredential {
	/// Principal the credential belongs to.
	pub principal: PrincipalId,
	/// Decrypted access token, redacted in debug output.
	access_token: TokenSecret,
	/// Expiry of the underlying upstream token.
	pub expires_at: OffsetDateTime,
}
impl BoundCredential {
	/// Plaintext access token for the upstream API call.
	pub fn access_token(&self) -> &str {
		self.access_token.expose()
	}
}
#[cfg(any(test, feature = "test"))]
impl BoundCredential {
	/// Builds a credential fixture without touching a store or cipher.
	pub fn fixture(principal: PrincipalId, access_token: impl Into<String>) -> Self {
		Self {
			principal,
			access_token: TokenSecret::new(access_token),
			expires_at: OffsetDateTime::now_utc() + Duration::hours(1),
		}
	}
}
impl Debug for BoundCredential {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("BoundCredential")
			.field("principal", &self.principal)
			.field("access_token", &self.access_token)
			.field("expires_at", &self.expires_at)
			.finish()
	}
}

/// Resolves bearer tokens into fresh, decrypted credentials.
#[derive(Clone)]
pub struct CredentialBinder {
	broker: Arc<Broker>,
}
impl CredentialBinder {
	/// Creates a binder backed by the shared broker.
	pub fn new(broker: Arc<Broker>) -> Self {
		Self { broker }
	}

	/// Authenticates a downstream bearer and binds the caller's credential.
	pub async fn bind(&self, bearer: &str) -> Result<BoundCredential> {
		let principal = self.broker.authenticate(bearer).await?;

		self.bind_principal(&principal).await
	}

	/// Binds a known principal's credential, refreshing it when necessary.
	pub async fn bind_principal(&self, principal: &PrincipalId) -> Result<BoundCredential> {
		let record = self.broker.fresh_credential(principal).await?;
		let access_token = self.broker.open_access_token(&record)?;

		Ok(BoundCredential { principal: record.principal, access_token, expires_at: record.expires_at })
	}
}
