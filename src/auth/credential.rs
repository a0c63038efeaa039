//! Stored credential records, lifecycle helpers, and the redacting secret wrapper.

// self
use crate::{
	_prelude::*,
	auth::{PrincipalId, ProviderId, ScopeSet},
	crypto::SealedSecret,
};

/// Redacted token secret wrapper keeping sensitive material out of logs.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenSecret(String);
impl TokenSecret {
	/// Wraps a new secret string.
	pub fn new(value: impl Into<String>) -> Self {
		Self(value.into())
	}

	/// Returns the inner token value. Callers must avoid logging this string.
	pub fn expose(&self) -> &str {
		&self.0
	}
}
impl AsRef<str> for TokenSecret {
	fn as_ref(&self) -> &str {
		self.expose()
	}
}
impl Debug for TokenSecret {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_tuple("TokenSecret").field(&"<redacted>").finish()
	}
}
impl Display for TokenSecret {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str("<redacted>")
	}
}

/// Current lifecycle status for a stored credential.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CredentialStatus {
	/// Credential is currently valid.
	Active,
	/// Credential exceeded its expiry instant.
	Expired,
	/// Credential has been revoked locally or by the provider.
	Revoked,
}

/// Errors produced by [`CredentialBuilder`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ThisError)]
pub enum CredentialBuilderError {
	/// Issued when no sealed access token was provided.
	#[error("Access token is required.")]
	MissingAccessToken,
	/// Issued when no expiry (absolute or relative) was configured.
	#[error("Expiry must be supplied via expires_at or expires_in.")]
	MissingExpiry,
}

/// Per-user credential persisted by the proxy. Token material is sealed
/// (AES-256-GCM) before the record ever reaches a store backend.
#[derive(Clone, Serialize, Deserialize)]
pub struct CredentialRecord {
	/// Identity of the user who authorized the proxy.
	pub principal: PrincipalId,
	/// Upstream provider the tokens belong to.
	pub provider: ProviderId,
	/// Normalized scopes granted to this credential.
	pub scope: ScopeSet,
	/// Sealed access token ciphertext.
	pub access_token: SealedSecret,
	/// Sealed refresh token ciphertext, if the provider issued one.
	pub refresh_token: Option<SealedSecret>,
	/// Issued-at instant recorded from the provider response.
	pub issued_at: OffsetDateTime,
	/// Expiry instant derived from issued_at plus expires_in or absolute expiry.
	pub expires_at: OffsetDateTime,
	/// Revocation instant if the record has been revoked.
	pub revoked_at: Option<OffsetDateTime>,
}
impl CredentialRecord {
	/// Returns a builder for constructing rotation-friendly records.
	pub fn builder(principal: PrincipalId, provider: ProviderId, scope: ScopeSet) -> CredentialBuilder {
		CredentialBuilder::new(principal, provider, scope)
	}

	/// Computes the lifecycle status at a given instant.
	pub fn status_at(&self, instant: OffsetDateTime) -> CredentialStatus {
		if self.revoked_at.is_some() {
			return CredentialStatus::Revoked;
		}
		if instant >= self.expires_at {
			return CredentialStatus::Expired;
		}

		CredentialStatus::Active
	}

	/// Convenience helper that checks the status using the current UTC instant.
	pub fn status(&self) -> CredentialStatus {
		self.status_at(OffsetDateTime::now_utc())
	}

	/// Returns `true` if the record is currently active (not expired/revoked).
	pub fn is_active(&self) -> bool {
		matches!(self.status(), CredentialStatus::Active)
	}

	/// Returns `true` if the record has expired at the provided instant.
	pub fn is_expired_at(&self, instant: OffsetDateTime) -> bool {
		matches!(self.status_at(instant), CredentialStatus::Expired)
	}

	/// Returns `true` if the record is expired relative to the current clock.
	pub fn is_expired(&self) -> bool {
		matches!(self.status(), CredentialStatus::Expired)
	}

	/// Returns `true` if the record expires within the provided window.
	pub fn expires_within(&self, instant: OffsetDateTime, window: Duration) -> bool {
		instant + window >= self.expires_at
	}

	/// Returns `true` if the record has been revoked.
	pub fn is_revoked(&self) -> bool {
		self.revoked_at.is_some()
	}

	/// Marks the record as revoked.
	pub fn revoke(&mut self, instant: OffsetDateTime) {
		self.revoked_at = Some(instant);
	}
}
impl Debug for CredentialRecord {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("CredentialRecord")
			.field("principal", &self.principal)
			.field("provider", &self.provider)
			.field("scope", &self.scope)
			.field("access_token", &"<sealed>")
			.field("refresh_token", &self.refresh_token.as_ref().map(|_| "<sealed>"))
			.field("issued_at", &self.issued_at)
			.field("expires_at", &self.expires_at)
			.field("revoked_at", &self.revoked_at)
			.finish()
	}
}

/// Builder for [`CredentialRecord`].
#[derive(Clone, Debug)]
pub struct CredentialBuilder {
	principal: PrincipalId,
	provider: ProviderId,
	scope: ScopeSet,
	access_token: Option<SealedSecret>,
	refresh_token: Option<SealedSecret>,
	issued_at: Option<OffsetDateTime>,
	expires_at: Option<OffsetDateTime>,
	expires_in: Option<Duration>,
}
impl CredentialBuilder {
	fn new(principal: PrincipalId, provider: ProviderId, scope: ScopeSet) -> Self {
		Self {
			principal,
			provider,
			scope,
			access_token: None,
			refresh_token: None,
			issued_at: None,
			expires_at: None,
			expires_in: None,
		}
	}

	/// Sets the issued-at instant.
	pub fn issued_at(mut self, instant: OffsetDateTime) -> Self {
		self.issued_at = Some(instant);

		self
	}

	/// Sets an absolute expiry instant.
	pub fn expires_at(mut self, instant: OffsetDateTime) -> Self {
		self.expires_at = Some(instant);

		self
	}

	/// Sets a relative expiry duration from the issued instant.
	pub fn expires_in(mut self, duration: Duration) -> Self {
		self.expires_in = Some(duration);

		self
	}

	/// Provides the sealed access token.
	pub fn access_token(mut self, sealed: SealedSecret) -> Self {
		self.access_token = Some(sealed);

		self
	}

	/// Provides the sealed refresh token.
	pub fn refresh_token(mut self, sealed: SealedSecret) -> Self {
		self.refresh_token = Some(sealed);

		self
	}

	/// Consumes the builder and produces a [`CredentialRecord`].
	pub fn build(self) -> Result<CredentialRecord, CredentialBuilderError> {
		let access_token = self.access_token.ok_or(CredentialBuilderError::MissingAccessToken)?;
		let issued_at = self.issued_at.unwrap_or_else(OffsetDateTime::now_utc);
		let expires_at = match (self.expires_at, self.expires_in) {
			(Some(instant), _) => instant,
			(None, Some(delta)) => issued_at + delta,
			(None, None) => return Err(CredentialBuilderError::MissingExpiry),
		};

		Ok(CredentialRecord {
			principal: self.principal,
			provider: self.provider,
			scope: self.scope,
			access_token,
			refresh_token: self.refresh_token,
			issued_at,
			expires_at,
			revoked_at: None,
		})
	}
}
