//! Storage contracts and built-in store implementations for proxy credentials.

pub mod file;
pub mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

// self
use crate::{
	_prelude::*,
	auth::{AccessGrant, CredentialRecord, PrincipalId},
};

/// Persistence contract future for proxy stores.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + 'a + Send>>;

/// Storage backend contract implemented by proxy credential stores.
///
/// Credentials are keyed by principal, so `save` replacing the previous entry
/// keeps at most one stored credential per authenticated user. Token material
/// inside the records is already sealed; backends never see plaintext.
pub trait CredentialStore
where
	Self: Send + Sync,
{
	/// Persists or replaces the credential record for its principal.
	fn save(&self, record: CredentialRecord) -> StoreFuture<'_, ()>;

	/// Fetches the record associated with the principal, if present.
	fn fetch<'a>(&'a self, principal: &'a PrincipalId) -> StoreFuture<'a, Option<CredentialRecord>>;

	/// Fetches any non-revoked record, used by the background publisher.
	fn fetch_any(&self) -> StoreFuture<'_, Option<CredentialRecord>>;

	/// Atomically rotates a credential if the expected sealed refresh secret matches.
	fn compare_and_swap_refresh<'a>(
		&'a self,
		principal: &'a PrincipalId,
		expected_refresh: Option<&'a str>,
		replacement: CredentialRecord,
	) -> StoreFuture<'a, CompareAndSwapOutcome>;

	/// Marks a record as revoked at the provided instant.
	fn revoke<'a>(
		&'a self,
		principal: &'a PrincipalId,
		instant: OffsetDateTime,
	) -> StoreFuture<'a, Option<CredentialRecord>>;

	/// Persists a downstream access grant keyed by its token digest.
	fn save_grant(&self, grant: AccessGrant) -> StoreFuture<'_, ()>;

	/// Fetches the grant matching a bearer token digest, if present.
	fn fetch_grant<'a>(&'a self, token_digest: &'a str) -> StoreFuture<'a, Option<AccessGrant>>;
}

/// Result of a refresh-secret compare-and-swap attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompareAndSwapOutcome {
	/// The refresh secret matched the expected value and the record was updated.
	Updated,
	/// The record exists but the expected refresh secret did not match.
	RefreshMismatch,
	/// No record matched the provided principal.
	Missing,
}

/// Error type produced by [`CredentialStore`] implementations.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ThisError)]
pub enum StoreError {
	/// Serialization failures surfaced by the backend.
	#[error("Serialization error: {message}.")]
	Serialization {
		/// Human-readable error payload.
		message: String,
	},
	/// Backend-level failure for the storage engine.
	#[error("Backend failure: {message}.")]
	Backend {
		/// Human-readable error payload.
		message: String,
	},
}
