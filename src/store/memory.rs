//! Thread-safe in-memory [`CredentialStore`] implementation for local development and tests.

// self
use crate::{
	_prelude::*,
	auth::{AccessGrant, CredentialRecord, PrincipalId},
	crypto::SealedSecret,
	store::{CompareAndSwapOutcome, CredentialStore, StoreError, StoreFuture},
};

#[derive(Debug, Default)]
struct Inner {
	credentials: HashMap<PrincipalId, CredentialRecord>,
	grants: HashMap<String, AccessGrant>,
}

type StoreMap = Arc<RwLock<Inner>>;

/// Thread-safe storage backend that keeps records in-process for tests and demos.
#[derive(Clone, Debug, Default)]
pub struct MemoryStore(StoreMap);
impl MemoryStore {
	fn cas_now(
		map: StoreMap,
		principal: PrincipalId,
		expected_refresh: Option<&str>,
		replacement: CredentialRecord,
	) -> CompareAndSwapOutcome {
		let mut guard = map.write();
		let outcome = match guard.credentials.get(&principal) {
			Some(existing)
				if refresh_matches(existing.refresh_token.as_ref(), expected_refresh) =>
				CompareAndSwapOutcome::Updated,
			Some(_) => CompareAndSwapOutcome::RefreshMismatch,
			None => CompareAndSwapOutcome::Missing,
		};

		if matches!(outcome, CompareAndSwapOutcome::Updated) {
			guard.credentials.insert(principal, replacement);
		}

		outcome
	}

	fn revoke_now(
		map: StoreMap,
		principal: PrincipalId,
		instant: OffsetDateTime,
	) -> Option<CredentialRecord> {
		let mut guard = map.write();

		match guard.credentials.get_mut(&principal) {
			Some(record) => {
				record.revoke(instant);

				Some(record.clone())
			},
			None => None,
		}
	}
}
impl CredentialStore for MemoryStore {
	fn save(&self, record: CredentialRecord) -> StoreFuture<'_, ()> {
		let map = self.0.clone();

		Box::pin(async move {
			map.write().credentials.insert(record.principal.clone(), record);

			Ok(())
		})
	}

	fn fetch<'a>(
		&'a self,
		principal: &'a PrincipalId,
	) -> StoreFuture<'a, Option<CredentialRecord>> {
		let map = self.0.clone();
		let principal = principal.to_owned();

		Box::pin(async move { Ok(map.read().credentials.get(&principal).cloned()) })
	}

	fn fetch_any(&self) -> StoreFuture<'_, Option<CredentialRecord>> {
		let map = self.0.clone();

		Box::pin(async move {
			Ok(map.read().credentials.values().find(|record| !record.is_revoked()).cloned())
		})
	}

	fn compare_and_swap_refresh<'a>(
		&'a self,
		principal: &'a PrincipalId,
		expected_refresh: Option<&'a str>,
		replacement: CredentialRecord,
	) -> StoreFuture<'a, CompareAndSwapOutcome> {
		let map = self.0.clone();
		let principal = principal.to_owned();

		Box::pin(async move { Ok(Self::cas_now(map, principal, expected_refresh, replacement)) })
	}

	fn revoke<'a>(
		&'a self,
		principal: &'a PrincipalId,
		instant: OffsetDateTime,
	) -> StoreFuture<'a, Option<CredentialRecord>> {
		let map = self.0.clone();
		let principal = principal.to_owned();

		Box::pin(async move { Ok(Self::revoke_now(map, principal, instant)) })
	}

	fn save_grant(&self, grant: AccessGrant) -> StoreFuture<'_, ()> {
		let map = self.0.clone();

		Box::pin(async move {
			map.write().grants.insert(grant.token_digest.clone(), grant);

			Ok(())
		})
	}

	fn fetch_grant<'a>(&'a self, token_digest: &'a str) -> StoreFuture<'a, Option<AccessGrant>> {
		let map = self.0.clone();
		let token_digest = token_digest.to_owned();

		Box::pin(async move { Ok(map.read().grants.get(&token_digest).cloned()) })
	}
}

pub(super) fn refresh_matches(current: Option<&SealedSecret>, expected: Option<&str>) -> bool {
	match (current.map(SealedSecret::as_str), expected) {
		(None, None) => true,
		(Some(cur), Some(exp)) => cur == exp,
		_ => false,
	}
}
