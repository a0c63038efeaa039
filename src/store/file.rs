//! Simple file-backed [`CredentialStore`] for single-node deployments.

// std
use std::{
	fs::{self, File},
	io::Write,
	path::{Path, PathBuf},
};
// self
use crate::{
	_prelude::*,
	auth::{AccessGrant, CredentialRecord, PrincipalId},
	store::{CompareAndSwapOutcome, CredentialStore, StoreError, StoreFuture, memory::refresh_matches},
};

#[derive(Debug, Default, Serialize, Deserialize)]
struct Snapshot {
	credentials: Vec<CredentialRecord>,
	grants: Vec<AccessGrant>,
}

#[derive(Debug, Default)]
struct Inner {
	credentials: HashMap<PrincipalId, CredentialRecord>,
	grants: HashMap<String, AccessGrant>,
}
impl Inner {
	fn to_snapshot(&self) -> Snapshot {
		Snapshot {
			credentials: self.credentials.values().cloned().collect(),
			grants: self.grants.values().cloned().collect(),
		}
	}

	fn from_snapshot(snapshot: Snapshot) -> Self {
		Self {
			credentials: snapshot
				.credentials
				.into_iter()
				.map(|record| (record.principal.clone(), record))
				.collect(),
			grants: snapshot
				.grants
				.into_iter()
				.map(|grant| (grant.token_digest.clone(), grant))
				.collect(),
		}
	}
}

/// Persists proxy records to a JSON file after each mutation.
///
/// Token material inside the snapshot is already sealed, so the file never
/// contains plaintext secrets.
#[derive(Clone, Debug)]
pub struct FileStore {
	path: PathBuf,
	inner: Arc<RwLock<Inner>>,
}
impl FileStore {
	/// Opens (or creates) a store at the provided path, eagerly loading existing data.
	pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
		let path = path.into();

		Self::ensure_parent_exists(&path)?;

		let snapshot = if path.exists() { Self::load_snapshot(&path)? } else { Snapshot::default() };

		Ok(Self { path, inner: Arc::new(RwLock::new(Inner::from_snapshot(snapshot))) })
	}

	fn load_snapshot(path: &Path) -> Result<Snapshot, StoreError> {
		if !path.exists() {
			return Ok(Snapshot::default());
		}

		let metadata = path.metadata().map_err(|e| StoreError::Backend {
			message: format!("Failed to inspect {}: {e}", path.display()),
		})?;

		if metadata.len() == 0 {
			return Ok(Snapshot::default());
		}

		let bytes = fs::read(path).map_err(|e| StoreError::Backend {
			message: format!("Failed to read {}: {e}", path.display()),
		})?;

		serde_json::from_slice(&bytes).map_err(|e| StoreError::Serialization {
			message: format!("Failed to parse {}: {e}", path.display()),
		})
	}

	fn ensure_parent_exists(path: &Path) -> Result<(), StoreError> {
		if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
			fs::create_dir_all(parent).map_err(|e| StoreError::Backend {
				message: format!("Failed to create store directory {}: {e}", parent.display()),
			})?;
		}
		Ok(())
	}

	fn persist_locked(&self, contents: &Inner) -> Result<(), StoreError> {
		Self::ensure_parent_exists(&self.path)?;

		let serialized = serde_json::to_vec_pretty(&contents.to_snapshot()).map_err(|e| {
			StoreError::Serialization { message: format!("Failed to serialize store snapshot: {e}") }
		})?;
		let mut tmp_path = self.path.clone();

		tmp_path.set_extension("tmp");

		{
			let mut file = File::create(&tmp_path).map_err(|e| StoreError::Backend {
				message: format!("Failed to create {}: {e}", tmp_path.display()),
			})?;

			file.write_all(&serialized).map_err(|e| StoreError::Backend {
				message: format!("Failed to write {}: {e}", tmp_path.display()),
			})?;
			file.sync_all().map_err(|e| StoreError::Backend {
				message: format!("Failed to sync {}: {e}", tmp_path.display()),
			})?;
		}

		fs::rename(&tmp_path, &self.path).map_err(|e| StoreError::Backend {
			message: format!("Failed to replace {}: {e}", self.path.display()),
		})
	}
}
impl CredentialStore for FileStore {
	fn save(&self, record: CredentialRecord) -> StoreFuture<'_, ()> {
		Box::pin(async move {
			let mut guard = self.inner.write();

			guard.credentials.insert(record.principal.clone(), record);
			self.persist_locked(&guard)?;

			Ok(())
		})
	}

	fn fetch<'a>(
		&'a self,
		principal: &'a PrincipalId,
	) -> StoreFuture<'a, Option<CredentialRecord>> {
		Box::pin(async move { Ok(self.inner.read().credentials.get(principal).cloned()) })
	}

	fn fetch_any(&self) -> StoreFuture<'_, Option<CredentialRecord>> {
		Box::pin(async move {
			Ok(self
				.inner
				.read()
				.credentials
				.values()
				.find(|record| !record.is_revoked())
				.cloned())
		})
	}

	fn compare_and_swap_refresh<'a>(
		&'a self,
		principal: &'a PrincipalId,
		expected_refresh: Option<&'a str>,
		replacement: CredentialRecord,
	) -> StoreFuture<'a, CompareAndSwapOutcome> {
		Box::pin(async move {
			let mut guard = self.inner.write();
			let outcome = match guard.credentials.get(principal) {
				Some(existing)
					if refresh_matches(existing.refresh_token.as_ref(), expected_refresh) =>
					CompareAndSwapOutcome::Updated,
				Some(_) => CompareAndSwapOutcome::RefreshMismatch,
				None => CompareAndSwapOutcome::Missing,
			};

			if matches!(outcome, CompareAndSwapOutcome::Updated) {
				guard.credentials.insert(principal.clone(), replacement);
				self.persist_locked(&guard)?;
			}

			Ok(outcome)
		})
	}

	fn revoke<'a>(
		&'a self,
		principal: &'a PrincipalId,
		instant: OffsetDateTime,
	) -> StoreFuture<'a, Option<CredentialRecord>> {
		Box::pin(async move {
			let mut guard = self.inner.write();
			let result = match guard.credentials.get_mut(principal) {
				Some(record) => {
					record.revoke(instant);

					Some(record.clone())
				},
				None => None,
			};

			if result.is_some() {
				self.persist_locked(&guard)?;
			}

			Ok(result)
		})
	}

	fn save_grant(&self, grant: AccessGrant) -> StoreFuture<'_, ()> {
		Box::pin(async move {
			let mut guard = self.inner.write();

			guard.grants.insert(grant.token_digest.clone(), grant);
			self.persist_locked(&guard)?;

			Ok(())
		})
	}

	fn fetch_grant<'a>(&'a self, token_digest: &'a str) -> StoreFuture<'a, Option<AccessGrant>> {
		Box::pin(async move { Ok(self.inner.read().grants.get(token_digest).cloned()) })
	}
}
