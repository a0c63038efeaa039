//! Background publisher loop.
//!
//! The scheduler backend needs a periodic pass to publish posts that have come
//! due. The daemon binds whichever principal has a stored credential, hands it
//! to the [`PublisherHook`], and sweeps the broker's in-memory ledgers on the
//! same cadence. A tick never aborts the loop; failures are logged and retried
//! on the next interval.

// std
use std::time::Duration as StdDuration;
// self
use crate::{
	_prelude::*,
	bind::{BoundCredential, CredentialBinder},
	broker::Broker,
};

/// Result type for a single publisher pass.
pub type HookResult = std::result::Result<(), Box<dyn StdError + Send + Sync>>;
/// Boxed future returned by [`PublisherHook::run_once`].
pub type HookFuture<'a> = Pin<Box<dyn Future<Output = HookResult> + 'a + Send>>;

/// Work performed once per tick with a freshly bound credential.
pub trait PublisherHook: Send + Sync {
	/// Runs one publishing pass.
	fn run_once<'a>(&'a self, credential: &'a BoundCredential) -> HookFuture<'a>;
}

/// Drives the publisher hook on a fixed interval until the task is aborted.
pub async fn run_publisher(
	broker: Arc<Broker>,
	hook: Arc<dyn PublisherHook>,
	interval: StdDuration,
) {
	let binder = CredentialBinder::new(broker.clone());
	let mut ticker = tokio::time::interval(interval);

	loop {
		ticker.tick().await;

		broker.purge_ledgers();
		publisher_pass(&broker, &binder, hook.as_ref()).await;
	}
}

/// Runs a single publisher pass; failures are logged, never propagated.
pub async fn publisher_pass(broker: &Broker, binder: &CredentialBinder, hook: &dyn PublisherHook) {
	let principal = match broker.any_credential_principal().await {
		Ok(Some(principal)) => principal,
		Ok(None) => {
			tracing::debug!("no stored credential; skipping publisher pass");

			return;
		},
		Err(e) => {
			tracing::warn!(error = %e, "failed to look up a credential for the publisher");

			return;
		},
	};
	let credential = match binder.bind_principal(&principal).await {
		Ok(credential) => credential,
		Err(e) => {
			tracing::warn!(error = %e, principal = %principal, "failed to bind the publisher credential");

			return;
		},
	};

	if let Err(e) = hook.run_once(&credential).await {
		tracing::error!(error = %e, "publisher pass failed");
	}
}

#[cfg(test)]
mod tests {
	// std
	use std::sync::atomic::{AtomicUsize, Ordering};
	// self
	use super::*;
	use crate::{
		_preludet::build_test_broker,
		auth::{CredentialRecord, PrincipalId, ProviderId, ScopeSet},
		crypto::CredentialCipher,
		provider::ProviderDescriptor,
		store::CredentialStore,
	};

	#[derive(Default)]
	struct CountingHook {
		calls: AtomicUsize,
		fail: bool,
	}
	impl PublisherHook for CountingHook {
		fn run_once<'a>(&'a self, _credential: &'a BoundCredential) -> HookFuture<'a> {
			Box::pin(async move {
				self.calls.fetch_add(1, Ordering::SeqCst);

				if self.fail { Err("publish failed".into()) } else { Ok(()) }
			})
		}
	}

	async fn seeded_broker() -> (Arc<Broker>, CredentialBinder) {
		let descriptor =
			ProviderDescriptor::linkedin().expect("LinkedIn descriptor should build successfully.");
		let (broker, store) = build_test_broker(descriptor, "https://proxy.example");
		let cipher = CredentialCipher::from_secret("test-session-secret");
		let principal =
			PrincipalId::new("user@example.com").expect("Principal fixture should be valid.");
		let provider = ProviderId::new("linkedin").expect("Provider fixture should be valid.");
		let scope = ScopeSet::new(["w_member_social"]).expect("Scope fixture should be valid.");
		let record = CredentialRecord::builder(principal, provider, scope)
			.access_token(
				cipher.seal_secret("upstream-token").expect("Sealing the fixture should succeed."),
			)
			.expires_in(Duration::hours(1))
			.build()
			.expect("Credential fixture should build successfully.");

		store.save(record).await.expect("Seeding the store should succeed.");

		let binder = CredentialBinder::new(broker.clone());

		(broker, binder)
	}

	#[tokio::test]
	async fn pass_invokes_hook_with_bound_credential() {
		let (broker, binder) = seeded_broker().await;
		let hook = CountingHook::default();

		publisher_pass(&broker, &binder, &hook).await;

		assert_eq!(hook.calls.load(Ordering::SeqCst), 1);
	}

	#[tokio::test]
	async fn pass_skips_when_no_credential_is_stored() {
		let descriptor =
			ProviderDescriptor::linkedin().expect("LinkedIn descriptor should build successfully.");
		let (broker, _) = build_test_broker(descriptor, "https://proxy.example");
		let binder = CredentialBinder::new(broker.clone());
		let hook = CountingHook::default();

		publisher_pass(&broker, &binder, &hook).await;

		assert_eq!(hook.calls.load(Ordering::SeqCst), 0);
	}

	#[tokio::test]
	async fn pass_survives_hook_failure() {
		let (broker, binder) = seeded_broker().await;
		let hook = CountingHook { calls: AtomicUsize::new(0), fail: true };

		publisher_pass(&broker, &binder, &hook).await;
		publisher_pass(&broker, &binder, &hook).await;

		assert_eq!(hook.calls.load(Ordering::SeqCst), 2);
	}
}
