//! Credential broker orchestrating the three-party authorization dance.
//!
//! The broker owns the upstream OAuth client, the credential store, the
//! encryption cipher, and the ephemeral session/code ledgers. HTTP handlers
//! call into it for every flow: initiating authorization, completing the
//! provider callback, exchanging downstream codes, authenticating bearers,
//! and producing fresh credentials with singleflight refresh rotation.

// self
use crate::{
	_prelude::*,
	auth::{AccessGrant, CredentialRecord, PrincipalId, TokenSecret, grant},
	crypto::CredentialCipher,
	error::ConfigError,
	oauth::UpstreamClient,
	obs::{self, FlowKind, FlowOutcome, FlowSpan},
	provider::ProviderDescriptor,
	session::{CodeLedger, DownstreamBinding, SessionLedger, random_string},
	store::{CompareAndSwapOutcome, CredentialStore},
};

const DEFAULT_GRANT_LIFETIME: Duration = Duration::seconds(31_536_000);
const REFRESH_WINDOW: Duration = Duration::seconds(60);
const BEARER_TOKEN_LEN: usize = 48;

/// Parameters supplied by a downstream client initiating authorization.
#[derive(Clone, Debug)]
pub struct AuthorizeRequest {
	/// Downstream redirect URI to return to after the dance completes.
	pub redirect_uri: Url,
	/// Opaque downstream state echoed back on redirect.
	pub state: Option<String>,
	/// PKCE S256 challenge the later token exchange must satisfy.
	pub code_challenge: String,
	/// PKCE challenge method; only `S256` is accepted.
	pub code_challenge_method: String,
}

/// Result of completing an upstream callback.
#[derive(Clone, Debug)]
pub enum CallbackOutcome {
	/// Downstream flow: redirect the user agent back to the client.
	Redirect(Url),
	/// Operator onboarding flow: credential stored, no client to return to.
	Onboarded(PrincipalId),
}

/// Bearer token response for a downstream code exchange.
#[derive(Clone, Debug, Serialize)]
pub struct IssuedGrant {
	/// Opaque bearer token; the store only keeps its digest.
	pub access_token: String,
	/// Always `Bearer`.
	pub token_type: &'static str,
	/// Grant lifetime in seconds.
	pub expires_in: i64,
}

/// Coordinates authorization, token issuance, and credential freshness.
pub struct Broker {
	store: Arc<dyn CredentialStore>,
	descriptor: ProviderDescriptor,
	cipher: CredentialCipher,
	client_id: String,
	upstream: UpstreamClient,
	sessions: SessionLedger,
	codes: CodeLedger,
	callback_uri: Url,
	grant_lifetime: Duration,
	refresh_window: Duration,
	refresh_guards: Mutex<HashMap<PrincipalId, Arc<AsyncMutex<()>>>>,
}
impl Broker {
	/// Creates a broker whose callback URI is derived from the public base URL.
	pub fn new(
		store: Arc<dyn CredentialStore>,
		descriptor: ProviderDescriptor,
		cipher: CredentialCipher,
		client_id: impl Into<String>,
		client_secret: impl AsRef<str>,
		base_url: &Url,
	) -> Result<Self> {
		let client_id = client_id.into();
		let callback_uri =
			Url::parse(&format!("{}/oauth/callback", base_url.as_str().trim_end_matches('/')))
				.map_err(|source| ConfigError::InvalidRedirect { source })?;
		let upstream = UpstreamClient::from_descriptor(
			&descriptor,
			&client_id,
			client_secret.as_ref(),
			&callback_uri,
		)?;

		Ok(Self {
			store,
			descriptor,
			cipher,
			client_id,
			upstream,
			sessions: SessionLedger::default(),
			codes: CodeLedger::default(),
			callback_uri,
			grant_lifetime: DEFAULT_GRANT_LIFETIME,
			refresh_window: REFRESH_WINDOW,
			refresh_guards: Mutex::new(HashMap::new()),
		})
	}

	/// Replaces the upstream HTTP client.
	pub fn with_http_client(mut self, http: ReqwestClient) -> Self {
		self.upstream = self.upstream.with_http_client(http);

		self
	}

	/// Overrides the downstream bearer grant lifetime.
	pub fn with_grant_lifetime(mut self, lifetime: Duration) -> Self {
		self.grant_lifetime = lifetime;

		self
	}

	/// Overrides the in-flight session TTL.
	pub fn with_session_ttl(mut self, ttl: Duration) -> Self {
		self.sessions = SessionLedger::with_ttl(ttl);

		self
	}

	/// Overrides the preemptive refresh window.
	pub fn with_refresh_window(mut self, window: Duration) -> Self {
		self.refresh_window = window;

		self
	}

	/// The callback URI registered with the upstream provider.
	pub fn callback_uri(&self) -> &Url {
		&self.callback_uri
	}

	/// Registers a downstream authorization and returns the upstream authorize URL.
	pub fn start_authorization(&self, request: AuthorizeRequest) -> Result<Url> {
		let _guard = FlowSpan::new(FlowKind::Authorize, "start_authorization").entered();

		if request.code_challenge_method != "S256" {
			return Err(Error::InvalidState {
				reason: "code_challenge_method must be S256".into(),
			});
		}

		let binding = DownstreamBinding {
			redirect_uri: request.redirect_uri,
			state: request.state,
			code_challenge: request.code_challenge,
		};
		let state = self.sessions.begin(Some(binding));

		Ok(self.build_authorize_url(&state, false))
	}

	/// Registers an operator onboarding flow and returns the authorize URL.
	///
	/// Onboarding requests the extra scopes and completes without a downstream
	/// client to redirect back to.
	pub fn start_onboarding(&self) -> Url {
		let _guard = FlowSpan::new(FlowKind::Authorize, "start_onboarding").entered();
		let state = self.sessions.begin(None);

		self.build_authorize_url(&state, true)
	}

	/// Completes an upstream callback: exchanges the code, resolves the
	/// identity, seals and stores the credential, and either mints a
	/// downstream code or finishes onboarding.
	pub async fn complete_callback(&self, state: &str, code: &str) -> Result<CallbackOutcome> {
		const KIND: FlowKind = FlowKind::Callback;

		let span = FlowSpan::new(KIND, "complete_callback");

		obs::record_flow_outcome(KIND, FlowOutcome::Attempt);

		let result = span
			.instrument(async move {
				let pending = self.sessions.take(state)?;
				let upstream_grant = self.upstream.exchange_code(code).await?;
				let userinfo =
					self.upstream.fetch_userinfo(upstream_grant.access_token.expose()).await?;
				let principal = userinfo.principal()?;
				let scope = upstream_grant
					.scope
					.clone()
					.unwrap_or_else(|| self.descriptor.scopes.clone());
				let access_token = self.cipher.seal_secret(upstream_grant.access_token.expose())?;
				let mut builder =
					CredentialRecord::builder(principal.clone(), self.descriptor.id.clone(), scope)
						.access_token(access_token)
						.issued_at(upstream_grant.issued_at)
						.expires_at(upstream_grant.expires_at);

				if let Some(refresh) = &upstream_grant.refresh_token {
					builder = builder.refresh_token(self.cipher.seal_secret(refresh.expose())?);
				}

				let record = builder.build().map_err(ConfigError::CredentialBuild)?;

				self.store.save(record).await?;

				tracing::info!(principal = %principal, "credential stored");

				match pending.client {
					Some(binding) => {
						let code = self.codes.issue(principal, &binding);
						let mut redirect = binding.redirect_uri.clone();

						{
							let mut pairs = redirect.query_pairs_mut();

							pairs.append_pair("code", &code);

							if let Some(value) = &binding.state {
								pairs.append_pair("state", value);
							}
						}

						Ok(CallbackOutcome::Redirect(redirect))
					},
					None => Ok(CallbackOutcome::Onboarded(principal)),
				}
			})
			.await;

		match &result {
			Ok(_) => obs::record_flow_outcome(KIND, FlowOutcome::Success),
			Err(_) => obs::record_flow_outcome(KIND, FlowOutcome::Failure),
		}

		result
	}

	/// Redeems a downstream code for a proxy-issued bearer grant.
	pub async fn exchange_downstream_code(
		&self,
		code: &str,
		verifier: &str,
		redirect_uri: &Url,
	) -> Result<IssuedGrant> {
		const KIND: FlowKind = FlowKind::TokenExchange;

		let span = FlowSpan::new(KIND, "exchange_downstream_code");

		obs::record_flow_outcome(KIND, FlowOutcome::Attempt);

		let result = span
			.instrument(async move {
				let principal = self.codes.redeem(code, verifier, redirect_uri)?;
				let token = random_string(BEARER_TOKEN_LEN);
				let access_grant = AccessGrant::issue(
					&token,
					principal,
					OffsetDateTime::now_utc(),
					self.grant_lifetime,
				);

				self.store.save_grant(access_grant).await?;

				Ok(IssuedGrant {
					access_token: token,
					token_type: "Bearer",
					expires_in: self.grant_lifetime.whole_seconds(),
				})
			})
			.await;

		match &result {
			Ok(_) => obs::record_flow_outcome(KIND, FlowOutcome::Success),
			Err(_) => obs::record_flow_outcome(KIND, FlowOutcome::Failure),
		}

		result
	}

	/// Resolves a bearer token to its principal, rejecting unknown or expired grants.
	pub async fn authenticate(&self, bearer: &str) -> Result<PrincipalId> {
		let digest = grant::digest(bearer);
		let Some(access_grant) = self.store.fetch_grant(&digest).await? else {
			return Err(Error::Unauthorized);
		};

		if access_grant.is_expired_at(OffsetDateTime::now_utc()) {
			return Err(Error::Unauthorized);
		}

		Ok(access_grant.principal)
	}

	/// Returns a stored credential for the principal, refreshing it upstream
	/// when it is expired or inside the preemptive window.
	///
	/// Refreshes are singleflighted per principal, so concurrent callers share
	/// one upstream rotation instead of racing the provider.
	pub async fn fresh_credential(&self, principal: &PrincipalId) -> Result<CredentialRecord> {
		let record = self.require_credential(principal).await?;
		let now = OffsetDateTime::now_utc();

		if !record.expires_within(now, self.refresh_window) {
			return Ok(record);
		}
		if record.refresh_token.is_none() {
			if record.is_expired_at(now) {
				return Err(self.no_credential(principal));
			}

			return Ok(record);
		}

		const KIND: FlowKind = FlowKind::Refresh;

		let span = FlowSpan::new(KIND, "fresh_credential");

		obs::record_flow_outcome(KIND, FlowOutcome::Attempt);

		let guard = self.refresh_guard(principal);
		let result = span
			.instrument(async move {
				let _singleflight = guard.lock().await;
				// Re-read after acquiring the guard; a concurrent caller may
				// have already rotated the record.
				let record = self.require_credential(principal).await?;
				let now = OffsetDateTime::now_utc();

				if !record.expires_within(now, self.refresh_window) {
					return Ok(record);
				}

				let Some(sealed_refresh) = record.refresh_token.clone() else {
					if record.is_expired_at(now) {
						return Err(self.no_credential(principal));
					}

					return Ok(record);
				};
				let refresh_secret = self.cipher.open_secret(&sealed_refresh)?;
				let upstream_grant =
					match self.upstream.refresh(refresh_secret.expose(), &record.scope).await {
						Ok(value) => value,
						Err(err) => {
							if matches!(
								err,
								Error::InvalidGrant { .. } | Error::InvalidClient { .. }
							) {
								let _ = self.store.revoke(principal, now).await;

								tracing::warn!(
									principal = %principal,
									"refresh rejected upstream, credential revoked"
								);

								return Err(self.no_credential(principal));
							}

							return Err(err);
						},
					};
				let scope = upstream_grant.scope.clone().unwrap_or_else(|| record.scope.clone());
				let access_token = self.cipher.seal_secret(upstream_grant.access_token.expose())?;
				let mut builder = CredentialRecord::builder(
					principal.clone(),
					self.descriptor.id.clone(),
					scope,
				)
				.access_token(access_token)
				.issued_at(upstream_grant.issued_at)
				.expires_at(upstream_grant.expires_at);

				// Providers that do not rotate refresh tokens keep the old one valid.
				builder = match &upstream_grant.refresh_token {
					Some(refresh) => builder.refresh_token(self.cipher.seal_secret(refresh.expose())?),
					None => builder.refresh_token(sealed_refresh.clone()),
				};

				let replacement = builder.build().map_err(ConfigError::CredentialBuild)?;
				let outcome = self
					.store
					.compare_and_swap_refresh(
						principal,
						Some(sealed_refresh.as_str()),
						replacement.clone(),
					)
					.await?;

				match outcome {
					CompareAndSwapOutcome::Updated => Ok(replacement),
					CompareAndSwapOutcome::Missing => {
						self.store.save(replacement.clone()).await?;

						Ok(replacement)
					},
					CompareAndSwapOutcome::RefreshMismatch =>
						match self.store.fetch(principal).await? {
							Some(existing) => Ok(existing),
							None => {
								self.store.save(replacement.clone()).await?;

								Ok(replacement)
							},
						},
				}
			})
			.await;

		match &result {
			Ok(_) => obs::record_flow_outcome(KIND, FlowOutcome::Success),
			Err(_) => obs::record_flow_outcome(KIND, FlowOutcome::Failure),
		}

		result
	}

	/// Returns the principal of any non-revoked stored credential.
	pub async fn any_credential_principal(&self) -> Result<Option<PrincipalId>> {
		Ok(self.store.fetch_any().await?.map(|record| record.principal))
	}

	/// Decrypts the access token of a credential record.
	pub fn open_access_token(&self, record: &CredentialRecord) -> Result<TokenSecret> {
		Ok(self.cipher.open_secret(&record.access_token)?)
	}

	/// Drops expired entries from both ephemeral ledgers.
	pub fn purge_ledgers(&self) {
		self.sessions.purge_expired();
		self.codes.purge_expired();
	}

	async fn require_credential(&self, principal: &PrincipalId) -> Result<CredentialRecord> {
		let Some(record) = self.store.fetch(principal).await? else {
			return Err(self.no_credential(principal));
		};

		if record.is_revoked() {
			return Err(self.no_credential(principal));
		}

		Ok(record)
	}

	fn no_credential(&self, principal: &PrincipalId) -> Error {
		Error::NoCredential { principal: principal.clone() }
	}

	fn refresh_guard(&self, principal: &PrincipalId) -> Arc<AsyncMutex<()>> {
		let mut guards = self.refresh_guards.lock();

		guards.entry(principal.clone()).or_insert_with(|| Arc::new(AsyncMutex::new(()))).clone()
	}

	fn build_authorize_url(&self, state: &str, onboarding: bool) -> Url {
		let scope = if onboarding {
			self.descriptor.scopes.union(&self.descriptor.onboard_extra_scopes)
		} else {
			self.descriptor.scopes.clone()
		};
		let mut url = self.descriptor.endpoints.authorization.clone();

		{
			let mut pairs = url.query_pairs_mut();

			pairs.append_pair("response_type", "code");
			pairs.append_pair("client_id", &self.client_id);
			pairs.append_pair("redirect_uri", self.callback_uri.as_str());
			pairs.append_pair("scope", &scope.normalized());
			pairs.append_pair("state", state);
		}

		url
	}
}

#[cfg(test)]
mod tests {
	// std
	use std::collections::HashMap as StdHashMap;
	// self
	use super::*;
	use crate::{
		auth::{ProviderId, ScopeSet},
		session::s256_challenge,
		store::MemoryStore,
	};

	fn build_broker() -> (Broker, Arc<MemoryStore>) {
		let store = Arc::new(MemoryStore::default());
		let descriptor =
			ProviderDescriptor::linkedin().expect("LinkedIn descriptor should build successfully.");
		let base_url = Url::parse("https://proxy.example")
			.expect("Base URL fixture should parse successfully.");
		let broker = Broker::new(
			store.clone(),
			descriptor,
			CredentialCipher::from_secret("broker-test-secret"),
			"client-id",
			"client-secret",
			&base_url,
		)
		.expect("Broker fixture should build successfully.");

		(broker, store)
	}

	fn query_map(url: &Url) -> StdHashMap<String, String> {
		url.query_pairs().map(|(k, v)| (k.into_owned(), v.into_owned())).collect()
	}

	fn authorize_request(challenge_method: &str) -> AuthorizeRequest {
		AuthorizeRequest {
			redirect_uri: Url::parse("https://client.example/cb")
				.expect("Redirect fixture should parse successfully."),
			state: Some("client-state".into()),
			code_challenge: s256_challenge("verifier"),
			code_challenge_method: challenge_method.into(),
		}
	}

	fn seeded_record(
		cipher: &CredentialCipher,
		principal: &PrincipalId,
		expires_in: Duration,
	) -> CredentialRecord {
		let provider = ProviderId::new("linkedin").expect("Provider fixture should be valid.");
		let scope = ScopeSet::new(["w_member_social"]).expect("Scope fixture should be valid.");

		CredentialRecord::builder(principal.clone(), provider, scope)
			.access_token(
				cipher.seal_secret("upstream-access").expect("Sealing the fixture should succeed."),
			)
			.expires_in(expires_in)
			.build()
			.expect("Credential fixture should build successfully.")
	}

	#[test]
	fn authorize_url_carries_oauth_parameters() {
		let (broker, _) = build_broker();
		let url = broker
			.start_authorization(authorize_request("S256"))
			.expect("S256 authorization should be accepted.");
		let params = query_map(&url);

		assert_eq!(params.get("response_type").map(String::as_str), Some("code"));
		assert_eq!(params.get("client_id").map(String::as_str), Some("client-id"));
		assert_eq!(
			params.get("redirect_uri").map(String::as_str),
			Some("https://proxy.example/oauth/callback"),
		);
		assert_eq!(
			params.get("scope").map(String::as_str),
			Some("email openid profile w_member_social"),
		);
		assert!(params.get("state").is_some_and(|state| !state.is_empty()));
	}

	#[test]
	fn plain_challenge_method_is_rejected() {
		let (broker, _) = build_broker();
		let err = broker
			.start_authorization(authorize_request("plain"))
			.expect_err("Non-S256 challenge methods must be rejected.");

		assert!(matches!(err, Error::InvalidState { .. }));
	}

	#[test]
	fn onboarding_requests_extra_scopes() {
		let (broker, _) = build_broker();
		let params = query_map(&broker.start_onboarding());
		let scope = params.get("scope").expect("Onboarding URL should carry a scope parameter.");

		assert!(scope.contains("w_member_social"));
		assert!(scope.contains("email"));
	}

	#[tokio::test]
	async fn downstream_code_exchange_issues_bearer() {
		let (broker, _) = build_broker();
		let principal =
			PrincipalId::new("user@example.com").expect("Principal fixture should be valid.");
		let binding = DownstreamBinding {
			redirect_uri: Url::parse("https://client.example/cb")
				.expect("Redirect fixture should parse successfully."),
			state: None,
			code_challenge: s256_challenge("verifier"),
		};
		let code = broker.codes.issue(principal.clone(), &binding);
		let issued = broker
			.exchange_downstream_code(&code, "verifier", &binding.redirect_uri)
			.await
			.expect("Matching verifier should redeem the code.");

		assert_eq!(issued.token_type, "Bearer");
		assert_eq!(issued.expires_in, 31_536_000);

		let authenticated = broker
			.authenticate(&issued.access_token)
			.await
			.expect("Freshly issued bearer should authenticate.");

		assert_eq!(authenticated, principal);
	}

	#[tokio::test]
	async fn unknown_bearer_is_unauthorized() {
		let (broker, _) = build_broker();

		assert!(matches!(broker.authenticate("bogus").await, Err(Error::Unauthorized)));
	}

	#[tokio::test]
	async fn fresh_credential_returns_record_outside_window() {
		let (broker, store) = build_broker();
		let principal =
			PrincipalId::new("user@example.com").expect("Principal fixture should be valid.");
		let cipher = CredentialCipher::from_secret("broker-test-secret");
		let record = seeded_record(&cipher, &principal, Duration::hours(1));

		store.save(record).await.expect("Seeding the store should succeed.");

		let fresh = broker
			.fresh_credential(&principal)
			.await
			.expect("A fresh record should be returned without refresh.");

		assert_eq!(fresh.principal, principal);
	}

	#[tokio::test]
	async fn missing_credential_maps_to_no_credential() {
		let (broker, _) = build_broker();
		let principal =
			PrincipalId::new("absent@example.com").expect("Principal fixture should be valid.");
		let err = broker
			.fresh_credential(&principal)
			.await
			.expect_err("Missing credentials must be surfaced.");

		assert!(matches!(err, Error::NoCredential { .. }));
	}

	#[tokio::test]
	async fn expired_credential_without_refresh_requires_reauthorization() {
		let (broker, store) = build_broker();
		let principal =
			PrincipalId::new("user@example.com").expect("Principal fixture should be valid.");
		let cipher = CredentialCipher::from_secret("broker-test-secret");
		let record = seeded_record(&cipher, &principal, Duration::seconds(-10));

		store.save(record).await.expect("Seeding the store should succeed.");

		let err = broker
			.fresh_credential(&principal)
			.await
			.expect_err("Expired record without refresh must require re-authorization.");

		assert!(matches!(err, Error::NoCredential { .. }));
	}

	#[tokio::test]
	async fn revoked_credential_requires_reauthorization() {
		let (broker, store) = build_broker();
		let principal =
			PrincipalId::new("user@example.com").expect("Principal fixture should be valid.");
		let cipher = CredentialCipher::from_secret("broker-test-secret");
		let record = seeded_record(&cipher, &principal, Duration::hours(1));

		store.save(record).await.expect("Seeding the store should succeed.");
		store
			.revoke(&principal, OffsetDateTime::now_utc())
			.await
			.expect("Revoking the record should succeed.");

		let err = broker
			.fresh_credential(&principal)
			.await
			.expect_err("Revoked records must require re-authorization.");

		assert!(matches!(err, Error::NoCredential { .. }));
	}

	#[tokio::test]
	async fn open_access_token_round_trips_sealed_material() {
		let (broker, store) = build_broker();
		let principal =
			PrincipalId::new("user@example.com").expect("Principal fixture should be valid.");
		let cipher = CredentialCipher::from_secret("broker-test-secret");
		let record = seeded_record(&cipher, &principal, Duration::hours(1));

		store.save(record.clone()).await.expect("Seeding the store should succeed.");

		let opened = broker
			.open_access_token(&record)
			.expect("Broker cipher should open its own sealed material.");

		assert_eq!(opened.expose(), "upstream-access");
	}
}
