//! Ephemeral ledgers correlating in-flight authorization redirects and
//! proxy-issued downstream codes.

// crates.io
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use rand::{Rng, distr::Alphanumeric};
use sha2::{Digest, Sha256};
// self
use crate::{_prelude::*, auth::PrincipalId};

const STATE_LEN: usize = 32;
const CODE_LEN: usize = 32;
const SESSION_TTL: Duration = Duration::minutes(10);
const CODE_TTL: Duration = Duration::minutes(5);

/// Downstream client parameters captured at initiation and replayed after the
/// upstream callback completes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DownstreamBinding {
	/// Redirect URI the downstream client asked to return to.
	pub redirect_uri: Url,
	/// Opaque state supplied by the downstream client, echoed back verbatim.
	pub state: Option<String>,
	/// PKCE S256 challenge the token exchange must later satisfy.
	pub code_challenge: String,
}

/// One in-flight authorization handshake, keyed by the upstream state token.
#[derive(Clone, Debug)]
pub struct PendingAuthorization {
	/// Upstream state token round-tripped through the provider redirect.
	pub state: String,
	/// Downstream binding, absent for operator onboarding flows.
	pub client: Option<DownstreamBinding>,
	/// Creation instant used for TTL enforcement.
	pub created_at: OffsetDateTime,
}

/// Single-use ledger of pending authorizations.
///
/// Entries are removed on first take; a second take with the same state fails
/// the same way an unknown state does, so replayed callbacks cannot mint
/// credentials.
#[derive(Debug)]
pub struct SessionLedger {
	inner: RwLock<HashMap<String, PendingAuthorization>>,
	ttl: Duration,
}
impl SessionLedger {
	/// Creates a ledger with a custom session TTL.
	pub fn with_ttl(ttl: Duration) -> Self {
		Self { inner: RwLock::new(HashMap::new()), ttl }
	}

	/// Registers a new pending authorization and returns its state token.
	pub fn begin(&self, client: Option<DownstreamBinding>) -> String {
		let state = random_string(STATE_LEN);
		let pending = PendingAuthorization {
			state: state.clone(),
			client,
			created_at: OffsetDateTime::now_utc(),
		};

		self.inner.write().insert(state.clone(), pending);

		state
	}

	/// Removes and returns the pending authorization matching the state.
	pub fn take(&self, state: &str) -> Result<PendingAuthorization> {
		let Some(pending) = self.inner.write().remove(state) else {
			return Err(Error::InvalidState { reason: "unknown or already used state".into() });
		};

		if OffsetDateTime::now_utc() - pending.created_at > self.ttl {
			return Err(Error::InvalidState { reason: "state has expired".into() });
		}

		Ok(pending)
	}

	/// Drops entries older than the ledger TTL.
	pub fn purge_expired(&self) {
		let now = OffsetDateTime::now_utc();

		self.inner.write().retain(|_, pending| now - pending.created_at <= self.ttl);
	}

	/// Number of in-flight authorizations, exposed for diagnostics.
	pub fn len(&self) -> usize {
		self.inner.read().len()
	}

	/// Returns `true` when no authorization is in flight.
	pub fn is_empty(&self) -> bool {
		self.inner.read().is_empty()
	}
}
impl Default for SessionLedger {
	fn default() -> Self {
		Self::with_ttl(SESSION_TTL)
	}
}

/// One proxy-minted downstream authorization code awaiting exchange.
#[derive(Clone, Debug)]
struct IssuedCode {
	principal: PrincipalId,
	code_challenge: String,
	redirect_uri: Url,
	created_at: OffsetDateTime,
}

/// Single-use ledger of downstream authorization codes.
#[derive(Debug)]
pub struct CodeLedger {
	inner: RwLock<HashMap<String, IssuedCode>>,
	ttl: Duration,
}
impl CodeLedger {
	/// Creates a ledger with a custom code TTL.
	pub fn with_ttl(ttl: Duration) -> Self {
		Self { inner: RwLock::new(HashMap::new()), ttl }
	}

	/// Mints a single-use code bound to the downstream client's PKCE challenge
	/// and redirect URI.
	pub fn issue(&self, principal: PrincipalId, binding: &DownstreamBinding) -> String {
		let code = random_string(CODE_LEN);
		let issued = IssuedCode {
			principal,
			code_challenge: binding.code_challenge.clone(),
			redirect_uri: binding.redirect_uri.clone(),
			created_at: OffsetDateTime::now_utc(),
		};

		self.inner.write().insert(code.clone(), issued);

		code
	}

	/// Redeems a code, verifying the PKCE verifier and redirect URI.
	pub fn redeem(&self, code: &str, verifier: &str, redirect_uri: &Url) -> Result<PrincipalId> {
		let Some(issued) = self.inner.write().remove(code) else {
			return Err(Error::InvalidGrant { reason: "unknown or already used code".into() });
		};

		if OffsetDateTime::now_utc() - issued.created_at > self.ttl {
			return Err(Error::InvalidGrant { reason: "code has expired".into() });
		}
		if issued.redirect_uri != *redirect_uri {
			return Err(Error::InvalidGrant { reason: "redirect_uri does not match".into() });
		}
		if s256_challenge(verifier) != issued.code_challenge {
			return Err(Error::InvalidGrant { reason: "PKCE verification failed".into() });
		}

		Ok(issued.principal)
	}

	/// Drops entries older than the ledger TTL.
	pub fn purge_expired(&self) {
		let now = OffsetDateTime::now_utc();

		self.inner.write().retain(|_, issued| now - issued.created_at <= self.ttl);
	}
}
impl Default for CodeLedger {
	fn default() -> Self {
		Self::with_ttl(CODE_TTL)
	}
}

/// Generates an alphanumeric token of the requested length.
pub fn random_string(len: usize) -> String {
	rand::rng().sample_iter(Alphanumeric).take(len).map(char::from).collect()
}

/// Computes the RFC 7636 S256 challenge for a PKCE verifier.
pub fn s256_challenge(verifier: &str) -> String {
	let mut hasher = Sha256::new();

	hasher.update(verifier.as_bytes());

	URL_SAFE_NO_PAD.encode(hasher.finalize())
}
