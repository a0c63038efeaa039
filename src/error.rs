//! Proxy-level error types shared across the broker, binder, stores, and HTTP surface.

// self
use crate::{_prelude::*, auth::PrincipalId};

/// Proxy-wide result type alias returning [`Error`] by default.
pub type Result<T, E = Error> = std::result::Result<T, E>;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Canonical proxy error exposed by public APIs.
#[derive(Debug, ThisError)]
pub enum Error {
	/// Storage-layer failure.
	#[error("{0}")]
	Storage(
		#[from]
		#[source]
		crate::store::StoreError,
	),
	/// Credential encryption/decryption failure.
	#[error("{0}")]
	Crypto(
		#[from]
		#[source]
		crate::crypto::CryptoError,
	),
	/// Local configuration problem.
	#[error(transparent)]
	Config(#[from] ConfigError),
	/// Temporary upstream failure; retry with backoff.
	#[error(transparent)]
	Transient(#[from] TransientError),
	/// Transport failure (DNS, TCP, TLS).
	#[error(transparent)]
	Transport(#[from] TransportError),

	/// Authorization callback state was unknown, already used, or expired.
	#[error("Authorization state is invalid: {reason}.")]
	InvalidState {
		/// Why the state was rejected.
		reason: String,
	},
	/// No stored credential exists for the authenticated caller.
	#[error("No stored credential for {principal}; re-authorization is required.")]
	NoCredential {
		/// Caller identity that has no credential.
		principal: PrincipalId,
	},
	/// Bearer token was missing, unknown, or expired.
	#[error("Request is not authenticated.")]
	Unauthorized,
	/// Requested scopes exceed what was granted.
	#[error("Token lacks the required scopes: {reason}.")]
	InsufficientScope {
		/// Provider- or proxy-supplied reason string.
		reason: String,
	},
	/// Provider rejected the grant (e.g., bad code or refresh token).
	#[error("Provider rejected the grant: {reason}.")]
	InvalidGrant {
		/// Provider- or proxy-supplied reason string.
		reason: String,
	},
	/// Client authentication failed or credentials are malformed.
	#[error("Client authentication failed: {reason}.")]
	InvalidClient {
		/// Provider- or proxy-supplied reason string.
		reason: String,
	},
}

/// Configuration and validation failures raised by the proxy.
#[derive(Debug, ThisError)]
pub enum ConfigError {
	/// A required environment variable is not set.
	#[error("Missing required environment variable {name}.")]
	MissingEnv {
		/// Environment variable name.
		name: &'static str,
	},
	/// An environment variable holds an unparseable value.
	#[error("Environment variable {name} is invalid: {message}.")]
	InvalidEnv {
		/// Environment variable name.
		name: &'static str,
		/// Why the value was rejected.
		message: String,
	},
	/// HTTP client could not be constructed.
	#[error("HTTP client could not be constructed.")]
	HttpClientBuild {
		/// Underlying transport builder failure.
		#[source]
		source: BoxError,
	},
	/// HTTP request construction failed.
	#[error(transparent)]
	HttpRequest(#[from] oauth2::http::Error),
	/// Provider descriptor failed validation.
	#[error(transparent)]
	InvalidDescriptor(#[from] crate::provider::ProviderDescriptorError),
	/// Redirect URI cannot be parsed.
	#[error("Redirect URI is invalid.")]
	InvalidRedirect {
		/// Underlying parsing failure.
		#[source]
		source: oauth2::url::ParseError,
	},

	/// Stored credential is missing a refresh secret.
	#[error("Stored credential is missing a refresh token.")]
	MissingRefreshToken,
	/// Request scopes cannot be normalized.
	#[error("Requested scopes are invalid.")]
	InvalidScope(#[from] crate::auth::ScopeValidationError),
	/// The provider's userinfo response did not yield a usable identity.
	#[error("Userinfo identity is invalid.")]
	InvalidPrincipal(#[from] crate::auth::IdentifierError),
	/// Credential record builder validation failed.
	#[error("Unable to build credential record.")]
	CredentialBuild(#[from] crate::auth::CredentialBuilderError),
	/// Token endpoint response omitted `expires_in`.
	#[error("Token endpoint response is missing expires_in.")]
	MissingExpiresIn,
	/// Token endpoint returned an excessively large `expires_in`.
	#[error("The expires_in value exceeds the supported range.")]
	ExpiresInOutOfRange,
	/// Token endpoint returned a non-positive duration.
	#[error("The expires_in value must be positive.")]
	NonPositiveExpiresIn,
}
impl ConfigError {
	/// Wraps a transport's builder failure inside [`ConfigError`].
	pub fn http_client_build(src: impl 'static + Send + Sync + std::error::Error) -> Self {
		Self::HttpClientBuild { source: Box::new(src) }
	}
}
impl From<reqwest::Error> for ConfigError {
	fn from(e: reqwest::Error) -> Self {
		Self::http_client_build(e)
	}
}

/// Temporary failure variants (safe to retry).
#[derive(Debug, ThisError)]
pub enum TransientError {
	/// Provider returned an unexpected but non-fatal response.
	#[error("Provider returned an unexpected response: {message}.")]
	TokenEndpoint {
		/// Provider- or proxy-supplied message summarizing the failure.
		message: String,
		/// HTTP status code, when available.
		status: Option<u16>,
		/// Retry-After hint from upstream, if supplied.
		retry_after: Option<Duration>,
	},
	/// Provider responded with malformed JSON that could not be parsed.
	#[error("Provider returned malformed JSON.")]
	ResponseParse {
		/// Structured parsing failure.
		#[source]
		source: serde_path_to_error::Error<serde_json::error::Error>,
		/// HTTP status code, when available.
		status: Option<u16>,
	},
}
/// Transport-level failures (network, IO).
#[derive(Debug, ThisError)]
pub enum TransportError {
	/// Underlying HTTP client reported a network failure.
	#[error("Network error occurred while calling the provider.")]
	Network {
		/// Transport-specific network error.
		#[source]
		source: BoxError,
	},
	/// Underlying IO failure surfaced during transport.
	#[error("I/O error occurred while calling the provider.")]
	Io(#[from] std::io::Error),
}
impl TransportError {
	/// Wraps a transport-specific network error.
	pub fn network(src: impl 'static + Send + Sync + std::error::Error) -> Self {
		Self::Network { source: Box::new(src) }
	}
}
impl From<ReqwestError> for TransportError {
	fn from(e: ReqwestError) -> Self {
		Self::network(e)
	}
}
