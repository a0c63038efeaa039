//! Upstream provider descriptors and token-error classification.
//!
//! The proxy fronts a single provider (LinkedIn), but the descriptor keeps the
//! endpoints and scope defaults in data rather than scattering URL literals
//! through the broker.

// self
use crate::{
	_prelude::*,
	auth::{IdentifierError, ProviderId, ScopeSet, ScopeValidationError},
};

const LINKEDIN_AUTHORIZATION: &str = "https://www.linkedin.com/oauth/v2/authorization";
const LINKEDIN_TOKEN: &str = "https://www.linkedin.com/oauth/v2/accessToken";
const LINKEDIN_USERINFO: &str = "https://api.linkedin.com/v2/userinfo";
const LINKEDIN_SCOPES: &str = "openid profile email w_member_social";
const LINKEDIN_ONBOARD_EXTRA_SCOPES: &str = "openid email";

/// Errors raised while constructing or validating descriptors.
#[derive(Clone, Debug, PartialEq, Eq, ThisError)]
pub enum ProviderDescriptorError {
	/// Authorization endpoint is required.
	#[error("Missing authorization endpoint.")]
	MissingAuthorizationEndpoint,
	/// Token endpoint is required.
	#[error("Missing token endpoint.")]
	MissingTokenEndpoint,
	/// Userinfo endpoint is required for principal resolution.
	#[error("Missing userinfo endpoint.")]
	MissingUserinfoEndpoint,
	/// Endpoints must use HTTPS.
	#[error("The {endpoint} endpoint must use HTTPS: {url}.")]
	InsecureEndpoint {
		/// Which endpoint failed validation.
		endpoint: &'static str,
		/// Endpoint URL that failed validation.
		url: String,
	},
	/// An endpoint URL literal failed to parse.
	#[error("Descriptor endpoint URL is invalid.")]
	InvalidUrl(#[from] url::ParseError),
	/// Descriptor identifier failed validation.
	#[error(transparent)]
	InvalidIdentifier(#[from] IdentifierError),
	/// Default scope string failed normalization.
	#[error(transparent)]
	InvalidScope(#[from] ScopeValidationError),
}

/// Endpoint set declared by a provider descriptor.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderEndpoints {
	/// Authorization endpoint end-users are redirected to.
	pub authorization: Url,
	/// Token endpoint used for exchanges and refreshes.
	pub token: Url,
	/// Userinfo endpoint used to resolve the principal identity.
	pub userinfo: Url,
}

/// Immutable provider descriptor consumed by the broker.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderDescriptor {
	/// Descriptor identifier.
	pub id: ProviderId,
	/// Endpoint definitions exposed by the provider.
	pub endpoints: ProviderEndpoints,
	/// Scopes requested during the standard authorization flow.
	pub scopes: ScopeSet,
	/// Extra scopes appended for operator onboarding flows.
	pub onboard_extra_scopes: ScopeSet,
}
impl ProviderDescriptor {
	/// Creates a new builder for the provided identifier.
	pub fn builder(id: ProviderId) -> ProviderDescriptorBuilder {
		ProviderDescriptorBuilder::new(id)
	}

	/// Returns the LinkedIn descriptor with its production endpoints and scopes.
	pub fn linkedin() -> Result<Self, ProviderDescriptorError> {
		Self::builder(ProviderId::new("linkedin")?)
			.authorization_endpoint(Url::parse(LINKEDIN_AUTHORIZATION)?)
			.token_endpoint(Url::parse(LINKEDIN_TOKEN)?)
			.userinfo_endpoint(Url::parse(LINKEDIN_USERINFO)?)
			.scopes(LINKEDIN_SCOPES.parse::<ScopeSet>()?)
			.onboard_extra_scopes(LINKEDIN_ONBOARD_EXTRA_SCOPES.parse::<ScopeSet>()?)
			.build()
	}
}

/// Builder for [`ProviderDescriptor`] values.
#[derive(Debug)]
pub struct ProviderDescriptorBuilder {
	/// Identifier for the descriptor being constructed.
	pub id: ProviderId,
	/// Optional authorization endpoint.
	pub authorization_endpoint: Option<Url>,
	/// Optional token endpoint.
	pub token_endpoint: Option<Url>,
	/// Optional userinfo endpoint.
	pub userinfo_endpoint: Option<Url>,
	/// Scopes requested during authorization.
	pub scopes: ScopeSet,
	/// Extra scopes appended for onboarding.
	pub onboard_extra_scopes: ScopeSet,
}
impl ProviderDescriptorBuilder {
	/// Creates a new builder seeded with the provided identifier.
	pub fn new(id: ProviderId) -> Self {
		Self {
			id,
			authorization_endpoint: None,
			token_endpoint: None,
			userinfo_endpoint: None,
			scopes: ScopeSet::default(),
			onboard_extra_scopes: ScopeSet::default(),
		}
	}

	/// Sets the authorization endpoint.
	pub fn authorization_endpoint(mut self, url: Url) -> Self {
		self.authorization_endpoint = Some(url);

		self
	}

	/// Sets the token endpoint.
	pub fn token_endpoint(mut self, url: Url) -> Self {
		self.token_endpoint = Some(url);

		self
	}

	/// Sets the userinfo endpoint.
	pub fn userinfo_endpoint(mut self, url: Url) -> Self {
		self.userinfo_endpoint = Some(url);

		self
	}

	/// Sets the default authorization scopes.
	pub fn scopes(mut self, scopes: ScopeSet) -> Self {
		self.scopes = scopes;

		self
	}

	/// Sets the extra onboarding scopes.
	pub fn onboard_extra_scopes(mut self, scopes: ScopeSet) -> Self {
		self.onboard_extra_scopes = scopes;

		self
	}

	/// Consumes the builder and validates the resulting descriptor.
	pub fn build(self) -> Result<ProviderDescriptor, ProviderDescriptorError> {
		let authorization = self
			.authorization_endpoint
			.ok_or(ProviderDescriptorError::MissingAuthorizationEndpoint)?;
		let token = self.token_endpoint.ok_or(ProviderDescriptorError::MissingTokenEndpoint)?;
		let userinfo =
			self.userinfo_endpoint.ok_or(ProviderDescriptorError::MissingUserinfoEndpoint)?;
		let descriptor = ProviderDescriptor {
			id: self.id,
			endpoints: ProviderEndpoints { authorization, token, userinfo },
			scopes: self.scopes,
			onboard_extra_scopes: self.onboard_extra_scopes,
		};

		descriptor.validate()?;

		Ok(descriptor)
	}
}

impl ProviderDescriptor {
	fn validate(&self) -> Result<(), ProviderDescriptorError> {
		validate_endpoint("authorization", &self.endpoints.authorization)?;
		validate_endpoint("token", &self.endpoints.token)?;
		validate_endpoint("userinfo", &self.endpoints.userinfo)?;

		Ok(())
	}
}

fn validate_endpoint(name: &'static str, url: &Url) -> Result<(), ProviderDescriptorError> {
	if url.scheme() != "https" {
		Err(ProviderDescriptorError::InsecureEndpoint { endpoint: name, url: url.to_string() })
	} else {
		Ok(())
	}
}

/// Canonical provider error categories used during token-error mapping.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProviderErrorKind {
	/// Provider rejected the authorization grant (bad code/refresh token).
	InvalidGrant,
	/// Client authentication failed.
	InvalidClient,
	/// Requested scopes exceed what the token covers.
	InsufficientScope,
	/// Failure is temporary and should be retried.
	Transient,
}

/// Context assembled from a failed token request before classification.
///
/// Keeps only primitive data (status codes, OAuth fields, body preview) so the
/// mapping stays decoupled from the HTTP client.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ProviderErrorContext {
	/// HTTP status code returned by the provider, when available.
	pub http_status: Option<u16>,
	/// Provider-supplied OAuth `error` field.
	pub oauth_error: Option<String>,
	/// Provider-supplied OAuth `error_description` field.
	pub error_description: Option<String>,
	/// Preview of the response body for non-JSON payloads.
	pub body_preview: Option<String>,
	/// Indicates whether the failure originated from the network/transport layer.
	pub network_error: bool,
}
impl ProviderErrorContext {
	const BODY_PREVIEW_LIMIT: usize = 256;

	/// Creates an empty context.
	pub fn new() -> Self {
		Self::default()
	}

	/// Convenience constructor for transport-level/network failures.
	pub fn network_failure() -> Self {
		Self { network_error: true, ..Self::default() }
	}

	/// Adds an HTTP status code (e.g., 400, 401, 500).
	pub fn with_http_status(mut self, status: u16) -> Self {
		self.http_status = Some(status);

		self
	}

	/// Adds the OAuth error code string returned by the provider.
	pub fn with_oauth_error(mut self, error: impl Into<String>) -> Self {
		self.oauth_error = Some(error.into());

		self
	}

	/// Adds the OAuth `error_description` field.
	pub fn with_error_description(mut self, description: impl Into<String>) -> Self {
		self.error_description = Some(description.into());

		self
	}

	/// Adds a body preview for providers that return non-JSON payloads.
	pub fn with_body_preview(mut self, body: impl Into<String>) -> Self {
		self.body_preview = Some(truncate_preview(body.into()));

		self
	}
}

/// Classifies a failed token request using RFC-guided heuristics.
///
/// Structured OAuth fields (`error`, `error_description`) take priority, then
/// body text hints, and finally the HTTP status code. Network failures are
/// always treated as transient.
pub fn classify_token_error(ctx: &ProviderErrorContext) -> ProviderErrorKind {
	if ctx.network_error {
		return ProviderErrorKind::Transient;
	}

	if let Some(kind) =
		classify_oauth_error(ctx.oauth_error.as_deref(), ctx.error_description.as_deref())
	{
		return kind;
	}
	if let Some(kind) = classify_body(ctx.body_preview.as_deref()) {
		return kind;
	}

	classify_status(ctx.http_status)
}

fn truncate_preview(body: String) -> String {
	if body.chars().count() <= ProviderErrorContext::BODY_PREVIEW_LIMIT {
		return body;
	}

	let mut buf = String::new();

	for (idx, ch) in body.chars().enumerate() {
		if idx >= ProviderErrorContext::BODY_PREVIEW_LIMIT {
			buf.push('…');

			break;
		}
		buf.push(ch);
	}

	buf
}

fn classify_oauth_error(
	oauth_error: Option<&str>,
	error_description: Option<&str>,
) -> Option<ProviderErrorKind> {
	oauth_error
		.and_then(match_exact_value)
		.or_else(|| error_description.and_then(match_exact_value))
		.or_else(|| classify_body(error_description))
}

fn match_exact_value(value: &str) -> Option<ProviderErrorKind> {
	if value.eq_ignore_ascii_case("invalid_grant") || value.eq_ignore_ascii_case("access_denied") {
		Some(ProviderErrorKind::InvalidGrant)
	} else if value.eq_ignore_ascii_case("invalid_client")
		|| value.eq_ignore_ascii_case("unauthorized_client")
	{
		Some(ProviderErrorKind::InvalidClient)
	} else if value.eq_ignore_ascii_case("invalid_scope")
		|| value.eq_ignore_ascii_case("insufficient_scope")
	{
		Some(ProviderErrorKind::InsufficientScope)
	} else if value.eq_ignore_ascii_case("temporarily_unavailable")
		|| value.eq_ignore_ascii_case("server_error")
	{
		Some(ProviderErrorKind::Transient)
	} else {
		None
	}
}

fn classify_body(body: Option<&str>) -> Option<ProviderErrorKind> {
	let body = body?;
	let lowered = body.to_ascii_lowercase();

	match lowered.as_str() {
		text if text.contains("invalid_grant") => Some(ProviderErrorKind::InvalidGrant),
		text if text.contains("invalid_client") => Some(ProviderErrorKind::InvalidClient),
		text if text.contains("insufficient_scope") || text.contains("invalid_scope") =>
			Some(ProviderErrorKind::InsufficientScope),
		text if text.contains("temporarily_unavailable") || text.contains("retry") =>
			Some(ProviderErrorKind::Transient),
		_ => None,
	}
}

fn classify_status(status: Option<u16>) -> ProviderErrorKind {
	match status {
		Some(400 | 404 | 410) => ProviderErrorKind::InvalidGrant,
		Some(401) => ProviderErrorKind::InvalidClient,
		Some(403) => ProviderErrorKind::InsufficientScope,
		Some(429) => ProviderErrorKind::Transient,
		Some(code) if code >= 500 => ProviderErrorKind::Transient,
		_ => ProviderErrorKind::Transient,
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn linkedin_descriptor_carries_production_defaults() {
		let descriptor = ProviderDescriptor::linkedin()
			.expect("LinkedIn descriptor should validate successfully.");

		assert_eq!(descriptor.endpoints.authorization.as_str(), LINKEDIN_AUTHORIZATION);
		assert_eq!(descriptor.endpoints.token.as_str(), LINKEDIN_TOKEN);
		assert_eq!(descriptor.endpoints.userinfo.as_str(), LINKEDIN_USERINFO);
		assert!(descriptor.scopes.contains("w_member_social"));
		assert!(descriptor.onboard_extra_scopes.contains("openid"));
	}

	#[test]
	fn insecure_endpoints_are_rejected() {
		let id = ProviderId::new("linkedin").expect("Provider fixture should be valid.");
		let err = ProviderDescriptor::builder(id)
			.authorization_endpoint(
				Url::parse("http://www.linkedin.com/oauth/v2/authorization")
					.expect("URL fixture should parse successfully."),
			)
			.token_endpoint(
				Url::parse(LINKEDIN_TOKEN).expect("URL fixture should parse successfully."),
			)
			.userinfo_endpoint(
				Url::parse(LINKEDIN_USERINFO).expect("URL fixture should parse successfully."),
			)
			.build()
			.expect_err("HTTP authorization endpoint must be rejected.");

		assert!(matches!(
			err,
			ProviderDescriptorError::InsecureEndpoint { endpoint: "authorization", .. },
		));
	}

	#[test]
	fn oauth_error_field_takes_priority() {
		let ctx = ProviderErrorContext::new()
			.with_http_status(500)
			.with_oauth_error("invalid_grant")
			.with_body_preview("temporarily_unavailable");

		assert_eq!(classify_token_error(&ctx), ProviderErrorKind::InvalidGrant);
	}

	#[test]
	fn body_hints_fill_in_for_missing_oauth_fields() {
		let ctx =
			ProviderErrorContext::new().with_http_status(418).with_body_preview("please retry later");

		assert_eq!(classify_token_error(&ctx), ProviderErrorKind::Transient);

		let ctx = ProviderErrorContext::new().with_body_preview("invalid_client credentials");

		assert_eq!(classify_token_error(&ctx), ProviderErrorKind::InvalidClient);
	}

	#[test]
	fn status_heuristics_are_the_last_resort() {
		assert_eq!(
			classify_token_error(&ProviderErrorContext::new().with_http_status(400)),
			ProviderErrorKind::InvalidGrant,
		);
		assert_eq!(
			classify_token_error(&ProviderErrorContext::new().with_http_status(401)),
			ProviderErrorKind::InvalidClient,
		);
		assert_eq!(
			classify_token_error(&ProviderErrorContext::new().with_http_status(403)),
			ProviderErrorKind::InsufficientScope,
		);
		assert_eq!(
			classify_token_error(&ProviderErrorContext::new().with_http_status(503)),
			ProviderErrorKind::Transient,
		);
	}

	#[test]
	fn network_failures_are_transient() {
		assert_eq!(
			classify_token_error(&ProviderErrorContext::network_failure()),
			ProviderErrorKind::Transient,
		);
	}

	#[test]
	fn body_previews_are_truncated() {
		let long = "x".repeat(1024);
		let ctx = ProviderErrorContext::new().with_body_preview(long);
		let preview = ctx.body_preview.expect("Preview should be recorded.");

		assert!(preview.chars().count() <= ProviderErrorContext::BODY_PREVIEW_LIMIT + 1);
	}
}
