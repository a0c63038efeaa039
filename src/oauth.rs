//! Upstream OAuth transport.
//!
//! Wraps the `oauth2` crate's client for the LinkedIn token endpoint and adds
//! the userinfo call used to resolve the caller's identity. Every request runs
//! through an instrumented reqwest handle that captures the HTTP status and
//! Retry-After hint, so failures classify consistently regardless of which
//! layer produced them.

// crates.io
use oauth2::{
	AsyncHttpClient, AuthType, AuthUrl, AuthorizationCode, ClientId as OAuthClientId, ClientSecret,
	EndpointNotSet, EndpointSet, HttpClientError, HttpRequest, HttpResponse, RedirectUrl,
	RefreshToken, RequestTokenError, Scope, TokenResponse, TokenUrl,
	basic::{BasicClient, BasicErrorResponse, BasicRequestTokenError},
};
use reqwest::header::{HeaderMap, RETRY_AFTER};
use time::format_description::well_known::Rfc2822;
// self
use crate::{
	_prelude::*,
	auth::{PrincipalId, ScopeSet, TokenSecret},
	error::{ConfigError, TransientError, TransportError},
	provider::{
		ProviderDescriptor, ProviderDescriptorError, ProviderErrorContext, ProviderErrorKind,
		classify_token_error,
	},
};

type ConfiguredBasicClient =
	BasicClient<EndpointSet, EndpointNotSet, EndpointNotSet, EndpointNotSet, EndpointSet>;
type UpstreamTokenResponse = oauth2::basic::BasicTokenResponse;

/// Access and refresh material returned by a successful token exchange.
///
/// Secrets are held as [`TokenSecret`] so accidental `Debug` output never
/// reveals them; the broker seals them before anything touches a store.
#[derive(Debug)]
pub struct TokenGrant {
	/// Plaintext access token, redacted in debug output.
	pub access_token: TokenSecret,
	/// Plaintext refresh token when the provider rotated or issued one.
	pub refresh_token: Option<TokenSecret>,
	/// Instant the grant was obtained.
	pub issued_at: OffsetDateTime,
	/// Instant the access token expires.
	pub expires_at: OffsetDateTime,
	/// Scope set echoed back by the provider, when it reported one.
	pub scope: Option<ScopeSet>,
}

/// Identity claims returned by the provider's userinfo endpoint.
#[derive(Clone, Debug, Deserialize)]
pub struct UserInfo {
	/// Provider-assigned subject identifier.
	#[serde(default)]
	pub sub: Option<String>,
	/// Email claim the proxy keys credentials by.
	#[serde(default)]
	pub email: Option<String>,
	/// Display name, informational only.
	#[serde(default)]
	pub name: Option<String>,
}
impl UserInfo {
	/// Resolves the principal identity from the email claim.
	pub fn principal(&self) -> Result<PrincipalId> {
		PrincipalId::new(self.email.as_deref().unwrap_or_default())
			.map_err(|e| ConfigError::InvalidPrincipal(e).into())
	}
}

/// Client for the upstream provider's token and userinfo endpoints.
///
/// Authenticates with `client_secret_post`, which LinkedIn requires; the
/// redirect URI registered with the provider is the proxy's own callback.
pub struct UpstreamClient {
	oauth_client: ConfiguredBasicClient,
	http: ReqwestClient,
	userinfo_endpoint: Url,
}
impl UpstreamClient {
	/// Builds a client from a descriptor and the proxy's registered credentials.
	pub fn from_descriptor(
		descriptor: &ProviderDescriptor,
		client_id: &str,
		client_secret: &str,
		callback_uri: &Url,
	) -> Result<Self> {
		let auth_url = AuthUrl::new(descriptor.endpoints.authorization.to_string())
			.map_err(ProviderDescriptorError::from)
			.map_err(ConfigError::from)?;
		let token_url = TokenUrl::new(descriptor.endpoints.token.to_string())
			.map_err(ProviderDescriptorError::from)
			.map_err(ConfigError::from)?;
		let redirect_url = RedirectUrl::new(callback_uri.to_string())
			.map_err(|source| ConfigError::InvalidRedirect { source })?;
		let oauth_client = BasicClient::new(OAuthClientId::new(client_id.to_owned()))
			.set_client_secret(ClientSecret::new(client_secret.to_owned()))
			.set_auth_uri(auth_url)
			.set_token_uri(token_url)
			.set_redirect_uri(redirect_url)
			.set_auth_type(AuthType::RequestBody);
		// Token requests must not follow redirects; the endpoint answers directly.
		let http = ReqwestClient::builder()
			.redirect(reqwest::redirect::Policy::none())
			.build()
			.map_err(ConfigError::from)?;

		Ok(Self { oauth_client, http, userinfo_endpoint: descriptor.endpoints.userinfo.clone() })
	}

	/// Replaces the HTTP client, keeping the configured OAuth endpoints.
	pub fn with_http_client(mut self, http: ReqwestClient) -> Self {
		self.http = http;

		self
	}

	/// Exchanges an upstream authorization code for a token grant.
	pub async fn exchange_code(&self, code: &str) -> Result<TokenGrant> {
		let meta = ResponseMetadataSlot::default();
		let handle = InstrumentedHandle::new(self.http.clone(), meta.clone());
		let response = self
			.oauth_client
			.exchange_code(AuthorizationCode::new(code.to_owned()))
			.request_async(&handle)
			.await
			.map_err(|err| map_request_error(meta.take(), err))?;

		map_token_response(response)
	}

	/// Redeems a refresh token, optionally narrowing to the requested scope.
	pub async fn refresh(&self, refresh_token: &str, scope: &ScopeSet) -> Result<TokenGrant> {
		let meta = ResponseMetadataSlot::default();
		let handle = InstrumentedHandle::new(self.http.clone(), meta.clone());
		let refresh_secret = RefreshToken::new(refresh_token.to_owned());
		let mut request = self.oauth_client.exchange_refresh_token(&refresh_secret);

		if !scope.is_empty() {
			for value in scope.iter() {
				request = request.add_scope(Scope::new(value.to_owned()));
			}
		}

		let response = request
			.request_async(&handle)
			.await
			.map_err(|err| map_request_error(meta.take(), err))?;

		map_token_response(response)
	}

	/// Fetches the caller's identity claims using a bearer access token.
	pub async fn fetch_userinfo(&self, access_token: &str) -> Result<UserInfo> {
		let response = self
			.http
			.get(self.userinfo_endpoint.clone())
			.bearer_auth(access_token)
			.send()
			.await
			.map_err(|e| map_reqwest_error(None, e))?;
		let status = response.status().as_u16();
		let body = response.bytes().await.map_err(|e| map_reqwest_error(None, e))?;

		if !(200..300).contains(&status) {
			return Err(map_userinfo_failure(status, &body));
		}

		let mut deserializer = serde_json::Deserializer::from_slice(&body);

		serde_path_to_error::deserialize(&mut deserializer)
			.map_err(|source| TransientError::ResponseParse { source, status: Some(status) }.into())
	}
}

fn map_token_response(response: UpstreamTokenResponse) -> Result<TokenGrant> {
	let expires_in = response.expires_in().ok_or(ConfigError::MissingExpiresIn)?.as_secs();
	let expires_in = i64::try_from(expires_in).map_err(|_| ConfigError::ExpiresInOutOfRange)?;

	if expires_in <= 0 {
		return Err(ConfigError::NonPositiveExpiresIn.into());
	}

	// LinkedIn may echo a scope set that differs from the request; capture it
	// rather than reject, the stored record reflects what was granted.
	let scope = match response.scopes() {
		Some(scopes) => Some(
			ScopeSet::new(scopes.iter().map(|scope| scope.as_ref()))
				.map_err(ConfigError::InvalidScope)?,
		),
		None => None,
	};
	let issued_at = OffsetDateTime::now_utc();

	Ok(TokenGrant {
		access_token: TokenSecret::new(response.access_token().secret().to_owned()),
		refresh_token: response
			.refresh_token()
			.map(|token| TokenSecret::new(token.secret().to_owned())),
		issued_at,
		expires_at: issued_at + Duration::seconds(expires_in),
		scope,
	})
}

fn map_userinfo_failure(status: u16, body: &[u8]) -> Error {
	let preview = String::from_utf8_lossy(body);
	let ctx = ProviderErrorContext::new()
		.with_http_status(status)
		.with_body_preview(preview.as_ref());
	let reason = format!("userinfo endpoint returned HTTP {status}");

	match classify_token_error(&ctx) {
		ProviderErrorKind::InvalidGrant => Error::InvalidGrant { reason },
		ProviderErrorKind::InvalidClient => Error::InvalidClient { reason },
		ProviderErrorKind::InsufficientScope => Error::InsufficientScope { reason },
		ProviderErrorKind::Transient =>
			TransientError::TokenEndpoint { message: reason, status: Some(status), retry_after: None }
				.into(),
	}
}

fn map_request_error(
	meta: Option<ResponseMetadata>,
	err: BasicRequestTokenError<HttpClientError<ReqwestError>>,
) -> Error {
	let meta_ref = meta.as_ref();

	match err {
		RequestTokenError::ServerResponse(response) =>
			map_server_response_error(response, meta_ref),
		RequestTokenError::Request(error) => map_http_client_error(meta_ref, error),
		RequestTokenError::Parse(error, _body) =>
			TransientError::ResponseParse { source: error, status: meta_status(meta_ref) }.into(),
		RequestTokenError::Other(message) => TransientError::TokenEndpoint {
			message,
			status: meta_status(meta_ref),
			retry_after: meta_retry_after(meta_ref),
		}
		.into(),
	}
}

fn map_server_response_error(
	response: BasicErrorResponse,
	meta: Option<&ResponseMetadata>,
) -> Error {
	let mut ctx =
		ProviderErrorContext::new().with_oauth_error(response.error().as_ref().to_string());

	if let Some(description) = response.error_description() {
		ctx = ctx.with_error_description(description.clone());
	}
	if let Some(status) = meta_status(meta) {
		ctx = ctx.with_http_status(status);
	}

	let reason = match response.error_description() {
		Some(description) => description.clone(),
		None => response.error().as_ref().to_owned(),
	};

	match classify_token_error(&ctx) {
		ProviderErrorKind::InvalidGrant => Error::InvalidGrant { reason },
		ProviderErrorKind::InvalidClient => Error::InvalidClient { reason },
		ProviderErrorKind::InsufficientScope => Error::InsufficientScope { reason },
		ProviderErrorKind::Transient => TransientError::TokenEndpoint {
			message: reason,
			status: meta_status(meta),
			retry_after: meta_retry_after(meta),
		}
		.into(),
	}
}

fn map_http_client_error(
	meta: Option<&ResponseMetadata>,
	err: HttpClientError<ReqwestError>,
) -> Error {
	match err {
		HttpClientError::Reqwest(inner) => map_reqwest_error(meta, *inner),
		HttpClientError::Http(inner) => ConfigError::HttpRequest(inner).into(),
		HttpClientError::Io(inner) => TransportError::Io(inner).into(),
		HttpClientError::Other(message) => TransientError::TokenEndpoint {
			message,
			status: meta_status(meta),
			retry_after: meta_retry_after(meta),
		}
		.into(),
		_ => TransientError::TokenEndpoint {
			message: "HTTP client reported an unknown failure".into(),
			status: meta_status(meta),
			retry_after: meta_retry_after(meta),
		}
		.into(),
	}
}

fn map_reqwest_error(meta: Option<&ResponseMetadata>, err: ReqwestError) -> Error {
	if err.is_builder() {
		return ConfigError::from(err).into();
	}
	if err.is_timeout() {
		return TransientError::TokenEndpoint {
			message: "request timed out".into(),
			status: meta_status(meta).or_else(|| err.status().map(|code| code.as_u16())),
			retry_after: meta_retry_after(meta),
		}
		.into();
	}

	TransportError::from(err).into()
}

fn meta_status(meta: Option<&ResponseMetadata>) -> Option<u16> {
	meta.and_then(|value| value.status)
}

fn meta_retry_after(meta: Option<&ResponseMetadata>) -> Option<Duration> {
	meta.and_then(|value| value.retry_after)
}

/// Metadata captured from the most recent HTTP response for error mapping.
#[derive(Clone, Debug, Default)]
pub struct ResponseMetadata {
	/// HTTP status code returned by the endpoint, if available.
	pub status: Option<u16>,
	/// Retry-After hint expressed as a relative duration.
	pub retry_after: Option<Duration>,
}

/// Thread-safe slot shared between the transport and the error mapper.
///
/// A fresh slot is created per request; the transport stores the observed
/// status once headers arrive and the mapper takes it after `oauth2` resolves.
#[derive(Clone, Debug, Default)]
pub struct ResponseMetadataSlot(Arc<Mutex<Option<ResponseMetadata>>>);
impl ResponseMetadataSlot {
	/// Stores new metadata for the current request.
	pub fn store(&self, meta: ResponseMetadata) {
		*self.0.lock() = Some(meta);
	}

	/// Returns the captured metadata, if any, consuming it from the slot.
	pub fn take(&self) -> Option<ResponseMetadata> {
		self.0.lock().take()
	}
}

struct InstrumentedHttpClient {
	client: ReqwestClient,
	slot: ResponseMetadataSlot,
}

/// Reqwest-backed [`AsyncHttpClient`] that records response metadata.
#[derive(Clone)]
pub struct InstrumentedHandle(Arc<InstrumentedHttpClient>);
impl InstrumentedHandle {
	fn new(client: ReqwestClient, slot: ResponseMetadataSlot) -> Self {
		Self(Arc::new(InstrumentedHttpClient { client, slot }))
	}
}
impl<'c> AsyncHttpClient<'c> for InstrumentedHandle {
	type Error = HttpClientError<ReqwestError>;
	type Future =
		Pin<Box<dyn Future<Output = Result<HttpResponse, Self::Error>> + 'c + Send + Sync>>;

	fn call(&'c self, request: HttpRequest) -> Self::Future {
		let client = Arc::clone(&self.0);

		Box::pin(async move {
			client.slot.take();

			let response = client
				.client
				.execute(request.try_into().map_err(Box::new)?)
				.await
				.map_err(Box::new)?;
			let status = response.status();
			let headers = response.headers().to_owned();
			let retry_after = parse_retry_after(&headers);

			client.slot.store(ResponseMetadata { status: Some(status.as_u16()), retry_after });

			let mut response_new =
				HttpResponse::new(response.bytes().await.map_err(Box::new)?.to_vec());

			*response_new.status_mut() = status;
			*response_new.headers_mut() = headers;

			Ok(response_new)
		})
	}
}

fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
	let value = headers.get(RETRY_AFTER)?;
	let raw = value.to_str().ok()?.trim();

	if let Ok(secs) = raw.parse::<u64>() {
		return Some(Duration::seconds(secs as i64));
	}
	if let Ok(moment) = OffsetDateTime::parse(raw, &Rfc2822) {
		let delta = moment - OffsetDateTime::now_utc();

		if delta.is_positive() {
			return Some(delta);
		}
	}

	None
}
