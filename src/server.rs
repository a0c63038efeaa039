//! HTTP surface of the proxy.
//!
//! Routes:
//! - `GET /health` liveness probe.
//! - `GET /.well-known/oauth-authorization-server` RFC 8414 metadata.
//! - `GET /oauth/authorize` downstream authorization entry.
//! - `GET /oauth/callback` upstream redirect target.
//! - `POST /oauth/token` downstream code-for-token exchange.
//! - `POST /mcp` bearer-authenticated JSON-RPC dispatch.
//! - `GET /onboard` operator onboarding, gated by a shared secret.

// crates.io
use axum::{
	Form, Json, Router,
	extract::{Query, Request, State},
	http::{HeaderMap, StatusCode, header},
	middleware::{self, Next},
	response::{Html, IntoResponse, Redirect, Response},
	routing::{get, post},
};
use serde_json::{Value, json};
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
// self
use crate::{
	_prelude::*,
	bind::CredentialBinder,
	broker::{AuthorizeRequest, Broker, CallbackOutcome},
	mcp::{JsonRpcError, JsonRpcResponse, McpDispatcher, SchedulerBackend},
};

/// Shared state handed to every handler.
pub struct AppState {
	/// Broker driving authorization, token issuance, and credential freshness.
	pub broker: Arc<Broker>,
	/// Per-request credential binder.
	pub binder: CredentialBinder,
	/// JSON-RPC dispatcher in front of the scheduler backend.
	pub dispatcher: McpDispatcher,
	/// Public base URL advertised in the metadata document.
	pub base_url: Url,
	/// Hostnames accepted by the Host allowlist; empty allows any.
	pub allowed_hosts: Vec<String>,
	/// Shared secret gating the onboarding route, when configured.
	pub onboard_secret: Option<String>,
}
impl AppState {
	/// Creates the shared state for a broker and scheduler backend.
	pub fn new(
		broker: Arc<Broker>,
		backend: Arc<dyn SchedulerBackend>,
		base_url: Url,
		allowed_hosts: Vec<String>,
		onboard_secret: Option<String>,
	) -> Self {
		Self {
			binder: CredentialBinder::new(broker.clone()),
			dispatcher: McpDispatcher::new(backend),
			broker,
			base_url,
			allowed_hosts,
			onboard_secret,
		}
	}
}

/// Builds the application router with tracing and Host validation applied.
pub fn router(state: Arc<AppState>) -> Router {
	Router::new()
		.route("/health", get(health))
		.route("/.well-known/oauth-authorization-server", get(metadata))
		.route("/oauth/authorize", get(authorize))
		.route("/oauth/callback", get(callback))
		.route("/oauth/token", post(token))
		.route("/mcp", post(mcp))
		.route("/onboard", get(onboard))
		.layer(
			ServiceBuilder::new()
				.layer(TraceLayer::new_for_http())
				.layer(middleware::from_fn_with_state(state.clone(), enforce_host)),
		)
		.with_state(state)
}

async fn enforce_host(
	State(state): State<Arc<AppState>>,
	request: Request,
	next: Next,
) -> Response {
	if state.allowed_hosts.is_empty() {
		return next.run(request).await;
	}

	let host = request
		.headers()
		.get(header::HOST)
		.and_then(|value| value.to_str().ok())
		.map(strip_port);

	match host {
		Some(host)
			if state.allowed_hosts.iter().any(|allowed| allowed.eq_ignore_ascii_case(host)) =>
			next.run(request).await,
		_ => (StatusCode::BAD_REQUEST, Json(json!({ "error": "Host header is not allowed." })))
			.into_response(),
	}
}

fn strip_port(host: &str) -> &str {
	match host.strip_prefix('[') {
		Some(rest) => rest.split(']').next().unwrap_or(rest),
		None => host.split(':').next().unwrap_or(host),
	}
}

async fn health() -> Json<Value> {
	Json(json!({ "status": "ok" }))
}

async fn metadata(State(state): State<Arc<AppState>>) -> Json<Value> {
	let issuer = state.base_url.as_str().trim_end_matches('/');

	Json(json!({
		"issuer": issuer,
		"authorization_endpoint": format!("{issuer}/oauth/authorize"),
		"token_endpoint": format!("{issuer}/oauth/token"),
		"response_types_supported": ["code"],
		"grant_types_supported": ["authorization_code"],
		"code_challenge_methods_supported": ["S256"],
		"token_endpoint_auth_methods_supported": ["none"],
	}))
}

#[derive(Debug, Deserialize)]
struct AuthorizeQuery {
	redirect_uri: Url,
	state: Option<String>,
	code_challenge: String,
	#[serde(default = "default_challenge_method")]
	code_challenge_method: String,
}

fn default_challenge_method() -> String {
	"S256".into()
}

async fn authorize(
	State(state): State<Arc<AppState>>,
	Query(query): Query<AuthorizeQuery>,
) -> Result<Redirect, ApiError> {
	let target = state.broker.start_authorization(AuthorizeRequest {
		redirect_uri: query.redirect_uri,
		state: query.state,
		code_challenge: query.code_challenge,
		code_challenge_method: query.code_challenge_method,
	})?;

	Ok(Redirect::temporary(target.as_str()))
}

#[derive(Debug, Deserialize)]
struct CallbackQuery {
	state: Option<String>,
	code: Option<String>,
	error: Option<String>,
	error_description: Option<String>,
}

async fn callback(
	State(state): State<Arc<AppState>>,
	Query(query): Query<CallbackQuery>,
) -> Response {
	if let Some(error) = query.error {
		let description = query.error_description.unwrap_or_else(|| error.clone());

		tracing::warn!(error = %error, "authorization callback reported an error");

		return (
			StatusCode::BAD_REQUEST,
			Json(json!({ "error": error, "error_description": description })),
		)
			.into_response();
	}

	let (Some(session), Some(code)) = (query.state, query.code) else {
		return (
			StatusCode::BAD_REQUEST,
			Json(json!({ "error": "The callback is missing its state or code parameter." })),
		)
			.into_response();
	};

	match state.broker.complete_callback(&session, &code).await {
		Ok(CallbackOutcome::Redirect(target)) =>
			Redirect::temporary(target.as_str()).into_response(),
		Ok(CallbackOutcome::Onboarded(principal)) => Html(format!(
			"<h1>Authorization complete</h1><p>Credential stored for {principal}. You can close this window.</p>"
		))
		.into_response(),
		Err(e) => ApiError(e).into_response(),
	}
}

#[derive(Debug, Deserialize)]
struct TokenForm {
	grant_type: String,
	code: String,
	code_verifier: String,
	redirect_uri: Url,
}

async fn token(State(state): State<Arc<AppState>>, Form(form): Form<TokenForm>) -> Response {
	if form.grant_type != "authorization_code" {
		return oauth_error(
			StatusCode::BAD_REQUEST,
			"unsupported_grant_type",
			"Only authorization_code is supported.",
		);
	}

	match state
		.broker
		.exchange_downstream_code(&form.code, &form.code_verifier, &form.redirect_uri)
		.await
	{
		Ok(grant) => Json(grant).into_response(),
		Err(Error::InvalidGrant { reason }) =>
			oauth_error(StatusCode::BAD_REQUEST, "invalid_grant", &reason),
		Err(e) => ApiError(e).into_response(),
	}
}

fn oauth_error(status: StatusCode, code: &str, description: &str) -> Response {
	(status, Json(json!({ "error": code, "error_description": description }))).into_response()
}

async fn mcp(State(state): State<Arc<AppState>>, headers: HeaderMap, body: String) -> Response {
	let Some(bearer) = bearer_token(&headers) else {
		return unauthorized();
	};
	let credential = match state.binder.bind(bearer).await {
		Ok(credential) => credential,
		Err(Error::Unauthorized) => return unauthorized(),
		Err(e) => return ApiError(e).into_response(),
	};
	let request = match serde_json::from_str(&body) {
		Ok(request) => request,
		Err(_) =>
			return Json(JsonRpcResponse::failure(Value::Null, JsonRpcError::parse_error()))
				.into_response(),
	};

	match state.dispatcher.dispatch(&credential, request).await {
		Some(response) => Json(response).into_response(),
		None => StatusCode::ACCEPTED.into_response(),
	}
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
	headers.get(header::AUTHORIZATION)?.to_str().ok()?.strip_prefix("Bearer ")
}

fn unauthorized() -> Response {
	(
		StatusCode::UNAUTHORIZED,
		[(header::WWW_AUTHENTICATE, "Bearer")],
		Json(json!({ "error": "Request is not authenticated." })),
	)
		.into_response()
}

#[derive(Debug, Deserialize)]
struct OnboardQuery {
	secret: Option<String>,
}

async fn onboard(
	State(state): State<Arc<AppState>>,
	Query(query): Query<OnboardQuery>,
) -> Response {
	let Some(expected) = &state.onboard_secret else {
		return StatusCode::NOT_FOUND.into_response();
	};

	if query.secret.as_deref() != Some(expected.as_str()) {
		return (StatusCode::FORBIDDEN, Json(json!({ "error": "Onboarding secret mismatch." })))
			.into_response();
	}

	Redirect::temporary(state.broker.start_onboarding().as_str()).into_response()
}

/// Maps domain errors onto HTTP statuses.
struct ApiError(Error);
impl From<Error> for ApiError {
	fn from(e: Error) -> Self {
		Self(e)
	}
}
impl IntoResponse for ApiError {
	fn into_response(self) -> Response {
		let status = match &self.0 {
			Error::InvalidState { .. } | Error::InvalidGrant { .. } => StatusCode::BAD_REQUEST,
			Error::Unauthorized => StatusCode::UNAUTHORIZED,
			Error::NoCredential { .. } | Error::InsufficientScope { .. } => StatusCode::FORBIDDEN,
			Error::InvalidClient { .. } | Error::Transient(_) => StatusCode::BAD_GATEWAY,
			Error::Transport(_) => StatusCode::GATEWAY_TIMEOUT,
			Error::Storage(_) | Error::Crypto(_) | Error::Config(_) =>
				StatusCode::INTERNAL_SERVER_ERROR,
		};

		if status.is_server_error() {
			tracing::error!(error = %self.0, "request failed");
		} else {
			tracing::debug!(error = %self.0, "request rejected");
		}

		match self.0 {
			Error::Unauthorized => unauthorized(),
			e => (status, Json(json!({ "error": e.to_string() }))).into_response(),
		}
	}
}
