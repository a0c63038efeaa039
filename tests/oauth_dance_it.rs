#![cfg(feature = "test")]

// crates.io
use httpmock::prelude::*;
use serde_json::{Value, json};
// self
use linkedin_scheduler_remote::{
	_preludet::*,
	auth::{ProviderId, ScopeSet},
	broker::{AuthorizeRequest, CallbackOutcome},
	provider::ProviderDescriptor,
	server::AppState,
	session,
};

const VERIFIER: &str = "dance-verifier-0123456789-abcdefghijklmnopqrstuvwxyz";

fn mock_descriptor(server: &MockServer) -> ProviderDescriptor {
	ProviderDescriptor::builder(
		ProviderId::new("linkedin").expect("Provider identifier should be valid."),
	)
	.authorization_endpoint(
		Url::parse(&server.url("/authorize"))
			.expect("Mock authorize endpoint should parse successfully."),
	)
	.token_endpoint(
		Url::parse(&server.url("/token")).expect("Mock token endpoint should parse successfully."),
	)
	.userinfo_endpoint(
		Url::parse(&server.url("/userinfo"))
			.expect("Mock userinfo endpoint should parse successfully."),
	)
	.scopes(
		ScopeSet::new(["openid", "profile", "email", "w_member_social"])
			.expect("Scope fixture should be valid."),
	)
	.onboard_extra_scopes(
		ScopeSet::new(["openid", "email"]).expect("Onboard scope fixture should be valid."),
	)
	.build()
	.expect("Mock provider descriptor should build successfully.")
}

fn query_param(url: &Url, name: &str) -> String {
	url.query_pairs()
		.find(|(key, _)| key == name)
		.map(|(_, value)| value.into_owned())
		.unwrap_or_else(|| panic!("URL should carry a `{name}` query parameter."))
}

#[tokio::test]
async fn full_dance_issues_grant_and_serves_tool_calls() {
	let server = MockServer::start_async().await;
	let descriptor = mock_descriptor(&server);
	let (broker, _) = build_test_broker(descriptor, "https://proxy.example");
	let token_mock = server
		.mock_async(|when, then| {
			when.method(POST)
				.path("/token")
				.body_includes("grant_type=authorization_code")
				.body_includes("code=upstream-code");
			then.status(200).header("content-type", "application/json").json_body(json!({
				"access_token": "upstream-access",
				"refresh_token": "upstream-refresh",
				"token_type": "bearer",
				"expires_in": 3600,
			}));
		})
		.await;
	let userinfo_mock = server
		.mock_async(|when, then| {
			when.method(GET).path("/userinfo").header("authorization", "Bearer upstream-access");
			then.status(200).header("content-type", "application/json").json_body(json!({
				"sub": "abc123",
				"email": "member@example.com",
				"name": "Member Example",
			}));
		})
		.await;
	let redirect_uri =
		Url::parse("https://client.example/cb").expect("Redirect fixture should parse.");
	let authorize_url = broker
		.start_authorization(AuthorizeRequest {
			redirect_uri: redirect_uri.clone(),
			state: Some("client-state".into()),
			code_challenge: session::s256_challenge(VERIFIER),
			code_challenge_method: "S256".into(),
		})
		.expect("Authorization should start successfully.");

	assert!(authorize_url.as_str().starts_with(&server.url("/authorize")));
	assert_eq!(query_param(&authorize_url, "response_type"), "code");
	assert_eq!(query_param(&authorize_url, "client_id"), "client-id");

	let upstream_state = query_param(&authorize_url, "state");
	let outcome = broker
		.complete_callback(&upstream_state, "upstream-code")
		.await
		.expect("Callback should complete successfully.");

	token_mock.assert_async().await;
	userinfo_mock.assert_async().await;

	let CallbackOutcome::Redirect(back) = outcome else {
		panic!("Downstream flows should end in a redirect.");
	};

	assert!(back.as_str().starts_with("https://client.example/cb"));
	assert_eq!(query_param(&back, "state"), "client-state");

	let code = query_param(&back, "code");
	let grant = broker
		.exchange_downstream_code(&code, VERIFIER, &redirect_uri)
		.await
		.expect("Downstream exchange should succeed.");

	assert_eq!(grant.token_type, "Bearer");

	let state = Arc::new(AppState::new(
		broker,
		Arc::new(StaticSchedulerBackend),
		Url::parse("https://proxy.example").expect("Base URL fixture should parse successfully."),
		Vec::new(),
		None,
	));
	let addr = spawn_app(state).await;
	let client = ReqwestClient::new();
	let response = client
		.post(format!("http://{addr}/mcp"))
		.bearer_auth(&grant.access_token)
		.json(&json!({
			"jsonrpc": "2.0",
			"id": 1,
			"method": "tools/call",
			"params": { "name": "queue_summary", "arguments": {} },
		}))
		.send()
		.await
		.expect("MCP request should be delivered.");

	assert_eq!(response.status().as_u16(), 200);

	let body: Value = response.json().await.expect("MCP response should be JSON.");

	assert_eq!(body["jsonrpc"], "2.0");
	assert!(body["result"]["isError"].is_null());

	let text = body["result"]["content"][0]["text"]
		.as_str()
		.expect("Tool output should be text content.");

	assert!(text.contains("member@example.com"));
	assert!(text.contains("queue_summary"));
}

#[tokio::test]
async fn onboarding_stores_a_credential_without_redirecting() {
	let server = MockServer::start_async().await;
	let descriptor = mock_descriptor(&server);
	let (broker, _store) = build_test_broker(descriptor, "https://proxy.example");
	let _token_mock = server
		.mock_async(|when, then| {
			when.method(POST).path("/token");
			then.status(200).header("content-type", "application/json").json_body(json!({
				"access_token": "onboard-access",
				"token_type": "bearer",
				"expires_in": 1800,
			}));
		})
		.await;
	let _userinfo_mock = server
		.mock_async(|when, then| {
			when.method(GET).path("/userinfo");
			then.status(200).header("content-type", "application/json").json_body(json!({
				"sub": "op42",
				"email": "operator@example.com",
			}));
		})
		.await;
	let authorize_url = broker.start_onboarding();
	let scope = query_param(&authorize_url, "scope");

	assert!(scope.contains("w_member_social"));
	assert!(scope.contains("email"));

	let upstream_state = query_param(&authorize_url, "state");
	let outcome = broker
		.complete_callback(&upstream_state, "onboard-code")
		.await
		.expect("Onboarding callback should complete successfully.");
	let CallbackOutcome::Onboarded(principal) = outcome else {
		panic!("Onboarding flows should not produce a redirect.");
	};

	assert_eq!(principal.as_ref(), "operator@example.com");

	let stored = broker
		.fresh_credential(&principal)
		.await
		.expect("Stored onboarding credential should be retrievable.");

	assert_eq!(stored.principal, principal);
}
