#![cfg(feature = "test")]

// crates.io
use serde_json::{Value, json};
// self
use linkedin_scheduler_remote::{
	_preludet::*,
	auth::{AccessGrant, CredentialRecord, PrincipalId, ProviderId, ScopeSet},
	crypto::CredentialCipher,
	provider::ProviderDescriptor,
	server::AppState,
	store::{CredentialStore, MemoryStore},
};

const CIPHER_SECRET: &str = "test-session-secret";

async fn seed_credential(store: &MemoryStore, principal: &PrincipalId, access: &str) {
	let cipher = CredentialCipher::from_secret(CIPHER_SECRET);
	let record = CredentialRecord::builder(
		principal.clone(),
		ProviderId::new("linkedin").expect("Provider fixture should be valid."),
		ScopeSet::new(["w_member_social"]).expect("Scope fixture should be valid."),
	)
	.access_token(cipher.seal_secret(access).expect("Sealing the fixture should succeed."))
	.expires_in(Duration::hours(1))
	.build()
	.expect("Credential fixture should build successfully.");

	store.save(record).await.expect("Seeding the store should succeed.");
}

async fn seed_grant(store: &MemoryStore, principal: &PrincipalId, bearer: &str, lifetime: Duration) {
	let grant =
		AccessGrant::issue(bearer, principal.clone(), OffsetDateTime::now_utc() - Duration::minutes(1), lifetime);

	store.save_grant(grant).await.expect("Seeding the grant should succeed.");
}

async fn spawn_seeded_app() -> (std::net::SocketAddr, Arc<MemoryStore>) {
	let descriptor =
		ProviderDescriptor::linkedin().expect("LinkedIn descriptor should build successfully.");
	let (broker, store) = build_test_broker(descriptor, "https://proxy.example");
	let state = Arc::new(AppState::new(
		broker,
		Arc::new(StaticSchedulerBackend),
		Url::parse("https://proxy.example").expect("Base URL fixture should parse successfully."),
		Vec::new(),
		None,
	));
	let addr = spawn_app(state).await;

	(addr, store)
}

fn tool_call(id: u64, tool: &str) -> Value {
	json!({
		"jsonrpc": "2.0",
		"id": id,
		"method": "tools/call",
		"params": { "name": tool, "arguments": {} },
	})
}

#[tokio::test]
async fn grant_without_stored_credential_is_forbidden() {
	let (addr, store) = spawn_seeded_app().await;
	let principal =
		PrincipalId::new("member@example.com").expect("Principal fixture should be valid.");

	seed_grant(&store, &principal, "bearer-orphan", Duration::hours(1)).await;

	let response = ReqwestClient::new()
		.post(format!("http://{addr}/mcp"))
		.bearer_auth("bearer-orphan")
		.json(&tool_call(1, "queue_summary"))
		.send()
		.await
		.expect("MCP request should be delivered.");

	assert_eq!(response.status().as_u16(), 403);
}

#[tokio::test]
async fn expired_grants_stop_authenticating() {
	let (addr, store) = spawn_seeded_app().await;
	let principal =
		PrincipalId::new("member@example.com").expect("Principal fixture should be valid.");

	seed_credential(&store, &principal, "upstream-access").await;
	seed_grant(&store, &principal, "bearer-expired", Duration::seconds(30)).await;

	let response = ReqwestClient::new()
		.post(format!("http://{addr}/mcp"))
		.bearer_auth("bearer-expired")
		.json(&tool_call(1, "queue_summary"))
		.send()
		.await
		.expect("MCP request should be delivered.");

	assert_eq!(response.status().as_u16(), 401);
	assert_eq!(
		response
			.headers()
			.get("www-authenticate")
			.expect("Unauthorized responses should carry WWW-Authenticate."),
		"Bearer"
	);
}

#[tokio::test]
async fn tool_calls_are_isolated_per_principal() {
	let (addr, store) = spawn_seeded_app().await;
	let alice = PrincipalId::new("alice@example.com").expect("Principal fixture should be valid.");
	let bob = PrincipalId::new("bob@example.com").expect("Principal fixture should be valid.");

	seed_credential(&store, &alice, "upstream-alice").await;
	seed_credential(&store, &bob, "upstream-bob").await;
	seed_grant(&store, &alice, "bearer-alice", Duration::hours(1)).await;
	seed_grant(&store, &bob, "bearer-bob", Duration::hours(1)).await;

	let client = ReqwestClient::new();

	for (bearer, principal) in
		[("bearer-alice", "alice@example.com"), ("bearer-bob", "bob@example.com")]
	{
		let response = client
			.post(format!("http://{addr}/mcp"))
			.bearer_auth(bearer)
			.json(&tool_call(1, "list_scheduled_posts"))
			.send()
			.await
			.expect("MCP request should be delivered.");

		assert_eq!(response.status().as_u16(), 200);

		let body: Value = response.json().await.expect("MCP response should be JSON.");
		let text = body["result"]["content"][0]["text"]
			.as_str()
			.expect("Tool output should be text content.");

		assert!(text.contains(principal), "tool output should echo the caller's principal");

		let other = if principal.starts_with("alice") { "bob@" } else { "alice@" };

		assert!(!text.contains(other), "tool output must not leak another principal");
	}
}

#[tokio::test]
async fn notifications_are_accepted_without_a_body() {
	let (addr, store) = spawn_seeded_app().await;
	let principal =
		PrincipalId::new("member@example.com").expect("Principal fixture should be valid.");

	seed_credential(&store, &principal, "upstream-access").await;
	seed_grant(&store, &principal, "bearer-member", Duration::hours(1)).await;

	let response = ReqwestClient::new()
		.post(format!("http://{addr}/mcp"))
		.bearer_auth("bearer-member")
		.json(&json!({ "jsonrpc": "2.0", "method": "notifications/initialized" }))
		.send()
		.await
		.expect("MCP request should be delivered.");

	assert_eq!(response.status().as_u16(), 202);
	assert!(response.bytes().await.expect("Response body should be readable.").is_empty());
}

#[tokio::test]
async fn malformed_bodies_yield_a_parse_error() {
	let (addr, store) = spawn_seeded_app().await;
	let principal =
		PrincipalId::new("member@example.com").expect("Principal fixture should be valid.");

	seed_credential(&store, &principal, "upstream-access").await;
	seed_grant(&store, &principal, "bearer-member", Duration::hours(1)).await;

	let response = ReqwestClient::new()
		.post(format!("http://{addr}/mcp"))
		.bearer_auth("bearer-member")
		.header("content-type", "application/json")
		.body("{not json")
		.send()
		.await
		.expect("MCP request should be delivered.");

	assert_eq!(response.status().as_u16(), 200);

	let body: Value = response.json().await.expect("Error response should be JSON.");

	assert_eq!(body["jsonrpc"], "2.0");
	assert_eq!(body["id"], Value::Null);
	assert_eq!(body["error"]["code"], -32700);
}

#[tokio::test]
async fn unknown_methods_report_method_not_found() {
	let (addr, store) = spawn_seeded_app().await;
	let principal =
		PrincipalId::new("member@example.com").expect("Principal fixture should be valid.");

	seed_credential(&store, &principal, "upstream-access").await;
	seed_grant(&store, &principal, "bearer-member", Duration::hours(1)).await;

	let response = ReqwestClient::new()
		.post(format!("http://{addr}/mcp"))
		.bearer_auth("bearer-member")
		.json(&json!({ "jsonrpc": "2.0", "id": 7, "method": "resources/list" }))
		.send()
		.await
		.expect("MCP request should be delivered.");

	assert_eq!(response.status().as_u16(), 200);

	let body: Value = response.json().await.expect("Error response should be JSON.");

	assert_eq!(body["id"], 7);
	assert_eq!(body["error"]["code"], -32601);
}
