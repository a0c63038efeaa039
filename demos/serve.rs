//! Boots the full proxy against the real LinkedIn endpoints: file-backed
//! credential store, HTTP surface, and the background publisher loop.
//!
//! Requires `LINKEDIN_OAUTH_CLIENT_ID`, `LINKEDIN_OAUTH_CLIENT_SECRET`,
//! `SESSION_SECRET`, and `BASE_URL` in the environment (a `.env` file works).

// std
use std::sync::Arc;
// crates.io
use color_eyre::Result;
use tokio::net::TcpListener;
// self
use linkedin_scheduler_remote::{
	bind::BoundCredential,
	broker::Broker,
	config::Config,
	crypto::CredentialCipher,
	daemon::{self, HookFuture, PublisherHook},
	mcp::StaticSchedulerBackend,
	provider::ProviderDescriptor,
	server::{AppState, router},
	store::FileStore,
};

struct LoggingHook;
impl PublisherHook for LoggingHook {
	fn run_once<'a>(&'a self, credential: &'a BoundCredential) -> HookFuture<'a> {
		Box::pin(async move {
			tracing::info!(principal = %credential.principal, "publisher pass");

			Ok(())
		})
	}
}

#[tokio::main]
async fn main() -> Result<()> {
	color_eyre::install()?;

	let _ = dotenvy::dotenv();

	tracing_subscriber::fmt()
		.with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
		.init();

	let config = Config::from_env()?;
	let store = Arc::new(FileStore::open(config.data_dir.join("credentials.json"))?);
	let descriptor = ProviderDescriptor::linkedin()?;
	let broker = Arc::new(Broker::new(
		store,
		descriptor,
		CredentialCipher::from_secret(&config.session_secret),
		&config.client_id,
		&config.client_secret,
		&config.base_url,
	)?);
	let state = Arc::new(AppState::new(
		broker.clone(),
		Arc::new(StaticSchedulerBackend),
		config.base_url.clone(),
		config.allowed_hosts(),
		config.onboard_secret.clone(),
	));

	tokio::spawn(daemon::run_publisher(broker, Arc::new(LoggingHook), config.poll_interval));

	let listener = TcpListener::bind(config.bind_addr()).await?;

	tracing::info!(addr = %config.bind_addr(), "serving");

	axum::serve(listener, router(state)).await?;

	Ok(())
}
