//! HTTP/OAuth proxy that re-exposes a LinkedIn post-scheduling MCP tool server,
//! adding LinkedIn's three-party OAuth 2.0 flow, encrypted credential storage, and
//! per-request credential injection.

#![deny(clippy::all, missing_docs, unused_crate_dependencies)]

pub mod auth;
pub mod bind;
pub mod broker;
pub mod config;
pub mod crypto;
pub mod daemon;
pub mod error;
pub mod mcp;
pub mod oauth;
pub mod obs;
pub mod provider;
pub mod server;
pub mod session;
pub mod store;
#[cfg(any(test, feature = "test"))]
pub mod _preludet {
	//! Convenience re-exports and helpers for integration tests; enabled via `cfg(test)` or the
	//! `test` crate feature.

	pub use crate::_prelude::*;

	// std
	use std::net::SocketAddr;
	// crates.io
	use tokio::net::TcpListener;
	// self
	pub use crate::mcp::StaticSchedulerBackend;
	use crate::{
		broker::Broker,
		crypto::CredentialCipher,
		provider::ProviderDescriptor,
		server::{AppState, router},
		store::MemoryStore,
	};

	/// Builds a reqwest HTTP client that accepts the self-signed certificates produced by
	/// `httpmock` during tests.
	pub fn test_http_client() -> ReqwestClient {
		ReqwestClient::builder()
			.danger_accept_invalid_certs(true)
			.danger_accept_invalid_hostnames(true)
			.redirect(reqwest::redirect::Policy::none())
			.build()
			.expect("Failed to build insecure Reqwest client for tests.")
	}

	/// Constructs a [`Broker`] backed by an in-memory store and the insecure test transport.
	pub fn build_test_broker(
		descriptor: ProviderDescriptor,
		base_url: &str,
	) -> (Arc<Broker>, Arc<MemoryStore>) {
		let store_backend = Arc::new(MemoryStore::default());
		let base_url = Url::parse(base_url).expect("Base URL fixture should parse successfully.");
		let broker = Broker::new(
			store_backend.clone(),
			descriptor,
			CredentialCipher::from_secret("test-session-secret"),
			"client-id",
			"client-secret",
			&base_url,
		)
		.expect("Failed to build test broker.")
		.with_http_client(test_http_client());

		(Arc::new(broker), store_backend)
	}

	/// Binds the router to an ephemeral local port and serves it on a background task.
	pub async fn spawn_app(state: Arc<AppState>) -> SocketAddr {
		let listener = TcpListener::bind("127.0.0.1:0")
			.await
			.expect("Failed to bind test listener on an ephemeral port.");
		let addr = listener.local_addr().expect("Failed to read test listener address.");

		tokio::spawn(async move {
			axum::serve(listener, router(state))
				.await
				.expect("Test server should serve until the runtime shuts down.");
		});

		addr
	}
}

mod _prelude {
	pub use std::{
		collections::HashMap,
		error::Error as StdError,
		fmt::{Debug, Display, Formatter, Result as FmtResult},
		future::Future,
		pin::Pin,
		str::FromStr,
		sync::Arc,
	};

	pub use async_lock::Mutex as AsyncMutex;
	pub use parking_lot::{Mutex, RwLock};
	pub use reqwest::{Client as ReqwestClient, Error as ReqwestError};
	pub use serde::{Deserialize, Serialize};
	pub use thiserror::Error as ThisError;
	pub use time::{Duration, OffsetDateTime};
	pub use url::Url;

	pub use crate::error::{Error, Result};
}

pub use url;
#[cfg(test)] use {color_eyre as _, dotenvy as _, httpmock as _, tracing_subscriber as _};
