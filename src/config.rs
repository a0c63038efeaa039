//! Environment-driven configuration.
//!
//! Every setting is read from the process environment so deployments stay
//! twelve-factor. Required variables:
//! - `LINKEDIN_OAUTH_CLIENT_ID` / `LINKEDIN_OAUTH_CLIENT_SECRET`
//! - `SESSION_SECRET` key material for credential sealing
//! - `BASE_URL` public origin the proxy is reachable at
//!
//! Optional variables: `HOST` (default `127.0.0.1`), `PORT` (default `8002`),
//! `ONBOARD_SECRET` (unset or empty disables onboarding), `DATA_DIR` (default
//! `data`), `POLL_INTERVAL_SECONDS` (default `60`), and
//! `ADDITIONAL_ALLOWED_HOSTS` (comma-separated).

// std
use std::{env, path::PathBuf, time::Duration as StdDuration};
// self
use crate::{_prelude::*, error::ConfigError};

const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 8002;
const DEFAULT_DATA_DIR: &str = "data";
const DEFAULT_POLL_INTERVAL_SECS: u64 = 60;

/// Runtime configuration assembled from the environment.
#[derive(Clone, Debug)]
pub struct Config {
	/// Upstream OAuth application client id.
	pub client_id: String,
	/// Upstream OAuth application client secret.
	pub client_secret: String,
	/// Key material for the credential cipher.
	pub session_secret: String,
	/// Public origin the proxy advertises and derives its callback from.
	pub base_url: Url,
	/// Listen address.
	pub host: String,
	/// Listen port.
	pub port: u16,
	/// Shared secret for the onboarding route; `None` disables it.
	pub onboard_secret: Option<String>,
	/// Directory holding the persisted credential snapshot.
	pub data_dir: PathBuf,
	/// Interval between background publisher passes.
	pub poll_interval: StdDuration,
	/// Extra hostnames accepted by the Host allowlist.
	pub additional_allowed_hosts: Vec<String>,
}
impl Config {
	/// Reads the configuration from the process environment.
	pub fn from_env() -> Result<Self> {
		Self::from_lookup(|name| env::var(name).ok())
	}

	fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
		let required = |name: &'static str| {
			lookup(name).filter(|v| !v.is_empty()).ok_or(ConfigError::MissingEnv { name })
		};
		let optional = |name: &str| lookup(name).filter(|v| !v.is_empty());
		let client_id = required("LINKEDIN_OAUTH_CLIENT_ID")?;
		let client_secret = required("LINKEDIN_OAUTH_CLIENT_SECRET")?;
		let session_secret = required("SESSION_SECRET")?;
		let base_url = required("BASE_URL")?;
		let base_url = Url::parse(&base_url).map_err(|e| ConfigError::InvalidEnv {
			name: "BASE_URL",
			message: e.to_string(),
		})?;
		let host = optional("HOST").unwrap_or_else(|| DEFAULT_HOST.into());
		let port = match optional("PORT") {
			Some(value) => value.parse().map_err(|_| ConfigError::InvalidEnv {
				name: "PORT",
				message: "expected a TCP port number".into(),
			})?,
			None => DEFAULT_PORT,
		};
		let onboard_secret = optional("ONBOARD_SECRET");
		let data_dir = optional("DATA_DIR").unwrap_or_else(|| DEFAULT_DATA_DIR.into()).into();
		let poll_interval = match optional("POLL_INTERVAL_SECONDS") {
			Some(value) => {
				let secs: u64 = value.parse().map_err(|_| ConfigError::InvalidEnv {
					name: "POLL_INTERVAL_SECONDS",
					message: "expected a positive number of seconds".into(),
				})?;

				if secs == 0 {
					return Err(ConfigError::InvalidEnv {
						name: "POLL_INTERVAL_SECONDS",
						message: "expected a positive number of seconds".into(),
					}
					.into());
				}

				StdDuration::from_secs(secs)
			},
			None => StdDuration::from_secs(DEFAULT_POLL_INTERVAL_SECS),
		};
		let additional_allowed_hosts = optional("ADDITIONAL_ALLOWED_HOSTS")
			.map(|value| {
				value
					.split(',')
					.map(str::trim)
					.filter(|host| !host.is_empty())
					.map(str::to_owned)
					.collect()
			})
			.unwrap_or_default();

		Ok(Self {
			client_id,
			client_secret,
			session_secret,
			base_url,
			host,
			port,
			onboard_secret,
			data_dir,
			poll_interval,
			additional_allowed_hosts,
		})
	}

	/// Hostnames the HTTP surface should accept, lowercased and deduplicated.
	///
	/// Always contains the `BASE_URL` host and the listen host, plus any
	/// entries from `ADDITIONAL_ALLOWED_HOSTS`.
	pub fn allowed_hosts(&self) -> Vec<String> {
		let mut hosts = Vec::new();

		if let Some(host) = self.base_url.host_str() {
			hosts.push(host.to_ascii_lowercase());
		}

		hosts.push(self.host.to_ascii_lowercase());
		hosts.extend(self.additional_allowed_hosts.iter().map(|host| host.to_ascii_lowercase()));
		hosts.sort();
		hosts.dedup();

		hosts
	}

	/// Socket address string to bind the listener to.
	pub fn bind_addr(&self) -> String {
		format!("{}:{}", self.host, self.port)
	}
}
