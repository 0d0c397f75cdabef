// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! The local tunnel endpoint's own settings.
//!
//! Settings are created exactly once; the host key pair is generated at
//! initialization and never rewritten. Re-initializing an already-initialized
//! interface is an idempotent no-op that returns the stored settings.

use crate::config::ControlConfig;
use crate::error::{ControlError, Result};
use crate::sync::{ConfigSync, SyncState};
use chrono::{DateTime, Utc};
use ipnet::Ipv4Net;
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use tracing::instrument;
use warren_common::ip;
use warren_common::keys::{WgKeyPair, WgPrivateKey, WgPublicKey};
use warren_db::{InterfaceRowTuple, RegistryRepository};

#[derive(Debug, Clone, Serialize)]
pub struct InterfaceSettings {
	pub name: String,
	pub public_key: WgPublicKey,
	pub private_key: WgPrivateKey,
	pub listen_port: u16,
	pub subnet: Ipv4Net,
	pub advertised_endpoint: Option<String>,
	pub dns_servers: Vec<IpAddr>,
	pub mtu: Option<u16>,
	pub created_at: DateTime<Utc>,
}

impl InterfaceSettings {
	/// The interface's own address: the first usable host of its subnet.
	pub fn address(&self) -> Result<Ipv4Addr> {
		Ok(ip::interface_address(self.subnet)?)
	}
}

fn default_listen_port() -> u16 {
	51820
}

#[derive(Debug, Clone, Deserialize)]
pub struct InterfaceDraft {
	#[serde(default = "default_listen_port")]
	pub listen_port: u16,
	pub subnet: Ipv4Net,
	#[serde(default)]
	pub advertised_endpoint: Option<String>,
	#[serde(default)]
	pub dns_servers: Vec<IpAddr>,
	#[serde(default)]
	pub mtu: Option<u16>,
}

impl InterfaceDraft {
	pub fn new(subnet: Ipv4Net) -> Self {
		Self {
			listen_port: default_listen_port(),
			subnet,
			advertised_endpoint: None,
			dns_servers: Vec::new(),
			mtu: None,
		}
	}
}

/// Outcome of [`InterfaceService::initialize`]. `created` is false when the
/// interface already existed and the call degenerated to a read.
#[derive(Debug, Clone, Serialize)]
pub struct InitializedInterface {
	pub settings: InterfaceSettings,
	pub sync: SyncState,
	pub created: bool,
}

#[derive(Debug, Clone)]
struct InterfaceRow {
	name: String,
	private_key: String,
	public_key: String,
	listen_port: i64,
	subnet: String,
	advertised_endpoint: Option<String>,
	dns_servers: Option<String>,
	mtu: Option<i64>,
	created_at: String,
}

impl TryFrom<InterfaceRow> for InterfaceSettings {
	type Error = ControlError;

	fn try_from(row: InterfaceRow) -> Result<Self> {
		let subnet: Ipv4Net = row
			.subnet
			.parse()
			.map_err(|_| ControlError::Internal(format!("invalid stored subnet: {}", row.subnet)))?;

		let dns_servers = match row.dns_servers.as_deref() {
			None | Some("") => Vec::new(),
			Some(joined) => joined
				.split(',')
				.map(|s| {
					s.trim()
						.parse()
						.map_err(|_| ControlError::Internal(format!("invalid stored DNS server: {s}")))
				})
				.collect::<Result<Vec<IpAddr>>>()?,
		};

		Ok(InterfaceSettings {
			name: row.name,
			public_key: WgPublicKey::from_base64(&row.public_key)?,
			private_key: WgPrivateKey::from_base64(&row.private_key)?,
			listen_port: row.listen_port as u16,
			subnet,
			advertised_endpoint: row.advertised_endpoint,
			dns_servers,
			mtu: row.mtu.map(|m| m as u16),
			created_at: parse_datetime(&row.created_at)?,
		})
	}
}

fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
	DateTime::parse_from_rfc3339(s)
		.map(|dt| dt.with_timezone(&Utc))
		.or_else(|_| {
			chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
				.map(|ndt| ndt.and_utc())
				.map_err(|_| ControlError::Internal(format!("invalid datetime: {s}")))
		})
}

fn validate_draft(draft: &InterfaceDraft) -> Result<()> {
	if draft.listen_port == 0 {
		return Err(ControlError::Validation(
			"listen port must be non-zero".to_string(),
		));
	}
	// Rejects subnets too small to hold the interface plus at least one peer.
	ip::interface_address(draft.subnet.trunc())?;
	if let Some(endpoint) = &draft.advertised_endpoint {
		if endpoint.trim().is_empty() {
			return Err(ControlError::Validation(
				"advertised endpoint must not be empty".to_string(),
			));
		}
	}
	if draft.mtu == Some(0) {
		return Err(ControlError::Validation("MTU must be non-zero".to_string()));
	}
	Ok(())
}

#[derive(Clone)]
pub struct InterfaceService {
	repo: RegistryRepository,
	sync: Arc<ConfigSync>,
	config: Arc<ControlConfig>,
}

impl InterfaceService {
	pub fn new(repo: RegistryRepository, sync: Arc<ConfigSync>, config: Arc<ControlConfig>) -> Self {
		Self { repo, sync, config }
	}

	/// Create the interface settings and bring the device up with an empty
	/// peer set. Idempotent: if settings already exist they are returned
	/// untouched and the driver is not called.
	#[instrument(skip(self, draft), fields(subnet = %draft.subnet, listen_port = %draft.listen_port))]
	pub async fn initialize(&self, draft: InterfaceDraft) -> Result<InitializedInterface> {
		validate_draft(&draft)?;

		let _guard = self.sync.lock().await;

		if let Some(existing) = self.get().await? {
			tracing::debug!(name = %existing.name, "interface already initialized");
			return Ok(InitializedInterface {
				settings: existing,
				sync: SyncState::Synced,
				created: false,
			});
		}

		let keypair = WgKeyPair::generate();
		let subnet = draft.subnet.trunc();
		let dns = if draft.dns_servers.is_empty() {
			None
		} else {
			Some(
				draft
					.dns_servers
					.iter()
					.map(ToString::to_string)
					.collect::<Vec<_>>()
					.join(","),
			)
		};

		self
			.repo
			.insert_interface(
				&self.config.interface,
				keypair.private_key().to_base64().expose(),
				&keypair.public_key().to_base64(),
				i64::from(draft.listen_port),
				&subnet.to_string(),
				draft.advertised_endpoint.as_deref(),
				dns.as_deref(),
				draft.mtu.map(i64::from),
			)
			.await?;

		let settings = self.require().await?;
		let sync = self.sync.push(&settings, &[]).await?;

		tracing::debug!(public_key = %settings.public_key, "interface initialized");
		Ok(InitializedInterface {
			settings,
			sync,
			created: true,
		})
	}

	#[instrument(skip(self))]
	pub async fn get(&self) -> Result<Option<InterfaceSettings>> {
		let row = self.repo.get_interface(&self.config.interface).await?;

		match row {
			Some(tuple) => Ok(Some(into_row(tuple).try_into()?)),
			None => Ok(None),
		}
	}

	/// Like [`get`](Self::get), but absence is an error. Mutating peer
	/// operations require configured settings.
	pub async fn require(&self) -> Result<InterfaceSettings> {
		self
			.get()
			.await?
			.ok_or(ControlError::InterfaceNotConfigured)
	}
}

fn into_row(tuple: InterfaceRowTuple) -> InterfaceRow {
	let (
		name,
		private_key,
		public_key,
		listen_port,
		subnet,
		advertised_endpoint,
		dns_servers,
		mtu,
		created_at,
	) = tuple;
	InterfaceRow {
		name,
		private_key,
		public_key,
		listen_port,
		subnet,
		advertised_endpoint,
		dns_servers,
		mtu,
		created_at,
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::testing::{memory_pool, FakeDriver};

	async fn service(driver: Arc<FakeDriver>) -> InterfaceService {
		let pool = memory_pool().await;
		let repo = RegistryRepository::new(pool);
		let sync = Arc::new(ConfigSync::new(driver));
		let config = Arc::new(ControlConfig::new("wg0"));
		InterfaceService::new(repo, sync, config)
	}

	fn draft() -> InterfaceDraft {
		InterfaceDraft::new("10.8.0.0/24".parse().unwrap())
	}

	#[tokio::test]
	async fn initialize_creates_settings_and_applies_config() {
		let driver = Arc::new(FakeDriver::new());
		let service = service(driver.clone()).await;

		let init = service.initialize(draft()).await.unwrap();
		assert!(init.created);
		assert_eq!(init.sync, SyncState::Synced);
		assert_eq!(init.settings.listen_port, 51820);

		let applied = driver.last_applied().unwrap();
		assert!(applied.contains("[Interface]"));
		assert!(applied.contains("Address = 10.8.0.1/24"));
		assert!(!applied.contains("[Peer]"));
	}

	#[tokio::test]
	async fn initialize_is_idempotent() {
		let driver = Arc::new(FakeDriver::new());
		let service = service(driver.clone()).await;

		let first = service.initialize(draft()).await.unwrap();
		let second = service.initialize(draft()).await.unwrap();

		assert!(!second.created);
		// The host key pair is never regenerated.
		assert_eq!(first.settings.public_key, second.settings.public_key);
		// The no-op path does not touch the driver again.
		assert_eq!(driver.applied().len(), 1);
	}

	#[tokio::test]
	async fn tiny_subnet_is_rejected() {
		let service = service(Arc::new(FakeDriver::new())).await;
		let draft = InterfaceDraft::new("10.8.0.0/31".parse().unwrap());

		let err = service.initialize(draft).await.unwrap_err();
		assert!(matches!(err, ControlError::Validation(_)));
	}

	#[tokio::test]
	async fn empty_endpoint_is_rejected() {
		let service = service(Arc::new(FakeDriver::new())).await;
		let mut draft = draft();
		draft.advertised_endpoint = Some("  ".to_string());

		let err = service.initialize(draft).await.unwrap_err();
		assert!(matches!(err, ControlError::Validation(_)));
	}

	#[tokio::test]
	async fn require_before_initialize_fails() {
		let service = service(Arc::new(FakeDriver::new())).await;
		let err = service.require().await.unwrap_err();
		assert!(matches!(err, ControlError::InterfaceNotConfigured));
	}

	#[tokio::test]
	async fn dns_servers_roundtrip_through_the_store() {
		let service = service(Arc::new(FakeDriver::new())).await;
		let mut draft = draft();
		draft.dns_servers = vec!["1.1.1.1".parse().unwrap(), "9.9.9.9".parse().unwrap()];

		service.initialize(draft).await.unwrap();
		let settings = service.require().await.unwrap();
		assert_eq!(settings.dns_servers.len(), 2);
		assert_eq!(settings.dns_servers[0].to_string(), "1.1.1.1");
	}
}
