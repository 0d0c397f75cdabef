// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Peer lifecycle: allocate, persist, and reconcile the live device config.
//!
//! Mutations run under the interface mutation lock so two concurrent creates
//! can never read the same free-address snapshot. The registry's unique
//! constraints stay on as a backstop: a lost race surfaces as a conflict and
//! is retried once with a recomputed allocation, never double-assigned.
//!
//! A peer's keys and address are immutable after creation; rotation is
//! delete-and-recreate.

use crate::conf;
use crate::error::{ControlError, Result};
use crate::interface::{InterfaceService, InterfaceSettings};
use crate::sync::{ConfigSync, SyncState};
use chrono::{DateTime, Utc};
use ipnet::IpNet;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::net::Ipv4Addr;
use std::sync::Arc;
use tracing::instrument;
use warren_common::ip;
use warren_common::keys::{WgKeyPair, WgPresharedKey, WgPrivateKey, WgPublicKey};
use warren_db::{DbError, PeerRowTuple, RegistryRepository};

/// Store-assigned peer identifier, unique for the lifetime of the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerId(i64);

impl PeerId {
	pub fn from_i64(id: i64) -> Self {
		Self(id)
	}

	pub fn as_i64(&self) -> i64 {
		self.0
	}
}

impl fmt::Display for PeerId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.0)
	}
}

impl std::str::FromStr for PeerId {
	type Err = std::num::ParseIntError;

	fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
		Ok(Self(s.parse()?))
	}
}

#[derive(Debug, Clone, Serialize)]
pub struct Peer {
	pub id: PeerId,
	pub name: String,
	pub public_key: WgPublicKey,
	pub private_key: WgPrivateKey,
	pub preshared_key: Option<WgPresharedKey>,
	pub address: Ipv4Addr,
	pub allowed_ranges: Vec<IpNet>,
	pub keepalive_interval: Option<u16>,
	pub enabled: bool,
	pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PeerDraft {
	pub name: String,
	/// Pin a specific address instead of taking the allocator's pick.
	#[serde(default)]
	pub address: Option<Ipv4Addr>,
	/// Ranges the peer routes through the tunnel; empty means everything.
	#[serde(default)]
	pub allowed_ranges: Vec<IpNet>,
	#[serde(default)]
	pub keepalive_interval: Option<u16>,
}

impl PeerDraft {
	pub fn new(name: impl Into<String>) -> Self {
		Self {
			name: name.into(),
			address: None,
			allowed_ranges: Vec::new(),
			keepalive_interval: None,
		}
	}
}

/// Outcome of a create: the stored peer plus whether the driver accepted the
/// re-rendered configuration. `SyncState::Degraded` means the peer exists but
/// the live device lags the registry until the next successful sync.
#[derive(Debug, Clone, Serialize)]
pub struct CreatedPeer {
	pub peer: Peer,
	pub sync: SyncState,
}

#[derive(Debug, Clone)]
struct PeerRow {
	id: i64,
	name: String,
	public_key: String,
	private_key: String,
	preshared_key: Option<String>,
	address: String,
	allowed_ranges: Option<String>,
	keepalive_interval: Option<i64>,
	enabled: i64,
	created_at: String,
}

impl TryFrom<PeerRow> for Peer {
	type Error = ControlError;

	fn try_from(row: PeerRow) -> Result<Self> {
		let address: Ipv4Addr = row
			.address
			.parse()
			.map_err(|_| ControlError::Internal(format!("invalid stored address: {}", row.address)))?;

		let allowed_ranges = match row.allowed_ranges.as_deref() {
			None | Some("") => Vec::new(),
			Some(joined) => joined
				.split(',')
				.map(|s| {
					s.trim()
						.parse()
						.map_err(|_| ControlError::Internal(format!("invalid stored range: {s}")))
				})
				.collect::<Result<Vec<IpNet>>>()?,
		};

		Ok(Peer {
			id: PeerId(row.id),
			name: row.name,
			public_key: WgPublicKey::from_base64(&row.public_key)?,
			private_key: WgPrivateKey::from_base64(&row.private_key)?,
			preshared_key: row
				.preshared_key
				.as_deref()
				.map(WgPresharedKey::from_base64)
				.transpose()?,
			address,
			allowed_ranges,
			keepalive_interval: row.keepalive_interval.map(|k| k as u16),
			enabled: row.enabled != 0,
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

fn validate_draft(draft: &PeerDraft, settings: &InterfaceSettings) -> Result<()> {
	if draft.name.trim().is_empty() {
		return Err(ControlError::Validation(
			"peer name must not be empty".to_string(),
		));
	}
	if draft.keepalive_interval == Some(0) {
		return Err(ControlError::Validation(
			"keepalive interval must be positive".to_string(),
		));
	}
	if let Some(addr) = draft.address {
		ip::require_usable_host(settings.subnet, settings.address()?, addr)?;
	}
	Ok(())
}

#[derive(Clone)]
pub struct PeerService {
	repo: RegistryRepository,
	interfaces: InterfaceService,
	sync: Arc<ConfigSync>,
}

impl PeerService {
	pub fn new(repo: RegistryRepository, interfaces: InterfaceService, sync: Arc<ConfigSync>) -> Self {
		Self {
			repo,
			interfaces,
			sync,
		}
	}

	/// Create a peer: generate keys, allocate the lowest free address,
	/// persist, then push the re-rendered configuration to the driver.
	///
	/// Failures before the insert leave no trace. Failures after the insert
	/// (render/apply) keep the peer and report `SyncState::Degraded`; the
	/// driver state is a cache that the next sync rebuilds from the registry.
	#[instrument(skip(self, draft), fields(name = %draft.name))]
	pub async fn create(&self, draft: PeerDraft) -> Result<CreatedPeer> {
		let settings = self.interfaces.require().await?;
		validate_draft(&draft, &settings)?;

		let _guard = self.sync.lock().await;

		let keypair = WgKeyPair::generate();
		let preshared = WgPresharedKey::generate();
		let public_b64 = keypair.public_key().to_base64();
		let private_b64 = keypair.private_key().to_base64();
		let preshared_b64 = preshared.to_base64();
		let reserved = settings.address()?;
		let ranges = if draft.allowed_ranges.is_empty() {
			None
		} else {
			Some(
				draft
					.allowed_ranges
					.iter()
					.map(ToString::to_string)
					.collect::<Vec<_>>()
					.join(","),
			)
		};

		let mut retried = false;
		let id = loop {
			let taken = self.taken_addresses().await?;
			let address = match draft.address {
				Some(addr) if taken.contains(&addr) => {
					return Err(ControlError::Conflict(format!(
						"address {addr} is already assigned"
					)));
				}
				Some(addr) => addr,
				None => ip::next_free_address(settings.subnet, reserved, &taken)?,
			};

			match self
				.repo
				.insert_peer(
					&draft.name,
					&public_b64,
					private_b64.expose(),
					Some(preshared_b64.expose().as_str()),
					&address.to_string(),
					ranges.as_deref(),
					draft.keepalive_interval.map(i64::from),
				)
				.await
			{
				Ok(id) => break id,
				Err(DbError::Conflict(msg)) if draft.address.is_none() && !retried => {
					// Lost a race despite the lock (e.g. an out-of-band writer).
					// Recompute the allocation once against the fresh snapshot.
					retried = true;
					tracing::warn!(%msg, "allocation conflict, retrying with a fresh snapshot");
					continue;
				}
				Err(err) => return Err(err.into()),
			}
		};

		let peer = self.get(PeerId(id)).await?;
		let sync = self.push_current(&settings).await?;

		tracing::debug!(peer_id = %peer.id, address = %peer.address, "peer created");
		Ok(CreatedPeer { peer, sync })
	}

	/// Delete a peer and push the shrunken configuration. The freed address is
	/// eligible for the very next allocation.
	#[instrument(skip(self), fields(%id))]
	pub async fn delete(&self, id: PeerId) -> Result<SyncState> {
		let settings = self.interfaces.require().await?;

		let _guard = self.sync.lock().await;

		let rows_affected = self.repo.delete_peer(id.as_i64()).await?;
		if rows_affected == 0 {
			return Err(ControlError::PeerNotFound);
		}

		let sync = self.push_current(&settings).await?;

		tracing::debug!(peer_id = %id, "peer deleted");
		Ok(sync)
	}

	#[instrument(skip(self), fields(%id))]
	pub async fn get(&self, id: PeerId) -> Result<Peer> {
		let row = self.repo.get_peer(id.as_i64()).await?;

		match row {
			Some(tuple) => into_row(tuple).try_into(),
			None => Err(ControlError::PeerNotFound),
		}
	}

	#[instrument(skip(self))]
	pub async fn list(&self) -> Result<Vec<Peer>> {
		let rows = self.repo.list_peers().await?;

		rows
			.into_iter()
			.map(|tuple| into_row(tuple).try_into())
			.collect()
	}

	/// The peer-side configuration file, rendered for the peer's own client.
	/// This is the only surface that re-emits the peer's private key.
	#[instrument(skip(self), fields(%id))]
	pub async fn config_text(&self, id: PeerId) -> Result<String> {
		let peer = self.get(id).await?;
		let settings = self.interfaces.require().await?;
		Ok(conf::render_peer_config(&peer, &settings))
	}

	async fn taken_addresses(&self) -> Result<HashSet<Ipv4Addr>> {
		let rows = self.repo.list_addresses().await?;
		Ok(
			rows
				.into_iter()
				.filter_map(|(raw,)| match raw.parse() {
					Ok(addr) => Some(addr),
					Err(_) => {
						tracing::warn!(address = %raw, "skipping unparseable stored address");
						None
					}
				})
				.collect(),
		)
	}

	async fn push_current(&self, settings: &InterfaceSettings) -> Result<SyncState> {
		let peers = self.list().await?;
		self.sync.push(settings, &peers).await
	}
}

fn into_row(tuple: PeerRowTuple) -> PeerRow {
	let (
		id,
		name,
		public_key,
		private_key,
		preshared_key,
		address,
		allowed_ranges,
		keepalive_interval,
		enabled,
		created_at,
	) = tuple;
	PeerRow {
		id,
		name,
		public_key,
		private_key,
		preshared_key,
		address,
		allowed_ranges,
		keepalive_interval,
		enabled,
		created_at,
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::testing::{init_default, services};

	#[tokio::test]
	async fn create_requires_an_initialized_interface() {
		let (control, _driver) = services().await;

		let err = control.peers.create(PeerDraft::new("early")).await.unwrap_err();
		assert!(matches!(err, ControlError::InterfaceNotConfigured));
	}

	#[tokio::test]
	async fn create_allocates_generates_and_syncs() {
		let (control, driver) = services().await;
		init_default(&control).await;

		let created = control.peers.create(PeerDraft::new("laptop")).await.unwrap();
		assert_eq!(created.sync, SyncState::Synced);
		assert_eq!(created.peer.address.to_string(), "10.8.0.2");
		assert!(created.peer.enabled);
		assert!(created.peer.preshared_key.is_some());

		let applied = driver.last_applied().unwrap();
		assert!(applied.contains(&created.peer.public_key.to_base64()));
		assert!(applied.contains("AllowedIPs = 10.8.0.2/32"));
		// The device config never carries peer private keys.
		assert!(!applied.contains(created.peer.private_key.to_base64().expose()));
	}

	#[tokio::test]
	async fn blank_name_is_rejected_before_any_mutation() {
		let (control, driver) = services().await;
		init_default(&control).await;
		let baseline = driver.applied().len();

		let err = control.peers.create(PeerDraft::new("   ")).await.unwrap_err();
		assert!(matches!(err, ControlError::Validation(_)));
		assert!(control.peers.list().await.unwrap().is_empty());
		assert_eq!(driver.applied().len(), baseline);
	}

	#[tokio::test]
	async fn zero_keepalive_is_rejected() {
		let (control, _driver) = services().await;
		init_default(&control).await;

		let mut draft = PeerDraft::new("laptop");
		draft.keepalive_interval = Some(0);
		let err = control.peers.create(draft).await.unwrap_err();
		assert!(matches!(err, ControlError::Validation(_)));
	}

	#[tokio::test]
	async fn pinned_address_is_honored_and_checked() {
		let (control, _driver) = services().await;
		init_default(&control).await;

		let mut draft = PeerDraft::new("printer");
		draft.address = Some("10.8.0.40".parse().unwrap());
		let created = control.peers.create(draft).await.unwrap();
		assert_eq!(created.peer.address.to_string(), "10.8.0.40");

		// Outside the subnet.
		let mut bad = PeerDraft::new("roamer");
		bad.address = Some("10.9.0.2".parse().unwrap());
		assert!(matches!(
			control.peers.create(bad).await.unwrap_err(),
			ControlError::Validation(_)
		));

		// Already assigned.
		let mut dup = PeerDraft::new("copycat");
		dup.address = Some("10.8.0.40".parse().unwrap());
		assert!(matches!(
			control.peers.create(dup).await.unwrap_err(),
			ControlError::Conflict(_)
		));
	}

	#[tokio::test]
	async fn driver_failure_after_persist_is_degraded_not_rolled_back() {
		let (control, driver) = services().await;
		init_default(&control).await;

		// Both the apply and its internal retry fail.
		driver.fail_next_applies(2);
		let created = control.peers.create(PeerDraft::new("laptop")).await.unwrap();

		assert!(matches!(created.sync, SyncState::Degraded { .. }));
		assert_eq!(control.peers.list().await.unwrap().len(), 1);
	}

	#[tokio::test]
	async fn delete_unknown_peer_is_not_found() {
		let (control, _driver) = services().await;
		init_default(&control).await;

		let err = control.peers.delete(PeerId::from_i64(99)).await.unwrap_err();
		assert!(matches!(err, ControlError::PeerNotFound));
	}

	#[tokio::test]
	async fn config_text_carries_the_private_key_once() {
		let (control, _driver) = services().await;
		init_default(&control).await;

		let created = control.peers.create(PeerDraft::new("laptop")).await.unwrap();
		let text = control.peers.config_text(created.peer.id).await.unwrap();

		assert!(text.contains(created.peer.private_key.to_base64().expose()));
		assert!(text.contains("AllowedIPs = 0.0.0.0/0"));
	}

	#[tokio::test]
	async fn peer_serialization_redacts_secrets() {
		let (control, _driver) = services().await;
		init_default(&control).await;

		let created = control.peers.create(PeerDraft::new("laptop")).await.unwrap();
		let json = serde_json::to_string(&created.peer).unwrap();

		assert!(json.contains(&created.peer.public_key.to_base64()));
		assert!(!json.contains(created.peer.private_key.to_base64().expose()));
		assert!(json.contains("[REDACTED]"));
	}
}
