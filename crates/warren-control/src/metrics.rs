// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Per-peer connectivity and traffic metrics.
//!
//! Registry identities are left-joined against the driver's live session
//! stats by public key: a registered peer that has never connected still
//! appears, with zero counters and no handshake, rather than being omitted.
//! `connected` is derived: a handshake younger than the configured
//! freshness window.

use crate::config::ControlConfig;
use crate::driver::Driver;
use crate::dump::{parse_dump, SessionStats};
use crate::error::Result;
use crate::peers::{Peer, PeerId, PeerService};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::instrument;
use warren_common::keys::WgPublicKey;

#[derive(Debug, Clone, Serialize)]
pub struct PeerMetrics {
	pub peer_id: PeerId,
	pub peer_name: String,
	pub public_key: WgPublicKey,
	pub remote_endpoint: Option<SocketAddr>,
	pub last_handshake: Option<DateTime<Utc>>,
	pub bytes_received: u64,
	pub bytes_sent: u64,
	pub bytes_received_mb: f64,
	pub bytes_sent_mb: f64,
	pub connected: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricsSummary {
	pub total_peers: usize,
	pub enabled_peers: usize,
	pub connected_peers: usize,
	pub peers: Vec<PeerMetrics>,
}

#[derive(Clone)]
pub struct MetricsService {
	peers: PeerService,
	driver: Arc<dyn Driver>,
	config: Arc<ControlConfig>,
}

impl MetricsService {
	pub fn new(peers: PeerService, driver: Arc<dyn Driver>, config: Arc<ControlConfig>) -> Self {
		Self {
			peers,
			driver,
			config,
		}
	}

	#[instrument(skip(self), fields(%id))]
	pub async fn peer(&self, id: PeerId) -> Result<PeerMetrics> {
		let peer = self.peers.get(id).await?;
		let dump = self.driver.dump().await?;
		let stats = parse_dump(&dump);

		Ok(self.join(&peer, stats.get(&peer.public_key), Utc::now()))
	}

	#[instrument(skip(self))]
	pub async fn all(&self) -> Result<MetricsSummary> {
		let peers = self.peers.list().await?;
		let dump = self.driver.dump().await?;
		let stats = parse_dump(&dump);
		let now = Utc::now();

		let mut enabled_peers = 0;
		let mut connected_peers = 0;
		let mut rows = Vec::with_capacity(peers.len());

		for peer in &peers {
			let metrics = self.join(peer, stats.get(&peer.public_key), now);
			if peer.enabled {
				enabled_peers += 1;
				if metrics.connected {
					connected_peers += 1;
				}
			}
			rows.push(metrics);
		}

		Ok(MetricsSummary {
			total_peers: peers.len(),
			enabled_peers,
			connected_peers,
			peers: rows,
		})
	}

	fn join(&self, peer: &Peer, stats: Option<&SessionStats>, now: DateTime<Utc>) -> PeerMetrics {
		let freshness = chrono::Duration::seconds(self.config.handshake_freshness.as_secs() as i64);

		let (endpoint, last_handshake, bytes_received, bytes_sent) = match stats {
			Some(stats) => (
				stats.endpoint,
				stats.last_handshake,
				stats.bytes_received,
				stats.bytes_sent,
			),
			None => (None, None, 0, 0),
		};

		let connected = last_handshake
			.map(|at| now.signed_duration_since(at) < freshness)
			.unwrap_or(false);

		PeerMetrics {
			peer_id: peer.id,
			peer_name: peer.name.clone(),
			public_key: peer.public_key,
			remote_endpoint: endpoint,
			last_handshake,
			bytes_received,
			bytes_sent,
			bytes_received_mb: to_mebibytes(bytes_received),
			bytes_sent_mb: to_mebibytes(bytes_sent),
			connected,
		}
	}
}

fn to_mebibytes(bytes: u64) -> f64 {
	(bytes as f64 / (1024.0 * 1024.0) * 100.0).round() / 100.0
}
