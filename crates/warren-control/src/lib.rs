// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Peer state synchronization and metrics for a WireGuard interface.
//!
//! The control plane keeps three views of the tunnel consistent: the
//! persistent peer registry (the source of truth), the rendered device
//! configuration file (a disposable projection), and the kernel's live
//! session table (reached through the [`Driver`] port).
//!
//! # Overview
//!
//! - [`InterfaceService`] initializes the local endpoint: host key pair,
//!   subnet, listen port.
//! - [`PeerService`] owns the peer lifecycle: allocate an address, generate
//!   keys, persist, re-render, reload the driver.
//! - [`MetricsService`] joins registry identities with parsed live session
//!   stats.
//! - [`ConfigSync`] serializes every mutation behind one lock and pushes
//!   registry state at the driver, downgrading (never rolling back) when the
//!   driver will not take it.
//!
//! # Example
//!
//! ```ignore
//! use warren_control::{ControlConfig, ControlServices, WgCommandDriver};
//! use std::sync::Arc;
//!
//! let config = ControlConfig::from_env();
//! let pool = warren_db::create_pool("sqlite:./warren.db").await?;
//! warren_db::migrate(&pool).await?;
//!
//! let driver = Arc::new(WgCommandDriver::new(&config));
//! let control = ControlServices::new(pool, driver, config);
//! control.bootstrap().await?;
//! ```

pub mod conf;
pub mod config;
pub mod driver;
pub mod dump;
pub mod error;
pub mod interface;
pub mod metrics;
pub mod peers;
pub mod sync;
pub mod testing;

pub use conf::{render_peer_config, DeviceConfig};
pub use config::ControlConfig;
pub use driver::{Driver, WgCommandDriver};
pub use dump::{parse_dump, SessionStats};
pub use error::{
	ConfigParseError, ConfigRenderError, ControlError, DriverError, Result,
};
pub use interface::{InitializedInterface, InterfaceDraft, InterfaceService, InterfaceSettings};
pub use metrics::{MetricsService, MetricsSummary, PeerMetrics};
pub use peers::{CreatedPeer, Peer, PeerDraft, PeerId, PeerService};
pub use sync::{ConfigSync, SyncState};

use sqlx::SqlitePool;
use std::sync::Arc;
use warren_db::RegistryRepository;

#[derive(Clone)]
pub struct ControlServices {
	pub peers: PeerService,
	pub interface: InterfaceService,
	pub metrics: MetricsService,
	config: Arc<ControlConfig>,
	sync: Arc<ConfigSync>,
}

impl ControlServices {
	pub fn new(pool: SqlitePool, driver: Arc<dyn Driver>, config: ControlConfig) -> Self {
		let config = Arc::new(config);
		let repo = RegistryRepository::new(pool);
		let sync = Arc::new(ConfigSync::new(driver.clone()));
		let interface = InterfaceService::new(repo.clone(), sync.clone(), config.clone());
		let peers = PeerService::new(repo, interface.clone(), sync.clone());
		let metrics = MetricsService::new(peers.clone(), driver, config.clone());

		Self {
			peers,
			interface,
			metrics,
			config,
			sync,
		}
	}

	/// Converge the driver with the registry at startup.
	///
	/// If a configuration file already exists it is parsed first (a file that
	/// does not conform to the grammar is corrupted on-disk state and surfaces
	/// as an error) and then unconditionally re-rendered from the
	/// registry, which is authoritative on any conflict. Returns `None` when
	/// the interface has never been initialized (nothing to converge).
	pub async fn bootstrap(&self) -> Result<Option<SyncState>> {
		let Some(settings) = self.interface.get().await? else {
			tracing::debug!("no interface settings yet, skipping bootstrap");
			return Ok(None);
		};

		let path = self.config.config_path();
		if let Ok(existing) = tokio::fs::read_to_string(&path).await {
			let parsed = DeviceConfig::parse(&existing)?;
			tracing::debug!(
				path = %path.display(),
				peers = parsed.peers.len(),
				"adopting pre-existing device configuration"
			);
		}

		let _guard = self.sync.lock().await;
		let peers = self.peers.list().await?;
		let state = self.sync.push(&settings, &peers).await?;
		Ok(Some(state))
	}
}
