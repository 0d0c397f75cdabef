// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Registry-to-driver reconciliation.
//!
//! The on-disk file and the live device are one shared mutable resource with
//! no concurrency control of their own, so every mutating operation runs
//! under the single mutation lock owned here. Read paths never take it.
//!
//! The registry is written first, then projected onto the driver. A failed
//! projection is not rolled back: the registry stays authoritative and the
//! device state is a cache that the next push rebuilds.

use crate::conf::DeviceConfig;
use crate::driver::Driver;
use crate::error::Result;
use crate::interface::InterfaceSettings;
use crate::peers::Peer;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard};
use tracing::warn;

/// Whether the driver accepted the most recent projection of registry state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SyncState {
	/// Driver and registry agree.
	Synced,
	/// The mutation is committed but the driver rejected the re-rendered
	/// configuration; live state lags until the next successful push.
	Degraded { reason: String },
}

pub struct ConfigSync {
	driver: Arc<dyn Driver>,
	mutation: Mutex<()>,
}

impl ConfigSync {
	pub fn new(driver: Arc<dyn Driver>) -> Self {
		Self {
			driver,
			mutation: Mutex::new(()),
		}
	}

	/// Serialize a read-allocate-persist-render-apply sequence. Held across
	/// the whole mutation, released before the response leaves the service.
	pub async fn lock(&self) -> MutexGuard<'_, ()> {
		self.mutation.lock().await
	}

	/// Render the registry state and hand it to the driver, retrying the
	/// apply once. A second failure is reported as degraded, not an error:
	/// at this point the registry mutation is already durable.
	pub async fn push(&self, settings: &InterfaceSettings, peers: &[Peer]) -> Result<SyncState> {
		let config = DeviceConfig::from_state(settings, peers)?.render();

		let first = match self.driver.apply(&config).await {
			Ok(()) => return Ok(SyncState::Synced),
			Err(err) => err,
		};
		warn!(error = %first, "driver apply failed, retrying once");

		match self.driver.apply(&config).await {
			Ok(()) => Ok(SyncState::Synced),
			Err(second) => {
				warn!(error = %second, "driver apply failed again; live config lags the registry");
				Ok(SyncState::Degraded {
					reason: second.to_string(),
				})
			}
		}
	}
}
