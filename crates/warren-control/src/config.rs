// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::path::PathBuf;
use std::time::Duration;

/// Runtime knobs for the control plane.
///
/// Everything has a default; `from_env` only overrides what is set. The
/// handshake freshness window is the policy that turns a handshake timestamp
/// into the derived `connected` flag.
#[derive(Debug, Clone)]
pub struct ControlConfig {
	/// Tunnel interface name (also the registry row key).
	pub interface: String,
	/// Path of the `wg` control binary.
	pub wg_bin: String,
	/// Path of the `wg-quick` helper.
	pub wg_quick_bin: String,
	/// Directory holding the rendered device configuration.
	pub config_dir: PathBuf,
	/// Upper bound on any single driver call.
	pub driver_timeout: Duration,
	/// A peer counts as connected if its last handshake is younger than this.
	pub handshake_freshness: Duration,
}

const DEFAULT_DRIVER_TIMEOUT_SECS: u64 = 10;
const DEFAULT_HANDSHAKE_FRESHNESS_SECS: u64 = 180;

impl ControlConfig {
	pub fn new(interface: impl Into<String>) -> Self {
		Self {
			interface: interface.into(),
			wg_bin: "wg".to_string(),
			wg_quick_bin: "wg-quick".to_string(),
			config_dir: PathBuf::from("/etc/wireguard"),
			driver_timeout: Duration::from_secs(DEFAULT_DRIVER_TIMEOUT_SECS),
			handshake_freshness: Duration::from_secs(DEFAULT_HANDSHAKE_FRESHNESS_SECS),
		}
	}

	pub fn from_env() -> Self {
		let interface = std::env::var("WARREN_INTERFACE").unwrap_or_else(|_| "wg0".to_string());
		let mut config = Self::new(interface);

		if let Ok(bin) = std::env::var("WARREN_WG_BIN") {
			config.wg_bin = bin;
		}
		if let Ok(bin) = std::env::var("WARREN_WG_QUICK_BIN") {
			config.wg_quick_bin = bin;
		}
		if let Ok(dir) = std::env::var("WARREN_CONFIG_DIR") {
			config.config_dir = PathBuf::from(dir);
		}
		if let Some(secs) = std::env::var("WARREN_DRIVER_TIMEOUT_SECS")
			.ok()
			.and_then(|s| s.parse().ok())
		{
			config.driver_timeout = Duration::from_secs(secs);
		}
		if let Some(secs) = std::env::var("WARREN_HANDSHAKE_FRESHNESS_SECS")
			.ok()
			.and_then(|s| s.parse().ok())
		{
			config.handshake_freshness = Duration::from_secs(secs);
		}

		config
	}

	/// Where the rendered device configuration lives on disk.
	pub fn config_path(&self) -> PathBuf {
		self.config_dir.join(format!("{}.conf", self.interface))
	}
}

impl Default for ControlConfig {
	fn default() -> Self {
		Self::new("wg0")
	}
}
