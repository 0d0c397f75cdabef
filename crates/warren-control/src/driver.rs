// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Narrow port to the tunnel driver.
//!
//! The control plane talks to the kernel device through exactly two calls:
//! push a full configuration, and read the live session dump. Keeping this a
//! trait makes the reconciler testable without a real tunnel present.

use crate::config::ControlConfig;
use crate::error::DriverError;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, instrument};

#[async_trait]
pub trait Driver: Send + Sync {
	/// Replace the device's configuration with `config`.
	async fn apply(&self, config: &str) -> Result<(), DriverError>;

	/// The raw session dump text for the interface.
	async fn dump(&self) -> Result<String, DriverError>;
}

/// Production driver: `wg`/`wg-quick` over the process boundary.
///
/// `apply` writes the rendered file with mode 0600 (it carries the interface
/// private key), then reloads the running device with `wg syncconf`. When
/// that fails (typically because the interface is not up yet) it falls back
/// to a full `wg-quick` down/up cycle. Every call is bounded by the
/// configured timeout; a reload that does not finish in time is a failed
/// mutation, reported, never silently retried here.
pub struct WgCommandDriver {
	interface: String,
	wg_bin: String,
	wg_quick_bin: String,
	config_path: PathBuf,
	timeout: Duration,
}

impl WgCommandDriver {
	pub fn new(config: &ControlConfig) -> Self {
		Self {
			interface: config.interface.clone(),
			wg_bin: config.wg_bin.clone(),
			wg_quick_bin: config.wg_quick_bin.clone(),
			config_path: config.config_path(),
			timeout: config.driver_timeout,
		}
	}

	async fn run(&self, bin: &str, args: &[&str]) -> Result<String, DriverError> {
		let command = format!("{bin} {}", args.join(" "));

		let output = timeout(self.timeout, Command::new(bin).args(args).output())
			.await
			.map_err(|_| DriverError::Timeout {
				command: command.clone(),
				timeout_secs: self.timeout.as_secs(),
			})?
			.map_err(|source| DriverError::Spawn {
				command: command.clone(),
				source,
			})?;

		if !output.status.success() {
			return Err(DriverError::Failed {
				command,
				code: output.status.code(),
				stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
			});
		}

		Ok(String::from_utf8_lossy(&output.stdout).into_owned())
	}

	async fn write_secret_file(&self, path: &Path, content: &str) -> Result<(), DriverError> {
		if let Some(parent) = path.parent() {
			tokio::fs::create_dir_all(parent).await?;
		}

		#[cfg(unix)]
		{
			use tokio::fs::OpenOptions;
			use tokio::io::AsyncWriteExt;

			let mut file = OpenOptions::new()
				.write(true)
				.create(true)
				.truncate(true)
				.mode(0o600)
				.open(path)
				.await?;
			file.write_all(content.as_bytes()).await?;
		}

		#[cfg(not(unix))]
		{
			tokio::fs::write(path, content).await?;
		}

		Ok(())
	}
}

#[async_trait]
impl Driver for WgCommandDriver {
	#[instrument(skip(self, config), fields(interface = %self.interface))]
	async fn apply(&self, config: &str) -> Result<(), DriverError> {
		self.write_secret_file(&self.config_path, config).await?;

		// syncconf takes the wg(8) subset of the file; the wg-quick-only
		// fields (Address, DNS, MTU) would make it bail.
		let sync_path = self.config_path.with_extension("sync");
		self
			.write_secret_file(&sync_path, &strip_quick_fields(config))
			.await?;

		let sync_path_str = sync_path.display().to_string();
		let result = self
			.run(&self.wg_bin, &["syncconf", &self.interface, &sync_path_str])
			.await;
		let _ = tokio::fs::remove_file(&sync_path).await;

		match result {
			Ok(_) => {
				debug!("device configuration synced");
				Ok(())
			}
			Err(err) => {
				debug!(error = %err, "syncconf failed, restarting interface");
				let config_path = self.config_path.display().to_string();
				if let Err(down) = self.run(&self.wg_quick_bin, &["down", &config_path]).await {
					// The interface may simply not be up yet.
					debug!(error = %down, "interface was not up");
				}
				self.run(&self.wg_quick_bin, &["up", &config_path]).await?;
				debug!("interface restarted with new configuration");
				Ok(())
			}
		}
	}

	#[instrument(skip(self), fields(interface = %self.interface))]
	async fn dump(&self) -> Result<String, DriverError> {
		self
			.run(&self.wg_bin, &["show", &self.interface, "dump"])
			.await
	}
}

/// Drop the fields `wg syncconf` does not understand, keeping the wg(8)
/// subset. Mirrors what `wg-quick strip` emits.
fn strip_quick_fields(config: &str) -> String {
	let mut out = String::new();
	for line in config.lines() {
		let field = line.split_once('=').map(|(key, _)| key.trim());
		if matches!(field, Some("Address" | "DNS" | "MTU")) {
			continue;
		}
		out.push_str(line);
		out.push('\n');
	}
	out
}
