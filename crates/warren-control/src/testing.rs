// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Test support: an in-memory registry and a fake driver.
//!
//! The fake driver records every applied configuration and serves canned
//! dump text, so reconciliation behavior is observable without a kernel
//! tunnel present.

use crate::config::ControlConfig;
use crate::driver::Driver;
use crate::error::DriverError;
use crate::interface::{InitializedInterface, InterfaceDraft};
use crate::ControlServices;
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// In-process [`Driver`] double.
#[derive(Default)]
pub struct FakeDriver {
	applied: Mutex<Vec<String>>,
	dump_text: Mutex<String>,
	failures_remaining: AtomicUsize,
}

impl FakeDriver {
	pub fn new() -> Self {
		Self::default()
	}

	/// Every configuration the driver accepted, in order.
	pub fn applied(&self) -> Vec<String> {
		self.applied.lock().expect("fake driver lock").clone()
	}

	pub fn last_applied(&self) -> Option<String> {
		self.applied.lock().expect("fake driver lock").last().cloned()
	}

	/// Canned output for the next [`Driver::dump`] calls.
	pub fn set_dump(&self, text: impl Into<String>) {
		*self.dump_text.lock().expect("fake driver lock") = text.into();
	}

	/// Make the next `n` apply calls fail with a non-zero exit.
	pub fn fail_next_applies(&self, n: usize) {
		self.failures_remaining.store(n, Ordering::SeqCst);
	}
}

#[async_trait]
impl Driver for FakeDriver {
	async fn apply(&self, config: &str) -> Result<(), DriverError> {
		let remaining = self.failures_remaining.load(Ordering::SeqCst);
		if remaining > 0 {
			self.failures_remaining.store(remaining - 1, Ordering::SeqCst);
			return Err(DriverError::Failed {
				command: "fake apply".to_string(),
				code: Some(1),
				stderr: "injected failure".to_string(),
			});
		}

		self
			.applied
			.lock()
			.expect("fake driver lock")
			.push(config.to_string());
		Ok(())
	}

	async fn dump(&self) -> Result<String, DriverError> {
		Ok(self.dump_text.lock().expect("fake driver lock").clone())
	}
}

/// A fresh in-memory registry with the schema applied.
pub async fn memory_pool() -> SqlitePool {
	let options = SqliteConnectOptions::from_str(":memory:")
		.expect("in-memory connect options")
		.create_if_missing(true);

	let pool = SqlitePoolOptions::new()
		.max_connections(1)
		.connect_with(options)
		.await
		.expect("Failed to create test pool");

	warren_db::migrate(&pool).await.expect("schema migration");
	pool
}

/// Full service stack over an in-memory registry and a [`FakeDriver`].
pub async fn services() -> (ControlServices, Arc<FakeDriver>) {
	let driver = Arc::new(FakeDriver::new());
	let pool = memory_pool().await;
	let control = ControlServices::new(pool, driver.clone(), ControlConfig::new("wg0"));
	(control, driver)
}

/// Initialize the interface with the conventional 10.8.0.0/24 test subnet.
pub async fn init_default(control: &ControlServices) -> InitializedInterface {
	control
		.interface
		.initialize(InterfaceDraft::new("10.8.0.0/24".parse().expect("test subnet")))
		.await
		.expect("interface initialization")
}
