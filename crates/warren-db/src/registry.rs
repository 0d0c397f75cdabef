// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Peer registry repository.
//!
//! Raw rows cross this boundary as tuples; domain conversion lives with the
//! services that own the types. Peer ids are assigned by SQLite
//! (`AUTOINCREMENT`), never by an in-process counter, so they stay unique
//! across restarts.

use sqlx::sqlite::SqlitePool;

use crate::error::DbError;

pub type PeerRowTuple = (
	i64,
	String,
	String,
	String,
	Option<String>,
	String,
	Option<String>,
	Option<i64>,
	i64,
	String,
);

pub type InterfaceRowTuple = (
	String,
	String,
	String,
	i64,
	String,
	Option<String>,
	Option<String>,
	Option<i64>,
	String,
);

pub type AddressRow = (String,);

const PEER_COLUMNS: &str = "id, name, public_key, private_key, preshared_key, address, \
	 allowed_ranges, keepalive_interval, enabled, created_at";

/// Repository for peer and interface rows.
#[derive(Clone)]
pub struct RegistryRepository {
	pool: SqlitePool,
}

impl RegistryRepository {
	pub fn new(pool: SqlitePool) -> Self {
		Self { pool }
	}

	// =========================================================================
	// Peer Operations
	// =========================================================================

	#[allow(clippy::too_many_arguments)]
	#[tracing::instrument(skip(self, private_key, preshared_key), fields(%name, %address))]
	pub async fn insert_peer(
		&self,
		name: &str,
		public_key: &str,
		private_key: &str,
		preshared_key: Option<&str>,
		address: &str,
		allowed_ranges: Option<&str>,
		keepalive_interval: Option<i64>,
	) -> Result<i64, DbError> {
		let result = sqlx::query(
			"INSERT INTO peers (name, public_key, private_key, preshared_key, address,
				allowed_ranges, keepalive_interval, enabled, created_at)
			 VALUES (?, ?, ?, ?, ?, ?, ?, 1, datetime('now'))",
		)
		.bind(name)
		.bind(public_key)
		.bind(private_key)
		.bind(preshared_key)
		.bind(address)
		.bind(allowed_ranges)
		.bind(keepalive_interval)
		.execute(&self.pool)
		.await
		.map_err(DbError::from_insert)?;

		Ok(result.last_insert_rowid())
	}

	#[tracing::instrument(skip(self), fields(%id))]
	pub async fn get_peer(&self, id: i64) -> Result<Option<PeerRowTuple>, DbError> {
		let row: Option<PeerRowTuple> =
			sqlx::query_as(&format!("SELECT {PEER_COLUMNS} FROM peers WHERE id = ?"))
				.bind(id)
				.fetch_optional(&self.pool)
				.await?;

		Ok(row)
	}

	#[tracing::instrument(skip(self))]
	pub async fn list_peers(&self) -> Result<Vec<PeerRowTuple>, DbError> {
		let rows: Vec<PeerRowTuple> =
			sqlx::query_as(&format!("SELECT {PEER_COLUMNS} FROM peers ORDER BY id"))
				.fetch_all(&self.pool)
				.await?;

		Ok(rows)
	}

	#[tracing::instrument(skip(self), fields(%id))]
	pub async fn delete_peer(&self, id: i64) -> Result<u64, DbError> {
		let result = sqlx::query("DELETE FROM peers WHERE id = ?")
			.bind(id)
			.execute(&self.pool)
			.await?;

		Ok(result.rows_affected())
	}

	/// Every assigned peer address. This is the allocator's "taken" snapshot;
	/// a deleted peer's address disappears from it immediately.
	#[tracing::instrument(skip(self))]
	pub async fn list_addresses(&self) -> Result<Vec<AddressRow>, DbError> {
		let rows: Vec<AddressRow> = sqlx::query_as("SELECT address FROM peers")
			.fetch_all(&self.pool)
			.await?;

		Ok(rows)
	}

	// =========================================================================
	// Interface Operations
	// =========================================================================

	#[allow(clippy::too_many_arguments)]
	#[tracing::instrument(skip(self, private_key), fields(%name, %listen_port, %subnet))]
	pub async fn insert_interface(
		&self,
		name: &str,
		private_key: &str,
		public_key: &str,
		listen_port: i64,
		subnet: &str,
		advertised_endpoint: Option<&str>,
		dns_servers: Option<&str>,
		mtu: Option<i64>,
	) -> Result<(), DbError> {
		sqlx::query(
			"INSERT INTO interface (name, private_key, public_key, listen_port, subnet,
				advertised_endpoint, dns_servers, mtu, created_at)
			 VALUES (?, ?, ?, ?, ?, ?, ?, ?, datetime('now'))",
		)
		.bind(name)
		.bind(private_key)
		.bind(public_key)
		.bind(listen_port)
		.bind(subnet)
		.bind(advertised_endpoint)
		.bind(dns_servers)
		.bind(mtu)
		.execute(&self.pool)
		.await
		.map_err(DbError::from_insert)?;

		Ok(())
	}

	#[tracing::instrument(skip(self), fields(%name))]
	pub async fn get_interface(&self, name: &str) -> Result<Option<InterfaceRowTuple>, DbError> {
		let row: Option<InterfaceRowTuple> = sqlx::query_as(
			"SELECT name, private_key, public_key, listen_port, subnet,
				advertised_endpoint, dns_servers, mtu, created_at
			 FROM interface WHERE name = ?",
		)
		.bind(name)
		.fetch_optional(&self.pool)
		.await?;

		Ok(row)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::pool::migrate;
	use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
	use std::str::FromStr;

	async fn make_repo() -> RegistryRepository {
		let options = SqliteConnectOptions::from_str(":memory:")
			.unwrap()
			.create_if_missing(true);

		let pool = SqlitePoolOptions::new()
			.max_connections(1)
			.connect_with(options)
			.await
			.expect("Failed to create test pool");

		migrate(&pool).await.unwrap();
		RegistryRepository::new(pool)
	}

	#[tokio::test]
	async fn insert_and_get_peer() {
		let repo = make_repo().await;

		let id = repo
			.insert_peer(
				"laptop",
				"pub-a",
				"priv-a",
				Some("psk-a"),
				"10.8.0.2",
				Some("0.0.0.0/0"),
				Some(25),
			)
			.await
			.unwrap();

		let row = repo.get_peer(id).await.unwrap().unwrap();
		let (row_id, name, public_key, _, preshared, address, ranges, keepalive, enabled, _) = row;
		assert_eq!(row_id, id);
		assert_eq!(name, "laptop");
		assert_eq!(public_key, "pub-a");
		assert_eq!(preshared, Some("psk-a".to_string()));
		assert_eq!(address, "10.8.0.2");
		assert_eq!(ranges, Some("0.0.0.0/0".to_string()));
		assert_eq!(keepalive, Some(25));
		assert_eq!(enabled, 1);
	}

	#[tokio::test]
	async fn get_peer_not_found() {
		let repo = make_repo().await;
		assert!(repo.get_peer(42).await.unwrap().is_none());
	}

	#[tokio::test]
	async fn duplicate_address_is_a_conflict() {
		let repo = make_repo().await;

		repo
			.insert_peer("a", "pub-a", "priv-a", None, "10.8.0.2", None, None)
			.await
			.unwrap();

		let err = repo
			.insert_peer("b", "pub-b", "priv-b", None, "10.8.0.2", None, None)
			.await
			.unwrap_err();
		assert!(matches!(err, DbError::Conflict(_)));
	}

	#[tokio::test]
	async fn duplicate_public_key_is_a_conflict() {
		let repo = make_repo().await;

		repo
			.insert_peer("a", "pub-a", "priv-a", None, "10.8.0.2", None, None)
			.await
			.unwrap();

		let err = repo
			.insert_peer("b", "pub-a", "priv-b", None, "10.8.0.3", None, None)
			.await
			.unwrap_err();
		assert!(matches!(err, DbError::Conflict(_)));
	}

	#[tokio::test]
	async fn delete_frees_the_address() {
		let repo = make_repo().await;

		let id = repo
			.insert_peer("a", "pub-a", "priv-a", None, "10.8.0.2", None, None)
			.await
			.unwrap();
		assert_eq!(repo.delete_peer(id).await.unwrap(), 1);
		assert!(repo.list_addresses().await.unwrap().is_empty());

		// The freed address is immediately insertable again.
		repo
			.insert_peer("b", "pub-b", "priv-b", None, "10.8.0.2", None, None)
			.await
			.unwrap();
	}

	#[tokio::test]
	async fn delete_unknown_peer_affects_no_rows() {
		let repo = make_repo().await;
		assert_eq!(repo.delete_peer(7).await.unwrap(), 0);
	}

	#[tokio::test]
	async fn list_peers_is_ordered_by_id() {
		let repo = make_repo().await;

		for (name, pk, addr) in [
			("a", "pub-a", "10.8.0.2"),
			("b", "pub-b", "10.8.0.3"),
			("c", "pub-c", "10.8.0.4"),
		] {
			repo
				.insert_peer(name, pk, "priv", None, addr, None, None)
				.await
				.unwrap();
		}

		let names: Vec<String> = repo
			.list_peers()
			.await
			.unwrap()
			.into_iter()
			.map(|row| row.1)
			.collect();
		assert_eq!(names, vec!["a", "b", "c"]);
	}

	#[tokio::test]
	async fn interface_row_roundtrip() {
		let repo = make_repo().await;

		repo
			.insert_interface(
				"wg0",
				"priv",
				"pub",
				51820,
				"10.8.0.0/24",
				Some("vpn.example.com:51820"),
				Some("1.1.1.1,8.8.8.8"),
				Some(1420),
			)
			.await
			.unwrap();

		let row = repo.get_interface("wg0").await.unwrap().unwrap();
		let (name, _, public_key, listen_port, subnet, endpoint, dns, mtu, _) = row;
		assert_eq!(name, "wg0");
		assert_eq!(public_key, "pub");
		assert_eq!(listen_port, 51820);
		assert_eq!(subnet, "10.8.0.0/24");
		assert_eq!(endpoint, Some("vpn.example.com:51820".to_string()));
		assert_eq!(dns, Some("1.1.1.1,8.8.8.8".to_string()));
		assert_eq!(mtu, Some(1420));
	}

	#[tokio::test]
	async fn reinserting_interface_is_a_conflict() {
		let repo = make_repo().await;

		repo
			.insert_interface("wg0", "priv", "pub", 51820, "10.8.0.0/24", None, None, None)
			.await
			.unwrap();

		let err = repo
			.insert_interface("wg0", "priv2", "pub2", 51821, "10.9.0.0/24", None, None, None)
			.await
			.unwrap_err();
		assert!(matches!(err, DbError::Conflict(_)));
	}

	#[tokio::test]
	async fn missing_interface_is_none() {
		let repo = make_repo().await;
		assert!(repo.get_interface("wg0").await.unwrap().is_none());
	}
}
