// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqliteSynchronous};
use std::str::FromStr;

use crate::error::DbError;

/// Create a SqlitePool with WAL mode and common settings.
///
/// # Arguments
/// * `database_url` - SQLite connection string (e.g., "sqlite:./warren.db")
///
/// # Errors
/// Returns `DbError::Internal` if the URL is invalid or connection fails.
#[tracing::instrument(skip(database_url))]
pub async fn create_pool(database_url: &str) -> Result<SqlitePool, DbError> {
	let options = SqliteConnectOptions::from_str(database_url)
		.map_err(|e| DbError::Internal(format!("Invalid database URL: {e}")))?
		.journal_mode(SqliteJournalMode::Wal)
		.synchronous(SqliteSynchronous::Normal)
		.create_if_missing(true);

	let pool = SqlitePool::connect_with(options).await?;

	tracing::debug!("database pool created");
	Ok(pool)
}

/// Create the registry schema if it does not exist yet.
///
/// Idempotent; safe to run on every startup. The UNIQUE constraints on
/// `public_key` and `address` are load-bearing: they are what turns a lost
/// allocation race into a retryable conflict instead of a double-assignment.
#[tracing::instrument(skip(pool))]
pub async fn migrate(pool: &SqlitePool) -> Result<(), DbError> {
	sqlx::query(
		r#"
		CREATE TABLE IF NOT EXISTS peers (
			id INTEGER PRIMARY KEY AUTOINCREMENT,
			name TEXT NOT NULL,
			public_key TEXT NOT NULL UNIQUE,
			private_key TEXT NOT NULL,
			preshared_key TEXT,
			address TEXT NOT NULL UNIQUE,
			allowed_ranges TEXT,
			keepalive_interval INTEGER,
			enabled INTEGER NOT NULL DEFAULT 1,
			created_at TEXT NOT NULL
		)
		"#,
	)
	.execute(pool)
	.await?;

	sqlx::query(
		r#"
		CREATE TABLE IF NOT EXISTS interface (
			name TEXT PRIMARY KEY,
			private_key TEXT NOT NULL,
			public_key TEXT NOT NULL,
			listen_port INTEGER NOT NULL,
			subnet TEXT NOT NULL,
			advertised_endpoint TEXT,
			dns_servers TEXT,
			mtu INTEGER,
			created_at TEXT NOT NULL
		)
		"#,
	)
	.execute(pool)
	.await?;

	tracing::debug!("registry schema ready");
	Ok(())
}
