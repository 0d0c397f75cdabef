// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

#[derive(Debug, thiserror::Error)]
pub enum DbError {
	#[error("database error: {0}")]
	Sqlx(#[from] sqlx::Error),

	#[error("not found: {0}")]
	NotFound(String),

	#[error("conflict: {0}")]
	Conflict(String),

	#[error("internal: {0}")]
	Internal(String),
}

pub type Result<T> = std::result::Result<T, DbError>;

impl DbError {
	/// Map unique-constraint violations on insert to [`DbError::Conflict`] so
	/// callers can recompute their allocation and retry.
	pub fn from_insert(err: sqlx::Error) -> Self {
		match &err {
			sqlx::Error::Database(db) if db.is_unique_violation() => {
				DbError::Conflict(db.message().to_string())
			}
			_ => DbError::Sqlx(err),
		}
	}
}
