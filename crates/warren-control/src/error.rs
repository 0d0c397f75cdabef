// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use thiserror::Error;
use warren_common::ip::IpError;
use warren_common::keys::KeyError;
use warren_db::DbError;

/// Control-plane failure taxonomy.
///
/// Callers can rely on the split between "nothing happened" (`Validation`,
/// `PoolExhausted`, `Conflict`, parse/render failures before persistence) and
/// "partially happened" (a committed mutation whose driver sync lagged, which
/// is reported as a degraded success, not through this type).
#[derive(Debug, Error)]
pub enum ControlError {
	#[error("validation error: {0}")]
	Validation(String),

	#[error("address pool exhausted")]
	PoolExhausted,

	#[error("conflict: {0}")]
	Conflict(String),

	#[error("peer not found")]
	PeerNotFound,

	#[error("interface not configured")]
	InterfaceNotConfigured,

	#[error("config parse error: {0}")]
	ConfigParse(#[from] ConfigParseError),

	#[error("config render error: {0}")]
	ConfigRender(#[from] ConfigRenderError),

	#[error("driver error: {0}")]
	Driver(#[from] DriverError),

	#[error("database error: {0}")]
	Database(sqlx::Error),

	#[error("internal error: {0}")]
	Internal(String),
}

pub type Result<T> = std::result::Result<T, ControlError>;

impl From<DbError> for ControlError {
	fn from(e: DbError) -> Self {
		match e {
			DbError::Sqlx(err) => ControlError::Database(err),
			DbError::Conflict(msg) => ControlError::Conflict(msg),
			DbError::NotFound(msg) => ControlError::Internal(format!("not found: {msg}")),
			DbError::Internal(msg) => ControlError::Internal(msg),
		}
	}
}

impl From<IpError> for ControlError {
	fn from(e: IpError) -> Self {
		match e {
			IpError::PoolExhausted(_) => ControlError::PoolExhausted,
			IpError::NoHosts(_) | IpError::NotInSubnet(_, _) => {
				ControlError::Validation(e.to_string())
			}
		}
	}
}

impl From<KeyError> for ControlError {
	fn from(e: KeyError) -> Self {
		ControlError::Internal(format!("invalid stored key: {e}"))
	}
}

/// Failures of the external tunnel driver calls (config reload, session dump).
#[derive(Debug, Error)]
pub enum DriverError {
	#[error("failed to spawn {command}: {source}")]
	Spawn {
		command: String,
		#[source]
		source: std::io::Error,
	},

	#[error("{command} exited with code {code:?}: {stderr}")]
	Failed {
		command: String,
		code: Option<i32>,
		stderr: String,
	},

	#[error("{command} timed out after {timeout_secs}s")]
	Timeout { command: String, timeout_secs: u64 },

	#[error("config file I/O error: {0}")]
	Io(#[from] std::io::Error),
}

/// Device configuration text that does not conform to the codec grammar.
/// The codec never drops or guesses a field value.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigParseError {
	#[error("line {line}: unknown field `{field}`")]
	UnknownField { line: usize, field: String },

	#[error("line {line}: unknown section `{section}`")]
	UnknownSection { line: usize, section: String },

	#[error("line {line}: field outside any section")]
	OrphanField { line: usize },

	#[error("line {line}: expected `field = value`")]
	MalformedLine { line: usize },

	#[error("line {line}: invalid value for `{field}`: {reason}")]
	InvalidValue {
		line: usize,
		field: String,
		reason: String,
	},

	#[error("line {line}: duplicate [Interface] section")]
	DuplicateInterface { line: usize },

	#[error("missing required field `{field}` in [{section}] section")]
	MissingField {
		section: &'static str,
		field: &'static str,
	},

	#[error("missing [Interface] section")]
	MissingInterface,
}

#[derive(Debug, Error)]
pub enum ConfigRenderError {
	#[error("cannot derive interface address: {0}")]
	InterfaceAddress(#[from] IpError),
}
