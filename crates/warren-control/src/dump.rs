// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Parser for the driver's session dump.
//!
//! `wg show <if> dump` emits one interface record followed by one
//! tab-separated record per peer: public key, preshared key, endpoint,
//! allowed-ips, latest-handshake epoch seconds, received bytes, sent bytes,
//! keepalive. The format marks absent values with `(none)` (or `off` for
//! keepalive) and a zero handshake for "never connected"; both map to
//! semantic absence here. Zero byte counters are a real value and stay zero.
//!
//! One malformed record must not hide every other peer's metrics, so bad
//! lines are skipped with a warning instead of failing the parse.

use chrono::{DateTime, Utc};
use ipnet::IpNet;
use std::collections::HashMap;
use std::net::SocketAddr;
use warren_common::keys::WgPublicKey;

const NONE_MARKER: &str = "(none)";

/// Live per-peer counters as reported by the driver. Counters reset when the
/// driver restarts; they are never persisted.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SessionStats {
	pub has_preshared_key: bool,
	pub endpoint: Option<SocketAddr>,
	pub allowed_ips: Vec<IpNet>,
	pub last_handshake: Option<DateTime<Utc>>,
	pub bytes_received: u64,
	pub bytes_sent: u64,
	pub persistent_keepalive: Option<u16>,
}

/// Parse a session dump into per-peer stats keyed by public key.
///
/// The leading interface record is skipped; unparseable peer records are
/// dropped with a warning.
pub fn parse_dump(text: &str) -> HashMap<WgPublicKey, SessionStats> {
	let mut stats = HashMap::new();

	for (index, line) in text.lines().enumerate().skip(1) {
		if line.trim().is_empty() {
			continue;
		}
		match parse_peer_record(line) {
			Some((public_key, record)) => {
				stats.insert(public_key, record);
			}
			None => {
				tracing::warn!(line = index + 1, "skipping unparseable session record");
			}
		}
	}

	stats
}

fn parse_peer_record(line: &str) -> Option<(WgPublicKey, SessionStats)> {
	let columns: Vec<&str> = line.split('\t').collect();
	if columns.len() < 8 {
		return None;
	}

	let public_key = WgPublicKey::from_base64(columns[0]).ok()?;
	let has_preshared_key = columns[1] != NONE_MARKER;

	let endpoint = match columns[2] {
		NONE_MARKER => None,
		raw => Some(raw.parse::<SocketAddr>().ok()?),
	};

	let allowed_ips = match columns[3] {
		NONE_MARKER | "" => Vec::new(),
		raw => raw
			.split(',')
			.map(|part| part.trim().parse().ok())
			.collect::<Option<Vec<IpNet>>>()?,
	};

	let handshake_epoch: i64 = columns[4].parse().ok()?;
	let last_handshake = if handshake_epoch == 0 {
		None
	} else {
		Some(DateTime::from_timestamp(handshake_epoch, 0)?)
	};

	let bytes_received: u64 = columns[5].parse().ok()?;
	let bytes_sent: u64 = columns[6].parse().ok()?;

	let persistent_keepalive = match columns[7] {
		"off" | NONE_MARKER => None,
		raw => match raw.parse::<u16>().ok()? {
			0 => None,
			secs => Some(secs),
		},
	};

	Some((
		public_key,
		SessionStats {
			has_preshared_key,
			endpoint,
			allowed_ips,
			last_handshake,
			bytes_received,
			bytes_sent,
			persistent_keepalive,
		},
	))
}
