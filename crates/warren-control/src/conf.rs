// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Device configuration codec.
//!
//! [`DeviceConfig`] is the exact content of the driver-facing file: one
//! `[Interface]` block and one `[Peer]` block per enabled peer. Rendering is
//! byte-stable (fields are emitted in a fixed lexicographic order), so
//! re-rendering unchanged state produces identical text. Peer private keys
//! never enter this file; the client-side counterpart that does carry them is
//! [`render_peer_config`].
//!
//! Parsing exists for bootstrap only: a pre-existing file is read to detect
//! drift, after which the registry (always authoritative) is re-rendered over
//! it. Unknown or missing fields are errors, never guessed around.

use crate::error::{ConfigParseError, ConfigRenderError};
use crate::interface::InterfaceSettings;
use crate::peers::Peer;
use ipnet::{IpNet, Ipv4Net};
use std::fmt::Write;
use warren_common::ip;
use warren_common::keys::{WgPresharedKey, WgPrivateKey, WgPublicKey};

#[derive(Debug, Clone)]
pub struct DeviceConfig {
	pub interface: InterfaceBlock,
	pub peers: Vec<PeerBlock>,
}

#[derive(Debug, Clone)]
pub struct InterfaceBlock {
	/// The interface's own address with the subnet prefix, e.g. `10.8.0.1/24`.
	pub address: Ipv4Net,
	pub listen_port: u16,
	pub mtu: Option<u16>,
	pub private_key: WgPrivateKey,
}

#[derive(Debug, Clone)]
pub struct PeerBlock {
	pub allowed_ips: Vec<IpNet>,
	pub persistent_keepalive: Option<u16>,
	pub preshared_key: Option<WgPresharedKey>,
	pub public_key: WgPublicKey,
}

impl DeviceConfig {
	/// Project registry state into the device grammar. Disabled peers are
	/// left out; a peer without explicit ranges routes only its own /32 on
	/// the device side.
	pub fn from_state(
		settings: &InterfaceSettings,
		peers: &[Peer],
	) -> Result<Self, ConfigRenderError> {
		let own = ip::interface_address(settings.subnet)?;
		let address = Ipv4Net::new(own, settings.subnet.prefix_len())
			.map_err(|_| ConfigRenderError::InterfaceAddress(ip::IpError::NoHosts(settings.subnet)))?;

		let peers = peers
			.iter()
			.filter(|peer| peer.enabled)
			.map(|peer| PeerBlock {
				allowed_ips: device_allowed_ips(peer),
				persistent_keepalive: peer.keepalive_interval,
				preshared_key: peer.preshared_key.clone(),
				public_key: peer.public_key,
			})
			.collect();

		Ok(Self {
			interface: InterfaceBlock {
				address,
				listen_port: settings.listen_port,
				mtu: settings.mtu,
				private_key: settings.private_key.clone(),
			},
			peers,
		})
	}

	pub fn render(&self) -> String {
		let mut out = String::new();

		out.push_str("[Interface]\n");
		let _ = writeln!(out, "Address = {}", self.interface.address);
		let _ = writeln!(out, "ListenPort = {}", self.interface.listen_port);
		if let Some(mtu) = self.interface.mtu {
			let _ = writeln!(out, "MTU = {mtu}");
		}
		let _ = writeln!(
			out,
			"PrivateKey = {}",
			self.interface.private_key.to_base64().expose()
		);

		for peer in &self.peers {
			out.push_str("\n[Peer]\n");
			let _ = writeln!(out, "AllowedIPs = {}", join_nets(&peer.allowed_ips));
			if let Some(keepalive) = peer.persistent_keepalive {
				let _ = writeln!(out, "PersistentKeepalive = {keepalive}");
			}
			if let Some(preshared) = &peer.preshared_key {
				let _ = writeln!(out, "PresharedKey = {}", preshared.to_base64().expose());
			}
			let _ = writeln!(out, "PublicKey = {}", peer.public_key.to_base64());
		}

		out
	}

	pub fn parse(text: &str) -> Result<Self, ConfigParseError> {
		let mut parser = Parser::default();
		for (index, raw) in text.lines().enumerate() {
			parser.line(index + 1, raw)?;
		}
		parser.finish()
	}
}

fn device_allowed_ips(peer: &Peer) -> Vec<IpNet> {
	if peer.allowed_ranges.is_empty() {
		vec![IpNet::V4(Ipv4Net::new(peer.address, 32).expect("/32 is a valid prefix"))]
	} else {
		peer.allowed_ranges.clone()
	}
}

fn join_nets(nets: &[IpNet]) -> String {
	nets
		.iter()
		.map(ToString::to_string)
		.collect::<Vec<_>>()
		.join(", ")
}

fn parse_nets(line: usize, field: &str, value: &str) -> Result<Vec<IpNet>, ConfigParseError> {
	value
		.split(',')
		.map(|part| {
			part.trim().parse().map_err(|_| ConfigParseError::InvalidValue {
				line,
				field: field.to_string(),
				reason: format!("bad address range `{}`", part.trim()),
			})
		})
		.collect()
}

#[derive(Default)]
struct InterfaceAcc {
	address: Option<Ipv4Net>,
	listen_port: Option<u16>,
	mtu: Option<u16>,
	private_key: Option<WgPrivateKey>,
}

#[derive(Default)]
struct PeerAcc {
	allowed_ips: Option<Vec<IpNet>>,
	persistent_keepalive: Option<u16>,
	preshared_key: Option<WgPresharedKey>,
	public_key: Option<WgPublicKey>,
}

enum Section {
	Interface,
	Peer(PeerAcc),
}

#[derive(Default)]
struct Parser {
	interface: Option<InterfaceAcc>,
	peers: Vec<PeerBlock>,
	section: Option<Section>,
}

impl Parser {
	fn line(&mut self, line: usize, raw: &str) -> Result<(), ConfigParseError> {
		let trimmed = raw.trim();
		if trimmed.is_empty() || trimmed.starts_with('#') || trimmed.starts_with(';') {
			return Ok(());
		}

		if let Some(section) = trimmed.strip_prefix('[').and_then(|s| s.strip_suffix(']')) {
			self.flush_peer()?;
			if section.eq_ignore_ascii_case("interface") {
				if self.interface.is_some() {
					return Err(ConfigParseError::DuplicateInterface { line });
				}
				self.interface = Some(InterfaceAcc::default());
				self.section = Some(Section::Interface);
			} else if section.eq_ignore_ascii_case("peer") {
				self.section = Some(Section::Peer(PeerAcc::default()));
			} else {
				return Err(ConfigParseError::UnknownSection {
					line,
					section: section.to_string(),
				});
			}
			return Ok(());
		}

		let (field, value) = trimmed
			.split_once('=')
			.ok_or(ConfigParseError::MalformedLine { line })?;
		let field = field.trim();
		let value = value.trim();

		match &mut self.section {
			None => Err(ConfigParseError::OrphanField { line }),
			Some(Section::Interface) => match self.interface.as_mut() {
				Some(acc) => interface_field(acc, line, field, value),
				None => Err(ConfigParseError::OrphanField { line }),
			},
			Some(Section::Peer(acc)) => peer_field(acc, line, field, value),
		}
	}

	fn flush_peer(&mut self) -> Result<(), ConfigParseError> {
		match self.section.take() {
			Some(Section::Peer(acc)) => self.peers.push(finish_peer(acc)?),
			other => self.section = other,
		}
		Ok(())
	}

	fn finish(mut self) -> Result<DeviceConfig, ConfigParseError> {
		if let Some(Section::Peer(acc)) = self.section.take() {
			self.peers.push(finish_peer(acc)?);
		}

		let acc = self.interface.ok_or(ConfigParseError::MissingInterface)?;
		let interface = InterfaceBlock {
			address: acc.address.ok_or(ConfigParseError::MissingField {
				section: "Interface",
				field: "Address",
			})?,
			listen_port: acc.listen_port.ok_or(ConfigParseError::MissingField {
				section: "Interface",
				field: "ListenPort",
			})?,
			mtu: acc.mtu,
			private_key: acc.private_key.ok_or(ConfigParseError::MissingField {
				section: "Interface",
				field: "PrivateKey",
			})?,
		};

		Ok(DeviceConfig {
			interface,
			peers: self.peers,
		})
	}
}

fn interface_field(
	acc: &mut InterfaceAcc,
	line: usize,
	field: &str,
	value: &str,
) -> Result<(), ConfigParseError> {
	let invalid = |reason: String| ConfigParseError::InvalidValue {
		line,
		field: field.to_string(),
		reason,
	};

	match field {
		"Address" => {
			acc.address = Some(
				value
					.parse()
					.map_err(|_| invalid(format!("bad interface address `{value}`")))?,
			);
		}
		"ListenPort" => {
			acc.listen_port = Some(
				value
					.parse()
					.map_err(|_| invalid(format!("bad port `{value}`")))?,
			);
		}
		"MTU" => {
			acc.mtu = Some(
				value
					.parse()
					.map_err(|_| invalid(format!("bad MTU `{value}`")))?,
			);
		}
		"PrivateKey" => {
			acc.private_key =
				Some(WgPrivateKey::from_base64(value).map_err(|e| invalid(e.to_string()))?);
		}
		_ => {
			return Err(ConfigParseError::UnknownField {
				line,
				field: field.to_string(),
			});
		}
	}
	Ok(())
}

fn peer_field(
	acc: &mut PeerAcc,
	line: usize,
	field: &str,
	value: &str,
) -> Result<(), ConfigParseError> {
	let invalid = |reason: String| ConfigParseError::InvalidValue {
		line,
		field: field.to_string(),
		reason,
	};

	match field {
		"AllowedIPs" => {
			acc.allowed_ips = Some(parse_nets(line, field, value)?);
		}
		"PersistentKeepalive" => {
			acc.persistent_keepalive = Some(
				value
					.parse()
					.map_err(|_| invalid(format!("bad keepalive `{value}`")))?,
			);
		}
		"PresharedKey" => {
			acc.preshared_key =
				Some(WgPresharedKey::from_base64(value).map_err(|e| invalid(e.to_string()))?);
		}
		"PublicKey" => {
			acc.public_key =
				Some(WgPublicKey::from_base64(value).map_err(|e| invalid(e.to_string()))?);
		}
		_ => {
			return Err(ConfigParseError::UnknownField {
				line,
				field: field.to_string(),
			});
		}
	}
	Ok(())
}

fn finish_peer(acc: PeerAcc) -> Result<PeerBlock, ConfigParseError> {
	Ok(PeerBlock {
		allowed_ips: acc.allowed_ips.ok_or(ConfigParseError::MissingField {
			section: "Peer",
			field: "AllowedIPs",
		})?,
		persistent_keepalive: acc.persistent_keepalive,
		preshared_key: acc.preshared_key,
		public_key: acc.public_key.ok_or(ConfigParseError::MissingField {
			section: "Peer",
			field: "PublicKey",
		})?,
	})
}

/// Render the configuration a peer's own client imports.
///
/// This is the single place the peer's private key is re-emitted, and only on
/// the config-fetch path. Without explicit ranges the client routes
/// everything through the tunnel.
pub fn render_peer_config(peer: &Peer, settings: &InterfaceSettings) -> String {
	let mut out = String::new();

	out.push_str("[Interface]\n");
	let _ = writeln!(out, "Address = {}/32", peer.address);
	if !settings.dns_servers.is_empty() {
		let dns = settings
			.dns_servers
			.iter()
			.map(ToString::to_string)
			.collect::<Vec<_>>()
			.join(", ");
		let _ = writeln!(out, "DNS = {dns}");
	}
	if let Some(mtu) = settings.mtu {
		let _ = writeln!(out, "MTU = {mtu}");
	}
	let _ = writeln!(out, "PrivateKey = {}", peer.private_key.to_base64().expose());

	out.push_str("\n[Peer]\n");
	let ranges = if peer.allowed_ranges.is_empty() {
		"0.0.0.0/0".to_string()
	} else {
		join_nets(&peer.allowed_ranges)
	};
	let _ = writeln!(out, "AllowedIPs = {ranges}");
	if let Some(endpoint) = &settings.advertised_endpoint {
		let _ = writeln!(out, "Endpoint = {endpoint}");
	}
	if let Some(keepalive) = peer.keepalive_interval {
		let _ = writeln!(out, "PersistentKeepalive = {keepalive}");
	}
	if let Some(preshared) = &peer.preshared_key {
		let _ = writeln!(out, "PresharedKey = {}", preshared.to_base64().expose());
	}
	let _ = writeln!(out, "PublicKey = {}", settings.public_key.to_base64());

	out
}
