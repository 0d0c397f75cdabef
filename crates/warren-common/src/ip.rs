// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! IPv4 pool arithmetic for the interface subnet.
//!
//! Allocation is deterministic: given the same set of taken addresses the
//! scan always lands on the same (numerically smallest) free host, so a
//! retried allocation after a transient store failure cannot drift.

use ipnet::Ipv4Net;
use std::collections::HashSet;
use std::net::Ipv4Addr;
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum IpError {
	#[error("address pool exhausted in {0}")]
	PoolExhausted(Ipv4Net),

	#[error("subnet {0} has no allocatable host addresses")]
	NoHosts(Ipv4Net),

	#[error("address {0} is not a usable host address in {1}")]
	NotInSubnet(Ipv4Addr, Ipv4Net),
}

pub type Result<T> = std::result::Result<T, IpError>;

/// The interface's own address: the first usable host of its subnet.
pub fn interface_address(subnet: Ipv4Net) -> Result<Ipv4Addr> {
	// /31 and /32 have no room for the interface plus at least one peer.
	if subnet.prefix_len() > 30 {
		return Err(IpError::NoHosts(subnet));
	}
	subnet.hosts().next().ok_or(IpError::NoHosts(subnet))
}

/// First free host address in `subnet`, scanning in ascending numeric order.
///
/// The network and broadcast addresses are never candidates, and neither is
/// `reserved` (the interface's own address). Returns
/// [`IpError::PoolExhausted`] once every remaining host is taken.
pub fn next_free_address(
	subnet: Ipv4Net,
	reserved: Ipv4Addr,
	taken: &HashSet<Ipv4Addr>,
) -> Result<Ipv4Addr> {
	if subnet.prefix_len() > 30 {
		return Err(IpError::NoHosts(subnet));
	}
	subnet
		.hosts()
		.find(|addr| *addr != reserved && !taken.contains(addr))
		.ok_or(IpError::PoolExhausted(subnet))
}

/// Validate a caller-pinned address: it must be a host inside `subnet` and
/// distinct from the network, broadcast, and `reserved` addresses.
pub fn require_usable_host(subnet: Ipv4Net, reserved: Ipv4Addr, addr: Ipv4Addr) -> Result<()> {
	if !subnet.contains(&addr)
		|| addr == subnet.network()
		|| addr == subnet.broadcast()
		|| addr == reserved
	{
		return Err(IpError::NotInSubnet(addr, subnet));
	}
	Ok(())
}
