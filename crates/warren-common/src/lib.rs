// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Shared leaf types for the Warren control plane.
//!
//! This crate knows nothing about the registry, the driver, or the
//! configuration grammar. It provides:
//!
//! - Curve25519 key material ([`keys`]) in the tunnel driver's base64 encoding
//! - a redacting [`Secret`] wrapper for values that must never be logged
//! - IPv4 pool arithmetic ([`ip`]) for deterministic peer address allocation

pub mod ip;
pub mod keys;
pub mod secret;

pub use ip::{interface_address, next_free_address, IpError};
pub use keys::{KeyError, WgKeyPair, WgPresharedKey, WgPrivateKey, WgPublicKey};
pub use secret::{Secret, SecretString};
