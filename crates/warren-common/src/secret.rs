// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Redacting wrapper for sensitive values.
//!
//! [`Secret<T>`] guarantees that wrapped values never reach logs or serialized
//! output: Debug, Display, and Serialize all emit `[REDACTED]`, and the inner
//! value is zeroized on drop. Access requires an explicit [`Secret::expose`]
//! call, which keeps secret reads visible in code review.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use zeroize::Zeroize;

/// The redaction placeholder used in all output.
pub const REDACTED: &str = "[REDACTED]";

#[derive(Zeroize)]
#[zeroize(drop)]
pub struct Secret<T>
where
	T: Zeroize,
{
	inner: T,
}

/// Convenience alias for the common case of secret strings.
pub type SecretString = Secret<String>;

impl<T> Secret<T>
where
	T: Zeroize,
{
	pub fn new(inner: T) -> Self {
		Self { inner }
	}

	/// Explicitly access the inner value.
	pub fn expose(&self) -> &T {
		&self.inner
	}
}

impl<T> Clone for Secret<T>
where
	T: Zeroize + Clone,
{
	fn clone(&self) -> Self {
		Self {
			inner: self.inner.clone(),
		}
	}
}

impl<T> fmt::Debug for Secret<T>
where
	T: Zeroize,
{
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_tuple("Secret").field(&REDACTED).finish()
	}
}

impl<T> fmt::Display for Secret<T>
where
	T: Zeroize,
{
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(REDACTED)
	}
}

impl<T> PartialEq for Secret<T>
where
	T: Zeroize + PartialEq,
{
	fn eq(&self, other: &Self) -> bool {
		self.inner == other.inner
	}
}

impl<T> Eq for Secret<T> where T: Zeroize + Eq {}

impl<T> Serialize for Secret<T>
where
	T: Zeroize,
{
	fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
	where
		S: Serializer,
	{
		serializer.serialize_str(REDACTED)
	}
}

impl<'de, T> Deserialize<'de> for Secret<T>
where
	T: Deserialize<'de> + Zeroize,
{
	fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
	where
		D: Deserializer<'de>,
	{
		let inner = T::deserialize(deserializer)?;
		Ok(Secret::new(inner))
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn debug_is_redacted() {
		let secret = Secret::new("swordfish".to_string());
		let debug = format!("{secret:?}");
		assert!(!debug.contains("swordfish"));
		assert!(debug.contains(REDACTED));
	}

	#[test]
	fn display_is_redacted() {
		let secret = Secret::new("swordfish".to_string());
		assert_eq!(format!("{secret}"), REDACTED);
	}

	#[test]
	fn serialize_is_redacted() {
		let secret = Secret::new("swordfish".to_string());
		let json = serde_json::to_string(&secret).unwrap();
		assert!(!json.contains("swordfish"));
		assert!(json.contains(REDACTED));
	}

	#[test]
	fn deserialize_populates_secret() {
		let secret: Secret<String> = serde_json::from_str(r#""swordfish""#).unwrap();
		assert_eq!(secret.expose(), "swordfish");
	}

	#[test]
	fn expose_returns_inner_value() {
		let secret = Secret::new("swordfish".to_string());
		assert_eq!(secret.expose(), "swordfish");
	}

	#[test]
	fn equality_compares_inner_values() {
		let a = Secret::new("key".to_string());
		let b = Secret::new("key".to_string());
		let c = Secret::new("other".to_string());
		assert_eq!(a, b);
		assert_ne!(a, c);
	}
}
