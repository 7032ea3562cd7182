//! Bluetooth hardware addresses.
//!
//! The downstream strips have no addressing of their own beyond the 48-bit
//! Bluetooth device address, so that address is the identity of a device
//! everywhere in the bridge: in the config file, in the registry, and in the
//! status snapshot.  Addresses are normalised to the upper-case, colon
//! separated form (`AA:BB:CC:DD:EE:FF`) so that `aa-bb-…` from an environment
//! variable and `AA:BB:…` from a scan compare equal.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors produced while parsing a [`DeviceAddress`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DeviceAddressError {
    /// The string did not contain exactly six octets.
    #[error("expected 6 octets in hardware address '{input}', found {found}")]
    WrongOctetCount { input: String, found: usize },

    /// One of the octets was not a two-digit hexadecimal number.
    #[error("invalid octet '{octet}' in hardware address '{input}'")]
    InvalidOctet { input: String, octet: String },
}

/// A normalised 48-bit Bluetooth device address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DeviceAddress([u8; 6]);

impl DeviceAddress {
    /// Creates an address from raw octets (most significant first).
    pub const fn from_octets(octets: [u8; 6]) -> Self {
        Self(octets)
    }

    /// Returns the raw octets.
    pub fn octets(&self) -> [u8; 6] {
        self.0
    }

    /// Parses a textual address.  Accepts `:` or `-` separators and either case.
    ///
    /// # Errors
    ///
    /// Returns [`DeviceAddressError`] if the input is not six hex octets.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use melkoleaf_core::DeviceAddress;
    ///
    /// let addr = DeviceAddress::parse(" be-ef-00-11-22-33 ").unwrap();
    /// assert_eq!(addr.to_string(), "BE:EF:00:11:22:33");
    /// ```
    pub fn parse(input: &str) -> Result<Self, DeviceAddressError> {
        let trimmed = input.trim();
        let parts: Vec<&str> = trimmed.split(|c| c == ':' || c == '-').collect();
        if parts.len() != 6 {
            return Err(DeviceAddressError::WrongOctetCount {
                input: trimmed.to_string(),
                found: parts.len(),
            });
        }

        let mut octets = [0u8; 6];
        for (slot, part) in octets.iter_mut().zip(&parts) {
            if part.len() != 2 {
                return Err(DeviceAddressError::InvalidOctet {
                    input: trimmed.to_string(),
                    octet: (*part).to_string(),
                });
            }
            *slot = u8::from_str_radix(part, 16).map_err(|_| DeviceAddressError::InvalidOctet {
                input: trimmed.to_string(),
                octet: (*part).to_string(),
            })?;
        }
        Ok(Self(octets))
    }
}

impl fmt::Display for DeviceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02X}:{b:02X}:{c:02X}:{d:02X}:{e:02X}:{g:02X}")
    }
}

impl FromStr for DeviceAddress {
    type Err = DeviceAddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for DeviceAddress {
    type Error = DeviceAddressError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<DeviceAddress> for String {
    fn from(addr: DeviceAddress) -> Self {
        addr.to_string()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
