// SPDX-License-Identifier: Apache-2.0
// Copyright Trellis Project Authors

//! Mac address type and logic.

use core::fmt::{Display, Formatter};

/// A [MAC Address] type.
///
/// `Mac` is a transparent wrapper around `[u8; 6]` which provides a small
/// collection of methods and type safety.
///
/// [MAC Address]: https://en.wikipedia.org/wiki/MAC_address
#[repr(transparent)]
#[cfg_attr(any(test, feature = "bolero"), derive(bolero::TypeGenerator))]
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize,
)]
pub struct Mac(pub [u8; 6]);

impl Mac {
    /// The broadcast `Mac`.
    pub const BROADCAST: Mac = Mac([u8::MAX; 6]);
    /// The zero `Mac`.
    ///
    /// `ZERO` is illegal as a source or destination `Mac` in most contexts.
    pub const ZERO: Mac = Mac([0; 6]);

    /// Returns true iff the binary representation of the [`Mac`] is exclusively ones.
    #[must_use]
    pub fn is_broadcast(&self) -> bool {
        self == &Mac::BROADCAST
    }

    /// Returns true iff the least significant bit of the first octet is one.
    #[must_use]
    pub fn is_multicast(&self) -> bool {
        self.0[0] & 0x01 == 0x01
    }

    /// Returns true iff the least significant bit of the first octet is zero.
    #[must_use]
    pub fn is_unicast(&self) -> bool {
        !self.is_multicast()
    }

    /// Returns true iff the binary representation of the [`Mac`] is exclusively zeros.
    #[must_use]
    pub fn is_zero(&self) -> bool {
        self == &Mac::ZERO
    }
}

impl From<[u8; 6]> for Mac {
    fn from(value: [u8; 6]) -> Self {
        Mac(value)
    }
}

impl From<Mac> for [u8; 6] {
    fn from(value: Mac) -> Self {
        value.0
    }
}

impl AsRef<[u8; 6]> for Mac {
    fn as_ref(&self) -> &[u8; 6] {
        &self.0
    }
}

/// Errors which can occur while converting a string to a [`Mac`].
#[derive(Debug, thiserror::Error)]
pub enum MacFromStringError {
    /// Invalid string representation of a mac address.
    #[error("invalid string representation of mac address: {0}")]
    Invalid(String),
}

impl TryFrom<&str> for Mac {
    type Error = MacFromStringError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        let mut octets = [0u8; 6];
        let mut count = 0;
        for part in value.split(':') {
            if count == octets.len() || part.len() != 2 {
                return Err(MacFromStringError::Invalid(value.to_string()));
            }
            octets[count] = u8::from_str_radix(part, 16)
                .map_err(|_| MacFromStringError::Invalid(value.to_string()))?;
            count += 1;
        }
        if count != octets.len() {
            return Err(MacFromStringError::Invalid(value.to_string()));
        }
        Ok(Mac(octets))
    }
}

impl Display for Mac {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            self.0[0], self.0[1], self.0[2], self.0[3], self.0[4], self.0[5]
        )
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod test {
    use super::*;

    #[test]
    fn parse_display_round_trip() {
        bolero::check!().with_type().cloned().for_each(|mac: Mac| {
            let shown = mac.to_string();
            let parsed = Mac::try_from(shown.as_str()).unwrap();
            assert_eq!(parsed, mac);
        });
    }

    #[test]
    fn rejects_malformed() {
        for bad in ["", "00", "00:11:22:33:44", "00:11:22:33:44:55:66", "zz:11:22:33:44:55"] {
            assert!(Mac::try_from(bad).is_err(), "{bad} should not parse");
        }
    }

    #[test]
    fn classification() {
        assert!(Mac::BROADCAST.is_broadcast());
        assert!(Mac::BROADCAST.is_multicast());
        assert!(Mac::ZERO.is_zero());
        assert!(Mac([0x02, 0, 0, 0, 0, 1]).is_unicast());
    }
}
