// SPDX-License-Identifier: Apache-2.0
// Copyright Trellis Project Authors

//! UDP port numbers for tunnel endpoints.

use core::fmt::{Display, Formatter};
use core::num::NonZero;

/// A UDP port a tunnel listens on.
///
/// Port zero is reserved and never a legal endpoint, which this type makes
/// unrepresentable ([`NonZero`] keeps `Option<UdpPort>` the size of a `u16`).
#[repr(transparent)]
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize,
)]
#[serde(try_from = "u16", into = "u16")]
pub struct UdpPort(NonZero<u16>);

/// Errors that can occur when converting a `u16` to a [`UdpPort`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum InvalidUdpPort {
    /// Zero is reserved.
    #[error("zero is not a legal udp port")]
    Zero,
}

impl UdpPort {
    /// The IANA-assigned VXLAN port (4789).
    pub const VXLAN: UdpPort = match NonZero::new(4789) {
        Some(port) => UdpPort(port),
        None => unreachable!(),
    };

    /// Create a new [`UdpPort`] from a `u16`.
    ///
    /// # Errors
    ///
    /// Returns an error if the value is zero.
    pub fn new(port: u16) -> Result<UdpPort, InvalidUdpPort> {
        match NonZero::new(port) {
            None => Err(InvalidUdpPort::Zero),
            Some(port) => Ok(UdpPort(port)),
        }
    }

    /// Get the value of the [`UdpPort`] as a `u16`.
    #[must_use]
    pub const fn as_u16(self) -> u16 {
        self.0.get()
    }
}

impl TryFrom<u16> for UdpPort {
    type Error = InvalidUdpPort;

    fn try_from(port: u16) -> Result<UdpPort, Self::Error> {
        UdpPort::new(port)
    }
}

impl From<UdpPort> for u16 {
    fn from(port: UdpPort) -> u16 {
        port.as_u16()
    }
}

impl Display for UdpPort {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.as_u16())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod test {
    use super::*;

    #[test]
    fn fuzz_test() {
        bolero::check!().with_type().cloned().for_each(|val: u16| {
            if val == 0 {
                assert_eq!(UdpPort::new(val).unwrap_err(), InvalidUdpPort::Zero);
            } else {
                assert_eq!(UdpPort::new(val).unwrap().as_u16(), val);
            }
        });
    }

    #[test]
    fn vxlan_default() {
        assert_eq!(UdpPort::VXLAN.as_u16(), 4789);
    }
}
