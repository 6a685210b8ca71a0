// SPDX-License-Identifier: Apache-2.0
// Copyright Trellis Project Authors

//! Tenant-visible virtual network identifiers.

use core::fmt::{Display, Formatter};

/// The tenant-visible identifier of one virtual network.
///
/// A [`VnetId`] is a plain 32-bit value; how many of those bits are usable
/// depends on the network type carrying it.
/// A VLAN network can express 12 bits ([`VnetId::VLAN_MAX`]), a VXLAN
/// network 24 bits ([`VnetId::VXLAN_MAX`]), and a direct network ignores
/// the value entirely.
/// Zero is legal: direct networks conventionally use it.
///
/// Range enforcement therefore belongs to validation (which knows the
/// network type), not to construction.
#[repr(transparent)]
#[cfg_attr(any(test, feature = "bolero"), derive(bolero::TypeGenerator))]
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize,
)]
#[serde(transparent)]
pub struct VnetId(pub u32);

impl VnetId {
    /// The largest identifier a VLAN network can carry (2^12 - 1).
    pub const VLAN_MAX: u32 = 0x0FFF;
    /// The largest identifier a VXLAN network can carry (2^24 - 1).
    pub const VXLAN_MAX: u32 = 0x00FF_FFFF;

    /// Treat this [`VnetId`] as a `u32`.
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.0
    }

    /// Returns true iff the identifier fits under the given inclusive limit.
    #[must_use]
    pub const fn fits(self, limit: u32) -> bool {
        self.0 <= limit
    }
}

impl From<u32> for VnetId {
    fn from(value: u32) -> Self {
        VnetId(value)
    }
}

impl From<VnetId> for u32 {
    fn from(value: VnetId) -> Self {
        value.0
    }
}

impl Display for VnetId {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod test {
    use super::*;

    #[test]
    fn range_limits() {
        bolero::check!().with_type().cloned().for_each(|id: VnetId| {
            if id.fits(VnetId::VLAN_MAX) {
                assert!(id.fits(VnetId::VXLAN_MAX));
            }
            if !id.fits(VnetId::VXLAN_MAX) {
                assert!(id.as_u32() > VnetId::VXLAN_MAX);
            }
        });
    }

    #[test]
    fn zero_is_legal() {
        let id = VnetId(0);
        assert!(id.fits(VnetId::VLAN_MAX));
        assert_eq!(id.to_string(), "0");
    }
}
