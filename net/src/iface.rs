// SPDX-License-Identifier: Apache-2.0
// Copyright Trellis Project Authors

//! Kernel network interface names and indexes.

use core::fmt::{Debug, Display, Formatter};

/// A network interface id (also known as ifindex in linux).
///
/// These are 32-bit values assigned by the kernel; they mean nothing between
/// machines or across reboots and cannot be meaningfully persisted.
#[repr(transparent)]
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct InterfaceIndex(u32);

impl InterfaceIndex {
    /// Treat the provided `u32` as an [`InterfaceIndex`].
    #[must_use]
    pub fn new(raw: u32) -> InterfaceIndex {
        InterfaceIndex(raw)
    }

    /// Treat this [`InterfaceIndex`] as a `u32`.
    #[must_use]
    pub fn to_u32(self) -> u32 {
        self.0
    }
}

impl From<u32> for InterfaceIndex {
    fn from(value: u32) -> InterfaceIndex {
        InterfaceIndex::new(value)
    }
}

impl From<InterfaceIndex> for u32 {
    fn from(value: InterfaceIndex) -> Self {
        value.to_u32()
    }
}

impl Debug for InterfaceIndex {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        <_ as Debug>::fmt(&self.0, f)
    }
}

impl Display for InterfaceIndex {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        <_ as Display>::fmt(&self.0, f)
    }
}

/// A string which has been checked to be a legal linux network interface name.
///
/// Legal names are non-empty, at most 15 bytes, ASCII, free of whitespace,
/// `/`, and interior nulls, and are not `.` or `..`.
#[repr(transparent)]
#[derive(Clone, Ord, PartialOrd, Eq, PartialEq, Hash, Debug, serde::Serialize, serde::Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct InterfaceName(String);

impl InterfaceName {
    /// The maximum legal length of a linux network interface name, not
    /// counting the trailing NUL the kernel stores.
    pub const MAX_LEN: usize = 15;
}

/// Errors which may occur when mapping a general `String` into an [`InterfaceName`].
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, thiserror::Error)]
pub enum IllegalInterfaceName {
    /// Interface names have at least one character.
    #[error("interface name must be at least one character")]
    Empty,
    /// `.` and `..` are path components, not interface names.
    #[error("interface name must not be . or ..")]
    Dots,
    /// The kernel caps names at [`InterfaceName::MAX_LEN`] bytes.
    #[error("interface name {0} is too long")]
    TooLong(String),
    /// Only printable ASCII without whitespace, `/`, or NUL is accepted.
    #[error("interface name {0} contains illegal characters")]
    IllegalCharacters(String),
}

impl TryFrom<String> for InterfaceName {
    type Error = IllegalInterfaceName;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        if value.is_empty() {
            return Err(IllegalInterfaceName::Empty);
        }
        if value == "." || value == ".." {
            return Err(IllegalInterfaceName::Dots);
        }
        if value.len() > InterfaceName::MAX_LEN {
            return Err(IllegalInterfaceName::TooLong(value));
        }
        let legal = |c: char| c.is_ascii_graphic() && c != '/' && c != ':';
        if !value.chars().all(legal) {
            return Err(IllegalInterfaceName::IllegalCharacters(value));
        }
        Ok(InterfaceName(value))
    }
}

impl TryFrom<&str> for InterfaceName {
    type Error = IllegalInterfaceName;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::try_from(value.to_string())
    }
}

impl From<InterfaceName> for String {
    fn from(value: InterfaceName) -> Self {
        value.0
    }
}

impl AsRef<str> for InterfaceName {
    fn as_ref(&self) -> &str {
        self.0.as_str()
    }
}

impl Display for InterfaceName {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod test {
    use super::*;

    #[test]
    fn accepts_common_names() {
        for good in ["eth0", "tap0", "br-net1", "vxlan.100", "trl-7"] {
            assert!(InterfaceName::try_from(good).is_ok(), "{good} should parse");
        }
    }

    #[test]
    fn rejects_illegal_names() {
        assert_eq!(
            InterfaceName::try_from("").unwrap_err(),
            IllegalInterfaceName::Empty
        );
        assert_eq!(
            InterfaceName::try_from("..").unwrap_err(),
            IllegalInterfaceName::Dots
        );
        assert!(matches!(
            InterfaceName::try_from("0123456789abcdef").unwrap_err(),
            IllegalInterfaceName::TooLong(_)
        ));
        for bad in ["with space", "tab\there", "slash/y", "col:on", "caf\u{e9}"] {
            assert!(matches!(
                InterfaceName::try_from(bad).unwrap_err(),
                IllegalInterfaceName::IllegalCharacters(_)
            ));
        }
    }
}
