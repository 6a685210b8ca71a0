// SPDX-License-Identifier: Apache-2.0
// Copyright Trellis Project Authors

//! Structured validation diagnostics.
//!
//! Validation never fails a mutation; it collects [`Problem`]s and delivers
//! them through the callback handed to [`Context::validate`] or
//! [`Context::commit`].  A commit proceeds to the data plane only when the
//! pass collected nothing.
//!
//! [`Context::validate`]: crate::Context::validate
//! [`Context::commit`]: crate::Context::commit

use core::fmt::{Display, Formatter};
use net::iface::InterfaceName;
use net::vnet::VnetId;

/// The reasons validation can reject a model.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProblemKind {
    /// A virt is connected through a phys that never attached to its net.
    #[error("virt is connected through a phys that is not attached to its network")]
    PhysNotAttached,
    /// A local virt's interface name does not resolve on this host.
    #[error("virt interface does not resolve")]
    VirtNoIf,
    /// Two virts of one net carry the same attribute value.
    #[error("two virts in one network share an attribute")]
    VirtDupAttr,
    /// Two nets of the same type carry the same network id.
    #[error("two networks of the same type share a network id")]
    NetDupId,
    /// A net's id does not fit its network type.
    #[error("network id does not fit the network type")]
    NetBadId,
    /// Static and non-static VXLAN networks share a UDP port on this host.
    #[error("incompatible vxlan networks share a udp port")]
    NetBadNettype,
    /// A local phys is missing an attribute its nets require.
    #[error("local phys is missing a required attribute")]
    PhysNoAttr,
    /// Two physes carry the same attribute value.
    #[error("two physes share an attribute")]
    PhysDupAttr,
    /// A data-plane operation failed during commit or cleanup.
    #[error("data-plane operation failed: {0}")]
    DataPlane(String),
}

/// A typed reference attached to a [`Problem`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProblemRef {
    /// A kernel interface name.
    If(InterfaceName),
    /// A net, by name (or a placeholder when unnamed).
    Net(String),
    /// A virt, by name (or a placeholder when unnamed).
    Virt(String),
    /// A phys, by name (or a placeholder when unnamed).
    Phys(String),
    /// The attribute involved.
    Attr(&'static str),
    /// A tenant-visible network id.
    NetId(VnetId),
}

impl Display for ProblemRef {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        match self {
            ProblemRef::If(name) => write!(f, "if {name}"),
            ProblemRef::Net(name) => write!(f, "net {name}"),
            ProblemRef::Virt(name) => write!(f, "virt {name}"),
            ProblemRef::Phys(name) => write!(f, "phys {name}"),
            ProblemRef::Attr(name) => write!(f, "attr {name}"),
            ProblemRef::NetId(id) => write!(f, "net id {id}"),
        }
    }
}

/// One validation diagnostic: a reason plus the objects involved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Problem {
    /// Why the model was rejected.
    pub kind: ProblemKind,
    /// The objects involved, most specific first.
    pub refs: Vec<ProblemRef>,
}

impl Problem {
    pub(crate) fn new(kind: ProblemKind, refs: Vec<ProblemRef>) -> Problem {
        Problem { kind, refs }
    }
}

impl Display for Problem {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.kind)?;
        let mut sep = " (";
        for reference in &self.refs {
            write!(f, "{sep}{reference}")?;
            sep = ", ";
        }
        if sep == ", " {
            write!(f, ")")?;
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod test {
    use super::*;

    #[test]
    fn renders_kind_and_refs() {
        let problem = Problem::new(
            ProblemKind::VirtDupAttr,
            vec![
                ProblemRef::Virt("a".to_string()),
                ProblemRef::Virt("b".to_string()),
                ProblemRef::Attr("mac"),
            ],
        );
        assert_eq!(
            problem.to_string(),
            "two virts in one network share an attribute (virt a, virt b, attr mac)"
        );
    }

    #[test]
    fn renders_bare_kind() {
        let problem = Problem::new(ProblemKind::PhysNoAttr, vec![]);
        assert_eq!(problem.to_string(), "local phys is missing a required attribute");
    }
}
