// SPDX-License-Identifier: Apache-2.0
// Copyright Trellis Project Authors

//! Descriptions of the TC actions a materialised filter carries.

use net::iface::InterfaceIndex;
use std::net::IpAddr;

/// One TC action, described; emission belongs to the caller.
///
/// The variants cover what the network-type drivers install: generic actions
/// to terminate or fall through, mirred redirects toward taps and tunnels,
/// and tunnel-key metadata for VXLAN encapsulation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ActionSpec {
    /// Accept the packet (gact ok).
    Ok,
    /// Drop the packet (gact drop).
    Drop,
    /// Fall through to the next filter (gact continue).
    Continue,
    /// Redirect the packet out of `dev` (mirred egress redirect).
    RedirectEgress {
        /// The interface to redirect to.
        dev: InterfaceIndex,
    },
    /// Attach tunnel metadata before a redirect into a tunnel device.
    TunnelKeySet {
        /// The tunnel key, a VXLAN vni on this data plane.
        id: u32,
        /// The remote endpoint.
        dst: IpAddr,
    },
    /// Continue classification in another chain.
    Goto {
        /// The target chain index.
        chain: u32,
    },
}

impl ActionSpec {
    /// Returns true iff classification stops at this action.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        match self {
            ActionSpec::Ok | ActionSpec::Drop | ActionSpec::Goto { .. } => true,
            ActionSpec::Continue
            | ActionSpec::RedirectEgress { .. }
            | ActionSpec::TunnelKeySet { .. } => false,
        }
    }
}
