// SPDX-License-Identifier: Apache-2.0
// Copyright Trellis Project Authors

//! The interface network-type drivers implement.
//!
//! A driver realises one tunnelling and switching discipline by programming
//! the kernel when the commit engine asks it to.  Every hook has a default
//! no-op body, so a driver implements exactly the capabilities its
//! discipline needs: a learning driver never sees remote virts, a static
//! driver implements all of them.
//!
//! The engine upholds the call ordering contract: a local PA is created
//! before any local virt is added to it, a remote PA before any remote virt
//! on it, and removals happen in reverse.

use crate::graph::settings::{NettypeKind, SwitchDiscipline};
use crate::problem::Problem;
use link::LinkLookup;
use net::iface::InterfaceName;
use net::mac::Mac;
use net::vnet::VnetId;
use std::net::IpAddr;

/// A driver-side failure; fails the entire commit.
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct OpsError(String);

impl OpsError {
    /// An error carrying `message`.
    #[must_use]
    pub fn msg(message: impl Into<String>) -> OpsError {
        OpsError(message.into())
    }
}

impl From<link::LinkError> for OpsError {
    fn from(err: link::LinkError) -> OpsError {
        OpsError(err.to_string())
    }
}

/// Counter behind [`OpsEnv::fresh_ifname`].
#[derive(Debug, Default)]
pub(crate) struct IfnameAlloc(u32);

impl IfnameAlloc {
    pub(crate) fn next(&mut self) -> InterfaceName {
        let name = format!("trl-{}", self.0);
        self.0 = self.0.wrapping_add(1);
        #[allow(clippy::expect_used)] // "trl-<u32>" is always a legal interface name
        InterfaceName::try_from(name).expect("generated interface name")
    }
}

/// What the context lends a driver hook while it runs.
pub struct OpsEnv<'a> {
    pub(crate) links: &'a dyn LinkLookup,
    pub(crate) ifnames: &'a mut IfnameAlloc,
}

impl OpsEnv<'_> {
    /// Interface-name resolution on this host.
    #[must_use]
    pub fn links(&self) -> &dyn LinkLookup {
        self.links
    }

    /// A kernel interface name no other trellis object uses.
    pub fn fresh_ifname(&mut self) -> InterfaceName {
        self.ifnames.next()
    }
}

/// A net, as a driver sees it.
#[derive(Debug, Clone)]
pub struct NetView {
    /// The net's name, if it has one.
    pub name: Option<String>,
    /// The tenant-visible network id.
    pub vnet_id: VnetId,
    /// The network type, with its tunnel parameters.
    pub nettype: NettypeKind,
    /// The switching discipline in force.
    pub discipline: SwitchDiscipline,
}

/// A phys, as a driver sees it.
#[derive(Debug, Clone)]
pub struct PhysView {
    /// The phys's name, if it has one.
    pub name: Option<String>,
    /// The kernel interface carrying tunnel traffic on this host.
    pub iface: Option<InterfaceName>,
    /// The host's tunnel endpoint address.
    pub ip: Option<IpAddr>,
    /// Whether the phys is the host running this process.
    pub is_local: bool,
}

/// One attachment (phys × net junction), as a driver sees it.
///
/// The artifact slots are the driver's to fill in `create_pa` and to read
/// back in `destroy_pa`; the engine persists them on the attachment in
/// between.
#[derive(Debug, Clone)]
pub struct PaView {
    /// The net this attachment belongs to.
    pub net: NetView,
    /// The phys this attachment belongs to.
    pub phys: PhysView,
    /// False for attachments created implicitly by a virt connection.
    pub explicitly_attached: bool,
    /// The tunnel interface realised for this attachment, if any.
    pub tunnel_if: Option<InterfaceName>,
    /// The bridge realised for this attachment, if any.
    pub bridge_if: Option<InterfaceName>,
}

/// A virt on a local attachment, as a driver sees it.
#[derive(Debug, Clone)]
pub struct VirtView {
    /// The virt's name, if it has one.
    pub name: Option<String>,
    /// The virt's MAC attribute, if set.
    pub mac: Option<Mac>,
    /// The interface being (or last) committed for this virt.
    pub iface: Option<InterfaceName>,
    /// The attachment the virt connects through.
    pub pa: PaView,
}

/// A local attachment's view of one peer attachment.
#[derive(Debug, Clone)]
pub struct RemotePaView {
    /// The local anchor.
    pub local: PaView,
    /// The peer being routed toward.
    pub peer: PaView,
    /// The per-peer tunnel realised for this view, if any.
    pub tunnel_if: Option<InterfaceName>,
}

/// A local attachment's view of one virt on a peer attachment.
#[derive(Debug, Clone)]
pub struct RemoteVirtView {
    /// The local anchor.
    pub local: PaView,
    /// The peer the virt lives on.
    pub peer: PaView,
    /// The remote virt's name, if it has one.
    pub name: Option<String>,
    /// The remote virt's MAC attribute, if set.
    pub mac: Option<Mac>,
}

/// The operations one network type implements.
///
/// Every method defaults to a no-op; the engine calls them all
/// unconditionally and absent capabilities simply do nothing.
#[allow(unused_variables)]
pub trait NettypeOps {
    /// Driver-specific pre-commit checks for one attachment.
    fn validate_pa(&self, env: &mut OpsEnv<'_>, pa: &PaView, problems: &mut Vec<Problem>) {}

    /// Driver-specific pre-commit checks for one virt.
    fn validate_virt(&self, env: &mut OpsEnv<'_>, virt: &VirtView, problems: &mut Vec<Problem>) {}

    /// Create the local data-plane artifacts of an attachment.
    ///
    /// # Errors
    ///
    /// Returns an error to fail the commit.
    fn create_pa(&self, env: &mut OpsEnv<'_>, pa: &mut PaView) -> Result<(), OpsError> {
        Ok(())
    }

    /// Tear down what `create_pa` built.
    ///
    /// # Errors
    ///
    /// Returns an error to fail the commit.
    fn destroy_pa(&self, env: &mut OpsEnv<'_>, pa: &mut PaView) -> Result<(), OpsError> {
        Ok(())
    }

    /// Attach a local virt's interface to the attachment.
    ///
    /// # Errors
    ///
    /// Returns an error to fail the commit.
    fn add_virt(&self, env: &mut OpsEnv<'_>, virt: &VirtView) -> Result<(), OpsError> {
        Ok(())
    }

    /// Detach a local virt's interface.
    ///
    /// # Errors
    ///
    /// Returns an error to fail the commit.
    fn remove_virt(&self, env: &mut OpsEnv<'_>, virt: &VirtView) -> Result<(), OpsError> {
        Ok(())
    }

    /// Program routing toward a peer attachment.
    ///
    /// # Errors
    ///
    /// Returns an error to fail the commit.
    fn add_remote_pa(&self, env: &mut OpsEnv<'_>, remote: &mut RemotePaView) -> Result<(), OpsError> {
        Ok(())
    }

    /// Tear down routing toward a peer attachment.
    ///
    /// # Errors
    ///
    /// Returns an error to fail the commit.
    fn remove_remote_pa(
        &self,
        env: &mut OpsEnv<'_>,
        remote: &mut RemotePaView,
    ) -> Result<(), OpsError> {
        Ok(())
    }

    /// Program routing toward one virt on a peer (static disciplines only).
    ///
    /// # Errors
    ///
    /// Returns an error to fail the commit.
    fn add_remote_virt(&self, env: &mut OpsEnv<'_>, remote: &RemoteVirtView) -> Result<(), OpsError> {
        Ok(())
    }

    /// Tear down routing toward one virt on a peer.
    ///
    /// # Errors
    ///
    /// Returns an error to fail the commit.
    fn remove_remote_virt(
        &self,
        env: &mut OpsEnv<'_>,
        remote: &RemoteVirtView,
    ) -> Result<(), OpsError> {
        Ok(())
    }
}

/// The driver bound to freshly created settings: every hook is a no-op.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopOps;

impl NettypeOps for NoopOps {}
