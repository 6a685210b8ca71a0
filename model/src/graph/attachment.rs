// SPDX-License-Identifier: Apache-2.0
// Copyright Trellis Project Authors

//! Attachments: the junction where a phys participates in a net.

use crate::arena::Handle;
use crate::graph::net::Net;
use crate::graph::phys::Phys;
use crate::graph::virt::Virt;
use crate::graph::Context;
use crate::state::Lifecycle;
use crate::Error;
use net::iface::InterfaceName;
use tracing::debug;

/// One (net × phys) junction, unique per pair.
///
/// Attachments created implicitly — because a virt connected through a phys
/// the user never attached — carry `explicitly_attached == false` and are
/// garbage-collected as soon as their last virt goes away.
pub struct Attachment {
    pub(crate) net: Handle<Net>,
    pub(crate) phys: Handle<Phys>,
    pub(crate) explicitly_attached: bool,
    pub(crate) committed_as_local: bool,
    pub(crate) virts: Vec<Handle<Virt>>,
    pub(crate) remote_pas: Vec<Handle<RemotePa>>,
    pub(crate) pa_views: Vec<Handle<RemotePa>>,
    pub(crate) tunnel_if: Option<InterfaceName>,
    pub(crate) bridge_if: Option<InterfaceName>,
    pub(crate) state: Lifecycle,
}

impl Attachment {
    /// The net this junction belongs to.
    #[must_use]
    pub fn net(&self) -> Handle<Net> {
        self.net
    }

    /// The phys this junction belongs to.
    #[must_use]
    pub fn phys(&self) -> Handle<Phys> {
        self.phys
    }

    /// False for junctions created implicitly by a virt connection.
    #[must_use]
    pub fn explicitly_attached(&self) -> bool {
        self.explicitly_attached
    }

    /// Whether the last commit realised this junction's local artifacts.
    #[must_use]
    pub fn committed_as_local(&self) -> bool {
        self.committed_as_local
    }

    /// The virts connected through this junction.
    #[must_use]
    pub fn virts(&self) -> &[Handle<Virt>] {
        &self.virts
    }

    /// The views this junction holds of its peers.
    #[must_use]
    pub fn remote_pas(&self) -> &[Handle<RemotePa>] {
        &self.remote_pas
    }

    /// The views other junctions hold of this one.
    #[must_use]
    pub fn pa_views(&self) -> &[Handle<RemotePa>] {
        &self.pa_views
    }

    /// The tunnel interface realised for this junction, if any.
    #[must_use]
    pub fn tunnel_if(&self) -> Option<&InterfaceName> {
        self.tunnel_if.as_ref()
    }

    /// The bridge realised for this junction, if any.
    #[must_use]
    pub fn bridge_if(&self) -> Option<&InterfaceName> {
        self.bridge_if.as_ref()
    }

    /// The lifecycle state.
    #[must_use]
    pub fn state(&self) -> Lifecycle {
        self.state
    }
}

/// A local attachment's mirrored record of one peer attachment.
pub struct RemotePa {
    pub(crate) of: Handle<Attachment>,
    pub(crate) peer: Handle<Attachment>,
    pub(crate) remote_virts: Vec<Handle<RemoteVirt>>,
    pub(crate) tunnel_if: Option<InterfaceName>,
    pub(crate) state: Lifecycle,
}

impl RemotePa {
    /// The local attachment holding the view.
    #[must_use]
    pub fn of(&self) -> Handle<Attachment> {
        self.of
    }

    /// The peer attachment viewed.
    #[must_use]
    pub fn peer(&self) -> Handle<Attachment> {
        self.peer
    }

    /// The per-peer views of the peer's virts.
    #[must_use]
    pub fn remote_virts(&self) -> &[Handle<RemoteVirt>] {
        &self.remote_virts
    }

    /// The per-peer tunnel realised for this view, if any.
    #[must_use]
    pub fn tunnel_if(&self) -> Option<&InterfaceName> {
        self.tunnel_if.as_ref()
    }

    /// The lifecycle state.
    #[must_use]
    pub fn state(&self) -> Lifecycle {
        self.state
    }
}

/// A local attachment's mirrored record of one virt on a peer.
pub struct RemoteVirt {
    pub(crate) of: Handle<RemotePa>,
    pub(crate) virt: Handle<Virt>,
    pub(crate) state: Lifecycle,
}

impl RemoteVirt {
    /// The remote-PA view this record hangs off.
    #[must_use]
    pub fn of(&self) -> Handle<RemotePa> {
        self.of
    }

    /// The peer virt viewed.
    #[must_use]
    pub fn virt(&self) -> Handle<Virt> {
        self.virt
    }

    /// The lifecycle state.
    #[must_use]
    pub fn state(&self) -> Lifecycle {
        self.state
    }
}

impl Context {
    /// The non-deleted attachment joining `net` and `phys`, if one exists.
    #[must_use]
    pub fn find_attachment(
        &self,
        net: Handle<Net>,
        phys: Handle<Phys>,
    ) -> Option<Handle<Attachment>> {
        let phys = self.physes.get(phys)?;
        phys.attachments.iter().copied().find(|&handle| {
            self.attachments
                .get(handle)
                .is_some_and(|a| a.net == net && !a.state.is_deleted())
        })
    }

    /// Attach `phys` to `net` explicitly.
    ///
    /// Attaching an already-attached pair promotes an implicit attachment to
    /// an explicit one and is otherwise a no-op.
    ///
    /// # Errors
    ///
    /// Returns an error if either side is gone or allocation fails.
    pub fn phys_attach(
        &mut self,
        phys: Handle<Phys>,
        net: Handle<Net>,
    ) -> Result<Handle<Attachment>, Error> {
        self.live_phys_mut(phys)?;
        self.live_net_mut(net)?;
        if let Some(existing) = self.find_attachment(net, phys) {
            if let Some(attachment) = self.attachments.get_mut(existing) {
                attachment.explicitly_attached = true;
            }
            return Ok(existing);
        }
        let handle = self.attachments.try_insert(Attachment {
            net,
            phys,
            explicitly_attached: true,
            committed_as_local: false,
            virts: Vec::new(),
            remote_pas: Vec::new(),
            pa_views: Vec::new(),
            tunnel_if: None,
            bridge_if: None,
            state: Lifecycle::New,
        })?;
        self.link_attachment(handle, net, phys);
        Ok(handle)
    }

    /// Create the implicit attachment a virt connection needs.
    pub(crate) fn implicit_attach(
        &mut self,
        net: Handle<Net>,
        phys: Handle<Phys>,
    ) -> Result<Handle<Attachment>, Error> {
        if let Some(existing) = self.find_attachment(net, phys) {
            return Ok(existing);
        }
        debug!("implicitly attaching a phys to a net for a virt connection");
        let handle = self.attachments.try_insert(Attachment {
            net,
            phys,
            explicitly_attached: false,
            committed_as_local: false,
            virts: Vec::new(),
            remote_pas: Vec::new(),
            pa_views: Vec::new(),
            tunnel_if: None,
            bridge_if: None,
            state: Lifecycle::New,
        })?;
        self.link_attachment(handle, net, phys);
        Ok(handle)
    }

    fn link_attachment(
        &mut self,
        handle: Handle<Attachment>,
        net: Handle<Net>,
        phys: Handle<Phys>,
    ) {
        if let Some(net) = self.nets.get_mut(net) {
            net.attachments.push(handle);
        }
        if let Some(phys) = self.physes.get_mut(phys) {
            phys.attachments.push(handle);
        }
    }

    /// Withdraw the explicit attachment of `phys` to `net`.
    ///
    /// The junction itself survives as an implicit attachment while virts
    /// remain connected through it, and is collected once they are gone.
    ///
    /// # Errors
    ///
    /// Returns an error if no attachment joins the pair.
    pub fn phys_detach(&mut self, phys: Handle<Phys>, net: Handle<Net>) -> Result<(), Error> {
        let handle = self
            .find_attachment(net, phys)
            .ok_or(Error::Gone("attachment"))?;
        if let Some(attachment) = self.attachments.get_mut(handle) {
            attachment.explicitly_attached = false;
        }
        self.collect_attachment_if_garbage(handle);
        Ok(())
    }

    /// Free the attachment per its lifecycle state.
    pub(crate) fn attachment_free(&mut self, handle: Handle<Attachment>) {
        let Some(attachment) = self.attachments.get_mut(handle) else {
            return;
        };
        if attachment.state.is_deleted() {
            return;
        }
        match attachment.state.freed() {
            Some(deleted) => {
                attachment.state = deleted;
            }
            None => self.free_attachment_now(handle),
        }
    }

    /// Collect an implicit attachment nothing is connected through.
    pub(crate) fn collect_attachment_if_garbage(&mut self, handle: Handle<Attachment>) {
        let garbage = self
            .attachments
            .get(handle)
            .is_some_and(|a| !a.explicitly_attached && a.virts.is_empty() && !a.state.is_deleted());
        if garbage {
            debug!("collecting an implicit attachment with no remaining virts");
            self.attachment_free(handle);
        }
    }

    /// Unlink and drop the attachment immediately.
    pub(crate) fn free_attachment_now(&mut self, handle: Handle<Attachment>) {
        if let Some(attachment) = self.attachments.remove(handle) {
            debug_assert!(attachment.remote_pas.is_empty());
            debug_assert!(attachment.pa_views.is_empty());
            if let Some(net) = self.nets.get_mut(attachment.net) {
                net.attachments.retain(|&a| a != handle);
            }
            if let Some(phys) = self.physes.get_mut(attachment.phys) {
                phys.attachments.retain(|&a| a != handle);
            }
        }
    }
}
