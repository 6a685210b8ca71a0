// SPDX-License-Identifier: Apache-2.0
// Copyright Trellis Project Authors

//! Virtual interfaces.

use crate::arena::Handle;
use crate::graph::attachment::{Attachment, RemoteVirt};
use crate::graph::net::Net;
use crate::graph::phys::Phys;
use crate::graph::Context;
use crate::state::Lifecycle;
use crate::Error;
use net::iface::InterfaceName;
use net::mac::Mac;

/// One virtual interface (a VM tap, typically) belonging to a net.
pub struct Virt {
    pub(crate) name: Option<String>,
    pub(crate) net: Handle<Net>,
    pub(crate) mac: Option<Mac>,
    pub(crate) connected_through: Option<Handle<Attachment>>,
    pub(crate) connected_if: Option<InterfaceName>,
    pub(crate) committed_to: Option<Handle<Attachment>>,
    pub(crate) committed_if: Option<InterfaceName>,
    pub(crate) views: Vec<Handle<RemoteVirt>>,
    pub(crate) state: Lifecycle,
}

impl Virt {
    /// The virt's name, if named.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// The net this virt belongs to.
    #[must_use]
    pub fn net(&self) -> Handle<Net> {
        self.net
    }

    /// The MAC attribute, if set.
    #[must_use]
    pub fn mac(&self) -> Option<Mac> {
        self.mac
    }

    /// The attachment the virt is currently connected through.
    #[must_use]
    pub fn connected_through(&self) -> Option<Handle<Attachment>> {
        self.connected_through
    }

    /// The interface of the current configuration.
    #[must_use]
    pub fn connected_if(&self) -> Option<&InterfaceName> {
        self.connected_if.as_ref()
    }

    /// The attachment the last commit realised this virt on.
    #[must_use]
    pub fn committed_to(&self) -> Option<Handle<Attachment>> {
        self.committed_to
    }

    /// The interface the last commit realised.
    #[must_use]
    pub fn committed_if(&self) -> Option<&InterfaceName> {
        self.committed_if.as_ref()
    }

    /// The remote views peers hold of this virt.
    #[must_use]
    pub fn views(&self) -> &[Handle<RemoteVirt>] {
        &self.views
    }

    /// The lifecycle state.
    #[must_use]
    pub fn state(&self) -> Lifecycle {
        self.state
    }
}

impl Context {
    /// A new virt in `net`.
    ///
    /// # Errors
    ///
    /// Returns an error if the net is gone or allocation fails.
    pub fn virt_new(&mut self, net: Handle<Net>) -> Result<Handle<Virt>, Error> {
        self.live_net_mut(net)?;
        let handle = self.virts.try_insert(Virt {
            name: None,
            net,
            mac: None,
            connected_through: None,
            connected_if: None,
            committed_to: None,
            committed_if: None,
            views: Vec::new(),
            state: Lifecycle::New,
        })?;
        if let Some(net) = self.nets.get_mut(net) {
            net.virts.push(handle);
        }
        Ok(handle)
    }

    /// Name the virt uniquely within its net.
    ///
    /// # Errors
    ///
    /// Returns an error if the virt is gone or the name is taken.
    pub fn virt_set_name(&mut self, handle: Handle<Virt>, name: &str) -> Result<(), Error> {
        let net = self.live_virt_mut(handle)?.net;
        let Some(net) = self.nets.get_mut(net) else {
            return Err(Error::Gone("net"));
        };
        net.virt_names.claim(name, handle)?;
        let old = self
            .live_virt_mut(handle)?
            .name
            .replace(name.to_string());
        if let Some(old) = old {
            if old != name {
                let net = self.live_virt_mut(handle)?.net;
                if let Some(net) = self.nets.get_mut(net) {
                    net.virt_names.release(&old);
                }
            }
        }
        Ok(())
    }

    /// The virt's name, if named.
    ///
    /// # Errors
    ///
    /// Returns an error if the handle is stale.
    pub fn virt_get_name(&self, handle: Handle<Virt>) -> Result<Option<&str>, Error> {
        Ok(self.virt(handle)?.name())
    }

    /// Look a virt up by name within `net`.
    #[must_use]
    pub fn virt_by_name(&self, net: Handle<Net>, name: &str) -> Option<Handle<Virt>> {
        self.nets
            .get(net)?
            .virt_names
            .lookup(name)
            .filter(|&handle| self.virts.get(handle).is_some_and(|v| !v.state.is_deleted()))
    }

    /// Set the MAC attribute.
    ///
    /// # Errors
    ///
    /// Returns an error if the virt is gone.
    pub fn virt_set_mac(&mut self, handle: Handle<Virt>, mac: Mac) -> Result<(), Error> {
        let virt = self.live_virt_mut(handle)?;
        if virt.mac != Some(mac) {
            virt.mac = Some(mac);
            virt.state = virt.state.renew();
        }
        Ok(())
    }

    /// Clear the MAC attribute.
    ///
    /// # Errors
    ///
    /// Returns an error if the virt is gone.
    pub fn virt_clear_mac(&mut self, handle: Handle<Virt>) -> Result<(), Error> {
        let virt = self.live_virt_mut(handle)?;
        if virt.mac.take().is_some() {
            virt.state = virt.state.renew();
        }
        Ok(())
    }

    /// Connect the virt through `phys` as kernel interface `iface`.
    ///
    /// Connecting through a phys that is not attached to the virt's net
    /// creates an implicit attachment (validation will insist it be made
    /// explicit before the commit goes through).
    ///
    /// # Errors
    ///
    /// Returns an error if the virt or phys is gone, or the interface name
    /// is illegal.
    pub fn virt_connect(
        &mut self,
        handle: Handle<Virt>,
        phys: Handle<Phys>,
        iface: &str,
    ) -> Result<(), Error> {
        let iface = InterfaceName::try_from(iface)?;
        let net = self.live_virt_mut(handle)?.net;
        self.live_phys_mut(phys)?;

        {
            let existing = self.find_attachment(net, phys);
            let virt = self.live_virt_mut(handle)?;
            if existing.is_some()
                && virt.connected_through == existing
                && virt.connected_if.as_ref() == Some(&iface)
            {
                return Ok(());
            }
        }
        // unlink first, but only collect the old junction if the new
        // connection does not land on it again
        let old = self.unlink_connection(handle);
        let attachment = self.implicit_attach(net, phys)?;
        let virt = self.live_virt_mut(handle)?;
        virt.connected_through = Some(attachment);
        virt.connected_if = Some(iface);
        virt.state = virt.state.renew();
        if let Some(attachment) = self.attachments.get_mut(attachment) {
            attachment.virts.push(handle);
        }
        if let Some(old) = old {
            if old != attachment {
                self.collect_attachment_if_garbage(old);
            }
        }
        Ok(())
    }

    /// Disconnect the virt from its attachment.
    ///
    /// # Errors
    ///
    /// Returns an error if the virt is gone.
    pub fn virt_disconnect(&mut self, handle: Handle<Virt>) -> Result<(), Error> {
        self.live_virt_mut(handle)?;
        if self.virt(handle)?.connected_through.is_some() {
            let old = self.unlink_connection(handle);
            let virt = self.live_virt_mut(handle)?;
            virt.state = virt.state.renew();
            if let Some(old) = old {
                self.collect_attachment_if_garbage(old);
            }
        }
        Ok(())
    }

    /// Drop the current connection, returning the junction it went through.
    ///
    /// The caller decides whether the old junction is garbage.
    fn unlink_connection(&mut self, handle: Handle<Virt>) -> Option<Handle<Attachment>> {
        let virt = self.virts.get_mut(handle)?;
        let attachment = virt.connected_through.take()?;
        virt.connected_if = None;
        if let Some(entry) = self.attachments.get_mut(attachment) {
            entry.virts.retain(|&v| v != handle);
        }
        Some(attachment)
    }

    /// Free the virt per its lifecycle state.
    ///
    /// # Errors
    ///
    /// Returns an error if the virt is gone.
    pub fn virt_free(&mut self, handle: Handle<Virt>) -> Result<(), Error> {
        let (freed, has_views) = {
            let virt = self.live_virt_mut(handle)?;
            (virt.state.freed(), !virt.views.is_empty())
        };
        // a failed commit can leave views on a never-acked virt; those still
        // need a decommit pass, so only a view-less virt leaves the graph
        // immediately
        if freed.is_none() && !has_views {
            let old = self.unlink_connection(handle);
            self.free_virt_now(handle);
            if let Some(old) = old {
                self.collect_attachment_if_garbage(old);
            }
        } else {
            let virt = self.live_virt_mut(handle)?;
            virt.state = Lifecycle::Delete;
        }
        Ok(())
    }

    /// Unlink and drop the virt immediately.
    pub(crate) fn free_virt_now(&mut self, handle: Handle<Virt>) {
        if let Some(virt) = self.virts.remove(handle) {
            debug_assert!(virt.views.is_empty());
            if let Some(attachment) = virt.connected_through {
                if let Some(attachment) = self.attachments.get_mut(attachment) {
                    attachment.virts.retain(|&v| v != handle);
                }
            }
            if let Some(net) = self.nets.get_mut(virt.net) {
                net.virts.retain(|&v| v != handle);
                if let Some(name) = virt.name {
                    net.virt_names.release(&name);
                }
            }
        }
    }
}
