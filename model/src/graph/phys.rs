// SPDX-License-Identifier: Apache-2.0
// Copyright Trellis Project Authors

//! Physical hosts.

use crate::arena::Handle;
use crate::graph::attachment::Attachment;
use crate::graph::Context;
use crate::state::Lifecycle;
use crate::Error;
use net::iface::InterfaceName;
use std::net::IpAddr;
use tracing::debug;

/// One physical host of the fleet.
///
/// The same model runs on every host; `is_local` marks the phys that is the
/// machine executing this process.
pub struct Phys {
    pub(crate) name: Option<String>,
    pub(crate) iface: Option<InterfaceName>,
    pub(crate) ip: Option<IpAddr>,
    pub(crate) is_local: bool,
    pub(crate) committed_as_local: bool,
    pub(crate) attachments: Vec<Handle<Attachment>>,
    pub(crate) state: Lifecycle,
}

impl Phys {
    /// The phys's name, if named.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// The kernel interface carrying overlay traffic on this host.
    #[must_use]
    pub fn iface(&self) -> Option<&InterfaceName> {
        self.iface.as_ref()
    }

    /// The host's tunnel endpoint address.
    #[must_use]
    pub fn ip(&self) -> Option<IpAddr> {
        self.ip
    }

    /// Whether this phys is the host running the process.
    #[must_use]
    pub fn is_local(&self) -> bool {
        self.is_local
    }

    /// The locality the last commit realised.
    #[must_use]
    pub fn committed_as_local(&self) -> bool {
        self.committed_as_local
    }

    /// The attachments this phys participates in.
    #[must_use]
    pub fn attachments(&self) -> &[Handle<Attachment>] {
        &self.attachments
    }

    /// The lifecycle state.
    #[must_use]
    pub fn state(&self) -> Lifecycle {
        self.state
    }
}

impl Context {
    /// A new phys.
    ///
    /// # Errors
    ///
    /// Returns an error if allocation fails.
    pub fn phys_new(&mut self) -> Result<Handle<Phys>, Error> {
        self.physes.try_insert(Phys {
            name: None,
            iface: None,
            ip: None,
            is_local: false,
            committed_as_local: false,
            attachments: Vec::new(),
            state: Lifecycle::New,
        })
    }

    /// Name the phys uniquely within the context.
    ///
    /// # Errors
    ///
    /// Returns an error if the phys is gone or the name is taken.
    pub fn phys_set_name(&mut self, handle: Handle<Phys>, name: &str) -> Result<(), Error> {
        self.live_phys_mut(handle)?;
        self.phys_names.claim(name, handle)?;
        let phys = self.live_phys_mut(handle)?;
        if let Some(old) = phys.name.replace(name.to_string()) {
            if old != name {
                self.phys_names.release(&old);
            }
        }
        Ok(())
    }

    /// The phys's name, if named.
    ///
    /// # Errors
    ///
    /// Returns an error if the handle is stale.
    pub fn phys_get_name(&self, handle: Handle<Phys>) -> Result<Option<&str>, Error> {
        Ok(self.phys(handle)?.name())
    }

    /// Look a phys up by name.
    #[must_use]
    pub fn phys_by_name(&self, name: &str) -> Option<Handle<Phys>> {
        self.phys_names
            .lookup(name)
            .filter(|&handle| self.physes.get(handle).is_some_and(|p| !p.state.is_deleted()))
    }

    /// Set the kernel interface attribute.
    ///
    /// # Errors
    ///
    /// Returns an error if the phys is gone or the name is illegal.
    pub fn phys_set_iface(&mut self, handle: Handle<Phys>, iface: &str) -> Result<(), Error> {
        let iface = InterfaceName::try_from(iface)?;
        let phys = self.live_phys_mut(handle)?;
        if phys.iface.as_ref() != Some(&iface) {
            phys.iface = Some(iface);
            phys.state = phys.state.renew();
        }
        Ok(())
    }

    /// Clear the kernel interface attribute.
    ///
    /// # Errors
    ///
    /// Returns an error if the phys is gone.
    pub fn phys_clear_iface(&mut self, handle: Handle<Phys>) -> Result<(), Error> {
        let phys = self.live_phys_mut(handle)?;
        if phys.iface.take().is_some() {
            phys.state = phys.state.renew();
        }
        Ok(())
    }

    /// Set the tunnel endpoint address attribute.
    ///
    /// # Errors
    ///
    /// Returns an error if the phys is gone.
    pub fn phys_set_ip(&mut self, handle: Handle<Phys>, ip: IpAddr) -> Result<(), Error> {
        let phys = self.live_phys_mut(handle)?;
        if phys.ip != Some(ip) {
            phys.ip = Some(ip);
            phys.state = phys.state.renew();
        }
        Ok(())
    }

    /// Clear the tunnel endpoint address attribute.
    ///
    /// # Errors
    ///
    /// Returns an error if the phys is gone.
    pub fn phys_clear_ip(&mut self, handle: Handle<Phys>) -> Result<(), Error> {
        let phys = self.live_phys_mut(handle)?;
        if phys.ip.take().is_some() {
            phys.state = phys.state.renew();
        }
        Ok(())
    }

    /// Mark this phys as the host running the process.
    ///
    /// # Errors
    ///
    /// Returns an error if the phys is gone.
    pub fn phys_claim_local(&mut self, handle: Handle<Phys>) -> Result<(), Error> {
        let phys = self.live_phys_mut(handle)?;
        if !phys.is_local {
            phys.is_local = true;
            phys.state = phys.state.renew();
        }
        Ok(())
    }

    /// Withdraw the local mark.
    ///
    /// # Errors
    ///
    /// Returns an error if the phys is gone.
    pub fn phys_unclaim_local(&mut self, handle: Handle<Phys>) -> Result<(), Error> {
        let phys = self.live_phys_mut(handle)?;
        if phys.is_local {
            phys.is_local = false;
            phys.state = phys.state.renew();
        }
        Ok(())
    }

    /// Free the phys, freeing its attachments and disconnecting their virts.
    ///
    /// # Errors
    ///
    /// Returns an error if the phys is gone.
    pub fn phys_free(&mut self, handle: Handle<Phys>) -> Result<(), Error> {
        self.live_phys_mut(handle)?;
        let attachments = self.phys(handle)?.attachments.clone();
        for attachment_handle in attachments {
            let live = self
                .attachments
                .get(attachment_handle)
                .is_some_and(|a| !a.state.is_deleted());
            if !live {
                continue;
            }
            debug!("freeing phys disconnects virts of one of its attachments");
            let virts = self.attachment(attachment_handle)?.virts.clone();
            for virt_handle in virts {
                if self.virts.get(virt_handle).is_some_and(|v| !v.state.is_deleted()) {
                    self.virt_disconnect(virt_handle)?;
                }
            }
            self.attachment_free(attachment_handle);
        }
        let phys = self.live_phys_mut(handle)?;
        match phys.state.freed() {
            Some(deleted) => {
                phys.state = deleted;
            }
            None => self.free_phys_now(handle),
        }
        Ok(())
    }

    pub(crate) fn free_phys_now(&mut self, handle: Handle<Phys>) {
        if let Some(phys) = self.physes.remove(handle) {
            debug_assert!(phys.attachments.is_empty());
            if let Some(name) = phys.name {
                self.phys_names.release(&name);
            }
        }
    }
}
