// SPDX-License-Identifier: Apache-2.0
// Copyright Trellis Project Authors

//! Virtual networks.

use crate::arena::Handle;
use crate::graph::attachment::Attachment;
use crate::graph::settings::Settings;
use crate::graph::virt::Virt;
use crate::graph::Context;
use crate::names::NameTable;
use crate::state::Lifecycle;
use crate::Error;
use net::vnet::VnetId;

/// One virtual network.
pub struct Net {
    pub(crate) name: Option<String>,
    pub(crate) vnet_id: VnetId,
    pub(crate) settings: Handle<Settings>,
    pub(crate) attachments: Vec<Handle<Attachment>>,
    pub(crate) virts: Vec<Handle<Virt>>,
    pub(crate) virt_names: NameTable<Virt>,
    pub(crate) state: Lifecycle,
}

impl Net {
    /// The net's name, if named.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// The tenant-visible network id.
    #[must_use]
    pub fn vnet_id(&self) -> VnetId {
        self.vnet_id
    }

    /// The settings describing this net's type.
    #[must_use]
    pub fn settings(&self) -> Handle<Settings> {
        self.settings
    }

    /// The attachments participating in this net.
    #[must_use]
    pub fn attachments(&self) -> &[Handle<Attachment>] {
        &self.attachments
    }

    /// The virts belonging to this net.
    #[must_use]
    pub fn virts(&self) -> &[Handle<Virt>] {
        &self.virts
    }

    /// The lifecycle state.
    #[must_use]
    pub fn state(&self) -> Lifecycle {
        self.state
    }
}

impl Context {
    /// A new net of the type described by `settings`.
    ///
    /// # Errors
    ///
    /// Returns an error if the settings are gone or allocation fails.
    pub fn net_new(
        &mut self,
        settings: Handle<Settings>,
        vnet_id: u32,
    ) -> Result<Handle<Net>, Error> {
        self.live_settings_mut(settings)?;
        self.nets.try_insert(Net {
            name: None,
            vnet_id: VnetId(vnet_id),
            settings,
            attachments: Vec::new(),
            virts: Vec::new(),
            virt_names: NameTable::new("virt name"),
            state: Lifecycle::New,
        })
    }

    /// Name the net uniquely within the context.
    ///
    /// # Errors
    ///
    /// Returns an error if the net is gone or the name is taken.
    pub fn net_set_name(&mut self, handle: Handle<Net>, name: &str) -> Result<(), Error> {
        self.live_net_mut(handle)?;
        self.net_names.claim(name, handle)?;
        let net = self.live_net_mut(handle)?;
        if let Some(old) = net.name.replace(name.to_string()) {
            if old != name {
                self.net_names.release(&old);
            }
        }
        Ok(())
    }

    /// The net's name, if named.
    ///
    /// # Errors
    ///
    /// Returns an error if the handle is stale.
    pub fn net_get_name(&self, handle: Handle<Net>) -> Result<Option<&str>, Error> {
        Ok(self.net(handle)?.name())
    }

    /// Look a net up by name.
    #[must_use]
    pub fn net_by_name(&self, name: &str) -> Option<Handle<Net>> {
        self.net_names
            .lookup(name)
            .filter(|&handle| self.nets.get(handle).is_some_and(|n| !n.state.is_deleted()))
    }

    /// Free the net together with its virts and attachments.
    ///
    /// # Errors
    ///
    /// Returns an error if the net is gone.
    pub fn net_free(&mut self, handle: Handle<Net>) -> Result<(), Error> {
        let net = self.live_net_mut(handle)?;
        for virt_handle in net.virts.clone() {
            if self.virts.get(virt_handle).is_some_and(|v| !v.state.is_deleted()) {
                self.virt_free(virt_handle)?;
            }
        }
        let attachments = self.net(handle)?.attachments.clone();
        for attachment_handle in attachments {
            let live = self
                .attachments
                .get(attachment_handle)
                .is_some_and(|a| !a.state.is_deleted());
            if live {
                self.attachment_free(attachment_handle);
            }
        }
        let net = self.live_net_mut(handle)?;
        match net.state.freed() {
            Some(deleted) => {
                net.state = deleted;
            }
            None => self.free_net_now(handle),
        }
        Ok(())
    }

    pub(crate) fn free_net_now(&mut self, handle: Handle<Net>) {
        if let Some(net) = self.nets.remove(handle) {
            debug_assert!(net.virts.is_empty());
            debug_assert!(net.attachments.is_empty());
            if let Some(name) = net.name {
                self.net_names.release(&name);
            }
        }
    }
}
