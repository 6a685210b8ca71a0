// SPDX-License-Identifier: Apache-2.0
// Copyright Trellis Project Authors

//! The object graph and its root container.

pub(crate) mod attachment;
pub(crate) mod net;
pub(crate) mod phys;
pub(crate) mod settings;
pub(crate) mod virt;

use crate::arena::{Arena, Handle};
use crate::names::NameTable;
use crate::ops::IfnameAlloc;
use crate::problem::Problem;
use crate::Error;
use self::attachment::{Attachment, RemotePa, RemoteVirt};
use self::net::Net;
use self::phys::Phys;
use self::settings::Settings;
use self::virt::Virt;
use link::{LinkLookup, NetlinkLinks};

/// The root of one declarative model.
///
/// The context owns every entity, the name tables, the link-resolution
/// handle, and the pending-problem buffer.  All mutation goes through its
/// methods; entities are addressed by [`Handle`]s and exposed read-only.
pub struct Context {
    name: String,
    pub(crate) settings: Arena<Settings>,
    pub(crate) nets: Arena<Net>,
    pub(crate) physes: Arena<Phys>,
    pub(crate) attachments: Arena<Attachment>,
    pub(crate) virts: Arena<Virt>,
    pub(crate) remote_pas: Arena<RemotePa>,
    pub(crate) remote_virts: Arena<RemoteVirt>,
    pub(crate) settings_names: NameTable<Settings>,
    pub(crate) net_names: NameTable<Net>,
    pub(crate) phys_names: NameTable<Phys>,
    pub(crate) links: Box<dyn LinkLookup>,
    pub(crate) problems: Vec<Problem>,
    pub(crate) ifnames: IfnameAlloc,
}

impl Context {
    /// A context resolving interfaces through a live netlink connection.
    ///
    /// # Errors
    ///
    /// Returns an error if the netlink socket cannot be opened.
    pub fn new(name: impl Into<String>) -> Result<Context, Error> {
        let links = NetlinkLinks::connect()?;
        Ok(Context::with_links(name, links))
    }

    /// A context resolving interfaces through `links`.
    ///
    /// This is the constructor for tests and for embedders that bring their
    /// own interface inventory.
    pub fn with_links(name: impl Into<String>, links: impl LinkLookup + 'static) -> Context {
        Context {
            name: name.into(),
            settings: Arena::default(),
            nets: Arena::default(),
            physes: Arena::default(),
            attachments: Arena::default(),
            virts: Arena::default(),
            remote_pas: Arena::default(),
            remote_virts: Arena::default(),
            settings_names: NameTable::new("settings name"),
            net_names: NameTable::new("net name"),
            phys_names: NameTable::new("phys name"),
            links: Box::new(links),
            problems: Vec::new(),
            ifnames: IfnameAlloc::default(),
        }
    }

    /// The context's own name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The problems collected by the most recent validation pass.
    #[must_use]
    pub fn problems(&self) -> &[Problem] {
        &self.problems
    }

    /// A kernel interface name no other trellis object uses.
    ///
    /// Drivers normally reach this through their hook environment; it is
    /// also here for embedders that pre-allocate names.
    pub fn unique_ifname(&mut self) -> ::net::iface::InterfaceName {
        self.ifnames.next()
    }

    /// Returns true iff no entities remain in the graph.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.settings.is_empty()
            && self.nets.is_empty()
            && self.physes.is_empty()
            && self.attachments.is_empty()
            && self.virts.is_empty()
            && self.remote_pas.is_empty()
            && self.remote_virts.is_empty()
    }

    /// The settings behind `handle`.
    ///
    /// # Errors
    ///
    /// Returns an error if the handle is stale.
    pub fn settings(&self, handle: Handle<Settings>) -> Result<&Settings, Error> {
        self.settings.get(handle).ok_or(Error::Gone("settings"))
    }

    /// The net behind `handle`.
    ///
    /// # Errors
    ///
    /// Returns an error if the handle is stale.
    pub fn net(&self, handle: Handle<Net>) -> Result<&Net, Error> {
        self.nets.get(handle).ok_or(Error::Gone("net"))
    }

    /// The phys behind `handle`.
    ///
    /// # Errors
    ///
    /// Returns an error if the handle is stale.
    pub fn phys(&self, handle: Handle<Phys>) -> Result<&Phys, Error> {
        self.physes.get(handle).ok_or(Error::Gone("phys"))
    }

    /// The attachment behind `handle`.
    ///
    /// # Errors
    ///
    /// Returns an error if the handle is stale.
    pub fn attachment(&self, handle: Handle<Attachment>) -> Result<&Attachment, Error> {
        self.attachments.get(handle).ok_or(Error::Gone("attachment"))
    }

    /// The virt behind `handle`.
    ///
    /// # Errors
    ///
    /// Returns an error if the handle is stale.
    pub fn virt(&self, handle: Handle<Virt>) -> Result<&Virt, Error> {
        self.virts.get(handle).ok_or(Error::Gone("virt"))
    }

    /// The remote-PA view behind `handle`.
    ///
    /// # Errors
    ///
    /// Returns an error if the handle is stale.
    pub fn remote_pa(&self, handle: Handle<RemotePa>) -> Result<&RemotePa, Error> {
        self.remote_pas.get(handle).ok_or(Error::Gone("remote pa"))
    }

    /// The remote-virt view behind `handle`.
    ///
    /// # Errors
    ///
    /// Returns an error if the handle is stale.
    pub fn remote_virt(&self, handle: Handle<RemoteVirt>) -> Result<&RemoteVirt, Error> {
        self.remote_virts
            .get(handle)
            .ok_or(Error::Gone("remote virt"))
    }

    // Mutation helpers: a deleted object is as good as gone for mutation,
    // even though it is still readable until decommit frees it.

    pub(crate) fn live_settings_mut(
        &mut self,
        handle: Handle<Settings>,
    ) -> Result<&mut Settings, Error> {
        match self.settings.get_mut(handle) {
            Some(settings) if !settings.state.is_deleted() => Ok(settings),
            _ => Err(Error::Gone("settings")),
        }
    }

    pub(crate) fn live_net_mut(&mut self, handle: Handle<Net>) -> Result<&mut Net, Error> {
        match self.nets.get_mut(handle) {
            Some(net) if !net.state.is_deleted() => Ok(net),
            _ => Err(Error::Gone("net")),
        }
    }

    pub(crate) fn live_phys_mut(&mut self, handle: Handle<Phys>) -> Result<&mut Phys, Error> {
        match self.physes.get_mut(handle) {
            Some(phys) if !phys.state.is_deleted() => Ok(phys),
            _ => Err(Error::Gone("phys")),
        }
    }

    pub(crate) fn live_virt_mut(&mut self, handle: Handle<Virt>) -> Result<&mut Virt, Error> {
        match self.virts.get_mut(handle) {
            Some(virt) if !virt.state.is_deleted() => Ok(virt),
            _ => Err(Error::Gone("virt")),
        }
    }
}
