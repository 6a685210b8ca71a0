// SPDX-License-Identifier: Apache-2.0
// Copyright Trellis Project Authors

//! Network-type settings shared by many nets.

use crate::arena::Handle;
use crate::graph::Context;
use crate::ops::{NettypeOps, NoopOps};
use crate::state::Lifecycle;
use crate::Error;
use net::port::UdpPort;
use net::vnet::VnetId;
use std::net::IpAddr;
use std::rc::Rc;

use crate::graph::net::Net;
use crate::graph::phys::Phys;

/// The switching discipline a network type realises.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SwitchDiscipline {
    /// One learning bridge per attachment; flooding reaches all peers.
    Learning,
    /// Learning, with one tunnel per peer instead of a shared one.
    LearningE2e,
    /// No learning: every remote MAC is programmed explicitly.
    StaticE2e,
}

/// A network type with its tunnel parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NettypeKind {
    /// 802.1Q tagging on the phys interface.
    Vlan,
    /// VXLAN with a multicast control group.
    VxlanMcast {
        /// The multicast group carrying unknown and broadcast traffic.
        group: IpAddr,
        /// The UDP port the tunnel listens on.
        port: UdpPort,
    },
    /// VXLAN with one tunnel per peer, MAC learning on top.
    VxlanE2e {
        /// The UDP port the tunnel listens on.
        port: UdpPort,
    },
    /// VXLAN with statically programmed forwarding, no learning.
    VxlanStatic {
        /// The UDP port the tunnel listens on.
        port: UdpPort,
    },
    /// No tunnelling; virts bridge straight onto the phys interface.
    Direct,
}

impl NettypeKind {
    /// A short name for diagnostics.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            NettypeKind::Vlan => "vlan",
            NettypeKind::VxlanMcast { .. } => "vxlan/mcast",
            NettypeKind::VxlanE2e { .. } => "vxlan/e2e",
            NettypeKind::VxlanStatic { .. } => "vxlan/static",
            NettypeKind::Direct => "direct",
        }
    }

    /// The UDP port, for the VXLAN variants.
    #[must_use]
    pub fn vxlan_port(&self) -> Option<UdpPort> {
        match self {
            NettypeKind::VxlanMcast { port, .. }
            | NettypeKind::VxlanE2e { port }
            | NettypeKind::VxlanStatic { port } => Some(*port),
            NettypeKind::Vlan | NettypeKind::Direct => None,
        }
    }

    /// The largest network id this type can express on the wire, or `None`
    /// when the type carries no id at all.
    #[must_use]
    pub fn max_vnet_id(&self) -> Option<u32> {
        match self {
            NettypeKind::Vlan => Some(VnetId::VLAN_MAX),
            NettypeKind::VxlanMcast { .. }
            | NettypeKind::VxlanE2e { .. }
            | NettypeKind::VxlanStatic { .. } => Some(VnetId::VXLAN_MAX),
            NettypeKind::Direct => None,
        }
    }

    /// Whether two kinds are the same network type, parameters aside.
    #[must_use]
    pub fn same_type(&self, other: &NettypeKind) -> bool {
        core::mem::discriminant(self) == core::mem::discriminant(other)
    }
}

/// A per-(net, phys) callback run at the start of every commit.
pub type StartupHook = Rc<dyn Fn(&Context, Handle<Net>, Handle<Phys>)>;

/// User hooks carried by one settings object.
#[derive(Clone, Default)]
pub struct Hooks {
    /// Run once per commit for every (net, local phys) pair using these
    /// settings; hooks are expected to be idempotent.
    pub startup: Option<StartupHook>,
}

/// One network type, shared by any number of nets.
pub struct Settings {
    pub(crate) name: Option<String>,
    pub(crate) kind: NettypeKind,
    pub(crate) discipline: SwitchDiscipline,
    pub(crate) ops: Rc<dyn NettypeOps>,
    pub(crate) hooks: Hooks,
    pub(crate) state: Lifecycle,
}

impl Settings {
    /// The settings' name, if named.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// The network type.
    #[must_use]
    pub fn kind(&self) -> &NettypeKind {
        &self.kind
    }

    /// The switching discipline.
    #[must_use]
    pub fn discipline(&self) -> SwitchDiscipline {
        self.discipline
    }

    /// The lifecycle state.
    #[must_use]
    pub fn state(&self) -> Lifecycle {
        self.state
    }
}

/// Port 0 selects the IANA default.
fn tunnel_port(port: u16) -> UdpPort {
    UdpPort::new(port).unwrap_or(UdpPort::VXLAN)
}

impl Context {
    fn add_settings(
        &mut self,
        kind: NettypeKind,
        discipline: SwitchDiscipline,
    ) -> Result<Handle<Settings>, Error> {
        self.settings.try_insert(Settings {
            name: None,
            kind,
            discipline,
            ops: Rc::new(NoopOps),
            hooks: Hooks::default(),
            state: Lifecycle::New,
        })
    }

    /// Settings for VLAN-tagged networks.
    ///
    /// # Errors
    ///
    /// Returns an error if allocation fails.
    pub fn settings_vlan(&mut self) -> Result<Handle<Settings>, Error> {
        self.add_settings(NettypeKind::Vlan, SwitchDiscipline::Learning)
    }

    /// Settings for multicast-flooded VXLAN networks.
    ///
    /// The settings carry only what every net of this type shares: the
    /// multicast group and the UDP port. The wire VNI is each net's own
    /// [`VnetId`].
    ///
    /// Port 0 selects the IANA default (4789).
    ///
    /// # Errors
    ///
    /// Returns an error if allocation fails.
    pub fn settings_vxlan_mcast(
        &mut self,
        group: IpAddr,
        port: u16,
    ) -> Result<Handle<Settings>, Error> {
        self.add_settings(
            NettypeKind::VxlanMcast {
                group,
                port: tunnel_port(port),
            },
            SwitchDiscipline::Learning,
        )
    }

    /// Settings for end-to-end VXLAN networks with learning.
    ///
    /// Port 0 selects the IANA default (4789).
    ///
    /// # Errors
    ///
    /// Returns an error if allocation fails.
    pub fn settings_vxlan_e2e(&mut self, port: u16) -> Result<Handle<Settings>, Error> {
        self.add_settings(
            NettypeKind::VxlanE2e {
                port: tunnel_port(port),
            },
            SwitchDiscipline::LearningE2e,
        )
    }

    /// Settings for statically switched VXLAN networks.
    ///
    /// Port 0 selects the IANA default (4789).
    ///
    /// # Errors
    ///
    /// Returns an error if allocation fails.
    pub fn settings_vxlan_static(&mut self, port: u16) -> Result<Handle<Settings>, Error> {
        self.add_settings(
            NettypeKind::VxlanStatic {
                port: tunnel_port(port),
            },
            SwitchDiscipline::StaticE2e,
        )
    }

    /// Settings for untunnelled networks.
    ///
    /// # Errors
    ///
    /// Returns an error if allocation fails.
    pub fn settings_direct(&mut self) -> Result<Handle<Settings>, Error> {
        self.add_settings(NettypeKind::Direct, SwitchDiscipline::Learning)
    }

    /// Install the driver realising these settings' discipline.
    ///
    /// # Errors
    ///
    /// Returns an error if the settings are gone.
    pub fn settings_set_ops(
        &mut self,
        handle: Handle<Settings>,
        ops: Rc<dyn NettypeOps>,
    ) -> Result<(), Error> {
        self.live_settings_mut(handle)?.ops = ops;
        Ok(())
    }

    /// Register the user hooks carried by these settings.
    ///
    /// # Errors
    ///
    /// Returns an error if the settings are gone.
    pub fn settings_register_hooks(
        &mut self,
        handle: Handle<Settings>,
        hooks: Hooks,
    ) -> Result<(), Error> {
        self.live_settings_mut(handle)?.hooks = hooks;
        Ok(())
    }

    /// Name the settings uniquely within the context.
    ///
    /// # Errors
    ///
    /// Returns an error if the settings are gone or the name is taken.
    pub fn settings_set_name(
        &mut self,
        handle: Handle<Settings>,
        name: &str,
    ) -> Result<(), Error> {
        self.live_settings_mut(handle)?;
        self.settings_names.claim(name, handle)?;
        let settings = self.live_settings_mut(handle)?;
        if let Some(old) = settings.name.replace(name.to_string()) {
            if old != name {
                self.settings_names.release(&old);
            }
        }
        Ok(())
    }

    /// The settings' name, if named.
    ///
    /// # Errors
    ///
    /// Returns an error if the handle is stale.
    pub fn settings_get_name(&self, handle: Handle<Settings>) -> Result<Option<&str>, Error> {
        Ok(self.settings(handle)?.name())
    }

    /// Look settings up by name.
    #[must_use]
    pub fn settings_by_name(&self, name: &str) -> Option<Handle<Settings>> {
        self.settings_names
            .lookup(name)
            .filter(|&handle| self.settings.get(handle).is_some_and(|s| !s.state.is_deleted()))
    }

    /// Free the settings, freeing every net that uses them first.
    ///
    /// # Errors
    ///
    /// Returns an error if the settings are gone.
    pub fn settings_free(&mut self, handle: Handle<Settings>) -> Result<(), Error> {
        self.live_settings_mut(handle)?;
        for net_handle in self.nets.handles() {
            let uses = self
                .nets
                .get(net_handle)
                .is_some_and(|n| n.settings == handle && !n.state.is_deleted());
            if uses {
                self.net_free(net_handle)?;
            }
        }
        let settings = self.live_settings_mut(handle)?;
        match settings.state.freed() {
            Some(deleted) => {
                settings.state = deleted;
            }
            None => self.free_settings_now(handle),
        }
        Ok(())
    }

    pub(crate) fn free_settings_now(&mut self, handle: Handle<Settings>) {
        if let Some(settings) = self.settings.remove(handle) {
            if let Some(name) = settings.name {
                self.settings_names.release(&name);
            }
        }
    }
}
