// SPDX-License-Identifier: Apache-2.0
// Copyright Trellis Project Authors

//! The differential commit engine.
//!
//! One commit runs five phases in a fixed order: user startup hooks,
//! validation (with propagation), the decommit pass (deepest first: remote
//! virts, remote PAs, local virts, local PAs), the recommit pass (outermost
//! first: PAs, virts, remote views), and state acknowledgement.  The order
//! is load-bearing — remote views must be torn down before their local
//! anchors and created only after them — so nothing here is reordered for
//! convenience.
//!
//! Driver failures fail the whole commit: the first hook error stops the
//! pass, reaches the problem callback, and leaves un-acked objects behind
//! so the next commit retries them.  Partial application is never reported
//! as success.

use crate::arena::Handle;
use crate::cleanup::CleanupList;
use crate::graph::attachment::{Attachment, RemotePa, RemoteVirt};
use crate::graph::net::Net;
use crate::graph::phys::Phys;
use crate::graph::virt::Virt;
use crate::graph::Context;
use crate::ops::{
    NetView, NettypeOps, OpsEnv, OpsError, PaView, PhysView, RemotePaView, RemoteVirtView,
    VirtView,
};
use crate::problem::{Problem, ProblemKind};
use crate::state::Lifecycle;
use crate::Error;
use net::iface::InterfaceName;
use std::rc::Rc;
use tracing::{debug, error};

impl Context {
    /// Run validation only: propagation (reverted afterwards) plus every
    /// cross-object check, delivering problems through `cb`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validate`] when problems were reported, or
    /// [`Error::Netlink`] if interface resolution itself failed.
    pub fn validate(&mut self, mut cb: impl FnMut(&Problem)) -> Result<(), Error> {
        let touched = self.propagate_renew();
        let checks = self.collect_problems();
        self.revert_propagation(&touched);
        let problems = checks?;
        for problem in &problems {
            cb(problem);
        }
        let count = problems.len();
        self.problems = problems;
        if count == 0 {
            Ok(())
        } else {
            Err(Error::Validate(count))
        }
    }

    /// Reconcile the data plane with the model.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validate`] when validation reported problems (the
    /// data plane is untouched), [`Error::Commit`] when a driver hook failed
    /// after validation passed, or [`Error::Netlink`] if interface
    /// resolution failed.
    pub fn commit(&mut self, mut cb: impl FnMut(&Problem)) -> Result<(), Error> {
        debug!("commit on context {}", self.name());
        self.run_startup_hooks();
        let touched = self.propagate_renew();
        let checks = self.collect_problems();
        let problems = match checks {
            Ok(problems) => problems,
            Err(err) => {
                self.revert_propagation(&touched);
                return Err(err);
            }
        };
        if !problems.is_empty() {
            self.revert_propagation(&touched);
            for problem in &problems {
                cb(problem);
            }
            let count = problems.len();
            self.problems = problems;
            return Err(Error::Validate(count));
        }
        self.problems.clear();
        self.decommit_pass(&mut cb)?;
        self.recommit_pass(&mut cb)?;
        self.ack_pass();
        debug!("commit settled");
        Ok(())
    }

    /// Tear the whole model down: free everything, then commit.
    ///
    /// # Errors
    ///
    /// Returns an error if the final commit fails; teardown problems reach
    /// `cb`.
    pub fn cleanup(&mut self, cb: impl FnMut(&Problem)) -> Result<(), Error> {
        debug!("cleaning up context {}", self.name());
        for handle in self.settings.handles() {
            let live = self
                .settings
                .get(handle)
                .is_some_and(|s| !s.state.is_deleted());
            if live {
                self.settings_free(handle)?;
            }
        }
        for handle in self.physes.handles() {
            let live = self
                .physes
                .get(handle)
                .is_some_and(|p| !p.state.is_deleted());
            if live {
                self.phys_free(handle)?;
            }
        }
        self.commit(cb)
    }

    // ---- phase 1: user hooks -------------------------------------------

    fn run_startup_hooks(&mut self) {
        let mut calls = Vec::new();
        for phys_handle in self.physes.handles() {
            let Some(phys) = self.physes.get(phys_handle) else {
                continue;
            };
            if !phys.is_local || phys.state.is_deleted() {
                continue;
            }
            for &attachment_handle in &phys.attachments {
                let Some(attachment) = self.attachments.get(attachment_handle) else {
                    continue;
                };
                if attachment.state.is_deleted() {
                    continue;
                }
                let Some(net) = self.nets.get(attachment.net) else {
                    continue;
                };
                if net.state.is_deleted() {
                    continue;
                }
                let Some(settings) = self.settings.get(net.settings) else {
                    continue;
                };
                if let Some(hook) = settings.hooks.startup.clone() {
                    calls.push((hook, attachment.net, phys_handle));
                }
            }
        }
        for (hook, net, phys) in calls {
            hook(self, net, phys);
        }
    }

    // ---- driver plumbing -----------------------------------------------

    pub(crate) fn net_ops(&self, net: Handle<Net>) -> Result<Rc<dyn NettypeOps>, Error> {
        let net = self.net(net)?;
        Ok(self.settings(net.settings)?.ops.clone())
    }

    fn fail_commit(&self, what: &str, err: &OpsError, cb: &mut dyn FnMut(&Problem)) -> Error {
        let problem = Problem::new(ProblemKind::DataPlane(format!("{what}: {err}")), vec![]);
        error!("{problem}");
        cb(&problem);
        Error::Commit
    }

    // ---- views ----------------------------------------------------------

    fn net_view(&self, handle: Handle<Net>) -> Result<NetView, Error> {
        let net = self.net(handle)?;
        let settings = self.settings(net.settings)?;
        Ok(NetView {
            name: net.name.clone(),
            vnet_id: net.vnet_id,
            nettype: settings.kind,
            discipline: settings.discipline,
        })
    }

    fn phys_view(&self, handle: Handle<Phys>) -> Result<PhysView, Error> {
        let phys = self.phys(handle)?;
        Ok(PhysView {
            name: phys.name.clone(),
            iface: phys.iface.clone(),
            ip: phys.ip,
            is_local: phys.is_local,
        })
    }

    pub(crate) fn pa_view(&self, handle: Handle<Attachment>) -> Result<PaView, Error> {
        let attachment = self.attachment(handle)?;
        Ok(PaView {
            net: self.net_view(attachment.net)?,
            phys: self.phys_view(attachment.phys)?,
            explicitly_attached: attachment.explicitly_attached,
            tunnel_if: attachment.tunnel_if.clone(),
            bridge_if: attachment.bridge_if.clone(),
        })
    }

    pub(crate) fn virt_view(
        &self,
        handle: Handle<Virt>,
        attachment: Handle<Attachment>,
        iface: Option<InterfaceName>,
    ) -> Result<VirtView, Error> {
        let virt = self.virt(handle)?;
        Ok(VirtView {
            name: virt.name.clone(),
            mac: virt.mac,
            iface,
            pa: self.pa_view(attachment)?,
        })
    }

    fn remote_pa_view(&self, handle: Handle<RemotePa>) -> Result<RemotePaView, Error> {
        let view = self.remote_pa(handle)?;
        Ok(RemotePaView {
            local: self.pa_view(view.of)?,
            peer: self.pa_view(view.peer)?,
            tunnel_if: view.tunnel_if.clone(),
        })
    }

    fn remote_virt_view(&self, handle: Handle<RemoteVirt>) -> Result<RemoteVirtView, Error> {
        let record = self.remote_virt(handle)?;
        let pa_view = self.remote_pa(record.of)?;
        let virt = self.virt(record.virt)?;
        Ok(RemoteVirtView {
            local: self.pa_view(pa_view.of)?,
            peer: self.pa_view(pa_view.peer)?,
            name: virt.name.clone(),
            mac: virt.mac,
        })
    }

    // ---- phase 3: decommit ----------------------------------------------

    fn decommit_pass(&mut self, cb: &mut dyn FnMut(&Problem)) -> Result<(), Error> {
        let mut cleanup = CleanupList::new();
        for net_handle in self.nets.handles() {
            let Some(net) = self.nets.get(net_handle) else {
                continue;
            };
            let virts = net.virts.clone();
            for virt_handle in virts {
                self.decommit_virt(virt_handle, &mut cleanup, cb)?;
            }
            let attachments = match self.nets.get(net_handle) {
                Some(net) => net.attachments.clone(),
                None => continue,
            };
            for attachment_handle in attachments {
                self.decommit_attachment(attachment_handle, &mut cleanup, cb)?;
            }
            if let Some(net) = self.nets.get_mut(net_handle) {
                let (next, _) = net.state.ack_uncommit();
                net.state = next;
                if next.is_deleted() {
                    cleanup.defer(move |ctx| ctx.free_net_now(net_handle));
                }
            }
        }
        cleanup.run(self);
        for phys_handle in self.physes.handles() {
            if let Some(phys) = self.physes.get_mut(phys_handle) {
                let (next, _) = phys.state.ack_uncommit();
                phys.state = next;
                if next.is_deleted() {
                    cleanup.defer(move |ctx| ctx.free_phys_now(phys_handle));
                }
            }
        }
        for settings_handle in self.settings.handles() {
            if let Some(settings) = self.settings.get_mut(settings_handle) {
                let (next, _) = settings.state.ack_uncommit();
                settings.state = next;
                if next.is_deleted() {
                    cleanup.defer(move |ctx| ctx.free_settings_now(settings_handle));
                }
            }
        }
        cleanup.run(self);
        Ok(())
    }

    fn decommit_virt(
        &mut self,
        handle: Handle<Virt>,
        cleanup: &mut CleanupList,
        cb: &mut dyn FnMut(&Problem),
    ) -> Result<(), Error> {
        let Some(virt) = self.virts.get(handle) else {
            return Ok(());
        };
        let (next, teardown) = virt.state.ack_uncommit();
        if teardown {
            debug!("decommitting virt {:?}", virt.name);
            let views = virt.views.clone();
            for view in views {
                self.teardown_remote_virt(view, cb)?;
            }
            let committed = self
                .virts
                .get(handle)
                .and_then(|v| v.committed_to.map(|to| (to, v.committed_if.clone())));
            if let Some((attachment, iface)) = committed {
                let ops = self.net_ops(self.attachment(attachment)?.net)?;
                let view = self.virt_view(handle, attachment, iface)?;
                let outcome = {
                    let mut env = OpsEnv {
                        links: self.links.as_ref(),
                        ifnames: &mut self.ifnames,
                    };
                    ops.remove_virt(&mut env, &view)
                };
                outcome.map_err(|err| self.fail_commit("remove_virt", &err, cb))?;
                if let Some(virt) = self.virts.get_mut(handle) {
                    virt.committed_to = None;
                    virt.committed_if = None;
                }
            }
        }
        if let Some(virt) = self.virts.get_mut(handle) {
            virt.state = next;
            if next.is_deleted() {
                cleanup.defer(move |ctx| ctx.free_virt_now(handle));
            }
        }
        Ok(())
    }

    fn decommit_attachment(
        &mut self,
        handle: Handle<Attachment>,
        cleanup: &mut CleanupList,
        cb: &mut dyn FnMut(&Problem),
    ) -> Result<(), Error> {
        // an implicit attachment whose last virt is leaving goes with it,
        // in this same pass
        let orphaned = {
            let Some(attachment) = self.attachments.get(handle) else {
                return Ok(());
            };
            !attachment.explicitly_attached
                && !attachment.state.is_deleted()
                && !attachment.virts.iter().any(|&v| {
                    self.virts
                        .get(v)
                        .is_some_and(|virt| !virt.state.is_deleted())
                })
        };
        if orphaned {
            if let Some(attachment) = self.attachments.get_mut(handle) {
                attachment.state = Lifecycle::Delete;
            }
        }
        let Some(attachment) = self.attachments.get(handle) else {
            return Ok(());
        };
        let (next, teardown) = attachment.state.ack_uncommit();
        if teardown {
            debug!("decommitting attachment");
            let held = attachment.remote_pas.clone();
            for view in held {
                self.teardown_remote_pa(view, cb)?;
            }
            let viewed_by = match self.attachments.get(handle) {
                Some(attachment) => attachment.pa_views.clone(),
                None => Vec::new(),
            };
            for view in viewed_by {
                self.teardown_remote_pa(view, cb)?;
            }
            let committed_local = self
                .attachments
                .get(handle)
                .is_some_and(|a| a.committed_as_local);
            if committed_local {
                let ops = self.net_ops(self.attachment(handle)?.net)?;
                let mut pa = self.pa_view(handle)?;
                let outcome = {
                    let mut env = OpsEnv {
                        links: self.links.as_ref(),
                        ifnames: &mut self.ifnames,
                    };
                    ops.destroy_pa(&mut env, &mut pa)
                };
                outcome.map_err(|err| self.fail_commit("destroy_pa", &err, cb))?;
                if let Some(attachment) = self.attachments.get_mut(handle) {
                    attachment.committed_as_local = false;
                    attachment.tunnel_if = None;
                    attachment.bridge_if = None;
                }
            }
        }
        if let Some(attachment) = self.attachments.get_mut(handle) {
            attachment.state = next;
            if next.is_deleted() {
                cleanup.defer(move |ctx| ctx.free_attachment_now(handle));
            }
        }
        Ok(())
    }

    fn teardown_remote_virt(
        &mut self,
        handle: Handle<RemoteVirt>,
        cb: &mut dyn FnMut(&Problem),
    ) -> Result<(), Error> {
        let Some(record) = self.remote_virts.get(handle) else {
            return Ok(());
        };
        let of = record.of;
        let virt = record.virt;
        let local = self.remote_pa(of)?.of;
        let ops = self.net_ops(self.attachment(local)?.net)?;
        let view = self.remote_virt_view(handle)?;
        let outcome = {
            let mut env = OpsEnv {
                links: self.links.as_ref(),
                ifnames: &mut self.ifnames,
            };
            ops.remove_remote_virt(&mut env, &view)
        };
        outcome.map_err(|err| self.fail_commit("remove_remote_virt", &err, cb))?;
        if let Some(pa_view) = self.remote_pas.get_mut(of) {
            pa_view.remote_virts.retain(|&r| r != handle);
        }
        if let Some(virt) = self.virts.get_mut(virt) {
            virt.views.retain(|&r| r != handle);
        }
        self.remote_virts.remove(handle);
        Ok(())
    }

    fn teardown_remote_pa(
        &mut self,
        handle: Handle<RemotePa>,
        cb: &mut dyn FnMut(&Problem),
    ) -> Result<(), Error> {
        let Some(view) = self.remote_pas.get(handle) else {
            return Ok(());
        };
        let records = view.remote_virts.clone();
        for record in records {
            self.teardown_remote_virt(record, cb)?;
        }
        let Some(view) = self.remote_pas.get(handle) else {
            return Ok(());
        };
        let of = view.of;
        let peer = view.peer;
        let ops = self.net_ops(self.attachment(of)?.net)?;
        let mut remote = self.remote_pa_view(handle)?;
        let outcome = {
            let mut env = OpsEnv {
                links: self.links.as_ref(),
                ifnames: &mut self.ifnames,
            };
            ops.remove_remote_pa(&mut env, &mut remote)
        };
        outcome.map_err(|err| self.fail_commit("remove_remote_pa", &err, cb))?;
        if let Some(attachment) = self.attachments.get_mut(of) {
            attachment.remote_pas.retain(|&v| v != handle);
        }
        if let Some(attachment) = self.attachments.get_mut(peer) {
            attachment.pa_views.retain(|&v| v != handle);
        }
        self.remote_pas.remove(handle);
        Ok(())
    }

    // ---- phase 4: recommit ----------------------------------------------

    fn recommit_pass(&mut self, cb: &mut dyn FnMut(&Problem)) -> Result<(), Error> {
        for phys_handle in self.physes.handles() {
            if let Some(phys) = self.physes.get_mut(phys_handle) {
                if !phys.state.is_deleted() {
                    phys.committed_as_local = phys.is_local;
                }
            }
        }
        for phys_handle in self.physes.handles() {
            let Some(phys) = self.physes.get(phys_handle) else {
                continue;
            };
            if phys.state.is_deleted() || !phys.is_local {
                continue;
            }
            for attachment_handle in phys.attachments.clone() {
                self.commit_pa(attachment_handle, cb)?;
            }
        }
        Ok(())
    }

    fn commit_pa(
        &mut self,
        handle: Handle<Attachment>,
        cb: &mut dyn FnMut(&Problem),
    ) -> Result<(), Error> {
        let Some(attachment) = self.attachments.get(handle) else {
            return Ok(());
        };
        if attachment.state.is_deleted() {
            return Ok(());
        }
        let net_handle = attachment.net;
        let ops = self.net_ops(net_handle)?;

        // local artifacts for a fresh junction
        let needs_create = attachment.state == Lifecycle::New && !attachment.committed_as_local;
        if needs_create {
            debug!("creating local pa");
            let mut pa = self.pa_view(handle)?;
            let outcome = {
                let mut env = OpsEnv {
                    links: self.links.as_ref(),
                    ifnames: &mut self.ifnames,
                };
                ops.create_pa(&mut env, &mut pa)
            };
            outcome.map_err(|err| self.fail_commit("create_pa", &err, cb))?;
            if let Some(attachment) = self.attachments.get_mut(handle) {
                attachment.tunnel_if = pa.tunnel_if;
                attachment.bridge_if = pa.bridge_if;
                attachment.committed_as_local = true;
            }
        }

        // freshly connected virts
        let virts = match self.attachments.get(handle) {
            Some(attachment) => attachment.virts.clone(),
            None => Vec::new(),
        };
        for virt_handle in virts {
            let commit_needed = self.virts.get(virt_handle).is_some_and(|v| {
                v.state == Lifecycle::New && v.committed_to.is_none()
            });
            if !commit_needed {
                continue;
            }
            let iface = {
                let Some(virt) = self.virts.get_mut(virt_handle) else {
                    continue;
                };
                virt.committed_if = virt.connected_if.clone();
                virt.committed_to = Some(handle);
                virt.committed_if.clone()
            };
            debug!("adding local virt");
            let view = self.virt_view(virt_handle, handle, iface)?;
            let outcome = {
                let mut env = OpsEnv {
                    links: self.links.as_ref(),
                    ifnames: &mut self.ifnames,
                };
                ops.add_virt(&mut env, &view)
            };
            outcome.map_err(|err| self.fail_commit("add_virt", &err, cb))?;
        }

        // views of every peer junction in the same net
        let peers = match self.nets.get(net_handle) {
            Some(net) => net.attachments.clone(),
            None => Vec::new(),
        };
        for peer_handle in peers {
            if peer_handle == handle {
                continue;
            }
            let peer_live = self
                .attachments
                .get(peer_handle)
                .is_some_and(|a| !a.state.is_deleted());
            if !peer_live {
                continue;
            }
            let view_handle = match self.find_remote_pa(handle, peer_handle) {
                Some(view) => view,
                None => self.materialise_remote_pa(handle, peer_handle, &ops, cb)?,
            };
            let peer_virts = match self.attachments.get(peer_handle) {
                Some(peer) => peer.virts.clone(),
                None => Vec::new(),
            };
            for peer_virt in peer_virts {
                let live = self
                    .virts
                    .get(peer_virt)
                    .is_some_and(|v| !v.state.is_deleted());
                if !live {
                    continue;
                }
                let seen = self
                    .remote_pas
                    .get(view_handle)
                    .is_some_and(|view| {
                        view.remote_virts.iter().any(|&record| {
                            self.remote_virts
                                .get(record)
                                .is_some_and(|r| r.virt == peer_virt)
                        })
                    });
                if !seen {
                    self.materialise_remote_virt(view_handle, peer_virt, &ops, cb)?;
                }
            }
        }
        Ok(())
    }

    fn find_remote_pa(
        &self,
        local: Handle<Attachment>,
        peer: Handle<Attachment>,
    ) -> Option<Handle<RemotePa>> {
        let attachment = self.attachments.get(local)?;
        attachment.remote_pas.iter().copied().find(|&view| {
            self.remote_pas
                .get(view)
                .is_some_and(|v| v.peer == peer)
        })
    }

    fn materialise_remote_pa(
        &mut self,
        local: Handle<Attachment>,
        peer: Handle<Attachment>,
        ops: &Rc<dyn NettypeOps>,
        cb: &mut dyn FnMut(&Problem),
    ) -> Result<Handle<RemotePa>, Error> {
        debug!("adding remote pa view");
        let view_handle = self.remote_pas.insert(RemotePa {
            of: local,
            peer,
            remote_virts: Vec::new(),
            tunnel_if: None,
            state: Lifecycle::New,
        });
        if let Some(attachment) = self.attachments.get_mut(local) {
            attachment.remote_pas.push(view_handle);
        }
        if let Some(attachment) = self.attachments.get_mut(peer) {
            attachment.pa_views.push(view_handle);
        }
        let mut remote = self.remote_pa_view(view_handle)?;
        let outcome = {
            let mut env = OpsEnv {
                links: self.links.as_ref(),
                ifnames: &mut self.ifnames,
            };
            ops.add_remote_pa(&mut env, &mut remote)
        };
        match outcome {
            Ok(()) => {
                if let Some(view) = self.remote_pas.get_mut(view_handle) {
                    view.tunnel_if = remote.tunnel_if;
                }
                Ok(view_handle)
            }
            Err(err) => {
                // no phantom views: an existing view always means the add ran
                if let Some(attachment) = self.attachments.get_mut(local) {
                    attachment.remote_pas.retain(|&v| v != view_handle);
                }
                if let Some(attachment) = self.attachments.get_mut(peer) {
                    attachment.pa_views.retain(|&v| v != view_handle);
                }
                self.remote_pas.remove(view_handle);
                Err(self.fail_commit("add_remote_pa", &err, cb))
            }
        }
    }

    fn materialise_remote_virt(
        &mut self,
        view: Handle<RemotePa>,
        virt: Handle<Virt>,
        ops: &Rc<dyn NettypeOps>,
        cb: &mut dyn FnMut(&Problem),
    ) -> Result<(), Error> {
        debug!("adding remote virt view");
        let record = self.remote_virts.insert(RemoteVirt {
            of: view,
            virt,
            state: Lifecycle::New,
        });
        if let Some(pa_view) = self.remote_pas.get_mut(view) {
            pa_view.remote_virts.push(record);
        }
        if let Some(virt) = self.virts.get_mut(virt) {
            virt.views.push(record);
        }
        let remote = self.remote_virt_view(record)?;
        let outcome = {
            let mut env = OpsEnv {
                links: self.links.as_ref(),
                ifnames: &mut self.ifnames,
            };
            ops.add_remote_virt(&mut env, &remote)
        };
        match outcome {
            Ok(()) => Ok(()),
            Err(err) => {
                if let Some(pa_view) = self.remote_pas.get_mut(view) {
                    pa_view.remote_virts.retain(|&r| r != record);
                }
                if let Some(virt) = self.virts.get_mut(virt) {
                    virt.views.retain(|&r| r != record);
                }
                self.remote_virts.remove(record);
                Err(self.fail_commit("add_remote_virt", &err, cb))
            }
        }
    }

    // ---- phase 5: acknowledgement ---------------------------------------

    fn ack_pass(&mut self) {
        for handle in self.settings.handles() {
            if let Some(settings) = self.settings.get_mut(handle) {
                settings.state = settings.state.ack_commit();
            }
        }
        for handle in self.nets.handles() {
            if let Some(net) = self.nets.get_mut(handle) {
                net.state = net.state.ack_commit();
            }
        }
        for handle in self.physes.handles() {
            if let Some(phys) = self.physes.get_mut(handle) {
                phys.state = phys.state.ack_commit();
            }
        }
        for handle in self.attachments.handles() {
            if let Some(attachment) = self.attachments.get_mut(handle) {
                attachment.state = attachment.state.ack_commit();
            }
        }
        for handle in self.virts.handles() {
            if let Some(virt) = self.virts.get_mut(handle) {
                virt.state = virt.state.ack_commit();
            }
        }
        for handle in self.remote_pas.handles() {
            if let Some(view) = self.remote_pas.get_mut(handle) {
                view.state = view.state.ack_commit();
            }
        }
        for handle in self.remote_virts.handles() {
            if let Some(record) = self.remote_virts.get_mut(handle) {
                record.state = record.state.ack_commit();
            }
        }
    }
}
