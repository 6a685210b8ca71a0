// SPDX-License-Identifier: Apache-2.0
// Copyright Trellis Project Authors

//! Pre-commit validation.
//!
//! Runs inside [`Context::validate`] and [`Context::commit`] before any
//! data-plane mutation: first renewal is propagated across the dependency
//! edges (phys → attachment, net → attachment, attachment → connected
//! virt), then the cross-object checks collect [`Problem`]s.  A failed pass
//! reverts the propagation it performed, so validation never leaves partial
//! state-machine changes behind.

use crate::arena::Handle;
use crate::graph::attachment::Attachment;
use crate::graph::net::Net;
use crate::graph::phys::Phys;
use crate::graph::settings::SwitchDiscipline;
use crate::graph::virt::Virt;
use crate::graph::Context;
use crate::ops::OpsEnv;
use crate::problem::{Problem, ProblemKind, ProblemRef};
use crate::state::Lifecycle;
use crate::Error;

/// One `Ok → Renew` transition made by the propagation sub-phase.
pub(crate) enum Propagated {
    Attachment(Handle<Attachment>),
    Virt(Handle<Virt>),
}

impl Context {
    /// Carry renewal across the dependency edges, returning every transition
    /// made so a failed validation can take them back.
    pub(crate) fn propagate_renew(&mut self) -> Vec<Propagated> {
        let mut touched = Vec::new();

        let phys_edges: Vec<(Lifecycle, Vec<Handle<Attachment>>)> = self
            .physes
            .handles()
            .into_iter()
            .filter_map(|handle| {
                self.physes
                    .get(handle)
                    .map(|phys| (phys.state, phys.attachments.clone()))
            })
            .collect();
        self.propagate_onto_attachments(phys_edges, &mut touched);

        let net_edges: Vec<(Lifecycle, Vec<Handle<Attachment>>)> = self
            .nets
            .handles()
            .into_iter()
            .filter_map(|handle| {
                self.nets
                    .get(handle)
                    .map(|net| (net.state, net.attachments.clone()))
            })
            .collect();
        self.propagate_onto_attachments(net_edges, &mut touched);

        for virt_handle in self.virts.handles() {
            let Some(virt) = self.virts.get(virt_handle) else {
                continue;
            };
            let Some(attachment) = virt.connected_through else {
                continue;
            };
            let Some(from) = self.attachments.get(attachment).map(|a| a.state) else {
                continue;
            };
            if let Some(virt) = self.virts.get_mut(virt_handle) {
                let before = virt.state;
                virt.state = virt.state.propagate(from);
                if virt.state != before {
                    touched.push(Propagated::Virt(virt_handle));
                }
            }
        }
        touched
    }

    fn propagate_onto_attachments(
        &mut self,
        edges: Vec<(Lifecycle, Vec<Handle<Attachment>>)>,
        touched: &mut Vec<Propagated>,
    ) {
        for (from, attachments) in edges {
            if from != Lifecycle::Renew {
                continue;
            }
            for handle in attachments {
                if let Some(attachment) = self.attachments.get_mut(handle) {
                    let before = attachment.state;
                    attachment.state = attachment.state.propagate(from);
                    if attachment.state != before {
                        touched.push(Propagated::Attachment(handle));
                    }
                }
            }
        }
    }

    /// Take back the transitions of a propagation pass.
    pub(crate) fn revert_propagation(&mut self, touched: &[Propagated]) {
        for entry in touched {
            match entry {
                Propagated::Attachment(handle) => {
                    if let Some(attachment) = self.attachments.get_mut(*handle) {
                        if attachment.state == Lifecycle::Renew {
                            attachment.state = Lifecycle::Ok;
                        }
                    }
                }
                Propagated::Virt(handle) => {
                    if let Some(virt) = self.virts.get_mut(*handle) {
                        if virt.state == Lifecycle::Renew {
                            virt.state = Lifecycle::Ok;
                        }
                    }
                }
            }
        }
    }

    fn net_label(&self, handle: Handle<Net>) -> String {
        self.nets
            .get(handle)
            .map_or_else(|| "?".to_string(), |net| match net.name() {
                Some(name) => name.to_string(),
                None => format!("<vnet {}>", net.vnet_id),
            })
    }

    fn phys_label(&self, handle: Handle<Phys>) -> String {
        self.physes
            .get(handle)
            .and_then(Phys::name)
            .map_or_else(|| "<unnamed>".to_string(), str::to_string)
    }

    fn virt_label(&self, handle: Handle<Virt>) -> String {
        self.virts
            .get(handle)
            .and_then(Virt::name)
            .map_or_else(|| "<unnamed>".to_string(), str::to_string)
    }

    fn net_is_live(&self, handle: Handle<Net>) -> bool {
        self.nets.get(handle).is_some_and(|n| !n.state.is_deleted())
    }

    fn has_local_attachment(&self, handle: Handle<Net>) -> bool {
        let Some(net) = self.nets.get(handle) else {
            return false;
        };
        net.attachments.iter().any(|&attachment| {
            self.attachments.get(attachment).is_some_and(|a| {
                !a.state.is_deleted()
                    && self
                        .physes
                        .get(a.phys)
                        .is_some_and(|p| p.is_local && !p.state.is_deleted())
            })
        })
    }

    /// Run every cross-object check, collecting the problems found.
    pub(crate) fn collect_problems(&mut self) -> Result<Vec<Problem>, Error> {
        let mut problems = Vec::new();
        self.check_net_ids(&mut problems);
        self.check_net_pairs(&mut problems);
        self.check_duplicate_macs(&mut problems);
        self.check_local_physes(&mut problems)?;
        self.check_phys_pairs(&mut problems);
        Ok(problems)
    }

    fn check_net_ids(&self, problems: &mut Vec<Problem>) {
        for handle in self.nets.handles() {
            if !self.net_is_live(handle) {
                continue;
            }
            let Some(net) = self.nets.get(handle) else {
                continue;
            };
            let Ok(settings) = self.settings(net.settings) else {
                continue;
            };
            let Some(max) = settings.kind.max_vnet_id() else {
                continue;
            };
            if !net.vnet_id.fits(max) {
                problems.push(Problem::new(
                    ProblemKind::NetBadId,
                    vec![
                        ProblemRef::Net(self.net_label(handle)),
                        ProblemRef::NetId(net.vnet_id),
                    ],
                ));
            }
        }
    }

    fn check_net_pairs(&self, problems: &mut Vec<Problem>) {
        let nets: Vec<Handle<Net>> = self
            .nets
            .handles()
            .into_iter()
            .filter(|&h| self.net_is_live(h))
            .collect();
        for (position, &left) in nets.iter().enumerate() {
            for &right in &nets[position + 1..] {
                let (Some(l), Some(r)) = (self.nets.get(left), self.nets.get(right)) else {
                    continue;
                };
                let (Ok(ls), Ok(rs)) = (self.settings(l.settings), self.settings(r.settings))
                else {
                    continue;
                };
                if ls.kind.same_type(&rs.kind) && l.vnet_id == r.vnet_id {
                    problems.push(Problem::new(
                        ProblemKind::NetDupId,
                        vec![
                            ProblemRef::Net(self.net_label(left)),
                            ProblemRef::Net(self.net_label(right)),
                            ProblemRef::NetId(l.vnet_id),
                        ],
                    ));
                }
                let shared_port = match (ls.kind.vxlan_port(), rs.kind.vxlan_port()) {
                    (Some(a), Some(b)) => a == b,
                    _ => false,
                };
                let one_static = (ls.discipline == SwitchDiscipline::StaticE2e)
                    != (rs.discipline == SwitchDiscipline::StaticE2e);
                if shared_port
                    && one_static
                    && self.has_local_attachment(left)
                    && self.has_local_attachment(right)
                {
                    problems.push(Problem::new(
                        ProblemKind::NetBadNettype,
                        vec![
                            ProblemRef::Net(self.net_label(left)),
                            ProblemRef::Net(self.net_label(right)),
                        ],
                    ));
                }
            }
        }
    }

    fn check_duplicate_macs(&self, problems: &mut Vec<Problem>) {
        for net_handle in self.nets.handles() {
            if !self.net_is_live(net_handle) {
                continue;
            }
            let Some(net) = self.nets.get(net_handle) else {
                continue;
            };
            let virts: Vec<Handle<Virt>> = net
                .virts
                .iter()
                .copied()
                .filter(|&v| self.virts.get(v).is_some_and(|virt| !virt.state.is_deleted()))
                .collect();
            for (position, &left) in virts.iter().enumerate() {
                for &right in &virts[position + 1..] {
                    let (Some(l), Some(r)) = (self.virts.get(left), self.virts.get(right)) else {
                        continue;
                    };
                    if l.mac.is_some() && l.mac == r.mac {
                        problems.push(Problem::new(
                            ProblemKind::VirtDupAttr,
                            vec![
                                ProblemRef::Virt(self.virt_label(left)),
                                ProblemRef::Virt(self.virt_label(right)),
                                ProblemRef::Attr("mac"),
                            ],
                        ));
                    }
                }
            }
        }
    }

    fn check_local_physes(&mut self, problems: &mut Vec<Problem>) -> Result<(), Error> {
        for phys_handle in self.physes.handles() {
            let Some(phys) = self.physes.get(phys_handle) else {
                continue;
            };
            if phys.state.is_deleted() || !phys.is_local {
                continue;
            }
            let mut missing_iface_reported = false;
            for attachment_handle in phys.attachments.clone() {
                let Some(attachment) = self.attachments.get(attachment_handle) else {
                    continue;
                };
                if attachment.state.is_deleted() || !self.net_is_live(attachment.net) {
                    continue;
                }
                let virts: Vec<Handle<Virt>> = attachment
                    .virts
                    .iter()
                    .copied()
                    .filter(|&v| self.virts.get(v).is_some_and(|virt| !virt.state.is_deleted()))
                    .collect();
                if !attachment.explicitly_attached {
                    for virt_handle in virts {
                        problems.push(Problem::new(
                            ProblemKind::PhysNotAttached,
                            vec![
                                ProblemRef::Virt(self.virt_label(virt_handle)),
                                ProblemRef::Net(self.net_label(attachment.net)),
                                ProblemRef::Phys(self.phys_label(phys_handle)),
                            ],
                        ));
                    }
                    continue;
                }
                let Some(phys) = self.physes.get(phys_handle) else {
                    continue;
                };
                if phys.iface.is_none() && !missing_iface_reported {
                    missing_iface_reported = true;
                    problems.push(Problem::new(
                        ProblemKind::PhysNoAttr,
                        vec![
                            ProblemRef::Phys(self.phys_label(phys_handle)),
                            ProblemRef::Attr("iface"),
                        ],
                    ));
                }
                for &virt_handle in &virts {
                    let Some(virt) = self.virts.get(virt_handle) else {
                        continue;
                    };
                    if let Some(iface) = virt.connected_if.clone() {
                        if self.links.ifindex(&iface)?.is_none() {
                            problems.push(Problem::new(
                                ProblemKind::VirtNoIf,
                                vec![
                                    ProblemRef::Virt(self.virt_label(virt_handle)),
                                    ProblemRef::If(iface),
                                ],
                            ));
                        }
                    }
                }
                self.dispatch_driver_validation(attachment_handle, &virts, problems)?;
            }
        }
        Ok(())
    }

    fn dispatch_driver_validation(
        &mut self,
        attachment: Handle<Attachment>,
        virts: &[Handle<Virt>],
        problems: &mut Vec<Problem>,
    ) -> Result<(), Error> {
        let net = self.attachment(attachment)?.net;
        let ops = self.net_ops(net)?;
        let pa = self.pa_view(attachment)?;
        {
            let mut env = OpsEnv {
                links: self.links.as_ref(),
                ifnames: &mut self.ifnames,
            };
            ops.validate_pa(&mut env, &pa, problems);
        }
        for &virt_handle in virts {
            let iface = self
                .virts
                .get(virt_handle)
                .and_then(|v| v.connected_if.clone());
            let view = self.virt_view(virt_handle, attachment, iface)?;
            let mut env = OpsEnv {
                links: self.links.as_ref(),
                ifnames: &mut self.ifnames,
            };
            ops.validate_virt(&mut env, &view, problems);
        }
        Ok(())
    }

    fn check_phys_pairs(&self, problems: &mut Vec<Problem>) {
        let physes: Vec<Handle<Phys>> = self
            .physes
            .handles()
            .into_iter()
            .filter(|&h| self.physes.get(h).is_some_and(|p| !p.state.is_deleted()))
            .collect();
        for (position, &left) in physes.iter().enumerate() {
            for &right in &physes[position + 1..] {
                let (Some(l), Some(r)) = (self.physes.get(left), self.physes.get(right)) else {
                    continue;
                };
                if l.ip.is_some() && l.ip == r.ip {
                    problems.push(Problem::new(
                        ProblemKind::PhysDupAttr,
                        vec![
                            ProblemRef::Phys(self.phys_label(left)),
                            ProblemRef::Phys(self.phys_label(right)),
                            ProblemRef::Attr("ip"),
                        ],
                    ));
                }
            }
        }
    }
}
