// SPDX-License-Identifier: Apache-2.0
// Copyright Trellis Project Authors

//! Shared fixtures: a context with a canned interface inventory and a
//! driver that records every hook call instead of touching the kernel.

#![allow(dead_code)] // not every test binary uses every fixture

use link::StaticLinks;
use net::iface::{InterfaceIndex, InterfaceName};
use std::cell::RefCell;
use std::rc::Rc;
use trellis_model::ops::{
    NettypeOps, OpsEnv, OpsError, PaView, RemotePaView, RemoteVirtView, VirtView,
};
use trellis_model::{Context, Handle, Problem, Settings};

/// One recorded driver call, labelled with entity names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    CreatePa { phys: String, net: String },
    DestroyPa { phys: String, net: String },
    AddVirt { virt: String },
    RemoveVirt { virt: String },
    AddRemotePa { local: String, peer: String },
    RemoveRemotePa { local: String, peer: String },
    AddRemoteVirt { virt: String },
    RemoveRemoteVirt { virt: String },
}

#[derive(Default, Clone)]
pub struct CallLog(Rc<RefCell<Vec<Call>>>);

impl CallLog {
    pub fn take(&self) -> Vec<Call> {
        self.0.borrow_mut().drain(..).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.0.borrow().is_empty()
    }

    fn push(&self, call: Call) {
        self.0.borrow_mut().push(call);
    }
}

fn label(name: Option<&String>) -> String {
    name.cloned().unwrap_or_else(|| "<unnamed>".to_string())
}

/// A driver that records calls and always succeeds.
pub struct RecordingOps {
    log: CallLog,
}

impl NettypeOps for RecordingOps {
    fn create_pa(&self, _env: &mut OpsEnv<'_>, pa: &mut PaView) -> Result<(), OpsError> {
        self.log.push(Call::CreatePa {
            phys: label(pa.phys.name.as_ref()),
            net: label(pa.net.name.as_ref()),
        });
        Ok(())
    }

    fn destroy_pa(&self, _env: &mut OpsEnv<'_>, pa: &mut PaView) -> Result<(), OpsError> {
        self.log.push(Call::DestroyPa {
            phys: label(pa.phys.name.as_ref()),
            net: label(pa.net.name.as_ref()),
        });
        Ok(())
    }

    fn add_virt(&self, _env: &mut OpsEnv<'_>, virt: &VirtView) -> Result<(), OpsError> {
        self.log.push(Call::AddVirt {
            virt: label(virt.name.as_ref()),
        });
        Ok(())
    }

    fn remove_virt(&self, _env: &mut OpsEnv<'_>, virt: &VirtView) -> Result<(), OpsError> {
        self.log.push(Call::RemoveVirt {
            virt: label(virt.name.as_ref()),
        });
        Ok(())
    }

    fn add_remote_pa(
        &self,
        _env: &mut OpsEnv<'_>,
        remote: &mut RemotePaView,
    ) -> Result<(), OpsError> {
        self.log.push(Call::AddRemotePa {
            local: label(remote.local.phys.name.as_ref()),
            peer: label(remote.peer.phys.name.as_ref()),
        });
        Ok(())
    }

    fn remove_remote_pa(
        &self,
        _env: &mut OpsEnv<'_>,
        remote: &mut RemotePaView,
    ) -> Result<(), OpsError> {
        self.log.push(Call::RemoveRemotePa {
            local: label(remote.local.phys.name.as_ref()),
            peer: label(remote.peer.phys.name.as_ref()),
        });
        Ok(())
    }

    fn add_remote_virt(
        &self,
        _env: &mut OpsEnv<'_>,
        remote: &RemoteVirtView,
    ) -> Result<(), OpsError> {
        self.log.push(Call::AddRemoteVirt {
            virt: label(remote.name.as_ref()),
        });
        Ok(())
    }

    fn remove_remote_virt(
        &self,
        _env: &mut OpsEnv<'_>,
        remote: &RemoteVirtView,
    ) -> Result<(), OpsError> {
        self.log.push(Call::RemoveRemoteVirt {
            virt: label(remote.name.as_ref()),
        });
        Ok(())
    }
}

/// A context whose interface inventory is exactly `links`.
pub fn ctx(links: &[(&str, u32)]) -> Context {
    let mut table = StaticLinks::empty();
    for (name, index) in links {
        table.insert(
            InterfaceName::try_from(*name).expect("test interface name"),
            InterfaceIndex::new(*index),
        );
    }
    Context::with_links("test", table)
}

/// Bind a recording driver to `settings` and return its log.
pub fn record(ctx: &mut Context, settings: Handle<Settings>) -> CallLog {
    let log = CallLog::default();
    ctx.settings_set_ops(settings, Rc::new(RecordingOps { log: log.clone() }))
        .expect("live settings");
    log
}

/// Commit and panic on any reported problem.
pub fn commit_ok(ctx: &mut Context) {
    let mut reported = Vec::new();
    let outcome = ctx.commit(|problem| reported.push(problem.clone()));
    if let Err(err) = outcome {
        panic!("commit failed with {err}: {reported:?}");
    }
    assert!(reported.is_empty());
}

/// Commit, expecting validation to reject the model.
pub fn commit_rejected(ctx: &mut Context) -> Vec<Problem> {
    let mut reported = Vec::new();
    let outcome = ctx.commit(|problem| reported.push(problem.clone()));
    assert!(
        matches!(outcome, Err(trellis_model::Error::Validate(_))),
        "expected a validation failure, got {outcome:?}"
    );
    reported
}
