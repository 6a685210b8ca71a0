// SPDX-License-Identifier: Apache-2.0
// Copyright Trellis Project Authors

//! The trellis object model and its differential commit engine.
//!
//! A [`Context`] holds the declarative picture of an overlay deployment:
//! [`Settings`] describe network types, [`Net`]s are the virtual networks,
//! [`Phys`]es the physical hosts, [`Attachment`]s the junctions where a host
//! participates in a network, and [`Virt`]s the virtual interfaces connected
//! through those junctions.  Every object carries a [`Lifecycle`] state, and
//! [`Context::commit`] reconciles the kernel data plane with the model by
//! applying only the delta since the previous commit: validation first, then
//! a teardown pass over everything renewed or deleted, then a build pass,
//! then state acknowledgement.
//!
//! The data plane itself is programmed by network-type drivers implementing
//! [`NettypeOps`]; this crate decides *when* each driver hook runs and in
//! which order, never *how* the kernel is told.

#![deny(
    unsafe_code,
    clippy::all,
    clippy::pedantic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic
)]

mod arena;
pub mod cleanup;
mod commit;
mod graph;
mod names;
pub mod ops;
pub mod problem;
pub mod state;
mod validate;

pub use arena::Handle;
pub use graph::attachment::{Attachment, RemotePa, RemoteVirt};
pub use graph::net::Net;
pub use graph::phys::Phys;
pub use graph::settings::{Hooks, NettypeKind, Settings, StartupHook, SwitchDiscipline};
pub use graph::virt::Virt;
pub use graph::Context;
pub use ops::NettypeOps;
pub use problem::Problem;
pub use state::Lifecycle;

use net::iface::IllegalInterfaceName;

/// The result codes of every graph-mutating entry point.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// An allocation could not be satisfied.
    #[error("out of memory")]
    Nomem,
    /// A unique name or entity already exists.
    #[error("duplicate {0}")]
    Duplicate(&'static str),
    /// An interface name is not usable.
    #[error("interface name cannot be used: {0}")]
    NoIf(#[from] IllegalInterfaceName),
    /// The netlink machinery failed.
    #[error("netlink failure: {0}")]
    Netlink(#[from] link::LinkError),
    /// Validation reported problems; the data plane was not touched.
    #[error("validation reported {0} problem(s)")]
    Validate(usize),
    /// A data-plane operation failed after validation passed.
    #[error("commit failed")]
    Commit,
    /// The handle does not name a live object.
    #[error("no such {0}")]
    Gone(&'static str),
}
