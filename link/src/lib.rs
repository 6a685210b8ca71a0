// SPDX-License-Identifier: Apache-2.0
// Copyright Trellis Project Authors

//! Resolve kernel network interface names for the trellis control plane.
//!
//! The control plane is synchronous by contract: nothing in it suspends
//! voluntarily, and the only blocking it performs is netlink I/O.  This crate
//! keeps that contract by owning a current-thread tokio runtime inside
//! [`NetlinkLinks`] and driving every rtnetlink request to completion with
//! `block_on`.  Everything above it programs against the [`LinkLookup`]
//! trait, so tests and embedders can substitute a static table.

#![deny(
    unsafe_code,
    clippy::all,
    clippy::pedantic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic
)]

use std::collections::HashMap;
use std::fmt::{Debug, Formatter};

use futures::TryStreamExt;
use net::iface::{InterfaceIndex, InterfaceName};
use tracing::trace;

/// Errors surfaced by link resolution.
#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    /// The netlink socket could not be opened or driven.
    #[error("failed to reach netlink: {0}")]
    Io(#[from] std::io::Error),
    /// The kernel rejected a request for a reason other than "no such device".
    #[error("netlink request failed: {0}")]
    Netlink(#[from] rtnetlink::Error),
}

/// Name-to-ifindex resolution.
///
/// Implementations must treat "the interface does not exist" as a successful
/// `None`, not an error: an unresolvable name is a validation problem for the
/// caller to report, while `Err` means the lookup machinery itself failed.
pub trait LinkLookup {
    /// Resolve `name` to the kernel's interface index.
    ///
    /// # Errors
    ///
    /// Returns an error if the lookup could not be performed at all.
    fn ifindex(&self, name: &InterfaceName) -> Result<Option<InterfaceIndex>, LinkError>;
}

/// [`LinkLookup`] backed by a live rtnetlink connection.
pub struct NetlinkLinks {
    runtime: tokio::runtime::Runtime,
    handle: rtnetlink::Handle,
}

impl Debug for NetlinkLinks {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetlinkLinks").finish_non_exhaustive()
    }
}

impl NetlinkLinks {
    /// Open a netlink connection on a private current-thread runtime.
    ///
    /// The connection future is spawned onto the runtime and makes progress
    /// whenever a lookup blocks on it.
    ///
    /// # Errors
    ///
    /// Returns an error if the runtime or the netlink socket cannot be set up.
    pub fn connect() -> Result<NetlinkLinks, LinkError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_io()
            .enable_time()
            .build()?;
        let (connection, handle, _) = {
            let _guard = runtime.enter();
            rtnetlink::new_connection()?
        };
        runtime.spawn(connection);
        Ok(NetlinkLinks { runtime, handle })
    }
}

impl LinkLookup for NetlinkLinks {
    fn ifindex(&self, name: &InterfaceName) -> Result<Option<InterfaceIndex>, LinkError> {
        let request = self
            .handle
            .link()
            .get()
            .match_name(name.as_ref().to_string());
        let message = self.runtime.block_on(async {
            let mut stream = request.execute();
            stream.try_next().await
        });
        match message {
            Ok(Some(link)) => {
                trace!("resolved {name} to ifindex {}", link.header.index);
                Ok(Some(InterfaceIndex::new(link.header.index)))
            }
            Ok(None) => Ok(None),
            Err(rtnetlink::Error::NetlinkError(err))
                if err.raw_code() == -libc::ENODEV =>
            {
                Ok(None)
            }
            Err(err) => Err(LinkError::Netlink(err)),
        }
    }
}

/// [`LinkLookup`] backed by a fixed table.
///
/// Used by tests and by embedders that already know the interface inventory.
#[derive(Debug, Clone, Default)]
pub struct StaticLinks(HashMap<InterfaceName, InterfaceIndex>);

impl StaticLinks {
    /// An empty table: every lookup resolves to `None`.
    #[must_use]
    pub fn empty() -> StaticLinks {
        StaticLinks::default()
    }

    /// Record `name` as resolving to `index`.
    pub fn insert(&mut self, name: InterfaceName, index: InterfaceIndex) {
        self.0.insert(name, index);
    }
}

impl<const N: usize> From<[(InterfaceName, InterfaceIndex); N]> for StaticLinks {
    fn from(entries: [(InterfaceName, InterfaceIndex); N]) -> StaticLinks {
        StaticLinks(entries.into_iter().collect())
    }
}

impl LinkLookup for StaticLinks {
    fn ifindex(&self, name: &InterfaceName) -> Result<Option<InterfaceIndex>, LinkError> {
        Ok(self.0.get(name).copied())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;

    fn name(raw: &str) -> InterfaceName {
        InterfaceName::try_from(raw).unwrap()
    }

    #[test]
    fn static_lookup_hits_and_misses() {
        let links = StaticLinks::from([
            (name("eth0"), InterfaceIndex::new(2)),
            (name("tap0"), InterfaceIndex::new(7)),
        ]);
        assert_eq!(links.ifindex(&name("eth0")).unwrap(), Some(InterfaceIndex::new(2)));
        assert_eq!(links.ifindex(&name("tap0")).unwrap(), Some(InterfaceIndex::new(7)));
        assert_eq!(links.ifindex(&name("tap1")).unwrap(), None);
    }

    #[test]
    fn empty_table_resolves_nothing() {
        let links = StaticLinks::empty();
        assert_eq!(links.ifindex(&name("eth0")).unwrap(), None);
    }
}
