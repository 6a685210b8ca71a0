// SPDX-License-Identifier: Apache-2.0
// Copyright Trellis Project Authors

//! Ordered TC classifier chains for the trellis control plane.
//!
//! Network-type drivers switch and firewall traffic by installing flower
//! filters on kernel interfaces.  This crate owns the bookkeeping those
//! drivers share: [`flower::RuleSet`] manages a contiguous range of filter
//! priorities at one `(interface, parent, chain)` coordinate, collapsing
//! rules with the same masked key into a single flower filter, and
//! [`fanout::Fanout`] spreads an arbitrarily long action list over a chain
//! of filters that each hold a bounded number of actions.
//!
//! Nothing here talks netlink.  The structures decide *what* exists at which
//! priority with which handle; emission is the caller's business.

#![deny(
    unsafe_code,
    missing_docs,
    clippy::all,
    clippy::pedantic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic
)]

pub mod action;
pub mod fanout;
pub mod flower;
pub mod ids;
