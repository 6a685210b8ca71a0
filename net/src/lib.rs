// SPDX-License-Identifier: Apache-2.0
// Copyright Trellis Project Authors

#![forbid(unsafe_code)] // Validation logic should always be strictly safe
#![deny(missing_docs, clippy::all, clippy::pedantic)]
#![deny(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

//! Strictly validated value types shared by the trellis control plane.

pub mod iface;
pub mod mac;
pub mod port;
pub mod vnet;
