// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Stateful machinery of the s2n-mptcp subflow path manager: per-connection
//! address registries, the JOIN handshake state machine with its global
//! request table, the subflow factory and the OS address-event reactor.
//!
//! The packet-facing entry points ([`dispatch::do_rcv`] and the `join`
//! module) are strictly non-blocking; the only lock they ever take is the
//! request table's bucket lock. Subflow creation ([`factory`]) and address
//! events ([`pm`]) run in user context with the meta-connection lock held,
//! which API signatures encode as `&mut Meta`.

pub mod addr;
pub mod config;
pub mod dispatch;
pub mod endpoint;
pub mod factory;
pub mod isn;
pub mod join;
pub mod meta;
pub mod pm;
pub mod route;
pub mod stats;
pub mod subflow;
pub mod tcp;

#[cfg(any(test, feature = "testing"))]
pub mod testing;
