// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Interfaces onto the host routing layer and the peer timestamp cache.
//!
//! Both are out-of-scope collaborators; the traits here are what the path
//! manager consumes. Test doubles live in [`crate::testing`].

use core::{fmt, time::Duration};
use std::net::IpAddr;

/// A flow key for a routing decision
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Flow {
    pub saddr: IpAddr,
    pub daddr: IpAddr,
    pub sport: u16,
    pub dport: u16,
    /// Output interface restriction, when the socket is bound to a device
    pub oif: Option<u32>,
}

/// A resolved destination entry
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Route {
    pub daddr: IpAddr,
    pub oif: Option<u32>,
    /// Cached round-trip metric, when the destination has history
    pub rtt: Option<Duration>,
    /// Advertised MSS derived from the path MTU
    pub advmss: Option<u16>,
}

/// The destination is unreachable
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RouteError;

impl fmt::Display for RouteError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "no route to destination")
    }
}

impl std::error::Error for RouteError {}

/// Destination lookup, v4 and v6
pub trait Routes {
    fn route(&self, flow: &Flow) -> Result<Route, RouteError>;
}

/// Cached per-peer TCP timestamp state, as recorded when connections to the
/// peer entered TIME-WAIT
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PeerEntry {
    /// Last timestamp value seen from the peer
    pub tcp_ts: u32,
    /// Seconds (on the local clock) when `tcp_ts` was recorded; 0 when the
    /// entry carries no timestamp
    pub tcp_ts_stamp: u64,
}

/// The peer table collaborator
pub trait Peers {
    fn get(&self, addr: IpAddr) -> Option<PeerEntry>;
}
