// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Deferral of IPv6 addresses still in Duplicate Address Detection.
//!
//! A tentative address is parked with a timer; each expiry re-checks the
//! DAD state against the live interface view and, once the address settles,
//! releases it for delivery as an UP event.

use crate::pm::{IfAddr, Interfaces};
use core::time::Duration;
use s2n_mptcp_core::time::{Timer, Timestamp};

/// True when the address must not be used yet
pub fn in_dad_state(ifa: &IfAddr) -> bool {
    ifa.addr.is_ipv6() && ifa.tentative
}

#[derive(Debug)]
struct Entry {
    ifa: IfAddr,
    timer: Timer,
}

/// Parked tentative addresses
#[derive(Debug, Default)]
pub struct DadQueue {
    entries: Vec<Entry>,
}

impl DadQueue {
    /// Parks a tentative address. The re-check delay is the interface's
    /// router-solicitation delay when it advertises one.
    pub fn defer(&mut self, ifa: IfAddr, now: Timestamp, default_wait: Duration) {
        let delay = ifa.rtr_solicit_delay.unwrap_or(default_wait);
        let mut timer = Timer::default();
        timer.set(now + delay);
        self.entries.push(Entry { ifa, timer });
    }

    /// Re-checks expired entries. Addresses whose DAD completed are
    /// returned for delivery as UP events; the rest are re-armed.
    pub fn poll(
        &mut self,
        now: Timestamp,
        interfaces: &dyn Interfaces,
        default_wait: Duration,
    ) -> Vec<IfAddr> {
        let mut ready = Vec::new();
        self.entries.retain_mut(|entry| {
            if !entry.timer.is_expired(now) {
                return true;
            }
            if interfaces.is_tentative(entry.ifa.ifindex, entry.ifa.addr) {
                let delay = entry.ifa.rtr_solicit_delay.unwrap_or(default_wait);
                entry.timer.set(now + delay);
                true
            } else {
                let mut ifa = entry.ifa.clone();
                ifa.tentative = false;
                ready.push(ifa);
                false
            }
        });
        ready
    }

    /// Earliest pending re-check, for the embedder's timer wheel
    pub fn next_expiration(&self) -> Option<Timestamp> {
        self.entries
            .iter()
            .filter_map(|entry| entry.timer.expiration())
            .min()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}
