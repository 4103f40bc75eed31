// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! SNMP-MIB-style event counters.

use core::sync::atomic::{AtomicU64, Ordering};

/// A monotonically increasing event counter
#[derive(Debug, Default)]
pub struct Counter(AtomicU64);

impl Counter {
    #[inline]
    pub fn increment(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Counters incremented by the JOIN and promotion paths
#[derive(Debug, Default)]
pub struct Stats {
    /// SYNs rejected by the PAWS timestamp check
    pub paws_passive_rejected: Counter,
    /// Promotions refused because the accept queue was full
    pub listen_overflows: Counter,
    /// Promotions refused for any other reason (route lookup failure)
    pub listen_drops: Counter,
    /// Retransmitted SYN-ACK segments
    pub retrans_segs: Counter,
}
