// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Initial sequence number generation for JOIN SYN-ACKs.
//!
//! A keyed hash over the 4-tuple plus a coarse clock component, so that
//! sequences are unpredictable across connections but monotonic within one.

use core::hash::Hasher;
use s2n_mptcp_core::{random, time::Timestamp};
use siphasher::sip::SipHasher13;
use std::net::{IpAddr, SocketAddr};

#[derive(Clone, Copy, Debug)]
pub struct IsnGenerator {
    key0: u64,
    key1: u64,
}

impl IsnGenerator {
    pub fn new(random: &mut dyn random::Generator) -> Result<Self, random::Error> {
        Ok(Self {
            key0: random.gen_u64()?,
            key1: random.gen_u64()?,
        })
    }

    /// Computes a fresh initial sequence for the given flow
    pub fn sequence(&self, local: SocketAddr, remote: SocketAddr, now: Timestamp) -> u32 {
        let mut hasher = SipHasher13::new_with_keys(self.key0, self.key1);
        write_ip(&mut hasher, local.ip());
        write_ip(&mut hasher, remote.ip());
        hasher.write_u16(local.port());
        hasher.write_u16(remote.port());

        let base = hasher.finish() as u32;
        let clock = (now.as_duration().as_micros() as u32) >> 6;
        base.wrapping_add(clock)
    }
}

fn write_ip(hasher: &mut SipHasher13, addr: IpAddr) {
    match addr {
        IpAddr::V4(addr) => hasher.write(&addr.octets()),
        IpAddr::V6(addr) => hasher.write(&addr.octets()),
    }
}
