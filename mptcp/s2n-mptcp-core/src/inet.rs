// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use core::fmt;
use std::net::IpAddr;

/// Address family of a subflow or meta-connection end
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Family {
    V4,
    V6,
}

impl Family {
    #[inline]
    pub fn of(addr: &IpAddr) -> Self {
        match addr {
            IpAddr::V4(_) => Family::V4,
            IpAddr::V6(_) => Family::V6,
        }
    }
}

impl fmt::Display for Family {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Family::V4 => write!(f, "inet"),
            Family::V6 => write!(f, "inet6"),
        }
    }
}

/// Maximum number of address slots per family per direction.
///
/// The width is on-wire-significant: local IPv6 address IDs are offset by
/// this value and presence is tracked in 16-bit fields. It must not be
/// widened.
pub const MAX_ADDR: usize = 16;

/// Wire-visible address ID for a local slot.
///
/// Slot 0 carries ID 0 and is reserved for the initial subflow. IPv6 slots
/// expose `slot + MAX_ADDR` so the two families never collide in the peer's
/// ID space.
#[inline]
pub fn wire_id(family: Family, slot: u8) -> u8 {
    debug_assert!((slot as usize) < MAX_ADDR);
    match family {
        Family::V4 => slot,
        Family::V6 => slot + MAX_ADDR as u8,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_id_ranges() {
        for slot in 0..MAX_ADDR as u8 {
            assert_eq!(wire_id(Family::V4, slot), slot);
            let id6 = wire_id(Family::V6, slot);
            assert!((MAX_ADDR as u8..2 * MAX_ADDR as u8).contains(&id6));
        }
    }
}
