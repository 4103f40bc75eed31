// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Per-connection address registry.
//!
//! Local and remote addresses live in fixed arrays of [`MAX_ADDR`] slots per
//! family per direction; presence is a 16-bit field whose bit positions are
//! the slot indices. The bit positions are on-wire-significant (they feed
//! ADD_ADDR/REMOVE_ADDR IDs), so the width must never change.

use core::fmt;
use s2n_mptcp_core::inet::{wire_id, Family};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

pub use s2n_mptcp_core::inet::MAX_ADDR;

/// An IP address usable as a registry slot
pub trait Ip: Copy + Eq + fmt::Debug + Into<IpAddr> + 'static {
    const UNSPECIFIED: Self;
    const FAMILY: Family;
}

impl Ip for Ipv4Addr {
    const UNSPECIFIED: Self = Ipv4Addr::UNSPECIFIED;
    const FAMILY: Family = Family::V4;
}

impl Ip for Ipv6Addr {
    const UNSPECIFIED: Self = Ipv6Addr::UNSPECIFIED;
    const FAMILY: Family = Family::V6;
}

/// Returns the lowest clear bit below [`MAX_ADDR`]
pub fn find_free_index(bits: u16) -> Option<u8> {
    (0..MAX_ADDR as u8).find(|i| bits & (1 << i) == 0)
}

/// Returns a clear bit at or above `start`, wrapping to 0.
///
/// The hint keeps recently vacated low slots from being reused immediately,
/// which would recycle a wire ID while the peer may still reference it.
pub fn find_free_index_from(bits: u16, start: u8) -> Option<u8> {
    let start = start.min(MAX_ADDR as u8);
    (start..MAX_ADDR as u8)
        .chain(0..start)
        .find(|i| bits & (1 << i) == 0)
}

/// Iterates the set bit positions below [`MAX_ADDR`]
pub fn set_bits(bits: u16) -> impl Iterator<Item = u8> {
    (0..MAX_ADDR as u8).filter(move |i| bits & (1 << i) != 0)
}

/// Bit used to pair a local wire ID with a remote slot.
///
/// IDs of v6 locals are offset by [`MAX_ADDR`] on the wire; their pair bits
/// are not. The initial subflow's v6 local keeps ID 0, which the reduction
/// also maps to bit 0.
#[inline]
pub fn pair_bit(id: u8) -> u16 {
    1 << (id - id.min(MAX_ADDR as u8))
}

/// A local address slot
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LocalAddr<A> {
    pub addr: A,
    /// Wire-visible ID; stable for the lifetime of the slot
    pub id: u8,
    pub low_prio: bool,
}

/// A peer-advertised address slot
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RemoteAddr<A> {
    pub addr: A,
    /// Peer port; 0 means "use the meta-connection's destination port"
    pub port: u16,
    /// Peer-assigned ID
    pub id: u8,
    /// One bit per local ID already attempted against this remote
    pub bitfield: u16,
    /// Pairs parked for retry after a transient connect failure
    pub retry_bitfield: u16,
}

/// Outcome of [`RemoteSet::add`]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AddOutcome {
    Added,
    /// `(id, addr, port)` already present; nothing changed
    Duplicate,
    /// Known ID seen from a new source address; rewritten in place
    NatUpdated,
}

/// All [`MAX_ADDR`] slots of a family are occupied
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Full;

impl fmt::Display for Full {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "address registry full")
    }
}

impl std::error::Error for Full {}

/// No populated slot carries the requested ID
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct NotFound;

impl fmt::Display for NotFound {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "address id not found")
    }
}

impl std::error::Error for NotFound {}

/// Local addresses of one family
#[derive(Clone, Debug)]
pub struct LocalSet<A: Ip> {
    slots: [LocalAddr<A>; MAX_ADDR],
    bits: u16,
    /// Slot search hint for the next insertion
    next_index: u8,
}

impl<A: Ip> Default for LocalSet<A> {
    fn default() -> Self {
        Self {
            slots: [LocalAddr {
                addr: A::UNSPECIFIED,
                id: 0,
                low_prio: false,
            }; MAX_ADDR],
            bits: 0,
            next_index: 0,
        }
    }
}

impl<A: Ip> LocalSet<A> {
    #[inline]
    pub fn bits(&self) -> u16 {
        self.bits
    }

    #[inline]
    pub fn next_index(&self) -> u8 {
        self.next_index
    }

    /// Installs the initial subflow's local address in slot 0 (wire ID 0)
    pub fn set_initial(&mut self, addr: A, low_prio: bool) {
        self.slots[0] = LocalAddr {
            addr,
            id: 0,
            low_prio,
        };
        self.bits |= 1;
        if self.next_index == 0 {
            self.next_index = 1;
        }
    }

    /// Inserts a new local address, searching from the rotation hint.
    /// Returns the slot index.
    pub fn insert(&mut self, addr: A, low_prio: bool) -> Result<u8, Full> {
        let slot = find_free_index_from(self.bits, self.next_index).ok_or(Full)?;
        self.slots[slot as usize] = LocalAddr {
            addr,
            id: wire_id(A::FAMILY, slot),
            low_prio,
        };
        self.bits |= 1 << slot;
        self.next_index = slot + 1;
        Ok(slot)
    }

    /// Finds the populated slot holding `addr`
    pub fn find(&self, addr: A) -> Option<u8> {
        set_bits(self.bits).find(|&slot| self.slots[slot as usize].addr == addr)
    }

    pub fn get(&self, slot: u8) -> Option<&LocalAddr<A>> {
        (self.bits & (1 << slot) != 0).then(|| &self.slots[slot as usize])
    }

    pub fn get_mut(&mut self, slot: u8) -> Option<&mut LocalAddr<A>> {
        (self.bits & (1 << slot) != 0).then(|| &mut self.slots[slot as usize])
    }

    /// Clears the slot bit; the wire ID becomes reusable only after the
    /// rotation hint wraps past it
    pub fn remove(&mut self, slot: u8) {
        self.bits &= !(1 << slot);
    }

    pub fn iter(&self) -> impl Iterator<Item = (u8, &LocalAddr<A>)> {
        set_bits(self.bits).map(move |slot| (slot, &self.slots[slot as usize]))
    }
}

/// Peer-advertised addresses of one family
#[derive(Clone, Debug)]
pub struct RemoteSet<A: Ip> {
    slots: [RemoteAddr<A>; MAX_ADDR],
    bits: u16,
}

impl<A: Ip> Default for RemoteSet<A> {
    fn default() -> Self {
        Self {
            slots: [RemoteAddr {
                addr: A::UNSPECIFIED,
                port: 0,
                id: 0,
                bitfield: 0,
                retry_bitfield: 0,
            }; MAX_ADDR],
            bits: 0,
        }
    }
}

impl<A: Ip> RemoteSet<A> {
    #[inline]
    pub fn bits(&self) -> u16 {
        self.bits
    }

    /// Records a peer address advertisement or JOIN source.
    ///
    /// A known `(id, addr, port)` triple is coalesced. A known `id` with a
    /// different address is a NAT rewrite: the stored address is what this
    /// host observes, so it is updated in place and keeps its ID.
    pub fn add(&mut self, addr: A, port: u16, id: u8) -> Result<AddOutcome, Full> {
        for slot in set_bits(self.bits) {
            let rem = &mut self.slots[slot as usize];

            if rem.id == id && rem.addr == addr && rem.port == port {
                return Ok(AddOutcome::Duplicate);
            }

            if rem.id == id && rem.addr != addr {
                tracing::debug!(
                    old = ?rem.addr,
                    new = ?addr,
                    id,
                    "updating remote address in place"
                );
                rem.addr = addr;
                rem.port = port;
                return Ok(AddOutcome::NatUpdated);
            }
        }

        let slot = find_free_index(self.bits).ok_or_else(|| {
            tracing::debug!(
                max = MAX_ADDR,
                addr = ?addr,
                "at max number of remote addresses"
            );
            Full
        })?;

        self.slots[slot as usize] = RemoteAddr {
            addr,
            port,
            id,
            bitfield: 0,
            retry_bitfield: 0,
        };
        self.bits |= 1 << slot;
        Ok(AddOutcome::Added)
    }

    /// Drops the slot advertising `id`
    pub fn remove(&mut self, id: u8) -> Result<(), NotFound> {
        for slot in set_bits(self.bits) {
            if self.slots[slot as usize].id == id {
                self.bits &= !(1 << slot);
                return Ok(());
            }
        }
        Err(NotFound)
    }

    /// Marks the initial local address (ID 0) as paired with the remote
    /// the initial subflow is connected to
    pub fn set_init_addr_bit(&mut self, addr: A) {
        for slot in set_bits(self.bits) {
            if self.slots[slot as usize].addr == addr {
                self.slots[slot as usize].bitfield |= 1;
                return;
            }
        }
    }

    /// Forgets pairings with local slots that no longer exist
    pub fn mask_bitfields(&mut self, loc_bits: u16) {
        for slot in set_bits(self.bits) {
            self.slots[slot as usize].bitfield &= loc_bits;
        }
    }

    pub fn get(&self, slot: u8) -> Option<&RemoteAddr<A>> {
        (self.bits & (1 << slot) != 0).then(|| &self.slots[slot as usize])
    }

    pub fn get_mut(&mut self, slot: u8) -> Option<&mut RemoteAddr<A>> {
        (self.bits & (1 << slot) != 0).then(|| &mut self.slots[slot as usize])
    }

    pub fn iter(&self) -> impl Iterator<Item = (u8, &RemoteAddr<A>)> {
        set_bits(self.bits).map(move |slot| (slot, &self.slots[slot as usize]))
    }
}

/// Both remote families plus the shared advertisement-received flag
#[derive(Clone, Debug, Default)]
pub struct MultipathOptions {
    pub rem4: RemoteSet<Ipv4Addr>,
    pub rem6: RemoteSet<Ipv6Addr>,
    /// Set whenever the remote list changed; consumed by option emission
    pub list_rcvd: bool,
}

impl MultipathOptions {
    pub fn add_remote(&mut self, addr: IpAddr, port: u16, id: u8) -> Result<AddOutcome, Full> {
        let outcome = match addr {
            IpAddr::V4(addr) => self.rem4.add(addr, port, id)?,
            IpAddr::V6(addr) => self.rem6.add(addr, port, id)?,
        };
        if matches!(outcome, AddOutcome::Added | AddOutcome::NatUpdated) {
            self.list_rcvd = true;
        }
        Ok(outcome)
    }

    pub fn remove_remote(&mut self, family: Family, id: u8) -> Result<(), NotFound> {
        match family {
            Family::V4 => self.rem4.remove(id),
            Family::V6 => self.rem6.remove(id),
        }
    }

    pub fn set_init_addr_bit(&mut self, initial_dst: IpAddr) {
        match initial_dst {
            IpAddr::V4(addr) => self.rem4.set_init_addr_bit(addr),
            IpAddr::V6(addr) => self.rem6.set_init_addr_bit(addr),
        }
    }
}
