// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! The address event reactor.
//!
//! Consumes interface/address notifications, mutates the per-connection
//! local address registry and drives advertisement scheduling and subflow
//! re-evaluation. Notifier callbacks run in process context; per-meta work
//! happens with the meta lock held.

pub mod dad;

pub use dad::DadQueue;

use crate::{
    endpoint::{Context, FourTuple},
    factory,
    meta::{IpExt, Meta},
    subflow::SubflowRef,
};
use core::{fmt, time::Duration};
use s2n_mptcp_core::{inet::Family, time::Timestamp};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

/// Routing scopes, numerically ordered from widest to narrowest
pub const RT_SCOPE_UNIVERSE: u8 = 0;
pub const RT_SCOPE_SITE: u8 = 200;
pub const RT_SCOPE_LINK: u8 = 253;
pub const RT_SCOPE_HOST: u8 = 254;

/// Interface/address lifecycle events the reactor consumes
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AddrEvent {
    Up,
    Down,
    Change,
}

/// Snapshot of one configured interface address
#[derive(Clone, Debug)]
pub struct IfAddr {
    pub addr: IpAddr,
    pub ifindex: u32,
    pub scope: u8,
    /// The interface opted out of multipath entirely
    pub no_multipath: bool,
    /// The interface is flagged as a backup path
    pub backup: bool,
    /// The interface is administratively and operationally up
    pub running: bool,
    /// v6 only: the address is still in Duplicate Address Detection
    pub tentative: bool,
    /// v6 only: router-solicitation delay configured on the interface
    pub rtr_solicit_delay: Option<Duration>,
}

/// Live view of the host's interfaces, consumed under RCU-like read-side
/// discipline (short, non-blocking reads)
pub trait Interfaces {
    /// Addresses currently configured on an interface
    fn addresses(&self, ifindex: u32) -> Vec<IfAddr>;
    /// Whether a v6 address is still tentative
    fn is_tentative(&self, ifindex: u32, addr: IpAddr) -> bool;
}

/// Per-address notifier entry point for IPv4
pub fn inet_addr_event(meta: &mut Meta, ifa: &IfAddr, event: AddrEvent, cx: &mut Context) {
    addr_event(meta, ifa, event, cx);
}

/// Per-address notifier entry point for IPv6.
///
/// Tentative addresses are parked on the DAD queue instead of being
/// delivered; [`DadQueue::poll`] re-dispatches them as UP once DAD clears.
/// Returns `false` when the event was deferred.
pub fn inet6_addr_event(
    dad: &mut DadQueue,
    ifa: &IfAddr,
    now: Timestamp,
    default_wait: Duration,
) -> bool {
    if dad::in_dad_state(ifa) {
        dad.defer(ifa.clone(), now, default_wait);
        return false;
    }
    true
}

/// Whole-interface notifier entry point: fans the event out to every
/// address configured on the device
pub fn netdev_event(
    meta: &mut Meta,
    ifindex: u32,
    event: AddrEvent,
    interfaces: &dyn Interfaces,
    cx: &mut Context,
) {
    for ifa in interfaces.addresses(ifindex) {
        addr_event(meta, &ifa, event, cx);
    }
}

/// Reacts to one address event on one meta-connection
pub fn addr_event(meta: &mut Meta, ifa: &IfAddr, event: AddrEvent, cx: &mut Context) {
    if ifa.scope > RT_SCOPE_LINK || ifa.no_multipath {
        return;
    }

    match ifa.addr {
        IpAddr::V4(addr) => handle::<Ipv4Addr>(meta, ifa, addr, event, cx),
        IpAddr::V6(addr) => {
            let linklocal = addr.segments()[0] & 0xffc0 == 0xfe80;
            if addr.is_unspecified() || addr.is_loopback() || linklocal {
                return;
            }
            handle::<Ipv6Addr>(meta, ifa, addr, event, cx)
        }
    }
}

fn handle<A: IpExt>(meta: &mut Meta, ifa: &IfAddr, addr: A, event: AddrEvent, cx: &mut Context) {
    let Some(slot) = A::loc(meta).find(addr) else {
        // not yet in the address list
        if matches!(event, AddrEvent::Up | AddrEvent::Change) && ifa.running {
            match A::loc_mut(meta).insert(addr, ifa.backup) {
                Ok(slot) => {
                    // advertise on every existing subflow, then see whether
                    // new pairs became connectable
                    A::schedule_add_addr(meta, slot);
                    factory::retry_subflows(meta);
                }
                Err(_) => {
                    tracing::debug!(
                        family = %A::FAMILY,
                        addr = ?addr,
                        "reached max number of local addresses"
                    );
                }
            }
        }
        return;
    };

    // Address already known: reactivate or deactivate the concerned paths.
    // The handle list is snapshotted so removal during the walk is safe.
    let addr_ip: IpAddr = addr.into();
    let subs: Vec<SubflowRef> = meta.subflows.clone();
    for sub in subs {
        let Ok(mut sub) = sub.lock() else { continue };
        if sub.family() != A::FAMILY || sub.local.ip() != addr_ip {
            continue;
        }

        match event {
            AddrEvent::Down => {
                cx.tcp.reinject_data(&mut sub);
                let tuple = FourTuple {
                    local: sub.local,
                    remote: sub.remote,
                };
                sub.force_close();
                cx.established.remove(&tuple);
            }
            AddrEvent::Change => {
                let new_low_prio = ifa.backup;
                if new_low_prio != sub.low_prio {
                    sub.send_mp_prio = true;
                }
                sub.low_prio = new_low_prio;
            }
            AddrEvent::Up => {}
        }
    }

    if event == AddrEvent::Down {
        let id = match A::loc(meta).get(slot) {
            Some(loc) => loc.id,
            None => return,
        };
        A::loc_mut(meta).remove(slot);

        // force the REMOVE_ADDR option out on the next ACK
        meta.remove_addrs |= 1 << id;
        if let Some(ack_sock) = meta.select_ack_sock() {
            if let Ok(mut ack_sock) = ack_sock.lock() {
                cx.tcp.send_ack(&mut ack_sock);
            }
        }

        let loc_bits = A::loc(meta).bits();
        A::rem_mut(meta).mask_bitfields(loc_bits);
        meta.reap_closed_subflows();
    }
}

/// Notifier chains the reactor subscribes to
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Chain {
    InetAddr,
    Inet6Addr,
    NetDev,
}

/// Registering with a notifier chain failed
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RegistrationError;

impl fmt::Display for RegistrationError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "notifier registration failed")
    }
}

impl std::error::Error for RegistrationError {}

/// The OS notifier registration seam
pub trait Notifier {
    fn register(&mut self, chain: Chain) -> Result<(), RegistrationError>;
    fn unregister(&mut self, chain: Chain);
}

/// Event-side process state: notifier registrations plus the DAD queue
#[derive(Debug)]
pub struct PathManager {
    pub dad: DadQueue,
    registered: Vec<Chain>,
}

impl PathManager {
    /// Subscribes one family's notifier chains. The address chain is
    /// registered before the device chain; a mid-init failure unwinds the
    /// earlier registration.
    pub fn init(notifier: &mut dyn Notifier, family: Family) -> Result<Self, RegistrationError> {
        let addr_chain = match family {
            Family::V4 => Chain::InetAddr,
            Family::V6 => Chain::Inet6Addr,
        };

        notifier.register(addr_chain)?;
        if let Err(err) = notifier.register(Chain::NetDev) {
            notifier.unregister(addr_chain);
            return Err(err);
        }

        Ok(Self {
            dad: DadQueue::default(),
            registered: vec![addr_chain, Chain::NetDev],
        })
    }

    /// Unsubscribes in reverse registration order
    pub fn shutdown(mut self, notifier: &mut dyn Notifier) {
        while let Some(chain) = self.registered.pop() {
            notifier.unregister(chain);
        }
    }
}
