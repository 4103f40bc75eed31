// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! User-context construction of fresh subflow sockets.
//!
//! Runs with the meta lock held and may sleep; this is the only module that
//! touches real sockets. The pair bitfield is marked before any fallible
//! step so a failed attempt is never retried in a loop.

use crate::{
    addr::{pair_bit, LocalAddr, MAX_ADDR},
    meta::{IpExt, Meta},
    subflow::{Subflow, SubflowRef},
};
use s2n_mptcp_core::inet::Family;
use smallvec::SmallVec;
use socket2::{Domain, Protocol, Socket, Type};
use std::{
    io,
    net::{Ipv4Addr, Ipv6Addr, SocketAddr},
    sync::{Arc, Mutex},
};

#[cfg(unix)]
fn connect_in_progress(err: &io::Error) -> bool {
    err.raw_os_error() == Some(libc::EINPROGRESS)
}

#[cfg(not(unix))]
fn connect_in_progress(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::WouldBlock
}

/// Creates a new IPv4 subflow from a local slot toward a remote slot
pub fn init4_subflow(
    meta: &mut Meta,
    loc: LocalAddr<Ipv4Addr>,
    rem_slot: u8,
) -> io::Result<()> {
    init_subflow::<Ipv4Addr>(meta, loc, rem_slot)
}

/// Creates a new IPv6 subflow from a local slot toward a remote slot
pub fn init6_subflow(
    meta: &mut Meta,
    loc: LocalAddr<Ipv6Addr>,
    rem_slot: u8,
) -> io::Result<()> {
    init_subflow::<Ipv6Addr>(meta, loc, rem_slot)
}

/// Creates, binds and non-blocking-connects a new subflow from a local
/// address slot toward a remote slot, and attaches it to the meta.
///
/// A return of `Ok` only means the connect is in flight; completion is
/// asynchronous. Any error leaves the pair marked as attempted.
pub(crate) fn init_subflow<A: IpExt>(
    meta: &mut Meta,
    loc: LocalAddr<A>,
    rem_slot: u8,
) -> io::Result<()> {
    let Some(rem) = A::rem_mut(meta).get_mut(rem_slot) else {
        return Ok(());
    };

    // Don't try again, even if this attempt fails. The initial subflow's
    // v6 local keeps id 0; every other v6 id reduces by MAX_ADDR.
    rem.bitfield |= pair_bit(loc.id);
    let (rem_addr, rem_port, rem_id) = (rem.addr, rem.port, rem.id);

    let domain = match A::FAMILY {
        Family::V4 => Domain::IPV4,
        Family::V6 => Domain::IPV6,
    };
    let sock = Socket::new(domain, Type::STREAM, Some(Protocol::TCP)).map_err(|err| {
        tracing::debug!(%err, "subflow socket creation failed");
        err
    })?;
    sock.set_nonblocking(true)?;

    // local source port is ephemeral; the remote port falls back to the
    // meta's destination port
    let loc_sa = SocketAddr::new(loc.addr.into(), 0);
    let rem_port = if rem_port != 0 { rem_port } else { meta.dport() };
    let rem_sa = SocketAddr::new(rem_addr.into(), rem_port);

    // the delayed-ack timer starts disarmed; Subflow::new initializes it
    let sub: SubflowRef = Arc::new(Mutex::new({
        let mut sub = Subflow::new(loc_sa, rem_sa, rem_id);
        sub.slave = true;
        sub.low_prio = loc.low_prio;
        sub
    }));

    if meta.add_subflow(sub.clone()).is_err() {
        return abort(
            meta,
            &sub,
            io::Error::new(io::ErrorKind::Other, "subflow limit reached"),
        );
    }

    tracing::debug!(
        token = %meta.local_token,
        src = %loc_sa,
        dst = %rem_sa,
        "creating subflow"
    );

    if let Err(err) = sock.bind(&loc_sa.into()) {
        tracing::debug!(%err, src = %loc_sa, "subflow bind failed");
        return abort(meta, &sub, err);
    }

    match sock.connect(&rem_sa.into()) {
        Ok(()) => {}
        Err(err) if connect_in_progress(&err) => {}
        Err(err) => {
            tracing::debug!(%err, dst = %rem_sa, "subflow connect failed");
            return abort(meta, &sub, err);
        }
    }

    // poll/epoll on the meta observes this subflow from now on
    if let Ok(mut sub) = sub.lock() {
        sub.sock = Some(sock);
        sub.wait = Some(meta.wait.clone());
    }

    Ok(())
}

/// Error path: orphan the subflow and run the socket down, preserving the
/// original error
fn abort(meta: &mut Meta, sub: &SubflowRef, err: io::Error) -> io::Result<()> {
    meta.remove_subflow(sub);
    if let Ok(mut sub) = sub.lock() {
        sub.force_close();
    }
    Err(err)
}

/// A failure that may succeed later, once addresses settle
fn is_transient(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::AddrNotAvailable | io::ErrorKind::AddrInUse | io::ErrorKind::WouldBlock
    )
}

/// Walks every unattempted (local, remote) pair of both families and kicks
/// off a subflow for each. Transient failures are parked in the remote's
/// retry bitfield.
pub fn create_subflows(meta: &mut Meta) {
    create_family::<Ipv4Addr>(meta);
    create_family::<Ipv6Addr>(meta);
}

fn create_family<A: IpExt>(meta: &mut Meta) {
    let locals: SmallVec<[LocalAddr<A>; MAX_ADDR]> =
        A::loc(meta).iter().map(|(_, loc)| *loc).collect();

    for loc in locals {
        let bit = pair_bit(loc.id);
        let todo: SmallVec<[u8; MAX_ADDR]> = A::rem(meta)
            .iter()
            .filter(|(_, rem)| rem.bitfield & bit == 0)
            .map(|(slot, _)| slot)
            .collect();

        for slot in todo {
            if let Err(err) = init_subflow::<A>(meta, loc, slot) {
                if is_transient(&err) {
                    if let Some(rem) = A::rem_mut(meta).get_mut(slot) {
                        rem.retry_bitfield |= bit;
                    }
                }
            }
        }
    }
}

/// Releases pairs parked for retry back into eligibility and re-evaluates.
/// Called when a new local address comes up.
pub fn retry_subflows(meta: &mut Meta) {
    release_retries::<Ipv4Addr>(meta);
    release_retries::<Ipv6Addr>(meta);
    create_subflows(meta);
}

fn release_retries<A: IpExt>(meta: &mut Meta) {
    let rem = A::rem_mut(meta);
    let slots: SmallVec<[u8; MAX_ADDR]> = rem.iter().map(|(slot, _)| slot).collect();
    for slot in slots {
        if let Some(rem) = rem.get_mut(slot) {
            rem.bitfield &= !rem.retry_bitfield;
            rem.retry_bitfield = 0;
        }
    }
}
