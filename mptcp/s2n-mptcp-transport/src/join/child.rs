// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Promotion of a validated JOIN request to a child subflow.

use crate::{
    endpoint::{Context, FourTuple},
    join::request::RequestState,
    meta::Meta,
    route::Flow,
    subflow::{GsoType, Ipv6Pinfo, Subflow, SubflowRef, TcpState},
};
use s2n_mptcp_core::segment::Segment;
use std::{
    net::{IpAddr, SocketAddr},
    sync::{Arc, Mutex},
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum SynRecvError {
    /// The meta's accept queue is full
    Overflow,
    /// Destination lookup for the child failed
    Route,
}

/// Builds the child subflow for a request whose final ACK validated.
///
/// The destination is resolved for the request's own family, independent of
/// the meta's IP state; this is what makes the mixed-family cases (v4 meta
/// with a v6 subflow and the converse) work, and it is shared by the
/// same-family cases.
pub(crate) fn syn_recv(
    meta: &mut Meta,
    seg: &Segment,
    req: &Arc<RequestState>,
    cx: &mut Context,
) -> Result<SubflowRef, SynRecvError> {
    if meta.acceptq_is_full() {
        cx.stats.listen_overflows.increment();
        return Err(SynRecvError::Overflow);
    }

    let route = cx
        .routes
        .route(&Flow {
            saddr: req.local.ip(),
            daddr: req.remote.ip(),
            sport: req.local.port(),
            dport: req.remote.port(),
            oif: meta.bound_dev_if,
        })
        .map_err(|_| {
            cx.stats.listen_drops.increment();
            SynRecvError::Route
        })?;

    // the local port is inherited from the meta's bound port
    let local = SocketAddr::new(req.local.ip(), meta.local_addr.port());

    let mut child = Subflow::new(local, req.remote, req.remote_id);
    child.state = TcpState::SynRecv;
    child.slave = true;
    child.low_prio = req.low_prio;
    child.advmss = route.advmss.unwrap_or(req.mss_clamp);
    child.tstamp_ok = req.tstamp_ok;
    child.ts_recent = req.ts_recent;
    child.sack_ok = req.sack_ok;
    child.ecn_ok = req.ecn_ok;
    child.snd_wscale = req.snd_wscale;
    child.total_retrans = req.retrans();
    child.iif = req.iif;
    child.wait = Some(meta.wait.clone());

    if let (IpAddr::V6(saddr), IpAddr::V6(daddr)) = (req.local.ip(), req.remote.ip()) {
        child.gso = GsoType::Tcpv6;
        let mut pinfo = Ipv6Pinfo::new(saddr, daddr);
        pinfo.mcast_oif = seg.iif;
        pinfo.mcast_hops = seg.hop_limit;
        if let Ok(mut pktopts) = req.pktopts.lock() {
            pinfo.pktoptions = pktopts.take();
        }
        child.pinet6 = Some(Box::new(pinfo));
    } else {
        child.gso = GsoType::Tcpv4;
    }

    let child = Arc::new(Mutex::new(child));
    cx.established.insert_subflow(
        FourTuple {
            local,
            remote: req.remote,
        },
        &child,
    );

    Ok(child)
}
