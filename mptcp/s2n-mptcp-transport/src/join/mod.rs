// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! The JOIN handshake state machine.
//!
//! Three entry points share one request-creation routine: the fast path
//! (options already parsed by the dispatcher), the slow path (options parsed
//! from scratch) and SYN-ACK retransmission. The final ACK is handled by
//! [`hnd_req`], which validates the peer's MAC and promotes the request to a
//! child subflow.
//!
//! Everything here runs in packet-receive context with the meta lock held
//! and must not block; the only lock taken is the request table's.

pub mod child;
pub mod request;
pub mod table;

use crate::{
    config::{SYN_RCV_TIMEOUT, TCP_MSS_DEFAULT, TCP_PAWS_MSL, TCP_PAWS_WINDOW},
    endpoint::Context,
    meta::Meta,
    route::Flow,
    subflow::{SubflowRef, TcpState},
    tcp::SendError,
};
use request::RequestState;
use s2n_mptcp_core::{
    inet::Family,
    segment::{find_join, ParsedOptions, Segment},
    options::Join,
};
use std::{net::IpAddr, sync::Arc};

/// Result of the half-open handler for a JOIN-marked segment
#[derive(Debug)]
pub enum HalfOpen {
    /// Consume the segment silently
    Discard,
    /// Reset the sender, then discard
    Reset,
    /// No pending request matched; a SYN here is a brand new JOIN
    Meta,
    /// The final ACK completed; the child subflow is live
    Child(SubflowRef),
}

/// Fast processing for SYN+MP_JOIN: the dispatcher already parsed the
/// options of this segment.
pub fn on_join_syn_fast(meta: &mut Meta, seg: &Segment, opts: &ParsedOptions, cx: &mut Context) {
    // Reject as early as possible when the segment disagrees with the
    // connection's MD5 expectation, in either direction.
    if meta.md5sig != opts.saw_md5 {
        return;
    }

    // The connection may have left the token table without passing through
    // the close path; no new subflows either way.
    if meta.state == TcpState::Close || !meta.inside_tk_table {
        cx.tcp.send_reset(seg);
        return;
    }

    let Some(join) = opts.join else { return };

    if meta
        .rx_opt
        .add_remote(seg.src_ip(), 0, join.addr_id)
        .is_err()
    {
        cx.tcp.send_reset(seg);
        return;
    }
    meta.rx_opt.list_rcvd = false;

    join_request(meta, seg, opts, cx);
}

/// Slow path: parse the TCP options from scratch, then run the common
/// request-creation routine.
pub fn on_join_syn(meta: &mut Meta, seg: &Segment, cx: &mut Context) {
    let opts = ParsedOptions::parse(&seg.options, meta.user_mss, TCP_MSS_DEFAULT);
    join_request(meta, seg, &opts, cx);
}

/// Retransmits the SYN-ACK for a pending request.
///
/// When the subflow's family differs from the meta's, the standard
/// retransmit path cannot be used; the segment is re-routed through the
/// opposite-family transmit path and counted as a retransmission.
pub fn rtx_synack(
    meta: &Meta,
    req: &RequestState,
    cx: &mut Context,
) -> Result<(), SendError> {
    if meta.family() == req.family() {
        return cx.tcp.rtx_synack(meta, req);
    }

    cx.stats.retrans_segs.increment();
    let route = cx
        .routes
        .route(&request_flow(meta, req))
        .map_err(|_| SendError)?;
    cx.tcp.send_synack_routed(meta, req, &route)
}

/// Handles a JOIN-marked segment that may belong to a pending request:
/// retransmitted SYNs re-send the SYN-ACK, a valid final ACK promotes the
/// request to a child subflow.
pub fn hnd_req(meta: &mut Meta, seg: &Segment, cx: &mut Context) -> HalfOpen {
    let Some(req) = meta.find_request(seg.source, seg.dest) else {
        return HalfOpen::Meta;
    };

    if seg.syn && !seg.ack {
        // the peer retransmitted its SYN; answer it again
        if rtx_synack(meta, &req, cx).is_ok() {
            req.bump_retrans();
        }
        return HalfOpen::Discard;
    }

    if !seg.ack || seg.ack_seq != req.snt_isn.wrapping_add(1) {
        return HalfOpen::Discard;
    }

    let Some(Join::Ack(ack)) = find_join(&seg.options) else {
        // a third ACK without a verifiable MAC can never complete the
        // handshake
        meta.remove_request(&req);
        return HalfOpen::Reset;
    };

    if !req.verify_ack_mac(&ack.mac) {
        meta.remove_request(&req);
        return HalfOpen::Reset;
    }

    let child = match child::syn_recv(meta, seg, &req, cx) {
        Ok(child) => child,
        Err(child::SynRecvError::Overflow) => return HalfOpen::Reset,
        Err(child::SynRecvError::Route) => return HalfOpen::Discard,
    };

    // dropping the queue's reference unlinks the request from the table
    meta.remove_request(&req);
    meta.acceptq_len += 1;
    if meta.add_subflow(child.clone()).is_err() {
        meta.acceptq_len -= 1;
        if let Ok(mut child) = child.lock() {
            child.force_close();
        }
        return HalfOpen::Reset;
    }

    HalfOpen::Child(child)
}

/// The flow key of a request's own 4-tuple
fn request_flow(meta: &Meta, req: &RequestState) -> Flow {
    Flow {
        saddr: req.local.ip(),
        daddr: req.remote.ip(),
        sport: req.local.port(),
        dport: req.remote.port(),
        oif: meta.bound_dev_if,
    }
}

fn is_link_local(addr: IpAddr) -> bool {
    match addr {
        IpAddr::V6(addr) => addr.segments()[0] & 0xffc0 == 0xfe80,
        IpAddr::V4(_) => false,
    }
}

/// Common JOIN request creation.
///
/// Allocates the request, derives the handshake MAC, applies the PAWS and
/// anti-flood SYN checks, emits the SYN-ACK and finally links the request
/// into the meta's queue and the global table. Any early return frees the
/// request without a trace.
fn join_request(meta: &mut Meta, seg: &Segment, opts: &ParsedOptions, cx: &mut Context) {
    let Some(join) = opts.join else { return };

    let Ok(local_nonce) = cx.random.gen_u32() else {
        return;
    };

    let mut req = RequestState::new(
        meta,
        cx.requests.clone(),
        seg.dest,
        seg.source,
        local_nonce,
        join.nonce,
        join.addr_id,
        join.backup,
    );

    // the standard half-open initialization
    req.mss_clamp = opts.mss_clamp;
    req.tstamp_ok = opts.saw_tstamp;
    req.ts_recent = if opts.saw_tstamp { opts.rcv_tsval } else { 0 };
    req.wscale_ok = opts.wscale_ok;
    req.snd_wscale = opts.snd_wscale;
    req.sack_ok = opts.sack_ok;
    req.ecn_ok = seg.ece && seg.cwr;
    req.iif = meta.bound_dev_if.unwrap_or(0);
    if !seg.ip_options.is_empty() {
        req.ip_options = Some(seg.ip_options.clone());
    }

    // so that link locals have meaning
    if meta.bound_dev_if.is_none() && is_link_local(req.remote.ip()) {
        req.iif = seg.iif;
    }

    let mut isn = seg.when;
    if isn == 0 {
        if req.family() == Family::V6 && meta.family() == Family::V6 && meta.rxopt_interest {
            if let Ok(mut pktopts) = req.pktopts.lock() {
                *pktopts = Some(seg.clone());
            }
        }

        // We save the last timestamp seen from the destination in the peer
        // table when entering TIME-WAIT, and check against it before
        // accepting a new connection request. A nonzero isn means this
        // request hit a live timewait bucket, which already did the checks.
        let mut peer = None;
        let mut route = None;
        if opts.saw_tstamp && cx.config.tw_recycle {
            if let Ok(found) = cx.routes.route(&request_flow(meta, &req)) {
                if found.daddr == seg.src_ip() {
                    peer = cx.peers.get(seg.src_ip());
                    route = Some(found);
                }
            }
        }

        if let Some(peer) = peer.filter(|peer| peer.tcp_ts_stamp != 0) {
            if cx.now.as_secs().saturating_sub(peer.tcp_ts_stamp) < TCP_PAWS_MSL
                && (peer.tcp_ts.wrapping_sub(req.ts_recent) as i32) > TCP_PAWS_WINDOW as i32
            {
                cx.stats.paws_passive_rejected.increment();
                return;
            }
        } else if !cx.config.syncookies
            && cx
                .config
                .max_syn_backlog
                .saturating_sub(meta.request_queue_len())
                < (cx.config.max_syn_backlog >> 2)
            && peer.map_or(true, |peer| peer.tcp_ts_stamp == 0)
            && route.and_then(|route| route.rtt).is_none()
        {
            // Without syncookies the last quarter of the backlog is kept
            // for destinations proven to be alive.
            tracing::debug!(
                source = %seg.source,
                "dropping open request: backlog pressure without liveness proof"
            );
            return;
        }

        isn = cx.isn.sequence(seg.dest, seg.source, cx.now);
    }

    req.snt_isn = isn;
    req.snt_synack = cx.now;

    let req = Arc::new(req);

    let sent = if meta.family() == req.family() {
        cx.tcp.send_synack(meta, &req)
    } else {
        // the meta's cached route is for the other family
        match cx.routes.route(&request_flow(meta, &req)) {
            Ok(route) => cx.tcp.send_synack_routed(meta, &req, &route),
            Err(_) => {
                tracing::debug!(remote = %req.remote, "no route for cross-family synack");
                return;
            }
        }
    };

    if sent.is_err() {
        return;
    }

    meta.queue_request(req.clone(), SYN_RCV_TIMEOUT, cx.now);
    cx.requests.insert(&req);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::Config, route::PeerEntry, testing::*};
    use bytes::Bytes;
    use s2n_mptcp_core::segment::ParsedOptions;
    use std::net::SocketAddr;

    const META_LOCAL: &str = "203.0.113.1:443";
    const JOIN_SRC: &str = "10.0.0.2:49152";

    /// A JOIN SYN whose options also carry a TCP timestamp
    fn join_syn_with_tstamp(tsval: u32) -> Segment {
        let mut seg = join_syn_segment(
            JOIN_SRC.parse().unwrap(),
            META_LOCAL.parse().unwrap(),
            LOCAL_KEY.token(),
            0xdead_beef,
            2,
        );
        let mut options = vec![8u8, 10];
        options.extend_from_slice(&tsval.to_be_bytes());
        options.extend_from_slice(&0u32.to_be_bytes());
        options.extend_from_slice(&seg.options);
        seg.options = Bytes::from(options);
        seg
    }

    fn deliver(harness: &mut Harness, meta: &crate::meta::MetaRef, seg: &Segment) {
        let opts = ParsedOptions::parse(&seg.options, 0, crate::config::TCP_MSS_DEFAULT);
        let mut meta = meta.lock().unwrap();
        on_join_syn_fast(&mut meta, seg, &opts, &mut harness.cx());
    }

    #[test]
    fn paws_rejects_a_replayed_timestamp() {
        let mut harness = Harness::with_config(Config {
            tw_recycle: true,
            ..Config::default()
        });
        let src_ip = "10.0.0.2".parse().unwrap();
        harness.routes = StaticRoutes::reaching(src_ip);
        harness.peers.add(
            src_ip,
            PeerEntry {
                // the cached timestamp is far ahead of the SYN's
                tcp_ts: 10_000,
                tcp_ts_stamp: harness.now.as_secs(),
            },
        );

        let meta = meta4();
        deliver(&mut harness, &meta, &join_syn_with_tstamp(100));

        assert!(harness.tcp.synacks.is_empty());
        assert_eq!(harness.endpoint.stats.paws_passive_rejected.get(), 1);
        assert_eq!(meta.lock().unwrap().request_queue_len(), 0);
    }

    #[test]
    fn stale_peer_entry_does_not_trigger_paws() {
        let mut harness = Harness::with_config(Config {
            tw_recycle: true,
            ..Config::default()
        });
        let src_ip = "10.0.0.2".parse().unwrap();
        harness.routes = StaticRoutes::reaching(src_ip);
        harness.peers.add(
            src_ip,
            PeerEntry {
                tcp_ts: 10_000,
                // recorded longer ago than the PAWS window
                tcp_ts_stamp: harness.now.as_secs().saturating_sub(TCP_PAWS_MSL + 1),
            },
        );

        let meta = meta4();
        deliver(&mut harness, &meta, &join_syn_with_tstamp(100));

        assert_eq!(harness.tcp.synacks.len(), 1);
        assert_eq!(harness.endpoint.stats.paws_passive_rejected.get(), 0);
    }

    #[test]
    fn backlog_pressure_drops_unproven_peers() {
        let mut harness = Harness::with_config(Config {
            syncookies: false,
            max_syn_backlog: 8,
            ..Config::default()
        });
        let meta = meta4();

        // fill the queue to the last quarter
        for port in 0..7u16 {
            let seg = join_syn_segment(
                format!("10.0.0.2:{}", 40000 + port).parse().unwrap(),
                META_LOCAL.parse().unwrap(),
                LOCAL_KEY.token(),
                0xdead_beef,
                2,
            );
            deliver(&mut harness, &meta, &seg);
        }
        assert_eq!(meta.lock().unwrap().request_queue_len(), 7);

        // no peer entry, no route metric: the eighth SYN dies quietly
        let seg = join_syn_segment(
            "10.0.0.2:47999".parse().unwrap(),
            META_LOCAL.parse().unwrap(),
            LOCAL_KEY.token(),
            0xdead_beef,
            2,
        );
        deliver(&mut harness, &meta, &seg);

        assert_eq!(harness.tcp.synacks.len(), 7);
        assert_eq!(meta.lock().unwrap().request_queue_len(), 7);
    }

    #[test]
    fn syncookies_disable_the_backlog_drop() {
        let mut harness = Harness::with_config(Config {
            syncookies: true,
            max_syn_backlog: 8,
            ..Config::default()
        });
        let meta = meta4();

        for port in 0..8u16 {
            let seg = join_syn_segment(
                format!("10.0.0.2:{}", 40000 + port).parse().unwrap(),
                META_LOCAL.parse().unwrap(),
                LOCAL_KEY.token(),
                0xdead_beef,
                2,
            );
            deliver(&mut harness, &meta, &seg);
        }
        assert_eq!(meta.lock().unwrap().request_queue_len(), 8);
    }

    #[test]
    fn synack_send_failure_frees_the_request() {
        let mut harness = Harness::default();
        harness.tcp.fail_synack = true;
        let meta = meta4();

        let seg = join_syn_segment(
            JOIN_SRC.parse().unwrap(),
            META_LOCAL.parse().unwrap(),
            LOCAL_KEY.token(),
            0xdead_beef,
            2,
        );
        deliver(&mut harness, &meta, &seg);

        assert_eq!(meta.lock().unwrap().request_queue_len(), 0);
        assert_eq!(
            harness.endpoint.requests.pending(JOIN_SRC.parse().unwrap()),
            0
        );
    }

    #[test]
    fn cross_family_route_failure_drops_the_request() {
        let mut harness = Harness::default();
        let meta = meta4();

        // no v6 routes configured
        let seg = join_syn_segment(
            "[2001:db8::2]:55555".parse().unwrap(),
            "[2001:db8::1]:443".parse().unwrap(),
            LOCAL_KEY.token(),
            0xdead_beef,
            9,
        );
        deliver(&mut harness, &meta, &seg);

        assert!(harness.tcp.synacks.is_empty());
        assert_eq!(meta.lock().unwrap().request_queue_len(), 0);
    }

    #[test]
    fn mixed_family_rtx_counts_and_reroutes() {
        let mut harness = Harness::default();
        harness.routes = StaticRoutes::reaching("2001:db8::2".parse().unwrap());
        let meta = meta4();

        let seg = join_syn_segment(
            "[2001:db8::2]:55555".parse().unwrap(),
            "[2001:db8::1]:443".parse().unwrap(),
            LOCAL_KEY.token(),
            0xdead_beef,
            9,
        );
        deliver(&mut harness, &meta, &seg);
        assert_eq!(harness.tcp.synacks.len(), 1);

        let req = {
            let meta = meta.lock().unwrap();
            meta.find_request(
                "[2001:db8::2]:55555".parse().unwrap(),
                "[2001:db8::1]:443".parse().unwrap(),
            )
            .unwrap()
        };
        {
            let meta = meta.lock().unwrap();
            rtx_synack(&meta, &req, &mut harness.cx()).unwrap();
        }

        assert_eq!(harness.endpoint.stats.retrans_segs.get(), 1);
        assert_eq!(harness.tcp.synacks.len(), 2);
        assert!(harness.tcp.synacks[1].routed);
    }

    #[test]
    fn md5_expectation_mismatch_drops_silently() {
        let mut harness = Harness::default();
        let meta = meta4();
        meta.lock().unwrap().md5sig = true;

        let seg = join_syn_segment(
            JOIN_SRC.parse().unwrap(),
            META_LOCAL.parse().unwrap(),
            LOCAL_KEY.token(),
            0xdead_beef,
            2,
        );
        deliver(&mut harness, &meta, &seg);

        assert!(harness.tcp.synacks.is_empty());
        assert!(harness.tcp.resets.is_empty());
    }

    #[test]
    fn cookie_isn_bypasses_the_syn_checks() {
        let mut harness = Harness::with_config(Config {
            syncookies: false,
            max_syn_backlog: 4,
            ..Config::default()
        });
        let meta = meta4();
        {
            let mut guard = meta.lock().unwrap();
            for port in 0..4u16 {
                let seg = join_syn_segment(
                    format!("10.0.0.2:{}", 40000 + port).parse().unwrap(),
                    META_LOCAL.parse().unwrap(),
                    LOCAL_KEY.token(),
                    0xdead_beef,
                    2,
                );
                let opts =
                    ParsedOptions::parse(&seg.options, 0, crate::config::TCP_MSS_DEFAULT);
                on_join_syn_fast(&mut guard, &seg, &opts, &mut harness.cx());
            }
        }

        // a timewait-recycled isn skips PAWS and the backlog drop entirely
        let mut seg = join_syn_segment(
            "10.0.0.2:48000".parse().unwrap(),
            META_LOCAL.parse().unwrap(),
            LOCAL_KEY.token(),
            0xdead_beef,
            2,
        );
        seg.when = 0x1234_5678;
        deliver(&mut harness, &meta, &seg);

        let meta = meta.lock().unwrap();
        let req = meta
            .find_request(
                "10.0.0.2:48000".parse().unwrap(),
                META_LOCAL.parse().unwrap(),
            )
            .unwrap();
        assert_eq!(req.snt_isn, 0x1234_5678);
    }
}
