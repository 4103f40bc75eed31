// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Inbound segment routing for a meta-connection.
//!
//! A segment either belongs to an existing subflow (delegated to the TCP
//! receive path), completes a pending JOIN, or opens a new one.

use crate::{
    endpoint::{Context, EstabEntry, FourTuple},
    join::{self, HalfOpen},
    meta::Meta,
    subflow::TcpState,
};
use s2n_mptcp_core::{
    options::Join,
    segment::{self, Segment, FLAG_JOIN},
};

/// Processes one segment addressed to `meta`. The caller holds the meta
/// lock; this never blocks.
pub fn do_rcv(meta: &mut Meta, mut seg: Segment, cx: &mut Context) {
    if !seg.is_join() {
        // belongs to an existing subflow; find it by full 4-tuple
        let tuple = FourTuple {
            local: seg.dest,
            remote: seg.source,
        };
        match cx.established.lookup(&tuple) {
            None => {
                tracing::warn!(source = %seg.source, "no subflow for non-join segment");
            }
            Some(EstabEntry::Meta(_)) => {
                tracing::warn!(source = %seg.source, "non-join segment resolved to the meta");
            }
            Some(EstabEntry::TimeWait) => {
                // nothing to deliver to; the segment dies here
            }
            Some(EstabEntry::Subflow(weak)) => {
                let Some(sub) = weak.upgrade() else {
                    tracing::warn!(source = %seg.source, "subflow entry already gone");
                    return;
                };
                let Ok(mut sub) = sub.lock() else { return };
                if sub.state == TcpState::TimeWait {
                    return;
                }
                cx.tcp.sub_do_rcv(&mut sub, seg);
            }
        }
        return;
    }
    seg.mptcp_flags &= !FLAG_JOIN;

    // Removed from the token table means no new subflows; the close check
    // matters because teardown may have bypassed the close path.
    if meta.state == TcpState::Close || !meta.inside_tk_table {
        cx.tcp.send_reset(&seg);
        return;
    }

    match join::hnd_req(meta, &seg, cx) {
        HalfOpen::Discard => {}
        HalfOpen::Reset => cx.tcp.send_reset(&seg),
        HalfOpen::Child(child) => {
            // the final ACK promoted the request; drive the child forward
            let Ok(mut child) = child.lock() else { return };
            child.rxhash = seg.rxhash;
            if cx.tcp.rcv_state_process(&mut child, &seg).is_err() {
                cx.tcp.send_reset(&seg);
            }
        }
        HalfOpen::Meta => {
            if seg.syn {
                // A brand new JOIN SYN. The option is re-extracted from the
                // raw bytes; a malformed option at this point is treated
                // exactly like a failed parse.
                let Some(Join::Syn(join)) = segment::find_join(&seg.options) else {
                    cx.tcp.send_reset(&seg);
                    return;
                };
                if meta
                    .rx_opt
                    .add_remote(seg.src_ip(), 0, join.addr_id)
                    .is_err()
                {
                    cx.tcp.send_reset(&seg);
                    return;
                }
                meta.rx_opt.list_rcvd = false;

                join::on_join_syn(meta, &seg, cx);
            } else {
                cx.tcp.send_reset(&seg);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        subflow::{GsoType, PmtuDisc, Subflow},
        testing::*,
    };
    use s2n_mptcp_core::crypto;
    use std::{
        net::SocketAddr,
        sync::{Arc, Mutex},
    };

    const META_LOCAL: &str = "203.0.113.1:443";
    const JOIN_SRC: &str = "10.0.0.2:49152";

    fn run_join_syn(harness: &mut Harness, meta: &crate::meta::MetaRef, src: &str, addr_id: u8) {
        let seg = join_syn_segment(
            src.parse().unwrap(),
            META_LOCAL.parse().unwrap(),
            LOCAL_KEY.token(),
            0xdead_beef,
            addr_id,
        );
        let mut meta = meta.lock().unwrap();
        do_rcv(&mut meta, seg, &mut harness.cx());
    }

    #[test]
    fn basic_v4_join_accept() {
        let mut harness = Harness::default();
        let meta = meta4();

        run_join_syn(&mut harness, &meta, JOIN_SRC, 2);

        // a SYN-ACK went out with the responder MAC over our nonce and the
        // peer's
        assert_eq!(harness.tcp.synacks.len(), 1);
        let synack = harness.tcp.synacks[0];
        assert_eq!(synack.remote, JOIN_SRC.parse::<SocketAddr>().unwrap());
        assert!(!synack.routed);
        let expected =
            crypto::join_mac(&LOCAL_KEY, &REMOTE_KEY, synack.nonce, 0xdead_beef).truncated();
        assert_eq!(synack.mac, expected);

        let meta = meta.lock().unwrap();
        // the source landed in the remote registry with the peer's id
        let rem = meta.rx_opt.rem4.get(0).unwrap();
        assert_eq!(rem.id, 2);
        assert_eq!(rem.addr, "10.0.0.2".parse::<std::net::Ipv4Addr>().unwrap());
        assert_eq!(rem.port, 0);

        // and the request is queued and indexed
        assert_eq!(meta.request_queue_len(), 1);
        assert_eq!(
            harness.endpoint.requests.pending(JOIN_SRC.parse().unwrap()),
            1
        );
    }

    #[test]
    fn duplicate_join_is_coalesced() {
        let mut harness = Harness::default();
        let meta = meta4();

        run_join_syn(&mut harness, &meta, JOIN_SRC, 2);
        // a second JOIN from the same address and id, new source port
        run_join_syn(&mut harness, &meta, "10.0.0.2:49153", 2);

        let meta = meta.lock().unwrap();
        assert_eq!(meta.rx_opt.rem4.bits(), 0b1);
        assert_eq!(meta.request_queue_len(), 2);
        assert_eq!(harness.tcp.synacks.len(), 2);
    }

    #[test]
    fn nat_rewrite_updates_in_place() {
        let mut harness = Harness::default();
        let meta = meta4();

        run_join_syn(&mut harness, &meta, JOIN_SRC, 2);
        run_join_syn(&mut harness, &meta, "10.0.0.99:49152", 2);

        let meta = meta.lock().unwrap();
        assert_eq!(meta.rx_opt.rem4.bits(), 0b1);
        let rem = meta.rx_opt.rem4.get(0).unwrap();
        assert_eq!(rem.addr, "10.0.0.99".parse::<std::net::Ipv4Addr>().unwrap());
        assert_eq!(rem.id, 2);
    }

    #[test]
    fn registry_full_resets_the_join() {
        let mut harness = Harness::default();
        let meta = meta4();

        {
            let mut meta = meta.lock().unwrap();
            for i in 0..16u8 {
                meta.rx_opt
                    .add_remote(format!("10.0.1.{i}").parse().unwrap(), 0, i)
                    .unwrap();
            }
        }

        run_join_syn(&mut harness, &meta, "10.0.2.1:49152", 17);

        assert!(harness.tcp.synacks.is_empty());
        assert_eq!(harness.tcp.resets.len(), 1);
        assert_eq!(
            harness.tcp.resets[0],
            "10.0.2.1:49152".parse::<SocketAddr>().unwrap()
        );
        assert_eq!(meta.lock().unwrap().rx_opt.rem4.bits(), u16::MAX);
    }

    #[test]
    fn final_ack_promotes_to_child() {
        let mut harness = Harness::default();
        harness.routes = StaticRoutes::reaching("10.0.0.2".parse().unwrap());
        let meta = meta4();

        run_join_syn(&mut harness, &meta, JOIN_SRC, 2);

        let (snt_isn, peer_mac) = {
            let meta = meta.lock().unwrap();
            let req = meta
                .find_request(JOIN_SRC.parse().unwrap(), META_LOCAL.parse().unwrap())
                .unwrap();
            let mac = crypto::join_mac(
                &REMOTE_KEY,
                &LOCAL_KEY,
                req.remote_nonce,
                req.local_nonce,
            );
            (req.snt_isn, *mac.as_bytes())
        };

        let ack = join_ack_segment(
            JOIN_SRC.parse().unwrap(),
            META_LOCAL.parse().unwrap(),
            snt_isn.wrapping_add(1),
            peer_mac,
        );
        {
            let mut meta = meta.lock().unwrap();
            do_rcv(&mut meta, ack, &mut harness.cx());
        }

        let meta = meta.lock().unwrap();
        assert!(harness.tcp.resets.is_empty());
        assert_eq!(meta.subflows.len(), 1);
        assert_eq!(meta.request_queue_len(), 0);
        assert_eq!(meta.acceptq_len, 1);
        assert_eq!(
            harness.endpoint.requests.pending(JOIN_SRC.parse().unwrap()),
            0
        );

        let child = meta.subflows[0].lock().unwrap();
        assert_eq!(child.state, TcpState::Established);
        assert!(child.slave);
        assert_eq!(child.rem_id, 2);

        // the child is reachable in the established table
        let tuple = FourTuple {
            local: META_LOCAL.parse().unwrap(),
            remote: JOIN_SRC.parse().unwrap(),
        };
        assert!(matches!(
            harness.endpoint.established.lookup(&tuple),
            Some(EstabEntry::Subflow(_))
        ));
    }

    #[test]
    fn bad_final_ack_mac_resets_and_destroys() {
        let mut harness = Harness::default();
        harness.routes = StaticRoutes::reaching("10.0.0.2".parse().unwrap());
        let meta = meta4();

        run_join_syn(&mut harness, &meta, JOIN_SRC, 2);
        let snt_isn = {
            let meta = meta.lock().unwrap();
            meta.find_request(JOIN_SRC.parse().unwrap(), META_LOCAL.parse().unwrap())
                .unwrap()
                .snt_isn
        };

        let ack = join_ack_segment(
            JOIN_SRC.parse().unwrap(),
            META_LOCAL.parse().unwrap(),
            snt_isn.wrapping_add(1),
            [0u8; 20],
        );
        {
            let mut meta = meta.lock().unwrap();
            do_rcv(&mut meta, ack, &mut harness.cx());
        }

        let meta = meta.lock().unwrap();
        assert_eq!(harness.tcp.resets.len(), 1);
        assert!(meta.subflows.is_empty());
        assert_eq!(meta.request_queue_len(), 0);
        assert_eq!(
            harness.endpoint.requests.pending(JOIN_SRC.parse().unwrap()),
            0
        );
    }

    #[test]
    fn retransmitted_syn_resends_synack() {
        let mut harness = Harness::default();
        let meta = meta4();

        run_join_syn(&mut harness, &meta, JOIN_SRC, 2);
        run_join_syn(&mut harness, &meta, JOIN_SRC, 2);

        assert_eq!(harness.tcp.synacks.len(), 2);
        assert_eq!(harness.tcp.rtx, 1);
        // the retransmission reuses the pending request
        assert_eq!(meta.lock().unwrap().request_queue_len(), 1);
    }

    #[test]
    fn mixed_family_join_v4_meta_v6_subflow() {
        let mut harness = Harness::default();
        harness.routes = StaticRoutes::reaching("2001:db8::2".parse().unwrap());
        let meta = meta4();

        let src: SocketAddr = "[2001:db8::2]:55555".parse().unwrap();
        let dst: SocketAddr = "[2001:db8::1]:443".parse().unwrap();
        let seg = join_syn_segment(src, dst, LOCAL_KEY.token(), 0xdead_beef, 9);
        {
            let mut meta = meta.lock().unwrap();
            do_rcv(&mut meta, seg, &mut harness.cx());
        }

        // the SYN-ACK was routed via a v6 lookup, not the meta's v4 state
        assert_eq!(harness.tcp.synacks.len(), 1);
        assert!(harness.tcp.synacks[0].routed);

        let (snt_isn, peer_mac) = {
            let meta = meta.lock().unwrap();
            let req = meta.find_request(src, dst).unwrap();
            let mac = crypto::join_mac(
                &REMOTE_KEY,
                &LOCAL_KEY,
                req.remote_nonce,
                req.local_nonce,
            );
            (req.snt_isn, *mac.as_bytes())
        };

        let ack = join_ack_segment(src, dst, snt_isn.wrapping_add(1), peer_mac);
        {
            let mut meta = meta.lock().unwrap();
            do_rcv(&mut meta, ack, &mut harness.cx());
        }

        let meta = meta.lock().unwrap();
        assert_eq!(meta.subflows.len(), 1);
        let child = meta.subflows[0].lock().unwrap();
        assert_eq!(child.gso, GsoType::Tcpv6);
        // port inherited from the v4 meta
        assert_eq!(child.local, dst);
        assert_eq!(child.remote, src);

        let pinfo = child.pinet6.as_ref().unwrap();
        assert_eq!(pinfo.daddr, "2001:db8::2".parse::<std::net::Ipv6Addr>().unwrap());
        assert_eq!(pinfo.saddr, "2001:db8::1".parse::<std::net::Ipv6Addr>().unwrap());
        assert_eq!(pinfo.rcv_saddr, pinfo.saddr);
        assert_eq!(pinfo.hop_limit, -1);
        assert!(pinfo.mc_loop);
        assert_eq!(pinfo.pmtudisc, PmtuDisc::Want);

        // hashed into the established table under the v6 tuple
        let tuple = FourTuple {
            local: dst,
            remote: src,
        };
        assert!(matches!(
            harness.endpoint.established.lookup(&tuple),
            Some(EstabEntry::Subflow(_))
        ));
    }

    #[test]
    fn accept_queue_overflow_is_counted_and_reset() {
        let mut harness = Harness::default();
        harness.routes = StaticRoutes::reaching("10.0.0.2".parse().unwrap());
        let meta = meta4();
        meta.lock().unwrap().acceptq_max = 0;

        run_join_syn(&mut harness, &meta, JOIN_SRC, 2);
        let (snt_isn, peer_mac) = {
            let meta = meta.lock().unwrap();
            let req = meta
                .find_request(JOIN_SRC.parse().unwrap(), META_LOCAL.parse().unwrap())
                .unwrap();
            let mac = crypto::join_mac(
                &REMOTE_KEY,
                &LOCAL_KEY,
                req.remote_nonce,
                req.local_nonce,
            );
            (req.snt_isn, *mac.as_bytes())
        };

        let ack = join_ack_segment(
            JOIN_SRC.parse().unwrap(),
            META_LOCAL.parse().unwrap(),
            snt_isn.wrapping_add(1),
            peer_mac,
        );
        {
            let mut meta = meta.lock().unwrap();
            do_rcv(&mut meta, ack, &mut harness.cx());
        }

        assert_eq!(harness.endpoint.stats.listen_overflows.get(), 1);
        assert_eq!(harness.tcp.resets.len(), 1);
        assert!(meta.lock().unwrap().subflows.is_empty());
    }

    #[test]
    fn closed_meta_resets_joins() {
        let mut harness = Harness::default();
        let meta = meta4();
        meta.lock().unwrap().state = TcpState::Close;

        run_join_syn(&mut harness, &meta, JOIN_SRC, 2);
        assert_eq!(harness.tcp.resets.len(), 1);
        assert!(harness.tcp.synacks.is_empty());
    }

    #[test]
    fn off_table_meta_resets_joins() {
        let mut harness = Harness::default();
        let meta = meta4();
        meta.lock().unwrap().inside_tk_table = false;

        run_join_syn(&mut harness, &meta, JOIN_SRC, 2);
        assert_eq!(harness.tcp.resets.len(), 1);
    }

    #[test]
    fn join_marker_without_option_resets() {
        let mut harness = Harness::default();
        let meta = meta4();

        let mut seg = data_segment(JOIN_SRC.parse().unwrap(), META_LOCAL.parse().unwrap());
        seg.syn = true;
        seg.mptcp_flags = FLAG_JOIN;
        {
            let mut meta = meta.lock().unwrap();
            do_rcv(&mut meta, seg, &mut harness.cx());
        }
        assert_eq!(harness.tcp.resets.len(), 1);
    }

    #[test]
    fn non_join_segment_is_delegated_to_its_subflow() {
        let mut harness = Harness::default();
        let meta = meta4();

        let local: SocketAddr = META_LOCAL.parse().unwrap();
        let remote: SocketAddr = "10.0.0.7:50007".parse().unwrap();
        let sub = Arc::new(Mutex::new({
            let mut sub = Subflow::new(local, remote, 1);
            sub.state = TcpState::Established;
            sub
        }));
        harness.endpoint.established.insert_subflow(
            FourTuple { local, remote },
            &sub,
        );

        {
            let mut meta = meta.lock().unwrap();
            do_rcv(&mut meta, data_segment(remote, local), &mut harness.cx());
        }
        assert_eq!(harness.tcp.delivered, vec![remote]);
    }

    #[test]
    fn non_join_segment_without_a_subflow_is_dropped() {
        let mut harness = Harness::default();
        let meta = meta4();

        {
            let mut meta = meta.lock().unwrap();
            let seg = data_segment(
                "10.0.0.7:50007".parse().unwrap(),
                META_LOCAL.parse().unwrap(),
            );
            do_rcv(&mut meta, seg, &mut harness.cx());
        }
        assert!(harness.tcp.delivered.is_empty());
        assert!(harness.tcp.resets.is_empty());
    }

    #[test]
    fn non_join_segment_resolving_to_the_meta_is_dropped() {
        let mut harness = Harness::default();
        let meta = meta4();
        harness.endpoint.register(&meta);

        let seg = data_segment(
            "203.0.113.9:50000".parse().unwrap(),
            META_LOCAL.parse().unwrap(),
        );
        {
            let mut guard = meta.lock().unwrap();
            do_rcv(&mut guard, seg, &mut harness.cx());
        }
        assert!(harness.tcp.delivered.is_empty());
        assert!(harness.tcp.resets.is_empty());
    }

    #[test]
    fn time_wait_entry_swallows_the_segment() {
        let mut harness = Harness::default();
        let meta = meta4();

        let local: SocketAddr = META_LOCAL.parse().unwrap();
        let remote: SocketAddr = "10.0.0.7:50007".parse().unwrap();
        harness
            .endpoint
            .established
            .insert_time_wait(FourTuple { local, remote });

        {
            let mut meta = meta.lock().unwrap();
            do_rcv(&mut meta, data_segment(remote, local), &mut harness.cx());
        }
        assert!(harness.tcp.delivered.is_empty());
    }

    #[test]
    fn request_expiry_unlinks_everywhere() {
        let mut harness = Harness::default();
        let meta = meta4();

        run_join_syn(&mut harness, &meta, JOIN_SRC, 2);
        let mut guard = meta.lock().unwrap();
        assert_eq!(guard.request_queue_len(), 1);

        guard.on_timeout(harness.now + crate::config::SYN_RCV_TIMEOUT);
        assert_eq!(guard.request_queue_len(), 0);
        assert_eq!(
            harness.endpoint.requests.pending(JOIN_SRC.parse().unwrap()),
            0
        );
    }

    #[test]
    fn meta_teardown_destroys_pending_requests() {
        let mut harness = Harness::default();
        let meta = meta4();

        run_join_syn(&mut harness, &meta, JOIN_SRC, 2);
        meta.lock().unwrap().destroy();

        assert_eq!(
            harness.endpoint.requests.pending(JOIN_SRC.parse().unwrap()),
            0
        );
    }
}
