// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Mocks and builders shared by the crate's tests.

use crate::{
    config::Config,
    endpoint::{Context, Endpoint},
    join::request::RequestState,
    meta::{Meta, MetaRef},
    pm::{Chain, IfAddr, Interfaces, Notifier, RegistrationError, RT_SCOPE_UNIVERSE},
    route::{Flow, PeerEntry, Peers, Route, RouteError, Routes},
    subflow::{Subflow, TcpState},
    tcp::{ProcessError, SendError, Tcp},
};
use bytes::Bytes;
use hashbrown::{HashMap, HashSet};
use s2n_mptcp_core::{
    crypto::{Key, Token, MAC_LEN},
    options::{self, Join, JoinAck, JoinSyn},
    random,
    segment::{Segment, FLAG_JOIN},
    time::Timestamp,
};
use std::net::{IpAddr, SocketAddr};

/// A SYN-ACK captured by [`MockTcp`]
#[derive(Clone, Copy, Debug)]
pub struct SynAckRecord {
    pub local: SocketAddr,
    pub remote: SocketAddr,
    pub mac: u64,
    pub nonce: u32,
    pub backup: bool,
    /// Sent through the explicit-route (cross-family) path
    pub routed: bool,
}

/// Recording stand-in for the TCP machinery
#[derive(Debug, Default)]
pub struct MockTcp {
    pub synacks: Vec<SynAckRecord>,
    /// Source addresses of segments that were reset
    pub resets: Vec<SocketAddr>,
    /// Remote addresses of subflows that carried a bare ACK
    pub acks: Vec<SocketAddr>,
    /// Local addresses of subflows whose data was reinjected
    pub reinjected: Vec<SocketAddr>,
    /// Source addresses of segments delegated to a subflow
    pub delivered: Vec<SocketAddr>,
    pub rtx: usize,
    pub fail_synack: bool,
    pub fail_process: bool,
}

impl MockTcp {
    fn record_synack(&mut self, req: &RequestState, routed: bool) -> Result<(), SendError> {
        if self.fail_synack {
            return Err(SendError);
        }
        self.synacks.push(SynAckRecord {
            local: req.local,
            remote: req.remote,
            mac: req.synack_mac(),
            nonce: req.local_nonce,
            backup: req.low_prio,
            routed,
        });
        Ok(())
    }
}

impl Tcp for MockTcp {
    fn send_synack(&mut self, _meta: &Meta, req: &RequestState) -> Result<(), SendError> {
        self.record_synack(req, false)
    }

    fn send_synack_routed(
        &mut self,
        _meta: &Meta,
        req: &RequestState,
        _route: &Route,
    ) -> Result<(), SendError> {
        self.record_synack(req, true)
    }

    fn rtx_synack(&mut self, _meta: &Meta, req: &RequestState) -> Result<(), SendError> {
        if self.fail_synack {
            return Err(SendError);
        }
        self.rtx += 1;
        self.record_synack(req, false)
    }

    fn send_reset(&mut self, seg: &Segment) {
        self.resets.push(seg.source);
    }

    fn send_ack(&mut self, sub: &mut Subflow) {
        self.acks.push(sub.remote);
    }

    fn rcv_state_process(&mut self, sub: &mut Subflow, _seg: &Segment) -> Result<(), ProcessError> {
        if self.fail_process {
            return Err(ProcessError);
        }
        sub.state = TcpState::Established;
        Ok(())
    }

    fn sub_do_rcv(&mut self, _sub: &mut Subflow, seg: Segment) {
        self.delivered.push(seg.source);
    }

    fn reinject_data(&mut self, sub: &mut Subflow) {
        self.reinjected.push(sub.local);
    }
}

/// Route table keyed by destination address
#[derive(Debug, Default)]
pub struct StaticRoutes {
    routes: HashMap<IpAddr, Route>,
}

impl StaticRoutes {
    /// A default route toward `daddr`
    pub fn reaching(daddr: IpAddr) -> Self {
        let mut routes = Self::default();
        routes.add(Route {
            daddr,
            oif: None,
            rtt: None,
            advmss: None,
        });
        routes
    }

    pub fn add(&mut self, route: Route) {
        self.routes.insert(route.daddr, route);
    }

    pub fn clear(&mut self) {
        self.routes.clear();
    }
}

impl Routes for StaticRoutes {
    fn route(&self, flow: &Flow) -> Result<Route, RouteError> {
        self.routes.get(&flow.daddr).copied().ok_or(RouteError)
    }
}

/// Peer timestamp cache backed by a map
#[derive(Debug, Default)]
pub struct StaticPeers {
    peers: HashMap<IpAddr, PeerEntry>,
}

impl StaticPeers {
    pub fn add(&mut self, addr: IpAddr, entry: PeerEntry) {
        self.peers.insert(addr, entry);
    }
}

impl Peers for StaticPeers {
    fn get(&self, addr: IpAddr) -> Option<PeerEntry> {
        self.peers.get(&addr).copied()
    }
}

/// Interface view backed by maps
#[derive(Debug, Default)]
pub struct StaticInterfaces {
    pub addrs: HashMap<u32, Vec<IfAddr>>,
    pub tentative: HashSet<(u32, IpAddr)>,
}

impl Interfaces for StaticInterfaces {
    fn addresses(&self, ifindex: u32) -> Vec<IfAddr> {
        self.addrs.get(&ifindex).cloned().unwrap_or_default()
    }

    fn is_tentative(&self, ifindex: u32, addr: IpAddr) -> bool {
        self.tentative.contains(&(ifindex, addr))
    }
}

/// Notifier that can be told to fail the nth registration
#[derive(Debug, Default)]
pub struct MockNotifier {
    pub registered: Vec<Chain>,
    pub unregistered: Vec<Chain>,
    pub fail_at: Option<usize>,
    pub attempts: usize,
}

impl Notifier for MockNotifier {
    fn register(&mut self, chain: Chain) -> Result<(), RegistrationError> {
        let attempt = self.attempts;
        self.attempts += 1;
        if self.fail_at == Some(attempt) {
            return Err(RegistrationError);
        }
        self.registered.push(chain);
        Ok(())
    }

    fn unregister(&mut self, chain: Chain) {
        self.unregistered.push(chain);
    }
}

pub const LOCAL_KEY: Key = Key::new([0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08]);
pub const REMOTE_KEY: Key = Key::new([0x11, 0x12, 0x13, 0x14, 0x15, 0x16, 0x17, 0x18]);

/// An established, token-registered v4 meta at 203.0.113.1:443
pub fn meta4() -> MetaRef {
    meta(
        "203.0.113.1:443".parse().unwrap(),
        "203.0.113.9:50000".parse().unwrap(),
    )
}

pub fn meta(local: SocketAddr, remote: SocketAddr) -> MetaRef {
    let meta = Meta::new_ref(LOCAL_KEY, REMOTE_KEY, local, remote);
    meta.lock().unwrap().inside_tk_table = true;
    meta
}

fn base_segment(source: SocketAddr, dest: SocketAddr) -> Segment {
    Segment {
        source,
        dest,
        seq: 0,
        ack_seq: 0,
        syn: false,
        ack: false,
        rst: false,
        fin: false,
        ece: false,
        cwr: false,
        mptcp_flags: 0,
        options: Bytes::new(),
        ip_options: Bytes::new(),
        payload: Bytes::new(),
        when: 0,
        rxhash: 0,
        iif: 0,
        hop_limit: 64,
    }
}

/// A plain data segment without the JOIN marker
pub fn data_segment(source: SocketAddr, dest: SocketAddr) -> Segment {
    base_segment(source, dest)
}

/// A JOIN-marked SYN carrying MP_JOIN
pub fn join_syn_segment(
    source: SocketAddr,
    dest: SocketAddr,
    token: Token,
    nonce: u32,
    addr_id: u8,
) -> Segment {
    let join = Join::Syn(JoinSyn {
        backup: false,
        addr_id,
        token,
        nonce,
    });
    let mut seg = base_segment(source, dest);
    seg.syn = true;
    seg.mptcp_flags = FLAG_JOIN;
    seg.options = Bytes::from(options::option_to_vec(options::MPTCP_KIND, &join));
    seg
}

/// A JOIN-marked final ACK carrying the peer's full MAC
pub fn join_ack_segment(
    source: SocketAddr,
    dest: SocketAddr,
    ack_seq: u32,
    mac: [u8; MAC_LEN],
) -> Segment {
    let mut seg = base_segment(source, dest);
    seg.ack = true;
    seg.ack_seq = ack_seq;
    seg.mptcp_flags = FLAG_JOIN;
    seg.options = Bytes::from(options::option_to_vec(
        options::MPTCP_KIND,
        &Join::Ack(JoinAck { mac }),
    ));
    seg
}

/// An interface address with permissive defaults
pub fn ifaddr(addr: IpAddr) -> IfAddr {
    IfAddr {
        addr,
        ifindex: 2,
        scope: RT_SCOPE_UNIVERSE,
        no_multipath: false,
        backup: false,
        running: true,
        tentative: false,
        rtr_solicit_delay: None,
    }
}

/// Endpoint plus collaborators, wired for one test
pub struct Harness {
    pub endpoint: Endpoint,
    pub tcp: MockTcp,
    pub routes: StaticRoutes,
    pub peers: StaticPeers,
    pub now: Timestamp,
}

impl Default for Harness {
    fn default() -> Self {
        Self::with_config(Config::default())
    }
}

impl Harness {
    pub fn with_config(config: Config) -> Self {
        let endpoint = Endpoint::new(
            config,
            Box::new(random::testing::Sequential::default()),
        )
        .expect("deterministic generator cannot fail");
        Self {
            endpoint,
            tcp: MockTcp::default(),
            routes: StaticRoutes::default(),
            peers: StaticPeers::default(),
            now: Timestamp::from_duration(core::time::Duration::from_secs(1000)),
        }
    }

    pub fn cx(&mut self) -> Context<'_> {
        self.endpoint
            .context(&mut self.tcp, &self.routes, &self.peers, self.now)
    }
}
