// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Per-subflow state attached to a meta-connection.

use s2n_mptcp_core::{inet::Family, segment::Segment, time::Timer};
use std::{
    net::{Ipv6Addr, SocketAddr},
    sync::{Arc, Mutex},
    task::Waker,
};

/// TCP finite-state-machine states
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TcpState {
    Established,
    SynSent,
    SynRecv,
    FinWait1,
    FinWait2,
    TimeWait,
    Close,
    CloseWait,
    LastAck,
    Listen,
    Closing,
}

/// Segmentation-offload type of the subflow's egress
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GsoType {
    Tcpv4,
    Tcpv6,
}

/// Path MTU discovery policy
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PmtuDisc {
    Dont,
    Want,
    Do,
    Probe,
}

/// The IPv6 control block of a v6 subflow, laid out as the socket layer
/// initializes a fresh v6 socket
#[derive(Clone, Debug)]
pub struct Ipv6Pinfo {
    pub saddr: Ipv6Addr,
    pub daddr: Ipv6Addr,
    pub rcv_saddr: Ipv6Addr,
    /// -1 selects the route's default
    pub hop_limit: i16,
    pub mc_loop: bool,
    pub pmtudisc: PmtuDisc,
    pub mcast_oif: u32,
    pub mcast_hops: u8,
    /// Packet options cloned from the subflow's SYN
    pub pktoptions: Option<Segment>,
}

impl Ipv6Pinfo {
    pub fn new(saddr: Ipv6Addr, daddr: Ipv6Addr) -> Self {
        Self {
            saddr,
            daddr,
            rcv_saddr: saddr,
            hop_limit: -1,
            mc_loop: true,
            pmtudisc: PmtuDisc::Want,
            mcast_oif: 0,
            mcast_hops: 0,
            pktoptions: None,
        }
    }
}

/// Readiness handle shared by a meta-connection and its subflows so that
/// poll/epoll on the meta observes subflow events
#[derive(Debug, Default)]
pub struct WaitQueue {
    wakers: Mutex<Vec<Waker>>,
}

impl WaitQueue {
    pub fn register(&self, waker: Waker) {
        if let Ok(mut wakers) = self.wakers.lock() {
            wakers.push(waker);
        }
    }

    pub fn wake_all(&self) {
        if let Ok(mut wakers) = self.wakers.lock() {
            for waker in wakers.drain(..) {
                waker.wake();
            }
        }
    }
}

/// Shared handle to a subflow; the inner mutex is the subflow's socket lock
pub type SubflowRef = Arc<Mutex<Subflow>>;

/// One TCP subflow of a meta-connection
#[derive(Debug)]
pub struct Subflow {
    pub local: SocketAddr,
    pub remote: SocketAddr,
    pub state: TcpState,

    /// True for every subflow except the one that carried the initial
    /// handshake
    pub slave: bool,
    pub low_prio: bool,
    /// An MP_PRIO announcement is pending for this subflow
    pub send_mp_prio: bool,

    /// Pending ADD_ADDR advertisements, one bit per local v4 slot
    pub add_addr4: u16,
    /// Pending ADD_ADDR advertisements, one bit per local v6 slot
    pub add_addr6: u16,

    /// Peer's address ID this subflow connects to
    pub rem_id: u8,
    /// Delayed-ack timer for MPTCP-level acknowledgments
    pub ack_timer: Timer,
    pub gso: GsoType,
    /// Present iff the subflow is IPv6
    pub pinet6: Option<Box<Ipv6Pinfo>>,

    pub rxhash: u32,
    pub advmss: u16,
    pub tstamp_ok: bool,
    pub ts_recent: u32,
    pub sack_ok: bool,
    pub ecn_ok: bool,
    pub snd_wscale: u8,
    pub total_retrans: u32,
    pub iif: u32,

    /// Connected socket handle; `None` until the factory attaches one and
    /// after a force-close
    pub sock: Option<socket2::Socket>,
    /// Wait queue inherited from the meta-connection
    pub wait: Option<Arc<WaitQueue>>,
}

impl Subflow {
    pub fn new(local: SocketAddr, remote: SocketAddr, rem_id: u8) -> Self {
        let gso = if local.is_ipv6() {
            GsoType::Tcpv6
        } else {
            GsoType::Tcpv4
        };
        Self {
            local,
            remote,
            state: TcpState::SynSent,
            slave: false,
            low_prio: false,
            send_mp_prio: false,
            add_addr4: 0,
            add_addr6: 0,
            rem_id,
            ack_timer: Timer::default(),
            gso,
            pinet6: None,
            rxhash: 0,
            advmss: 0,
            tstamp_ok: false,
            ts_recent: 0,
            sack_ok: false,
            ecn_ok: false,
            snd_wscale: 0,
            total_retrans: 0,
            iif: 0,
            sock: None,
            wait: None,
        }
    }

    #[inline]
    pub fn family(&self) -> Family {
        Family::of(&self.local.ip())
    }

    /// Tears the subflow down immediately: the socket is closed, the state
    /// machine jumps to CLOSE and the meta's wait queue is detached
    pub fn force_close(&mut self) {
        self.state = TcpState::Close;
        self.sock = None;
        self.ack_timer.cancel();
        if let Some(wait) = self.wait.take() {
            wait.wake_all();
        }
    }
}
