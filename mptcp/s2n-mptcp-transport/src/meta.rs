// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! The meta-connection: the logical MPTCP connection owning subflows,
//! address registries and the pending-JOIN queue.

use crate::{
    addr::{Ip, LocalSet, MultipathOptions, RemoteSet},
    join::request::RequestState,
    subflow::{Subflow, SubflowRef, TcpState, WaitQueue},
};
use core::time::Duration;
use s2n_mptcp_core::{
    crypto::{Key, Token},
    inet::Family,
    time::Timestamp,
};
use smallvec::SmallVec;
use std::{
    net::{Ipv4Addr, Ipv6Addr, SocketAddr},
    sync::{Arc, Mutex, Weak},
};

/// Shared handle to a meta-connection; the inner mutex is the meta lock.
///
/// Functions taking `&mut Meta` require the caller to hold that lock, which
/// serializes JOIN acceptance, promotion and address events per connection.
pub type MetaRef = Arc<Mutex<Meta>>;

/// Hard cap on concurrently attached subflows (path-index space)
const MAX_SUBFLOWS: usize = 32;

/// The subflow limit was reached
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SubflowLimit;

impl core::fmt::Display for SubflowLimit {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        write!(f, "subflow limit reached")
    }
}

impl std::error::Error for SubflowLimit {}

/// A pending JOIN with its eviction deadline
#[derive(Debug)]
pub(crate) struct PendingRequest {
    pub req: Arc<RequestState>,
    pub expires: Timestamp,
}

/// Per-connection MPTCP control state (the meta-socket)
#[derive(Debug)]
pub struct Meta {
    pub local_key: Key,
    pub remote_key: Key,
    /// Derived from `local_key`; peers address JOINs to it
    pub local_token: Token,

    /// Initial subflow's local endpoint
    pub local_addr: SocketAddr,
    /// Initial subflow's remote endpoint; its port is the default JOIN
    /// target port
    pub remote_addr: SocketAddr,

    pub state: TcpState,
    /// Cleared when the connection leaves the token table; no new subflows
    /// are accepted afterwards
    pub inside_tk_table: bool,

    /// Remote address registry plus the advertisement-received flag
    pub rx_opt: MultipathOptions,
    pub loc4: LocalSet<Ipv4Addr>,
    pub loc6: LocalSet<Ipv6Addr>,

    /// Wire IDs whose withdrawal is pending in a REMOVE_ADDR option
    pub remove_addrs: u32,

    pub user_mss: u16,
    /// The connection negotiated MD5 signatures
    pub md5sig: bool,
    /// Transparent-proxy socket; propagated to requests as no_srccheck
    pub transparent: bool,
    /// The (v6) meta asked for received packet info; JOIN SYNs are then
    /// cloned into the request for the future child
    pub rxopt_interest: bool,
    pub bound_dev_if: Option<u32>,

    pub subflows: Vec<SubflowRef>,
    pub(crate) requests: Vec<PendingRequest>,

    pub acceptq_len: usize,
    pub acceptq_max: usize,

    /// Readiness handle shared with every subflow
    pub wait: Arc<WaitQueue>,

    self_ref: Weak<Mutex<Meta>>,
}

impl Meta {
    /// Builds a meta-connection handle for an established connection
    pub fn new_ref(
        local_key: Key,
        remote_key: Key,
        local_addr: SocketAddr,
        remote_addr: SocketAddr,
    ) -> MetaRef {
        Arc::new_cyclic(|self_ref| {
            Mutex::new(Meta {
                local_key,
                remote_key,
                local_token: local_key.token(),
                local_addr,
                remote_addr,
                state: TcpState::Established,
                inside_tk_table: false,
                rx_opt: MultipathOptions::default(),
                loc4: LocalSet::default(),
                loc6: LocalSet::default(),
                remove_addrs: 0,
                user_mss: 0,
                md5sig: false,
                transparent: false,
                rxopt_interest: false,
                bound_dev_if: None,
                subflows: Vec::new(),
                requests: Vec::new(),
                acceptq_len: 0,
                acceptq_max: 128,
                wait: Arc::new(WaitQueue::default()),
                self_ref: self_ref.clone(),
            })
        })
    }

    /// A weak handle to this meta, stored in request-states for the
    /// refcount-under-lock lookup in the request table
    #[inline]
    pub fn self_ref(&self) -> Weak<Mutex<Meta>> {
        self.self_ref.clone()
    }

    #[inline]
    pub fn family(&self) -> Family {
        Family::of(&self.local_addr.ip())
    }

    /// Destination port new subflows default to
    #[inline]
    pub fn dport(&self) -> u16 {
        self.remote_addr.port()
    }

    #[inline]
    pub fn acceptq_is_full(&self) -> bool {
        self.acceptq_len >= self.acceptq_max
    }

    /// Attaches a subflow, assigning it a path slot
    pub fn add_subflow(&mut self, sub: SubflowRef) -> Result<(), SubflowLimit> {
        if self.subflows.len() >= MAX_SUBFLOWS {
            return Err(SubflowLimit);
        }
        self.subflows.push(sub);
        Ok(())
    }

    /// Detaches a subflow without closing it
    pub fn remove_subflow(&mut self, sub: &SubflowRef) {
        self.subflows.retain(|s| !Arc::ptr_eq(s, sub));
    }

    /// Drops subflows that reached CLOSE
    pub fn reap_closed_subflows(&mut self) {
        self.subflows.retain(|s| {
            s.lock()
                .map(|sub| sub.state != TcpState::Close)
                .unwrap_or(false)
        });
    }

    /// Schedules an ADD_ADDR advertisement for a local v4 slot on every
    /// attached subflow
    pub fn schedule_add_addr4(&mut self, slot: u8) {
        for sub in &self.subflows {
            if let Ok(mut sub) = sub.lock() {
                sub.add_addr4 |= 1 << slot;
            }
        }
    }

    /// Schedules an ADD_ADDR advertisement for a local v6 slot on every
    /// attached subflow
    pub fn schedule_add_addr6(&mut self, slot: u8) {
        for sub in &self.subflows {
            if let Ok(mut sub) = sub.lock() {
                sub.add_addr6 |= 1 << slot;
            }
        }
    }

    /// Picks the subflow that should carry a bare ACK (REMOVE_ADDR,
    /// MP_PRIO). Established non-backup paths win.
    pub fn select_ack_sock(&self) -> Option<SubflowRef> {
        let mut fallback = None;
        for sub in &self.subflows {
            let Ok(guard) = sub.lock() else { continue };
            if guard.state != TcpState::Established {
                continue;
            }
            if !guard.low_prio {
                return Some(sub.clone());
            }
            if fallback.is_none() {
                fallback = Some(sub.clone());
            }
        }
        fallback
    }

    pub(crate) fn queue_request(
        &mut self,
        req: Arc<RequestState>,
        timeout: Duration,
        now: Timestamp,
    ) {
        self.requests.push(PendingRequest {
            req,
            expires: now + timeout,
        });
    }

    #[inline]
    pub fn request_queue_len(&self) -> usize {
        self.requests.len()
    }

    /// Finds a pending JOIN by its 4-tuple
    pub fn find_request(
        &self,
        remote: SocketAddr,
        local: SocketAddr,
    ) -> Option<Arc<RequestState>> {
        self.requests
            .iter()
            .find(|p| p.req.remote == remote && p.req.local == local)
            .map(|p| p.req.clone())
    }

    /// Unlinks a request from the queue; dropping the last strong reference
    /// runs its destructor, which unlinks it from the request table
    pub fn remove_request(&mut self, req: &Arc<RequestState>) {
        self.requests.retain(|p| !Arc::ptr_eq(&p.req, req));
    }

    /// Evicts requests whose SYN-ACK timeout elapsed
    pub fn on_timeout(&mut self, now: Timestamp) {
        self.requests.retain(|p| !p.expires.has_elapsed(now));
    }

    /// Tears down all pending requests and subflow attachments
    pub fn destroy(&mut self) {
        self.state = TcpState::Close;
        self.inside_tk_table = false;
        self.requests.clear();
        let subflows: SmallVec<[SubflowRef; 4]> = self.subflows.drain(..).collect();
        for sub in subflows {
            if let Ok(mut sub) = sub.lock() {
                sub.force_close();
            }
        }
    }
}

/// Per-family access to a meta's registries, used by the family-generic
/// event and factory paths
pub(crate) trait IpExt: Ip {
    fn loc(meta: &Meta) -> &LocalSet<Self>;
    fn loc_mut(meta: &mut Meta) -> &mut LocalSet<Self>;
    fn rem(meta: &Meta) -> &RemoteSet<Self>;
    fn rem_mut(meta: &mut Meta) -> &mut RemoteSet<Self>;
    fn schedule_add_addr(meta: &mut Meta, slot: u8);
}

impl IpExt for Ipv4Addr {
    fn loc(meta: &Meta) -> &LocalSet<Self> {
        &meta.loc4
    }
    fn loc_mut(meta: &mut Meta) -> &mut LocalSet<Self> {
        &mut meta.loc4
    }
    fn rem(meta: &Meta) -> &RemoteSet<Self> {
        &meta.rx_opt.rem4
    }
    fn rem_mut(meta: &mut Meta) -> &mut RemoteSet<Self> {
        &mut meta.rx_opt.rem4
    }
    fn schedule_add_addr(meta: &mut Meta, slot: u8) {
        meta.schedule_add_addr4(slot);
    }
}

impl IpExt for Ipv6Addr {
    fn loc(meta: &Meta) -> &LocalSet<Self> {
        &meta.loc6
    }
    fn loc_mut(meta: &mut Meta) -> &mut LocalSet<Self> {
        &mut meta.loc6
    }
    fn rem(meta: &Meta) -> &RemoteSet<Self> {
        &meta.rx_opt.rem6
    }
    fn rem_mut(meta: &mut Meta) -> &mut RemoteSet<Self> {
        &mut meta.rx_opt.rem6
    }
    fn schedule_add_addr(meta: &mut Meta, slot: u8) {
        meta.schedule_add_addr6(slot);
    }
}
