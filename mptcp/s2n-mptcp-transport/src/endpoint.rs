// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Process-wide state and the context handed to the packet entry points.

use crate::{
    config::Config,
    isn::IsnGenerator,
    join::table::RequestTable,
    meta::{Meta, MetaRef},
    route::{Peers, Routes},
    stats::Stats,
    subflow::{Subflow, SubflowRef},
    tcp::Tcp,
};
use hashbrown::HashMap;
use s2n_mptcp_core::{crypto::Token, random, time::Timestamp};
use std::{
    net::SocketAddr,
    sync::{Arc, Mutex, Weak},
};

/// Connection key for the established table
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct FourTuple {
    pub local: SocketAddr,
    pub remote: SocketAddr,
}

/// What a 4-tuple resolves to in the established table
#[derive(Clone, Debug)]
pub enum EstabEntry {
    Subflow(Weak<Mutex<Subflow>>),
    Meta(Weak<Mutex<Meta>>),
    TimeWait,
}

/// 4-tuple to socket map; the analog of the TCP established hash
#[derive(Debug, Default)]
pub struct EstablishedTable {
    inner: Mutex<HashMap<FourTuple, EstabEntry>>,
}

impl EstablishedTable {
    pub fn insert_subflow(&self, tuple: FourTuple, sub: &SubflowRef) {
        if let Ok(mut map) = self.inner.lock() {
            map.insert(tuple, EstabEntry::Subflow(Arc::downgrade(sub)));
        }
    }

    pub fn insert_meta(&self, tuple: FourTuple, meta: &MetaRef) {
        if let Ok(mut map) = self.inner.lock() {
            map.insert(tuple, EstabEntry::Meta(Arc::downgrade(meta)));
        }
    }

    pub fn insert_time_wait(&self, tuple: FourTuple) {
        if let Ok(mut map) = self.inner.lock() {
            map.insert(tuple, EstabEntry::TimeWait);
        }
    }

    pub fn lookup(&self, tuple: &FourTuple) -> Option<EstabEntry> {
        self.inner.lock().ok()?.get(tuple).cloned()
    }

    pub fn remove(&self, tuple: &FourTuple) {
        if let Ok(mut map) = self.inner.lock() {
            map.remove(tuple);
        }
    }
}

/// Token to meta-connection map backing `inside_tk_table`
#[derive(Debug, Default)]
pub struct TokenTable {
    inner: Mutex<HashMap<u32, Weak<Mutex<Meta>>>>,
}

impl TokenTable {
    pub fn insert(&self, token: Token, meta: &MetaRef) {
        if let Ok(mut map) = self.inner.lock() {
            map.insert(token.0, Arc::downgrade(meta));
        }
    }

    pub fn lookup(&self, token: Token) -> Option<MetaRef> {
        self.inner.lock().ok()?.get(&token.0)?.upgrade()
    }

    pub fn remove(&self, token: Token) {
        if let Ok(mut map) = self.inner.lock() {
            map.remove(&token.0);
        }
    }
}

/// Packet-side process state: tables, counters, tunables, entropy
pub struct Endpoint {
    pub config: Config,
    pub stats: Stats,
    pub requests: RequestTable,
    pub tokens: TokenTable,
    pub established: EstablishedTable,
    random: Box<dyn random::Generator>,
    isn: IsnGenerator,
}

impl Endpoint {
    pub fn new(
        config: Config,
        mut random: Box<dyn random::Generator>,
    ) -> Result<Self, random::Error> {
        let isn = IsnGenerator::new(&mut *random)?;
        let requests = RequestTable::new(&mut *random)?;
        Ok(Self {
            config,
            stats: Stats::default(),
            requests,
            tokens: TokenTable::default(),
            established: EstablishedTable::default(),
            random,
            isn,
        })
    }

    /// Makes a meta-connection reachable for new JOINs: it enters the token
    /// table and its own 4-tuple enters the established table
    pub fn register(&self, meta_ref: &MetaRef) {
        let Ok(mut meta) = meta_ref.lock() else { return };
        meta.inside_tk_table = true;
        self.tokens.insert(meta.local_token, meta_ref);
        self.established.insert_meta(
            FourTuple {
                local: meta.local_addr,
                remote: meta.remote_addr,
            },
            meta_ref,
        );
    }

    /// Removes a meta-connection from the lookup tables; pending and future
    /// JOINs are refused afterwards
    pub fn unregister(&self, meta_ref: &MetaRef) {
        let Ok(mut meta) = meta_ref.lock() else { return };
        meta.inside_tk_table = false;
        self.tokens.remove(meta.local_token);
        self.established.remove(&FourTuple {
            local: meta.local_addr,
            remote: meta.remote_addr,
        });
    }

    /// Lends the per-call context to a packet entry point
    pub fn context<'a>(
        &'a mut self,
        tcp: &'a mut dyn Tcp,
        routes: &'a dyn Routes,
        peers: &'a dyn Peers,
        now: Timestamp,
    ) -> Context<'a> {
        Context {
            tcp,
            routes,
            peers,
            config: &self.config,
            stats: &self.stats,
            requests: &self.requests,
            established: &self.established,
            random: &mut *self.random,
            isn: &self.isn,
            now,
        }
    }
}

impl core::fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        f.debug_struct("Endpoint")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Everything a single receive/event call may touch.
///
/// Bundles the process tables with the out-of-scope collaborators and the
/// caller-provided current time.
pub struct Context<'a> {
    pub tcp: &'a mut dyn Tcp,
    pub routes: &'a dyn Routes,
    pub peers: &'a dyn Peers,
    pub config: &'a Config,
    pub stats: &'a Stats,
    pub requests: &'a RequestTable,
    pub established: &'a EstablishedTable,
    pub random: &'a mut dyn random::Generator,
    pub isn: &'a IsnGenerator,
    pub now: Timestamp,
}
