// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! The cross-connection index of pending JOIN requests.
//!
//! A fixed array of hash buckets keyed by the remote (address, port),
//! protected by a single lock held only for O(bucket) work with no callouts
//! under it. The final-ACK lookup path finds the owning meta-connection here
//! before it can take any per-connection lock.

use crate::{join::request::RequestState, meta::MetaRef};
use core::hash::Hasher;
use s2n_mptcp_core::random;
use siphasher::sip::SipHasher13;
use std::{
    net::{IpAddr, SocketAddr},
    sync::{Arc, Mutex, Weak},
};

/// Bucket count; power of two, sized like the SYN-queue hash
pub const HASH_SIZE: usize = 1024;

#[derive(Debug)]
struct Inner {
    key0: u64,
    key1: u64,
    buckets: Mutex<Vec<Vec<Weak<RequestState>>>>,
}

/// Clonable handle to the request index
#[derive(Clone, Debug)]
pub struct RequestTable(Arc<Inner>);

impl RequestTable {
    /// Builds an empty table with a randomly keyed bucket hash
    pub fn new(random: &mut dyn random::Generator) -> Result<Self, random::Error> {
        Ok(Self(Arc::new(Inner {
            key0: random.gen_u64()?,
            key1: random.gen_u64()?,
            buckets: Mutex::new(vec![Vec::new(); HASH_SIZE]),
        })))
    }

    fn bucket_index(&self, addr: IpAddr, port: u16) -> usize {
        let mut hasher = SipHasher13::new_with_keys(self.0.key0, self.0.key1);
        match addr {
            IpAddr::V4(addr) => hasher.write(&addr.octets()),
            IpAddr::V6(addr) => hasher.write(&addr.octets()),
        }
        hasher.write_u16(port);
        (hasher.finish() as usize) & (HASH_SIZE - 1)
    }

    /// Links a request into its bucket
    pub(crate) fn insert(&self, req: &Arc<RequestState>) {
        let index = self.bucket_index(req.remote.ip(), req.remote.port());
        if let Ok(mut buckets) = self.0.buckets.lock() {
            buckets[index].push(Arc::downgrade(req));
        }
    }

    /// Unlinks a request by pointer identity; called by the request's
    /// destructor. A request that was never inserted unlinks as a no-op.
    pub(crate) fn unlink(&self, addr: IpAddr, port: u16, ptr: *const RequestState) {
        let index = self.bucket_index(addr, port);
        if let Ok(mut buckets) = self.0.buckets.lock() {
            buckets[index].retain(|weak| !core::ptr::eq(weak.as_ptr(), ptr));
        }
    }

    /// Finds the meta-connection owning a pending JOIN for this 4-tuple.
    ///
    /// The returned handle's reference count is raised while the bucket
    /// lock is still held; a meta that is already being torn down can never
    /// be returned. The caller drops the handle when done.
    pub fn lookup(&self, remote: SocketAddr, local: IpAddr) -> Option<MetaRef> {
        let index = self.bucket_index(remote.ip(), remote.port());
        let buckets = self.0.buckets.lock().ok()?;
        for weak in &buckets[index] {
            let Some(req) = weak.upgrade() else { continue };
            if req.remote == remote
                && req.local.ip() == local
                && req.family() == s2n_mptcp_core::inet::Family::of(&remote.ip())
            {
                if let Some(meta) = req.meta.upgrade() {
                    return Some(meta);
                }
            }
        }
        None
    }

    /// Number of live entries indexed for this remote endpoint
    pub fn pending(&self, remote: SocketAddr) -> usize {
        let index = self.bucket_index(remote.ip(), remote.port());
        self.0
            .buckets
            .lock()
            .map(|buckets| {
                buckets[index]
                    .iter()
                    .filter(|weak| {
                        weak.upgrade()
                            .map(|req| req.remote == remote)
                            .unwrap_or(false)
                    })
                    .count()
            })
            .unwrap_or(0)
    }

    #[cfg(test)]
    pub(crate) fn total_entries(&self) -> usize {
        self.0
            .buckets
            .lock()
            .map(|buckets| buckets.iter().map(|b| b.len()).sum())
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::meta::Meta;
    use s2n_mptcp_core::{crypto::Key, random::testing::Sequential};

    fn meta() -> MetaRef {
        Meta::new_ref(
            Key::new([1; 8]),
            Key::new([2; 8]),
            "192.0.2.1:443".parse().unwrap(),
            "198.51.100.1:50000".parse().unwrap(),
        )
    }

    fn request(meta: &MetaRef, table: &RequestTable, remote: SocketAddr) -> Arc<RequestState> {
        let meta = meta.lock().unwrap();
        Arc::new(RequestState::new(
            &meta,
            table.clone(),
            "192.0.2.1:443".parse().unwrap(),
            remote,
            1,
            2,
            2,
            false,
        ))
    }

    #[test]
    fn insert_lookup_remove() {
        let table = RequestTable::new(&mut Sequential::default()).unwrap();
        let meta = meta();
        let remote: SocketAddr = "10.0.0.2:49152".parse().unwrap();

        let req = request(&meta, &table, remote);
        table.insert(&req);

        let found = table.lookup(remote, "192.0.2.1".parse().unwrap()).unwrap();
        assert!(Arc::ptr_eq(&found, &meta));

        // wrong local address does not match
        assert!(table
            .lookup(remote, "192.0.2.99".parse().unwrap())
            .is_none());
        // wrong port does not match
        assert!(table
            .lookup("10.0.0.2:1".parse().unwrap(), "192.0.2.1".parse().unwrap())
            .is_none());

        drop(req);
        assert!(table.lookup(remote, "192.0.2.1".parse().unwrap()).is_none());
        assert_eq!(table.total_entries(), 0);
    }

    #[test]
    fn destructor_unlinks_exactly_once() {
        let table = RequestTable::new(&mut Sequential::default()).unwrap();
        let meta = meta();
        let remote: SocketAddr = "10.0.0.2:49152".parse().unwrap();

        let a = request(&meta, &table, remote);
        let b = request(&meta, &table, remote);
        table.insert(&a);
        table.insert(&b);
        assert_eq!(table.pending(remote), 2);

        drop(a);
        assert_eq!(table.pending(remote), 1);
        assert_eq!(table.total_entries(), 1);

        drop(b);
        assert_eq!(table.total_entries(), 0);
    }

    #[test]
    fn uninserted_request_unlinks_as_noop() {
        let table = RequestTable::new(&mut Sequential::default()).unwrap();
        let meta = meta();
        let remote: SocketAddr = "10.0.0.2:49152".parse().unwrap();

        let inserted = request(&meta, &table, remote);
        table.insert(&inserted);

        // a request freed before insertion (SYN-ACK send failure)
        let dropped = request(&meta, &table, remote);
        drop(dropped);

        assert_eq!(table.pending(remote), 1);
    }

    #[test]
    fn dead_meta_is_never_returned() {
        let table = RequestTable::new(&mut Sequential::default()).unwrap();
        let remote: SocketAddr = "10.0.0.2:49152".parse().unwrap();

        let meta = meta();
        let req = request(&meta, &table, remote);
        table.insert(&req);

        drop(meta);
        assert!(table.lookup(remote, "192.0.2.1".parse().unwrap()).is_none());
    }

    #[test]
    fn family_is_part_of_the_key() {
        let table = RequestTable::new(&mut Sequential::default()).unwrap();
        let meta = meta();
        let remote: SocketAddr = "10.0.0.2:49152".parse().unwrap();
        let req = request(&meta, &table, remote);
        table.insert(&req);

        // a v6 lookup with the same port never matches a v4 request
        assert!(table
            .lookup("[2001:db8::2]:49152".parse().unwrap(), "2001:db8::1".parse().unwrap())
            .is_none());
    }
}
