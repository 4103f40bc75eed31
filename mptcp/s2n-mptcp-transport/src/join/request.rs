// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Half-open JOIN request state.

use crate::{join::table::RequestTable, meta::Meta};
use bytes::Bytes;
use core::sync::atomic::{AtomicU32, Ordering};
use s2n_mptcp_core::{
    crypto::{self, Key, MAC_LEN},
    inet::Family,
    segment::Segment,
    time::Timestamp,
};
use std::{
    net::SocketAddr,
    sync::{Mutex, Weak},
};

/// One pending JOIN, alive from SYN acceptance until promotion, timeout or
/// meta teardown.
///
/// The owning meta-connection holds the only strong reference (through its
/// request queue); the global [`RequestTable`] indexes it weakly. Dropping
/// the last strong reference runs the destructor, which unlinks the entry
/// from the table under the table lock before the rest of the state goes
/// away.
#[derive(Debug)]
pub struct RequestState {
    /// Non-owning back-pointer, upgraded under the table lock by lookups
    pub meta: Weak<Mutex<Meta>>,

    pub local_key: Key,
    pub remote_key: Key,
    pub local_nonce: u32,
    pub remote_nonce: u32,
    /// Leading 64 bits of the responder-direction MAC, sent in the SYN-ACK
    pub truncated_mac: u64,

    /// Peer's address ID from the MP_JOIN SYN
    pub remote_id: u8,
    /// Peer asked for a backup subflow
    pub low_prio: bool,

    pub local: SocketAddr,
    pub remote: SocketAddr,

    pub snt_isn: u32,
    pub snt_synack: Timestamp,

    pub ts_recent: u32,
    pub tstamp_ok: bool,
    pub mss_clamp: u16,
    pub wscale_ok: bool,
    pub snd_wscale: u8,
    pub sack_ok: bool,
    pub ecn_ok: bool,
    /// Skip source checks (transparent-proxy meta)
    pub no_srccheck: bool,
    pub iif: u32,

    /// Saved v4 IP options from the SYN
    pub ip_options: Option<Bytes>,
    /// Cloned SYN for a v6 child's packet options; taken at promotion
    pub pktopts: Mutex<Option<Segment>>,

    pub retrans: AtomicU32,

    table: RequestTable,
}

impl RequestState {
    /// Builder used by the request-creation routine; `table` is where the
    /// destructor will unlink from
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        meta: &Meta,
        table: RequestTable,
        local: SocketAddr,
        remote: SocketAddr,
        local_nonce: u32,
        remote_nonce: u32,
        remote_id: u8,
        low_prio: bool,
    ) -> Self {
        let truncated_mac = crypto::join_mac(
            &meta.local_key,
            &meta.remote_key,
            local_nonce,
            remote_nonce,
        )
        .truncated();

        Self {
            meta: meta.self_ref(),
            local_key: meta.local_key,
            remote_key: meta.remote_key,
            local_nonce,
            remote_nonce,
            truncated_mac,
            remote_id,
            low_prio,
            local,
            remote,
            snt_isn: 0,
            snt_synack: Timestamp::default(),
            ts_recent: 0,
            tstamp_ok: false,
            mss_clamp: 0,
            wscale_ok: false,
            snd_wscale: 0,
            sack_ok: false,
            ecn_ok: false,
            no_srccheck: meta.transparent,
            iif: 0,
            ip_options: None,
            pktopts: Mutex::new(None),
            retrans: AtomicU32::new(0),
            table,
        }
    }

    #[inline]
    pub fn family(&self) -> Family {
        Family::of(&self.remote.ip())
    }

    /// The truncated MAC carried in the SYN-ACK's MP_JOIN option
    #[inline]
    pub fn synack_mac(&self) -> u64 {
        self.truncated_mac
    }

    /// Verifies the initiator's full MAC from the final ACK.
    ///
    /// The peer computed it with its own key and nonce first, so the
    /// comparison value swaps both pairs relative to the SYN-ACK MAC.
    pub fn verify_ack_mac(&self, mac: &[u8; MAC_LEN]) -> bool {
        crypto::join_mac(
            &self.remote_key,
            &self.local_key,
            self.remote_nonce,
            self.local_nonce,
        )
        .verify(mac)
    }

    #[inline]
    pub fn retrans(&self) -> u32 {
        self.retrans.load(Ordering::Relaxed)
    }

    pub(crate) fn bump_retrans(&self) {
        self.retrans.fetch_add(1, Ordering::Relaxed);
    }
}

impl Drop for RequestState {
    fn drop(&mut self) {
        // unlink from the table first, then the rest of the state is freed
        let table = self.table.clone();
        table.unlink(self.remote.ip(), self.remote.port(), self as *const _);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use s2n_mptcp_core::random::{testing::Sequential, Generator};

    #[test]
    fn mac_directions() {
        let meta = crate::meta::Meta::new_ref(
            Key::new([0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08]),
            Key::new([0x11, 0x12, 0x13, 0x14, 0x15, 0x16, 0x17, 0x18]),
            "192.0.2.1:443".parse().unwrap(),
            "198.51.100.1:50000".parse().unwrap(),
        );
        let meta = meta.lock().unwrap();
        let table = RequestTable::new(&mut Sequential::default()).unwrap();

        let req = RequestState::new(
            &meta,
            table,
            "192.0.2.1:443".parse().unwrap(),
            "198.51.100.1:50000".parse().unwrap(),
            0xdead_beef, // local nonce
            0xcafe_babe, // remote nonce
            2,
            false,
        );

        // responder direction, computed against the reference vector
        assert_eq!(req.synack_mac(), 0x70b2_9597_a612_7824);

        // initiator direction validates the final ACK
        let peer_mac = crypto::join_mac(
            &req.remote_key,
            &req.local_key,
            req.remote_nonce,
            req.local_nonce,
        );
        assert!(req.verify_ack_mac(peer_mac.as_bytes()));
        assert!(!req.verify_ack_mac(&[0u8; MAC_LEN]));
    }

    #[test]
    fn nonce_material_is_distinct_per_request() {
        let mut rng = Sequential::default();
        let a = rng.gen_u32().unwrap();
        let b = rng.gen_u32().unwrap();
        assert_ne!(a, b);
    }
}
