// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! In-memory representation of an inbound TCP segment and its parsed
//! options.
//!
//! Header parsing proper happens below this layer; the path manager sees a
//! [`Segment`] with the fields it routes on plus the raw option bytes, which
//! it walks itself on the slow JOIN path.

use crate::{
    inet::Family,
    options::{self, Join, JoinSyn, MptcpOption},
};
use bytes::Bytes;
use s2n_codec::DecoderBuffer;
use std::net::{IpAddr, SocketAddr};

/// Marker set by option pre-processing when a segment carries MP_JOIN
pub const FLAG_JOIN: u8 = 0x01;

/// An inbound TCP segment as seen by the path manager
#[derive(Clone, Debug)]
pub struct Segment {
    /// Sender address and port
    pub source: SocketAddr,
    /// Receiver address and port
    pub dest: SocketAddr,
    pub seq: u32,
    pub ack_seq: u32,
    pub syn: bool,
    pub ack: bool,
    pub rst: bool,
    pub fin: bool,
    /// ECN echo flag
    pub ece: bool,
    /// Congestion-window-reduced flag
    pub cwr: bool,
    /// Path-manager marker flags ([`FLAG_JOIN`])
    pub mptcp_flags: u8,
    /// Raw TCP options, excluding the fixed header
    pub options: Bytes,
    /// IP-level header options (v4); saved into a JOIN request
    pub ip_options: Bytes,
    pub payload: Bytes,
    /// Cookie-derived initial sequence hint; 0 when absent
    pub when: u32,
    /// Receive-side flow hash
    pub rxhash: u32,
    /// Input interface index
    pub iif: u32,
    /// IPv6 hop limit of the packet (TTL for v4)
    pub hop_limit: u8,
}

impl Segment {
    #[inline]
    pub fn family(&self) -> Family {
        Family::of(&self.source.ip())
    }

    #[inline]
    pub fn src_ip(&self) -> IpAddr {
        self.source.ip()
    }

    #[inline]
    pub fn dst_ip(&self) -> IpAddr {
        self.dest.ip()
    }

    /// True when option pre-processing flagged this segment as a JOIN
    #[inline]
    pub fn is_join(&self) -> bool {
        self.mptcp_flags & FLAG_JOIN != 0
    }
}

/// Standard TCP option kinds consumed here
mod kind {
    pub const END: u8 = 0;
    pub const NOP: u8 = 1;
    pub const MSS: u8 = 2;
    pub const WINDOW_SCALE: u8 = 3;
    pub const SACK_PERM: u8 = 4;
    pub const TIMESTAMPS: u8 = 8;
    pub const MD5SIG: u8 = 19;
    pub const MPTCP: u8 = super::options::MPTCP_KIND;
}

/// A single raw TCP option
#[derive(Debug)]
pub struct TcpOption<'a> {
    pub kind: u8,
    pub value: DecoderBuffer<'a>,
}

/// Walks a TCP options block, stopping at end-of-options or a malformed
/// length
pub struct TcpOptionIter<'a> {
    buffer: DecoderBuffer<'a>,
}

impl<'a> TcpOptionIter<'a> {
    pub fn new(options: &'a [u8]) -> Self {
        Self {
            buffer: DecoderBuffer::new(options),
        }
    }
}

impl<'a> Iterator for TcpOptionIter<'a> {
    type Item = TcpOption<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let buffer = core::mem::replace(&mut self.buffer, DecoderBuffer::new(&[]));

        let (opt_kind, buffer) = buffer.decode::<u8>().ok()?;
        match opt_kind {
            kind::END => None,
            kind::NOP => {
                self.buffer = buffer;
                Some(TcpOption {
                    kind: kind::NOP,
                    value: DecoderBuffer::new(&[]),
                })
            }
            _ => {
                let (len, buffer) = buffer.decode::<u8>().ok()?;
                // length covers kind and length octets themselves
                let value_len = (len as usize).checked_sub(2)?;
                let (value, buffer) = buffer.decode_slice(value_len).ok()?;
                self.buffer = buffer;
                Some(TcpOption {
                    kind: opt_kind,
                    value,
                })
            }
        }
    }
}

/// Locates and decodes the MP_JOIN option in a raw options block
pub fn find_join(options: &[u8]) -> Option<Join> {
    for opt in TcpOptionIter::new(options) {
        if opt.kind != kind::MPTCP {
            continue;
        }
        if let Ok((MptcpOption::Join(join), _)) = opt.value.decode::<MptcpOption>() {
            return Some(join);
        }
    }
    None
}

/// The subset of `tcp_options_received` state the JOIN paths consume
#[derive(Clone, Copy, Debug, Default)]
pub struct ParsedOptions {
    pub mss_clamp: u16,
    pub user_mss: u16,
    pub saw_tstamp: bool,
    pub rcv_tsval: u32,
    pub rcv_tsecr: u32,
    /// Set by the request-creation path once timestamps are accepted
    pub tstamp_ok: bool,
    pub wscale_ok: bool,
    pub snd_wscale: u8,
    pub sack_ok: bool,
    pub saw_md5: bool,
    /// MP_JOIN SYN payload, when present
    pub join: Option<JoinSyn>,
}

impl ParsedOptions {
    /// Parses a SYN's option block.
    ///
    /// `mss_clamp` is the default clamp applied before any received MSS;
    /// a nonzero `user_mss` caps the final value.
    pub fn parse(options: &[u8], user_mss: u16, mss_clamp: u16) -> Self {
        let mut parsed = ParsedOptions {
            mss_clamp,
            user_mss,
            ..Default::default()
        };

        for opt in TcpOptionIter::new(options) {
            match opt.kind {
                kind::MSS => {
                    if let Ok((mss, _)) = opt.value.decode::<u16>() {
                        if mss != 0 {
                            parsed.mss_clamp = parsed.mss_clamp.min(mss);
                        }
                    }
                }
                kind::WINDOW_SCALE => {
                    if let Ok((shift, _)) = opt.value.decode::<u8>() {
                        parsed.wscale_ok = true;
                        parsed.snd_wscale = shift.min(14);
                    }
                }
                kind::SACK_PERM => parsed.sack_ok = true,
                kind::TIMESTAMPS => {
                    if let Ok((tsval, rest)) = opt.value.decode::<u32>() {
                        if let Ok((tsecr, _)) = rest.decode::<u32>() {
                            parsed.saw_tstamp = true;
                            parsed.rcv_tsval = tsval;
                            parsed.rcv_tsecr = tsecr;
                        }
                    }
                }
                kind::MD5SIG => parsed.saw_md5 = true,
                kind::MPTCP => {
                    if let Ok((MptcpOption::Join(Join::Syn(join)), _)) =
                        opt.value.decode::<MptcpOption>()
                    {
                        parsed.join = Some(join);
                    }
                }
                _ => {}
            }
        }

        if parsed.user_mss != 0 {
            parsed.mss_clamp = parsed.mss_clamp.min(parsed.user_mss);
        }

        parsed
    }
}
