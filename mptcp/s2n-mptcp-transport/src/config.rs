// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Tunables and protocol constants.

use core::time::Duration;

/// Initial retransmission timeout; also bounds a pending JOIN request
pub const TCP_TIMEOUT_INIT: Duration = Duration::from_secs(1);

/// A pending JOIN request is destroyed if the final ACK does not arrive
/// within this window
pub const SYN_RCV_TIMEOUT: Duration = TCP_TIMEOUT_INIT;

/// Seconds a peer's cached timestamp stays fresh for PAWS purposes
pub const TCP_PAWS_MSL: u64 = 60;

/// Timestamp ticks of tolerated reordering before PAWS rejects
pub const TCP_PAWS_WINDOW: u32 = 1;

/// Default MSS clamp applied before any received MSS option
pub const TCP_MSS_DEFAULT: u16 = 536;

/// Fallback DAD re-check interval when the interface advertises no
/// router-solicitation delay
pub const DEFAULT_DAD_WAIT: Duration = Duration::from_millis(100);

/// Host-wide tunables the original reads from sysctls
#[derive(Clone, Debug)]
pub struct Config {
    /// SYN cookies enabled; disables the backlog anti-flood drop
    pub syncookies: bool,
    /// Recycle TIME-WAIT state using cached peer timestamps (PAWS reject)
    pub tw_recycle: bool,
    /// Upper bound on pending JOIN requests per meta-connection
    pub max_syn_backlog: usize,
    /// DAD re-check interval override
    pub dad_wait: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            syncookies: true,
            tw_recycle: false,
            max_syn_backlog: 256,
            dad_wait: DEFAULT_DAD_WAIT,
        }
    }
}
