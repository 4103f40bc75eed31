// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! MP_JOIN handshake crypto: key/token derivation and the HMAC-SHA1 MAC
//! exchanged during subflow establishment.

use core::fmt;
use ring::{digest, hmac};
use subtle::ConstantTimeEq;

/// A 64-bit MPTCP connection key, stored in network byte order
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Key([u8; 8]);

impl Key {
    #[inline]
    pub const fn new(bytes: [u8; 8]) -> Self {
        Self(bytes)
    }

    #[inline]
    pub const fn as_bytes(&self) -> &[u8; 8] {
        &self.0
    }

    //= https://www.rfc-editor.org/rfc/rfc6824#section-3.2
    //# The token MUST be a truncated (most significant 32 bits) SHA-1 hash
    //# ([4], [15]) of the key.
    #[inline]
    pub fn token(&self) -> Token {
        let hash = digest::digest(&digest::SHA1_FOR_LEGACY_USE_ONLY, &self.0);
        let mut word = [0u8; 4];
        word.copy_from_slice(&hash.as_ref()[..4]);
        Token(u32::from_be_bytes(word))
    }
}

impl From<[u8; 8]> for Key {
    fn from(bytes: [u8; 8]) -> Self {
        Self(bytes)
    }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        // keys are secrets; never log the material
        write!(f, "Key(..)")
    }
}

/// A 32-bit connection token, derived from a [`Key`]
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Token(pub u32);

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Token({:#010x})", self.0)
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:#010x}", self.0)
    }
}

pub const MAC_LEN: usize = 20;

/// A full 160-bit JOIN MAC
///
/// The SYN-ACK carries the leading 64 bits ([`JoinMac::truncated`]); the
/// final ACK carries all 20 bytes.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct JoinMac([u8; MAC_LEN]);

impl JoinMac {
    #[inline]
    pub const fn as_bytes(&self) -> &[u8; MAC_LEN] {
        &self.0
    }

    /// The leading 64 bits of the MAC in network byte order
    #[inline]
    pub fn truncated(&self) -> u64 {
        let mut word = [0u8; 8];
        word.copy_from_slice(&self.0[..8]);
        u64::from_be_bytes(word)
    }

    /// Constant-time comparison against a received MAC
    #[inline]
    pub fn verify(&self, other: &[u8; MAC_LEN]) -> bool {
        bool::from(self.0.ct_eq(other))
    }
}

impl fmt::Debug for JoinMac {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "JoinMac(..)")
    }
}

//= https://www.rfc-editor.org/rfc/rfc6824#section-3.2
//# The MAC algorithm is HMAC as defined in [12], using the SHA-1 hash
//# algorithm [4].  ... The key for the MAC is the concatenation of
//# Host A's key and Host B's key.  The message for the MAC is the
//# concatenation of Host A's random number and Host B's random number.

/// Computes the JOIN MAC for one direction of the handshake.
///
/// The caller's role fixes the argument order: a responder passes its own
/// key and nonce first; the computation for the peer's MAC swaps both
/// pairs. Both directions are needed, one to emit the SYN-ACK and one to
/// verify the final ACK.
pub fn join_mac(first_key: &Key, second_key: &Key, first_nonce: u32, second_nonce: u32) -> JoinMac {
    let mut key = [0u8; 16];
    key[..8].copy_from_slice(first_key.as_bytes());
    key[8..].copy_from_slice(second_key.as_bytes());

    let mut msg = [0u8; 8];
    msg[..4].copy_from_slice(&first_nonce.to_be_bytes());
    msg[4..].copy_from_slice(&second_nonce.to_be_bytes());

    let key = hmac::Key::new(hmac::HMAC_SHA1_FOR_LEGACY_USE_ONLY, &key);
    let tag = hmac::sign(&key, &msg);

    let mut mac = [0u8; MAC_LEN];
    mac.copy_from_slice(tag.as_ref());
    JoinMac(mac)
}
