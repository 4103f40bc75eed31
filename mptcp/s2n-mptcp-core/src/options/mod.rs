// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! MPTCP TCP-option wire formats.
//!
//! Every MPTCP signal travels in a TCP option of kind 30 whose first value
//! nibble selects the subtype. Only the subtypes this path manager produces
//! or consumes are modeled; the data-plane subtypes (MP_CAPABLE, DSS, ...)
//! are parsed by other layers.

use s2n_codec::{decoder_value, DecoderError, Encoder, EncoderValue};

pub mod add_addr;
pub mod join;
pub mod prio;
pub mod remove_addr;

pub use add_addr::AddAddr;
pub use join::{Join, JoinAck, JoinSyn, JoinSynAck};
pub use prio::Prio;
pub use remove_addr::RemoveAddr;

//= https://www.rfc-editor.org/rfc/rfc6824#section-8
//# This document defines one TCP option kind value to be allocated by
//# IANA, to represent all MPTCP operations.
pub const MPTCP_KIND: u8 = 30;

pub(crate) type Subtype = u8;

pub const MP_CAPABLE: Subtype = 0x0;
pub const MP_JOIN: Subtype = 0x1;
pub const DSS: Subtype = 0x2;
pub const ADD_ADDR: Subtype = 0x3;
pub const REMOVE_ADDR: Subtype = 0x4;
pub const MP_PRIO: Subtype = 0x5;
pub const MP_FAIL: Subtype = 0x6;
pub const MP_FASTCLOSE: Subtype = 0x7;

/// A decoded path-management option.
///
/// Decoding operates on the option *value* (the bytes after the TCP kind
/// and length octets); encoding is symmetric, with [`encode_option`]
/// prepending kind and length.
#[derive(Debug, PartialEq, Eq)]
pub enum MptcpOption<'a> {
    Join(Join),
    AddAddr(AddAddr),
    RemoveAddr(RemoveAddr<'a>),
    Prio(Prio),
}

decoder_value!(
    impl<'a> MptcpOption<'a> {
        fn decode(buffer: Buffer) -> Result<Self> {
            let (first, buffer) = buffer.decode::<u8>()?;
            match first >> 4 {
                MP_JOIN => {
                    let (join, buffer) = buffer.decode_parameterized(first)?;
                    Ok((MptcpOption::Join(join), buffer))
                }
                ADD_ADDR => {
                    let (add, buffer) = buffer.decode_parameterized(first)?;
                    Ok((MptcpOption::AddAddr(add), buffer))
                }
                REMOVE_ADDR => {
                    let (remove, buffer) = buffer.decode_parameterized(first)?;
                    Ok((MptcpOption::RemoveAddr(remove), buffer))
                }
                MP_PRIO => {
                    let (prio, buffer) = buffer.decode_parameterized(first)?;
                    Ok((MptcpOption::Prio(prio), buffer))
                }
                _ => Err(DecoderError::InvariantViolation("unhandled mptcp subtype")),
            }
        }
    }
);

impl EncoderValue for MptcpOption<'_> {
    fn encode<E: Encoder>(&self, buffer: &mut E) {
        match self {
            MptcpOption::Join(value) => value.encode(buffer),
            MptcpOption::AddAddr(value) => value.encode(buffer),
            MptcpOption::RemoveAddr(value) => value.encode(buffer),
            MptcpOption::Prio(value) => value.encode(buffer),
        }
    }
}

/// Encodes a complete TCP option (kind, length, value) for `value`
pub fn encode_option<E: Encoder, V: EncoderValue>(kind: u8, value: &V, buffer: &mut E) {
    let len = value.encoding_size() + 2;
    debug_assert!(len <= u8::MAX as usize);
    buffer.encode(&kind);
    buffer.encode(&(len as u8));
    buffer.encode(value);
}

/// Encodes a complete TCP option into a freshly allocated buffer
pub fn option_to_vec<V: EncoderValue>(kind: u8, value: &V) -> Vec<u8> {
    let len = value.encoding_size() + 2;
    let mut bytes = vec![0u8; len];
    let mut buffer = s2n_codec::EncoderBuffer::new(&mut bytes);
    encode_option(kind, value, &mut buffer);
    bytes
}
