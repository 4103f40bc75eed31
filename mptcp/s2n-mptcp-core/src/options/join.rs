// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::{
    crypto::{Token, MAC_LEN},
    options::{Subtype, MP_JOIN},
};
use s2n_codec::{decoder_parameterized_value, DecoderError, Encoder, EncoderValue};

//= https://www.rfc-editor.org/rfc/rfc6824#section-3.2
//# The MP_JOIN option is used to initiate a new subflow between two
//# hosts.  ... There are three forms of this option, distinguished by
//# their length, used on the initial SYN of a subflow, the responding
//# SYN/ACK, and the third ACK.

const BACKUP_FLAG: u8 = 0x01;

const SYN_VALUE_LEN: usize = 10;
const SYN_ACK_VALUE_LEN: usize = 14;
const ACK_VALUE_LEN: usize = 22;

/// The three MP_JOIN shapes, length-discriminated on the wire
#[derive(Debug, PartialEq, Eq)]
pub enum Join {
    Syn(JoinSyn),
    SynAck(JoinSynAck),
    Ack(JoinAck),
}

//= https://www.rfc-editor.org/rfc/rfc6824#section-3.2
//# +---------------+---------------+-------+-----+-+---------------+
//# |     Kind      |  Length = 12  |Subtype|     |B|   Address ID  |
//# +---------------+---------------+-------+-----+-+---------------+
//# |                   Receiver's Token (32 bits)                  |
//# +---------------------------------------------------------------+
//# |                Sender's Random Number (32 bits)               |
//# +---------------------------------------------------------------+

/// MP_JOIN as carried on a subflow SYN
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct JoinSyn {
    /// The sender asks for this subflow to be used as a backup path
    pub backup: bool,
    /// The sender's address ID for its source address
    pub addr_id: u8,
    /// The receiver's connection token
    pub token: Token,
    /// The sender's random nonce
    pub nonce: u32,
}

//= https://www.rfc-editor.org/rfc/rfc6824#section-3.2
//# +---------------+---------------+-------+-----+-+---------------+
//# |     Kind      |  Length = 16  |Subtype|     |B|   Address ID  |
//# +---------------+---------------+-------+-----+-+---------------+
//# |                                                               |
//# |                Sender's Truncated HMAC (64 bits)              |
//# |                                                               |
//# +---------------------------------------------------------------+
//# |                Sender's Random Number (32 bits)               |
//# +---------------------------------------------------------------+

/// MP_JOIN as carried on the responding SYN/ACK
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct JoinSynAck {
    pub backup: bool,
    pub addr_id: u8,
    /// The responder's truncated MAC
    pub mac: u64,
    /// The responder's random nonce
    pub nonce: u32,
}

//= https://www.rfc-editor.org/rfc/rfc6824#section-3.2
//# +---------------+---------------+-------+-----------------------+
//# |     Kind      |  Length = 24  |Subtype|      (reserved)       |
//# +---------------+---------------+-------+-----------------------+
//# |                                                               |
//# |                Sender's HMAC (160 bits)                       |
//# |                                                               |
//# +---------------------------------------------------------------+

/// MP_JOIN as carried on the final ACK of the subflow handshake
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct JoinAck {
    /// The initiator's full MAC
    pub mac: [u8; MAC_LEN],
}

decoder_parameterized_value!(
    impl<'a> Join {
        fn decode(first: Subtype, buffer: Buffer) -> Result<Self> {
            let backup = first & BACKUP_FLAG != 0;

            // remaining length after the subtype/flags octet picks the shape
            match buffer.len() + 1 {
                SYN_VALUE_LEN => {
                    let (addr_id, buffer) = buffer.decode::<u8>()?;
                    let (token, buffer) = buffer.decode::<u32>()?;
                    let (nonce, buffer) = buffer.decode::<u32>()?;
                    let join = JoinSyn {
                        backup,
                        addr_id,
                        token: Token(token),
                        nonce,
                    };
                    Ok((Join::Syn(join), buffer))
                }
                SYN_ACK_VALUE_LEN => {
                    let (addr_id, buffer) = buffer.decode::<u8>()?;
                    let (mac, buffer) = buffer.decode::<u64>()?;
                    let (nonce, buffer) = buffer.decode::<u32>()?;
                    let join = JoinSynAck {
                        backup,
                        addr_id,
                        mac,
                        nonce,
                    };
                    Ok((Join::SynAck(join), buffer))
                }
                ACK_VALUE_LEN => {
                    let (_reserved, buffer) = buffer.decode::<u8>()?;
                    let (mac, buffer) = buffer.decode_slice(MAC_LEN)?;
                    let mac: &[u8] = mac.into_less_safe_slice();
                    let mac = mac.try_into().expect("length checked by decode_slice");
                    Ok((Join::Ack(JoinAck { mac }), buffer))
                }
                _ => Err(DecoderError::InvariantViolation("invalid mp_join length")),
            }
        }
    }
);

impl EncoderValue for Join {
    fn encode<E: Encoder>(&self, buffer: &mut E) {
        match self {
            Join::Syn(syn) => {
                buffer.encode(&((MP_JOIN << 4) | (syn.backup as u8)));
                buffer.encode(&syn.addr_id);
                buffer.encode(&syn.token.0);
                buffer.encode(&syn.nonce);
            }
            Join::SynAck(syn_ack) => {
                buffer.encode(&((MP_JOIN << 4) | (syn_ack.backup as u8)));
                buffer.encode(&syn_ack.addr_id);
                buffer.encode(&syn_ack.mac);
                buffer.encode(&syn_ack.nonce);
            }
            Join::Ack(ack) => {
                buffer.encode(&(MP_JOIN << 4));
                buffer.encode(&0u8);
                buffer.encode(&ack.mac.as_ref());
            }
        }
    }
}
