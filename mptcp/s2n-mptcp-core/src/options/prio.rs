// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::options::{Subtype, MP_PRIO};
use s2n_codec::{decoder_parameterized_value, DecoderError, Encoder, EncoderValue};

//= https://www.rfc-editor.org/rfc/rfc6824#section-3.3.8
//# The MP_PRIO option ... can be used to set this flag dynamically,
//# saying that a subflow has become, or stopped being, a backup path.
//#
//# +---------------+---------------+-------+-----+-+--------------+
//# |     Kind      |     Length    |Subtype|     |B| AddrID (opt) |
//# +---------------+---------------+-------+-----+-+--------------+

const BACKUP_FLAG: u8 = 0x01;

/// A change of a subflow's backup priority
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Prio {
    /// The new backup state
    pub backup: bool,
    /// Address ID of the affected subflow; absent means "this subflow"
    pub addr_id: Option<u8>,
}

decoder_parameterized_value!(
    impl<'a> Prio {
        fn decode(first: Subtype, buffer: Buffer) -> Result<Self> {
            let backup = first & BACKUP_FLAG != 0;
            match buffer.len() {
                0 => Ok((
                    Prio {
                        backup,
                        addr_id: None,
                    },
                    buffer,
                )),
                1 => {
                    let (addr_id, buffer) = buffer.decode::<u8>()?;
                    Ok((
                        Prio {
                            backup,
                            addr_id: Some(addr_id),
                        },
                        buffer,
                    ))
                }
                _ => Err(DecoderError::InvariantViolation("invalid mp_prio length")),
            }
        }
    }
);

impl EncoderValue for Prio {
    fn encode<E: Encoder>(&self, buffer: &mut E) {
        buffer.encode(&((MP_PRIO << 4) | (self.backup as u8)));
        if let Some(addr_id) = self.addr_id {
            buffer.encode(&addr_id);
        }
    }
}
