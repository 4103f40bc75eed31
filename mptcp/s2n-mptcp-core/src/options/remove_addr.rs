// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::options::{Subtype, REMOVE_ADDR};
use s2n_codec::{decoder_invariant, decoder_parameterized_value, Encoder, EncoderValue};

//= https://www.rfc-editor.org/rfc/rfc6824#section-3.4.2
//# If, during the lifetime of an MPTCP connection, a previously
//# announced address becomes invalid (e.g., if the interface disappears),
//# the affected host SHOULD announce this so that the peer can remove
//# subflows related to this address.
//#
//# +---------------+---------------+-------+-------+---------------+
//# |     Kind      |  Length = 3+n |Subtype|(resvd)|   Address ID  | ...
//# +---------------+---------------+-------+-------+---------------+
//#                            (followed by n-1 Address IDs, if required)

/// Withdrawal of one or more previously advertised address IDs
#[derive(Debug, PartialEq, Eq)]
pub struct RemoveAddr<'a> {
    ids: &'a [u8],
}

impl<'a> RemoveAddr<'a> {
    pub fn new(ids: &'a [u8]) -> Self {
        debug_assert!(!ids.is_empty());
        Self { ids }
    }

    pub fn ids(&self) -> &'a [u8] {
        self.ids
    }
}

decoder_parameterized_value!(
    impl<'a> RemoveAddr<'a> {
        fn decode(_first: Subtype, buffer: Buffer) -> Result<Self> {
            decoder_invariant!(!buffer.is_empty(), "remove_addr carries no ids");
            let len = buffer.len();
            let (ids, buffer) = buffer.decode_slice(len)?;
            let ids: &[u8] = ids.into_less_safe_slice();
            Ok((RemoveAddr { ids }, buffer))
        }
    }
);

impl EncoderValue for RemoveAddr<'_> {
    fn encode<E: Encoder>(&self, buffer: &mut E) {
        buffer.encode(&(REMOVE_ADDR << 4));
        buffer.encode(&self.ids);
    }
}
