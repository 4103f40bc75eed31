// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::options::{Subtype, ADD_ADDR};
use s2n_codec::{decoder_parameterized_value, DecoderError, Encoder, EncoderValue};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

//= https://www.rfc-editor.org/rfc/rfc6824#section-3.4.1
//# The ADD_ADDR option announces additional addresses (and optionally,
//# ports) on which a host can be reached.
//#
//# +---------------+---------------+-------+-------+---------------+
//# |     Kind      |     Length    |Subtype| IPVer |  Address ID   |
//# +---------------+---------------+-------+-------+---------------+
//# |          Address (IPv4 - 4 octets / IPv6 - 16 octets)         |
//# +-------------------------------+-------------------------------+
//# |   Port (2 octets, optional)   |
//# +-------------------------------+

/// An address advertisement
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AddAddr {
    /// The sender-assigned ID for the advertised address
    pub addr_id: u8,
    /// The advertised address
    pub addr: IpAddr,
    /// Advertised port; absent means "use the connection's port"
    pub port: Option<u16>,
}

const V4_ADDR_LEN: usize = 4;
const V6_ADDR_LEN: usize = 16;

decoder_parameterized_value!(
    impl<'a> AddAddr {
        fn decode(first: Subtype, buffer: Buffer) -> Result<Self> {
            let ipver = first & 0x0f;
            let (addr_id, buffer) = buffer.decode::<u8>()?;

            let (addr, buffer, with_port) = match (ipver, buffer.len()) {
                (4, len) if len == V4_ADDR_LEN || len == V4_ADDR_LEN + 2 => {
                    let (octets, buffer) = buffer.decode_slice(V4_ADDR_LEN)?;
                    let octets: &[u8] = octets.into_less_safe_slice();
                    let octets: [u8; V4_ADDR_LEN] =
                        octets.try_into().expect("length checked by decode_slice");
                    (
                        IpAddr::V4(Ipv4Addr::from(octets)),
                        buffer,
                        len == V4_ADDR_LEN + 2,
                    )
                }
                (6, len) if len == V6_ADDR_LEN || len == V6_ADDR_LEN + 2 => {
                    let (octets, buffer) = buffer.decode_slice(V6_ADDR_LEN)?;
                    let octets: &[u8] = octets.into_less_safe_slice();
                    let octets: [u8; V6_ADDR_LEN] =
                        octets.try_into().expect("length checked by decode_slice");
                    (
                        IpAddr::V6(Ipv6Addr::from(octets)),
                        buffer,
                        len == V6_ADDR_LEN + 2,
                    )
                }
                _ => return Err(DecoderError::InvariantViolation("invalid add_addr length")),
            };

            if with_port {
                let (port, buffer) = buffer.decode::<u16>()?;
                Ok((
                    AddAddr {
                        addr_id,
                        addr,
                        port: Some(port),
                    },
                    buffer,
                ))
            } else {
                Ok((
                    AddAddr {
                        addr_id,
                        addr,
                        port: None,
                    },
                    buffer,
                ))
            }
        }
    }
);

impl EncoderValue for AddAddr {
    fn encode<E: Encoder>(&self, buffer: &mut E) {
        let ipver: u8 = match self.addr {
            IpAddr::V4(_) => 4,
            IpAddr::V6(_) => 6,
        };
        buffer.encode(&((ADD_ADDR << 4) | ipver));
        buffer.encode(&self.addr_id);
        match self.addr {
            IpAddr::V4(addr) => buffer.encode(&addr.octets().as_ref()),
            IpAddr::V6(addr) => buffer.encode(&addr.octets().as_ref()),
        }
        if let Some(port) = self.port {
            buffer.encode(&port);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::{option_to_vec, MptcpOption, MPTCP_KIND};
    use s2n_codec::DecoderBuffer;

    fn decode(value: &[u8]) -> Option<AddAddr> {
        let buffer = DecoderBuffer::new(value);
        match buffer.decode::<MptcpOption>() {
            Ok((MptcpOption::AddAddr(add), _)) => Some(add),
            _ => None,
        }
    }

    #[test]
    fn v4_without_port() {
        let add = AddAddr {
            addr_id: 3,
            addr: IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2)),
            port: None,
        };
        let bytes = option_to_vec(MPTCP_KIND, &add);
        assert_eq!(bytes, [30, 8, 0x34, 3, 10, 0, 0, 2]);
        assert_eq!(decode(&bytes[2..]), Some(add));
    }

    #[test]
    fn v4_with_port() {
        let add = AddAddr {
            addr_id: 3,
            addr: IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2)),
            port: Some(8080),
        };
        let bytes = option_to_vec(MPTCP_KIND, &add);
        assert_eq!(bytes, [30, 10, 0x34, 3, 10, 0, 0, 2, 0x1f, 0x90]);
        assert_eq!(decode(&bytes[2..]), Some(add));
    }

    #[test]
    fn v6_round_trip() {
        let add = AddAddr {
            addr_id: 17,
            addr: "2001:db8::2".parse().unwrap(),
            port: Some(443),
        };
        let bytes = option_to_vec(MPTCP_KIND, &add);
        assert_eq!(bytes.len(), 22);
        assert_eq!(bytes[2], 0x36);
        assert_eq!(decode(&bytes[2..]), Some(add));
    }

    #[test]
    fn version_length_mismatch_is_rejected() {
        // claims v6 but carries a v4-sized address
        let value = [0x36u8, 3, 10, 0, 0, 2];
        assert_eq!(decode(&value), None);
    }
}
