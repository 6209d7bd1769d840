//! LACPDU frame codec.
//!
//! Offsets are from the start of the Ethernet frame:
//!
//! ```text
//!  0  destination (01:80:c2:00:00:02)   36  partner TLV (0x02, 0x14)
//!  6  source                            38    .. same layout as actor
//! 12  ethertype 0x8809                  56  collector TLV (0x03, 0x10)
//! 14  subtype 0x01                      58    max delay, 12 reserved
//! 15  version 0x01                      72  terminator TLV (0x00, 0x00)
//! 16  actor TLV (0x01, 0x14)            74  50 reserved octets
//! 18    system priority, system id,
//!       key, port priority, port,
//!       state, 3 reserved
//! ```

use crate::{LacInfo, LacState, MacAddress};
use byteorder::{BigEndian, ByteOrder};
use serde::{Deserialize, Serialize};

pub const ETH_HEADER_LEN: usize = 14;
pub const ETHERTYPE_SLOW_PROTOCOLS: u16 = 0x8809;
pub const ETHERTYPE_IPV4: u16 = 0x0800;
pub const LACP_SUBTYPE: u8 = 0x01;
pub const MARKER_SUBTYPE: u8 = 0x02;
pub const LACP_VERSION: u8 = 0x01;

/// Length of an encoded frame: header, 110-octet LACPDU.
pub const LACPDU_FRAME_LEN: usize = ETH_HEADER_LEN + 110;

const SUBTYPE: usize = 14;
const VERSION: usize = 15;
const ACTOR_TLV: usize = 16;
const PARTNER_TLV: usize = 36;
const COLLECTOR_TLV: usize = 56;
const TERMINATOR_TLV: usize = 72;

const TLV_ACTOR: u8 = 0x01;
const TLV_PARTNER: u8 = 0x02;
const TLV_COLLECTOR: u8 = 0x03;
const TLV_TERMINATOR: u8 = 0x00;
const INFO_TLV_LEN: u8 = 0x14;
const COLLECTOR_TLV_LEN: u8 = 0x10;

/// Bytes that must be present for the decoder to read every field.
const MIN_DECODE_LEN: usize = TERMINATOR_TLV + 2;

/// Why a frame was refused by [`Lacpdu::decode`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PduError {
    #[error("frame too short for an LACPDU: {len} bytes")]
    Truncated { len: usize },

    #[error("not a slow-protocols frame: ethertype {0:#06x}")]
    NotSlowProtocols(u16),

    #[error("slow-protocols subtype {0} is not LACP")]
    UnknownSubtype(u8),

    #[error("unsupported LACP version {0}")]
    UnsupportedVersion(u8),

    #[error("malformed TLV at offset {offset}: type {tlv_type:#04x}, length {length}")]
    MalformedTlv {
        offset: usize,
        tlv_type: u8,
        length: u8,
    },
}

/// The protocol content of one LACPDU.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lacpdu {
    pub actor: LacInfo,
    pub partner: LacInfo,
    pub collector_max_delay: u16,
}

impl Lacpdu {
    /// Builds a complete Ethernet frame addressed to the slow-protocols
    /// group, sourced from `source`.
    pub fn encode(&self, source: MacAddress) -> Vec<u8> {
        let mut frame = vec![0u8; LACPDU_FRAME_LEN];
        frame[0..6].copy_from_slice(MacAddress::SLOW_PROTOCOLS.as_bytes());
        frame[6..12].copy_from_slice(source.as_bytes());
        BigEndian::write_u16(&mut frame[12..14], ETHERTYPE_SLOW_PROTOCOLS);
        frame[SUBTYPE] = LACP_SUBTYPE;
        frame[VERSION] = LACP_VERSION;

        write_info_tlv(&mut frame[ACTOR_TLV..PARTNER_TLV], TLV_ACTOR, &self.actor);
        write_info_tlv(&mut frame[PARTNER_TLV..COLLECTOR_TLV], TLV_PARTNER, &self.partner);

        frame[COLLECTOR_TLV] = TLV_COLLECTOR;
        frame[COLLECTOR_TLV + 1] = COLLECTOR_TLV_LEN;
        BigEndian::write_u16(
            &mut frame[COLLECTOR_TLV + 2..COLLECTOR_TLV + 4],
            self.collector_max_delay,
        );

        frame[TERMINATOR_TLV] = TLV_TERMINATOR;
        frame[TERMINATOR_TLV + 1] = 0;
        frame
    }

    /// Parses a full Ethernet frame. Every field offset is bounds checked
    /// before it is read.
    pub fn decode(frame: &[u8]) -> Result<Self, PduError> {
        if frame.len() < MIN_DECODE_LEN {
            return Err(PduError::Truncated { len: frame.len() });
        }
        let ethertype = BigEndian::read_u16(&frame[12..14]);
        if ethertype != ETHERTYPE_SLOW_PROTOCOLS {
            return Err(PduError::NotSlowProtocols(ethertype));
        }
        if frame[SUBTYPE] != LACP_SUBTYPE {
            return Err(PduError::UnknownSubtype(frame[SUBTYPE]));
        }
        if frame[VERSION] != LACP_VERSION {
            return Err(PduError::UnsupportedVersion(frame[VERSION]));
        }

        expect_tlv(frame, ACTOR_TLV, TLV_ACTOR, INFO_TLV_LEN)?;
        expect_tlv(frame, PARTNER_TLV, TLV_PARTNER, INFO_TLV_LEN)?;
        expect_tlv(frame, COLLECTOR_TLV, TLV_COLLECTOR, COLLECTOR_TLV_LEN)?;
        expect_tlv(frame, TERMINATOR_TLV, TLV_TERMINATOR, 0)?;

        Ok(Lacpdu {
            actor: read_info(&frame[ACTOR_TLV + 2..PARTNER_TLV]),
            partner: read_info(&frame[PARTNER_TLV + 2..COLLECTOR_TLV]),
            collector_max_delay: BigEndian::read_u16(&frame[COLLECTOR_TLV + 2..COLLECTOR_TLV + 4]),
        })
    }
}

fn write_info_tlv(tlv: &mut [u8], tlv_type: u8, info: &LacInfo) {
    tlv[0] = tlv_type;
    tlv[1] = INFO_TLV_LEN;
    BigEndian::write_u16(&mut tlv[2..4], info.system_priority);
    tlv[4..10].copy_from_slice(info.system_id.as_bytes());
    BigEndian::write_u16(&mut tlv[10..12], info.key);
    BigEndian::write_u16(&mut tlv[12..14], info.port_priority);
    BigEndian::write_u16(&mut tlv[14..16], info.port_no);
    tlv[16] = info.state.to_wire();
}

/// Reads the 18 octets following a TLV header.
fn read_info(body: &[u8]) -> LacInfo {
    let mut system_id = [0u8; 6];
    system_id.copy_from_slice(&body[2..8]);
    LacInfo {
        system_priority: BigEndian::read_u16(&body[0..2]),
        system_id: MacAddress::new(system_id),
        key: BigEndian::read_u16(&body[8..10]),
        port_priority: BigEndian::read_u16(&body[10..12]),
        port_no: BigEndian::read_u16(&body[12..14]),
        state: LacState::from_wire(body[14]),
    }
}

fn expect_tlv(frame: &[u8], offset: usize, tlv_type: u8, length: u8) -> Result<(), PduError> {
    let (found_type, found_len) = (frame[offset], frame[offset + 1]);
    if found_type != tlv_type || found_len != length {
        return Err(PduError::MalformedTlv {
            offset,
            tlv_type: found_type,
            length: found_len,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn sample() -> Lacpdu {
        Lacpdu {
            actor: LacInfo {
                system_priority: 0x8000,
                system_id: MacAddress::new([0x00, 0x1b, 0x21, 0x01, 0x02, 0x03]),
                key: 0x4001,
                port_priority: 0x8000,
                port_no: 2,
                state: LacState::from_wire(0x3d),
            },
            partner: LacInfo {
                system_priority: 0x0100,
                system_id: MacAddress::new([0x00, 0x1b, 0x21, 0x0a, 0x0b, 0x0c]),
                key: 0x4007,
                port_priority: 0x0080,
                port_no: 9,
                state: LacState::from_wire(0x47),
            },
            collector_max_delay: 5,
        }
    }

    #[test]
    fn test_encode_layout() {
        let source = MacAddress::new([0x00, 0x1b, 0x21, 0x01, 0x02, 0x03]);
        let frame = sample().encode(source);

        assert_eq!(frame.len(), LACPDU_FRAME_LEN);
        assert_eq!(&frame[0..6], &[0x01, 0x80, 0xc2, 0x00, 0x00, 0x02]);
        assert_eq!(&frame[6..12], source.as_bytes());
        assert_eq!(&frame[12..16], &[0x88, 0x09, 0x01, 0x01]);
        assert_eq!(&frame[16..18], &[0x01, 0x14]);
        assert_eq!(&frame[26..28], &[0x40, 0x01]);
        assert_eq!(frame[32], 0x3d);
        assert_eq!(&frame[36..38], &[0x02, 0x14]);
        assert_eq!(&frame[50..52], &[0x00, 0x09]);
        assert_eq!(frame[52], 0x47);
        assert_eq!(&frame[56..60], &[0x03, 0x10, 0x00, 0x05]);
        assert_eq!(&frame[72..74], &[0x00, 0x00]);
        assert!(frame[74..].iter().all(|b| *b == 0));
    }

    #[test]
    fn test_decode_reproduces_fields() {
        let pdu = sample();
        let decoded = Lacpdu::decode(&pdu.encode(MacAddress::new([2, 0, 0, 0, 0, 1]))).unwrap();
        assert_eq!(decoded, pdu);
    }

    #[test]
    fn test_decode_accepts_minimum_length() {
        let frame = sample().encode(MacAddress::new([2, 0, 0, 0, 0, 1]));
        assert!(Lacpdu::decode(&frame[..MIN_DECODE_LEN]).is_ok());
        assert_eq!(
            Lacpdu::decode(&frame[..MIN_DECODE_LEN - 1]),
            Err(PduError::Truncated {
                len: MIN_DECODE_LEN - 1
            })
        );
    }

    #[test]
    fn test_decode_rejects_foreign_frames() {
        let good = sample().encode(MacAddress::new([2, 0, 0, 0, 0, 1]));

        let mut frame = good.clone();
        frame[12] = 0x08;
        frame[13] = 0x00;
        assert_eq!(
            Lacpdu::decode(&frame),
            Err(PduError::NotSlowProtocols(0x0800))
        );

        let mut frame = good.clone();
        frame[SUBTYPE] = MARKER_SUBTYPE;
        assert_eq!(Lacpdu::decode(&frame), Err(PduError::UnknownSubtype(2)));

        let mut frame = good.clone();
        frame[VERSION] = 2;
        assert_eq!(Lacpdu::decode(&frame), Err(PduError::UnsupportedVersion(2)));

        let mut frame = good;
        frame[PARTNER_TLV + 1] = 0x10;
        assert!(matches!(
            Lacpdu::decode(&frame),
            Err(PduError::MalformedTlv { offset: 36, .. })
        ));
    }
}
