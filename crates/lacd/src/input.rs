//! Control parser: classifies inbound frames and feeds LACPDUs to the
//! engine.

use crate::debug::{lac_event, DebugCategory};
use crate::engine::LacEngine;
use lac_types::{
    Lacpdu, MacAddress, PduError, ETHERTYPE_SLOW_PROTOCOLS, ETH_HEADER_LEN, LACP_SUBTYPE,
};

/// What an inbound frame is, judged from its header alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    /// Slow-protocols frame with the LACP subtype, to the LACP group
    /// address.
    Lacpdu,
    /// Any other slow-protocols frame, Marker included.
    SlowProtocol(u8),
    Data,
    /// Too short to carry an Ethernet header.
    Runt,
}

pub fn classify(frame: &[u8]) -> FrameKind {
    if frame.len() <= ETH_HEADER_LEN {
        return FrameKind::Runt;
    }
    let ethertype = u16::from_be_bytes([frame[12], frame[13]]);
    if ethertype != ETHERTYPE_SLOW_PROTOCOLS {
        return FrameKind::Data;
    }
    let subtype = frame[ETH_HEADER_LEN];
    let to_group = MacAddress::from_slice(frame) == Some(MacAddress::SLOW_PROTOCOLS);
    if subtype == LACP_SUBTYPE && to_group {
        FrameKind::Lacpdu
    } else {
        FrameKind::SlowProtocol(subtype)
    }
}

/// Source address of `frame` if it is a valid station address.
pub(crate) fn valid_source(frame: &[u8]) -> Option<MacAddress> {
    frame
        .get(6..12)
        .and_then(MacAddress::from_slice)
        .filter(MacAddress::is_valid_station)
}

/// Outcome of [`LacEngine::receive_control`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RxDisposition {
    /// A valid LACPDU was fed to the port's machines.
    Consumed,
    Dropped(DropReason),
    /// The link is not bound to the aggregation subsystem.
    NotBound,
    /// Not a slow-protocols frame.
    NotControl,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DropReason {
    InvalidSource,
    Malformed(PduError),
    /// The LACPDU carries our own system id.
    Loopback,
    UnknownSubtype(u8),
}

impl LacEngine {
    /// Handles a slow-protocols frame received on `link`.
    ///
    /// Malformed or foreign frames are dropped and counted, never
    /// surfaced as errors.
    pub fn receive_control(&mut self, link: &str, frame: &[u8]) -> RxDisposition {
        let Some(port_no) = self.port_by_link(link).map(|p| p.port_no) else {
            return RxDisposition::NotBound;
        };
        if valid_source(frame).is_none() {
            return self.drop_control(port_no, DropReason::InvalidSource);
        }

        match classify(frame) {
            FrameKind::Lacpdu => {}
            FrameKind::SlowProtocol(subtype) => {
                return self.drop_control(port_no, DropReason::UnknownSubtype(subtype));
            }
            FrameKind::Data | FrameKind::Runt => return RxDisposition::NotControl,
        }

        let pdu = match Lacpdu::decode(frame) {
            Ok(pdu) => pdu,
            Err(e) => return self.drop_control(port_no, DropReason::Malformed(e)),
        };
        if pdu.actor.system_id == self.system.system_id {
            return self.drop_control(port_no, DropReason::Loopback);
        }

        if let Some(port) = self.ports.get_mut(&port_no) {
            port.stats.lacpdu_rx += 1;
        }
        self.lac_rx(port_no, pdu);
        RxDisposition::Consumed
    }

    fn drop_control(&mut self, port_no: u16, reason: DropReason) -> RxDisposition {
        if let Some(port) = self.ports.get_mut(&port_no) {
            match reason {
                DropReason::UnknownSubtype(_) => port.stats.unknown_rx += 1,
                _ => port.stats.illegal_rx += 1,
            }
        }
        lac_event!(
            self.debug.enabled(DebugCategory::Rx, port_no),
            port = port_no,
            ?reason,
            "control frame dropped"
        );
        RxDisposition::Dropped(reason)
    }
}
