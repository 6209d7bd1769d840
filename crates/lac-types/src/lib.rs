//! Wire and value types for IEEE 802.3ad link aggregation.
//!
//! This crate holds the pieces of LACP that do not depend on any engine
//! state:
//!
//! - [`MacAddress`]: 48-bit Ethernet addresses, also used as LACP system ids
//! - [`LacState`]: the eight named bits of an actor/partner state octet
//! - [`LacInfo`]: the actor/partner information record
//! - [`Lacpdu`]: encoding and decoding of LACPDU frames
//! - [`LinkInfo`], [`LinkSpeed`], [`Duplex`]: sampled physical link status

mod info;
mod link;
mod mac;
mod pdu;
mod state;

pub use info::LacInfo;
pub use link::{Duplex, LinkInfo, LinkSpeed};
pub use mac::MacAddress;
pub use pdu::{
    Lacpdu, PduError, ETHERTYPE_IPV4, ETHERTYPE_SLOW_PROTOCOLS, ETH_HEADER_LEN, LACPDU_FRAME_LEN,
    LACP_SUBTYPE, LACP_VERSION, MARKER_SUBTYPE,
};
pub use state::LacState;

/// Common error type for parsing failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("invalid MAC address format: {0}")]
    InvalidMacAddress(String),

    #[error("invalid link speed: {0}")]
    InvalidLinkSpeed(String),

    #[error("invalid duplex mode: {0}")]
    InvalidDuplex(String),
}
