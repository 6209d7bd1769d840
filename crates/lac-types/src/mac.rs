//! Ethernet MAC addresses and LACP system identifiers.

use crate::ParseError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A 48-bit Ethernet MAC address.
///
/// LACP reuses the same six octets as the system identifier, so the type
/// orders lexicographically: the aggregator address is the smallest member
/// address.
///
/// # Examples
///
/// ```
/// use lac_types::MacAddress;
///
/// let mac: MacAddress = "00:11:22:33:44:55".parse().unwrap();
/// assert_eq!(mac.to_string(), "00:11:22:33:44:55");
/// assert!(MacAddress::SLOW_PROTOCOLS.is_multicast());
/// ```
#[derive(
    Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(try_from = "String", into = "String")]
pub struct MacAddress([u8; 6]);

impl MacAddress {
    /// The all-zero address, used for "no system id" and empty aggregators.
    pub const ZERO: MacAddress = MacAddress([0; 6]);

    /// Slow-protocols multicast group (01:80:C2:00:00:02).
    pub const SLOW_PROTOCOLS: MacAddress = MacAddress([0x01, 0x80, 0xc2, 0x00, 0x00, 0x02]);

    pub const fn new(bytes: [u8; 6]) -> Self {
        MacAddress(bytes)
    }

    /// Reads an address from the first six bytes of `bytes`.
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let octets: [u8; 6] = bytes.get(..6)?.try_into().ok()?;
        Some(MacAddress(octets))
    }

    pub const fn as_bytes(&self) -> &[u8; 6] {
        &self.0
    }

    /// Returns true if the group bit of the first octet is set.
    pub const fn is_multicast(&self) -> bool {
        self.0[0] & 0x01 != 0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0; 6]
    }

    /// Returns true if the address may appear as a frame source: unicast
    /// and not all zeros.
    pub fn is_valid_station(&self) -> bool {
        !self.is_multicast() && !self.is_zero()
    }

    /// The last four octets as a little-endian word, the input of the
    /// MAC distribution hash.
    pub fn tail_word(&self) -> u32 {
        u32::from_le_bytes([self.0[2], self.0[3], self.0[4], self.0[5]])
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = &self.0;
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            b[0], b[1], b[2], b[3], b[4], b[5]
        )
    }
}

impl FromStr for MacAddress {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ParseError::InvalidMacAddress(s.to_string());
        let separator = if s.contains('-') { '-' } else { ':' };

        let mut bytes = [0u8; 6];
        let mut parts = s.split(separator);
        for byte in bytes.iter_mut() {
            let part = parts.next().ok_or_else(invalid)?;
            if part.is_empty() || part.len() > 2 {
                return Err(invalid());
            }
            *byte = u8::from_str_radix(part, 16).map_err(|_| invalid())?;
        }
        if parts.next().is_some() {
            return Err(invalid());
        }

        Ok(MacAddress(bytes))
    }
}

impl TryFrom<String> for MacAddress {
    type Error = ParseError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<MacAddress> for String {
    fn from(mac: MacAddress) -> String {
        mac.to_string()
    }
}

impl From<[u8; 6]> for MacAddress {
    fn from(bytes: [u8; 6]) -> Self {
        MacAddress(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_and_display() {
        let mac: MacAddress = "00:1b:21:0a:ff:02".parse().unwrap();
        assert_eq!(mac.as_bytes(), &[0x00, 0x1b, 0x21, 0x0a, 0xff, 0x02]);
        assert_eq!(mac.to_string(), "00:1b:21:0a:ff:02");

        let hyphen: MacAddress = "00-1B-21-0A-FF-02".parse().unwrap();
        assert_eq!(mac, hyphen);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!("00:11:22:33:44".parse::<MacAddress>().is_err());
        assert!("00:11:22:33:44:55:66".parse::<MacAddress>().is_err());
        assert!("00:11:22:33:44:zz".parse::<MacAddress>().is_err());
        assert!("00:11:22:33:44:555".parse::<MacAddress>().is_err());
        assert!("".parse::<MacAddress>().is_err());
    }

    #[test]
    fn test_station_validity() {
        assert!(!MacAddress::ZERO.is_valid_station());
        assert!(!MacAddress::SLOW_PROTOCOLS.is_valid_station());
        assert!(MacAddress::new([0x00, 0x11, 0x22, 0x33, 0x44, 0x55]).is_valid_station());
    }

    #[test]
    fn test_ordering_picks_lowest_address() {
        let a = MacAddress::new([0x00, 0x11, 0x22, 0x33, 0x44, 0x56]);
        let b = MacAddress::new([0x00, 0x11, 0x22, 0x33, 0x44, 0x55]);
        assert_eq!([a, b].into_iter().min(), Some(b));
    }

    #[test]
    fn test_from_slice() {
        let frame = [1, 2, 3, 4, 5, 6, 7];
        assert_eq!(
            MacAddress::from_slice(&frame),
            Some(MacAddress::new([1, 2, 3, 4, 5, 6]))
        );
        assert_eq!(MacAddress::from_slice(&frame[..5]), None);
    }

    #[test]
    fn test_tail_word() {
        let mac = MacAddress::new([0xaa, 0xbb, 0x01, 0x02, 0x03, 0x04]);
        assert_eq!(mac.tail_word(), 0x0403_0201);
    }

    #[test]
    fn test_string_round_trip() {
        let mac = MacAddress::new([0x02, 0, 0, 0, 0, 0x01]);
        let text = String::from(mac);
        assert_eq!(text, "02:00:00:00:00:01");
        assert_eq!(MacAddress::try_from(text).unwrap(), mac);
    }
}
