//! Physical link descriptors sampled from the device layer.

use crate::ParseError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Link speeds that contribute a bit to the operational LACP key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum LinkSpeed {
    Mb10,
    Mb100,
    Mb1000,
    Mb10000,
}

impl LinkSpeed {
    /// Bit OR-ed into the administrative key to form the operational key.
    pub const fn key_bits(self) -> u16 {
        match self {
            LinkSpeed::Mb10 => 0x1000,
            LinkSpeed::Mb100 => 0x2000,
            LinkSpeed::Mb1000 => 0x4000,
            LinkSpeed::Mb10000 => 0x8000,
        }
    }

    /// Maps a speed in Mb/s; unlisted speeds yield `None`.
    pub const fn from_mbps(mbps: u32) -> Option<Self> {
        match mbps {
            10 => Some(LinkSpeed::Mb10),
            100 => Some(LinkSpeed::Mb100),
            1000 => Some(LinkSpeed::Mb1000),
            10000 => Some(LinkSpeed::Mb10000),
            _ => None,
        }
    }

    pub const fn mbps(self) -> u32 {
        match self {
            LinkSpeed::Mb10 => 10,
            LinkSpeed::Mb100 => 100,
            LinkSpeed::Mb1000 => 1000,
            LinkSpeed::Mb10000 => 10000,
        }
    }
}

impl fmt::Display for LinkSpeed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkSpeed::Mb10000 => write!(f, "10G"),
            LinkSpeed::Mb1000 => write!(f, "1G"),
            other => write!(f, "{}M", other.mbps()),
        }
    }
}

impl FromStr for LinkSpeed {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "10M" | "10" => Ok(LinkSpeed::Mb10),
            "100M" | "100" => Ok(LinkSpeed::Mb100),
            "1G" | "1000M" | "1000" => Ok(LinkSpeed::Mb1000),
            "10G" | "10000M" | "10000" => Ok(LinkSpeed::Mb10000),
            _ => Err(ParseError::InvalidLinkSpeed(s.to_string())),
        }
    }
}

impl TryFrom<String> for LinkSpeed {
    type Error = ParseError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<LinkSpeed> for String {
    fn from(speed: LinkSpeed) -> String {
        speed.to_string()
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Duplex {
    Half,
    #[default]
    Full,
}

impl FromStr for Duplex {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "half" => Ok(Duplex::Half),
            "full" => Ok(Duplex::Full),
            _ => Err(ParseError::InvalidDuplex(s.to_string())),
        }
    }
}

/// One sample of a physical link's carrier, speed and duplex.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkInfo {
    pub carrier: bool,
    pub speed: Option<LinkSpeed>,
    pub duplex: Duplex,
}

impl LinkInfo {
    pub const fn up(speed: LinkSpeed) -> Self {
        LinkInfo {
            carrier: true,
            speed: Some(speed),
            duplex: Duplex::Full,
        }
    }

    pub const fn down() -> Self {
        LinkInfo {
            carrier: false,
            speed: None,
            duplex: Duplex::Full,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_key_bits() {
        assert_eq!(LinkSpeed::Mb10.key_bits(), 0x1000);
        assert_eq!(LinkSpeed::Mb100.key_bits(), 0x2000);
        assert_eq!(LinkSpeed::Mb1000.key_bits(), 0x4000);
        assert_eq!(LinkSpeed::Mb10000.key_bits(), 0x8000);
    }

    #[test]
    fn test_speed_parse() {
        assert_eq!("1g".parse::<LinkSpeed>().unwrap(), LinkSpeed::Mb1000);
        assert_eq!("100M".parse::<LinkSpeed>().unwrap(), LinkSpeed::Mb100);
        assert_eq!(LinkSpeed::from_mbps(25000), None);
        assert!("40G".parse::<LinkSpeed>().is_err());
        assert_eq!(LinkSpeed::Mb10000.to_string(), "10G");
    }

    #[test]
    fn test_duplex_parse() {
        assert_eq!("HALF".parse::<Duplex>().unwrap(), Duplex::Half);
        assert_eq!(Duplex::default(), Duplex::Full);
        assert!("auto".parse::<Duplex>().is_err());
    }
}
