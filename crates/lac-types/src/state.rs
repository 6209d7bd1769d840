//! The LACP actor/partner state octet.

use serde::{Deserialize, Serialize};

const ACTIVITY: u8 = 1 << 0;
const TIMEOUT: u8 = 1 << 1;
const AGGREGATION: u8 = 1 << 2;
const SYNCHRONIZATION: u8 = 1 << 3;
const COLLECTING: u8 = 1 << 4;
const DISTRIBUTING: u8 = 1 << 5;
const DEFAULTED: u8 = 1 << 6;
const EXPIRED: u8 = 1 << 7;

/// The eight named flags carried in an actor or partner state octet.
///
/// In memory each flag is a plain `bool`; bit positions only matter on the
/// wire, see [`LacState::to_wire`] and [`LacState::from_wire`].
///
/// `timeout` follows the IEEE encoding: `true` means short timeout.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LacState {
    /// Active (true) or passive (false) LACP mode.
    pub activity: bool,
    /// Short (true) or long (false) timeout.
    pub timeout: bool,
    pub aggregation: bool,
    pub synchronization: bool,
    pub collecting: bool,
    pub distributing: bool,
    pub defaulted: bool,
    pub expired: bool,
}

impl LacState {
    /// Decodes a state octet as found in an LACPDU.
    pub const fn from_wire(octet: u8) -> Self {
        LacState {
            activity: octet & ACTIVITY != 0,
            timeout: octet & TIMEOUT != 0,
            aggregation: octet & AGGREGATION != 0,
            synchronization: octet & SYNCHRONIZATION != 0,
            collecting: octet & COLLECTING != 0,
            distributing: octet & DISTRIBUTING != 0,
            defaulted: octet & DEFAULTED != 0,
            expired: octet & EXPIRED != 0,
        }
    }

    /// Encodes the flags into a state octet.
    pub const fn to_wire(self) -> u8 {
        let mut octet = 0;
        if self.activity {
            octet |= ACTIVITY;
        }
        if self.timeout {
            octet |= TIMEOUT;
        }
        if self.aggregation {
            octet |= AGGREGATION;
        }
        if self.synchronization {
            octet |= SYNCHRONIZATION;
        }
        if self.collecting {
            octet |= COLLECTING;
        }
        if self.distributing {
            octet |= DISTRIBUTING;
        }
        if self.defaulted {
            octet |= DEFAULTED;
        }
        if self.expired {
            octet |= EXPIRED;
        }
        octet
    }

    pub const fn is_short_timeout(&self) -> bool {
        self.timeout
    }
}

impl std::fmt::Display for LacState {
    /// Renders the set flags as single letters, IEEE order, `-` for clear.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let flags = [
            (self.activity, 'A'),
            (self.timeout, 'T'),
            (self.aggregation, 'G'),
            (self.synchronization, 'S'),
            (self.collecting, 'C'),
            (self.distributing, 'D'),
            (self.defaulted, 'F'),
            (self.expired, 'E'),
        ];
        for (set, letter) in flags {
            write!(f, "{}", if set { letter } else { '-' })?;
        }
        Ok(())
    }
}
