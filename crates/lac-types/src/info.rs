//! Actor/partner information record.

use crate::{LacState, MacAddress};
use serde::{Deserialize, Serialize};

/// The information one side of an LACP conversation announces about a
/// port: who owns it, how it is keyed and what state it is in.
///
/// The same shape is used for the local actor, the remote partner, and the
/// two TLVs of an LACPDU.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LacInfo {
    pub system_priority: u16,
    pub system_id: MacAddress,
    pub key: u16,
    pub port_priority: u16,
    pub port_no: u16,
    pub state: LacState,
}

impl LacInfo {
    /// Returns true if both records describe the same link end: identical
    /// port, port priority, system, system priority and key, and the same
    /// aggregation bit.
    pub fn same_link(&self, other: &LacInfo) -> bool {
        self.port_no == other.port_no
            && self.port_priority == other.port_priority
            && self.system_id == other.system_id
            && self.system_priority == other.system_priority
            && self.key == other.key
            && self.state.aggregation == other.state.aggregation
    }

    /// [`same_link`](Self::same_link), also requiring equal activity,
    /// timeout and synchronization bits.
    pub fn same_link_ext(&self, other: &LacInfo) -> bool {
        self.same_link(other)
            && self.state.activity == other.state.activity
            && self.state.timeout == other.state.timeout
            && self.state.synchronization == other.state.synchronization
    }

    /// Returns true if both records name the same port of the same system.
    pub fn same_port(&self, other: &LacInfo) -> bool {
        self.port_no == other.port_no && self.system_id == other.system_id
    }
}
