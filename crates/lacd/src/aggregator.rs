//! Aggregator model: the logical interface of a link aggregation group.

use crate::distribution::Distributor;
use lac_types::MacAddress;
use std::sync::Arc;

/// A link aggregation group.
///
/// Membership is a list of port numbers; ports refer back by aggregator
/// number, so neither side owns the other.
#[derive(Debug, Clone)]
pub struct Aggregator {
    pub(crate) aggr_no: u16,
    pub(crate) name: String,
    /// Operational key; 0 means the aggregator is free.
    pub(crate) key: u16,
    pub(crate) ready: bool,
    pub(crate) members: Vec<u16>,
    pub(crate) mac: MacAddress,
    /// Member address chosen administratively, kept while that member
    /// stays.
    pub(crate) mac_override: Option<MacAddress>,
    pub(crate) admin_up: bool,
    pub(crate) distributor: Arc<Distributor>,
}

impl Aggregator {
    pub fn new(aggr_no: u16, name: impl Into<String>) -> Self {
        Aggregator {
            aggr_no,
            name: name.into(),
            key: 0,
            ready: false,
            members: Vec::new(),
            mac: MacAddress::ZERO,
            mac_override: None,
            admin_up: false,
            distributor: Arc::new(Distributor::new()),
        }
    }

    pub fn aggr_no(&self) -> u16 {
        self.aggr_no
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn key(&self) -> u16 {
        self.key
    }

    /// Unkeyed and without members.
    pub fn is_free(&self) -> bool {
        self.key == 0 && self.members.is_empty()
    }

    pub fn is_ready(&self) -> bool {
        self.ready
    }

    pub fn mac(&self) -> MacAddress {
        self.mac
    }

    pub fn is_admin_up(&self) -> bool {
        self.admin_up
    }

    /// Member ports, most recently attached first.
    pub fn members(&self) -> &[u16] {
        &self.members
    }

    pub fn link_count(&self) -> usize {
        self.members.len()
    }

    pub fn contains(&self, port_no: u16) -> bool {
        self.members.contains(&port_no)
    }

    pub fn distributor(&self) -> &Arc<Distributor> {
        &self.distributor
    }

    pub(crate) fn add_member(&mut self, port_no: u16) {
        if !self.contains(port_no) {
            self.members.insert(0, port_no);
        }
    }

    /// Removes `port_no`; an emptied aggregator becomes free and unready.
    pub(crate) fn remove_member(&mut self, port_no: u16) -> bool {
        let before = self.members.len();
        self.members.retain(|p| *p != port_no);
        let removed = self.members.len() != before;
        if self.members.is_empty() {
            self.key = 0;
            self.ready = false;
            self.mac = MacAddress::ZERO;
            self.mac_override = None;
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_membership() {
        let mut agg = Aggregator::new(1, "aggr0");
        assert!(agg.is_free());

        agg.key = 0x4001;
        agg.add_member(3);
        agg.add_member(5);
        agg.add_member(3);
        assert_eq!(agg.members(), &[5, 3]);
        assert_eq!(agg.link_count(), 2);

        assert!(agg.remove_member(5));
        assert!(!agg.remove_member(5));
        assert_eq!(agg.key(), 0x4001);

        assert!(agg.remove_member(3));
        assert!(agg.is_free());
        assert_eq!(agg.link_count(), 0);
    }
}
