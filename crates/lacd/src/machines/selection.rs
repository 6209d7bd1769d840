//! Selection logic: which aggregator a port may join.

use crate::engine::LacEngine;
use crate::port::{Port, Selected};
use tracing::debug;

impl LacEngine {
    /// Checks whether `port_no` may stay in (or join) `aggregator`.
    ///
    /// Only the first other selected member is compared; an aggregator
    /// without selected members accepts any port.
    pub(crate) fn verify_aggregator(&self, aggregator: Option<u16>, port_no: u16) -> bool {
        let Some(agg) = aggregator.and_then(|a| self.aggregators.get(&a)) else {
            return false;
        };
        if agg.key == 0 {
            return false;
        }
        let Some(port) = self.ports.get(&port_no) else {
            return false;
        };

        let first_selected = agg
            .members
            .iter()
            .filter(|p| **p != port_no)
            .filter_map(|p| self.ports.get(p))
            .find(|p| p.selected == Selected::Selected);

        match first_selected {
            Some(member) => aggregable(member, port) && !self.partners_loop(agg.aggr_no, port),
            None => true,
        }
    }

    /// True if a member of the aggregator is this port's partner, i.e. the
    /// link loops back into the same group.
    fn partners_loop(&self, aggr_no: u16, port: &Port) -> bool {
        let Some(agg) = self.aggregators.get(&aggr_no) else {
            return false;
        };
        agg.members
            .iter()
            .filter_map(|p| self.ports.get(p))
            .any(|member| member.actor.same_port(&port.partner))
    }

    /// Finds an aggregator for `port_no` and attaches it. Prefers a keyed
    /// aggregator whose members are compatible, then claims the first free
    /// one.
    ///
    /// A port whose operational key is still 0 (link speed unknown) is not
    /// placed anywhere.
    pub(crate) fn find_aggregator(&mut self, port_no: u16) -> Option<u16> {
        let key = self.ports.get(&port_no)?.actor.key;
        if key == 0 {
            debug!(port = port_no, "operational key unknown, not selecting");
            return None;
        }

        let keyed: Vec<u16> = self
            .aggregators
            .values()
            .filter(|a| a.key != 0)
            .map(|a| a.aggr_no)
            .collect();
        for aggr_no in keyed {
            if !self.verify_aggregator(Some(aggr_no), port_no) {
                continue;
            }
            let contained = self
                .aggregators
                .get(&aggr_no)
                .is_some_and(|a| a.contains(port_no));
            if !contained {
                self.add_to_aggregator(port_no, aggr_no);
            }
            return Some(aggr_no);
        }

        let free = self.aggregators.values_mut().find(|a| a.is_free())?;
        free.key = key;
        let aggr_no = free.aggr_no;
        self.add_to_aggregator(port_no, aggr_no);
        Some(aggr_no)
    }
}

/// Two ports can share an aggregator when both ends agree on system and
/// key, both sides are aggregable, and the member is enabled.
fn aggregable(member: &Port, port: &Port) -> bool {
    member.actor.system_priority == port.actor.system_priority
        && member.actor.system_id == port.actor.system_id
        && member.actor.key == port.actor.key
        && member.partner.system_priority == port.partner.system_priority
        && member.partner.system_id == port.partner.system_id
        && member.partner.key == port.partner.key
        && member.actor.state.aggregation
        && port.actor.state.aggregation
        && member.partner.state.aggregation
        && port.partner.state.aggregation
        && member.flags.port_enabled
}

#[cfg(test)]
mod tests {
    use crate::machines::MuxEvent;
    use crate::port::Selected;
    use crate::testutil::engine_with_links;
    use lac_types::{LinkInfo, LinkSpeed};
    use pretty_assertions::assert_eq;

    #[test]
    fn test_compatible_ports_share_aggregator() {
        let (mut engine, _) = engine_with_links(2);
        let first = engine.add_port("aggr0", "eth0").unwrap();
        let second = engine.add_port("aggr0", "eth1").unwrap();
        engine.run_link_checks();

        assert_eq!(engine.port(first).unwrap().aggregator(), Some(1));
        assert_eq!(engine.port(second).unwrap().aggregator(), Some(1));
        assert_eq!(engine.aggregator(1).unwrap().link_count(), 2);
    }

    #[test]
    fn test_different_key_claims_free_aggregator() {
        let (mut engine, _) = engine_with_links(2);
        engine.add_aggregator("aggr1").unwrap();
        let first = engine.add_port("aggr0", "eth0").unwrap();
        let second = engine.add_port("aggr0", "eth1").unwrap();
        engine.set_admin_key(second, 7).unwrap();
        engine.run_link_checks();

        assert_eq!(engine.port(first).unwrap().aggregator(), Some(1));
        assert_eq!(engine.port(second).unwrap().aggregator(), Some(2));
        assert_eq!(engine.aggregator(2).unwrap().key(), 7 | 0x4000);
    }

    #[test]
    fn test_no_free_aggregator_leaves_port_unselected() {
        let (mut engine, _) = engine_with_links(2);
        let first = engine.add_port("aggr0", "eth0").unwrap();
        let second = engine.add_port("aggr0", "eth1").unwrap();
        engine.set_admin_key(second, 7).unwrap();
        engine.run_link_checks();

        assert_eq!(engine.port(first).unwrap().selected(), Selected::Selected);
        assert_eq!(engine.port(second).unwrap().selected(), Selected::Unselected);
        assert_eq!(engine.port(second).unwrap().aggregator(), None);
    }

    #[test]
    fn test_unknown_speed_is_never_selected() {
        let (mut engine, driver) = engine_with_links(2);
        engine.add_aggregator("aggr1").unwrap();
        driver.set_link_info(
            "eth0",
            LinkInfo {
                speed: None,
                ..LinkInfo::up(LinkSpeed::Mb1000)
            },
        );
        let unknown = engine.add_port("aggr0", "eth0").unwrap();
        engine.run_link_checks();
        engine.mux_machine(unknown, MuxEvent::NewInfo);

        let port = engine.port(unknown).unwrap();
        assert!(port.flags().port_enabled);
        assert_eq!(port.actor().key, 0);
        assert_eq!(port.selected(), Selected::Unselected);
        assert_eq!(port.aggregator(), None);
        assert!(engine.aggregators().all(|a| a.is_free()));

        let known = engine.add_port("aggr0", "eth1").unwrap();
        engine.run_link_checks();
        assert_eq!(engine.port(known).unwrap().aggregator(), Some(1));
        assert_eq!(engine.aggregator(1).unwrap().key(), 0x4001);
        assert!(engine.aggregator(2).unwrap().is_free());
    }

    #[test]
    fn test_verify_rejects_free_or_missing_aggregator() {
        let (mut engine, _) = engine_with_links(1);
        let port_no = engine.add_port("aggr0", "eth0").unwrap();
        assert!(!engine.verify_aggregator(None, port_no));
        assert!(!engine.verify_aggregator(Some(1), port_no));
    }
}
