//! Physical link status: link checks, key computation and netdev
//! notifications.

use crate::debug::{lac_event, DebugCategory};
use crate::engine::LacEngine;
use crate::error::{LacError, LacResult};
use crate::port::Selected;
use lac_types::{Duplex, LinkInfo, LinkSpeed, MacAddress};
use tracing::{debug, info, warn};

/// Device notifications for a bound link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetdevEvent {
    Up,
    Down,
    /// Carrier or link parameters changed.
    Change,
    Unregister,
    AddressChange(MacAddress),
}

/// Operational key: the admin key with the speed bit OR-ed in, or 0 when
/// the speed is unknown.
pub fn compute_key(admin_key: u16, speed: Option<LinkSpeed>) -> u16 {
    match speed {
        Some(speed) => admin_key | speed.key_bits(),
        None => 0,
    }
}

impl LacEngine {
    /// Applies one sample of `link`'s physical state to `port_no`.
    ///
    /// Port numbers are reused, so a sample taken before the port was
    /// removed and rebound is dropped unless the port still sits on `link`.
    pub fn apply_link_check(&mut self, port_no: u16, link: &str, sample: LinkInfo) {
        let Some(port) = self.ports.get_mut(&port_no) else {
            return;
        };
        if port.link != link {
            debug!(port = port_no, link, bound = %port.link, "stale link sample dropped");
            return;
        }
        if !port.flags.lacp_enabled {
            return;
        }
        port.link_state.carrier = sample.carrier;

        if !sample.carrier {
            if port.flags.port_enabled {
                warn!(port = port_no, link = %port.link, "link off, disabling port");
                self.disable_port(port_no);
                self.force_detach(port_no);
            }
            return;
        }

        port.link_state.speed = sample.speed;
        port.link_state.duplex = sample.duplex;

        if !port.flags.port_enabled {
            if port.aggregator.is_none() {
                port.actor.key = compute_key(port.actor_admin.info().key, sample.speed);
            }
            info!(port = port_no, link = %port.link, key = port.actor.key, "link on, enabling port");
            self.enable_port(port_no);
            return;
        }

        if sample.duplex == Duplex::Half {
            lac_event!(
                self.debug.enabled(DebugCategory::Warn, port_no),
                port = port_no,
                "half duplex link cannot aggregate"
            );
            port.timers.current_while.stop();
            self.force_detach(port_no);
        }

        let Some(port) = self.ports.get_mut(&port_no) else {
            return;
        };
        let key = compute_key(port.actor_admin.info().key, sample.speed);
        if key != port.actor.key {
            warn!(port = port_no, old = port.actor.key, new = key, "operational key change");
            port.actor.key = key;
            self.force_detach(port_no);
        }
    }

    /// Queues a link check for `port_no`, drained by the link monitor.
    pub fn schedule_link_check(&mut self, port_no: u16) {
        if self.ports.contains_key(&port_no) {
            self.pending_link_checks.insert(port_no);
        }
    }

    /// Drains the queued link checks, returning the links to sample.
    pub fn take_link_checks(&mut self) -> Vec<(u16, String)> {
        let pending = std::mem::take(&mut self.pending_link_checks);
        pending
            .into_iter()
            .filter_map(|p| self.ports.get(&p).map(|port| (p, port.link.clone())))
            .collect()
    }

    /// Every bound port and its link, for a full sweep.
    pub fn link_targets(&self) -> Vec<(u16, String)> {
        self.ports
            .values()
            .map(|p| (p.port_no, p.link.clone()))
            .collect()
    }

    /// Runs the queued link checks, sampling the driver inline.
    ///
    /// The daemon samples off the engine lock instead; this is for
    /// embedders that drive the engine directly.
    pub fn run_link_checks(&mut self) {
        for (port_no, link) in self.take_link_checks() {
            if let Some(sample) = self.driver.link_info(&link) {
                self.apply_link_check(port_no, &link, sample);
            }
        }
    }

    /// Samples and applies every port's link state inline.
    pub fn check_all_links(&mut self) {
        for (port_no, link) in self.link_targets() {
            if let Some(sample) = self.driver.link_info(&link) {
                self.apply_link_check(port_no, &link, sample);
            }
        }
    }

    pub fn handle_netdev_event(&mut self, link: &str, event: NetdevEvent) -> LacResult<()> {
        let port_no = self
            .port_by_link(link)
            .map(|p| p.port_no)
            .ok_or_else(|| LacError::port_not_found(link))?;
        lac_event!(
            self.debug.enabled(DebugCategory::Warn, port_no),
            port = port_no,
            link,
            ?event,
            "netdev event"
        );

        match event {
            NetdevEvent::Down => {
                let enabled = self.ports.get(&port_no).is_some_and(|p| p.flags.port_enabled);
                if enabled {
                    if let Some(port) = self.ports.get_mut(&port_no) {
                        port.selected = Selected::Unselected;
                        port.link_state.carrier = false;
                    }
                    self.disable_port(port_no);
                    self.force_detach(port_no);
                }
            }
            NetdevEvent::Up | NetdevEvent::Change => self.schedule_link_check(port_no),
            NetdevEvent::Unregister => self.remove_port(link)?,
            NetdevEvent::AddressChange(mac) => {
                let Some(port) = self.ports.get_mut(&port_no) else {
                    return Ok(());
                };
                port.mac = mac;
                let aggregator = port.aggregator;
                if let Some(aggr_no) = aggregator {
                    self.refresh_aggregator(aggr_no);
                }
                if port_no == 1 {
                    self.refresh_system_id();
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::machines::MuxEvent;
    use crate::port::{MuxState, RxState};
    use crate::testutil::engine_with_links;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_compute_key() {
        assert_eq!(compute_key(1, Some(LinkSpeed::Mb10)), 0x1001);
        assert_eq!(compute_key(1, Some(LinkSpeed::Mb10000)), 0x8001);
        assert_eq!(compute_key(5, None), 0);
    }

    #[test]
    fn test_link_up_enables_port() {
        let (mut engine, _) = engine_with_links(1);
        let port_no = engine.add_port("aggr0", "eth0").unwrap();
        engine.apply_link_check(port_no, "eth0", LinkInfo::up(LinkSpeed::Mb100));

        let port = engine.port(port_no).unwrap();
        assert!(port.flags().port_enabled);
        assert_eq!(port.actor().key, 0x2001);
        assert_eq!(port.rx_state(), RxState::Expired);
    }

    #[test]
    fn test_link_down_disables_and_detaches() {
        let (mut engine, _) = engine_with_links(1);
        let port_no = engine.add_port("aggr0", "eth0").unwrap();
        engine.run_link_checks();
        assert_eq!(engine.port(port_no).unwrap().aggregator(), Some(1));

        engine.apply_link_check(port_no, "eth0", LinkInfo::down());
        let port = engine.port(port_no).unwrap();
        assert!(!port.flags().port_enabled);
        assert_eq!(port.rx_state(), RxState::PortDisabled);
        assert_eq!(port.mux_state(), MuxState::Detached);
        assert_eq!(port.aggregator(), None);
    }

    #[test]
    fn test_speed_change_rekeys_port() {
        let (mut engine, _) = engine_with_links(1);
        let port_no = engine.add_port("aggr0", "eth0").unwrap();
        engine.run_link_checks();

        engine.apply_link_check(port_no, "eth0", LinkInfo::up(LinkSpeed::Mb10000));
        let port = engine.port(port_no).unwrap();
        assert_eq!(port.actor().key, 0x8001);
        assert_eq!(port.mux_state(), MuxState::Detached);
        assert!(engine.aggregator(1).unwrap().is_free());

        // the next port tick reselects with the new key
        engine.mux_machine(port_no, MuxEvent::NewInfo);
        assert_eq!(engine.port(port_no).unwrap().mux_state(), MuxState::Waiting);
        assert_eq!(engine.aggregator(1).unwrap().key(), 0x8001);
    }

    #[test]
    fn test_half_duplex_detaches() {
        let (mut engine, _) = engine_with_links(1);
        let port_no = engine.add_port("aggr0", "eth0").unwrap();
        engine.run_link_checks();

        let sample = LinkInfo {
            duplex: Duplex::Half,
            ..LinkInfo::up(LinkSpeed::Mb1000)
        };
        engine.apply_link_check(port_no, "eth0", sample);
        let port = engine.port(port_no).unwrap();
        assert_eq!(port.link_state().duplex, Duplex::Half);
        assert!(!port.timers().current_while.is_active());
        assert_eq!(port.selected(), Selected::Unselected);
        assert_eq!(port.mux_state(), MuxState::Detached);
    }

    #[test]
    fn test_netdev_events() {
        let (mut engine, _) = engine_with_links(2);
        let port_no = engine.add_port("aggr0", "eth0").unwrap();
        engine.run_link_checks();

        engine.handle_netdev_event("eth0", NetdevEvent::Down).unwrap();
        assert!(!engine.port(port_no).unwrap().flags().port_enabled);

        engine.handle_netdev_event("eth0", NetdevEvent::Up).unwrap();
        engine.run_link_checks();
        assert!(engine.port(port_no).unwrap().flags().port_enabled);

        let mac = MacAddress::new([2, 0, 0, 0, 0, 0x10]);
        engine
            .handle_netdev_event("eth0", NetdevEvent::AddressChange(mac))
            .unwrap();
        assert_eq!(engine.system().system_id, mac);

        engine.handle_netdev_event("eth0", NetdevEvent::Unregister).unwrap();
        assert!(engine.port(port_no).is_none());
        assert!(engine.handle_netdev_event("eth1", NetdevEvent::Up).is_err());
    }

    #[test]
    fn test_up_event_only_queues_a_check() {
        let (mut engine, driver) = engine_with_links(1);
        let port_no = engine.add_port("aggr0", "eth0").unwrap();
        engine.run_link_checks();
        engine.handle_netdev_event("eth0", NetdevEvent::Down).unwrap();

        let calls = driver.link_info_calls();
        engine.handle_netdev_event("eth0", NetdevEvent::Up).unwrap();
        assert_eq!(driver.link_info_calls(), calls);
        assert!(!engine.port(port_no).unwrap().flags().port_enabled);

        let targets = engine.take_link_checks();
        assert_eq!(targets, vec![(port_no, "eth0".to_string())]);
    }

    #[test]
    fn test_sample_for_rebound_port_is_dropped() {
        let (mut engine, _) = engine_with_links(2);
        let port_no = engine.add_port("aggr0", "eth0").unwrap();
        let targets = engine.take_link_checks();
        assert_eq!(targets, vec![(port_no, "eth0".to_string())]);

        // eth0 goes away while its sample is in flight; eth1 reuses the number
        engine.remove_port("eth0").unwrap();
        let rebound = engine.add_port("aggr0", "eth1").unwrap();
        assert_eq!(rebound, port_no);

        engine.apply_link_check(port_no, "eth0", LinkInfo::up(LinkSpeed::Mb10000));
        let port = engine.port(rebound).unwrap();
        assert_eq!(port.link(), "eth1");
        assert!(!port.flags().port_enabled);
        assert_eq!(port.actor().key, 1);
        assert_eq!(port.rx_state(), RxState::PortDisabled);

        engine.apply_link_check(rebound, "eth1", LinkInfo::up(LinkSpeed::Mb1000));
        let port = engine.port(rebound).unwrap();
        assert!(port.flags().port_enabled);
        assert_eq!(port.actor().key, 0x4001);
    }
}
