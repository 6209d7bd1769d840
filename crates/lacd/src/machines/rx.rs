//! Receive machine: tracks freshness of the partner information.

use super::{MuxEvent, RxEvent, TxEvent, LONG_TIMEOUT_TICKS, SHORT_TIMEOUT_TICKS};
use crate::debug::{lac_event, DebugCategory};
use crate::engine::LacEngine;
use crate::port::{MuxState, RxState, Selected};
use lac_types::Lacpdu;

impl LacEngine {
    pub(crate) fn rx_machine(&mut self, port_no: u16, event: RxEvent) {
        let Some(port) = self.ports.get(&port_no) else {
            return;
        };
        let state = port.rx_state;

        match event {
            RxEvent::Init => {
                self.rx_initialize(port_no);
                if let Some(port) = self.ports.get_mut(&port_no) {
                    port.flags.port_enabled = false;
                }
                self.rx_port_disabled(port_no);
            }
            RxEvent::PortDisabled => {
                if let Some(port) = self.ports.get_mut(&port_no) {
                    port.flags.port_enabled = false;
                }
                self.rx_port_disabled(port_no);
            }
            RxEvent::PortEnabled => {
                if state != RxState::PortDisabled {
                    return;
                }
                if port.flags.lacp_enabled {
                    self.rx_expired(port_no);
                } else {
                    self.rx_lacp_disabled(port_no);
                }
            }
            RxEvent::Tick => {
                if !matches!(state, RxState::Current | RxState::Expired) {
                    return;
                }
                let Some(port) = self.ports.get_mut(&port_no) else {
                    return;
                };
                port.timers.current_while.tick();
                if port.timers.current_while.is_active() {
                    return;
                }
                if state == RxState::Current {
                    self.rx_expired(port_no);
                } else {
                    self.rx_defaulted(port_no);
                }
            }
            RxEvent::Received(pdu) => {
                if matches!(state, RxState::LacpDisabled | RxState::PortDisabled) {
                    return;
                }
                self.rx_current(port_no, &pdu);
            }
            RxEvent::CheckMoved(pdu) => {
                if state != RxState::PortDisabled || !port.partner.same_port(&pdu.actor) {
                    return;
                }
                lac_event!(
                    self.debug.enabled(DebugCategory::State, port_no),
                    port = port_no,
                    "partner moved to another port, reinitializing"
                );
                if let Some(port) = self.ports.get_mut(&port_no) {
                    port.flags.port_moved = true;
                }
                self.rx_initialize(port_no);
                let detached = self
                    .ports
                    .get(&port_no)
                    .map(|p| p.mux_state == MuxState::Detached && p.aggregator.is_none())
                    .unwrap_or(true);
                if !detached {
                    self.mux_detached(port_no);
                }
                if let Some(port) = self.ports.get_mut(&port_no) {
                    port.flags.port_enabled = false;
                }
                self.rx_port_disabled(port_no);
            }
        }
    }

    fn rx_set_state(&mut self, port_no: u16, state: RxState) {
        let Some(port) = self.ports.get_mut(&port_no) else {
            return;
        };
        if port.rx_state != state {
            lac_event!(
                self.debug.enabled(DebugCategory::State, port_no),
                port = port_no,
                from = %port.rx_state,
                to = %state,
                "rx state change"
            );
        }
        port.rx_state = state;
    }

    fn rx_initialize(&mut self, port_no: u16) {
        let Some(port) = self.ports.get_mut(&port_no) else {
            return;
        };
        port.selected = Selected::Unselected;
        port.reset_actor_from_admin();
        port.actor.system_id = self.system.system_id;
        port.actor.system_priority = self.system.priority;
        port.record_default();
        port.actor.state.expired = false;
        port.flags.port_moved = false;
        self.rx_set_state(port_no, RxState::Initialize);
    }

    fn rx_port_disabled(&mut self, port_no: u16) {
        let Some(port) = self.ports.get_mut(&port_no) else {
            return;
        };
        port.partner.state.synchronization = false;
        self.rx_set_state(port_no, RxState::PortDisabled);
    }

    fn rx_expired(&mut self, port_no: u16) {
        let Some(port) = self.ports.get_mut(&port_no) else {
            return;
        };
        port.partner.state.synchronization = false;
        port.partner.state.timeout = true;
        port.timers.current_while.start(SHORT_TIMEOUT_TICKS);
        port.actor.state.expired = true;
        self.rx_set_state(port_no, RxState::Expired);
    }

    pub(crate) fn rx_lacp_disabled(&mut self, port_no: u16) {
        let Some(port) = self.ports.get_mut(&port_no) else {
            return;
        };
        port.selected = Selected::Unselected;
        port.record_default();
        port.partner.state.aggregation = false;
        port.actor.state.expired = false;
        self.rx_set_state(port_no, RxState::LacpDisabled);
    }

    fn rx_defaulted(&mut self, port_no: u16) {
        let Some(port) = self.ports.get_mut(&port_no) else {
            return;
        };
        if !port.partner_admin.info().same_link(&port.partner) {
            port.selected = Selected::Unselected;
        }
        port.record_default();
        port.actor.state.expired = false;
        self.rx_set_state(port_no, RxState::Defaulted);
    }

    fn rx_current(&mut self, port_no: u16, pdu: &Lacpdu) {
        let Some(port) = self.ports.get_mut(&port_no) else {
            return;
        };
        port.actor.port_no = port_no;

        if !pdu.actor.same_link(&port.partner) {
            port.selected = Selected::Unselected;
        }
        let ntt = !pdu.partner.same_link_ext(&port.actor);

        // record the partner's view
        port.partner = pdu.actor;
        port.actor.state.defaulted = false;
        let active = pdu.actor.state.activity
            || (port.actor.state.activity && pdu.partner.state.activity);
        port.partner.state.synchronization = active
            && pdu.actor.state.synchronization
            && (pdu.partner.same_link(&port.actor) || !pdu.actor.state.aggregation);

        let timeout = if port.actor.state.timeout {
            SHORT_TIMEOUT_TICKS
        } else {
            LONG_TIMEOUT_TICKS
        };
        port.timers.current_while.start(timeout);
        port.actor.state.expired = false;

        lac_event!(
            self.debug.enabled(DebugCategory::Rx, port_no),
            port = port_no,
            partner = %pdu.actor.system_id,
            partner_port = pdu.actor.port_no,
            state = %pdu.actor.state,
            "LACPDU accepted"
        );
        self.rx_set_state(port_no, RxState::Current);

        if ntt {
            self.tx_machine(port_no, TxEvent::Ntt);
        }
    }

    /// Feeds a decoded LACPDU to `port_no` and lets every other port check
    /// whether its partner moved here.
    pub(crate) fn lac_rx(&mut self, port_no: u16, pdu: Lacpdu) {
        if let Some(port) = self.ports.get_mut(&port_no) {
            port.partner_collector_max_delay = pdu.collector_max_delay;
        }
        self.rx_machine(port_no, RxEvent::Received(pdu));
        self.mux_machine(port_no, MuxEvent::Received);

        let others: Vec<u16> = self.ports.keys().copied().filter(|p| *p != port_no).collect();
        for other in others {
            self.rx_machine(other, RxEvent::CheckMoved(pdu));
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::machines::RxEvent;
    use crate::port::RxState;
    use crate::testutil::engine_with_links;
    use lac_types::{LacInfo, LacState, Lacpdu, MacAddress};
    use pretty_assertions::assert_eq;

    fn peer_pdu(port_no: u16) -> Lacpdu {
        Lacpdu {
            actor: LacInfo {
                system_priority: 32768,
                system_id: MacAddress::new([2, 0xaa, 0, 0, 0, 1]),
                key: 0x4001,
                port_priority: 32768,
                port_no,
                state: LacState {
                    activity: true,
                    aggregation: true,
                    ..Default::default()
                },
            },
            partner: LacInfo::default(),
            collector_max_delay: 5,
        }
    }

    #[test]
    fn test_init_falls_through_to_port_disabled() {
        let (mut engine, _) = engine_with_links(1);
        let port_no = engine.add_port("aggr0", "eth0").unwrap();
        assert_eq!(engine.port(port_no).unwrap().rx_state(), RxState::PortDisabled);
        assert!(!engine.port(port_no).unwrap().flags().port_enabled);
    }

    #[test]
    fn test_enable_goes_to_expired_then_defaulted() {
        let (mut engine, _) = engine_with_links(1);
        let port_no = engine.add_port("aggr0", "eth0").unwrap();
        engine.run_link_checks();

        let port = engine.port(port_no).unwrap();
        assert_eq!(port.rx_state(), RxState::Expired);
        assert!(port.actor().state.expired);
        assert!(port.partner().state.timeout);

        for _ in 0..3 {
            engine.rx_machine(port_no, RxEvent::Tick);
        }
        let port = engine.port(port_no).unwrap();
        assert_eq!(port.rx_state(), RxState::Defaulted);
        assert!(!port.actor().state.expired);
        assert!(port.actor().state.defaulted);
    }

    #[test]
    fn test_received_moves_to_current() {
        let (mut engine, _) = engine_with_links(1);
        let port_no = engine.add_port("aggr0", "eth0").unwrap();
        engine.run_link_checks();

        engine.lac_rx(port_no, peer_pdu(7));
        let port = engine.port(port_no).unwrap();
        assert_eq!(port.rx_state(), RxState::Current);
        assert_eq!(port.partner().port_no, 7);
        assert_eq!(port.partner().key, 0x4001);
        assert!(!port.actor().state.defaulted);
        assert_eq!(port.partner_collector_max_delay(), 5);
        assert!(port.flags().ntt);
    }

    #[test]
    fn test_received_ignored_while_disabled() {
        let (mut engine, _) = engine_with_links(1);
        let port_no = engine.add_port("aggr0", "eth0").unwrap();
        engine.rx_machine(port_no, RxEvent::Received(peer_pdu(7)));
        assert_eq!(engine.port(port_no).unwrap().rx_state(), RxState::PortDisabled);
    }

    #[test]
    fn test_check_moved_reinitializes_disabled_port() {
        let (mut engine, _) = engine_with_links(2);
        let first = engine.add_port("aggr0", "eth0").unwrap();
        let second = engine.add_port("aggr0", "eth1").unwrap();
        engine.run_link_checks();

        engine.lac_rx(first, peer_pdu(7));
        engine.disable_port(first);
        assert_eq!(engine.port(first).unwrap().rx_state(), RxState::PortDisabled);

        // the same peer port now shows up on the second link
        engine.lac_rx(second, peer_pdu(7));
        let port = engine.port(first).unwrap();
        assert_eq!(port.rx_state(), RxState::PortDisabled);
        assert!(port.actor().state.defaulted);
        assert_eq!(port.partner().key, 1);
    }
}
