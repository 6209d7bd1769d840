//! Mux machine: Detached, Waiting, Attached, Collecting, Distributing.
//!
//! Every event is followed by [`LacEngine::mux_update_state`], which applies
//! the transition rules in strict priority order until none fires. A desync
//! anywhere therefore walks the port back down through Collecting and
//! Attached before a new selection is tried.

use super::{MuxEvent, TxEvent, AGGREGATE_WAIT_TICKS};
use crate::debug::{lac_event, DebugCategory};
use crate::engine::LacEngine;
use crate::port::{MuxState, Selected};
use tracing::warn;

/// Upper bound on rule applications per update; a full climb from
/// Detached to Distributing takes five.
const MUX_MAX_STEPS: usize = 8;

impl LacEngine {
    pub(crate) fn mux_machine(&mut self, port_no: u16, event: MuxEvent) {
        let Some(port) = self.ports.get(&port_no) else {
            return;
        };

        match event {
            MuxEvent::Init => {
                self.mux_init(port_no);
                return;
            }
            MuxEvent::NewInfo | MuxEvent::Received => {
                if port.selected == Selected::Unselected && port.flags.port_enabled {
                    self.change_lag(port_no);
                }
            }
            MuxEvent::Tick => self.mux_tick(port_no),
        }

        self.mux_update_state(port_no);
    }

    pub(crate) fn mux_update_state(&mut self, port_no: u16) {
        for _ in 0..MUX_MAX_STEPS {
            if self.mux_step(port_no) || self.mux_try_attach(port_no) {
                continue;
            }
            break;
        }
    }

    /// Applies the first matching transition rule. Returns true if the port
    /// changed.
    fn mux_step(&mut self, port_no: u16) -> bool {
        let Some(port) = self.ports.get_mut(&port_no) else {
            return false;
        };
        let before = (port.mux_state, port.selected, port.actor.state, port.aggregator);

        let actor_sync = port.selected == Selected::Selected
            && !matches!(port.mux_state, MuxState::Detached | MuxState::Waiting);
        if actor_sync != port.actor.state.synchronization {
            port.actor.state.synchronization = actor_sync;
            self.tx_machine(port_no, TxEvent::Ntt);
        }

        let Some(port) = self.ports.get(&port_no) else {
            return false;
        };
        let actor = port.actor.state;
        let partner = port.partner.state;
        let both_sync = actor.synchronization && partner.synchronization;
        let enabled = port.flags.lacp_enabled && port.flags.port_enabled;
        let state = port.mux_state;
        let selected = port.selected;

        if both_sync && actor.collecting && partner.collecting && !actor.distributing {
            self.mux_distributing(port_no);
        } else if both_sync && !actor.collecting && state != MuxState::Collecting {
            if state == MuxState::Attached {
                self.mux_collecting(port_no);
            }
        } else if actor.distributing
            && (!partner.synchronization || !partner.collecting || !actor.synchronization)
        {
            self.mux_collecting(port_no);
        } else if actor.collecting && (!partner.synchronization || !actor.synchronization) {
            self.mux_stop_collecting(port_no);
        } else if selected != Selected::Selected && state != MuxState::Detached {
            self.mux_detached(port_no);
        } else if enabled && selected != Selected::Selected && state == MuxState::Detached {
            self.mux_select(port_no);
        }

        self.ports
            .get(&port_no)
            .map(|p| (p.mux_state, p.selected, p.actor.state, p.aggregator) != before)
            .unwrap_or(false)
    }

    /// Waiting to Attached once the wait has elapsed and the aggregator is
    /// ready.
    fn mux_try_attach(&mut self, port_no: u16) -> bool {
        let Some(port) = self.ports.get(&port_no) else {
            return false;
        };
        if port.selected != Selected::Selected
            || port.mux_state != MuxState::Waiting
            || port.timers.wait_while.is_active()
        {
            return false;
        }
        self.mux_attach(port_no)
    }

    /// Moves every selected, ready member still in Waiting to Attached if the
    /// whole aggregator is ready. Returns true if `port_no` moved.
    fn mux_attach(&mut self, port_no: u16) -> bool {
        let Some(aggr_no) = self.ports.get(&port_no).and_then(|p| p.aggregator) else {
            return false;
        };
        self.refresh_aggregator(aggr_no);
        let Some(aggregator) = self.aggregators.get(&aggr_no) else {
            return false;
        };
        if !aggregator.ready {
            return false;
        }

        let waiting: Vec<u16> = aggregator
            .members
            .iter()
            .copied()
            .filter(|p| {
                self.ports.get(p).is_some_and(|m| {
                    m.selected == Selected::Selected
                        && m.flags.ready_n
                        && m.mux_state == MuxState::Waiting
                })
            })
            .collect();
        for member in &waiting {
            self.mux_attached(*member);
        }
        waiting.contains(&port_no)
    }

    fn mux_set_state(&mut self, port_no: u16, state: MuxState) {
        let Some(port) = self.ports.get_mut(&port_no) else {
            return;
        };
        if port.mux_state != state {
            lac_event!(
                self.debug.enabled(DebugCategory::State, port_no),
                port = port_no,
                from = %port.mux_state,
                to = %state,
                aggregator = ?port.aggregator,
                "mux state change"
            );
        }
        port.mux_state = state;
    }

    fn mux_init(&mut self, port_no: u16) {
        self.remove_from_aggregator(port_no);
        let Some(port) = self.ports.get_mut(&port_no) else {
            return;
        };
        port.actor.port_no = port_no;
        port.selected = Selected::Unselected;
        port.actor.state.collecting = false;
        port.actor.state.distributing = false;
        port.timers.wait_while.stop();
        port.flags.ready_n = false;
        self.mux_set_state(port_no, MuxState::Detached);
    }

    fn mux_tick(&mut self, port_no: u16) {
        let Some(port) = self.ports.get_mut(&port_no) else {
            return;
        };
        if port.mux_state != MuxState::Waiting {
            return;
        }
        port.timers.wait_while.tick();
        if port.timers.wait_while.is_active() || port.flags.ready_n {
            return;
        }
        port.flags.ready_n = true;
        let aggregator = port.aggregator;
        if let Some(aggr_no) = aggregator {
            self.refresh_aggregator(aggr_no);
        }
    }

    fn mux_waiting(&mut self, port_no: u16) {
        let Some(port) = self.ports.get_mut(&port_no) else {
            return;
        };
        let wait = if port.actor.state.aggregation && port.partner.state.aggregation {
            AGGREGATE_WAIT_TICKS
        } else {
            0
        };
        port.timers.wait_while.start(wait);
        if wait == 0 {
            // zero-length wait elapses immediately
            port.timers.wait_while.stop();
            port.flags.ready_n = true;
        } else {
            port.flags.ready_n = false;
        }
        let aggregator = port.aggregator;
        self.mux_set_state(port_no, MuxState::Waiting);
        if let Some(aggr_no) = aggregator {
            self.refresh_aggregator(aggr_no);
        }
    }

    fn mux_attached(&mut self, port_no: u16) {
        let Some(port) = self.ports.get_mut(&port_no) else {
            return;
        };
        port.actor.state.synchronization = true;
        self.disable_collecting(port_no);
        self.mux_set_state(port_no, MuxState::Attached);
        self.tx_machine(port_no, TxEvent::Ntt);
    }

    fn mux_collecting(&mut self, port_no: u16) {
        self.mux_set_state(port_no, MuxState::Collecting);
        self.enable_collecting(port_no);
        self.disable_distributing(port_no);
        self.tx_machine(port_no, TxEvent::Ntt);
    }

    fn mux_distributing(&mut self, port_no: u16) {
        self.mux_set_state(port_no, MuxState::Distributing);
        self.enable_distributing(port_no);
    }

    /// Actor desynchronized while collecting: back to Attached.
    fn mux_stop_collecting(&mut self, port_no: u16) {
        self.disable_collecting(port_no);
        self.mux_set_state(port_no, MuxState::Attached);
        self.tx_machine(port_no, TxEvent::Ntt);
    }

    pub(crate) fn mux_detached(&mut self, port_no: u16) {
        let Some(port) = self.ports.get_mut(&port_no) else {
            return;
        };
        port.actor.state.synchronization = false;
        port.timers.wait_while.stop();
        port.flags.ready_n = false;
        self.disable_distributing(port_no);
        self.disable_collecting(port_no);
        self.remove_from_aggregator(port_no);
        self.mux_set_state(port_no, MuxState::Detached);
        self.tx_machine(port_no, TxEvent::Ntt);
    }

    fn mux_select(&mut self, port_no: u16) {
        let Some(port) = self.ports.get(&port_no) else {
            return;
        };
        if port.aggregator.is_some() {
            self.remove_from_aggregator(port_no);
            return;
        }
        if !port.flags.lacp_enabled {
            return;
        }

        match self.find_aggregator(port_no) {
            Some(aggr_no) => {
                if let Some(port) = self.ports.get_mut(&port_no) {
                    port.selected = Selected::Selected;
                }
                lac_event!(
                    self.debug.enabled(DebugCategory::State, port_no),
                    port = port_no,
                    aggregator = aggr_no,
                    "port selected"
                );
                self.mux_waiting(port_no);
            }
            None => {
                if self.debug.enabled(DebugCategory::Warn, port_no) {
                    warn!(port = port_no, "no aggregator available for port");
                }
            }
        }
    }

    // ---- collector / distributor ----

    pub(crate) fn enable_collecting(&mut self, port_no: u16) {
        self.set_collector_bits(port_no, Some(true), None);
    }

    pub(crate) fn disable_collecting(&mut self, port_no: u16) {
        self.set_collector_bits(port_no, Some(false), None);
    }

    pub(crate) fn enable_distributing(&mut self, port_no: u16) {
        self.set_collector_bits(port_no, None, Some(true));
    }

    pub(crate) fn disable_distributing(&mut self, port_no: u16) {
        self.set_collector_bits(port_no, None, Some(false));
    }

    fn set_collector_bits(&mut self, port_no: u16, collecting: Option<bool>, distributing: Option<bool>) {
        let Some(port) = self.ports.get_mut(&port_no) else {
            return;
        };
        let before = port.actor.state;
        if let Some(on) = collecting {
            port.actor.state.collecting = on;
        }
        if let Some(on) = distributing {
            port.actor.state.distributing = on;
        }
        if port.actor.state == before {
            return;
        }
        match port.aggregator {
            Some(aggr_no) => self.refresh_aggregator(aggr_no),
            None => self.publish_routes(),
        }
    }

    /// Re-examines every other selected port after `port_no` learned new
    /// information, unselecting those whose aggregator no longer verifies.
    fn change_lag(&mut self, port_no: u16) {
        let others: Vec<u16> = self
            .ports
            .values()
            .filter(|p| {
                p.port_no != port_no
                    && p.flags.lacp_enabled
                    && p.selected == Selected::Selected
            })
            .map(|p| p.port_no)
            .collect();

        for other in others {
            let aggregator = self.ports.get(&other).and_then(|p| p.aggregator);
            if self.verify_aggregator(aggregator, other) {
                continue;
            }
            if let Some(port) = self.ports.get_mut(&other) {
                port.selected = Selected::Unselected;
            }
            lac_event!(
                self.debug.enabled(DebugCategory::State, other),
                port = other,
                trigger = port_no,
                "aggregator no longer compatible, unselected"
            );
            self.mux_update_state(other);
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::engine::LacEngine;
    use crate::machines::{MuxEvent, RxEvent};
    use crate::port::{MuxState, RxState, Selected};
    use crate::testutil::engine_with_links;
    use pretty_assertions::assert_eq;

    /// Lets the receive machine time out to the defaulted partner, which
    /// is in sync and collecting.
    fn default_partner(engine: &mut LacEngine, port_no: u16) {
        for _ in 0..3 {
            engine.rx_machine(port_no, RxEvent::Tick);
        }
        assert_eq!(engine.port(port_no).unwrap().rx_state(), RxState::Defaulted);
    }

    #[test]
    fn test_enabled_port_selects_and_waits() {
        let (mut engine, _) = engine_with_links(1);
        let port_no = engine.add_port("aggr0", "eth0").unwrap();
        assert_eq!(engine.port(port_no).unwrap().mux_state(), MuxState::Detached);

        engine.run_link_checks();
        let port = engine.port(port_no).unwrap();
        assert_eq!(port.mux_state(), MuxState::Waiting);
        assert_eq!(port.selected(), Selected::Selected);
        assert_eq!(port.aggregator(), Some(1));
        assert_eq!(engine.aggregator(1).unwrap().key(), port.actor().key);
    }

    #[test]
    fn test_defaulted_port_climbs_to_distributing() {
        let (mut engine, _) = engine_with_links(1);
        let port_no = engine.add_port("aggr0", "eth0").unwrap();
        engine.run_link_checks();
        default_partner(&mut engine, port_no);

        engine.mux_machine(port_no, MuxEvent::Tick);
        assert_eq!(engine.port(port_no).unwrap().mux_state(), MuxState::Waiting);
        engine.mux_machine(port_no, MuxEvent::Tick);

        let port = engine.port(port_no).unwrap();
        assert_eq!(port.mux_state(), MuxState::Distributing);
        assert!(port.actor().state.synchronization);
        assert!(port.actor().state.collecting);
        assert!(port.actor().state.distributing);
        assert!(engine.aggregator(1).unwrap().is_ready());
        assert_eq!(engine.aggregator(1).unwrap().distributor().ready_count(), 1);
    }

    #[test]
    fn test_unselected_port_falls_to_detached_at_once() {
        let (mut engine, _) = engine_with_links(1);
        let port_no = engine.add_port("aggr0", "eth0").unwrap();
        engine.run_link_checks();
        default_partner(&mut engine, port_no);
        engine.mux_machine(port_no, MuxEvent::Tick);
        engine.mux_machine(port_no, MuxEvent::Tick);

        engine.ports.get_mut(&port_no).unwrap().selected = Selected::Unselected;
        engine.ports.get_mut(&port_no).unwrap().flags.port_enabled = false;
        engine.mux_update_state(port_no);

        let port = engine.port(port_no).unwrap();
        assert_eq!(port.mux_state(), MuxState::Detached);
        assert!(!port.actor().state.synchronization);
        assert!(!port.actor().state.collecting);
        assert!(!port.actor().state.distributing);
        assert_eq!(port.aggregator(), None);
        assert!(engine.aggregator(1).unwrap().is_free());
        assert_eq!(engine.aggregator(1).unwrap().distributor().ready_count(), 0);
    }

    #[test]
    fn test_partner_desync_reverts_to_attached() {
        let (mut engine, _) = engine_with_links(1);
        let port_no = engine.add_port("aggr0", "eth0").unwrap();
        engine.run_link_checks();
        default_partner(&mut engine, port_no);
        engine.mux_machine(port_no, MuxEvent::Tick);
        engine.mux_machine(port_no, MuxEvent::Tick);

        engine.ports.get_mut(&port_no).unwrap().partner.state.synchronization = false;
        engine.mux_update_state(port_no);

        let port = engine.port(port_no).unwrap();
        assert_eq!(port.mux_state(), MuxState::Attached);
        assert!(port.actor().state.synchronization);
        assert!(!port.actor().state.collecting);
        assert!(!port.actor().state.distributing);

        engine.ports.get_mut(&port_no).unwrap().partner.state.synchronization = true;
        engine.mux_update_state(port_no);
        assert_eq!(engine.port(port_no).unwrap().mux_state(), MuxState::Distributing);
    }
}

