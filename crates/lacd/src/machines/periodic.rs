//! Periodic transmission machine.
//!
//! No_Periodic, Fast_Periodic and Slow_Periodic are not stored; they are
//! the armed state and duration of the periodic timer.

use super::{PeriodicEvent, TxEvent, FAST_PERIODIC_TICKS, SLOW_PERIODIC_TICKS};
use crate::engine::LacEngine;

impl LacEngine {
    pub(crate) fn periodic_machine(&mut self, port_no: u16, event: PeriodicEvent) {
        let Some(port) = self.ports.get_mut(&port_no) else {
            return;
        };

        match event {
            PeriodicEvent::Init | PeriodicEvent::PortDisabled => {
                port.timers.periodic.stop();
            }
            PeriodicEvent::Tick => {
                if !port.flags.port_enabled || !port.flags.lacp_enabled || !port.either_active() {
                    port.timers.periodic.stop();
                    return;
                }
                port.timers.periodic.tick();
                if port.timers.periodic.is_active() {
                    return;
                }
                let period = if port.partner.state.timeout {
                    FAST_PERIODIC_TICKS
                } else {
                    SLOW_PERIODIC_TICKS
                };
                port.timers.periodic.start(period);
                self.tx_machine(port_no, TxEvent::Ntt);
            }
        }
    }
}
