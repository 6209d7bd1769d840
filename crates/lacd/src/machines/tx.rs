//! Transmit machine: rate-limited LACPDU emission.

use super::{TxEvent, MAX_TX_PER_INTERVAL, TX_INTERVAL_TICKS, TX_SCHEDULE_TICKS};
use crate::debug::{lac_event, DebugCategory};
use crate::driver::DriverError;
use crate::engine::LacEngine;
use lac_types::Lacpdu;
use tracing::{debug, warn};

impl LacEngine {
    pub(crate) fn tx_machine(&mut self, port_no: u16, event: TxEvent) {
        let Some(port) = self.ports.get_mut(&port_no) else {
            return;
        };

        match event {
            TxEvent::Init | TxEvent::PortDisabled => {
                port.timers.tx_scheduler.stop();
                port.timers.ntt_delay.stop();
                port.flags.ntt = false;
                port.ntt_count = 0;
            }
            TxEvent::Ntt => {
                if !port.flags.ntt && port.ntt_count < MAX_TX_PER_INTERVAL {
                    port.timers.tx_scheduler.start(TX_SCHEDULE_TICKS);
                }
                port.flags.ntt = true;
            }
            TxEvent::Tick => {
                port.timers.ntt_delay.tick();
                if port.timers.ntt_delay.is_active() {
                    return;
                }
                if port.flags.ntt && !port.timers.tx_scheduler.is_active() {
                    port.timers.tx_scheduler.start(TX_SCHEDULE_TICKS);
                }
                port.ntt_count = 0;
            }
            TxEvent::Txd => {
                port.timers.tx_scheduler.stop();
                let eligible = port.flags.ntt
                    && port.flags.lacp_enabled
                    && port.flags.port_enabled
                    && port.either_active();
                if !eligible {
                    return;
                }
                match self.transmit_lacpdu(port_no) {
                    Ok(()) => {
                        if let Some(port) = self.ports.get_mut(&port_no) {
                            port.timers.ntt_delay.start(TX_INTERVAL_TICKS);
                            port.ntt_count += 1;
                            port.flags.ntt = false;
                        }
                    }
                    Err(_) => {
                        if let Some(port) = self.ports.get_mut(&port_no) {
                            port.timers.tx_scheduler.start(TX_SCHEDULE_TICKS);
                        }
                    }
                }
            }
        }
    }

    /// Builds a LACPDU from the port's current records and hands it to the
    /// driver.
    fn transmit_lacpdu(&mut self, port_no: u16) -> Result<(), DriverError> {
        let Some(port) = self.ports.get(&port_no) else {
            return Err(DriverError::Unavailable(port_no.to_string()));
        };
        let pdu = Lacpdu {
            actor: port.actor,
            partner: port.partner,
            collector_max_delay: self.system.collector_max_delay,
        };
        let frame = pdu.encode(port.mac);
        let result = self.driver.transmit(&port.link, &frame);

        let Some(port) = self.ports.get_mut(&port_no) else {
            return result;
        };
        match &result {
            Ok(()) => {
                port.stats.lacpdu_tx += 1;
                lac_event!(
                    self.debug.enabled(DebugCategory::Tx, port_no),
                    port = port_no,
                    actor = %pdu.actor.state,
                    partner = %pdu.partner.state,
                    "LACPDU sent"
                );
            }
            Err(e) => {
                port.stats.tx_failures += 1;
                if self.debug.enabled(DebugCategory::Warn, port_no) {
                    warn!(port = port_no, error = %e, "LACPDU transmit failed, retrying");
                } else {
                    debug!(port = port_no, error = %e, "LACPDU transmit failed, retrying");
                }
            }
        }
        result
    }
}
