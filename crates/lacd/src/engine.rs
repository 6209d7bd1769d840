//! The engine context: system identity, port and aggregator registries,
//! timers, and the glue between machines and the frame path.

use crate::aggregator::Aggregator;
use crate::config::LacdConfig;
use crate::datapath::{CollectorTarget, DataPath, LinkRoute};
use crate::debug::DebugFlags;
use crate::distribution::ReadyLink;
use crate::driver::LinkDriver;
use crate::error::{LacError, LacResult};
use crate::machines::{MuxEvent, PeriodicEvent, RxEvent, TxEvent, PORT_TICKS};
use crate::port::{MuxState, Port};
use crate::timer::{TimerHandle, TimerKind, TimerRegistry};
use crate::{DEFAULT_PRIORITY, MAX_AGGRS, MAX_PORTS};
use lac_types::MacAddress;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use tracing::{info, warn};

/// Process-wide LACP identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SystemInfo {
    pub priority: u16,
    pub system_id: MacAddress,
    pub collector_max_delay: u16,
}

impl Default for SystemInfo {
    fn default() -> Self {
        SystemInfo {
            priority: DEFAULT_PRIORITY,
            system_id: MacAddress::ZERO,
            collector_max_delay: 1,
        }
    }
}

/// Construction parameters of a [`LacEngine`].
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub system_priority: u16,
    pub collector_max_delay: u16,
    /// Fixed system id; `None` derives it from port 1.
    pub system_id: Option<MacAddress>,
    pub initial_aggregators: u16,
    pub aggregator_prefix: String,
    pub debug: DebugFlags,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig::from(&LacdConfig::default())
    }
}

impl From<&LacdConfig> for EngineConfig {
    fn from(config: &LacdConfig) -> Self {
        EngineConfig {
            system_priority: config.system.priority,
            collector_max_delay: config.system.collector_max_delay,
            system_id: config.system.system_id,
            initial_aggregators: config.aggregators.initial_count,
            aggregator_prefix: config.aggregators.name_prefix.clone(),
            debug: DebugFlags::from_config(&config.debug),
        }
    }
}

/// Link aggregation engine.
///
/// Owns every port, aggregator and registered timer. All protocol state
/// changes go through `&mut self`, which serializes them against the timer
/// walk.
pub struct LacEngine {
    pub(crate) system: SystemInfo,
    pub(crate) fixed_system_id: Option<MacAddress>,
    pub(crate) ports: BTreeMap<u16, Port>,
    pub(crate) aggregators: BTreeMap<u16, Aggregator>,
    pub(crate) timers: TimerRegistry,
    pub(crate) driver: Arc<dyn LinkDriver>,
    pub(crate) datapath: Arc<DataPath>,
    pub(crate) debug: DebugFlags,
    pub(crate) pending_link_checks: BTreeSet<u16>,
}

impl LacEngine {
    /// Creates the engine and its initial aggregators.
    pub fn new(config: EngineConfig, driver: Arc<dyn LinkDriver>) -> LacResult<Self> {
        let mut engine = LacEngine {
            system: SystemInfo {
                priority: config.system_priority,
                system_id: config.system_id.unwrap_or(MacAddress::ZERO),
                collector_max_delay: config.collector_max_delay,
            },
            fixed_system_id: config.system_id,
            ports: BTreeMap::new(),
            aggregators: BTreeMap::new(),
            timers: TimerRegistry::new(),
            datapath: Arc::new(DataPath::new(driver.clone())),
            driver,
            debug: config.debug,
            pending_link_checks: BTreeSet::new(),
        };

        for n in 0..config.initial_aggregators {
            engine.add_aggregator(&format!("{}{}", config.aggregator_prefix, n))?;
        }

        info!(
            aggregators = engine.aggregators.len(),
            priority = engine.system.priority,
            "LACP engine initialized"
        );
        Ok(engine)
    }

    pub fn system(&self) -> &SystemInfo {
        &self.system
    }

    pub fn port(&self, port_no: u16) -> Option<&Port> {
        self.ports.get(&port_no)
    }

    pub fn port_by_link(&self, link: &str) -> Option<&Port> {
        self.ports.values().find(|p| p.link == link)
    }

    /// Ports in increasing port-number order.
    pub fn ports(&self) -> impl Iterator<Item = &Port> {
        self.ports.values()
    }

    pub fn aggregator(&self, aggr_no: u16) -> Option<&Aggregator> {
        self.aggregators.get(&aggr_no)
    }

    pub fn aggregator_by_name(&self, name: &str) -> Option<&Aggregator> {
        self.aggregators.values().find(|a| a.name == name)
    }

    pub fn aggregators(&self) -> impl Iterator<Item = &Aggregator> {
        self.aggregators.values()
    }

    pub fn datapath(&self) -> Arc<DataPath> {
        self.datapath.clone()
    }

    pub fn debug_flags(&self) -> DebugFlags {
        self.debug
    }

    pub fn timer_count(&self) -> usize {
        self.timers.len()
    }

    // ---- lifecycle ----

    /// Binds physical link `link` to the aggregation subsystem under
    /// aggregator `aggregator`. Returns the new port number.
    pub fn add_port(&mut self, aggregator: &str, link: &str) -> LacResult<u16> {
        if self.aggregator_by_name(aggregator).is_none() {
            return Err(LacError::aggregator_not_found(aggregator));
        }
        if self.aggregator_by_name(link).is_some() {
            return Err(LacError::Busy {
                link: link.to_string(),
                reason: "is an aggregator",
            });
        }
        if self.port_by_link(link).is_some() {
            return Err(LacError::Busy {
                link: link.to_string(),
                reason: "already bound",
            });
        }
        if !self.driver.links().iter().any(|l| l == link) {
            return Err(LacError::link_not_found(link));
        }
        let mac = self
            .driver
            .mac_address(link)
            .ok_or_else(|| LacError::link_not_found(link))?;
        let port_no = next_free_number(self.ports.keys(), MAX_PORTS)
            .ok_or(LacError::Exhausted { resource: "port" })?;

        self.ports
            .insert(port_no, Port::new(port_no, link, mac, &self.system));
        self.timers.register(TimerHandle {
            port_no,
            kind: TimerKind::PortTick,
        });
        self.timers.register(TimerHandle {
            port_no,
            kind: TimerKind::TxScheduler,
        });
        self.refresh_system_id();
        self.init_port(port_no);
        self.schedule_link_check(port_no);
        self.publish_routes();

        info!(port = port_no, link, aggregator, %mac, "port added");
        Ok(port_no)
    }

    /// Unbinds `link`: detaches its port, drops its timers and frees the
    /// port number.
    pub fn remove_port(&mut self, link: &str) -> LacResult<()> {
        let port_no = self
            .port_by_link(link)
            .map(Port::port_no)
            .ok_or_else(|| LacError::port_not_found(link))?;

        self.timers.unregister_port(port_no);
        self.pending_link_checks.remove(&port_no);
        self.remove_from_aggregator(port_no);
        self.ports.remove(&port_no);
        self.publish_routes();

        warn!(port = port_no, link, "port removed");
        Ok(())
    }

    pub fn add_aggregator(&mut self, name: &str) -> LacResult<u16> {
        if self.aggregator_by_name(name).is_some() {
            return Err(LacError::AggregatorExists {
                name: name.to_string(),
            });
        }
        if self.port_by_link(name).is_some() {
            return Err(LacError::Busy {
                link: name.to_string(),
                reason: "already bound as a port",
            });
        }
        let aggr_no = next_free_number(self.aggregators.keys(), MAX_AGGRS)
            .ok_or(LacError::Exhausted {
                resource: "aggregator",
            })?;

        self.aggregators
            .insert(aggr_no, Aggregator::new(aggr_no, name));
        self.publish_routes();
        info!(aggregator = name, number = aggr_no, "aggregator added");
        Ok(aggr_no)
    }

    /// Destroys an administratively down aggregator after removing every
    /// member port from the system.
    pub fn remove_aggregator(&mut self, name: &str) -> LacResult<()> {
        let aggregator = self
            .aggregator_by_name(name)
            .ok_or_else(|| LacError::aggregator_not_found(name))?;
        if aggregator.admin_up {
            return Err(LacError::AggregatorUp {
                name: name.to_string(),
            });
        }
        let aggr_no = aggregator.aggr_no;
        let member_links: Vec<String> = aggregator
            .members
            .iter()
            .filter_map(|p| self.ports.get(p))
            .map(|p| p.link.clone())
            .collect();

        for link in member_links {
            self.remove_port(&link)?;
        }
        self.aggregators.remove(&aggr_no);
        self.publish_routes();

        info!(aggregator = name, "aggregator removed");
        Ok(())
    }

    pub fn set_aggregator_admin(&mut self, name: &str, up: bool) -> LacResult<()> {
        let aggregator = self
            .aggregators
            .values_mut()
            .find(|a| a.name == name)
            .ok_or_else(|| LacError::aggregator_not_found(name))?;
        aggregator.admin_up = up;
        Ok(())
    }

    /// Sets the aggregator address; only a member's own address is accepted.
    pub fn set_aggregator_mac(&mut self, name: &str, mac: MacAddress) -> LacResult<()> {
        let aggregator = self
            .aggregators
            .values()
            .find(|a| a.name == name)
            .ok_or_else(|| LacError::aggregator_not_found(name))?;
        let aggr_no = aggregator.aggr_no;
        let is_member_mac = aggregator
            .members
            .iter()
            .filter_map(|p| self.ports.get(p))
            .any(|p| p.mac == mac);
        if !is_member_mac {
            return Err(LacError::ForeignAddress {
                name: name.to_string(),
                mac: mac.to_string(),
            });
        }
        if let Some(aggregator) = self.aggregators.get_mut(&aggr_no) {
            aggregator.mac = mac;
            aggregator.mac_override = Some(mac);
        }
        Ok(())
    }

    // ---- clock ----

    /// One pass of the global timer walk: ticks every registered timer and
    /// runs the callback of each one that expired on this tick.
    pub fn global_tick(&mut self) {
        for handle in self.timers.snapshot() {
            if !self.timers.contains(&handle) {
                continue;
            }
            let Some(port) = self.ports.get_mut(&handle.port_no) else {
                continue;
            };
            let timer = match handle.kind {
                TimerKind::PortTick => &mut port.timers.tick,
                TimerKind::TxScheduler => &mut port.timers.tx_scheduler,
            };
            let was_active = timer.is_active();
            timer.tick();
            if !was_active || timer.is_active() {
                continue;
            }
            match handle.kind {
                TimerKind::PortTick => self.port_tick(handle.port_no),
                TimerKind::TxScheduler => self.tx_machine(handle.port_no, TxEvent::Txd),
            }
        }
    }

    fn port_tick(&mut self, port_no: u16) {
        self.rx_machine(port_no, RxEvent::Tick);
        self.mux_machine(port_no, MuxEvent::NewInfo);
        self.mux_machine(port_no, MuxEvent::Tick);
        self.periodic_machine(port_no, PeriodicEvent::Tick);
        self.tx_machine(port_no, TxEvent::Tick);
        if let Some(port) = self.ports.get_mut(&port_no) {
            port.timers.tick.start(PORT_TICKS);
        }
    }

    // ---- port control ----

    /// Puts every machine of the port into its initial state and restarts
    /// the port tick.
    pub(crate) fn init_port(&mut self, port_no: u16) {
        self.tx_machine(port_no, TxEvent::Init);
        self.periodic_machine(port_no, PeriodicEvent::Init);
        self.mux_machine(port_no, MuxEvent::Init);
        self.rx_machine(port_no, RxEvent::Init);
        if let Some(port) = self.ports.get_mut(&port_no) {
            port.timers.tick.stop();
            port.timers.tick.start(PORT_TICKS);
        }
    }

    pub(crate) fn enable_port(&mut self, port_no: u16) {
        let Some(port) = self.ports.get_mut(&port_no) else {
            return;
        };
        port.flags.port_enabled = true;
        self.mux_machine(port_no, MuxEvent::NewInfo);
        self.rx_machine(port_no, RxEvent::PortEnabled);
    }

    pub(crate) fn disable_port(&mut self, port_no: u16) {
        let Some(port) = self.ports.get_mut(&port_no) else {
            return;
        };
        port.flags.port_enabled = false;
        self.tx_machine(port_no, TxEvent::PortDisabled);
        self.periodic_machine(port_no, PeriodicEvent::PortDisabled);
        self.rx_machine(port_no, RxEvent::PortDisabled);
        self.mux_machine(port_no, MuxEvent::NewInfo);
    }

    /// Stops LACP on a port: receive machine to Lacp_Disabled, transmit
    /// and periodic machines stopped, mux detached.
    pub(crate) fn disable_lacp(&mut self, port_no: u16) {
        self.rx_lacp_disabled(port_no);
        self.tx_machine(port_no, TxEvent::PortDisabled);
        self.periodic_machine(port_no, PeriodicEvent::PortDisabled);
        self.force_detach(port_no);
    }

    /// Marks the port unselected and takes the mux to Detached.
    pub(crate) fn force_detach(&mut self, port_no: u16) {
        let Some(port) = self.ports.get_mut(&port_no) else {
            return;
        };
        port.selected = crate::port::Selected::Unselected;
        if port.mux_state != MuxState::Detached || port.aggregator.is_some() {
            self.mux_detached(port_no);
        }
    }

    // ---- aggregator membership ----

    pub(crate) fn add_to_aggregator(&mut self, port_no: u16, aggr_no: u16) {
        let Some(aggregator) = self.aggregators.get_mut(&aggr_no) else {
            return;
        };
        aggregator.add_member(port_no);
        if let Some(port) = self.ports.get_mut(&port_no) {
            port.aggregator = Some(aggr_no);
        }
        self.refresh_aggregator(aggr_no);
    }

    pub(crate) fn remove_from_aggregator(&mut self, port_no: u16) {
        let Some(aggr_no) = self.ports.get_mut(&port_no).and_then(|p| p.aggregator.take()) else {
            return;
        };
        if let Some(aggregator) = self.aggregators.get_mut(&aggr_no) {
            aggregator.remove_member(port_no);
            warn!(
                port = port_no,
                aggregator = aggr_no,
                members = ?aggregator.members,
                "port removed from aggregator"
            );
        }
        self.refresh_aggregator(aggr_no);
    }

    /// Recomputes the derived state of an aggregator: ready flag, address
    /// and the ready-link snapshot read by the frame path.
    pub(crate) fn refresh_aggregator(&mut self, aggr_no: u16) {
        let Some(aggregator) = self.aggregators.get(&aggr_no) else {
            return;
        };
        let members: Vec<&Port> = aggregator
            .members
            .iter()
            .filter_map(|p| self.ports.get(p))
            .collect();
        let ready = !members.is_empty() && members.iter().all(|p| p.flags.ready_n);
        let mac_override = aggregator
            .mac_override
            .filter(|mac| members.iter().any(|p| p.mac == *mac));
        let mac = mac_override.unwrap_or_else(|| {
            members
                .iter()
                .map(|p| p.mac)
                .min()
                .unwrap_or(MacAddress::ZERO)
        });
        let ready_links: Vec<ReadyLink> = members
            .iter()
            .filter(|p| p.mux_state == MuxState::Distributing && p.actor.state.distributing)
            .map(|p| ReadyLink {
                port_no: p.port_no,
                link: p.link.clone(),
            })
            .collect();

        if let Some(aggregator) = self.aggregators.get_mut(&aggr_no) {
            aggregator.ready = ready;
            aggregator.mac = mac;
            aggregator.mac_override = mac_override;
            if *aggregator.distributor.ready_links() != ready_links {
                aggregator.distributor.publish(ready_links);
            }
        }
        self.publish_routes();
    }

    /// Publishes the link and aggregator maps used by the frame path.
    pub(crate) fn publish_routes(&self) {
        let routes: HashMap<String, LinkRoute> = self
            .ports
            .values()
            .map(|port| {
                let target = port
                    .aggregator
                    .and_then(|a| self.aggregators.get(&a))
                    .map(|a| CollectorTarget {
                        aggregator: a.name.clone(),
                        distributor: a.distributor.clone(),
                    });
                let route = LinkRoute {
                    port_no: port.port_no,
                    aggregable: port.actor.state.aggregation,
                    collecting: port.actor.state.collecting,
                    target,
                };
                (port.link.clone(), route)
            })
            .collect();
        let aggregators = self
            .aggregators
            .values()
            .map(|a| (a.name.clone(), a.distributor.clone()))
            .collect();
        self.datapath.publish(routes, aggregators);
    }

    /// Takes the system id from the configured override or from port 1 and
    /// propagates a change to every port.
    pub(crate) fn refresh_system_id(&mut self) {
        let id = match self.fixed_system_id {
            Some(id) => id,
            None => match self.ports.get(&1) {
                Some(port) => port.mac,
                None => return,
            },
        };
        if id == self.system.system_id {
            return;
        }
        self.system.system_id = id;
        for port in self.ports.values_mut() {
            port.actor.system_id = id;
            port.actor_admin.info_mut().system_id = id;
        }
        info!(system_id = %id, "system id changed");
    }
}

/// Lowest number in `1..limit` not yielded by `used` (which is sorted).
fn next_free_number<'a>(used: impl Iterator<Item = &'a u16>, limit: u16) -> Option<u16> {
    let mut candidate = 1;
    for n in used {
        if *n != candidate {
            break;
        }
        candidate += 1;
    }
    (candidate < limit).then_some(candidate)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_next_free_number() {
        assert_eq!(next_free_number([].iter(), 50), Some(1));
        assert_eq!(next_free_number([1, 2, 4].iter(), 50), Some(3));
        assert_eq!(next_free_number([1, 2, 3].iter(), 4), None);
        assert_eq!(next_free_number([2, 3].iter(), 50), Some(1));
    }

    #[test]
    fn test_engine_config_from_file_config() {
        let mut config = LacdConfig::default();
        config.aggregators.initial_count = 3;
        config.system.priority = 7;
        let engine_config = EngineConfig::from(&config);
        assert_eq!(engine_config.initial_aggregators, 3);
        assert_eq!(engine_config.system_priority, 7);
        assert_eq!(engine_config.aggregator_prefix, "aggr");
    }
}
