//! Administrative control surface.
//!
//! Setters validate their target and return a [`LacError`] without
//! touching state when it is missing or already configured as requested.
//! Queries return owned, serializable records.

use crate::config::PortBinding;
use crate::debug::DebugCategory;
use crate::distribution::TrafficStats;
use crate::engine::LacEngine;
use crate::error::{LacError, LacResult};
use crate::machines::TxEvent;
use crate::port::{LacpMode, LacpTimeout, MuxState, Port, PortStats, RxState, Selected};
use crate::{DebugFlags, LACD_VERSION};
use lac_types::MacAddress;
use serde::Serialize;
use tracing::info;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SystemRecord {
    pub priority: u16,
    pub system_id: MacAddress,
    pub collector_max_delay: u16,
}

/// One side of a port's LACP conversation as shown to an operator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActorRecord {
    pub system_id: MacAddress,
    pub system_priority: u16,
    pub admin_key: u16,
    pub oper_key: u16,
    pub port_priority: u16,
    /// Wire encoding of the state bits.
    pub state: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PartnerRecord {
    pub system_id: MacAddress,
    pub system_priority: u16,
    pub port_no: u16,
    pub admin_key: u16,
    pub oper_key: u16,
    pub port_priority: u16,
    pub state: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PortRecord {
    pub port_no: u16,
    pub link: String,
    pub aggregator: Option<u16>,
    pub aggregator_name: Option<String>,
    pub enabled: bool,
    pub lacp_enabled: bool,
    pub rx_state: RxState,
    pub mux_state: MuxState,
    pub selected: Selected,
    pub actor: ActorRecord,
    pub partner: PartnerRecord,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AggregatorRecord {
    pub aggr_no: u16,
    pub name: String,
    pub key: u16,
    pub ready: bool,
    pub mac: MacAddress,
    pub admin_up: bool,
    pub members: Vec<u16>,
    pub distributing: Vec<u16>,
    pub traffic: TrafficStats,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PortStatsRecord {
    pub port_no: u16,
    pub link: String,
    #[serde(flatten)]
    pub stats: PortStats,
}

/// A request to the control surface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LacCommand {
    AddPort { aggregator: String, link: String },
    RemovePort { link: String },
    SetAggregable { port_no: u16, enabled: bool },
    SetMode { port_no: u16, mode: LacpMode },
    SetAdminKey { port_no: u16, key: u16 },
    SetPortPriority { port_no: u16, priority: u16 },
    SetTimeout { port_no: u16, timeout: LacpTimeout },
    SetSystemPriority(u16),
    SetCollectorDelay(u16),
    AddAggregator { name: String },
    RemoveAggregator { name: String },
    SetAggregatorAdmin { name: String, up: bool },
    SetAggregatorMac { name: String, mac: MacAddress },
    GetVersion,
    GetSystem,
    GetPorts,
    GetPort { link: String },
    GetAggregators,
    GetStats,
    GetDebug,
    DebugPort(u16),
    DebugToggle(DebugCategory),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum LacResponse {
    Done,
    PortAdded(u16),
    Version(u32),
    System(SystemRecord),
    Ports(Vec<PortRecord>),
    Port(PortRecord),
    Aggregators(Vec<AggregatorRecord>),
    Stats(Vec<PortStatsRecord>),
    Debug(DebugFlags),
}

impl LacEngine {
    fn port_mut_checked(&mut self, port_no: u16) -> LacResult<&mut Port> {
        self.ports
            .get_mut(&port_no)
            .ok_or_else(|| LacError::port_not_found(port_no))
    }

    /// Enables or disables LACP on a port.
    pub fn set_aggregable(&mut self, port_no: u16, enabled: bool) -> LacResult<()> {
        let port = self.port_mut_checked(port_no)?;
        if port.flags.lacp_enabled == enabled {
            return Err(LacError::AlreadySet {
                port: port_no.to_string(),
                what: "aggregation",
            });
        }

        port.actor.state.aggregation = enabled;
        port.actor_admin.info_mut().state.aggregation = enabled;
        port.flags.lacp_enabled = enabled;
        info!(port = port_no, enabled, "LACP aggregation changed");

        if enabled {
            self.init_port(port_no);
            self.schedule_link_check(port_no);
        } else {
            self.disable_lacp(port_no);
        }
        self.publish_routes();
        Ok(())
    }

    pub fn set_mode(&mut self, port_no: u16, mode: LacpMode) -> LacResult<()> {
        let port = self.port_mut_checked(port_no)?;
        port.actor_admin.info_mut().state.activity = mode.is_active();
        port.actor.state.activity = mode.is_active();
        self.notify_actor_change(port_no);
        Ok(())
    }

    pub fn set_port_priority(&mut self, port_no: u16, priority: u16) -> LacResult<()> {
        let port = self.port_mut_checked(port_no)?;
        port.actor_admin.info_mut().port_priority = priority;
        port.actor.port_priority = priority;
        self.notify_actor_change(port_no);
        Ok(())
    }

    pub fn set_timeout(&mut self, port_no: u16, timeout: LacpTimeout) -> LacResult<()> {
        let port = self.port_mut_checked(port_no)?;
        port.actor_admin.info_mut().state.timeout = timeout.is_short();
        port.actor.state.timeout = timeout.is_short();
        self.notify_actor_change(port_no);
        Ok(())
    }

    /// Sets the admin key. The operational key follows on the next link
    /// check, or at once while the link is down.
    pub fn set_admin_key(&mut self, port_no: u16, key: u16) -> LacResult<()> {
        let port = self.port_mut_checked(port_no)?;
        if port.actor_admin.info().key == key {
            return Ok(());
        }
        port.actor_admin.info_mut().key = key;
        if !port.link_state.carrier {
            port.actor.key = key;
        }
        self.schedule_link_check(port_no);
        Ok(())
    }

    pub fn set_system_priority(&mut self, priority: u16) -> LacResult<()> {
        if self.system.priority == priority {
            return Ok(());
        }
        self.system.priority = priority;
        let ports: Vec<u16> = self.ports.keys().copied().collect();
        for port_no in ports {
            if let Some(port) = self.ports.get_mut(&port_no) {
                port.actor.system_priority = priority;
                port.actor_admin.info_mut().system_priority = priority;
            }
            self.notify_actor_change(port_no);
        }
        info!(priority, "system priority changed");
        Ok(())
    }

    /// Sets the collector max delay advertised in every LACPDU.
    pub fn set_collector_delay(&mut self, delay: u16) -> LacResult<()> {
        if self.system.collector_max_delay == delay {
            return Ok(());
        }
        self.system.collector_max_delay = delay;
        let ports: Vec<u16> = self.ports.keys().copied().collect();
        for port_no in ports {
            self.notify_actor_change(port_no);
        }
        info!(delay, "collector max delay changed");
        Ok(())
    }

    /// Requests a LACPDU so the partner learns a changed actor record.
    fn notify_actor_change(&mut self, port_no: u16) {
        let enabled = self
            .ports
            .get(&port_no)
            .is_some_and(|p| p.flags.port_enabled && p.flags.lacp_enabled);
        if enabled {
            self.tx_machine(port_no, TxEvent::Ntt);
        }
    }

    /// Binds a configured port and applies its optional settings.
    pub fn apply_binding(&mut self, binding: &PortBinding) -> LacResult<u16> {
        let port_no = self.add_port(&binding.aggregator, &binding.link)?;
        self.set_admin_key(port_no, binding.admin_key())?;
        if let Some(priority) = binding.port_priority {
            self.set_port_priority(port_no, priority)?;
        }
        if let Some(mode) = binding.mode {
            self.set_mode(port_no, mode)?;
        }
        if let Some(timeout) = binding.timeout {
            self.set_timeout(port_no, timeout)?;
        }
        if binding.aggregable == Some(false) {
            self.set_aggregable(port_no, false)?;
        }
        Ok(port_no)
    }

    // ---- queries ----

    pub fn system_record(&self) -> SystemRecord {
        SystemRecord {
            priority: self.system.priority,
            system_id: self.system.system_id,
            collector_max_delay: self.system.collector_max_delay,
        }
    }

    pub fn port_record(&self, port: &Port) -> PortRecord {
        let aggregator_name = port
            .aggregator
            .and_then(|a| self.aggregators.get(&a))
            .map(|a| a.name.clone());
        PortRecord {
            port_no: port.port_no,
            link: port.link.clone(),
            aggregator: port.aggregator,
            aggregator_name,
            enabled: port.flags.port_enabled,
            lacp_enabled: port.flags.lacp_enabled,
            rx_state: port.rx_state,
            mux_state: port.mux_state,
            selected: port.selected,
            actor: ActorRecord {
                system_id: port.actor.system_id,
                system_priority: port.actor.system_priority,
                admin_key: port.actor_admin.info().key,
                oper_key: port.actor.key,
                port_priority: port.actor.port_priority,
                state: port.actor.state.to_wire(),
            },
            partner: PartnerRecord {
                system_id: port.partner.system_id,
                system_priority: port.partner.system_priority,
                port_no: port.partner.port_no,
                admin_key: port.partner_admin.info().key,
                oper_key: port.partner.key,
                port_priority: port.partner.port_priority,
                state: port.partner.state.to_wire(),
            },
        }
    }

    pub fn port_records(&self) -> Vec<PortRecord> {
        self.ports.values().map(|p| self.port_record(p)).collect()
    }

    pub fn aggregator_records(&self) -> Vec<AggregatorRecord> {
        self.aggregators
            .values()
            .map(|a| AggregatorRecord {
                aggr_no: a.aggr_no,
                name: a.name.clone(),
                key: a.key,
                ready: a.ready,
                mac: a.mac,
                admin_up: a.admin_up,
                members: a.members.clone(),
                distributing: a.distributor.ready_links().iter().map(|l| l.port_no).collect(),
                traffic: a.distributor.counters().snapshot(),
            })
            .collect()
    }

    pub fn port_stats_records(&self) -> Vec<PortStatsRecord> {
        self.ports
            .values()
            .map(|p| PortStatsRecord {
                port_no: p.port_no,
                link: p.link.clone(),
                stats: p.stats,
            })
            .collect()
    }

    /// Executes one control command.
    pub fn dispatch(&mut self, command: LacCommand) -> LacResult<LacResponse> {
        let response = match command {
            LacCommand::AddPort { aggregator, link } => {
                LacResponse::PortAdded(self.add_port(&aggregator, &link)?)
            }
            LacCommand::RemovePort { link } => {
                self.remove_port(&link)?;
                LacResponse::Done
            }
            LacCommand::SetAggregable { port_no, enabled } => {
                self.set_aggregable(port_no, enabled)?;
                LacResponse::Done
            }
            LacCommand::SetMode { port_no, mode } => {
                self.set_mode(port_no, mode)?;
                LacResponse::Done
            }
            LacCommand::SetAdminKey { port_no, key } => {
                self.set_admin_key(port_no, key)?;
                LacResponse::Done
            }
            LacCommand::SetPortPriority { port_no, priority } => {
                self.set_port_priority(port_no, priority)?;
                LacResponse::Done
            }
            LacCommand::SetTimeout { port_no, timeout } => {
                self.set_timeout(port_no, timeout)?;
                LacResponse::Done
            }
            LacCommand::SetSystemPriority(priority) => {
                self.set_system_priority(priority)?;
                LacResponse::Done
            }
            LacCommand::SetCollectorDelay(delay) => {
                self.set_collector_delay(delay)?;
                LacResponse::Done
            }
            LacCommand::AddAggregator { name } => {
                self.add_aggregator(&name)?;
                LacResponse::Done
            }
            LacCommand::RemoveAggregator { name } => {
                self.remove_aggregator(&name)?;
                LacResponse::Done
            }
            LacCommand::SetAggregatorAdmin { name, up } => {
                self.set_aggregator_admin(&name, up)?;
                LacResponse::Done
            }
            LacCommand::SetAggregatorMac { name, mac } => {
                self.set_aggregator_mac(&name, mac)?;
                LacResponse::Done
            }
            LacCommand::GetVersion => LacResponse::Version(LACD_VERSION),
            LacCommand::GetSystem => LacResponse::System(self.system_record()),
            LacCommand::GetPorts => LacResponse::Ports(self.port_records()),
            LacCommand::GetPort { link } => {
                let port = self
                    .port_by_link(&link)
                    .ok_or_else(|| LacError::port_not_found(&link))?;
                LacResponse::Port(self.port_record(port))
            }
            LacCommand::GetAggregators => LacResponse::Aggregators(self.aggregator_records()),
            LacCommand::GetStats => LacResponse::Stats(self.port_stats_records()),
            LacCommand::GetDebug => LacResponse::Debug(self.debug),
            LacCommand::DebugPort(port_no) => {
                if !self.ports.contains_key(&port_no) {
                    return Err(LacError::port_not_found(port_no));
                }
                self.debug.toggle_port(port_no);
                LacResponse::Debug(self.debug)
            }
            LacCommand::DebugToggle(category) => {
                self.debug.toggle(category);
                LacResponse::Debug(self.debug)
            }
        };
        Ok(response)
    }
}
