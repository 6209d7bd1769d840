//! Port model: one physical link bound to the aggregation subsystem.

use crate::engine::SystemInfo;
use crate::timer::LacTimer;
use crate::{DEFAULT_ADMIN_KEY, DEFAULT_PRIORITY};
use lac_types::{LacInfo, LacState, LinkInfo, MacAddress};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Outcome of selection for a port.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Selected {
    #[default]
    Unselected,
    Selected,
    Standby,
}

/// Receive machine states.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RxState {
    #[default]
    Initialize,
    PortDisabled,
    LacpDisabled,
    Expired,
    Defaulted,
    Current,
}

/// Mux machine states.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MuxState {
    #[default]
    Detached,
    Waiting,
    Attached,
    Collecting,
    Distributing,
}

impl fmt::Display for MuxState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

impl fmt::Display for RxState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Active or passive LACP participation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LacpMode {
    Active,
    Passive,
}

impl LacpMode {
    pub const fn is_active(self) -> bool {
        matches!(self, LacpMode::Active)
    }
}

/// Requested partner timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LacpTimeout {
    Short,
    Long,
}

impl LacpTimeout {
    pub const fn is_short(self) -> bool {
        matches!(self, LacpTimeout::Short)
    }
}

/// Administratively configured LACP information.
///
/// Admin records are never used directly by the machines; the operational
/// record is reset from them with [`AdminInfo::operational`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AdminInfo(LacInfo);

impl AdminInfo {
    /// Local defaults: key 1, priority 32768, active, long timeout,
    /// aggregable, defaulted.
    pub fn actor_default(port_no: u16, system: &SystemInfo) -> Self {
        AdminInfo(LacInfo {
            system_priority: system.priority,
            system_id: system.system_id,
            key: DEFAULT_ADMIN_KEY,
            port_priority: DEFAULT_PRIORITY,
            port_no,
            state: LacState {
                activity: true,
                timeout: false,
                aggregation: true,
                defaulted: true,
                ..Default::default()
            },
        })
    }

    /// Partner assumed before any LACPDU arrives: a passive, long-timeout
    /// peer that is in sync and passing traffic.
    pub fn partner_default(port_no: u16) -> Self {
        AdminInfo(LacInfo {
            system_priority: DEFAULT_PRIORITY,
            system_id: MacAddress::ZERO,
            key: DEFAULT_ADMIN_KEY,
            port_priority: DEFAULT_PRIORITY,
            port_no,
            state: LacState {
                activity: false,
                timeout: false,
                aggregation: true,
                synchronization: true,
                collecting: true,
                distributing: true,
                defaulted: true,
                expired: false,
            },
        })
    }

    /// The operational record this admin record resets to.
    pub fn operational(&self) -> LacInfo {
        self.0
    }

    pub fn info(&self) -> &LacInfo {
        &self.0
    }

    pub(crate) fn info_mut(&mut self) -> &mut LacInfo {
        &mut self.0
    }
}

/// Per-port configuration flags.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PortFlags {
    pub port_enabled: bool,
    pub lacp_enabled: bool,
    pub ready_n: bool,
    pub ntt: bool,
    pub port_moved: bool,
}

/// The six countdown timers of a port.
#[derive(Debug, Default, Clone, Copy)]
pub struct PortTimers {
    pub current_while: LacTimer,
    pub periodic: LacTimer,
    pub wait_while: LacTimer,
    pub ntt_delay: LacTimer,
    /// Registered: drives the per-port tick.
    pub tick: LacTimer,
    /// Registered: transmission opportunity.
    pub tx_scheduler: LacTimer,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortStats {
    pub lacpdu_rx: u64,
    pub lacpdu_tx: u64,
    pub unknown_rx: u64,
    pub illegal_rx: u64,
    pub tx_failures: u64,
}

/// One physical link under LACP control.
#[derive(Debug, Clone)]
pub struct Port {
    pub(crate) port_no: u16,
    pub(crate) link: String,
    pub(crate) mac: MacAddress,
    pub(crate) actor: LacInfo,
    pub(crate) actor_admin: AdminInfo,
    pub(crate) partner: LacInfo,
    pub(crate) partner_admin: AdminInfo,
    pub(crate) rx_state: RxState,
    pub(crate) mux_state: MuxState,
    pub(crate) selected: Selected,
    pub(crate) timers: PortTimers,
    pub(crate) flags: PortFlags,
    pub(crate) link_state: LinkInfo,
    pub(crate) ntt_count: u32,
    pub(crate) aggregator: Option<u16>,
    pub(crate) partner_collector_max_delay: u16,
    pub(crate) stats: PortStats,
}

impl Port {
    /// Creates a port with admin defaults, LACP enabled and the port
    /// itself disabled until a link check enables it.
    pub fn new(port_no: u16, link: impl Into<String>, mac: MacAddress, system: &SystemInfo) -> Self {
        let actor_admin = AdminInfo::actor_default(port_no, system);
        let partner_admin = AdminInfo::partner_default(port_no);
        Port {
            port_no,
            link: link.into(),
            mac,
            actor: actor_admin.operational(),
            actor_admin,
            partner: partner_admin.operational(),
            partner_admin,
            rx_state: RxState::Initialize,
            mux_state: MuxState::Detached,
            selected: Selected::Unselected,
            timers: PortTimers::default(),
            flags: PortFlags {
                lacp_enabled: true,
                ..Default::default()
            },
            link_state: LinkInfo::default(),
            ntt_count: 0,
            aggregator: None,
            partner_collector_max_delay: 0,
            stats: PortStats::default(),
        }
    }

    /// Replaces the operational actor record with the admin one.
    pub(crate) fn reset_actor_from_admin(&mut self) {
        self.actor = self.actor_admin.operational();
        self.actor.port_no = self.port_no;
    }

    /// Takes the partner record from the partner admin defaults and marks
    /// the actor as defaulted.
    pub(crate) fn record_default(&mut self) {
        self.partner = self.partner_admin.operational();
        self.actor.state.defaulted = true;
    }

    /// True when at least one end runs LACP in active mode.
    pub(crate) fn either_active(&self) -> bool {
        self.actor.state.activity || self.partner.state.activity
    }

    pub fn port_no(&self) -> u16 {
        self.port_no
    }

    pub fn link(&self) -> &str {
        &self.link
    }

    pub fn mac(&self) -> MacAddress {
        self.mac
    }

    pub fn actor(&self) -> &LacInfo {
        &self.actor
    }

    pub fn actor_admin(&self) -> &AdminInfo {
        &self.actor_admin
    }

    pub fn partner(&self) -> &LacInfo {
        &self.partner
    }

    pub fn partner_admin(&self) -> &AdminInfo {
        &self.partner_admin
    }

    pub fn rx_state(&self) -> RxState {
        self.rx_state
    }

    pub fn mux_state(&self) -> MuxState {
        self.mux_state
    }

    pub fn selected(&self) -> Selected {
        self.selected
    }

    pub fn flags(&self) -> PortFlags {
        self.flags
    }

    pub fn timers(&self) -> &PortTimers {
        &self.timers
    }

    pub fn link_state(&self) -> LinkInfo {
        self.link_state
    }

    pub fn aggregator(&self) -> Option<u16> {
        self.aggregator
    }

    pub fn stats(&self) -> PortStats {
        self.stats
    }

    pub fn partner_collector_max_delay(&self) -> u16 {
        self.partner_collector_max_delay
    }
}
