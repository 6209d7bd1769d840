//! The per-port LACP machines and selection logic.
//!
//! Each machine is an `impl LacEngine` block keyed by port number, so a
//! machine may read other ports and aggregators while handling an event.
//! Durations are in ticks of the global walk.

mod mux;
mod periodic;
mod rx;
mod selection;
mod tx;

use lac_types::Lacpdu;

pub const FAST_PERIODIC_TICKS: u32 = 1;
pub const SLOW_PERIODIC_TICKS: u32 = 30;
pub const SHORT_TIMEOUT_TICKS: u32 = 3;
pub const LONG_TIMEOUT_TICKS: u32 = 90;
pub const AGGREGATE_WAIT_TICKS: u32 = 2;

/// Transmit rate window.
pub const TX_INTERVAL_TICKS: u32 = 1;
pub const PORT_TICKS: u32 = 1;
pub const TX_SCHEDULE_TICKS: u32 = 1;

/// LACPDUs allowed per transmit window.
pub const MAX_TX_PER_INTERVAL: u32 = 3;

/// Receive machine events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RxEvent {
    Init,
    PortEnabled,
    PortDisabled,
    Tick,
    Received(Lacpdu),
    /// A LACPDU arrived on another port.
    CheckMoved(Lacpdu),
}

/// Mux machine events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MuxEvent {
    Init,
    NewInfo,
    Received,
    Tick,
}

/// Transmit machine events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxEvent {
    Init,
    PortDisabled,
    /// Need to transmit.
    Ntt,
    Tick,
    /// The transmit scheduler fired.
    Txd,
}

/// Periodic transmission machine events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeriodicEvent {
    Init,
    PortDisabled,
    Tick,
}
