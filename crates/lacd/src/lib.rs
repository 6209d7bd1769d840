//! IEEE 802.3ad link aggregation engine.
//!
//! [`LacEngine`] owns every port, aggregator and timer and runs the four
//! per-port LACP machines (receive, periodic, transmit, mux) together with
//! the selection logic. It is single-writer: callers serialize access, the
//! daemon does so with a mutex.
//!
//! The frame path does not go through the engine. [`DataPath`] reads
//! snapshots the engine publishes, so distribution and collection never
//! block on protocol processing.
//!
//! [`LacDaemon`] wraps an engine in tokio tasks: a 1 Hz timer walk, a link
//! monitor that samples physical links off the lock, and a command server.

pub mod aggregator;
pub mod config;
pub mod control;
pub mod daemon;
pub mod datapath;
pub mod debug;
pub mod distribution;
pub mod driver;
pub mod engine;
pub mod error;
pub mod input;
pub mod link;
pub mod machines;
pub mod port;
pub mod timer;

#[cfg(test)]
mod testutil;

pub use aggregator::Aggregator;
pub use config::LacdConfig;
pub use control::{LacCommand, LacResponse};
pub use daemon::{DaemonHandle, LacDaemon};
pub use datapath::{Collect, DataPath};
pub use debug::DebugFlags;
pub use driver::{LinkDriver, StaticLinkDriver};
pub use engine::{EngineConfig, LacEngine, SystemInfo};
pub use error::{ErrorClass, LacError, LacResult};
pub use input::RxDisposition;
pub use link::NetdevEvent;
pub use port::{LacpMode, LacpTimeout, MuxState, Port, RxState, Selected};

/// Exclusive upper bound on port numbers; 0 is reserved.
pub const MAX_PORTS: u16 = 50;

/// Exclusive upper bound on aggregator numbers; 0 is reserved.
pub const MAX_AGGRS: u16 = 50;

/// Default system and port priority.
pub const DEFAULT_PRIORITY: u16 = 32768;

pub const DEFAULT_ADMIN_KEY: u16 = 1;

/// Version reported by the control surface.
pub const LACD_VERSION: u32 = 0x0001_0000;
