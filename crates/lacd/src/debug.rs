//! Runtime debug toggles.
//!
//! Toggles never suppress events; they promote them. An event whose
//! category is enabled for its port is logged at `info`, otherwise at
//! `debug`.

use crate::config::DebugConfig;
use crate::MAX_PORTS;
use serde::Serialize;

/// Debug categories that can be toggled from the control surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebugCategory {
    Rx,
    Tx,
    State,
    Warn,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DebugFlags {
    /// Bit n set: port n selected. No bits set means every port.
    pub port_mask: u64,
    pub rx: bool,
    pub tx: bool,
    pub state: bool,
    pub warn: bool,
}

impl DebugFlags {
    pub fn from_config(config: &DebugConfig) -> Self {
        let mut flags = DebugFlags {
            rx: config.rx,
            tx: config.tx,
            state: config.state,
            warn: config.warn,
            ..Default::default()
        };
        for port_no in &config.ports {
            flags.toggle_port(*port_no);
        }
        flags
    }

    /// Flips selection of `port_no`; returns the new setting.
    pub fn toggle_port(&mut self, port_no: u16) -> bool {
        if port_no == 0 || port_no >= MAX_PORTS {
            return false;
        }
        self.port_mask ^= 1u64 << port_no;
        self.port_mask & (1u64 << port_no) != 0
    }

    /// Flips a category; returns the new setting.
    pub fn toggle(&mut self, category: DebugCategory) -> bool {
        let flag = match category {
            DebugCategory::Rx => &mut self.rx,
            DebugCategory::Tx => &mut self.tx,
            DebugCategory::State => &mut self.state,
            DebugCategory::Warn => &mut self.warn,
        };
        *flag = !*flag;
        *flag
    }

    fn port_selected(&self, port_no: u16) -> bool {
        self.port_mask == 0 || (port_no < MAX_PORTS && self.port_mask & (1u64 << port_no) != 0)
    }

    pub fn enabled(&self, category: DebugCategory, port_no: u16) -> bool {
        let on = match category {
            DebugCategory::Rx => self.rx,
            DebugCategory::Tx => self.tx,
            DebugCategory::State => self.state,
            DebugCategory::Warn => self.warn,
        };
        on && self.port_selected(port_no)
    }
}

/// Logs at `info` when `$enabled`, else at `debug`.
macro_rules! lac_event {
    ($enabled:expr, $($arg:tt)+) => {
        if $enabled {
            ::tracing::info!($($arg)+)
        } else {
            ::tracing::debug!($($arg)+)
        }
    };
}

pub(crate) use lac_event;
