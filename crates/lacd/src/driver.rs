//! Device-layer collaborator of the engine.

use crate::config::LinkConfig;
use lac_types::{LinkInfo, MacAddress};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use thiserror::Error;
use tracing::debug;

/// Transmission failures reported by a [`LinkDriver`]. All of them are
/// treated as transient by the transmit machine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DriverError {
    #[error("no transmit buffer available")]
    NoBuffer,

    #[error("link '{0}' is unavailable")]
    Unavailable(String),
}

/// Access to physical links.
///
/// `link_info` may block and is only called from the link monitor or from
/// explicit link-check requests, never from the frame path.
pub trait LinkDriver: Send + Sync {
    /// Transmit a raw Ethernet frame on physical link `link`.
    fn transmit(&self, link: &str, frame: &[u8]) -> Result<(), DriverError>;

    /// Deliver a received frame up the stack on logical interface `iface`.
    fn deliver(&self, iface: &str, frame: &[u8]);

    /// Physical links available for binding.
    fn links(&self) -> Vec<String>;

    /// Carrier, speed and duplex of `link`; `None` if it does not exist.
    fn link_info(&self, link: &str) -> Option<LinkInfo>;

    fn mac_address(&self, link: &str) -> Option<MacAddress>;
}

/// Driver over a fixed set of links described in configuration.
///
/// Transmitted and delivered frames are counted and logged; link state can
/// be changed at runtime with [`set_link_info`](Self::set_link_info).
#[derive(Debug, Default)]
pub struct StaticLinkDriver {
    links: RwLock<Vec<LinkConfig>>,
    transmitted: Mutex<HashMap<String, u64>>,
    delivered: Mutex<HashMap<String, u64>>,
}

impl StaticLinkDriver {
    pub fn from_config(links: &[LinkConfig]) -> Self {
        StaticLinkDriver {
            links: RwLock::new(links.to_vec()),
            ..Default::default()
        }
    }

    /// Updates the reported state of `link`; returns false if unknown.
    pub fn set_link_info(&self, link: &str, info: LinkInfo) -> bool {
        let mut links = self.links.write();
        match links.iter_mut().find(|l| l.name == link) {
            Some(config) => {
                config.carrier = info.carrier;
                config.speed = info.speed;
                config.duplex = info.duplex;
                true
            }
            None => false,
        }
    }

    pub fn transmitted(&self, link: &str) -> u64 {
        self.transmitted.lock().get(link).copied().unwrap_or(0)
    }

    pub fn delivered(&self, iface: &str) -> u64 {
        self.delivered.lock().get(iface).copied().unwrap_or(0)
    }
}

impl LinkDriver for StaticLinkDriver {
    fn transmit(&self, link: &str, frame: &[u8]) -> Result<(), DriverError> {
        let carrier = self
            .links
            .read()
            .iter()
            .find(|l| l.name == link)
            .map(|l| l.carrier);
        match carrier {
            Some(true) => {
                debug!(link, len = frame.len(), "transmit");
                *self.transmitted.lock().entry(link.to_string()).or_default() += 1;
                Ok(())
            }
            _ => Err(DriverError::Unavailable(link.to_string())),
        }
    }

    fn deliver(&self, iface: &str, frame: &[u8]) {
        debug!(iface, len = frame.len(), "deliver");
        *self.delivered.lock().entry(iface.to_string()).or_default() += 1;
    }

    fn links(&self) -> Vec<String> {
        self.links.read().iter().map(|l| l.name.clone()).collect()
    }

    fn link_info(&self, link: &str) -> Option<LinkInfo> {
        self.links
            .read()
            .iter()
            .find(|l| l.name == link)
            .map(LinkConfig::link_info)
    }

    fn mac_address(&self, link: &str) -> Option<MacAddress> {
        self.links
            .read()
            .iter()
            .find(|l| l.name == link)
            .map(|l| l.mac)
    }
}
