//! Engine fixtures shared by the unit tests.

use crate::driver::{DriverError, LinkDriver};
use crate::engine::{EngineConfig, LacEngine};
use lac_types::{LinkInfo, LinkSpeed, MacAddress};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Driver that records every transmitted and delivered frame.
#[derive(Debug, Default)]
pub(crate) struct RecordingDriver {
    links: Mutex<Vec<(String, MacAddress, LinkInfo)>>,
    sent: Mutex<HashMap<String, Vec<Vec<u8>>>>,
    delivered: Mutex<HashMap<String, Vec<Vec<u8>>>>,
    link_info_calls: AtomicUsize,
}

impl RecordingDriver {
    pub(crate) fn with_links(count: u8) -> Self {
        let driver = RecordingDriver::default();
        for n in 0..count {
            driver.links.lock().push((
                format!("eth{}", n),
                MacAddress::new([2, 0, 0, 0, 0, n + 1]),
                LinkInfo::up(LinkSpeed::Mb1000),
            ));
        }
        driver
    }

    pub(crate) fn set_link_info(&self, link: &str, info: LinkInfo) {
        if let Some(entry) = self.links.lock().iter_mut().find(|l| l.0 == link) {
            entry.2 = info;
        }
    }

    pub(crate) fn sent(&self, link: &str) -> Vec<Vec<u8>> {
        self.sent.lock().get(link).cloned().unwrap_or_default()
    }

    pub(crate) fn delivered(&self, iface: &str) -> Vec<Vec<u8>> {
        self.delivered.lock().get(iface).cloned().unwrap_or_default()
    }

    /// Number of link state queries served so far.
    pub(crate) fn link_info_calls(&self) -> usize {
        self.link_info_calls.load(Ordering::Relaxed)
    }
}

impl LinkDriver for RecordingDriver {
    fn transmit(&self, link: &str, frame: &[u8]) -> Result<(), DriverError> {
        let carrier = self
            .links
            .lock()
            .iter()
            .find(|l| l.0 == link)
            .is_some_and(|l| l.2.carrier);
        if !carrier {
            return Err(DriverError::Unavailable(link.to_string()));
        }
        self.sent
            .lock()
            .entry(link.to_string())
            .or_default()
            .push(frame.to_vec());
        Ok(())
    }

    fn deliver(&self, iface: &str, frame: &[u8]) {
        self.delivered
            .lock()
            .entry(iface.to_string())
            .or_default()
            .push(frame.to_vec());
    }

    fn links(&self) -> Vec<String> {
        self.links.lock().iter().map(|l| l.0.clone()).collect()
    }

    fn link_info(&self, link: &str) -> Option<LinkInfo> {
        self.link_info_calls.fetch_add(1, Ordering::Relaxed);
        self.links.lock().iter().find(|l| l.0 == link).map(|l| l.2)
    }

    fn mac_address(&self, link: &str) -> Option<MacAddress> {
        self.links.lock().iter().find(|l| l.0 == link).map(|l| l.1)
    }
}

/// An engine with one aggregator, `aggr0`, and links `eth0..`.
pub(crate) fn engine_with_links(count: u8) -> (LacEngine, Arc<RecordingDriver>) {
    let driver = Arc::new(RecordingDriver::with_links(count));
    let engine = LacEngine::new(EngineConfig::default(), driver.clone()).unwrap();
    (engine, driver)
}
