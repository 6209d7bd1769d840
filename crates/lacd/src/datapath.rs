//! Frame path: collection of inbound data frames and distribution of
//! outbound frames over an aggregator's ready links.
//!
//! Nothing here takes the engine lock. The engine publishes fresh route
//! maps on every membership or collector change; readers load the current
//! snapshot and never observe a partially updated one.

use crate::distribution::Distributor;
use crate::driver::LinkDriver;
use crate::input::{classify, valid_source, FrameKind};
use arc_swap::ArcSwap;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// The aggregator a link is attached to.
#[derive(Debug, Clone)]
pub struct CollectorTarget {
    pub aggregator: String,
    pub distributor: Arc<Distributor>,
}

/// Receive-side view of one bound link.
#[derive(Debug, Clone)]
pub struct LinkRoute {
    pub port_no: u16,
    /// Actor aggregation bit.
    pub aggregable: bool,
    /// Actor collecting bit.
    pub collecting: bool,
    pub target: Option<CollectorTarget>,
}

/// Outcome of [`DataPath::receive`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Collect {
    /// Slow-protocols frame; hand it to the engine.
    Control,
    /// Delivered up on the named aggregator.
    Delivered { aggregator: String },
    /// Not ours to handle: the link is unbound or individual.
    PassThrough,
    Dropped,
}

pub struct DataPath {
    driver: Arc<dyn LinkDriver>,
    routes: ArcSwap<HashMap<String, LinkRoute>>,
    aggregators: ArcSwap<HashMap<String, Arc<Distributor>>>,
}

impl std::fmt::Debug for DataPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataPath")
            .field("routes", &self.routes.load().len())
            .field("aggregators", &self.aggregators.load().len())
            .finish()
    }
}

impl DataPath {
    pub fn new(driver: Arc<dyn LinkDriver>) -> Self {
        DataPath {
            driver,
            routes: ArcSwap::from_pointee(HashMap::new()),
            aggregators: ArcSwap::from_pointee(HashMap::new()),
        }
    }

    /// Handles a frame received on physical link `link`.
    pub fn receive(&self, link: &str, frame: &[u8]) -> Collect {
        let routes = self.routes.load();
        let Some(route) = routes.get(link) else {
            return Collect::PassThrough;
        };

        match classify(frame) {
            FrameKind::Runt => return Collect::Dropped,
            FrameKind::Lacpdu | FrameKind::SlowProtocol(_) => return Collect::Control,
            FrameKind::Data => {}
        }
        if !route.aggregable {
            return Collect::PassThrough;
        }
        let Some(target) = &route.target else {
            debug!(link, port = route.port_no, "frame on unattached port dropped");
            return Collect::Dropped;
        };
        if !route.collecting || valid_source(frame).is_none() {
            target.distributor.counters().record_rx_drop();
            return Collect::Dropped;
        }

        target.distributor.counters().record_rx(frame.len());
        self.driver.deliver(&target.aggregator, frame);
        Collect::Delivered {
            aggregator: target.aggregator.clone(),
        }
    }

    /// Sends `frame` out of aggregator `aggregator`. Returns the physical
    /// link used, `None` if the frame was dropped.
    pub fn transmit(&self, aggregator: &str, frame: &[u8]) -> Option<String> {
        let distributor = self.distributor(aggregator)?;
        let link = distributor.select(frame)?;
        match self.driver.transmit(&link.link, frame) {
            Ok(()) => {
                distributor.counters().record_tx(frame.len());
                Some(link.link)
            }
            Err(e) => {
                debug!(aggregator, link = %link.link, error = %e, "distribution transmit failed");
                distributor.counters().record_tx_drop();
                None
            }
        }
    }

    pub fn distributor(&self, aggregator: &str) -> Option<Arc<Distributor>> {
        self.aggregators.load().get(aggregator).cloned()
    }

    pub(crate) fn publish(
        &self,
        routes: HashMap<String, LinkRoute>,
        aggregators: HashMap<String, Arc<Distributor>>,
    ) {
        self.routes.store(Arc::new(routes));
        self.aggregators.store(Arc::new(aggregators));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::engine_with_links;
    use lac_types::{LinkInfo, ETH_HEADER_LEN};
    use pretty_assertions::assert_eq;

    fn data_frame(dest_tail: u8) -> Vec<u8> {
        let mut frame = vec![0u8; 64];
        frame[0..6].copy_from_slice(&[0x02, 0, 0, 0, 0, dest_tail]);
        frame[6..12].copy_from_slice(&[0x02, 0, 0, 0, 0, 0x99]);
        frame[12] = 0x88;
        frame[13] = 0xb5;
        frame[ETH_HEADER_LEN] = 0xab;
        frame
    }

    #[test]
    fn test_unbound_and_runt() {
        let (engine, _) = engine_with_links(1);
        let datapath = engine.datapath();
        assert_eq!(datapath.receive("eth0", &data_frame(1)), Collect::PassThrough);
        assert!(datapath.transmit("aggr0", &data_frame(1)).is_none());
        assert!(datapath.transmit("nope", &data_frame(1)).is_none());
    }

    #[test]
    fn test_collecting_port_delivers_to_aggregator() {
        let (mut engine, driver) = engine_with_links(1);
        let port_no = engine.add_port("aggr0", "eth0").unwrap();
        engine.run_link_checks();
        let datapath = engine.datapath();

        // waiting: not collecting yet
        assert_eq!(datapath.receive("eth0", &data_frame(1)), Collect::Dropped);
        assert_eq!(datapath.receive("eth0", &data_frame(1)[..10]), Collect::Dropped);

        for _ in 0..3 {
            engine.global_tick();
        }
        assert!(engine.port(port_no).unwrap().actor().state.collecting);

        assert_eq!(
            datapath.receive("eth0", &data_frame(1)),
            Collect::Delivered {
                aggregator: "aggr0".to_string()
            }
        );
        assert_eq!(driver.delivered("aggr0").len(), 1);

        assert_eq!(datapath.transmit("aggr0", &data_frame(1)), Some("eth0".to_string()));
        let stats = datapath.distributor("aggr0").unwrap().counters().snapshot();
        assert_eq!(stats.rx_packets, 1);
        assert_eq!(stats.tx_packets, 1);

        driver.set_link_info("eth0", LinkInfo::down());
        assert!(datapath.transmit("aggr0", &data_frame(1)).is_none());
        let stats = datapath.distributor("aggr0").unwrap().counters().snapshot();
        assert_eq!(stats.tx_dropped, 1);
        assert_eq!(stats.rx_dropped, 1);
    }

    #[test]
    fn test_individual_port_passes_through() {
        let (mut engine, _) = engine_with_links(1);
        let port_no = engine.add_port("aggr0", "eth0").unwrap();
        engine.set_aggregable(port_no, false).unwrap();
        assert_eq!(
            engine.datapath().receive("eth0", &data_frame(1)),
            Collect::PassThrough
        );
    }
}
