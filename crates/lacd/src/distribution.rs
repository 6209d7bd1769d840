//! Frame distribution across the distributing links of an aggregator.
//!
//! The engine publishes each aggregator's ready links as an immutable
//! snapshot; the frame path loads the current snapshot without locking and
//! hashes the frame onto it. Hashing is deterministic per flow:
//!
//! - non-IPv4 (and IPv4 that is neither TCP nor UDP): XOR of the last four
//!   octets of destination and source MAC, folded by 16 and 8 bits;
//! - IPv4 TCP/UDP: XOR of the port numbers folded by 8 bits, reconciled
//!   through a small table so every fragment of a datagram takes the link
//!   chosen for its first fragment.

use arc_swap::ArcSwap;
use byteorder::{BigEndian, ByteOrder};
use lac_types::{MacAddress, ETHERTYPE_IPV4, ETH_HEADER_LEN};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

pub const FRAGMENT_BUCKETS: usize = 32;

const IP_MORE_FRAGMENTS: u16 = 0x2000;
const IP_PROTO_TCP: u8 = 6;
const IP_PROTO_UDP: u8 = 17;
const IPV4_MIN_HEADER: usize = 20;

/// A link eligible to carry outbound frames.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadyLink {
    pub port_no: u16,
    pub link: String,
}

/// MAC-pair hash onto `count` links.
pub fn mac_hash(dest: MacAddress, source: MacAddress, count: usize) -> usize {
    let mut hash = dest.tail_word() ^ source.tail_word();
    hash ^= hash >> 16;
    hash ^= hash >> 8;
    hash as usize % count
}

/// Transport port-pair hash onto `count` links.
pub fn transport_hash(source_port: u16, dest_port: u16, count: usize) -> usize {
    let mut hash = u32::from(source_port ^ dest_port);
    hash ^= hash >> 8;
    hash as usize % count
}

/// Identity of an IPv4 datagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FragmentKey {
    pub id: u16,
    pub source: [u8; 4],
    pub dest: [u8; 4],
}

#[derive(Debug, Clone)]
struct FragmentEntry {
    key: FragmentKey,
    link: usize,
}

/// Link choices of datagrams whose fragments are still in flight.
///
/// Buckets are indexed by IP identification; chains are unbounded and an
/// entry only leaves when the terminal fragment passes.
#[derive(Debug)]
pub struct FragmentTable {
    buckets: Vec<Vec<FragmentEntry>>,
}

impl Default for FragmentTable {
    fn default() -> Self {
        Self::new()
    }
}

impl FragmentTable {
    pub fn new() -> Self {
        FragmentTable {
            buckets: vec![Vec::new(); FRAGMENT_BUCKETS],
        }
    }

    /// Returns the link for `key`: a previously recorded one (clamped to 0
    /// if the link count shrank) or `hash`. The first fragment of a
    /// fragmented datagram records its choice; the terminal one removes it.
    pub fn resolve(
        &mut self,
        key: FragmentKey,
        hash: usize,
        link_count: usize,
        more_fragments: bool,
    ) -> usize {
        let bucket = &mut self.buckets[usize::from(key.id) % FRAGMENT_BUCKETS];
        if let Some(pos) = bucket.iter().position(|e| e.key == key) {
            let entry = &mut bucket[pos];
            if entry.link >= link_count {
                entry.link = 0;
            }
            let link = entry.link;
            if !more_fragments {
                bucket.remove(pos);
            }
            return link;
        }
        if more_fragments {
            bucket.push(FragmentEntry { key, link: hash });
        }
        hash
    }

    pub fn len(&self) -> usize {
        self.buckets.iter().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.iter().all(Vec::is_empty)
    }
}

/// Aggregator traffic counters, updated from the frame path.
#[derive(Debug, Default)]
pub struct TrafficCounters {
    tx_packets: AtomicU64,
    tx_bytes: AtomicU64,
    tx_dropped: AtomicU64,
    rx_packets: AtomicU64,
    rx_bytes: AtomicU64,
    rx_dropped: AtomicU64,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TrafficStats {
    pub tx_packets: u64,
    pub tx_bytes: u64,
    pub tx_dropped: u64,
    pub rx_packets: u64,
    pub rx_bytes: u64,
    pub rx_dropped: u64,
}

impl TrafficCounters {
    pub fn record_tx(&self, bytes: usize) {
        self.tx_packets.fetch_add(1, Ordering::Relaxed);
        self.tx_bytes.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn record_tx_drop(&self) {
        self.tx_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rx(&self, bytes: usize) {
        self.rx_packets.fetch_add(1, Ordering::Relaxed);
        self.rx_bytes.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn record_rx_drop(&self) {
        self.rx_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> TrafficStats {
        TrafficStats {
            tx_packets: self.tx_packets.load(Ordering::Relaxed),
            tx_bytes: self.tx_bytes.load(Ordering::Relaxed),
            tx_dropped: self.tx_dropped.load(Ordering::Relaxed),
            rx_packets: self.rx_packets.load(Ordering::Relaxed),
            rx_bytes: self.rx_bytes.load(Ordering::Relaxed),
            rx_dropped: self.rx_dropped.load(Ordering::Relaxed),
        }
    }
}

/// Per-aggregator distribution state shared with the frame path.
#[derive(Debug)]
pub struct Distributor {
    ready: ArcSwap<Vec<ReadyLink>>,
    fragments: Mutex<FragmentTable>,
    counters: TrafficCounters,
}

impl Default for Distributor {
    fn default() -> Self {
        Self::new()
    }
}

impl Distributor {
    pub fn new() -> Self {
        Distributor {
            ready: ArcSwap::from_pointee(Vec::new()),
            fragments: Mutex::new(FragmentTable::new()),
            counters: TrafficCounters::default(),
        }
    }

    /// Replaces the ready-link snapshot. Readers holding the previous one
    /// keep it alive until they drop it.
    pub fn publish(&self, links: Vec<ReadyLink>) {
        self.ready.store(Arc::new(links));
    }

    pub fn ready_links(&self) -> Arc<Vec<ReadyLink>> {
        self.ready.load_full()
    }

    pub fn ready_count(&self) -> usize {
        self.ready.load().len()
    }

    /// Chooses the outbound link for `frame`, `None` if no link is ready.
    pub fn select(&self, frame: &[u8]) -> Option<ReadyLink> {
        let links = self.ready.load();
        match links.len() {
            0 => {
                self.counters.record_tx_drop();
                None
            }
            1 => Some(links[0].clone()),
            count => links.get(self.hash_frame(frame, count)).cloned(),
        }
    }

    /// Index in `0..count` for `frame`; `count` must be non-zero.
    pub fn hash_frame(&self, frame: &[u8], count: usize) -> usize {
        let (Some(dest), Some(source)) = (
            MacAddress::from_slice(frame),
            frame.get(6..).and_then(MacAddress::from_slice),
        ) else {
            return 0;
        };
        let by_mac = || mac_hash(dest, source, count);

        let Some(ip) = ipv4_payload(frame) else {
            return by_mac();
        };
        let protocol = ip[9];
        if protocol != IP_PROTO_TCP && protocol != IP_PROTO_UDP {
            return by_mac();
        }

        let header_len = usize::from(ip[0] & 0x0f) * 4;
        let hash = match ip.get(header_len..header_len + 4) {
            Some(ports) => transport_hash(
                BigEndian::read_u16(&ports[0..2]),
                BigEndian::read_u16(&ports[2..4]),
                count,
            ),
            None => by_mac(),
        };

        let key = FragmentKey {
            id: BigEndian::read_u16(&ip[4..6]),
            source: [ip[12], ip[13], ip[14], ip[15]],
            dest: [ip[16], ip[17], ip[18], ip[19]],
        };
        let more_fragments = BigEndian::read_u16(&ip[6..8]) & IP_MORE_FRAGMENTS != 0;
        self.fragments
            .lock()
            .resolve(key, hash, count, more_fragments)
    }

    pub fn counters(&self) -> &TrafficCounters {
        &self.counters
    }

    pub fn pending_fragments(&self) -> usize {
        self.fragments.lock().len()
    }
}

/// The IPv4 header and payload of `frame`, if it carries a well-formed
/// IPv4 header.
fn ipv4_payload(frame: &[u8]) -> Option<&[u8]> {
    let ethertype = frame.get(12..ETH_HEADER_LEN).map(BigEndian::read_u16)?;
    if ethertype != ETHERTYPE_IPV4 {
        return None;
    }
    let ip = &frame[ETH_HEADER_LEN..];
    if ip.len() < IPV4_MIN_HEADER || ip[0] >> 4 != 4 {
        return None;
    }
    let header_len = usize::from(ip[0] & 0x0f) * 4;
    if header_len < IPV4_MIN_HEADER || ip.len() < header_len {
        return None;
    }
    Some(ip)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn links(count: u16) -> Vec<ReadyLink> {
        (1..=count)
            .map(|port_no| ReadyLink {
                port_no,
                link: format!("eth{}", port_no),
            })
            .collect()
    }

    /// Ethernet + IPv4 + 4 octets of transport ports.
    fn udp_frame(id: u16, flags: u16, sport: u16, dport: u16) -> Vec<u8> {
        let mut frame = vec![0u8; ETH_HEADER_LEN + 20 + 8];
        frame[0..6].copy_from_slice(&[0x02, 0, 0, 0, 0, 0x10]);
        frame[6..12].copy_from_slice(&[0x02, 0, 0, 0, 0, 0x20]);
        BigEndian::write_u16(&mut frame[12..14], ETHERTYPE_IPV4);
        let ip = &mut frame[ETH_HEADER_LEN..];
        ip[0] = 0x45;
        BigEndian::write_u16(&mut ip[4..6], id);
        BigEndian::write_u16(&mut ip[6..8], flags);
        ip[9] = IP_PROTO_UDP;
        ip[12..16].copy_from_slice(&[10, 0, 0, 1]);
        ip[16..20].copy_from_slice(&[10, 0, 0, 2]);
        BigEndian::write_u16(&mut ip[20..22], sport);
        BigEndian::write_u16(&mut ip[22..24], dport);
        frame
    }

    #[test]
    fn test_mac_hash_folding() {
        let dest = MacAddress::new([0, 0, 0x01, 0, 0, 0]);
        let source = MacAddress::new([0, 0, 0, 0, 0, 0]);
        // word 0x00000001 -> folds stay 1
        assert_eq!(mac_hash(dest, source, 3), 1);

        let dest = MacAddress::new([0, 0, 0, 0, 0, 0x01]);
        // word 0x01000000 -> ^>>16 = 0x01000100 -> ^>>8 = 0x01010101
        assert_eq!(mac_hash(dest, source, 3), 0x0101_0101 % 3);
    }

    #[test]
    fn test_transport_hash_folding() {
        assert_eq!(transport_hash(0x1234, 0x1234, 4), 0);
        // 0x0100 ^ 0x0001 = 0x0101 -> ^>>8 = 0x0100
        assert_eq!(transport_hash(0x0100, 0x0001, 3), 0x0100 % 3);
    }

    #[test]
    fn test_select_without_links_drops() {
        let distributor = Distributor::new();
        assert_eq!(distributor.select(&[0u8; 60]), None);
        assert_eq!(distributor.counters().snapshot().tx_dropped, 1);
    }

    #[test]
    fn test_single_link_used_unconditionally() {
        let distributor = Distributor::new();
        distributor.publish(links(1));
        let frame = udp_frame(1, 0, 1000, 2000);
        assert_eq!(distributor.select(&frame).map(|l| l.port_no), Some(1));
    }

    #[test]
    fn test_non_ip_frame_uses_mac_hash() {
        let distributor = Distributor::new();
        distributor.publish(links(3));
        let mut frame = vec![0u8; 60];
        frame[0..6].copy_from_slice(&[0x02, 0, 0x01, 0, 0, 0]);
        frame[6..12].copy_from_slice(&[0x02, 0, 0, 0, 0, 0]);
        frame[12] = 0x88;
        frame[13] = 0xb5;
        let chosen = distributor.select(&frame).unwrap();
        assert_eq!(chosen, links(3)[1]);
    }

    #[test]
    fn test_fragments_share_a_link() {
        let distributor = Distributor::new();
        distributor.publish(links(4));

        // First fragment carries real ports; the rest carry payload bytes.
        let first = udp_frame(77, IP_MORE_FRAGMENTS, 5000, 53);
        let expected = transport_hash(5000, 53, 4);
        assert_eq!(distributor.hash_frame(&first, 4), expected);
        assert_eq!(distributor.pending_fragments(), 1);

        let middle = udp_frame(77, IP_MORE_FRAGMENTS | 185, 0xdead, 0xbeef);
        assert_eq!(distributor.hash_frame(&middle, 4), expected);

        let last = udp_frame(77, 370, 0x0102, 0x0304);
        assert_eq!(distributor.hash_frame(&last, 4), expected);
        assert_eq!(distributor.pending_fragments(), 0);
    }

    #[test]
    fn test_unfragmented_datagram_leaves_no_entry() {
        let distributor = Distributor::new();
        let frame = udp_frame(5, 0, 10, 20);
        assert_eq!(distributor.hash_frame(&frame, 3), transport_hash(10, 20, 3));
        assert!(distributor.fragments.lock().is_empty());
    }

    #[test]
    fn test_fragment_entry_clamped_when_links_shrink() {
        let mut table = FragmentTable::new();
        let key = FragmentKey {
            id: 9,
            source: [1, 1, 1, 1],
            dest: [2, 2, 2, 2],
        };
        assert_eq!(table.resolve(key, 3, 4, true), 3);
        assert_eq!(table.resolve(key, 1, 2, true), 0);
        assert_eq!(table.resolve(key, 1, 2, false), 0);
        assert!(table.is_empty());
    }

    #[test]
    fn test_colliding_ids_in_same_bucket() {
        let mut table = FragmentTable::new();
        let a = FragmentKey {
            id: 1,
            source: [1, 1, 1, 1],
            dest: [2, 2, 2, 2],
        };
        let b = FragmentKey { id: 33, ..a };
        table.resolve(a, 0, 2, true);
        table.resolve(b, 1, 2, true);
        assert_eq!(table.len(), 2);

        // head of the chain goes first
        assert_eq!(table.resolve(a, 1, 2, false), 0);
        assert_eq!(table.resolve(b, 0, 2, false), 1);
        assert!(table.is_empty());
    }

    #[test]
    fn test_truncated_transport_falls_back_to_mac() {
        let distributor = Distributor::new();
        let mut frame = udp_frame(3, 0, 1, 2);
        frame.truncate(ETH_HEADER_LEN + 22);
        let dest = MacAddress::from_slice(&frame).unwrap();
        let source = MacAddress::from_slice(&frame[6..]).unwrap();
        assert_eq!(distributor.hash_frame(&frame, 3), mac_hash(dest, source, 3));
    }
}
