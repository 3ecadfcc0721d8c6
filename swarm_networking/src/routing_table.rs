// Copyright 2024 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

//! Kademlia routing table: 160 k-buckets over the XOR metric.
//!
//! Each bucket is kept in least-recently-seen order, head first. A contact
//! heard from again moves to the tail; a newcomer to a full bucket is
//! discarded, preserving the long-lived head.

use itertools::Itertools;
use serde::Serialize;
use std::collections::VecDeque;
use std::net::Ipv4Addr;
use std::time::Instant;
use swarm_protocol::{NodeId, K};

/// Number of buckets; bucket `i` holds contacts whose XOR distance from the
/// owner has its highest set bit at position `255 - i`.
pub(crate) const NUM_BUCKETS: usize = 160;

/// One live routing entry. Identity for deduplication is `(addr, port)`; the
/// id is whatever that endpoint most recently claimed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Contact {
    pub id: NodeId,
    pub addr: Ipv4Addr,
    pub port: u16,
    pub last_seen: Instant,
}

#[derive(Debug, Default)]
struct Bucket {
    contacts: VecDeque<Contact>,
}

pub(crate) struct RoutingTable {
    self_id: NodeId,
    local_addr: Ipv4Addr,
    local_port: u16,
    buckets: Vec<Bucket>,
}

impl RoutingTable {
    pub(crate) fn new(self_id: NodeId, local_addr: Ipv4Addr, local_port: u16) -> Self {
        let buckets = (0..NUM_BUCKETS).map(|_| Bucket::default()).collect();
        Self {
            self_id,
            local_addr,
            local_port,
            buckets,
        }
    }

    /// Whether a contact names this node itself. The id check is the
    /// authoritative one; the address check catches our own endpoint coming
    /// back to us on loopback fabrics, where the claimed id may differ.
    pub(crate) fn is_self(&self, id: &NodeId, addr: Ipv4Addr, port: u16) -> bool {
        if *id == self.self_id {
            return true;
        }
        port == self.local_port
            && (addr == self.local_addr
                || (self.local_addr.is_unspecified() && addr.is_loopback()))
    }

    fn bucket_index(&self, id: &NodeId) -> usize {
        // ids sharing a 160-bit prefix with ours fall past the last bucket;
        // clamp them in rather than lose them
        self.self_id.distance(id).bucket_index().min(NUM_BUCKETS - 1)
    }

    fn position_of(&self, addr: Ipv4Addr, port: u16) -> Option<(usize, usize)> {
        self.buckets.iter().enumerate().find_map(|(bi, bucket)| {
            bucket
                .contacts
                .iter()
                .position(|c| c.addr == addr && c.port == port)
                .map(|ci| (bi, ci))
        })
    }

    /// Upsert a contact. A known `(addr, port)` is promoted to the tail of
    /// its bucket with a refreshed id and timestamp; an unknown one is
    /// appended if its bucket has room and discarded otherwise.
    ///
    /// Returns `false` when the contact was rejected (self, or bucket full).
    pub(crate) fn insert(&mut self, id: NodeId, addr: Ipv4Addr, port: u16) -> bool {
        if self.is_self(&id, addr, port) {
            return false;
        }

        if let Some((bi, ci)) = self.position_of(addr, port) {
            if self.buckets[bi].contacts[ci].id == id {
                self.touch(addr, port);
                return true;
            }
            // a changed id can move the endpoint to a different bucket
            self.remove(addr, port);
        }

        let target_bucket = self.bucket_index(&id);
        let bucket = &mut self.buckets[target_bucket];
        if bucket.contacts.len() < K {
            bucket.contacts.push_back(Contact {
                id,
                addr,
                port,
                last_seen: Instant::now(),
            });
            return true;
        }
        false
    }

    /// Promote a known endpoint to most-recently-seen. No-op for strangers.
    pub(crate) fn touch(&mut self, addr: Ipv4Addr, port: u16) {
        if let Some((bi, ci)) = self.position_of(addr, port) {
            if let Some(mut contact) = self.buckets[bi].contacts.remove(ci) {
                contact.last_seen = Instant::now();
                self.buckets[bi].contacts.push_back(contact);
            }
        }
    }

    /// Drop any contact matching the endpoint.
    pub(crate) fn remove(&mut self, addr: Ipv4Addr, port: u16) {
        if let Some((bi, ci)) = self.position_of(addr, port) {
            let _ = self.buckets[bi].contacts.remove(ci);
        }
    }

    /// Up to `k` contacts closest to `target`, strictly ascending by XOR
    /// distance. Equal distances (impossible across distinct ids, but the
    /// ordering must be total) break ties by `(addr, port)`.
    pub(crate) fn closest(&self, target: &NodeId, k: usize) -> Vec<Contact> {
        self.buckets
            .iter()
            .flat_map(|bucket| bucket.contacts.iter().copied())
            .sorted_by_key(|c| (c.id.distance(target), c.addr.octets(), c.port))
            .take(k)
            .collect()
    }

    pub(crate) fn contact_count(&self) -> usize {
        self.buckets.iter().map(|b| b.contacts.len()).sum()
    }

    /// Diagnostic snapshot of every non-empty bucket, in bucket order.
    pub(crate) fn dump(&self) -> RoutingTableSnapshot {
        let buckets = self
            .buckets
            .iter()
            .enumerate()
            .filter(|(_, bucket)| !bucket.contacts.is_empty())
            .map(|(index, bucket)| BucketSnapshot {
                index,
                contacts: bucket
                    .contacts
                    .iter()
                    .map(|c| ContactSnapshot {
                        id: c.id.to_string(),
                        addr: c.addr.to_string(),
                        port: c.port,
                        last_seen_secs: c.last_seen.elapsed().as_secs(),
                    })
                    .collect(),
            })
            .collect();
        RoutingTableSnapshot {
            self_id: self.self_id.to_string(),
            contact_count: self.contact_count(),
            buckets,
        }
    }
}

/// Snapshot of one routing contact, for diagnostics.
#[derive(Debug, Clone, Serialize)]
pub struct ContactSnapshot {
    pub id: String,
    pub addr: String,
    pub port: u16,
    /// Seconds since this contact was last heard from.
    pub last_seen_secs: u64,
}

/// Snapshot of one non-empty bucket, least-recently-seen contact first.
#[derive(Debug, Clone, Serialize)]
pub struct BucketSnapshot {
    pub index: usize,
    pub contacts: Vec<ContactSnapshot>,
}

/// Point-in-time view of the whole routing table.
#[derive(Debug, Clone, Serialize)]
pub struct RoutingTableSnapshot {
    pub self_id: String,
    pub contact_count: usize,
    pub buckets: Vec<BucketSnapshot>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> RoutingTable {
        RoutingTable::new(
            NodeId::from_bytes([0u8; 32]),
            Ipv4Addr::UNSPECIFIED,
            40000,
        )
    }

    fn id_with_first_byte(first: u8, last: u8) -> NodeId {
        let mut bytes = [0u8; 32];
        bytes[0] = first;
        bytes[31] = last;
        NodeId::from_bytes(bytes)
    }

    #[test]
    fn contacts_land_in_the_bucket_matching_their_highest_differing_bit() {
        let mut table = table();
        assert!(table.insert(id_with_first_byte(0x80, 1), Ipv4Addr::new(10, 0, 0, 1), 1000));
        assert!(table.insert(id_with_first_byte(0x40, 1), Ipv4Addr::new(10, 0, 0, 2), 1000));
        assert!(table.insert(id_with_first_byte(0x01, 1), Ipv4Addr::new(10, 0, 0, 3), 1000));

        let dump = table.dump();
        let indices: Vec<usize> = dump.buckets.iter().map(|b| b.index).collect();
        assert_eq!(indices, vec![0, 1, 7]);
    }

    #[test]
    fn full_bucket_rejects_newcomers_and_keeps_the_head() {
        let mut table = table();
        for i in 0..12u8 {
            let inserted =
                table.insert(id_with_first_byte(0x80, i), Ipv4Addr::new(10, 0, 0, i), 1000);
            assert_eq!(inserted, i < K as u8, "insert {i}");
        }
        assert_eq!(table.contact_count(), K);

        let dump = table.dump();
        assert_eq!(dump.buckets.len(), 1);
        // the head is the longest-lived contact
        assert_eq!(dump.buckets[0].contacts[0].addr, "10.0.0.0");
    }

    #[test]
    fn duplicate_endpoint_updates_the_id_in_place() {
        let mut table = table();
        let addr = Ipv4Addr::new(10, 0, 0, 1);
        assert!(table.insert(id_with_first_byte(0x80, 1), addr, 1000));
        assert!(table.insert(id_with_first_byte(0x80, 2), addr, 1000));
        assert_eq!(table.contact_count(), 1);

        let closest = table.closest(&NodeId::from_bytes([0u8; 32]), K);
        assert_eq!(closest[0].id, id_with_first_byte(0x80, 2));
    }

    #[test]
    fn an_id_change_can_move_an_endpoint_across_buckets() {
        let mut table = table();
        let addr = Ipv4Addr::new(10, 0, 0, 1);
        assert!(table.insert(id_with_first_byte(0x80, 1), addr, 1000));
        assert!(table.insert(id_with_first_byte(0x01, 1), addr, 1000));
        assert_eq!(table.contact_count(), 1);
        assert_eq!(table.dump().buckets[0].index, 7);
    }

    #[test]
    fn touch_promotes_to_most_recently_seen() {
        let mut table = table();
        for i in 0..3u8 {
            assert!(table.insert(id_with_first_byte(0x80, i), Ipv4Addr::new(10, 0, 0, i), 1000));
        }
        table.touch(Ipv4Addr::new(10, 0, 0, 0), 1000);

        let dump = table.dump();
        let tail = dump.buckets[0].contacts.last().expect("non-empty bucket");
        assert_eq!(tail.addr, "10.0.0.0");
    }

    #[test]
    fn touch_and_remove_ignore_strangers() {
        let mut table = table();
        table.touch(Ipv4Addr::new(10, 0, 0, 9), 9);
        table.remove(Ipv4Addr::new(10, 0, 0, 9), 9);
        assert_eq!(table.contact_count(), 0);
    }

    #[test]
    fn remove_deletes_the_matching_contact() {
        let mut table = table();
        assert!(table.insert(id_with_first_byte(0x80, 1), Ipv4Addr::new(10, 0, 0, 1), 1000));
        table.remove(Ipv4Addr::new(10, 0, 0, 1), 1000);
        assert_eq!(table.contact_count(), 0);
    }

    #[test]
    fn closest_orders_strictly_by_xor_distance() {
        let mut table = table();
        for i in 1..=20u8 {
            let mut bytes = [0u8; 32];
            bytes[31] = i;
            bytes[0] = i % 3;
            let _ = table.insert(
                NodeId::from_bytes(bytes),
                Ipv4Addr::new(10, 0, u8::from(i % 2 == 0), i),
                1000 + u16::from(i),
            );
        }

        let target = id_with_first_byte(0x00, 5);
        let closest = table.closest(&target, K);
        assert_eq!(closest.len(), K);
        for pair in closest.windows(2) {
            assert!(pair[0].id.distance(&target) <= pair[1].id.distance(&target));
        }

        // with a non-empty table, closest-to-self(1) is the global minimum
        let all = table.closest(&NodeId::from_bytes([0u8; 32]), usize::MAX);
        let single = table.closest(&NodeId::from_bytes([0u8; 32]), 1);
        assert_eq!(single[0].id, all[0].id);
    }

    #[test]
    fn never_inserts_self() {
        let mut table = table();
        assert!(!table.insert(NodeId::from_bytes([0u8; 32]), Ipv4Addr::new(10, 0, 0, 1), 1000));
        // own endpoint on loopback, different claimed id
        assert!(!table.insert(id_with_first_byte(0x80, 1), Ipv4Addr::LOCALHOST, 40000));
        assert_eq!(table.contact_count(), 0);
    }
}
