// Copyright 2024 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

//! Iterative lookup state.
//!
//! One [`Lookup`] tracks a single FIND_NODE or GET_PEERS run: the candidate
//! shortlist, which endpoints have been asked, which answers are still in
//! flight, and the overall deadline. The driver owns the lookups and feeds
//! them from the packet path; everything here is plain bookkeeping.

use std::collections::{HashMap, HashSet};
use std::net::Ipv4Addr;
use std::time::{Duration, Instant};
use swarm_protocol::{
    messages::{Message, NodeInfo, PeerInfo},
    NodeId, Topic, K,
};
use tokio::sync::oneshot;

/// Queries kept in flight per lookup.
pub(crate) const ALPHA: usize = 3;

/// Hard deadline for a whole lookup; it returns its best shortlist then.
pub(crate) const LOOKUP_TIMEOUT: Duration = Duration::from_secs(2);

/// How long a single query may stay unanswered before its endpoint is
/// written off for this lookup.
pub(crate) const QUERY_TIMEOUT: Duration = Duration::from_millis(500);

/// Granularity of the driver tick that ages queries and deadlines.
pub(crate) const LOOKUP_TICK: Duration = Duration::from_millis(100);

/// What a lookup is after.
pub(crate) enum LookupKind {
    /// Converge on the k contacts closest to the target id.
    FindNode,
    /// Same walk, additionally collecting topic peers along the way.
    GetPeers { topic: Topic },
}

/// Where the result goes once the lookup completes.
pub(crate) enum LookupSender {
    Nodes(oneshot::Sender<Vec<NodeInfo>>),
    Peers(oneshot::Sender<Vec<PeerInfo>>),
}

pub(crate) struct Lookup {
    pub(crate) target: NodeId,
    pub(crate) kind: LookupKind,
    /// Every candidate discovered so far, deduplicated by endpoint. The
    /// k-closest cap applies to the returned set, not to discovery: dropping
    /// a far-but-unqueried candidate can sever the only path towards the
    /// target in sparse overlays.
    shortlist: Vec<NodeInfo>,
    queried: HashSet<(Ipv4Addr, u16)>,
    pending: HashMap<(Ipv4Addr, u16), Instant>,
    deadline: Instant,
    peers: Vec<PeerInfo>,
    sender: LookupSender,
}

impl Lookup {
    pub(crate) fn new(
        target: NodeId,
        kind: LookupKind,
        seeds: Vec<NodeInfo>,
        sender: LookupSender,
    ) -> Self {
        let mut lookup = Self {
            target,
            kind,
            shortlist: Vec::new(),
            queried: HashSet::new(),
            pending: HashMap::new(),
            deadline: Instant::now() + LOOKUP_TIMEOUT,
            peers: Vec::new(),
            sender,
        };
        lookup.merge_nodes(seeds);
        lookup
    }

    /// Record a query already sent outside the normal batch selection, e.g.
    /// the initial probe of a bootstrap contact whose id is still unknown.
    pub(crate) fn mark_pending(&mut self, addr: Ipv4Addr, port: u16) {
        let _ = self.pending.insert((addr, port), Instant::now());
    }

    /// Merge discovered contacts into the shortlist, deduplicated by
    /// endpoint.
    pub(crate) fn merge_nodes(&mut self, nodes: Vec<NodeInfo>) {
        for node in nodes {
            if !self
                .shortlist
                .iter()
                .any(|n| n.addr == node.addr && n.port == node.port)
            {
                self.shortlist.push(node);
            }
        }
    }

    /// Collect topic peers reported by a queried contact.
    pub(crate) fn add_peers(&mut self, peers: &[PeerInfo]) {
        for peer in peers {
            if !self.peers.contains(peer) {
                self.peers.push(*peer);
            }
        }
    }

    /// Whether a response from this endpoint belongs to the lookup. Moves an
    /// in-flight query to the answered set; a second reply from the same
    /// endpoint (GET_PEERS sends two verbs in parallel) still counts.
    pub(crate) fn note_response(&mut self, addr: Ipv4Addr, port: u16) -> bool {
        if self.pending.remove(&(addr, port)).is_some() {
            let _ = self.queried.insert((addr, port));
            return true;
        }
        self.queried.contains(&(addr, port))
    }

    /// Write off queries that have been in flight longer than
    /// [`QUERY_TIMEOUT`]; silence is an answer too. Returns the endpoints
    /// written off, so the caller can note them as unresponsive.
    pub(crate) fn expire_stale_queries(&mut self, now: Instant) -> Vec<(Ipv4Addr, u16)> {
        let expired: Vec<_> = self
            .pending
            .iter()
            .filter(|(_, sent)| now.duration_since(**sent) >= QUERY_TIMEOUT)
            .map(|(endpoint, _)| *endpoint)
            .collect();
        for endpoint in &expired {
            let _ = self.pending.remove(endpoint);
            let _ = self.queried.insert(*endpoint);
        }
        expired
    }

    fn candidates(&self) -> impl Iterator<Item = &NodeInfo> {
        self.shortlist.iter().filter(|n| {
            let endpoint = (n.addr, n.port);
            !self.queried.contains(&endpoint) && !self.pending.contains_key(&endpoint)
        })
    }

    /// Pick the next contacts to query, closest to the target first, keeping
    /// at most [`ALPHA`] queries in flight. The picked contacts are marked
    /// pending.
    pub(crate) fn next_batch(&mut self, now: Instant) -> Vec<NodeInfo> {
        let slots = ALPHA.saturating_sub(self.pending.len());
        if slots == 0 {
            return Vec::new();
        }
        let target = self.target;
        let mut batch: Vec<NodeInfo> = self.candidates().copied().collect();
        batch.sort_by_key(|n| (n.id.distance(&target), n.addr.octets(), n.port));
        batch.truncate(slots);
        for node in &batch {
            let _ = self.pending.insert((node.addr, node.port), now);
        }
        batch
    }

    /// A lookup completes when its deadline passes, or when every known
    /// candidate has been asked and no answer is outstanding: a further
    /// round cannot improve the closest entry.
    pub(crate) fn is_complete(&self, now: Instant) -> bool {
        if now >= self.deadline {
            return true;
        }
        self.pending.is_empty() && self.candidates().next().is_none()
    }

    /// Deliver the result: the k closest contacts found, or the peers
    /// gathered along the way. Best effort; a vanished caller is fine.
    pub(crate) fn finish(self) {
        let target = self.target;
        let mut nodes = self.shortlist;
        nodes.sort_by_key(|n| (n.id.distance(&target), n.addr.octets(), n.port));
        nodes.truncate(K);
        match self.sender {
            LookupSender::Nodes(sender) => {
                let _ = sender.send(nodes);
            }
            LookupSender::Peers(sender) => {
                let _ = sender.send(self.peers);
            }
        }
    }
}

impl crate::driver::SwarmDriver {
    /// Begin an iterative lookup, seeded from the routing table. A bootstrap
    /// endpoint may be supplied for a cold start: it is probed immediately
    /// even though its id is still unknown.
    pub(crate) async fn start_lookup(
        &mut self,
        target: NodeId,
        kind: LookupKind,
        sender: LookupSender,
        bootstrap: Option<(Ipv4Addr, u16)>,
    ) {
        let seeds = self
            .routing_table
            .closest(&target, K)
            .into_iter()
            .map(|c| NodeInfo {
                id: c.id,
                addr: c.addr,
                port: c.port,
            })
            .collect();
        let mut lookup = Lookup::new(target, kind, seeds, sender);
        if let Some((addr, port)) = bootstrap {
            lookup.mark_pending(addr, port);
            self.send_message(addr, port, Message::FindNode { target })
                .await;
        }

        let id = self.next_lookup_id;
        self.next_lookup_id += 1;
        let _ = self.lookups.insert(id, lookup);
        self.drive_lookup(id).await;
    }

    /// Dispatch the next batch of queries for one lookup and finish it if it
    /// has converged or run out of time.
    async fn drive_lookup(&mut self, id: u64) {
        let Some(mut lookup) = self.lookups.remove(&id) else {
            return;
        };
        for node in lookup.next_batch(Instant::now()) {
            self.send_message(node.addr, node.port, Message::FindNode { target: lookup.target })
                .await;
            if let LookupKind::GetPeers { topic } = &lookup.kind {
                self.send_message(node.addr, node.port, Message::GetPeers { topic: *topic })
                    .await;
            }
        }
        if lookup.is_complete(Instant::now()) {
            lookup.finish();
        } else {
            let _ = self.lookups.insert(id, lookup);
        }
    }

    /// Offer a FOUND_NODES response to every lookup that asked its source.
    /// The responder itself joins the shortlist: a bootstrap contact's id is
    /// only learned from its first reply.
    pub(crate) async fn feed_lookups_with_nodes(
        &mut self,
        src: std::net::SocketAddrV4,
        responder: NodeInfo,
        nodes: &[NodeInfo],
    ) {
        if self.lookups.is_empty() {
            return;
        }
        let mut found = vec![responder];
        found.extend_from_slice(nodes);
        found.retain(|n| !self.routing_table.is_self(&n.id, n.addr, n.port));

        let ids: Vec<u64> = self.lookups.keys().copied().collect();
        for id in ids {
            let attributed = match self.lookups.get_mut(&id) {
                Some(lookup) => {
                    if lookup.note_response(*src.ip(), src.port()) {
                        lookup.merge_nodes(found.clone());
                        true
                    } else {
                        false
                    }
                }
                None => false,
            };
            if attributed {
                self.drive_lookup(id).await;
            }
        }
    }

    /// Offer a PEERS response to every lookup that asked its source.
    pub(crate) async fn feed_lookups_with_peers(
        &mut self,
        src: std::net::SocketAddrV4,
        peers: &[PeerInfo],
    ) {
        if self.lookups.is_empty() {
            return;
        }
        let ids: Vec<u64> = self.lookups.keys().copied().collect();
        for id in ids {
            let attributed = match self.lookups.get_mut(&id) {
                Some(lookup) => {
                    if lookup.note_response(*src.ip(), src.port()) {
                        lookup.add_peers(peers);
                        true
                    } else {
                        false
                    }
                }
                None => false,
            };
            if attributed {
                self.drive_lookup(id).await;
            }
        }
    }

    /// Age out unanswered queries and deadlines. Runs on every driver tick.
    /// An endpoint that stayed silent for a whole query window is also
    /// dropped from the routing table; a later FOUND_NODES mention brings it
    /// back if it recovers.
    pub(crate) async fn tick_lookups(&mut self, now: Instant) {
        if self.lookups.is_empty() {
            return;
        }
        let ids: Vec<u64> = self.lookups.keys().copied().collect();
        for id in ids {
            if let Some(lookup) = self.lookups.get_mut(&id) {
                for (addr, port) in lookup.expire_stale_queries(now) {
                    self.routing_table.remove(addr, port);
                }
            }
            self.drive_lookup(id).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(last: u8, port: u16) -> NodeInfo {
        let mut bytes = [0u8; 32];
        bytes[31] = last;
        NodeInfo {
            id: NodeId::from_bytes(bytes),
            addr: Ipv4Addr::LOCALHOST,
            port,
        }
    }

    fn new_lookup(seeds: Vec<NodeInfo>) -> (Lookup, oneshot::Receiver<Vec<NodeInfo>>) {
        let (tx, rx) = oneshot::channel();
        let lookup = Lookup::new(
            NodeId::from_bytes([0u8; 32]),
            LookupKind::FindNode,
            seeds,
            LookupSender::Nodes(tx),
        );
        (lookup, rx)
    }

    #[test]
    fn batches_are_closest_first_and_respect_alpha() {
        let seeds = vec![node(8, 1008), node(2, 1002), node(5, 1005), node(1, 1001)];
        let (mut lookup, _rx) = new_lookup(seeds);

        let batch = lookup.next_batch(Instant::now());
        let ports: Vec<u16> = batch.iter().map(|n| n.port).collect();
        assert_eq!(ports, vec![1001, 1002, 1005]);

        // all slots taken until something resolves
        assert!(lookup.next_batch(Instant::now()).is_empty());

        assert!(lookup.note_response(Ipv4Addr::LOCALHOST, 1001));
        let batch = lookup.next_batch(Instant::now());
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].port, 1008);
    }

    #[test]
    fn merge_deduplicates_by_endpoint() {
        let (mut lookup, _rx) = new_lookup(vec![node(1, 1001)]);
        lookup.merge_nodes(vec![node(9, 1001), node(2, 1002)]);
        let batch = lookup.next_batch(Instant::now());
        assert_eq!(batch.len(), 2);
    }

    #[test]
    fn stale_queries_expire_into_the_queried_set() {
        let (mut lookup, _rx) = new_lookup(vec![node(1, 1001)]);
        let sent = Instant::now();
        let _ = lookup.next_batch(sent);
        assert!(!lookup.is_complete(sent));

        let expired = lookup.expire_stale_queries(sent + QUERY_TIMEOUT);
        assert_eq!(expired, vec![(Ipv4Addr::LOCALHOST, 1001)]);
        // nothing pending, nothing left to ask
        assert!(lookup.is_complete(sent + QUERY_TIMEOUT));
        // a late reply from a written-off endpoint is still attributable
        assert!(lookup.note_response(Ipv4Addr::LOCALHOST, 1001));
    }

    #[test]
    fn responses_from_strangers_are_not_attributed() {
        let (mut lookup, _rx) = new_lookup(vec![node(1, 1001)]);
        assert!(!lookup.note_response(Ipv4Addr::LOCALHOST, 4242));
    }

    #[test]
    fn completes_at_the_deadline_even_with_queries_in_flight() {
        let (mut lookup, _rx) = new_lookup(vec![node(1, 1001)]);
        let now = Instant::now();
        let _ = lookup.next_batch(now);
        assert!(!lookup.is_complete(now));
        assert!(lookup.is_complete(now + LOOKUP_TIMEOUT));
    }

    #[test]
    fn finish_returns_the_k_closest_in_order() {
        let seeds: Vec<NodeInfo> = (1..=12u8).map(|i| node(i, 1000 + u16::from(i))).collect();
        let (lookup, mut rx) = new_lookup(seeds);
        lookup.finish();

        let result = rx.try_recv().expect("result delivered");
        assert_eq!(result.len(), K);
        let lasts: Vec<u8> = result.iter().map(|n| n.id.as_bytes()[31]).collect();
        assert_eq!(lasts, vec![1, 2, 3, 4, 5, 6, 7, 8]);
    }

    #[test]
    fn gathered_peers_are_deduplicated() {
        let (tx, mut rx) = oneshot::channel();
        let mut lookup = Lookup::new(
            NodeId::from_bytes([0u8; 32]),
            LookupKind::GetPeers {
                topic: Topic::from_bytes([0xAA; 32]),
            },
            vec![],
            LookupSender::Peers(tx),
        );
        let peer = PeerInfo {
            addr: Ipv4Addr::new(10, 0, 0, 1),
            port: 9000,
        };
        lookup.add_peers(&[peer]);
        lookup.add_peers(&[peer]);
        lookup.finish();
        assert_eq!(rx.try_recv().expect("result delivered"), vec![peer]);
    }
}
