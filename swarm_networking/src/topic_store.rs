// Copyright 2024 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

//! Time-bounded storage of topic announcements.
//!
//! Purely in-memory; a restart forgets every record. Entries age out after
//! [`PEER_TTL`] and a periodic sweep reclaims them; reads also filter by age
//! so an expired entry is never served, however stale the last sweep.

use itertools::Itertools;
use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::time::{Duration, Instant};
use swarm_protocol::{messages::PeerInfo, Topic, K};

/// How long an announcement stays serveable without being refreshed.
pub(crate) const PEER_TTL: Duration = Duration::from_secs(30 * 60);

/// How often the driver sweeps expired entries.
pub(crate) const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Upper bound of remembered peers per topic; the stalest entry is evicted
/// to admit a fresh announcement once the bound is hit.
const MAX_PEERS_PER_TOPIC: usize = 64;

/// Configuration for a [`TopicStore`].
#[derive(Debug, Clone)]
pub(crate) struct TopicStoreConfig {
    /// Entry lifetime since its last announcement.
    pub(crate) ttl: Duration,
    /// Per-topic peer cap.
    pub(crate) max_peers_per_topic: usize,
}

impl Default for TopicStoreConfig {
    fn default() -> Self {
        Self {
            ttl: PEER_TTL,
            max_peers_per_topic: MAX_PEERS_PER_TOPIC,
        }
    }
}

pub(crate) struct TopicStore {
    config: TopicStoreConfig,
    topics: HashMap<Topic, HashMap<(Ipv4Addr, u16), Instant>>,
}

impl TopicStore {
    pub(crate) fn with_config(config: TopicStoreConfig) -> Self {
        Self {
            config,
            topics: HashMap::new(),
        }
    }

    /// Upsert an announcement, stamping it with the current time.
    pub(crate) fn announce(&mut self, topic: Topic, addr: Ipv4Addr, port: u16) {
        let entries = self.topics.entry(topic).or_default();
        if entries.len() >= self.config.max_peers_per_topic
            && !entries.contains_key(&(addr, port))
        {
            if let Some(stalest) = entries
                .iter()
                .min_by_key(|(_, seen)| **seen)
                .map(|(key, _)| *key)
            {
                let _ = entries.remove(&stalest);
            }
        }
        let _ = entries.insert((addr, port), Instant::now());
    }

    /// All live peers for a topic, most recently announced first, capped at
    /// [`K`]. Unknown topics yield an empty list.
    pub(crate) fn peers(&self, topic: &Topic) -> Vec<PeerInfo> {
        let Some(entries) = self.topics.get(topic) else {
            return Vec::new();
        };
        entries
            .iter()
            .filter(|(_, seen)| seen.elapsed() < self.config.ttl)
            .sorted_by_key(|(_, seen)| std::cmp::Reverse(**seen))
            .take(K)
            .map(|((addr, port), _)| PeerInfo {
                addr: *addr,
                port: *port,
            })
            .collect()
    }

    /// Reclaim expired entries and forget emptied topics.
    pub(crate) fn sweep(&mut self) {
        let ttl = self.config.ttl;
        self.topics.retain(|_, entries| {
            entries.retain(|_, seen| seen.elapsed() < ttl);
            !entries.is_empty()
        });
    }

    pub(crate) fn topic_count(&self) -> usize {
        self.topics.len()
    }
}
