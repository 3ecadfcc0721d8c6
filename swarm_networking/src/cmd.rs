// Copyright 2024 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

use crate::{
    driver::{NetStats, SwarmDriver},
    lookup::{LookupKind, LookupSender},
    routing_table::RoutingTableSnapshot,
};
use serde::Serialize;
use std::net::Ipv4Addr;
use swarm_protocol::{
    crypto::NetworkKey,
    messages::{Message, NodeInfo, PeerInfo},
    NodeId, Topic,
};
use tokio::sync::oneshot;

/// Commands to send to the driver. Every public-surface entry point becomes
/// one of these; the driver task is the only place they execute.
#[derive(Debug)]
pub enum SwarmCmd {
    /// Send a single PING.
    Ping { addr: Ipv4Addr, port: u16 },
    /// Send a single FIND_NODE.
    FindNode {
        addr: Ipv4Addr,
        port: u16,
        target: NodeId,
    },
    /// Send a single ANNOUNCE_PEER carrying `announced_port`.
    AnnouncePeer {
        addr: Ipv4Addr,
        port: u16,
        topic: Topic,
        announced_port: u16,
    },
    /// Send a single GET_PEERS.
    GetPeers {
        addr: Ipv4Addr,
        port: u16,
        topic: Topic,
    },
    /// Seed the routing table with a known contact.
    AddContact {
        id: NodeId,
        addr: Ipv4Addr,
        port: u16,
    },
    /// Ping a bootstrap contact and walk the overlay towards our own id.
    Bootstrap {
        addr: Ipv4Addr,
        port: u16,
        sender: oneshot::Sender<Vec<NodeInfo>>,
    },
    /// Run an iterative FIND_NODE until convergence or timeout.
    FindNodeIterative {
        target: NodeId,
        sender: oneshot::Sender<Vec<NodeInfo>>,
    },
    /// Run an iterative GET_PEERS, collecting topic peers along the walk.
    GetPeersIterative {
        topic: Topic,
        sender: oneshot::Sender<Vec<PeerInfo>>,
    },
    /// Install or clear the network key for all subsequent traffic.
    SetNetworkKey { key: Option<NetworkKey> },
    /// Diagnostic snapshot of the routing table.
    DumpRoutingTable {
        sender: oneshot::Sender<RoutingTableSnapshot>,
    },
    GetLocalState {
        sender: oneshot::Sender<SwarmLocalState>,
    },
}

/// Snapshot of information kept in the driver's local state.
#[derive(Debug, Clone, Serialize)]
pub struct SwarmLocalState {
    pub bound_port: u16,
    /// Contacts currently held across all buckets.
    pub contact_count: usize,
    /// Topics with at least one stored announcement.
    pub topic_count: usize,
    /// Iterative lookups currently in flight.
    pub active_lookups: usize,
    pub stats: NetStats,
}

impl SwarmDriver {
    pub(crate) async fn handle_cmd(&mut self, cmd: SwarmCmd) {
        match cmd {
            SwarmCmd::Ping { addr, port } => {
                self.send_message(addr, port, Message::Ping).await;
            }
            SwarmCmd::FindNode { addr, port, target } => {
                self.send_message(addr, port, Message::FindNode { target })
                    .await;
            }
            SwarmCmd::AnnouncePeer {
                addr,
                port,
                topic,
                announced_port,
            } => {
                self.send_message(
                    addr,
                    port,
                    Message::AnnouncePeer {
                        topic,
                        port: announced_port,
                    },
                )
                .await;
            }
            SwarmCmd::GetPeers { addr, port, topic } => {
                self.send_message(addr, port, Message::GetPeers { topic })
                    .await;
            }
            SwarmCmd::AddContact { id, addr, port } => {
                if self.routing_table.insert(id, addr, port) {
                    debug!("Added contact {id:?} at {addr}:{port} to the routing table");
                }
            }
            SwarmCmd::Bootstrap { addr, port, sender } => {
                self.send_message(addr, port, Message::Ping).await;
                let target = self.self_id;
                self.start_lookup(
                    target,
                    LookupKind::FindNode,
                    LookupSender::Nodes(sender),
                    Some((addr, port)),
                )
                .await;
            }
            SwarmCmd::FindNodeIterative { target, sender } => {
                self.start_lookup(
                    target,
                    LookupKind::FindNode,
                    LookupSender::Nodes(sender),
                    None,
                )
                .await;
            }
            SwarmCmd::GetPeersIterative { topic, sender } => {
                self.start_lookup(
                    topic.as_node_id(),
                    LookupKind::GetPeers { topic },
                    LookupSender::Peers(sender),
                    None,
                )
                .await;
            }
            SwarmCmd::SetNetworkKey { key } => {
                debug!(
                    "Network key {}",
                    if key.is_some() { "installed" } else { "cleared" }
                );
                self.network_key = key;
            }
            SwarmCmd::DumpRoutingTable { sender } => {
                let _ = sender.send(self.routing_table.dump());
            }
            SwarmCmd::GetLocalState { sender } => {
                let state = SwarmLocalState {
                    bound_port: self.bound_port,
                    contact_count: self.routing_table.contact_count(),
                    topic_count: self.topic_store.topic_count(),
                    active_lookups: self.lookups.len(),
                    stats: self.stats,
                };
                let _ = sender.send(state);
            }
        }
    }
}
