// Copyright 2024 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

use crate::driver::SwarmDriver;
use std::net::SocketAddrV4;
use swarm_protocol::{
    messages::{Message, MsgKind, NodeInfo, Packet},
    K,
};
use swarm_protocol::NodeId;

/// One authenticated, decoded inbound packet, forwarded to the embedding
/// after the driver has acted on it. Routing-table effects of the packet are
/// already applied when the event is observed.
#[derive(Debug, Clone)]
pub struct NetworkEvent {
    /// The id the sender claimed in the packet header, as raw 32 bytes.
    pub sender: NodeId,
    pub kind: MsgKind,
    /// Observed source address and port of the datagram.
    pub addr: std::net::Ipv4Addr,
    pub port: u16,
    /// The decoded body, one variant per message type.
    pub message: Message,
}

impl SwarmDriver {
    /// Per-type protocol semantics, applied after authentication and
    /// decoding. Every packet records its sender in the routing table and
    /// ends as a [`NetworkEvent`] for the embedding.
    pub(crate) async fn handle_packet(&mut self, packet: Packet, src: SocketAddrV4) {
        let addr = *src.ip();
        let port = src.port();
        trace!("Received {} from {addr}:{port}", packet.message.kind());

        // The FIND_NODE reply is computed against the table as it stood
        // before this sender is recorded: a newcomer learns its
        // neighbourhood, never its own reflection.
        let find_node_reply = if let Message::FindNode { target } = &packet.message {
            let mut contacts = self.routing_table.closest(target, K + 1);
            contacts.retain(|c| c.id != packet.sender);
            contacts.truncate(K);
            Some(
                contacts
                    .into_iter()
                    .map(|c| NodeInfo {
                        id: c.id,
                        addr: c.addr,
                        port: c.port,
                    })
                    .collect::<Vec<_>>(),
            )
        } else {
            None
        };

        let _ = self.routing_table.insert(packet.sender, addr, port);

        match &packet.message {
            Message::Ping => {
                self.send_message(addr, port, Message::Pong).await;
            }
            Message::Pong => {}
            Message::FindNode { .. } => {
                let nodes = find_node_reply.unwrap_or_default();
                self.send_message(addr, port, Message::FoundNodes { nodes })
                    .await;
            }
            Message::FoundNodes { nodes } => {
                for node in nodes {
                    let _ = self.routing_table.insert(node.id, node.addr, node.port);
                }
                let responder = NodeInfo {
                    id: packet.sender,
                    addr,
                    port,
                };
                self.feed_lookups_with_nodes(src, responder, nodes).await;
            }
            Message::AnnouncePeer {
                topic,
                port: announced_port,
            } => {
                // the announced port is the sender's claim; the address is
                // what we observed on the wire
                self.topic_store.announce(*topic, addr, *announced_port);
            }
            Message::GetPeers { topic } => {
                let peers = self.topic_store.peers(topic);
                self.send_message(addr, port, Message::Peers { peers })
                    .await;
            }
            Message::Peers { peers } => {
                self.feed_lookups_with_peers(src, peers).await;
            }
        }

        let event = NetworkEvent {
            sender: packet.sender,
            kind: packet.message.kind(),
            addr,
            port,
            message: packet.message,
        };
        if self.event_sender.send(event).await.is_err() {
            trace!("Event receiver gone; discarding event");
        }
    }
}
