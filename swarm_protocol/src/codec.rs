// Copyright 2024 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

//! Byte-level wire format.
//!
//! Every packet starts with a 33 byte header: `[type: u8][sender: 32 bytes]`.
//! Multi-byte integers are big-endian, IPv4 addresses are 4 raw bytes.
//! Decoding is strict: the body length must match the type (and declared
//! entry count) exactly, so a datagram from a differently-keyed overlay never
//! parses as a plausible message by accident.

use crate::{
    error::{Error, Result},
    messages::{Message, MsgKind, NodeInfo, PeerInfo, Packet},
    NodeId, Topic, K,
};
use bytes::{Buf, BufMut, BytesMut};
use std::net::Ipv4Addr;

/// Length of the `[type][sender]` prefix shared by all messages.
pub const HEADER_LEN: usize = 1 + NodeId::LEN;

/// Wire size of one FOUND_NODES entry: id, IPv4, port.
const NODE_ENTRY_LEN: usize = NodeId::LEN + 4 + 2;
/// Wire size of one PEERS entry: IPv4, port.
const PEER_ENTRY_LEN: usize = 4 + 2;

/// Encode a packet into its plaintext wire form. Entry lists are capped at
/// [`K`]; anything beyond the cap is silently truncated at the sender.
pub fn encode(packet: &Packet) -> Vec<u8> {
    let mut buf = BytesMut::with_capacity(HEADER_LEN + body_capacity(&packet.message));
    buf.put_u8(packet.message.kind().as_u8());
    buf.put_slice(packet.sender.as_bytes());

    match &packet.message {
        Message::Ping | Message::Pong => {}
        Message::FindNode { target } => buf.put_slice(target.as_bytes()),
        Message::FoundNodes { nodes } => {
            let nodes = &nodes[..nodes.len().min(K)];
            buf.put_u8(nodes.len() as u8);
            for node in nodes {
                buf.put_slice(node.id.as_bytes());
                buf.put_slice(&node.addr.octets());
                buf.put_u16(node.port);
            }
        }
        Message::AnnouncePeer { topic, port } => {
            buf.put_slice(topic.as_bytes());
            buf.put_u16(*port);
        }
        Message::GetPeers { topic } => buf.put_slice(topic.as_bytes()),
        Message::Peers { peers } => {
            let peers = &peers[..peers.len().min(K)];
            buf.put_u8(peers.len() as u8);
            for peer in peers {
                buf.put_slice(&peer.addr.octets());
                buf.put_u16(peer.port);
            }
        }
    }

    buf.to_vec()
}

fn body_capacity(message: &Message) -> usize {
    match message {
        Message::Ping | Message::Pong => 0,
        Message::FindNode { .. } | Message::GetPeers { .. } => Topic::LEN,
        Message::AnnouncePeer { .. } => Topic::LEN + 2,
        Message::FoundNodes { .. } => 1 + K * NODE_ENTRY_LEN,
        Message::Peers { .. } => 1 + K * PEER_ENTRY_LEN,
    }
}

/// Decode a plaintext datagram into a packet.
pub fn decode(mut buf: &[u8]) -> Result<Packet> {
    if buf.len() < HEADER_LEN {
        return Err(Error::TruncatedHeader);
    }
    let kind = buf.get_u8();
    let kind = MsgKind::from_u8(kind).ok_or(Error::UnknownMsgType(kind))?;
    let sender = get_node_id(&mut buf);

    let message = match kind {
        MsgKind::Ping | MsgKind::Pong => {
            expect_remaining(buf, 0)?;
            if kind == MsgKind::Ping {
                Message::Ping
            } else {
                Message::Pong
            }
        }
        MsgKind::FindNode => {
            expect_remaining(buf, NodeId::LEN)?;
            Message::FindNode {
                target: get_node_id(&mut buf),
            }
        }
        MsgKind::FoundNodes => {
            let count = get_count(&mut buf, NODE_ENTRY_LEN)?;
            let mut nodes = Vec::with_capacity(count);
            for _ in 0..count {
                let id = get_node_id(&mut buf);
                let addr = get_ipv4(&mut buf);
                let port = buf.get_u16();
                nodes.push(NodeInfo { id, addr, port });
            }
            Message::FoundNodes { nodes }
        }
        MsgKind::AnnouncePeer => {
            expect_remaining(buf, Topic::LEN + 2)?;
            let topic = get_topic(&mut buf);
            let port = buf.get_u16();
            Message::AnnouncePeer { topic, port }
        }
        MsgKind::GetPeers => {
            expect_remaining(buf, Topic::LEN)?;
            Message::GetPeers {
                topic: get_topic(&mut buf),
            }
        }
        MsgKind::Peers => {
            let count = get_count(&mut buf, PEER_ENTRY_LEN)?;
            let mut peers = Vec::with_capacity(count);
            for _ in 0..count {
                let addr = get_ipv4(&mut buf);
                let port = buf.get_u16();
                peers.push(PeerInfo { addr, port });
            }
            Message::Peers { peers }
        }
    };

    Ok(Packet { sender, message })
}

fn expect_remaining(buf: &[u8], expected: usize) -> Result<()> {
    if buf.len() != expected {
        return Err(Error::LengthMismatch);
    }
    Ok(())
}

fn get_count(buf: &mut &[u8], entry_len: usize) -> Result<usize> {
    if buf.is_empty() {
        return Err(Error::LengthMismatch);
    }
    let count = buf.get_u8();
    if count as usize > K {
        return Err(Error::CountOverflow(count));
    }
    expect_remaining(*buf, count as usize * entry_len)?;
    Ok(count as usize)
}

fn get_node_id(buf: &mut &[u8]) -> NodeId {
    let mut bytes = [0u8; NodeId::LEN];
    buf.copy_to_slice(&mut bytes);
    NodeId::from_bytes(bytes)
}

fn get_topic(buf: &mut &[u8]) -> Topic {
    let mut bytes = [0u8; Topic::LEN];
    buf.copy_to_slice(&mut bytes);
    Topic::from_bytes(bytes)
}

fn get_ipv4(buf: &mut &[u8]) -> Ipv4Addr {
    let mut octets = [0u8; 4];
    buf.copy_to_slice(&mut octets);
    Ipv4Addr::from(octets)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_bodies() -> Vec<Message> {
        vec![
            Message::Ping,
            Message::Pong,
            Message::FindNode {
                target: NodeId::from_bytes([0xBB; 32]),
            },
            Message::FoundNodes {
                nodes: vec![
                    NodeInfo {
                        id: NodeId::from_bytes([0xEE; 32]),
                        addr: Ipv4Addr::new(8, 8, 8, 8),
                        port: 53,
                    },
                    NodeInfo {
                        id: NodeId::random(),
                        addr: Ipv4Addr::new(127, 0, 0, 1),
                        port: 57943,
                    },
                ],
            },
            Message::FoundNodes { nodes: vec![] },
            Message::AnnouncePeer {
                topic: Topic::from_bytes([0xAA; 32]),
                port: 9000,
            },
            Message::GetPeers {
                topic: Topic::from_bytes([0x01; 32]),
            },
            Message::Peers {
                peers: vec![
                    PeerInfo {
                        addr: Ipv4Addr::new(10, 0, 0, 1),
                        port: 8001,
                    },
                    PeerInfo {
                        addr: Ipv4Addr::new(192, 168, 1, 5),
                        port: 8002,
                    },
                ],
            },
            Message::Peers { peers: vec![] },
        ]
    }

    #[test]
    fn round_trip_is_identity_for_every_message_type() {
        for message in sample_bodies() {
            let packet = Packet::new(NodeId::random(), message);
            let decoded = decode(&encode(&packet)).expect("valid packet");
            assert_eq!(packet, decoded);
        }
    }

    #[test]
    fn header_layout_and_endianness() {
        let packet = Packet::new(
            NodeId::from_bytes([0x11; 32]),
            Message::FoundNodes {
                nodes: vec![NodeInfo {
                    id: NodeId::from_bytes([0xEE; 32]),
                    addr: Ipv4Addr::new(127, 0, 0, 1),
                    port: 57943,
                }],
            },
        );
        let wire = encode(&packet);
        assert_eq!(wire.len(), HEADER_LEN + 1 + NODE_ENTRY_LEN);
        assert_eq!(wire[0], 3);
        assert_eq!(&wire[1..33], &[0x11; 32]);
        assert_eq!(wire[33], 1);
        assert_eq!(&wire[34..66], &[0xEE; 32]);
        assert_eq!(&wire[66..70], &[127, 0, 0, 1]);
        assert_eq!(&wire[70..72], &57943u16.to_be_bytes());
    }

    #[test]
    fn rejects_short_header() {
        assert_eq!(decode(&[]), Err(Error::TruncatedHeader));
        assert_eq!(decode(&[0x00; 32]), Err(Error::TruncatedHeader));
    }

    #[test]
    fn rejects_unknown_type() {
        let mut wire = vec![7u8];
        wire.extend_from_slice(&[0xAA; 32]);
        assert_eq!(decode(&wire), Err(Error::UnknownMsgType(7)));
    }

    #[test]
    fn rejects_count_larger_than_cap() {
        let mut wire = vec![6u8];
        wire.extend_from_slice(&[0xAA; 32]);
        wire.push(9);
        wire.extend_from_slice(&[0u8; 9 * 6]);
        assert_eq!(decode(&wire), Err(Error::CountOverflow(9)));
    }

    #[test]
    fn rejects_count_that_overruns_the_body() {
        let mut wire = vec![3u8];
        wire.extend_from_slice(&[0xAA; 32]);
        wire.push(2);
        // only one node entry present
        wire.extend_from_slice(&[0u8; NODE_ENTRY_LEN]);
        assert_eq!(decode(&wire), Err(Error::LengthMismatch));
    }

    #[test]
    fn rejects_trailing_bytes() {
        let mut wire = encode(&Packet::new(NodeId::random(), Message::Ping));
        wire.push(0);
        assert_eq!(decode(&wire), Err(Error::LengthMismatch));
    }

    #[test]
    fn encode_caps_entry_lists_at_k() {
        let nodes = (0..12)
            .map(|i| NodeInfo {
                id: NodeId::random(),
                addr: Ipv4Addr::new(10, 0, 0, i),
                port: 9000 + u16::from(i),
            })
            .collect();
        let wire = encode(&Packet::new(NodeId::random(), Message::FoundNodes { nodes }));
        assert_eq!(wire[HEADER_LEN] as usize, K);
        assert_eq!(wire.len(), HEADER_LEN + 1 + K * NODE_ENTRY_LEN);
    }
}
