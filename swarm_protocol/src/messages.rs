// Copyright 2024 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

//! The seven overlay messages and their common packet header.

use crate::{NodeId, Topic};
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use strum::Display;

/// The wire discriminant of each message, also handed to the user callback
/// and used to label per-kind drop counters.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum MsgKind {
    Ping = 0,
    Pong = 1,
    FindNode = 2,
    FoundNodes = 3,
    AnnouncePeer = 4,
    GetPeers = 5,
    Peers = 6,
}

impl MsgKind {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Ping),
            1 => Some(Self::Pong),
            2 => Some(Self::FindNode),
            3 => Some(Self::FoundNodes),
            4 => Some(Self::AnnouncePeer),
            5 => Some(Self::GetPeers),
            6 => Some(Self::Peers),
            _ => None,
        }
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

/// A routing contact as carried inside FOUND_NODES.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeInfo {
    pub id: NodeId,
    pub addr: Ipv4Addr,
    pub port: u16,
}

/// A topic peer as carried inside PEERS.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PeerInfo {
    pub addr: Ipv4Addr,
    pub port: u16,
}

/// One overlay message body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Ping,
    Pong,
    FindNode { target: NodeId },
    FoundNodes { nodes: Vec<NodeInfo> },
    AnnouncePeer { topic: Topic, port: u16 },
    GetPeers { topic: Topic },
    Peers { peers: Vec<PeerInfo> },
}

impl Message {
    pub fn kind(&self) -> MsgKind {
        match self {
            Message::Ping => MsgKind::Ping,
            Message::Pong => MsgKind::Pong,
            Message::FindNode { .. } => MsgKind::FindNode,
            Message::FoundNodes { .. } => MsgKind::FoundNodes,
            Message::AnnouncePeer { .. } => MsgKind::AnnouncePeer,
            Message::GetPeers { .. } => MsgKind::GetPeers,
            Message::Peers { .. } => MsgKind::Peers,
        }
    }
}

/// A full packet: the 33 byte header pairs the message type with the claimed
/// sender id; the body follows, shaped by the type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub sender: NodeId,
    pub message: Message,
}

impl Packet {
    pub fn new(sender: NodeId, message: Message) -> Self {
        Self { sender, message }
    }
}
