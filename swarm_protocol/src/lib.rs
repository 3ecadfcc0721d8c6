// Copyright 2024 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

/// Wire encoding and decoding of packets.
pub mod codec;
/// Packet authentication with a shared network key.
pub mod crypto;
/// Errors.
pub mod error;
/// Message types and the wire codec.
pub mod messages;

pub use error::Error;

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt::{self, Debug, Display, Formatter};

/// Bucket capacity of the routing table, and the default size of a
/// "closest contacts" set. Also caps the entry count of any single
/// FOUND_NODES or PEERS message.
pub const K: usize = 8;

/// A 256-bit node identifier, drawn uniformly at random when a node starts.
///
/// Proximity between identifiers (and between an identifier and a topic) is
/// measured with the XOR metric: see [`NodeId::distance`].
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId([u8; 32]);

impl NodeId {
    /// The length of a node id in bytes.
    pub const LEN: usize = 32;

    /// Generate a fresh random id. `rand::thread_rng` is a CSPRNG, which the
    /// overlay relies on for uniform spread across the id space.
    pub fn random() -> Self {
        let mut bytes = [0u8; Self::LEN];
        rand::thread_rng().fill(&mut bytes);
        Self(bytes)
    }

    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Compute the XOR distance to `other`.
    pub fn distance(&self, other: &NodeId) -> Distance {
        let mut out = [0u8; 32];
        for (i, byte) in out.iter_mut().enumerate() {
            *byte = self.0[i] ^ other.0[i];
        }
        Distance(out)
    }
}

impl Display for NodeId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl Debug for NodeId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        // only the first 3 bytes are logged
        write!(f, "NodeId({}..)", hex::encode(&self.0[..3]))
    }
}

/// XOR distance between two 256-bit identifiers, interpreted as a big-endian
/// integer. The derived ordering on the byte array is exactly the integer
/// ordering, which makes this the Kademlia metric.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Distance(pub [u8; 32]);

impl Distance {
    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|b| *b == 0)
    }

    /// Number of leading zero bits, i.e. `255 - floor(log2(d))` for a
    /// non-zero distance. Zero distance maps to bucket 0; it never reaches a
    /// routing table because a node does not insert itself.
    pub fn bucket_index(&self) -> usize {
        for (i, byte) in self.0.iter().enumerate() {
            if *byte != 0 {
                return i * 8 + byte.leading_zeros() as usize;
            }
        }
        0
    }
}

impl Debug for Distance {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "Distance({}..)", hex::encode(&self.0[..3]))
    }
}

/// A 32-byte topic hash ("info hash"): the rendezvous key under which peers
/// announce themselves and look each other up.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Topic([u8; 32]);

impl Topic {
    /// The length of a topic hash in bytes.
    pub const LEN: usize = 32;

    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Parse a 64-character hex string.
    pub fn from_hex(s: &str) -> Result<Self, Error> {
        let decoded = hex::decode(s).map_err(|_| Error::BadTopicHex)?;
        let bytes: [u8; 32] = decoded.try_into().map_err(|_| Error::BadTopicHex)?;
        Ok(Self(bytes))
    }

    /// View the topic as a point in the node id space, for distance
    /// calculations against node identifiers.
    pub fn as_node_id(&self) -> NodeId {
        NodeId(self.0)
    }
}

impl Display for Topic {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl Debug for Topic {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "Topic({}..)", hex::encode(&self.0[..3]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn distance_is_symmetric_and_zero_on_self() {
        let a = NodeId::random();
        let b = NodeId::random();
        assert_eq!(a.distance(&b), b.distance(&a));
        assert!(a.distance(&a).is_zero());
        assert!(!a.distance(&b).is_zero());
    }

    #[test]
    fn distance_orders_like_the_integer_interpretation() {
        let origin = NodeId::from_bytes([0u8; 32]);
        let mut one = [0u8; 32];
        one[31] = 1;
        let mut big = [0u8; 32];
        big[0] = 0x80;
        let near = NodeId::from_bytes(one);
        let far = NodeId::from_bytes(big);
        assert!(origin.distance(&near) < origin.distance(&far));
    }

    #[test]
    fn bucket_index_is_position_of_highest_differing_bit() {
        let zero = NodeId::from_bytes([0u8; 32]);

        let mut top = [0u8; 32];
        top[0] = 0x80;
        assert_eq!(zero.distance(&NodeId::from_bytes(top)).bucket_index(), 0);

        let mut second = [0u8; 32];
        second[0] = 0x40;
        assert_eq!(zero.distance(&NodeId::from_bytes(second)).bucket_index(), 1);

        let mut bottom = [0u8; 32];
        bottom[31] = 0x01;
        assert_eq!(zero.distance(&NodeId::from_bytes(bottom)).bucket_index(), 255);

        assert_eq!(zero.distance(&zero).bucket_index(), 0);
    }

    #[test]
    fn topic_hex_round_trip() {
        let topic = Topic::from_bytes([0xAA; 32]);
        let parsed = Topic::from_hex(&topic.to_string()).expect("valid hex");
        assert_eq!(topic, parsed);
        assert!(Topic::from_hex("not hex").is_err());
        assert!(Topic::from_hex("aabb").is_err());
    }
}
