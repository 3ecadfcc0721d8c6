// Copyright 2024 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

#[macro_use]
extern crate tracing;

mod cmd;
mod driver;
mod error;
mod event;
mod lookup;
mod routing_table;
mod topic_store;

pub use self::{
    cmd::{SwarmCmd, SwarmLocalState},
    driver::{NetStats, SwarmBuilder, SwarmDriver},
    error::Error,
    event::NetworkEvent,
    routing_table::{BucketSnapshot, ContactSnapshot, RoutingTableSnapshot},
};

use self::error::Result;
use std::{
    net::Ipv4Addr,
    panic::{catch_unwind, AssertUnwindSafe},
    sync::{Arc, Mutex},
};
use swarm_protocol::{
    crypto::NetworkKey,
    messages::{NodeInfo, PeerInfo},
    NodeId, Topic,
};
use tokio::sync::{mpsc, oneshot};

/// A packet callback installed with [`Swarm::set_callback`]. Runs on the
/// event dispatch task for every authenticated inbound packet; it must not
/// block and must not await replies from the swarm it was installed on.
pub type PacketCallback = Box<dyn Fn(&NetworkEvent) + Send + 'static>;

/// API to interact with the underlying swarm driver. Cloneable; all clones
/// talk to the same node. Dropping the last clone shuts the node down.
#[derive(Clone)]
pub struct Swarm {
    cmd_sender: mpsc::Sender<SwarmCmd>,
    node_id: NodeId,
    bound_port: u16,
    callback: Arc<Mutex<Option<PacketCallback>>>,
}

impl Swarm {
    pub(crate) fn new(cmd_sender: mpsc::Sender<SwarmCmd>, node_id: NodeId, bound_port: u16) -> Self {
        Self {
            cmd_sender,
            node_id,
            bound_port,
            callback: Arc::new(Mutex::new(None)),
        }
    }

    /// Create a node: bind UDP on `local_port` (0 picks a free port), choose
    /// a random node id, and spawn the driver plus the callback dispatcher.
    ///
    /// This is the one fallible moment of a node's life; a bound socket
    /// never takes the node down again.
    pub async fn create(local_port: u16) -> Result<Self> {
        let (swarm, events, driver) = SwarmBuilder::new(local_port).build().await?;
        let _ = tokio::spawn(driver.run());
        swarm.spawn_callback_dispatch(events);
        Ok(swarm)
    }

    /// Forward driver events to whatever callback is currently installed.
    /// A panicking callback is caught and logged; packet processing is not
    /// affected.
    fn spawn_callback_dispatch(&self, mut events: mpsc::Receiver<NetworkEvent>) {
        let slot = Arc::clone(&self.callback);
        let _ = tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                let guard = match slot.lock() {
                    Ok(guard) => guard,
                    Err(poisoned) => poisoned.into_inner(),
                };
                if let Some(callback) = guard.as_ref() {
                    if catch_unwind(AssertUnwindSafe(|| callback(&event))).is_err() {
                        error!("User callback panicked on {:?}; continuing", event.kind);
                    }
                }
            }
        });
    }

    /// The UDP port the node is bound to.
    pub fn bound_port(&self) -> u16 {
        self.bound_port
    }

    /// This node's 256-bit identifier.
    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    /// Install the packet callback, replacing any previous one.
    pub fn set_callback(&self, callback: impl Fn(&NetworkEvent) + Send + 'static) {
        let mut guard = match self.callback.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard = Some(Box::new(callback));
    }

    /// Install or clear the 32 byte network key used to authenticate all
    /// subsequent traffic. Nodes only interoperate when their keys match.
    pub async fn set_network_key(&self, key: Option<NetworkKey>) -> Result<()> {
        self.send_swarm_cmd(SwarmCmd::SetNetworkKey { key }).await
    }

    /// Send a single PING. Best effort, like all single-packet primitives.
    pub async fn ping(&self, addr: Ipv4Addr, port: u16) -> Result<()> {
        self.send_swarm_cmd(SwarmCmd::Ping { addr, port }).await
    }

    /// Send a single FIND_NODE for `target`.
    pub async fn find_node(&self, addr: Ipv4Addr, port: u16, target: NodeId) -> Result<()> {
        self.send_swarm_cmd(SwarmCmd::FindNode { addr, port, target })
            .await
    }

    /// Announce `announced_port` as our peer port for `topic` at one node.
    pub async fn announce_peer(
        &self,
        addr: Ipv4Addr,
        port: u16,
        topic: Topic,
        announced_port: u16,
    ) -> Result<()> {
        self.send_swarm_cmd(SwarmCmd::AnnouncePeer {
            addr,
            port,
            topic,
            announced_port,
        })
        .await
    }

    /// Ask one node for the peers it stores under `topic`.
    pub async fn get_peers(&self, addr: Ipv4Addr, port: u16, topic: Topic) -> Result<()> {
        self.send_swarm_cmd(SwarmCmd::GetPeers { addr, port, topic })
            .await
    }

    /// Seed the routing table with a contact whose id is already known.
    pub async fn add_contact(&self, id: NodeId, addr: Ipv4Addr, port: u16) -> Result<()> {
        self.send_swarm_cmd(SwarmCmd::AddContact { id, addr, port })
            .await
    }

    /// Join the overlay through a bootstrap contact: ping it, then walk the
    /// overlay towards our own id to fill the routing table. Returns the
    /// closest contacts found.
    pub async fn bootstrap(&self, addr: Ipv4Addr, port: u16) -> Result<Vec<NodeInfo>> {
        let (sender, receiver) = oneshot::channel();
        self.send_swarm_cmd(SwarmCmd::Bootstrap { addr, port, sender })
            .await?;
        receiver
            .await
            .map_err(|_| Error::InternalMsgChannelDropped)
    }

    /// Iteratively locate the k contacts closest to `target`. Always returns
    /// the best shortlist found, converged or timed out.
    pub async fn find_node_iterative(&self, target: NodeId) -> Result<Vec<NodeInfo>> {
        let (sender, receiver) = oneshot::channel();
        self.send_swarm_cmd(SwarmCmd::FindNodeIterative { target, sender })
            .await?;
        receiver
            .await
            .map_err(|_| Error::InternalMsgChannelDropped)
    }

    /// Iteratively collect peers announced under `topic` from the nodes
    /// closest to it.
    pub async fn get_peers_iterative(&self, topic: Topic) -> Result<Vec<PeerInfo>> {
        let (sender, receiver) = oneshot::channel();
        self.send_swarm_cmd(SwarmCmd::GetPeersIterative { topic, sender })
            .await?;
        receiver
            .await
            .map_err(|_| Error::InternalMsgChannelDropped)
    }

    /// Register ourselves under `topic`: locate the nodes closest to it and
    /// announce our bound port to each. Returns how many nodes were told.
    pub async fn announce(&self, topic: Topic) -> Result<usize> {
        let closest = self.find_node_iterative(topic.as_node_id()).await?;
        for node in &closest {
            self.announce_peer(node.addr, node.port, topic, self.bound_port)
                .await?;
        }
        Ok(closest.len())
    }

    /// Diagnostic snapshot of the routing table.
    pub async fn dump_routing_table(&self) -> Result<RoutingTableSnapshot> {
        let (sender, receiver) = oneshot::channel();
        self.send_swarm_cmd(SwarmCmd::DumpRoutingTable { sender })
            .await?;
        receiver
            .await
            .map_err(|_| Error::InternalMsgChannelDropped)
    }

    /// Snapshot of the driver's local state, including drop counters.
    pub async fn local_state(&self) -> Result<SwarmLocalState> {
        let (sender, receiver) = oneshot::channel();
        self.send_swarm_cmd(SwarmCmd::GetLocalState { sender })
            .await?;
        receiver
            .await
            .map_err(|_| Error::InternalMsgChannelDropped)
    }

    async fn send_swarm_cmd(&self, cmd: SwarmCmd) -> Result<()> {
        self.cmd_sender
            .send(cmd)
            .await
            .map_err(|_| Error::DriverShutDown)
    }
}
