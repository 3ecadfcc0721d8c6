// Copyright 2024 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

use crate::{
    cmd::SwarmCmd,
    error::Result,
    event::NetworkEvent,
    lookup::{Lookup, LOOKUP_TICK},
    routing_table::RoutingTable,
    topic_store::{TopicStore, TopicStoreConfig, SWEEP_INTERVAL},
    Swarm,
};
use serde::Serialize;
use std::{
    collections::HashMap,
    net::{Ipv4Addr, SocketAddr, SocketAddrV4},
    sync::Arc,
    time::Instant,
};
use swarm_protocol::{
    codec,
    crypto::NetworkKey,
    messages::{Message, Packet},
    Error as ProtocolError, NodeId,
};
use tokio::{net::UdpSocket, sync::mpsc};

/// Receive buffer; comfortably above the largest sealed packet (a full
/// FOUND_NODES is 338 bytes plus 28 bytes of framing).
const RECV_BUFFER_SIZE: usize = 2048;

const CMD_CHANNEL_SIZE: usize = 256;
const EVENT_CHANNEL_SIZE: usize = 256;

/// Running totals of silently handled failures. Nothing in here is ever
/// surfaced as an error; the counters exist so an operator can see a noisy
/// or hostile network in the local state snapshot.
#[derive(Debug, Default, Clone, Copy, Serialize)]
pub struct NetStats {
    pub dropped_truncated: u64,
    pub dropped_unknown_type: u64,
    pub dropped_bad_count: u64,
    pub dropped_auth: u64,
    pub send_failures: u64,
}

#[derive(Debug)]
pub struct SwarmBuilder {
    local_port: u16,
    network_key: Option<NetworkKey>,
}

impl SwarmBuilder {
    /// `local_port` 0 lets the OS pick a free port.
    pub fn new(local_port: u16) -> Self {
        Self {
            local_port,
            network_key: None,
        }
    }

    /// Authenticate all traffic with `key` from the start.
    pub fn network_key(&mut self, key: NetworkKey) {
        self.network_key = Some(key);
    }

    /// Bind the socket and create the driver together with a [`Swarm`]
    /// handle for sending commands and a receiver for packet events.
    ///
    /// Binding is the only fatal failure in the node's life; everything the
    /// network throws at a running driver is absorbed.
    pub async fn build(self) -> Result<(Swarm, mpsc::Receiver<NetworkEvent>, SwarmDriver)> {
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, self.local_port)).await?;
        let (local_ip, bound_port) = match socket.local_addr()? {
            SocketAddr::V4(addr) => (*addr.ip(), addr.port()),
            SocketAddr::V6(addr) => (Ipv4Addr::UNSPECIFIED, addr.port()),
        };

        let self_id = NodeId::random();
        info!("Swarm node {self_id:?} listening on UDP port {bound_port}");

        let (cmd_sender, cmd_receiver) = mpsc::channel(CMD_CHANNEL_SIZE);
        let (event_sender, event_receiver) = mpsc::channel(EVENT_CHANNEL_SIZE);

        let driver = SwarmDriver {
            socket: Arc::new(socket),
            self_id,
            bound_port,
            routing_table: RoutingTable::new(self_id, local_ip, bound_port),
            topic_store: TopicStore::with_config(TopicStoreConfig::default()),
            network_key: self.network_key,
            cmd_receiver,
            event_sender,
            lookups: HashMap::new(),
            next_lookup_id: 0,
            stats: NetStats::default(),
        };

        Ok((
            Swarm::new(cmd_sender, self_id, bound_port),
            event_receiver,
            driver,
        ))
    }
}

/// The reactor. Exclusive owner of the socket and of all protocol state;
/// every other thread reaches it through the command channel.
pub struct SwarmDriver {
    socket: Arc<UdpSocket>,
    pub(crate) self_id: NodeId,
    pub(crate) bound_port: u16,
    pub(crate) routing_table: RoutingTable,
    pub(crate) topic_store: TopicStore,
    pub(crate) network_key: Option<NetworkKey>,
    cmd_receiver: mpsc::Receiver<SwarmCmd>,
    pub(crate) event_sender: mpsc::Sender<NetworkEvent>,
    pub(crate) lookups: HashMap<u64, Lookup>,
    pub(crate) next_lookup_id: u64,
    pub(crate) stats: NetStats,
}

impl SwarmDriver {
    /// Drive the node until every [`Swarm`] handle is gone. Datagrams,
    /// commands and the maintenance ticks are multiplexed on this one task,
    /// so no protocol state needs a lock.
    pub async fn run(mut self) {
        let socket = Arc::clone(&self.socket);
        let mut buf = vec![0u8; RECV_BUFFER_SIZE];
        let mut lookup_tick = tokio::time::interval(LOOKUP_TICK);
        let mut sweep_tick = tokio::time::interval(SWEEP_INTERVAL);

        loop {
            tokio::select! {
                received = socket.recv_from(&mut buf) => match received {
                    Ok((len, SocketAddr::V4(src))) => self.handle_datagram(&buf[..len], src).await,
                    Ok((_, SocketAddr::V6(src))) => trace!("Ignoring datagram from IPv6 source {src}"),
                    Err(err) => warn!("UDP receive failed: {err}"),
                },
                some_cmd = self.cmd_receiver.recv() => match some_cmd {
                    Some(cmd) => {
                        let start = Instant::now();
                        let cmd_string = format!("{cmd:?}");
                        self.handle_cmd(cmd).await;
                        trace!("SwarmCmd handled in {:?}: {cmd_string}", start.elapsed());
                    }
                    // all handles dropped; nothing can reach us any more
                    None => break,
                },
                _ = lookup_tick.tick() => self.tick_lookups(Instant::now()).await,
                _ = sweep_tick.tick() => self.topic_store.sweep(),
            }
        }

        debug!(
            "Command channel closed; swarm driver on port {} shutting down",
            self.bound_port
        );
    }

    /// Authenticate (when keyed) and decode one datagram, then hand it to
    /// the protocol handler. Anything malformed is counted and dropped;
    /// the sender never learns whether we exist.
    async fn handle_datagram(&mut self, bytes: &[u8], src: SocketAddrV4) {
        let decoded = match &self.network_key {
            Some(key) => key.open(bytes).and_then(|plain| codec::decode(&plain)),
            None => codec::decode(bytes),
        };
        match decoded {
            Ok(packet) => self.handle_packet(packet, src).await,
            Err(err) => {
                self.note_dropped(&err);
                trace!("Dropping datagram from {src}: {err}");
            }
        }
    }

    fn note_dropped(&mut self, err: &ProtocolError) {
        match err {
            ProtocolError::TruncatedHeader | ProtocolError::LengthMismatch => {
                self.stats.dropped_truncated += 1;
            }
            ProtocolError::UnknownMsgType(_) => self.stats.dropped_unknown_type += 1,
            ProtocolError::CountOverflow(_) => self.stats.dropped_bad_count += 1,
            ProtocolError::AuthFailed => self.stats.dropped_auth += 1,
            ProtocolError::BadKeyLength | ProtocolError::BadTopicHex => {}
        }
    }

    /// Encode, seal when keyed, and transmit one message. Best effort: a
    /// failed send is counted and logged, never surfaced.
    pub(crate) async fn send_message(&mut self, addr: Ipv4Addr, port: u16, message: Message) {
        let kind = message.kind();
        let wire = codec::encode(&Packet::new(self.self_id, message));
        let wire = match &self.network_key {
            Some(key) => key.seal(&wire),
            None => wire,
        };
        match self.socket.send_to(&wire, SocketAddrV4::new(addr, port)).await {
            Ok(_) => trace!("Sent {kind} to {addr}:{port}"),
            Err(err) => {
                self.stats.send_failures += 1;
                warn!("Failed to send {kind} to {addr}:{port}: {err}");
            }
        }
    }
}
