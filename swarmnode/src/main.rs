// Copyright 2024 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

#[macro_use]
extern crate tracing;

use clap::Parser;
use eyre::{eyre, Result};
use std::net::Ipv4Addr;
use swarm_networking::Swarm;
use swarm_protocol::{crypto::NetworkKey, Topic};
use tracing_subscriber::EnvFilter;

fn parse_contact(val: &str) -> Result<(Ipv4Addr, u16)> {
    let (addr, port) = val
        .split_once(':')
        .ok_or_else(|| eyre!("expected ip:port, got {val:?}"))?;
    Ok((addr.parse()?, port.parse()?))
}

fn parse_network_key(val: &str) -> Result<NetworkKey> {
    let bytes = hex::decode(val)?;
    NetworkKey::from_bytes(&bytes).map_err(|err| eyre!("{err}"))
}

fn parse_topic(val: &str) -> Result<Topic> {
    Topic::from_hex(val).map_err(|err| eyre!("{err}"))
}

// Please do not remove the blank lines in these doc comments.
// They are used for inserting line breaks when the help menu is rendered in the UI.
#[derive(Parser, Debug)]
#[clap(name = "swarmnode cli", version = env!("CARGO_PKG_VERSION"))]
struct Opt {
    /// UDP port to bind.
    ///
    /// The default of 0 lets the OS pick a free port.
    #[clap(long, default_value_t = 0)]
    port: u16,

    /// Bootstrap contact, as ip:port. May be given multiple times.
    #[clap(long = "bootstrap", value_parser = parse_contact, verbatim_doc_comment)]
    bootstrap: Vec<(Ipv4Addr, u16)>,

    /// Shared network key as a 64 character hex string.
    ///
    /// Nodes only interoperate when their keys match; omit it for an open
    /// overlay.
    #[clap(long, value_parser = parse_network_key, verbatim_doc_comment)]
    network_key: Option<NetworkKey>,

    /// Topic to announce or look up, as a 64 character hex string.
    #[clap(long, value_parser = parse_topic)]
    topic: Option<Topic>,

    /// Announce ourselves under --topic, then keep serving the overlay.
    #[clap(long)]
    announce: bool,

    /// Look up peers for --topic, print them, and exit.
    #[clap(long)]
    get: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let opt = Opt::parse();
    if (opt.announce || opt.get) && opt.topic.is_none() {
        return Err(eyre!("--announce and --get require --topic"));
    }

    let swarm = Swarm::create(opt.port).await?;
    if let Some(key) = opt.network_key.clone() {
        swarm.set_network_key(Some(key)).await?;
    }
    swarm.set_callback(|event| {
        debug!(
            "{} from {}:{} (sender {:?})",
            event.kind, event.addr, event.port, event.sender
        );
    });

    // interop scripts scrape this line for the bound port
    println!("Node listening on {}", swarm.bound_port());

    for (addr, port) in &opt.bootstrap {
        let found = swarm.bootstrap(*addr, *port).await?;
        info!("Bootstrapped via {addr}:{port}; {} contacts found", found.len());
    }

    if let (Some(topic), true) = (opt.topic, opt.get) {
        let peers = swarm.get_peers_iterative(topic).await?;
        if peers.is_empty() {
            println!("NO_PEERS");
        } else {
            println!("FOUND_PEERS");
            for peer in peers {
                println!("{}:{}", peer.addr, peer.port);
            }
        }
        return Ok(());
    }

    if let (Some(topic), true) = (opt.topic, opt.announce) {
        let told = swarm.announce(topic).await?;
        info!("Announced topic {topic} to {told} nodes");
    }

    tokio::signal::ctrl_c().await?;
    let snapshot = swarm.dump_routing_table().await?;
    println!("{}", serde_json::to_string_pretty(&snapshot)?);
    Ok(())
}
