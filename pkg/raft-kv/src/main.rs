//! The `raft-server` binary: binds a node's address, connects to its
//! peers lazily, and drives the consensus core with real sockets and
//! timers inside a single tokio task per server -- one task, no locking
//! discipline needed to serialize calls into the core.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use log::{error, info, warn};
use rand::Rng;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};

use raft::apply::ApplyDriver;
use raft::consensus::{ConsensusModule, Tick};
use raft::protos::{Index, ServerId};

use raft_kv::config::{self, CliOverrides};
use raft_kv::kv::{Command, CommandResult, KvStore};
use raft_kv::persistence::FilePersistence;
use raft_kv::protocol::ClientResponse;
use raft_kv::transport::{self, TcpTransport};
use raft_kv::wire::{read_frame, write_frame};

#[derive(Parser, Debug)]
#[command(name = "raft-server")]
struct Args {
    /// This server's id; must match an entry in the config file.
    #[arg(long)]
    id: ServerId,

    #[arg(long, default_value = "cluster.toml")]
    config: PathBuf,

    /// Overrides the data directory for the durable state file.
    #[arg(long, default_value = ".")]
    data_dir: PathBuf,

    /// Overrides the config file's heartbeat interval, in milliseconds.
    #[arg(long)]
    heartbeat_interval_ms: Option<u64>,

    /// Overrides the config file's minimum election timeout, in milliseconds.
    #[arg(long)]
    election_timeout_min_ms: Option<u64>,

    /// Overrides the config file's maximum election timeout, in milliseconds.
    #[arg(long)]
    election_timeout_max_ms: Option<u64>,
}

struct ClientRequest {
    command: Command,
    reply: oneshot::Sender<ClientReply>,
}

enum ClientReply {
    Applied(CommandResult),
    NotLeader { leader_hint: Option<ServerId> },
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let overrides = CliOverrides {
        heartbeat_interval_ms: args.heartbeat_interval_ms,
        election_timeout_min_ms: args.election_timeout_min_ms,
        election_timeout_max_ms: args.election_timeout_max_ms,
    };
    let cluster_config = config::load(&args.config, args.id, overrides)?;
    let client_addrs = client_addresses(&cluster_config.servers);

    let state_path = args.data_dir.join(format!("raft-{}.state.json", args.id));
    let persistence = FilePersistence::new(state_path);
    let module = ConsensusModule::new(cluster_config.clone(), persistence);
    let transport = transport::spawn(args.id, &cluster_config.servers).await?;

    let (client_tx, client_rx) = mpsc::channel(64);
    let self_client_addr = client_addrs.get(&args.id).expect("client address computed for every configured server").clone();
    tokio::spawn(run_client_listener(self_client_addr, client_tx, client_addrs.clone()));

    info!("server {} listening for peers on {}", args.id, cluster_config.servers[&args.id]);

    run_driver(module, transport, client_rx, cluster_config.election_timeout_min, cluster_config.election_timeout_max, cluster_config.heartbeat_interval).await
}

fn client_addresses(servers: &HashMap<ServerId, String>) -> HashMap<ServerId, String> {
    servers
        .iter()
        .map(|(&id, addr)| {
            let client_addr = match addr.rsplit_once(':') {
                Some((host, port)) => match port.parse::<u16>() {
                    Ok(p) => format!("{host}:{}", p.wrapping_add(1000)),
                    Err(_) => addr.clone(),
                },
                None => addr.clone(),
            };
            (id, client_addr)
        })
        .collect()
}

async fn run_driver(
    mut module: ConsensusModule<FilePersistence>,
    mut transport: TcpTransport,
    mut client_rx: mpsc::Receiver<ClientRequest>,
    election_min: Duration,
    election_max: Duration,
    heartbeat_interval: Duration,
) -> Result<()> {
    let mut kv = KvStore::new();
    let mut apply_driver = ApplyDriver::new();
    let mut pending_replies: HashMap<Index, oneshot::Sender<ClientReply>> = HashMap::new();

    let mut election_sleep = Box::pin(tokio::time::sleep(random_election_timeout(election_min, election_max)));
    let mut heartbeat_ticker = tokio::time::interval(heartbeat_interval);

    loop {
        let mut tick = Tick::empty();

        tokio::select! {
            (from, message) = transport.recv() => {
                if let Err(err) = module.handle_message(from, message, &mut tick) {
                    error!("[{}] fatal error handling message from {}: {}", module.id(), from, err);
                    return Err(err.into());
                }
            }
            _ = &mut election_sleep => {
                module.on_election_timeout(&mut tick)?;
                election_sleep.as_mut().reset(tokio::time::Instant::now() + random_election_timeout(election_min, election_max));
            }
            _ = heartbeat_ticker.tick() => {
                module.on_heartbeat_timeout(&mut tick)?;
            }
            Some(req) = client_rx.recv() => {
                handle_client_request(&mut module, &mut tick, req, &mut pending_replies);
            }
        }

        for envelope in tick.messages {
            transport.send(envelope.to, envelope.message);
        }

        for (index, result) in apply_driver.poll_apply(&module, &mut kv) {
            if let Some(reply) = pending_replies.remove(&index) {
                match CommandResult::decode(&result) {
                    Ok(result) => {
                        let _ = reply.send(ClientReply::Applied(result));
                    }
                    Err(err) => warn!("failed to decode applied command result at index {index}: {err}"),
                }
            }
        }
    }
}

fn handle_client_request(
    module: &mut ConsensusModule<FilePersistence>,
    tick: &mut Tick,
    req: ClientRequest,
    pending_replies: &mut HashMap<Index, oneshot::Sender<ClientReply>>,
) {
    match module.client_append(req.command.encode(), tick) {
        Ok(proposal) => {
            pending_replies.insert(proposal.index, req.reply);
        }
        Err(raft::RaftError::NotLeader { leader_hint }) => {
            let _ = req.reply.send(ClientReply::NotLeader { leader_hint });
        }
        Err(err) => {
            error!("[{}] fatal error appending client command: {}", module.id(), err);
        }
    }
}

fn random_election_timeout(min: Duration, max: Duration) -> Duration {
    let mut rng = rand::thread_rng();
    let span = max.saturating_sub(min).as_millis().max(1) as u64;
    min + Duration::from_millis(rng.gen_range(0..span))
}

/// Accepts client connections and translates each request into a
/// [`ClientRequest`] fed to the driver loop, following redirect hints
/// transparently so a client always ends up talking to the leader.
async fn run_client_listener(bind_addr: String, driver_tx: mpsc::Sender<ClientRequest>, client_addrs: HashMap<ServerId, String>) {
    let listener = match TcpListener::bind(&bind_addr).await {
        Ok(l) => l,
        Err(err) => {
            error!("failed to bind client listener on {bind_addr}: {err}");
            return;
        }
    };
    info!("accepting client requests on {bind_addr}");

    loop {
        let (stream, _) = match listener.accept().await {
            Ok(pair) => pair,
            Err(err) => {
                warn!("client accept failed: {err}");
                continue;
            }
        };
        let driver_tx = driver_tx.clone();
        let client_addrs = client_addrs.clone();
        tokio::spawn(handle_client_connection(stream, driver_tx, client_addrs));
    }
}

async fn handle_client_connection(mut stream: TcpStream, driver_tx: mpsc::Sender<ClientRequest>, client_addrs: HashMap<ServerId, String>) {
    loop {
        let command: Command = match read_frame(&mut stream).await {
            Ok(c) => c,
            Err(_) => return, // client disconnected.
        };

        let (reply_tx, reply_rx) = oneshot::channel();
        if driver_tx.send(ClientRequest { command, reply: reply_tx }).await.is_err() {
            return;
        }

        let response = match reply_rx.await {
            Ok(ClientReply::Applied(result)) => ClientResponse::Applied(result),
            Ok(ClientReply::NotLeader { leader_hint }) => {
                ClientResponse::Redirect(leader_hint.and_then(|id| client_addrs.get(&id).cloned()))
            }
            Err(_) => ClientResponse::Redirect(None), // the server shut down mid-request.
        };

        if write_frame(&mut stream, &response).await.is_err() {
            return;
        }
    }
}
