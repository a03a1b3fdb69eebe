use carchain::chain::{current_timestamp, Block, ReplicaMode};
use carchain::consensus::ConsensusEngine;
use carchain::logger;
use carchain::network::{
    self, AppState, BootstrapRequest, BootstrapResponse, ChainPage, NodeInfo, NodesStatus,
    RegisterRequest,
};
use carchain::peers::{NodeRole, PeerDirectory};
use std::env;
use std::error::Error;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use uuid::Uuid;

const DEFAULT_PORT: u16 = 3002;

struct NodeConfig {
    role: NodeRole,
    replica: ReplicaMode,
    host: String,
    /// `None` when this node bootstraps the network itself.
    master: Option<String>,
    port: u16,
}

impl NodeConfig {
    fn self_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    fn from_args(args: &[String]) -> Result<Self, String> {
        let usage = "usage: carchain-node <master|member> <full|light> <host> <master-addr|this> [port]";
        if args.len() < 4 {
            return Err(usage.to_string());
        }
        let role = NodeRole::parse(&args[0])
            .ok_or_else(|| format!("unknown role '{}'\n{}", args[0], usage))?;
        let replica = ReplicaMode::parse(&args[1])
            .ok_or_else(|| format!("unknown replica mode '{}'\n{}", args[1], usage))?;
        let host = args[2].clone();
        if host.trim().is_empty() {
            return Err(usage.to_string());
        }
        let master = if args[3] == "this" {
            None
        } else {
            Some(args[3].clone())
        };
        let port = match args.get(4) {
            Some(p) => p
                .parse::<u16>()
                .map_err(|_| format!("invalid port '{}'\n{}", p, usage))?,
            None => DEFAULT_PORT,
        };
        if master.is_none() && role != NodeRole::Master {
            return Err("a member node cannot bootstrap the network; pass a master address".to_string());
        }
        Ok(NodeConfig {
            role,
            replica,
            host,
            master,
            port,
        })
    }
}

/// Walks the paginated chain download starting at `url`.
async fn download_full_chain(
    client: &reqwest::Client,
    url: &str,
) -> Result<Vec<Block>, Box<dyn Error>> {
    let mut blocks = Vec::new();
    let mut next = Some(url.to_string());
    while let Some(url) = next {
        let page: ChainPage = client.get(&url).send().await?.json().await?;
        blocks.extend(page.chain);
        next = page.next_url;
    }
    Ok(blocks)
}

/// Joins an existing network through `master`: sync the chain, then register
/// network-wide and adopt the returned peer lists.
async fn join_network(
    state: &AppState,
    config: &NodeConfig,
    master: &str,
) -> Result<(), Box<dyn Error>> {
    tracing::info!(master = master, "requesting registration");
    let bootstrap: BootstrapResponse = state
        .client
        .post(format!("http://{}/start-register", master))
        .json(&BootstrapRequest {
            replica: config.replica,
        })
        .send()
        .await?
        .json()
        .await?;

    match config.replica {
        ReplicaMode::Full => {
            let url = bootstrap
                .chain_url
                .ok_or("master did not return a chain download url")?;
            let blocks = download_full_chain(&state.client, &url).await?;
            tracing::info!(blocks = blocks.len(), "full chain downloaded");
            state.engine.replace_chain(blocks);
        }
        ReplicaMode::Light => {
            let blocks = bootstrap
                .blocks
                .ok_or("master did not return bootstrap blocks")?;
            tracing::info!(blocks = blocks.len(), "light chain tail received");
            state.engine.replace_chain(blocks);
        }
    }

    let status: NodesStatus = state
        .client
        .post(format!("http://{}/register-and-broadcast-node", master))
        .json(&RegisterRequest {
            address: config.self_address(),
            role: config.role,
        })
        .send()
        .await?
        .json()
        .await?;
    if status.masters.is_empty() {
        return Err(format!("could not retrieve master nodes from {}", master).into());
    }

    let own = config.self_address();
    state.peers.adopt(
        status.masters.into_iter().filter(|a| a != &own).collect(),
        status.members.into_iter().filter(|a| a != &own).collect(),
    );
    tracing::info!(peers = state.peers.total(), "joined network");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    logger::init_logger();

    let args: Vec<String> = env::args().skip(1).collect();
    let config = NodeConfig::from_args(&args)?;
    let running_since = current_timestamp();
    tracing::info!(
        role = %config.role,
        replica = ?config.replica,
        address = %config.self_address(),
        "starting node"
    );

    let engine = Arc::new(ConsensusEngine::new(config.replica));
    let peers = Arc::new(PeerDirectory::new(&config.self_address()));
    let state = AppState::new(
        engine,
        peers,
        NodeInfo {
            id: Uuid::new_v4().simple().to_string(),
            role: config.role,
            replica: config.replica,
            running_since,
        },
    );

    let server_state = state.clone();
    let port = config.port;
    let server = thread::spawn(move || {
        actix_rt::System::new().block_on(async move {
            if let Err(e) = network::start_server(server_state, ("0.0.0.0", port)).await {
                tracing::error!(error = %e, "HTTP server terminated");
            }
        });
    });
    tokio::time::sleep(Duration::from_millis(500)).await;

    match &config.master {
        None => {
            // Lone bootstrap master: it lists itself so its own validation
            // broadcast loops back and quorum(1) = 1 self-accepts.
            state.peers.register_self_master();
            tracing::info!("bootstrapped as the first master node");
        }
        Some(master) => join_network(&state, &config, master).await?,
    }

    server
        .join()
        .map_err(|_| "HTTP server thread panicked")?;
    Ok(())
}
