//! HTTP transport: inbound routes and outbound broadcast fan-out.
//!
//! Consensus never blocks on the network while holding its lock; handlers
//! update local state first and broadcast afterwards, collecting whatever
//! peer responses arrive. A peer that never answers simply contributes no
//! vote.

use crate::chain::{Block, ReplicaMode};
use crate::consensus::{ConsensusEngine, Decision, Vote, VoteRecord, VoteStatus};
use crate::peers::{NodeRole, PeerDirectory};
use crate::stats::VotingStatistics;
use actix_web::{web, App, HttpResponse, HttpServer, Responder};
use futures::future::join_all;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

/// Blocks handed to a light replica at bootstrap.
const LIGHT_BOOTSTRAP_TAIL: usize = 10;

/// Identity of this node, fixed at startup.
#[derive(Clone)]
pub struct NodeInfo {
    pub id: String,
    pub role: NodeRole,
    pub replica: ReplicaMode,
    pub running_since: String,
}

/// Shared per-node state handed to every request handler.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<ConsensusEngine>,
    pub peers: Arc<PeerDirectory>,
    pub node: NodeInfo,
    /// Current round's instrumentation. Never consulted by consensus.
    pub stats: Arc<Mutex<VotingStatistics>>,
    pub client: reqwest::Client,
}

impl AppState {
    pub fn new(
        engine: Arc<ConsensusEngine>,
        peers: Arc<PeerDirectory>,
        node: NodeInfo,
    ) -> Self {
        AppState {
            engine,
            peers,
            node,
            stats: Arc::new(Mutex::new(VotingStatistics::default())),
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(10))
                .build()
                .unwrap_or_default(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct CreateBlockRequest {
    pub plate: String,
    pub data: serde_json::Value,
    #[serde(default)]
    pub timestamp: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ValidationRequest {
    /// The original creation request, re-checked by every validator.
    pub original: CreateBlockRequest,
    pub candidate: Block,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct RegisterRequest {
    pub address: String,
    pub role: NodeRole,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct DeregisterRequest {
    pub address: String,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct BootstrapRequest {
    pub replica: ReplicaMode,
}

/// Bootstrap payload: full replicas walk the paginated download starting at
/// `chain_url`; light replicas take the tail blocks directly.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct BootstrapResponse {
    #[serde(default)]
    pub chain_url: Option<String>,
    #[serde(default)]
    pub blocks: Option<Vec<Block>>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct NodesStatus {
    pub note: String,
    pub masters: Vec<String>,
    pub members: Vec<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ChainPage {
    pub total_pages: usize,
    pub previous_url: Option<String>,
    pub next_url: Option<String>,
    pub chain: Vec<Block>,
}

fn page_url(address: &str, page: usize) -> String {
    format!("http://{}/blockchain/{}", address, page)
}

fn nodes_status(peers: &PeerDirectory) -> NodesStatus {
    let masters = peers.masters();
    let members = peers.members();
    NodesStatus {
        note: format!(
            "{} master node(s) and {} member node(s) active",
            masters.len(),
            members.len()
        ),
        masters,
        members,
    }
}

async fn index(state: web::Data<AppState>) -> impl Responder {
    let status = nodes_status(&state.peers);
    HttpResponse::Ok().json(json!({
        "node_id": state.node.id,
        "address": state.peers.self_address(),
        "role": state.node.role,
        "replica": state.node.replica,
        "running_since": state.node.running_since,
        "masters": status.masters,
        "members": status.members,
    }))
}

async fn get_chain(state: web::Data<AppState>) -> impl Responder {
    let blocks = state.engine.with_chain(|chain| chain.blocks().to_vec());
    HttpResponse::Ok().json(blocks)
}

async fn chain_size(state: web::Data<AppState>) -> impl Responder {
    HttpResponse::Ok().json(json!({
        "blockchain_length": state.engine.with_chain(|chain| chain.len()),
        "candidates_in_flight": state.engine.candidate_count(),
        "orphaned_vote_hashes": state.engine.orphan_count(),
    }))
}

async fn chain_page(state: web::Data<AppState>, path: web::Path<usize>) -> impl Responder {
    let page = path.into_inner();
    let self_address = state.peers.self_address().to_string();
    let (total_pages, chain) = state
        .engine
        .with_chain(|chain| (chain.total_pages(), chain.page(page)));
    let previous_url = page.checked_sub(1).map(|p| page_url(&self_address, p));
    let next_url = if page + 1 < total_pages {
        Some(page_url(&self_address, page + 1))
    } else {
        None
    };
    HttpResponse::Ok().json(ChainPage {
        total_pages,
        previous_url,
        next_url,
        chain,
    })
}

async fn nodes(state: web::Data<AppState>) -> impl Responder {
    HttpResponse::Ok().json(nodes_status(&state.peers))
}

async fn health() -> impl Responder {
    HttpResponse::Ok().json(json!({ "status": "healthy" }))
}

/// POST /createBlock - master-only block proposal.
async fn create_block(
    state: web::Data<AppState>,
    body: web::Json<CreateBlockRequest>,
) -> impl Responder {
    if state.node.role != NodeRole::Master {
        tracing::warn!("block creation refused, this node is not a master");
        return HttpResponse::Forbidden().json(json!({
            "note": "this node has no permission to create blocks; send the request to a master node"
        }));
    }

    *state.stats.lock() = VotingStatistics::started_now();
    let request = body.into_inner();
    let peer_count = state.peers.total();

    let block = match state.engine.create_candidate(
        &request.plate,
        request.data.clone(),
        request.timestamp.clone(),
        peer_count,
    ) {
        Ok(block) => block,
        Err(e) => {
            tracing::warn!(error = %e, "rejected block creation request");
            return HttpResponse::BadRequest().json(json!({
                "note": e.to_string(),
                "field": e.field,
            }));
        }
    };
    state.stats.lock().creation_local_finished();
    tracing::info!(
        hash = %block.hash,
        index = block.index,
        plate = %block.plate,
        "candidate created, broadcasting for validation"
    );

    let validation = ValidationRequest {
        original: request,
        candidate: block.clone(),
    };
    let results = broadcast(&state, "/validate", &validation).await;
    state.stats.lock().creation_results_received();
    tracing::info!(
        responded = results,
        peers = peer_count,
        "validation broadcast finished"
    );

    let report = state.stats.lock().results(peer_count);
    HttpResponse::Ok().json(json!({
        "note": format!("block {} created and transmitted to the network for validation", block.hash),
        "block": block,
        "voting_statistics": report,
    }))
}

/// POST /validate - peer-side candidate validation and vote emission.
async fn validate(
    state: web::Data<AppState>,
    body: web::Json<ValidationRequest>,
) -> impl Responder {
    state.stats.lock().validation_started();
    let request = body.into_inner();

    if request.original.plate.trim().is_empty() {
        tracing::warn!("validation request carries empty plate metadata");
        return HttpResponse::Ok().json(json!({
            "note": "invalid registration metadata",
            "vote": Vote::No,
        }));
    }

    let candidate = request.candidate;
    let (hash, index) = (candidate.hash.clone(), candidate.index);
    tracing::info!(hash = %hash, index = index, "starting validation on candidate");

    let peer_count = state.peers.total();
    let (vote, detail) = match state.engine.validate_candidate(candidate, peer_count) {
        Ok(outcome) => outcome,
        Err(e) => {
            tracing::error!(error = %e, "chain store unavailable during validation");
            return HttpResponse::InternalServerError().json(json!({
                "note": e.to_string(),
                "vote": Vote::No,
            }));
        }
    };
    if vote == Vote::No {
        tracing::warn!(hash = %hash, detail = %detail, "candidate is not valid");
    }
    state.stats.lock().local_validation_finished();

    let record = VoteRecord {
        block_hash: hash.clone(),
        block_index: index,
        voter_id: state.peers.self_address().to_string(),
        vote,
    };
    // Count the own vote locally; peers receive it over the wire. The voter
    // set dedups the loopback delivery a lone bootstrap master sees.
    apply_vote(&state, &record);
    broadcast(&state, "/receive-vote", &record).await;
    state.stats.lock().validation_results_received();

    HttpResponse::Ok().json(json!({
        "note": format!("block {} processed and vote {} transmitted to the network", hash, vote),
        "vote": vote,
        "details": detail,
    }))
}

/// Routes a vote into the engine and closes the round's consensus clock
/// when the decision settles.
fn apply_vote(state: &AppState, record: &VoteRecord) -> VoteStatus {
    state
        .stats
        .lock()
        .vote_received(&record.voter_id, record.vote);
    let status = state.engine.submit_vote(record, state.peers.total());
    if let VoteStatus::Accepted { decision, .. } = &status {
        if *decision != Decision::Pending {
            state.stats.lock().consensus_finished();
            let total = state.stats.lock().consensus_total_ms();
            tracing::info!(
                hash = %record.block_hash,
                decision = ?decision,
                consensus_ms = total,
                "consensus round closed"
            );
        }
    }
    status
}

/// POST /receive-vote - a peer's vote on a candidate block.
async fn receive_vote(
    state: web::Data<AppState>,
    body: web::Json<VoteRecord>,
) -> impl Responder {
    let record = body.into_inner();
    tracing::info!(
        hash = %record.block_hash,
        voter = %record.voter_id,
        vote = %record.vote,
        "vote received"
    );
    let status = apply_vote(&state, &record);
    let note = match &status {
        VoteStatus::Accepted { .. } => {
            format!("vote on block {} acknowledged", record.block_hash)
        }
        VoteStatus::AlreadyDecided => {
            format!("block {} was already decided", record.block_hash)
        }
        VoteStatus::NotYetReceived => {
            format!(
                "candidate {} not yet received, vote buffered",
                record.block_hash
            )
        }
    };
    HttpResponse::Ok().json(json!({ "note": note, "result": status }))
}

/// POST /register-node - adds one peer to the local directory.
async fn register_node(
    state: web::Data<AppState>,
    body: web::Json<RegisterRequest>,
) -> impl Responder {
    let request = body.into_inner();
    match state.peers.register(&request.address, request.role) {
        Ok(()) => {
            tracing::info!(address = %request.address, role = %request.role, "peer registered");
            HttpResponse::Ok().json(json!({
                "note": format!("node registered successfully on {}", state.peers.self_address()),
            }))
        }
        Err(e) => {
            tracing::warn!(address = %request.address, error = %e, "register request refused");
            HttpResponse::BadRequest().json(json!({ "note": e.to_string() }))
        }
    }
}

/// POST /register-and-broadcast-node - network entry point for a new peer.
async fn register_broadcast(
    state: web::Data<AppState>,
    body: web::Json<RegisterRequest>,
) -> impl Responder {
    let request = body.into_inner();
    tracing::info!(address = %request.address, role = %request.role, "broadcasting new peer");

    // Register locally first so the status below reflects the newcomer even
    // if every peer broadcast fails.
    if let Err(e) = state.peers.register(&request.address, request.role) {
        tracing::warn!(error = %e, "local registration refused");
    }
    let targets: Vec<String> = state
        .peers
        .all()
        .into_iter()
        .filter(|a| a != &request.address && a != state.peers.self_address())
        .collect();
    broadcast_to(&state, &targets, "/register-node", &request).await;

    HttpResponse::Ok().json(nodes_status(&state.peers))
}

/// POST /deregister-node - removes one peer from the local directory.
async fn deregister_node(
    state: web::Data<AppState>,
    body: web::Json<DeregisterRequest>,
) -> impl Responder {
    let request = body.into_inner();
    if state.peers.deregister(&request.address) {
        tracing::info!(address = %request.address, "peer deregistered");
        HttpResponse::Ok().json(json!({
            "note": format!("{} removed from network", request.address)
        }))
    } else {
        HttpResponse::NotFound().json(json!({
            "note": format!("{} not found in network", request.address)
        }))
    }
}

/// POST /deregister-self - announces this node's departure to every peer.
async fn deregister_self(state: web::Data<AppState>) -> impl Responder {
    let body = DeregisterRequest {
        address: state.peers.self_address().to_string(),
    };
    let targets: Vec<String> = state
        .peers
        .all()
        .into_iter()
        .filter(|a| a != state.peers.self_address())
        .collect();
    broadcast_to(&state, &targets, "/deregister-node", &body).await;
    HttpResponse::Ok().json(json!({
        "note": format!("{} deregistered from network", state.peers.self_address())
    }))
}

/// POST /start-register - bootstrap entry: hands a joining node its sync
/// starting point.
async fn start_register(
    state: web::Data<AppState>,
    body: web::Json<BootstrapRequest>,
) -> impl Responder {
    let request = body.into_inner();
    tracing::info!(replica = ?request.replica, "starting peer registration");
    let response = match request.replica {
        ReplicaMode::Full => BootstrapResponse {
            chain_url: Some(page_url(state.peers.self_address(), 0)),
            blocks: None,
        },
        ReplicaMode::Light => BootstrapResponse {
            chain_url: None,
            blocks: Some(
                state
                    .engine
                    .with_chain(|chain| chain.last_blocks(LIGHT_BOOTSTRAP_TAIL)),
            ),
        },
    };
    HttpResponse::Ok().json(response)
}

/// Sends `body` to one peer, returning its JSON response.
pub async fn send_to_peer<T: Serialize>(
    client: &reqwest::Client,
    address: &str,
    route: &str,
    body: &T,
) -> Result<serde_json::Value, reqwest::Error> {
    client
        .post(format!("http://{}{}", address, route))
        .json(body)
        .send()
        .await?
        .json::<serde_json::Value>()
        .await
}

/// Concurrent fan-out to every known peer; returns how many responded.
/// Failures are logged and skipped, never fatal - consensus settles from
/// whichever votes do arrive.
pub async fn broadcast<T: Serialize>(state: &AppState, route: &str, body: &T) -> usize {
    let targets = state.peers.all();
    broadcast_to(state, &targets, route, body).await
}

async fn broadcast_to<T: Serialize>(
    state: &AppState,
    targets: &[String],
    route: &str,
    body: &T,
) -> usize {
    let requests = targets
        .iter()
        .map(|address| send_to_peer(&state.client, address, route, body));
    let mut responded = 0;
    for (address, result) in targets.iter().zip(join_all(requests).await) {
        match result {
            Ok(_) => responded += 1,
            Err(e) => {
                tracing::warn!(peer = %address, route = route, error = %e, "peer unreachable");
            }
        }
    }
    responded
}

/// Starts the HTTP server for this node.
pub async fn start_server(state: AppState, bind: (&str, u16)) -> std::io::Result<()> {
    let data = web::Data::new(state);
    tracing::info!(host = bind.0, port = bind.1, "starting HTTP server");
    HttpServer::new(move || {
        App::new()
            .app_data(data.clone())
            .route("/", web::get().to(index))
            .route("/health", web::get().to(health))
            .route("/blockchain", web::get().to(get_chain))
            .route("/blockchain/size", web::get().to(chain_size))
            .route("/blockchain/{page}", web::get().to(chain_page))
            .route("/nodes", web::get().to(nodes))
            .route("/createBlock", web::post().to(create_block))
            .route("/validate", web::post().to(validate))
            .route("/receive-vote", web::post().to(receive_vote))
            .route("/register-node", web::post().to(register_node))
            .route(
                "/register-and-broadcast-node",
                web::post().to(register_broadcast),
            )
            .route("/deregister-node", web::post().to(deregister_node))
            .route("/deregister-self", web::post().to(deregister_self))
            .route("/start-register", web::post().to(start_register))
    })
    .bind(bind)?
    .run()
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::Blockchain;
    use serde_json::json;

    fn state() -> AppState {
        let engine = Arc::new(ConsensusEngine::new(ReplicaMode::Full));
        let peers = Arc::new(PeerDirectory::new("10.0.0.1:3002"));
        AppState::new(
            engine,
            peers,
            NodeInfo {
                id: "node-test".to_string(),
                role: NodeRole::Master,
                replica: ReplicaMode::Full,
                running_since: "2024-05-01 00:00:00".to_string(),
            },
        )
    }

    #[test]
    fn test_vote_record_wire_format() {
        let record = VoteRecord {
            block_hash: "abc".to_string(),
            block_index: 2,
            voter_id: "10.0.0.2:3002".to_string(),
            vote: Vote::Yes,
        };
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["vote"], json!("yes"));
        assert_eq!(value["block_index"], json!(2));
        let back: VoteRecord = serde_json::from_value(value).unwrap();
        assert_eq!(back.vote, Vote::Yes);
    }

    #[test]
    fn test_apply_vote_closes_round() {
        let state = state();
        let block = state.engine.with_chain(|chain: &Blockchain| {
            let tip_hash = chain.tip().unwrap().hash.clone();
            chain
                .create_block(&tip_hash, "ABC1234", json!({ "owner": "J. Doe" }), None)
                .unwrap()
        });
        *state.stats.lock() = VotingStatistics::started_now();
        state.stats.lock().creation_local_finished();
        state.engine.admit(block.clone(), 0);
        let status = apply_vote(
            &state,
            &VoteRecord {
                block_hash: block.hash.clone(),
                block_index: block.index,
                voter_id: "10.0.0.1:3002".to_string(),
                vote: Vote::Yes,
            },
        );
        assert!(matches!(
            status,
            VoteStatus::Accepted {
                decision: Decision::Accept,
                ..
            }
        ));
        assert!(state.stats.lock().consensus_total_ms().is_some());
    }

    #[test]
    fn test_bootstrap_response_shapes() {
        let full = BootstrapResponse {
            chain_url: Some("http://10.0.0.1:3002/blockchain/0".to_string()),
            blocks: None,
        };
        let value = serde_json::to_value(&full).unwrap();
        let back: BootstrapResponse = serde_json::from_value(value).unwrap();
        assert!(back.chain_url.is_some());
        assert!(back.blocks.is_none());
    }
}
