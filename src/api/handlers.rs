use actix_web::{web, HttpResponse, Responder};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::blockchain::account::Account;
use crate::blockchain::{Block, ChainSnapshot, PendingSignature, Wallet};
use crate::node::Node;

/// Shared node handle
pub type NodeData = web::Data<Node>;

fn bad_request(message: String) -> HttpResponse {
    HttpResponse::BadRequest().json(serde_json::json!({ "error": message }))
}

/// Request for the transaction endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct TransactionRequest {
    /// The sender's wallet id (base58 public key)
    pub sender: String,

    /// The recipient's wallet id
    pub recipient: String,

    /// The amount to transfer
    pub amount: u64,

    /// The sender's private key, hex encoded (for signing)
    pub private_key: String,
}

/// Response for the transaction endpoints
#[derive(Serialize, Deserialize, ToSchema)]
pub struct TransactionResponse {
    pub message: String,

    /// The block the transaction is expected in. Advisory only.
    pub block_index: u64,
}

#[derive(Serialize, Deserialize, ToSchema)]
pub struct RegisterNodesRequest {
    /// Peer addresses, e.g. `192.168.0.5:5000`
    pub nodes: Option<Vec<String>>,
}

#[derive(Serialize, Deserialize, ToSchema)]
pub struct RegisterNodesResponse {
    pub message: String,
    pub total_nodes: Vec<String>,
}

#[derive(Serialize, Deserialize, ToSchema)]
pub struct ResolveResponse {
    pub message: String,
    pub replaced: bool,

    /// Position from which stored blocks were rewritten
    pub fork_index: usize,

    pub chain: Vec<Block>,
}

#[derive(Serialize, Deserialize, ToSchema)]
pub struct MineResponse {
    pub message: String,

    /// The newly forged block, if any
    pub block: Option<Block>,
}

/// Response for the create wallet endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct WalletResponse {
    /// The wallet id
    pub address: String,

    /// The wallet's private key (hex encoded)
    pub private_key: String,
}

#[derive(Serialize, Deserialize, ToSchema)]
pub struct BalanceResponse {
    pub address: String,
    pub balance: i64,
}

/// Get the full blockchain
#[utoipa::path(
    get,
    path = "/chain",
    responses(
        (status = 200, description = "Chain with its length and the number of known peers", body = ChainSnapshot)
    )
)]
pub async fn get_chain(node: NodeData) -> impl Responder {
    HttpResponse::Ok().json(node.get_chain())
}

/// Sign and submit a new transaction
///
/// The transaction is signed with the supplied key, queued for the next
/// block and forwarded to every known peer. Validation happens at mining
/// time; a transaction that fails it is dropped without notice.
#[utoipa::path(
    post,
    path = "/transactions/new",
    request_body = TransactionRequest,
    responses(
        (status = 201, description = "Transaction queued", body = TransactionResponse),
        (status = 400, description = "Invalid transaction data")
    )
)]
pub async fn new_transaction(
    node: NodeData,
    transaction_req: web::Json<TransactionRequest>,
) -> impl Responder {
    let wallet = match Wallet::from_hex(&transaction_req.private_key) {
        Ok(wallet) => wallet,
        Err(err) => return bad_request(format!("Invalid private key: {}", err)),
    };

    if wallet.public_key().0 != transaction_req.sender {
        return bad_request("Private key does not match sender address".to_string());
    }

    let pending = match PendingSignature::sign(&wallet, &transaction_req.recipient, transaction_req.amount) {
        Ok(pending) => pending,
        Err(err) => return bad_request(format!("Failed to sign transaction: {}", err)),
    };

    let block_index = node.submit_and_broadcast(pending).await;

    HttpResponse::Created().json(TransactionResponse {
        message: format!("Transaction will be added to Block {}", block_index),
        block_index,
    })
}

/// Submit an already signed transaction
///
/// Used by peers forwarding submissions. Nothing is forwarded further.
#[utoipa::path(
    post,
    path = "/transactions/signed",
    request_body = PendingSignature,
    responses(
        (status = 201, description = "Transaction queued", body = TransactionResponse)
    )
)]
pub async fn submit_signed_transaction(
    node: NodeData,
    submission: web::Json<PendingSignature>,
) -> impl Responder {
    let block_index = node.submit_signed_transaction(submission.into_inner());

    HttpResponse::Created().json(TransactionResponse {
        message: format!("Transaction will be added to Block {}", block_index),
        block_index,
    })
}

/// Register peer nodes
///
/// Either every address is registered or, if one is invalid, none is.
#[utoipa::path(
    post,
    path = "/nodes/register",
    request_body = RegisterNodesRequest,
    responses(
        (status = 201, description = "Peers registered", body = RegisterNodesResponse),
        (status = 400, description = "Missing or invalid peer list")
    )
)]
pub async fn register_nodes(
    node: NodeData,
    register_req: web::Json<RegisterNodesRequest>,
) -> impl Responder {
    let nodes = match &register_req.nodes {
        Some(nodes) if !nodes.is_empty() => nodes,
        _ => return bad_request("Please supply a valid list of nodes".to_string()),
    };

    if let Err(err) = node.register_peers(nodes) {
        return bad_request(err.to_string());
    }

    HttpResponse::Created().json(RegisterNodesResponse {
        message: "New nodes have been added".to_string(),
        total_nodes: node.peers(),
    })
}

/// Run fork-choice against every known peer
#[utoipa::path(
    get,
    path = "/nodes/resolve",
    responses(
        (status = 200, description = "Reconciliation result", body = ResolveResponse)
    )
)]
pub async fn resolve_conflicts(node: NodeData) -> impl Responder {
    let (replaced, fork_index) = match node.trigger_reconcile(node.identity()).await {
        Ok(result) => result,
        Err(err) => {
            return HttpResponse::InternalServerError().json(serde_json::json!({
                "error": format!("Reconciliation failed: {}", err)
            }))
        }
    };

    let message = if replaced {
        "Our chain was replaced"
    } else {
        "Our chain is authoritative"
    };

    HttpResponse::Ok().json(ResolveResponse {
        message: message.to_string(),
        replaced,
        fork_index,
        chain: node.get_chain().chain,
    })
}

/// Mine a block now
///
/// Does nothing when no transaction is waiting.
#[utoipa::path(
    post,
    path = "/mine",
    responses(
        (status = 200, description = "Mining attempt finished", body = MineResponse),
        (status = 500, description = "Mining failed")
    )
)]
pub async fn mine_block(node: NodeData) -> impl Responder {
    match node.trigger_mine().await {
        Ok(Some(block)) => HttpResponse::Ok().json(MineResponse {
            message: "New Block Forged".to_string(),
            block: Some(block),
        }),
        Ok(None) => HttpResponse::Ok().json(MineResponse {
            message: "No block forged".to_string(),
            block: None,
        }),
        Err(err) => HttpResponse::InternalServerError().json(serde_json::json!({
            "error": format!("Failed to mine block: {}", err)
        })),
    }
}

/// Check if the local chain is valid
#[utoipa::path(
    get,
    path = "/validate",
    responses(
        (status = 200, description = "Chain validation status", body = bool)
    )
)]
pub async fn validate_chain(node: NodeData) -> impl Responder {
    HttpResponse::Ok().json(node.is_valid())
}

/// Create a new wallet
///
/// The private key is not kept by the node.
#[utoipa::path(
    post,
    path = "/wallet/new",
    responses(
        (status = 201, description = "Wallet created", body = WalletResponse)
    )
)]
pub async fn create_wallet() -> impl Responder {
    let wallet = Wallet::new();

    HttpResponse::Created().json(WalletResponse {
        address: wallet.public_key().0.clone(),
        private_key: wallet.export_secret_key(),
    })
}

/// Get wallet balance
#[utoipa::path(
    get,
    path = "/wallet/balance/{address}",
    params(
        ("address" = String, Path, description = "Wallet id")
    ),
    responses(
        (status = 200, description = "Balance derived from the chain", body = BalanceResponse)
    )
)]
pub async fn get_wallet_balance(node: NodeData, address: web::Path<String>) -> impl Responder {
    let address = address.into_inner();
    let balance = node.balance(&address);

    HttpResponse::Ok().json(BalanceResponse { address, balance })
}

/// Get all balances
#[utoipa::path(
    get,
    path = "/accounts",
    responses(
        (status = 200, description = "Every wallet seen on the chain", body = Vec<Account>)
    )
)]
pub async fn get_all_accounts(node: NodeData) -> impl Responder {
    HttpResponse::Ok().json(node.accounts())
}
