use std::io;
use std::sync::Arc;

use actix_cors::Cors;
use actix_web::{middleware, web, App, HttpServer};
use log::{error, info, warn};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

mod api;
mod blockchain;
mod config;
mod miner;
mod network;
mod node;

use blockchain::storage::{BlockchainStorage, MemoryStore, SledStore};
use config::NodeConfig;
use network::HttpTransport;
use node::{Node, NodeSettings};

// Open the on-disk store, or fall back to memory so the node still runs
fn open_storage(config: &NodeConfig) -> BlockchainStorage {
    if let Err(err) = std::fs::create_dir_all(&config.data_dir) {
        warn!("Failed to create data directory: {}", err);
    }

    match SledStore::open(&config.data_dir) {
        Ok(store) => {
            info!("Using storage at {}", config.data_dir.display());
            BlockchainStorage::new(Arc::new(store), config.storage_retries)
        }
        Err(err) => {
            warn!("Failed to open storage: {}", err);
            warn!("Keeping the chain in memory instead");
            BlockchainStorage::new(Arc::new(MemoryStore::new()), config.storage_retries)
        }
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        api::handlers::get_chain,
        api::handlers::new_transaction,
        api::handlers::submit_signed_transaction,
        api::handlers::register_nodes,
        api::handlers::resolve_conflicts,
        api::handlers::mine_block,
        api::handlers::validate_chain,
        api::handlers::create_wallet,
        api::handlers::get_wallet_balance,
        api::handlers::get_all_accounts
    ),
    components(
        schemas(
            blockchain::Block,
            blockchain::Transaction,
            blockchain::PendingSignature,
            blockchain::ChainSnapshot,
            blockchain::crypto::PublicKey,
            blockchain::crypto::DigitalSignature,
            blockchain::account::Account,
            api::handlers::TransactionRequest,
            api::handlers::TransactionResponse,
            api::handlers::RegisterNodesRequest,
            api::handlers::RegisterNodesResponse,
            api::handlers::ResolveResponse,
            api::handlers::MineResponse,
            api::handlers::WalletResponse,
            api::handlers::BalanceResponse
        )
    ),
    tags(
        (name = "ledger", description = "Ledger node endpoints")
    ),
    info(
        title = "PoW Ledger Node API",
        version = "1.0.0",
        description = "A proof-of-work ledger node",
        license(
            name = "MIT",
            url = "https://opensource.org/licenses/MIT"
        )
    )
)]
struct ApiDoc;

#[actix_web::main]
async fn main() -> io::Result<()> {
    // Initialize logger
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let config = NodeConfig::from_env().map_err(|err| {
        error!("Invalid configuration: {}", err);
        io::Error::new(io::ErrorKind::InvalidInput, err.to_string())
    })?;

    let transport = HttpTransport::new(config.peer_timeout)
        .map_err(|err| io::Error::new(io::ErrorKind::Other, err.to_string()))?;

    let node = Arc::new(Node::new(
        NodeSettings::from(&config),
        open_storage(&config),
        Arc::new(transport),
    ));
    node.load_from_store();

    for peer in &config.peers {
        if let Err(err) = node.register_peer(peer) {
            warn!("Skipping configured peer {}: {}", peer, err);
        }
    }

    info!("Node {} mining rewards to {}", node.identity(), node.node_id());

    let _miner = miner::spawn_mining_loop(Arc::clone(&node), config.mine_interval);

    let node_data = web::Data::from(node);

    info!("Starting HTTP server at http://{}", config.identity());

    HttpServer::new(move || {
        // Configure CORS
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .wrap(middleware::Logger::default())
            .wrap(cors)
            .app_data(node_data.clone())
            .configure(api::configure_routes)
            // Swagger UI
            .service(
                SwaggerUi::new("/swagger-ui/{_:.*}")
                    .url("/api-docs/openapi.json", ApiDoc::openapi())
            )
    })
    .bind((config.host.as_str(), config.port))?
    .run()
    .await
}
