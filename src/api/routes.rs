use actix_web::web;

use super::handlers;

/// Configures the API routes.
///
/// `/chain` and `/transactions/signed` are also what peers call.
pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/chain", web::get().to(handlers::get_chain))
        .route("/transactions/new", web::post().to(handlers::new_transaction))
        .route("/transactions/signed", web::post().to(handlers::submit_signed_transaction))
        .route("/nodes/register", web::post().to(handlers::register_nodes))
        .route("/nodes/resolve", web::get().to(handlers::resolve_conflicts))
        .route("/mine", web::post().to(handlers::mine_block))
        .route("/validate", web::get().to(handlers::validate_chain))
        .route("/wallet/new", web::post().to(handlers::create_wallet))
        .route("/wallet/balance/{address}", web::get().to(handlers::get_wallet_balance))
        .route("/accounts", web::get().to(handlers::get_all_accounts));
}
