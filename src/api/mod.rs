// API module
//
// HTTP surface of the node, including the endpoints peers call

pub mod handlers;
pub mod routes;

// Re-export main components for easier access
pub use routes::configure_routes;
