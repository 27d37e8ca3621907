pub mod ai_gateway;
pub mod error_collector_layer;
pub mod transport;
