//! HTTP API handlers

pub mod batch;
pub mod health;
pub mod works;

pub use batch::batch_routes;
pub use health::health_routes;
pub use works::work_routes;
