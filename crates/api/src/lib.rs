pub mod cache;
pub mod config;
pub mod error;
pub mod metrics;
pub mod pipeline;
pub mod retry;
pub mod server;
pub mod telemetry;

pub use config::AppConfig;
