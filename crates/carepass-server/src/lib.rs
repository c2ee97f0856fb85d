pub mod config;
pub mod observability;
pub mod server;

pub use config::AppConfig;
pub use server::{CarepassServer, ServerBuilder, build_app, build_router};
