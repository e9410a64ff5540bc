pub mod env;
pub mod tracing_init;

pub use env::{AppConfig, MetaConfig, ShopifyConfig, WorkerConfig};
pub use tracing_init::init_tracing;
