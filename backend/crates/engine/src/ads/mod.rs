pub mod actions;
pub mod client;
pub mod models;
pub mod sync;

pub use sync::AdsDriver;
