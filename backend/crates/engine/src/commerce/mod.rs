pub mod bulk;
pub mod client;
pub mod models;
pub mod queries;
pub mod sync;

pub use sync::CommerceDriver;
