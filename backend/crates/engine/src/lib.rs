//! Sync job execution: credential resolution, platform drivers, the job
//! runner and the polling worker.

pub mod ads;
pub mod clock;
pub mod commerce;
pub mod credentials;
pub mod driver;
pub mod error;
pub mod http;
pub mod retry;
pub mod runner;
pub mod worker;

pub use ads::AdsDriver;
pub use clock::{Clock, SystemClock};
pub use commerce::CommerceDriver;
pub use credentials::{CredentialResolver, CredentialStore};
pub use driver::{DriverRegistry, PlatformSyncDriver, SyncContext, SyncResult};
pub use error::SyncError;
pub use runner::{JobRunner, TriggerOutcome};
pub use worker::{Tick, Worker};
