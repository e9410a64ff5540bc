use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::ads::AdsDriver;
use crate::clock::Clock;
use crate::commerce::CommerceDriver;
use crate::credentials::ResolvedCredential;
use crate::error::SyncError;
use shopsync_common::Platform;
use shopsync_config::{MetaConfig, ShopifyConfig};
use shopsync_db::cursors::models::SyncCursor;
use shopsync_db::jobs::models::SyncJob;
use shopsync_db::staging::repositories::StagingSink;

/// Inputs for one driver run. The cursor is read immediately before the run.
#[derive(Debug, Clone)]
pub struct SyncContext {
    pub job: SyncJob,
    pub credential: ResolvedCredential,
    pub cursor: Option<SyncCursor>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncResult {
    /// Primary records staged (orders for commerce, insight rows for ads).
    pub records_synced: usize,
    /// Sum of the counts reported by the warehouse transforms.
    pub records_promoted: u64,
    pub skipped: usize,
    pub errors: usize,
    /// New watermark, or `None` to leave the cursor untouched.
    pub watermark: Option<serde_json::Value>,
}

#[async_trait]
pub trait PlatformSyncDriver: Send + Sync {
    fn platform(&self) -> Platform;

    async fn sync(&self, ctx: &SyncContext) -> Result<SyncResult, SyncError>;
}

/// Drivers keyed by the platform they serve.
#[derive(Clone, Default)]
pub struct DriverRegistry {
    drivers: HashMap<Platform, Arc<dyn PlatformSyncDriver>>,
}

impl DriverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the Shopify and Meta drivers over one HTTP client.
    pub fn builtin(
        http: reqwest::Client,
        shopify: ShopifyConfig,
        meta: MetaConfig,
        max_retries: u32,
        staging: Arc<dyn StagingSink>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self::new()
            .register(Arc::new(CommerceDriver::new(
                http.clone(),
                shopify,
                max_retries,
                staging.clone(),
                clock.clone(),
            )))
            .register(Arc::new(AdsDriver::new(
                http,
                meta,
                max_retries,
                staging,
                clock,
            )))
    }

    pub fn register(mut self, driver: Arc<dyn PlatformSyncDriver>) -> Self {
        self.drivers.insert(driver.platform(), driver);
        self
    }

    pub fn get(&self, platform: Platform) -> Result<Arc<dyn PlatformSyncDriver>, SyncError> {
        self.drivers
            .get(&platform)
            .cloned()
            .ok_or(SyncError::UnsupportedPlatform(platform))
    }

    pub fn platforms(&self) -> Vec<Platform> {
        let mut platforms: Vec<_> = self.drivers.keys().copied().collect();
        platforms.sort();
        platforms
    }
}
