use async_trait::async_trait;

use crate::cursors::models::SyncCursor;
use shopsync_common::error::ShopsyncResult;
use shopsync_common::Platform;

#[async_trait]
pub trait CursorStore: Send + Sync {
    async fn get(&self, shop_id: &str, platform: Platform) -> ShopsyncResult<Option<SyncCursor>>;

    /// Record a successful run. The stored watermark only moves forward: a
    /// candidate behind the current one leaves it in place, but
    /// `last_success_at` is stamped either way.
    async fn advance(
        &self,
        shop_id: &str,
        platform: Platform,
        watermark: serde_json::Value,
    ) -> ShopsyncResult<SyncCursor>;
}
