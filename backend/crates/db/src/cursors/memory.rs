use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;

use crate::cursors::models::{watermark_advances, SyncCursor};
use crate::cursors::repositories::CursorStore;
use crate::lock_poisoned;
use shopsync_common::error::ShopsyncResult;
use shopsync_common::Platform;

#[derive(Debug, Default)]
pub struct InMemoryCursorStore {
    cursors: Mutex<HashMap<(String, Platform), SyncCursor>>,
}

impl InMemoryCursorStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CursorStore for InMemoryCursorStore {
    async fn get(&self, shop_id: &str, platform: Platform) -> ShopsyncResult<Option<SyncCursor>> {
        let cursors = self.cursors.lock().map_err(lock_poisoned)?;
        Ok(cursors.get(&(shop_id.to_string(), platform)).cloned())
    }

    async fn advance(
        &self,
        shop_id: &str,
        platform: Platform,
        watermark: serde_json::Value,
    ) -> ShopsyncResult<SyncCursor> {
        let now = Utc::now();
        let mut cursors = self.cursors.lock().map_err(lock_poisoned)?;
        let cursor = cursors
            .entry((shop_id.to_string(), platform))
            .or_insert_with(|| SyncCursor {
                shop_id: shop_id.to_string(),
                platform,
                watermark: watermark.clone(),
                last_success_at: None,
                updated_at: now,
            });

        if watermark_advances(&cursor.watermark, &watermark) {
            cursor.watermark = watermark;
        }
        cursor.last_success_at = Some(now);
        cursor.updated_at = now;
        Ok(cursor.clone())
    }
}
