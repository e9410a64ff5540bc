use async_trait::async_trait;

use crate::staging::models::{RecordKind, StagedRecord};
use shopsync_common::error::ShopsyncResult;

/// Landing area for raw platform payloads, plus the hand-off to the
/// warehouse transform.
#[async_trait]
pub trait StagingSink: Send + Sync {
    /// Upsert records on (shop_id, natural_id). Every record must be of `kind`.
    /// Returns the number of records written.
    async fn stage(
        &self,
        shop_id: &str,
        kind: RecordKind,
        records: &[StagedRecord],
    ) -> ShopsyncResult<usize>;

    /// Remove every staged row of `kind` for the shop.
    async fn clear(&self, shop_id: &str, kind: RecordKind) -> ShopsyncResult<u64>;

    /// Promote staged rows of `kind` into warehouse tables; returns the count
    /// the warehouse reports.
    async fn transform(&self, shop_id: &str, kind: RecordKind) -> ShopsyncResult<u64>;
}

pub(crate) fn check_kinds(kind: RecordKind, records: &[StagedRecord]) -> ShopsyncResult<()> {
    if let Some(bad) = records.iter().find(|r| r.kind() != kind) {
        return Err(shopsync_common::error::ShopsyncError::Validation(format!(
            "record {} is a {} but was staged as {kind}",
            bad.natural_id,
            bad.kind()
        )));
    }
    Ok(())
}
