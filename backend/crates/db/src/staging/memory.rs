use std::collections::{BTreeMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::lock_poisoned;
use crate::staging::models::{RecordKind, StagedPayload, StagedRecord};
use crate::staging::repositories::{check_kinds, StagingSink};
use shopsync_common::error::{ShopsyncError, ShopsyncResult};

type RowKey = (RecordKind, String, String);

/// Staging and warehouse tables held in maps. `transform` upserts staged rows
/// into the warehouse map and reports how many rows it inserted or changed,
/// so repeating it over unchanged staging reports zero.
#[derive(Debug, Default)]
pub struct InMemoryStagingSink {
    staged: Mutex<BTreeMap<RowKey, StagedRecord>>,
    warehouse: Mutex<BTreeMap<RowKey, StagedPayload>>,
    failing_transforms: Mutex<HashSet<RecordKind>>,
}

impl InMemoryStagingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `transform` fail for `kind` until cleared.
    pub fn fail_transform(&self, kind: RecordKind) -> ShopsyncResult<()> {
        self.failing_transforms
            .lock()
            .map_err(lock_poisoned)?
            .insert(kind);
        Ok(())
    }

    pub fn staged_len(&self, shop_id: &str, kind: RecordKind) -> usize {
        self.staged
            .lock()
            .map(|rows| {
                rows.keys()
                    .filter(|(k, s, _)| *k == kind && s == shop_id)
                    .count()
            })
            .unwrap_or(0)
    }

    pub fn warehouse_len(&self, shop_id: &str, kind: RecordKind) -> usize {
        self.warehouse
            .lock()
            .map(|rows| {
                rows.keys()
                    .filter(|(k, s, _)| *k == kind && s == shop_id)
                    .count()
            })
            .unwrap_or(0)
    }

    pub fn staged_records(&self, shop_id: &str, kind: RecordKind) -> Vec<StagedRecord> {
        self.staged
            .lock()
            .map(|rows| {
                rows.iter()
                    .filter(|((k, s, _), _)| *k == kind && s == shop_id)
                    .map(|(_, r)| r.clone())
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[async_trait]
impl StagingSink for InMemoryStagingSink {
    async fn stage(
        &self,
        shop_id: &str,
        kind: RecordKind,
        records: &[StagedRecord],
    ) -> ShopsyncResult<usize> {
        check_kinds(kind, records)?;
        let mut staged = self.staged.lock().map_err(lock_poisoned)?;
        for record in records {
            staged.insert(
                (kind, shop_id.to_string(), record.natural_id.clone()),
                record.clone(),
            );
        }
        Ok(records.len())
    }

    async fn clear(&self, shop_id: &str, kind: RecordKind) -> ShopsyncResult<u64> {
        let mut staged = self.staged.lock().map_err(lock_poisoned)?;
        let before = staged.len();
        staged.retain(|(k, s, _), _| !(*k == kind && s == shop_id));
        Ok((before - staged.len()) as u64)
    }

    async fn transform(&self, shop_id: &str, kind: RecordKind) -> ShopsyncResult<u64> {
        if self
            .failing_transforms
            .lock()
            .map_err(lock_poisoned)?
            .contains(&kind)
        {
            return Err(ShopsyncError::Database(format!(
                "{}() raised an exception",
                kind.transform_function()
            )));
        }

        let staged = self.staged.lock().map_err(lock_poisoned)?;
        let mut warehouse = self.warehouse.lock().map_err(lock_poisoned)?;
        let mut changed = 0;
        for ((k, s, id), record) in staged.iter() {
            if *k != kind || s != shop_id {
                continue;
            }
            let key = (*k, s.clone(), id.clone());
            if warehouse.get(&key) != Some(&record.payload) {
                warehouse.insert(key, record.payload.clone());
                changed += 1;
            }
        }
        Ok(changed)
    }
}
