use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::credentials::models::{Shop, ShopCredential};
use crate::credentials::repositories::CredentialSource;
use crate::lock_poisoned;
use shopsync_common::error::ShopsyncResult;
use shopsync_common::Platform;

/// In-memory credential rows. Counts reads so cache behaviour can be asserted.
#[derive(Debug, Default)]
pub struct InMemoryCredentialSource {
    credentials: Mutex<HashMap<(String, Platform), ShopCredential>>,
    shops: Mutex<HashMap<String, Shop>>,
    credential_reads: AtomicUsize,
    shop_reads: AtomicUsize,
    list_reads: AtomicUsize,
}

impl InMemoryCredentialSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put_credential(&self, credential: ShopCredential) -> ShopsyncResult<()> {
        let mut credentials = self.credentials.lock().map_err(lock_poisoned)?;
        credentials.insert(
            (credential.shop_id.clone(), credential.platform),
            credential,
        );
        Ok(())
    }

    pub fn remove_credential(&self, shop_id: &str, platform: Platform) -> ShopsyncResult<()> {
        let mut credentials = self.credentials.lock().map_err(lock_poisoned)?;
        credentials.remove(&(shop_id.to_string(), platform));
        Ok(())
    }

    pub fn put_shop(&self, shop: Shop) -> ShopsyncResult<()> {
        let mut shops = self.shops.lock().map_err(lock_poisoned)?;
        shops.insert(shop.id.clone(), shop);
        Ok(())
    }

    pub fn credential_reads(&self) -> usize {
        self.credential_reads.load(Ordering::SeqCst)
    }

    pub fn shop_reads(&self) -> usize {
        self.shop_reads.load(Ordering::SeqCst)
    }

    pub fn list_reads(&self) -> usize {
        self.list_reads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CredentialSource for InMemoryCredentialSource {
    async fn get_credential(
        &self,
        shop_id: &str,
        platform: Platform,
    ) -> ShopsyncResult<Option<ShopCredential>> {
        self.credential_reads.fetch_add(1, Ordering::SeqCst);
        let credentials = self.credentials.lock().map_err(lock_poisoned)?;
        Ok(credentials.get(&(shop_id.to_string(), platform)).cloned())
    }

    async fn get_shop(&self, shop_id: &str) -> ShopsyncResult<Option<Shop>> {
        self.shop_reads.fetch_add(1, Ordering::SeqCst);
        let shops = self.shops.lock().map_err(lock_poisoned)?;
        Ok(shops.get(shop_id).cloned())
    }

    async fn list_credentials(&self, shop_id: &str) -> ShopsyncResult<Vec<ShopCredential>> {
        self.list_reads.fetch_add(1, Ordering::SeqCst);
        let credentials = self.credentials.lock().map_err(lock_poisoned)?;
        let mut found: Vec<ShopCredential> = credentials
            .values()
            .filter(|c| c.shop_id == shop_id)
            .cloned()
            .collect();
        found.sort_by_key(|c| c.platform);
        Ok(found)
    }
}
