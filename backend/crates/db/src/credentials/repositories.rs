use std::sync::Arc;

use async_trait::async_trait;

use crate::credentials::models::{Shop, ShopCredential};
use shopsync_common::error::ShopsyncResult;
use shopsync_common::Platform;

/// Read side of the credential and shop tables. Writes belong to the
/// settings flow outside the sync core.
#[async_trait]
pub trait CredentialSource: Send + Sync {
    async fn get_credential(
        &self,
        shop_id: &str,
        platform: Platform,
    ) -> ShopsyncResult<Option<ShopCredential>>;

    async fn get_shop(&self, shop_id: &str) -> ShopsyncResult<Option<Shop>>;

    async fn list_credentials(&self, shop_id: &str) -> ShopsyncResult<Vec<ShopCredential>>;
}

#[async_trait]
impl<T: CredentialSource + ?Sized> CredentialSource for Arc<T> {
    async fn get_credential(
        &self,
        shop_id: &str,
        platform: Platform,
    ) -> ShopsyncResult<Option<ShopCredential>> {
        (**self).get_credential(shop_id, platform).await
    }

    async fn get_shop(&self, shop_id: &str) -> ShopsyncResult<Option<Shop>> {
        (**self).get_shop(shop_id).await
    }

    async fn list_credentials(&self, shop_id: &str) -> ShopsyncResult<Vec<ShopCredential>> {
        (**self).list_credentials(shop_id).await
    }
}
