use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter};
use std::sync::Arc;
use tracing::instrument;
use uuid::Uuid;

use crate::{
    entities::product::{self, Entity as Product, Model as ProductModel},
    errors::ServiceError,
};

/// Read-only product surface for the storefront.
#[derive(Clone)]
pub struct ProductService {
    db: Arc<DatabaseConnection>,
}

impl ProductService {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    #[instrument(skip(self))]
    pub async fn list_active(&self) -> Result<Vec<ProductModel>, ServiceError> {
        Product::find()
            .filter(product::Column::IsActive.eq(true))
            .all(&*self.db)
            .await
            .map_err(ServiceError::from)
    }

    #[instrument(skip(self))]
    pub async fn get(&self, product_id: Uuid) -> Result<ProductModel, ServiceError> {
        Product::find_by_id(product_id)
            .one(&*self.db)
            .await
            .map_err(ServiceError::from)?
            .ok_or_else(|| ServiceError::NotFound(format!("Product {} not found", product_id)))
    }
}
