pub mod dynamodb_repository;
pub mod models;

use async_trait::async_trait;
use uuid::Uuid;

use models::{Prediction, User};

#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("DynamoDB error: {0}")]
    DynamoDb(String),
    #[error("Item not found")]
    NotFound,
    #[error("Item already exists: {0}")]
    Conflict(String),
    #[error("Invalid data format: {0}")]
    InvalidData(String),
}

#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn create_user(&self, user: &User) -> Result<(), RepositoryError>;

    async fn get_user_by_id(&self, user_id: Uuid) -> Result<Option<User>, RepositoryError>;

    async fn get_user_by_provider_sub(
        &self,
        provider_sub: &str,
    ) -> Result<Option<User>, RepositoryError>;

    async fn get_user_by_email(&self, email: &str) -> Result<Option<User>, RepositoryError>;

    /// Writes profile, token and login fields. The upload list is left alone.
    async fn update_user(&self, user: &User) -> Result<(), RepositoryError>;

    /// Appends one URL to the user's upload list in a single write.
    async fn append_upload(&self, user_id: Uuid, url: &str) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait PredictionRepository: Send + Sync {
    async fn create_prediction(&self, prediction: &Prediction) -> Result<(), RepositoryError>;

    async fn get_prediction(&self, prediction_id: Uuid)
        -> Result<Option<Prediction>, RepositoryError>;

    async fn list_predictions_for_user(
        &self,
        user_id: Uuid,
    ) -> Result<Vec<Prediction>, RepositoryError>;
}
