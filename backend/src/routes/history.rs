use actix_web::{web, HttpResponse};
use serde::Deserialize;
use shared::{ApiResponse, Pagination};
use uuid::Uuid;

use crate::auth::middleware::AuthenticatedUser;
use crate::db::{PredictionRepository, UserRepository};
use crate::error::ApiError;

use super::load_user;

const DEFAULT_PAGE_SIZE: u32 = 20;
const MAX_PAGE_SIZE: u32 = 100;

#[derive(Debug, Default, Deserialize)]
pub struct PageQuery {
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

impl PageQuery {
    /// Page is at least 1; limit is clamped to `1..=100`.
    pub fn resolve(&self) -> (u32, u32) {
        let page = self.page.unwrap_or(1).max(1);
        let limit = self
            .limit
            .unwrap_or(DEFAULT_PAGE_SIZE)
            .clamp(1, MAX_PAGE_SIZE);
        (page, limit)
    }
}

/// The session user's uploads, newest first.
pub async fn list_uploads(
    session: AuthenticatedUser,
    users: web::Data<dyn UserRepository>,
) -> Result<HttpResponse, ApiError> {
    let user = load_user(users.get_ref(), session.0).await?;
    let uploads: Vec<String> = user.uploads.into_iter().rev().collect();
    Ok(HttpResponse::Ok().json(ApiResponse::success(uploads)))
}

pub async fn list_predictions(
    session: AuthenticatedUser,
    query: web::Query<PageQuery>,
    predictions: web::Data<dyn PredictionRepository>,
) -> Result<HttpResponse, ApiError> {
    let (page, limit) = query.resolve();

    let mut all = predictions.list_predictions_for_user(session.0).await?;
    all.sort_by(|a, b| b.created_at.cmp(&a.created_at));

    let total = all.len() as u64;
    let offset = ((page - 1) as usize).saturating_mul(limit as usize);
    let items: Vec<_> = all.into_iter().skip(offset).take(limit as usize).collect();

    Ok(HttpResponse::Ok().json(
        ApiResponse::success(items).with_pagination(Pagination::new(page, limit, total)),
    ))
}

pub async fn get_prediction(
    session: AuthenticatedUser,
    path: web::Path<String>,
    predictions: web::Data<dyn PredictionRepository>,
) -> Result<HttpResponse, ApiError> {
    let prediction_id = Uuid::parse_str(&path.into_inner())
        .map_err(|_| ApiError::Validation("Invalid prediction id".into()))?;

    // Someone else's prediction reads as missing.
    let prediction = predictions
        .get_prediction(prediction_id)
        .await?
        .filter(|p| p.user == session.0)
        .ok_or_else(|| ApiError::NotFound("Prediction not found".into()))?;

    Ok(HttpResponse::Ok().json(ApiResponse::success(prediction)))
}
