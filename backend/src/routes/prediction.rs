use actix_web::{web, HttpResponse};
use shared::{ApiResponse, SavePredictionRequest};

use crate::auth::middleware::AuthenticatedUser;
use crate::db::models::{Prediction, User};
use crate::db::{PredictionRepository, UserRepository};
use crate::error::ApiError;
use crate::predictor::PredictionClient;

use super::{ensure_owner, load_user, parse_user_id, persistence_outcome};

/// Picks the image to classify: the requested upload if given, otherwise
/// the most recent one.
pub fn select_target_image<'a>(
    user: &'a User,
    requested: Option<&'a str>,
) -> Result<&'a str, ApiError> {
    match requested {
        Some(url) if user.has_upload(url) => Ok(url),
        Some(_) => Err(ApiError::NotFound("Image not found in user uploads".into())),
        None => user
            .latest_upload()
            .ok_or_else(|| ApiError::NotFound("No uploaded image found for user".into())),
    }
}

pub async fn save_prediction(
    session: AuthenticatedUser,
    body: web::Json<SavePredictionRequest>,
    users: web::Data<dyn UserRepository>,
    predictions: web::Data<dyn PredictionRepository>,
    predictor: web::Data<PredictionClient>,
) -> Result<HttpResponse, ApiError> {
    let request = body.into_inner();

    let raw_user_id = request
        .user_id
        .filter(|id| !id.trim().is_empty())
        .ok_or_else(|| ApiError::Validation("userId is required".into()))?;
    let user_id = parse_user_id(&raw_user_id)?;
    // Existence first: an unknown id is 404 whoever asks.
    let user = load_user(users.get_ref(), user_id).await?;
    ensure_owner(session, user.id)?;

    let requested = request
        .image_url
        .as_deref()
        .map(str::trim)
        .filter(|url| !url.is_empty());
    let image_url = select_target_image(&user, requested)?;

    let response = predictor.predict(image_url).await?;

    let prediction = Prediction::from_response(user.id, &response);
    let persistence = persistence_outcome(
        predictions
            .create_prediction(&prediction)
            .await
            .map(|_| Some(prediction.id)),
        "persist prediction",
    );

    Ok(HttpResponse::Ok().json(ApiResponse::success(response).with_persistence(persistence)))
}
