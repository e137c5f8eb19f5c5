pub mod history;
pub mod prediction;
pub mod upload;

use actix_web::error::{JsonPayloadError, QueryPayloadError};
use actix_web::{web, HttpRequest, HttpResponse};
use serde_json::json;
use shared::PersistenceOutcome;
use uuid::Uuid;

use crate::auth::cognito_routes::{
    cognito_auth_callback, cognito_login_redirect, cognito_logout, cognito_refresh_token,
};
use crate::auth::middleware::{AuthMiddleware, AuthenticatedUser};
use crate::auth::routes::{me, session};
use crate::db::models::User;
use crate::db::{RepositoryError, UserRepository};
use crate::error::ApiError;

pub fn configure_routes(cfg: &mut web::ServiceConfig, auth_middleware: AuthMiddleware) {
    cfg.app_data(web::JsonConfig::default().error_handler(json_error_handler))
        .app_data(web::QueryConfig::default().error_handler(query_error_handler))
        .route("/health", web::get().to(health))
        .service(
            web::scope("/auth")
                .route("/login", web::get().to(cognito_login_redirect))
                .route("/callback", web::get().to(cognito_auth_callback))
                .route("/session", web::get().to(session))
                .service(
                    web::resource("/me")
                        .wrap(auth_middleware.clone())
                        .route(web::get().to(me)),
                )
                .service(
                    web::resource("/refresh")
                        .wrap(auth_middleware.clone())
                        .route(web::post().to(cognito_refresh_token)),
                )
                .service(
                    web::resource("/logout")
                        .wrap(auth_middleware.clone())
                        .route(web::post().to(cognito_logout)),
                ),
        )
        .service(
            web::scope("/api")
                .wrap(auth_middleware)
                .route("/upload", web::post().to(upload::upload_image))
                .route("/savePrediction", web::post().to(prediction::save_prediction))
                .route("/uploads", web::get().to(history::list_uploads))
                .route("/predictions", web::get().to(history::list_predictions))
                .route("/predictions/{id}", web::get().to(history::get_prediction)),
        );
}

async fn health() -> HttpResponse {
    HttpResponse::Ok().json(json!({ "status": "ok" }))
}

fn json_error_handler(err: JsonPayloadError, _req: &HttpRequest) -> actix_web::Error {
    ApiError::Validation(format!("Invalid JSON body: {}", err)).into()
}

fn query_error_handler(err: QueryPayloadError, _req: &HttpRequest) -> actix_web::Error {
    ApiError::Validation(format!("Invalid query string: {}", err)).into()
}

pub(crate) fn parse_user_id(raw: &str) -> Result<Uuid, ApiError> {
    Uuid::parse_str(raw.trim()).map_err(|_| ApiError::Validation(format!("Invalid userId: {}", raw)))
}

/// Acting on another user's records is forbidden.
pub(crate) fn ensure_owner(session: AuthenticatedUser, user_id: Uuid) -> Result<(), ApiError> {
    if session.0 != user_id {
        log::warn!("User {} attempted to act as {}", session.0, user_id);
        return Err(ApiError::Forbidden(
            "userId does not match the authenticated user".into(),
        ));
    }
    Ok(())
}

pub(crate) async fn load_user(users: &dyn UserRepository, user_id: Uuid) -> Result<User, ApiError> {
    users
        .get_user_by_id(user_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("User not found".into()))
}

/// Turns the result of a follow-up write into the outcome reported to the
/// client. Failures are logged under a correlation id the client also sees.
pub(crate) fn persistence_outcome(
    result: Result<Option<Uuid>, RepositoryError>,
    action: &str,
) -> PersistenceOutcome {
    match result {
        Ok(id) => PersistenceOutcome::Recorded { id },
        Err(e) => {
            let correlation_id = Uuid::new_v4();
            log::error!("[{}] Failed to {}: {}", correlation_id, action, e);
            PersistenceOutcome::Failed { correlation_id }
        }
    }
}
