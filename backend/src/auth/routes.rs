use actix_web::{web, HttpResponse};
use actix_web_httpauth::extractors::bearer::BearerAuth;
use shared::ApiResponse;
use uuid::Uuid;

use crate::db::UserRepository;
use crate::error::ApiError;

use super::jwt::JwtService;
use super::middleware::AuthenticatedUser;
use super::models::{AuthUser, SessionStatus};

pub async fn me(
    session: AuthenticatedUser,
    users: web::Data<dyn UserRepository>,
) -> Result<HttpResponse, ApiError> {
    let user = users
        .get_user_by_id(session.0)
        .await?
        .ok_or_else(|| ApiError::NotFound("User not found".into()))?;

    Ok(HttpResponse::Ok().json(ApiResponse::success(AuthUser::from(user))))
}

/// Reports the caller's sign-in state. A bad or stale token reads as anonymous.
pub async fn session(
    bearer: Option<BearerAuth>,
    jwt_service: web::Data<JwtService>,
    users: web::Data<dyn UserRepository>,
) -> Result<HttpResponse, ApiError> {
    let user_id = bearer
        .and_then(|auth| jwt_service.verify_token(auth.token()).ok())
        .and_then(|claims| Uuid::parse_str(&claims.sub).ok());

    let status = match user_id {
        Some(id) => match users.get_user_by_id(id).await? {
            Some(user) => SessionStatus::Authenticated {
                user: AuthUser::from(user),
            },
            None => SessionStatus::Anonymous,
        },
        None => SessionStatus::Anonymous,
    };

    Ok(HttpResponse::Ok().json(ApiResponse::success(status)))
}
