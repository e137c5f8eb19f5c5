use actix_web::{web, HttpResponse};
use log::{error, info, warn};
use serde_json::json;
use shared::ApiResponse;
use url::Url;

use crate::db::models::User;
use crate::db::{RepositoryError, UserRepository};
use crate::error::ApiError;

use super::cognito_service::{CognitoService, CognitoTokenResponse, CognitoUserInfo};
use super::jwt::JwtService;
use super::middleware::AuthenticatedUser;
use super::models::{AuthCallbackQuery, AuthResponse, AuthUser};
use super::state_store::OAuthStateStore;

/// Where the browser lands after the OAuth round trip.
#[derive(Debug, Clone)]
pub struct AuthSettings {
    pub frontend_url: String,
}

fn frontend_redirect(
    settings: &AuthSettings,
    params: &[(&str, &str)],
) -> Result<HttpResponse, ApiError> {
    let mut url = Url::parse(&settings.frontend_url)
        .map_err(|e| ApiError::internal(format!("Invalid frontend URL: {}", e)))?;
    url.query_pairs_mut().extend_pairs(params);

    Ok(HttpResponse::Found()
        .append_header(("Location", url.to_string()))
        .finish())
}

pub async fn cognito_login_redirect(
    cognito_service: web::Data<CognitoService>,
    states: web::Data<OAuthStateStore>,
) -> Result<HttpResponse, ApiError> {
    let state = states.issue().await;
    let auth_url = cognito_service.get_authorization_url(&state)?;

    info!("Redirecting to identity provider with a fresh OAuth state");
    Ok(HttpResponse::Found()
        .append_header(("Location", auth_url))
        .finish())
}

pub async fn cognito_auth_callback(
    query: web::Query<AuthCallbackQuery>,
    cognito_service: web::Data<CognitoService>,
    jwt_service: web::Data<JwtService>,
    states: web::Data<OAuthStateStore>,
    users: web::Data<dyn UserRepository>,
    settings: web::Data<AuthSettings>,
) -> Result<HttpResponse, ApiError> {
    if let Some(error) = &query.error {
        let error_desc = query
            .error_description
            .as_deref()
            .unwrap_or("Unknown error");
        error!("OAuth error received: {} - {}", error, error_desc);
        return frontend_redirect(
            &settings,
            &[("error", error.as_str()), ("error_description", error_desc)],
        );
    }

    let state = query
        .state
        .as_deref()
        .ok_or_else(|| ApiError::Validation("Missing authentication state parameter".into()))?;
    if !states.consume(state).await {
        warn!("Rejected unknown or expired OAuth state");
        return Err(ApiError::Validation(
            "Invalid or expired authentication state".into(),
        ));
    }

    let code = query
        .code
        .as_deref()
        .ok_or_else(|| ApiError::Validation("No authorization code received".into()))?;

    let tokens = cognito_service.exchange_code_for_tokens(code).await?;
    let user_info = cognito_service.get_user_info(&tokens.access_token).await?;
    let user = resolve_user(users.get_ref(), &user_info, tokens).await?;

    let token = jwt_service.generate_token(&AuthUser::from(user.clone()))?;
    info!("User authenticated: {}", user.email);

    frontend_redirect(&settings, &[("token", token.as_str())])
}

/// Finds the user by provider subject, then by email, else creates one.
/// Profile fields and provider tokens are refreshed on every sign-in.
async fn resolve_user(
    users: &dyn UserRepository,
    user_info: &CognitoUserInfo,
    tokens: CognitoTokenResponse,
) -> Result<User, ApiError> {
    let email = user_info.email.trim().to_lowercase();
    if email.is_empty() {
        return Err(ApiError::Validation(
            "Identity provider returned no email".into(),
        ));
    }

    let existing = match users.get_user_by_provider_sub(&user_info.sub).await? {
        Some(user) => Some(user),
        None => users.get_user_by_email(&email).await?,
    };

    match existing {
        Some(mut user) => {
            user.provider_sub = user_info.sub.clone();
            user.email = email;
            user.name = user_info.display_name();
            if user_info.picture.is_some() {
                user.image = user_info.picture.clone();
            }
            user.access_token = Some(tokens.access_token);
            if tokens.refresh_token.is_some() {
                user.refresh_token = tokens.refresh_token;
            }
            user.update_last_login();

            users.update_user(&user).await?;
            info!("Updated existing user: {}", user.email);
            Ok(user)
        }
        None => {
            let mut user = User::new(
                user_info.sub.clone(),
                user_info.display_name(),
                email,
                user_info.picture.clone(),
            );
            user.access_token = Some(tokens.access_token);
            user.refresh_token = tokens.refresh_token;

            users.create_user(&user).await?;
            info!("Created new user: {}", user.email);
            Ok(user)
        }
    }
}

async fn load_session_user(
    users: &dyn UserRepository,
    session: AuthenticatedUser,
) -> Result<User, ApiError> {
    users
        .get_user_by_id(session.0)
        .await?
        .ok_or_else(|| ApiError::NotFound("User not found".into()))
}

pub async fn cognito_refresh_token(
    cognito_service: web::Data<CognitoService>,
    jwt_service: web::Data<JwtService>,
    users: web::Data<dyn UserRepository>,
    session: AuthenticatedUser,
) -> Result<HttpResponse, ApiError> {
    let mut user = load_session_user(users.get_ref(), session).await?;

    let refresh_token = user
        .refresh_token
        .clone()
        .ok_or_else(|| ApiError::Validation("No refresh token available".into()))?;

    let tokens = cognito_service.refresh_token(&refresh_token).await?;
    user.access_token = Some(tokens.access_token);
    if let Some(new_refresh_token) = tokens.refresh_token {
        user.refresh_token = Some(new_refresh_token);
    }
    user.updated_at = chrono::Utc::now();
    users.update_user(&user).await?;

    let auth_user = AuthUser::from(user);
    let token = jwt_service.refresh_token(&auth_user)?;

    Ok(HttpResponse::Ok().json(ApiResponse::success(AuthResponse {
        token,
        user: auth_user,
    })))
}

pub async fn cognito_logout(
    cognito_service: web::Data<CognitoService>,
    users: web::Data<dyn UserRepository>,
    session: AuthenticatedUser,
) -> Result<HttpResponse, ApiError> {
    let mut user = load_session_user(users.get_ref(), session).await?;

    if let Some(refresh_token) = &user.refresh_token {
        if let Err(e) = cognito_service.revoke_token(refresh_token).await {
            warn!("Failed to revoke provider token for {}: {}", user.email, e);
        }
    }

    user.access_token = None;
    user.refresh_token = None;
    user.updated_at = chrono::Utc::now();
    users.update_user(&user).await.map_err(|e: RepositoryError| {
        error!("Failed to clear tokens for {}: {}", user.email, e);
        ApiError::from(e)
    })?;

    info!("User logged out: {}", user.email);
    Ok(HttpResponse::Ok().json(ApiResponse::success(json!({
        "message": "Logged out successfully"
    }))))
}
