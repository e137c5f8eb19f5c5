use super::jwt::JwtService;
use actix_web::{
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    Error, HttpMessage, HttpResponse,
};
use actix_web::{FromRequest, HttpRequest};
use futures::future::{ok, ready, Ready};
use shared::{ApiErrorBody, ApiResponse};
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::ApiError;

/// Rejects requests without a valid session token and stores the user id
/// in the request extensions for [`AuthenticatedUser`].
#[derive(Clone)]
pub struct AuthMiddleware {
    jwt_service: Arc<JwtService>,
}

impl AuthMiddleware {
    pub fn new(jwt_service: JwtService) -> Self {
        Self {
            jwt_service: Arc::new(jwt_service),
        }
    }
}

impl<S, B> Transform<S, ServiceRequest> for AuthMiddleware
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<actix_web::body::EitherBody<B>>;
    type Error = Error;
    type Transform = AuthMiddlewareService<S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ok(AuthMiddlewareService {
            service: Rc::new(service),
            jwt_service: self.jwt_service.clone(),
        })
    }
}

pub struct AuthMiddlewareService<S> {
    service: Rc<S>,
    jwt_service: Arc<JwtService>,
}

#[derive(Debug)]
enum AuthError {
    NoAuthHeader,
    InvalidHeaderFormat,
    NotBearerToken,
    VerificationFailed(String),
    InvalidUuidInClaims(String),
}

impl AuthError {
    fn log_message(&self, path: &str) -> String {
        match self {
            AuthError::NoAuthHeader => format!("No Authorization header for {}", path),
            AuthError::InvalidHeaderFormat => {
                format!("Non UTF-8 Authorization header for {}", path)
            }
            AuthError::NotBearerToken => format!("Authorization header for {} is not Bearer", path),
            AuthError::VerificationFailed(e) => {
                format!("Token verification failed for {}: {}", path, e)
            }
            AuthError::InvalidUuidInClaims(sub) => {
                format!("Invalid UUID in token subject for {}: {}", path, sub)
            }
        }
    }

    fn client_message(&self) -> &'static str {
        match self {
            AuthError::InvalidUuidInClaims(_) => "Invalid token claims",
            AuthError::VerificationFailed(_) => "Token verification failed",
            _ => "Missing or invalid authorization token",
        }
    }
}

fn validate_request_token(
    req: &ServiceRequest,
    jwt_service: &JwtService,
) -> Result<Uuid, AuthError> {
    let auth_header = req
        .headers()
        .get(actix_web::http::header::AUTHORIZATION)
        .ok_or(AuthError::NoAuthHeader)?;
    let auth_str = auth_header
        .to_str()
        .map_err(|_| AuthError::InvalidHeaderFormat)?;
    let token = auth_str
        .strip_prefix("Bearer ")
        .ok_or(AuthError::NotBearerToken)?;

    let claims = jwt_service
        .verify_token(token.trim())
        .map_err(|e| AuthError::VerificationFailed(e.to_string()))?;

    Uuid::parse_str(&claims.sub).map_err(|_| AuthError::InvalidUuidInClaims(claims.sub))
}

impl<S, B> Service<ServiceRequest> for AuthMiddlewareService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<actix_web::body::EitherBody<B>>;
    type Error = Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>>>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let service = self.service.clone();
        let jwt_service = self.jwt_service.clone();

        Box::pin(async move {
            match validate_request_token(&req, &jwt_service) {
                Ok(user_id) => {
                    req.extensions_mut().insert(user_id);
                    let res = service.call(req).await?;
                    Ok(res.map_into_left_body())
                }
                Err(auth_error) => {
                    log::warn!("{}", auth_error.log_message(req.path()));

                    let body = ApiResponse::<()>::failure(ApiErrorBody {
                        message: auth_error.client_message().to_string(),
                        code: Some("UNAUTHORIZED".to_string()),
                        details: None,
                    });
                    let (http_req, _payload) = req.into_parts();
                    let response = HttpResponse::Unauthorized()
                        .json(body)
                        .map_into_right_body();
                    Ok(ServiceResponse::new(http_req, response))
                }
            }
        })
    }
}

/// Session user id placed in the request by [`AuthMiddleware`].
#[derive(Debug, Clone, Copy)]
pub struct AuthenticatedUser(pub Uuid);

impl FromRequest for AuthenticatedUser {
    type Error = actix_web::Error;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut actix_web::dev::Payload) -> Self::Future {
        match req.extensions().get::<Uuid>() {
            Some(user_id) => ok(AuthenticatedUser(*user_id)),
            None => {
                log::warn!("No authenticated user on protected route {}", req.path());
                ready(Err(
                    ApiError::Unauthorized("Authentication required".to_string()).into(),
                ))
            }
        }
    }
}
