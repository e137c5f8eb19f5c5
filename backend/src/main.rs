mod auth;
mod config;
mod db;
mod error;
mod predictor;
mod routes;
mod storage;
#[cfg(test)]
mod testing;

use std::io;
use std::sync::Arc;

use actix_cors::Cors;
use actix_web::{web, App, HttpServer};
use auth::cognito_routes::AuthSettings;
use auth::cognito_service::CognitoService;
use auth::jwt::JwtService;
use auth::middleware::AuthMiddleware;
use auth::state_store::OAuthStateStore;
use aws_config::{BehaviorVersion, Region, SdkConfig};
use aws_credential_types::Credentials;
use aws_sdk_dynamodb::Client as DynamoDbClient;
use aws_sdk_s3::Client as S3Client;
use config::{AppConfig, StorageConfig};
use db::dynamodb_repository::DynamoDbRepository;
use db::{PredictionRepository, UserRepository};
use predictor::PredictionClient;
use routes::configure_routes;
use routes::upload::UploadSettings;
use storage::s3_service::{ObjectStore, S3Service};

fn build_s3_client(aws_config: &SdkConfig, storage: &StorageConfig) -> S3Client {
    let mut builder = aws_sdk_s3::config::Builder::from(aws_config);

    if let Some(endpoint) = &storage.endpoint_url {
        log::info!("Using S3-compatible endpoint {}", endpoint);
        builder = builder.endpoint_url(endpoint).force_path_style(true);
    }
    if let (Some(key_id), Some(secret)) = (&storage.access_key_id, &storage.secret_access_key) {
        builder = builder.credentials_provider(Credentials::new(
            key_id.clone(),
            secret.clone(),
            None,
            None,
            "skinsafe-env",
        ));
    }

    S3Client::from_conf(builder.build())
}

#[actix_web::main]
async fn main() -> io::Result<()> {
    dotenv::dotenv().ok();
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let config = AppConfig::from_env().map_err(|e| {
        log::error!("Configuration error: {}", e);
        io::Error::other(e.to_string())
    })?;

    let aws_config = aws_config::defaults(BehaviorVersion::latest())
        .region(Region::new(config.storage.region.clone()))
        .load()
        .await;

    let dynamodb_client = DynamoDbClient::new(&aws_config);
    let s3_client = build_s3_client(&aws_config, &config.storage);

    let db_repo = Arc::new(DynamoDbRepository::new(
        dynamodb_client,
        config.database.users_table.clone(),
        config.database.predictions_table.clone(),
    ));
    let users: Arc<dyn UserRepository> = db_repo.clone();
    let predictions: Arc<dyn PredictionRepository> = db_repo;
    let object_store: Arc<dyn ObjectStore> = Arc::new(S3Service::new(
        s3_client,
        config.storage.bucket.clone(),
        config.storage.public_base_url.clone(),
    ));

    let predictor = PredictionClient::new(&config.predictor.base_url, config.predictor.timeout)
        .map_err(|e| io::Error::other(e.to_string()))?;

    let jwt_service = JwtService::new(&config.jwt.secret, config.jwt.expiry_hours);
    let cognito_service = CognitoService::new(&config.identity);
    let auth_middleware = AuthMiddleware::new(jwt_service.clone());

    if config.identity_configured() {
        log::info!("Login: {}/auth/login", config.base_url);
    } else {
        log::warn!(
            "Identity provider is not fully configured. Update COGNITO_* in .env before signing in."
        );
    }
    log::info!(
        "Uploads go to s3://{} ({}), predictions to {}",
        config.storage.bucket,
        config.storage.public_base_url,
        config.predictor.base_url
    );

    let users = web::Data::from(users);
    let predictions = web::Data::from(predictions);
    let object_store = web::Data::from(object_store);
    let predictor = web::Data::new(predictor);
    let jwt_service = web::Data::new(jwt_service);
    let cognito_service = web::Data::new(cognito_service);
    let states = web::Data::new(OAuthStateStore::default());
    let auth_settings = web::Data::new(AuthSettings {
        frontend_url: config.frontend_url.clone(),
    });
    let upload_settings = web::Data::new(UploadSettings {
        default_folder: config.storage.default_folder.clone(),
    });

    let bind_address = format!("0.0.0.0:{}", config.port);
    log::info!("Starting server on {}", bind_address);

    HttpServer::new(move || {
        App::new()
            .wrap(actix_web::middleware::Logger::default())
            .wrap(
                Cors::default()
                    .allow_any_origin()
                    .allowed_methods(vec!["GET", "POST", "OPTIONS"])
                    .allowed_headers(vec![
                        actix_web::http::header::AUTHORIZATION,
                        actix_web::http::header::ACCEPT,
                        actix_web::http::header::CONTENT_TYPE,
                    ])
                    .max_age(3600),
            )
            .app_data(users.clone())
            .app_data(predictions.clone())
            .app_data(object_store.clone())
            .app_data(predictor.clone())
            .app_data(jwt_service.clone())
            .app_data(cognito_service.clone())
            .app_data(states.clone())
            .app_data(auth_settings.clone())
            .app_data(upload_settings.clone())
            .configure(|cfg| configure_routes(cfg, auth_middleware.clone()))
    })
    .bind(&bind_address)?
    .run()
    .await
}
