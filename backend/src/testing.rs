//! In-memory fakes and request builders shared by handler tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use actix_web::body::MessageBody;
use actix_web::dev::{ServiceFactory, ServiceRequest, ServiceResponse};
use actix_web::{test, web, App};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use shared::{ClassPrediction, ImageKind};
use uuid::Uuid;

use crate::auth::cognito_routes::AuthSettings;
use crate::auth::cognito_service::CognitoService;
use crate::auth::jwt::JwtService;
use crate::auth::middleware::AuthMiddleware;
use crate::auth::models::AuthUser;
use crate::auth::state_store::OAuthStateStore;
use crate::config::IdentityConfig;
use crate::db::models::{Prediction, User};
use crate::db::{PredictionRepository, RepositoryError, UserRepository};
use crate::predictor::PredictionClient;
use crate::routes::configure_routes;
use crate::routes::upload::UploadSettings;
use crate::storage::s3_service::{ObjectStore, StorageError, StoredObject};

pub const FRONTEND_URL: &str = "http://frontend.test";
pub const PNG_BYTES: &[u8] = &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 13];
pub const JPEG_BYTES: &[u8] = &[0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10, b'J', b'F', b'I', b'F'];

// Nothing listens here; used when a test must not reach a collaborator.
const UNREACHABLE: &str = "http://127.0.0.1:1";

#[derive(Default)]
pub struct InMemoryRepository {
    users: Mutex<HashMap<Uuid, User>>,
    predictions: Mutex<Vec<Prediction>>,
    fail_appends: AtomicBool,
    fail_prediction_writes: AtomicBool,
}

impl InMemoryRepository {
    pub fn put_user(&self, user: User) {
        self.users.lock().unwrap().insert(user.id, user);
    }

    pub fn user(&self, id: Uuid) -> Option<User> {
        self.users.lock().unwrap().get(&id).cloned()
    }

    pub fn user_by_email(&self, email: &str) -> Option<User> {
        self.users
            .lock()
            .unwrap()
            .values()
            .find(|u| u.email == email)
            .cloned()
    }

    pub fn user_count(&self) -> usize {
        self.users.lock().unwrap().len()
    }

    pub fn predictions_for(&self, user_id: Uuid) -> Vec<Prediction> {
        self.predictions
            .lock()
            .unwrap()
            .iter()
            .filter(|p| p.user == user_id)
            .cloned()
            .collect()
    }

    pub fn seed_prediction(&self, user: Uuid, image_url: &str, created_at: DateTime<Utc>) -> Prediction {
        let class = |label: &str, confidence| ClassPrediction {
            class: label.to_string(),
            confidence,
        };
        let prediction = Prediction {
            id: Uuid::new_v4(),
            user,
            image_url: image_url.to_string(),
            predict_c: class("eczema", 0.7),
            predict_d: class("eczema", 0.6),
            final_prediction: class("eczema", 0.65),
            secondary_prediction: class("psoriasis", 0.2),
            created_at,
            updated_at: created_at,
        };
        self.predictions.lock().unwrap().push(prediction.clone());
        prediction
    }

    pub fn fail_appends(&self) {
        self.fail_appends.store(true, Ordering::SeqCst);
    }

    pub fn fail_prediction_writes(&self) {
        self.fail_prediction_writes.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl UserRepository for InMemoryRepository {
    async fn create_user(&self, user: &User) -> Result<(), RepositoryError> {
        let mut users = self.users.lock().unwrap();
        if users.contains_key(&user.id) {
            return Err(RepositoryError::Conflict(user.id.to_string()));
        }
        users.insert(user.id, user.clone());
        Ok(())
    }

    async fn get_user_by_id(&self, user_id: Uuid) -> Result<Option<User>, RepositoryError> {
        Ok(self.user(user_id))
    }

    async fn get_user_by_provider_sub(
        &self,
        provider_sub: &str,
    ) -> Result<Option<User>, RepositoryError> {
        Ok(self
            .users
            .lock()
            .unwrap()
            .values()
            .find(|u| u.provider_sub == provider_sub)
            .cloned())
    }

    async fn get_user_by_email(&self, email: &str) -> Result<Option<User>, RepositoryError> {
        Ok(self.user_by_email(email))
    }

    async fn update_user(&self, user: &User) -> Result<(), RepositoryError> {
        let mut users = self.users.lock().unwrap();
        let stored = users.get_mut(&user.id).ok_or(RepositoryError::NotFound)?;
        let uploads = std::mem::take(&mut stored.uploads);
        *stored = User {
            uploads,
            ..user.clone()
        };
        Ok(())
    }

    async fn append_upload(&self, user_id: Uuid, url: &str) -> Result<(), RepositoryError> {
        if self.fail_appends.load(Ordering::SeqCst) {
            return Err(RepositoryError::DynamoDb("injected append failure".into()));
        }
        let mut users = self.users.lock().unwrap();
        let user = users.get_mut(&user_id).ok_or(RepositoryError::NotFound)?;
        user.uploads.push(url.to_string());
        user.updated_at = Utc::now();
        Ok(())
    }
}

#[async_trait]
impl PredictionRepository for InMemoryRepository {
    async fn create_prediction(&self, prediction: &Prediction) -> Result<(), RepositoryError> {
        if self.fail_prediction_writes.load(Ordering::SeqCst) {
            return Err(RepositoryError::DynamoDb("injected write failure".into()));
        }
        self.predictions.lock().unwrap().push(prediction.clone());
        Ok(())
    }

    async fn get_prediction(
        &self,
        prediction_id: Uuid,
    ) -> Result<Option<Prediction>, RepositoryError> {
        Ok(self
            .predictions
            .lock()
            .unwrap()
            .iter()
            .find(|p| p.id == prediction_id)
            .cloned())
    }

    async fn list_predictions_for_user(
        &self,
        user_id: Uuid,
    ) -> Result<Vec<Prediction>, RepositoryError> {
        Ok(self.predictions_for(user_id))
    }
}

#[derive(Default)]
pub struct MemoryObjectStore {
    puts: AtomicUsize,
    fail: AtomicBool,
}

impl MemoryObjectStore {
    pub fn put_count(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }

    pub fn fail_puts(&self) {
        self.fail.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn put_image(
        &self,
        key: &str,
        _image_data: Vec<u8>,
        _kind: ImageKind,
    ) -> Result<StoredObject, StorageError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(StorageError::S3("injected put failure".into()));
        }
        self.puts.fetch_add(1, Ordering::SeqCst);
        Ok(StoredObject {
            secure_url: format!("https://cdn.test/{}", key),
            public_id: key.to_string(),
        })
    }
}

pub struct TestContext {
    pub repo: Arc<InMemoryRepository>,
    pub store: Arc<MemoryObjectStore>,
    pub jwt: JwtService,
    pub states: web::Data<OAuthStateStore>,
    predictor_url: String,
    identity_url: String,
}

impl TestContext {
    pub fn new() -> Self {
        Self {
            repo: Arc::new(InMemoryRepository::default()),
            store: Arc::new(MemoryObjectStore::default()),
            jwt: JwtService::new("test-secret", 24),
            states: web::Data::new(OAuthStateStore::default()),
            predictor_url: UNREACHABLE.to_string(),
            identity_url: UNREACHABLE.to_string(),
        }
    }

    pub fn with_predictor(mut self, url: &str) -> Self {
        self.predictor_url = url.to_string();
        self
    }

    pub fn with_identity(mut self, url: &str) -> Self {
        self.identity_url = url.to_string();
        self
    }

    /// A user that is not stored anywhere.
    pub fn sample_user(&self) -> User {
        let id = Uuid::new_v4();
        let mut user = User::new(
            format!("google_{}", id.simple()),
            "Sample User".into(),
            format!("{}@example.com", id.simple()),
            None,
        );
        user.id = id;
        user
    }

    pub fn seed_user(&self, uploads: &[&str]) -> User {
        let mut user = User::new(
            "google_seeded".into(),
            "Asha Rao".into(),
            "asha@example.com".into(),
            None,
        );
        user.uploads = uploads.iter().map(|u| u.to_string()).collect();
        self.repo.put_user(user.clone());
        user
    }

    pub fn bearer(&self, user: &User) -> (&'static str, String) {
        let token = self
            .jwt
            .generate_token(&AuthUser::from(user.clone()))
            .unwrap();
        ("Authorization", format!("Bearer {}", token))
    }

    pub fn app(
        &self,
    ) -> App<
        impl ServiceFactory<
            ServiceRequest,
            Config = (),
            Response = ServiceResponse<impl MessageBody + use<>>,
            Error = actix_web::Error,
            InitError = (),
        > + use<>,
    > {
        let users: Arc<dyn UserRepository> = self.repo.clone();
        let predictions: Arc<dyn PredictionRepository> = self.repo.clone();
        let store: Arc<dyn ObjectStore> = self.store.clone();
        let predictor = PredictionClient::new(&self.predictor_url, Duration::from_secs(5)).unwrap();
        let cognito = CognitoService::new(&IdentityConfig {
            client_id: "test-client".into(),
            client_secret: "test-secret".into(),
            redirect_uri: "http://localhost:8081/auth/callback".into(),
            auth_base_url: self.identity_url.clone(),
        });
        let auth_middleware = AuthMiddleware::new(self.jwt.clone());

        App::new()
            .app_data(web::Data::from(users))
            .app_data(web::Data::from(predictions))
            .app_data(web::Data::from(store))
            .app_data(web::Data::new(predictor))
            .app_data(web::Data::new(cognito))
            .app_data(web::Data::new(self.jwt.clone()))
            .app_data(self.states.clone())
            .app_data(web::Data::new(AuthSettings {
                frontend_url: FRONTEND_URL.to_string(),
            }))
            .app_data(web::Data::new(UploadSettings {
                default_folder: "uploads".to_string(),
            }))
            .configure(move |cfg| configure_routes(cfg, auth_middleware))
    }
}

pub struct FormPart {
    name: String,
    filename: Option<String>,
    content_type: Option<String>,
    data: Vec<u8>,
}

impl FormPart {
    pub fn file(name: &str, filename: &str, content_type: &str, data: Vec<u8>) -> Self {
        Self {
            name: name.to_string(),
            filename: Some(filename.to_string()),
            content_type: Some(content_type.to_string()),
            data,
        }
    }

    pub fn text(name: &str, value: &str) -> Self {
        Self {
            name: name.to_string(),
            filename: None,
            content_type: None,
            data: value.as_bytes().to_vec(),
        }
    }
}

const BOUNDARY: &str = "skinsafe-test-boundary";

/// `POST /api/upload` with a hand-built multipart body.
pub fn multipart_request(parts: &[FormPart], auth: Option<(&'static str, String)>) -> test::TestRequest {
    let mut body = Vec::new();
    for part in parts {
        body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
        let mut disposition = format!("Content-Disposition: form-data; name=\"{}\"", part.name);
        if let Some(filename) = &part.filename {
            disposition.push_str(&format!("; filename=\"{}\"", filename));
        }
        body.extend_from_slice(disposition.as_bytes());
        body.extend_from_slice(b"\r\n");
        if let Some(content_type) = &part.content_type {
            body.extend_from_slice(format!("Content-Type: {}\r\n", content_type).as_bytes());
        }
        body.extend_from_slice(b"\r\n");
        body.extend_from_slice(&part.data);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());

    let mut req = test::TestRequest::post()
        .uri("/api/upload")
        .insert_header((
            "Content-Type",
            format!("multipart/form-data; boundary={}", BOUNDARY),
        ))
        .set_payload(body);
    if let Some(header) = auth {
        req = req.insert_header(header);
    }
    req
}
