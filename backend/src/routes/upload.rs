use actix_multipart::{Field, Multipart};
use actix_web::{web, HttpResponse};
use futures::TryStreamExt;
use shared::{UploadResponse, MAX_UPLOAD_BYTES};

use crate::auth::middleware::AuthenticatedUser;
use crate::db::UserRepository;
use crate::error::ApiError;
use crate::storage::s3_service::{ObjectStore, S3Service};

use super::{ensure_owner, load_user, parse_user_id, persistence_outcome};

const MAX_TEXT_FIELD_BYTES: usize = 1024;

#[derive(Debug, Clone)]
pub struct UploadSettings {
    pub default_folder: String,
}

struct FilePart {
    data: Vec<u8>,
    content_type: Option<String>,
}

#[derive(Default)]
struct UploadForm {
    file: Option<FilePart>,
    user_id: Option<String>,
    folder: Option<String>,
}

fn multipart_error(err: actix_multipart::MultipartError) -> ApiError {
    ApiError::Validation(format!("Invalid multipart body: {}", err))
}

/// Reads a field, stopping as soon as it grows past `limit`.
async fn read_field(field: &mut Field, limit: usize) -> Result<Vec<u8>, ApiError> {
    let mut data = Vec::new();
    while let Some(chunk) = field.try_next().await.map_err(multipart_error)? {
        if data.len() + chunk.len() > limit {
            return Err(ApiError::PayloadTooLarge(format!(
                "Field '{}' exceeds {} bytes",
                field.name().unwrap_or_default(),
                limit
            )));
        }
        data.extend_from_slice(&chunk);
    }
    Ok(data)
}

async fn read_text(field: &mut Field) -> Result<String, ApiError> {
    let data = read_field(field, MAX_TEXT_FIELD_BYTES).await?;
    String::from_utf8(data).map_err(|_| ApiError::Validation("Form fields must be UTF-8".into()))
}

async fn read_form(mut payload: Multipart) -> Result<UploadForm, ApiError> {
    let mut form = UploadForm::default();

    while let Some(mut field) = payload.try_next().await.map_err(multipart_error)? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "file" => {
                let content_type = field.content_type().map(|mime| mime.essence_str().to_string());
                let data = read_field(&mut field, MAX_UPLOAD_BYTES).await?;
                form.file = Some(FilePart { data, content_type });
            }
            "userId" => form.user_id = Some(read_text(&mut field).await?),
            "folder" => form.folder = Some(read_text(&mut field).await?),
            other => {
                log::debug!("Ignoring unexpected form field '{}'", other);
                while field.try_next().await.map_err(multipart_error)?.is_some() {}
            }
        }
    }

    Ok(form)
}

pub async fn upload_image(
    session: AuthenticatedUser,
    payload: Multipart,
    users: web::Data<dyn UserRepository>,
    store: web::Data<dyn ObjectStore>,
    settings: web::Data<UploadSettings>,
) -> Result<HttpResponse, ApiError> {
    let form = read_form(payload).await?;

    let file = form
        .file
        .ok_or_else(|| ApiError::Validation("No file uploaded".into()))?;
    let raw_user_id = form
        .user_id
        .filter(|id| !id.trim().is_empty())
        .ok_or_else(|| ApiError::Validation("User ID is missing in formData".into()))?;

    let user_id = parse_user_id(&raw_user_id)?;
    let user = load_user(users.get_ref(), user_id).await?;
    ensure_owner(session, user.id)?;

    let content_type = file
        .content_type
        .as_deref()
        .ok_or_else(|| ApiError::Validation("File content type is missing".into()))?;
    let kind = S3Service::parse_image_kind(content_type)?;
    S3Service::validate_image(&file.data, kind)?;

    let folder = form
        .folder
        .filter(|folder| !folder.trim().is_empty())
        .unwrap_or_else(|| settings.default_folder.clone());
    let folder = S3Service::normalize_folder(&folder)?;

    let image_hash = S3Service::calculate_image_hash(&file.data);
    let key = S3Service::generate_object_key(&folder, user.id, &image_hash, kind);
    let stored = store.put_image(&key, file.data, kind).await?;

    let persistence = persistence_outcome(
        users
            .append_upload(user.id, &stored.secure_url)
            .await
            .map(|_| None),
        "attach upload to user",
    );

    log::info!("User {} uploaded {}", user.id, stored.public_id);
    Ok(HttpResponse::Ok().json(UploadResponse {
        success: true,
        url: stored.secure_url,
        public_id: stored.public_id,
        user: user.id,
        persistence,
    }))
}
