use std::str::FromStr;

use async_trait::async_trait;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use image::ImageFormat;
use serde::Serialize;
use sha2::{Digest, Sha256};
use shared::{ImageKind, IntoEnumIterator, MAX_UPLOAD_BYTES};
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("S3 error: {0}")]
    S3(String),
    #[error("Unsupported image type '{0}', allowed: {allowed}", allowed = allowed_types())]
    InvalidFormat(String),
    #[error("File content does not match declared type {0}")]
    ContentMismatch(ImageKind),
    #[error("File too large: {size} bytes (max {max} bytes)")]
    FileTooLarge { size: usize, max: usize },
    #[error("Uploaded file is empty")]
    EmptyFile,
    #[error("Invalid upload folder: {0}")]
    InvalidFolder(String),
}

fn allowed_types() -> String {
    ImageKind::iter()
        .map(|kind| kind.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// A stored object as the client sees it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoredObject {
    pub secure_url: String,
    pub public_id: String,
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put_image(
        &self,
        key: &str,
        image_data: Vec<u8>,
        kind: ImageKind,
    ) -> Result<StoredObject, StorageError>;
}

#[derive(Clone)]
pub struct S3Service {
    client: Client,
    bucket_name: String,
    public_base_url: String,
}

impl S3Service {
    pub fn new(client: Client, bucket_name: String, public_base_url: String) -> Self {
        Self {
            client,
            bucket_name,
            public_base_url: public_base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn calculate_image_hash(image_data: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(image_data);
        hex::encode(hasher.finalize())
    }

    pub fn generate_object_key(
        folder: &str,
        user_id: Uuid,
        image_hash: &str,
        kind: ImageKind,
    ) -> String {
        format!("{}/{}/{}.{}", folder, user_id, image_hash, kind.extension())
    }

    pub fn parse_image_kind(mime_type: &str) -> Result<ImageKind, StorageError> {
        ImageKind::from_str(mime_type.trim().to_ascii_lowercase().as_str())
            .map_err(|_| StorageError::InvalidFormat(mime_type.to_string()))
    }

    /// Size limit plus a magic-byte check against the declared type.
    pub fn validate_image(image_data: &[u8], kind: ImageKind) -> Result<(), StorageError> {
        if image_data.is_empty() {
            return Err(StorageError::EmptyFile);
        }
        if image_data.len() > MAX_UPLOAD_BYTES {
            return Err(StorageError::FileTooLarge {
                size: image_data.len(),
                max: MAX_UPLOAD_BYTES,
            });
        }

        let sniffed = image::guess_format(image_data).ok();
        let matches = matches!(
            (kind, sniffed),
            (ImageKind::Jpeg, Some(ImageFormat::Jpeg))
                | (ImageKind::Png, Some(ImageFormat::Png))
                | (ImageKind::Webp, Some(ImageFormat::WebP))
        );
        if !matches {
            return Err(StorageError::ContentMismatch(kind));
        }
        Ok(())
    }

    /// Folders are relative paths of `[A-Za-z0-9_-]` segments.
    pub fn normalize_folder(folder: &str) -> Result<String, StorageError> {
        let trimmed = folder.trim().trim_matches('/');
        let valid = !trimmed.is_empty()
            && trimmed.split('/').all(|segment| {
                !segment.is_empty()
                    && segment
                        .chars()
                        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
            });
        if !valid {
            return Err(StorageError::InvalidFolder(folder.to_string()));
        }
        Ok(trimmed.to_string())
    }

    pub fn secure_url(&self, key: &str) -> String {
        format!("{}/{}", self.public_base_url, key)
    }
}

#[async_trait]
impl ObjectStore for S3Service {
    async fn put_image(
        &self,
        key: &str,
        image_data: Vec<u8>,
        kind: ImageKind,
    ) -> Result<StoredObject, StorageError> {
        S3Service::validate_image(&image_data, kind)?;

        let size = image_data.len();
        let body = ByteStream::from(image_data);

        self.client
            .put_object()
            .bucket(&self.bucket_name)
            .key(key)
            .body(body)
            .content_type(kind.to_string())
            .send()
            .await
            .map_err(|e| {
                log::error!("S3 put_object failed for {}: {:?}", key, e);
                StorageError::S3(e.to_string())
            })?;

        log::info!("Stored {} bytes at s3://{}/{}", size, self.bucket_name, key);

        Ok(StoredObject {
            secure_url: self.secure_url(key),
            public_id: key.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PNG_HEADER: [u8; 8] = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];
    const JPEG_HEADER: [u8; 4] = [0xFF, 0xD8, 0xFF, 0xE0];

    #[test]
    fn hash_is_stable_hex_sha256() {
        let hash = S3Service::calculate_image_hash(b"abc");
        assert_eq!(
            hash,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn object_key_groups_by_folder_and_user() {
        let user_id = Uuid::nil();
        let key = S3Service::generate_object_key("uploads", user_id, "abcd", ImageKind::Webp);
        assert_eq!(key, format!("uploads/{}/abcd.webp", user_id));
    }

    #[test]
    fn only_jpeg_png_and_webp_are_accepted() {
        assert_eq!(
            S3Service::parse_image_kind("IMAGE/PNG").unwrap(),
            ImageKind::Png
        );
        let err = S3Service::parse_image_kind("image/gif").unwrap_err();
        assert!(err.to_string().contains("image/jpeg, image/png, image/webp"));
    }

    #[test]
    fn declared_type_must_match_content() {
        assert!(S3Service::validate_image(&PNG_HEADER, ImageKind::Png).is_ok());
        assert!(S3Service::validate_image(&JPEG_HEADER, ImageKind::Jpeg).is_ok());
        assert!(matches!(
            S3Service::validate_image(&PNG_HEADER, ImageKind::Jpeg),
            Err(StorageError::ContentMismatch(ImageKind::Jpeg))
        ));
        assert!(matches!(
            S3Service::validate_image(b"plain text", ImageKind::Png),
            Err(StorageError::ContentMismatch(_))
        ));
        assert!(matches!(
            S3Service::validate_image(&[], ImageKind::Png),
            Err(StorageError::EmptyFile)
        ));
    }

    #[test]
    fn oversized_images_are_rejected() {
        let mut data = PNG_HEADER.to_vec();
        data.resize(MAX_UPLOAD_BYTES + 1, 0);
        assert!(matches!(
            S3Service::validate_image(&data, ImageKind::Png),
            Err(StorageError::FileTooLarge { .. })
        ));
    }

    fn offline_client() -> Client {
        Client::from_conf(
            aws_sdk_s3::Config::builder()
                .behavior_version(aws_sdk_s3::config::BehaviorVersion::latest())
                .build(),
        )
    }

    #[test]
    fn secure_url_joins_configured_base_and_key() {
        let service = S3Service::new(
            offline_client(),
            "b".into(),
            "https://cdn.example/".into(),
        );
        assert_eq!(
            service.secure_url("uploads/u/h.png"),
            "https://cdn.example/uploads/u/h.png"
        );

        let bucket_host = S3Service::new(
            offline_client(),
            "b".into(),
            "https://b.s3.eu-west-1.amazonaws.com".into(),
        );
        assert_eq!(
            bucket_host.secure_url("uploads/u/h.png"),
            "https://b.s3.eu-west-1.amazonaws.com/uploads/u/h.png"
        );
    }

    #[test]
    fn folders_are_sanitized() {
        assert_eq!(S3Service::normalize_folder("/user-uploads/").unwrap(), "user-uploads");
        assert_eq!(S3Service::normalize_folder("a/b_c").unwrap(), "a/b_c");
        assert!(S3Service::normalize_folder("../etc").is_err());
        assert!(S3Service::normalize_folder("a//b").is_err());
        assert!(S3Service::normalize_folder("   ").is_err());
    }
}
