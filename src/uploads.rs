//! Direct-to-bucket uploads through presigned POST forms
//!
//! The application hands the client a form target from
//! [`PresignedUploadService::generate_upload_url`], the client uploads
//! straight to the bucket, and [`PresignedUploadService::confirm_upload`]
//! records the result as an [`UploadedFile`].

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use crate::client::UploadCondition;
use crate::error::{Result, StoreError};
use crate::model::{Model, ModelDefinition};
use crate::repository::{Entity, Repository};
use crate::store::DocumentStore;
use crate::types::{FieldDefinition, FieldType};

const FALLBACK_CONTENT_TYPE: &str = "application/octet-stream";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadConfig {
    /// Upper bound of the content-length-range condition, in bytes
    pub max_file_size: u64,
    /// `None` accepts any content type
    pub allowed_content_types: Option<Vec<String>>,
    pub upload_prefix: String,
    pub expiration: Duration,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_file_size: 10 * 1024 * 1024,
            allowed_content_types: None,
            upload_prefix: "uploads/".to_string(),
            expiration: Duration::from_secs(3600),
        }
    }
}

/// Metadata of a confirmed upload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadedFile {
    pub filename: String,
    pub content_type: String,
    pub size: u64,
    pub object_key: String,
    #[serde(default)]
    pub uploaded_by: Option<String>,
    #[serde(default)]
    pub is_public: bool,
}

impl Model for UploadedFile {
    const NAME: &'static str = "UploadedFile";

    fn definition() -> ModelDefinition {
        ModelDefinition::new(
            Self::NAME,
            vec![
                FieldDefinition::new("filename", FieldType::String).not_null(),
                FieldDefinition::new("content_type", FieldType::String).not_null(),
                FieldDefinition::new("size", FieldType::Integer).not_null(),
                FieldDefinition::new("object_key", FieldType::String)
                    .not_null()
                    .unique(),
                FieldDefinition::new("uploaded_by", FieldType::String),
                FieldDefinition::new("is_public", FieldType::Boolean).default(false),
            ],
        )
        .with_plural_name("uploaded_files")
    }
}

/// Everything a client needs to upload one file
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UploadTicket {
    pub url: String,
    pub key: String,
    pub fields: BTreeMap<String, String>,
    pub expires_in: Duration,
    pub max_size: u64,
}

pub struct PresignedUploadService {
    files: Repository<UploadedFile>,
    config: UploadConfig,
}

impl PresignedUploadService {
    /// Registers the `UploadedFile` model with the store if needed
    pub fn new(store: Arc<DocumentStore>, config: UploadConfig) -> Result<Self> {
        if !store.registry().contains(UploadedFile::NAME) {
            store.registry().register_model::<UploadedFile>()?;
        }
        Ok(Self {
            files: Repository::new(store),
            config,
        })
    }

    pub fn config(&self) -> &UploadConfig {
        &self.config
    }

    /// Presign an upload of `filename`.
    ///
    /// The content type is guessed from the extension when not given and
    /// must be on the allow-list when one is configured.
    pub async fn generate_upload_url(
        &self,
        filename: &str,
        content_type: Option<&str>,
    ) -> Result<UploadTicket> {
        let content_type = content_type
            .map(str::to_string)
            .unwrap_or_else(|| guess_content_type(filename).to_string());
        if let Some(allowed) = &self.config.allowed_content_types
            && !allowed.iter().any(|t| t == &content_type)
        {
            return Err(StoreError::field_validation(
                "content_type",
                format!(
                    "Content type '{}' is not allowed. Allowed types: {}",
                    content_type,
                    allowed.join(", ")
                ),
            ));
        }

        let key = self.generate_key(filename);
        let conditions = [
            UploadCondition::ContentType {
                value: content_type.clone(),
            },
            UploadCondition::ContentLengthRange {
                min: 1,
                max: self.config.max_file_size,
            },
        ];

        let store = self.files.store();
        let client = store.pool().acquire().await?;
        let post = client
            .presigned_upload(&store.config().bucket, &key, &conditions, self.config.expiration)
            .await?;
        debug!(key = %key, content_type = %content_type, "Presigned upload");

        Ok(UploadTicket {
            url: post.url,
            key,
            fields: post.fields,
            expires_in: self.config.expiration,
            max_size: self.config.max_file_size,
        })
    }

    /// Presigned GET for an uploaded object; `expires_in` defaults to the
    /// configured expiration
    pub async fn generate_download_url(&self, key: &str, expires_in: Option<Duration>) -> Result<String> {
        let store = self.files.store();
        let client = store.pool().acquire().await?;
        client
            .presigned_download(
                &store.config().bucket,
                key,
                expires_in.unwrap_or(self.config.expiration),
            )
            .await
    }

    /// Record an upload once its object exists. `None` when nothing was
    /// uploaded at `key`.
    pub async fn confirm_upload(
        &self,
        key: &str,
        uploaded_by: Option<&str>,
    ) -> Result<Option<Entity<UploadedFile>>> {
        let head = {
            let store = self.files.store();
            let client = store.pool().acquire().await?;
            match client.head_object(&store.config().bucket, key).await {
                Ok(head) => head,
                Err(e) if e.is_not_found() => return Ok(None),
                Err(e) => return Err(e),
            }
        };

        let filename = key.rsplit('/').next().unwrap_or(key).to_string();
        let file = self
            .files
            .create(&UploadedFile {
                filename,
                content_type: head.content_type,
                size: head.size,
                object_key: key.to_string(),
                uploaded_by: uploaded_by.map(str::to_string),
                is_public: false,
            })
            .await?;
        info!(key, id = %file.id, size = file.data.size, "Confirmed upload");
        Ok(Some(file))
    }

    /// Delete an uploaded object. Deleting a missing object succeeds.
    pub async fn delete_file(&self, key: &str) -> Result<()> {
        self.files.store().delete_key(key).await
    }

    /// `<prefix>YYYY/MM/DD/<uuid>[.<ext>]`
    fn generate_key(&self, filename: &str) -> String {
        let date = Utc::now().format("%Y/%m/%d");
        match extension(filename) {
            Some(ext) => format!("{}{}/{}.{}", self.config.upload_prefix, date, Uuid::new_v4(), ext),
            None => format!("{}{}/{}", self.config.upload_prefix, date, Uuid::new_v4()),
        }
    }
}

/// Lowercased extension, if it is plain alphanumeric
fn extension(filename: &str) -> Option<String> {
    let (_, ext) = filename.rsplit_once('.')?;
    (!ext.is_empty() && ext.chars().all(|c| c.is_ascii_alphanumeric()))
        .then(|| ext.to_ascii_lowercase())
}

pub fn guess_content_type(filename: &str) -> &'static str {
    let Some(ext) = extension(filename) else {
        return FALLBACK_CONTENT_TYPE;
    };
    match ext.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "svg" => "image/svg+xml",
        "pdf" => "application/pdf",
        "json" => "application/json",
        "txt" => "text/plain",
        "csv" => "text/csv",
        "html" | "htm" => "text/html",
        "zip" => "application/zip",
        "mp4" => "video/mp4",
        "mp3" => "audio/mpeg",
        _ => FALLBACK_CONTENT_TYPE,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{InMemoryObjectStore, ObjectStoreClient};
    use crate::config::StoreConfig;
    use crate::model::ModelRegistry;
    use bytes::Bytes;

    fn setup(config: UploadConfig) -> (InMemoryObjectStore, PresignedUploadService) {
        let backend = InMemoryObjectStore::new();
        let store = DocumentStore::from_factory(
            StoreConfig::builder("media").build(),
            Arc::new(backend.clone()),
            Arc::new(ModelRegistry::new()),
        )
        .unwrap();
        let service = PresignedUploadService::new(Arc::new(store), config).unwrap();
        (backend, service)
    }

    #[test]
    fn test_guess_content_type() {
        assert_eq!(guess_content_type("photo.JPG"), "image/jpeg");
        assert_eq!(guess_content_type("report.pdf"), "application/pdf");
        assert_eq!(guess_content_type("archive.tar.unknown"), FALLBACK_CONTENT_TYPE);
        assert_eq!(guess_content_type("README"), FALLBACK_CONTENT_TYPE);
        assert_eq!(extension("evil.p/ng"), None);
    }

    #[tokio::test]
    async fn test_upload_url_key_layout() {
        let (_backend, service) = setup(UploadConfig::default());
        let ticket = service.generate_upload_url("Cat.PNG", None).await.unwrap();

        let date = Utc::now().format("%Y/%m/%d").to_string();
        assert!(ticket.key.starts_with(&format!("uploads/{}/", date)));
        assert!(ticket.key.ends_with(".png"));
        assert_eq!(ticket.fields["Content-Type"], "image/png");
        assert_eq!(ticket.fields["key"], ticket.key);
        assert_eq!(ticket.max_size, 10 * 1024 * 1024);
        assert_eq!(ticket.expires_in, Duration::from_secs(3600));
    }

    #[tokio::test]
    async fn test_disallowed_content_type() {
        let (_backend, service) = setup(UploadConfig {
            allowed_content_types: Some(vec!["image/png".to_string()]),
            ..UploadConfig::default()
        });
        assert!(service.generate_upload_url("a.png", None).await.is_ok());

        let err = service.generate_upload_url("a.pdf", None).await.unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Validation);
        assert!(
            service
                .generate_upload_url("a.png", Some("text/html"))
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn test_confirm_and_delete() {
        let (backend, service) = setup(UploadConfig::default());
        let ticket = service.generate_upload_url("notes.txt", None).await.unwrap();

        assert!(service.confirm_upload(&ticket.key, None).await.unwrap().is_none());

        backend
            .put_object("media", &ticket.key, Bytes::from_static(b"hello"), "text/plain")
            .await
            .unwrap();
        let file = service
            .confirm_upload(&ticket.key, Some("user-1"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(file.data.size, 5);
        assert_eq!(file.data.content_type, "text/plain");
        assert_eq!(file.data.uploaded_by.as_deref(), Some("user-1"));
        assert!(ticket.key.ends_with(&file.data.filename));

        let url = service.generate_download_url(&ticket.key, None).await.unwrap();
        assert!(url.contains(&ticket.key));

        service.delete_file(&ticket.key).await.unwrap();
        assert_eq!(backend.object_count("media", &ticket.key), 0);
        assert!(service.confirm_upload(&ticket.key, None).await.unwrap().is_none());
    }
}
