use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Bytes;
use futures_util::TryStreamExt;
use object_store::local::LocalFileSystem;
use object_store::memory::InMemory;
use object_store::path::Path as ObjectPath;
use object_store::{Attribute, AttributeValue, Attributes, ObjectMeta, ObjectStore, PutOptions};
use spaceshare_core::validation::DEFAULT_MEDIA_TYPE;
use tracing::warn;
use uuid::Uuid;

const SPACES_PREFIX: &str = "spaces";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BlobStoreError {
    #[error("blob not found")]
    NotFound,
    #[error("blob store failure: {0}")]
    Backend(String),
}

impl From<object_store::Error> for BlobStoreError {
    fn from(error: object_store::Error) -> Self {
        match error {
            object_store::Error::NotFound { .. } => Self::NotFound,
            other => Self::Backend(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredBlob {
    pub bytes: Bytes,
    pub media_type: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlobDeletion {
    Deleted,
    NotFound,
}

/// Byte storage for uploaded files. Storage ids are opaque to callers.
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn store(
        &self,
        space_id: Uuid,
        media_type: &str,
        bytes: Bytes,
    ) -> Result<String, BlobStoreError>;
    async fn fetch(&self, storage_id: &str) -> Result<StoredBlob, BlobStoreError>;
    async fn delete(&self, storage_id: &str) -> Result<BlobDeletion, BlobStoreError>;
    /// Removes every blob stored for the space. Returns how many were removed.
    async fn delete_space(&self, space_id: Uuid) -> Result<usize, BlobStoreError>;
}

pub struct ObjectStoreBlobStore {
    store: Arc<dyn ObjectStore>,
    content_type_attributes: bool,
}

impl ObjectStoreBlobStore {
    #[must_use]
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self {
            store,
            content_type_attributes: true,
        }
    }

    #[must_use]
    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemory::new()))
    }

    /// The local backend cannot persist object attributes, so the media type
    /// is only kept on the file record.
    pub fn local_filesystem(path: &std::path::Path) -> Result<Self, object_store::Error> {
        let local = LocalFileSystem::new_with_prefix(path)?;
        Ok(Self {
            store: Arc::new(local),
            content_type_attributes: false,
        })
    }
}

#[async_trait]
impl BlobStore for ObjectStoreBlobStore {
    async fn store(
        &self,
        space_id: Uuid,
        media_type: &str,
        bytes: Bytes,
    ) -> Result<String, BlobStoreError> {
        let location = blob_path(space_id, Uuid::new_v4());
        let mut attributes = Attributes::new();
        if self.content_type_attributes {
            attributes.insert(
                Attribute::ContentType,
                AttributeValue::from(media_type.to_owned()),
            );
        }
        self.store
            .put_opts(
                &location,
                bytes.into(),
                PutOptions {
                    attributes,
                    ..PutOptions::default()
                },
            )
            .await?;
        Ok(location.to_string())
    }

    async fn fetch(&self, storage_id: &str) -> Result<StoredBlob, BlobStoreError> {
        let location = parse_storage_id(storage_id)?;
        let result = self.store.get(&location).await?;
        let media_type = result
            .attributes
            .get(&Attribute::ContentType)
            .map(|value| AsRef::<str>::as_ref(value).to_owned())
            .unwrap_or_else(|| DEFAULT_MEDIA_TYPE.to_owned());
        let bytes = result.bytes().await?;
        Ok(StoredBlob { bytes, media_type })
    }

    async fn delete(&self, storage_id: &str) -> Result<BlobDeletion, BlobStoreError> {
        let location = match parse_storage_id(storage_id) {
            Ok(location) => location,
            Err(BlobStoreError::NotFound) => return Ok(BlobDeletion::NotFound),
            Err(error) => return Err(error),
        };
        match self.store.head(&location).await {
            Ok(_) => {}
            Err(object_store::Error::NotFound { .. }) => return Ok(BlobDeletion::NotFound),
            Err(error) => return Err(error.into()),
        }
        match self.store.delete(&location).await {
            Ok(()) => Ok(BlobDeletion::Deleted),
            Err(object_store::Error::NotFound { .. }) => Ok(BlobDeletion::NotFound),
            Err(error) => Err(error.into()),
        }
    }

    async fn delete_space(&self, space_id: Uuid) -> Result<usize, BlobStoreError> {
        let prefix = space_prefix(space_id);
        let objects: Vec<ObjectMeta> = self.store.list(Some(&prefix)).try_collect().await?;
        let mut removed = 0;
        for object in objects {
            match self.store.delete(&object.location).await {
                Ok(()) => removed += 1,
                Err(object_store::Error::NotFound { .. }) => {}
                Err(error) => {
                    warn!(%space_id, location = %object.location, error = %error, "failed to delete blob");
                }
            }
        }
        Ok(removed)
    }
}

fn space_prefix(space_id: Uuid) -> ObjectPath {
    ObjectPath::from(format!("{SPACES_PREFIX}/{space_id}"))
}

fn blob_path(space_id: Uuid, blob_id: Uuid) -> ObjectPath {
    ObjectPath::from(format!("{SPACES_PREFIX}/{space_id}/{blob_id}"))
}

fn parse_storage_id(storage_id: &str) -> Result<ObjectPath, BlobStoreError> {
    if !storage_id.starts_with(SPACES_PREFIX) {
        return Err(BlobStoreError::NotFound);
    }
    ObjectPath::parse(storage_id).map_err(|_| BlobStoreError::NotFound)
}
