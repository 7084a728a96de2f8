use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use aws_config::{defaults, BehaviorVersion};
use aws_credential_types::Credentials;
use aws_sdk_s3::{
    config::{Builder as S3ConfigBuilder, Region},
    Client,
};
use aws_smithy_types::byte_stream::ByteStream;
use async_trait::async_trait;
use bytes::Bytes;

use crate::config::StorageConfig;

/// Blob store for uploaded images, keyed by the generated safe filename.
#[async_trait]
pub trait StorageClient: Send + Sync {
    async fn put_object(&self, key: &str, body: Bytes, content_type: &str) -> anyhow::Result<()>;
    /// `None` when no object exists under `key`.
    async fn get_object(&self, key: &str) -> anyhow::Result<Option<Bytes>>;
    async fn delete_object(&self, key: &str) -> anyhow::Result<()>;
}

pub async fn from_config(config: &StorageConfig) -> anyhow::Result<Arc<dyn StorageClient>> {
    let storage: Arc<dyn StorageClient> = match config {
        StorageConfig::Local { upload_dir } => {
            tracing::info!(dir = %upload_dir.display(), "using local upload storage");
            Arc::new(LocalStorage::new(upload_dir).await?)
        }
        StorageConfig::S3 {
            endpoint,
            bucket,
            access_key,
            secret_key,
        } => {
            tracing::info!(%endpoint, %bucket, "using S3 upload storage");
            Arc::new(S3Storage::new(endpoint, bucket, access_key, secret_key, "us-east-1").await?)
        }
    };
    Ok(storage)
}

/// Keys are flat filenames; anything that could escape the upload root is refused.
fn check_key(key: &str) -> anyhow::Result<()> {
    anyhow::ensure!(
        !key.is_empty() && !key.starts_with('.') && !key.contains(['/', '\\']) && !key.contains(".."),
        "invalid storage key {key:?}"
    );
    Ok(())
}

#[derive(Clone)]
pub struct LocalStorage {
    root: PathBuf,
}

impl LocalStorage {
    pub async fn new(root: &Path) -> anyhow::Result<Self> {
        tokio::fs::create_dir_all(root)
            .await
            .with_context(|| format!("create upload dir {}", root.display()))?;
        Ok(Self {
            root: root.to_path_buf(),
        })
    }
}

#[async_trait]
impl StorageClient for LocalStorage {
    async fn put_object(&self, key: &str, body: Bytes, _content_type: &str) -> anyhow::Result<()> {
        check_key(key)?;
        tokio::fs::write(self.root.join(key), &body)
            .await
            .with_context(|| format!("write upload {key}"))?;
        Ok(())
    }

    async fn get_object(&self, key: &str) -> anyhow::Result<Option<Bytes>> {
        check_key(key)?;
        match tokio::fs::read(self.root.join(key)).await {
            Ok(data) => Ok(Some(Bytes::from(data))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("read upload {key}")),
        }
    }

    async fn delete_object(&self, key: &str) -> anyhow::Result<()> {
        check_key(key)?;
        match tokio::fs::remove_file(self.root.join(key)).await {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => {
                Err(e).with_context(|| format!("delete upload {key}"))
            }
            _ => Ok(()),
        }
    }
}

#[derive(Clone)]
pub struct S3Storage {
    client: Client,
    bucket: String,
}

impl S3Storage {
    pub async fn new(
        endpoint: &str,
        bucket: &str,
        access_key: &str,
        secret_key: &str,
        region: &str,
    ) -> anyhow::Result<Self> {
        let shared = defaults(BehaviorVersion::latest())
            .region(Region::new(region.to_string()))
            .credentials_provider(Credentials::new(
                access_key, secret_key, None, None, "static",
            ))
            .endpoint_url(endpoint)
            .load()
            .await;

        let conf = S3ConfigBuilder::from(&shared)
            .endpoint_url(endpoint)
            .force_path_style(true)
            .build();

        Ok(Self {
            client: Client::from_conf(conf),
            bucket: bucket.to_string(),
        })
    }

    fn object_key(key: &str) -> String {
        format!("uploads/{key}")
    }
}

#[async_trait]
impl StorageClient for S3Storage {
    async fn put_object(&self, key: &str, body: Bytes, content_type: &str) -> anyhow::Result<()> {
        check_key(key)?;
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(Self::object_key(key))
            .body(ByteStream::from(body))
            .content_type(content_type)
            .send()
            .await
            .context("s3 put_object")?;
        Ok(())
    }

    async fn get_object(&self, key: &str) -> anyhow::Result<Option<Bytes>> {
        check_key(key)?;
        let resp = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(Self::object_key(key))
            .send()
            .await;
        let out = match resp {
            Ok(out) => out,
            Err(e) if e.as_service_error().is_some_and(|se| se.is_no_such_key()) => {
                return Ok(None)
            }
            Err(e) => return Err(e).context("s3 get_object"),
        };
        let data = out.body.collect().await.context("s3 read body")?;
        Ok(Some(data.into_bytes()))
    }

    async fn delete_object(&self, key: &str) -> anyhow::Result<()> {
        check_key(key)?;
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(Self::object_key(key))
            .send()
            .await
            .context("s3 delete_object")?;
        Ok(())
    }
}

#[cfg(test)]
mod storage_tests {
    use super::*;

    #[test]
    fn rejects_path_escaping_keys() {
        assert!(check_key("abcd_photo.png").is_ok());
        assert!(check_key("../etc/passwd").is_err());
        assert!(check_key("dir/file.png").is_err());
        assert!(check_key(".hidden").is_err());
        assert!(check_key("").is_err());
    }

    #[tokio::test]
    async fn local_storage_put_get_delete() {
        let dir = std::env::temp_dir().join(format!("unmask-storage-{}", uuid::Uuid::new_v4()));
        let store = LocalStorage::new(&dir).await.unwrap();

        store
            .put_object("a1_face.png", Bytes::from_static(b"pixels"), "image/png")
            .await
            .unwrap();
        let got = store.get_object("a1_face.png").await.unwrap();
        assert_eq!(got.as_deref(), Some(&b"pixels"[..]));

        store.delete_object("a1_face.png").await.unwrap();
        assert!(store.get_object("a1_face.png").await.unwrap().is_none());
        // deleting twice is fine
        store.delete_object("a1_face.png").await.unwrap();

        let _ = tokio::fs::remove_dir_all(&dir).await;
    }
}
