//! # Collaborator Interfaces
//!
//! Object storage, template metadata, and asset fetching are consumed
//! through narrow traits. The in-process implementations here back tests,
//! the CLI, and single-node deployments; production swaps them for real
//! services without touching the pipeline.

use async_trait::async_trait;
use image::RgbaImage;
use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::error::TarjetaError;
use crate::job::RenderJob;
use crate::render::AssetMap;
use crate::template::Template;

// ============================================================================
// OBJECT STORE
// ============================================================================

/// Binary object storage: asset reads and output writes.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Fetch an asset by reference.
    async fn get(&self, asset_ref: &str) -> Result<Vec<u8>, TarjetaError>;

    /// Persist an output buffer, returning its location URL.
    async fn put(&self, output_ref: &str, bytes: Vec<u8>) -> Result<String, TarjetaError>;
}

/// In-memory object store for tests and previews.
#[derive(Default)]
pub struct MemoryObjectStore {
    objects: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, asset_ref: impl Into<String>, bytes: Vec<u8>) {
        self.objects.write().await.insert(asset_ref.into(), bytes);
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn get(&self, asset_ref: &str) -> Result<Vec<u8>, TarjetaError> {
        self.objects
            .read()
            .await
            .get(asset_ref)
            .cloned()
            .ok_or_else(|| TarjetaError::ResourceUnavailable(format!("no object '{asset_ref}'")))
    }

    async fn put(&self, output_ref: &str, bytes: Vec<u8>) -> Result<String, TarjetaError> {
        self.objects
            .write()
            .await
            .insert(output_ref.to_string(), bytes);
        Ok(format!("memory://{output_ref}"))
    }
}

/// Filesystem object store rooted at a directory.
pub struct FsObjectStore {
    root: PathBuf,
}

impl FsObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Resolve a reference under the root, rejecting path traversal.
    fn resolve(&self, reference: &str) -> Result<PathBuf, TarjetaError> {
        let rel = Path::new(reference);
        let escapes = rel.is_absolute()
            || rel
                .components()
                .any(|c| matches!(c, Component::ParentDir | Component::Prefix(_)));
        if escapes {
            return Err(TarjetaError::ResourceUnavailable(format!(
                "reference '{reference}' escapes the store root"
            )));
        }
        Ok(self.root.join(rel))
    }
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    async fn get(&self, asset_ref: &str) -> Result<Vec<u8>, TarjetaError> {
        let path = self.resolve(asset_ref)?;
        tokio::fs::read(&path).await.map_err(|e| {
            TarjetaError::ResourceUnavailable(format!("read {}: {e}", path.display()))
        })
    }

    async fn put(&self, output_ref: &str, bytes: Vec<u8>) -> Result<String, TarjetaError> {
        let path = self.resolve(output_ref)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                TarjetaError::ResourceUnavailable(format!("mkdir {}: {e}", parent.display()))
            })?;
        }
        tokio::fs::write(&path, bytes).await.map_err(|e| {
            TarjetaError::ResourceUnavailable(format!("write {}: {e}", path.display()))
        })?;
        Ok(format!("file://{}", path.display()))
    }
}

// ============================================================================
// ASSET FETCHER
// ============================================================================

/// Fetches and decodes image assets, with a shared decoded-image cache.
///
/// `http(s)://` references go through the HTTP client; everything else is
/// resolved by the object store. Fetch failures are transient
/// ([`TarjetaError::ResourceUnavailable`]); decode failures are terminal
/// ([`TarjetaError::Render`]); retrying a corrupt asset cannot help.
pub struct AssetFetcher {
    store: Arc<dyn ObjectStore>,
    client: reqwest::Client,
    cache: RwLock<HashMap<String, RgbaImage>>,
}

impl AssetFetcher {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self {
            store,
            client: reqwest::Client::new(),
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Fetch and decode every reference, returning the compositor's asset map.
    pub async fn fetch_all(&self, refs: &[String]) -> Result<AssetMap, TarjetaError> {
        let mut assets = AssetMap::new();
        for asset_ref in refs {
            assets.insert(asset_ref.clone(), self.fetch(asset_ref).await?);
        }
        Ok(assets)
    }

    async fn fetch(&self, asset_ref: &str) -> Result<RgbaImage, TarjetaError> {
        if let Some(cached) = self.cache.read().await.get(asset_ref) {
            return Ok(cached.clone());
        }

        let bytes = if asset_ref.starts_with("http://") || asset_ref.starts_with("https://") {
            self.fetch_http(asset_ref).await?
        } else {
            self.store.get(asset_ref).await?
        };

        let image = image::load_from_memory(&bytes)
            .map_err(|e| TarjetaError::Render(format!("decode '{asset_ref}': {e}")))?
            .to_rgba8();

        self.cache
            .write()
            .await
            .insert(asset_ref.to_string(), image.clone());
        Ok(image)
    }

    async fn fetch_http(&self, url: &str) -> Result<Vec<u8>, TarjetaError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| TarjetaError::ResourceUnavailable(format!("fetch {url}: {e}")))?;
        if !response.status().is_success() {
            return Err(TarjetaError::ResourceUnavailable(format!(
                "fetch {url}: HTTP {}",
                response.status()
            )));
        }
        response
            .bytes()
            .await
            .map(|b| b.to_vec())
            .map_err(|e| TarjetaError::ResourceUnavailable(format!("read {url}: {e}")))
    }
}

// ============================================================================
// METADATA STORE
// ============================================================================

/// Template definitions and job status transitions.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// Read a template definition by (id, version).
    async fn template(&self, id: &str, version: u32) -> Result<Option<Template>, TarjetaError>;

    /// Record a job status transition.
    async fn write_status(&self, job: &RenderJob) -> Result<(), TarjetaError>;
}

/// In-memory metadata store for tests and single-node deployments.
#[derive(Default)]
pub struct MemoryMetadataStore {
    templates: RwLock<HashMap<(String, u32), Template>>,
    statuses: RwLock<HashMap<uuid::Uuid, RenderJob>>,
}

impl MemoryMetadataStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_template(&self, template: Template) {
        self.templates
            .write()
            .await
            .insert((template.id.clone(), template.version), template);
    }

    pub async fn status(&self, job_id: uuid::Uuid) -> Option<RenderJob> {
        self.statuses.read().await.get(&job_id).cloned()
    }
}

#[async_trait]
impl MetadataStore for MemoryMetadataStore {
    async fn template(&self, id: &str, version: u32) -> Result<Option<Template>, TarjetaError> {
        Ok(self
            .templates
            .read()
            .await
            .get(&(id.to_string(), version))
            .cloned())
    }

    async fn write_status(&self, job: &RenderJob) -> Result<(), TarjetaError> {
        self.statuses.write().await.insert(job.id, job.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_store_roundtrip() {
        let store = MemoryObjectStore::new();
        store.insert("a.bin", vec![1, 2, 3]).await;
        assert_eq!(store.get("a.bin").await.unwrap(), vec![1, 2, 3]);

        let url = store.put("out/x.png", vec![9]).await.unwrap();
        assert_eq!(url, "memory://out/x.png");
        assert_eq!(store.get("out/x.png").await.unwrap(), vec![9]);
    }

    #[tokio::test]
    async fn memory_store_missing_is_transient() {
        let store = MemoryObjectStore::new();
        let err = store.get("ghost").await.unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn fs_store_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsObjectStore::new(dir.path());
        let url = store.put("nested/out.png", vec![4, 5]).await.unwrap();
        assert!(url.starts_with("file://"));
        assert_eq!(store.get("nested/out.png").await.unwrap(), vec![4, 5]);
    }

    #[tokio::test]
    async fn fs_store_rejects_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsObjectStore::new(dir.path());
        assert!(store.get("../etc/passwd").await.is_err());
        assert!(store.get("/etc/passwd").await.is_err());
    }

    #[tokio::test]
    async fn fetcher_decodes_and_caches() {
        use image::{ImageFormat, Rgba, RgbaImage};
        use std::io::Cursor;

        let mut png = Cursor::new(Vec::new());
        image::DynamicImage::ImageRgba8(RgbaImage::from_pixel(2, 2, Rgba([7, 8, 9, 255])))
            .write_to(&mut png, ImageFormat::Png)
            .unwrap();

        let store = Arc::new(MemoryObjectStore::new());
        store.insert("pixel.png", png.into_inner()).await;

        let fetcher = AssetFetcher::new(store.clone());
        let assets = fetcher.fetch_all(&["pixel.png".to_string()]).await.unwrap();
        assert_eq!(assets["pixel.png"].dimensions(), (2, 2));

        // Cached: removing the backing object does not break refetch.
        let again = fetcher.fetch_all(&["pixel.png".to_string()]).await.unwrap();
        assert_eq!(again["pixel.png"].dimensions(), (2, 2));
    }

    #[tokio::test]
    async fn fetcher_corrupt_asset_is_terminal() {
        let store = Arc::new(MemoryObjectStore::new());
        store.insert("bad.png", vec![0, 1, 2, 3]).await;

        let fetcher = AssetFetcher::new(store);
        let err = fetcher
            .fetch_all(&["bad.png".to_string()])
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "render");
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn fetcher_missing_asset_is_transient() {
        let store = Arc::new(MemoryObjectStore::new());
        let fetcher = AssetFetcher::new(store);
        let err = fetcher
            .fetch_all(&["ghost.png".to_string()])
            .await
            .unwrap_err();
        assert!(err.is_transient());
    }
}
