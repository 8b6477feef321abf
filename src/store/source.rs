//! Collaborators that supply template manifests and poster images.
//!
//! The store only talks to these traits so tests and embedders can hand in
//! fakes; the HTTP and bundled-asset implementations live here too.

use crate::error::LoadError;
use crate::template::{parse_manifest, TemplateRecord};
use async_trait::async_trait;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;
use url::Url;

/// Remote catalogue of posters (the backend's poster list plus image hosting).
#[async_trait]
pub trait RemoteTemplateSource: Send + Sync {
    async fn fetch_manifest(&self) -> Result<Vec<TemplateRecord>, LoadError>;

    async fn fetch_image(&self, image_url: &str) -> Result<Vec<u8>, LoadError>;

    /// Short label for log lines.
    fn describe(&self) -> String;
}

/// Manifest and images packaged with the client.
pub trait AssetSource: Send + Sync {
    fn read_manifest(&self) -> Result<Vec<TemplateRecord>, LoadError>;

    fn read_image(&self, relative_path: &str) -> Result<Vec<u8>, LoadError>;

    fn describe(&self) -> String;
}

/// Poster list served over HTTP. Image URLs may be absolute or relative to the manifest.
pub struct HttpTemplateSource {
    client: reqwest::Client,
    manifest_url: Url,
}

impl HttpTemplateSource {
    pub fn new(manifest_url: &str, request_timeout: Duration) -> Result<Self, LoadError> {
        let manifest_url = Url::parse(manifest_url)
            .map_err(|e| LoadError::Network(format!("invalid manifest url {}: {}", manifest_url, e)))?;
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()?;

        Ok(Self {
            client,
            manifest_url,
        })
    }

    fn resolve(&self, image_url: &str) -> Result<Url, LoadError> {
        self.manifest_url
            .join(image_url)
            .map_err(|e| LoadError::Network(format!("invalid image url {}: {}", image_url, e)))
    }
}

#[async_trait]
impl RemoteTemplateSource for HttpTemplateSource {
    async fn fetch_manifest(&self) -> Result<Vec<TemplateRecord>, LoadError> {
        let response = self
            .client
            .get(self.manifest_url.clone())
            .send()
            .await?
            .error_for_status()?;
        let body = response.bytes().await?;
        parse_manifest(&body)
    }

    async fn fetch_image(&self, image_url: &str) -> Result<Vec<u8>, LoadError> {
        let url = self.resolve(image_url)?;
        let response = self.client.get(url).send().await?.error_for_status()?;
        Ok(response.bytes().await?.to_vec())
    }

    fn describe(&self) -> String {
        self.manifest_url.to_string()
    }
}

/// Bundled assets rooted at a directory: `<root>/<manifest_name>` plus images
/// addressed relative to `root`.
#[derive(Debug, Clone)]
pub struct LocalAssetSource {
    root: PathBuf,
    manifest_name: String,
}

impl LocalAssetSource {
    pub fn new<P: AsRef<Path>>(root: P, manifest_name: impl Into<String>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            manifest_name: manifest_name.into(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Join `relative` under the asset root, refusing anything that escapes it.
    fn contained_path(&self, relative: &str) -> Result<PathBuf, LoadError> {
        let candidate = Path::new(relative);
        let escapes = candidate.components().any(|c| {
            matches!(
                c,
                Component::ParentDir | Component::RootDir | Component::Prefix(_)
            )
        });
        if escapes {
            return Err(LoadError::Io(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                format!("asset path {} escapes {}", relative, self.root.display()),
            )));
        }
        Ok(self.root.join(candidate))
    }
}

impl AssetSource for LocalAssetSource {
    fn read_manifest(&self) -> Result<Vec<TemplateRecord>, LoadError> {
        let bytes = std::fs::read(self.contained_path(&self.manifest_name)?)?;
        parse_manifest(&bytes)
    }

    fn read_image(&self, relative_path: &str) -> Result<Vec<u8>, LoadError> {
        Ok(std::fs::read(self.contained_path(relative_path)?)?)
    }

    fn describe(&self) -> String {
        self.root.join(&self.manifest_name).display().to_string()
    }
}
