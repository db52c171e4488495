//! Local cache of downloaded repository archives.

use std::path::{Path, PathBuf};
use std::time::Duration;

use bytes::Bytes;

use crate::identity::Identity;
use crate::{PluginError, Result};

/// Archive cache keyed by (owner, repo, branch).
///
/// Every plugin of one repository branch shares a single artifact. Artifacts
/// are never evicted; a forced fetch overwrites them.
pub struct ArtifactCache {
    client: reqwest::Client,
    cache_dir: PathBuf,
    url_template: String,
}

impl ArtifactCache {
    pub fn new(cache_dir: impl Into<PathBuf>, url_template: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            client,
            cache_dir: cache_dir.into(),
            url_template: url_template.into(),
        }
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Download URL of the identity's repository archive.
    pub fn archive_url(&self, identity: &Identity) -> String {
        self.url_template
            .replace("{owner}", &identity.owner)
            .replace("{repo}", &identity.repo)
            .replace("{branch}", &identity.branch)
    }

    /// Location of the cached artifact.
    pub fn artifact_path(&self, identity: &Identity) -> PathBuf {
        self.cache_dir.join(identity.cache_key())
    }

    pub fn is_cached(&self, identity: &Identity) -> bool {
        self.artifact_path(identity).is_file()
    }

    /// Return the archive for the identity's repository branch.
    ///
    /// Without `force` a cached artifact is returned without touching the
    /// network. Otherwise the archive is downloaded and written to the cache.
    pub async fn fetch(&self, identity: &Identity, force: bool) -> Result<Bytes> {
        let artifact = self.artifact_path(identity);

        if !force && artifact.is_file() {
            tracing::debug!(plugin = %identity, "Using cached archive {:?}", artifact);
            let data = tokio::fs::read(&artifact).await?;
            return Ok(Bytes::from(data));
        }

        let data = self.download(identity).await?;

        tokio::fs::create_dir_all(&self.cache_dir).await?;
        tokio::fs::write(&artifact, &data).await?;
        tracing::debug!(
            plugin = %identity,
            "Cached {} byte archive at {:?}",
            data.len(),
            artifact
        );

        Ok(data)
    }

    async fn download(&self, identity: &Identity) -> Result<Bytes> {
        let url = self.archive_url(identity);
        tracing::info!(plugin = %identity, "Downloading {}", url);

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| PluginError::fetch_error(&url, e.to_string()))?;

        if !response.status().is_success() {
            return Err(PluginError::fetch_error(
                &url,
                format!("HTTP {}", response.status()),
            ));
        }

        response
            .bytes()
            .await
            .map_err(|e| PluginError::fetch_error(&url, e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn template(server: &MockServer) -> String {
        format!("{}/{{owner}}/{{repo}}/archive/{{branch}}.zip", server.uri())
    }

    #[test]
    fn test_archive_url() {
        let cache = ArtifactCache::new("/tmp/cache", crate::DEFAULT_ARCHIVE_URL_TEMPLATE);
        let id = Identity::parse("kyb3r/modmail-plugins/dragory@dev", true).unwrap();
        assert_eq!(
            cache.archive_url(&id),
            "https://github.com/kyb3r/modmail-plugins/archive/dev.zip"
        );
        assert_eq!(
            cache.artifact_path(&id),
            PathBuf::from("/tmp/cache/kyb3r-modmail%2Dplugins-dev.zip")
        );
    }

    #[tokio::test]
    async fn test_shared_artifact_downloads_once() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/a/b/archive/master.zip"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"archive".to_vec()))
            .expect(1)
            .mount(&server)
            .await;

        let temp = TempDir::new().unwrap();
        let cache = ArtifactCache::new(temp.path(), template(&server));

        let first = Identity::parse("a/b/one", false).unwrap();
        let second = Identity::parse("a/b/two", false).unwrap();

        assert!(!cache.is_cached(&first));
        assert_eq!(cache.fetch(&first, false).await.unwrap(), Bytes::from_static(b"archive"));
        assert!(cache.is_cached(&second));
        assert_eq!(cache.fetch(&second, false).await.unwrap(), Bytes::from_static(b"archive"));

        server.verify().await;
    }

    #[tokio::test]
    async fn test_force_overwrites_artifact() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/a/b/archive/master.zip"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"fresh".to_vec()))
            .expect(1)
            .mount(&server)
            .await;

        let temp = TempDir::new().unwrap();
        let cache = ArtifactCache::new(temp.path(), template(&server));
        let id = Identity::parse("a/b/c", false).unwrap();
        std::fs::write(cache.artifact_path(&id), b"stale").unwrap();

        assert_eq!(cache.fetch(&id, false).await.unwrap(), Bytes::from_static(b"stale"));
        assert_eq!(cache.fetch(&id, true).await.unwrap(), Bytes::from_static(b"fresh"));
        assert_eq!(std::fs::read(cache.artifact_path(&id)).unwrap(), b"fresh");
    }

    #[tokio::test]
    async fn test_http_error_is_fetch_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let temp = TempDir::new().unwrap();
        let cache = ArtifactCache::new(temp.path(), template(&server));
        let id = Identity::parse("a/b/c@missing", false).unwrap();

        let err = cache.fetch(&id, false).await.unwrap_err();
        assert!(matches!(err, PluginError::Fetch { .. }));
        assert!(!cache.is_cached(&id));
    }
}
