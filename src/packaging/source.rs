//! Where staged binaries come from.
//!
//! Binaries are addressed the way the update repository lays out targets:
//! `<name>/<platform>/<channel>/<file>`. Channel names are opaque.

use crate::packaging::error::{Context, Error, ErrorExt, Result};
use crate::packaging::utils::{fs, http};
use sha2::Digest as _;
use std::future::Future;
use std::path::{Path, PathBuf};

/// One binary target in the update repository.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Target {
    /// Component name, e.g. `orbit`
    pub name: &'static str,
    /// Target platform, e.g. `linux` or `macos-app`
    pub platform: &'static str,
    /// File name inside the channel directory
    pub file: &'static str,
}

impl Target {
    /// Relative path of this target for `channel`.
    pub fn path(&self, channel: &str) -> PathBuf {
        Path::new(self.name)
            .join(self.platform)
            .join(channel)
            .join(self.file)
    }
}

/// File name of the repository's trusted root metadata.
pub const ROOT_METADATA_FILE: &str = "root.json";

/// Supplies per-channel binaries to the stager.
///
/// Implementations own any caching they do and must keep concurrent builds
/// from observing partially written files.
pub trait BinarySource {
    /// Place `target` for `channel` at `dest`.
    fn fetch(&self, target: &Target, channel: &str, dest: &Path)
    -> impl Future<Output = Result<()>>;

    /// The repository's root metadata, trusted by the installed update client
    /// when no roots were configured.
    fn root_metadata(&self) -> impl Future<Output = Result<serde_json::Value>>;
}

/// Reads targets from a local directory with the repository layout.
#[derive(Clone, Debug)]
pub struct LocalBinarySource {
    root: PathBuf,
}

impl LocalBinarySource {
    /// Serve targets from `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl BinarySource for LocalBinarySource {
    async fn fetch(&self, target: &Target, channel: &str, dest: &Path) -> Result<()> {
        let src = self.root.join(target.path(channel));
        log::debug!("Copying {} -> {}", src.display(), dest.display());
        fs::copy_file(&src, dest, fs::MODE_EXECUTABLE)
            .await
            .with_context(|| format!("{} not found in {}", target.name, self.root.display()))
    }

    async fn root_metadata(&self) -> Result<serde_json::Value> {
        let path = self.root.join(ROOT_METADATA_FILE);
        let bytes = tokio::fs::read(&path)
            .await
            .fs_context("reading root metadata", &path)?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

/// Downloads targets from the update repository, caching them locally.
#[derive(Clone, Debug)]
pub struct HttpBinarySource {
    base: url::Url,
    cache_dir: PathBuf,
    client: reqwest::Client,
}

impl HttpBinarySource {
    /// Download from `update_url`, caching under the user cache directory.
    pub fn new(update_url: &str) -> Result<Self> {
        let cache_dir = dirs::cache_dir()
            .context("no cache directory available for downloaded binaries")?
            .join("orbit-packager")
            .join("targets");
        Self::with_cache_dir(update_url, cache_dir)
    }

    /// Download from `update_url`, caching under `cache_dir`.
    pub fn with_cache_dir(update_url: &str, cache_dir: impl Into<PathBuf>) -> Result<Self> {
        let mut base = url::Url::parse(update_url)?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        Ok(Self {
            base,
            cache_dir: cache_dir.into(),
            client: reqwest::Client::new(),
        })
    }

    /// URL of `target` for `channel`.
    pub fn target_url(&self, target: &Target, channel: &str) -> Result<url::Url> {
        let relative = format!(
            "targets/{}/{}/{}/{}",
            target.name, target.platform, channel, target.file
        );
        Ok(self.base.join(&relative)?)
    }

    /// Cache location of `target` for `channel`.
    ///
    /// Caches are partitioned by repository so sources with different update
    /// URLs never serve each other's files.
    pub fn cache_path(&self, target: &Target, channel: &str) -> PathBuf {
        self.repository_cache().join(target.path(channel))
    }

    fn repository_cache(&self) -> PathBuf {
        let digest = sha2::Sha256::digest(self.base.as_str().as_bytes());
        self.cache_dir.join(hex::encode(&digest[..8]))
    }

    /// Download `url` into `cached`.
    ///
    /// Every build downloads again so channels track the repository. The
    /// cached copy is used only when the repository cannot be reached.
    async fn refresh(&self, url: url::Url, cached: PathBuf) -> Result<PathBuf> {
        let have_cached = tokio::fs::try_exists(&cached).await.unwrap_or(false);
        let bytes = match http::download(&self.client, &url).await {
            Ok(bytes) => bytes,
            Err(Error::HttpError(e)) if have_cached => {
                log::warn!(
                    "Update repository unreachable ({}), using cached {}",
                    e,
                    cached.display()
                );
                return Ok(cached);
            }
            Err(e) => return Err(e),
        };

        let parent = cached
            .parent()
            .context("cache path has no parent directory")?
            .to_path_buf();
        fs::create_dir_all(&parent).await?;

        // Write beside the final path and rename so other builds sharing the
        // cache never see a partial file.
        let dest = cached.clone();
        tokio::task::spawn_blocking(move || -> Result<()> {
            use std::io::Write;
            let mut tmp = tempfile::NamedTempFile::new_in(&parent)
                .fs_context("creating cache file", &parent)?;
            tmp.write_all(&bytes).fs_context("writing cache file", tmp.path())?;
            tmp.persist(&dest)
                .map_err(|e| Error::Fs {
                    context: "persisting cache file",
                    path: dest.clone(),
                    error: e.error,
                })?;
            Ok(())
        })
        .await
        .map_err(|e| Error::GenericError(format!("Cache write task failed: {}", e)))??;

        Ok(cached)
    }
}

impl BinarySource for HttpBinarySource {
    async fn fetch(&self, target: &Target, channel: &str, dest: &Path) -> Result<()> {
        let url = self.target_url(target, channel)?;
        let cached = self
            .refresh(url, self.cache_path(target, channel))
            .await
            .with_context(|| format!("failed to fetch {} ({})", target.name, channel))?;
        fs::copy_file(&cached, dest, fs::MODE_EXECUTABLE).await
    }

    async fn root_metadata(&self) -> Result<serde_json::Value> {
        let url = self.base.join(ROOT_METADATA_FILE)?;
        let cached = self
            .refresh(url, self.repository_cache().join(ROOT_METADATA_FILE))
            .await
            .context("failed to fetch root metadata")?;
        let bytes = tokio::fs::read(&cached)
            .await
            .fs_context("reading root metadata", &cached)?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}
