//! Installer assembly.
//!
//! One [`Configuration`] goes in, one installer file comes out. Each package
//! type is a [`PlatformBuilder`]; [`build_with`] drives any builder through the
//! same sequence:
//!
//! 1. acquire a fresh [`StagedTree`]
//! 2. stage binaries and enrollment files ([`PlatformBuilder::stage`])
//! 3. render descriptors ([`PlatformBuilder::render`])
//! 4. run the native toolchain ([`PlatformBuilder::invoke`])
//! 5. copy the artifact to the output directory and check it
//!
//! [`build`] wraps this in the [`RetryController`].
//!
//! | Type | Builder | Toolchain |
//! |------|---------|-----------|
//! | pkg  | [`platform::macos::PkgBuilder`] | pkgbuild/productbuild, or bomutils + xar |
//! | deb  | [`platform::linux::DebBuilder`] | in-process ar/tar/gzip |
//! | rpm  | [`platform::linux::RpmBuilder`] | in-process `rpm` crate |
//! | msi  | [`platform::windows::MsiBuilder`] | WiX heat/candle/light |

pub mod error;
pub mod host;
pub mod platform;
pub mod retry;
pub mod source;
pub mod stage;
pub mod templates;
pub mod toolchain;
pub mod utils;

pub use error::{Error, Result};
pub use host::{Host, HostArch, HostOs};
pub use retry::{Attempt, MAX_ATTEMPTS, RetryController};
pub use source::{BinarySource, HttpBinarySource, LocalBinarySource, Target};
pub use stage::{Layout, StagedFiles, StagedTree};
pub use templates::{DescriptorContext, Renderer, Template};

use crate::config::{Configuration, DEFAULT_UPDATE_URL};
use error::{Context, ErrorExt};
use path_absolutize::Absolutize;
use platform::{linux::DebBuilder, linux::RpmBuilder, macos::PkgBuilder, windows::MsiBuilder};
use std::fmt;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Installer formats.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum PackageType {
    /// macOS installer package (.pkg)
    Pkg,
    /// Debian package (.deb)
    Deb,
    /// RPM package (.rpm)
    Rpm,
    /// Windows Installer package (.msi)
    Msi,
}

impl PackageType {
    /// Every package type.
    pub const ALL: [PackageType; 4] = [
        PackageType::Pkg,
        PackageType::Deb,
        PackageType::Rpm,
        PackageType::Msi,
    ];

    /// Lowercase identifier used on the command line and as file extension.
    pub fn short_name(&self) -> &'static str {
        match self {
            PackageType::Pkg => "pkg",
            PackageType::Deb => "deb",
            PackageType::Rpm => "rpm",
            PackageType::Msi => "msi",
        }
    }

    /// Build this package type with the matching builder.
    pub async fn build_once<S: BinarySource>(
        self,
        config: &Configuration,
        host: &Host,
        source: &S,
    ) -> Result<PathBuf> {
        match self {
            PackageType::Pkg => build_with(&PkgBuilder, config, host, source).await,
            PackageType::Deb => build_with(&DebBuilder, config, host, source).await,
            PackageType::Rpm => build_with(&RpmBuilder, config, host, source).await,
            PackageType::Msi => build_with(&MsiBuilder, config, host, source).await,
        }
    }
}

impl fmt::Display for PackageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.short_name())
    }
}

/// Error for unrecognized package type names.
#[derive(Debug, Clone, thiserror::Error)]
#[error("type must be one of ('pkg', 'deb', 'rpm', 'msi')")]
pub struct UnknownPackageType(pub String);

impl FromStr for PackageType {
    type Err = UnknownPackageType;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        PackageType::ALL
            .into_iter()
            .find(|t| t.short_name() == s)
            .ok_or_else(|| UnknownPackageType(s.to_string()))
    }
}

/// One installer format's staging, rendering and toolchain steps.
pub trait PlatformBuilder {
    /// Format produced.
    fn package_type(&self) -> PackageType;

    /// Human readable name for progress output.
    fn describe(&self) -> &'static str;

    /// Install layout of the target platform.
    fn layout(&self) -> Layout;

    /// Populate the staged tree with binaries and enrollment files.
    fn stage<S: BinarySource>(
        &self,
        config: &Configuration,
        source: &S,
        tree: &StagedTree,
    ) -> impl Future<Output = Result<StagedFiles>> {
        let layout = self.layout();
        async move { stage::stage(config, &layout, source, tree).await }
    }

    /// Render this format's descriptors into the staged tree.
    fn render(
        &self,
        config: &Configuration,
        renderer: &Renderer,
        tree: &StagedTree,
    ) -> impl Future<Output = Result<()>>;

    /// Run the toolchain and return the artifact path inside the staged tree.
    fn invoke(
        &self,
        config: &Configuration,
        host: &Host,
        tree: &StagedTree,
    ) -> impl Future<Output = Result<PathBuf>>;
}

/// Build one artifact with `builder` from a fresh staged tree.
///
/// The staged tree is released when this returns, whatever the outcome,
/// unless the configuration retains it.
pub async fn build_with<B, S>(
    builder: &B,
    config: &Configuration,
    host: &Host,
    source: &S,
) -> Result<PathBuf>
where
    B: PlatformBuilder,
    S: BinarySource,
{
    log::info!("Building {} on {}", builder.describe(), host);

    let tree = StagedTree::create(config.keep_staging())?;
    builder
        .stage(config, source, &tree)
        .await
        .context("failed to stage package root")?;

    let renderer = Renderer::new()?;
    builder.render(config, &renderer, &tree).await?;

    let built = builder.invoke(config, host, &tree).await?;
    let artifact = place_artifact(&built, config.output_dir()).await?;
    verify_artifact(&artifact).await?;

    log::info!("Built {}", artifact.display());
    Ok(artifact)
}

/// Build the configured package type, retrying known transient failures.
///
/// `on_attempt` is called before every attempt.
pub async fn build<S: BinarySource>(
    config: &Configuration,
    host: &Host,
    source: &S,
    mut on_attempt: impl FnMut(Attempt),
) -> Result<PathBuf> {
    let package_type = config.package_type();
    RetryController::new(package_type, *host)
        .run(|attempt| {
            on_attempt(attempt);
            package_type.build_once(config, host, source)
        })
        .await
}

/// Binary source for `config`: its update repository, or the default one.
pub fn default_source(config: &Configuration) -> Result<HttpBinarySource> {
    HttpBinarySource::new(config.update_url().unwrap_or(DEFAULT_UPDATE_URL))
}

async fn build_as(package_type: PackageType, config: &Configuration) -> Result<PathBuf> {
    let host = Host::current();
    let source = default_source(config)?;
    RetryController::new(package_type, host)
        .run(|_| package_type.build_once(config, &host, &source))
        .await
}

/// Build a macOS installer package.
pub async fn build_pkg(config: &Configuration) -> Result<PathBuf> {
    build_as(PackageType::Pkg, config).await
}

/// Build a Debian package.
pub async fn build_deb(config: &Configuration) -> Result<PathBuf> {
    build_as(PackageType::Deb, config).await
}

/// Build an RPM package.
pub async fn build_rpm(config: &Configuration) -> Result<PathBuf> {
    build_as(PackageType::Rpm, config).await
}

/// Build a Windows Installer package.
pub async fn build_msi(config: &Configuration) -> Result<PathBuf> {
    build_as(PackageType::Msi, config).await
}

/// Copy the built artifact out of the staged tree.
async fn place_artifact(built: &Path, output_dir: &Path) -> Result<PathBuf> {
    let file_name = built
        .file_name()
        .with_context(|| format!("artifact path {} has no file name", built.display()))?;

    tokio::fs::create_dir_all(output_dir)
        .await
        .fs_context("creating output directory", output_dir)?;

    let dest = output_dir
        .absolutize()
        .fs_context("resolving output directory", output_dir)?
        .join(file_name);

    tokio::fs::copy(built, &dest)
        .await
        .fs_context("copying artifact", &dest)?;
    Ok(dest)
}

/// An artifact must be an existing, non-empty regular file.
async fn verify_artifact(path: &Path) -> Result<()> {
    let metadata = tokio::fs::metadata(path)
        .await
        .fs_context("inspecting artifact", path)?;
    if !metadata.is_file() || metadata.len() == 0 {
        crate::bail!("no installer was produced at {}", path.display());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_types() {
        for t in PackageType::ALL {
            assert_eq!(t.short_name().parse::<PackageType>().unwrap(), t);
        }
    }

    #[test]
    fn rejects_unknown_types() {
        let err = "exe".parse::<PackageType>().unwrap_err();
        assert_eq!(err.to_string(), "type must be one of ('pkg', 'deb', 'rpm', 'msi')");
    }

    #[tokio::test]
    async fn empty_artifacts_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fleet-osquery.msi");
        std::fs::write(&path, "").unwrap();
        assert!(verify_artifact(&path).await.is_err());
        std::fs::write(&path, "MSI").unwrap();
        assert!(verify_artifact(&path).await.is_ok());
    }

    #[tokio::test]
    async fn artifacts_are_placed_with_absolute_paths() {
        let staging = tempfile::tempdir().unwrap();
        let built = staging.path().join("fleet-osquery.pkg");
        std::fs::write(&built, "xar!").unwrap();

        let out = tempfile::tempdir().unwrap();
        let placed = place_artifact(&built, &out.path().join("dist")).await.unwrap();
        assert!(placed.is_absolute());
        assert_eq!(std::fs::read(&placed).unwrap(), b"xar!");
    }
}
