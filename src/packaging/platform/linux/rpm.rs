//! RPM package (.rpm) builder for Red Hat-based distributions.
//!
//! Packages the staged payload with the `rpm` crate. Every staged file is
//! added with its staged permission bits and root ownership.

use super::{DESCRIPTION, HOMEPAGE, PACKAGE_NAME, SUMMARY};
use crate::config::Configuration;
use crate::packaging::{
    Host, Layout, PackageType, PlatformBuilder, StagedTree,
    error::{Context, Error, ErrorExt, Result},
    templates::{DescriptorContext, Renderer},
};
use std::{
    io::Write,
    path::{Path, PathBuf},
};
use walkdir::WalkDir;

const ARCH: &str = "x86_64";
const LICENSE: &str = "MIT";
const VENDOR: &str = "Fleet Device Management";

/// Builds `fleet-osquery-<version>.x86_64.rpm`.
#[derive(Clone, Copy, Debug, Default)]
pub struct RpmBuilder;

/// Output file name for `version`.
pub fn package_file_name(version: &str) -> String {
    format!("{PACKAGE_NAME}-{version}.{ARCH}.rpm")
}

fn scripts_dir(tree: &StagedTree) -> PathBuf {
    tree.path().join("scripts")
}

impl PlatformBuilder for RpmBuilder {
    fn package_type(&self) -> PackageType {
        PackageType::Rpm
    }

    fn describe(&self) -> &'static str {
        "RPM package"
    }

    fn layout(&self) -> Layout {
        Layout::LINUX
    }

    async fn render(
        &self,
        config: &Configuration,
        renderer: &Renderer,
        tree: &StagedTree,
    ) -> Result<()> {
        let context = DescriptorContext::new(config, &Layout::LINUX);
        super::render_service(renderer, &context, &tree.root()).await?;
        super::render_scripts(renderer, &context, &scripts_dir(tree), true)
            .await
            .context("failed to generate rpm scripts")
    }

    async fn invoke(
        &self,
        config: &Configuration,
        _host: &Host,
        tree: &StagedTree,
    ) -> Result<PathBuf> {
        log::info!("Building RPM package {}", package_file_name(config.version()));

        let build_config = rpm::BuildConfig::default().compression(rpm::CompressionType::Gzip);

        let mut builder =
            rpm::PackageBuilder::new(PACKAGE_NAME, config.version(), LICENSE, ARCH, SUMMARY)
                .using_config(build_config)
                .release("1")
                .description(DESCRIPTION)
                .url(HOMEPAGE)
                .vendor(VENDOR);

        for (dest, source, mode) in payload_files(&tree.root()).await? {
            log::debug!("Adding {} -> {}", source.display(), dest);

            let content = tokio::fs::read(&source)
                .await
                .fs_context("reading staged file", &source)?;
            builder = builder.with_file_contents(
                content,
                rpm::FileOptions::new(&dest)
                    .mode(mode)
                    .user("root")
                    .group("root"),
            )?;
        }

        let scripts = scripts_dir(tree);
        let read_script = |name: &'static str| {
            let path = scripts.join(name);
            async move {
                tokio::fs::read_to_string(&path)
                    .await
                    .fs_context("reading rpm script", &path)
            }
        };
        builder = builder
            .post_install_script(read_script("postinst").await?)
            .pre_uninstall_script(read_script("prerm").await?)
            .post_uninstall_script(read_script("postrm").await?);

        let pkg = tokio::task::spawn_blocking(move || {
            builder
                .build()
                .map_err(|e| Error::GenericError(format!("Failed to build RPM package: {}", e)))
        })
        .await
        .map_err(|e| Error::GenericError(format!("Task join error: {}", e)))??;

        let output_path = tree.path().join(package_file_name(config.version()));
        let tokio_file = tokio::fs::File::create(&output_path)
            .await
            .fs_context("creating RPM file", &output_path)?;
        let mut file = tokio_file.into_std().await;

        pkg.write(&mut file)
            .map_err(|e| Error::GenericError(format!("Failed to write RPM package: {}", e)))?;
        file.flush().fs_context("flushing RPM file", &output_path)?;

        Ok(output_path)
    }
}

/// Every regular file below `root` as (install path, staged path, mode).
async fn payload_files(root: &Path) -> Result<Vec<(String, PathBuf, rpm::FileMode)>> {
    let root = root.to_path_buf();
    tokio::task::spawn_blocking(move || {
        let mut files = Vec::new();
        for entry in WalkDir::new(&root).sort_by_file_name() {
            let entry = entry?;
            if !entry.file_type().is_file() {
                continue;
            }

            let relative = entry.path().strip_prefix(&root)?;
            let dest = relative
                .components()
                .fold(String::new(), |mut acc, c| {
                    acc.push('/');
                    acc.push_str(&c.as_os_str().to_string_lossy());
                    acc
                });
            let mode = file_mode(&entry.metadata()?);
            files.push((dest, entry.path().to_path_buf(), mode));
        }
        Ok(files)
    })
    .await
    .map_err(|e| Error::GenericError(format!("Join error: {}", e)))?
}

#[cfg(unix)]
fn file_mode(metadata: &std::fs::Metadata) -> rpm::FileMode {
    use std::os::unix::fs::PermissionsExt;
    let mode = metadata.permissions().mode();
    if mode & 0o111 != 0 {
        rpm::FileMode::regular(0o755)
    } else if mode & 0o077 == 0 {
        rpm::FileMode::regular(0o600)
    } else {
        rpm::FileMode::regular(0o644)
    }
}

#[cfg(not(unix))]
fn file_mode(_: &std::fs::Metadata) -> rpm::FileMode {
    rpm::FileMode::regular(0o644)
}
