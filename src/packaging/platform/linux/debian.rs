//! Debian package (.deb) builder.
//!
//! A .deb file is an ar archive containing:
//! - debian-binary: Format version (2.0)
//! - control.tar.gz: Package metadata (control, md5sums, conffiles, scripts)
//! - data.tar.gz: Files to install
//!
//! The archives are written in-process so no Debian tooling is needed on the
//! host. File modes are carried over from the staged tree, which keeps the
//! enroll secret at 0600 inside the package.

use super::{DESCRIPTION, ENV_PATH, HOMEPAGE, MAINTAINER, PACKAGE_NAME, SUMMARY};
use crate::config::Configuration;
use crate::packaging::{
    Host, Layout, PackageType, PlatformBuilder, StagedTree,
    error::{Context, Error, ErrorExt, Result},
    templates::{DescriptorContext, Renderer},
    utils::fs::{self, MODE_REGULAR},
};
use flate2::{Compression, write::GzEncoder};
use std::{
    fs::File,
    io::{self, Write},
    path::{Path, PathBuf},
};
use tar::HeaderMode;
use walkdir::WalkDir;

const ARCH: &str = "amd64";

/// Builds `fleet-osquery_<version>_amd64.deb`.
#[derive(Clone, Copy, Debug, Default)]
pub struct DebBuilder;

/// Output file name for `version`.
pub fn package_file_name(version: &str) -> String {
    format!("{PACKAGE_NAME}_{version}_{ARCH}.deb")
}

fn control_dir(tree: &StagedTree) -> PathBuf {
    tree.path().join("control")
}

impl PlatformBuilder for DebBuilder {
    fn package_type(&self) -> PackageType {
        PackageType::Deb
    }

    fn describe(&self) -> &'static str {
        "Debian package"
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
        super::render_scripts(renderer, &context, &control_dir(tree), false)
            .await
            .context("failed to generate control scripts")
    }

    async fn invoke(
        &self,
        config: &Configuration,
        _host: &Host,
        tree: &StagedTree,
    ) -> Result<PathBuf> {
        let data_dir = tree.root();
        let control_dir = control_dir(tree);
        let package_path = tree.path().join(package_file_name(config.version()));

        log::info!("Bundling {}", package_path.display());

        generate_control_file(config.version(), &control_dir, &data_dir)
            .await
            .context("failed to generate control file")?;
        generate_md5sums(&control_dir, &data_dir)
            .await
            .context("failed to generate md5sums file")?;
        generate_conffiles(&control_dir)
            .await
            .context("failed to generate conffiles")?;

        let debian_binary_path = tree.path().join("debian-binary");
        fs::write_file(&debian_binary_path, "2.0\n", MODE_REGULAR).await?;

        let control_tar_gz = tar_and_gzip_dir(control_dir, tree.path().join("control.tar.gz"))
            .await
            .context("failed to tar/gzip control directory")?;
        let data_tar_gz = tar_and_gzip_dir(data_dir, tree.path().join("data.tar.gz"))
            .await
            .context("failed to tar/gzip data directory")?;

        create_ar_archive(
            vec![debian_binary_path, control_tar_gz, data_tar_gz],
            &package_path,
        )
        .await
        .context("failed to create ar archive")?;

        Ok(package_path)
    }
}

async fn generate_control_file(version: &str, control_dir: &Path, data_dir: &Path) -> Result<()> {
    let (bytes, _) = fs::tree_stats(data_dir).await?;

    let control = format!(
        "Package: {PACKAGE_NAME}\n\
         Version: {version}\n\
         Architecture: {ARCH}\n\
         Installed-Size: {}\n\
         Maintainer: {MAINTAINER}\n\
         Section: admin\n\
         Priority: optional\n\
         Homepage: {HOMEPAGE}\n\
         Description: {SUMMARY}\n \
         {DESCRIPTION}\n",
        bytes.div_ceil(1024)
    );

    fs::write_file(&control_dir.join("control"), control, MODE_REGULAR).await
}

/// Mark the environment file as configuration so upgrades keep local edits.
async fn generate_conffiles(control_dir: &Path) -> Result<()> {
    fs::write_file(
        &control_dir.join("conffiles"),
        format!("/{ENV_PATH}\n"),
        MODE_REGULAR,
    )
    .await
}

/// Generate MD5 checksums for all files in data directory.
async fn generate_md5sums(control_dir: &Path, data_dir: &Path) -> Result<()> {
    let md5sums_path = control_dir.join("md5sums");
    let data_dir = data_dir.to_path_buf();

    tokio::task::spawn_blocking(move || -> Result<()> {
        let mut file = File::create(&md5sums_path).fs_context("creating md5sums file", &md5sums_path)?;

        for entry in WalkDir::new(&data_dir).sort_by_file_name() {
            let entry = entry?;
            if !entry.file_type().is_file() {
                continue;
            }

            let mut src = File::open(entry.path()).fs_context("opening file for MD5", entry.path())?;
            let mut context = md5::Context::new();
            io::copy(&mut src, &mut context)?;
            let digest = context.finalize();

            // "hex_digest  relative_path"
            let rel_path = entry.path().strip_prefix(&data_dir)?;
            writeln!(file, "{:x}  {}", digest, rel_path.display())?;
        }

        file.flush()?;
        Ok(())
    })
    .await
    .map_err(|e| Error::GenericError(format!("MD5sums generation task failed: {}", e)))?
}

/// Create a tar.gz archive of `src_dir` at `dest_path`, owned by root.
async fn tar_and_gzip_dir(src_dir: PathBuf, dest_path: PathBuf) -> Result<PathBuf> {
    let tar_gz = tokio::fs::File::create(&dest_path)
        .await
        .fs_context("creating tar.gz file", &dest_path)?;
    let std_file = tar_gz.into_std().await;

    tokio::task::spawn_blocking(move || {
        let enc = GzEncoder::new(std_file, Compression::default());
        let mut tar = tar::Builder::new(enc);

        for entry in WalkDir::new(&src_dir).sort_by_file_name() {
            let entry = entry?;
            let path = entry.path();

            if path == src_dir {
                continue;
            }

            let rel_path = path.strip_prefix(&src_dir)?;
            let metadata = std::fs::metadata(path)?;

            let mut header = tar::Header::new_gnu();
            header.set_metadata_in_mode(&metadata, HeaderMode::Deterministic);
            // Deterministic mode rounds permissions to 0644/0755.
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                header.set_mode(metadata.permissions().mode() & 0o7777);
            }

            if entry.file_type().is_dir() {
                tar.append_data(&mut header, rel_path, &mut io::empty())?;
            } else {
                let mut file = File::open(path)?;
                tar.append_data(&mut header, rel_path, &mut file)?;
            }
        }

        let enc = tar.into_inner()?;
        let mut finished = enc.finish()?;
        finished.flush()?;
        Ok(dest_path)
    })
    .await
    .map_err(|e| Error::GenericError(format!("Join error: {}", e)))?
}

/// Create ar archive (final .deb package).
async fn create_ar_archive(files: Vec<PathBuf>, dest: &Path) -> Result<()> {
    let tokio_file = tokio::fs::File::create(dest)
        .await
        .fs_context("creating .deb archive", dest)?;
    let dest_file = tokio_file.into_std().await;

    tokio::task::spawn_blocking(move || {
        let mut builder = ar::Builder::new(dest_file);

        for path in &files {
            builder.append_path(path)?;
        }

        let finished = builder.into_inner()?;
        finished.sync_all()?;
        Ok(())
    })
    .await
    .map_err(|e| Error::GenericError(format!("Join error: {}", e)))?
}
