//! Staged trees.
//!
//! A staged tree is a private temporary directory laid out like the installed
//! system. Each build attempt acquires a fresh one; it is removed when the
//! [`StagedTree`] is dropped unless it was created with `retain`.
//!
//! ```text
//! <staging>/
//!   root/                      payload handed to the packaging tool
//!     <install root>/          /opt/orbit, or the msi ORBITROOT
//!       bin/<name>/<platform>/<channel>/<file>
//!       secret.txt             0600
//!       fleet.pem
//!       osquery.flags
//!       tuf-metadata.json
//!   ...                        builder-specific descriptors and scratch
//! ```

use crate::config::Configuration;
use crate::packaging::error::{Context, ErrorExt, Result};
use crate::packaging::source::{BinarySource, Target};
use crate::packaging::utils::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// File name of the enroll secret inside the install root.
pub const SECRET_FILE: &str = "secret.txt";

/// File name of the server certificate inside the install root.
pub const CERTIFICATE_FILE: &str = "fleet.pem";

/// File name of the osquery flagfile inside the install root.
pub const FLAGFILE: &str = "osquery.flags";

/// File name of the update client's trusted root metadata.
pub const UPDATE_METADATA_FILE: &str = "tuf-metadata.json";

/// An isolated, temporary staging directory.
#[derive(Debug)]
pub struct StagedTree {
    path: PathBuf,
    dir: Option<TempDir>,
}

impl StagedTree {
    /// Acquire a new staging directory.
    ///
    /// With `retain`, the directory is left on disk after the build so it can
    /// be inspected.
    pub fn create(retain: bool) -> Result<Self> {
        let tmp = std::env::temp_dir();
        let dir = tempfile::Builder::new()
            .prefix("orbit-package")
            .tempdir()
            .fs_context("creating staging directory", &tmp)?;

        if retain {
            let path = dir.keep();
            log::info!("Staging in {} (retained)", path.display());
            Ok(Self { path, dir: None })
        } else {
            let path = dir.path().to_path_buf();
            log::debug!("Staging in {}", path.display());
            Ok(Self {
                path,
                dir: Some(dir),
            })
        }
    }

    /// Top of the staging directory.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Payload root: the tree that will be installed.
    pub fn root(&self) -> PathBuf {
        self.path.join("root")
    }

    /// Whether the directory survives this value.
    pub fn is_retained(&self) -> bool {
        self.dir.is_none()
    }
}

impl Drop for StagedTree {
    fn drop(&mut self) {
        if self.dir.is_some() {
            log::debug!("Removing staged tree {}", self.path.display());
        }
    }
}

/// How install-time paths are spelled inside descriptors.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum InstallRoot {
    /// An absolute Unix directory, e.g. `/opt/orbit`
    Unix(&'static str),
    /// The Windows Installer `ORBITROOT` directory property
    OrbitRoot,
}

impl InstallRoot {
    /// Spelling of the install root itself.
    pub fn dir(&self) -> String {
        match self {
            InstallRoot::Unix(root) => root.to_string(),
            InstallRoot::OrbitRoot => "[ORBITROOT].".to_string(),
        }
    }

    /// Install-time path of `relative` below the install root.
    pub fn join(&self, relative: &str) -> String {
        match self {
            InstallRoot::Unix(root) => format!("{}/{}", root.trim_end_matches('/'), relative),
            InstallRoot::OrbitRoot => format!("[ORBITROOT]{}", relative.replace('/', "\\")),
        }
    }
}

/// Where a platform puts things.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Layout {
    /// Install root relative to the payload root, `/`-separated
    pub payload_prefix: &'static str,
    /// Install root as spelled in descriptors
    pub install_root: InstallRoot,
    /// Agent binary
    pub orbit: Target,
    /// Monitoring daemon
    pub osqueryd: Target,
    /// Fleet Desktop companion
    pub desktop: Target,
}

impl Layout {
    /// Linux packages install into `/opt/orbit`.
    pub const LINUX: Layout = Layout {
        payload_prefix: "opt/orbit",
        install_root: InstallRoot::Unix("/opt/orbit"),
        orbit: Target {
            name: "orbit",
            platform: "linux",
            file: "orbit",
        },
        osqueryd: Target {
            name: "osqueryd",
            platform: "linux",
            file: "osqueryd",
        },
        desktop: Target {
            name: "desktop",
            platform: "linux",
            file: "desktop.tar.gz",
        },
    };

    /// macOS packages install into `/opt/orbit`.
    pub const MACOS: Layout = Layout {
        payload_prefix: "opt/orbit",
        install_root: InstallRoot::Unix("/opt/orbit"),
        orbit: Target {
            name: "orbit",
            platform: "macos",
            file: "orbit",
        },
        osqueryd: Target {
            name: "osqueryd",
            platform: "macos-app",
            file: "osqueryd.app.tar.gz",
        },
        desktop: Target {
            name: "desktop",
            platform: "macos",
            file: "desktop.app.tar.gz",
        },
    };

    /// The msi payload root is `ORBITROOT` itself.
    pub const WINDOWS: Layout = Layout {
        payload_prefix: "",
        install_root: InstallRoot::OrbitRoot,
        orbit: Target {
            name: "orbit",
            platform: "windows",
            file: "orbit.exe",
        },
        osqueryd: Target {
            name: "osqueryd",
            platform: "windows",
            file: "osqueryd.exe",
        },
        desktop: Target {
            name: "desktop",
            platform: "windows",
            file: "fleet-desktop.exe",
        },
    };

    /// Install root inside the staged payload.
    pub fn staged_install_root(&self, tree: &StagedTree) -> PathBuf {
        if self.payload_prefix.is_empty() {
            tree.root()
        } else {
            tree.root().join(self.payload_prefix)
        }
    }

    /// Relative path of a target below the install root, `/`-separated.
    pub fn binary_relative(&self, target: &Target, channel: &str) -> String {
        format!(
            "bin/{}/{}/{}/{}",
            target.name, target.platform, channel, target.file
        )
    }
}

/// What the stager placed into the install root.
#[derive(Clone, Debug, Default)]
pub struct StagedFiles {
    /// Staged agent binary
    pub orbit: PathBuf,
    /// Staged daemon binary
    pub osqueryd: PathBuf,
    /// Staged desktop binary
    pub desktop: Option<PathBuf>,
    /// Secret file
    pub secret: Option<PathBuf>,
    /// Certificate copy
    pub certificate: Option<PathBuf>,
    /// Flagfile copy
    pub flagfile: Option<PathBuf>,
    /// Update client root metadata
    pub update_metadata: Option<PathBuf>,
}

/// Populate `tree` with everything the installed system needs.
///
/// Writes only below the staged tree.
pub async fn stage<S: BinarySource>(
    config: &Configuration,
    layout: &Layout,
    source: &S,
    tree: &StagedTree,
) -> Result<StagedFiles> {
    let install_root = layout.staged_install_root(tree);
    fs::create_dir_all(&install_root).await?;

    let fetch = |target: Target, channel: &str| {
        let dest = install_root.join(layout.binary_relative(&target, channel));
        let channel = channel.to_string();
        async move {
            log::info!("Staging {} ({})", target.name, channel);
            source.fetch(&target, &channel, &dest).await?;
            fs::set_mode(&dest, fs::MODE_EXECUTABLE).await?;
            Ok::<_, crate::packaging::Error>(dest)
        }
    };

    let mut staged = StagedFiles {
        orbit: fetch(layout.orbit, config.orbit_channel()).await?,
        osqueryd: fetch(layout.osqueryd, config.osqueryd_channel()).await?,
        ..Default::default()
    };

    if config.desktop() {
        staged.desktop = Some(fetch(layout.desktop, config.desktop_channel()).await?);
    }

    if let Some(secret) = config.enroll_secret() {
        let path = install_root.join(SECRET_FILE);
        fs::write_file(&path, secret, fs::MODE_SECRET).await?;
        staged.secret = Some(path);
    }

    if let Some(certificate) = config.fleet_certificate() {
        let path = install_root.join(CERTIFICATE_FILE);
        fs::copy_file(certificate, &path, fs::MODE_REGULAR).await?;
        staged.certificate = Some(path);
    }

    if let Some(flagfile) = config.osquery_flagfile() {
        let path = install_root.join(FLAGFILE);
        fs::copy_file(flagfile, &path, fs::MODE_REGULAR).await?;
        staged.flagfile = Some(path);
    }

    if !config.disable_updates() {
        let roots: serde_json::Value = match config.update_roots() {
            Some(roots) => serde_json::from_str(roots)?,
            None => source
                .root_metadata()
                .await
                .context("failed to initialize update metadata")?,
        };
        let metadata = serde_json::json!({ "root.json": roots });
        let path = install_root.join(UPDATE_METADATA_FILE);
        fs::write_file(&path, serde_json::to_vec_pretty(&metadata)?, fs::MODE_REGULAR).await?;
        staged.update_metadata = Some(path);
    }

    Ok(staged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packaging::PackageType;
    use crate::packaging::source::LocalBinarySource;

    fn fixture_repo(layout: &Layout) -> tempfile::TempDir {
        let repo = tempfile::tempdir().unwrap();
        for target in [layout.orbit, layout.osqueryd, layout.desktop] {
            let path = repo.path().join(target.path("stable"));
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(&path, target.name).unwrap();
        }
        std::fs::write(repo.path().join("root.json"), r#"{"signed":{"version":1}}"#).unwrap();
        repo
    }

    #[test]
    fn install_root_spelling() {
        assert_eq!(InstallRoot::Unix("/opt/orbit").join("secret.txt"), "/opt/orbit/secret.txt");
        assert_eq!(InstallRoot::OrbitRoot.join("secret.txt"), "[ORBITROOT]secret.txt");
        assert_eq!(
            InstallRoot::OrbitRoot.join("bin/orbit/windows/stable/orbit.exe"),
            "[ORBITROOT]bin\\orbit\\windows\\stable\\orbit.exe"
        );
    }

    #[test]
    fn dropped_tree_is_removed() {
        let tree = StagedTree::create(false).unwrap();
        let path = tree.path().to_path_buf();
        assert!(path.exists());
        drop(tree);
        assert!(!path.exists());
    }

    #[test]
    fn retained_tree_survives() {
        let tree = StagedTree::create(true).unwrap();
        let path = tree.path().to_path_buf();
        assert!(tree.is_retained());
        drop(tree);
        assert!(path.exists());
        std::fs::remove_dir_all(path).unwrap();
    }

    #[tokio::test]
    async fn stages_binaries_and_secret() {
        let repo = fixture_repo(&Layout::LINUX);
        let config = Configuration::builder(PackageType::Deb)
            .fleet_url("https://h:1")
            .enroll_secret("s")
            .update_roots(r#"{"signed":{}}"#)
            .build();
        let tree = StagedTree::create(false).unwrap();

        let staged = stage(&config, &Layout::LINUX, &LocalBinarySource::new(repo.path()), &tree)
            .await
            .unwrap();

        assert_eq!(
            staged.orbit,
            tree.root().join("opt/orbit/bin/orbit/linux/stable/orbit")
        );
        assert!(staged.desktop.is_none());
        assert!(staged.certificate.is_none());

        let secret = staged.secret.unwrap();
        assert_eq!(std::fs::read_to_string(&secret).unwrap(), "s");
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&secret).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }

        let metadata: serde_json::Value =
            serde_json::from_slice(&std::fs::read(staged.update_metadata.unwrap()).unwrap()).unwrap();
        assert_eq!(metadata["root.json"]["signed"], serde_json::json!({}));
    }

    #[tokio::test]
    async fn repository_roots_are_staged_unless_updates_are_disabled() {
        let repo = fixture_repo(&Layout::LINUX);
        let source = LocalBinarySource::new(repo.path());

        let config = Configuration::builder(PackageType::Deb).build();
        let tree = StagedTree::create(false).unwrap();
        let staged = stage(&config, &Layout::LINUX, &source, &tree).await.unwrap();
        let metadata = staged.update_metadata.unwrap();
        assert_eq!(
            metadata,
            tree.root().join("opt/orbit").join(UPDATE_METADATA_FILE)
        );
        let metadata: serde_json::Value =
            serde_json::from_slice(&std::fs::read(metadata).unwrap()).unwrap();
        assert_eq!(metadata["root.json"]["signed"]["version"], 1);

        let config = Configuration::builder(PackageType::Deb)
            .disable_updates(true)
            .build();
        let tree = StagedTree::create(false).unwrap();
        let staged = stage(&config, &Layout::LINUX, &source, &tree).await.unwrap();
        assert!(staged.update_metadata.is_none());
        assert!(!tree.root().join("opt/orbit").join(UPDATE_METADATA_FILE).exists());
    }

    #[tokio::test]
    async fn windows_payload_root_is_orbitroot() {
        let repo = fixture_repo(&Layout::WINDOWS);
        let config = Configuration::builder(PackageType::Msi).desktop(true).build();
        let tree = StagedTree::create(false).unwrap();

        let staged = stage(&config, &Layout::WINDOWS, &LocalBinarySource::new(repo.path()), &tree)
            .await
            .unwrap();

        assert_eq!(
            staged.orbit,
            tree.root().join("bin/orbit/windows/stable/orbit.exe")
        );
        assert_eq!(
            staged.desktop,
            Some(tree.root().join("bin/desktop/windows/stable/fleet-desktop.exe"))
        );
    }
}
