//! macOS installer package (.pkg) builder.
//!
//! The payload root gets the launchd daemon definition next to the staged
//! `/opt/orbit` tree. Install scripts unload a running daemon before files
//! are replaced and load it again afterwards.
//!
//! On macOS the package is assembled with `pkgbuild` and `productbuild`, then
//! optionally signed and notarized. Elsewhere the flat package is assembled
//! by hand:
//!
//! ```text
//! flat/
//!   Distribution
//!   base.pkg/
//!     PackageInfo
//!     Payload      cpio (odc) | gzip of root/
//!     Scripts      cpio (odc) | gzip of scripts/
//!     Bom          mkbom of root/
//! ```
//!
//! and archived with `xar`.

use super::notarize::{self, NotarizePolicy, SigningState, XcrunNotary};
use super::sign;
use crate::config::Configuration;
use crate::packaging::{
    Host, Layout, PackageType, PlatformBuilder, StagedTree,
    error::{Context, Error, NotarizationError, Phase, Result},
    templates::{DescriptorContext, Renderer, Template},
    toolchain::{Invocation, Runner},
    utils::fs::{self, MODE_EXECUTABLE, MODE_REGULAR},
};
use serde::Serialize;
use std::path::PathBuf;

/// Output file name.
pub const PKG_FILE: &str = "fleet-osquery.pkg";

/// Image carrying `mkbom`, `xar` and `cpio` for non-macOS hosts.
pub const BOMUTILS_IMAGE: &str = "fleetdm/bomutils";

const SCRIPTS_DIR: &str = "scripts";
const FLAT_DIR: &str = "flat";
const COMPONENT_DIR: &str = "flat/base.pkg";

/// Builds `fleet-osquery.pkg`.
#[derive(Clone, Copy, Debug, Default)]
pub struct PkgBuilder;

#[derive(Serialize)]
struct PackageInfoContext<'a> {
    #[serde(flatten)]
    base: &'a DescriptorContext,
    number_of_files: u64,
    install_kbytes: u64,
}

/// Payload path of the launchd definition for `identifier`.
fn launchd_plist(identifier: &str) -> String {
    format!("Library/LaunchDaemons/{identifier}.plist")
}

impl PlatformBuilder for PkgBuilder {
    fn package_type(&self) -> PackageType {
        PackageType::Pkg
    }

    fn describe(&self) -> &'static str {
        "macOS installer package"
    }

    fn layout(&self) -> Layout {
        Layout::MACOS
    }

    async fn render(
        &self,
        config: &Configuration,
        renderer: &Renderer,
        tree: &StagedTree,
    ) -> Result<()> {
        let context = DescriptorContext::new(config, &Layout::MACOS);
        let root = tree.root();
        let scripts = tree.path().join(SCRIPTS_DIR);

        renderer
            .render_to(
                Template::LaunchdPlist,
                &context,
                &root.join(launchd_plist(config.identifier())),
                MODE_REGULAR,
            )
            .await?;
        renderer
            .render_to(
                Template::MacosPreinstall,
                &context,
                &scripts.join("preinstall"),
                MODE_EXECUTABLE,
            )
            .await?;
        renderer
            .render_to(
                Template::MacosPostinstall,
                &context,
                &scripts.join("postinstall"),
                MODE_EXECUTABLE,
            )
            .await?;

        let flat = tree.path().join(FLAT_DIR);
        renderer
            .render_to(
                Template::Distribution,
                &context,
                &flat.join("Distribution"),
                MODE_REGULAR,
            )
            .await?;

        // Payload statistics must be taken after the plist is in place.
        let (bytes, files) = fs::tree_stats(&root).await?;
        let info = PackageInfoContext {
            base: &context,
            number_of_files: files,
            install_kbytes: bytes.div_ceil(1024),
        };
        renderer
            .render_to(
                Template::PackageInfo,
                &info,
                &tree.path().join(COMPONENT_DIR).join("PackageInfo"),
                MODE_REGULAR,
            )
            .await
    }

    async fn invoke(
        &self,
        config: &Configuration,
        host: &Host,
        tree: &StagedTree,
    ) -> Result<PathBuf> {
        if host.is_macos() {
            return build_with_pkgbuild(config, tree).await;
        }

        if config.sign_identity().is_some() || config.notarize() {
            return Err(Error::Signing(format!(
                "signing and notarization are only available on macOS hosts, not {host}"
            )));
        }

        let runner = if config.native_tooling() {
            Runner::Direct
        } else {
            Runner::docker(BOMUTILS_IMAGE, None)?
        };
        build_flat(&runner, tree).await
    }
}

/// Assemble with Apple's tools, then sign and notarize as configured.
async fn build_with_pkgbuild(config: &Configuration, tree: &StagedTree) -> Result<PathBuf> {
    let cwd = tree.path();
    let mut state = SigningState::Unsigned;

    if let Some(identity) = config.sign_identity() {
        let orbit = format!(
            "root/{}/{}",
            Layout::MACOS.payload_prefix,
            Layout::MACOS.binary_relative(&Layout::MACOS.orbit, config.orbit_channel())
        );
        sign::sign_binary(identity, &orbit, cwd).await?;
    }

    fs::create_dir_all(&cwd.join("packages")).await?;
    Invocation::new(Phase::Pkgbuild, "pkgbuild", cwd)
        .args(["--root", "root", "--identifier"])
        .arg(config.identifier())
        .arg("--version")
        .arg(config.version())
        .args(["--scripts", SCRIPTS_DIR, "--install-location", "/"])
        .arg("packages/base.pkg")
        .run(&Runner::Direct)
        .await
        .context("build component package")?;

    Invocation::new(Phase::Productbuild, "productbuild", cwd)
        .args(["--distribution", "flat/Distribution", "--package-path", "packages"])
        .arg(PKG_FILE)
        .run(&Runner::Direct)
        .await
        .context("build product package")?;

    if let Some(identity) = config.sign_identity() {
        sign::sign_package(identity, PKG_FILE, cwd).await?;
        state = SigningState::Signed;
    }

    let package = cwd.join(PKG_FILE);
    if config.notarize() {
        let key = config
            .app_store_connect_key()
            .ok_or(NotarizationError::MissingCredentials)?;
        let notary = XcrunNotary::new(key, cwd).await?;
        state = notarize::notarize(&notary, &package, &NotarizePolicy::default()).await?;
    }

    log::info!("Package {} is {}", PKG_FILE, state);
    Ok(package)
}

/// Assemble the flat package from its parts.
async fn build_flat(runner: &Runner, tree: &StagedTree) -> Result<PathBuf> {
    let cwd = tree.path();
    fs::create_dir_all(&cwd.join(COMPONENT_DIR)).await?;

    let cpio = |dir: &str, out: &str| {
        Invocation::new(Phase::Payload, "sh", cwd).arg("-c").arg(format!(
            "cd {dir} && find . | cpio -o --format odc --owner 0:80 | gzip -c > ../{COMPONENT_DIR}/{out}"
        ))
    };
    cpio("root", "Payload")
        .run(runner)
        .await
        .context("create payload archive")?;
    cpio(SCRIPTS_DIR, "Scripts")
        .run(runner)
        .await
        .context("create scripts archive")?;

    Invocation::new(Phase::Mkbom, "mkbom", cwd)
        .args(["-u", "0", "-g", "80", "root"])
        .arg(format!("{COMPONENT_DIR}/Bom"))
        .run(runner)
        .await
        .context("create bill of materials")?;

    Invocation::new(Phase::Xar, "sh", cwd)
        .arg("-c")
        .arg(format!(
            "cd {FLAT_DIR} && xar --compression none -cf ../{PKG_FILE} *"
        ))
        .run(runner)
        .await
        .context("create xar archive")?;

    Ok(cwd.join(PKG_FILE))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packaging::{HostArch, HostOs, LocalBinarySource};

    const LINUX: Host = Host::new(HostOs::Linux, HostArch::X86_64);

    fn fixture_repo() -> tempfile::TempDir {
        let repo = tempfile::tempdir().unwrap();
        let layout = Layout::MACOS;
        for target in [layout.orbit, layout.osqueryd] {
            let path = repo.path().join(target.path("stable"));
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(&path, target.name).unwrap();
        }
        std::fs::write(repo.path().join("root.json"), "{}").unwrap();
        repo
    }

    #[tokio::test]
    async fn renders_daemon_scripts_and_flat_metadata() {
        let repo = fixture_repo();
        let config = Configuration::builder(PackageType::Pkg)
            .identifier("com.example.orbit")
            .fleet_url("https://h:1")
            .enroll_secret("s")
            .build();
        let tree = StagedTree::create(false).unwrap();
        let renderer = Renderer::new().unwrap();

        PkgBuilder
            .stage(&config, &LocalBinarySource::new(repo.path()), &tree)
            .await
            .unwrap();
        PkgBuilder.render(&config, &renderer, &tree).await.unwrap();

        let plist = std::fs::read_to_string(
            tree.root().join("Library/LaunchDaemons/com.example.orbit.plist"),
        )
        .unwrap();
        assert!(plist.contains("<string>com.example.orbit</string>"));
        assert!(plist.contains("<string>https://h:1</string>"));
        assert!(plist.contains("<string>/opt/orbit/secret.txt</string>"));

        let info = std::fs::read_to_string(tree.path().join("flat/base.pkg/PackageInfo")).unwrap();
        // orbit, osqueryd, secret, update metadata and the plist
        assert!(info.contains(r#"numberOfFiles="5""#), "{info}");

        assert!(tree.path().join("scripts/preinstall").is_file());
        assert!(tree.path().join("flat/Distribution").is_file());
    }

    #[tokio::test]
    async fn signing_off_macos_is_an_error() {
        let config = Configuration::builder(PackageType::Pkg)
            .sign_identity("Developer ID Installer: Example")
            .native_tooling(true)
            .build();
        let tree = StagedTree::create(false).unwrap();

        let err = PkgBuilder.invoke(&config, &LINUX, &tree).await.unwrap_err();
        assert!(matches!(err, Error::Signing(_)));
        assert!(!tree.path().join(PKG_FILE).exists());
    }
}
