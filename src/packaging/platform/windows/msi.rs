//! Windows Installer (.msi) builder.
//!
//! Three WiX phases, run from the staging directory:
//!
//! 1. `heat` harvests `root/` into `heat.wxs`, dropping `orbit.exe` through
//!    the XSLT filter since `main.wxs` authors it with its service
//! 2. `candle` compiles `heat.wxs` and `main.wxs`
//! 3. `light` links both objects into `fleet-osquery.msi`

use crate::config::Configuration;
use crate::packaging::{
    Host, Layout, PackageType, PlatformBuilder, StagedTree,
    error::{Context, Phase, Result, ToolchainError},
    templates::{DescriptorContext, Renderer, Template},
    toolchain::{Invocation, Runner},
    utils::fs::MODE_REGULAR,
};
use serde::Serialize;
use std::path::PathBuf;

/// Output file name.
pub const MSI_FILE: &str = "fleet-osquery.msi";

/// Image carrying wine and the WiX toolset.
pub const WIX_IMAGE: &str = "fleetdm/wix:latest";

/// Install directory of `ORBITROOT` on the target.
const PROGRAM_DIR: &str = r"C:\Program Files\Orbit";

/// Builds `fleet-osquery.msi`.
#[derive(Clone, Copy, Debug, Default)]
pub struct MsiBuilder;

#[derive(Serialize)]
struct WixContext<'a> {
    #[serde(flatten)]
    base: &'a DescriptorContext,
    /// orbit.exe relative to the staging directory, for `<File Source>`
    orbit_source: String,
    /// orbit.exe file name, for the heat filter
    orbit_file: &'static str,
    /// Installed osqueryd.exe, for the event log manifest
    osqueryd_event_source: String,
}

impl<'a> WixContext<'a> {
    fn new(base: &'a DescriptorContext, config: &Configuration) -> Self {
        let layout = Layout::WINDOWS;
        let orbit = layout.binary_relative(&layout.orbit, config.orbit_channel());
        let osqueryd = layout.binary_relative(&layout.osqueryd, config.osqueryd_channel());
        Self {
            base,
            orbit_source: format!(r"root\{}", orbit.replace('/', r"\")),
            orbit_file: layout.orbit.file,
            osqueryd_event_source: format!(r"{PROGRAM_DIR}\{}", osqueryd.replace('/', r"\")),
        }
    }
}

/// WiX failures under emulation are transient; everything else is not.
pub fn classify_failure(phase: Phase, _: &ToolchainError) -> bool {
    matches!(phase, Phase::Heat | Phase::Candle | Phase::Light)
}

/// How the WiX tools are launched on `host`.
pub fn wix_runner(config: &Configuration, host: &Host) -> Result<Runner> {
    if host.is_windows() {
        Ok(Runner::Direct)
    } else if config.native_tooling() {
        Ok(Runner::Wine)
    } else {
        let platform = host.is_arm64().then_some("linux/amd64");
        Runner::docker(WIX_IMAGE, platform)
    }
}

impl PlatformBuilder for MsiBuilder {
    fn package_type(&self) -> PackageType {
        PackageType::Msi
    }

    fn describe(&self) -> &'static str {
        "Windows Installer package"
    }

    fn layout(&self) -> Layout {
        Layout::WINDOWS
    }

    async fn render(
        &self,
        config: &Configuration,
        renderer: &Renderer,
        tree: &StagedTree,
    ) -> Result<()> {
        let base = DescriptorContext::new(config, &Layout::WINDOWS);
        let context = WixContext::new(&base, config);
        let root = tree.root();

        // Harvested by heat and installed into ORBITROOT.
        renderer
            .render_to(
                Template::InstallerUtils,
                &context,
                &root.join("installer_utils.ps1"),
                MODE_REGULAR,
            )
            .await?;
        renderer
            .render_to(
                Template::EventLogManifest,
                &context,
                &root.join("osquery.man"),
                MODE_REGULAR,
            )
            .await?;

        renderer
            .render_to(
                Template::WixMain,
                &context,
                &tree.path().join("main.wxs"),
                MODE_REGULAR,
            )
            .await?;
        renderer
            .render_to(
                Template::HeatFilter,
                &context,
                &tree.path().join("remove-orbit.xslt"),
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
        let runner = wix_runner(config, host)?;
        let cwd = tree.path();

        Invocation::new(Phase::Heat, "heat", cwd)
            .args([
                "dir", "root", "-out", "heat.wxs", "-gg", "-g1", "-srd", "-sfrag", "-ke", "-dr",
                "ORBITROOT", "-cg", "OrbitFiles", "-t", "remove-orbit.xslt",
            ])
            .classify_with(classify_failure)
            .run(&runner)
            .await
            .context("package root files")?;

        Invocation::new(Phase::Candle, "candle", cwd)
            .args(["heat.wxs", "main.wxs", "-ext", "WixUtilExtension", "-arch", "x64"])
            .classify_with(classify_failure)
            .run(&runner)
            .await
            .context("build package")?;

        Invocation::new(Phase::Light, "light", cwd)
            .args([
                "heat.wixobj",
                "main.wixobj",
                "-ext",
                "WixUtilExtension",
                "-b",
                "root",
                "-out",
                MSI_FILE,
                "-sval",
            ])
            .classify_with(classify_failure)
            .run(&runner)
            .await
            .context("build package")?;

        Ok(cwd.join(MSI_FILE))
    }
}
