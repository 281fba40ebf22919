//! Linux packages: `.deb` and `.rpm`.
//!
//! Both formats install the same payload: the staged `/opt/orbit` tree, a
//! systemd unit and `/etc/default/orbit`. They differ only in the archive
//! format and in how the maintainer scripts read their arguments.
//!
//! | Format | Output | Built with |
//! |--------|--------|------------|
//! | .deb | `fleet-osquery_<version>_amd64.deb` | `ar`, `tar`, `flate2` |
//! | .rpm | `fleet-osquery-<version>.x86_64.rpm` | `rpm` |

pub mod debian;
pub mod rpm;

pub use debian::DebBuilder;
pub use rpm::RpmBuilder;

use crate::packaging::error::{Context, Result};
use crate::packaging::templates::{DescriptorContext, Renderer, Template};
use crate::packaging::utils::fs::{MODE_EXECUTABLE, MODE_REGULAR};
use serde::Serialize;
use std::path::Path;

/// Package name shared by both formats.
pub const PACKAGE_NAME: &str = "fleet-osquery";

/// systemd unit, relative to the payload root.
pub const UNIT_PATH: &str = "usr/lib/systemd/system/orbit.service";

/// Environment file read by the unit, relative to the payload root.
pub const ENV_PATH: &str = "etc/default/orbit";

const MAINTAINER: &str = "Fleet Device Management <engineering@fleetdm.com>";
const HOMEPAGE: &str = "https://fleetdm.com";
const SUMMARY: &str = "Fleet osquery";
const DESCRIPTION: &str = "Orbit launches and auto-updates osquery, enrolled with a Fleet server.";

#[derive(Serialize)]
struct ScriptContext<'a> {
    #[serde(flatten)]
    base: &'a DescriptorContext,
    rpm: bool,
}

/// Maintainer scripts, as (file name, template).
const SCRIPTS: [(&str, Template); 3] = [
    ("postinst", Template::LinuxPostinst),
    ("prerm", Template::LinuxPrerm),
    ("postrm", Template::LinuxPostrm),
];

/// Render the unit and its environment file into the payload root.
async fn render_service(
    renderer: &Renderer,
    context: &DescriptorContext,
    payload_root: &Path,
) -> Result<()> {
    renderer
        .render_to(
            Template::SystemdUnit,
            context,
            &payload_root.join(UNIT_PATH),
            MODE_REGULAR,
        )
        .await
        .context("failed to write systemd unit")?;
    renderer
        .render_to(
            Template::EnvironmentFile,
            context,
            &payload_root.join(ENV_PATH),
            MODE_REGULAR,
        )
        .await
        .context("failed to write environment file")
}

/// Render the maintainer scripts into `dir`.
async fn render_scripts(
    renderer: &Renderer,
    context: &DescriptorContext,
    dir: &Path,
    rpm: bool,
) -> Result<()> {
    let context = ScriptContext { base: context, rpm };
    for (name, template) in SCRIPTS {
        renderer
            .render_to(template, &context, &dir.join(name), MODE_EXECUTABLE)
            .await
            .with_context(|| format!("failed to write {name} script"))?;
    }
    Ok(())
}
