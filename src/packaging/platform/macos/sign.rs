//! Code signing with the system tools.

use crate::packaging::{
    error::{Context, ErrorExt, Phase, Result},
    toolchain::{Invocation, Runner},
};
use std::path::Path;

/// Sign an executable inside the staged payload with the hardened runtime.
///
/// `binary` is relative to `cwd`.
pub async fn sign_binary(identity: &str, binary: &str, cwd: &Path) -> Result<()> {
    log::info!("Signing {} with identity '{}'", binary, identity);

    Invocation::new(Phase::Codesign, "codesign", cwd)
        .args(["--force", "--options", "runtime", "--timestamp", "--sign"])
        .arg(identity)
        .arg(binary)
        .run(&Runner::Direct)
        .await
        .with_context(|| format!("failed to sign {binary}"))?;
    Ok(())
}

/// Sign an installer package in place.
///
/// `productsign` cannot overwrite its input, so the signed copy is written
/// next to it and moved over the original.
pub async fn sign_package(identity: &str, package: &str, cwd: &Path) -> Result<()> {
    log::info!("Signing package {} with identity '{}'", package, identity);

    let signed = format!("{package}.signed");
    Invocation::new(Phase::Productsign, "productsign", cwd)
        .arg("--sign")
        .arg(identity)
        .arg(package)
        .arg(signed.as_str())
        .run(&Runner::Direct)
        .await
        .context("failed to sign package")?;

    let from = cwd.join(&signed);
    tokio::fs::rename(&from, cwd.join(package))
        .await
        .fs_context("replacing unsigned package", &from)?;
    Ok(())
}
