//! macOS installer packages.
//!
//! # Modules
//!
//! - [`pkg`]: flat `.pkg` assembly with the launchd daemon and install scripts
//! - [`sign`]: `codesign` and `productsign`
//! - [`notarize`]: notary submission, polling and stapling
//!
//! # Toolchains
//!
//! | Host | Tools |
//! |------|-------|
//! | macOS | `pkgbuild`, `productbuild`, `codesign`, `productsign`, `xcrun` |
//! | Linux, native tooling | `cpio`, `gzip`, `mkbom`, `xar` |
//! | Linux | same, inside the `fleetdm/bomutils` image |
//!
//! Signing and notarization only run on macOS.

pub mod notarize;
pub mod pkg;
pub mod sign;

pub use notarize::{NotarizePolicy, NotaryClient, SigningState, XcrunNotary};
pub use pkg::PkgBuilder;
