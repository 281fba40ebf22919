//! Windows Installer packages.
//!
//! The WiX toolset runs directly on Windows, under wine with native tooling,
//! and in the `fleetdm/wix` image everywhere else. Under x86_64 emulation on
//! ARM64 the WiX tools fail intermittently; [`msi::classify_failure`] marks
//! those failures transient so the retry controller can try again.

pub mod msi;

pub use msi::MsiBuilder;
