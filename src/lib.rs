//! # orbit_packager
//!
//! Builds installers that bootstrap a host into a Fleet deployment: the
//! orbit agent, osqueryd and optionally Fleet Desktop, with the enroll
//! secret, server URL and certificate baked in.
//!
//! ## Features
//!
//! - **Four formats**: macOS `.pkg`, Debian `.deb`, RPM `.rpm`, Windows `.msi`
//! - **Isolated builds**: every attempt stages into its own temporary tree
//! - **Host-aware toolchains**: native tools, wine, or docker images
//! - **Signing and notarization** of macOS packages on macOS hosts
//! - **Bounded retry** of the WiX failures seen under ARM64 emulation
//!
//! ## Usage
//!
//! ```bash
//! orbit_packager --type=deb --fleet-url=https://fleet.example.com --enroll-secret=abc
//! orbit_packager --type=msi --fleet-desktop --disable-open-folder
//! ```
//!
//! ## Library
//!
//! ```no_run
//! use orbit_packager::{Configuration, PackageType, build_deb};
//!
//! # async fn demo() -> orbit_packager::packaging::Result<()> {
//! let config = Configuration::builder(PackageType::Deb)
//!     .fleet_url("https://fleet.example.com")
//!     .enroll_secret("abc")
//!     .build();
//! let installer = build_deb(&config).await?;
//! println!("{}", installer.display());
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod cli;
pub mod config;
pub mod error;
pub mod packaging;

pub use cli::Args;
pub use config::{Configuration, ConfigurationBuilder, ValidationError, validate};
pub use error::{PackagerError, Result};
pub use packaging::{PackageType, build_deb, build_msi, build_pkg, build_rpm};
