//! Platform builders, one per installer format.
//!
//! - [`linux`]: `.deb` and `.rpm`
//! - [`macos`]: `.pkg`, code signing and notarization
//! - [`windows`]: `.msi`
//!
//! Every builder compiles on every host. Which native tools they reach for is
//! decided at run time from the [`Host`](crate::packaging::Host) and the
//! configuration.

pub mod linux;
pub mod macos;
pub mod windows;
