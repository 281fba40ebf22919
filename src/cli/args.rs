//! Command line argument parsing.
//!
//! Flags map one to one onto [`Configuration`]; cross-field rules live in
//! [`crate::config::validate`], not here.

use crate::config::{Configuration, DEFAULT_UPDATE_URL, duration::parse_duration};
use crate::packaging::PackageType;
use clap::{ArgAction, Parser};
use std::path::PathBuf;
use std::time::Duration;

/// Build an osquery installer that enrolls hosts with Fleet
#[derive(Parser, Debug, Clone)]
#[command(
    name = "orbit_packager",
    about = "Create an orbit + osquery installer for a Fleet server",
    long_about = "Create an orbit + osquery installer for a Fleet server.

Usage:
  orbit_packager --type=deb --fleet-url=https://fleet.example.com --enroll-secret=<secret>
  orbit_packager --type=pkg --sign-identity=\"Developer ID Installer: Acme\" --notarize
  orbit_packager --type=msi --fleet-desktop",
    disable_version_flag = true
)]
pub struct Args {
    /// Type of package to build
    #[arg(long = "type", value_name = "TYPE")]
    pub package_type: PackageType,

    /// Enroll secret for authenticating to Fleet server
    #[arg(long, value_name = "SECRET")]
    pub enroll_secret: Option<String>,

    /// URL (host:port) of Fleet server
    #[arg(long, value_name = "URL")]
    pub fleet_url: Option<String>,

    /// Path to server certificate chain
    #[arg(long, value_name = "PATH")]
    pub fleet_certificate: Option<PathBuf>,

    /// Identifier for package product
    #[arg(long)]
    pub identifier: Option<String>,

    /// Version for package product
    #[arg(long)]
    pub version: Option<String>,

    /// Disable TLS certificate verification
    #[arg(long)]
    pub insecure: bool,

    /// Install orbit/osquery with a persistence service (launchd, systemd, etc.)
    #[arg(
        long,
        action = ArgAction::Set,
        num_args = 0..=1,
        default_value_t = true,
        default_missing_value = "true",
        value_name = "BOOL"
    )]
    pub service: bool,

    /// Identity to use for macOS codesigning
    #[arg(long, value_name = "IDENTITY")]
    pub sign_identity: Option<String>,

    /// Whether to notarize macOS packages
    #[arg(long)]
    pub notarize: bool,

    /// Update channel of osqueryd to use
    #[arg(long, value_name = "CHANNEL")]
    pub osqueryd_channel: Option<String>,

    /// Update channel of Fleet Desktop to use
    #[arg(long, value_name = "CHANNEL")]
    pub desktop_channel: Option<String>,

    /// Update channel of Orbit to use
    #[arg(long, value_name = "CHANNEL")]
    pub orbit_channel: Option<String>,

    /// Disable auto updates on the generated package
    #[arg(long)]
    pub disable_updates: bool,

    /// URL for update server
    #[arg(long, value_name = "URL", default_value = DEFAULT_UPDATE_URL)]
    pub update_url: String,

    /// Root key JSON metadata for update server (from fleetctl updates roots)
    #[arg(long, value_name = "JSON")]
    pub update_roots: Option<String>,

    /// Flagfile to package and provide to osquery
    #[arg(long, value_name = "PATH")]
    pub osquery_flagfile: Option<PathBuf>,

    /// Enable debug logging in orbit
    #[arg(long)]
    pub debug: bool,

    /// Include the Fleet Desktop Application in the package
    #[arg(long)]
    pub fleet_desktop: bool,

    /// Interval for Orbit to check for updates, in Go notation (15m, 1h30m)
    #[arg(long, value_name = "DURATION", value_parser = parse_duration, default_value = "15m")]
    pub update_interval: Duration,

    /// Do not open the folder containing the generated package
    #[arg(long)]
    pub disable_open_folder: bool,

    /// Build the package using native tooling (only available on Linux)
    #[arg(long, env = "FLEETCTL_NATIVE_TOOLING")]
    pub native_tooling: bool,

    /// App Store Connect API key used for notarization
    #[arg(long, env = "FLEETCTL_APP_STORE_CONNECT_API_KEY_ID", value_name = "ID")]
    pub app_store_connect_api_key_id: Option<String>,

    /// Issuer of the App Store Connect API key
    #[arg(
        long,
        env = "FLEETCTL_APP_STORE_CONNECT_API_KEY_ISSUER",
        value_name = "ISSUER"
    )]
    pub app_store_connect_api_key_issuer: Option<String>,

    /// Contents of the .p8 App Store Connect API key
    #[arg(
        long,
        env = "FLEETCTL_APP_STORE_CONNECT_API_KEY_CONTENT",
        value_name = "CONTENT",
        hide_env_values = true
    )]
    pub app_store_connect_api_key_content: Option<String>,

    /// Log detailed information when building the package
    #[arg(long)]
    pub verbose: bool,

    /// Directory the installer is written to
    #[arg(long, value_name = "DIR", default_value = ".")]
    pub output_dir: PathBuf,

    /// Keep the staging directory after the build, for debugging
    #[arg(long)]
    pub keep_staging: bool,
}

impl Args {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Build the immutable configuration these flags describe.
    pub fn to_configuration(&self) -> Configuration {
        Configuration::builder(self.package_type)
            .identifier(self.identifier.clone().unwrap_or_default())
            .version(self.version.clone().unwrap_or_default())
            .fleet_url(self.fleet_url.clone().unwrap_or_default())
            .enroll_secret(self.enroll_secret.clone().unwrap_or_default())
            .fleet_certificate(self.fleet_certificate.clone().unwrap_or_default())
            .insecure(self.insecure)
            .update_url(self.update_url.clone())
            .update_roots(self.update_roots.clone().unwrap_or_default())
            .orbit_channel(self.orbit_channel.clone().unwrap_or_default())
            .osqueryd_channel(self.osqueryd_channel.clone().unwrap_or_default())
            .desktop_channel(self.desktop_channel.clone().unwrap_or_default())
            .disable_updates(self.disable_updates)
            .update_interval(self.update_interval)
            .start_service(self.service)
            .debug(self.debug)
            .desktop(self.fleet_desktop)
            .osquery_flagfile(self.osquery_flagfile.clone().unwrap_or_default())
            .native_tooling(self.native_tooling)
            .sign_identity(self.sign_identity.clone().unwrap_or_default())
            .notarize(self.notarize)
            .app_store_connect_api_key_id(
                self.app_store_connect_api_key_id.clone().unwrap_or_default(),
            )
            .app_store_connect_api_key_issuer(
                self.app_store_connect_api_key_issuer.clone().unwrap_or_default(),
            )
            .app_store_connect_api_key_content(
                self.app_store_connect_api_key_content
                    .clone()
                    .unwrap_or_default(),
            )
            .verbose(self.verbose)
            .open_folder(!self.disable_open_folder)
            .output_dir(self.output_dir.clone())
            .keep_staging(self.keep_staging)
            .build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    fn parse(args: &[&str]) -> Result<Args, clap::Error> {
        Args::try_parse_from(std::iter::once("orbit_packager").chain(args.iter().copied()))
    }

    #[test]
    fn command_definition_is_consistent() {
        Args::command().debug_assert();
    }

    #[test]
    fn type_is_required_and_checked() {
        assert!(parse(&[]).is_err());

        let err = parse(&["--type=exe"]).unwrap_err().to_string();
        assert!(err.contains("type must be one of ('pkg', 'deb', 'rpm', 'msi')"));

        let args = parse(&["--type", "rpm"]).unwrap();
        assert_eq!(args.package_type, PackageType::Rpm);
    }

    #[test]
    fn service_defaults_on_and_accepts_explicit_values() {
        assert!(parse(&["--type=deb"]).unwrap().service);
        assert!(parse(&["--type=deb", "--service"]).unwrap().service);
        assert!(!parse(&["--type=deb", "--service=false"]).unwrap().service);
    }

    #[test]
    fn version_is_a_package_field() {
        let args = parse(&["--type=pkg", "--version=2.3.4"]).unwrap();
        assert_eq!(args.to_configuration().version(), "2.3.4");
    }

    #[test]
    fn update_url_can_be_overridden() {
        let args = parse(&["--type=deb", "--update-url=https://updates.example.com"]).unwrap();
        assert_eq!(
            args.to_configuration().update_url(),
            Some("https://updates.example.com")
        );
    }

    #[test]
    fn update_interval_uses_go_notation() {
        let args = parse(&["--type=deb", "--update-interval=1h30m"]).unwrap();
        assert_eq!(args.update_interval, Duration::from_secs(90 * 60));
        assert!(parse(&["--type=deb", "--update-interval=soon"]).is_err());
    }

    #[test]
    fn configuration_mirrors_flags() {
        let args = parse(&[
            "--type=deb",
            "--fleet-url=https://fleet.example.com",
            "--enroll-secret=abc",
            "--fleet-desktop",
            "--disable-open-folder",
            "--orbit-channel=edge",
            "--output-dir=out",
        ])
        .unwrap();
        let config = args.to_configuration();

        assert_eq!(config.package_type(), PackageType::Deb);
        assert_eq!(config.fleet_url(), Some("https://fleet.example.com"));
        assert_eq!(config.enroll_secret(), Some("abc"));
        assert!(config.desktop());
        assert!(!config.open_folder());
        assert_eq!(config.orbit_channel(), "edge");
        assert_eq!(config.osqueryd_channel(), "stable");
        assert_eq!(config.identifier(), "com.fleetdm.orbit");
        assert_eq!(config.update_url(), Some("https://tuf.fleetctl.com"));
        assert_eq!(config.output_dir(), std::path::Path::new("out"));
    }
}
