//! Descriptor templates.
//!
//! Every template is rendered in strict mode: a reference to a field the
//! context does not carry is a render error, never an empty string. Optional
//! values are therefore always present in [`DescriptorContext`], as `""` or
//! `false` when unset, so that `{{#if}}` blocks can test them.

use crate::config::{Configuration, format_duration};
use crate::packaging::error::{Error, Result};
use crate::packaging::stage::{CERTIFICATE_FILE, Layout, SECRET_FILE};
use crate::packaging::utils::fs;
use handlebars::Handlebars;
use serde::Serialize;
use std::path::Path;

/// A named descriptor template.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum Template {
    /// systemd unit for orbit
    SystemdUnit,
    /// `/etc/default/orbit`
    EnvironmentFile,
    /// Linux post-install script
    LinuxPostinst,
    /// Linux pre-removal script
    LinuxPrerm,
    /// Linux post-removal script
    LinuxPostrm,
    /// launchd daemon plist
    LaunchdPlist,
    /// macOS preinstall script
    MacosPreinstall,
    /// macOS postinstall script
    MacosPostinstall,
    /// productbuild distribution definition
    Distribution,
    /// flat package component metadata
    PackageInfo,
    /// WiX product definition
    WixMain,
    /// heat output filter removing orbit.exe
    HeatFilter,
    /// Windows event log manifest for osqueryd
    EventLogManifest,
    /// PowerShell uninstall helper
    InstallerUtils,
}

impl Template {
    /// Every template, in registration order.
    pub const ALL: [Template; 14] = [
        Template::SystemdUnit,
        Template::EnvironmentFile,
        Template::LinuxPostinst,
        Template::LinuxPrerm,
        Template::LinuxPostrm,
        Template::LaunchdPlist,
        Template::MacosPreinstall,
        Template::MacosPostinstall,
        Template::Distribution,
        Template::PackageInfo,
        Template::WixMain,
        Template::HeatFilter,
        Template::EventLogManifest,
        Template::InstallerUtils,
    ];

    /// Registry name.
    pub fn name(&self) -> &'static str {
        match self {
            Template::SystemdUnit => "linux/orbit.service",
            Template::EnvironmentFile => "linux/orbit.env",
            Template::LinuxPostinst => "linux/postinst",
            Template::LinuxPrerm => "linux/prerm",
            Template::LinuxPostrm => "linux/postrm",
            Template::LaunchdPlist => "macos/launchd.plist",
            Template::MacosPreinstall => "macos/preinstall",
            Template::MacosPostinstall => "macos/postinstall",
            Template::Distribution => "macos/distribution.xml",
            Template::PackageInfo => "macos/package_info.xml",
            Template::WixMain => "windows/main.wxs",
            Template::HeatFilter => "windows/remove_orbit.xslt",
            Template::EventLogManifest => "windows/osquery.man",
            Template::InstallerUtils => "windows/installer_utils.ps1",
        }
    }

    fn source(&self) -> &'static str {
        match self {
            Template::SystemdUnit => include_str!("linux/orbit.service.hbs"),
            Template::EnvironmentFile => include_str!("linux/orbit.env.hbs"),
            Template::LinuxPostinst => include_str!("linux/postinst.hbs"),
            Template::LinuxPrerm => include_str!("linux/prerm.hbs"),
            Template::LinuxPostrm => include_str!("linux/postrm.hbs"),
            Template::LaunchdPlist => include_str!("macos/launchd.plist.hbs"),
            Template::MacosPreinstall => include_str!("macos/preinstall.hbs"),
            Template::MacosPostinstall => include_str!("macos/postinstall.hbs"),
            Template::Distribution => include_str!("macos/distribution.xml.hbs"),
            Template::PackageInfo => include_str!("macos/package_info.xml.hbs"),
            Template::WixMain => include_str!("windows/main.wxs.hbs"),
            Template::HeatFilter => include_str!("windows/remove_orbit.xslt.hbs"),
            Template::EventLogManifest => include_str!("windows/osquery.man.hbs"),
            Template::InstallerUtils => include_str!("windows/installer_utils.ps1.hbs"),
        }
    }
}

/// Strict handlebars registry holding every descriptor template.
#[derive(Debug)]
pub struct Renderer {
    registry: Handlebars<'static>,
}

impl Renderer {
    /// Compile all templates.
    pub fn new() -> Result<Self> {
        let mut registry = Handlebars::new();
        registry.set_strict_mode(true);
        // Descriptors are XML, shell and PowerShell, not HTML.
        registry.register_escape_fn(handlebars::no_escape);

        for template in Template::ALL {
            registry
                .register_template_string(template.name(), template.source())
                .map_err(|e| Error::Context(format!("template {}", template.name()), Box::new(e.into())))?;
        }

        Ok(Self { registry })
    }

    /// Render `template` with `data`.
    pub fn render<T: Serialize>(&self, template: Template, data: &T) -> Result<String> {
        self.registry
            .render(template.name(), data)
            .map_err(|e| Error::Context(format!("rendering {}", template.name()), Box::new(e.into())))
    }

    /// Render `template` into `path` with the given permission bits.
    pub async fn render_to<T: Serialize>(
        &self,
        template: Template,
        data: &T,
        path: &Path,
        mode: u32,
    ) -> Result<()> {
        let text = self.render(template, data)?;
        log::debug!("Rendered {} -> {}", template.name(), path.display());
        fs::write_file(path, text, mode).await
    }
}

/// Values available to every descriptor template.
#[derive(Clone, Debug, Serialize)]
pub struct DescriptorContext {
    /// Service identifier
    pub identifier: String,
    /// Package version
    pub version: String,
    /// Fleet server URL or `""`
    pub fleet_url: String,
    /// Installed certificate path or `""`
    pub fleet_certificate_path: String,
    /// Installed secret path or `""`
    pub enroll_secret_path: String,
    /// `--insecure`
    pub insecure: bool,
    /// `--debug`
    pub debug: bool,
    /// Update repository URL or `""`
    pub update_url: String,
    /// `--disable-updates`
    pub disable_updates: bool,
    /// `ORBIT_UPDATE_INTERVAL` in Go notation
    pub update_interval: String,
    /// Enable/start the service on install
    pub start_service: bool,
    /// Include Fleet Desktop
    pub desktop: bool,
    /// Orbit channel
    pub orbit_channel: String,
    /// osqueryd channel
    pub osqueryd_channel: String,
    /// Fleet Desktop channel
    pub desktop_channel: String,
    /// Install root as passed to `--root-dir`
    pub root_dir: String,
    /// Installed orbit executable
    pub orbit_path: String,
}

impl DescriptorContext {
    /// Derive the context for `layout` from `config`.
    pub fn new(config: &Configuration, layout: &Layout) -> Self {
        let root = layout.install_root;
        let installed = |present: bool, file: &str| {
            if present {
                root.join(file)
            } else {
                String::new()
            }
        };

        Self {
            identifier: config.identifier().to_string(),
            version: config.version().to_string(),
            fleet_url: config.fleet_url().unwrap_or_default().to_string(),
            fleet_certificate_path: installed(
                config.fleet_certificate().is_some(),
                CERTIFICATE_FILE,
            ),
            enroll_secret_path: installed(config.enroll_secret().is_some(), SECRET_FILE),
            insecure: config.insecure(),
            debug: config.debug(),
            update_url: config.update_url().unwrap_or_default().to_string(),
            disable_updates: config.disable_updates(),
            update_interval: format_duration(config.update_interval()),
            start_service: config.start_service(),
            desktop: config.desktop(),
            orbit_channel: config.orbit_channel().to_string(),
            osqueryd_channel: config.osqueryd_channel().to_string(),
            desktop_channel: config.desktop_channel().to_string(),
            root_dir: root.dir(),
            orbit_path: root.join(&layout.binary_relative(&layout.orbit, config.orbit_channel())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packaging::PackageType;

    const OPTIONAL_FLAGS: [&str; 6] = [
        "--fleet-certificate",
        "--insecure",
        "--debug",
        "--update-url",
        "--disable-updates",
        "--fleet-desktop",
    ];

    fn minimal(package_type: PackageType) -> Configuration {
        Configuration::builder(package_type)
            .fleet_url("https://h:1")
            .enroll_secret("s")
            .build()
    }

    fn exec_start(unit: &str) -> &str {
        unit.lines()
            .find(|l| l.starts_with("ExecStart="))
            .unwrap()
    }

    #[test]
    fn all_templates_compile() {
        Renderer::new().unwrap();
    }

    #[test]
    fn missing_field_is_an_error() {
        let renderer = Renderer::new().unwrap();
        let partial = serde_json::json!({ "identifier": "com.example.orbit" });
        for template in [
            Template::SystemdUnit,
            Template::LaunchdPlist,
            Template::WixMain,
            Template::Distribution,
        ] {
            assert!(
                renderer.render(template, &partial).is_err(),
                "{} rendered with missing fields",
                template.name()
            );
        }
    }

    #[test]
    fn minimal_unit_emits_only_required_flags() {
        let renderer = Renderer::new().unwrap();
        let context = DescriptorContext::new(&minimal(PackageType::Deb), &Layout::LINUX);
        let unit = renderer.render(Template::SystemdUnit, &context).unwrap();
        let exec = exec_start(&unit);

        assert!(exec.contains(r#"--fleet-url "https://h:1""#));
        assert!(exec.contains(r#"--enroll-secret-path "/opt/orbit/secret.txt""#));
        assert!(exec.contains(r#"--orbit-channel "stable""#));
        assert!(exec.contains(r#"--osqueryd-channel "stable""#));
        for flag in OPTIONAL_FLAGS {
            assert!(!exec.contains(flag), "unexpected {flag} in {exec}");
        }
    }

    #[test]
    fn every_optional_flag_is_emitted_when_set() {
        let renderer = Renderer::new().unwrap();
        let config = Configuration::builder(PackageType::Rpm)
            .fleet_url("https://h:1")
            .enroll_secret("s")
            .fleet_certificate("/tmp/fleet.pem")
            .debug(true)
            .update_url("https://tuf.example.com")
            .disable_updates(true)
            .desktop(true)
            .desktop_channel("edge")
            .build();
        let context = DescriptorContext::new(&config, &Layout::LINUX);
        let unit = renderer.render(Template::SystemdUnit, &context).unwrap();
        let exec = exec_start(&unit);

        assert!(exec.contains(r#"--fleet-certificate "/opt/orbit/fleet.pem""#));
        assert!(exec.contains(" --debug"));
        assert!(exec.contains(r#"--update-url "https://tuf.example.com""#));
        assert!(exec.contains(" --disable-updates"));
        assert!(exec.contains("--fleet-desktop --desktop-channel edge"));
        assert!(!exec.contains("--insecure"));
    }

    #[test]
    fn wix_arguments_use_installer_properties() {
        let renderer = Renderer::new().unwrap();
        let config = Configuration::builder(PackageType::Msi)
            .fleet_url("https://h:1")
            .enroll_secret("s")
            .insecure(true)
            .build();
        let mut context = serde_json::to_value(DescriptorContext::new(&config, &Layout::WINDOWS)).unwrap();
        context["orbit_source"] = "root\\bin\\orbit\\windows\\stable\\orbit.exe".into();
        let wxs = renderer.render(Template::WixMain, &context).unwrap();

        assert!(wxs.contains(r#"--root-dir "[ORBITROOT].""#));
        assert!(wxs.contains(r#"--enroll-secret-path "[ORBITROOT]secret.txt""#));
        assert!(wxs.contains(" --insecure"));
        assert!(wxs.contains("Value='15m0s'"));
        assert!(wxs.contains(r#"<File Source="root\bin\orbit\windows\stable\orbit.exe">"#));
        assert!(!wxs.contains("--fleet-certificate"));
    }

    #[test]
    fn linux_scripts_honor_service_toggle() {
        let renderer = Renderer::new().unwrap();
        let off = Configuration::builder(PackageType::Deb).start_service(false).build();
        let on = Configuration::builder(PackageType::Deb).build();

        let script_off = renderer
            .render(Template::LinuxPostinst, &DescriptorContext::new(&off, &Layout::LINUX))
            .unwrap();
        let script_on = renderer
            .render(Template::LinuxPostinst, &DescriptorContext::new(&on, &Layout::LINUX))
            .unwrap();

        assert!(!script_off.contains("systemctl enable"));
        assert!(script_on.contains("systemctl enable orbit.service"));
    }
}
