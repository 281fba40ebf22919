//! Description of the machine running the build.
//!
//! Host facts are injected rather than read at each decision point so that
//! validation and retry scoping can be exercised for any OS/architecture.

use std::fmt;

/// Operating system of the build host.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum HostOs {
    /// Linux
    Linux,
    /// macOS
    MacOs,
    /// Windows
    Windows,
    /// Anything else (BSDs, etc.)
    Other,
}

/// CPU architecture of the build host.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum HostArch {
    /// x86_64 / amd64
    X86_64,
    /// aarch64 / arm64
    Aarch64,
    /// Anything else
    Other,
}

/// Build host OS and architecture.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct Host {
    /// Operating system
    pub os: HostOs,
    /// Architecture
    pub arch: HostArch,
}

impl Host {
    /// Create a host description.
    pub const fn new(os: HostOs, arch: HostArch) -> Self {
        Self { os, arch }
    }

    /// The machine this process is running on.
    pub fn current() -> Self {
        let os = match std::env::consts::OS {
            "linux" => HostOs::Linux,
            "macos" => HostOs::MacOs,
            "windows" => HostOs::Windows,
            _ => HostOs::Other,
        };
        let arch = match std::env::consts::ARCH {
            "x86_64" => HostArch::X86_64,
            "aarch64" => HostArch::Aarch64,
            _ => HostArch::Other,
        };
        Self { os, arch }
    }

    /// True on Windows.
    pub fn is_windows(&self) -> bool {
        self.os == HostOs::Windows
    }

    /// True on macOS.
    pub fn is_macos(&self) -> bool {
        self.os == HostOs::MacOs
    }

    /// True on Linux.
    pub fn is_linux(&self) -> bool {
        self.os == HostOs::Linux
    }

    /// True on ARM64.
    pub fn is_arm64(&self) -> bool {
        self.arch == HostArch::Aarch64
    }

    /// Windows tooling on this host runs under x86_64 emulation.
    ///
    /// This is the environment where the WiX pipeline fails intermittently.
    pub fn emulates_windows_toolchain(&self) -> bool {
        !self.is_windows() && self.is_arm64()
    }
}

impl fmt::Display for Host {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let os = match self.os {
            HostOs::Linux => "linux",
            HostOs::MacOs => "darwin",
            HostOs::Windows => "windows",
            HostOs::Other => "other",
        };
        let arch = match self.arch {
            HostArch::X86_64 => "amd64",
            HostArch::Aarch64 => "arm64",
            HostArch::Other => "other",
        };
        write!(f, "{os}/{arch}")
    }
}
