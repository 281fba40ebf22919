//! Retry of msi builds under emulation.
//!
//! The WiX tools fail intermittently when run under x86_64 emulation on ARM64
//! hosts. Only that combination is retried: an msi build, on a non-Windows
//! ARM64 host, failing in a way the WiX adapter marked transient. Every other
//! failure is returned from the first attempt.

use crate::packaging::error::{Error, Result};
use crate::packaging::{Host, PackageType};
use std::future::Future;
use std::path::PathBuf;

/// Upper bound on build attempts.
pub const MAX_ATTEMPTS: u32 = 9;

/// Position of one attempt in the sequence.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Attempt {
    /// 1-based attempt number
    pub number: u32,
    /// Attempt bound
    pub max: u32,
}

impl Attempt {
    /// Whether this is the first attempt.
    pub fn is_first(&self) -> bool {
        self.number == 1
    }
}

/// Whether a failed build of `package_type` on `host` should be attempted again.
pub fn should_retry(package_type: PackageType, host: &Host, error: &Error) -> bool {
    package_type == PackageType::Msi && host.emulates_windows_toolchain() && error.is_transient()
}

/// Runs builds serially until one succeeds, a failure is not retryable, or
/// the attempt bound is reached.
#[derive(Clone, Copy, Debug)]
pub struct RetryController {
    package_type: PackageType,
    host: Host,
    max_attempts: u32,
}

impl RetryController {
    /// Controller for `package_type` builds on `host`.
    pub fn new(package_type: PackageType, host: Host) -> Self {
        Self {
            package_type,
            host,
            max_attempts: MAX_ATTEMPTS,
        }
    }

    /// Run `build` until done.
    ///
    /// Each call of `build` must start from scratch; the returned future is
    /// awaited to completion before the next attempt starts.
    pub async fn run<F, Fut>(&self, mut build: F) -> Result<PathBuf>
    where
        F: FnMut(Attempt) -> Fut,
        Fut: Future<Output = Result<PathBuf>>,
    {
        let mut number = 1;
        loop {
            let attempt = Attempt {
                number,
                max: self.max_attempts,
            };

            match build(attempt).await {
                Ok(path) => {
                    if number > 1 {
                        log::info!("Build succeeded on attempt {}/{}", number, self.max_attempts);
                    }
                    return Ok(path);
                }
                Err(e) => {
                    if !should_retry(self.package_type, &self.host, &e) {
                        return Err(e);
                    }
                    if number >= self.max_attempts {
                        log::warn!("Giving up after {} attempts: {}", number, e);
                        return Err(e);
                    }
                    log::warn!(
                        "Transient failure on attempt {}/{}: {}",
                        number,
                        self.max_attempts,
                        e
                    );
                    number += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packaging::error::{Phase, ToolchainError};
    use crate::packaging::{HostArch, HostOs};
    use std::cell::Cell;

    const MAC_ARM: Host = Host::new(HostOs::MacOs, HostArch::Aarch64);
    const LINUX_X86: Host = Host::new(HostOs::Linux, HostArch::X86_64);

    fn transient_light() -> Error {
        Error::Toolchain(ToolchainError {
            phase: Phase::Light,
            transient: true,
            status: Some(1),
            raw: "light.exe : error LGHT0001 : Access violation".into(),
        })
    }

    fn transient_candle() -> Error {
        Error::Context(
            "build package".into(),
            Box::new(Error::Toolchain(ToolchainError {
                phase: Phase::Candle,
                transient: true,
                status: Some(1),
                raw: "candle.exe : error CNDL0001".into(),
            })),
        )
    }

    #[tokio::test]
    async fn first_success_is_returned() {
        let calls = Cell::new(0);
        let path = RetryController::new(PackageType::Msi, MAC_ARM)
            .run(|_| {
                calls.set(calls.get() + 1);
                async { Ok(PathBuf::from("fleet-osquery.msi")) }
            })
            .await
            .unwrap();
        assert_eq!(path, PathBuf::from("fleet-osquery.msi"));
        assert_eq!(calls.get(), 1);
    }

    #[tokio::test]
    async fn recovers_after_transient_failures() {
        let calls = Cell::new(0);
        let path = RetryController::new(PackageType::Msi, MAC_ARM)
            .run(|attempt| {
                calls.set(calls.get() + 1);
                async move {
                    if attempt.number < 3 {
                        Err(transient_candle())
                    } else {
                        Ok(PathBuf::from("ok.msi"))
                    }
                }
            })
            .await
            .unwrap();
        assert_eq!(path, PathBuf::from("ok.msi"));
        assert_eq!(calls.get(), 3);
    }

    #[tokio::test]
    async fn persistent_transient_failure_stops_at_the_bound() {
        let calls = Cell::new(0);
        let seen = std::cell::RefCell::new(Vec::new());
        let err = RetryController::new(PackageType::Msi, MAC_ARM)
            .run(|attempt| {
                calls.set(calls.get() + 1);
                seen.borrow_mut().push(attempt);
                async { Err(transient_light()) }
            })
            .await
            .unwrap_err();

        assert_eq!(calls.get(), MAX_ATTEMPTS);
        assert!(err.is_transient());
        assert_eq!(err.toolchain_failure().map(|f| f.phase), Some(Phase::Light));

        let seen = seen.into_inner();
        assert_eq!(seen.first(), Some(&Attempt { number: 1, max: 9 }));
        assert_eq!(seen.last(), Some(&Attempt { number: 9, max: 9 }));
    }

    #[tokio::test]
    async fn non_transient_msi_failure_is_not_retried() {
        let calls = Cell::new(0);
        let err = RetryController::new(PackageType::Msi, MAC_ARM)
            .run(|_| {
                calls.set(calls.get() + 1);
                async { Err(Error::GenericError("missing orbit.exe".into())) }
            })
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "missing orbit.exe");
        assert_eq!(calls.get(), 1);
    }

    #[tokio::test]
    async fn off_target_host_is_not_retried() {
        let calls = Cell::new(0);
        let _ = RetryController::new(PackageType::Msi, LINUX_X86)
            .run(|_| {
                calls.set(calls.get() + 1);
                async { Err(transient_candle()) }
            })
            .await;
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn only_msi_is_eligible() {
        let err = transient_candle();
        assert!(should_retry(PackageType::Msi, &MAC_ARM, &err));
        for package_type in [PackageType::Pkg, PackageType::Deb, PackageType::Rpm] {
            assert!(!should_retry(package_type, &MAC_ARM, &err));
        }
    }
}
