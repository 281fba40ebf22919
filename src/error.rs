//! Top-level error types for orbit_packager.
//!
//! Every failure the binary can report, with actionable recovery suggestions.

use crate::config::ValidationError;
use crate::packaging::{self, error::NotarizationError};
use thiserror::Error;

/// Result type alias for orbit_packager operations
pub type Result<T> = std::result::Result<T, PackagerError>;

/// Main error type for orbit_packager
#[derive(Error, Debug)]
pub enum PackagerError {
    /// The configuration was rejected before any build work
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Staging, rendering, toolchain, signing or notarization failed
    #[error(transparent)]
    Packaging(#[from] packaging::Error),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl PackagerError {
    /// Get actionable recovery suggestions for this error
    pub fn recovery_suggestions(&self) -> Vec<String> {
        if self.is_retryable() {
            return vec![
                "The WiX tools fail intermittently under emulation; run the command again"
                    .to_string(),
            ];
        }

        match self {
            PackagerError::Validation(ValidationError::EnrollmentIncomplete) => vec![
                "Pass both --fleet-url and --enroll-secret, or neither".to_string(),
            ],
            PackagerError::Validation(ValidationError::InsecureWithCertificate) => vec![
                "Drop --insecure; the certificate is used to verify the server".to_string(),
            ],
            PackagerError::Validation(ValidationError::WindowsRequiresMsi { .. }) => vec![
                "Use --type=msi on Windows".to_string(),
                "Build pkg, deb and rpm packages on macOS or Linux".to_string(),
            ],
            PackagerError::Validation(ValidationError::NativeToolingUnavailable) => vec![
                "Run without --native-tooling to use the docker images".to_string(),
                "Unset FLEETCTL_NATIVE_TOOLING if it is exported".to_string(),
            ],
            PackagerError::Validation(ValidationError::Certificate { path, .. }) => vec![
                format!("Check that {} exists and is readable", path.display()),
                "The certificate must contain at least one PEM block".to_string(),
            ],
            PackagerError::Packaging(e) => packaging_suggestions(e),
            _ => vec!["Check the error message above for specific details".to_string()],
        }
    }

    /// Whether running the same command again may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, PackagerError::Packaging(e) if e.is_transient())
    }
}

fn packaging_suggestions(error: &packaging::Error) -> Vec<String> {
    match error.root() {
        packaging::Error::Signing(_) => vec![
            "Sign and notarize packages on a macOS host".to_string(),
            "Build without --sign-identity and --notarize elsewhere".to_string(),
        ],
        packaging::Error::Notarization(NotarizationError::MissingCredentials) => vec![
            "Set FLEETCTL_APP_STORE_CONNECT_API_KEY_ID, _ISSUER and _CONTENT".to_string(),
        ],
        packaging::Error::Notarization(_) => vec![
            "Inspect the submission log with: xcrun notarytool log <id>".to_string(),
        ],
        packaging::Error::CommandFailed { command, .. } => vec![
            format!("Make sure {command} is installed and on PATH"),
            "Without --native-tooling, builds run inside docker images".to_string(),
        ],
        packaging::Error::HttpError(_) => vec![
            "Check network access to the update repository (--update-url)".to_string(),
        ],
        _ => vec!["Re-run with --verbose to see each packaging step".to_string()],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packaging::error::{Phase, ToolchainError};

    #[test]
    fn validation_messages_pass_through() {
        let err = PackagerError::from(ValidationError::EnrollmentIncomplete);
        assert_eq!(
            err.to_string(),
            "--enroll-secret and --fleet-url must be provided together"
        );
        assert!(!err.is_retryable());
    }

    #[test]
    fn transient_toolchain_failures_are_retryable() {
        let failure = packaging::Error::Context(
            "build package".into(),
            Box::new(packaging::Error::Toolchain(ToolchainError {
                phase: Phase::Candle,
                transient: true,
                status: Some(1),
                raw: "boom".into(),
            })),
        );
        let err = PackagerError::from(failure);
        assert_eq!(err.to_string(), "build package: candle failed: boom");
        assert!(err.is_retryable());
        assert!(err.recovery_suggestions()[0].contains("run the command again"));
    }

    #[test]
    fn signing_suggestions_look_through_context() {
        let err = PackagerError::from(packaging::Error::Context(
            "finalize".into(),
            Box::new(packaging::Error::Signing("no macOS".into())),
        ));
        assert!(err.recovery_suggestions()[0].contains("macOS host"));
    }
}
