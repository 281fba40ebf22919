//! Error types for packaging operations.
//!
//! Errors are chained with context strings so that a failing toolchain phase
//! reads like `build package: light failed: <raw output>` by the time it
//! reaches the user.
//!
//! # Example
//!
//! ```no_run
//! use orbit_packager::packaging::error::{Context, ErrorExt, Result};
//! use std::path::Path;
//!
//! fn read_flags(path: &Path) -> Result<String> {
//!     let flags = std::fs::read_to_string(path).fs_context("reading flagfile", path)?;
//!     if flags.is_empty() {
//!         orbit_packager::bail!("flagfile {} is empty", path.display());
//!     }
//!     Ok(flags)
//! }
//!
//! fn stage_flags(path: &Path) -> Result<String> {
//!     read_flags(path).context("failed to stage osquery flags")
//! }
//! ```

use std::{
    fmt::{self, Display},
    io,
    path::{self, PathBuf},
    process::ExitStatus,
    time::Duration,
};
use thiserror::Error as DeriveError;

/// Errors returned by the packaging pipeline.
#[derive(Debug, DeriveError)]
#[non_exhaustive]
pub enum Error {
    /// Error with context. Created by the [`Context`] trait.
    #[error("{0}: {1}")]
    Context(String, Box<Self>),

    /// File system error with path context.
    ///
    /// Created by the [`ErrorExt`] trait's `fs_context` method.
    #[error("{context} {path}: {error}")]
    Fs {
        /// Operation being performed (e.g., "writing secret file")
        context: &'static str,
        /// Path that was being accessed
        path: PathBuf,
        /// The underlying I/O error
        error: io::Error,
    },

    /// A native tool could not be started at all.
    #[error("failed to run command {command}: {error}")]
    CommandFailed {
        /// Command that failed to execute
        command: String,
        /// The underlying error
        error: io::Error,
    },

    /// A native packaging tool ran and reported failure.
    #[error(transparent)]
    Toolchain(#[from] ToolchainError),

    /// Code signing failed or was requested where it cannot run.
    #[error("failed to sign package: {0}")]
    Signing(String),

    /// Notarization was requested and did not complete.
    #[error("failed to notarize package: {0}")]
    Notarization(#[from] NotarizationError),

    /// Generic I/O error.
    #[error("{0}")]
    IoError(#[from] io::Error),

    /// Error walking the staged tree.
    #[error("{0}")]
    WalkdirError(#[from] walkdir::Error),

    /// Path prefix stripping error.
    #[error("{0}")]
    StripError(#[from] path::StripPrefixError),

    /// Handlebars render error, including strict-mode missing fields.
    #[error("{0}")]
    HandleBarsError(#[from] handlebars::RenderError),

    /// Handlebars template parsing error.
    #[error("{0}")]
    Template(#[from] handlebars::TemplateError),

    /// JSON serialization/deserialization error.
    #[error("{0}")]
    JsonError(#[from] serde_json::error::Error),

    /// HTTP client error (downloading binaries).
    #[error("HTTP client error: {0}")]
    HttpError(#[from] reqwest::Error),

    /// URL parsing error.
    #[error("{0}")]
    UrlParse(#[from] url::ParseError),

    /// RPM package creation error.
    #[error("{0}")]
    RpmError(#[from] rpm::Error),

    /// Generic error with custom message.
    #[error("{0}")]
    GenericError(String),
}

impl Error {
    /// The innermost error below any [`Error::Context`] layers.
    pub fn root(&self) -> &Self {
        match self {
            Error::Context(_, inner) => inner.root(),
            other => other,
        }
    }

    /// Returns the toolchain failure at the root of this error, if any.
    ///
    /// Walks through [`Error::Context`] layers so that builders can annotate
    /// failures freely without hiding them from the retry controller.
    pub fn toolchain_failure(&self) -> Option<&ToolchainError> {
        match self {
            Error::Context(_, inner) => inner.toolchain_failure(),
            Error::Toolchain(failure) => Some(failure),
            _ => None,
        }
    }

    /// True when the root cause is a toolchain failure its adapter marked transient.
    pub fn is_transient(&self) -> bool {
        self.toolchain_failure().is_some_and(|f| f.transient)
    }
}

/// A native toolchain step in one of the platform pipelines.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum Phase {
    /// WiX harvest of the staged tree into a file manifest.
    Heat,
    /// WiX compilation of manifests into object files.
    Candle,
    /// WiX link of object files into the final msi.
    Light,
    /// macOS component package assembly.
    Pkgbuild,
    /// macOS product archive assembly.
    Productbuild,
    /// macOS installer signing.
    Productsign,
    /// macOS binary signing.
    Codesign,
    /// cpio/gzip payload archive for flat packages.
    Payload,
    /// Bill of materials generation.
    Mkbom,
    /// xar flat package assembly.
    Xar,
    /// Notarization submission and status queries.
    Notarytool,
    /// Notarization ticket stapling.
    Stapler,
}

impl Phase {
    /// Tool name as it appears in diagnostics.
    pub fn tool_name(&self) -> &'static str {
        match self {
            Phase::Heat => "heat",
            Phase::Candle => "candle",
            Phase::Light => "light",
            Phase::Pkgbuild => "pkgbuild",
            Phase::Productbuild => "productbuild",
            Phase::Productsign => "productsign",
            Phase::Codesign => "codesign",
            Phase::Payload => "payload archive",
            Phase::Mkbom => "mkbom",
            Phase::Xar => "xar",
            Phase::Notarytool => "notarytool",
            Phase::Stapler => "stapler",
        }
    }
}

impl Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tool_name())
    }
}

/// A native tool exited unsuccessfully.
///
/// `transient` is decided by the adapter that invoked the tool, never by the
/// caller inspecting `raw`.
#[derive(Debug, DeriveError)]
#[error("{phase} failed: {raw}")]
pub struct ToolchainError {
    /// Failing step
    pub phase: Phase,
    /// Whether the adapter recognized this as a known flaky failure
    pub transient: bool,
    /// Exit code, when the process exited normally
    pub status: Option<i32>,
    /// Captured stderr and stdout of the tool
    pub raw: String,
}

impl ToolchainError {
    /// Build a failure from a finished process.
    pub fn from_exit(phase: Phase, status: ExitStatus, stdout: &[u8], stderr: &[u8]) -> Self {
        let stderr = String::from_utf8_lossy(stderr);
        let stdout = String::from_utf8_lossy(stdout);
        let raw = match (stderr.trim().is_empty(), stdout.trim().is_empty()) {
            (false, false) => format!("{}\n{}", stderr.trim_end(), stdout.trim_end()),
            (false, true) => stderr.trim_end().to_string(),
            (true, false) => stdout.trim_end().to_string(),
            (true, true) => format!("exit status {status}"),
        };
        Self {
            phase,
            transient: false,
            status: status.code(),
            raw,
        }
    }

    /// Mark this failure as transient.
    pub fn transient(mut self, transient: bool) -> Self {
        self.transient = transient;
        self
    }
}

/// Terminal notarization failures.
#[derive(Debug, DeriveError)]
pub enum NotarizationError {
    /// One or more App Store Connect credentials are missing.
    #[error(
        "notarization requires --app-store-connect-api-key-id, \
         --app-store-connect-api-key-issuer and --app-store-connect-api-key-content"
    )]
    MissingCredentials,

    /// The service reached a non-accepted verdict.
    #[error("submission {id} finished with status {status}: {message}")]
    Rejected {
        /// Submission id
        id: String,
        /// Verdict reported by the service
        status: String,
        /// Service message, if any
        message: String,
    },

    /// No verdict arrived before the polling deadline.
    #[error("submission {id} still in progress after {:?}", elapsed)]
    TimedOut {
        /// Submission id
        id: String,
        /// Time spent polling
        elapsed: Duration,
    },
}

/// Convenient type alias for Result.
pub type Result<T> = std::result::Result<T, Error>;

/// Trait for adding context to errors.
///
/// Works with both `Result<T, E>` and `Option<T>`.
pub trait Context<T> {
    /// Add context to an error.
    fn context<C>(self, context: C) -> Result<T>
    where
        C: Display + Send + Sync + 'static;

    /// Add context to an error using a closure (lazy evaluation).
    fn with_context<C, F>(self, f: F) -> Result<T>
    where
        C: Display + Send + Sync + 'static,
        F: FnOnce() -> C;
}

impl<T> Context<T> for Result<T> {
    fn context<C>(self, context: C) -> Result<T>
    where
        C: Display + Send + Sync + 'static,
    {
        self.map_err(|e| Error::Context(context.to_string(), Box::new(e)))
    }

    fn with_context<C, F>(self, f: F) -> Result<T>
    where
        C: Display + Send + Sync + 'static,
        F: FnOnce() -> C,
    {
        self.map_err(|e| Error::Context(f().to_string(), Box::new(e)))
    }
}

impl<T> Context<T> for Option<T> {
    fn context<C>(self, context: C) -> Result<T>
    where
        C: Display + Send + Sync + 'static,
    {
        self.ok_or_else(|| Error::GenericError(context.to_string()))
    }

    fn with_context<C, F>(self, f: F) -> Result<T>
    where
        C: Display + Send + Sync + 'static,
        F: FnOnce() -> C,
    {
        self.ok_or_else(|| Error::GenericError(f().to_string()))
    }
}

/// Extension trait for filesystem operations with automatic path context.
pub trait ErrorExt<T> {
    /// Add filesystem context to an I/O error.
    ///
    /// The `context` should be a present-tense verb phrase describing the operation,
    /// e.g., "writing secret file", "creating staging directory".
    fn fs_context(self, context: &'static str, path: impl Into<PathBuf>) -> Result<T>;
}

impl<T> ErrorExt<T> for std::result::Result<T, io::Error> {
    fn fs_context(self, context: &'static str, path: impl Into<PathBuf>) -> Result<T> {
        self.map_err(|error| Error::Fs {
            context,
            path: path.into(),
            error,
        })
    }
}

/// Macro for early return with error.
///
/// Converts the message into a [`Error::GenericError`] and returns immediately.
#[macro_export]
macro_rules! bail {
    ($msg:literal $(,)?) => {
        return Err($crate::packaging::error::Error::GenericError(format!($msg)))
    };
    ($err:expr $(,)?) => {
        return Err($crate::packaging::error::Error::GenericError($err.to_string()))
    };
    ($fmt:expr, $($arg:tt)*) => {
        return Err($crate::packaging::error::Error::GenericError(format!($fmt, $($arg)*)))
    };
}
