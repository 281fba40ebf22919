//! Native packaging tool invocation.
//!
//! Tools run with the staging directory as working directory and receive only
//! paths relative to it, so the same invocation works directly, under wine,
//! or inside a container with the staging directory mounted.

use crate::packaging::error::{Error, Phase, Result, ToolchainError};
use std::path::{Path, PathBuf};
use std::process::Output;
use tokio::process::Command;

/// Decides whether a failed run of a phase is a known transient failure.
pub type Classifier = fn(Phase, &ToolchainError) -> bool;

/// Never transient.
pub fn never_transient(_: Phase, _: &ToolchainError) -> bool {
    false
}

/// How tools are launched.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Runner {
    /// Run the program as-is from `PATH`.
    Direct,
    /// Run a Windows program under wine.
    Wine,
    /// Run inside a docker image with the working directory mounted.
    Docker {
        /// Image reference
        image: String,
        /// `--platform` override, for emulated images
        platform: Option<&'static str>,
    },
}

impl Runner {
    /// Container runner, failing early if docker is not installed.
    pub fn docker(image: impl Into<String>, platform: Option<&'static str>) -> Result<Self> {
        let image = image.into();
        which::which("docker").map_err(|_| {
            Error::GenericError(format!(
                "docker is required to run {image} on this host; install Docker or use native tooling"
            ))
        })?;
        Ok(Runner::Docker { image, platform })
    }

    fn command(&self, program: &str, args: &[String], cwd: &Path) -> Command {
        match self {
            Runner::Direct => {
                let mut cmd = Command::new(program);
                cmd.args(args).current_dir(cwd);
                cmd
            }
            Runner::Wine => {
                let mut cmd = Command::new("wine");
                cmd.arg(format!("{program}.exe")).args(args).current_dir(cwd);
                cmd
            }
            Runner::Docker { image, platform } => {
                let mut cmd = Command::new("docker");
                cmd.arg("run").arg("--rm");
                if let Some(platform) = platform {
                    cmd.arg("--platform").arg(platform);
                }
                cmd.arg("-v")
                    .arg(format!("{}:/work", cwd.display()))
                    .arg("-w")
                    .arg("/work")
                    .arg(image)
                    .arg(program)
                    .args(args)
                    .current_dir(cwd);
                cmd
            }
        }
    }
}

/// One tool run.
#[derive(Clone, Debug)]
pub struct Invocation {
    phase: Phase,
    program: String,
    args: Vec<String>,
    cwd: PathBuf,
    classify: Classifier,
}

impl Invocation {
    /// Run `program` for `phase` in `cwd`.
    pub fn new(phase: Phase, program: impl Into<String>, cwd: impl Into<PathBuf>) -> Self {
        Self {
            phase,
            program: program.into(),
            args: Vec::new(),
            cwd: cwd.into(),
            classify: never_transient,
        }
    }

    /// Append one argument.
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append several arguments.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Classify failures of this run with `classify`.
    pub fn classify_with(mut self, classify: Classifier) -> Self {
        self.classify = classify;
        self
    }

    /// Command line for diagnostics.
    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Run to completion with `runner`.
    ///
    /// Returns the captured output on success. A non-zero exit becomes
    /// [`Error::Toolchain`]; failure to launch becomes [`Error::CommandFailed`].
    pub async fn run(&self, runner: &Runner) -> Result<Output> {
        log::debug!("Running [{:?}] {}", runner, self.display());

        let output = runner
            .command(&self.program, &self.args, &self.cwd)
            .output()
            .await
            .map_err(|error| Error::CommandFailed {
                command: self.program.clone(),
                error,
            })?;

        if output.status.success() {
            return Ok(output);
        }

        let failure =
            ToolchainError::from_exit(self.phase, output.status, &output.stdout, &output.stderr);
        let transient = (self.classify)(self.phase, &failure);
        log::debug!(
            "{} exited with {} (transient: {})",
            self.phase,
            output.status,
            transient
        );
        Err(Error::Toolchain(failure.transient(transient)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn always(_: Phase, _: &ToolchainError) -> bool {
        true
    }

    #[test]
    fn display_joins_arguments() {
        let inv = Invocation::new(Phase::Candle, "candle", "/tmp")
            .args(["heat.wxs", "main.wxs"])
            .arg("-arch")
            .arg("x64");
        assert_eq!(inv.display(), "candle heat.wxs main.wxs -arch x64");
    }

    #[tokio::test]
    async fn missing_program_is_not_a_toolchain_failure() {
        let dir = tempfile::tempdir().unwrap();
        let err = Invocation::new(Phase::Heat, "definitely-not-a-real-tool-4242", dir.path())
            .classify_with(always)
            .run(&Runner::Direct)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::CommandFailed { .. }));
        assert!(!err.is_transient());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn non_zero_exit_is_classified_by_the_adapter() {
        let dir = tempfile::tempdir().unwrap();
        let err = Invocation::new(Phase::Light, "sh", dir.path())
            .args(["-c", "echo boom >&2; exit 3"])
            .classify_with(always)
            .run(&Runner::Direct)
            .await
            .unwrap_err();

        let failure = err.toolchain_failure().unwrap();
        assert_eq!(failure.phase, Phase::Light);
        assert_eq!(failure.status, Some(3));
        assert_eq!(failure.raw, "boom");
        assert!(failure.transient);
        assert_eq!(err.to_string(), "light failed: boom");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn default_classifier_is_never_transient() {
        let dir = tempfile::tempdir().unwrap();
        let err = Invocation::new(Phase::Xar, "sh", dir.path())
            .args(["-c", "exit 1"])
            .run(&Runner::Direct)
            .await
            .unwrap_err();
        assert!(!err.is_transient());
    }
}
