//! Core types for xcpack-sdk.
//!
//! This module defines the fundamental types used throughout the SDK:
//!
//! - [`XcodeError`] - Error types for build, test and packaging operations
//! - [`Container`] - Project or workspace the build tool operates on
//! - [`CommandOutput`] - Captured result of an external command
//! - [`PackageReport`] - Summary of a finished IPA packaging run

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::builders::common::quote;

/// SDK identifier of the desktop platform.
///
/// Builds against this SDK do not get a `CONFIGURATION_BUILD_DIR` override.
pub const DESKTOP_SDK: &str = "macosx";

/// Error types for xcpack-sdk operations.
///
/// # Example
///
/// ```ignore
/// use xcpack_sdk::{IpaPackager, XcodeError};
///
/// match packager.package("MyApp", "iphoneos", identity, "MyApp AdHoc") {
///     Ok(ipa) => println!("IPA at {}", ipa.display()),
///     Err(XcodeError::ProvisioningProfileNotEmbedded { .. }) => {
///         eprintln!("re-signed app lost its provisioning profile");
///     }
///     Err(e) => eprintln!("Other error: {}", e),
/// }
/// ```
#[derive(Debug, thiserror::Error)]
pub enum XcodeError {
    /// Invalid builder configuration.
    ///
    /// Raised when neither or both of a project and a workspace name are
    /// supplied.
    #[error("configuration error: {0}")]
    Config(String),

    /// An external command exited unsuccessfully.
    ///
    /// `status` is `None` when the process was terminated by a signal.
    #[error("command failed with status {}: {command}", format_status(.status))]
    CommandFailed {
        command: String,
        status: Option<i32>,
    },

    /// The provisioning profile lookup produced no usable file.
    #[error("provisioning profile not found for query '{query}'{}", format_resolved(.resolved))]
    ProvisioningProfileNotFound {
        query: String,
        resolved: Option<PathBuf>,
    },

    /// The re-signed payload does not carry the provisioning profile that
    /// was embedded during packaging.
    #[error(
        "provisioning profile not embedded: {} does not match {}",
        .actual.display(),
        .expected.display()
    )]
    ProvisioningProfileNotEmbedded { expected: PathBuf, actual: PathBuf },

    /// An I/O error occurred.
    ///
    /// Common causes include an unreadable build log, a missing build
    /// directory, or a failure to spawn the shell.
    #[error("I/O error: {0}. Check file paths and permissions")]
    Io(#[from] std::io::Error),
}

fn format_status(status: &Option<i32>) -> String {
    match status {
        Some(code) => code.to_string(),
        None => "signal".to_string(),
    }
}

fn format_resolved(resolved: &Option<PathBuf>) -> String {
    match resolved {
        Some(path) => format!(" (resolved {} does not exist)", path.display()),
        None => String::new(),
    }
}

/// The Xcode container a build operates on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Container {
    /// `<name>.xcodeproj`, built by target.
    Project(String),
    /// `<name>.xcworkspace`, built by scheme.
    Workspace(String),
}

impl Container {
    /// Picks the container from optional project and workspace names.
    ///
    /// Exactly one of the two must be present.
    pub fn from_names(
        project: Option<String>,
        workspace: Option<String>,
    ) -> Result<Self, XcodeError> {
        match (project, workspace) {
            (Some(project), None) => Ok(Container::Project(project)),
            (None, Some(workspace)) => Ok(Container::Workspace(workspace)),
            (Some(_), Some(_)) => Err(XcodeError::Config(
                "a project and a workspace were both given; pass only one".to_string(),
            )),
            (None, None) => Err(XcodeError::Config(
                "either a project or a workspace name is required".to_string(),
            )),
        }
    }

    /// Returns the container flags for building `target`.
    ///
    /// Projects select a target, workspaces select a scheme.
    pub fn build_args(&self, target: &str) -> String {
        match self {
            Container::Project(name) => {
                format!("-project {}.xcodeproj -target {}", name, quote(target))
            }
            Container::Workspace(name) => {
                format!("-workspace {}.xcworkspace -scheme {}", name, quote(target))
            }
        }
    }
}

/// Captured result of an external command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code, or `None` if the process was killed by a signal.
    pub status: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    /// A successful, silent result.
    pub fn ok() -> Self {
        Self {
            status: Some(0),
            ..Self::default()
        }
    }

    /// A successful result with the given stdout.
    pub fn with_stdout(stdout: impl Into<String>) -> Self {
        Self {
            status: Some(0),
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    /// A failed result with the given exit code.
    pub fn failed(code: i32) -> Self {
        Self {
            status: Some(code),
            ..Self::default()
        }
    }

    /// Returns `true` when the command exited with status 0.
    pub fn success(&self) -> bool {
        self.status == Some(0)
    }
}

/// Summary of a finished IPA packaging run.
///
/// The CLI writes this as JSON when `--report` is given.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PackageReport {
    pub app_name: String,
    pub sdk: String,
    pub configuration: String,
    /// Path to the signed IPA.
    pub ipa_path: PathBuf,
    /// Provisioning profile that was embedded and verified.
    pub provisioning_profile: PathBuf,
    pub signing_identity: String,
}
