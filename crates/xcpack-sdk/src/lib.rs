//! Xcode automation SDK for Rust
//!
//! `xcpack-sdk` assembles command lines for Apple's `xcodebuild`, `xcrun`,
//! `codesign`, `zip`/`unzip` and `killall`, runs them, and checks the
//! results. It covers three jobs:
//!
//! - **Build** a project target or workspace scheme against an SDK
//! - **Test** a scheme on a simulator destination
//! - **Package** a target as an `.ipa`, re-sign it, and verify that the
//!   provisioning profile survived
//!
//! # Example
//!
//! ```no_run
//! use xcpack_sdk::{IpaPackager, XcodeBuilder};
//!
//! fn main() -> Result<(), xcpack_sdk::XcodeError> {
//!     let builder = XcodeBuilder::new(Some("MyApp".into()), None, "Release", "build")?;
//!
//!     let mut log = std::io::stderr();
//!     builder.test("MyApp", "17.0", "iPhone 15", None, &mut log)?;
//!
//!     let ipa = IpaPackager::new(builder).package(
//!         "MyApp",
//!         "iphoneos",
//!         "iPhone Distribution: Example Corp",
//!         "MyApp AdHoc",
//!         &mut log,
//!     )?;
//!     println!("IPA: {}", ipa.display());
//!     Ok(())
//! }
//! ```

// Public modules
pub mod builders;
pub mod types;

// Re-export key types for convenience
pub use builders::{CommandRunner, IpaPackager, ShellRunner, XcodeBuilder};
pub use types::{CommandOutput, Container, DESKTOP_SDK, PackageReport, XcodeError};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_is_set() {
        assert!(!VERSION.is_empty());
    }
}
