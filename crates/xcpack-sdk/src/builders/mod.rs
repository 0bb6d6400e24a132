//! Build, test and packaging automation around Xcode's command-line tools.
//!
//! ## Overview
//!
//! Every operation is a shell command line assembled from structured
//! parameters and handed to a [`CommandRunner`]:
//!
//! 1. **Building** - `xcodebuild clean build` for a project target or a workspace scheme
//! 2. **Testing** - `xcodebuild test` against a simulator destination
//! 3. **Packaging** - `xcrun PackageApplication`, then `unzip`, `codesign` and `zip`
//!
//! ## Builders
//!
//! | Type | Purpose | Output |
//! |------|---------|--------|
//! | [`XcodeBuilder`] | Build and test | `.app` under `<build_dir>/<configuration>-<sdk>` |
//! | [`IpaPackager`] | Clean, build, package, re-sign | Signed `.ipa` |
//!
//! ## Example
//!
//! ```ignore
//! use xcpack_sdk::builders::{IpaPackager, ShellRunner, XcodeBuilder};
//!
//! let builder = XcodeBuilder::new(None, Some("MyApp".into()), "Release", "build")?
//!     .with_runner(ShellRunner::new().dry_run(true)); // Preview only
//!
//! println!("{}", builder.build_command("MyApp", "iphoneos"));
//!
//! let ipa = IpaPackager::new(builder)
//!     .package("MyApp", "iphoneos", "iPhone Distribution: Example", "MyApp AdHoc", &mut std::io::stderr())?;
//! # Ok::<(), xcpack_sdk::XcodeError>(())
//! ```

pub mod common;
pub mod ipa;
pub mod xcode;

pub use common::{CommandRunner, ShellRunner, quote, run_checked, run_reporting_failure};
pub use ipa::{IpaPackager, verify_embedded_profile};
pub use xcode::{DEFAULT_DESTINATION_TIMEOUT, XcodeBuilder};
