//! Signed IPA packaging
//!
//! [`IpaPackager`] drives the fixed sequence that turns an Xcode target into
//! a re-signed `.ipa`:
//!
//! 1. Kill simulator, debugger and test-runner processes
//! 2. Clean the build directory
//! 3. Build the target
//! 4. Resolve the provisioning profile
//! 5. Package the `.app` into an `.ipa` with the profile embedded
//! 6. Unzip the `.ipa`
//! 7. Re-sign the extracted `.app`
//! 8. Zip the payload back into the same `.ipa`
//! 9. Check the re-signed payload still embeds the resolved profile
//!
//! Each external step fails with [`XcodeError::CommandFailed`]; nothing is
//! retried.

use crate::builders::common::{CommandRunner, ShellRunner, quote, run_checked};
use crate::builders::xcode::XcodeBuilder;
use crate::types::{PackageReport, XcodeError};
use std::env;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

/// Processes that hold on to build products between runs.
const STALE_PROCESSES: [&str; 3] = ["Simulator", "lldb", "xctest"];

/// Name of the provisioning profile inside an `.app` bundle.
const EMBEDDED_PROFILE: &str = "embedded.mobileprovision";

/// Default location of installed provisioning profiles, relative to `$HOME`.
const PROFILES_SUBDIR: &str = "Library/MobileDevice/Provisioning Profiles";

/// Packages Xcode targets as signed IPA archives
pub struct IpaPackager<R = ShellRunner> {
    builder: XcodeBuilder<R>,
    /// Directory searched for `.mobileprovision` files
    profiles_dir: PathBuf,
}

impl<R: CommandRunner> IpaPackager<R> {
    /// Creates a packager on top of `builder`, searching the user's
    /// installed provisioning profiles.
    pub fn new(builder: XcodeBuilder<R>) -> Self {
        let home = env::var_os("HOME").map(PathBuf::from).unwrap_or_default();
        Self {
            builder,
            profiles_dir: home.join(PROFILES_SUBDIR),
        }
    }

    /// Overrides the directory searched for provisioning profiles
    pub fn profiles_dir(mut self, profiles_dir: impl Into<PathBuf>) -> Self {
        self.profiles_dir = profiles_dir.into();
        self
    }

    pub fn builder(&self) -> &XcodeBuilder<R> {
        &self.builder
    }

    /// Path of the `.ipa` produced for `app_name` against `sdk`.
    pub fn ipa_path(&self, app_name: &str, sdk: &str) -> PathBuf {
        self.builder
            .product_dir(sdk)
            .join(format!("{}.ipa", app_name))
    }

    fn app_path(&self, app_name: &str, sdk: &str) -> PathBuf {
        self.builder
            .product_dir(sdk)
            .join(format!("{}.app", app_name))
    }

    fn payload_app_path(&self, app_name: &str, sdk: &str) -> PathBuf {
        self.builder
            .product_dir(sdk)
            .join("Payload")
            .join(format!("{}.app", app_name))
    }

    pub fn kill_command(&self) -> String {
        let names: Vec<String> = STALE_PROCESSES.iter().map(|name| quote(name)).collect();
        format!("killall -9 {}", names.join(" "))
    }

    /// Lists the first installed profile whose contents mention `query`.
    pub fn profile_lookup_command(&self, query: &str) -> String {
        format!(
            "grep -lF {} {}/*.mobileprovision | head -n 1",
            quote(query),
            quote(&self.profiles_dir.display().to_string())
        )
    }

    pub fn package_command(&self, app_name: &str, sdk: &str, profile: &Path) -> String {
        format!(
            "xcrun -sdk {} PackageApplication -v {} -o {} --embed {}",
            sdk,
            quote(&self.app_path(app_name, sdk).display().to_string()),
            quote(&self.ipa_path(app_name, sdk).display().to_string()),
            quote(&profile.display().to_string())
        )
    }

    pub fn unzip_command(&self, app_name: &str, sdk: &str) -> String {
        format!(
            "unzip -o -q {} -d {}",
            quote(&self.ipa_path(app_name, sdk).display().to_string()),
            quote(&self.builder.product_dir(sdk).display().to_string())
        )
    }

    pub fn resign_command(&self, app_name: &str, sdk: &str, identity: &str) -> String {
        format!(
            "codesign --force --sign {} --preserve-metadata=identifier,entitlements {}",
            quote(identity),
            quote(&self.payload_app_path(app_name, sdk).display().to_string())
        )
    }

    pub fn rezip_command(&self, app_name: &str, sdk: &str) -> String {
        format!(
            "cd {} && zip -qr {} Payload",
            quote(&self.builder.product_dir(sdk).display().to_string()),
            quote(&format!("{}.ipa", app_name))
        )
    }

    /// The command lines [`IpaPackager::package`] runs, in order.
    ///
    /// The profile is not resolved; `profile` stands in for the lookup
    /// result in the packaging step.
    pub fn planned_commands(
        &self,
        app_name: &str,
        sdk: &str,
        identity: &str,
        profile_query: &str,
        profile: &Path,
    ) -> Vec<String> {
        vec![
            self.kill_command(),
            self.builder.clean_command(),
            self.builder.build_command(app_name, sdk),
            self.profile_lookup_command(profile_query),
            self.package_command(app_name, sdk, profile),
            self.unzip_command(app_name, sdk),
            self.resign_command(app_name, sdk, identity),
            self.rezip_command(app_name, sdk),
        ]
    }

    /// Resolves `query` to an installed provisioning profile.
    ///
    /// The lookup's exit status is ignored: `grep` reports "no match" as a
    /// failure, and an empty result is reported as
    /// [`XcodeError::ProvisioningProfileNotFound`] instead.
    pub fn resolve_profile(&self, query: &str) -> Result<PathBuf, XcodeError> {
        let output = self
            .builder
            .runner()
            .run(&self.profile_lookup_command(query))?;

        let resolved = output
            .stdout
            .lines()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .map(PathBuf::from);

        match resolved {
            Some(path) if path.is_file() => Ok(path),
            resolved => Err(XcodeError::ProvisioningProfileNotFound {
                query: query.to_string(),
                resolved,
            }),
        }
    }

    /// Builds, packages and re-signs `app_name` against `sdk`, returning the
    /// path of the signed `.ipa`.
    ///
    /// # Arguments
    ///
    /// * `app_name` - Target (or scheme) name; also the `.app` and `.ipa` name
    /// * `sdk` - SDK identifier (e.g. "iphoneos")
    /// * `identity` - Code signing identity used to re-sign the payload
    /// * `profile_query` - Text identifying the provisioning profile
    /// * `out` - Receives the build log if the build fails
    ///
    /// # Example
    ///
    /// ```no_run
    /// use xcpack_sdk::builders::{IpaPackager, XcodeBuilder};
    ///
    /// let builder = XcodeBuilder::new(Some("MyApp".into()), None, "Release", "build")?;
    /// let ipa = IpaPackager::new(builder).package(
    ///     "MyApp",
    ///     "iphoneos",
    ///     "iPhone Distribution: Example Corp",
    ///     "MyApp AdHoc",
    ///     &mut std::io::stderr(),
    /// )?;
    /// println!("IPA created at: {:?}", ipa);
    /// # Ok::<(), xcpack_sdk::XcodeError>(())
    /// ```
    pub fn package(
        &self,
        app_name: &str,
        sdk: &str,
        identity: &str,
        profile_query: &str,
        out: &mut dyn Write,
    ) -> Result<PathBuf, XcodeError> {
        self.package_with_report(app_name, sdk, identity, profile_query, out)
            .map(|report| report.ipa_path)
    }

    /// Same as [`IpaPackager::package`], returning the full [`PackageReport`].
    pub fn package_with_report(
        &self,
        app_name: &str,
        sdk: &str,
        identity: &str,
        profile_query: &str,
        out: &mut dyn Write,
    ) -> Result<PackageReport, XcodeError> {
        let runner = self.builder.runner();

        let kill = runner.run(&self.kill_command())?;
        if !kill.success() {
            log::debug!("No stale simulator, debugger or test processes to kill");
        }

        log::info!("Cleaning {}", self.builder.build_dir().display());
        self.builder.clean()?;

        self.builder.build(app_name, sdk, out)?;

        let profile = self.resolve_profile(profile_query)?;
        log::info!("Using provisioning profile {}", profile.display());

        log::info!("Packaging {}.app", app_name);
        run_checked(runner, &self.package_command(app_name, sdk, &profile))?;
        run_checked(runner, &self.unzip_command(app_name, sdk))?;

        log::info!("Re-signing {}.app with {}", app_name, identity);
        run_checked(runner, &self.resign_command(app_name, sdk, identity))?;
        run_checked(runner, &self.rezip_command(app_name, sdk))?;

        let embedded = self.payload_app_path(app_name, sdk).join(EMBEDDED_PROFILE);
        verify_embedded_profile(&profile, &embedded)?;

        let ipa_path = self.ipa_path(app_name, sdk);
        log::info!("IPA created: {}", ipa_path.display());
        Ok(PackageReport {
            app_name: app_name.to_string(),
            sdk: sdk.to_string(),
            configuration: self.builder.configuration().to_string(),
            ipa_path,
            provisioning_profile: profile,
            signing_identity: identity.to_string(),
        })
    }
}

/// Checks that `embedded` holds the same bytes as `expected`.
///
/// A missing `embedded` file counts as a mismatch.
pub fn verify_embedded_profile(expected: &Path, embedded: &Path) -> Result<(), XcodeError> {
    let expected_bytes = fs::read(expected)?;
    let embedded_bytes = match fs::read(embedded) {
        Ok(bytes) => Some(bytes),
        Err(e) if e.kind() == ErrorKind::NotFound => None,
        Err(e) => return Err(e.into()),
    };

    if embedded_bytes.as_deref() != Some(expected_bytes.as_slice()) {
        return Err(XcodeError::ProvisioningProfileNotEmbedded {
            expected: expected.to_path_buf(),
            actual: embedded.to_path_buf(),
        });
    }
    Ok(())
}
