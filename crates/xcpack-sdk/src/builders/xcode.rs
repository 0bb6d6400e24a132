//! `xcodebuild` command assembly and execution
//!
//! This module builds the `xcodebuild` command lines for building and testing
//! a project or workspace, and runs them through a [`CommandRunner`].

use crate::builders::common::{CommandRunner, ShellRunner, quote, run_checked, run_reporting_failure};
use crate::types::{CommandOutput, Container, DESKTOP_SDK, XcodeError};
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

/// Lines containing this are dropped from the build log.
const BUILD_LOG_NOISE: &str = "setenv";

/// Destination timeout used when the caller gives none, in seconds.
pub const DEFAULT_DESTINATION_TIMEOUT: u32 = 30;

/// Xcode builder for one project or workspace and build configuration
pub struct XcodeBuilder<R = ShellRunner> {
    /// Project or workspace to build
    container: Container,
    /// Build configuration (e.g. "Release")
    configuration: String,
    /// SYMROOT of every build
    build_dir: PathBuf,
    runner: R,
}

impl XcodeBuilder<ShellRunner> {
    /// Creates a new Xcode builder
    ///
    /// # Arguments
    ///
    /// * `project` - Project name without the `.xcodeproj` extension
    /// * `workspace` - Workspace name without the `.xcworkspace` extension
    /// * `configuration` - Build configuration (e.g. "Debug", "Release")
    /// * `build_dir` - Directory receiving build products and logs
    ///
    /// Exactly one of `project` and `workspace` must be given.
    pub fn new(
        project: Option<String>,
        workspace: Option<String>,
        configuration: impl Into<String>,
        build_dir: impl Into<PathBuf>,
    ) -> Result<Self, XcodeError> {
        Ok(Self {
            container: Container::from_names(project, workspace)?,
            configuration: configuration.into(),
            build_dir: build_dir.into(),
            runner: ShellRunner::new(),
        })
    }
}

impl<R: CommandRunner> XcodeBuilder<R> {
    /// Replaces the command runner
    pub fn with_runner<R2: CommandRunner>(self, runner: R2) -> XcodeBuilder<R2> {
        XcodeBuilder {
            container: self.container,
            configuration: self.configuration,
            build_dir: self.build_dir,
            runner,
        }
    }

    pub fn container(&self) -> &Container {
        &self.container
    }

    pub fn configuration(&self) -> &str {
        &self.configuration
    }

    pub fn build_dir(&self) -> &Path {
        &self.build_dir
    }

    pub(crate) fn runner(&self) -> &R {
        &self.runner
    }

    /// `<build_dir>/<configuration>-<sdk>`, the `CONFIGURATION_BUILD_DIR` of
    /// device and simulator builds and the home of packaged `.ipa` files.
    ///
    /// Desktop builds do not pin it; see [`XcodeBuilder::build_products_dir`].
    pub fn product_dir(&self, sdk: &str) -> PathBuf {
        self.build_dir
            .join(format!("{}-{}", self.configuration, sdk))
    }

    /// Directory where `xcodebuild` leaves the products of
    /// [`XcodeBuilder::build`] against `sdk`.
    ///
    /// Without `CONFIGURATION_BUILD_DIR`, desktop builds land in Xcode's
    /// default `<build_dir>/<configuration>`.
    pub fn build_products_dir(&self, sdk: &str) -> PathBuf {
        if sdk == DESKTOP_SDK {
            self.build_dir.join(&self.configuration)
        } else {
            self.product_dir(sdk)
        }
    }

    /// Log file receiving the output of [`XcodeBuilder::build`].
    pub fn build_log_path(&self) -> PathBuf {
        self.build_dir
            .join(format!("{}-build.output", self.configuration))
    }

    /// Assembles the `clean build` command for `target` against `sdk`.
    ///
    /// Output is filtered and redirected into [`XcodeBuilder::build_log_path`].
    /// Builds for any SDK but the desktop one also pin
    /// `CONFIGURATION_BUILD_DIR` to [`XcodeBuilder::product_dir`].
    pub fn build_command(&self, target: &str, sdk: &str) -> String {
        let mut command = format!(
            "xcodebuild {} -configuration {} -sdk {} clean build SYMROOT={}",
            self.container.build_args(target),
            self.configuration,
            sdk,
            quote(&self.build_dir.display().to_string())
        );
        if sdk != DESKTOP_SDK {
            command.push_str(&format!(
                " CONFIGURATION_BUILD_DIR={}",
                quote(&self.product_dir(sdk).display().to_string())
            ));
        }
        // Under pipefail a filter that passes no line at all fails the
        // pipeline. xcodebuild always ends with its "** BUILD ... **" banner.
        command.push_str(&format!(
            " 2>&1 | grep -v {} > {} 2>&1",
            quote(BUILD_LOG_NOISE),
            quote(&self.build_log_path().display().to_string())
        ));
        command
    }

    /// Builds `target` against `sdk`.
    ///
    /// On failure the build log is copied to `out` before the error is
    /// returned. A dry-run runner leaves the filesystem untouched.
    pub fn build(&self, target: &str, sdk: &str, out: &mut dyn Write) -> Result<(), XcodeError> {
        if !self.runner.is_dry_run() {
            fs::create_dir_all(&self.build_dir)?;
        }

        let command = self.build_command(target, sdk);
        log::info!("Building {} ({} {})", target, self.configuration, sdk);
        let output = self.runner.run(&command)?;
        if output.success() {
            return Ok(());
        }

        let log_path = self.build_log_path();
        match fs::read(&log_path) {
            Ok(contents) => {
                out.write_all(&contents)?;
                out.flush()?;
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                log::warn!("Build failed without writing {}", log_path.display());
            }
            Err(e) => return Err(e.into()),
        }
        Err(XcodeError::CommandFailed {
            command,
            status: output.status,
        })
    }

    /// Assembles the `test` command for `scheme` on a simulator destination.
    ///
    /// `destination_timeout` defaults to [`DEFAULT_DESTINATION_TIMEOUT`].
    pub fn test_command(
        &self,
        scheme: &str,
        os_version: &str,
        device_name: &str,
        destination_timeout: Option<u32>,
    ) -> String {
        format!(
            "xcodebuild test -scheme {} -configuration {} -destination 'OS={},name={}' -destination-timeout {}",
            quote(scheme),
            self.configuration,
            escape_single_quoted(os_version),
            escape_single_quoted(device_name),
            destination_timeout.unwrap_or(DEFAULT_DESTINATION_TIMEOUT)
        )
    }

    /// Runs the tests of `scheme`, writing the captured output to `out` if
    /// they fail.
    pub fn test(
        &self,
        scheme: &str,
        os_version: &str,
        device_name: &str,
        destination_timeout: Option<u32>,
        out: &mut dyn Write,
    ) -> Result<CommandOutput, XcodeError> {
        let command = self.test_command(scheme, os_version, device_name, destination_timeout);
        log::info!("Testing {} on {} ({})", scheme, device_name, os_version);
        run_reporting_failure(&self.runner, &command, out)
    }

    /// Command removing and recreating the build directory.
    pub fn clean_command(&self) -> String {
        let build_dir = quote(&self.build_dir.display().to_string());
        format!("rm -rf {} && mkdir -p {}", build_dir, build_dir)
    }

    /// Removes and recreates the build directory.
    pub fn clean(&self) -> Result<(), XcodeError> {
        run_checked(&self.runner, &self.clean_command())?;
        Ok(())
    }
}

/// Escapes `value` for use inside a single-quoted shell word.
fn escape_single_quoted(value: &str) -> String {
    value.replace('\'', "'\\''")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builders::common::testing::RecordingRunner;

    fn project_builder() -> XcodeBuilder {
        XcodeBuilder::new(Some("MyApp".into()), None, "Release", "/tmp/build").unwrap()
    }

    #[test]
    fn test_new_requires_project_or_workspace() {
        let result = XcodeBuilder::new(None, None, "Release", "/tmp/build");
        assert!(matches!(result, Err(XcodeError::Config(_))));
    }

    #[test]
    fn test_new_rejects_project_and_workspace() {
        let result = XcodeBuilder::new(
            Some("MyApp".into()),
            Some("MyApp".into()),
            "Release",
            "/tmp/build",
        );
        assert!(matches!(result, Err(XcodeError::Config(_))));
    }

    #[test]
    fn test_project_build_command() {
        let builder = project_builder();
        assert_eq!(
            builder.build_command("MyApp", "iphoneos"),
            "xcodebuild -project MyApp.xcodeproj -target \"MyApp\" -configuration Release \
             -sdk iphoneos clean build SYMROOT=\"/tmp/build\" \
             CONFIGURATION_BUILD_DIR=\"/tmp/build/Release-iphoneos\" \
             2>&1 | grep -v \"setenv\" > \"/tmp/build/Release-build.output\" 2>&1"
        );
    }

    #[test]
    fn test_workspace_build_command() {
        let builder =
            XcodeBuilder::new(None, Some("MyApp".into()), "Debug", "/tmp/build").unwrap();
        assert_eq!(
            builder.build_command("MyApp", "iphonesimulator"),
            "xcodebuild -workspace MyApp.xcworkspace -scheme \"MyApp\" -configuration Debug \
             -sdk iphonesimulator clean build SYMROOT=\"/tmp/build\" \
             CONFIGURATION_BUILD_DIR=\"/tmp/build/Debug-iphonesimulator\" \
             2>&1 | grep -v \"setenv\" > \"/tmp/build/Debug-build.output\" 2>&1"
        );
    }

    #[test]
    fn test_desktop_build_command_keeps_default_product_dir() {
        let builder = project_builder();
        let command = builder.build_command("MyMacApp", "macosx");
        assert_eq!(
            command,
            "xcodebuild -project MyApp.xcodeproj -target \"MyMacApp\" -configuration Release \
             -sdk macosx clean build SYMROOT=\"/tmp/build\" \
             2>&1 | grep -v \"setenv\" > \"/tmp/build/Release-build.output\" 2>&1"
        );
        assert!(!command.contains("CONFIGURATION_BUILD_DIR"));
    }

    #[test]
    fn test_test_command_uses_default_timeout() {
        let builder = project_builder();
        assert_eq!(
            builder.test_command("MyApp", "17.0", "iPhone 15", None),
            "xcodebuild test -scheme \"MyApp\" -configuration Release \
             -destination 'OS=17.0,name=iPhone 15' -destination-timeout 30"
        );
    }

    #[test]
    fn test_test_command_explicit_timeout() {
        let builder = project_builder();
        let command = builder.test_command("MyApp", "16.4", "iPad Air", Some(120));
        assert!(command.ends_with("-destination-timeout 120"));
    }

    #[test]
    fn test_test_command_escapes_apostrophes() {
        let builder = project_builder();
        assert_eq!(
            builder.test_command("MyApp", "17.0", "Jo's iPhone", None),
            "xcodebuild test -scheme \"MyApp\" -configuration Release \
             -destination 'OS=17.0,name=Jo'\\''s iPhone' -destination-timeout 30"
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_test_command_destination_survives_the_shell() {
        let builder = project_builder();
        let command = builder.test_command("MyApp", "17.0", "Jo's iPhone", None);
        let destination = command
            .split("-destination ")
            .nth(1)
            .and_then(|rest| rest.strip_suffix(" -destination-timeout 30"))
            .unwrap();

        let output = ShellRunner::new()
            .run(&format!("printf '%s' {}", destination))
            .unwrap();
        assert!(output.success());
        assert_eq!(output.stdout, "OS=17.0,name=Jo's iPhone");
    }

    #[test]
    fn test_dry_run_build_leaves_filesystem_untouched() {
        let temp = tempfile::tempdir().unwrap();
        let build_dir = temp.path().join("never-created");
        let builder = XcodeBuilder::new(Some("MyApp".into()), None, "Release", &build_dir)
            .unwrap()
            .with_runner(ShellRunner::new().dry_run(true));

        let mut out = Vec::new();
        builder.build("MyApp", "iphoneos", &mut out).unwrap();
        assert!(!build_dir.exists());
        assert!(out.is_empty());
    }

    #[test]
    fn test_build_creates_build_dir_for_log() {
        let temp = tempfile::tempdir().unwrap();
        let build_dir = temp.path().join("fresh");
        let runner = RecordingRunner::new();
        let builder = XcodeBuilder::new(Some("MyApp".into()), None, "Release", &build_dir)
            .unwrap()
            .with_runner(&runner);

        builder.build("MyApp", "iphoneos", &mut Vec::new()).unwrap();
        assert!(build_dir.is_dir());
    }

    #[cfg(unix)]
    #[test]
    fn test_build_log_filter_keeps_builder_status() {
        let temp = tempfile::tempdir().unwrap();
        let log = quote(&temp.path().join("build.output").display().to_string());
        let runner = ShellRunner::new();

        let passed = runner
            .run(&format!(
                "printf 'setenv PATH\\n** BUILD SUCCEEDED **\\n' 2>&1 | grep -v \"setenv\" > {} 2>&1",
                log
            ))
            .unwrap();
        assert!(passed.success());
        let written = fs::read_to_string(temp.path().join("build.output")).unwrap();
        assert_eq!(written, "** BUILD SUCCEEDED **\n");

        let failed = runner
            .run(&format!(
                "{{ echo '** BUILD FAILED **'; exit 65; }} 2>&1 | grep -v \"setenv\" > {} 2>&1",
                log
            ))
            .unwrap();
        assert_eq!(failed.status, Some(65));
    }

    #[test]
    fn test_failing_build_writes_log_to_output() {
        let temp = tempfile::tempdir().unwrap();
        let runner = RecordingRunner::new();
        runner.respond("xcodebuild", CommandOutput::failed(65));
        let builder = XcodeBuilder::new(Some("MyApp".into()), None, "Release", temp.path())
            .unwrap()
            .with_runner(&runner);
        fs::write(
            builder.build_log_path(),
            "error: no such module 'Foo'\n** BUILD FAILED **\n",
        )
        .unwrap();

        let mut out = Vec::new();
        let err = builder.build("MyApp", "iphoneos", &mut out).unwrap_err();

        assert!(matches!(
            err,
            XcodeError::CommandFailed { status: Some(65), .. }
        ));
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "error: no such module 'Foo'\n** BUILD FAILED **\n"
        );
        assert_eq!(
            runner.commands(),
            vec![builder.build_command("MyApp", "iphoneos")]
        );
    }

    #[test]
    fn test_successful_build_writes_nothing() {
        let temp = tempfile::tempdir().unwrap();
        let runner = RecordingRunner::new();
        let builder = XcodeBuilder::new(None, Some("MyApp".into()), "Debug", temp.path())
            .unwrap()
            .with_runner(&runner);

        let mut out = Vec::new();
        builder.build("MyApp", "macosx", &mut out).unwrap();
        assert!(out.is_empty());
        assert_eq!(runner.commands().len(), 1);
    }

    #[test]
    fn test_test_returns_runner_result_unchanged() {
        let runner = RecordingRunner::new();
        runner.respond("xcodebuild test", CommandOutput::with_stdout("** TEST SUCCEEDED **\n"));
        let builder = project_builder().with_runner(&runner);

        let mut out = Vec::new();
        let output = builder
            .test("MyApp", "17.0", "iPhone 15", None, &mut out)
            .unwrap();
        assert_eq!(output.stdout, "** TEST SUCCEEDED **\n");
        assert!(out.is_empty());
    }

    #[test]
    fn test_clean_command() {
        let builder = project_builder();
        assert_eq!(
            builder.clean_command(),
            "rm -rf \"/tmp/build\" && mkdir -p \"/tmp/build\""
        );
    }

    #[test]
    fn test_desktop_products_use_xcode_default_dir() {
        let builder = project_builder();
        assert_eq!(
            builder.build_products_dir("macosx"),
            PathBuf::from("/tmp/build/Release")
        );
        assert_eq!(
            builder.build_products_dir("iphoneos"),
            builder.product_dir("iphoneos")
        );
    }

    #[test]
    fn test_product_dir_and_log_path() {
        let builder = project_builder();
        assert_eq!(
            builder.product_dir("iphoneos"),
            PathBuf::from("/tmp/build/Release-iphoneos")
        );
        assert_eq!(
            builder.build_log_path(),
            PathBuf::from("/tmp/build/Release-build.output")
        );
    }
}
