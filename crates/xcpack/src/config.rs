//! Configuration file support for xcpack.
//!
//! This module provides support for `xcpack.toml` configuration files that
//! hold project settings, so they don't have to be repeated on every command.
//!
//! ## Example Configuration
//!
//! ```toml
//! [project]
//! project = "MyApp"
//! configuration = "Release"
//! build_dir = "build"
//!
//! [signing]
//! identity = "iPhone Distribution: Example Corp"
//! profile = "MyApp AdHoc"
//!
//! [test]
//! scheme = "MyApp"
//! os_version = "17.0"
//! device_name = "iPhone 15"
//! destination_timeout = 30
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// The default configuration file name.
pub const CONFIG_FILE_NAME: &str = "xcpack.toml";

/// Build configuration used when neither CLI nor config names one.
pub const DEFAULT_CONFIGURATION: &str = "Release";

/// Build directory used when neither CLI nor config names one.
pub const DEFAULT_BUILD_DIR: &str = "build";

/// Root configuration structure for `xcpack.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct XcpackConfig {
    /// Project or workspace and build layout.
    pub project: ProjectConfig,

    /// Code signing settings for `package-ipa`.
    pub signing: SigningConfig,

    /// Simulator destination for `test`.
    pub test: TestConfig,
}

/// Project-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectConfig {
    /// Project name, without `.xcodeproj`.
    ///
    /// Mutually exclusive with `workspace`.
    pub project: Option<String>,

    /// Workspace name, without `.xcworkspace`.
    pub workspace: Option<String>,

    /// Build configuration.
    ///
    /// Defaults to "Release".
    pub configuration: String,

    /// Directory receiving build products and logs.
    ///
    /// Defaults to `build/`.
    pub build_dir: PathBuf,
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            project: None,
            workspace: None,
            configuration: DEFAULT_CONFIGURATION.to_string(),
            build_dir: PathBuf::from(DEFAULT_BUILD_DIR),
        }
    }
}

/// Code signing configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SigningConfig {
    /// Signing identity used to re-sign the payload.
    ///
    /// `XCPACK_SIGNING_IDENTITY` takes precedence when set.
    pub identity: Option<String>,

    /// Text identifying the provisioning profile (its name or UUID).
    pub profile: Option<String>,

    /// Where provisioning profiles are installed.
    ///
    /// Defaults to `~/Library/MobileDevice/Provisioning Profiles`.
    pub profiles_dir: Option<String>,
}

/// Test destination configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TestConfig {
    pub scheme: Option<String>,
    pub os_version: Option<String>,
    pub device_name: Option<String>,
    /// Seconds to wait for the destination; `xcodebuild` gets 30 if unset.
    pub destination_timeout: Option<u32>,
}

impl XcpackConfig {
    /// Loads configuration from the specified file path.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        let config: XcpackConfig = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;

        Ok(config)
    }

    /// Attempts to find and load configuration from the current directory
    /// or any parent directory.
    pub fn discover() -> Result<Option<(Self, PathBuf)>> {
        let cwd = std::env::current_dir().context("Failed to get current directory")?;
        Self::discover_from(&cwd)
    }

    /// Attempts to find and load configuration starting from the specified directory.
    ///
    /// # Returns
    ///
    /// * `Ok(Some((config, path)))` - Found and loaded configuration with its path
    /// * `Ok(None)` - No configuration file found
    /// * `Err` - If a config file was found but couldn't be parsed
    pub fn discover_from(start_dir: &Path) -> Result<Option<(Self, PathBuf)>> {
        let mut current = start_dir.to_path_buf();

        loop {
            let config_path = current.join(CONFIG_FILE_NAME);

            if config_path.is_file() {
                let config = Self::load_from_file(&config_path)?;
                return Ok(Some((config, config_path)));
            }

            // Stop at repository root or filesystem root
            if current.join(".git").exists() || !current.pop() {
                break;
            }
        }

        Ok(None)
    }

    /// Generates a starter configuration file as a formatted TOML string.
    ///
    /// `container` is `("project", name)` or `("workspace", name)`.
    pub fn generate_starter_toml(container: (&str, &str)) -> String {
        let (kind, name) = container;
        format!(
            r#"# xcpack configuration file
# CLI flags override these settings when provided.

[project]
# Xcode project (without .xcodeproj) or workspace (without .xcworkspace); set exactly one
{kind} = "{name}"

# Build configuration (default: Release)
configuration = "{configuration}"

# Directory for build products and logs (default: build)
build_dir = "{build_dir}"

[signing]
# Identity used to re-sign the IPA payload (XCPACK_SIGNING_IDENTITY overrides it)
# identity = "iPhone Distribution: Your Company (TEAMID)"

# Provisioning profile name or UUID to embed
# profile = "{name} AdHoc"

# Where provisioning profiles are installed (default shown)
# profiles_dir = "~/Library/MobileDevice/Provisioning Profiles"

[test]
scheme = "{name}"
# os_version = "17.0"
# device_name = "iPhone 15"

# Seconds to wait for the simulator destination (default: 30)
# destination_timeout = 30
"#,
            kind = kind,
            name = name,
            configuration = DEFAULT_CONFIGURATION,
            build_dir = DEFAULT_BUILD_DIR,
        )
    }
}

/// Configuration resolver that merges config file values with CLI arguments.
///
/// CLI arguments always take precedence over config file values.
#[derive(Debug, Default)]
pub struct ConfigResolver {
    /// Loaded configuration, if any.
    pub config: Option<XcpackConfig>,

    /// Path to the loaded config file, if any.
    pub config_path: Option<PathBuf>,
}

impl ConfigResolver {
    /// Creates a resolver from an explicit config file, or by discovery when
    /// `explicit` is `None`.
    pub fn new(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Ok(Self {
                config: Some(XcpackConfig::load_from_file(path)?),
                config_path: Some(path.to_path_buf()),
            });
        }

        match XcpackConfig::discover()? {
            Some((config, path)) => Ok(Self {
                config: Some(config),
                config_path: Some(path),
            }),
            None => Ok(Self::default()),
        }
    }

    /// Directory holding the loaded config file, if any.
    pub fn config_dir(&self) -> Option<&Path> {
        self.config_path.as_deref().and_then(Path::parent)
    }

    /// Resolves the project/workspace pair.
    ///
    /// Names given on the command line replace the configured container as
    /// a whole, so a CLI `--workspace` never combines with a configured
    /// `project`.
    pub fn container(
        &self,
        project: Option<String>,
        workspace: Option<String>,
    ) -> (Option<String>, Option<String>) {
        if project.is_some() || workspace.is_some() {
            return (project, workspace);
        }
        match &self.config {
            Some(config) => (
                config.project.project.clone(),
                config.project.workspace.clone(),
            ),
            None => (None, None),
        }
    }

    pub fn configuration(&self, cli_value: Option<String>) -> String {
        self.resolve(
            cli_value,
            |c| Some(c.project.configuration.clone()),
            DEFAULT_CONFIGURATION.to_string(),
        )
    }

    pub fn build_dir(&self, cli_value: Option<PathBuf>) -> PathBuf {
        self.resolve(
            cli_value,
            |c| Some(c.project.build_dir.clone()),
            PathBuf::from(DEFAULT_BUILD_DIR),
        )
    }

    /// Returns the signing configuration.
    pub fn signing(&self) -> SigningConfig {
        self.config
            .as_ref()
            .map(|c| c.signing.clone())
            .unwrap_or_default()
    }

    /// Returns the test configuration.
    pub fn test(&self) -> TestConfig {
        self.config
            .as_ref()
            .map(|c| c.test.clone())
            .unwrap_or_default()
    }

    /// Resolves a CLI value, using config as fallback.
    ///
    /// # Returns
    ///
    /// The resolved value, preferring CLI over config over default.
    pub fn resolve<T, F>(&self, cli_value: Option<T>, config_getter: F, default: T) -> T
    where
        F: FnOnce(&XcpackConfig) -> Option<T>,
    {
        cli_value
            .or_else(|| self.config.as_ref().and_then(config_getter))
            .unwrap_or(default)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = XcpackConfig::default();
        assert_eq!(config.project.configuration, "Release");
        assert_eq!(config.project.build_dir, PathBuf::from("build"));
        assert!(config.project.project.is_none());
        assert!(config.signing.identity.is_none());
        assert!(config.test.destination_timeout.is_none());
    }

    #[test]
    fn test_load_from_file() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("xcpack.toml");

        std::fs::write(
            &config_path,
            r#"
[project]
workspace = "MyApp"
configuration = "Debug"
build_dir = "out"

[signing]
identity = "Apple Development: Jo"
profile = "MyApp Dev"

[test]
scheme = "MyAppTests"
os_version = "16.4"
device_name = "iPhone 14"
destination_timeout = 90
"#,
        )
        .unwrap();

        let config = XcpackConfig::load_from_file(&config_path).unwrap();

        assert_eq!(config.project.workspace, Some("MyApp".to_string()));
        assert!(config.project.project.is_none());
        assert_eq!(config.project.configuration, "Debug");
        assert_eq!(config.project.build_dir, PathBuf::from("out"));
        assert_eq!(config.signing.identity.as_deref(), Some("Apple Development: Jo"));
        assert_eq!(config.signing.profile.as_deref(), Some("MyApp Dev"));
        assert_eq!(config.test.scheme.as_deref(), Some("MyAppTests"));
        assert_eq!(config.test.destination_timeout, Some(90));
    }

    #[test]
    fn test_load_partial_file_keeps_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("xcpack.toml");
        std::fs::write(&config_path, "[project]\nproject = \"MyApp\"\n").unwrap();

        let config = XcpackConfig::load_from_file(&config_path).unwrap();
        assert_eq!(config.project.project.as_deref(), Some("MyApp"));
        assert_eq!(config.project.configuration, "Release");
        assert_eq!(config.project.build_dir, PathBuf::from("build"));
    }

    #[test]
    fn test_load_invalid_file() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("xcpack.toml");
        std::fs::write(&config_path, "[project\n").unwrap();

        let err = XcpackConfig::load_from_file(&config_path).unwrap_err();
        assert!(err.to_string().contains("Failed to parse config file"));
    }

    #[test]
    fn test_discover_config_from_subdirectory() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("xcpack.toml");
        std::fs::write(&config_path, "[project]\nproject = \"Found\"\n").unwrap();
        let nested = temp_dir.path().join("Sources/App");
        std::fs::create_dir_all(&nested).unwrap();

        let (config, path) = XcpackConfig::discover_from(&nested).unwrap().unwrap();
        assert_eq!(config.project.project.as_deref(), Some("Found"));
        assert_eq!(path, config_path);
    }

    #[test]
    fn test_discover_no_config() {
        let temp_dir = TempDir::new().unwrap();
        // Create a .git directory to stop the search
        std::fs::create_dir(temp_dir.path().join(".git")).unwrap();

        let result = XcpackConfig::discover_from(temp_dir.path()).unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn test_generate_starter_toml_parses() {
        let toml_text = XcpackConfig::generate_starter_toml(("workspace", "MyApp"));
        assert!(toml_text.contains("workspace = \"MyApp\""));

        let config: XcpackConfig = toml::from_str(&toml_text).unwrap();
        assert_eq!(config.project.workspace.as_deref(), Some("MyApp"));
        assert!(config.project.project.is_none());
        assert_eq!(config.test.scheme.as_deref(), Some("MyApp"));
    }

    fn resolver_with(config: XcpackConfig) -> ConfigResolver {
        ConfigResolver {
            config: Some(config),
            config_path: None,
        }
    }

    #[test]
    fn test_resolver_cli_container_replaces_config() {
        let mut config = XcpackConfig::default();
        config.project.project = Some("FromConfig".into());
        let resolver = resolver_with(config);

        assert_eq!(
            resolver.container(None, Some("Cli".into())),
            (None, Some("Cli".to_string()))
        );
        assert_eq!(
            resolver.container(None, None),
            (Some("FromConfig".to_string()), None)
        );
    }

    #[test]
    fn test_resolver_prefers_cli_then_config_then_default() {
        let mut config = XcpackConfig::default();
        config.project.configuration = "Debug".into();
        let resolver = resolver_with(config);

        assert_eq!(resolver.configuration(Some("Beta".into())), "Beta");
        assert_eq!(resolver.configuration(None), "Debug");
        assert_eq!(ConfigResolver::default().configuration(None), "Release");
        assert_eq!(ConfigResolver::default().build_dir(None), PathBuf::from("build"));
    }
}
