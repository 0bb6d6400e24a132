//! # xcpack
//!
//! Command-line tool for building, testing and packaging Xcode projects into
//! signed IPA archives.
//!
//! ## Overview
//!
//! `xcpack` is the CLI on top of [`xcpack_sdk`]. It resolves settings from
//! flags and `xcpack.toml`, then hands them to the SDK builders:
//!
//! - **Building** - `xcodebuild clean build` with a filtered log file
//! - **Testing** - `xcodebuild test` on a simulator destination
//! - **Packaging** - build, package, re-sign and verify a signed `.ipa`
//!
//! ## Quick Start
//!
//! ```bash
//! # Write a starter config
//! xcpack init --project MyApp
//!
//! # Build for device
//! xcpack build --target MyApp --sdk iphoneos
//!
//! # Run the tests on a simulator
//! xcpack test --scheme MyApp --os-version 17.0 --device-name "iPhone 15"
//!
//! # Produce a signed IPA
//! xcpack package-ipa --app MyApp --identity "iPhone Distribution: Example" --profile "MyApp AdHoc"
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `init` | Write a starter `xcpack.toml` |
//! | `build` | Clean and build a target or scheme |
//! | `test` | Run a scheme's tests on a simulator |
//! | `package-ipa` | Build and package a signed IPA |
//! | `print-command` | Print an assembled command line without running it |
//!
//! ## CLI Flags
//!
//! Global flags available on all commands:
//!
//! - **`--dry-run`** - Log every command instead of running it
//! - **`--verbose` / `-v`** - Log every command line as it runs
//! - **`--config`** - Use this config file instead of discovering `xcpack.toml`
//!
//! `RUST_LOG` overrides the log filter chosen by `--verbose`.

use anyhow::{Context, Result, anyhow, bail};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use std::env;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use xcpack_sdk::{CommandRunner, IpaPackager, PackageReport, ShellRunner, XcodeBuilder};

pub mod config;

use config::{CONFIG_FILE_NAME, ConfigResolver, XcpackConfig};

/// Stands in for the lookup result when printing a dry-run plan.
const RESOLVED_PROFILE_PLACEHOLDER: &str = "<resolved profile>";

/// Environment variable overriding the configured signing identity.
const SIGNING_IDENTITY_ENV: &str = "XCPACK_SIGNING_IDENTITY";

/// CLI for building, testing and packaging Xcode projects.
#[derive(Parser, Debug)]
#[command(name = "xcpack", author, version, about = "Build, test and package Xcode projects into signed IPAs", long_about = None)]
struct Cli {
    /// Print what would be run without actually running it
    #[arg(long, global = true)]
    dry_run: bool,

    /// Print verbose output including all commands
    #[arg(long, short = 'v', global = true)]
    verbose: bool,

    /// Path to the config file (default: discover xcpack.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Scaffold a starter xcpack.toml.
    Init {
        #[arg(long, default_value = CONFIG_FILE_NAME)]
        output: PathBuf,
        #[arg(long, conflicts_with = "workspace", required_unless_present = "workspace")]
        project: Option<String>,
        #[arg(long)]
        workspace: Option<String>,
    },
    /// Clean and build a target (project) or scheme (workspace).
    Build {
        #[arg(long, help = "Target or scheme to build")]
        target: String,
        #[arg(long, default_value = "iphoneos")]
        sdk: String,
        #[command(flatten)]
        container: ContainerArgs,
    },
    /// Run a scheme's tests on a simulator destination.
    Test {
        #[command(flatten)]
        test: TestArgs,
        #[command(flatten)]
        container: ContainerArgs,
    },
    /// Build, package and re-sign an app as an IPA.
    PackageIpa {
        #[arg(long, help = "Target name; also names the .app and .ipa")]
        app: String,
        #[arg(long, default_value = "iphoneos")]
        sdk: String,
        #[arg(long, help = "Code signing identity (default: config or XCPACK_SIGNING_IDENTITY)")]
        identity: Option<String>,
        #[arg(long, help = "Provisioning profile name or UUID")]
        profile: Option<String>,
        #[arg(long, help = "Directory holding installed provisioning profiles")]
        profiles_dir: Option<String>,
        #[arg(long, help = "Optional output path for a JSON report")]
        report: Option<PathBuf>,
        #[command(flatten)]
        container: ContainerArgs,
    },
    /// Print an assembled command line without running it.
    PrintCommand {
        #[command(subcommand)]
        which: PrintCommand,
    },
}

#[derive(Subcommand, Debug)]
enum PrintCommand {
    /// The `xcodebuild clean build` command.
    Build {
        #[arg(long)]
        target: String,
        #[arg(long, default_value = "iphoneos")]
        sdk: String,
        #[command(flatten)]
        container: ContainerArgs,
    },
    /// The `xcodebuild test` command.
    Test {
        #[command(flatten)]
        test: TestArgs,
        #[command(flatten)]
        container: ContainerArgs,
    },
}

#[derive(Args, Debug, Clone, Default)]
struct ContainerArgs {
    #[arg(long, conflicts_with = "workspace", help = "Xcode project name, without .xcodeproj")]
    project: Option<String>,
    #[arg(long, help = "Xcode workspace name, without .xcworkspace")]
    workspace: Option<String>,
    #[arg(long, help = "Build configuration (default: Release)")]
    configuration: Option<String>,
    #[arg(long, help = "Build output directory (default: build)")]
    build_dir: Option<PathBuf>,
}

#[derive(Args, Debug, Clone, Default)]
struct TestArgs {
    #[arg(long)]
    scheme: Option<String>,
    #[arg(long)]
    os_version: Option<String>,
    #[arg(long)]
    device_name: Option<String>,
    #[arg(long, help = "Seconds to wait for the destination (default: 30)")]
    destination_timeout: Option<u32>,
}

/// Test destination after merging CLI flags and config.
#[derive(Debug, PartialEq, Eq)]
struct TestTarget {
    scheme: String,
    os_version: String,
    device_name: String,
    destination_timeout: Option<u32>,
}

#[derive(Debug, Serialize)]
struct PackageSummary {
    generated_at: String,
    #[serde(flatten)]
    report: PackageReport,
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let resolver = load_resolver(&cli.command, cli.config.as_deref())?;
    load_dotenv(&resolver);
    if let Some(path) = &resolver.config_path {
        log::debug!("Using config {}", path.display());
    }

    match cli.command {
        Command::Init {
            output,
            project,
            workspace,
        } => cmd_init(&output, project, workspace),
        Command::Build {
            target,
            sdk,
            container,
        } => cmd_build(&resolver, &container, &target, &sdk, cli.dry_run),
        Command::Test { test, container } => cmd_test(&resolver, &container, &test, cli.dry_run),
        Command::PackageIpa {
            app,
            sdk,
            identity,
            profile,
            profiles_dir,
            report,
            container,
        } => {
            let signing = resolver.signing();
            let identity = resolve_identity(
                identity,
                env::var(SIGNING_IDENTITY_ENV).ok(),
                signing.identity,
            )?;
            let profile = profile.or(signing.profile).ok_or_else(|| {
                anyhow!("no provisioning profile given; pass --profile or set signing.profile")
            })?;
            let profiles_dir = profiles_dir.or(signing.profiles_dir);
            cmd_package_ipa(
                &resolver,
                &container,
                PackageRequest {
                    app: &app,
                    sdk: &sdk,
                    identity: &identity,
                    profile: &profile,
                    profiles_dir: profiles_dir.as_deref(),
                    report: report.as_deref(),
                },
                cli.dry_run,
            )
        }
        Command::PrintCommand { which } => {
            println!("{}", render_command(&resolver, &which)?);
            Ok(())
        }
    }
}

/// Loads the config for `command`. `init` writes a fresh config, so it never
/// reads an existing one.
fn load_resolver(command: &Command, config: Option<&Path>) -> Result<ConfigResolver> {
    match command {
        Command::Init { .. } => Ok(ConfigResolver::default()),
        _ => ConfigResolver::new(config),
    }
}

fn init_logging(verbose: bool) {
    let default_filter = if verbose { "debug" } else { "info" };
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .format_target(false)
        .try_init();
}

fn load_dotenv(resolver: &ConfigResolver) {
    let dir = match resolver.config_dir() {
        Some(dir) => dir.to_path_buf(),
        None => match env::current_dir() {
            Ok(dir) => dir,
            Err(_) => return,
        },
    };
    let _ = dotenvy::from_path(dir.join(".env.local"));
}

fn make_builder(
    resolver: &ConfigResolver,
    args: &ContainerArgs,
    dry_run: bool,
) -> Result<XcodeBuilder> {
    let (project, workspace) = resolver.container(args.project.clone(), args.workspace.clone());
    let builder = XcodeBuilder::new(
        project,
        workspace,
        resolver.configuration(args.configuration.clone()),
        resolver.build_dir(args.build_dir.clone()),
    )
    .context("Failed to set up xcodebuild; check xcpack.toml or the --project/--workspace flags")?;
    Ok(builder.with_runner(ShellRunner::new().dry_run(dry_run)))
}

fn resolve_test_target(resolver: &ConfigResolver, args: &TestArgs) -> Result<TestTarget> {
    let configured = resolver.test();
    let scheme = args
        .scheme
        .clone()
        .or(configured.scheme)
        .ok_or_else(|| anyhow!("no scheme given; pass --scheme or set test.scheme"))?;
    let os_version = args
        .os_version
        .clone()
        .or(configured.os_version)
        .ok_or_else(|| anyhow!("no OS version given; pass --os-version or set test.os_version"))?;
    let device_name = args
        .device_name
        .clone()
        .or(configured.device_name)
        .ok_or_else(|| anyhow!("no device given; pass --device-name or set test.device_name"))?;
    Ok(TestTarget {
        scheme,
        os_version,
        device_name,
        destination_timeout: args.destination_timeout.or(configured.destination_timeout),
    })
}

/// Picks the signing identity: flag, then environment, then config.
fn resolve_identity(
    cli_value: Option<String>,
    env_value: Option<String>,
    config_value: Option<String>,
) -> Result<String> {
    cli_value
        .or(env_value.filter(|value| !value.trim().is_empty()))
        .or(config_value)
        .ok_or_else(|| {
            anyhow!(
                "no signing identity given; pass --identity, set {} or set signing.identity",
                SIGNING_IDENTITY_ENV
            )
        })
}

fn render_command(resolver: &ConfigResolver, which: &PrintCommand) -> Result<String> {
    match which {
        PrintCommand::Build {
            target,
            sdk,
            container,
        } => Ok(make_builder(resolver, container, true)?.build_command(target, sdk)),
        PrintCommand::Test { test, container } => {
            let target = resolve_test_target(resolver, test)?;
            Ok(make_builder(resolver, container, true)?.test_command(
                &target.scheme,
                &target.os_version,
                &target.device_name,
                target.destination_timeout,
            ))
        }
    }
}

fn ensure_can_write(path: &Path) -> Result<()> {
    if path.exists() {
        bail!("refusing to overwrite existing file: {:?}", path);
    }
    ensure_parent_dir(path)
}

fn ensure_parent_dir(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)
            .with_context(|| format!("creating parent directory {:?}", parent))?;
    }
    Ok(())
}

/// Write a starter xcpack.toml
fn cmd_init(output: &Path, project: Option<String>, workspace: Option<String>) -> Result<()> {
    let container = match (&project, &workspace) {
        (Some(name), None) => ("project", name.as_str()),
        (None, Some(name)) => ("workspace", name.as_str()),
        _ => bail!("pass exactly one of --project or --workspace"),
    };
    ensure_can_write(output)?;
    fs::write(output, XcpackConfig::generate_starter_toml(container))
        .with_context(|| format!("writing config {:?}", output))?;
    println!("Wrote {:?}", output);
    Ok(())
}

fn cmd_build(
    resolver: &ConfigResolver,
    container: &ContainerArgs,
    target: &str,
    sdk: &str,
    dry_run: bool,
) -> Result<()> {
    let builder = make_builder(resolver, container, dry_run)?;
    builder
        .build(target, sdk, &mut io::stderr())
        .with_context(|| format!("Failed to build {}", target))?;

    println!("✓ Built {} ({} {})", target, builder.configuration(), sdk);
    println!("  Products: {:?}", builder.build_products_dir(sdk));
    Ok(())
}

fn cmd_test(
    resolver: &ConfigResolver,
    container: &ContainerArgs,
    test: &TestArgs,
    dry_run: bool,
) -> Result<()> {
    let target = resolve_test_target(resolver, test)?;
    let builder = make_builder(resolver, container, dry_run)?;
    builder
        .test(
            &target.scheme,
            &target.os_version,
            &target.device_name,
            target.destination_timeout,
            &mut io::stderr(),
        )
        .with_context(|| format!("Tests failed for scheme {}", target.scheme))?;

    println!(
        "✓ Tests passed: {} on {} ({})",
        target.scheme, target.device_name, target.os_version
    );
    Ok(())
}

struct PackageRequest<'a> {
    app: &'a str,
    sdk: &'a str,
    identity: &'a str,
    profile: &'a str,
    profiles_dir: Option<&'a str>,
    report: Option<&'a Path>,
}

/// Package an app as a signed IPA
fn cmd_package_ipa(
    resolver: &ConfigResolver,
    container: &ContainerArgs,
    request: PackageRequest<'_>,
    dry_run: bool,
) -> Result<()> {
    println!("Packaging {} as IPA...", request.app);
    println!("  SDK: {}", request.sdk);
    println!("  Identity: {}", request.identity);
    println!("  Profile: {}", request.profile);

    let mut packager = IpaPackager::new(make_builder(resolver, container, dry_run)?);
    if let Some(dir) = request.profiles_dir {
        packager = packager.profiles_dir(shellexpand::tilde(dir).into_owned());
    }
    package_ipa(&packager, &request, dry_run)
}

/// Command lines a dry run of `request` would execute.
fn dry_run_plan<R: CommandRunner>(
    packager: &IpaPackager<R>,
    request: &PackageRequest<'_>,
) -> Vec<String> {
    packager.planned_commands(
        request.app,
        request.sdk,
        request.identity,
        request.profile,
        Path::new(RESOLVED_PROFILE_PLACEHOLDER),
    )
}

fn package_ipa<R: CommandRunner>(
    packager: &IpaPackager<R>,
    request: &PackageRequest<'_>,
    dry_run: bool,
) -> Result<()> {
    // The profile lookup has no output to work with in a dry run.
    if dry_run {
        println!("\nWould run:");
        for command in dry_run_plan(packager, request) {
            println!("  {}", command);
        }
        return Ok(());
    }

    let report = packager
        .package_with_report(
            request.app,
            request.sdk,
            request.identity,
            request.profile,
            &mut io::stderr(),
        )
        .context("Failed to package IPA")?;

    println!("\n✓ IPA packaged successfully!");
    println!("  Path: {:?}", report.ipa_path);

    if let Some(path) = request.report {
        write_report(path, report)?;
        println!("  Report: {:?}", path);
    }
    Ok(())
}

fn write_report(path: &Path, report: PackageReport) -> Result<()> {
    let generated_at = OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .context("formatting report timestamp")?;
    let summary = PackageSummary {
        generated_at,
        report,
    };
    ensure_parent_dir(path)?;
    let contents = serde_json::to_string_pretty(&summary).context("serializing package report")?;
    fs::write(path, contents).with_context(|| format!("writing report {:?}", path))
}
