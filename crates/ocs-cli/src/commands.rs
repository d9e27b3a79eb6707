use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use ocs_diagnostics::{
    build_candidates, doctor_profile, is_executable_available, should_doctor_exit, DoctorContext,
    DoctorOptions, DEFAULT_INSTALL_DIR,
};
use ocs_profile::{DirectIpPolicy, FsProfileLoader};
use ocs_verifier::{
    load_verifier_config, verify_profile, PrebuiltArtifacts, SystemCommandRunner, VerifierConfig,
    VerifyContext, VerifyOptions,
};

use crate::cli_args::{Cli, CliCommand, DoctorArgs, VerifyArgs};

fn strict_override(strict_ip_egress: bool) -> Option<DirectIpPolicy> {
    strict_ip_egress.then_some(DirectIpPolicy::Fail)
}

/// `path` relative to `cwd` when it lives below it.
fn display_relative(path: &Path, cwd: &Path) -> String {
    path.strip_prefix(cwd)
        .ok()
        .filter(|relative| !relative.as_os_str().is_empty())
        .unwrap_or(path)
        .display()
        .to_string()
}

struct Workspace {
    cwd: PathBuf,
    root: PathBuf,
    config: VerifierConfig,
}

impl Workspace {
    fn resolve(cli: &Cli) -> Result<Self> {
        let cwd = std::env::current_dir().context("failed to resolve current directory")?;
        let root = match &cli.root {
            Some(root) if root.is_absolute() => root.clone(),
            Some(root) => cwd.join(root),
            None => cwd.clone(),
        };
        let config = load_verifier_config(cli.config.as_deref())?;
        tracing::debug!(root = %root.display(), "resolved ocs workspace");
        Ok(Self { cwd, root, config })
    }
}

fn run_verify_command(workspace: &Workspace, args: &VerifyArgs) -> Result<()> {
    let runner = SystemCommandRunner::new(workspace.config.command_timeout_ms);
    let profiles = FsProfileLoader::from_root(&workspace.root);
    let artifacts = PrebuiltArtifacts::new(&workspace.root, workspace.config.port_roles.clone());
    let ctx = VerifyContext {
        root: &workspace.root,
        config: &workspace.config,
        runner: &runner,
        profiles: &profiles,
        artifacts: &artifacts,
    };
    let output = if args.output.is_absolute() {
        args.output.clone()
    } else {
        workspace.cwd.join(&args.output)
    };
    let summary = verify_profile(
        &ctx,
        &args.profile,
        &output,
        VerifyOptions {
            ensure_up: !args.no_up,
            regenerate_artifacts: !args.no_regenerate,
            direct_ip_policy_override: strict_override(args.strict_ip_egress),
        },
    )?;

    println!("Wrote security report to {}", args.output.display());
    println!(
        "PASS: {}  WARN: {}  FAIL: {}",
        summary.counts.pass_count, summary.counts.warn_count, summary.counts.fail_count
    );
    if summary.counts.fail_count > 0 {
        bail!(
            "Verification failed with {} failed check(s).",
            summary.counts.fail_count
        );
    }
    Ok(())
}

fn run_doctor_command(workspace: &Workspace, args: &DoctorArgs) -> Result<()> {
    let runner = SystemCommandRunner::new(workspace.config.command_timeout_ms);
    let profiles = FsProfileLoader::from_root(&workspace.root);
    let artifacts = PrebuiltArtifacts::new(&workspace.root, workspace.config.port_roles.clone());
    let invoked = std::env::current_exe().ok();
    let path_exists = |path: &Path| path.exists();
    let ctx = DoctorContext {
        verify: VerifyContext {
            root: &workspace.root,
            config: &workspace.config,
            runner: &runner,
            profiles: &profiles,
            artifacts: &artifacts,
        },
        build_candidates: build_candidates(
            &workspace.cwd,
            invoked.as_deref(),
            Path::new(DEFAULT_INSTALL_DIR),
        ),
        path_exists: &path_exists,
        executable_available: &is_executable_available,
    };
    let summary = doctor_profile(
        &ctx,
        &args.profile,
        DoctorOptions {
            no_up: args.no_up,
            direct_ip_policy_override: strict_override(args.strict_ip_egress),
            verbose: args.verbose,
        },
    );

    let doctor_report = display_relative(&summary.report_path, &workspace.cwd);
    let security_report = display_relative(&summary.security_report_path, &workspace.cwd);
    println!("Version: {} ({})", summary.version, summary.commit);
    if summary.report_written {
        println!("Wrote doctor report to {doctor_report}");
    } else {
        println!("Could not write doctor report to {doctor_report}");
    }
    if summary.security_report_written {
        println!("Wrote security report to {security_report}");
    } else {
        println!("Could not write security report to {security_report}");
    }
    if args.verbose {
        for line in &summary.verbose_info {
            println!("{line}");
        }
    }
    println!(
        "PASS: {}  WARN: {}  FAIL: {}",
        summary.counts.pass_count, summary.counts.warn_count, summary.counts.fail_count
    );

    if should_doctor_exit(&summary) {
        if summary.requires_sudo {
            eprintln!("Some checks require elevated privileges. Re-run with sudo.");
        }
        bail!(
            "Doctor failed with {} failing check(s).",
            summary.counts.fail_count
        );
    }
    Ok(())
}

pub(crate) fn run_cli(cli: Cli) -> Result<()> {
    let workspace = Workspace::resolve(&cli)?;
    match &cli.command {
        CliCommand::Verify(args) => run_verify_command(&workspace, args),
        CliCommand::Doctor(args) => run_doctor_command(&workspace, args),
    }
}
