use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use ocs_core::{current_rfc3339_timestamp, write_text_atomic};
use ocs_profile::{DirectIpPolicy, PolicyProfile, ProfileLoader};

use crate::artifacts::{ArtifactGenerator, ArtifactOptions};
use crate::checks::{
    check_firewall, check_gateway_token, check_no_hardcoded_ports, check_port_exposure,
    check_selected_ports, check_tmpfs_overlay, check_token_externalized,
};
use crate::compose::{ComposeDocument, ComposeSnapshot};
use crate::config::VerifierConfig;
use crate::diagnosis::{
    branch_checks, evaluate_diagnosis, DiagnosisBranch, GatewayLogPatterns, LiveContext,
    RuntimeDiagnosis,
};
use crate::inspect::StackInspector;
use crate::process::CommandRunner;
use crate::report::{render_security_report, summarize, CheckResult, CheckSummary, ReportDiagnostic};
use crate::stack::{EnvSnapshot, StackLocation};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VerifyOptions {
    /// Issue `docker compose up -d` before inspecting the stack.
    pub ensure_up: bool,
    /// Ask the artifact generator for the output directory instead of using
    /// the conventional `<root>/out/<profile>` location.
    pub regenerate_artifacts: bool,
    pub direct_ip_policy_override: Option<DirectIpPolicy>,
}

impl Default for VerifyOptions {
    fn default() -> Self {
        Self {
            ensure_up: true,
            regenerate_artifacts: true,
            direct_ip_policy_override: None,
        }
    }
}

/// Collaborators and settings for one invocation.
pub struct VerifyContext<'a> {
    pub root: &'a Path,
    pub config: &'a VerifierConfig,
    pub runner: &'a dyn CommandRunner,
    pub profiles: &'a dyn ProfileLoader,
    pub artifacts: &'a dyn ArtifactGenerator,
}

#[derive(Debug, Clone)]
/// Unrendered outcome of a verification run.
pub struct VerificationRun {
    pub profile: PolicyProfile,
    pub location: StackLocation,
    pub branch: DiagnosisBranch,
    pub results: Vec<CheckResult>,
    pub diagnostics: Vec<ReportDiagnostic>,
}

#[derive(Debug, Clone)]
pub struct VerifySummary {
    pub counts: CheckSummary,
    pub out_dir: PathBuf,
    pub compose_path: PathBuf,
    pub report_path: PathBuf,
    pub results: Vec<CheckResult>,
    pub diagnostics: Vec<ReportDiagnostic>,
}

fn locate_artifacts(
    ctx: &VerifyContext<'_>,
    profile_name: &str,
    profile: &PolicyProfile,
    regenerate: bool,
) -> Result<StackLocation> {
    if !regenerate {
        return Ok(StackLocation::for_profile(ctx.root, profile_name));
    }
    let generated = ctx
        .artifacts
        .generate(profile_name, profile, ArtifactOptions::default())
        .with_context(|| format!("failed to prepare artifacts for profile '{profile_name}'"))?;
    Ok(StackLocation {
        out_dir: generated.out_dir,
        compose_path: generated.compose_path,
        env_path: generated.env_path,
    })
}

/// Runs the full battery without writing a report.
///
/// Only profile loading and artifact location are fatal; every other failure
/// becomes a check result.
pub fn run_verification(
    ctx: &VerifyContext<'_>,
    profile_name: &str,
    options: VerifyOptions,
) -> Result<VerificationRun> {
    let profile = ctx.profiles.load(profile_name)?;
    let direct_ip_policy = options
        .direct_ip_policy_override
        .unwrap_or(profile.network.direct_ip_policy);
    let location = locate_artifacts(ctx, profile_name, &profile, options.regenerate_artifacts)?;
    tracing::debug!(
        profile = profile_name,
        out_dir = %location.out_dir.display(),
        direct_ip_policy = %direct_ip_policy,
        "verifying deployed stack"
    );

    let config = ctx.config;
    let compose = ComposeSnapshot::load(&location.compose_path);
    let env = EnvSnapshot::load(&location.env_path);
    let patterns = GatewayLogPatterns::new(&config.runtime_tmpfs_paths)
        .context("failed to compile gateway log patterns")?;
    let inspector = StackInspector::new(ctx.runner, config, &location);
    let document = compose.document().ok();
    let diagnosis = RuntimeDiagnosis::gather(&inspector, document, &patterns, options.ensure_up);

    let mut results = vec![
        check_gateway_token(config, &env),
        check_tmpfs_overlay(config, &compose),
        check_token_externalized(config, &compose, &env),
        check_selected_ports(config, &compose, &env),
        check_no_hardcoded_ports(config, &compose),
        check_port_exposure(
            config,
            &compose,
            diagnosis.runtime_service.as_deref(),
            profile.openclaw.gateway.public_listen,
        ),
    ];
    let diagnostics = diagnosis.log_diagnostics(config.diagnosis_log_tail_lines);

    let branch = evaluate_diagnosis(
        &diagnosis,
        &config.runtime_service_candidates,
        &config.runtime_tmpfs_paths,
    );
    tracing::info!(profile = profile_name, branch = branch.label(), "selected runtime battery");

    let empty_document = ComposeDocument::default();
    let live = LiveContext {
        inspector: &inspector,
        document: document.unwrap_or(&empty_document),
        profile: &profile,
        direct_ip_policy,
    };
    results.extend(branch_checks(&branch, &live).iter().map(|check| check()));
    results.push(check_firewall(&inspector));

    Ok(VerificationRun {
        profile,
        location,
        branch,
        results,
        diagnostics,
    })
}

/// Verifies a deployed profile and rewrites the security report at `output_path`.
pub fn verify_profile(
    ctx: &VerifyContext<'_>,
    profile_name: &str,
    output_path: &Path,
    options: VerifyOptions,
) -> Result<VerifySummary> {
    let run = run_verification(ctx, profile_name, options)?;
    let report = render_security_report(
        profile_name,
        &run.location.compose_path,
        &current_rfc3339_timestamp(),
        &run.results,
        &run.diagnostics,
    );
    write_text_atomic(output_path, &report)
        .with_context(|| format!("failed to write security report {}", output_path.display()))?;

    let counts = summarize(&run.results);
    tracing::info!(
        profile = profile_name,
        report = %output_path.display(),
        pass = counts.pass_count,
        warn = counts.warn_count,
        fail = counts.fail_count,
        "wrote security report"
    );
    Ok(VerifySummary {
        counts,
        out_dir: run.location.out_dir,
        compose_path: run.location.compose_path,
        report_path: output_path.to_path_buf(),
        results: run.results,
        diagnostics: run.diagnostics,
    })
}
