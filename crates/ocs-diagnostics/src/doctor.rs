use std::path::{Path, PathBuf};

use ocs_core::{current_rfc3339_timestamp, write_text_atomic};
use ocs_profile::{DirectIpPolicy, PolicyProfile};
use ocs_verifier::checks::{check_tmpfs_overlay, RUNTIME_DIRS};
use ocs_verifier::{
    indicates_permission_issue, render_markdown_report, render_security_report, summarize,
    verify_profile, ArtifactOptions, CheckResult, CheckStatus, CheckSummary, ComposeSnapshot,
    EnvSnapshot, GatewayLogPatterns, InspectError, ReportDiagnostic, ReportHeader, StackInspector,
    StackLocation, VerifyContext, VerifyOptions,
};

use crate::build_info::{find_usable_build, resolve_build_info};

const BUILD_SANITY: &str = "Build sanity";
const CONTAINER_RUNTIME: &str = "Container runtime available";
const PROFILE_LOADING: &str = "Profile loading";
const ARTIFACT_SANITY: &str = "Artifact generation sanity";
const SECRETS_EXTERNALIZATION: &str = "Secrets externalization";
const COMPOSE_VALIDATION: &str = "Compose validation";
const SECURITY_VERIFICATION: &str = "Security verification";
const REPORT_WRITE: &str = "Doctor report write";
const TMPFS_INSPECTION_TITLE: &str = "Runtime tmpfs inspection";
const PREFLIGHT_SKIP_DETAILS: &str = "Skipped because one or more doctor preflight checks failed.";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DoctorOptions {
    /// Inspect the stack as-is instead of running `docker compose up -d`.
    pub no_up: bool,
    pub direct_ip_policy_override: Option<DirectIpPolicy>,
    pub verbose: bool,
}

/// Verification collaborators plus the host probes only the doctor needs.
pub struct DoctorContext<'a> {
    pub verify: VerifyContext<'a>,
    /// Build locations in priority order, see `build_candidates`.
    pub build_candidates: Vec<PathBuf>,
    pub path_exists: &'a dyn Fn(&Path) -> bool,
    pub executable_available: &'a dyn Fn(&str) -> bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DoctorSummary {
    pub counts: CheckSummary,
    pub results: Vec<CheckResult>,
    pub report_path: PathBuf,
    pub report_written: bool,
    pub security_report_path: PathBuf,
    pub security_report_written: bool,
    pub version: String,
    pub commit: String,
    pub requires_sudo: bool,
    /// `INFO:`/`WARN:` lines gathered only in verbose mode.
    pub verbose_info: Vec<String>,
}

/// A doctor run fails the invocation as soon as one check failed.
pub fn should_doctor_exit(summary: &DoctorSummary) -> bool {
    summary.counts.fail_count > 0
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InspectionLevel {
    Info,
    Warn,
}

impl InspectionLevel {
    fn as_str(self) -> &'static str {
        match self {
            InspectionLevel::Info => "INFO",
            InspectionLevel::Warn => "WARN",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TmpfsInspection {
    pub level: InspectionLevel,
    pub message: String,
}

impl TmpfsInspection {
    fn warn(message: impl Into<String>) -> Self {
        Self {
            level: InspectionLevel::Warn,
            message: message.into(),
        }
    }

    pub fn render(&self) -> String {
        format!("{}: {}", self.level.as_str(), self.message)
    }
}

/// Reads `HostConfig.Tmpfs` of the gateway container. Informational only;
/// never produces a check result.
pub fn inspect_gateway_tmpfs(inspector: &StackInspector<'_>) -> TmpfsInspection {
    let config = inspector.config();
    let service = config.gateway_service.as_str();
    let container_id = match inspector.container_id(service) {
        Ok(container_id) => container_id,
        Err(InspectError::ContainerNotFound { .. }) => {
            return TmpfsInspection::warn(format!(
                "tmpfs inspect skipped: {service} container is not running."
            ))
        }
        Err(error) => {
            return TmpfsInspection::warn(format!(
                "tmpfs inspect skipped: unable to get {service} container id ({error})"
            ))
        }
    };
    let tmpfs = match inspector.host_tmpfs(&container_id) {
        Ok(tmpfs) => tmpfs,
        Err(InspectError::MalformedJson { raw, .. }) => {
            let raw = if raw.is_empty() { "empty".to_string() } else { raw };
            return TmpfsInspection::warn(format!(
                "tmpfs inspect skipped: invalid HostConfig.Tmpfs payload ({raw})"
            ));
        }
        Err(error) => {
            return TmpfsInspection::warn(format!(
                "tmpfs inspect skipped: unable to read HostConfig.Tmpfs ({error})"
            ))
        }
    };

    if config
        .runtime_tmpfs_paths
        .iter()
        .all(|path| tmpfs.contains_key(path.as_str()))
    {
        return TmpfsInspection {
            level: InspectionLevel::Info,
            message: format!(
                "tmpfs configured: {} (Docker stores tmpfs under HostConfig.Tmpfs; not visible in .Mounts)",
                config.runtime_tmpfs_paths.join(", ")
            ),
        };
    }
    let present = tmpfs.keys().map(String::as_str).collect::<Vec<_>>();
    let present = if present.is_empty() {
        "(none)".to_string()
    } else {
        present.join(", ")
    };
    TmpfsInspection::warn(format!(
        "tmpfs inspection found incomplete runtime paths in HostConfig.Tmpfs: {present}"
    ))
}

/// Scans recent gateway logs for runtime directory creation denials.
pub fn check_runtime_dir_logs(inspector: &StackInspector<'_>) -> CheckResult {
    let config = inspector.config();
    let service = config.gateway_service.as_str();
    let patterns = match GatewayLogPatterns::new(&config.runtime_tmpfs_paths) {
        Ok(patterns) => patterns,
        Err(error) => {
            return CheckResult::skipped(
                RUNTIME_DIRS,
                &format!("unable to compile gateway log patterns ({error})."),
            )
        }
    };
    let logs = match inspector.log_tail(service, config.doctor_log_tail_lines) {
        Ok(logs) => logs,
        Err(error) => {
            return CheckResult::skipped(
                RUNTIME_DIRS,
                &format!("unable to read {service} logs ({error})."),
            )
        }
    };
    if patterns.runtime_dir_denied(&logs) {
        return CheckResult::fail(
            RUNTIME_DIRS,
            format!(
                "gateway reported EACCES while creating {}. This usually means the tmpfs overlay is missing.",
                config.runtime_tmpfs_paths.join(" or ")
            ),
        );
    }
    CheckResult::pass(
        RUNTIME_DIRS,
        "No EACCES mkdir errors for canvas/cron found in recent gateway logs.",
    )
}

fn check_secrets_externalized(
    secret_key: &str,
    compose: &ComposeSnapshot,
    env: &EnvSnapshot,
) -> CheckResult {
    let interpolation = format!("${{{secret_key}}}");
    let source = compose.source().unwrap_or_default();
    let secret = env
        .env()
        .map(|env| env.trimmed(secret_key))
        .unwrap_or_default();
    let leaks_secret = !secret.is_empty() && source.contains(secret);
    if source.contains(&interpolation) && !leaks_secret {
        return CheckResult::pass(
            SECRETS_EXTERNALIZATION,
            format!(
                "docker-compose.yml references {interpolation} and does not embed the literal token."
            ),
        );
    }
    CheckResult::fail(
        SECRETS_EXTERNALIZATION,
        format!(
            "docker-compose.yml must use {interpolation} and avoid embedding literal token values."
        ),
    )
}

fn summarize_verification(counts: &CheckSummary) -> CheckResult {
    let rendered = counts.render_counts();
    if counts.fail_count > 0 {
        return CheckResult::fail(
            SECURITY_VERIFICATION,
            format!("security-report.md contains failures ({rendered})."),
        );
    }
    if counts.warn_count > 0 {
        return CheckResult::warn(
            SECURITY_VERIFICATION,
            format!("security-report.md contains warnings ({rendered})."),
        );
    }
    CheckResult::pass(
        SECURITY_VERIFICATION,
        format!(
            "security-report.md contains only PASS checks ({} PASS).",
            counts.pass_count
        ),
    )
}

/// Accumulates doctor rows and the sudo hint while the run progresses.
#[derive(Default)]
struct DoctorRun {
    results: Vec<CheckResult>,
    diagnostics: Vec<ReportDiagnostic>,
    verbose_info: Vec<String>,
    requires_sudo: bool,
}

impl DoctorRun {
    fn push(&mut self, result: CheckResult) {
        if result.status() == CheckStatus::Fail {
            tracing::warn!(check = result.name(), details = result.details(), "doctor check failed");
        }
        self.results.push(result);
    }

    /// Records a failure whose message may reveal a privilege problem.
    fn push_error(&mut self, name: &str, message: String) {
        self.requires_sudo |= indicates_permission_issue(&message);
        self.push(CheckResult::fail(name, message));
    }

    fn any_failed(&self) -> bool {
        self.results
            .iter()
            .any(|result| result.status() == CheckStatus::Fail)
    }

    fn runtime_dir_failed(&self) -> bool {
        self.results
            .iter()
            .any(|result| result.status() == CheckStatus::Fail && result.name() == RUNTIME_DIRS)
    }
}

fn load_profile(
    ctx: &DoctorContext<'_>,
    run: &mut DoctorRun,
    profile_name: &str,
) -> Option<PolicyProfile> {
    match ctx.verify.profiles.load(profile_name) {
        Ok(profile) => {
            run.push(CheckResult::pass(
                PROFILE_LOADING,
                format!("Profile '{profile_name}' loaded and validated."),
            ));
            Some(profile)
        }
        Err(error) => {
            run.push(CheckResult::fail(PROFILE_LOADING, error.to_string()));
            None
        }
    }
}

fn prepare_artifacts(
    ctx: &DoctorContext<'_>,
    run: &mut DoctorRun,
    profile_name: &str,
    profile: Option<&PolicyProfile>,
) -> StackLocation {
    let fallback = StackLocation::for_profile(ctx.verify.root, profile_name);
    let Some(profile) = profile else {
        run.push(CheckResult::fail(
            ARTIFACT_SANITY,
            "Skipped because profile failed to load.",
        ));
        return fallback;
    };
    let options = ArtifactOptions {
        auto_generate_secret: true,
        auto_adjust_ports: true,
    };
    match ctx.verify.artifacts.generate(profile_name, profile, options) {
        Ok(generated) => {
            run.push(CheckResult::pass(
                ARTIFACT_SANITY,
                format!("Generated artifacts under {}.", generated.out_dir.display()),
            ));
            StackLocation::from_out_dir(generated.out_dir)
        }
        Err(error) => {
            run.push_error(ARTIFACT_SANITY, format!("{error:#}"));
            fallback
        }
    }
}

fn check_required_files(ctx: &DoctorContext<'_>, run: &mut DoctorRun, location: &StackLocation) {
    let required = [
        ("out directory exists", &location.out_dir),
        (".env exists", &location.env_path),
        ("docker-compose.yml exists", &location.compose_path),
    ];
    for (label, target) in required {
        let result = if (ctx.path_exists)(target) {
            CheckResult::pass(ARTIFACT_SANITY, format!("{label}: {}", target.display()))
        } else {
            CheckResult::fail(
                ARTIFACT_SANITY,
                format!("{label}: missing at {}", target.display()),
            )
        };
        run.push(result);
    }
}

/// Runs verification, or writes a one-row placeholder report when preflight
/// already failed. Errors become a `Security verification` failure.
fn run_security_verification(
    ctx: &DoctorContext<'_>,
    run: &mut DoctorRun,
    profile_name: &str,
    location: &StackLocation,
    options: DoctorOptions,
) -> bool {
    let security_report_path = location.security_report_path();
    if !run.any_failed() {
        let verify_options = VerifyOptions {
            ensure_up: !options.no_up,
            regenerate_artifacts: false,
            direct_ip_policy_override: options.direct_ip_policy_override,
        };
        return match verify_profile(&ctx.verify, profile_name, &security_report_path, verify_options)
        {
            Ok(summary) => {
                run.push(summarize_verification(&summary.counts));
                run.diagnostics.extend(summary.diagnostics);
                true
            }
            Err(error) => {
                run.push_error(SECURITY_VERIFICATION, format!("{error:#}"));
                false
            }
        };
    }

    let skipped_status = if run.runtime_dir_failed() {
        CheckStatus::Warn
    } else {
        CheckStatus::Fail
    };
    run.push(CheckResult::new(
        skipped_status,
        SECURITY_VERIFICATION,
        format!("security-report.md not executed. {PREFLIGHT_SKIP_DETAILS}"),
    ));
    let placeholder = render_security_report(
        profile_name,
        &location.compose_path,
        &current_rfc3339_timestamp(),
        &[CheckResult::new(
            skipped_status,
            SECURITY_VERIFICATION,
            PREFLIGHT_SKIP_DETAILS,
        )],
        &[],
    );
    match write_text_atomic(&security_report_path, &placeholder) {
        Ok(()) => true,
        Err(error) => {
            run.push_error(SECURITY_VERIFICATION, format!("{error:#}"));
            false
        }
    }
}

/// Runs the preflight checks for `profile_name`, the security verification
/// when preflight passed, and writes `doctor-report.md` next to the artifacts.
pub fn doctor_profile(
    ctx: &DoctorContext<'_>,
    profile_name: &str,
    options: DoctorOptions,
) -> DoctorSummary {
    let config = ctx.verify.config;
    let build = resolve_build_info(ctx.verify.runner);
    tracing::info!(
        profile = profile_name,
        version = %build.version,
        commit = %build.commit,
        "running doctor"
    );
    let mut run = DoctorRun::default();

    match find_usable_build(&ctx.build_candidates, |path| (ctx.path_exists)(path)) {
        Some(path) => run.push(CheckResult::pass(
            BUILD_SANITY,
            format!("ocs runtime found at {}.", path.display()),
        )),
        None => run.push(CheckResult::fail(
            BUILD_SANITY,
            "No usable ocs runtime found (release build missing and installed runtime unavailable). Run `cargo build --release` or install the ocs binary.",
        )),
    }

    let docker = config.docker_binary.as_str();
    if (ctx.executable_available)(docker) {
        run.push(CheckResult::pass(
            CONTAINER_RUNTIME,
            format!("{docker} executable found."),
        ));
    } else {
        run.push(CheckResult::fail(
            CONTAINER_RUNTIME,
            format!("{docker} executable not found on PATH. Install Docker Engine with the compose plugin."),
        ));
    }

    let profile = load_profile(ctx, &mut run, profile_name);
    let location = prepare_artifacts(ctx, &mut run, profile_name, profile.as_ref());
    check_required_files(ctx, &mut run, &location);

    let compose = ComposeSnapshot::load(&location.compose_path);
    let env = EnvSnapshot::load(&location.env_path);
    run.push(check_secrets_externalized(&config.secret_env_key, &compose, &env));

    let inspector = StackInspector::new(ctx.verify.runner, config, &location);
    let compose_valid = match inspector.compose_config() {
        Ok(()) => {
            run.push(CheckResult::pass(
                COMPOSE_VALIDATION,
                "docker compose config succeeded.",
            ));
            true
        }
        Err(error) => {
            run.push_error(
                COMPOSE_VALIDATION,
                format!("docker compose config failed: {error}"),
            );
            false
        }
    };
    run.push(check_tmpfs_overlay(config, &compose));

    if compose_valid {
        run.push(check_runtime_dir_logs(&inspector));
        if options.verbose {
            let line = inspect_gateway_tmpfs(&inspector).render();
            run.verbose_info.push(line.clone());
            run.diagnostics
                .push(ReportDiagnostic::new(TMPFS_INSPECTION_TITLE, line));
        }
    }

    let security_report_written =
        run_security_verification(ctx, &mut run, profile_name, &location, options);

    let security_report_path = location.security_report_path();
    let report_path = location.doctor_report_path();
    let report = render_markdown_report(
        &ReportHeader {
            title: "Doctor Report",
            profile_name,
            compose_path: &location.compose_path,
            extra_paths: vec![("Security report", security_report_path.as_path())],
            generated_at: &current_rfc3339_timestamp(),
        },
        &run.results,
        &run.diagnostics,
    );
    let report_written = match write_text_atomic(&report_path, &report) {
        Ok(()) => true,
        Err(error) => {
            run.push_error(REPORT_WRITE, format!("{error:#}"));
            false
        }
    };

    let counts = summarize(&run.results);
    run.requires_sudo |= run.results.iter().any(|result| {
        result.status() != CheckStatus::Pass && indicates_permission_issue(result.details())
    });
    tracing::info!(
        profile = profile_name,
        pass = counts.pass_count,
        warn = counts.warn_count,
        fail = counts.fail_count,
        requires_sudo = run.requires_sudo,
        "doctor finished"
    );

    DoctorSummary {
        counts,
        results: run.results,
        report_path,
        report_written,
        security_report_path,
        security_report_written,
        version: build.version,
        commit: build.commit,
        requires_sudo: run.requires_sudo,
        verbose_info: run.verbose_info,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counts(pass_count: usize, warn_count: usize, fail_count: usize) -> CheckSummary {
        CheckSummary {
            pass_count,
            warn_count,
            fail_count,
        }
    }

    #[test]
    fn unit_verification_row_reflects_worst_status() {
        let failed = summarize_verification(&counts(10, 2, 1));
        assert_eq!(failed.status(), CheckStatus::Fail);
        assert_eq!(
            failed.details(),
            "security-report.md contains failures (10 PASS / 2 WARN / 1 FAIL)."
        );
        assert_eq!(
            summarize_verification(&counts(13, 1, 0)).status(),
            CheckStatus::Warn
        );
        let passed = summarize_verification(&counts(14, 0, 0));
        assert_eq!(passed.status(), CheckStatus::Pass);
        assert_eq!(
            passed.details(),
            "security-report.md contains only PASS checks (14 PASS)."
        );
    }

    #[test]
    fn unit_secrets_check_requires_interpolation_and_no_literal() {
        let compose_path = Path::new("docker-compose.yml");
        let env = EnvSnapshot::from_env(ocs_core::parse_env_source(
            "OPENCLAW_GATEWAY_TOKEN=0123456789abcdef0123456789abcdef\n",
        ));
        let externalized = ComposeSnapshot::from_source(
            compose_path,
            "services:\n  g:\n    environment:\n      T: ${OPENCLAW_GATEWAY_TOKEN}\n".to_string(),
        );
        assert_eq!(
            check_secrets_externalized("OPENCLAW_GATEWAY_TOKEN", &externalized, &env).status(),
            CheckStatus::Pass
        );

        let leaked = ComposeSnapshot::from_source(
            compose_path,
            "# ${OPENCLAW_GATEWAY_TOKEN}\nservices:\n  g:\n    environment:\n      T: 0123456789abcdef0123456789abcdef\n"
                .to_string(),
        );
        assert_eq!(
            check_secrets_externalized("OPENCLAW_GATEWAY_TOKEN", &leaked, &env).status(),
            CheckStatus::Fail
        );

        let missing = ComposeSnapshot::load(Path::new("/nonexistent/docker-compose.yml"));
        let failed = check_secrets_externalized("OPENCLAW_GATEWAY_TOKEN", &missing, &env);
        assert_eq!(
            failed.details(),
            "docker-compose.yml must use ${OPENCLAW_GATEWAY_TOKEN} and avoid embedding literal token values."
        );
    }

    #[test]
    fn unit_tmpfs_inspection_renders_level_prefix() {
        let inspection = TmpfsInspection::warn("tmpfs inspect skipped: x");
        assert_eq!(inspection.render(), "WARN: tmpfs inspect skipped: x");
    }

    #[test]
    fn unit_should_doctor_exit_only_on_failures() {
        let mut summary = DoctorSummary {
            counts: counts(3, 2, 0),
            results: Vec::new(),
            report_path: PathBuf::from("doctor-report.md"),
            report_written: true,
            security_report_path: PathBuf::from("security-report.md"),
            security_report_written: true,
            version: "0.1.0".to_string(),
            commit: "unknown".to_string(),
            requires_sudo: false,
            verbose_info: Vec::new(),
        };
        assert!(!should_doctor_exit(&summary));
        summary.counts.fail_count = 1;
        assert!(should_doctor_exit(&summary));
    }
}
