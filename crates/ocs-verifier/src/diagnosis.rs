//! Pre-flight classification of gateway health.
//!
//! One evaluation picks exactly one `DiagnosisBranch`; each branch maps to a
//! fixed, ordered list of result-producing closures for the runtime battery.

use regex::Regex;

use ocs_profile::{DirectIpPolicy, PolicyProfile};

use crate::checks::declaration::missing_runtime_service_reason;
use crate::checks::{
    check_direct_ip, check_dns_forced, check_docker_socket, check_docker_socket_declared,
    check_egress_allowed, check_egress_blocked, check_non_root, check_tmpfs_runtime, DIRECT_IP,
    DNS_FORCED, EGRESS_ALLOWED, EGRESS_BLOCKED, NON_ROOT, RUNTIME_DEPENDENT_CHECKS, RUNTIME_DIRS,
    STARTUP_CONFIG,
};
use crate::compose::ComposeDocument;
use crate::inspect::StackInspector;
use crate::report::{CheckResult, ReportDiagnostic};

pub const MISSING_CONFIG_REASON: &str =
    "gateway missing config (needs allow-unconfigured or gateway.mode=local)";

/// Log signatures that explain an unhealthy gateway.
#[derive(Debug, Clone)]
pub struct GatewayLogPatterns {
    runtime_dir_denied: Regex,
    missing_config: Regex,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LogFindings {
    pub runtime_dir_denied: bool,
    pub missing_config: bool,
}

impl GatewayLogPatterns {
    pub fn new(runtime_paths: &[String]) -> Result<Self, regex::Error> {
        let paths = runtime_paths
            .iter()
            .map(|path| regex::escape(path))
            .collect::<Vec<_>>()
            .join("|");
        let runtime_dir_denied = Regex::new(&format!(
            r"(?i)(eacces:.*mkdir.*(?:{paths})|permission denied.*(?:{paths}))"
        ))?;
        let missing_config = Regex::new(r"(?i)missing config")?;
        Ok(Self {
            runtime_dir_denied,
            missing_config,
        })
    }

    pub fn runtime_dir_denied(&self, logs: &str) -> bool {
        self.runtime_dir_denied.is_match(logs)
    }

    pub fn classify(&self, logs: &str) -> LogFindings {
        LogFindings {
            runtime_dir_denied: self.runtime_dir_denied(logs),
            missing_config: self.missing_config.is_match(logs),
        }
    }
}

/// Fixed explanation for a gateway that cannot create its runtime directories.
pub fn runtime_dir_permission_reason(runtime_paths: &[String]) -> String {
    format!(
        "gateway reported EACCES while creating {}. This usually means tmpfs overlays are missing for those runtime paths.",
        runtime_paths.join(" or ")
    )
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// Observed runtime state gathered once before the live battery.
pub struct RuntimeDiagnosis {
    pub findings: LogFindings,
    pub ensure_up: bool,
    /// `docker compose up` failure detail; `None` when it succeeded or was not requested.
    pub setup_error: Option<String>,
    pub runtime_service: Option<String>,
    pub runtime_state: Result<String, String>,
    pub gateway_service: Option<String>,
    pub logs: Result<String, String>,
}

impl RuntimeDiagnosis {
    pub fn setup_succeeded(&self) -> bool {
        self.setup_error.is_none()
    }

    pub fn runtime_service_running(&self) -> bool {
        matches!(&self.runtime_state, Ok(state) if state == "running")
    }

    /// Gathers setup, service resolution, run-state, and gateway log evidence.
    pub fn gather(
        inspector: &StackInspector<'_>,
        document: Option<&ComposeDocument>,
        patterns: &GatewayLogPatterns,
        ensure_up: bool,
    ) -> Self {
        let config = inspector.config();
        let runtime_service =
            document.and_then(|doc| doc.resolve_runtime_service(&config.runtime_service_candidates));
        let gateway_service = document.and_then(|doc| {
            doc.resolve_gateway_service(&config.gateway_service, runtime_service.as_deref())
        });

        let setup_error = if ensure_up {
            inspector.ensure_running().err().map(|error| error.to_string())
        } else {
            None
        };

        let runtime_state = match runtime_service.as_deref() {
            Some(service) => inspector
                .container_id(service)
                .and_then(|container_id| inspector.container_state(&container_id))
                .map_err(|error| error.to_string()),
            None => Err("runtime container not found".to_string()),
        };

        let logs = match gateway_service.as_deref() {
            Some(service) => inspector
                .log_tail(service, config.diagnosis_log_tail_lines)
                .map_err(|error| error.to_string()),
            None => Err(missing_runtime_service_reason(
                &config.runtime_service_candidates,
            )),
        };
        let findings = logs
            .as_deref()
            .map(|logs| patterns.classify(logs))
            .unwrap_or_default();
        if let Err(error) = &logs {
            tracing::warn!(error = %error, "gateway logs unavailable for diagnosis");
        }

        Self {
            findings,
            ensure_up,
            setup_error,
            runtime_service,
            runtime_state,
            gateway_service,
            logs,
        }
    }

    /// Raw log evidence attached to the report when a log pattern matched.
    pub fn log_diagnostics(&self, tail_lines: usize) -> Vec<ReportDiagnostic> {
        let service = self.gateway_service.as_deref().unwrap_or("gateway");
        let content = match &self.logs {
            Ok(logs) if !logs.is_empty() => logs.clone(),
            Ok(_) => "No logs available.".to_string(),
            Err(error) => error.clone(),
        };
        let mut diagnostics = Vec::new();
        if self.findings.missing_config {
            diagnostics.push(ReportDiagnostic::new(
                format!("{service} logs (last {tail_lines} lines)"),
                content.clone(),
            ));
        }
        if self.findings.runtime_dir_denied {
            diagnostics.push(ReportDiagnostic::new(
                format!("{service} runtime dir permission logs (last {tail_lines} lines)"),
                content,
            ));
        }
        diagnostics
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiagnosisBranch {
    PermissionFailure { reason: String },
    MissingConfig { reason: String },
    Inoperable { reason: String },
    Healthy { runtime_service: String },
}

impl DiagnosisBranch {
    pub fn label(&self) -> &'static str {
        match self {
            DiagnosisBranch::PermissionFailure { .. } => "runtime-dir-permission-failure",
            DiagnosisBranch::MissingConfig { .. } => "missing-config",
            DiagnosisBranch::Inoperable { .. } => "inoperable",
            DiagnosisBranch::Healthy { .. } => "healthy",
        }
    }
}

/// Permission failure wins over missing config, which wins over an
/// inoperable stack.
pub fn evaluate_diagnosis(
    diagnosis: &RuntimeDiagnosis,
    runtime_service_candidates: &[String],
    runtime_paths: &[String],
) -> DiagnosisBranch {
    if diagnosis.findings.runtime_dir_denied {
        return DiagnosisBranch::PermissionFailure {
            reason: runtime_dir_permission_reason(runtime_paths),
        };
    }
    if diagnosis.findings.missing_config {
        return DiagnosisBranch::MissingConfig {
            reason: MISSING_CONFIG_REASON.to_string(),
        };
    }
    if let Some(error) = &diagnosis.setup_error {
        return DiagnosisBranch::Inoperable {
            reason: format!("docker compose up failed: {error}"),
        };
    }
    let Some(runtime_service) = diagnosis.runtime_service.clone() else {
        return DiagnosisBranch::Inoperable {
            reason: missing_runtime_service_reason(runtime_service_candidates),
        };
    };
    if !diagnosis.runtime_service_running() {
        let observed = match &diagnosis.runtime_state {
            Ok(state) => state.as_str(),
            Err(error) => error.as_str(),
        };
        let mut reason = format!("Runtime stack is not running ({observed}).");
        if !diagnosis.ensure_up {
            reason.push_str(" Re-run without --no-up or start compose stack first.");
        }
        return DiagnosisBranch::Inoperable { reason };
    }
    DiagnosisBranch::Healthy { runtime_service }
}

/// Inputs shared by the live battery closures.
pub struct LiveContext<'a> {
    pub inspector: &'a StackInspector<'a>,
    pub document: &'a ComposeDocument,
    pub profile: &'a PolicyProfile,
    pub direct_ip_policy: DirectIpPolicy,
}

pub type CheckThunk<'a> = Box<dyn Fn() -> CheckResult + 'a>;

fn skipped_thunks<'a>(
    live: &'a LiveContext<'a>,
    headline: CheckResult,
    reason: &str,
) -> Vec<CheckThunk<'a>> {
    let skip = |name: &'static str| -> CheckThunk<'a> {
        let reason = reason.to_string();
        Box::new(move || CheckResult::skipped(name, &reason))
    };
    let socket_reason = reason.to_string();
    let mut thunks: Vec<CheckThunk<'a>> = Vec::with_capacity(7);
    thunks.push(Box::new(move || headline.clone()));
    thunks.push(skip(NON_ROOT));
    thunks.push(Box::new(move || {
        check_docker_socket_declared(live.inspector.config(), live.document, &socket_reason)
    }));
    thunks.extend([DNS_FORCED, EGRESS_BLOCKED, EGRESS_ALLOWED, DIRECT_IP].map(skip));
    thunks
}

/// Ordered runtime checks for `branch`; the firewall check is appended by the caller.
pub fn branch_checks<'a>(
    branch: &DiagnosisBranch,
    live: &'a LiveContext<'a>,
) -> Vec<CheckThunk<'a>> {
    match branch {
        DiagnosisBranch::PermissionFailure { reason } => {
            skipped_thunks(live, CheckResult::fail(RUNTIME_DIRS, reason.clone()), reason)
        }
        DiagnosisBranch::MissingConfig { reason } => {
            skipped_thunks(live, CheckResult::fail(STARTUP_CONFIG, reason.clone()), reason)
        }
        DiagnosisBranch::Inoperable { reason } => RUNTIME_DEPENDENT_CHECKS
            .into_iter()
            .map(|name| {
                let reason = reason.clone();
                Box::new(move || CheckResult::fail(name, reason.clone())) as CheckThunk<'a>
            })
            .collect(),
        DiagnosisBranch::Healthy { runtime_service } => {
            let network = &live.profile.network;
            let service = runtime_service.clone();
            let mut thunks: Vec<CheckThunk<'a>> = Vec::with_capacity(7);
            thunks.push(Box::new(move || check_tmpfs_runtime(live.inspector)));
            {
                let service = service.clone();
                thunks.push(Box::new(move || check_non_root(live.inspector, &service)));
            }
            {
                let service = service.clone();
                thunks.push(Box::new(move || {
                    check_docker_socket(live.inspector, live.document, &service)
                }));
            }
            {
                let service = service.clone();
                thunks.push(Box::new(move || {
                    check_dns_forced(live.inspector, live.document, &service)
                }));
            }
            {
                let service = service.clone();
                thunks.push(Box::new(move || {
                    check_egress_blocked(live.inspector, network, &service)
                }));
            }
            {
                let service = service.clone();
                thunks.push(Box::new(move || {
                    check_egress_allowed(live.inspector, network, &service)
                }));
            }
            thunks.push(Box::new(move || {
                check_direct_ip(
                    live.inspector,
                    &service,
                    live.direct_ip_policy,
                    network.egress_mode,
                )
            }));
            thunks
        }
    }
}
