//! Live checks executed against the running stack.

use ocs_profile::{DirectIpPolicy, EgressMode, NetworkPolicy};

use super::declaration::compose_socket_mounts;
use super::{
    DIRECT_IP, DNS_FORCED, DOCKER_SOCKET, EGRESS_ALLOWED, EGRESS_BLOCKED, FIREWALL, NON_ROOT,
    TMPFS_RUNTIME,
};
use crate::compose::ComposeDocument;
use crate::config::VerifierConfig;
use crate::inspect::StackInspector;
use crate::process::short_error;
use crate::report::{CheckResult, CheckStatus};

const DIRECT_IP_WARN_TEXT: &str = "DNS allowlist blocks domains, but direct-to-IP HTTPS may still work. For stronger enforcement, tighten outbound 443 to an IP allowlist or force all egress through a proxy/egress gateway.";
const DIRECT_IP_HARDENING_TEXT: &str =
    "To actually block direct-to-IP, enable hardened egress mode (proxy-only egress).";

/// First candidate the allowlist does not cover (case-insensitive), falling
/// back to the first candidate when every one is allowlisted.
pub fn pick_blocked_domain(candidates: &[String], network: &NetworkPolicy) -> String {
    candidates
        .iter()
        .find(|candidate| !network.allows_domain(candidate))
        .or_else(|| candidates.first())
        .cloned()
        .unwrap_or_else(|| "example.com".to_string())
}

pub fn check_tmpfs_runtime(inspector: &StackInspector<'_>) -> CheckResult {
    let config = inspector.config();
    let container_id = match inspector.container_id(&config.gateway_service) {
        Ok(container_id) => container_id,
        Err(error) => return CheckResult::fail(TMPFS_RUNTIME, error.to_string()),
    };
    let tmpfs = match inspector.host_tmpfs(&container_id) {
        Ok(tmpfs) => tmpfs,
        Err(error) => return CheckResult::fail(TMPFS_RUNTIME, error.to_string()),
    };
    let missing = config
        .runtime_tmpfs_paths
        .iter()
        .filter(|path| !tmpfs.contains_key(path.as_str()))
        .map(String::as_str)
        .collect::<Vec<_>>();
    if !missing.is_empty() {
        return CheckResult::fail(
            TMPFS_RUNTIME,
            format!(
                "HostConfig.Tmpfs missing required runtime paths: {}",
                missing.join(", ")
            ),
        );
    }
    CheckResult::pass(
        TMPFS_RUNTIME,
        format!(
            "{} present in HostConfig.Tmpfs",
            config.runtime_tmpfs_paths.join(", ")
        ),
    )
}

fn is_numeric_id(value: &str) -> bool {
    !value.is_empty() && value.bytes().all(|byte| byte.is_ascii_digit())
}

pub fn check_non_root(inspector: &StackInspector<'_>, service: &str) -> CheckResult {
    let output = inspector.exec(service, &["sh", "-lc", "id -u; id -g"]);
    if !output.success() {
        return CheckResult::fail(NON_ROOT, format!("{service}: {}", short_error(&output)));
    }
    let stdout = output.stdout_trimmed();
    let mut lines = stdout.lines().map(str::trim);
    let uid = lines.next().unwrap_or_default();
    let gid = lines.next().unwrap_or_default();
    if !is_numeric_id(uid) || !is_numeric_id(gid) {
        return CheckResult::fail(
            NON_ROOT,
            format!("Unable to parse runtime uid/gid from '{stdout}'"),
        );
    }
    if uid == "0" {
        return CheckResult::fail(NON_ROOT, format!("uid={uid} gid={gid} (root is not allowed)"));
    }
    CheckResult::pass(NON_ROOT, format!("uid={uid} gid={gid} (non-root)"))
}

fn declared_socket_failure(config: &VerifierConfig, document: &ComposeDocument) -> Option<CheckResult> {
    let mounts = compose_socket_mounts(config, document);
    if mounts.is_empty() {
        return None;
    }
    Some(CheckResult::fail(
        DOCKER_SOCKET,
        format!("Compose mounts docker socket: {}", mounts.join(", ")),
    ))
}

/// Declaration half only, used when the runtime probe cannot be trusted.
pub fn check_docker_socket_declared(
    config: &VerifierConfig,
    document: &ComposeDocument,
    skip_reason: &str,
) -> CheckResult {
    declared_socket_failure(config, document).unwrap_or_else(|| {
        CheckResult::warn(
            DOCKER_SOCKET,
            format!("SKIP: {skip_reason}. Compose check passed (no docker socket mount)."),
        )
    })
}

pub fn check_docker_socket(
    inspector: &StackInspector<'_>,
    document: &ComposeDocument,
    service: &str,
) -> CheckResult {
    let config = inspector.config();
    if let Some(failure) = declared_socket_failure(config, document) {
        return failure;
    }

    let probe = format!("test ! -S {}", config.docker_socket_path);
    let output = inspector.exec(service, &["sh", "-lc", &probe]);
    if !output.success() {
        return CheckResult::fail(
            DOCKER_SOCKET,
            format!(
                "Socket exists in container or check failed: {}",
                short_error(&output)
            ),
        );
    }
    CheckResult::pass(
        DOCKER_SOCKET,
        "No docker socket mount detected in compose or runtime.",
    )
}

pub fn check_dns_forced(
    inspector: &StackInspector<'_>,
    document: &ComposeDocument,
    service: &str,
) -> CheckResult {
    let config = inspector.config();
    let resolver = config.dns_resolver_ip.as_str();
    let missing = document
        .stack_service_names(&config.stack_service_prefix)
        .into_iter()
        .filter(|name| {
            !document
                .service(name)
                .is_some_and(|declared| declared.dns_entries().iter().any(|entry| entry == resolver))
        })
        .collect::<Vec<_>>();
    if !missing.is_empty() {
        return CheckResult::fail(
            DNS_FORCED,
            format!("Compose DNS missing {resolver} on: {}", missing.join(", ")),
        );
    }

    let container_id = match inspector.container_id(service) {
        Ok(container_id) => container_id,
        Err(error) => return CheckResult::fail(DNS_FORCED, error.to_string()),
    };
    let runtime_dns = match inspector.host_dns(&container_id) {
        Ok(runtime_dns) => runtime_dns,
        Err(error) => return CheckResult::fail(DNS_FORCED, error.to_string()),
    };
    let rendered = serde_json::to_string(&runtime_dns).unwrap_or_default();
    let status = if runtime_dns.iter().any(|entry| entry == resolver) {
        CheckStatus::Pass
    } else {
        CheckStatus::Fail
    };
    CheckResult::new(status, DNS_FORCED, format!("runtime dns={rendered}"))
}

pub fn check_egress_blocked(
    inspector: &StackInspector<'_>,
    network: &NetworkPolicy,
    service: &str,
) -> CheckResult {
    let domain = pick_blocked_domain(&inspector.config().blocked_domain_candidates, network);
    let url = format!("https://{domain}");
    let output = inspector.exec_curl(service, &[], &url);
    if output.success() {
        return CheckResult::fail(EGRESS_BLOCKED, format!("curl {url} unexpectedly succeeded"));
    }
    CheckResult::pass(
        EGRESS_BLOCKED,
        format!("curl {url} blocked as expected ({})", short_error(&output)),
    )
}

pub fn check_egress_allowed(
    inspector: &StackInspector<'_>,
    network: &NetworkPolicy,
    service: &str,
) -> CheckResult {
    let Some(domain) = network.allow.first() else {
        return CheckResult::fail(EGRESS_ALLOWED, "No allowlisted domains in profile.");
    };
    let url = format!("https://{domain}");
    let output = inspector.exec_curl(service, &[], &url);
    if output.success() {
        return CheckResult::pass(EGRESS_ALLOWED, format!("curl {url} succeeded"));
    }
    CheckResult::fail(
        EGRESS_ALLOWED,
        format!("curl {url} failed ({})", short_error(&output)),
    )
}

/// Reachability of a literal IP over HTTPS. Success means the domain
/// allowlist can be bypassed; its severity follows `policy`.
pub fn check_direct_ip(
    inspector: &StackInspector<'_>,
    service: &str,
    policy: DirectIpPolicy,
    egress_mode: EgressMode,
) -> CheckResult {
    let target = inspector.config().direct_ip_target.as_str();
    let reachable_status = match policy {
        DirectIpPolicy::Warn => CheckStatus::Warn,
        DirectIpPolicy::Fail => CheckStatus::Fail,
    };
    let reachable = |method: String| {
        CheckResult::new(
            reachable_status,
            DIRECT_IP,
            format!(
                "{DIRECT_IP_WARN_TEXT} {DIRECT_IP_HARDENING_TEXT} Policy={policy}. EgressMode={egress_mode}. Method={method} to {target} succeeded."
            ),
        )
    };

    let has_curl = inspector.exec(service, &["sh", "-lc", "command -v curl >/dev/null 2>&1"]);
    if has_curl.success() {
        let output = inspector.exec_curl(service, &["-k"], target);
        if output.success() {
            return reachable(format!("{service} curl"));
        }
        return CheckResult::pass(
            DIRECT_IP,
            format!("{service} curl to {target} failed ({})", short_error(&output)),
        );
    }

    tracing::debug!(service, "runtime image lacks curl; using probe container");
    let container_id = match inspector.container_id(service) {
        Ok(container_id) => container_id,
        Err(error) => {
            return CheckResult::fail(
                DIRECT_IP,
                format!("Unable to determine {service} container for fallback: {error}"),
            )
        }
    };
    let network = match inspector.container_network(&container_id) {
        Ok(network) => network,
        Err(error) => {
            return CheckResult::fail(
                DIRECT_IP,
                format!("Unable to determine {service} network for fallback: {error}"),
            )
        }
    };
    let probe_image = inspector.config().probe_image.as_str();
    let output = inspector.probe_on_network(&network, target);
    if output.success() {
        return reachable(format!("fallback {probe_image} on network '{network}'"));
    }
    CheckResult::pass(
        DIRECT_IP,
        format!(
            "fallback {probe_image} to {target} failed ({})",
            short_error(&output)
        ),
    )
}

pub fn check_firewall(inspector: &StackInspector<'_>) -> CheckResult {
    match inspector.firewall_enablement() {
        Ok(state) => {
            let status = if state == "enabled" {
                CheckStatus::Pass
            } else {
                CheckStatus::Fail
            };
            CheckResult::new(
                status,
                FIREWALL,
                format!("systemctl is-enabled returned '{state}'"),
            )
        }
        Err(error) => CheckResult::fail(FIREWALL, error.to_string()),
    }
}
