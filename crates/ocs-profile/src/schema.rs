//! Typed profile schema with defaults, aliases, and exhaustive validation.

use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;
use serde_yaml::{Mapping, Value};

const DOMAIN_PATTERN: &str = r"^[a-zA-Z0-9.-]+$";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "kebab-case")]
/// How outbound traffic is constrained for gateway services.
pub enum EgressMode {
    #[default]
    DnsAllowlist,
    ProxyOnly,
}

impl EgressMode {
    pub fn as_str(self) -> &'static str {
        match self {
            EgressMode::DnsAllowlist => "dns-allowlist",
            EgressMode::ProxyOnly => "proxy-only",
        }
    }
}

impl FromStr for EgressMode {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "dns-allowlist" => Ok(Self::DnsAllowlist),
            "proxy-only" => Ok(Self::ProxyOnly),
            _ => Err("expected one of dns-allowlist|proxy-only".to_string()),
        }
    }
}

impl fmt::Display for EgressMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
/// Severity applied when direct-to-IP HTTPS bypasses domain allowlisting.
pub enum DirectIpPolicy {
    #[default]
    Warn,
    Fail,
}

impl DirectIpPolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            DirectIpPolicy::Warn => "warn",
            DirectIpPolicy::Fail => "fail",
        }
    }
}

impl FromStr for DirectIpPolicy {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "warn" => Ok(Self::Warn),
            "fail" => Ok(Self::Fail),
            _ => Err("expected one of warn|fail".to_string()),
        }
    }
}

impl fmt::Display for DirectIpPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EgressDefault {
    #[default]
    Deny,
    Allow,
}

impl FromStr for EgressDefault {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "deny" => Ok(Self::Deny),
            "allow" => Ok(Self::Allow),
            _ => Err("expected one of deny|allow".to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecApproval {
    Allow,
    Require,
    Deny,
}

impl FromStr for ExecApproval {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "allow" => Ok(Self::Allow),
            "require" => Ok(Self::Require),
            "deny" => Ok(Self::Deny),
            _ => Err("expected one of allow|require|deny".to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct WebUiSettings {
    pub enabled: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct GatewaySettings {
    pub public_listen: bool,
    pub allow_unconfigured: bool,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            public_listen: false,
            allow_unconfigured: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ApprovalSettings {
    pub exec: ExecApproval,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OpenclawSettings {
    pub webui: WebUiSettings,
    pub gateway: GatewaySettings,
    pub approvals: ApprovalSettings,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct NetworkPolicy {
    pub egress_default: EgressDefault,
    pub egress_mode: EgressMode,
    pub direct_ip_policy: DirectIpPolicy,
    /// Ordered domain allowlist; comparisons against it are case-insensitive.
    pub allow: Vec<String>,
    pub allow_ports: Vec<u16>,
}

impl NetworkPolicy {
    pub fn allows_domain(&self, domain: &str) -> bool {
        self.allow
            .iter()
            .any(|entry| entry.eq_ignore_ascii_case(domain))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
/// Validated deployment policy profile.
pub struct PolicyProfile {
    pub openclaw: OpenclawSettings,
    pub network: NetworkPolicy,
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// One schema violation, addressed by dotted path (`(root)` for the document).
pub struct ProfileIssue {
    pub path: String,
    pub message: String,
}

impl fmt::Display for ProfileIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let path = if self.path.is_empty() {
            "(root)"
        } else {
            self.path.as_str()
        };
        write!(f, "{}: {}", path, self.message)
    }
}

fn is_valid_domain(domain: &str) -> bool {
    static DOMAIN: OnceLock<Option<Regex>> = OnceLock::new();
    DOMAIN
        .get_or_init(|| Regex::new(DOMAIN_PATTERN).ok())
        .as_ref()
        .is_some_and(|pattern| pattern.is_match(domain))
}

#[derive(Default)]
struct IssueCollector {
    issues: Vec<ProfileIssue>,
}

impl IssueCollector {
    fn push(&mut self, path: &str, message: impl Into<String>) {
        self.issues.push(ProfileIssue {
            path: path.to_string(),
            message: message.into(),
        });
    }
}

fn join_path(parent: &str, key: &str) -> String {
    if parent.is_empty() {
        key.to_string()
    } else {
        format!("{parent}.{key}")
    }
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Sequence(_) => "array",
        Value::Mapping(_) => "object",
        Value::Tagged(_) => "tagged value",
    }
}

fn section<'a>(
    parent: &'a Mapping,
    parent_path: &str,
    key: &str,
    required: bool,
    issues: &mut IssueCollector,
) -> Option<&'a Mapping> {
    let path = join_path(parent_path, key);
    match parent.get(key) {
        None | Some(Value::Null) => {
            if required {
                issues.push(&path, "required");
            }
            None
        }
        Some(Value::Mapping(mapping)) => Some(mapping),
        Some(other) => {
            issues.push(&path, format!("expected object, received {}", value_kind(other)));
            None
        }
    }
}

fn read_bool(
    map: Option<&Mapping>,
    parent_path: &str,
    key: &str,
    default: bool,
    issues: &mut IssueCollector,
) -> bool {
    let Some(value) = map.and_then(|map| map.get(key)) else {
        return default;
    };
    match value {
        Value::Null => default,
        Value::Bool(flag) => *flag,
        other => {
            issues.push(
                &join_path(parent_path, key),
                format!("expected boolean, received {}", value_kind(other)),
            );
            default
        }
    }
}

fn read_enum<T>(
    map: Option<&Mapping>,
    parent_path: &str,
    key: &str,
    issues: &mut IssueCollector,
) -> Option<T>
where
    T: FromStr<Err = String>,
{
    let value = map.and_then(|map| map.get(key))?;
    let path = join_path(parent_path, key);
    match value {
        Value::Null => None,
        Value::String(raw) => match raw.parse::<T>() {
            Ok(parsed) => Some(parsed),
            Err(message) => {
                issues.push(&path, format!("{message}, received '{raw}'"));
                None
            }
        },
        other => {
            issues.push(&path, format!("expected string, received {}", value_kind(other)));
            None
        }
    }
}

fn read_sequence<'a>(
    map: Option<&'a Mapping>,
    parent_path: &str,
    key: &str,
    issues: &mut IssueCollector,
) -> &'a [Value] {
    match map.and_then(|map| map.get(key)) {
        None | Some(Value::Null) => &[],
        Some(Value::Sequence(items)) => items.as_slice(),
        Some(other) => {
            issues.push(
                &join_path(parent_path, key),
                format!("expected array, received {}", value_kind(other)),
            );
            &[]
        }
    }
}

fn read_domains(items: &[Value], path: &str, issues: &mut IssueCollector) -> Vec<String> {
    let mut domains = Vec::with_capacity(items.len());
    for (index, item) in items.iter().enumerate() {
        let item_path = format!("{path}.{index}");
        match item {
            Value::String(domain) if domain.is_empty() => {
                issues.push(&item_path, "domain cannot be empty");
            }
            Value::String(domain) if !is_valid_domain(domain) => {
                issues.push(&item_path, "domain contains unsupported characters");
            }
            Value::String(domain) => domains.push(domain.clone()),
            other => issues.push(
                &item_path,
                format!("expected string, received {}", value_kind(other)),
            ),
        }
    }
    domains
}

fn read_ports(items: &[Value], path: &str, issues: &mut IssueCollector) -> Vec<u16> {
    let mut ports = Vec::with_capacity(items.len());
    for (index, item) in items.iter().enumerate() {
        let item_path = format!("{path}.{index}");
        let Value::Number(number) = item else {
            issues.push(
                &item_path,
                format!("expected number, received {}", value_kind(item)),
            );
            continue;
        };
        match number.as_i64() {
            Some(port) if (1..=65_535).contains(&port) => ports.push(port as u16),
            Some(_) => issues.push(&item_path, "port must be between 1 and 65535"),
            None => issues.push(&item_path, "expected integer, received float"),
        }
    }
    ports
}

/// Validates a parsed YAML document and builds the typed profile.
///
/// Every violation is collected before returning so operators can fix the
/// profile in one pass. Unknown keys (including retired add-on sections) are
/// ignored. `network.strict_ip_egress: true` is an alias for
/// `direct_ip_policy: fail` plus `egress_mode: proxy-only`.
pub fn validate_profile_value(value: &Value) -> Result<PolicyProfile, Vec<ProfileIssue>> {
    let mut issues = IssueCollector::default();
    let Value::Mapping(root) = value else {
        issues.push(
            "",
            format!("expected object, received {}", value_kind(value)),
        );
        return Err(issues.issues);
    };

    let openclaw = section(root, "", "openclaw", true, &mut issues);
    let webui = openclaw.and_then(|map| section(map, "openclaw", "webui", false, &mut issues));
    let gateway = openclaw.and_then(|map| section(map, "openclaw", "gateway", false, &mut issues));
    let approvals = openclaw.and_then(|map| section(map, "openclaw", "approvals", true, &mut issues));
    let network = section(root, "", "network", false, &mut issues);

    let webui_settings = WebUiSettings {
        enabled: read_bool(webui, "openclaw.webui", "enabled", false, &mut issues),
    };
    let gateway_defaults = GatewaySettings::default();
    let gateway_settings = GatewaySettings {
        public_listen: read_bool(
            gateway,
            "openclaw.gateway",
            "public_listen",
            gateway_defaults.public_listen,
            &mut issues,
        ),
        allow_unconfigured: read_bool(
            gateway,
            "openclaw.gateway",
            "allow_unconfigured",
            gateway_defaults.allow_unconfigured,
            &mut issues,
        ),
    };
    let exec = read_enum::<ExecApproval>(approvals, "openclaw.approvals", "exec", &mut issues);
    if approvals.is_some()
        && matches!(
            approvals.and_then(|map| map.get("exec")),
            None | Some(Value::Null)
        )
    {
        issues.push("openclaw.approvals.exec", "required");
    }

    let egress_default =
        read_enum::<EgressDefault>(network, "network", "egress_default", &mut issues)
            .unwrap_or_default();
    let mut egress_mode =
        read_enum::<EgressMode>(network, "network", "egress_mode", &mut issues).unwrap_or_default();
    let mut direct_ip_policy =
        read_enum::<DirectIpPolicy>(network, "network", "direct_ip_policy", &mut issues)
            .unwrap_or_default();
    if read_bool(network, "network", "strict_ip_egress", false, &mut issues) {
        direct_ip_policy = DirectIpPolicy::Fail;
        egress_mode = EgressMode::ProxyOnly;
    }
    let allow = read_domains(
        read_sequence(network, "network", "allow", &mut issues),
        "network.allow",
        &mut issues,
    );
    let allow_ports = read_ports(
        read_sequence(network, "network", "allow_ports", &mut issues),
        "network.allow_ports",
        &mut issues,
    );

    match exec {
        Some(exec) if issues.issues.is_empty() => Ok(PolicyProfile {
            openclaw: OpenclawSettings {
                webui: webui_settings,
                gateway: gateway_settings,
                approvals: ApprovalSettings { exec },
            },
            network: NetworkPolicy {
                egress_default,
                egress_mode,
                direct_ip_policy,
                allow,
                allow_ports,
            },
        }),
        _ => Err(issues.issues),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(source: &str) -> Result<PolicyProfile, Vec<ProfileIssue>> {
        let value: Value = serde_yaml::from_str(source).expect("yaml");
        validate_profile_value(&value)
    }

    #[test]
    fn unit_defaults_apply_when_network_section_is_absent() {
        let profile = parse("openclaw:\n  approvals:\n    exec: require\n").expect("profile");
        assert_eq!(profile.network.direct_ip_policy, DirectIpPolicy::Warn);
        assert_eq!(profile.network.egress_mode, EgressMode::DnsAllowlist);
        assert_eq!(profile.network.egress_default, EgressDefault::Deny);
        assert!(profile.network.allow.is_empty());
        assert!(!profile.openclaw.gateway.public_listen);
        assert!(profile.openclaw.gateway.allow_unconfigured);
        assert!(!profile.openclaw.webui.enabled);
        assert_eq!(profile.openclaw.approvals.exec, ExecApproval::Require);
    }

    #[test]
    fn unit_proxy_only_egress_mode_is_accepted() {
        let profile = parse(
            "openclaw:\n  approvals:\n    exec: deny\nnetwork:\n  egress_mode: proxy-only\n",
        )
        .expect("profile");
        assert_eq!(profile.network.egress_mode, EgressMode::ProxyOnly);
        assert_eq!(profile.network.direct_ip_policy, DirectIpPolicy::Warn);
    }

    #[test]
    fn unit_strict_ip_egress_alias_forces_fail_policy_and_proxy_mode() {
        let profile = parse(
            "openclaw:\n  approvals:\n    exec: require\nnetwork:\n  strict_ip_egress: true\n",
        )
        .expect("profile");
        assert_eq!(profile.network.direct_ip_policy, DirectIpPolicy::Fail);
        assert_eq!(profile.network.egress_mode, EgressMode::ProxyOnly);
    }

    #[test]
    fn unit_legacy_addon_section_is_ignored() {
        let profile = parse(
            "openclaw:\n  approvals:\n    exec: require\nsnapper:\n  enabled: true\n",
        )
        .expect("profile");
        assert_eq!(profile.network, NetworkPolicy::default());
    }

    #[test]
    fn unit_every_violation_is_reported() {
        let issues = parse(
            "openclaw:\n  gateway:\n    public_listen: \"yes\"\n  approvals: {}\nnetwork:\n  direct_ip_policy: block\n  allow: [\"ok.example\", \"bad domain\", \"\"]\n  allow_ports: [443, 70000]\n",
        )
        .expect_err("invalid profile");
        let rendered = issues
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>();
        assert!(rendered.contains(&"openclaw.gateway.public_listen: expected boolean, received string".to_string()));
        assert!(rendered.contains(&"openclaw.approvals.exec: required".to_string()));
        assert!(rendered
            .iter()
            .any(|line| line.starts_with("network.direct_ip_policy: expected one of warn|fail")));
        assert!(rendered.contains(&"network.allow.1: domain contains unsupported characters".to_string()));
        assert!(rendered.contains(&"network.allow.2: domain cannot be empty".to_string()));
        assert!(rendered.contains(&"network.allow_ports.1: port must be between 1 and 65535".to_string()));
        assert_eq!(rendered.len(), 6);
    }

    #[test]
    fn unit_missing_openclaw_section_is_required() {
        let issues = parse("network:\n  allow: [example.org]\n").expect_err("invalid");
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].to_string(), "openclaw: required");
    }

    #[test]
    fn unit_non_mapping_document_reports_root_issue() {
        let issues = parse("- just\n- a list\n").expect_err("invalid");
        assert_eq!(issues[0].to_string(), "(root): expected object, received array");
    }

    #[test]
    fn unit_allows_domain_is_case_insensitive() {
        let profile = parse(
            "openclaw:\n  approvals:\n    exec: allow\nnetwork:\n  allow: [Example.ORG]\n",
        )
        .expect("profile");
        assert!(profile.network.allows_domain("example.org"));
        assert!(!profile.network.allows_domain("example.com"));
    }
}
