//! Tunable constants for the verification battery.
//!
//! Every value has a production default; a TOML file may override any subset
//! of top-level keys so fixtures and alternative stacks can reuse the battery.

use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
/// Host/container port pair published by one gateway role.
pub struct PortRole {
    pub label: String,
    pub host_env_key: String,
    pub container_env_key: String,
    pub default_port: u16,
    pub min_port: u16,
    pub max_port: u16,
}

impl PortRole {
    pub fn host_interpolation(&self) -> String {
        format!("${{{}}}", self.host_env_key)
    }

    pub fn container_interpolation(&self) -> String {
        format!("${{{}}}", self.container_env_key)
    }

    pub fn contains(&self, port: u16) -> bool {
        (self.min_port..=self.max_port).contains(&port)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
/// Service names, network constants, port roles, and timeouts the battery
/// checks a deployed stack against.
pub struct VerifierConfig {
    pub docker_binary: String,
    pub systemctl_binary: String,
    /// Service whose logs drive the pre-flight diagnosis.
    pub gateway_service: String,
    /// Runtime service candidates in priority order.
    pub runtime_service_candidates: Vec<String>,
    /// Services named exactly this, or prefixed with `<prefix>-`, belong to the stack.
    pub stack_service_prefix: String,
    pub dns_resolver_ip: String,
    pub firewall_unit: String,
    pub runtime_tmpfs_paths: Vec<String>,
    pub runtime_tmpfs_examples: Vec<String>,
    pub secret_env_key: String,
    pub secret_placeholder: String,
    pub min_secret_length: usize,
    pub port_roles: Vec<PortRole>,
    pub internal_gateway_url: String,
    pub blocked_domain_candidates: Vec<String>,
    pub direct_ip_target: String,
    pub probe_image: String,
    pub probe_timeout_secs: u64,
    pub command_timeout_ms: u64,
    /// Limit for `docker compose up -d`, which may pull images on first run.
    pub compose_up_timeout_ms: u64,
    pub docker_socket_path: String,
    pub diagnosis_log_tail_lines: usize,
    pub doctor_log_tail_lines: usize,
}

impl Default for VerifierConfig {
    fn default() -> Self {
        Self {
            docker_binary: "docker".to_string(),
            systemctl_binary: "systemctl".to_string(),
            gateway_service: "openclaw-gateway".to_string(),
            runtime_service_candidates: vec![
                "openclaw-gateway".to_string(),
                "openclaw".to_string(),
            ],
            stack_service_prefix: "openclaw".to_string(),
            dns_resolver_ip: "172.29.0.53".to_string(),
            firewall_unit: "openclaw-secure-firewall.service".to_string(),
            runtime_tmpfs_paths: vec![
                "/home/node/.openclaw/canvas".to_string(),
                "/home/node/.openclaw/cron".to_string(),
            ],
            runtime_tmpfs_examples: vec![
                "/home/node/.openclaw/canvas:rw,noexec,nosuid,size=64m,mode=1777".to_string(),
                "/home/node/.openclaw/cron:rw,noexec,nosuid,size=16m,mode=1777".to_string(),
            ],
            secret_env_key: "OPENCLAW_GATEWAY_TOKEN".to_string(),
            secret_placeholder: "change-me".to_string(),
            min_secret_length: 32,
            port_roles: vec![
                PortRole {
                    label: "gateway".to_string(),
                    host_env_key: "OPENCLAW_GATEWAY_PORT".to_string(),
                    container_env_key: "OPENCLAW_GATEWAY_CONTAINER_PORT".to_string(),
                    default_port: 18_789,
                    min_port: 18_789,
                    max_port: 18_889,
                },
                PortRole {
                    label: "bridge".to_string(),
                    host_env_key: "OPENCLAW_BRIDGE_HOST_PORT".to_string(),
                    container_env_key: "OPENCLAW_BRIDGE_CONTAINER_PORT".to_string(),
                    default_port: 18_790,
                    min_port: 18_790,
                    max_port: 18_890,
                },
            ],
            internal_gateway_url: "http://openclaw-gateway:${OPENCLAW_GATEWAY_CONTAINER_PORT}"
                .to_string(),
            blocked_domain_candidates: vec![
                "example.com".to_string(),
                "iana.org".to_string(),
                "wikipedia.org".to_string(),
            ],
            direct_ip_target: "https://1.1.1.1".to_string(),
            probe_image: "curlimages/curl:8.12.1".to_string(),
            probe_timeout_secs: 10,
            command_timeout_ms: 120_000,
            compose_up_timeout_ms: 600_000,
            docker_socket_path: "/var/run/docker.sock".to_string(),
            diagnosis_log_tail_lines: 60,
            doctor_log_tail_lines: 120,
        }
    }
}

impl VerifierConfig {
    /// Rejects configurations the battery cannot evaluate meaningfully.
    pub fn validate(&self) -> Result<()> {
        if self.runtime_service_candidates.is_empty() {
            bail!("runtime_service_candidates must list at least one service");
        }
        if self.runtime_tmpfs_paths.is_empty() {
            bail!("runtime_tmpfs_paths must list at least one path");
        }
        if self.blocked_domain_candidates.is_empty() {
            bail!("blocked_domain_candidates must list at least one domain");
        }
        if self.port_roles.is_empty() {
            bail!("port_roles must declare at least one role");
        }
        for role in &self.port_roles {
            if role.min_port > role.max_port {
                bail!(
                    "port role '{}' has an empty range {}-{}",
                    role.label,
                    role.min_port,
                    role.max_port
                );
            }
            if !role.contains(role.default_port) {
                bail!(
                    "port role '{}' default {} is outside {}-{}",
                    role.label,
                    role.default_port,
                    role.min_port,
                    role.max_port
                );
            }
        }
        if self.probe_timeout_secs == 0
            || self.command_timeout_ms == 0
            || self.compose_up_timeout_ms == 0
        {
            bail!(
                "probe_timeout_secs, command_timeout_ms and compose_up_timeout_ms must be positive"
            );
        }
        Ok(())
    }

    pub fn port_role(&self, label: &str) -> Option<&PortRole> {
        self.port_roles.iter().find(|role| role.label == label)
    }
}

/// Loads the verifier config, applying TOML overrides when `path` is given.
pub fn load_verifier_config(path: Option<&Path>) -> Result<VerifierConfig> {
    let config = match path {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read verifier config {}", path.display()))?;
            toml::from_str::<VerifierConfig>(&raw)
                .with_context(|| format!("failed to parse verifier config {}", path.display()))?
        }
        None => VerifierConfig::default(),
    };
    config.validate()?;
    Ok(config)
}
