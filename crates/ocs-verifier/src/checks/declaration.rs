//! Static checks over the generated compose declaration and env file.

use regex::Regex;

use super::{
    GATEWAY_TOKEN, NO_HARDCODED_PORTS, PORT_EXPOSURE, SELECTED_PORTS, TMPFS_OVERLAY,
    TOKEN_EXTERNALIZED,
};
use crate::compose::{ComposeDocument, ComposeSnapshot, PortBinding};
use crate::config::{PortRole, VerifierConfig};
use crate::report::CheckResult;
use crate::stack::{EnvSnapshot, COMPOSE_FILE_NAME};

fn parse_port_value(value: Option<&str>) -> Option<u16> {
    let trimmed = value?.trim();
    if trimmed.is_empty() || !trimmed.bytes().all(|byte| byte.is_ascii_digit()) {
        return None;
    }
    trimmed.parse::<u16>().ok()
}

pub fn check_gateway_token(config: &VerifierConfig, env: &EnvSnapshot) -> CheckResult {
    let key = &config.secret_env_key;
    let env = match env.env() {
        Ok(env) => env,
        Err(error) => return CheckResult::fail(GATEWAY_TOKEN, error),
    };
    let secret = env.trimmed(key);
    if secret.is_empty() {
        return CheckResult::fail(GATEWAY_TOKEN, format!("{key} is missing in .env."));
    }
    if secret == config.secret_placeholder {
        return CheckResult::fail(
            GATEWAY_TOKEN,
            format!("{key} is still set to '{}'.", config.secret_placeholder),
        );
    }
    let length = secret.chars().count();
    if length < config.min_secret_length {
        return CheckResult::fail(
            GATEWAY_TOKEN,
            format!(
                "{key} is too short ({length} chars; expected >= {}).",
                config.min_secret_length
            ),
        );
    }
    CheckResult::pass(GATEWAY_TOKEN, format!("{key} is set (length={length})."))
}

pub fn check_tmpfs_overlay(config: &VerifierConfig, compose: &ComposeSnapshot) -> CheckResult {
    let document = match compose.document() {
        Ok(document) => document,
        Err(error) => return CheckResult::fail(TMPFS_OVERLAY, error),
    };
    let Some(gateway) = document.service(&config.gateway_service) else {
        return CheckResult::fail(
            TMPFS_OVERLAY,
            format!(
                "{} service is missing from {COMPOSE_FILE_NAME}.",
                config.gateway_service
            ),
        );
    };

    let missing = config
        .runtime_tmpfs_paths
        .iter()
        .filter(|path| !gateway.declares_tmpfs(path))
        .map(String::as_str)
        .collect::<Vec<_>>();
    if !missing.is_empty() {
        return CheckResult::fail(
            TMPFS_OVERLAY,
            format!(
                "Missing tmpfs entries for: {}. Expected entries like: {}",
                missing.join(", "),
                config.runtime_tmpfs_examples.join(" ; ")
            ),
        );
    }
    CheckResult::pass(
        TMPFS_OVERLAY,
        format!(
            "tmpfs configured on {}: {}",
            config.gateway_service,
            gateway.tmpfs_entries().join(", ")
        ),
    )
}

pub fn check_token_externalized(
    config: &VerifierConfig,
    compose: &ComposeSnapshot,
    env: &EnvSnapshot,
) -> CheckResult {
    let key = &config.secret_env_key;
    let interpolation = format!("${{{key}}}");
    let source = match compose.source() {
        Ok(source) => source,
        Err(error) => return CheckResult::fail(TOKEN_EXTERNALIZED, error),
    };
    if !source.contains(&interpolation) {
        return CheckResult::fail(
            TOKEN_EXTERNALIZED,
            format!("{COMPOSE_FILE_NAME} is missing {interpolation} interpolation."),
        );
    }
    let env = match env.env() {
        Ok(env) => env,
        Err(error) => return CheckResult::fail(TOKEN_EXTERNALIZED, error),
    };
    let secret = env.trimmed(key);
    if !secret.is_empty() && secret != config.secret_placeholder && source.contains(secret) {
        return CheckResult::fail(
            TOKEN_EXTERNALIZED,
            format!("{COMPOSE_FILE_NAME} contains the literal gateway token from .env."),
        );
    }
    CheckResult::pass(
        TOKEN_EXTERNALIZED,
        format!("{COMPOSE_FILE_NAME} uses {interpolation} and does not contain the literal token."),
    )
}

fn render_role_ports(selected: &[(&PortRole, u16)]) -> String {
    selected
        .iter()
        .map(|(role, port)| format!("{}={port}", role.label))
        .collect::<Vec<_>>()
        .join(", ")
}

pub fn check_selected_ports(
    config: &VerifierConfig,
    compose: &ComposeSnapshot,
    env: &EnvSnapshot,
) -> CheckResult {
    let env = match env.env() {
        Ok(env) => env,
        Err(error) => return CheckResult::fail(SELECTED_PORTS, error),
    };

    let mut invalid_keys = Vec::new();
    let mut selected = Vec::with_capacity(config.port_roles.len());
    for role in &config.port_roles {
        let host = parse_port_value(env.get(&role.host_env_key));
        let container = parse_port_value(env.get(&role.container_env_key));
        if host.is_none() {
            invalid_keys.push(role.host_env_key.as_str());
        }
        if container.is_none() {
            invalid_keys.push(role.container_env_key.as_str());
        }
        if let Some(host) = host {
            selected.push((role, host));
        }
    }
    if !invalid_keys.is_empty() {
        return CheckResult::fail(
            SELECTED_PORTS,
            format!(
                "Port values in .env must be integers for host and container ports (invalid: {}).",
                invalid_keys.join(", ")
            ),
        );
    }

    for (role, port) in &selected {
        if !role.contains(*port) {
            return CheckResult::fail(
                SELECTED_PORTS,
                format!(
                    "{}={port} is outside {}-{}.",
                    role.host_env_key, role.min_port, role.max_port
                ),
            );
        }
    }
    for (index, (role, port)) in selected.iter().enumerate() {
        if let Some((other, _)) = selected[index + 1..]
            .iter()
            .find(|(_, other_port)| other_port == port)
        {
            return CheckResult::fail(
                SELECTED_PORTS,
                format!(
                    "{} and {} must be distinct.",
                    role.host_env_key, other.host_env_key
                ),
            );
        }
    }

    let source = match compose.source() {
        Ok(source) => source,
        Err(error) => return CheckResult::fail(SELECTED_PORTS, error),
    };
    let missing_interpolations = config
        .port_roles
        .iter()
        .flat_map(|role| [role.host_interpolation(), role.container_interpolation()])
        .filter(|interpolation| !source.contains(interpolation.as_str()))
        .collect::<Vec<_>>();
    if !missing_interpolations.is_empty() {
        return CheckResult::fail(
            SELECTED_PORTS,
            format!(
                "{COMPOSE_FILE_NAME} must use host and container port interpolation variables (missing: {}).",
                missing_interpolations.join(", ")
            ),
        );
    }

    let rendered = render_role_ports(&selected);
    if selected
        .iter()
        .any(|(role, port)| *port != role.default_port)
    {
        return CheckResult::warn(
            SELECTED_PORTS,
            format!("Ports were auto-adjusted due to collision ({rendered})."),
        );
    }
    CheckResult::pass(
        SELECTED_PORTS,
        format!("Using default ports ({rendered}) within allowed range."),
    )
}

pub fn check_no_hardcoded_ports(config: &VerifierConfig, compose: &ComposeSnapshot) -> CheckResult {
    let source = match compose.source() {
        Ok(source) => source,
        Err(error) => return CheckResult::fail(NO_HARDCODED_PORTS, error),
    };
    if !source.contains(&config.internal_gateway_url) {
        return CheckResult::fail(
            NO_HARDCODED_PORTS,
            format!(
                "Internal gateway URL must use {}.",
                config.internal_gateway_url
            ),
        );
    }

    let defaults = config
        .port_roles
        .iter()
        .map(|role| role.default_port.to_string())
        .collect::<Vec<_>>();
    let literal_pattern = format!(r"\b(?:{})\b", defaults.join("|"));
    let literals = match Regex::new(&literal_pattern) {
        Ok(pattern) => pattern,
        Err(error) => {
            return CheckResult::fail(
                NO_HARDCODED_PORTS,
                format!("invalid port literal pattern: {error}"),
            )
        }
    };
    if literals.is_match(source) {
        return CheckResult::fail(
            NO_HARDCODED_PORTS,
            format!(
                "{COMPOSE_FILE_NAME} contains hardcoded {} literals.",
                defaults.join("/")
            ),
        );
    }
    CheckResult::pass(
        NO_HARDCODED_PORTS,
        format!("{COMPOSE_FILE_NAME} uses interpolation for gateway/bridge ports and URL."),
    )
}

fn render_bindings(bindings: &[&PortBinding]) -> String {
    bindings
        .iter()
        .map(|binding| binding.raw.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

pub fn check_port_exposure(
    config: &VerifierConfig,
    compose: &ComposeSnapshot,
    runtime_service: Option<&str>,
    public_listen: bool,
) -> CheckResult {
    let document = match compose.document() {
        Ok(document) => document,
        Err(error) => return CheckResult::fail(PORT_EXPOSURE, error),
    };
    let Some(runtime_service) = runtime_service else {
        return CheckResult::fail(
            PORT_EXPOSURE,
            missing_runtime_service_reason(&config.runtime_service_candidates),
        );
    };

    let bindings = document
        .service(runtime_service)
        .map(|service| service.port_bindings())
        .unwrap_or_default();
    let required_ports = config
        .port_roles
        .iter()
        .map(PortRole::container_interpolation)
        .collect::<Vec<_>>();
    let missing = required_ports
        .iter()
        .filter(|port| !bindings.iter().any(|binding| &binding.container_port == *port))
        .map(String::as_str)
        .collect::<Vec<_>>();
    if !missing.is_empty() {
        return CheckResult::fail(
            PORT_EXPOSURE,
            format!(
                "Missing published ports on {runtime_service}: {}",
                missing.join(", ")
            ),
        );
    }

    let required_bindings = bindings
        .iter()
        .filter(|binding| required_ports.contains(&binding.container_port))
        .collect::<Vec<_>>();
    if !public_listen {
        let non_local = required_bindings
            .iter()
            .copied()
            .filter(|binding| !binding.is_loopback())
            .collect::<Vec<_>>();
        if !non_local.is_empty() {
            return CheckResult::fail(
                PORT_EXPOSURE,
                format!(
                    "public_listen=false but found non-local bindings: {}",
                    render_bindings(&non_local)
                ),
            );
        }
        return CheckResult::pass(
            PORT_EXPOSURE,
            format!(
                "public_listen=false and ports are localhost-only: {}",
                render_bindings(&required_bindings)
            ),
        );
    }

    let public = required_bindings
        .iter()
        .copied()
        .filter(|binding| binding.is_public())
        .collect::<Vec<_>>();
    if !public.is_empty() {
        return CheckResult::warn(
            PORT_EXPOSURE,
            format!(
                "public_listen=true and public bindings are enabled: {}",
                render_bindings(&public)
            ),
        );
    }
    CheckResult::pass(
        PORT_EXPOSURE,
        "public_listen=true but ports are not publicly bound.",
    )
}

pub fn missing_runtime_service_reason(candidates: &[String]) -> String {
    format!(
        "No runtime service found. Expected one of: {}",
        candidates.join(", ")
    )
}

/// `<service>: <volume>` for every stack service volume that mounts the
/// container runtime control socket.
pub fn compose_socket_mounts(config: &VerifierConfig, document: &ComposeDocument) -> Vec<String> {
    let socket_path = config.docker_socket_path.as_str();
    document
        .stack_service_names(&config.stack_service_prefix)
        .into_iter()
        .filter_map(|name| document.service(name).map(|service| (name, service)))
        .flat_map(move |(name, service)| {
            service
                .volumes
                .iter()
                .filter(move |volume| volume.mentions(socket_path))
                .map(move |volume| format!("{name}: {}", volume.describe()))
        })
        .collect()
}
