//! Typed queries against the deployed stack.
//!
//! Each inspector issues exactly one external command and maps its outcome to
//! a value or an `InspectError` whose `Display` is the report detail string.

use std::collections::BTreeMap;
use std::time::Duration;

use thiserror::Error;

use crate::config::VerifierConfig;
use crate::process::{owned_args, short_error, CommandOutput, CommandRunner};
use crate::stack::StackLocation;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InspectError {
    #[error("{0}")]
    Command(String),
    #[error("{service} container id not found.")]
    ContainerNotFound { service: String },
    #[error("Container state is empty.")]
    EmptyState,
    #[error("Unable to parse {field}: {raw}")]
    MalformedJson { field: &'static str, raw: String },
    #[error("No docker network found for container {container_id}.")]
    NoNetwork { container_id: String },
}

impl InspectError {
    fn from_output(output: &CommandOutput) -> Self {
        Self::Command(short_error(output))
    }
}

/// Thin typed facade over the container runtime CLI for one deployed stack.
pub struct StackInspector<'a> {
    runner: &'a dyn CommandRunner,
    config: &'a VerifierConfig,
    location: &'a StackLocation,
}

impl<'a> StackInspector<'a> {
    pub fn new(
        runner: &'a dyn CommandRunner,
        config: &'a VerifierConfig,
        location: &'a StackLocation,
    ) -> Self {
        Self {
            runner,
            config,
            location,
        }
    }

    pub fn config(&self) -> &VerifierConfig {
        self.config
    }

    pub fn location(&self) -> &StackLocation {
        self.location
    }

    pub fn docker(&self, args: &[&str]) -> CommandOutput {
        self.runner.run(&self.config.docker_binary, &owned_args(args))
    }

    /// `docker compose -f <compose> --env-file <env> <args..>`.
    pub fn compose(&self, args: &[&str]) -> CommandOutput {
        self.runner
            .run(&self.config.docker_binary, &self.compose_args(args))
    }

    fn compose_args(&self, args: &[&str]) -> Vec<String> {
        let compose_path = self.location.compose_path.display().to_string();
        let env_path = self.location.env_path.display().to_string();
        let mut full_args = owned_args(&["compose", "-f", &compose_path, "--env-file", &env_path]);
        full_args.extend(args.iter().map(|arg| (*arg).to_string()));
        full_args
    }

    /// `compose up -d` may pull images, so it gets its own, longer limit.
    pub fn ensure_running(&self) -> Result<(), InspectError> {
        let output = self.runner.run_with_timeout(
            &self.config.docker_binary,
            &self.compose_args(&["up", "-d"]),
            Duration::from_millis(self.config.compose_up_timeout_ms),
        );
        if output.success() {
            Ok(())
        } else {
            Err(InspectError::from_output(&output))
        }
    }

    pub fn compose_config(&self) -> Result<(), InspectError> {
        let output = self.compose(&["config"]);
        if output.success() {
            Ok(())
        } else {
            Err(InspectError::from_output(&output))
        }
    }

    /// Non-zero exit and empty output are distinct failures.
    pub fn container_id(&self, service: &str) -> Result<String, InspectError> {
        let output = self.compose(&["ps", "-q", service]);
        if !output.success() {
            return Err(InspectError::from_output(&output));
        }
        let container_id = output.stdout_trimmed();
        if container_id.is_empty() {
            return Err(InspectError::ContainerNotFound {
                service: service.to_string(),
            });
        }
        tracing::debug!(service, container_id, "resolved container id");
        Ok(container_id.to_string())
    }

    fn inspect_format(&self, container_id: &str, format: &str) -> Result<String, InspectError> {
        let output = self.docker(&["inspect", container_id, "--format", format]);
        if !output.success() {
            return Err(InspectError::from_output(&output));
        }
        Ok(output.stdout_trimmed().to_string())
    }

    pub fn container_state(&self, container_id: &str) -> Result<String, InspectError> {
        let state = self.inspect_format(container_id, "{{.State.Status}}")?;
        if state.is_empty() {
            return Err(InspectError::EmptyState);
        }
        tracing::debug!(container_id, state = %state, "inspected container state");
        Ok(state)
    }

    /// First network the container is attached to.
    pub fn container_network(&self, container_id: &str) -> Result<String, InspectError> {
        let raw = self.inspect_format(container_id, "{{json .NetworkSettings.Networks}}")?;
        let networks = serde_json::from_str::<Option<BTreeMap<String, serde_json::Value>>>(&raw)
            .map_err(|_| InspectError::MalformedJson {
                field: "network metadata",
                raw: raw.clone(),
            })?
            .unwrap_or_default();
        networks
            .into_keys()
            .next()
            .ok_or_else(|| InspectError::NoNetwork {
                container_id: container_id.to_string(),
            })
    }

    /// Tmpfs mounts keyed by container path; `null` or empty yields an empty map.
    pub fn host_tmpfs(&self, container_id: &str) -> Result<BTreeMap<String, String>, InspectError> {
        let raw = self.inspect_format(container_id, "{{json .HostConfig.Tmpfs}}")?;
        if raw.is_empty() {
            return Ok(BTreeMap::new());
        }
        serde_json::from_str::<Option<BTreeMap<String, String>>>(&raw)
            .map(Option::unwrap_or_default)
            .map_err(|_| InspectError::MalformedJson {
                field: "HostConfig.Tmpfs",
                raw,
            })
    }

    pub fn host_dns(&self, container_id: &str) -> Result<Vec<String>, InspectError> {
        let raw = self.inspect_format(container_id, "{{json .HostConfig.DNS}}")?;
        if raw.is_empty() {
            return Ok(Vec::new());
        }
        serde_json::from_str::<Option<Vec<String>>>(&raw)
            .map(Option::unwrap_or_default)
            .map_err(|_| InspectError::MalformedJson {
                field: "runtime DNS config",
                raw,
            })
    }

    /// Trimmed stdout and stderr of the last `lines` log lines.
    pub fn log_tail(&self, service: &str, lines: usize) -> Result<String, InspectError> {
        let tail = lines.to_string();
        let output = self.compose(&["logs", "--no-color", "--tail", &tail, service]);
        if !output.success() {
            return Err(InspectError::from_output(&output));
        }
        Ok(output.combined_output())
    }

    /// `docker compose exec -T <service> <args..>`; the raw outcome is returned.
    pub fn exec(&self, service: &str, args: &[&str]) -> CommandOutput {
        let mut full_args = vec!["exec", "-T", service];
        full_args.extend_from_slice(args);
        self.compose(&full_args)
    }

    /// `curl -I --max-time <probe timeout> [extra..] <url>` inside the service.
    pub fn exec_curl(&self, service: &str, extra_flags: &[&str], url: &str) -> CommandOutput {
        let timeout = self.config.probe_timeout_secs.to_string();
        let mut args = vec!["curl"];
        args.extend_from_slice(extra_flags);
        args.extend_from_slice(&["-I", "--max-time", &timeout, url]);
        self.exec(service, &args)
    }

    /// Disposable probe container on `network`, running the probe image's curl.
    pub fn probe_on_network(&self, network: &str, url: &str) -> CommandOutput {
        let timeout = self.config.probe_timeout_secs.to_string();
        self.docker(&[
            "run",
            "--rm",
            "--network",
            network,
            &self.config.probe_image,
            "-k",
            "-I",
            "--max-time",
            &timeout,
            url,
        ])
    }

    /// `systemctl is-enabled <firewall unit>` output.
    pub fn firewall_enablement(&self) -> Result<String, InspectError> {
        let output = self.runner.run(
            &self.config.systemctl_binary,
            &owned_args(&["is-enabled", &self.config.firewall_unit]),
        );
        if !output.success() {
            return Err(InspectError::from_output(&output));
        }
        Ok(output.stdout_trimmed().to_string())
    }
}
