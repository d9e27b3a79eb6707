use std::fs;
use std::path::{Path, PathBuf};

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::{tempdir, TempDir};

const PROFILE: &str = "openclaw:\n  approvals:\n    exec: require\nnetwork:\n  allow:\n    - example.org\n";

const COMPOSE: &str = r#"services:
  openclaw-gateway:
    image: openclaw:local
    environment:
      OPENCLAW_GATEWAY_TOKEN: ${OPENCLAW_GATEWAY_TOKEN}
      OPENCLAW_GATEWAY_URL: http://openclaw-gateway:${OPENCLAW_GATEWAY_CONTAINER_PORT}
    ports:
      - "127.0.0.1:${OPENCLAW_GATEWAY_PORT}:${OPENCLAW_GATEWAY_CONTAINER_PORT}"
      - "127.0.0.1:${OPENCLAW_BRIDGE_HOST_PORT}:${OPENCLAW_BRIDGE_CONTAINER_PORT}"
    tmpfs:
      - /home/node/.openclaw/canvas:rw,noexec,nosuid,size=64m,mode=1777
      - /home/node/.openclaw/cron:rw,noexec,nosuid,size=16m,mode=1777
    dns:
      - 172.29.0.53
"#;

const ENV: &str = "OPENCLAW_GATEWAY_TOKEN=9e8d7c6b5a4f3e2d1c0b9a8f7e6d5c4b3a2f1e0d\nOPENCLAW_GATEWAY_PORT=18789\nOPENCLAW_BRIDGE_HOST_PORT=18790\nOPENCLAW_GATEWAY_CONTAINER_PORT=18789\nOPENCLAW_BRIDGE_CONTAINER_PORT=18790\n";

/// Stand-in container runtime answering the inspections of a healthy stack.
const FAKE_DOCKER: &str = r#"#!/bin/sh
case "$*" in
  *"ps -q"*) echo c0ffee ;;
  *".State.Status"*) echo running ;;
  *"HostConfig.Tmpfs"*) echo '{"/home/node/.openclaw/canvas":"rw","/home/node/.openclaw/cron":"rw"}' ;;
  *"id -u"*) printf '1000\n1000\n' ;;
  *"HostConfig.DNS"*) echo '["172.29.0.53"]' ;;
  *"https://example.com"*) echo "curl: (6) Could not resolve host: example.com" >&2; exit 6 ;;
  *"https://1.1.1.1"*) echo "HTTP/2 301" ;;
esac
exit 0
"#;

const FAKE_SYSTEMCTL: &str = "#!/bin/sh\necho enabled\n";

const DENIED_DOCKER: &str =
    "#!/bin/sh\necho \"permission denied while trying to connect to the Docker daemon socket\" >&2\nexit 1\n";

fn binary_command() -> Command {
    Command::new(assert_cmd::cargo::cargo_bin!("ocs"))
}

struct Workspace {
    tempdir: TempDir,
}

impl Workspace {
    fn new() -> Self {
        let tempdir = tempdir().expect("tempdir");
        let root = tempdir.path();
        fs::create_dir_all(root.join("profiles")).expect("profiles");
        fs::create_dir_all(root.join("out").join("dev")).expect("out");
        fs::create_dir_all(root.join("bin")).expect("bin");
        fs::write(root.join("profiles").join("dev.yaml"), PROFILE).expect("profile");
        fs::write(root.join("out/dev/docker-compose.yml"), COMPOSE).expect("compose");
        fs::write(root.join("out/dev/.env"), ENV).expect("env");
        Self { tempdir }
    }

    fn root(&self) -> &Path {
        self.tempdir.path()
    }

    #[cfg(unix)]
    fn install_script(&self, name: &str, body: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;

        let path = self.root().join("bin").join(name);
        fs::write(&path, body).expect("script");
        let mut permissions = fs::metadata(&path).expect("metadata").permissions();
        permissions.set_mode(0o755);
        fs::set_permissions(&path, permissions).expect("chmod");
        path
    }

    fn write_config(&self, docker: &Path, systemctl: &Path) -> PathBuf {
        let path = self.root().join("ocs.toml");
        fs::write(
            &path,
            format!(
                "docker_binary = \"{}\"\nsystemctl_binary = \"{}\"\ncommand_timeout_ms = 20000\n",
                docker.display(),
                systemctl.display()
            ),
        )
        .expect("config");
        path
    }

    fn command(&self) -> Command {
        let mut command = binary_command();
        command
            .current_dir(self.root())
            .env_remove("OCS_ROOT")
            .env_remove("OCS_CONFIG")
            .env_remove("RUST_LOG");
        command
    }
}

#[test]
fn functional_help_lists_verify_and_doctor() {
    binary_command()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("verify"))
        .stdout(predicate::str::contains("doctor"));
}

#[test]
fn regression_verify_unknown_profile_fails_before_touching_the_stack() {
    let workspace = Workspace::new();
    workspace
        .command()
        .args(["verify", "--profile", "missing", "--output", "report.md"])
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("Profile not found: 'missing'"));
    assert!(!workspace.root().join("report.md").exists());
}

#[test]
fn regression_invalid_config_override_is_fatal() {
    let workspace = Workspace::new();
    let config = workspace.root().join("ocs.toml");
    fs::write(&config, "resolver = \"10.0.0.53\"\n").expect("config");
    workspace
        .command()
        .args(["verify", "--profile", "dev", "--output", "report.md"])
        .arg("--config")
        .arg(&config)
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("failed to parse verifier config"));
}

#[test]
fn integration_root_can_be_supplied_through_environment() {
    let workspace = Workspace::new();
    let elsewhere = tempdir().expect("cwd");
    binary_command()
        .current_dir(elsewhere.path())
        .env("OCS_ROOT", workspace.root())
        .env_remove("OCS_CONFIG")
        .args(["verify", "--profile", "absent", "--output", "report.md"])
        .assert()
        .failure()
        .stderr(predicate::str::contains(
            workspace.root().join("profiles").display().to_string(),
        ));
}

#[cfg(unix)]
#[test]
fn integration_verify_writes_report_and_passes_with_only_warnings() {
    let workspace = Workspace::new();
    let docker = workspace.install_script("docker", FAKE_DOCKER);
    let systemctl = workspace.install_script("systemctl", FAKE_SYSTEMCTL);
    let config = workspace.write_config(&docker, &systemctl);

    workspace
        .command()
        .args(["verify", "--profile", "dev", "--output", "report.md"])
        .arg("--config")
        .arg(&config)
        .assert()
        .success()
        .stdout(predicate::str::contains("Wrote security report to report.md"))
        .stdout(predicate::str::contains("PASS: 13  WARN: 1  FAIL: 0"));

    let report = fs::read_to_string(workspace.root().join("report.md")).expect("report");
    assert!(report.starts_with("# Security Report\n"));
    assert!(report.contains("- WARN: Direct-to-IP HTTPS reachable — "));
}

#[cfg(unix)]
#[test]
fn integration_verify_strict_ip_egress_exits_non_zero() {
    let workspace = Workspace::new();
    let docker = workspace.install_script("docker", FAKE_DOCKER);
    let systemctl = workspace.install_script("systemctl", FAKE_SYSTEMCTL);
    let config = workspace.write_config(&docker, &systemctl);

    workspace
        .command()
        .args([
            "verify",
            "--profile",
            "dev",
            "--output",
            "report.md",
            "--strict-ip-egress",
        ])
        .arg("--config")
        .arg(&config)
        .assert()
        .failure()
        .code(1)
        .stdout(predicate::str::contains("PASS: 13  WARN: 0  FAIL: 1"))
        .stderr(predicate::str::contains(
            "Verification failed with 1 failed check(s).",
        ));
}

#[cfg(unix)]
#[test]
fn integration_doctor_reports_permission_problems_and_suggests_sudo() {
    let workspace = Workspace::new();
    let docker = workspace.install_script("docker", DENIED_DOCKER);
    let systemctl = workspace.install_script("systemctl", FAKE_SYSTEMCTL);
    let config = workspace.write_config(&docker, &systemctl);

    workspace
        .command()
        .args(["doctor", "--profile", "dev", "--no-up"])
        .arg("--config")
        .arg(&config)
        .assert()
        .failure()
        .code(1)
        .stdout(predicate::str::contains("Version: "))
        .stdout(predicate::str::contains(
            "Wrote doctor report to out/dev/doctor-report.md",
        ))
        .stdout(predicate::str::contains(
            "Wrote security report to out/dev/security-report.md",
        ))
        .stderr(predicate::str::contains(
            "Some checks require elevated privileges. Re-run with sudo.",
        ))
        .stderr(predicate::str::contains("Doctor failed with"));

    let report =
        fs::read_to_string(workspace.root().join("out/dev/doctor-report.md")).expect("report");
    assert!(report.contains("- FAIL: Compose validation — docker compose config failed: permission denied"));
}

#[cfg(unix)]
#[test]
fn functional_doctor_verbose_prints_tmpfs_inspection() {
    let workspace = Workspace::new();
    let docker = workspace.install_script("docker", FAKE_DOCKER);
    let systemctl = workspace.install_script("systemctl", FAKE_SYSTEMCTL);
    let config = workspace.write_config(&docker, &systemctl);

    workspace
        .command()
        .args(["doctor", "--profile", "dev", "--verbose"])
        .arg("--config")
        .arg(&config)
        .assert()
        .success()
        .stdout(predicate::str::contains("INFO: tmpfs configured:"))
        .stdout(predicate::str::contains("WARN: 1  FAIL: 0"));
}
