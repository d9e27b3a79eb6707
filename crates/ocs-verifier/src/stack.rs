//! Resolved file locations and per-run snapshots of the deployed stack.

use std::path::{Path, PathBuf};

use ocs_core::{load_env_file, EnvFile};

pub const COMPOSE_FILE_NAME: &str = "docker-compose.yml";
pub const ENV_FILE_NAME: &str = ".env";
pub const SECURITY_REPORT_FILE_NAME: &str = "security-report.md";
pub const DOCTOR_REPORT_FILE_NAME: &str = "doctor-report.md";

#[derive(Debug, Clone, PartialEq, Eq)]
/// Artifact paths for one profile, derived once per invocation.
pub struct StackLocation {
    pub out_dir: PathBuf,
    pub compose_path: PathBuf,
    pub env_path: PathBuf,
}

impl StackLocation {
    /// Conventional layout: `<root>/out/<profile>/`.
    pub fn for_profile(root: &Path, profile_name: &str) -> Self {
        Self::from_out_dir(root.join("out").join(profile_name))
    }

    pub fn from_out_dir(out_dir: PathBuf) -> Self {
        Self {
            compose_path: out_dir.join(COMPOSE_FILE_NAME),
            env_path: out_dir.join(ENV_FILE_NAME),
            out_dir,
        }
    }

    pub fn security_report_path(&self) -> PathBuf {
        self.out_dir.join(SECURITY_REPORT_FILE_NAME)
    }

    pub fn doctor_report_path(&self) -> PathBuf {
        self.out_dir.join(DOCTOR_REPORT_FILE_NAME)
    }
}

#[derive(Debug, Clone)]
/// Env file captured once per run; a missing or unreadable file is kept as
/// the detail string reported by dependent checks.
pub struct EnvSnapshot {
    env: Result<EnvFile, String>,
}

impl EnvSnapshot {
    pub fn load(path: &Path) -> Self {
        if !path.is_file() {
            return Self {
                env: Err(format!(".env file not found at {}", path.display())),
            };
        }
        Self {
            env: load_env_file(path).map_err(|error| format!("{error:#}")),
        }
    }

    pub fn from_env(env: EnvFile) -> Self {
        Self { env: Ok(env) }
    }

    pub fn env(&self) -> Result<&EnvFile, &str> {
        match &self.env {
            Ok(env) => Ok(env),
            Err(error) => Err(error.as_str()),
        }
    }
}
