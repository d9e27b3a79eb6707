//! Deployment artifact collaborator.
//!
//! Rendering the compose file, minting the gateway secret, and selecting free
//! ports belong to the installer. The verifier only needs to know where those
//! artifacts live and which ports were selected.

use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use ocs_core::load_env_file;
use ocs_profile::PolicyProfile;

use crate::config::PortRole;
use crate::stack::StackLocation;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ArtifactOptions {
    pub auto_generate_secret: bool,
    pub auto_adjust_ports: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedArtifacts {
    pub out_dir: PathBuf,
    pub env_path: PathBuf,
    pub compose_path: PathBuf,
    /// Host port per role label, as recorded in the env file.
    pub selected_ports: BTreeMap<String, u16>,
    pub secret_generated: bool,
    pub ports_adjusted: bool,
}

/// Produces (or locates) the compose and env files for a profile. Must be
/// idempotent when both `ArtifactOptions` flags are false.
pub trait ArtifactGenerator {
    fn generate(
        &self,
        profile_name: &str,
        profile: &PolicyProfile,
        options: ArtifactOptions,
    ) -> Result<GeneratedArtifacts>;
}

#[derive(Debug, Clone)]
/// Locates artifacts an installer already wrote under `<root>/out/<profile>`.
/// Never writes, so secret generation and port adjustment are always reported
/// as not performed.
pub struct PrebuiltArtifacts {
    root: PathBuf,
    port_roles: Vec<PortRole>,
}

impl PrebuiltArtifacts {
    pub fn new(root: impl Into<PathBuf>, port_roles: Vec<PortRole>) -> Self {
        Self {
            root: root.into(),
            port_roles,
        }
    }
}

impl ArtifactGenerator for PrebuiltArtifacts {
    fn generate(
        &self,
        profile_name: &str,
        _profile: &PolicyProfile,
        options: ArtifactOptions,
    ) -> Result<GeneratedArtifacts> {
        let location = StackLocation::for_profile(&self.root, profile_name);
        if !location.out_dir.is_dir() {
            bail!(
                "artifact directory {} does not exist; run the installer for profile '{}' first",
                location.out_dir.display(),
                profile_name
            );
        }
        if options.auto_generate_secret || options.auto_adjust_ports {
            tracing::debug!(
                profile = profile_name,
                "prebuilt artifacts are located, not regenerated"
            );
        }

        let mut selected_ports = BTreeMap::new();
        if location.env_path.is_file() {
            let env = load_env_file(&location.env_path)
                .with_context(|| format!("failed to load {}", location.env_path.display()))?;
            for role in &self.port_roles {
                if let Ok(port) = env.trimmed(&role.host_env_key).parse::<u16>() {
                    selected_ports.insert(role.label.clone(), port);
                }
            }
        }

        Ok(GeneratedArtifacts {
            out_dir: location.out_dir,
            env_path: location.env_path,
            compose_path: location.compose_path,
            selected_ports,
            secret_generated: false,
            ports_adjusted: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use ocs_profile::parse_profile_source;

    use super::*;
    use crate::config::VerifierConfig;

    fn profile() -> PolicyProfile {
        parse_profile_source(
            "openclaw:\n  approvals:\n    exec: require\nnetwork:\n  allow: [example.org]\n",
            std::path::Path::new("inline.yaml"),
        )
        .expect("profile")
    }

    #[test]
    fn unit_locates_existing_artifacts_and_reads_selected_ports() {
        let tempdir = tempfile::tempdir().expect("tempdir");
        let out_dir = tempdir.path().join("out").join("dev");
        std::fs::create_dir_all(&out_dir).expect("mkdir");
        std::fs::write(
            out_dir.join(".env"),
            "OPENCLAW_GATEWAY_PORT=18800\nOPENCLAW_BRIDGE_HOST_PORT=18801\n",
        )
        .expect("env");

        let generator = PrebuiltArtifacts::new(tempdir.path(), VerifierConfig::default().port_roles);
        let artifacts = generator
            .generate("dev", &profile(), ArtifactOptions::default())
            .expect("artifacts");
        assert_eq!(artifacts.out_dir, out_dir);
        assert_eq!(artifacts.compose_path, out_dir.join("docker-compose.yml"));
        assert_eq!(artifacts.selected_ports.get("gateway"), Some(&18800));
        assert_eq!(artifacts.selected_ports.get("bridge"), Some(&18801));
        assert!(!artifacts.secret_generated);
        assert!(!artifacts.ports_adjusted);
    }

    #[test]
    fn unit_missing_artifact_directory_is_an_error() {
        let tempdir = tempfile::tempdir().expect("tempdir");
        let generator = PrebuiltArtifacts::new(tempdir.path(), Vec::new());
        let error = generator
            .generate(
                "absent",
                &profile(),
                ArtifactOptions {
                    auto_generate_secret: true,
                    auto_adjust_ports: true,
                },
            )
            .expect_err("missing");
        assert!(error.to_string().contains("run the installer for profile 'absent'"));
    }
}
