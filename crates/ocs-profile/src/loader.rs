use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::schema::{validate_profile_value, PolicyProfile, ProfileIssue};

#[derive(Debug, Error)]
/// Failures surfaced while loading a policy profile. All are fatal for a
/// verification run: no checks execute without a valid profile.
pub enum ProfileError {
    #[error("invalid profile name '{name}': names must be non-empty and must not contain path separators")]
    InvalidName { name: String },
    #[error("Profile not found: '{name}' ({})", .path.display())]
    NotFound { name: String, path: PathBuf },
    #[error("failed to read profile {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Invalid YAML in {}: {message}", .path.display())]
    InvalidYaml { path: PathBuf, message: String },
    #[error("Profile validation failed for {}: {}", .path.display(), render_issues(.issues))]
    Validation {
        path: PathBuf,
        issues: Vec<ProfileIssue>,
    },
}

fn render_issues(issues: &[ProfileIssue]) -> String {
    issues
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Resolves a profile name into a validated policy profile.
pub trait ProfileLoader {
    fn load(&self, profile_name: &str) -> Result<PolicyProfile, ProfileError>;
}

#[derive(Debug, Clone)]
/// Loads `<profiles_dir>/<name>.yaml` from disk.
pub struct FsProfileLoader {
    profiles_dir: PathBuf,
}

impl FsProfileLoader {
    pub fn new(profiles_dir: impl Into<PathBuf>) -> Self {
        Self {
            profiles_dir: profiles_dir.into(),
        }
    }

    /// Uses the conventional `profiles/` directory under a working root.
    pub fn from_root(root: &Path) -> Self {
        Self::new(root.join("profiles"))
    }

    pub fn profile_path(&self, profile_name: &str) -> PathBuf {
        self.profiles_dir.join(format!("{profile_name}.yaml"))
    }
}

impl ProfileLoader for FsProfileLoader {
    fn load(&self, profile_name: &str) -> Result<PolicyProfile, ProfileError> {
        let trimmed = profile_name.trim();
        if trimmed.is_empty() || trimmed.contains(['/', '\\']) || trimmed == ".." {
            return Err(ProfileError::InvalidName {
                name: profile_name.to_string(),
            });
        }

        let path = self.profile_path(trimmed);
        if !path.is_file() {
            return Err(ProfileError::NotFound {
                name: trimmed.to_string(),
                path,
            });
        }
        let source = std::fs::read_to_string(&path).map_err(|source| ProfileError::Read {
            path: path.clone(),
            source,
        })?;
        let profile = parse_profile_source(&source, &path)?;
        tracing::debug!(
            profile = trimmed,
            path = %path.display(),
            allow_count = profile.network.allow.len(),
            "loaded policy profile"
        );
        Ok(profile)
    }
}

/// Parses and validates profile YAML; `origin` is only used for messages.
pub fn parse_profile_source(source: &str, origin: &Path) -> Result<PolicyProfile, ProfileError> {
    let value: serde_yaml::Value =
        serde_yaml::from_str(source).map_err(|error| ProfileError::InvalidYaml {
            path: origin.to_path_buf(),
            message: error.to_string().replace('\n', " ").trim().to_string(),
        })?;
    validate_profile_value(&value).map_err(|issues| ProfileError::Validation {
        path: origin.to_path_buf(),
        issues,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::DirectIpPolicy;

    fn write_profile(dir: &Path, name: &str, body: &str) {
        let profiles = dir.join("profiles");
        std::fs::create_dir_all(&profiles).expect("profiles dir");
        std::fs::write(profiles.join(format!("{name}.yaml")), body).expect("write profile");
    }

    #[test]
    fn unit_loads_profile_from_root_profiles_directory() {
        let tempdir = tempfile::tempdir().expect("tempdir");
        write_profile(
            tempdir.path(),
            "research-only",
            "openclaw:\n  approvals:\n    exec: require\nnetwork:\n  allow:\n    - api.example.org\n  direct_ip_policy: fail\n",
        );
        let loader = FsProfileLoader::from_root(tempdir.path());
        let profile = loader.load("research-only").expect("profile");
        assert_eq!(profile.network.allow, vec!["api.example.org".to_string()]);
        assert_eq!(profile.network.direct_ip_policy, DirectIpPolicy::Fail);
    }

    #[test]
    fn unit_missing_profile_reports_name_and_path() {
        let tempdir = tempfile::tempdir().expect("tempdir");
        let loader = FsProfileLoader::from_root(tempdir.path());
        let error = loader.load("ghost").expect_err("missing");
        let message = error.to_string();
        assert!(message.starts_with("Profile not found: 'ghost'"), "{message}");
        assert!(message.contains("ghost.yaml"), "{message}");
    }

    #[test]
    fn unit_invalid_yaml_is_reported_on_one_line() {
        let tempdir = tempfile::tempdir().expect("tempdir");
        write_profile(tempdir.path(), "broken", "openclaw: [unclosed\n");
        let error = FsProfileLoader::from_root(tempdir.path())
            .load("broken")
            .expect_err("broken yaml");
        let message = error.to_string();
        assert!(message.starts_with("Invalid YAML in "), "{message}");
        assert!(!message.contains('\n'));
    }

    #[test]
    fn unit_validation_error_joins_all_issues() {
        let tempdir = tempfile::tempdir().expect("tempdir");
        write_profile(
            tempdir.path(),
            "bad",
            "openclaw:\n  approvals:\n    exec: maybe\nnetwork:\n  allow_ports: [0]\n",
        );
        let error = FsProfileLoader::from_root(tempdir.path())
            .load("bad")
            .expect_err("invalid");
        let ProfileError::Validation { issues, .. } = &error else {
            panic!("expected validation error, got {error}");
        };
        assert_eq!(issues.len(), 2);
        let message = error.to_string();
        assert!(message.contains("openclaw.approvals.exec: expected one of allow|require|deny"));
        assert!(message.contains("; network.allow_ports.0: port must be between 1 and 65535"));
    }

    #[test]
    fn unit_path_like_names_are_rejected() {
        let tempdir = tempfile::tempdir().expect("tempdir");
        let loader = FsProfileLoader::from_root(tempdir.path());
        assert!(matches!(
            loader.load("../etc/passwd"),
            Err(ProfileError::InvalidName { .. })
        ));
        assert!(matches!(loader.load("  "), Err(ProfileError::InvalidName { .. })));
    }
}
