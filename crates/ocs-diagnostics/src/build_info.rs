//! Host readiness probes: locating a usable `ocs` build, finding executables
//! on `PATH`, and resolving the version stamp printed by `ocs doctor`.

use std::path::{Path, PathBuf};

#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;

use ocs_verifier::process::owned_args;
use ocs_verifier::CommandRunner;

pub const BINARY_NAME: &str = "ocs";
pub const DEFAULT_INSTALL_DIR: &str = "/usr/local/bin";

/// Ordered, de-duplicated build locations: the release build under `cwd`,
/// the invoked executable, then the install directory.
pub fn build_candidates(cwd: &Path, invoked: Option<&Path>, install_dir: &Path) -> Vec<PathBuf> {
    let mut candidates = Vec::new();
    let mut add = |candidate: PathBuf| {
        let resolved = if candidate.is_absolute() {
            candidate
        } else {
            cwd.join(candidate)
        };
        if !candidates.contains(&resolved) {
            candidates.push(resolved);
        }
    };
    add(cwd.join("target").join("release").join(BINARY_NAME));
    if let Some(invoked) = invoked {
        add(invoked.to_path_buf());
    }
    add(install_dir.join(BINARY_NAME));
    candidates
}

pub fn find_usable_build<F>(candidates: &[PathBuf], exists: F) -> Option<PathBuf>
where
    F: Fn(&Path) -> bool,
{
    candidates
        .iter()
        .find(|candidate| exists(candidate.as_path()))
        .cloned()
}

fn is_executable_file(path: &Path) -> bool {
    let Ok(metadata) = std::fs::metadata(path) else {
        return false;
    };
    if !metadata.is_file() {
        return false;
    }
    #[cfg(unix)]
    {
        metadata.permissions().mode() & 0o111 != 0
    }
    #[cfg(not(unix))]
    {
        true
    }
}

pub fn is_executable_available(executable: &str) -> bool {
    let trimmed = executable.trim();
    if trimmed.is_empty() {
        return false;
    }

    let candidate = Path::new(trimmed);
    if candidate.is_absolute() || trimmed.contains(std::path::MAIN_SEPARATOR) {
        return is_executable_file(candidate);
    }

    let Some(path_var) = std::env::var_os("PATH") else {
        return false;
    };
    std::env::split_paths(&path_var).any(|mut dir| {
        dir.push(trimmed);
        is_executable_file(&dir)
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildInfo {
    pub version: String,
    pub commit: String,
}

/// Crate version plus `git rev-parse --short HEAD`, or `unknown` outside a
/// checkout.
pub fn resolve_build_info(runner: &dyn CommandRunner) -> BuildInfo {
    let output = runner.run("git", &owned_args(&["rev-parse", "--short", "HEAD"]));
    let commit = if output.success() && !output.stdout_trimmed().is_empty() {
        output.stdout_trimmed().to_string()
    } else {
        "unknown".to_string()
    };
    BuildInfo {
        version: env!("CARGO_PKG_VERSION").to_string(),
        commit,
    }
}

#[cfg(test)]
mod tests {
    use ocs_verifier::CommandOutput;

    use super::*;

    struct FixedRunner(CommandOutput);

    impl CommandRunner for FixedRunner {
        fn run(&self, _binary: &str, _args: &[String]) -> CommandOutput {
            self.0.clone()
        }
    }

    #[test]
    fn unit_candidates_are_ordered_and_deduplicated() {
        let cwd = Path::new("/work");
        let candidates = build_candidates(
            cwd,
            Some(Path::new("target/release/ocs")),
            Path::new("/usr/local/bin"),
        );
        assert_eq!(
            candidates,
            vec![
                PathBuf::from("/work/target/release/ocs"),
                PathBuf::from("/usr/local/bin/ocs"),
            ]
        );
    }

    #[test]
    fn unit_find_usable_build_returns_first_existing_candidate() {
        let candidates = build_candidates(
            Path::new("/work"),
            Some(Path::new("/opt/ocs/bin/ocs")),
            Path::new("/usr/local/bin"),
        );
        let found = find_usable_build(&candidates, |path| path.starts_with("/opt"));
        assert_eq!(found, Some(PathBuf::from("/opt/ocs/bin/ocs")));
        assert_eq!(find_usable_build(&candidates, |_| false), None);
    }

    #[test]
    fn unit_is_executable_available_rejects_blank_names() {
        assert!(!is_executable_available(""));
        assert!(!is_executable_available("  "));
    }

    #[cfg(unix)]
    #[test]
    fn integration_is_executable_available_requires_exec_bit_for_paths() {
        let tempdir = tempfile::tempdir().expect("tempdir");
        let path = tempdir.path().join("docker");
        std::fs::write(&path, "#!/bin/sh\n").expect("write");
        let display = path.display().to_string();

        let mut permissions = std::fs::metadata(&path).expect("metadata").permissions();
        permissions.set_mode(0o644);
        std::fs::set_permissions(&path, permissions.clone()).expect("chmod");
        assert!(!is_executable_available(&display));

        permissions.set_mode(0o755);
        std::fs::set_permissions(&path, permissions).expect("chmod");
        assert!(is_executable_available(&display));
    }

    #[test]
    fn functional_build_info_falls_back_to_unknown_commit() {
        let failed = FixedRunner(CommandOutput {
            exit_code: Some(128),
            stderr: "fatal: not a git repository".to_string(),
            ..CommandOutput::default()
        });
        let info = resolve_build_info(&failed);
        assert_eq!(info.commit, "unknown");
        assert_eq!(info.version, env!("CARGO_PKG_VERSION"));

        let ok = FixedRunner(CommandOutput {
            exit_code: Some(0),
            stdout: "abc1234\n".to_string(),
            ..CommandOutput::default()
        });
        assert_eq!(resolve_build_info(&ok).commit, "abc1234");
    }
}
