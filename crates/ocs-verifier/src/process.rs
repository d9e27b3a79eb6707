//! External command execution with normalized, report-sized failure text.

use std::io::Read;
use std::process::{Child, Command, Stdio};
use std::sync::mpsc::{self, Receiver};
use std::sync::OnceLock;
use std::time::{Duration, Instant};

use regex::Regex;
use wait_timeout::ChildExt;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
/// Captured outcome of one external command. A non-zero exit, a spawn failure,
/// or a timeout are all ordinary values of this type.
pub struct CommandOutput {
    pub command_line: String,
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub spawn_error: Option<String>,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.spawn_error.is_none() && self.exit_code == Some(0)
    }

    pub fn stdout_trimmed(&self) -> &str {
        self.stdout.trim()
    }

    /// Trimmed stdout and stderr joined by a newline, skipping empty streams.
    pub fn combined_output(&self) -> String {
        [self.stdout.trim(), self.stderr.trim()]
            .into_iter()
            .filter(|chunk| !chunk.is_empty())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Returns the single most useful line of failure evidence for a command.
///
/// Priority: spawn-level error, trimmed stderr, trimmed stdout, exit code.
pub fn short_error(output: &CommandOutput) -> String {
    if let Some(error) = &output.spawn_error {
        return error.clone();
    }
    let stderr = output.stderr.trim();
    if !stderr.is_empty() {
        return stderr.to_string();
    }
    let stdout = output.stdout.trim();
    if !stdout.is_empty() {
        return stdout.to_string();
    }
    match output.exit_code {
        Some(code) => format!("exit code {code}"),
        None => "exit code unknown".to_string(),
    }
}

/// True when `text` carries a filesystem or privilege denial.
pub fn indicates_permission_issue(text: &str) -> bool {
    static PERMISSION: OnceLock<Option<Regex>> = OnceLock::new();
    PERMISSION
        .get_or_init(|| {
            Regex::new(r"(?i)eperm|eacces|permission denied|operation not permitted").ok()
        })
        .as_ref()
        .is_some_and(|pattern| pattern.is_match(text))
}

fn shell_quote_token(token: &str) -> String {
    if !token.is_empty()
        && token.chars().all(|ch| {
            ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_' | '.' | '/' | ':' | '=' | '{' | '}')
        })
    {
        return token.to_string();
    }
    format!("'{}'", token.replace('\'', "'\"'\"'"))
}

pub fn render_command_line(binary: &str, args: &[String]) -> String {
    let mut parts = Vec::with_capacity(args.len().saturating_add(1));
    parts.push(shell_quote_token(binary));
    parts.extend(args.iter().map(|arg| shell_quote_token(arg)));
    parts.join(" ")
}

pub fn owned_args(args: &[&str]) -> Vec<String> {
    args.iter().map(|arg| (*arg).to_string()).collect()
}

/// Seam between the battery and the host. Implementations must never panic
/// on command failure; every failure mode is represented in the output.
pub trait CommandRunner {
    fn run(&self, binary: &str, args: &[String]) -> CommandOutput;

    /// Runs with a caller-chosen wall-clock limit. Runners without a notion of
    /// time fall back to `run`.
    fn run_with_timeout(
        &self,
        binary: &str,
        args: &[String],
        _timeout: Duration,
    ) -> CommandOutput {
        self.run(binary, args)
    }
}

/// Upper bound on output collection once the command has exited or been
/// killed; descendants holding the pipes are abandoned after it.
const PIPE_DRAIN_GRACE: Duration = Duration::from_millis(500);

#[derive(Debug, Clone)]
/// Runs commands on the host with a fixed wall-clock timeout.
pub struct SystemCommandRunner {
    timeout: Duration,
}

impl SystemCommandRunner {
    pub fn new(timeout_ms: u64) -> Self {
        Self {
            timeout: Duration::from_millis(timeout_ms.max(1)),
        }
    }
}

fn drain<R>(pipe: Option<R>) -> Receiver<String>
where
    R: Read + Send + 'static,
{
    let (sender, receiver) = mpsc::channel();
    std::thread::spawn(move || {
        let mut buffer = Vec::new();
        if let Some(mut pipe) = pipe {
            let _ = pipe.read_to_end(&mut buffer);
        }
        let _ = sender.send(String::from_utf8_lossy(&buffer).into_owned());
    });
    receiver
}

fn collect(receiver: &Receiver<String>, deadline: Instant) -> String {
    receiver
        .recv_timeout(deadline.saturating_duration_since(Instant::now()))
        .unwrap_or_default()
}

#[cfg(unix)]
fn isolate_process_group(command: &mut Command) {
    use std::os::unix::process::CommandExt;

    command.process_group(0);
}

#[cfg(not(unix))]
fn isolate_process_group(_command: &mut Command) {}

/// Kills the child and, on unix, every process left in its group.
fn terminate(child: &mut Child) {
    #[cfg(unix)]
    {
        let group = format!("-{}", child.id());
        let _ = Command::new("kill")
            .args(["-KILL", "--", group.as_str()])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status();
    }
    let _ = child.kill();
    let _ = child.wait();
}

impl CommandRunner for SystemCommandRunner {
    fn run(&self, binary: &str, args: &[String]) -> CommandOutput {
        self.run_with_timeout(binary, args, self.timeout)
    }

    fn run_with_timeout(
        &self,
        binary: &str,
        args: &[String],
        timeout: Duration,
    ) -> CommandOutput {
        let command_line = render_command_line(binary, args);
        tracing::debug!(command = %command_line, ?timeout, "running external command");

        let mut command = Command::new(binary);
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        isolate_process_group(&mut command);
        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(error) => {
                return CommandOutput {
                    command_line,
                    spawn_error: Some(format!("failed to spawn {binary}: {error}")),
                    ..CommandOutput::default()
                };
            }
        };

        // Pipes are drained concurrently so chatty commands cannot block on a full buffer.
        let stdout_reader = drain(child.stdout.take());
        let stderr_reader = drain(child.stderr.take());
        let (exit_code, spawn_error) = match child.wait_timeout(timeout) {
            Ok(Some(status)) => (status.code(), None),
            Ok(None) => {
                terminate(&mut child);
                (
                    None,
                    Some(format!(
                        "command timed out after {} ms: {}",
                        timeout.as_millis(),
                        command_line
                    )),
                )
            }
            Err(error) => {
                terminate(&mut child);
                (
                    None,
                    Some(format!("failed while waiting for {binary}: {error}")),
                )
            }
        };
        let deadline = Instant::now() + PIPE_DRAIN_GRACE;
        let stdout = collect(&stdout_reader, deadline);
        let stderr = collect(&stderr_reader, deadline);

        if let Some(error) = &spawn_error {
            tracing::warn!(command = %command_line, error = %error, "external command did not complete");
        } else {
            tracing::debug!(command = %command_line, exit_code = ?exit_code, "external command finished");
        }
        CommandOutput {
            command_line,
            exit_code,
            stdout,
            stderr,
            spawn_error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn output(exit_code: Option<i32>, stdout: &str, stderr: &str) -> CommandOutput {
        CommandOutput {
            command_line: "docker ps".to_string(),
            exit_code,
            stdout: stdout.to_string(),
            stderr: stderr.to_string(),
            spawn_error: None,
        }
    }

    #[test]
    fn unit_short_error_prefers_spawn_error_then_stderr_then_stdout() {
        let mut failed = output(Some(1), " out ", " err \n");
        assert_eq!(short_error(&failed), "err");
        failed.spawn_error = Some("failed to spawn docker: not found".to_string());
        assert_eq!(short_error(&failed), "failed to spawn docker: not found");
        assert_eq!(short_error(&output(Some(1), "only stdout\n", "  ")), "only stdout");
    }

    #[test]
    fn unit_short_error_falls_back_to_exit_code() {
        assert_eq!(short_error(&output(Some(7), "", "")), "exit code 7");
        assert_eq!(short_error(&output(None, "", "")), "exit code unknown");
    }

    #[test]
    fn unit_combined_output_skips_empty_streams() {
        assert_eq!(output(Some(0), "a\n", "").combined_output(), "a");
        assert_eq!(output(Some(0), " a ", " b ").combined_output(), "a\nb");
        assert_eq!(output(Some(0), "", "").combined_output(), "");
    }

    #[test]
    fn unit_permission_patterns_match_case_insensitively() {
        assert!(indicates_permission_issue("EACCES: permission denied, mkdir"));
        assert!(indicates_permission_issue("Operation not permitted"));
        assert!(indicates_permission_issue("open /var/run/docker.sock: permission denied"));
        assert!(!indicates_permission_issue("connection refused"));
    }

    #[test]
    fn unit_render_command_line_quotes_unsafe_tokens() {
        let rendered = render_command_line(
            "docker",
            &owned_args(&["inspect", "abc", "--format", "{{json .HostConfig.DNS}}"]),
        );
        assert_eq!(
            rendered,
            "docker inspect abc --format '{{json .HostConfig.DNS}}'"
        );
    }

    #[test]
    fn unit_success_requires_zero_exit_without_spawn_error() {
        assert!(output(Some(0), "", "").success());
        assert!(!output(Some(2), "", "").success());
        let mut spawned = output(Some(0), "", "");
        spawned.spawn_error = Some("boom".to_string());
        assert!(!spawned.success());
    }

    #[cfg(unix)]
    #[test]
    fn unit_system_runner_captures_exit_status_and_streams() {
        let runner = SystemCommandRunner::new(10_000);
        let result = runner.run(
            "sh",
            &owned_args(&["-c", "echo out; echo err 1>&2; exit 3"]),
        );
        assert_eq!(result.exit_code, Some(3));
        assert_eq!(result.stdout_trimmed(), "out");
        assert_eq!(result.stderr.trim(), "err");
        assert_eq!(short_error(&result), "err");
    }

    #[test]
    fn unit_system_runner_reports_spawn_failure_without_panicking() {
        let runner = SystemCommandRunner::new(1_000);
        let result = runner.run("ocs-definitely-missing-binary", &[]);
        assert!(!result.success());
        assert!(short_error(&result).starts_with("failed to spawn ocs-definitely-missing-binary"));
    }

    #[cfg(unix)]
    #[test]
    fn unit_system_runner_kills_commands_past_timeout() {
        let runner = SystemCommandRunner::new(100);
        let result = runner.run("sleep", &owned_args(&["5"]));
        assert!(!result.success());
        assert!(short_error(&result).starts_with("command timed out after 100 ms"));
    }

    #[cfg(unix)]
    #[test]
    fn regression_timeout_is_not_held_open_by_grandchildren() {
        let runner = SystemCommandRunner::new(200);
        let started = Instant::now();
        let result = runner.run("sh", &owned_args(&["-c", "sleep 4; echo done"]));
        let elapsed = started.elapsed();
        assert!(!result.success());
        assert!(short_error(&result).starts_with("command timed out after 200 ms"));
        assert!(elapsed < Duration::from_millis(1500), "elapsed {elapsed:?}");
        assert!(!result.stdout.contains("done"));
    }

    #[cfg(unix)]
    #[test]
    fn regression_per_call_timeout_overrides_runner_default() {
        let runner = SystemCommandRunner::new(100);
        let result = runner.run_with_timeout(
            "sh",
            &owned_args(&["-c", "sleep 0.3; echo pulled"]),
            Duration::from_millis(5_000),
        );
        assert!(result.success(), "{}", short_error(&result));
        assert_eq!(result.stdout_trimmed(), "pulled");
    }
}
