//! Check results, summary counts, and Markdown report rendering.

use std::fmt;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
/// Tri-state check outcome ordered by severity: `Pass < Warn < Fail`.
pub enum CheckStatus {
    Pass,
    Warn,
    Fail,
}

impl CheckStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            CheckStatus::Pass => "PASS",
            CheckStatus::Warn => "WARN",
            CheckStatus::Fail => "FAIL",
        }
    }
}

impl fmt::Display for CheckStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// One row of a report. Constructed once and never mutated.
pub struct CheckResult {
    name: String,
    status: CheckStatus,
    details: String,
}

impl CheckResult {
    pub fn new(status: CheckStatus, name: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status,
            details: details.into(),
        }
    }

    pub fn pass(name: impl Into<String>, details: impl Into<String>) -> Self {
        Self::new(CheckStatus::Pass, name, details)
    }

    pub fn warn(name: impl Into<String>, details: impl Into<String>) -> Self {
        Self::new(CheckStatus::Warn, name, details)
    }

    pub fn fail(name: impl Into<String>, details: impl Into<String>) -> Self {
        Self::new(CheckStatus::Fail, name, details)
    }

    /// WARN carrying `SKIP: <reason>`; the check was not meaningful to run.
    pub fn skipped(name: impl Into<String>, reason: &str) -> Self {
        Self::warn(name, format!("SKIP: {reason}"))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn status(&self) -> CheckStatus {
        self.status
    }

    pub fn details(&self) -> &str {
        &self.details
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// Raw evidence attached below the check list; never counted.
pub struct ReportDiagnostic {
    pub title: String,
    pub content: String,
}

impl ReportDiagnostic {
    pub fn new(title: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CheckSummary {
    pub pass_count: usize,
    pub warn_count: usize,
    pub fail_count: usize,
}

impl CheckSummary {
    pub fn total(&self) -> usize {
        self.pass_count + self.warn_count + self.fail_count
    }

    /// Most severe status present, `None` for an empty result set.
    pub fn worst_status(&self) -> Option<CheckStatus> {
        if self.fail_count > 0 {
            Some(CheckStatus::Fail)
        } else if self.warn_count > 0 {
            Some(CheckStatus::Warn)
        } else if self.pass_count > 0 {
            Some(CheckStatus::Pass)
        } else {
            None
        }
    }

    pub fn render_counts(&self) -> String {
        format!(
            "{} PASS / {} WARN / {} FAIL",
            self.pass_count, self.warn_count, self.fail_count
        )
    }
}

pub fn summarize(results: &[CheckResult]) -> CheckSummary {
    let count = |status: CheckStatus| results.iter().filter(|item| item.status == status).count();
    CheckSummary {
        pass_count: count(CheckStatus::Pass),
        warn_count: count(CheckStatus::Warn),
        fail_count: count(CheckStatus::Fail),
    }
}

#[derive(Debug, Clone)]
/// Header block shared by the security and doctor reports.
pub struct ReportHeader<'a> {
    pub title: &'a str,
    pub profile_name: &'a str,
    pub compose_path: &'a Path,
    /// Extra `- Label: `value`` lines placed after the compose path.
    pub extra_paths: Vec<(&'a str, &'a Path)>,
    pub generated_at: &'a str,
}

pub fn render_markdown_report(
    header: &ReportHeader<'_>,
    results: &[CheckResult],
    diagnostics: &[ReportDiagnostic],
) -> String {
    let summary = summarize(results);
    let mut lines = vec![
        format!("# {}", header.title),
        String::new(),
        format!("- Profile: `{}`", header.profile_name),
        format!("- Compose: `{}`", header.compose_path.display()),
    ];
    for (label, path) in &header.extra_paths {
        lines.push(format!("- {}: `{}`", label, path.display()));
    }
    lines.push(format!("- Generated: {}", header.generated_at));
    lines.push(format!("- Summary: {}", summary.render_counts()));
    lines.push(String::new());
    lines.push("## Checks".to_string());
    lines.extend(results.iter().map(|result| {
        format!(
            "- {}: {} — {}",
            result.status,
            result.name,
            single_line(&result.details)
        )
    }));

    if !diagnostics.is_empty() {
        lines.push(String::new());
        lines.push("## Diagnostics".to_string());
        for diagnostic in diagnostics {
            let safe_content = diagnostic.content.replace("```", "'''");
            lines.push(String::new());
            lines.push(format!("### {}", diagnostic.title));
            lines.push("```text".to_string());
            lines.push(if safe_content.is_empty() {
                "(no logs)".to_string()
            } else {
                safe_content
            });
            lines.push("```".to_string());
        }
    }

    let mut rendered = lines.join("\n");
    rendered.push('\n');
    rendered
}

/// Folds multi-line command output into one row so it cannot split or forge
/// check lines.
fn single_line(details: &str) -> String {
    details
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("; ")
}

pub fn render_security_report(
    profile_name: &str,
    compose_path: &Path,
    generated_at: &str,
    results: &[CheckResult],
    diagnostics: &[ReportDiagnostic],
) -> String {
    render_markdown_report(
        &ReportHeader {
            title: "Security Report",
            profile_name,
            compose_path,
            extra_paths: Vec::new(),
            generated_at,
        },
        results,
        diagnostics,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use regex::Regex;

    fn sample_results() -> Vec<CheckResult> {
        vec![
            CheckResult::pass("check-a", "ok"),
            CheckResult::pass("check-b", "ok"),
            CheckResult::warn("check-c", "warning"),
        ]
    }

    #[test]
    fn unit_summarize_counts_each_status() {
        let summary = summarize(&sample_results());
        assert_eq!(
            summary,
            CheckSummary {
                pass_count: 2,
                warn_count: 1,
                fail_count: 0
            }
        );
        assert_eq!(summary.worst_status(), Some(CheckStatus::Warn));
        assert_eq!(summarize(&[]).worst_status(), None);
    }

    #[test]
    fn unit_severity_ordering_is_fail_over_warn_over_pass() {
        assert!(CheckStatus::Fail > CheckStatus::Warn);
        assert!(CheckStatus::Warn > CheckStatus::Pass);
    }

    #[test]
    fn unit_security_report_has_fixed_sections_and_single_summary_line() {
        let report = render_security_report(
            "mock-profile",
            Path::new("/tmp/mock/docker-compose.yml"),
            "2026-01-01T00:00:00.000Z",
            &sample_results(),
            &[],
        );
        assert!(report.starts_with("# Security Report\n\n- Profile: `mock-profile`\n"));
        assert!(report.contains("- Compose: `/tmp/mock/docker-compose.yml`\n"));
        assert!(report.contains("- Generated: 2026-01-01T00:00:00.000Z\n"));
        let summary_pattern =
            Regex::new(r"(?m)^- Summary: (\d+) PASS / (\d+) WARN / (\d+) FAIL$").expect("regex");
        let matches = summary_pattern.captures_iter(&report).collect::<Vec<_>>();
        assert_eq!(matches.len(), 1);
        assert_eq!(&matches[0][1], "2");
        assert_eq!(&matches[0][2], "1");
        assert_eq!(&matches[0][3], "0");
        assert!(report.contains("## Checks\n- PASS: check-a — ok\n"));
        assert!(report.ends_with("- WARN: check-c — warning\n"));
        assert!(!report.contains("## Diagnostics"));
    }

    #[test]
    fn unit_diagnostics_are_fenced_and_escape_inner_fences() {
        let report = render_security_report(
            "p",
            Path::new("c.yml"),
            "now",
            &[CheckResult::fail("x", "broken")],
            &[
                ReportDiagnostic::new("gateway logs", "line\n```\ninjected"),
                ReportDiagnostic::new("empty", ""),
            ],
        );
        assert!(report.contains(
            "## Diagnostics\n\n### gateway logs\n```text\nline\n'''\ninjected\n```\n"
        ));
        assert!(report.contains("### empty\n```text\n(no logs)\n```\n"));
        assert_eq!(report.matches("```text").count(), 2);
    }

    #[test]
    fn unit_extra_paths_follow_compose_line() {
        let report = render_markdown_report(
            &ReportHeader {
                title: "Doctor Report",
                profile_name: "dev",
                compose_path: Path::new("c.yml"),
                extra_paths: vec![("Security report", Path::new("out/dev/security-report.md"))],
                generated_at: "now",
            },
            &[],
            &[],
        );
        assert!(report.contains(
            "- Compose: `c.yml`\n- Security report: `out/dev/security-report.md`\n- Generated: now\n"
        ));
        assert!(report.contains("- Summary: 0 PASS / 0 WARN / 0 FAIL\n"));
    }

    #[test]
    fn unit_rendering_is_deterministic_for_fixed_timestamp() {
        let results = sample_results();
        let first = render_security_report("p", Path::new("c.yml"), "t", &results, &[]);
        let second = render_security_report("p", Path::new("c.yml"), "t", &results, &[]);
        assert_eq!(first, second);
    }

    fn status_strategy() -> impl Strategy<Value = CheckStatus> {
        prop_oneof![
            Just(CheckStatus::Pass),
            Just(CheckStatus::Warn),
            Just(CheckStatus::Fail)
        ]
    }

    proptest! {
        #[test]
        fn unit_summary_counts_partition_results(statuses in proptest::collection::vec(status_strategy(), 0..40)) {
            let results = statuses
                .iter()
                .enumerate()
                .map(|(index, status)| CheckResult::new(*status, format!("check-{index}"), "detail"))
                .collect::<Vec<_>>();
            let summary = summarize(&results);
            prop_assert_eq!(summary.total(), results.len());
            let report = render_security_report("p", Path::new("c.yml"), "t", &results, &[]);
            let expected_summary_line = format!("- Summary: {}\n", summary.render_counts());
            prop_assert!(report.contains(&expected_summary_line));
            prop_assert_eq!(report.lines().filter(|line| line.starts_with("- FAIL: ")).count(), summary.fail_count);
        }
    }

    #[test]
    fn regression_multi_line_details_stay_on_one_check_row() {
        let results = vec![
            CheckResult::fail(
                "Compose validation",
                "Error response from daemon:\r\n- FAIL: forged row\n\n  conflict\n",
            ),
            CheckResult::pass("check-b", "ok"),
        ];
        let report = render_security_report(
            "mock-profile",
            Path::new("/tmp/mock/docker-compose.yml"),
            "2026-01-01T00:00:00.000Z",
            &results,
            &[],
        );
        assert!(report.contains(
            "- FAIL: Compose validation — Error response from daemon:; - FAIL: forged row; conflict\n- PASS: check-b — ok\n"
        ));
        assert_eq!(report.lines().filter(|line| line.starts_with("- FAIL:")).count(), 1);
        assert_eq!(results[0].details().lines().count(), 4);
    }
}
