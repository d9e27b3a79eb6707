//! Security posture verification for a deployed gateway stack.
//!
//! Loads a policy profile, inspects the generated compose/env artifacts and the
//! running containers, classifies gateway health before running dependent
//! checks, and renders a Markdown compliance report.

pub mod artifacts;
pub mod checks;
pub mod compose;
pub mod config;
pub mod diagnosis;
pub mod inspect;
pub mod process;
pub mod report;
pub mod stack;
pub mod verify;

pub use artifacts::{ArtifactGenerator, ArtifactOptions, GeneratedArtifacts, PrebuiltArtifacts};
pub use compose::{ComposeDocument, ComposeSnapshot};
pub use config::{load_verifier_config, PortRole, VerifierConfig};
pub use diagnosis::{evaluate_diagnosis, DiagnosisBranch, GatewayLogPatterns, RuntimeDiagnosis};
pub use inspect::{InspectError, StackInspector};
pub use process::{
    indicates_permission_issue, short_error, CommandOutput, CommandRunner, SystemCommandRunner,
};
pub use report::{
    render_markdown_report, render_security_report, summarize, CheckResult, CheckStatus,
    CheckSummary, ReportDiagnostic, ReportHeader,
};
pub use stack::{EnvSnapshot, StackLocation};
pub use verify::{
    run_verification, verify_profile, VerificationRun, VerifyContext, VerifyOptions, VerifySummary,
};
