use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(
    name = "ocs",
    about = "Verify and diagnose a hardened OpenClaw gateway deployment",
    version
)]
pub struct Cli {
    #[arg(
        long,
        env = "OCS_ROOT",
        global = true,
        help = "Working root holding profiles/ and out/. Defaults to the current directory."
    )]
    pub root: Option<PathBuf>,

    #[arg(
        long,
        env = "OCS_CONFIG",
        global = true,
        help = "TOML file overriding verifier defaults (service names, resolver IP, timeouts)."
    )]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: CliCommand,
}

#[derive(Debug, Subcommand)]
pub enum CliCommand {
    /// Run the security check battery and write a Markdown report.
    Verify(VerifyArgs),
    /// Run preflight checks, then the security verification.
    Doctor(DoctorArgs),
}

#[derive(Debug, Args)]
pub struct VerifyArgs {
    #[arg(long, help = "Profile name under profiles/ (without .yaml).")]
    pub profile: String,

    #[arg(long, help = "Path of the security report to write.")]
    pub output: PathBuf,

    #[arg(
        long = "strict-ip-egress",
        help = "Treat reachable direct-to-IP HTTPS as a failure regardless of profile."
    )]
    pub strict_ip_egress: bool,

    #[arg(long = "no-up", help = "Do not run `docker compose up -d` before checking.")]
    pub no_up: bool,

    #[arg(
        long = "no-regenerate",
        help = "Use out/<profile> directly instead of asking the artifact generator."
    )]
    pub no_regenerate: bool,
}

#[derive(Debug, Args)]
pub struct DoctorArgs {
    #[arg(long, help = "Profile name under profiles/ (without .yaml).")]
    pub profile: String,

    #[arg(long = "no-up", help = "Do not run `docker compose up -d` during verification.")]
    pub no_up: bool,

    #[arg(
        long = "strict-ip-egress",
        help = "Treat reachable direct-to-IP HTTPS as a failure regardless of profile."
    )]
    pub strict_ip_egress: bool,

    #[arg(long, help = "Print runtime tmpfs inspection details.")]
    pub verbose: bool,
}
