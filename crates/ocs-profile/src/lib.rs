//! Policy profile model and loader for secure gateway deployments.
//!
//! A profile declares egress rules, exposure intent, and approval mode. The
//! verifier consumes it read-only through the `ProfileLoader` seam.

pub mod loader;
pub mod schema;

pub use loader::{parse_profile_source, FsProfileLoader, ProfileError, ProfileLoader};
pub use schema::{
    validate_profile_value, ApprovalSettings, DirectIpPolicy, EgressDefault, EgressMode,
    ExecApproval, GatewaySettings, NetworkPolicy, OpenclawSettings, PolicyProfile, ProfileIssue,
    WebUiSettings,
};
