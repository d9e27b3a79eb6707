//! Operator preflight for a secure gateway deployment (`ocs doctor`).
//!
//! Checks that the tooling, profile, and generated artifacts are usable,
//! then runs the security verification and writes a doctor report beside it.

pub mod build_info;
pub mod doctor;

pub use build_info::{
    build_candidates, find_usable_build, is_executable_available, resolve_build_info, BuildInfo,
    BINARY_NAME, DEFAULT_INSTALL_DIR,
};
pub use doctor::{
    check_runtime_dir_logs, doctor_profile, inspect_gateway_tmpfs, should_doctor_exit,
    DoctorContext, DoctorOptions, DoctorSummary, InspectionLevel, TmpfsInspection,
};
