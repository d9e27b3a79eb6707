//! The ordered security check battery.
//!
//! Declaration checks read the generated compose and env files; live checks
//! probe the running stack through a `StackInspector`. Every check returns a
//! `CheckResult` and never propagates an error.

pub mod declaration;
pub mod runtime;

pub use declaration::{
    check_gateway_token, check_no_hardcoded_ports, check_port_exposure, check_selected_ports,
    check_tmpfs_overlay, check_token_externalized, compose_socket_mounts,
};
pub use runtime::{
    check_direct_ip, check_dns_forced, check_docker_socket, check_docker_socket_declared,
    check_egress_allowed, check_egress_blocked, check_firewall, check_non_root,
    check_tmpfs_runtime, pick_blocked_domain,
};

pub const GATEWAY_TOKEN: &str = "Gateway token is not default placeholder";
pub const TMPFS_OVERLAY: &str = "Gateway runtime tmpfs overlay configured";
pub const TOKEN_EXTERNALIZED: &str = "Compose keeps gateway token externalized";
pub const SELECTED_PORTS: &str = "Selected ports are valid and wired via interpolation";
pub const NO_HARDCODED_PORTS: &str = "Compose has no hardcoded gateway/bridge literals";
pub const PORT_EXPOSURE: &str = "Gateway/bridge ports exposure matches profile";
pub const TMPFS_RUNTIME: &str = "Gateway runtime tmpfs active (HostConfig.Tmpfs)";
pub const NON_ROOT: &str = "Container runs as non-root";
pub const DOCKER_SOCKET: &str = "Docker socket not mounted";
pub const DNS_FORCED: &str = "DNS forced through dns_allowlist";
pub const EGRESS_BLOCKED: &str = "Egress blocked to non-allowlisted domains";
pub const EGRESS_ALLOWED: &str = "Egress works to allowlisted domains";
pub const DIRECT_IP: &str = "Direct-to-IP HTTPS reachable";
pub const FIREWALL: &str = "Firewall service enabled";
pub const RUNTIME_DIRS: &str = "Gateway writable runtime dirs (canvas/cron)";
pub const STARTUP_CONFIG: &str = "Gateway startup configuration";

/// Checks that are only meaningful against a live, correctly configured runtime.
pub const RUNTIME_DEPENDENT_CHECKS: [&str; 6] = [
    NON_ROOT,
    DOCKER_SOCKET,
    DNS_FORCED,
    EGRESS_BLOCKED,
    EGRESS_ALLOWED,
    DIRECT_IP,
];
