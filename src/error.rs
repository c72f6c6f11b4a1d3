//! Error taxonomy and process exit codes.
//!
//! One `thiserror` enum per failure category, matching the breakdown used
//! by the daemon/protocol crates this tool borrows its stack from: usage,
//! resolution, connection, transport, policy, resource, platform. A single
//! [`SwakError`] aggregates them for call sites that need to propagate a
//! session-ending failure up to the dispatch core or `main`.

use std::fmt;

// ── Per-category errors ─────────────────────────────────────────────────

/// Usage and configuration mistakes caught during [`crate::config::Config::validate`].
#[derive(Debug, thiserror::Error)]
pub enum UsageError {
    #[error("missing value for {0}")]
    MissingValue(&'static str),
    #[error("conflicting options: {0}")]
    ConflictingOptions(String),
    #[error("path rejected: {0}")]
    PathTraversalRejected(String),
    #[error("invalid CIDR: {0}")]
    InvalidCidr(String),
    #[error("port 0 is not a valid target")]
    ZeroPort,
    #[error("port range start {start} is greater than end {end}")]
    InvertedPortRange { start: u16, end: u16 },
}

/// Hostname/address resolution failures.
#[derive(Debug, thiserror::Error)]
pub enum ResolutionError {
    #[error("unknown host: {0}")]
    UnknownHost(String),
    #[error("host {0} resolved to no addresses")]
    NoAddresses(String),
}

/// Failures establishing a connection.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("connection refused")]
    ConnectRefused,
    #[error("connect timed out")]
    ConnectTimeout,
    #[error("bind failed: {0}")]
    BindFailed(String),
    #[error("permission denied")]
    PermissionDenied,
}

/// Failures once a stream is open.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("read failed: {0}")]
    ReadFailed(String),
    #[error("write failed: {0}")]
    WriteFailed(String),
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),
    #[error("handshake failed: {0}")]
    HandshakeFailed(HandshakeFailureKind),
    #[error("handshake timed out")]
    HandshakeTimeout,
}

/// Distinguishes *why* a handshake failed (spec.md §4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum HandshakeFailureKind {
    #[error("authentication failure (bad password or proof mismatch)")]
    Authentication,
    #[error("transport error during handshake")]
    Transport,
    #[error("unsupported cipher suite")]
    UnsupportedCipherSuite,
    #[error("invalid rendezvous handshake")]
    InvalidRendezvous,
}

/// Access-control and privilege-drop failures.
#[derive(Debug, thiserror::Error)]
pub enum PolicyError {
    #[error("access denied by ACL")]
    AccessDenied,
    #[error("exec mode requires a non-empty allow list")]
    ExecRequiresAllow,
    #[error("privilege drop failed: {0}")]
    PrivilegeDropFailed(String),
    #[error("user not found: {0}")]
    UserNotFound(String),
}

/// Resource exhaustion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ResourceError {
    #[error("too many file descriptors")]
    TooManyFileDescriptors,
    #[error("fd_set capacity exceeded")]
    FdSetOverflow,
    #[error("ring buffer overflow")]
    BufferOverflow,
}

/// Requested a capability the host platform cannot provide.
#[derive(Debug, thiserror::Error)]
pub enum PlatformError {
    #[error("unsupported on this platform: {0}")]
    Unsupported(&'static str),
    #[error("not a terminal")]
    NotATerminal,
}

// ── Aggregate ─────────────────────────────────────────────────────────────

/// Top-level error type threaded through subsystem boundaries.
#[derive(Debug, thiserror::Error)]
pub enum SwakError {
    #[error(transparent)]
    Usage(#[from] UsageError),
    #[error(transparent)]
    Resolution(#[from] ResolutionError),
    #[error(transparent)]
    Connection(#[from] ConnectionError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Policy(#[from] PolicyError),
    #[error(transparent)]
    Resource(#[from] ResourceError),
    #[error(transparent)]
    Platform(#[from] PlatformError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Process exit codes. Each category in spec.md §6 gets a distinct value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitCode {
    Success = 0,
    Usage = 1,
    Network = 2,
    Handshake = 3,
    Timeout = 4,
    Permission = 5,
    ScanNoOpenPorts = 6,
    Internal = 70,
}

impl fmt::Display for ExitCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", *self as i32)
    }
}

impl SwakError {
    /// Map this error onto the process exit code table in spec.md §6.
    pub fn exit_code(&self) -> ExitCode {
        match self {
            SwakError::Usage(_) => ExitCode::Usage,
            SwakError::Resolution(_) | SwakError::Connection(_) => ExitCode::Network,
            SwakError::Transport(TransportError::HandshakeFailed(_))
            | SwakError::Transport(TransportError::HandshakeTimeout) => ExitCode::Handshake,
            SwakError::Transport(_) => ExitCode::Network,
            SwakError::Policy(_) => ExitCode::Permission,
            SwakError::Resource(_) | SwakError::Platform(_) => ExitCode::Internal,
            SwakError::Io(_) => ExitCode::Network,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn usage_error_maps_to_usage_exit_code() {
        let err: SwakError = UsageError::ZeroPort.into();
        assert_eq!(err.exit_code(), ExitCode::Usage);
    }

    #[test]
    fn handshake_failure_maps_to_handshake_exit_code() {
        let err: SwakError =
            TransportError::HandshakeFailed(HandshakeFailureKind::Authentication).into();
        assert_eq!(err.exit_code(), ExitCode::Handshake);
    }

    #[test]
    fn policy_error_maps_to_permission_exit_code() {
        let err: SwakError = PolicyError::AccessDenied.into();
        assert_eq!(err.exit_code(), ExitCode::Permission);
    }

    #[test]
    fn exit_code_display_is_numeric() {
        assert_eq!(ExitCode::Internal.to_string(), "70");
    }
}
