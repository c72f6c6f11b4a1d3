//! Immutable run configuration.
//!
//! Corresponds to spec.md §3 "Configuration". Replaces the teacher's
//! `.tfrc` script loader with a plain record built once from parsed
//! command-line arguments (plus environment overrides) and validated
//! before any I/O happens, matching the teacher's "parse once, share by
//! reference" lifecycle for its own `Config` type.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::acl::{Acl, AclEntry, DefaultPolicy, Decision};
use crate::error::UsageError;
use crate::logging::Verbosity;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Connect,
    Listen,
    Scan,
    Rendezvous,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    Tcp,
    Udp,
    Sctp,
    Unix,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wrap {
    None,
    Tls,
    Dtls,
    Telnet,
    Srp,
}

#[derive(Debug, Clone)]
pub enum Endpoint {
    Network(SocketAddr),
    UnixPath(PathBuf),
    /// Unresolved `host:port` pair, resolved at dial/bind time (spec.md
    /// §7 "Resolution" errors are raised there, not during validation).
    HostPort(String, u16),
}

#[derive(Debug, Clone)]
pub struct TlsSettings {
    pub cert_path: Option<PathBuf>,
    pub key_path: Option<PathBuf>,
    pub verify_peer: bool,
}

impl Default for TlsSettings {
    fn default() -> Self {
        Self { cert_path: None, key_path: None, verify_peer: true }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ExecSettings {
    pub program: Option<String>,
    pub args: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct RendezvousSettings {
    pub secret: Option<String>,
    pub relay: Option<String>,
    /// Whether `-l`/`--listen` was given alongside `--rendezvous*`: this
    /// peer sends the relay a LISTEN packet rather than CONNECT (spec.md
    /// §4.5 "the listening peer sends LISTEN... the connecting peer sends
    /// CONNECT"). The relay still assigns the SRP role independently.
    pub listen: bool,
}

#[derive(Debug, Clone)]
pub struct ScanSettings {
    pub ports: Vec<u16>,
    pub randomize: bool,
    pub inter_probe_delay: Option<Duration>,
}

impl Default for ScanSettings {
    fn default() -> Self {
        Self { ports: Vec::new(), randomize: false, inter_probe_delay: None }
    }
}

/// Everything a single invocation needs, exactly as enumerated in
/// spec.md §3. Built once by [`crate::cli`], validated by
/// [`Config::validate`], then shared read-only (`Arc<Config>`) across
/// every subsystem — nothing here is ever mutated after construction.
#[derive(Debug, Clone)]
pub struct Config {
    pub mode: Mode,
    pub transport: Transport,
    pub wrap: Wrap,
    pub endpoint: Endpoint,
    pub backlog: u32,
    pub broker: bool,
    pub chat: bool,
    pub exec: ExecSettings,
    pub acl: Acl,
    pub verbosity: Verbosity,
    pub connect_timeout: Option<Duration>,
    pub idle_timeout: Option<Duration>,
    pub execution_timeout: Option<Duration>,
    pub buffer_size: usize,
    pub close_on_eof: bool,
    pub crlf: bool,
    pub tee_path: Option<PathBuf>,
    pub hex_dump_path: Option<PathBuf>,
    pub drop_user: Option<String>,
    pub rendezvous: RendezvousSettings,
    pub tls: TlsSettings,
    pub scan: ScanSettings,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            mode: Mode::Connect,
            transport: Transport::Tcp,
            wrap: Wrap::None,
            endpoint: Endpoint::HostPort(String::new(), 0),
            backlog: 128,
            broker: false,
            chat: false,
            exec: ExecSettings::default(),
            acl: Acl::new(DefaultPolicy::Allow),
            verbosity: Verbosity::Normal,
            connect_timeout: None,
            idle_timeout: None,
            execution_timeout: None,
            buffer_size: 64 * 1024,
            close_on_eof: false,
            crlf: false,
            tee_path: None,
            hex_dump_path: None,
            drop_user: None,
            rendezvous: RendezvousSettings::default(),
            tls: TlsSettings::default(),
            scan: ScanSettings::default(),
        }
    }
}

impl Config {
    /// Cross-field checks that argv parsing alone cannot express: the
    /// conflicting-options, path-traversal, bad-CIDR, and port-range
    /// cases spec.md §7 names under "Usage/config".
    pub fn validate(&self) -> Result<(), UsageError> {
        if self.mode == Mode::Rendezvous && self.transport != Transport::Tcp {
            return Err(UsageError::ConflictingOptions(
                "rendezvous requires tcp transport".to_owned(),
            ));
        }
        if self.mode == Mode::Rendezvous && self.rendezvous.secret.is_none() {
            return Err(UsageError::MissingValue("rendezvous-secret"));
        }
        if self.mode == Mode::Listen && self.exec.program.is_some() && self.acl.is_empty() {
            return Err(UsageError::ConflictingOptions(
                "exec mode requires a non-empty allow list".to_owned(),
            ));
        }
        if let Endpoint::Network(addr) = &self.endpoint {
            if self.mode == Mode::Connect && addr.port() == 0 {
                return Err(UsageError::ZeroPort);
            }
        }
        if let Endpoint::HostPort(_, port) = &self.endpoint {
            if self.mode == Mode::Connect && *port == 0 {
                return Err(UsageError::ZeroPort);
            }
        }
        if self.mode == Mode::Scan {
            validate_port_list(&self.scan.ports)?;
        }
        for path in [&self.tee_path, &self.hex_dump_path].into_iter().flatten() {
            reject_path_traversal(path)?;
        }
        Ok(())
    }

    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout.unwrap_or(Duration::from_secs(10))
    }
}

/// Reject `..` path segments in tee/hex-dump destinations (spec.md §7
/// "path-traversal-rejected").
fn reject_path_traversal(path: &std::path::Path) -> Result<(), UsageError> {
    if path.components().any(|c| c == std::path::Component::ParentDir) {
        return Err(UsageError::PathTraversalRejected(path.display().to_string()));
    }
    Ok(())
}

/// A scan port list/range must be non-empty and, for an explicit range
/// encoded as a two-element `[start, end]` pair, start must not exceed
/// end (spec.md §8 "Boundary behaviours").
fn validate_port_list(ports: &[u16]) -> Result<(), UsageError> {
    if ports.len() == 2 {
        let (start, end) = (ports[0], ports[1]);
        if start > end {
            return Err(UsageError::InvertedPortRange { start, end });
        }
    }
    Ok(())
}

/// Parse one `allow`/`deny` CIDR CLI argument of the form
/// `allow:10.0.0.0/8` or `deny:0.0.0.0/0` into an [`AclEntry`].
pub fn parse_acl_entry(spec: &str) -> Result<AclEntry, UsageError> {
    let (decision_str, cidr) =
        spec.split_once(':').ok_or_else(|| UsageError::InvalidCidr(spec.to_owned()))?;
    let decision = match decision_str {
        "allow" => Decision::Allow,
        "deny" => Decision::Deny,
        _ => return Err(UsageError::InvalidCidr(spec.to_owned())),
    };
    let net = Acl::parse_cidr(cidr).map_err(UsageError::InvalidCidr)?;
    Ok(AclEntry { net, decision })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        let mut config = Config::default();
        config.endpoint = Endpoint::Network("127.0.0.1:9".parse().unwrap());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn rendezvous_without_udp_transport_is_rejected() {
        let config = Config {
            mode: Mode::Rendezvous,
            transport: Transport::Udp,
            rendezvous: RendezvousSettings { secret: Some("s3cret".into()), relay: None, listen: false },
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn rendezvous_without_secret_is_rejected() {
        let config = Config { mode: Mode::Rendezvous, ..Config::default() };
        assert!(config.validate().is_err());
    }

    #[test]
    fn exec_with_empty_acl_is_rejected_at_validation() {
        let config = Config {
            mode: Mode::Listen,
            exec: ExecSettings { program: Some("/bin/sh".into()), args: vec![] },
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_port_connect_is_rejected() {
        let config = Config {
            mode: Mode::Connect,
            endpoint: Endpoint::Network("127.0.0.1:0".parse().unwrap()),
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn inverted_scan_port_range_is_rejected() {
        let config = Config {
            mode: Mode::Scan,
            scan: ScanSettings { ports: vec![100, 50], randomize: false, inter_probe_delay: None },
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn path_traversal_in_tee_path_is_rejected() {
        let mut config = Config::default();
        config.endpoint = Endpoint::Network("127.0.0.1:9".parse().unwrap());
        config.tee_path = Some(PathBuf::from("../../etc/passwd"));
        assert!(config.validate().is_err());
    }

    #[test]
    fn parse_acl_entry_accepts_allow_and_deny() {
        let allow = parse_acl_entry("allow:10.0.0.0/8").unwrap();
        assert_eq!(allow.decision, Decision::Allow);
        let deny = parse_acl_entry("deny:0.0.0.0/0").unwrap();
        assert_eq!(deny.decision, Decision::Deny);
    }

    #[test]
    fn parse_acl_entry_rejects_missing_colon() {
        assert!(parse_acl_entry("10.0.0.0/8").is_err());
    }
}
