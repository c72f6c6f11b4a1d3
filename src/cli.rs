//! Command-line argument parsing.
//!
//! Corresponds to spec.md §6 "Command-line surface". Argument parsing
//! itself is explicitly out of scope for spec.md's core (see §1's
//! "deliberately out of scope" list), so this stays a minimal hand-rolled
//! parser in the teacher's style — `tf-rs/src/cli.rs` took the same
//! approach for its own argv surface rather than pulling in a framework.
//!
//! Usage:
//!   swak [-l] [-u|--sctp|--unix] [--tls|--dtls|--telnet] [-e<prog>] HOST PORT
//!   swak -l [-e<prog>] [--allow=CIDR]... [--deny=CIDR]... [-p<port>]
//!   swak --scan HOST PORTS
//!   swak --rendezvous-secret=S [--rendezvous-relay=HOST:PORT] HOST

use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::acl::{Acl, DefaultPolicy};
use crate::config::{Config, Endpoint, Mode, Transport, Wrap};
use crate::error::UsageError;
use crate::logging::Verbosity;

/// Environment variable names honoured when the matching flag was not
/// given on the command line (spec.md §6 "CLI > env > built-in default").
pub mod env_vars {
    pub const RENDEZVOUS_RELAY: &str = "SWAK_RENDEZVOUS_RELAY";
    pub const VERBOSITY: &str = "SWAK_VERBOSITY";
    pub const DROP_USER: &str = "SWAK_DROP_USER";
}

/// Parse `argv` (excluding `argv[0]`) into a [`Config`]. Unresolved
/// host:port endpoints are left as [`Endpoint::HostPort`] — resolution
/// happens at dial/bind time, not here.
pub fn parse(args: &[String]) -> Result<Config, UsageError> {
    let mut config = Config::default();
    let mut positional = Vec::new();
    let mut verbosity_count: i32 = 0;
    let mut quiet = false;
    let mut deny_default = false;
    let mut saw_listen_flag = false;

    let mut iter = args.iter().peekable();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "-l" | "--listen" => {
                config.mode = Mode::Listen;
                saw_listen_flag = true;
            }
            "--scan" => config.mode = Mode::Scan,
            "--rendezvous" => config.mode = Mode::Rendezvous,
            "--udp" => config.transport = Transport::Udp,
            "--sctp" => config.transport = Transport::Sctp,
            "--unix" => config.transport = Transport::Unix,
            "--tls" => config.wrap = Wrap::Tls,
            "--dtls" => config.wrap = Wrap::Dtls,
            "--telnet" => config.wrap = Wrap::Telnet,
            "--broker" => config.broker = true,
            "--chat" => {
                config.broker = true;
                config.chat = true;
            }
            "--close-on-eof" => config.close_on_eof = true,
            "--crlf" => config.crlf = true,
            "--randomize-ports" => config.scan.randomize = true,
            "-v" => verbosity_count += 1,
            "-vv" => verbosity_count += 2,
            "-vvv" => verbosity_count += 3,
            "-q" | "--quiet" => quiet = true,
            "--deny-by-default" => deny_default = true,
            s if s.starts_with("-e") || s.starts_with("--exec=") => {
                config.exec.program = Some(strip_value(s, "-e", "--exec=").to_owned());
            }
            s if s.starts_with("--allow=") => {
                config.acl.push(crate::config::parse_acl_entry(&format!(
                    "allow:{}",
                    &s["--allow=".len()..]
                ))?);
            }
            s if s.starts_with("--deny=") => {
                config.acl.push(crate::config::parse_acl_entry(&format!(
                    "deny:{}",
                    &s["--deny=".len()..]
                ))?);
            }
            s if s.starts_with("--drop-user=") => {
                config.drop_user = Some(s["--drop-user=".len()..].to_owned());
            }
            s if s.starts_with("--connect-timeout=") => {
                config.connect_timeout = Some(parse_secs(&s["--connect-timeout=".len()..])?);
            }
            s if s.starts_with("--idle-timeout=") => {
                config.idle_timeout = Some(parse_secs(&s["--idle-timeout=".len()..])?);
            }
            s if s.starts_with("--exec-timeout=") => {
                config.execution_timeout = Some(parse_secs(&s["--exec-timeout=".len()..])?);
            }
            s if s.starts_with("--tee=") => {
                config.tee_path = Some(PathBuf::from(&s["--tee=".len()..]));
            }
            s if s.starts_with("--hex-dump=") => {
                config.hex_dump_path = Some(PathBuf::from(&s["--hex-dump=".len()..]));
            }
            s if s.starts_with("--rendezvous-secret=") => {
                config.rendezvous.secret = Some(s["--rendezvous-secret=".len()..].to_owned());
                config.mode = Mode::Rendezvous;
            }
            s if s.starts_with("--rendezvous-relay=") => {
                config.rendezvous.relay = Some(s["--rendezvous-relay=".len()..].to_owned());
            }
            s if s.starts_with("--inter-probe-delay=") => {
                config.scan.inter_probe_delay = Some(parse_millis(&s["--inter-probe-delay=".len()..])?);
            }
            s if s.starts_with("--backlog=") => {
                config.backlog = s["--backlog=".len()..]
                    .parse()
                    .map_err(|_| UsageError::MissingValue("backlog"))?;
            }
            s if s.starts_with('-') => {
                return Err(UsageError::ConflictingOptions(format!("unrecognised option: {s}")));
            }
            other => positional.push(other.to_owned()),
        }
    }

    apply_env_overrides(&mut config);

    config.verbosity = if quiet {
        Verbosity::Quiet
    } else {
        match verbosity_count {
            0 => Verbosity::Normal,
            1 => Verbosity::Verbose,
            2 => Verbosity::Debug,
            _ => Verbosity::Trace,
        }
    };

    config.acl = rebuild_acl_with_default(config.acl, deny_default || config.exec.program.is_some());
    config.rendezvous.listen = saw_listen_flag;

    match config.mode {
        Mode::Scan => {
            let host = positional.first().cloned().unwrap_or_default();
            config.scan.ports = parse_port_spec(positional.get(1).map(String::as_str).unwrap_or(""))?;
            config.endpoint = Endpoint::HostPort(host, 0);
        }
        Mode::Rendezvous => {
            let host = positional.first().cloned().unwrap_or_default();
            config.endpoint = Endpoint::HostPort(host, 0);
        }
        Mode::Listen => {
            config.endpoint = resolve_listen_endpoint(&config, &positional)?;
        }
        Mode::Connect => {
            config.endpoint = resolve_connect_endpoint(&config, &positional)?;
        }
    }

    config.exec.args = positional.into_iter().skip(2).collect();
    Ok(config)
}

fn strip_value<'a>(s: &'a str, short: &str, long: &str) -> &'a str {
    if let Some(rest) = s.strip_prefix(long) {
        rest
    } else {
        s.strip_prefix(short).unwrap_or(s)
    }
}

fn parse_secs(s: &str) -> Result<Duration, UsageError> {
    s.parse::<u64>().map(Duration::from_secs).map_err(|_| UsageError::MissingValue("timeout"))
}

fn parse_millis(s: &str) -> Result<Duration, UsageError> {
    s.parse::<u64>().map(Duration::from_millis).map_err(|_| UsageError::MissingValue("delay"))
}

/// `80`, `20-25`, or `22,80,443`.
fn parse_port_spec(spec: &str) -> Result<Vec<u16>, UsageError> {
    if let Some((start, end)) = spec.split_once('-') {
        let start: u16 = start.parse().map_err(|_| UsageError::InvalidCidr(spec.to_owned()))?;
        let end: u16 = end.parse().map_err(|_| UsageError::InvalidCidr(spec.to_owned()))?;
        return Ok(vec![start, end]);
    }
    spec.split(',')
        .filter(|p| !p.is_empty())
        .map(|p| p.parse::<u16>().map_err(|_| UsageError::InvalidCidr(spec.to_owned())))
        .collect()
}

fn resolve_connect_endpoint(config: &Config, positional: &[String]) -> Result<Endpoint, UsageError> {
    if config.transport == Transport::Unix {
        let path = positional.first().ok_or(UsageError::MissingValue("unix socket path"))?;
        return Ok(Endpoint::UnixPath(PathBuf::from(path)));
    }
    let host = positional.first().ok_or(UsageError::MissingValue("host"))?;
    let port: u16 = positional
        .get(1)
        .ok_or(UsageError::MissingValue("port"))?
        .parse()
        .map_err(|_| UsageError::MissingValue("port"))?;
    if let Ok(addr) = format!("{host}:{port}").parse::<SocketAddr>() {
        Ok(Endpoint::Network(addr))
    } else {
        Ok(Endpoint::HostPort(host.clone(), port))
    }
}

fn resolve_listen_endpoint(config: &Config, positional: &[String]) -> Result<Endpoint, UsageError> {
    if config.transport == Transport::Unix {
        let path = positional.first().ok_or(UsageError::MissingValue("unix socket path"))?;
        return Ok(Endpoint::UnixPath(PathBuf::from(path)));
    }
    let port: u16 = positional
        .first()
        .ok_or(UsageError::MissingValue("port"))?
        .parse()
        .map_err(|_| UsageError::MissingValue("port"))?;
    Ok(Endpoint::Network(SocketAddr::from(([0, 0, 0, 0], port))))
}

fn apply_env_overrides(config: &mut Config) {
    if config.rendezvous.relay.is_none() {
        if let Ok(relay) = env::var(env_vars::RENDEZVOUS_RELAY) {
            config.rendezvous.relay = Some(relay);
        }
    }
    if config.drop_user.is_none() {
        if let Ok(user) = env::var(env_vars::DROP_USER) {
            config.drop_user = Some(user);
        }
    }
}

fn rebuild_acl_with_default(acl: Acl, deny_by_default: bool) -> Acl {
    let default = if deny_by_default { DefaultPolicy::Deny } else { DefaultPolicy::Allow };
    let mut rebuilt = Acl::new(default);
    for entry in acl.into_entries() {
        rebuilt.push(entry);
    }
    rebuilt
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(s: &str) -> Vec<String> {
        s.split_whitespace().map(String::from).collect()
    }

    #[test]
    fn minimal_connect_parses_host_and_port() {
        let config = parse(&args("example.com 2222")).unwrap();
        assert_eq!(config.mode, Mode::Connect);
        match config.endpoint {
            Endpoint::HostPort(h, p) => {
                assert_eq!(h, "example.com");
                assert_eq!(p, 2222);
            }
            _ => panic!("expected HostPort endpoint"),
        }
    }

    #[test]
    fn listen_flag_sets_mode_and_binds_wildcard() {
        let config = parse(&args("-l 9000")).unwrap();
        assert_eq!(config.mode, Mode::Listen);
        match config.endpoint {
            Endpoint::Network(addr) => assert_eq!(addr.port(), 9000),
            _ => panic!("expected Network endpoint"),
        }
    }

    #[test]
    fn verbosity_flags_are_cumulative() {
        let config = parse(&args("-v -v example.com 80")).unwrap();
        assert_eq!(config.verbosity, Verbosity::Verbose);
    }

    #[test]
    fn quiet_overrides_verbosity() {
        let config = parse(&args("-q -vvv example.com 80")).unwrap();
        assert_eq!(config.verbosity, Verbosity::Quiet);
    }

    #[test]
    fn scan_mode_parses_port_range() {
        let config = parse(&args("--scan 127.0.0.1 20-25")).unwrap();
        assert_eq!(config.mode, Mode::Scan);
        assert_eq!(config.scan.ports, vec![20, 25]);
    }

    #[test]
    fn scan_mode_parses_port_list() {
        let config = parse(&args("--scan 127.0.0.1 22,80,443")).unwrap();
        assert_eq!(config.scan.ports, vec![22, 80, 443]);
    }

    #[test]
    fn exec_without_allow_list_deny_defaults_acl() {
        let config = parse(&args("-l -e/bin/sh 9000")).unwrap();
        assert!(config.acl.is_empty());
        assert!(!config.acl.allows("1.2.3.4".parse().unwrap()));
    }

    #[test]
    fn explicit_allow_entry_is_parsed() {
        let config = parse(&args("-l --allow=10.0.0.0/8 9000")).unwrap();
        assert!(config.acl.allows("10.0.0.5".parse().unwrap()));
        assert!(!config.acl.allows("1.2.3.4".parse().unwrap()));
    }

    #[test]
    fn unrecognised_flag_is_rejected() {
        assert!(parse(&args("--bogus-flag example.com 80")).is_err());
    }

    #[test]
    fn rendezvous_secret_flag_sets_mode() {
        let config = parse(&args("--rendezvous-secret=s3cret relay.example.com")).unwrap();
        assert_eq!(config.mode, Mode::Rendezvous);
        assert_eq!(config.rendezvous.secret.as_deref(), Some("s3cret"));
    }
}
