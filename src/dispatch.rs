//! Listen-mode accept loop: ACL enforcement, privilege drop, exec gating,
//! and broker fan-out.
//!
//! Corresponds to spec.md §4.9. Grounded on the teacher's `event_loop.rs`
//! "accept, register, dispatch" shape and `process.rs`'s scheduled-task
//! bookkeeping pattern, replacing the MUD-specific per-connection
//! handling with ACL/exec/broker policy. Privilege drop uses `nix`, this
//! pack's consistent choice for raw POSIX syscalls (`oferchen-rsync`'s
//! daemon crates).

use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::process::{Command, Stdio};

use mio::net::TcpListener;

use crate::acl::{Acl, Decision};
use crate::error::{PolicyError, ResourceError, SwakError};
use crate::multiplexer::{Handle, Multiplexer, Readiness};
use crate::ring_buffer::RingBuffer;
use crate::stream::{NetStream, RawSocket};

/// `IDLE → BOUND → (DROPPED-PRIVS|skipped) → ACCEPTING ⇌ SATURATED →
/// DRAINING → CLOSED`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Idle,
    Bound,
    PrivilegesDropped,
    Accepting,
    Saturated,
    Draining,
    Closed,
}

/// Drop root privileges in the strict order spec.md §4.9 mandates:
/// `setgroups(0)`, `setgid`, `setuid`. Any failure aborts with no partial
/// drop attempted beyond the failing call.
#[cfg(unix)]
pub fn drop_privileges(user: &str) -> Result<(), PolicyError> {
    let cstr = std::ffi::CString::new(user).map_err(|_| PolicyError::UserNotFound(user.to_owned()))?;
    let pwd = unsafe { libc::getpwnam(cstr.as_ptr()) };
    if pwd.is_null() {
        return Err(PolicyError::UserNotFound(user.to_owned()));
    }
    let (uid, gid) = unsafe { ((*pwd).pw_uid, (*pwd).pw_gid) };

    nix::unistd::setgroups(&[])
        .map_err(|e| PolicyError::PrivilegeDropFailed(format!("setgroups(0) failed: {e}")))?;
    nix::unistd::setgid(nix::unistd::Gid::from_raw(gid))
        .map_err(|e| PolicyError::PrivilegeDropFailed(format!("setgid failed: {e}")))?;
    nix::unistd::setuid(nix::unistd::Uid::from_raw(uid))
        .map_err(|e| PolicyError::PrivilegeDropFailed(format!("setuid failed: {e}")))?;
    Ok(())
}

#[cfg(not(unix))]
pub fn drop_privileges(_user: &str) -> Result<(), PolicyError> {
    Err(PolicyError::PrivilegeDropFailed("privilege drop is POSIX-only".to_owned()))
}

/// Verify a Unix socket path is not world-writable after bind, per
/// spec.md §4.9.
#[cfg(unix)]
pub fn check_unix_socket_permissions(path: &std::path::Path) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let meta = std::fs::metadata(path)?;
    let mode = meta.permissions().mode();
    if mode & 0o002 != 0 {
        log::warn!("refusing world-writable unix socket at {}", path.display());
        return Err(io::Error::new(io::ErrorKind::PermissionDenied, "world-writable unix socket"));
    }
    Ok(())
}

pub struct ExecConfig {
    pub program: String,
    pub args: Vec<String>,
}

/// Spawn the configured program with piped stdio, returning a stream
/// suitable for use as transfer-engine side B. Exec mode requires a
/// non-empty ACL allow list (checked by the caller before this is ever
/// invoked — spec.md's fail-closed default).
pub fn spawn_exec(config: &ExecConfig) -> io::Result<std::process::Child> {
    crate::logging::security_event("exec", &format!("spawning {}", config.program));
    Command::new(&config.program)
        .args(&config.args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit())
        .spawn()
}

/// One accepted broker peer: its stream, outbound ring buffer, and the
/// multiplexer handle it's registered under.
struct Peer {
    stream: RawSocket,
    outbound: RingBuffer,
    handle: Handle,
}

/// Descriptors the process holds before any peer is accepted: stdin,
/// stdout, stderr, and the listening socket itself.
const RESERVED_DESCRIPTORS: usize = 4;

/// Central broker state: a single multiplexed pump that fans data from
/// any connection out to every other connection (spec.md §4.9
/// "Broker/chat fan-out"). Mutated only by its owning loop — no locking.
pub struct Broker {
    peers: HashMap<usize, Peer>,
    next_id: usize,
    outbound_capacity: usize,
    chat_mode: bool,
    /// Ceiling on concurrent peers, sized by the same `FD_SETSIZE`-derived
    /// guard spec.md §4.1 requires of the select-emulation backend
    /// (`select_backend_capacity`) — enforced here regardless of which
    /// multiplexer backend is actually driving I/O, since it's the
    /// process-wide descriptor budget that's really at stake.
    peer_capacity: usize,
}

impl Broker {
    pub fn new(outbound_capacity: usize, chat_mode: bool) -> Self {
        let peer_capacity = select_backend_capacity(libc::FD_SETSIZE, RESERVED_DESCRIPTORS);
        Self { peers: HashMap::new(), next_id: 0, outbound_capacity, chat_mode, peer_capacity }
    }

    pub fn peer_capacity(&self) -> usize {
        self.peer_capacity
    }

    /// Register a newly accepted connection. Refuses the peer *before*
    /// registering it with the multiplexer once [`Self::peer_capacity`] is
    /// reached (spec.md §4.1: "fails fast... before registration, not at
    /// `wait` time").
    pub fn add_peer(&mut self, mut stream: RawSocket, mux: &mut Multiplexer) -> io::Result<usize> {
        if self.peers.len() >= self.peer_capacity {
            return Err(io::Error::new(io::ErrorKind::Other, ResourceError::TooManyFileDescriptors));
        }
        let id = self.next_id;
        self.next_id += 1;
        let handle = Handle(id + 1); // reserve 0 for the listener in the caller's scheme
        mux.register(stream.source(), handle, Readiness::READABLE)?;
        self.peers.insert(id, Peer { stream, outbound: RingBuffer::new(self.outbound_capacity), handle });
        Ok(id)
    }

    pub fn remove_peer(&mut self, id: usize, mux: &mut Multiplexer) {
        if let Some(mut peer) = self.peers.remove(&id) {
            let _ = mux.deregister(peer.stream.source());
            let _ = peer.stream.close();
        }
    }

    pub fn handle_for(&self, id: usize) -> Option<Handle> {
        self.peers.get(&id).map(|p| p.handle)
    }

    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    pub fn peer_ids(&self) -> Vec<usize> {
        self.peers.keys().copied().collect()
    }

    /// Read available bytes from one peer's stream. `Ok(0)` means EOF,
    /// matching [`NetStream::read`](crate::stream::NetStream::read); an
    /// unknown `id` (already removed) also reads as EOF.
    pub fn read_peer(&mut self, id: usize, buf: &mut [u8]) -> io::Result<usize> {
        match self.peers.get_mut(&id) {
            Some(peer) => peer.stream.read(buf),
            None => Ok(0),
        }
    }

    /// Fan `data` (read from `source_id`) out to every other peer. Peers
    /// whose outbound ring is full get the data dropped with a logged
    /// overflow event rather than blocking the source.
    pub fn broadcast(&mut self, source_id: usize, data: &[u8]) {
        let framed = if self.chat_mode {
            let mut framed = format!("<user {source_id}> ").into_bytes();
            framed.extend_from_slice(data);
            framed
        } else {
            data.to_vec()
        };
        for (&id, peer) in self.peers.iter_mut() {
            if id == source_id {
                continue;
            }
            if peer.outbound.write_all(&framed).is_err() {
                log::warn!("broker peer {id} outbound buffer overflow, dropping {} bytes", framed.len());
                peer.outbound.clear_overflow();
            }
        }
    }

    pub fn flush_peer(&mut self, id: usize) -> io::Result<()> {
        if let Some(peer) = self.peers.get_mut(&id) {
            loop {
                let span = peer.outbound.readable_slice();
                if span.is_empty() {
                    break;
                }
                match peer.stream.write(span.first) {
                    Ok(0) => break,
                    Ok(n) => peer.outbound.consume(n),
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                    Err(e) => return Err(e),
                }
            }
        }
        Ok(())
    }
}

/// On `select`-emulation backends, the maximum concurrent peer count is
/// `FD_SETSIZE / 3 - reserved` (spec.md §4.9 "Capacity guard").
pub fn select_backend_capacity(fd_set_size: usize, reserved: usize) -> usize {
    (fd_set_size / 3).saturating_sub(reserved)
}

/// Per-connection ACL decision plus the logging side effect spec.md
/// requires for denies.
pub fn check_acl(acl: &Acl, peer: SocketAddr) -> Result<(), SwakError> {
    match acl.evaluate(peer.ip()) {
        Decision::Allow => Ok(()),
        Decision::Deny => {
            crate::logging::security_event("acl-deny", &peer.to_string());
            Err(SwakError::Policy(PolicyError::AccessDenied))
        }
    }
}

/// Exec mode with no allow-list entries must refuse to start at all
/// (spec.md §4.9 "fail-closed by default").
pub fn validate_exec_mode(exec_configured: bool, acl: &Acl) -> Result<(), SwakError> {
    if exec_configured && acl.is_empty() {
        return Err(SwakError::Policy(PolicyError::ExecRequiresAllow));
    }
    if exec_configured {
        log::warn!("exec mode enabled: accepted connections can run a local program");
    }
    Ok(())
}

/// Bind a TCP listener and move it into the [`ServerState::Bound`] state.
/// A thin entry point kept separate from the accept loop itself so tests
/// can exercise the bind step in isolation.
pub fn bind_listener(addr: SocketAddr) -> io::Result<(TcpListener, ServerState)> {
    let listener = TcpListener::bind(addr)?;
    Ok((listener, ServerState::Bound))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acl::{AclEntry, DefaultPolicy};

    #[test]
    fn acl_deny_logs_and_returns_permission_error() {
        let mut acl = Acl::new(DefaultPolicy::Deny);
        acl.push(AclEntry { net: "10.0.0.0/8".parse().unwrap(), decision: Decision::Deny });
        let peer: SocketAddr = "10.0.0.5:1234".parse().unwrap();
        assert!(check_acl(&acl, peer).is_err());
    }

    #[test]
    fn acl_allow_permits() {
        let acl = Acl::new(DefaultPolicy::Allow);
        let peer: SocketAddr = "1.2.3.4:1234".parse().unwrap();
        assert!(check_acl(&acl, peer).is_ok());
    }

    #[test]
    fn exec_with_empty_acl_is_fail_closed() {
        let acl = Acl::new(DefaultPolicy::Allow);
        assert!(validate_exec_mode(true, &acl).is_err());
    }

    #[test]
    fn exec_with_nonempty_acl_is_allowed() {
        let mut acl = Acl::new(DefaultPolicy::Deny);
        acl.push(AclEntry { net: "127.0.0.1/32".parse().unwrap(), decision: Decision::Allow });
        assert!(validate_exec_mode(true, &acl).is_ok());
    }

    #[test]
    fn select_backend_capacity_reserves_headroom() {
        assert_eq!(select_backend_capacity(1024, 4), 1024 / 3 - 4);
    }

    #[test]
    fn select_backend_capacity_never_underflows() {
        assert_eq!(select_backend_capacity(3, 100), 0);
    }

    #[test]
    fn broker_broadcast_skips_source_peer() {
        let mut broker = Broker::new(4096, false);
        // Without live sockets we can only exercise the bookkeeping here;
        // add_peer requires a real stream, covered by the transfer engine
        // and multiplexer integration tests instead.
        assert_eq!(broker.peer_count(), 0);
    }
}
