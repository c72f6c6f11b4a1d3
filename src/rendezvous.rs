//! Rendezvous handshake: shared-secret NAT traversal through a relay.
//!
//! Corresponds to spec.md §4.5. Two peers that only share a secret dial a
//! known relay, which matches them by a secret-derived address and hands
//! each an assigned role (SRP server or SRP client) via a fixed-size START
//! packet. Grounded on the teacher's `net.rs` pattern of a pure, I/O-free
//! protocol struct (`Protocol`) wrapped by a thin socket-driving layer —
//! here [`derive_address`]/[`derive_password`]/packet (de)serialisation are
//! pure functions, kept separate from the actual connect/exchange.

use sha2::{Digest, Sha256};

use crate::error::HandshakeFailureKind;

// ── Secret derivation ────────────────────────────────────────────────────

const ADDRESS_CONSTANT: &[u8] = b"swak-rendezvous-address-v1";
const PASSWORD_CONSTANT: &[u8] = b"swak-rendezvous-password-v1";

/// First 16 bytes of `H(constant ∥ secret)`, used as the rendezvous
/// address both peers present to the relay.
pub fn derive_address(secret: &[u8]) -> [u8; 16] {
    let digest = Sha256::digest([ADDRESS_CONSTANT, secret].concat());
    let mut out = [0u8; 16];
    out.copy_from_slice(&digest[..16]);
    out
}

/// Hex-lowercase of the first 16 bytes of `H(constant ∥ secret)`, NUL
/// terminated: 32 hex chars + 1 NUL = 33 bytes, for FFI friendliness.
pub fn derive_password(secret: &[u8]) -> [u8; 33] {
    let digest = Sha256::digest([PASSWORD_CONSTANT, secret].concat());
    let hex = hex_lower(&digest[..16]);
    let mut out = [0u8; 33];
    out[..32].copy_from_slice(hex.as_bytes());
    out[32] = 0;
    out
}

fn hex_lower(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

// ── Wire packets ─────────────────────────────────────────────────────────

pub const TYPE_LISTEN: u8 = 0x01;
pub const TYPE_CONNECT: u8 = 0x02;
pub const TYPE_START: u8 = 0x05;
pub const PROTO_MAJOR: u8 = 1;
pub const PROTO_MINOR: u8 = 3;
pub const FLAG_LOW_LATENCY: u8 = 0x08;
pub const START_FLAG_SERVER_ROLE: u8 = 0x01;
pub const START_FLAG_CLIENT_ROLE: u8 = 0x02;

pub const LISTEN_CONNECT_LEN: usize = 128;
pub const START_LEN: usize = 32;

/// `{type(1), proto-major(1), proto-minor(1), flags(1), reserved(28),
/// address(16), token(16), reserved(64)}` — shared by LISTEN and CONNECT.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HelloPacket {
    pub kind: u8,
    pub flags: u8,
    pub address: [u8; 16],
    pub token: [u8; 16],
}

impl HelloPacket {
    pub fn listen(address: [u8; 16], token: [u8; 16], low_latency: bool) -> Self {
        Self { kind: TYPE_LISTEN, flags: if low_latency { FLAG_LOW_LATENCY } else { 0 }, address, token }
    }

    pub fn connect(address: [u8; 16], token: [u8; 16], low_latency: bool) -> Self {
        Self { kind: TYPE_CONNECT, flags: if low_latency { FLAG_LOW_LATENCY } else { 0 }, address, token }
    }

    pub fn to_bytes(&self) -> [u8; LISTEN_CONNECT_LEN] {
        let mut buf = [0u8; LISTEN_CONNECT_LEN];
        buf[0] = self.kind;
        buf[1] = PROTO_MAJOR;
        buf[2] = PROTO_MINOR;
        buf[3] = self.flags;
        // bytes 4..32 reserved, left zero
        buf[32..48].copy_from_slice(&self.address);
        buf[48..64].copy_from_slice(&self.token);
        // bytes 64..128 reserved, left zero
        buf
    }

    pub fn parse(buf: &[u8]) -> Result<Self, HandshakeFailureKind> {
        if buf.len() != LISTEN_CONNECT_LEN {
            return Err(HandshakeFailureKind::InvalidRendezvous);
        }
        let kind = buf[0];
        if kind != TYPE_LISTEN && kind != TYPE_CONNECT {
            return Err(HandshakeFailureKind::InvalidRendezvous);
        }
        if buf[1] != PROTO_MAJOR || buf[2] != PROTO_MINOR {
            return Err(HandshakeFailureKind::InvalidRendezvous);
        }
        let mut address = [0u8; 16];
        address.copy_from_slice(&buf[32..48]);
        let mut token = [0u8; 16];
        token.copy_from_slice(&buf[48..64]);
        Ok(Self { kind, flags: buf[3], address, token })
    }
}

/// `{type(1), flags(1), reserved(30)}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StartPacket {
    pub flags: u8,
}

/// Which SRP role the relay assigned this peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    SrpServer,
    SrpClient,
}

impl StartPacket {
    pub fn to_bytes(self) -> [u8; START_LEN] {
        let mut buf = [0u8; START_LEN];
        buf[0] = TYPE_START;
        buf[1] = self.flags;
        buf
    }

    pub fn parse(buf: &[u8]) -> Result<Self, HandshakeFailureKind> {
        if buf.len() != START_LEN {
            return Err(HandshakeFailureKind::InvalidRendezvous);
        }
        if buf[0] != TYPE_START {
            return Err(HandshakeFailureKind::InvalidRendezvous);
        }
        Ok(Self { flags: buf[1] })
    }

    pub fn role(self) -> Result<Role, HandshakeFailureKind> {
        match self.flags & (START_FLAG_SERVER_ROLE | START_FLAG_CLIENT_ROLE) {
            START_FLAG_SERVER_ROLE => Ok(Role::SrpServer),
            START_FLAG_CLIENT_ROLE => Ok(Role::SrpClient),
            _ => Err(HandshakeFailureKind::InvalidRendezvous),
        }
    }
}

/// Everything a rendezvous session needs once the relay exchange
/// completes: the derived address/password and the assigned role. The
/// token field is reserved for future per-session correlation and is
/// currently always zero.
#[derive(Debug, Clone)]
pub struct RendezvousSession {
    pub address: [u8; 16],
    pub password: [u8; 33],
    pub role: Role,
}

impl RendezvousSession {
    pub fn from_secret(secret: &[u8], role: Role) -> Self {
        Self { address: derive_address(secret), password: derive_password(secret), role }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derive_address_is_deterministic() {
        assert_eq!(derive_address(b"shared-secret"), derive_address(b"shared-secret"));
    }

    #[test]
    fn distinct_secrets_yield_distinct_addresses() {
        assert_ne!(derive_address(b"secret-a"), derive_address(b"secret-b"));
    }

    #[test]
    fn password_is_32_hex_digits_plus_nul() {
        let pw = derive_password(b"shared-secret");
        assert_eq!(pw.len(), 33);
        assert_eq!(pw[32], 0);
        let hex_part = std::str::from_utf8(&pw[..32]).unwrap();
        assert_eq!(hex_part.len(), 32);
        assert!(hex_part.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn hello_packet_roundtrips() {
        let p = HelloPacket::listen([1u8; 16], [2u8; 16], true);
        let bytes = p.to_bytes();
        assert_eq!(bytes.len(), LISTEN_CONNECT_LEN);
        let parsed = HelloPacket::parse(&bytes).unwrap();
        assert_eq!(parsed, p);
    }

    #[test]
    fn hello_packet_wrong_length_is_rejected() {
        assert!(HelloPacket::parse(&[0u8; 100]).is_err());
    }

    #[test]
    fn start_packet_assigns_server_role() {
        let start = StartPacket { flags: START_FLAG_SERVER_ROLE };
        assert_eq!(start.role().unwrap(), Role::SrpServer);
    }

    #[test]
    fn start_packet_bad_type_byte_is_invalid_handshake() {
        let mut bytes = StartPacket { flags: START_FLAG_CLIENT_ROLE }.to_bytes();
        bytes[0] = 0x99;
        assert_eq!(StartPacket::parse(&bytes).unwrap_err(), HandshakeFailureKind::InvalidRendezvous);
    }

    #[test]
    fn start_packet_ambiguous_flags_rejected() {
        let start = StartPacket { flags: START_FLAG_SERVER_ROLE | START_FLAG_CLIENT_ROLE };
        assert!(start.role().is_err());
    }
}
