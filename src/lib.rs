//! `swak` — a cross-platform network swiss-army knife: stream bridging,
//! telnet option negotiation, rendezvous NAT traversal with an SRP
//! tunnel, and a parallel port scanner, all driven by one dispatch core.

pub mod acl;
pub mod cli;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod logging;
pub mod multiplexer;
pub mod rendezvous;
pub mod ring_buffer;
pub mod scanner;
pub mod select_backend;
pub mod signal;
pub mod srp;
pub mod stream;
pub mod telnet;
pub mod timeout;
pub mod transfer;
pub mod ttymode;
