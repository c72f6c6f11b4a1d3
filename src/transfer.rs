//! Bidirectional byte-pumping transfer engine.
//!
//! Corresponds to spec.md §4.7. This is the single-threaded cooperative
//! core loop spec.md §5 describes: one [`Multiplexer`], two
//! [`RingBuffer`]s, and a half-close state machine per direction. Grounded
//! on the teacher's `event_loop.rs` "drain all ready handles, then
//! recompute interest" loop shape, replacing its per-connection
//! `tokio::select!`/`mpsc` machinery with direct `mio::Poll` calls to match
//! the synchronous engine spec.md §5 requires.

use std::io::{self, ErrorKind};
use std::path::Path;
use std::time::Duration;

use crate::multiplexer::{Handle, Multiplexer, Readiness};
use crate::ring_buffer::RingBuffer;
use crate::stream::NetStream;
use crate::timeout::{TimeoutEvent, TimeoutTracker};

const HANDLE_A: Handle = Handle(0);
const HANDLE_B: Handle = Handle(1);

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    BothEof,
    ExecutionTimeout,
    IdleTimeout,
    ConnectionTimeout,
    FatalError,
    Cancelled,
}

/// Per-direction half-close state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    Open,
    ReadClosed,
    FullyClosed,
}

/// Best-effort sink: tee file or hex-dump log. A write failure disables
/// the sink for the rest of the session without affecting the peer
/// stream (spec.md §4.7 "Tee/hex-dump").
struct Sink<W> {
    writer: Option<W>,
}

impl<W: io::Write> Sink<W> {
    fn new(writer: Option<W>) -> Self {
        Self { writer }
    }

    fn feed(&mut self, data: &[u8], render: impl Fn(&[u8]) -> Vec<u8>) {
        if let Some(w) = &mut self.writer {
            let rendered = render(data);
            if w.write_all(&rendered).is_err() {
                log::warn!("tee/hex-dump sink write failed, disabling for remainder of session");
                self.writer = None;
            }
        }
    }
}

fn hex_dump_line(offset: usize, data: &[u8]) -> String {
    let hex: String = data.iter().map(|b| format!("{b:02x} ")).collect();
    let ascii: String =
        data.iter().map(|&b| if (0x20..0x7f).contains(&b) { b as char } else { '.' }).collect();
    format!("{offset:08x}  {hex:<48}|{ascii}|\n")
}

pub struct TransferConfig {
    pub buffer_size: usize,
    pub idle_timeout: Option<Duration>,
    pub execution_timeout: Option<Duration>,
    pub connection_timeout: Option<Duration>,
    pub close_on_eof_immediately: bool,
    pub crlf_outbound: bool,
    pub tee_path: Option<std::path::PathBuf>,
    pub hex_dump_path: Option<std::path::PathBuf>,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            buffer_size: 64 * 1024,
            idle_timeout: None,
            execution_timeout: None,
            connection_timeout: None,
            close_on_eof_immediately: false,
            crlf_outbound: false,
            tee_path: None,
            hex_dump_path: None,
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct TransferMetrics {
    pub a_to_b_bytes: u64,
    pub b_to_a_bytes: u64,
}

/// Pumps bytes between `a` and `b` until EOF on both sides, a timeout
/// trips, or a fatal I/O error occurs.
pub struct TransferEngine {
    mux: Multiplexer,
    a: Box<dyn NetStream + Send>,
    b: Box<dyn NetStream + Send>,
    a_to_b: RingBuffer,
    b_to_a: RingBuffer,
    a_side: Side,
    b_side: Side,
    timeouts: TimeoutTracker,
    config: TransferConfig,
    metrics: TransferMetrics,
    tee: Sink<std::fs::File>,
    hex_dump: Sink<std::fs::File>,
    hex_offset: usize,
}

impl TransferEngine {
    pub fn new(
        a: Box<dyn NetStream + Send>,
        b: Box<dyn NetStream + Send>,
        config: TransferConfig,
    ) -> io::Result<Self> {
        let mut mux = Multiplexer::new(16)?;
        let mut a = a;
        let mut b = b;
        mux.register(a.source(), HANDLE_A, Readiness::READABLE)?;
        mux.register(b.source(), HANDLE_B, Readiness::READABLE)?;
        let tee = Sink::new(open_append(config.tee_path.as_deref())?);
        let hex_dump = Sink::new(open_append(config.hex_dump_path.as_deref())?);
        let timeouts =
            TimeoutTracker::new(config.execution_timeout, config.idle_timeout, config.connection_timeout);
        Ok(Self {
            mux,
            a,
            b,
            a_to_b: RingBuffer::new(config.buffer_size),
            b_to_a: RingBuffer::new(config.buffer_size),
            a_side: Side::Open,
            b_side: Side::Open,
            timeouts,
            config,
            metrics: TransferMetrics::default(),
            tee,
            hex_dump,
            hex_offset: 0,
        })
    }

    pub fn metrics(&self) -> TransferMetrics {
        self.metrics
    }

    /// Run until a terminal condition. `base_poll` bounds how long a
    /// single `wait` call may block absent any timeout budget.
    pub fn run(&mut self, base_poll: Duration) -> io::Result<Outcome> {
        loop {
            if let Some(outcome) = self.terminal_outcome() {
                return Ok(outcome);
            }
            self.recompute_interest()?;
            let wait = self.timeouts.next_wait(base_poll);
            let ready = self.mux.wait(Some(wait))?;

            match self.timeouts.check() {
                TimeoutEvent::ExecutionExceeded => return Ok(Outcome::ExecutionTimeout),
                TimeoutEvent::IdleExceeded => return Ok(Outcome::IdleTimeout),
                TimeoutEvent::ConnectionExceeded => return Ok(Outcome::ConnectionTimeout),
                TimeoutEvent::None => {}
            }

            for event in ready {
                if event.handle == HANDLE_A && event.readable {
                    self.drain_read_side(true)?;
                }
                if event.handle == HANDLE_B && event.readable {
                    self.drain_read_side(false)?;
                }
                if event.handle == HANDLE_A && event.writable {
                    self.drain_write_side(true)?;
                }
                if event.handle == HANDLE_B && event.writable {
                    self.drain_write_side(false)?;
                }
                if event.invalid {
                    return Ok(Outcome::FatalError);
                }
            }
        }
    }

    fn terminal_outcome(&self) -> Option<Outcome> {
        if self.a_side == Side::FullyClosed && self.b_side == Side::FullyClosed {
            Some(Outcome::BothEof)
        } else {
            None
        }
    }

    /// Read from `a` (if `from_a`) or `b`, into the buffer feeding the
    /// opposite side, applying CRLF conversion and tee/hex-dump side
    /// effects. Marks activity on success.
    fn drain_read_side(&mut self, from_a: bool) -> io::Result<()> {
        let buf_size = self.config.buffer_size.min(4096);
        let mut tmp = vec![0u8; buf_size];
        let (stream, side, dest, crlf) = if from_a {
            (&mut self.a, &mut self.a_side, &mut self.a_to_b, false)
        } else {
            (&mut self.b, &mut self.b_side, &mut self.b_to_a, self.config.crlf_outbound)
        };
        match stream.read(&mut tmp) {
            Ok(0) => {
                *side = Side::ReadClosed;
            }
            Ok(n) => {
                self.timeouts.mark_activity();
                let mut data = tmp[..n].to_vec();
                if crlf {
                    data = apply_crlf(&data);
                }
                self.tee.feed(&data, |d| d.to_vec());
                let offset = self.hex_offset;
                self.hex_dump.feed(&data, move |d| hex_dump_line(offset, d).into_bytes());
                self.hex_offset += data.len();
                if dest.write_all(&data).is_err() {
                    dest.clear_overflow();
                    log::warn!("ring buffer overflow, dropping data for slow peer");
                }
                if from_a {
                    self.metrics.a_to_b_bytes += n as u64;
                } else {
                    self.metrics.b_to_a_bytes += n as u64;
                }
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => {}
            Err(e) => return Err(e),
        }
        if self.config.close_on_eof_immediately
            && (self.a_side == Side::ReadClosed || self.b_side == Side::ReadClosed)
        {
            self.a_side = Side::FullyClosed;
            self.b_side = Side::FullyClosed;
            let _ = self.a.close();
            let _ = self.b.close();
        }
        self.handle_half_close()
    }

    fn drain_write_side(&mut self, to_a: bool) -> io::Result<()> {
        let (stream, src) = if to_a { (&mut self.a, &mut self.b_to_a) } else { (&mut self.b, &mut self.a_to_b) };
        loop {
            let span = src.readable_slice();
            if span.is_empty() {
                break;
            }
            match stream.write(span.first) {
                Ok(0) => break,
                Ok(n) => src.consume(n),
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Apply spec.md §4.7's half-close policy: once a side's read side
    /// reaches EOF and its pending buffer has fully drained to the peer,
    /// shut down the peer's write side while leaving its read side open.
    fn handle_half_close(&mut self) -> io::Result<()> {
        if self.a_side == Side::ReadClosed && self.a_to_b.is_empty() {
            let _ = self.b.shutdown_write();
            self.a_side = Side::FullyClosed;
        }
        if self.b_side == Side::ReadClosed && self.b_to_a.is_empty() {
            let _ = self.a.shutdown_write();
            self.b_side = Side::FullyClosed;
        }
        Ok(())
    }

    fn recompute_interest(&mut self) -> io::Result<()> {
        let a_interest = Readiness {
            readable: self.a_side == Side::Open,
            writable: !self.b_to_a.is_empty(),
        };
        let b_interest = Readiness {
            readable: self.b_side == Side::Open,
            writable: !self.a_to_b.is_empty(),
        };
        self.mux.reregister(self.a.source(), HANDLE_A, a_interest)?;
        self.mux.reregister(self.b.source(), HANDLE_B, b_interest)?;
        Ok(())
    }
}

fn apply_crlf(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len());
    let mut prev_cr = false;
    for &b in data {
        if b == b'\n' && !prev_cr {
            out.push(b'\r');
        }
        out.push(b);
        prev_cr = b == b'\r';
    }
    out
}

fn open_append(path: Option<&Path>) -> io::Result<Option<std::fs::File>> {
    match path {
        None => Ok(None),
        Some(p) => std::fs::OpenOptions::new().create(true).append(true).open(p).map(Some),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crlf_conversion_only_inserts_cr_before_bare_lf() {
        assert_eq!(apply_crlf(b"a\nb"), b"a\r\nb");
        assert_eq!(apply_crlf(b"a\r\nb"), b"a\r\nb");
    }

    #[test]
    fn hex_dump_line_renders_offset_hex_and_ascii() {
        let line = hex_dump_line(0, b"Hi!");
        assert!(line.starts_with("00000000"));
        assert!(line.contains("48 69 21"));
        assert!(line.contains("|Hi!|"));
    }

    #[test]
    fn sink_disables_itself_after_write_failure() {
        struct FailingWriter;
        impl io::Write for FailingWriter {
            fn write(&mut self, _: &[u8]) -> io::Result<usize> {
                Err(io::Error::new(ErrorKind::Other, "disk full"))
            }
            fn flush(&mut self) -> io::Result<()> {
                Ok(())
            }
        }
        let mut sink = Sink::new(Some(FailingWriter));
        sink.feed(b"data", |d| d.to_vec());
        assert!(sink.writer.is_none());
    }
}
