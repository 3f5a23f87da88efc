//! The non-blocking, edge-triggered event loop.
//!
//! One `mio::Poll` instance per worker owns a listening socket and a dense
//! fd-indexed [`Registry`] of accepted connections. `run` is the Rust
//! analogue of the design's `main` event loop: sweep idle connections, wait
//! for readiness, accept or drive whichever fd fired. Multi-worker mode
//! spawns this loop on independent OS threads, each with its own
//! `SO_REUSEPORT` listener, so workers never share connection state.

use std::net::SocketAddr;
use std::os::unix::io::{AsRawFd, FromRawFd, RawFd};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use mio::net::TcpListener;
use mio::{Events, Interest, Poll, Token};

use crate::config::Config;
use crate::connection::{Connection, Registry};
use crate::response::on_read_complete;
use crate::step::Step;

const LISTENER_TOKEN: Token = Token(usize::MAX);
const POLL_TIMEOUT: Duration = Duration::from_secs(crate::limits::KEEP_ALIVE_TIMEOUT_SECS);

pub fn run(config: &Config, running: Arc<AtomicBool>) -> std::io::Result<()> {
    if config.threads <= 1 {
        return worker_loop(config, running);
    }

    let mut handles = Vec::with_capacity(config.threads);
    for _ in 0..config.threads {
        let config = config.clone();
        let running = Arc::clone(&running);
        handles.push(std::thread::spawn(move || worker_loop(&config, running)));
    }
    for handle in handles {
        let _ = handle.join();
    }
    Ok(())
}

fn worker_loop(config: &Config, running: Arc<AtomicBool>) -> std::io::Result<()> {
    let addr: SocketAddr = format!("{}:{}", config.addr, config.port)
        .parse()
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, format!("{e}")))?;

    let mut listener = bind_reuseport(addr)?;

    let mut poll = Poll::new()?;
    poll.registry()
        .register(&mut listener, LISTENER_TOKEN, Interest::READABLE)?;

    let mut events = Events::with_capacity(crate::limits::MAXFDS);
    let mut registry = Registry::new();

    while running.load(Ordering::Relaxed) {
        let now = Instant::now();
        registry.sweep_idle(now, Duration::from_secs(crate::limits::KEEP_ALIVE_TIMEOUT_SECS));

        if let Err(e) = poll.poll(&mut events, Some(POLL_TIMEOUT)) {
            if e.kind() == std::io::ErrorKind::Interrupted {
                continue;
            }
            return Err(e);
        }

        for event in events.iter() {
            if event.token() == LISTENER_TOKEN {
                accept_loop(&listener, &mut poll, &mut registry);
                continue;
            }

            let fd = event.token().0 as RawFd;

            if event.is_error() || event.is_read_closed() {
                close_connection(&mut poll, &mut registry, fd);
                continue;
            }

            if let Some(conn) = registry.get_mut(fd) {
                conn.drive();
                if conn.status == crate::connection::Status::Closing {
                    close_connection(&mut poll, &mut registry, fd);
                } else {
                    conn.touch(now);
                }
            }
        }
    }

    for conn in registry.iter_mut() {
        let _ = poll.registry().deregister(&mut conn.stream);
    }

    Ok(())
}

fn accept_loop(listener: &TcpListener, poll: &mut Poll, registry: &mut Registry) {
    loop {
        if registry.is_full() {
            break;
        }

        match listener.accept() {
            Ok((mut stream, peer)) => {
                let _ = stream.set_nodelay(true);
                let fd = stream.as_raw_fd();
                let token = Token(fd as usize);

                if poll
                    .registry()
                    .register(&mut stream, token, Interest::READABLE | Interest::WRITABLE)
                    .is_err()
                {
                    continue;
                }

                let mut conn = Connection::new(fd, stream, peer.ip().to_string(), Instant::now());
                conn.keep_alive = Config::global().keep_alive;
                conn.push_step(Step::read(Some(on_read_complete)));

                if registry.insert(conn).is_err() {
                    // fd collided with a live slot; drop silently, the peer
                    // will see a reset.
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
            Err(_) => break,
        }
    }
}

fn close_connection(poll: &mut Poll, registry: &mut Registry, fd: RawFd) {
    if let Some(mut conn) = registry.remove(fd) {
        let _ = poll.registry().deregister(&mut conn.stream);
    }
}

fn bind_reuseport(addr: SocketAddr) -> std::io::Result<TcpListener> {
    let SocketAddr::V4(v4) = addr else {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            "only IPv4 listen addresses are supported",
        ));
    };

    let sock = unsafe { libc::socket(libc::AF_INET, libc::SOCK_STREAM | libc::SOCK_NONBLOCK, 0) };
    if sock < 0 {
        return Err(std::io::Error::last_os_error());
    }

    set_sockopt(sock, libc::SO_REUSEADDR)?;
    set_sockopt(sock, libc::SO_REUSEPORT)?;

    let sockaddr = socket_addr_to_raw(v4);
    let len = std::mem::size_of::<libc::sockaddr_in>() as libc::socklen_t;
    let bind_ret = unsafe { libc::bind(sock, &sockaddr as *const _ as *const libc::sockaddr, len) };
    if bind_ret < 0 {
        let err = std::io::Error::last_os_error();
        unsafe { libc::close(sock) };
        return Err(err);
    }

    if unsafe { libc::listen(sock, libc::SOMAXCONN) } < 0 {
        let err = std::io::Error::last_os_error();
        unsafe { libc::close(sock) };
        return Err(err);
    }

    let std_listener = unsafe { std::net::TcpListener::from_raw_fd(sock) };
    std_listener.set_nonblocking(true)?;
    TcpListener::from_std(std_listener)
}

fn set_sockopt(fd: RawFd, opt: libc::c_int) -> std::io::Result<()> {
    let val: libc::c_int = 1;
    let ret = unsafe {
        libc::setsockopt(
            fd,
            libc::SOL_SOCKET,
            opt,
            &val as *const _ as *const libc::c_void,
            std::mem::size_of::<libc::c_int>() as libc::socklen_t,
        )
    };
    if ret < 0 {
        Err(std::io::Error::last_os_error())
    } else {
        Ok(())
    }
}

fn socket_addr_to_raw(v4: std::net::SocketAddrV4) -> libc::sockaddr_in {
    let mut sockaddr: libc::sockaddr_in = unsafe { std::mem::zeroed() };
    sockaddr.sin_family = libc::AF_INET as libc::sa_family_t;
    sockaddr.sin_port = v4.port().to_be();
    sockaddr.sin_addr.s_addr = u32::from_ne_bytes(v4.ip().octets());
    sockaddr
}

/// Installed once at startup; ignores `SIGPIPE` so a write to a peer that
/// already closed its read side surfaces as an ordinary `EPIPE` error
/// instead of terminating the process.
pub fn ignore_sigpipe() {
    unsafe {
        libc::signal(libc::SIGPIPE, libc::SIG_IGN);
    }
}

pub fn install_sigint_handler(running: Arc<AtomicBool>) {
    use std::sync::OnceLock;
    static RUNNING: OnceLock<Arc<AtomicBool>> = OnceLock::new();
    let _ = RUNNING.set(running);

    extern "C" fn handler(_: libc::c_int) {
        if let Some(flag) = RUNNING.get() {
            flag.store(false, Ordering::Relaxed);
        }
    }

    unsafe {
        libc::signal(libc::SIGINT, handler as libc::sighandler_t);
    }
}
