//! End-to-end coverage of the parse → resolve → respond pipeline, driven
//! directly against [`rockepoll::response::handle_read_complete`] so each
//! scenario only needs a loopback socket pair, not a running event loop.

use std::io::Write as _;
use std::net::TcpListener as StdTcpListener;
use std::time::Instant;

use mio::net::TcpStream as MioTcpStream;

use rockepoll::accesslog::AccessLog;
use rockepoll::connection::Connection;
use rockepoll::response::handle_read_complete;
use rockepoll::step::{ConnStatus, Step, StepKind};

fn write_file(dir: &std::path::Path, name: &str, contents: &[u8]) {
    let path = dir.join(name);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::File::create(path).unwrap().write_all(contents).unwrap();
}

/// A loopback socket pair, used only so `Connection` has a real fd to own;
/// no bytes are actually exchanged over it by these tests.
fn loopback_connection(peer: &str) -> Connection {
    let listener = StdTcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let client = std::net::TcpStream::connect(addr).unwrap();
    let (server_side, _) = listener.accept().unwrap();
    server_side.set_nonblocking(true).unwrap();
    std::mem::forget(client); // keep the peer alive for the test's duration

    let stream = MioTcpStream::from_std(server_side);
    let fd = std::os::unix::io::AsRawFd::as_raw_fd(&stream);
    Connection::new(fd, stream, peer.to_string(), Instant::now())
}

fn drive(conn: &mut Connection, doc_root: &std::path::Path, buf: &[u8]) -> ConnStatus {
    conn.push_step(Step::read(None));
    if let StepKind::Read(meta) = &mut conn.steps.back_mut().unwrap().kind {
        meta.data = buf.to_vec();
    }
    let log = AccessLog::new(true);
    handle_read_complete(conn, doc_root, &log)
}

fn header_block(conn: &Connection) -> String {
    match &conn.steps.front().unwrap().kind {
        StepKind::Send(meta) => String::from_utf8_lossy(&meta.data).into_owned(),
        _ => panic!("expected a SEND step"),
    }
}

#[test]
fn simple_get_returns_full_body() {
    let dir = tempfile::tempdir().unwrap();
    write_file(dir.path(), "hello.txt", b"hello");
    let mut conn = loopback_connection("127.0.0.1");

    drive(&mut conn, dir.path(), b"GET /hello.txt HTTP/1.1\r\nHost: x\r\n\r\n");

    let block = header_block(&conn);
    assert!(block.starts_with("HTTP/1.1 200 OK\r\n"));
    assert!(block.contains("Content-Length: 5\r\n"));
    assert!(block.contains("Content-Type: text/plain; charset=utf-8\r\n"));
    assert!(block.contains("Accept-Ranges: bytes\r\n"));
    assert!(block.ends_with("hello"));
}

#[test]
fn byte_range_returns_partial_content() {
    let dir = tempfile::tempdir().unwrap();
    write_file(dir.path(), "hello.txt", b"hello");
    let mut conn = loopback_connection("127.0.0.1");

    drive(&mut conn, dir.path(), b"GET /hello.txt HTTP/1.1\r\nRange: bytes=1-3\r\n\r\n");

    let block = header_block(&conn);
    assert!(block.starts_with("HTTP/1.1 206 Partial Content\r\n"));
    assert!(block.contains("Content-Length: 3\r\n"));
    assert!(block.contains("Content-Range: bytes 1-3/5\r\n"));
    assert!(block.ends_with("ell"));
}

#[test]
fn open_ended_range_clamps_to_file_size() {
    let dir = tempfile::tempdir().unwrap();
    write_file(dir.path(), "hello.txt", b"hello");
    let mut conn = loopback_connection("127.0.0.1");

    drive(&mut conn, dir.path(), b"GET /hello.txt HTTP/1.1\r\nRange: bytes=2-99\r\n\r\n");

    let block = header_block(&conn);
    assert!(block.starts_with("HTTP/1.1 206 Partial Content\r\n"));
    assert!(block.contains("Content-Length: 3\r\n"));
    assert!(block.contains("Content-Range: bytes 2-4/5\r\n"));
    assert!(block.ends_with("llo"));
}

#[test]
fn unsatisfiable_range_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    write_file(dir.path(), "hello.txt", b"hello");
    let mut conn = loopback_connection("127.0.0.1");

    drive(&mut conn, dir.path(), b"GET /hello.txt HTTP/1.1\r\nRange: bytes=9-2\r\n\r\n");

    let block = header_block(&conn);
    assert!(block.starts_with("HTTP/1.1 416 Range Not Satisfiable\r\n"));
    assert!(block.ends_with("<h1>Range Not Satisfiable</h1>"));
}

#[test]
fn post_is_method_not_allowed() {
    let dir = tempfile::tempdir().unwrap();
    write_file(dir.path(), "hello.txt", b"hello");
    let mut conn = loopback_connection("127.0.0.1");

    drive(&mut conn, dir.path(), b"POST /hello.txt HTTP/1.1\r\n\r\n");

    let block = header_block(&conn);
    assert!(block.starts_with("HTTP/1.1 405 Method Not Allowed\r\n"));
    assert!(block.ends_with("<h1>Method Not Allowed</h1>"));
}

#[test]
fn directory_request_serves_index() {
    let dir = tempfile::tempdir().unwrap();
    write_file(dir.path(), "pub/index.html", b"hi\n");
    let mut conn = loopback_connection("127.0.0.1");

    drive(&mut conn, dir.path(), b"GET /pub/ HTTP/1.1\r\n\r\n");

    let block = header_block(&conn);
    assert!(block.starts_with("HTTP/1.1 200 OK\r\n"));
    assert!(block.contains("Content-Type: text/html; charset=utf-8\r\n"));
    assert!(block.contains("Content-Length: 3\r\n"));
    assert!(block.ends_with("hi\n"));
}

#[test]
fn path_traversal_is_rejected_at_parse_time() {
    let dir = tempfile::tempdir().unwrap();
    let mut conn = loopback_connection("127.0.0.1");

    drive(&mut conn, dir.path(), b"GET /../etc/passwd HTTP/1.1\r\n\r\n");

    let block = header_block(&conn);
    assert!(block.starts_with("HTTP/1.1 400 Bad Request\r\n"));
}

#[test]
fn if_match_equal_to_etag_yields_not_modified() {
    let dir = tempfile::tempdir().unwrap();
    write_file(dir.path(), "hello.txt", b"hello");
    let etag = rockepoll::resolver::resolve(dir.path(), "hello.txt").ok().unwrap().etag;

    let mut conn = loopback_connection("127.0.0.1");
    let req = format!("GET /hello.txt HTTP/1.1\r\nIf-Match: \"{}\"\r\n\r\n", etag);
    drive(&mut conn, dir.path(), req.as_bytes());

    let block = header_block(&conn);
    assert!(block.starts_with("HTTP/1.1 304 Not Modified\r\n"));
}

#[test]
fn connection_close_header_disables_keep_alive() {
    let dir = tempfile::tempdir().unwrap();
    write_file(dir.path(), "hello.txt", b"hello");
    let mut conn = loopback_connection("127.0.0.1");
    assert!(conn.keep_alive);

    drive(&mut conn, dir.path(), b"GET /hello.txt HTTP/1.1\r\nConnection: close\r\n\r\n");

    assert!(!conn.keep_alive);
    let block = header_block(&conn);
    assert!(block.contains("Connection: close\r\n"));
}
