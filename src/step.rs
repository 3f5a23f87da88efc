//! The deferred I/O step chain each connection drives.
//!
//! A connection doesn't run its current operation to completion inline;
//! it queues one or more [`Step`]s and the event loop drives the head of
//! the queue forward only when the socket says it's ready. Each step
//! reports [`IoStatus::Again`] to mean "not ready yet, wait for the next
//! readiness notification" rather than blocking, which is what lets one
//! thread hold many connections open at once.

use std::io::{Read, Write};
use std::os::unix::io::RawFd;

use crate::connection::Connection;
use crate::sendfile::sendfile_chunk;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IoStatus {
    Ok,
    Again,
    Error,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnStatus {
    Run,
    Close,
}

pub struct ReadMeta {
    pub data: Vec<u8>,
}

pub struct SendMeta {
    pub data: Vec<u8>,
    pub sent: usize,
}

pub struct SendfileMeta {
    pub file: std::fs::File,
    pub offset: i64,
    pub end: i64,
}

pub enum StepKind {
    Read(ReadMeta),
    Send(SendMeta),
    Sendfile(SendfileMeta),
}

/// What runs once the step's I/O completes successfully. `None` means
/// "nothing to do," used for interior steps of a multi-step response.
pub type Handler = fn(&mut Connection) -> ConnStatus;

pub struct Step {
    pub kind: StepKind,
    pub handler: Option<Handler>,
}

impl Step {
    pub fn read(handler: Option<Handler>) -> Self {
        Step {
            kind: StepKind::Read(ReadMeta { data: Vec::new() }),
            handler,
        }
    }

    pub fn send(data: Vec<u8>, handler: Option<Handler>) -> Self {
        Step {
            kind: StepKind::Send(SendMeta { data, sent: 0 }),
            handler,
        }
    }

    pub fn sendfile(file: std::fs::File, lower: i64, upper: i64, handler: Option<Handler>) -> Self {
        Step {
            kind: StepKind::Sendfile(SendfileMeta {
                file,
                offset: lower,
                end: upper,
            }),
            handler,
        }
    }
}

const READ_CHUNK: usize = 1024;

/// Runs the I/O for the head-of-line step against `fd` as far as it will
/// go without blocking.
pub fn run_step(fd: RawFd, step: &mut Step) -> IoStatus {
    match &mut step.kind {
        StepKind::Read(meta) => run_read(fd, meta),
        StepKind::Send(meta) => run_send(fd, meta),
        StepKind::Sendfile(meta) => run_sendfile(fd, meta),
    }
}

fn would_block(err: &std::io::Error) -> bool {
    err.kind() == std::io::ErrorKind::WouldBlock
}

fn run_read(fd: RawFd, meta: &mut ReadMeta) -> IoStatus {
    let mut file = borrowed_file(fd);
    let mut chunk = [0u8; READ_CHUNK];

    loop {
        match file.read(&mut chunk) {
            Ok(0) => return IoStatus::Error,
            Ok(n) => {
                if meta.data.len() + n > crate::limits::MAX_REQ_SIZE {
                    return IoStatus::Error;
                }
                meta.data.extend_from_slice(&chunk[..n]);
                if n < READ_CHUNK || meta.data.len() >= crate::limits::MAX_REQ_SIZE {
                    return IoStatus::Ok;
                }
            }
            Err(e) if would_block(&e) => return IoStatus::Again,
            Err(_) => return IoStatus::Error,
        }
    }
}

fn run_send(fd: RawFd, meta: &mut SendMeta) -> IoStatus {
    let mut file = borrowed_file(fd);

    while meta.sent < meta.data.len() {
        match file.write(&meta.data[meta.sent..]) {
            Ok(0) => return IoStatus::Error,
            Ok(n) => meta.sent += n,
            Err(e) if would_block(&e) => return IoStatus::Again,
            Err(_) => return IoStatus::Error,
        }
    }

    IoStatus::Ok
}

fn run_sendfile(fd: RawFd, meta: &mut SendfileMeta) -> IoStatus {
    use std::os::unix::io::AsRawFd;

    while meta.offset < meta.end {
        let remaining = (meta.end - meta.offset) as usize;
        let chunk = remaining.min(crate::limits::SENDFILE_CHUNK_SIZE);
        match sendfile_chunk(fd, meta.file.as_raw_fd(), &mut meta.offset, chunk) {
            Ok(0) => return IoStatus::Error,
            Ok(_) => {}
            Err(e) if would_block(&e) => return IoStatus::Again,
            Err(_) => return IoStatus::Error,
        }
    }

    IoStatus::Ok
}

/// Treat the raw connection fd as a `std::fs::File` for the duration of one
/// read/write call. The real owner is the `mio::net::TcpStream` held by the
/// connection; this never closes the descriptor.
fn borrowed_file(fd: RawFd) -> std::mem::ManuallyDrop<std::fs::File> {
    use std::os::unix::io::FromRawFd;
    std::mem::ManuallyDrop::new(unsafe { std::fs::File::from_raw_fd(fd) })
}
