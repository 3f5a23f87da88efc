//! Zero-copy file transmission via `sendfile64(2)`.
//!
//! Grounded on the Linux branch of a real sendfile-serving implementation:
//! a single non-blocking call per chunk, `EAGAIN`/`EWOULDBLOCK` surfaced as
//! an ordinary `WouldBlock` I/O error rather than retried in a loop, since
//! the step chain already treats `WouldBlock` as "wait for the next
//! readiness event."

use std::io;
use std::os::unix::io::RawFd;

/// Sends up to `len` bytes from `in_fd` to `out_fd` starting at `*offset`,
/// advancing `*offset` by however much was actually sent. Returns the byte
/// count, which may be less than `len` on a partial send.
pub fn sendfile_chunk(out_fd: RawFd, in_fd: RawFd, offset: &mut i64, len: usize) -> io::Result<usize> {
    loop {
        let mut off = *offset as libc::off64_t;
        let ret = unsafe { libc::sendfile64(out_fd, in_fd, &mut off, len) };

        if ret < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                continue;
            }
            return Err(err);
        }

        let sent = ret as i64;
        *offset += sent;
        return Ok(sent as usize);
    }
}
