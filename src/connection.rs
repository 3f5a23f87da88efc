//! Per-connection state and the dense fd-indexed registry that owns it.

use std::collections::VecDeque;
use std::os::unix::io::RawFd;
use std::time::Instant;

use mio::net::TcpStream;

use crate::step::{run_step, ConnStatus, IoStatus, Step};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Status {
    Running,
    Closing,
}

pub struct Connection {
    pub fd: RawFd,
    pub stream: TcpStream,
    pub peer: String,
    pub last_active: Instant,
    pub status: Status,
    pub keep_alive: bool,
    pub steps: VecDeque<Step>,
}

impl Connection {
    pub fn new(fd: RawFd, stream: TcpStream, peer: String, now: Instant) -> Self {
        Connection {
            fd,
            stream,
            peer,
            last_active: now,
            status: Status::Running,
            keep_alive: true,
            steps: VecDeque::new(),
        }
    }

    pub fn push_step(&mut self, step: Step) {
        self.steps.push_back(step);
    }

    /// Drives the step chain as far as it will go without blocking,
    /// mirroring `process_connection` in the design this server follows:
    /// run the head step, invoke its handler on success, drop it, and keep
    /// going until a step reports `Again`, a step errors, or the chain
    /// empties.
    pub fn drive(&mut self) {
        loop {
            let Some(mut step) = self.steps.pop_front() else {
                self.status = Status::Closing;
                return;
            };

            match run_step(self.fd, &mut step) {
                IoStatus::Ok => {
                    let handler_result = step.handler.map(|h| h(self));
                    if handler_result == Some(ConnStatus::Close) {
                        self.status = Status::Closing;
                        return;
                    }
                    if self.steps.is_empty() {
                        self.status = Status::Closing;
                        return;
                    }
                }
                IoStatus::Again => {
                    self.steps.push_front(step);
                    return;
                }
                IoStatus::Error => {
                    self.status = Status::Closing;
                    return;
                }
            }
        }
    }

    pub fn touch(&mut self, now: Instant) {
        self.last_active = now;
    }

    pub fn idle_for(&self, now: Instant) -> std::time::Duration {
        now.saturating_duration_since(self.last_active)
    }
}

/// Dense fd→connection table. Connections are indexed directly by their raw
/// file descriptor, which is bounded by `MAXFDS + RESERVED_FDS` per worker,
/// so lookups are a plain array index rather than a hash.
pub struct Registry {
    slots: Vec<Option<Connection>>,
}

impl Registry {
    pub fn new() -> Self {
        let capacity = crate::limits::MAXFDS + crate::limits::RESERVED_FDS;
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || None);
        Registry { slots }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn insert(&mut self, conn: Connection) -> Result<(), Connection> {
        let fd = conn.fd as usize;
        match self.slots.get_mut(fd) {
            Some(slot) if slot.is_none() => {
                *slot = Some(conn);
                Ok(())
            }
            _ => Err(conn),
        }
    }

    pub fn get_mut(&mut self, fd: RawFd) -> Option<&mut Connection> {
        self.slots.get_mut(fd as usize).and_then(|s| s.as_mut())
    }

    pub fn remove(&mut self, fd: RawFd) -> Option<Connection> {
        self.slots.get_mut(fd as usize).and_then(|s| s.take())
    }

    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    pub fn is_full(&self) -> bool {
        self.len() >= crate::limits::MAXFDS
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Connection> {
        self.slots.iter_mut().filter_map(|s| s.as_mut())
    }

    /// Closes and removes every connection idle for longer than the
    /// keep-alive timeout. Called once per event loop iteration.
    pub fn sweep_idle(&mut self, now: Instant, timeout: std::time::Duration) -> Vec<RawFd> {
        let mut expired = Vec::new();
        for slot in self.slots.iter() {
            if let Some(conn) = slot {
                if conn.idle_for(now) >= timeout {
                    expired.push(conn.fd);
                }
            }
        }
        for fd in &expired {
            self.remove(*fd);
        }
        expired
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_starts_empty() {
        let reg = Registry::new();
        assert_eq!(reg.len(), 0);
        assert_eq!(reg.capacity(), crate::limits::MAXFDS + crate::limits::RESERVED_FDS);
        assert!(!reg.is_full());
    }
}
