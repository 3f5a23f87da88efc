//! Single-line access log sink.
//!
//! Every worker thread writes through the same `parking_lot::Mutex`-guarded
//! stdout handle so lines from concurrent workers never interleave. This is
//! the only piece of state shared across workers; everything else about a
//! connection is exclusively owned by the worker that accepted it.

use std::io::Write;

use once_cell::sync::OnceCell;
use parking_lot::Mutex;

static STDOUT: Mutex<()> = Mutex::new(());
static GLOBAL: OnceCell<AccessLog> = OnceCell::new();

pub struct AccessLog {
    quiet: bool,
}

impl AccessLog {
    pub fn new(quiet: bool) -> Self {
        AccessLog { quiet }
    }

    pub fn install(self) {
        let _ = GLOBAL.set(self);
    }

    pub fn global() -> &'static AccessLog {
        GLOBAL.get().expect("access log installed before server start")
    }

    pub fn record(
        &self,
        peer: &str,
        request_line: Option<&str>,
        status: u16,
        content_length: u64,
        user_agent: Option<&str>,
    ) {
        if self.quiet {
            return;
        }

        let request_line = request_line.unwrap_or("-");
        let user_agent = user_agent.unwrap_or("-");

        let _guard = STDOUT.lock();
        let stdout = std::io::stdout();
        let mut handle = stdout.lock();
        let _ = writeln!(
            handle,
            "{} \"{}\" {} {} \"{}\"",
            peer, request_line, status, content_length, user_agent
        );
    }
}
