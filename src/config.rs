//! Command-line parsing and the process-wide configuration it produces.
//!
//! Parsing is hand-rolled against `std::env::args()`, matching the design
//! this server follows rather than pulling in an argument-parsing crate for
//! a half-dozen flags. Once parsed, the `Config` is stashed in a
//! process-wide [`OnceCell`] so any worker thread or step handler can read
//! it without threading a reference through every call.

use std::path::PathBuf;

use once_cell::sync::OnceCell;

static CONFIG: OnceCell<Config> = OnceCell::new();

#[derive(Debug, Clone)]
pub struct Config {
    pub doc_root: PathBuf,
    pub addr: String,
    pub port: u16,
    pub keep_alive: bool,
    pub chroot: bool,
    pub quiet: bool,
    pub threads: usize,
}

#[derive(Debug)]
pub enum ConfigError {
    MissingDocRoot,
    MissingValue(&'static str),
    InvalidValue(&'static str, String),
    UnknownArgument(String),
    Help,
}

impl Config {
    pub fn parse<I: IntoIterator<Item = String>>(args: I) -> Result<Config, ConfigError> {
        let mut args = args.into_iter();
        let _argv0 = args.next();

        let mut doc_root = None;
        let mut addr = "127.0.0.1".to_string();
        let mut port = default_port();
        let mut keep_alive = false;
        let mut chroot = false;
        let mut quiet = false;
        let mut threads = 1usize;

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--help" => return Err(ConfigError::Help),
                "--addr" => {
                    addr = args.next().ok_or(ConfigError::MissingValue("--addr"))?;
                }
                "--port" => {
                    let raw = args.next().ok_or(ConfigError::MissingValue("--port"))?;
                    port = raw
                        .parse()
                        .map_err(|_| ConfigError::InvalidValue("--port", raw))?;
                }
                "--keep-alive" => keep_alive = true,
                "--chroot" => chroot = true,
                "--quiet" => quiet = true,
                "--threads" => {
                    let raw = args.next().ok_or(ConfigError::MissingValue("--threads"))?;
                    let n: usize = raw
                        .parse()
                        .map_err(|_| ConfigError::InvalidValue("--threads", raw))?;
                    threads = n.clamp(1, crate::limits::MAX_THREADS);
                }
                other if !other.starts_with("--") && doc_root.is_none() => {
                    doc_root = Some(PathBuf::from(other));
                }
                other => return Err(ConfigError::UnknownArgument(other.to_string())),
            }
        }

        let doc_root = doc_root.ok_or(ConfigError::MissingDocRoot)?;

        Ok(Config {
            doc_root,
            addr,
            port,
            keep_alive,
            chroot,
            quiet,
            threads,
        })
    }

    pub fn install(self) {
        let _ = CONFIG.set(self);
    }

    pub fn global() -> &'static Config {
        CONFIG.get().expect("config installed before server start")
    }

    /// The base path request targets are resolved against. Always `.`: by
    /// the time a request reaches this path, `init_root` has already
    /// `chdir`ed into the document root (and, if `--chroot` was set,
    /// `chroot`ed into it and `chdir`ed to `/` inside the jail), so the
    /// process's current directory already *is* the document root. Joining
    /// against the original `doc_root` argument here as well would apply it
    /// twice for a relative root.
    pub fn resolution_root(&self) -> PathBuf {
        PathBuf::from(".")
    }
}

fn default_port() -> u16 {
    if unsafe { libc::geteuid() } == 0 {
        80
    } else {
        7887
    }
}

pub fn usage(argv0: &str) -> String {
    format!(
        "usage: {} <path> [--addr addr] [--port port] [--quiet] [--keep-alive] [--chroot] [--threads n]",
        argv0
    )
}
