use std::ffi::CString;
use std::os::unix::ffi::OsStrExt;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use rockepoll::accesslog::AccessLog;
use rockepoll::config::{Config, ConfigError};
use rockepoll::server;

fn main() {
    let argv0 = std::env::args().next().unwrap_or_else(|| "rockepoll".to_string());

    let config = match Config::parse(std::env::args()) {
        Ok(c) => c,
        Err(ConfigError::Help) => {
            println!("{}", rockepoll::config::usage(&argv0));
            std::process::exit(0);
        }
        Err(e) => {
            eprintln!("{}: {}", argv0, describe_error(e));
            std::process::exit(1);
        }
    };

    if let Err(e) = init_root(&config) {
        eprintln!("{}: {}", argv0, e);
        std::process::exit(1);
    }

    AccessLog::new(config.quiet).install();

    server::ignore_sigpipe();
    let running = Arc::new(AtomicBool::new(true));
    server::install_sigint_handler(Arc::clone(&running));

    println!("listening on http://{}:{}/", config.addr, config.port);

    config.clone().install();

    if let Err(e) = server::run(&config, running) {
        eprintln!("{}: {}", argv0, e);
        std::process::exit(1);
    }
}

/// `chdir` into the document root so every resolved path is relative to it,
/// then optionally `chroot` so the process can never see outside it.
fn init_root(config: &Config) -> std::io::Result<()> {
    let c_path = CString::new(config.doc_root.as_os_str().as_bytes())
        .map_err(|_| std::io::Error::new(std::io::ErrorKind::InvalidInput, "doc root contains a NUL byte"))?;

    if unsafe { libc::chdir(c_path.as_ptr()) } < 0 {
        return Err(std::io::Error::last_os_error());
    }

    if config.chroot {
        if unsafe { libc::chroot(c_path.as_ptr()) } < 0 {
            return Err(std::io::Error::last_os_error());
        }
        if unsafe { libc::chdir(b"/\0".as_ptr() as *const libc::c_char) } < 0 {
            return Err(std::io::Error::last_os_error());
        }
    }

    Ok(())
}

fn describe_error(e: ConfigError) -> String {
    match e {
        ConfigError::MissingDocRoot => "missing document root".to_string(),
        ConfigError::MissingValue(flag) => format!("missing value after {}", flag),
        ConfigError::InvalidValue(flag, value) => format!("invalid value `{}' for {}", value, flag),
        ConfigError::UnknownArgument(arg) => format!("unknown argument `{}'", arg),
        ConfigError::Help => unreachable!("handled by caller"),
    }
}
