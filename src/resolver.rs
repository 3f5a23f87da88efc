//! Resolves a request target to an open file descriptor and its metadata.
//!
//! Mirrors `gather_file_meta` from the design this server follows: open
//! read-only and non-blocking, stat the descriptor, and if it names a
//! directory retry once against `<target>/index.html`. Unlike the original,
//! which loops until it finds a non-directory, this stops after a single
//! retry and reports `NotFound` if the indexed path is itself a directory —
//! an explicit choice to avoid an attacker-controlled unbounded loop of
//! directory opens.

use std::ffi::CString;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::io::FromRawFd;

use crate::mime::mime_for_target;

const INDEX_PAGE: &str = "index.html";

pub enum ResolveError {
    Forbidden,
    NotFound,
    InternalError,
}

pub struct Resolved {
    pub file: std::fs::File,
    pub size: u64,
    pub inode: u64,
    pub mime: &'static str,
    pub etag: String,
}

pub fn resolve(doc_root: &std::path::Path, target: &str) -> Result<Resolved, ResolveError> {
    let first = join_root(doc_root, target);
    match open_and_stat(&first)? {
        Opened::File(file, st) => Ok(finish(file, &st, target)),
        Opened::Directory => {
            let indexed_target = if target.is_empty() {
                INDEX_PAGE.to_string()
            } else {
                format!("{}/{}", target, INDEX_PAGE)
            };
            let indexed_path = join_root(doc_root, &indexed_target);
            match open_and_stat(&indexed_path)? {
                Opened::File(file, st) => Ok(finish(file, &st, &indexed_target)),
                Opened::Directory => Err(ResolveError::NotFound),
            }
        }
    }
}

fn finish(file: std::fs::File, st: &libc::stat, target: &str) -> Resolved {
    Resolved {
        file,
        size: st.st_size as u64,
        inode: st.st_ino,
        mime: mime_for_target(target),
        etag: format!("{}-{}", st.st_mtime, st.st_size),
    }
}

fn join_root(doc_root: &std::path::Path, target: &str) -> std::path::PathBuf {
    doc_root.join(target)
}

enum Opened {
    File(std::fs::File, libc::stat),
    Directory,
}

fn open_and_stat(path: &std::path::Path) -> Result<Opened, ResolveError> {
    let c_path = CString::new(path.as_os_str().as_bytes()).map_err(|_| ResolveError::NotFound)?;

    let fd = unsafe { libc::open(c_path.as_ptr(), libc::O_RDONLY | libc::O_NONBLOCK | libc::O_LARGEFILE) };
    if fd < 0 {
        let errno = std::io::Error::last_os_error().raw_os_error().unwrap_or(0);
        return Err(if errno == libc::EACCES {
            ResolveError::Forbidden
        } else {
            ResolveError::NotFound
        });
    }

    let mut st: libc::stat = unsafe { std::mem::zeroed() };
    if unsafe { libc::fstat(fd, &mut st) } < 0 {
        unsafe { libc::close(fd) };
        return Err(ResolveError::InternalError);
    }

    let is_dir = (st.st_mode & libc::S_IFMT) == libc::S_IFDIR;
    let is_reg = (st.st_mode & libc::S_IFMT) == libc::S_IFREG;

    if !is_reg && !is_dir {
        unsafe { libc::close(fd) };
        return Err(ResolveError::Forbidden);
    }

    if is_dir {
        unsafe { libc::close(fd) };
        return Ok(Opened::Directory);
    }

    let file = unsafe { std::fs::File::from_raw_fd(fd) };
    Ok(Opened::File(file, st))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_file(dir: &tempfile::TempDir, name: &str, contents: &[u8]) {
        let path = dir.path().join(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        let mut f = std::fs::File::create(path).unwrap();
        f.write_all(contents).unwrap();
    }

    #[test]
    fn resolves_plain_file() {
        let dir = tempfile::tempdir().unwrap();
        write_file(&dir, "hello.txt", b"hi");
        let resolved = resolve(dir.path(), "hello.txt").ok().unwrap();
        assert_eq!(resolved.size, 2);
        assert_eq!(resolved.mime, "text/plain; charset=utf-8");
    }

    #[test]
    fn directory_falls_back_to_index() {
        let dir = tempfile::tempdir().unwrap();
        write_file(&dir, "pub/index.html", b"<html></html>");
        let resolved = resolve(dir.path(), "pub").ok().unwrap();
        assert_eq!(resolved.size, 13);
    }

    #[test]
    fn directory_of_directory_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("pub/index.html")).unwrap();
        assert!(matches!(resolve(dir.path(), "pub"), Err(ResolveError::NotFound)));
    }

    #[test]
    fn missing_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(resolve(dir.path(), "nope.txt"), Err(ResolveError::NotFound)));
    }

    #[test]
    fn root_target_resolves_to_index() {
        let dir = tempfile::tempdir().unwrap();
        write_file(&dir, "index.html", b"root");
        let resolved = resolve(dir.path(), "").ok().unwrap();
        assert_eq!(resolved.size, 4);
    }

    #[test]
    fn etag_is_mtime_and_size() {
        let dir = tempfile::tempdir().unwrap();
        write_file(&dir, "a.txt", b"abc");
        let resolved = resolve(dir.path(), "a.txt").ok().unwrap();
        assert!(resolved.etag.ends_with("-3"));
    }
}

impl std::fmt::Debug for ResolveError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ResolveError::Forbidden => "Forbidden",
            ResolveError::NotFound => "NotFound",
            ResolveError::InternalError => "InternalError",
        };
        write!(f, "{}", s)
    }
}
