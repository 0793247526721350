//! Per-process descriptor inspection.
//!
//! Socket descriptors show up in `/proc/<pid>/fd` as symlinks whose target
//! reads `socket:[<inode>]`.

use std::path::{Path, PathBuf};

use fencer_common::error::{FencerError, Result};

const SOCKET_LINK_PREFIX: &str = "socket:[";

/// Extracts the inode from a `socket:[<inode>]` link target.
#[must_use]
pub fn extract_socket_inode(target: &str) -> Option<u64> {
    target
        .strip_prefix(SOCKET_LINK_PREFIX)?
        .strip_suffix(']')?
        .parse()
        .ok()
}

fn fd_dir(proc_root: &Path, pid: u32) -> PathBuf {
    proc_root.join(pid.to_string()).join("fd")
}

/// Lists the socket inodes held open by `pid`, reading the procfs at
/// `proc_root`.
///
/// Descriptors closed between listing the directory and reading the link
/// are skipped.
///
/// # Errors
///
/// Returns an error if the descriptor directory cannot be listed (most
/// often because the process has exited) or a link cannot be read.
pub fn process_sockets_in(proc_root: &Path, pid: u32) -> Result<Vec<u64>> {
    let dir = fd_dir(proc_root, pid);
    let entries = std::fs::read_dir(&dir).map_err(|e| FencerError::Io {
        path: dir.clone(),
        source: e,
    })?;

    let mut inodes = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| FencerError::Io {
            path: dir.clone(),
            source: e,
        })?;
        let link = entry.path();
        let target = match std::fs::read_link(&link) {
            Ok(target) => target,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
            Err(e) => return Err(FencerError::Io { path: link, source: e }),
        };
        if let Some(inode) = target.to_str().and_then(extract_socket_inode) {
            inodes.push(inode);
        }
    }
    Ok(inodes)
}

/// Returns the command line of `pid` with arguments joined by spaces, or
/// `None` if it cannot be read or is empty (kernel threads, zombies).
#[must_use]
pub fn cmdline_in(proc_root: &Path, pid: u32) -> Option<String> {
    let raw = std::fs::read(proc_root.join(pid.to_string()).join("cmdline")).ok()?;
    let args: Vec<String> = raw
        .split(|b| *b == 0)
        .filter(|arg| !arg.is_empty())
        .map(|arg| String::from_utf8_lossy(arg).into_owned())
        .collect();
    if args.is_empty() {
        None
    } else {
        Some(args.join(" "))
    }
}

#[cfg(test)]
mod tests {
    use std::os::unix::fs::symlink;

    use super::*;

    #[test]
    fn extracts_inode_from_socket_link() {
        assert_eq!(extract_socket_inode("socket:[12345]"), Some(12345));
        assert_eq!(extract_socket_inode("pipe:[12345]"), None);
        assert_eq!(extract_socket_inode("socket:[abc]"), None);
        assert_eq!(extract_socket_inode("/dev/null"), None);
    }

    #[test]
    fn process_sockets_reads_fake_fd_table() {
        let proc_root = tempfile::tempdir().expect("tempdir");
        let fds = proc_root.path().join("42/fd");
        std::fs::create_dir_all(&fds).expect("mkdir");
        symlink("socket:[111]", fds.join("3")).expect("link");
        symlink("/dev/null", fds.join("0")).expect("link");
        symlink("socket:[222]", fds.join("4")).expect("link");

        let mut inodes = process_sockets_in(proc_root.path(), 42).expect("sockets");
        inodes.sort_unstable();
        assert_eq!(inodes, vec![111, 222]);
    }

    #[test]
    fn exited_process_is_an_error() {
        let proc_root = tempfile::tempdir().expect("tempdir");
        assert!(process_sockets_in(proc_root.path(), 7).is_err());
    }

    #[test]
    fn cmdline_joins_arguments() {
        let proc_root = tempfile::tempdir().expect("tempdir");
        std::fs::create_dir_all(proc_root.path().join("9")).expect("mkdir");
        std::fs::write(proc_root.path().join("9/cmdline"), b"nginx\0-g\0daemon off;\0")
            .expect("write");
        assert_eq!(
            cmdline_in(proc_root.path(), 9).as_deref(),
            Some("nginx -g daemon off;")
        );
        assert_eq!(cmdline_in(proc_root.path(), 10), None);
    }
}
